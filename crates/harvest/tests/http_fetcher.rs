//! HttpFetcher behaviour against a local mock server.

use std::time::{Duration, Instant};

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use harvest::{FetchError, FetchOptions, Fetcher, HarvestConfig, HttpFetcher, Target};

fn fetcher() -> HttpFetcher {
    let config = HarvestConfig {
        retry_base_delay_ms: 10,
        ..HarvestConfig::default()
    };
    HttpFetcher::new(&config).unwrap()
}

fn target(server: &MockServer, route: &str) -> Target {
    Target::parse(&format!("{}{route}", server.uri())).unwrap()
}

#[tokio::test]
async fn test_fetch_success_sends_client_identity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/s/homes"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = fetcher();
    let page = fetcher
        .fetch(&target(&server, "/s/homes"), &FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(page.status, 200);
    assert_eq!(page.content, "<html>ok</html>");

    let requests = server.received_requests().await.unwrap();
    let ua = requests[0].headers.get("user-agent").unwrap();
    assert_eq!(ua.to_str().unwrap(), fetcher.user_agent());
    let language = requests[0].headers.get("accept-language").unwrap();
    assert_eq!(language.to_str().unwrap(), "en-US,en;q=0.9");
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    let err = fetcher()
        .fetch(&target(&server, "/s/homes"), &FetchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 429, .. }));
}

#[tokio::test]
async fn test_server_error_retried_until_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let err = fetcher()
        .fetch(&target(&server, "/s/homes"), &FetchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 503, .. }));
}

#[tokio::test]
async fn test_server_error_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .mount(&server)
        .await;

    let page = fetcher()
        .fetch(&target(&server, "/rooms/1"), &FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(page.content, "recovered");
}

#[tokio::test]
async fn test_slow_server_hits_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let options = FetchOptions {
        timeout: Duration::from_millis(200),
        ..FetchOptions::default()
    };
    let started = Instant::now();
    let err = fetcher()
        .fetch(&target(&server, "/s/homes"), &options)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Timeout { attempts: 1, .. }));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_header_override_replaces_default() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("user-agent", "custom-agent/2.0"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hi"))
        .expect(1)
        .mount(&server)
        .await;

    let options = FetchOptions {
        headers: vec![("User-Agent".to_string(), "custom-agent/2.0".to_string())],
        ..FetchOptions::default()
    };
    let page = fetcher()
        .fetch(&target(&server, "/"), &options)
        .await
        .unwrap();
    assert_eq!(page.content, "hi");
}
