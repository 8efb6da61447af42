//! Robots.txt parsing and the per-origin access policy.
//!
//! Rules match against the path plus query. `*` matches any run of
//! characters and a trailing `$` anchors the rule at the end. Any matching
//! `Allow` wins over every `Disallow`, regardless of rule length.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::Fetcher;
use crate::types::{FetchOptions, Target};

/// Budget for fetching a robots.txt file.
const ROBOTS_TIMEOUT: Duration = Duration::from_secs(10);

/// Parsed robots.txt rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotsTxt {
    /// Rules per user-agent token (lowercase).
    rules: HashMap<String, AgentRules>,
    /// Rules for `*`.
    default_rules: AgentRules,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct AgentRules {
    disallow: Vec<String>,
    /// Override disallow.
    allow: Vec<String>,
}

impl RobotsTxt {
    /// Parse robots.txt content. Unknown directives are ignored.
    pub fn parse(content: &str) -> Self {
        let mut robots = Self::default();
        let mut current_agents: Vec<String> = Vec::new();
        let mut current_rules = AgentRules::default();
        // Consecutive User-agent lines share one group.
        let mut in_rules = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match directive.trim().to_lowercase().as_str() {
                "user-agent" => {
                    if in_rules {
                        robots.store(&mut current_agents, std::mem::take(&mut current_rules));
                        in_rules = false;
                    }
                    if !value.is_empty() {
                        current_agents.push(value.to_lowercase());
                    }
                }
                "disallow" => {
                    in_rules = true;
                    if !value.is_empty() {
                        current_rules.disallow.push(value.to_string());
                    }
                }
                "allow" => {
                    in_rules = true;
                    if !value.is_empty() {
                        current_rules.allow.push(value.to_string());
                    }
                }
                _ => {}
            }
        }

        robots.store(&mut current_agents, current_rules);
        robots
    }

    fn store(&mut self, agents: &mut Vec<String>, rules: AgentRules) {
        for agent in agents.drain(..) {
            if agent == "*" {
                self.default_rules = rules.clone();
            } else {
                self.rules.insert(agent, rules.clone());
            }
        }
    }

    /// Check if a path is allowed for a user-agent.
    ///
    /// A group applies when its token appears in the user-agent string;
    /// otherwise the `*` group does.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        let agent_lower = user_agent.to_lowercase();
        let rules = self
            .rules
            .iter()
            .filter(|(token, _)| agent_lower.contains(token.as_str()))
            .max_by_key(|(token, _)| token.len())
            .map(|(_, rules)| rules)
            .unwrap_or(&self.default_rules);

        // Allow rules take precedence
        if rules.allow.iter().any(|allow| rule_matches(allow, path)) {
            return true;
        }
        !rules
            .disallow
            .iter()
            .any(|disallow| rule_matches(disallow, path))
    }
}

/// Prefix match with `*` wildcards and an optional trailing `$` anchor.
fn rule_matches(rule: &str, path: &str) -> bool {
    let (rule, anchored) = match rule.strip_suffix('$') {
        Some(rule) => (rule, true),
        None => (rule, false),
    };
    let mut parts = rule.split('*');
    let Some(rest) = parts.next().and_then(|first| path.strip_prefix(first)) else {
        return false;
    };

    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        return !anchored || rest.is_empty();
    };

    let mut rest = rest;
    for part in middle {
        match rest.find(part) {
            Some(at) => rest = &rest[at + part.len()..],
            None => return false,
        }
    }
    if anchored {
        rest.ends_with(last)
    } else {
        rest.contains(last)
    }
}

/// Robots.txt gate, resolved once per origin through the page fetcher.
pub struct AccessPolicy {
    fetcher: Arc<dyn Fetcher>,
    user_agent: String,
    /// One cell per origin, so concurrent first lookups share a single fetch.
    rules: DashMap<String, Arc<OnceCell<Arc<RobotsTxt>>>>,
}

impl AccessPolicy {
    pub fn new(fetcher: Arc<dyn Fetcher>, user_agent: impl Into<String>) -> Self {
        Self {
            fetcher,
            user_agent: user_agent.into(),
            rules: DashMap::new(),
        }
    }

    /// Whether the target's path may be fetched.
    ///
    /// An unreachable or non-2xx robots.txt allows everything.
    pub async fn allows(&self, target: &Target, options: &FetchOptions) -> bool {
        let robots = self.rules_for(target, options).await;
        let allowed = robots.is_allowed(&self.user_agent, &target.path_and_query());
        debug!(target = %target, allowed, "robots.txt check");
        allowed
    }

    async fn rules_for(&self, target: &Target, options: &FetchOptions) -> Arc<RobotsTxt> {
        let origin = target.origin();
        let cell = self.rules.entry(origin.clone()).or_default().value().clone();

        let robots = cell
            .get_or_init(|| async {
                let robots_options = FetchOptions {
                    timeout: options.timeout.min(ROBOTS_TIMEOUT),
                    headers: options.headers.clone(),
                    respect_access_policy: false,
                };
                let robots = match self
                    .fetcher
                    .fetch(&target.robots_target(), &robots_options)
                    .await
                {
                    Ok(page) => RobotsTxt::parse(&page.content),
                    Err(e) => {
                        warn!(origin = %origin, error = %e, "robots.txt unavailable, allowing all");
                        RobotsTxt::default()
                    }
                };
                Arc::new(robots)
            })
            .await;
        Arc::clone(robots)
    }
}
