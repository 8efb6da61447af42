//! Interactive shell over one long-lived extractor.
//!
//! Unlike the one-shot subcommands, the cache and in-flight table survive
//! between commands here, so repeated extractions are served from memory.

use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Config, Editor, Helper};
use serde_json::Value;

use harvest::Extractor;

use crate::commands::{self, ExtractArgs};

const COMMANDS: &[(&str, &str)] = &[
    ("/extract", "Extract records: /extract <url> [key=value]... [--refresh] [--ignore-robots]"),
    ("/compare", "Extract up to 5 targets side by side"),
    ("/clear-cache", "Drop every cached result"),
    ("/stats", "Show cache size"),
    ("/help", "Show available commands"),
    ("/exit", "Quit the shell"),
];

#[derive(Default)]
struct ShellHelper;

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let input = &line[..pos];
        if input.contains(' ') {
            return Ok((pos, Vec::new()));
        }
        let matches = COMMANDS
            .iter()
            .filter(|(cmd, _)| cmd.starts_with(input))
            .map(|(cmd, desc)| Pair {
                display: format!("{cmd:<14} {desc}"),
                replacement: format!("{cmd} "),
            })
            .collect();
        Ok((0, matches))
    }
}

impl Hinter for ShellHelper {
    type Hint = String;
}
impl Highlighter for ShellHelper {}
impl Validator for ShellHelper {}
impl Helper for ShellHelper {}

/// Parse the arguments of `/extract`.
fn parse_extract(args: &str) -> Result<ExtractArgs, String> {
    let mut parsed = ExtractArgs::default();
    for word in args.split_whitespace() {
        match word {
            "--refresh" => parsed.refresh = true,
            "--ignore-robots" => parsed.ignore_robots = true,
            w if parsed.url.is_empty() => parsed.url = w.to_string(),
            w => parsed.params.push(commands::parse_param(w)?),
        }
    }
    if parsed.url.is_empty() {
        return Err("usage: /extract <url> [key=value]... [--refresh] [--ignore-robots]".into());
    }
    Ok(parsed)
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("  failed to render output: {e}"),
    }
}

fn cmd_help() {
    eprintln!();
    for (cmd, desc) in COMMANDS {
        eprintln!("  {cmd:<14} {desc}");
    }
    eprintln!();
}

/// Run the shell until `/exit` or end of input.
pub async fn run(extractor: Extractor) -> anyhow::Result<()> {
    eprintln!("harvest v{} - type /help for commands", env!("CARGO_PKG_VERSION"));

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<ShellHelper, rustyline::history::DefaultHistory> =
        Editor::with_config(config)?;
    rl.set_helper(Some(ShellHelper));

    loop {
        let line = tokio::task::block_in_place(|| rl.readline("harvest> "));
        let line = match line {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                eprintln!("  (Ctrl+C) Type /exit to quit.");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let input = line.strip_prefix('/').unwrap_or(line);
        let (cmd, args) = input.split_once(' ').unwrap_or((input, ""));
        let args = args.trim();

        let outcome = match cmd {
            "exit" | "quit" => break,
            "help" | "h" | "?" => {
                cmd_help();
                Ok(())
            }
            "extract" => match parse_extract(args) {
                Ok(parsed) => commands::extract(&extractor, &parsed)
                    .await
                    .map(|(value, _)| print_json(&value)),
                Err(usage) => {
                    eprintln!("  {usage}");
                    Ok(())
                }
            },
            "compare" => {
                let urls: Vec<String> = args.split_whitespace().map(str::to_string).collect();
                commands::compare(&extractor, &urls)
                    .await
                    .map(|(value, _)| print_json(&value))
            }
            "clear-cache" => commands::clear_cache(&extractor).map(|value| print_json(&value)),
            "stats" => {
                eprintln!("  cached results: {}", extractor.cache().len());
                Ok(())
            }
            _ => {
                eprintln!("  Unknown command '/{cmd}'. Type /help for commands.");
                Ok(())
            }
        };
        if let Err(e) = outcome {
            eprintln!("  error: {e:#}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extract_words() {
        let parsed = parse_extract("https://example.com/s/homes adults=2 --refresh").unwrap();
        assert_eq!(parsed.url, "https://example.com/s/homes");
        assert_eq!(parsed.params, vec![("adults".to_string(), "2".to_string())]);
        assert!(parsed.refresh);
        assert!(!parsed.ignore_robots);
    }

    #[test]
    fn test_parse_extract_requires_url() {
        assert!(parse_extract("--refresh").is_err());
        assert!(parse_extract("https://example.com/ adults").is_err());
    }
}
