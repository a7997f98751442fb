//! Console email provider: prints formatted messages to stdout instead of
//! sending them. Used in development environments (§4.10).

use std::io::IsTerminal;

use async_trait::async_trait;
use regex::Regex;

use crate::message::{EmailMessage, EmailResult};
use crate::provider::EmailProvider;

const CI_ENV_VARS: &[&str] = &["CI", "CONTINUOUS_INTEGRATION", "GITHUB_ACTIONS", "GITLAB_CI", "JENKINS_URL"];

/// Decides whether to emit ANSI color codes, honoring `FORCE_COLOR`,
/// Docker/CI detection, and TTY-ness, in that priority order.
fn supports_color() -> bool {
    match std::env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") => return true,
        Ok("0") | Ok("false") => return false,
        _ => {}
    }
    if std::path::Path::new("/.dockerenv").exists() {
        return false;
    }
    if CI_ENV_VARS.iter().any(|v| std::env::var(v).is_ok()) {
        return false;
    }
    if std::env::var("TERM").as_deref() == Ok("dumb") {
        return false;
    }
    std::io::stdout().is_terminal()
}

fn extract_links(html: &str) -> Vec<(&'static str, String)> {
    let href = Regex::new(r#"href="([^"]+)""#).expect("valid regex");
    href.captures_iter(html)
        .filter_map(|c| {
            let link = c.get(1)?.as_str();
            let lower = link.to_lowercase();
            let label = if lower.contains("verify") {
                "Verification Link"
            } else if lower.contains("reset") {
                "Reset Link"
            } else if ["confirm", "token", "activate"].iter().any(|k| lower.contains(k)) {
                "Link"
            } else {
                return None;
            };
            Some((label, link.to_owned()))
        })
        .collect()
}

fn boxed(title: &str, color: bool) -> String {
    let width = 80;
    let bar = "=".repeat(width);
    if color {
        format!("\x1b[36m{bar}\x1b[0m\n\x1b[1m{title}\x1b[0m\n\x1b[36m{bar}\x1b[0m")
    } else {
        format!("{bar}\n{title}\n{bar}")
    }
}

/// Prints messages to stdout in a human-scannable, ASCII-boxed form with the
/// most important links (verification/reset) pulled to the top.
pub struct ConsoleProvider {
    color: bool,
}

impl ConsoleProvider {
    pub fn new() -> Self {
        ConsoleProvider {
            color: supports_color(),
        }
    }

    fn render(&self, message: &EmailMessage) -> String {
        let mut out = String::new();
        out.push('\n');
        out.push_str(&boxed("EMAIL CONSOLE OUTPUT (development mode)", self.color));
        out.push('\n');
        out.push_str(&format!("To: {}\n", message.to.join(", ")));
        if !message.cc.is_empty() {
            out.push_str(&format!("CC: {}\n", message.cc.join(", ")));
        }
        if let Some(from) = &message.from_email {
            match &message.from_name {
                Some(name) => out.push_str(&format!("From: {name} <{from}>\n")),
                None => out.push_str(&format!("From: {from}\n")),
            }
        }
        out.push_str(&format!("Subject: {}\n", message.subject));
        out.push_str(&"-".repeat(80));
        out.push('\n');

        if let Some(html) = &message.html_body {
            let links = extract_links(html);
            if links.is_empty() {
                out.push_str(html);
                out.push('\n');
            } else {
                for (label, link) in links {
                    out.push_str(&format!("{label}: {link}\n"));
                }
            }
        } else if let Some(text) = &message.text_body {
            out.push_str(text);
            out.push('\n');
        }

        out.push_str(&"=".repeat(80));
        out.push('\n');
        out
    }
}

impl Default for ConsoleProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmailProvider for ConsoleProvider {
    fn name(&self) -> &str {
        "console"
    }

    async fn send(&self, message: &EmailMessage) -> EmailResult {
        println!("{}", self.render(message));
        EmailResult::success(self.name(), format!("console-{}", uuid::Uuid::new_v4()))
    }

    async fn verify_configuration(&self) -> bool {
        true
    }
}
