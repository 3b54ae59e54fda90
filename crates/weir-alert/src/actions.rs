use crate::AlertEvent;
use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;

/// Transport endpoints shared by service-kind actions. Published by the
/// config service; treated as an immutable snapshot per dispatch.
#[derive(Debug, Clone, Default)]
pub struct Transports {
    pub slack_enabled: bool,
    pub slack_url: String,
    pub slack_channel: String,
    pub smtp_enabled: bool,
    pub smtp_gateway_url: String,
    pub smtp_from: String,
}

/// Action kinds this server delivers itself. Other kinds fail validation.
pub const HANDLER_KINDS: &[&str] = &["post", "tcp", "log", "exec", "slack", "smtp"];

const ALWAYS_REDACTED: &[&str] = &["token", "password", "service-key", "api-key"];

/// Option keys whose values never leave the server in plaintext.
pub fn redacted_keys(kind: &str) -> Vec<&'static str> {
    let mut keys = ALWAYS_REDACTED.to_vec();
    if kind == "post" {
        keys.push("url");
    }
    keys
}

/// Replaces sensitive option values with set/unset booleans and returns the
/// list of redacted keys present.
pub fn redact_options(kind: &str, options: &Map<String, Value>) -> (Map<String, Value>, Vec<String>) {
    let sensitive = redacted_keys(kind);
    let mut out = Map::new();
    let mut redacted = Vec::new();
    for (key, value) in options {
        if sensitive.contains(&key.as_str()) {
            let set = !value.is_null()
                && value.as_str().map(|s| !s.is_empty()).unwrap_or(true);
            out.insert(key.clone(), Value::Bool(set));
            redacted.push(key.clone());
        } else {
            out.insert(key.clone(), value.clone());
        }
    }
    (out, redacted)
}

fn require_str<'a>(options: &'a Map<String, Value>, key: &str, kind: &str) -> Result<&'a str> {
    options
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("{kind} action requires option {key:?}"))
}

/// Validates an action definition at handler-create time: known kind and
/// required options present. Delivery problems are runtime concerns and do
/// not fail validation.
pub fn validate_action(kind: &str, options: &Map<String, Value>) -> Result<()> {
    match kind {
        "post" => require_str(options, "url", kind).map(|_| ()),
        "tcp" => require_str(options, "address", kind).map(|_| ()),
        "log" => require_str(options, "path", kind).map(|_| ()),
        "exec" => require_str(options, "prog", kind).map(|_| ()),
        "slack" => Ok(()),
        "smtp" => Ok(()),
        other => Err(anyhow!("unknown handler action kind {other:?}")),
    }
}

/// Executes one action for one event. Failures are returned for the caller
/// to log; they never abort sibling actions.
pub async fn run_action(
    client: &reqwest::Client,
    kind: &str,
    options: &Map<String, Value>,
    event: &AlertEvent,
    transports: &Transports,
) -> Result<()> {
    let payload = event.alert_data();
    match kind {
        "post" => {
            let url = require_str(options, "url", kind)?;
            let resp = client
                .post(url)
                .json(&payload)
                .send()
                .await
                .with_context(|| format!("post to {url}"))?;
            if !resp.status().is_success() {
                return Err(anyhow!("post returned HTTP {}", resp.status()));
            }
            Ok(())
        }
        "tcp" => {
            let address = require_str(options, "address", kind)?;
            let mut stream = tokio::net::TcpStream::connect(address)
                .await
                .with_context(|| format!("connect {address}"))?;
            let mut line = serde_json::to_vec(&payload)?;
            line.push(b'\n');
            stream.write_all(&line).await?;
            stream.flush().await?;
            Ok(())
        }
        "log" => {
            let path = require_str(options, "path", kind)?;
            let mut line = serde_json::to_vec(&payload)?;
            line.push(b'\n');
            let path = path.to_string();
            tokio::task::spawn_blocking(move || -> std::io::Result<()> {
                use std::io::Write;
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)?;
                file.write_all(&line)
            })
            .await?
            .context("append alert log")?;
            Ok(())
        }
        "exec" => {
            let prog = require_str(options, "prog", kind)?;
            let args: Vec<String> = options
                .get("args")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let mut child = tokio::process::Command::new(prog)
                .args(&args)
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("spawn {prog}"))?;
            if let Some(mut stdin) = child.stdin.take() {
                let mut line = serde_json::to_vec(&payload)?;
                line.push(b'\n');
                stdin.write_all(&line).await?;
                drop(stdin);
            }
            let status = tokio::time::timeout(std::time::Duration::from_secs(10), child.wait())
                .await
                .map_err(|_| anyhow!("exec action timed out"))??;
            if !status.success() {
                return Err(anyhow!("exec action exited with {status}"));
            }
            Ok(())
        }
        "slack" => {
            if !transports.slack_enabled {
                return Err(anyhow!("service is not enabled"));
            }
            let channel = options
                .get("channel")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or(&transports.slack_channel);
            let body = serde_json::json!({
                "channel": channel,
                "text": event.message,
                "attachments": [{"text": event.details, "level": event.level}],
            });
            let resp = client
                .post(&transports.slack_url)
                .json(&body)
                .send()
                .await
                .context("post slack webhook")?;
            if !resp.status().is_success() {
                return Err(anyhow!("slack webhook returned HTTP {}", resp.status()));
            }
            Ok(())
        }
        "smtp" => {
            if !transports.smtp_enabled {
                return Err(anyhow!("service is not enabled"));
            }
            let to: Vec<String> = options
                .get("to")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let body = serde_json::json!({
                "from": transports.smtp_from,
                "to": to,
                "subject": event.message,
                "body": payload,
            });
            let resp = client
                .post(&transports.smtp_gateway_url)
                .json(&body)
                .send()
                .await
                .context("post smtp gateway")?;
            if !resp.status().is_success() {
                return Err(anyhow!("smtp gateway returned HTTP {}", resp.status()));
            }
            Ok(())
        }
        other => Err(anyhow!("unknown handler action kind {other:?}")),
    }
}
