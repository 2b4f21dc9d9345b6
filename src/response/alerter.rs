//! # Alert Notifications
//!
//! Pushes alert-worthy events to an external channel. Delivery is fire and
//! forget: failures are logged and never reach the detection path.
//!
//! The webhook payload is a single JSON object:
//! - `text`: one-line summary, readable as-is by Slack/Discord/Teams hooks
//! - `kind`: the event kind
//! - `hostname`: the reporting host
//! - `event`: the full event

use serde_json::Value;
use std::time::Duration;

use crate::{AgentError, AgentResult, EventKind};

/// Anything that can deliver an alert.
pub trait Notifier: Send + Sync {
    fn send_alert(&self, kind: EventKind, payload: &Value);
}

/// Used when no channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn send_alert(&self, kind: EventKind, _payload: &Value) {
        log::trace!("No notification channel for {}", kind);
    }
}

/// Sends alerts via HTTP POST. 5 second timeout.
pub struct WebhookNotifier {
    url: String,
    hostname: String,
    agent: ureq::Agent,
}

impl WebhookNotifier {
    /// The URL must start with http:// or https://.
    pub fn new(url: &str) -> AgentResult<Self> {
        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(AgentError::Config(format!(
                "Webhook URL must start with http:// or https://, got: {}",
                url
            )));
        }
        Ok(Self {
            url: url.to_string(),
            hostname: hostname_string(),
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(5))
                .build(),
        })
    }

    fn body(&self, kind: EventKind, payload: &Value) -> Value {
        serde_json::json!({
            "text": format!("auditdog alert on {}: {}", self.hostname, summary(kind, payload)),
            "kind": kind.as_str(),
            "hostname": self.hostname,
            "event": payload,
        })
    }
}

impl Notifier for WebhookNotifier {
    fn send_alert(&self, kind: EventKind, payload: &Value) {
        let result = self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_string(&self.body(kind, payload).to_string());

        match result {
            Ok(response) => {
                log::info!(
                    "[WEBHOOK] POST to {} succeeded (status {}): {}",
                    self.url,
                    response.status(),
                    kind
                );
            }
            Err(e) => {
                log::warn!("[WEBHOOK] POST to {} failed: {} ({} still stored locally)", self.url, e, kind);
            }
        }
    }
}

/// Short human summary of an event payload.
fn summary(kind: EventKind, payload: &Value) -> String {
    let field = |name: &str| payload.get(name).and_then(Value::as_str).unwrap_or(crate::UNKNOWN);
    match kind {
        EventKind::SshBruteForceDetected => format!(
            "SSH brute force from {} ({} failures, blocked: {})",
            field("ip_address"),
            payload.get("failure_count").and_then(Value::as_u64).unwrap_or(0),
            payload.get("is_blocked").and_then(Value::as_bool).unwrap_or(false)
        ),
        EventKind::PrivilegeEscalation => field("description").to_string(),
        EventKind::CommandExecution => format!(
            "{} risk command by {}: {} {}",
            field("risk_level"),
            field("user"),
            field("command"),
            field("arguments")
        )
        .trim_end()
        .to_string(),
        other => format!("{} for {}", other, field("user")),
    }
}

/// Get the system hostname, falling back to "unknown" on error.
pub fn hostname_string() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| crate::UNKNOWN.to_string())
}
