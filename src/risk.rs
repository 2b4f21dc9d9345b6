//! Command risk scoring.
//!
//! Completed `command_execution` events can be sent to a scoring service
//! that answers with a risk level and a reason. The service is optional:
//! any failure leaves the event unscored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{CommandConfig, CommandExecution, RiskLevel};

/// Request body sent to the scoring service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandRequest {
    pub command: String,
    pub arguments: String,
    pub username: String,
    pub working_directory: String,
    pub timestamp: DateTime<Utc>,
}

impl CommandRequest {
    pub fn from_event(exec: &CommandExecution, timestamp: DateTime<Utc>) -> Self {
        Self {
            command: exec.command.clone(),
            arguments: exec.arguments.clone(),
            username: exec.user.clone(),
            working_directory: exec.working_directory.clone(),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    #[serde(default, alias = "risk_reason")]
    pub reason: String,
}

impl RiskAssessment {
    /// Copy the verdict onto an execution event.
    pub fn apply(&self, exec: &mut CommandExecution) {
        exec.risk_level = self.risk_level;
        exec.risk_reason = self.reason.clone();
    }
}

/// Anything that can rate a command.
pub trait RiskScorer: Send + Sync {
    fn assess(&self, request: &CommandRequest) -> Option<RiskAssessment>;
}

/// Scores commands through `POST {api_url}/commands/risk-assessment`.
pub struct HttpRiskScorer {
    url: String,
    agent: ureq::Agent,
}

impl HttpRiskScorer {
    pub fn new(api_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            url: format!("{}/commands/risk-assessment", api_url.trim_end_matches('/')),
            agent,
        }
    }

    pub fn from_config(config: &CommandConfig) -> Self {
        Self::new(&config.api_url, Duration::from_secs(config.risk_timeout_secs))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl RiskScorer for HttpRiskScorer {
    fn assess(&self, request: &CommandRequest) -> Option<RiskAssessment> {
        let body = match serde_json::to_value(request) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Cannot encode risk request: {}", e);
                return None;
            }
        };

        match self.agent.post(&self.url).send_json(body) {
            Ok(response) => match response.into_json::<RiskAssessment>() {
                Ok(assessment) => Some(assessment),
                Err(e) => {
                    log::warn!("Risk service returned an unreadable body: {}", e);
                    None
                }
            },
            Err(ureq::Error::Status(code, response)) => {
                let text = response.into_string().unwrap_or_default();
                log::warn!("Risk service error ({}): {}", code, text.trim());
                None
            }
            Err(e) => {
                log::warn!("Risk service unreachable at {}: {}", self.url, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec() -> CommandExecution {
        CommandExecution {
            user: "alice".into(),
            uid: "1000".into(),
            pid: "4242".into(),
            command: "curl".into(),
            arguments: "http://example.com/x.sh".into(),
            executable: "/usr/bin/curl".into(),
            working_directory: "/tmp".into(),
            audit_id: "77".into(),
            risk_level: RiskLevel::Unknown,
            risk_reason: String::new(),
        }
    }

    #[test]
    fn test_request_body_shape() {
        let ts: DateTime<Utc> = "2024-06-15T12:00:00Z".parse().unwrap();
        let req = CommandRequest::from_event(&exec(), ts);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["command"], "curl");
        assert_eq!(json["username"], "alice");
        assert_eq!(json["working_directory"], "/tmp");
        assert_eq!(json["timestamp"], "2024-06-15T12:00:00Z");
    }

    #[test]
    fn test_assessment_parses_and_applies() {
        let a: RiskAssessment =
            serde_json::from_str(r#"{"risk_level":"high","reason":"downloads a script"}"#).unwrap();
        let mut e = exec();
        a.apply(&mut e);
        assert_eq!(e.risk_level, RiskLevel::High);
        assert_eq!(e.risk_reason, "downloads a script");

        let b: RiskAssessment = serde_json::from_str(r#"{"risk_level":"minimal"}"#).unwrap();
        assert_eq!(b.reason, "");
    }

    #[test]
    fn test_url_joined_once() {
        let s = HttpRiskScorer::new("http://localhost:8000/api/v1/", Duration::from_secs(1));
        assert_eq!(s.url(), "http://localhost:8000/api/v1/commands/risk-assessment");
    }

    #[test]
    fn test_unreachable_service_is_unscored() {
        // Port 9 on localhost: nothing listens, the connection is refused.
        let s = HttpRiskScorer::new("http://127.0.0.1:9", Duration::from_millis(500));
        let req = CommandRequest::from_event(&exec(), Utc::now());
        assert!(s.assess(&req).is_none());
    }
}
