//! # auditdog - Core Library
//!
//! Host-based intrusion-detection agent.
//!
//! auditdog tails the system authentication and audit logs, recognizes
//! security-relevant activity (SSH logins and failures, sudo/su escalation,
//! SSH brute-force campaigns, command executions), stitches fragmented audit
//! records back into whole events, suppresses duplicates, and applies
//! temporary mitigations (account lockout, IP block) when thresholds trip.
//!
//! ## Layout
//! - [`watcher`] follows one log file and hands each new line to a callback.
//! - [`parsers`] turn raw lines into [`SecurityEvent`]s, one parser per family.
//! - [`response`] holds the lockout and block managers plus notifications.
//! - [`agent`] wires watchers, parsers and collaborators together.
//! - [`storage`] and [`risk`] are the local event store and the remote scorer.

pub mod agent;
pub mod parsers;
pub mod render;
pub mod response;
pub mod risk;
pub mod storage;
pub mod watcher;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Placeholder for any field the log line did not carry.
pub const UNKNOWN: &str = "unknown";

/// Upper bound for every configured window, timeout and mitigation term.
pub const MAX_CONFIG_MINUTES: u64 = 366 * 24 * 60;

/// `minutes` as a chrono duration, capped at [`MAX_CONFIG_MINUTES`].
pub fn capped_minutes(minutes: u64) -> chrono::Duration {
    chrono::Duration::minutes(minutes.min(MAX_CONFIG_MINUTES) as i64)
}

/// `secs` as a chrono duration, capped at [`MAX_CONFIG_MINUTES`].
pub fn capped_seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_CONFIG_MINUTES * 60) as i64)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Unified error type for auditdog.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Response action failed: {0}")]
    Response(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("File notification error: {0}")]
    Notify(#[from] notify::Error),
}

pub type AgentResult<T> = Result<T, AgentError>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Top-level configuration for auditdog.
///
/// Loaded from `auditdog.toml` in the working directory or a path supplied
/// via CLI flag. Every section falls back to its defaults, so a partial file
/// only needs the keys it changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Daemon-wide settings.
    pub general: GeneralConfig,

    /// Which files to watch.
    pub log_sources: LogSourcesConfig,

    /// SSH session parser.
    pub ssh: SshConfig,

    /// Auditd command-execution parser.
    pub command: CommandConfig,

    /// Privilege-escalation parser and account lockout.
    pub privilege: PrivilegeConfig,

    /// SSH brute-force parser and IP blocking.
    pub brute_force: BruteForceConfig,

    /// Outbound notifications.
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the event store.
    pub data_dir: PathBuf,

    /// Read watched files from byte 0 instead of their current end.
    pub from_beginning: bool,

    /// Backstop polling interval for watchers, in milliseconds.
    pub poll_interval_ms: u64,

    /// How often parser state is pruned and store retention applied.
    pub sweep_interval_secs: u64,

    /// How often expired locks and blocks are reversed.
    pub expiry_interval_secs: u64,

    /// Stored events older than this are deleted by the sweep.
    pub retention_days: u32,

    /// Upper bound on how long shutdown waits for in-flight work.
    pub shutdown_grace_ms: u64,

    /// Reverse active locks and blocks when the agent stops.
    pub release_on_shutdown: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSourcesConfig {
    /// Authentication logs. Empty means auto-detect.
    pub auth_log_paths: Vec<PathBuf>,

    /// The auditd log, if command monitoring is wanted.
    pub audit_log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Window in which redundant login lines for one user are merged.
    pub dedup_window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Window in which the same user/command/arguments is reported once.
    pub dedup_window_secs: u64,

    /// Partial audit records older than this are dropped.
    pub partial_timeout_secs: u64,

    /// Accounts whose executions never produce events.
    pub system_accounts: Vec<String>,

    /// passwd file used to turn uids into names.
    pub passwd_path: Option<PathBuf>,

    /// Send completed commands to the remote risk scorer.
    pub risk_scoring: bool,

    /// Base URL of the risk-scoring API.
    pub api_url: String,

    /// Client-side timeout for a risk assessment.
    pub risk_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivilegeConfig {
    /// Failures within the window that trip the threshold.
    pub failure_threshold: usize,

    /// Sliding failure window, in minutes.
    pub window_minutes: u64,

    /// Lock the account when the threshold trips.
    pub lockout_enabled: bool,

    /// How long an automatic lock lasts.
    pub lockout_minutes: u64,

    /// Kill the user's processes after a successful lock.
    pub terminate_sessions: bool,

    /// Accounts never tracked or locked.
    pub excluded_users: Vec<String>,

    /// Window for suppressing repeated lines about the same action.
    pub dedup_window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BruteForceConfig {
    /// Failures from one IP within the window that trip detection.
    pub threshold: usize,

    /// Sliding failure window, in minutes.
    pub window_minutes: u64,

    /// Insert a firewall rule when detection trips.
    pub blocking_enabled: bool,

    /// How long a block lasts.
    pub block_minutes: u64,

    /// Addresses or CIDR networks that are never counted.
    pub whitelist: Vec<String>,

    /// Port the block rule applies to.
    pub ssh_port: u16,

    /// Maximum number of remembered line hashes.
    pub seen_capacity: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Webhook receiving alert payloads. None disables notifications.
    pub webhook_url: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./auditdog-data"),
            from_beginning: false,
            poll_interval_ms: 100,
            sweep_interval_secs: 3600,
            expiry_interval_secs: 60,
            retention_days: 30,
            shutdown_grace_ms: 1500,
            release_on_shutdown: true,
        }
    }
}

impl Default for LogSourcesConfig {
    fn default() -> Self {
        Self {
            auth_log_paths: vec![],
            audit_log_path: Some(PathBuf::from("/var/log/audit/audit.log")),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self { dedup_window_secs: 5 }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 5,
            partial_timeout_secs: 30,
            system_accounts: parsers::auditd::DEFAULT_SYSTEM_ACCOUNTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            passwd_path: Some(PathBuf::from("/etc/passwd")),
            risk_scoring: false,
            api_url: "http://localhost:8000/api/v1".to_string(),
            risk_timeout_secs: 5,
        }
    }
}

impl Default for PrivilegeConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            window_minutes: 30,
            lockout_enabled: false,
            lockout_minutes: 15,
            terminate_sessions: false,
            excluded_users: vec!["root".to_string()],
            dedup_window_secs: 5,
        }
    }
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            window_minutes: 5,
            blocking_enabled: false,
            block_minutes: 30,
            whitelist: vec![],
            ssh_port: 22,
            seen_capacity: 10_000,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> AgentResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AgentConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject windows, timeouts and terms longer than [`MAX_CONFIG_MINUTES`].
    pub fn validate(&self) -> AgentResult<()> {
        let minutes = [
            ("privilege.window_minutes", self.privilege.window_minutes),
            ("privilege.lockout_minutes", self.privilege.lockout_minutes),
            ("brute_force.window_minutes", self.brute_force.window_minutes),
            ("brute_force.block_minutes", self.brute_force.block_minutes),
        ];
        let seconds = [
            ("general.sweep_interval_secs", self.general.sweep_interval_secs),
            ("general.expiry_interval_secs", self.general.expiry_interval_secs),
            ("ssh.dedup_window_secs", self.ssh.dedup_window_secs),
            ("command.dedup_window_secs", self.command.dedup_window_secs),
            ("command.partial_timeout_secs", self.command.partial_timeout_secs),
            ("command.risk_timeout_secs", self.command.risk_timeout_secs),
            ("privilege.dedup_window_secs", self.privilege.dedup_window_secs),
        ];

        for (name, value) in minutes {
            if value > MAX_CONFIG_MINUTES {
                return Err(AgentError::Config(format!(
                    "{} = {} exceeds the maximum of {} minutes",
                    name, value, MAX_CONFIG_MINUTES
                )));
            }
        }
        for (name, value) in seconds {
            if value > MAX_CONFIG_MINUTES * 60 {
                return Err(AgentError::Config(format!(
                    "{} = {} exceeds the maximum of {} seconds",
                    name,
                    value,
                    MAX_CONFIG_MINUTES * 60
                )));
            }
        }
        Ok(())
    }

    /// Write the default configuration to a TOML file.
    pub fn write_default(path: &std::path::Path) -> AgentResult<()> {
        let config = Self::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| AgentError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// One structured security event, as emitted by a parser.
///
/// Serialized flat: `{"timestamp": .., "source": .., "event": "<kind>", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// When the event happened, from the log when it carries a time.
    pub timestamp: DateTime<Utc>,

    /// Path of the log file the event came from.
    pub source: String,

    #[serde(flatten)]
    pub detail: EventDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventDetail {
    SshLoginSuccess {
        user: String,
        ip_address: String,
        auth_method: String,
        port: String,
        /// Reconstructed from a session line without the matching Accepted.
        degraded: bool,
    },
    SshLoginFailed {
        user: String,
        ip_address: String,
        auth_method: String,
        port: String,
    },
    SshInvalidUser {
        user: String,
        ip_address: String,
        port: String,
    },
    SshConnectionClosed {
        user: String,
        ip_address: String,
        port: String,
    },
    CommandExecution(CommandExecution),
    PrivilegeEscalation(PrivilegeEscalation),
    SshBruteForceAttempt(BruteForceAttempt),
    SshBruteForceDetected(BruteForceDetected),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandExecution {
    pub user: String,
    pub uid: String,
    pub pid: String,
    pub command: String,
    /// Arguments after argv[0], joined by single spaces.
    pub arguments: String,
    pub executable: String,
    pub working_directory: String,
    pub audit_id: String,
    pub risk_level: RiskLevel,
    pub risk_reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegeEscalation {
    pub subtype: PrivilegeSubtype,
    pub user: String,
    pub target_user: String,
    pub command: String,
    pub tty: String,
    pub working_directory: String,
    pub success: bool,
    pub failure_count: usize,
    pub threshold_exceeded: bool,
    pub user_locked_out: bool,
    pub lockout_minutes: u64,
    pub lockout_message: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeSubtype {
    SudoExec,
    SudoAuthFailure,
    SuSessionOpened,
    SuAuthFailure,
}

impl PrivilegeSubtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivilegeSubtype::SudoExec => "sudo_exec",
            PrivilegeSubtype::SudoAuthFailure => "sudo_auth_failure",
            PrivilegeSubtype::SuSessionOpened => "su_session_opened",
            PrivilegeSubtype::SuAuthFailure => "su_auth_failure",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, PrivilegeSubtype::SudoAuthFailure | PrivilegeSubtype::SuAuthFailure)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BruteForceAttempt {
    pub user: String,
    pub ip_address: String,
    pub failure_count: usize,
    pub user_failure_count: usize,
    pub pair_failure_count: usize,
    pub is_blocked: bool,
    pub block_minutes_remaining: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BruteForceDetected {
    pub user: String,
    pub ip_address: String,
    pub failure_count: usize,
    pub user_failure_count: usize,
    pub pair_failure_count: usize,
    pub threshold: usize,
    pub window_minutes: u64,
    pub is_blocked: bool,
    pub block_minutes: u64,
}

/// Risk levels returned by the scoring service, plus `Unknown` for unscored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Unknown,
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Unknown => UNKNOWN,
            RiskLevel::Minimal => "minimal",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// The event kinds, without payload. Used for filtering and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SshLoginSuccess,
    SshLoginFailed,
    SshInvalidUser,
    SshConnectionClosed,
    CommandExecution,
    PrivilegeEscalation,
    SshBruteForceAttempt,
    SshBruteForceDetected,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::SshLoginSuccess,
        EventKind::SshLoginFailed,
        EventKind::SshInvalidUser,
        EventKind::SshConnectionClosed,
        EventKind::CommandExecution,
        EventKind::PrivilegeEscalation,
        EventKind::SshBruteForceAttempt,
        EventKind::SshBruteForceDetected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SshLoginSuccess => "ssh_login_success",
            EventKind::SshLoginFailed => "ssh_login_failed",
            EventKind::SshInvalidUser => "ssh_invalid_user",
            EventKind::SshConnectionClosed => "ssh_connection_closed",
            EventKind::CommandExecution => "command_execution",
            EventKind::PrivilegeEscalation => "privilege_escalation",
            EventKind::SshBruteForceAttempt => "ssh_brute_force_attempt",
            EventKind::SshBruteForceDetected => "ssh_brute_force_detected",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| AgentError::Config(format!("unknown event type: {}", s)))
    }
}

impl SecurityEvent {
    pub fn new(timestamp: DateTime<Utc>, source: impl Into<String>, detail: EventDetail) -> Self {
        Self {
            timestamp,
            source: source.into(),
            detail,
        }
    }

    pub fn kind(&self) -> EventKind {
        match &self.detail {
            EventDetail::SshLoginSuccess { .. } => EventKind::SshLoginSuccess,
            EventDetail::SshLoginFailed { .. } => EventKind::SshLoginFailed,
            EventDetail::SshInvalidUser { .. } => EventKind::SshInvalidUser,
            EventDetail::SshConnectionClosed { .. } => EventKind::SshConnectionClosed,
            EventDetail::CommandExecution(_) => EventKind::CommandExecution,
            EventDetail::PrivilegeEscalation(_) => EventKind::PrivilegeEscalation,
            EventDetail::SshBruteForceAttempt(_) => EventKind::SshBruteForceAttempt,
            EventDetail::SshBruteForceDetected(_) => EventKind::SshBruteForceDetected,
        }
    }

    /// The acting user, whatever the kind.
    pub fn user(&self) -> &str {
        match &self.detail {
            EventDetail::SshLoginSuccess { user, .. }
            | EventDetail::SshLoginFailed { user, .. }
            | EventDetail::SshInvalidUser { user, .. }
            | EventDetail::SshConnectionClosed { user, .. } => user,
            EventDetail::CommandExecution(c) => &c.user,
            EventDetail::PrivilegeEscalation(p) => &p.user,
            EventDetail::SshBruteForceAttempt(a) => &a.user,
            EventDetail::SshBruteForceDetected(d) => &d.user,
        }
    }

    /// The remote address, or `None` for kinds that never carry one.
    pub fn ip_address(&self) -> Option<&str> {
        match &self.detail {
            EventDetail::SshLoginSuccess { ip_address, .. }
            | EventDetail::SshLoginFailed { ip_address, .. }
            | EventDetail::SshInvalidUser { ip_address, .. }
            | EventDetail::SshConnectionClosed { ip_address, .. } => Some(ip_address),
            EventDetail::SshBruteForceAttempt(a) => Some(&a.ip_address),
            EventDetail::SshBruteForceDetected(d) => Some(&d.ip_address),
            EventDetail::CommandExecution(_) | EventDetail::PrivilegeEscalation(_) => None,
        }
    }

    /// Whether this event is worth pushing to the notification channel.
    pub fn is_alert_worthy(&self) -> bool {
        match &self.detail {
            EventDetail::SshBruteForceDetected(_) => true,
            EventDetail::PrivilegeEscalation(p) => p.threshold_exceeded,
            EventDetail::CommandExecution(c) => c.risk_level >= RiskLevel::High,
            _ => false,
        }
    }
}

/// Fill an absent or empty captured field with `UNKNOWN`.
pub fn or_unknown(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SecurityEvent {
        SecurityEvent::new(
            "2024-01-02T03:04:05Z".parse().unwrap(),
            "/var/log/auth.log",
            EventDetail::SshInvalidUser {
                user: "test".into(),
                ip_address: "10.0.0.5".into(),
                port: UNKNOWN.into(),
            },
        )
    }

    #[test]
    fn test_event_serializes_flat_with_tag() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["event"], "ssh_invalid_user");
        assert_eq!(json["user"], "test");
        assert_eq!(json["ip_address"], "10.0.0.5");
        assert_eq!(json["source"], "/var/log/auth.log");
    }

    #[test]
    fn test_event_json_roundtrip() {
        let event = sample();
        let text = serde_json::to_string(&event).unwrap();
        let back: SecurityEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_event_kind_parse() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("nope".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::Minimal > RiskLevel::Unknown);
        let json = serde_json::to_string(&RiskLevel::High).unwrap();
        assert_eq!(json, "\"high\"");
    }

    #[test]
    fn test_or_unknown() {
        assert_eq!(or_unknown(None), "unknown");
        assert_eq!(or_unknown(Some("")), "unknown");
        assert_eq!(or_unknown(Some("bob")), "bob");
    }

    #[test]
    fn test_default_config_roundtrips_through_toml() {
        let text = toml::to_string_pretty(&AgentConfig::default()).unwrap();
        let back: AgentConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.brute_force.threshold, 5);
        assert_eq!(back.privilege.failure_threshold, 3);
        assert_eq!(back.general.retention_days, 30);
    }

    #[test]
    fn test_oversized_durations_rejected() {
        assert!(AgentConfig::default().validate().is_ok());

        let mut config = AgentConfig::default();
        config.brute_force.block_minutes = u64::MAX;
        match config.validate() {
            Err(AgentError::Config(msg)) => assert!(msg.contains("brute_force.block_minutes")),
            other => panic!("expected config error, got {:?}", other),
        }

        let mut config = AgentConfig::default();
        config.command.partial_timeout_secs = MAX_CONFIG_MINUTES * 60 + 1;
        assert!(config.validate().is_err());

        let config: AgentConfig = toml::from_str("[privilege]\nwindow_minutes = 9223372036854775807\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_config_file_rejected() {
        let path = std::env::temp_dir().join("auditdog_oversized_config.toml");
        std::fs::write(&path, "[privilege]\nlockout_minutes = 9223372036854775807\n").unwrap();
        let result = AgentConfig::from_file(&path);
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result, Err(AgentError::Config(_))));
    }

    #[test]
    fn test_capped_durations_do_not_overflow() {
        assert_eq!(capped_minutes(5), chrono::Duration::minutes(5));
        assert_eq!(capped_minutes(u64::MAX), chrono::Duration::minutes(MAX_CONFIG_MINUTES as i64));
        assert_eq!(capped_seconds(u64::MAX), chrono::Duration::minutes(MAX_CONFIG_MINUTES as i64));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AgentConfig = toml::from_str("[brute_force]\nthreshold = 7\n").unwrap();
        assert_eq!(config.brute_force.threshold, 7);
        assert_eq!(config.brute_force.window_minutes, 5);
        assert_eq!(config.ssh.dedup_window_secs, 5);
    }
}
