//! SSH session parser.
//!
//! Recognizes sshd and systemd-logind lines from `/var/log/auth.log` (or
//! `/var/log/secure`) in both the legacy syslog and the ISO header format:
//! accepted logins, PAM session opens, logind new sessions, failed logins,
//! invalid users and closed connections.
//!
//! One login usually shows up three times (Accepted, the PAM session line,
//! the logind session line). Only the first is reported; the other two are
//! swallowed while the login is still recent.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

use chrono::{DateTime, Duration, Utc};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::parsers::tracking::RecentEvents;
use crate::parsers::{clean_user, split_syslog, EventParser, RawLogLine};
use crate::{capped_seconds, or_unknown, EventDetail, SecurityEvent, SshConfig, UNKNOWN};

/// The pid table is reset once it grows past this many entries.
const PID_TABLE_LIMIT: usize = 1000;

/// Login records live this many dedup windows before the sweep drops them.
const RECORD_LIFETIME_FACTOR: i32 = 10;

// ---------------------------------------------------------------------------
// Patterns, most specific first within each family
// ---------------------------------------------------------------------------

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| Regex::new(p).expect("regex")).collect()
}

static ACCEPTED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"^Accepted (?P<method>\S+) for (?P<user>\S+) from (?P<ip>\S+) port (?P<port>\d+)",
        r"^Accepted (?P<method>\S+) for (?P<user>\S+) from (?P<ip>\S+)",
    ])
});

static PAM_SESSION: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[r"pam_unix\(sshd:session\): session opened for user (?P<user>[^\s(]+)"])
});

static NEW_SESSION: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"^New session (?P<session>\S+) of user (?P<user>\S+?)\.?$",
        r"^New session (?P<session>\S+) of user (?P<user>\S+)",
    ])
});

static FAILED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"^Failed (?P<method>\S+) for invalid user (?P<user>\S*) from (?P<ip>\S+) port (?P<port>\d+)",
        r"^Failed (?P<method>\S+) for (?P<user>\S+) from (?P<ip>\S+) port (?P<port>\d+)",
        r"^Failed (?P<method>\S+) for (?:invalid user )?(?P<user>\S+) from (?P<ip>\S+)",
        r"pam_unix\(sshd:auth\): authentication failure;.*\brhost=(?P<ip>\S+)(?:\s+user=(?P<user>\S+))?",
    ])
});

static INVALID_USER: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"^Invalid user (?P<user>\S*) from (?P<ip>\S+) port (?P<port>\d+)",
        r"^Invalid user (?P<user>\S*) from (?P<ip>\S+)",
    ])
});

static CONNECTION_CLOSED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"^Connection closed by (?:(?:authenticating|invalid) user (?P<user>\S+) )?(?P<ip>\S+) port (?P<port>\d+)",
        r"^Disconnected from (?:(?:authenticating|invalid) )?user (?P<user>\S+) (?P<ip>\S+) port (?P<port>\d+)",
        r"^Disconnected from (?P<ip>\S+) port (?P<port>\d+)",
        r"^Connection closed by (?P<ip>\S+)$",
    ])
});

fn first_match<'t>(patterns: &[Regex], message: &'t str) -> Option<Captures<'t>> {
    patterns.iter().find_map(|re| re.captures(message))
}

fn group<'t>(caps: &Captures<'t>, name: &str) -> Option<&'t str> {
    caps.name(name).map(|m| m.as_str())
}

// ---------------------------------------------------------------------------
// SshParser
// ---------------------------------------------------------------------------

/// Where an sshd child's login came from, keyed by its pid.
#[derive(Debug, Clone)]
struct SessionOrigin {
    user: String,
    ip: String,
}

pub struct SshParser {
    dedup_window: Duration,
    /// user -> time of the last login we reported.
    recent_logins: RecentEvents<String>,
    /// sshd pid -> login origin, for lines that omit user or address.
    sessions: HashMap<u32, SessionOrigin>,
}

impl SshParser {
    pub fn new(config: &SshConfig) -> Self {
        let dedup_window = capped_seconds(config.dedup_window_secs);
        Self {
            dedup_window,
            recent_logins: RecentEvents::new(dedup_window),
            sessions: HashMap::new(),
        }
    }

    /// Number of users with a login record still held.
    pub fn tracked_logins(&self) -> usize {
        self.recent_logins.len()
    }

    /// Number of sshd pids currently correlated.
    pub fn tracked_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn remember_session(&mut self, pid: Option<u32>, user: &str, ip: &str) {
        let Some(pid) = pid else { return };
        if self.sessions.len() >= PID_TABLE_LIMIT {
            log::debug!("sshd pid table reached {} entries, resetting", self.sessions.len());
            self.sessions.clear();
        }
        self.sessions.insert(
            pid,
            SessionOrigin {
                user: user.to_string(),
                ip: ip.to_string(),
            },
        );
    }

    /// A login already reported within the window is redundant; otherwise
    /// the session line becomes a degraded login of its own.
    fn secondary_session(
        &mut self,
        user: &str,
        ip: String,
        at: DateTime<Utc>,
    ) -> Option<EventDetail> {
        if self.recent_logins.check_and_mark(user.to_string(), at) {
            log::trace!("Suppressing redundant session line for {}", user);
            return None;
        }
        Some(EventDetail::SshLoginSuccess {
            user: user.to_string(),
            ip_address: ip,
            auth_method: UNKNOWN.to_string(),
            port: UNKNOWN.to_string(),
            degraded: true,
        })
    }
}

impl EventParser for SshParser {
    fn name(&self) -> &'static str {
        "ssh"
    }

    fn parse(&mut self, line: &RawLogLine) -> Option<SecurityEvent> {
        // Quick reject before any regex work.
        if !line.text.contains("sshd") && !line.text.contains("systemd-logind") {
            return None;
        }

        let header = split_syslog(&line.text, line.observed_at)?;
        let at = header.timestamp.unwrap_or(line.observed_at);
        let message = header.message;

        let detail = if header.process == "systemd-logind" {
            let caps = first_match(&NEW_SESSION, message)?;
            let user = clean_user(group(&caps, "user")?).to_string();
            self.secondary_session(&user, UNKNOWN.to_string(), at)?
        } else if header.process.starts_with("sshd") {
            self.parse_sshd(header.pid, message, at)?
        } else {
            return None;
        };

        Some(SecurityEvent::new(at, line.source_path.clone(), detail))
    }

    fn cleanup(&mut self, now: DateTime<Utc>) {
        let evicted = self
            .recent_logins
            .evict_older_than(now, self.dedup_window * RECORD_LIFETIME_FACTOR);
        if evicted > 0 {
            log::debug!("[SWEEP] ssh: dropped {} login records", evicted);
        }
        if self.sessions.len() > PID_TABLE_LIMIT {
            log::debug!("[SWEEP] ssh: resetting pid table ({} entries)", self.sessions.len());
            self.sessions.clear();
        }
    }
}

impl SshParser {
    fn parse_sshd(&mut self, pid: Option<u32>, message: &str, at: DateTime<Utc>) -> Option<EventDetail> {
        if let Some(caps) = first_match(&ACCEPTED, message) {
            let user = clean_user(group(&caps, "user")?).to_string();
            let ip = or_unknown(group(&caps, "ip"));
            if self.recent_logins.check_and_mark(user.clone(), at) {
                log::trace!("Suppressing repeated Accepted line for {}", user);
                return None;
            }
            self.remember_session(pid, &user, &ip);
            return Some(EventDetail::SshLoginSuccess {
                user,
                ip_address: ip,
                auth_method: or_unknown(group(&caps, "method")),
                port: or_unknown(group(&caps, "port")),
                degraded: false,
            });
        }

        if let Some(caps) = first_match(&PAM_SESSION, message) {
            let user = clean_user(group(&caps, "user")?).to_string();
            let ip = pid
                .and_then(|p| self.sessions.get(&p))
                .filter(|origin| origin.user == user)
                .map(|origin| origin.ip.clone())
                .unwrap_or_else(|| UNKNOWN.to_string());
            return self.secondary_session(&user, ip, at);
        }

        if let Some(caps) = first_match(&FAILED, message) {
            let method = if message.contains("pam_unix(sshd:auth)") {
                Some("pam")
            } else {
                group(&caps, "method")
            };
            return Some(EventDetail::SshLoginFailed {
                user: or_unknown(group(&caps, "user").map(clean_user)),
                ip_address: or_unknown(group(&caps, "ip")),
                auth_method: or_unknown(method),
                port: or_unknown(group(&caps, "port")),
            });
        }

        if let Some(caps) = first_match(&INVALID_USER, message) {
            return Some(EventDetail::SshInvalidUser {
                user: or_unknown(group(&caps, "user").map(clean_user)),
                ip_address: or_unknown(group(&caps, "ip")),
                port: or_unknown(group(&caps, "port")),
            });
        }

        if let Some(caps) = first_match(&CONNECTION_CLOSED, message) {
            let origin = pid.and_then(|p| self.sessions.remove(&p));
            let user = match group(&caps, "user") {
                Some(u) => clean_user(u).to_string(),
                None => origin.map(|o| o.user).unwrap_or_else(|| UNKNOWN.to_string()),
            };
            return Some(EventDetail::SshConnectionClosed {
                user,
                ip_address: or_unknown(group(&caps, "ip")),
                port: or_unknown(group(&caps, "port")),
            });
        }

        log::trace!("ssh: no pattern for sshd message: {}", message);
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
