//! Console output for events, query results and store stats.

use chrono::Local;
use std::fmt::Write;

use crate::storage::{StoreStats, StoredEvent};
use crate::{EventDetail, PrivilegeSubtype, SecurityEvent};

/// One line per event, local time first.
///
/// Example: `2024-06-15 12:00:05 [BRUTE FORCE] 203.0.113.9 user=root failures=5/5 in 5m, BLOCKED 30m`
pub fn event_line(event: &SecurityEvent) -> String {
    let time = event.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");
    let body = match &event.detail {
        EventDetail::SshLoginSuccess {
            user,
            ip_address,
            auth_method,
            port,
            degraded,
        } => format!(
            "[SSH LOGIN] {} from {}:{} via {}{}",
            user,
            ip_address,
            port,
            auth_method,
            if *degraded { " (session only)" } else { "" }
        ),
        EventDetail::SshLoginFailed {
            user,
            ip_address,
            auth_method,
            ..
        } => format!("[SSH FAILED] {} from {} via {}", user, ip_address, auth_method),
        EventDetail::SshInvalidUser { user, ip_address, .. } => {
            format!("[SSH INVALID USER] {} from {}", user, ip_address)
        }
        EventDetail::SshConnectionClosed { user, ip_address, .. } => {
            format!("[SSH CLOSED] {} from {}", user, ip_address)
        }
        EventDetail::CommandExecution(c) => {
            let mut line = format!("[COMMAND] {} ran {}", c.user, c.command);
            if !c.arguments.is_empty() {
                let _ = write!(line, " {}", c.arguments);
            }
            let _ = write!(line, " in {} (risk {})", c.working_directory, c.risk_level.as_str());
            if !c.risk_reason.is_empty() {
                let _ = write!(line, ": {}", c.risk_reason);
            }
            line
        }
        EventDetail::PrivilegeEscalation(p) => {
            let label = match p.subtype {
                PrivilegeSubtype::SudoExec => "SUDO",
                PrivilegeSubtype::SudoAuthFailure => "SUDO FAILED",
                PrivilegeSubtype::SuSessionOpened => "SU",
                PrivilegeSubtype::SuAuthFailure => "SU FAILED",
            };
            let mut line = format!("[{}] {}", label, p.description);
            if p.subtype.is_failure() {
                let _ = write!(line, " (failures={})", p.failure_count);
            }
            if p.user_locked_out {
                let _ = write!(line, ", LOCKED {}m", p.lockout_minutes);
            } else if p.threshold_exceeded {
                line.push_str(", THRESHOLD EXCEEDED");
            }
            line
        }
        EventDetail::SshBruteForceAttempt(a) => {
            let mut line = format!(
                "[BRUTE ATTEMPT] {} user={} failures={}",
                a.ip_address, a.user, a.failure_count
            );
            if a.is_blocked {
                let _ = write!(line, ", blocked ({}m left)", a.block_minutes_remaining);
            }
            line
        }
        EventDetail::SshBruteForceDetected(d) => {
            let mut line = format!(
                "[BRUTE FORCE] {} user={} failures={}/{} in {}m",
                d.ip_address, d.user, d.failure_count, d.threshold, d.window_minutes
            );
            if d.is_blocked {
                let _ = write!(line, ", BLOCKED {}m", d.block_minutes);
            }
            line
        }
    };
    format!("{} {}", time, body)
}

pub fn stats_table(stats: &StoreStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Total events:  {}", stats.total_events);
    let _ = writeln!(out, "Unique users:  {}", stats.unique_users);
    let _ = writeln!(out, "Unique IPs:    {}", stats.unique_ips);
    let last = stats
        .last_event_time
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    let _ = writeln!(out, "Last event:    {}", last);

    if !stats.events_by_type.is_empty() {
        let _ = writeln!(out);
        let width = stats.events_by_type.keys().map(|k| k.len()).max().unwrap_or(0);
        for (kind, count) in &stats.events_by_type {
            let _ = writeln!(out, "  {:<width$}  {:>6}", kind, count, width = width);
        }
    }
    out
}

pub fn query_table(events: &[StoredEvent]) -> String {
    if events.is_empty() {
        return "No matching events.\n".to_string();
    }
    let mut out = String::new();
    for stored in events {
        let _ = writeln!(out, "{}", event_line(&stored.event));
    }
    let _ = writeln!(out, "{} event(s)", events.len());
    out
}
