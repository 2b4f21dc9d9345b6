//! Event parsers for auditdog.
//!
//! Each parser owns the correlation state for one event family and turns a
//! single [`RawLogLine`] into zero or one [`SecurityEvent`]. The agent holds
//! them as `Box<dyn EventParser>` in registration order.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

pub mod auditd;
pub mod brute_force;
pub mod privilege;
pub mod ssh;
pub mod tracking;

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;
use std::sync::LazyLock;

use crate::SecurityEvent;

/// One line read from a watched file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLogLine {
    /// Line content with its terminator stripped.
    pub text: String,

    /// Path of the file the line was read from.
    pub source_path: String,

    /// Wall-clock time the watcher read the line.
    pub observed_at: DateTime<Utc>,
}

impl RawLogLine {
    pub fn new(text: impl Into<String>, source_path: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            source_path: source_path.into(),
            observed_at,
        }
    }
}

/// Common capability of every parser.
pub trait EventParser: Send {
    /// Short stable name used in logs.
    fn name(&self) -> &'static str;

    /// Try to turn one line into an event. Lines the parser does not
    /// recognize return `None` without side effects on unrelated state.
    fn parse(&mut self, line: &RawLogLine) -> Option<SecurityEvent>;

    /// Prune windows, dedup maps and partial records relative to `now`.
    fn cleanup(&mut self, now: DateTime<Utc>);

    /// Reverse any mitigation whose time is up and drop short-lived
    /// correlation state. Runs on the expiry pass, far more often than
    /// `cleanup`. Parsers with neither have nothing to do.
    fn release_expired(&mut self, _now: DateTime<Utc>) {}

    /// Release everything held outside the process (locks, firewall rules).
    fn close(&mut self) {}
}

// ---------------------------------------------------------------------------
// Syslog header
// ---------------------------------------------------------------------------

/// Legacy header: "Mon DD HH:MM:SS hostname process[PID]: message"
static RE_LEGACY_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([A-Z][a-z]{2})\s+(\d{1,2})\s+(\d{2}:\d{2}:\d{2})\s+(\S+)\s+([^\s\[:]+)(?:\[(\d+)\])?:\s*(.*)$",
    )
    .expect("regex")
});

/// RFC 3339 header written by rsyslog/journald forwarders:
/// "2024-01-02T03:04:05.123456+00:00 hostname process[PID]: message"
static RE_ISO_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?)\s+(\S+)\s+([^\s\[:]+)(?:\[(\d+)\])?:\s*(.*)$",
    )
    .expect("regex")
});

/// A syslog-style line split into its header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyslogLine<'a> {
    /// Parsed header time, `None` when it could not be interpreted.
    pub timestamp: Option<DateTime<Utc>>,
    pub host: &'a str,
    pub process: &'a str,
    pub pid: Option<u32>,
    pub message: &'a str,
}

/// Split a syslog line in either header format. `reference` anchors the
/// year for legacy headers, which do not carry one.
pub fn split_syslog(text: &str, reference: DateTime<Utc>) -> Option<SyslogLine<'_>> {
    if let Some(caps) = RE_ISO_HEADER.captures(text) {
        return Some(SyslogLine {
            timestamp: parse_iso_timestamp(caps.get(1)?.as_str()),
            host: caps.get(2)?.as_str(),
            process: caps.get(3)?.as_str(),
            pid: caps.get(4).and_then(|m| m.as_str().parse().ok()),
            message: caps.get(5)?.as_str(),
        });
    }

    let caps = RE_LEGACY_HEADER.captures(text)?;
    Some(SyslogLine {
        timestamp: parse_legacy_timestamp(
            caps.get(1)?.as_str(),
            caps.get(2)?.as_str(),
            caps.get(3)?.as_str(),
            reference,
        ),
        host: caps.get(4)?.as_str(),
        process: caps.get(5)?.as_str(),
        pid: caps.get(6).and_then(|m| m.as_str().parse().ok()),
        message: caps.get(7)?.as_str(),
    })
}

// ---------------------------------------------------------------------------
// Timestamp parsing
// ---------------------------------------------------------------------------

/// Parse an ISO header timestamp. Offsets are honored; a bare time is local.
pub fn parse_iso_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    local_to_utc(naive)
}

/// Parse a legacy "Mon DD HH:MM:SS" stamp, written in local time.
///
/// The year comes from `reference`. A stamp that would land more than a day
/// after `reference` belongs to the previous year (December lines read in
/// January).
pub fn parse_legacy_timestamp(
    month: &str,
    day: &str,
    time: &str,
    reference: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let month_num = match month {
        "Jan" => 1, "Feb" => 2, "Mar" => 3, "Apr" => 4,
        "May" => 5, "Jun" => 6, "Jul" => 7, "Aug" => 8,
        "Sep" => 9, "Oct" => 10, "Nov" => 11, "Dec" => 12,
        _ => return None,
    };
    let day_num: u32 = day.trim().parse().ok()?;
    let time = NaiveTime::parse_from_str(time, "%H:%M:%S").ok()?;
    let year = reference.with_timezone(&Local).year();

    let stamp = local_to_utc(NaiveDateTime::new(
        NaiveDate::from_ymd_opt(year, month_num, day_num)?,
        time,
    ))?;
    if stamp - reference > Duration::days(1) {
        return local_to_utc(NaiveDateTime::new(
            NaiveDate::from_ymd_opt(year - 1, month_num, day_num)?,
            time,
        ));
    }
    Some(stamp)
}

fn local_to_utc(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Strip the trailing period some daemons put after user names.
pub fn clean_user(user: &str) -> &str {
    user.trim_end_matches('.')
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_split_legacy_header() {
        let text = format!("{} host sshd[123]: Invalid user test from 10.0.0.5", legacy_stamp(0));
        let parsed = split_syslog(&text, base_time()).expect("should split");
        assert_eq!(parsed.host, "host");
        assert_eq!(parsed.process, "sshd");
        assert_eq!(parsed.pid, Some(123));
        assert_eq!(parsed.message, "Invalid user test from 10.0.0.5");
        assert_eq!(parsed.timestamp, Some(base_time()));
    }

    #[test]
    fn test_split_iso_header() {
        let text = "2024-06-15T12:00:00.123456+00:00 box systemd-logind[77]: New session 4 of user bob.";
        let parsed = split_syslog(text, base_time()).expect("should split");
        assert_eq!(parsed.process, "systemd-logind");
        assert_eq!(parsed.pid, Some(77));
        assert_eq!(parsed.message, "New session 4 of user bob.");
        let ts = parsed.timestamp.expect("timestamp");
        assert_eq!(ts.timestamp(), base_time().timestamp());
    }

    #[test]
    fn test_split_header_without_pid() {
        let text = format!("{} host kernel: eth0 link up", legacy_stamp(0));
        let parsed = split_syslog(&text, base_time()).expect("should split");
        assert_eq!(parsed.process, "kernel");
        assert_eq!(parsed.pid, None);
    }

    #[test]
    fn test_iso_offset_variants() {
        let a = parse_iso_timestamp("2024-06-15T14:00:00+02:00").unwrap();
        let b = parse_iso_timestamp("2024-06-15T14:00:00+0200").unwrap();
        assert_eq!(a, base_time());
        assert_eq!(b, base_time());
    }

    #[test]
    fn test_legacy_year_rollover() {
        let reference: DateTime<Utc> = "2025-01-10T00:00:00Z".parse().unwrap();
        let ts = parse_legacy_timestamp("Dec", "31", "23:59:00", reference).unwrap();
        assert!(ts < reference);
        assert!(reference - ts < Duration::days(12));
    }

    #[test]
    fn test_garbage_does_not_split() {
        assert!(split_syslog("", base_time()).is_none());
        assert!(split_syslog("type=SYSCALL msg=audit(1.0:1): syscall=59", base_time()).is_none());
        assert!(split_syslog("Foo 99 12:00:00 host sshd[1]: x", base_time())
            .and_then(|l| l.timestamp)
            .is_none());
    }

    #[test]
    fn test_clean_user() {
        assert_eq!(clean_user("bob."), "bob");
        assert_eq!(clean_user("bob"), "bob");
    }
}
