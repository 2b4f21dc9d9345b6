//! SSH brute-force parser.
//!
//! Counts failed SSH authentications per source address, per user name and
//! per (address, user) pair. Below the threshold every failure is reported
//! as `ssh_brute_force_attempt`; reaching it reports
//! `ssh_brute_force_detected` and, when blocking is on, blocks the source
//! through the [`IpBlockManager`].
//!
//! Lines from whitelisted or unparseable addresses are left alone so the
//! plain SSH parser can still report them. With attempt events turned off
//! (see [`BruteForceParser::attempt_events`]) the same goes for failures
//! below the threshold: they are still counted, but the line falls through.

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use regex::{Captures, Regex};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::sync::LazyLock;

use crate::parsers::tracking::FailureWindow;
use crate::parsers::{clean_user, split_syslog, EventParser, RawLogLine};
use crate::response::blocker::IpBlockManager;
use crate::{
    capped_minutes, BruteForceAttempt, BruteForceConfig, BruteForceDetected, EventDetail, SecurityEvent, UNKNOWN,
};

/// Failure windows are kept this many windows before pruning.
const WINDOW_LIFETIME_FACTOR: i32 = 2;

/// Connections with a counted failure, reset once this large.
const CONNECTION_TABLE_LIMIT: usize = 1000;

/// Markers one of which a candidate line carries besides "sshd".
const FAILURE_MARKERS: &[&str] = &[
    "Failed ",
    "failure",
    "Invalid user",
    "invalid user",
    "maximum authentication attempts",
    "Connection closed by",
    "Disconnected from",
];

/// Each failed authentication.
static ATTEMPT: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"Failed \S+ for (?:invalid user )?(?P<user>\S*) from (?P<ip>\S+)",
        r"Invalid user (?P<user>\S*) from (?P<ip>\S+)",
        r"pam_unix\(sshd:auth\):\s+authentication failure;.*\brhost=(?P<ip>\S+)(?:\s+user=(?P<user>\S+))?",
        r"error: maximum authentication attempts exceeded for (?:invalid user )?(?P<user>\S+) from (?P<ip>\S+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("regex"))
    .collect()
});

/// Pre-auth teardown. Counts only for a connection with no counted failure.
static CLOSING: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"Connection closed by (?:authenticating|invalid) user (?P<user>\S*) (?P<ip>\S+) port \d+ \[preauth\]",
        r"Disconnected from (?:authenticating|invalid) user (?P<user>\S*) (?P<ip>\S+) port \d+ \[preauth\]",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("regex"))
    .collect()
});

fn first_match<'t>(patterns: &[Regex], message: &'t str) -> Option<Captures<'t>> {
    patterns.iter().find_map(|re| re.captures(message))
}

/// Parse whitelist entries: single addresses or CIDR networks.
pub fn parse_whitelist(entries: &[String]) -> Vec<IpNet> {
    entries
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .filter_map(|entry| {
            let parsed = if entry.contains('/') {
                entry.parse::<IpNet>().ok()
            } else {
                entry.parse::<IpAddr>().ok().map(IpNet::from)
            };
            if parsed.is_none() {
                log::warn!("Invalid whitelist entry '{}', ignoring", entry);
            }
            parsed
        })
        .collect()
}

/// Hashes of lines already processed, oldest dropped first.
#[derive(Debug)]
struct SeenLines {
    capacity: usize,
    order: VecDeque<u64>,
    hashes: HashSet<u64>,
}

impl SeenLines {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(2),
            order: VecDeque::new(),
            hashes: HashSet::new(),
        }
    }

    /// Returns false when `text` was already seen.
    fn insert(&mut self, text: &str) -> bool {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let hash = hasher.finish();
        if !self.hashes.insert(hash) {
            return false;
        }
        self.order.push_back(hash);
        if self.order.len() > self.capacity {
            while self.order.len() > self.capacity / 2 {
                if let Some(old) = self.order.pop_front() {
                    self.hashes.remove(&old);
                }
            }
        }
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

pub struct BruteForceParser {
    threshold: usize,
    window_minutes: u64,
    blocking_enabled: bool,
    block_minutes: u64,
    whitelist: Vec<IpNet>,
    by_ip: FailureWindow<IpAddr>,
    by_user: FailureWindow<String>,
    by_pair: FailureWindow<String>,
    seen: SeenLines,
    connections: HashSet<u32>,
    blocker: Option<IpBlockManager>,
    release_on_close: bool,
    attempt_events: bool,
}

impl BruteForceParser {
    /// `blocker` is only used when the config enables blocking.
    pub fn new(config: &BruteForceConfig, blocker: Option<IpBlockManager>) -> Self {
        let window = capped_minutes(config.window_minutes);
        Self {
            threshold: config.threshold.max(1),
            window_minutes: config.window_minutes,
            blocking_enabled: config.blocking_enabled,
            block_minutes: config.block_minutes,
            whitelist: parse_whitelist(&config.whitelist),
            by_ip: FailureWindow::new(window),
            by_user: FailureWindow::new(window),
            by_pair: FailureWindow::new(window),
            seen: SeenLines::new(config.seen_capacity),
            connections: HashSet::new(),
            blocker,
            release_on_close: true,
            attempt_events: true,
        }
    }

    /// Whether failures below the threshold from an unblocked source produce
    /// `ssh_brute_force_attempt` events. When off they are counted silently
    /// and `parse` returns `None`, leaving the line to the next parser.
    pub fn attempt_events(mut self, enabled: bool) -> Self {
        self.attempt_events = enabled;
        self
    }

    /// Whether `close` lifts the blocks this parser applied.
    pub fn release_on_close(mut self, release: bool) -> Self {
        self.release_on_close = release;
        self
    }

    pub fn is_whitelisted(&self, ip: &IpAddr) -> bool {
        self.whitelist.iter().any(|net| net.contains(ip))
    }

    /// Failures counted for `ip` in the window ending at `now`.
    pub fn failure_count(&self, ip: &IpAddr, now: DateTime<Utc>) -> usize {
        self.by_ip.count(ip, now)
    }

    fn evaluate(&mut self, user: String, ip: IpAddr, at: DateTime<Utc>, count: bool) -> Option<EventDetail> {
        let pair = format!("{}:{}", ip, user);
        let (failure_count, user_failure_count, pair_failure_count) = if count {
            (
                self.by_ip.record(ip, at),
                self.by_user.record(user.clone(), at),
                self.by_pair.record(pair, at),
            )
        } else {
            (
                self.by_ip.count(&ip, at),
                self.by_user.count(&user, at),
                self.by_pair.count(&pair, at),
            )
        };

        if let Some(blocker) = self.blocker.as_ref().filter(|b| b.is_blocked(ip)) {
            return Some(EventDetail::SshBruteForceAttempt(BruteForceAttempt {
                user,
                ip_address: ip.to_string(),
                failure_count,
                user_failure_count,
                pair_failure_count,
                is_blocked: true,
                block_minutes_remaining: blocker.remaining_minutes(ip),
            }));
        }

        if failure_count < self.threshold {
            if !self.attempt_events {
                return None;
            }
            return Some(EventDetail::SshBruteForceAttempt(BruteForceAttempt {
                user,
                ip_address: ip.to_string(),
                failure_count,
                user_failure_count,
                pair_failure_count,
                is_blocked: false,
                block_minutes_remaining: 0,
            }));
        }

        let is_blocked = match (&self.blocker, self.blocking_enabled) {
            (Some(blocker), true) => blocker.block(ip, self.block_minutes),
            _ => false,
        };
        log::warn!(
            "[BRUTE] {} failures from {} within {} minutes (blocked: {})",
            failure_count,
            ip,
            self.window_minutes,
            is_blocked
        );
        Some(EventDetail::SshBruteForceDetected(BruteForceDetected {
            user,
            ip_address: ip.to_string(),
            failure_count,
            user_failure_count,
            pair_failure_count,
            threshold: self.threshold,
            window_minutes: self.window_minutes,
            is_blocked,
            block_minutes: self.block_minutes,
        }))
    }
}

impl EventParser for BruteForceParser {
    fn name(&self) -> &'static str {
        "brute_force"
    }

    fn parse(&mut self, line: &RawLogLine) -> Option<SecurityEvent> {
        if !line.text.contains("sshd") || !FAILURE_MARKERS.iter().any(|m| line.text.contains(m)) {
            return None;
        }

        let (message, pid, at) = match split_syslog(&line.text, line.observed_at) {
            Some(header) => (
                header.message,
                header.pid,
                header.timestamp.unwrap_or(line.observed_at),
            ),
            None => (line.text.as_str(), None, line.observed_at),
        };

        let (caps, closing) = match first_match(&ATTEMPT, message) {
            Some(caps) => (caps, false),
            None => (first_match(&CLOSING, message)?, true),
        };

        let ip: IpAddr = caps.name("ip")?.as_str().parse().ok()?;
        if self.is_whitelisted(&ip) {
            log::debug!("Skipping whitelisted IP {}", ip);
            return None;
        }
        let user = caps
            .name("user")
            .map(|m| clean_user(m.as_str()))
            .filter(|u| !u.is_empty())
            .unwrap_or(UNKNOWN)
            .to_string();

        if !self.seen.insert(&line.text) {
            return None;
        }

        let count = match (pid, closing) {
            (Some(pid), true) => !self.connections.remove(&pid),
            (Some(pid), false) => {
                self.connections.insert(pid);
                true
            }
            (None, _) => true,
        };

        let detail = self.evaluate(user, ip, at, count)?;
        Some(SecurityEvent::new(at, line.source_path.clone(), detail))
    }

    fn cleanup(&mut self, now: DateTime<Utc>) {
        let max_age = self.by_ip.window() * WINDOW_LIFETIME_FACTOR;
        let pruned = self.by_ip.prune(now, max_age)
            + self.by_user.prune(now, max_age)
            + self.by_pair.prune(now, max_age);
        if pruned > 0 {
            log::debug!("[SWEEP] brute_force: dropped {} failure windows", pruned);
        }
        if self.connections.len() > CONNECTION_TABLE_LIMIT {
            self.connections.clear();
        }
    }

    fn release_expired(&mut self, now: DateTime<Utc>) {
        if let Some(blocker) = &self.blocker {
            blocker.release_expired(now);
        }
    }

    fn close(&mut self) {
        if !self.release_on_close {
            return;
        }
        if let Some(blocker) = &self.blocker {
            let released = blocker.release_all();
            if released > 0 {
                log::info!("[UNBLOCK] Released {} blocks on shutdown", released);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::test_support::*;
    use crate::response::blocker::tests::RecordingFirewall;
    use chrono::Duration;
    use std::sync::Arc;

    fn config(blocking: bool) -> BruteForceConfig {
        BruteForceConfig {
            blocking_enabled: blocking,
            ..BruteForceConfig::default()
        }
    }

    fn failed(user: &str, ip: &str, port: u16, offset: i64) -> RawLogLine {
        line(
            &format!(
                "{} host sshd[{}]: Failed password for invalid user {} from {} port {} ssh2",
                legacy_stamp(offset),
                1000 + port,
                user,
                ip,
                port
            ),
            offset,
        )
    }

    fn blocking_parser() -> (BruteForceParser, Arc<RecordingFirewall>, IpBlockManager) {
        let fw = Arc::new(RecordingFirewall::default());
        let blocker = IpBlockManager::new(fw.clone());
        (BruteForceParser::new(&config(true), Some(blocker.clone())), fw, blocker)
    }

    #[test]
    fn test_fifth_failure_detected_and_blocked() {
        let (mut p, fw, blocker) = blocking_parser();
        for i in 0..4 {
            let ev = p.parse(&failed("x", "1.2.3.4", 40000 + i as u16, i * 10)).expect("event");
            match ev.detail {
                EventDetail::SshBruteForceAttempt(a) => {
                    assert_eq!(a.failure_count, i as usize + 1);
                    assert!(!a.is_blocked);
                }
                other => panic!("expected attempt, got {:?}", other),
            }
        }

        let ev = p.parse(&failed("x", "1.2.3.4", 40004, 40)).expect("event");
        match ev.detail {
            EventDetail::SshBruteForceDetected(d) => {
                assert_eq!(d.failure_count, 5);
                assert_eq!(d.threshold, 5);
                assert_eq!(d.ip_address, "1.2.3.4");
                assert_eq!(d.user, "x");
                assert!(d.is_blocked);
            }
            other => panic!("expected detection, got {:?}", other),
        }
        assert!(blocker.is_blocked("1.2.3.4".parse().unwrap()));
        assert_eq!(fw.active_rules(), 1);
    }

    #[test]
    fn test_attempts_while_blocked_do_not_reblock() {
        let (mut p, fw, _blocker) = blocking_parser();
        for i in 0..5 {
            p.parse(&failed("x", "1.2.3.4", 40000 + i as u16, i * 10));
        }
        for i in 5..8 {
            let ev = p.parse(&failed("x", "1.2.3.4", 40000 + i as u16, i * 10)).expect("event");
            match ev.detail {
                EventDetail::SshBruteForceAttempt(a) => {
                    assert!(a.is_blocked);
                    assert_eq!(a.failure_count, i as usize + 1);
                    assert_eq!(a.block_minutes_remaining, 30);
                }
                other => panic!("expected attempt, got {:?}", other),
            }
        }
        assert_eq!(fw.calls().len(), 1);
    }

    #[test]
    fn test_detection_without_blocking() {
        let mut p = BruteForceParser::new(&config(false), None);
        let mut last = None;
        for i in 0..5 {
            last = p.parse(&failed("root", "203.0.113.9", 50000 + i as u16, i * 5));
        }
        match last.expect("event").detail {
            EventDetail::SshBruteForceDetected(d) => assert!(!d.is_blocked),
            other => panic!("expected detection, got {:?}", other),
        }
    }

    #[test]
    fn test_private_ip_detected_but_not_blocked() {
        let (mut p, fw, _blocker) = blocking_parser();
        let mut last = None;
        for i in 0..5 {
            last = p.parse(&failed("admin", "192.168.1.50", 50000 + i as u16, i * 5));
        }
        match last.expect("event").detail {
            EventDetail::SshBruteForceDetected(d) => assert!(!d.is_blocked),
            other => panic!("expected detection, got {:?}", other),
        }
        assert!(fw.calls().is_empty());
    }

    #[test]
    fn test_window_expiry_resets_count() {
        let mut p = BruteForceParser::new(&config(false), None);
        for i in 0..4 {
            p.parse(&failed("x", "1.2.3.4", 40000 + i as u16, i));
        }
        let ev = p.parse(&failed("x", "1.2.3.4", 40010, 6 * 60)).expect("event");
        match ev.detail {
            EventDetail::SshBruteForceAttempt(a) => assert_eq!(a.failure_count, 1),
            other => panic!("expected attempt, got {:?}", other),
        }
    }

    #[test]
    fn test_user_and_pair_counts() {
        let mut p = BruteForceParser::new(&config(false), None);
        p.parse(&failed("admin", "1.2.3.4", 40000, 0));
        p.parse(&failed("admin", "5.6.7.8", 40001, 1));
        let ev = p.parse(&failed("admin", "1.2.3.4", 40002, 2)).expect("event");
        match ev.detail {
            EventDetail::SshBruteForceAttempt(a) => {
                assert_eq!(a.failure_count, 2);
                assert_eq!(a.user_failure_count, 3);
                assert_eq!(a.pair_failure_count, 2);
            }
            other => panic!("expected attempt, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_line_ignored() {
        let mut p = BruteForceParser::new(&config(false), None);
        let l = failed("x", "1.2.3.4", 40000, 0);
        assert!(p.parse(&l).is_some());
        assert!(p.parse(&l).is_none());
        assert_eq!(p.failure_count(&"1.2.3.4".parse().unwrap(), base_time()), 1);
    }

    #[test]
    fn test_whitelist_single_and_cidr() {
        let cfg = BruteForceConfig {
            whitelist: vec!["198.51.100.7".into(), "10.0.0.0/8".into(), "bogus".into()],
            ..BruteForceConfig::default()
        };
        let mut p = BruteForceParser::new(&cfg, None);
        assert!(p.parse(&failed("x", "198.51.100.7", 40000, 0)).is_none());
        assert!(p.parse(&failed("x", "10.20.30.40", 40001, 1)).is_none());
        assert!(p.parse(&failed("x", "198.51.100.8", 40002, 2)).is_some());
    }

    #[test]
    fn test_invalid_ip_left_for_other_parsers() {
        let mut p = BruteForceParser::new(&config(false), None);
        let text = format!(
            "{} host sshd[5]: Failed password for bob from not-an-ip port 22 ssh2",
            legacy_stamp(0)
        );
        assert!(p.parse(&line(&text, 0)).is_none());
    }

    #[test]
    fn test_variants_recognized() {
        let mut p = BruteForceParser::new(&config(false), None);
        let lines = [
            "sshd[20]: Invalid user oracle from 203.0.113.5 port 51234",
            "sshd[21]: pam_unix(sshd:auth): authentication failure; logname= uid=0 euid=0 tty=ssh ruser= rhost=203.0.113.5  user=root",
            "sshd[22]: error: maximum authentication attempts exceeded for root from 203.0.113.5 port 51236 ssh2 [preauth]",
            "sshd[23]: Connection closed by authenticating user git 203.0.113.5 port 51237 [preauth]",
        ];
        for (i, text) in lines.iter().enumerate() {
            let full = format!("{} host {}", legacy_stamp(i as i64), text);
            let ev = p.parse(&line(&full, i as i64)).unwrap_or_else(|| panic!("no event for {}", text));
            assert_eq!(ev.ip_address(), Some("203.0.113.5"));
        }
        assert_eq!(p.failure_count(&"203.0.113.5".parse().unwrap(), base_time() + Duration::seconds(3)), 4);
    }

    #[test]
    fn test_closing_line_not_counted_twice_for_connection() {
        let mut p = BruteForceParser::new(&config(false), None);
        let failed = format!(
            "{} host sshd[77]: Failed password for invalid user pi from 203.0.113.6 port 6000 ssh2",
            legacy_stamp(0)
        );
        let closed = format!(
            "{} host sshd[77]: Connection closed by invalid user pi 203.0.113.6 port 6000 [preauth]",
            legacy_stamp(1)
        );
        p.parse(&line(&failed, 0));
        let ev = p.parse(&line(&closed, 1)).expect("event");
        match ev.detail {
            EventDetail::SshBruteForceAttempt(a) => assert_eq!(a.failure_count, 1),
            other => panic!("expected attempt, got {:?}", other),
        }
    }

    #[test]
    fn test_unrelated_lines() {
        let mut p = BruteForceParser::new(&config(false), None);
        let accepted = format!("{} host sshd[1]: Accepted publickey for a from 1.2.3.4 port 22 ssh2", legacy_stamp(0));
        let sudo = format!("{} host sudo: pam_unix(sudo:auth): authentication failure; user=a", legacy_stamp(0));
        assert!(p.parse(&line(&accepted, 0)).is_none());
        assert!(p.parse(&line(&sudo, 0)).is_none());
    }

    #[test]
    fn test_release_and_close() {
        let (mut p, fw, blocker) = blocking_parser();
        for i in 0..5 {
            p.parse(&failed("x", "1.2.3.4", 40000 + i as u16, i));
        }
        p.release_expired(Utc::now() + Duration::minutes(31));
        assert!(!blocker.is_blocked("1.2.3.4".parse().unwrap()));
        assert_eq!(fw.active_rules(), 0);

        for i in 5..10 {
            p.parse(&failed("y", "5.6.7.8", 40000 + i as u16, i));
        }
        assert_eq!(fw.active_rules(), 1);
        p.close();
        assert_eq!(fw.active_rules(), 0);
    }

    #[test]
    fn test_cleanup_prunes_windows() {
        let mut p = BruteForceParser::new(&config(false), None);
        p.parse(&failed("x", "1.2.3.4", 40000, 0));
        p.cleanup(base_time() + Duration::minutes(11));
        assert!(p.by_ip.is_empty());
        assert!(p.by_user.is_empty());
        assert!(p.by_pair.is_empty());
    }

    #[test]
    fn test_silent_attempts_fall_through_until_threshold() {
        let fw = Arc::new(RecordingFirewall::default());
        let blocker = IpBlockManager::new(fw.clone());
        let mut p = BruteForceParser::new(&config(true), Some(blocker)).attempt_events(false);
        for i in 0..4 {
            assert!(p.parse(&failed("x", "203.0.113.20", 40000 + i as u16, i)).is_none());
        }
        assert_eq!(p.failure_count(&"203.0.113.20".parse().unwrap(), base_time() + Duration::seconds(3)), 4);

        let ev = p.parse(&failed("x", "203.0.113.20", 40004, 4)).expect("detection");
        assert_eq!(ev.kind(), crate::EventKind::SshBruteForceDetected);

        // Blocked sources are still claimed.
        let ev = p.parse(&failed("x", "203.0.113.20", 40005, 5)).expect("blocked attempt");
        match ev.detail {
            EventDetail::SshBruteForceAttempt(a) => assert!(a.is_blocked),
            other => panic!("expected attempt, got {:?}", other),
        }
        assert_eq!(fw.calls().len(), 1);
    }

    #[test]
    fn test_seen_lines_bounded() {
        let mut seen = SeenLines::new(10);
        for i in 0..11 {
            assert!(seen.insert(&format!("line {}", i)));
        }
        assert_eq!(seen.len(), 5);
        // The oldest were dropped, the newest are still known.
        assert!(seen.insert("line 0"));
        assert!(!seen.insert("line 10"));
    }
}
