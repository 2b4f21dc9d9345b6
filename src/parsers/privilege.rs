//! Privilege-escalation parser.
//!
//! Reports sudo command executions, sudo authentication failures, su
//! sessions and su authentication failures. Failures are counted per
//! invoking user; once a user reaches the threshold the event is flagged
//! and, when enabled, the account is locked through the
//! [`AccountLockoutManager`].

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::parsers::tracking::{FailureWindow, RecentEvents};
use crate::parsers::{split_syslog, EventParser, RawLogLine};
use crate::response::lockout::AccountLockoutManager;
use crate::{
    capped_minutes, capped_seconds, or_unknown, EventDetail, PrivilegeConfig, PrivilegeEscalation, PrivilegeSubtype,
    SecurityEvent, UNKNOWN,
};

/// Substrings one of which every candidate line carries.
const PREFILTER: &[&str] = &["sudo", " su[", " su:", "(su:", "(su-l:"];

/// Dedup keys and failure windows live this many windows.
const STATE_LIFETIME_FACTOR: i32 = 5;

/// "alice : TTY=pts/0 ; PWD=/home/alice ; USER=root ; COMMAND=/usr/bin/id"
static RE_SUDO_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<user>[^\s:]+)\s*:\s*(?P<rest>.*\b(?:TTY|PWD|USER|COMMAND)=.*)$")
        .expect("regex")
});

static RE_SUDO_PAM_AUTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"pam_unix\(sudo(?:-i)?:auth\):\s*authentication failure").expect("regex")
});

static RE_SU_SESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"pam_unix\(su(?:-l)?:session\):\s*session opened for user (?P<target>[^\s(]+)(?:\(uid=\d+\))?(?:\s+by\s+(?P<user>[^\s(]*)(?:\(uid=(?P<uid>\d+)\))?)?",
    )
    .expect("regex")
});

static RE_SU_PAM_AUTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"pam_unix\(su(?:-l)?:auth\):\s*authentication failure").expect("regex")
});

/// "FAILED SU (to root) alice on pts/0"
static RE_SU_FAILED_TO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^FAILED SU \(to (?P<target>[^)]+)\) (?P<user>\S+)(?: on (?P<tty>\S+))?").expect("regex")
});

/// "FAILED su for root by alice" / "Successful su for root by alice"
static RE_SU_RESULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<result>Successful|FAILED) su for (?P<target>\S+) by (?P<user>\S+)").expect("regex")
});

/// Value of `key=` among whitespace-separated PAM fields, if non-empty.
fn pam_field<'a>(message: &'a str, key: &str) -> Option<&'a str> {
    message.split_whitespace().find_map(|token| {
        token
            .strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('='))
            .filter(|v| !v.is_empty())
    })
}

/// Embedded name if present, else a placeholder derived from the uid.
fn display_user(name: Option<&str>, uid: Option<&str>) -> String {
    match (name.filter(|n| !n.is_empty()), uid.filter(|u| !u.is_empty())) {
        (Some(name), _) => name.to_string(),
        (None, Some(uid)) => format!("user_{}", uid),
        (None, None) => UNKNOWN.to_string(),
    }
}

/// What a single line says, before correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Observation {
    subtype: PrivilegeSubtype,
    user: String,
    target_user: String,
    command: String,
    tty: String,
    working_directory: String,
    reason: Option<String>,
}

impl Observation {
    fn new(subtype: PrivilegeSubtype, user: String, target_user: String) -> Self {
        Self {
            subtype,
            user,
            target_user,
            command: UNKNOWN.to_string(),
            tty: UNKNOWN.to_string(),
            working_directory: UNKNOWN.to_string(),
            reason: None,
        }
    }
}

type DedupKey = (PrivilegeSubtype, String, String, i64);

pub struct PrivilegeParser {
    threshold: usize,
    lockout_enabled: bool,
    lockout_minutes: u64,
    terminate_sessions: bool,
    excluded: HashSet<String>,
    failures: FailureWindow<String>,
    recent: RecentEvents<DedupKey>,
    lockout: Option<AccountLockoutManager>,
    release_on_close: bool,
}

impl PrivilegeParser {
    /// `lockout` is only consulted when the config enables lockout.
    pub fn new(config: &PrivilegeConfig, lockout: Option<AccountLockoutManager>) -> Self {
        Self {
            threshold: config.failure_threshold.max(1),
            lockout_enabled: config.lockout_enabled,
            lockout_minutes: config.lockout_minutes,
            terminate_sessions: config.terminate_sessions,
            excluded: config.excluded_users.iter().cloned().collect(),
            failures: FailureWindow::new(capped_minutes(config.window_minutes)),
            recent: RecentEvents::new(capped_seconds(config.dedup_window_secs)),
            lockout,
            release_on_close: true,
        }
    }

    /// Whether `close` lifts the locks this parser applied.
    pub fn release_on_close(mut self, release: bool) -> Self {
        self.release_on_close = release;
        self
    }

    /// Failures currently counted for `user`.
    pub fn failure_count(&self, user: &str, now: DateTime<Utc>) -> usize {
        self.failures.count(&user.to_string(), now)
    }

    fn observe(&self, process: &str, message: &str) -> Option<Observation> {
        match process {
            "sudo" => Self::observe_sudo(message),
            "su" => Self::observe_su(message),
            _ => None,
        }
    }

    fn observe_sudo(message: &str) -> Option<Observation> {
        if RE_SUDO_PAM_AUTH.is_match(message) {
            let user = pam_field(message, "user")
                .or_else(|| pam_field(message, "ruser"))
                .or_else(|| pam_field(message, "logname"));
            let mut obs = Observation::new(
                PrivilegeSubtype::SudoAuthFailure,
                display_user(user, pam_field(message, "uid")),
                UNKNOWN.to_string(),
            );
            obs.tty = or_unknown(pam_field(message, "tty"));
            obs.reason = Some("authentication failure".into());
            return Some(obs);
        }

        let caps = RE_SUDO_COMMAND.captures(message)?;
        let user = caps.name("user")?.as_str().to_string();
        let rest = caps.name("rest")?.as_str();

        // COMMAND= is last and may itself contain " ; ".
        let (fields, command) = match rest.find("COMMAND=") {
            Some(idx) => (&rest[..idx], Some(rest[idx + "COMMAND=".len()..].trim())),
            None => (rest, None),
        };

        let mut obs = Observation::new(PrivilegeSubtype::SudoExec, user, UNKNOWN.to_string());
        obs.command = or_unknown(command);
        let mut reasons = Vec::new();
        for segment in fields.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            if let Some(v) = segment.strip_prefix("TTY=") {
                obs.tty = or_unknown(Some(v));
            } else if let Some(v) = segment.strip_prefix("PWD=") {
                obs.working_directory = or_unknown(Some(v));
            } else if let Some(v) = segment.strip_prefix("USER=") {
                obs.target_user = or_unknown(Some(v));
            } else {
                reasons.push(segment);
            }
        }

        let failed = reasons.iter().any(|r| {
            r.contains("incorrect password attempt")
                || r.contains("NOT in sudoers")
                || r.contains("authentication failure")
        });
        if failed {
            obs.subtype = PrivilegeSubtype::SudoAuthFailure;
            obs.reason = Some(reasons.join("; "));
        }
        Some(obs)
    }

    fn observe_su(message: &str) -> Option<Observation> {
        if let Some(caps) = RE_SU_SESSION.captures(message) {
            let user = display_user(
                caps.name("user").map(|m| m.as_str()),
                caps.name("uid").map(|m| m.as_str()),
            );
            let target = caps.name("target")?.as_str().to_string();
            return Some(Observation::new(PrivilegeSubtype::SuSessionOpened, user, target));
        }

        if RE_SU_PAM_AUTH.is_match(message) {
            let user = pam_field(message, "ruser").or_else(|| pam_field(message, "logname"));
            let mut obs = Observation::new(
                PrivilegeSubtype::SuAuthFailure,
                display_user(user, pam_field(message, "uid")),
                or_unknown(pam_field(message, "user")),
            );
            obs.tty = or_unknown(pam_field(message, "tty"));
            obs.reason = Some("authentication failure".into());
            return Some(obs);
        }

        if let Some(caps) = RE_SU_FAILED_TO.captures(message) {
            let mut obs = Observation::new(
                PrivilegeSubtype::SuAuthFailure,
                caps.name("user")?.as_str().to_string(),
                caps.name("target")?.as_str().to_string(),
            );
            obs.tty = or_unknown(caps.name("tty").map(|m| m.as_str()));
            obs.reason = Some("authentication failure".into());
            return Some(obs);
        }

        let caps = RE_SU_RESULT.captures(message)?;
        let user = caps.name("user")?.as_str().to_string();
        let target = caps.name("target")?.as_str().to_string();
        if &caps["result"] == "Successful" {
            Some(Observation::new(PrivilegeSubtype::SuSessionOpened, user, target))
        } else {
            let mut obs = Observation::new(PrivilegeSubtype::SuAuthFailure, user, target);
            obs.reason = Some("authentication failure".into());
            Some(obs)
        }
    }

    /// Turn an observation into the emitted event, counting failures and
    /// applying lockout.
    fn correlate(&mut self, obs: Observation, at: DateTime<Utc>) -> PrivilegeEscalation {
        let mut event = PrivilegeEscalation {
            subtype: obs.subtype,
            user: obs.user,
            target_user: obs.target_user,
            command: obs.command,
            tty: obs.tty,
            working_directory: obs.working_directory,
            success: !obs.subtype.is_failure(),
            failure_count: 0,
            threshold_exceeded: false,
            user_locked_out: false,
            lockout_minutes: 0,
            lockout_message: String::new(),
            description: String::new(),
        };

        let tracked = obs.subtype.is_failure()
            && event.user != UNKNOWN
            && !self.excluded.contains(&event.user);
        if tracked {
            event.failure_count = self.failures.record(event.user.clone(), at);
            event.threshold_exceeded = event.failure_count >= self.threshold;
        }

        if event.threshold_exceeded {
            self.apply_lockout(&mut event);
        }

        event.description = describe(&event, obs.reason.as_deref(), self.failures.window());
        event
    }

    fn apply_lockout(&self, event: &mut PrivilegeEscalation) {
        let manager = match (&self.lockout, self.lockout_enabled) {
            (Some(manager), true) => manager,
            _ => return,
        };
        let (locked, message) = manager.lock(&event.user, self.lockout_minutes);
        if locked && self.terminate_sessions {
            manager.terminate_sessions(&event.user);
        }
        event.user_locked_out = locked || manager.is_locked(&event.user);
        event.lockout_minutes = if event.user_locked_out {
            manager.remaining_minutes(&event.user)
        } else {
            0
        };
        event.lockout_message = message;
    }
}

fn describe(event: &PrivilegeEscalation, reason: Option<&str>, window: Duration) -> String {
    let mut text = match event.subtype {
        PrivilegeSubtype::SudoExec => format!(
            "{} ran sudo as {}: {}",
            event.user, event.target_user, event.command
        ),
        PrivilegeSubtype::SudoAuthFailure => format!(
            "sudo authentication failure for {} ({})",
            event.user,
            reason.unwrap_or("authentication failure")
        ),
        PrivilegeSubtype::SuSessionOpened => {
            format!("{} opened a su session as {}", event.user, event.target_user)
        }
        PrivilegeSubtype::SuAuthFailure => {
            format!("su authentication failure: {} to {}", event.user, event.target_user)
        }
    };
    if event.threshold_exceeded {
        text.push_str(&format!(
            "; {} failures within {} minutes",
            event.failure_count,
            window.num_minutes()
        ));
    }
    if event.user_locked_out {
        text.push_str(&format!("; account locked for {} minutes", event.lockout_minutes));
    }
    text
}

impl EventParser for PrivilegeParser {
    fn name(&self) -> &'static str {
        "privilege"
    }

    fn parse(&mut self, line: &RawLogLine) -> Option<SecurityEvent> {
        if !PREFILTER.iter().any(|p| line.text.contains(p)) {
            return None;
        }

        let header = split_syslog(&line.text, line.observed_at)?;
        let at = header.timestamp.unwrap_or(line.observed_at);
        let obs = self.observe(header.process, header.message)?;

        let key = (
            obs.subtype,
            obs.user.clone(),
            obs.target_user.clone(),
            at.timestamp().div_euclid(60),
        );
        if self.recent.check_and_mark(key, at) {
            return None;
        }

        let event = self.correlate(obs, at);
        if event.threshold_exceeded {
            log::warn!("[PRIV] {}", event.description);
        }
        Some(SecurityEvent::new(
            at,
            line.source_path.clone(),
            EventDetail::PrivilegeEscalation(event),
        ))
    }

    fn cleanup(&mut self, now: DateTime<Utc>) {
        let dropped = self
            .recent
            .evict_older_than(now, self.recent.window() * STATE_LIFETIME_FACTOR);
        let pruned = self
            .failures
            .prune(now, self.failures.window() * STATE_LIFETIME_FACTOR);
        if dropped + pruned > 0 {
            log::debug!(
                "[SWEEP] privilege: dropped {} dedup keys, {} failure windows",
                dropped,
                pruned
            );
        }
    }

    fn release_expired(&mut self, now: DateTime<Utc>) {
        if let Some(manager) = &self.lockout {
            manager.release_expired(now);
        }
    }

    fn close(&mut self) {
        if !self.release_on_close {
            return;
        }
        if let Some(manager) = &self.lockout {
            let released = manager.release_all();
            if released > 0 {
                log::info!("[UNLOCK] Released {} account locks on shutdown", released);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::test_support::*;
    use crate::response::lockout::tests::RecordingAccounts;
    use std::sync::Arc;

    fn parser() -> PrivilegeParser {
        PrivilegeParser::new(&PrivilegeConfig::default(), None)
    }

    fn detail(event: SecurityEvent) -> PrivilegeEscalation {
        match event.detail {
            EventDetail::PrivilegeEscalation(p) => p,
            other => panic!("unexpected event {:?}", other),
        }
    }

    fn sudo_fail(user: &str, offset: i64) -> RawLogLine {
        line(
            &format!(
                "{} host sudo: pam_unix(sudo:auth): authentication failure; logname={u} uid=1000 euid=0 tty=/dev/pts/0 ruser={u} rhost=  user={u}",
                legacy_stamp(offset),
                u = user
            ),
            offset,
        )
    }

    #[test]
    fn test_sudo_exec() {
        let mut p = parser();
        let text = format!(
            "{} host sudo:    alice : TTY=pts/0 ; PWD=/home/alice ; USER=root ; COMMAND=/usr/bin/apt update",
            legacy_stamp(0)
        );
        let ev = detail(p.parse(&line(&text, 0)).expect("event"));
        assert_eq!(ev.subtype, PrivilegeSubtype::SudoExec);
        assert_eq!(ev.user, "alice");
        assert_eq!(ev.target_user, "root");
        assert_eq!(ev.command, "/usr/bin/apt update");
        assert_eq!(ev.tty, "pts/0");
        assert_eq!(ev.working_directory, "/home/alice");
        assert!(ev.success);
        assert_eq!(ev.failure_count, 0);
    }

    #[test]
    fn test_sudo_command_keeps_semicolons() {
        let mut p = parser();
        let text = format!(
            "{} host sudo: bob : TTY=pts/1 ; PWD=/tmp ; USER=root ; COMMAND=/bin/sh -c echo a ; echo b",
            legacy_stamp(0)
        );
        let ev = detail(p.parse(&line(&text, 0)).expect("event"));
        assert_eq!(ev.command, "/bin/sh -c echo a ; echo b");
    }

    #[test]
    fn test_sudo_incorrect_password_summary() {
        let mut p = parser();
        let text = format!(
            "{} host sudo: carol : 3 incorrect password attempts ; TTY=pts/0 ; PWD=/home/carol ; USER=root ; COMMAND=/bin/bash",
            legacy_stamp(0)
        );
        let ev = detail(p.parse(&line(&text, 0)).expect("event"));
        assert_eq!(ev.subtype, PrivilegeSubtype::SudoAuthFailure);
        assert!(!ev.success);
        assert_eq!(ev.failure_count, 1);
        assert!(ev.description.contains("incorrect password attempts"));
    }

    #[test]
    fn test_sudo_not_in_sudoers() {
        let mut p = parser();
        let text = format!(
            "{} host sudo: dave : user NOT in sudoers ; TTY=pts/2 ; PWD=/home/dave ; USER=root ; COMMAND=/bin/cat /etc/shadow",
            legacy_stamp(0)
        );
        let ev = detail(p.parse(&line(&text, 0)).expect("event"));
        assert_eq!(ev.subtype, PrivilegeSubtype::SudoAuthFailure);
        assert_eq!(ev.command, "/bin/cat /etc/shadow");
    }

    #[test]
    fn test_sudo_pam_failure() {
        let mut p = parser();
        let ev = detail(p.parse(&sudo_fail("erin", 0)).expect("event"));
        assert_eq!(ev.subtype, PrivilegeSubtype::SudoAuthFailure);
        assert_eq!(ev.user, "erin");
        assert_eq!(ev.tty, "/dev/pts/0");
        assert_eq!(ev.target_user, UNKNOWN);
    }

    #[test]
    fn test_su_session_opened() {
        let mut p = parser();
        let text = format!(
            "{} host su[4242]: pam_unix(su-l:session): session opened for user root(uid=0) by alice(uid=1000)",
            legacy_stamp(0)
        );
        let ev = detail(p.parse(&line(&text, 0)).expect("event"));
        assert_eq!(ev.subtype, PrivilegeSubtype::SuSessionOpened);
        assert_eq!(ev.user, "alice");
        assert_eq!(ev.target_user, "root");
        assert!(ev.success);
    }

    #[test]
    fn test_su_session_uid_fallback() {
        let mut p = parser();
        let text = format!(
            "{} host su[4242]: pam_unix(su:session): session opened for user postgres(uid=113) by (uid=1001)",
            legacy_stamp(0)
        );
        let ev = detail(p.parse(&line(&text, 0)).expect("event"));
        assert_eq!(ev.user, "user_1001");
        assert_eq!(ev.target_user, "postgres");
    }

    #[test]
    fn test_su_auth_failure_variants() {
        let mut p = parser();
        let pam = format!(
            "{} host su[10]: pam_unix(su:auth): authentication failure; logname=frank uid=1000 euid=0 tty=/dev/pts/3 ruser=frank rhost=  user=root",
            legacy_stamp(0)
        );
        let ev = detail(p.parse(&line(&pam, 0)).expect("event"));
        assert_eq!(ev.subtype, PrivilegeSubtype::SuAuthFailure);
        assert_eq!(ev.user, "frank");
        assert_eq!(ev.target_user, "root");

        let shadow = format!("{} host su[11]: FAILED SU (to root) gina on pts/4", legacy_stamp(120));
        let ev = detail(p.parse(&line(&shadow, 120)).expect("event"));
        assert_eq!(ev.user, "gina");
        assert_eq!(ev.tty, "pts/4");

        let util = format!("{} host su[12]: FAILED su for root by hank", legacy_stamp(240));
        let ev = detail(p.parse(&line(&util, 240)).expect("event"));
        assert_eq!(ev.subtype, PrivilegeSubtype::SuAuthFailure);
        assert_eq!(ev.user, "hank");
    }

    #[test]
    fn test_successful_su_line() {
        let mut p = parser();
        let text = format!("{} host su[12]: Successful su for root by ivy", legacy_stamp(0));
        let ev = detail(p.parse(&line(&text, 0)).expect("event"));
        assert_eq!(ev.subtype, PrivilegeSubtype::SuSessionOpened);
        assert_eq!(ev.user, "ivy");
    }

    #[test]
    fn test_threshold_flags_third_failure() {
        let mut p = parser();
        let first = detail(p.parse(&sudo_fail("jack", 0)).unwrap());
        let second = detail(p.parse(&sudo_fail("jack", 90)).unwrap());
        let third = detail(p.parse(&sudo_fail("jack", 180)).unwrap());
        assert_eq!(first.failure_count, 1);
        assert!(!second.threshold_exceeded);
        assert_eq!(third.failure_count, 3);
        assert!(third.threshold_exceeded);
        assert!(!third.user_locked_out);
    }

    #[test]
    fn test_failures_outside_window_do_not_count() {
        let mut p = parser();
        p.parse(&sudo_fail("kate", 0));
        p.parse(&sudo_fail("kate", 60));
        let late = detail(p.parse(&sudo_fail("kate", 31 * 60)).unwrap());
        assert_eq!(late.failure_count, 2);
        assert!(!late.threshold_exceeded);
    }

    #[test]
    fn test_excluded_user_not_tracked() {
        let mut p = parser();
        for i in 0..4 {
            let ev = detail(p.parse(&sudo_fail("root", i * 90)).unwrap());
            assert_eq!(ev.failure_count, 0);
            assert!(!ev.threshold_exceeded);
        }
    }

    #[test]
    fn test_duplicate_line_suppressed() {
        let mut p = parser();
        assert!(p.parse(&sudo_fail("leo", 0)).is_some());
        assert!(p.parse(&sudo_fail("leo", 0)).is_none());
        assert_eq!(p.failure_count("leo", base_time()), 1);
    }

    #[test]
    fn test_lockout_on_threshold() {
        let control = RecordingAccounts::privileged();
        let manager = AccountLockoutManager::with_runtime(control.clone(), None);
        let config = PrivilegeConfig {
            lockout_enabled: true,
            terminate_sessions: true,
            ..PrivilegeConfig::default()
        };
        let mut p = PrivilegeParser::new(&config, Some(manager.clone()));
        p.parse(&sudo_fail("mia", 0));
        p.parse(&sudo_fail("mia", 90));
        let ev = detail(p.parse(&sudo_fail("mia", 180)).unwrap());
        assert!(ev.threshold_exceeded);
        assert!(ev.user_locked_out);
        assert_eq!(ev.lockout_minutes, 15);
        assert!(ev.description.contains("account locked"));
        assert!(manager.is_locked("mia"));
        assert_eq!(control.calls(), vec!["lock mia", "kill mia"]);

        // A further failure finds the account already locked.
        let ev = detail(p.parse(&sudo_fail("mia", 270)).unwrap());
        assert!(ev.user_locked_out);
        assert!(ev.lockout_message.contains("already locked"));

        p.close();
        assert!(!manager.is_locked("mia"));
    }

    #[test]
    fn test_lockout_disabled_never_locks() {
        let control = RecordingAccounts::privileged();
        let manager = AccountLockoutManager::with_runtime(control.clone(), None);
        let mut p = PrivilegeParser::new(&PrivilegeConfig::default(), Some(manager));
        for i in 0..3 {
            p.parse(&sudo_fail("nina", i * 90));
        }
        assert!(control.calls().is_empty());
    }

    #[test]
    fn test_cleanup_prunes_state() {
        let mut p = parser();
        p.parse(&sudo_fail("omar", 0));
        p.cleanup(base_time() + Duration::hours(3));
        assert_eq!(p.failure_count("omar", base_time()), 0);
        assert!(p.recent.is_empty());
    }

    #[test]
    fn test_unrelated_lines_ignored() {
        let mut p = parser();
        let sshd = format!("{} host sshd[1]: Accepted password for a from 1.2.3.4 port 22 ssh2", legacy_stamp(0));
        let sudo_session = format!(
            "{} host sudo: pam_unix(sudo:session): session opened for user root(uid=0) by alice(uid=1000)",
            legacy_stamp(0)
        );
        assert!(p.parse(&line(&sshd, 0)).is_none());
        assert!(p.parse(&line(&sudo_session, 0)).is_none());
        assert!(p.parse(&line("sudo make me a sandwich", 0)).is_none());
    }

    #[test]
    fn test_pam_field() {
        let msg = "authentication failure; logname=a uid=1000 euid=0 rhost=  user=b";
        assert_eq!(pam_field(msg, "uid"), Some("1000"));
        assert_eq!(pam_field(msg, "user"), Some("b"));
        assert_eq!(pam_field(msg, "rhost"), None);
        assert_eq!(pam_field(msg, "tty"), None);
    }

    #[test]
    fn test_lockout_manager_shared() {
        let control = Arc::new(RecordingAccounts::default());
        let manager = AccountLockoutManager::with_runtime(control, None);
        let config = PrivilegeConfig {
            lockout_enabled: true,
            ..PrivilegeConfig::default()
        };
        let mut p = PrivilegeParser::new(&config, Some(manager));
        for i in 0..2 {
            p.parse(&sudo_fail("pat", i * 90));
        }
        let ev = detail(p.parse(&sudo_fail("pat", 180)).unwrap());
        // Without privileges the lock fails and the event says so.
        assert!(ev.threshold_exceeded);
        assert!(!ev.user_locked_out);
        assert!(ev.lockout_message.contains("privileges"));
    }
}
