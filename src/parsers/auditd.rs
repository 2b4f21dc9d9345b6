//! Auditd command-execution parser.
//!
//! One `execve` shows up in `/var/log/audit/audit.log` as several records
//! that share an event id:
//!
//! ```text
//! type=SYSCALL msg=audit(1718452800.120:4711): arch=c000003e syscall=59 success=yes ... uid=1000 ... comm="ls" exe="/usr/bin/ls"
//! type=EXECVE msg=audit(1718452800.120:4711): argc=2 a0="ls" a1="-la"
//! type=CWD msg=audit(1718452800.120:4711): cwd="/home/alice"
//! type=PATH msg=audit(1718452800.120:4711): item=0 name="/usr/bin/ls" ...
//! type=PROCTITLE msg=audit(1718452800.120:4711): proctitle=6C73002D6C61
//! ```
//!
//! The parser folds them into a [`PartialAuditRecord`] and emits a
//! `command_execution` event once SYSCALL and EXECVE are both in.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use crate::parsers::tracking::RecentEvents;
use crate::parsers::{EventParser, RawLogLine};
use crate::{capped_seconds, or_unknown, CommandConfig, CommandExecution, EventDetail, RiskLevel, SecurityEvent, UNKNOWN};

/// Accounts and daemons whose executions are never reported.
pub const DEFAULT_SYSTEM_ACCOUNTS: &[&str] = &[
    "root",
    "daemon",
    "bin",
    "sys",
    "sync",
    "nobody",
    "systemd",
    "systemd-network",
    "systemd-resolve",
    "systemd-timesync",
    "systemd-journal",
    "systemd-logind",
    "messagebus",
    "dbus",
    "syslog",
    "_apt",
    "polkitd",
    "www-data",
    "cron",
    "CRON",
    "anacron",
    "sshd",
    "user_0",
];

/// auid value meaning "no login session", i.e. a daemon.
const AUID_UNSET: &str = "4294967295";

/// Dedup entries outlive the window by this factor before eviction.
const DEDUP_LIFETIME_FACTOR: i32 = 5;

/// Hard cap on records waiting for fragments.
const MAX_PARTIALS: usize = 4096;

/// `msg=audit(1718452800.120:4711)`
static RE_AUDIT_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"msg=audit\((\d+)(?:\.(\d+))?:(\d+)\)").expect("regex")
});

/// `type=SYSCALL`, with an optional `node=host ` prefix.
static RE_RECORD_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:node=\S+\s+)?type=(\S+)").expect("regex")
});

/// Record kinds folded into a partial record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fragment {
    Syscall,
    Execve,
    Cwd,
    Path,
    Proctitle,
}

impl Fragment {
    fn from_type(record_type: &str) -> Option<Self> {
        match record_type {
            "SYSCALL" => Some(Fragment::Syscall),
            "EXECVE" => Some(Fragment::Execve),
            "CWD" => Some(Fragment::Cwd),
            "PATH" => Some(Fragment::Path),
            "PROCTITLE" => Some(Fragment::Proctitle),
            _ => None,
        }
    }
}

/// An execve being reassembled from its records.
#[derive(Debug, Clone)]
pub struct PartialAuditRecord {
    pub event_id: String,
    /// When the first fragment was read.
    pub created_at: DateTime<Utc>,
    /// Time carried in the audit id.
    pub event_time: DateTime<Utc>,
    pub fragments: HashSet<Fragment>,
    success: bool,
    uid: Option<String>,
    auid: Option<String>,
    pid: Option<String>,
    uid_name: Option<String>,
    comm: Option<String>,
    exe: Option<String>,
    argv: Vec<String>,
    cwd: Option<String>,
    path_name: Option<String>,
    proctitle: Option<String>,
}

impl PartialAuditRecord {
    fn new(event_id: &str, created_at: DateTime<Utc>, event_time: DateTime<Utc>) -> Self {
        Self {
            event_id: event_id.to_string(),
            created_at,
            event_time,
            fragments: HashSet::new(),
            success: false,
            uid: None,
            auid: None,
            pid: None,
            uid_name: None,
            comm: None,
            exe: None,
            argv: Vec::new(),
            cwd: None,
            path_name: None,
            proctitle: None,
        }
    }

    fn is_complete(&self) -> bool {
        self.fragments.contains(&Fragment::Syscall)
            && self.fragments.contains(&Fragment::Execve)
            && self.success
            && (self.command().is_some() || self.exe.is_some() || self.path_name.is_some())
    }

    fn command(&self) -> Option<&str> {
        self.argv
            .first()
            .map(|s| s.as_str())
            .or(self.comm.as_deref())
    }

    fn executable(&self) -> Option<&str> {
        self.exe.as_deref().or(self.path_name.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// Raw value of `field=` in an audit record, quotes included. Enriched logs
/// append upper-case fields after a 0x1d separator, so that splits too.
pub fn field_raw<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    line.split(|c: char| c.is_whitespace() || c == '\x1d')
        .find_map(|token| token.strip_prefix(field)?.strip_prefix('='))
}

/// Decode an audit value: quoted values are literal, unquoted hex is the
/// encoding auditd uses for anything with spaces or control bytes.
pub fn decode_value(raw: &str) -> String {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return raw[1..raw.len() - 1].to_string();
    }
    if raw.len() >= 2 && raw.len() % 2 == 0 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
        let bytes: Option<Vec<u8>> = (0..raw.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&raw[i..i + 2], 16).ok())
            .collect();
        if let Some(Ok(text)) = bytes.map(String::from_utf8) {
            // proctitle separates argv with NULs.
            let text = text.replace('\0', " ");
            let text = text.trim_end();
            if !text.is_empty() && !text.chars().any(|c| c.is_control()) {
                return text.to_string();
            }
        }
    }
    raw.to_string()
}

fn field(line: &str, name: &str) -> Option<String> {
    field_raw(line, name).map(decode_value)
}

/// The execve syscall number for an audit `arch=` value.
pub fn execve_number(arch: Option<&str>) -> u32 {
    match arch {
        Some("c00000b7") => 221, // aarch64
        Some("40000003") => 11,  // i386
        Some("40000028") => 11,  // arm (eabi)
        _ => 59,                 // x86_64
    }
}

/// Collect EXECVE arguments, joining `aN[i]` chunks of oversized ones.
fn execve_args(line: &str) -> Vec<String> {
    let argc: usize = field_raw(line, "argc").and_then(|s| s.parse().ok()).unwrap_or(0);
    let mut args = Vec::new();
    for i in 0..argc {
        let name = format!("a{}", i);
        if let Some(raw) = field_raw(line, &name) {
            args.push(decode_value(raw));
            continue;
        }
        let mut joined = String::new();
        let mut chunk = 0;
        while let Some(raw) = field_raw(line, &format!("{}[{}]", name, chunk)) {
            joined.push_str(&decode_value(raw));
            chunk += 1;
        }
        if chunk == 0 {
            break;
        }
        args.push(joined);
    }
    args
}

// ---------------------------------------------------------------------------
// Username resolution
// ---------------------------------------------------------------------------

/// uid -> name table from a passwd-format file.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    names: HashMap<String, String>,
}

impl UserDirectory {
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_passwd(&content),
            Err(e) => {
                log::warn!("Cannot read {}: {} (uids will not be resolved)", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn from_passwd(content: &str) -> Self {
        let names = content
            .lines()
            .filter(|l| !l.starts_with('#'))
            .filter_map(|l| {
                let mut parts = l.split(':');
                let name = parts.next()?;
                let uid = parts.nth(1)?;
                Some((uid.to_string(), name.to_string()))
            })
            .collect();
        Self { names }
    }

    pub fn name_for(&self, uid: &str) -> Option<&str> {
        self.names.get(uid).map(|s| s.as_str())
    }
}

// ---------------------------------------------------------------------------
// AuditdParser
// ---------------------------------------------------------------------------

pub struct AuditdParser {
    partials: HashMap<String, PartialAuditRecord>,
    /// Ids already emitted, so trailing CWD/PATH records do not start orphans.
    completed: RecentEvents<String>,
    /// Ids dropped as non-execve or timed out; their late fragments are ignored.
    discarded: RecentEvents<String>,
    recent_commands: RecentEvents<String>,
    partial_timeout: Duration,
    system_accounts: HashSet<String>,
    users: UserDirectory,
}

impl AuditdParser {
    pub fn new(config: &CommandConfig, users: UserDirectory) -> Self {
        let partial_timeout = capped_seconds(config.partial_timeout_secs);
        Self {
            partials: HashMap::new(),
            completed: RecentEvents::new(partial_timeout),
            discarded: RecentEvents::new(partial_timeout),
            recent_commands: RecentEvents::new(capped_seconds(config.dedup_window_secs)),
            partial_timeout,
            system_accounts: config.system_accounts.iter().cloned().collect(),
            users,
        }
    }

    /// Partial records still waiting for fragments.
    pub fn pending_records(&self) -> usize {
        self.partials.len()
    }

    /// Drop partial records older than the timeout and remember their ids.
    /// Returns how many were dropped.
    fn expire_partials(&mut self, now: DateTime<Utc>) -> usize {
        let timeout = self.partial_timeout;
        let stale: Vec<String> = self
            .partials
            .iter()
            .filter(|(_, r)| now - r.created_at > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.partials.remove(id);
            self.discarded.mark(id.clone(), now);
        }
        self.completed.evict_older_than(now, timeout);
        self.discarded.evict_older_than(now, timeout);
        stale.len()
    }

    /// Make room for one more partial record when the map is full: expire
    /// stale records first, then evict the oldest.
    fn make_room(&mut self, now: DateTime<Utc>) {
        if self.partials.len() < MAX_PARTIALS {
            return;
        }
        self.expire_partials(now);
        if self.partials.len() < MAX_PARTIALS {
            return;
        }
        let oldest = self
            .partials
            .iter()
            .min_by_key(|(_, r)| r.created_at)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            log::warn!("auditd: {} records pending, dropping oldest ({})", MAX_PARTIALS, id);
            self.partials.remove(&id);
            self.discarded.mark(id, now);
        }
    }

    fn resolve_user(&self, record: &PartialAuditRecord) -> String {
        if let Some(name) = record.uid_name.as_deref().filter(|n| !n.is_empty() && *n != "?") {
            return name.to_string();
        }
        match record.uid.as_deref() {
            Some(uid) => self
                .users
                .name_for(uid)
                .map(|n| n.to_string())
                .unwrap_or_else(|| format!("user_{}", uid)),
            None => UNKNOWN.to_string(),
        }
    }

    fn is_system_activity(&self, user: &str, record: &PartialAuditRecord) -> bool {
        if self.system_accounts.contains(user) {
            return true;
        }
        if let Some(comm) = record.comm.as_deref() {
            if self.system_accounts.contains(comm) {
                return true;
            }
        }
        record.auid.as_deref() == Some(AUID_UNSET)
    }

    fn apply(record: &mut PartialAuditRecord, fragment: Fragment, line: &str) {
        record.fragments.insert(fragment);
        match fragment {
            Fragment::Syscall => {
                record.success = field_raw(line, "success") == Some("yes");
                record.uid = field_raw(line, "uid").map(str::to_string);
                record.auid = field_raw(line, "auid").map(str::to_string);
                record.pid = field_raw(line, "pid").map(str::to_string);
                record.uid_name = field(line, "UID");
                record.comm = field(line, "comm");
                record.exe = field(line, "exe");
            }
            Fragment::Execve => {
                record.argv = execve_args(line);
            }
            Fragment::Cwd => {
                record.cwd = field(line, "cwd");
            }
            Fragment::Path => {
                if field_raw(line, "item") == Some("0") {
                    record.path_name = field(line, "name");
                }
            }
            Fragment::Proctitle => {
                record.proctitle = field(line, "proctitle");
                if record.argv.is_empty() {
                    if let Some(title) = &record.proctitle {
                        record.argv = title.split(' ').map(|s| s.to_string()).collect();
                    }
                }
            }
        }
    }

    /// Turn a complete record into an event, unless it is filtered or a repeat.
    fn promote(&mut self, record: PartialAuditRecord, source: &str) -> Option<SecurityEvent> {
        let user = self.resolve_user(&record);
        if self.is_system_activity(&user, &record) {
            log::trace!("auditd: skipping system execution by {}", user);
            return None;
        }

        let command = record
            .command()
            .or(record.executable())
            .unwrap_or(UNKNOWN)
            .to_string();
        let arguments = record.argv.iter().skip(1).cloned().collect::<Vec<_>>().join(" ");

        let key = format!("{}:{}:{}", user, command, arguments);
        if self.recent_commands.check_and_mark(key, record.event_time) {
            log::debug!("auditd: duplicate command from {}: {}", user, command);
            return None;
        }

        Some(SecurityEvent::new(
            record.event_time,
            source,
            EventDetail::CommandExecution(CommandExecution {
                user,
                uid: or_unknown(record.uid.as_deref()),
                pid: or_unknown(record.pid.as_deref()),
                command,
                arguments,
                executable: or_unknown(record.executable()),
                working_directory: or_unknown(record.cwd.as_deref()),
                audit_id: record.event_id,
                risk_level: RiskLevel::Unknown,
                risk_reason: UNKNOWN.to_string(),
            }),
        ))
    }
}

impl EventParser for AuditdParser {
    fn name(&self) -> &'static str {
        "auditd"
    }

    fn parse(&mut self, line: &RawLogLine) -> Option<SecurityEvent> {
        let text = line.text.as_str();
        let record_type = RE_RECORD_TYPE.captures(text)?.get(1)?.as_str();
        let fragment = Fragment::from_type(record_type)?;

        let caps = RE_AUDIT_ID.captures(text)?;
        let secs: i64 = caps.get(1)?.as_str().parse().ok()?;
        let millis: u32 = caps
            .get(2)
            .and_then(|m| format!("{:0<3}", m.as_str()).get(..3)?.parse().ok())
            .unwrap_or(0);
        let event_id = caps.get(3)?.as_str();
        let event_time = DateTime::from_timestamp(secs, millis * 1_000_000).unwrap_or(line.observed_at);

        let now = line.observed_at;
        let id = event_id.to_string();
        if self.completed.is_recent(&id, now) || self.discarded.is_recent(&id, now) {
            return None;
        }

        if fragment == Fragment::Syscall {
            let syscall: Option<u32> = field_raw(text, "syscall").and_then(|s| s.parse().ok());
            if syscall != Some(execve_number(field_raw(text, "arch"))) {
                self.partials.remove(event_id);
                self.discarded.mark(id, now);
                return None;
            }
        }

        match self.partials.get(event_id) {
            Some(existing) if now - existing.created_at > self.partial_timeout => {
                log::debug!("auditd: record {} timed out before completing", event_id);
                self.partials.remove(event_id);
                self.discarded.mark(id, now);
                return None;
            }
            Some(_) => {}
            None => self.make_room(now),
        }

        let record = self
            .partials
            .entry(id)
            .or_insert_with(|| PartialAuditRecord::new(event_id, line.observed_at, event_time));
        Self::apply(record, fragment, text);

        if !record.is_complete() {
            return None;
        }

        let record = self.partials.remove(event_id)?;
        self.completed.mark(event_id.to_string(), line.observed_at);
        self.promote(record, &line.source_path)
    }

    fn cleanup(&mut self, now: DateTime<Utc>) {
        let dropped = self.expire_partials(now);
        if dropped > 0 {
            log::debug!("[SWEEP] auditd: dropped {} incomplete records", dropped);
        }
        let window = self.recent_commands.window();
        self.recent_commands
            .evict_older_than(now, window * DEDUP_LIFETIME_FACTOR);
    }

    fn release_expired(&mut self, now: DateTime<Utc>) {
        let dropped = self.expire_partials(now);
        if dropped > 0 {
            log::debug!("auditd: dropped {} incomplete records", dropped);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::test_support::base_time;
    use crate::EventKind;

    const AUDIT_LOG: &str = "/var/log/audit/audit.log";

    fn parser() -> AuditdParser {
        AuditdParser::new(&CommandConfig::default(), UserDirectory::default())
    }

    fn at(offset_secs: i64) -> DateTime<Utc> {
        base_time() + Duration::seconds(offset_secs)
    }

    fn raw(text: &str, offset_secs: i64) -> RawLogLine {
        RawLogLine::new(text, AUDIT_LOG, at(offset_secs))
    }

    fn syscall(id: u32, nr: u32, uid: u32, comm: &str) -> String {
        format!(
            "type=SYSCALL msg=audit(1718452800.120:{}): arch=c000003e syscall={} success=yes exit=0 a0=55d a1=55e a2=55f a3=0 items=2 ppid=900 pid=901 auid={} uid={} gid={} euid={} suid={} fsuid={} egid={} sgid={} fsgid={} tty=pts0 ses=3 comm=\"{}\" exe=\"/usr/bin/{}\" key=\"cmds\"",
            id, nr, uid, uid, uid, uid, uid, uid, uid, uid, uid, comm, comm
        )
    }

    fn execve(id: u32, args: &[&str]) -> String {
        let mut s = format!("type=EXECVE msg=audit(1718452800.120:{}): argc={}", id, args.len());
        for (i, a) in args.iter().enumerate() {
            s.push_str(&format!(" a{}=\"{}\"", i, a));
        }
        s
    }

    #[test]
    fn test_syscall_then_execve_emits_once() {
        let mut p = parser();
        assert!(p.parse(&raw(&syscall(100, 59, 1000, "ls"), 0)).is_none());
        let event = p
            .parse(&raw(&execve(100, &["ls", "-la", "/tmp"]), 0))
            .expect("should complete");
        assert_eq!(event.kind(), EventKind::CommandExecution);
        assert_eq!(event.source, AUDIT_LOG);
        match event.detail {
            EventDetail::CommandExecution(c) => {
                assert_eq!(c.user, "user_1000");
                assert_eq!(c.command, "ls");
                assert_eq!(c.arguments, "-la /tmp");
                assert_eq!(c.executable, "/usr/bin/ls");
                assert_eq!(c.pid, "901");
                assert_eq!(c.audit_id, "100");
                assert_eq!(c.risk_level, RiskLevel::Unknown);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(p.pending_records(), 0);
        assert_eq!(event.timestamp.timestamp(), 1_718_452_800);
    }

    #[test]
    fn test_trailing_fragments_do_not_linger() {
        let mut p = parser();
        p.parse(&raw(&syscall(101, 59, 1000, "id"), 0));
        assert!(p.parse(&raw(&execve(101, &["id"]), 0)).is_some());
        assert!(p.parse(&raw("type=CWD msg=audit(1718452800.120:101): cwd=\"/home/alice\"", 0)).is_none());
        assert!(p.parse(&raw("type=PATH msg=audit(1718452800.120:101): item=0 name=\"/usr/bin/id\" inode=5", 0)).is_none());
        assert_eq!(p.pending_records(), 0);
    }

    #[test]
    fn test_cwd_and_path_before_completion() {
        let mut p = parser();
        p.parse(&raw("type=CWD msg=audit(1718452800.120:102): cwd=\"/srv/app\"", 0));
        p.parse(&raw(&syscall(102, 59, 1000, "make"), 0));
        let event = p.parse(&raw(&execve(102, &["make", "install"]), 0)).expect("complete");
        match event.detail {
            EventDetail::CommandExecution(c) => assert_eq!(c.working_directory, "/srv/app"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_non_execve_syscall_discarded() {
        let mut p = parser();
        // openat
        assert!(p.parse(&raw(&syscall(103, 257, 1000, "cat"), 0)).is_none());
        assert_eq!(p.pending_records(), 0);
        // Trailing records for the discarded id do not start a new one.
        assert!(p.parse(&raw(&execve(103, &["cat"]), 0)).is_none());
        assert!(p.parse(&raw("type=CWD msg=audit(1718452800.120:103): cwd=\"/tmp\"", 0)).is_none());
        assert!(p.parse(&raw("type=PATH msg=audit(1718452800.120:103): item=0 name=\"/etc/hosts\"", 1)).is_none());
        assert!(p.parse(&raw("type=PROCTITLE msg=audit(1718452800.120:103): proctitle=636174", 1)).is_none());
        assert_eq!(p.pending_records(), 0);
    }

    #[test]
    fn test_many_non_execve_syscalls_leave_nothing_pending() {
        let mut p = parser();
        for id in 1000..1100 {
            assert!(p.parse(&raw(&syscall(id, 257, 1000, "cat"), 0)).is_none());
            let cwd = format!("type=CWD msg=audit(1718452800.120:{}): cwd=\"/tmp\"", id);
            assert!(p.parse(&raw(&cwd, 0)).is_none());
        }
        assert_eq!(p.pending_records(), 0);
    }

    #[test]
    fn test_late_execve_dropped() {
        let mut p = parser();
        p.parse(&raw(&syscall(200, 59, 1000, "ls"), 0));
        assert!(p.parse(&raw(&execve(200, &["ls"]), 31)).is_none());
        assert_eq!(p.pending_records(), 0);
        // Later fragments for the same id stay dropped.
        assert!(p.parse(&raw("type=CWD msg=audit(1718452800.120:200): cwd=\"/tmp\"", 32)).is_none());
        assert_eq!(p.pending_records(), 0);
    }

    #[test]
    fn test_execve_at_timeout_boundary_kept() {
        let mut p = parser();
        p.parse(&raw(&syscall(201, 59, 1000, "ls"), 0));
        let event = p.parse(&raw(&execve(201, &["ls"]), 30)).expect("complete at 30s");
        assert_eq!(event.kind(), EventKind::CommandExecution);
    }

    #[test]
    fn test_release_expired_purges_stale_partials() {
        let mut p = parser();
        p.parse(&raw(&syscall(202, 59, 1000, "sleep"), 0));
        p.parse(&raw(&syscall(203, 59, 1000, "sleep"), 20));
        p.release_expired(at(30));
        assert_eq!(p.pending_records(), 2);
        p.release_expired(at(31));
        assert_eq!(p.pending_records(), 1);
        assert!(p.parse(&raw(&execve(202, &["sleep", "1"]), 32)).is_none());
        assert_eq!(p.pending_records(), 1);
    }

    #[test]
    fn test_partial_map_is_capped() {
        let mut p = parser();
        for id in 0..(MAX_PARTIALS as u32 + 10) {
            p.parse(&raw(&syscall(5000 + id, 59, 1000, "true"), 0));
        }
        assert_eq!(p.pending_records(), MAX_PARTIALS);
    }

    #[test]
    fn test_failed_execve_never_emits() {
        let mut p = parser();
        let line = syscall(104, 59, 1000, "nope").replace("success=yes", "success=no");
        p.parse(&raw(&line, 0));
        assert!(p.parse(&raw(&execve(104, &["nope"]), 0)).is_none());
    }

    #[test]
    fn test_syscall_only_partial_purged_after_timeout() {
        let mut p = parser();
        p.parse(&raw(&syscall(105, 59, 1000, "sleep"), 0));
        assert_eq!(p.pending_records(), 1);
        p.cleanup(at(29));
        assert_eq!(p.pending_records(), 1);
        p.cleanup(at(31));
        assert_eq!(p.pending_records(), 0);
        // The EXECVE arriving late finds nothing to complete.
        assert!(p.parse(&raw(&execve(105, &["sleep", "5"]), 32)).is_none());
        assert_eq!(p.pending_records(), 0);
    }

    #[test]
    fn test_system_accounts_filtered() {
        let mut p = parser();
        p.parse(&raw(&syscall(106, 59, 0, "ls"), 0));
        assert!(p.parse(&raw(&execve(106, &["ls"]), 0)).is_none());

        let daemon = syscall(107, 59, 1000, "ls").replace("auid=1000", "auid=4294967295");
        p.parse(&raw(&daemon, 0));
        assert!(p.parse(&raw(&execve(107, &["ls"]), 0)).is_none());

        p.parse(&raw(&syscall(108, 59, 1000, "cron"), 0));
        assert!(p.parse(&raw(&execve(108, &["/usr/sbin/cron", "-f"]), 0)).is_none());
    }

    #[test]
    fn test_duplicate_command_suppressed() {
        let mut p = parser();
        p.parse(&raw(&syscall(109, 59, 1000, "whoami"), 0));
        assert!(p.parse(&raw(&execve(109, &["whoami"]), 0)).is_some());
        // Same second, different audit id.
        p.parse(&raw(&syscall(110, 59, 1000, "whoami"), 0));
        assert!(p.parse(&raw(&execve(110, &["whoami"]), 0)).is_none());
        assert_eq!(p.pending_records(), 0);
    }

    #[test]
    fn test_enriched_username_preferred() {
        let mut p = parser();
        let line = format!("{}\x1dARCH=x86_64 SYSCALL=execve AUID=\"alice\" UID=\"alice\" GID=\"alice\"", syscall(111, 59, 1000, "vim"));
        p.parse(&raw(&line, 0));
        let event = p.parse(&raw(&execve(111, &["vim", "notes.txt"]), 0)).expect("complete");
        assert_eq!(event.user(), "alice");
    }

    #[test]
    fn test_passwd_lookup_before_placeholder() {
        let users = UserDirectory::from_passwd("root:x:0:0:root:/root:/bin/bash\nbob:x:1001:1001::/home/bob:/bin/sh\n");
        let mut p = AuditdParser::new(&CommandConfig::default(), users);
        p.parse(&raw(&syscall(112, 59, 1001, "ps"), 0));
        let event = p.parse(&raw(&execve(112, &["ps", "aux"]), 0)).expect("complete");
        assert_eq!(event.user(), "bob");
    }

    #[test]
    fn test_aarch64_execve_number() {
        let mut p = parser();
        let line = syscall(113, 221, 1000, "uname").replace("arch=c000003e", "arch=c00000b7");
        p.parse(&raw(&line, 0));
        assert!(p.parse(&raw(&execve(113, &["uname", "-a"]), 0)).is_some());
    }

    #[test]
    fn test_hex_encoded_arguments() {
        let mut p = parser();
        p.parse(&raw(&syscall(114, 59, 1000, "echo"), 0));
        // a1 = "hello world"
        let line = "type=EXECVE msg=audit(1718452800.120:114): argc=2 a0=\"echo\" a1=68656C6C6F20776F726C64";
        let event = p.parse(&raw(line, 0)).expect("complete");
        match event.detail {
            EventDetail::CommandExecution(c) => assert_eq!(c.arguments, "hello world"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_value() {
        assert_eq!(decode_value("\"/usr/bin/ls\""), "/usr/bin/ls");
        assert_eq!(decode_value("2F746D70"), "/tmp");
        assert_eq!(decode_value("6C73002D6C61"), "ls -la");
        assert_eq!(decode_value("1000"), "1000");
        assert_eq!(decode_value("(null)"), "(null)");
    }

    #[test]
    fn test_field_raw() {
        let line = "type=SYSCALL msg=audit(1.0:1): syscall=59 uid=1000 comm=\"ls\"\x1dUID=\"alice\"";
        assert_eq!(field_raw(line, "syscall"), Some("59"));
        assert_eq!(field_raw(line, "uid"), Some("1000"));
        assert_eq!(field_raw(line, "UID"), Some("\"alice\""));
        assert_eq!(field_raw(line, "auid"), None);
    }

    #[test]
    fn test_non_audit_lines_ignored() {
        let mut p = parser();
        assert!(p.parse(&raw("Jun 15 12:00:00 host sshd[1]: Accepted password for a from 1.2.3.4 port 1 ssh2", 0)).is_none());
        assert!(p.parse(&raw("type=USER_LOGIN msg=audit(1718452800.120:9): pid=1 uid=0", 0)).is_none());
        assert!(p.parse(&raw("type=SYSCALL no audit id here", 0)).is_none());
        assert_eq!(p.pending_records(), 0);
    }
}
