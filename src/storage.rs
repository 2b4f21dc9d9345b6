//! Event storage.
//!
//! Events are appended to `events.jsonl` in the data directory, one JSON
//! object per line: the event's own fields plus `stored_at`, the time the
//! store received it. The file is easy to read with jq or grep, and a
//! partly written last line only costs that line.
//!
//! `query_events` and `stats` re-read and deserialize the whole file on every
//! call. That suits the CLI and occasional lookups, not a hot path. Reads do
//! not take the writer lock, so `store_event` is never stalled behind one; a
//! record still being appended is skipped like any unreadable line, and
//! retention swaps the file by rename, so a reader sees the old or new file.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::{AgentError, AgentResult, EventKind, SecurityEvent, UNKNOWN};

pub const EVENTS_FILE: &str = "events.jsonl";

/// A stored event with its receipt time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    #[serde(flatten)]
    pub event: SecurityEvent,
    pub stored_at: DateTime<Utc>,
}

/// Filters for [`EventStore::query_events`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    pub kind: Option<EventKind>,
    pub user: Option<String>,
    pub ip_address: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Keep only the most recent N matches, still returned oldest first.
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn matches(&self, event: &SecurityEvent) -> bool {
        if self.kind.is_some_and(|k| k != event.kind()) {
            return false;
        }
        if self.user.as_deref().is_some_and(|u| u != event.user()) {
            return false;
        }
        if let Some(ip) = self.ip_address.as_deref() {
            if event.ip_address() != Some(ip) {
                return false;
            }
        }
        if self.since.is_some_and(|t| event.timestamp < t) {
            return false;
        }
        if self.until.is_some_and(|t| event.timestamp > t) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_events: usize,
    pub unique_users: usize,
    pub unique_ips: usize,
    pub events_by_type: BTreeMap<String, usize>,
    pub last_event_time: Option<DateTime<Utc>>,
}

/// Where emitted events go.
pub trait EventStore: Send + Sync {
    fn store_event(&self, event: &SecurityEvent) -> AgentResult<()>;
    fn query_events(&self, query: &EventQuery) -> AgentResult<Vec<StoredEvent>>;
    fn stats(&self) -> AgentResult<StoreStats>;
    /// Delete events older than `days`. Returns how many were removed.
    fn cleanup_older_than(&self, days: u32) -> AgentResult<usize>;
    fn close(&self) {}
}

/// Append-only JSON-lines store.
pub struct JsonlStore {
    path: PathBuf,
    writer: Mutex<Option<File>>,
}

impl JsonlStore {
    /// Open (or create) the store in `data_dir`.
    pub fn open(data_dir: &Path) -> AgentResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| {
            AgentError::Storage(format!("Cannot create data directory {}: {}", data_dir.display(), e))
        })?;
        let path = data_dir.join(EVENTS_FILE);
        let file = Self::open_append(&path)?;
        log::info!("Event store at {}", path.display());
        Ok(Self {
            path,
            writer: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_append(path: &Path) -> AgentResult<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| AgentError::Storage(format!("Cannot open {}: {}", path.display(), e)))
    }

    fn writer(&self) -> MutexGuard<'_, Option<File>> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every readable record, in file order.
    fn read_all(&self) -> AgentResult<Vec<StoredEvent>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut events = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredEvent>(&line) {
                Ok(ev) => events.push(ev),
                Err(e) => log::debug!("Skipping unreadable record at line {}: {}", n + 1, e),
            }
        }
        Ok(events)
    }
}

impl EventStore for JsonlStore {
    fn store_event(&self, event: &SecurityEvent) -> AgentResult<()> {
        let record = StoredEvent {
            event: event.clone(),
            stored_at: Utc::now(),
        };
        let json_line = serde_json::to_string(&record)?;

        let mut writer = self.writer();
        let file = writer
            .as_mut()
            .ok_or_else(|| AgentError::Storage("store is closed".into()))?;
        writeln!(file, "{}", json_line)?;
        file.flush()?;
        Ok(())
    }

    fn query_events(&self, query: &EventQuery) -> AgentResult<Vec<StoredEvent>> {
        let mut matched: Vec<StoredEvent> = self
            .read_all()?
            .into_iter()
            .filter(|r| query.matches(&r.event))
            .collect();
        if let Some(limit) = query.limit.filter(|l| *l > 0) {
            if matched.len() > limit {
                matched.drain(..matched.len() - limit);
            }
        }
        Ok(matched)
    }

    fn stats(&self) -> AgentResult<StoreStats> {
        let mut stats = StoreStats::default();
        let mut users = HashSet::new();
        let mut ips = HashSet::new();
        for record in self.read_all()? {
            let event = &record.event;
            stats.total_events += 1;
            *stats.events_by_type.entry(event.kind().to_string()).or_insert(0) += 1;
            if event.user() != UNKNOWN {
                users.insert(event.user().to_string());
            }
            if let Some(ip) = event.ip_address().filter(|ip| *ip != UNKNOWN) {
                ips.insert(ip.to_string());
            }
            if stats.last_event_time.map_or(true, |t| event.timestamp > t) {
                stats.last_event_time = Some(event.timestamp);
            }
        }
        stats.unique_users = users.len();
        stats.unique_ips = ips.len();
        Ok(stats)
    }

    fn cleanup_older_than(&self, days: u32) -> AgentResult<usize> {
        let cutoff = Utc::now()
            .checked_sub_signed(Duration::days(days as i64))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut writer = self.writer();

        let records = self.read_all()?;
        let before = records.len();
        let kept: Vec<&StoredEvent> = records.iter().filter(|r| r.event.timestamp >= cutoff).collect();
        let deleted = before - kept.len();
        if deleted == 0 {
            return Ok(0);
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut out = File::create(&tmp)?;
            for record in &kept {
                writeln!(out, "{}", serde_json::to_string(record)?)?;
            }
            out.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        if writer.is_some() {
            *writer = Some(Self::open_append(&self.path)?);
        }

        log::info!("[SWEEP] Removed {} events older than {} days", deleted, days);
        Ok(deleted)
    }

    fn close(&self) {
        if let Some(mut file) = self.writer().take() {
            if let Err(e) = file.flush() {
                log::warn!("Failed to flush event store: {}", e);
            }
        }
    }
}
