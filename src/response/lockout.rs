//! # Account Lockout
//!
//! Temporarily locks local accounts that keep failing sudo/su
//! authentication, and unlocks them again when the lock runs out.
//!
//! ## Mechanics
//! - **Lock**: `usermod -L -e 1 <user>` (password locked, account expired)
//! - **Unlock**: `usermod -U -e "" <user>`
//! - **Sessions**: `pkill -KILL -u <user>` when asked to terminate them
//!
//! Each successful lock schedules its own unlock task on the tokio runtime.
//! Without a runtime the periodic expiry sweep does the unlocking.
//!
//! Decisions and commits happen under one table mutex; the `usermod` call in
//! between runs with the mutex released. A user with an OS call in flight is
//! marked busy, so a second lock, unlock or expiry for that user backs off
//! instead of racing it. Each lock carries a generation, so a timer left over
//! from an earlier lock never releases a later one.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::{capped_minutes, MAX_CONFIG_MINUTES};

/// OS-level account operations. Swapped for a recorder in tests.
pub trait AccountControl: Send + Sync {
    /// Whether this process may change accounts at all.
    fn has_privilege(&self) -> bool;
    fn user_exists(&self, user: &str) -> bool;
    fn lock(&self, user: &str) -> Result<(), String>;
    fn unlock(&self, user: &str) -> Result<(), String>;
    fn terminate_sessions(&self, user: &str) -> Result<(), String>;
}

/// [`AccountControl`] backed by shadow-utils and procps.
#[derive(Debug, Clone, Default)]
pub struct SystemAccounts;

/// Run a command and turn a non-zero exit into its stderr.
fn run(program: &str, args: &[&str]) -> Result<(), String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| format!("Failed to execute {}: {}", program, e))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

/// User names go straight into argv, never through a shell, but a leading
/// dash would still be read as an option.
fn valid_user_name(user: &str) -> bool {
    !user.is_empty()
        && !user.starts_with('-')
        && user
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '$'))
}

impl AccountControl for SystemAccounts {
    fn has_privilege(&self) -> bool {
        Command::new("id")
            .arg("-u")
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).trim() == "0")
            .unwrap_or(false)
    }

    fn user_exists(&self, user: &str) -> bool {
        valid_user_name(user)
            && Command::new("id")
                .arg(user)
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
    }

    fn lock(&self, user: &str) -> Result<(), String> {
        run("usermod", &["-L", "-e", "1", user])
    }

    fn unlock(&self, user: &str) -> Result<(), String> {
        run("usermod", &["-U", "-e", "", user])
    }

    fn terminate_sessions(&self, user: &str) -> Result<(), String> {
        // pkill exits 1 when nothing matched; that is not a failure here.
        let output = Command::new("pkill")
            .args(["-KILL", "-u", user])
            .output()
            .map_err(|e| format!("Failed to execute pkill: {}", e))?;
        match output.status.code() {
            Some(0) | Some(1) => Ok(()),
            _ => Err(format!(
                "pkill exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// AccountLockoutManager
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct LockRecord {
    applied_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    /// Distinguishes this lock from a later one on the same user.
    generation: u64,
    timer: Option<AbortHandle>,
}

struct LockTable {
    records: HashMap<String, LockRecord>,
    /// Users with an OS call in flight.
    busy: HashSet<String>,
    next_generation: u64,
}

struct Inner {
    control: Arc<dyn AccountControl>,
    table: Mutex<LockTable>,
    runtime: Option<Handle>,
}

/// Applies and reverses temporary account locks. Cheap to clone.
#[derive(Clone)]
pub struct AccountLockoutManager {
    inner: Arc<Inner>,
}

impl AccountLockoutManager {
    /// Uses the current tokio runtime, if any, for scheduled unlocks.
    pub fn new(control: Arc<dyn AccountControl>) -> Self {
        Self::with_runtime(control, Handle::try_current().ok())
    }

    pub fn with_runtime(control: Arc<dyn AccountControl>, runtime: Option<Handle>) -> Self {
        Self {
            inner: Arc::new(Inner {
                control,
                table: Mutex::new(LockTable {
                    records: HashMap::new(),
                    busy: HashSet::new(),
                    next_generation: 0,
                }),
                runtime,
            }),
        }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemAccounts))
    }

    /// Lock `user` for `minutes`.
    pub fn lock(&self, user: &str, minutes: u64) -> (bool, String) {
        if !self.inner.control.has_privilege() {
            let msg = format!("Cannot lock {}: insufficient privileges (run as root)", user);
            log::warn!("[LOCK] {}", msg);
            return (false, msg);
        }

        {
            let mut table = self.inner.table();
            if table.records.contains_key(user) {
                return (false, format!("User {} is already locked", user));
            }
            if !table.busy.insert(user.to_string()) {
                return (false, format!("User {} has a lock change in progress", user));
            }
        }

        let outcome = if !self.inner.control.user_exists(user) {
            Err(format!("Cannot lock {}: no such user", user))
        } else {
            self.inner
                .control
                .lock(user)
                .map_err(|e| format!("Failed to lock {}: {}", user, e))
        };

        let mut table = self.inner.table();
        table.busy.remove(user);
        if let Err(msg) = outcome {
            log::warn!("[LOCK] {}", msg);
            return (false, msg);
        }

        let now = Utc::now();
        let generation = table.next_generation;
        table.next_generation += 1;
        let timer = self.schedule_unlock(user, generation, minutes);
        table.records.insert(
            user.to_string(),
            LockRecord {
                applied_at: now,
                expires_at: now + capped_minutes(minutes),
                generation,
                timer,
            },
        );

        let msg = format!("User {} locked for {} minutes", user, minutes);
        log::warn!("[LOCK] {}", msg);
        (true, msg)
    }

    /// Unlock `user` now and cancel its scheduled unlock.
    pub fn unlock(&self, user: &str) -> (bool, String) {
        let generation = {
            let mut table = self.inner.table();
            let generation = match table.records.get(user) {
                Some(record) => record.generation,
                None => return (false, format!("User {} is not locked", user)),
            };
            if !table.busy.insert(user.to_string()) {
                return (false, format!("User {} has a lock change in progress", user));
            }
            generation
        };

        let outcome = self.inner.control.unlock(user);

        let mut table = self.inner.table();
        table.busy.remove(user);
        if let Err(e) = outcome {
            let msg = format!("Failed to unlock {}: {}", user, e);
            log::error!("[UNLOCK] {}", msg);
            return (false, msg);
        }
        if table.records.get(user).map(|r| r.generation) == Some(generation) {
            if let Some(record) = table.records.remove(user) {
                if let Some(timer) = record.timer {
                    timer.abort();
                }
                log::info!(
                    "[UNLOCK] User {} unlocked after {} minutes",
                    user,
                    (Utc::now() - record.applied_at).num_minutes()
                );
            }
        }
        (true, format!("User {} unlocked", user))
    }

    pub fn is_locked(&self, user: &str) -> bool {
        self.inner.table().records.contains_key(user)
    }

    /// Whole minutes left on the lock, rounded up. 0 when not locked.
    pub fn remaining_minutes(&self, user: &str) -> u64 {
        self.inner
            .table()
            .records
            .get(user)
            .map(|r| minutes_until(r.expires_at, Utc::now()))
            .unwrap_or(0)
    }

    pub fn terminate_sessions(&self, user: &str) -> (bool, String) {
        match self.inner.control.terminate_sessions(user) {
            Ok(()) => {
                log::warn!("[LOCK] Terminated sessions of {}", user);
                (true, format!("Sessions of {} terminated", user))
            }
            Err(e) => {
                log::error!("[LOCK] Failed to terminate sessions of {}: {}", user, e);
                (false, e)
            }
        }
    }

    pub fn locked_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.inner.table().records.keys().cloned().collect();
        users.sort();
        users
    }

    /// Unlock every lock whose time is up. Backstop for scheduled unlocks.
    pub fn release_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<(String, u64)> = self
            .inner
            .table()
            .records
            .iter()
            .filter(|(_, r)| r.expires_at <= now)
            .map(|(u, r)| (u.clone(), r.generation))
            .collect();
        expired
            .into_iter()
            .filter(|(user, generation)| self.inner.expire(user, *generation).0)
            .map(|(user, _)| user)
            .collect()
    }

    /// Unlock everything, for shutdown.
    pub fn release_all(&self) -> usize {
        let users = self.locked_users();
        users.iter().filter(|u| self.unlock(u).0).count()
    }

    fn schedule_unlock(&self, user: &str, generation: u64, minutes: u64) -> Option<AbortHandle> {
        let runtime = self.inner.runtime.as_ref()?;
        let inner = Arc::clone(&self.inner);
        let user = user.to_string();
        let delay = std::time::Duration::from_secs(minutes.min(MAX_CONFIG_MINUTES) * 60);
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let result = tokio::task::spawn_blocking(move || inner.expire(&user, generation)).await;
            if let Err(e) = result {
                log::error!("[UNLOCK] Scheduled unlock task failed: {}", e);
            }
        });
        Some(task.abort_handle())
    }
}

impl Inner {
    fn table(&self) -> MutexGuard<'_, LockTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Time-up path: the record goes away even if the OS call fails.
    fn expire(&self, user: &str, generation: u64) -> (bool, String) {
        {
            let mut table = self.table();
            match table.records.get(user) {
                Some(record) if record.generation == generation => {}
                _ => return (false, format!("User {} is not locked", user)),
            }
            // A manual unlock already in flight settles this lock.
            if !table.busy.insert(user.to_string()) {
                return (false, format!("User {} has a lock change in progress", user));
            }
            table.records.remove(user);
        }

        let outcome = self.control.unlock(user);
        self.table().busy.remove(user);
        match outcome {
            Ok(()) => {
                log::info!("[UNLOCK] Lock on {} expired, account unlocked", user);
                (true, format!("User {} unlocked", user))
            }
            Err(e) => {
                log::error!("[UNLOCK] Lock on {} expired but unlock failed: {}", user, e);
                (false, e)
            }
        }
    }
}

pub(crate) fn minutes_until(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let secs = (expires_at - now).num_seconds();
    if secs <= 0 {
        0
    } else {
        ((secs + 59) / 60) as u64
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
