//! # File Tailing Watcher
//!
//! Follows one log file and hands every new, non-empty line to a callback,
//! in file order.
//!
//! A read cycle runs whenever the OS reports a change in the file's
//! directory (inotify via `notify`) and on a fixed poll interval, since
//! notifications get lost or are unsupported on some filesystems. Each
//! cycle compares the file size with the byte offset of the last delivered
//! line:
//! - smaller: the file was truncated or rotated, start over at 0
//! - equal: nothing to do
//! - larger: read complete lines from the offset and deliver them
//!
//! A line without its terminator yet is left for the next cycle.

use chrono::Utc;
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::parsers::RawLogLine;
use crate::{AgentError, AgentResult};

/// Receives each line as it is read.
pub type LineCallback = Arc<dyn Fn(RawLogLine) + Send + Sync>;

#[derive(Debug)]
struct TailState {
    path: PathBuf,
    label: String,
    /// Byte offset just past the last delivered line.
    offset: u64,
}

pub struct FileWatcher {
    path: PathBuf,
    from_beginning: bool,
    poll_interval: Duration,
    grace: Duration,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl FileWatcher {
    pub fn new(path: impl Into<PathBuf>, from_beginning: bool) -> Self {
        Self {
            path: path.into(),
            from_beginning,
            poll_interval: Duration::from_millis(100),
            grace: Duration::from_millis(1500),
            shutdown: None,
            task: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(10));
        self
    }

    /// How long `stop` waits for an in-flight cycle before giving up.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Open the file and start following it. Must be called from within a
    /// tokio runtime. A file that cannot be opened is an error.
    pub fn start(&mut self, callback: LineCallback) -> AgentResult<()> {
        if self.is_running() {
            return Ok(());
        }

        let file = File::open(&self.path).map_err(|e| {
            AgentError::Watcher(format!("Cannot open {}: {}", self.path.display(), e))
        })?;
        let offset = if self.from_beginning {
            0
        } else {
            file.metadata()?.len()
        };

        let state = Arc::new(Mutex::new(TailState {
            path: self.path.clone(),
            label: self.path.display().to_string(),
            offset,
        }));

        let (notify_tx, notify_rx) = mpsc::channel::<()>(16);
        let fs_watcher = self.watch_directory(notify_tx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        log::info!(
            "Watching {} from {} (notifications: {})",
            self.path.display(),
            if self.from_beginning { "the beginning" } else { "the end" },
            if fs_watcher.is_some() { "on" } else { "off, polling only" }
        );

        self.task = Some(tokio::spawn(tail_loop(
            state,
            callback,
            fs_watcher,
            notify_rx,
            shutdown_rx,
            self.poll_interval,
        )));
        self.shutdown = Some(shutdown_tx);
        Ok(())
    }

    /// Subscribe to changes in the file's directory. The directory, not the
    /// file, so rotation (new inode under the same name) is still seen.
    fn watch_directory(&self, tx: mpsc::Sender<()>) -> Option<RecommendedWatcher> {
        let name = self.path.file_name()?.to_owned();
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let result = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    if event.paths.iter().any(|p| p.file_name() == Some(name.as_os_str())) {
                        // A full channel already has a wakeup queued.
                        let _ = tx.try_send(());
                    }
                }
            },
            NotifyConfig::default(),
        )
        .and_then(|mut w| w.watch(&dir, RecursiveMode::NonRecursive).map(|_| w));

        match result {
            Ok(w) => Some(w),
            Err(e) => {
                log::warn!("File notifications unavailable for {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Stop following the file. Waits for an in-flight read cycle up to the
    /// grace period, then abandons it. Calling it again is a no-op.
    pub async fn stop(&mut self) -> AgentResult<()> {
        let Some(mut task) = self.task.take() else {
            return Ok(());
        };
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }

        match tokio::time::timeout(self.grace, &mut task).await {
            Ok(Ok(())) => {
                log::debug!("Stopped watching {}", self.path.display());
                Ok(())
            }
            Ok(Err(e)) => Err(AgentError::Watcher(format!(
                "Watcher for {} ended abnormally: {}",
                self.path.display(),
                e
            ))),
            Err(_) => {
                task.abort();
                Err(AgentError::Watcher(format!(
                    "Watcher for {} did not stop within {:?}",
                    self.path.display(),
                    self.grace
                )))
            }
        }
    }
}

async fn tail_loop(
    state: Arc<Mutex<TailState>>,
    callback: LineCallback,
    // Held so notifications keep flowing until the loop ends.
    _fs_watcher: Option<RecommendedWatcher>,
    mut notify_rx: mpsc::Receiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
    poll_interval: Duration,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            Some(()) = notify_rx.recv() => {}
            _ = ticker.tick() => {}
        }

        let state = Arc::clone(&state);
        let callback = Arc::clone(&callback);
        let cycle = tokio::task::spawn_blocking(move || {
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            match read_cycle(&mut state, callback.as_ref()) {
                Ok(n) => n,
                Err(e) => {
                    log::warn!("Read of {} failed, retrying next cycle: {}", state.label, e);
                    0
                }
            }
        });
        match cycle.await {
            Ok(n) if n > 0 => log::trace!("Delivered {} lines", n),
            Ok(_) => {}
            Err(e) => log::error!("Read cycle panicked: {}", e),
        }
    }
}

/// Deliver every complete line past the stored offset. The offset moves
/// only past lines that were handed to the callback.
fn read_cycle(state: &mut TailState, callback: &(dyn Fn(RawLogLine) + Send + Sync)) -> AgentResult<usize> {
    let file = File::open(&state.path)?;
    let file_size = file.metadata()?.len();

    if file_size < state.offset {
        log::info!(
            "File rotation detected for {} (size {} < offset {}), resetting",
            state.label,
            file_size,
            state.offset
        );
        state.offset = 0;
    }
    if file_size == state.offset {
        return Ok(0);
    }

    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(state.offset))?;

    let mut delivered = 0;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let bytes_read = reader.read_until(b'\n', &mut buf)?;
        if bytes_read == 0 || buf.last() != Some(&b'\n') {
            break;
        }
        state.offset += bytes_read as u64;

        let text = String::from_utf8_lossy(&buf);
        let trimmed = text.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            continue;
        }
        callback(RawLogLine::new(trimmed, state.label.clone(), Utc::now()));
        delivered += 1;
    }
    Ok(delivered)
}
