//! # Agent Orchestrator
//!
//! Wires watchers, parsers and collaborators into one running agent:
//!
//! ```text
//! FileWatcher --line--> parsers (first match wins) --event--> risk scorer
//!                                                        \--> store --> console --> notifier
//! ```
//!
//! Besides one tailing task per file, two periodic tasks run while the agent
//! is up: the sweep (parser cleanup plus store retention) and the expiry pass
//! that reverses locks and blocks whose time is up and drops incomplete audit
//! records.
//!
//! Lifecycle is `Idle -> Running -> Stopped`. A stopped agent has closed its
//! parsers and cannot be started again.

use chrono::Utc;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::parsers::auditd::{AuditdParser, UserDirectory};
use crate::parsers::brute_force::BruteForceParser;
use crate::parsers::privilege::PrivilegeParser;
use crate::parsers::ssh::SshParser;
use crate::parsers::{EventParser, RawLogLine};
use crate::render;
use crate::response::alerter::{Notifier, NullNotifier, WebhookNotifier};
use crate::response::blocker::{IpBlockManager, Iptables};
use crate::response::lockout::AccountLockoutManager;
use crate::risk::{CommandRequest, HttpRiskScorer, RiskScorer};
use crate::storage::EventStore;
use crate::watcher::{FileWatcher, LineCallback};
use crate::{AgentConfig, AgentError, AgentResult, EventDetail, SecurityEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Running,
    Stopped,
}

/// Line and event totals since the agent was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentCounters {
    pub lines: u64,
    pub events: u64,
}

/// The four parsers in routing order, built from configuration.
///
/// Brute force runs before ssh but only claims a failed login once its
/// source reaches the threshold or is blocked; earlier failures are counted
/// and fall through to ssh as `ssh_login_failed` / `ssh_invalid_user`. Must
/// be called inside a tokio runtime when lockout is enabled, so scheduled
/// unlocks have somewhere to run.
pub fn default_parsers(config: &AgentConfig) -> Vec<Box<dyn EventParser>> {
    let release = config.general.release_on_shutdown;

    let blocker = config
        .brute_force
        .blocking_enabled
        .then(|| IpBlockManager::new(Arc::new(Iptables::new(config.brute_force.ssh_port))));
    let lockout = config
        .privilege
        .lockout_enabled
        .then(AccountLockoutManager::system);
    let users = config
        .command
        .passwd_path
        .as_deref()
        .map(UserDirectory::load)
        .unwrap_or_default();

    vec![
        Box::new(
            BruteForceParser::new(&config.brute_force, blocker)
                .attempt_events(false)
                .release_on_close(release),
        ),
        Box::new(PrivilegeParser::new(&config.privilege, lockout).release_on_close(release)),
        Box::new(SshParser::new(&config.ssh)),
        Box::new(AuditdParser::new(&config.command, users)),
    ]
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Everything a line touches after the watcher. Shared by all watcher tasks.
struct Pipeline {
    parsers: Vec<Mutex<Box<dyn EventParser>>>,
    store: Option<Arc<dyn EventStore>>,
    scorer: Option<Arc<dyn RiskScorer>>,
    notifier: Arc<dyn Notifier>,
    console: bool,
    retention_days: u32,
    lines: AtomicU64,
    events: AtomicU64,
}

impl Pipeline {
    fn process_line(&self, line: &RawLogLine) -> Option<SecurityEvent> {
        self.lines.fetch_add(1, Ordering::Relaxed);
        let mut event = self.route(line)?;

        // Parser locks are released by now; a slow scorer only holds up
        // this file's watcher.
        if let (Some(scorer), EventDetail::CommandExecution(exec)) = (&self.scorer, &mut event.detail) {
            if let Some(assessment) = scorer.assess(&CommandRequest::from_event(exec, event.timestamp)) {
                assessment.apply(exec);
            }
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.store_event(&event) {
                log::error!("Failed to store {} event: {}", event.kind(), e);
            }
        }

        if self.console {
            println!("{}", render::event_line(&event));
        }

        if event.is_alert_worthy() {
            match serde_json::to_value(&event) {
                Ok(payload) => self.notifier.send_alert(event.kind(), &payload),
                Err(e) => log::warn!("Cannot encode {} alert: {}", event.kind(), e),
            }
        }

        self.events.fetch_add(1, Ordering::Relaxed);
        Some(event)
    }

    /// Offer the line to each parser in order. A panicking parser counts as
    /// no match.
    fn route(&self, line: &RawLogLine) -> Option<SecurityEvent> {
        for slot in &self.parsers {
            let mut parser = slot.lock().unwrap_or_else(|e| e.into_inner());
            let name = parser.name();
            match panic::catch_unwind(AssertUnwindSafe(|| parser.parse(line))) {
                Ok(Some(event)) => return Some(event),
                Ok(None) => {}
                Err(_) => log::error!(
                    "Parser {} panicked on a line from {}, skipping it",
                    name,
                    line.source_path
                ),
            }
        }
        log::trace!("No parser matched: {}", line.text);
        None
    }

    fn sweep(&self) {
        let now = Utc::now();
        for slot in &self.parsers {
            let mut parser = slot.lock().unwrap_or_else(|e| e.into_inner());
            let name = parser.name();
            if panic::catch_unwind(AssertUnwindSafe(|| parser.cleanup(now))).is_err() {
                log::error!("[SWEEP] Parser {} panicked during cleanup", name);
            }
        }

        if let Some(store) = &self.store {
            match store.cleanup_older_than(self.retention_days) {
                Ok(0) => {}
                Ok(n) => log::info!("[SWEEP] Deleted {} events older than {} days", n, self.retention_days),
                Err(e) => log::warn!("[SWEEP] Store retention failed: {}", e),
            }
        }
        log::debug!("[SWEEP] Done");
    }

    fn release_expired(&self) {
        let now = Utc::now();
        for slot in &self.parsers {
            let mut parser = slot.lock().unwrap_or_else(|e| e.into_inner());
            let name = parser.name();
            if panic::catch_unwind(AssertUnwindSafe(|| parser.release_expired(now))).is_err() {
                log::error!("Parser {} panicked while releasing expired mitigations", name);
            }
        }
    }

    fn close(&self) {
        for slot in &self.parsers {
            let mut parser = slot.lock().unwrap_or_else(|e| e.into_inner());
            let name = parser.name();
            if panic::catch_unwind(AssertUnwindSafe(|| parser.close())).is_err() {
                log::error!("Parser {} panicked while closing", name);
            }
        }
        if let Some(store) = &self.store {
            store.close();
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct AgentBuilder {
    config: AgentConfig,
    sources: Vec<PathBuf>,
    parsers: Option<Vec<Box<dyn EventParser>>>,
    store: Option<Arc<dyn EventStore>>,
    scorer: Option<Arc<dyn RiskScorer>>,
    notifier: Option<Arc<dyn Notifier>>,
    console: bool,
}

impl AgentBuilder {
    /// Add a file to watch.
    pub fn source(mut self, path: impl Into<PathBuf>) -> Self {
        self.sources.push(path.into());
        self
    }

    /// Replace the configured parsers. Routing follows the given order.
    pub fn parsers(mut self, parsers: Vec<Box<dyn EventParser>>) -> Self {
        self.parsers = Some(parsers);
        self
    }

    pub fn store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn scorer(mut self, scorer: Arc<dyn RiskScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Print one line per event to stdout. On by default.
    pub fn console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    pub fn build(self) -> AgentResult<Agent> {
        let config = self.config;
        config.validate()?;

        let stale_rule_port = match self.parsers {
            None if config.brute_force.blocking_enabled => Some(config.brute_force.ssh_port),
            _ => None,
        };
        let parsers = self.parsers.unwrap_or_else(|| default_parsers(&config));

        let scorer = match self.scorer {
            Some(s) => Some(s),
            None if config.command.risk_scoring => {
                let scorer = HttpRiskScorer::from_config(&config.command);
                log::info!("Risk scoring via {}", scorer.url());
                Some(Arc::new(scorer) as Arc<dyn RiskScorer>)
            }
            None => None,
        };

        let notifier: Arc<dyn Notifier> = match (self.notifier, &config.notifications.webhook_url) {
            (Some(n), _) => n,
            (None, Some(url)) => Arc::new(WebhookNotifier::new(url)?),
            (None, None) => Arc::new(NullNotifier),
        };

        let general = &config.general;
        Ok(Agent {
            state: AgentState::Idle,
            pipeline: Arc::new(Pipeline {
                parsers: parsers.into_iter().map(Mutex::new).collect(),
                store: self.store,
                scorer,
                notifier,
                console: self.console,
                retention_days: general.retention_days,
                lines: AtomicU64::new(0),
                events: AtomicU64::new(0),
            }),
            sources: self.sources,
            watchers: Vec::new(),
            from_beginning: general.from_beginning,
            poll_interval: Duration::from_millis(general.poll_interval_ms),
            grace: Duration::from_millis(general.shutdown_grace_ms),
            sweep_interval: Duration::from_secs(general.sweep_interval_secs.max(1)),
            expiry_interval: Duration::from_secs(general.expiry_interval_secs.max(1)),
            stale_rule_port,
            task_shutdown: None,
            tasks: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

pub struct Agent {
    state: AgentState,
    pipeline: Arc<Pipeline>,
    sources: Vec<PathBuf>,
    watchers: Vec<FileWatcher>,
    from_beginning: bool,
    poll_interval: Duration,
    grace: Duration,
    sweep_interval: Duration,
    expiry_interval: Duration,
    /// Set when the default brute-force parser may insert firewall rules.
    stale_rule_port: Option<u16>,
    task_shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Agent {
    pub fn builder(config: AgentConfig) -> AgentBuilder {
        AgentBuilder {
            config,
            sources: Vec::new(),
            parsers: None,
            store: None,
            scorer: None,
            notifier: None,
            console: true,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn counters(&self) -> AgentCounters {
        AgentCounters {
            lines: self.pipeline.lines.load(Ordering::Relaxed),
            events: self.pipeline.events.load(Ordering::Relaxed),
        }
    }

    /// Run one line through the pipeline as if a watcher had read it.
    pub fn process_line(&self, line: &RawLogLine) -> Option<SecurityEvent> {
        self.pipeline.process_line(line)
    }

    /// Start watching every source and the periodic tasks. Fails if any
    /// source cannot be opened; watchers already started are stopped again.
    pub async fn start(&mut self) -> AgentResult<()> {
        match self.state {
            AgentState::Running => return Ok(()),
            AgentState::Stopped => {
                return Err(AgentError::Config("agent was stopped and cannot be restarted".into()))
            }
            AgentState::Idle => {}
        }
        if self.sources.is_empty() {
            return Err(AgentError::Config("no log files to watch".into()));
        }

        if let Some(port) = self.stale_rule_port {
            let cleared = tokio::task::spawn_blocking(move || Iptables::new(port).clear_tagged_rules()).await;
            match cleared {
                Ok(Ok(0)) => {}
                Ok(Ok(n)) => log::info!("[CLEAR] Removed {} firewall rules left by an earlier run", n),
                Ok(Err(e)) => log::warn!("[CLEAR] Could not clear old firewall rules: {}", e),
                Err(e) => log::warn!("[CLEAR] Rule cleanup task failed: {}", e),
            }
        }

        let pipeline = Arc::clone(&self.pipeline);
        let callback: LineCallback = Arc::new(move |line: RawLogLine| {
            pipeline.process_line(&line);
        });

        for path in &self.sources {
            let mut watcher = FileWatcher::new(path, self.from_beginning)
                .with_poll_interval(self.poll_interval)
                .with_grace(self.grace);
            if let Err(e) = watcher.start(Arc::clone(&callback)) {
                for started in &mut self.watchers {
                    let _ = started.stop().await;
                }
                self.watchers.clear();
                return Err(e);
            }
            self.watchers.push(watcher);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweep = Arc::clone(&self.pipeline);
        self.tasks.push(spawn_periodic(
            "sweep",
            self.sweep_interval,
            shutdown_rx.clone(),
            move || sweep.sweep(),
        ));
        let expiry = Arc::clone(&self.pipeline);
        self.tasks.push(spawn_periodic(
            "expiry",
            self.expiry_interval,
            shutdown_rx,
            move || expiry.release_expired(),
        ));
        self.task_shutdown = Some(shutdown_tx);

        self.state = AgentState::Running;
        log::info!("auditdog is watching {} file(s)", self.watchers.len());
        Ok(())
    }

    /// Stop watchers, then the periodic tasks, then close parsers and the
    /// store. Every watcher is asked to stop even if an earlier one fails;
    /// their errors are returned together at the end.
    pub async fn stop(&mut self) -> AgentResult<()> {
        if self.state != AgentState::Running {
            return Ok(());
        }
        self.state = AgentState::Stopped;

        let mut errors = Vec::new();
        for watcher in &mut self.watchers {
            if let Err(e) = watcher.stop().await {
                log::warn!("{}", e);
                errors.push(e.to_string());
            }
        }

        if let Some(shutdown) = self.task_shutdown.take() {
            let _ = shutdown.send(true);
        }
        for mut task in self.tasks.drain(..) {
            if tokio::time::timeout(self.grace, &mut task).await.is_err() {
                log::warn!("Periodic task did not stop within {:?}, aborting", self.grace);
                task.abort();
            }
        }

        let pipeline = Arc::clone(&self.pipeline);
        let mut closing = tokio::task::spawn_blocking(move || pipeline.close());
        if tokio::time::timeout(self.grace, &mut closing).await.is_err() {
            log::warn!("Releasing mitigations is taking longer than {:?}, not waiting", self.grace);
        }

        let counters = self.counters();
        log::info!(
            "auditdog stopped. Processed {} lines, emitted {} events.",
            counters.lines,
            counters.events
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AgentError::Watcher(errors.join("; ")))
        }
    }
}

/// Run `work` on the blocking pool every `period` until shutdown.
fn spawn_periodic<F>(
    name: &'static str,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    work: F,
) -> JoinHandle<()>
where
    F: Fn() + Send + Sync + 'static,
{
    let work = Arc::new(work);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = ticker.tick() => {
                    let work = Arc::clone(&work);
                    let mut job = tokio::task::spawn_blocking(move || work());
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        res = &mut job => {
                            if let Err(e) = res {
                                log::error!("{} pass failed: {}", name, e);
                            }
                        }
                    }
                }
            }
        }
        log::debug!("{} task stopped", name);
    })
}
