//! # auditdog - CLI Entry Point
//!
//! Commands:
//! - `run`         - Watch the auth and audit logs until Ctrl-C
//! - `query`       - Search stored events
//! - `stats`       - Summarize stored events
//! - `cleanup`     - Delete stored events older than N days
//! - `init-config` - Generate a default configuration file

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::Notify;

use auditdog::agent::Agent;
use auditdog::render;
use auditdog::storage::{EventQuery, EventStore, JsonlStore};
use auditdog::{AgentConfig, AgentError, AgentResult, EventKind};

/// Authentication logs tried, in order, when none are configured.
const AUTH_LOG_CANDIDATES: [&str; 3] = ["/var/log/auth.log", "/var/log/secure", "/var/log/syslog"];

/// auditdog - host intrusion detection for SSH, sudo/su and command execution.
#[derive(Parser, Debug)]
#[command(name = "auditdog")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true, default_value = "auditdog.toml")]
    config: PathBuf,

    /// Verbose logging (RUST_LOG still takes precedence).
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch log files and report events until interrupted.
    Run {
        /// Authentication log to watch. Repeat for several files.
        #[arg(long = "log-file")]
        log_files: Vec<PathBuf>,

        /// auditd log to watch for command executions.
        #[arg(long)]
        audit_log: Option<PathBuf>,

        /// Process existing file content instead of only new lines.
        #[arg(long)]
        from_beginning: bool,

        /// Event store directory.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Do not store events.
        #[arg(long)]
        no_store: bool,
    },

    /// Search stored events.
    Query {
        /// Event kind, e.g. ssh_login_failed.
        #[arg(long)]
        event_type: Option<String>,

        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        ip: Option<String>,

        /// RFC 3339 time, e.g. 2024-06-15T00:00:00Z.
        #[arg(long)]
        since: Option<String>,

        /// RFC 3339 time.
        #[arg(long)]
        until: Option<String>,

        /// Show only the most recent N events.
        #[arg(long)]
        limit: Option<usize>,

        /// Print JSON lines instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Summarize stored events.
    Stats,

    /// Delete stored events older than the given age.
    Cleanup {
        #[arg(long)]
        days: u32,
    },

    /// Generate a default configuration file.
    InitConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let result = match cli.command {
        Commands::Run {
            log_files,
            audit_log,
            from_beginning,
            data_dir,
            no_store,
        } => {
            let mut config = match load_config(&cli.config) {
                Ok(c) => c,
                Err(e) => return fail(e),
            };
            if !log_files.is_empty() {
                config.log_sources.auth_log_paths = log_files;
            }
            let audit_required = audit_log.is_some();
            if audit_required {
                config.log_sources.audit_log_path = audit_log;
            }
            if from_beginning {
                config.general.from_beginning = true;
            }
            if let Some(dir) = data_dir {
                config.general.data_dir = dir;
            }
            cmd_run(config, !no_store, audit_required).await
        }
        Commands::Query {
            event_type,
            user,
            ip,
            since,
            until,
            limit,
            json,
        } => build_query(event_type, user, ip, since, until, limit)
            .and_then(|query| cmd_query(&cli.config, &query, json)),
        Commands::Stats => cmd_stats(&cli.config),
        Commands::Cleanup { days } => cmd_cleanup(&cli.config, days),
        Commands::InitConfig => cmd_init_config(&cli.config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(e),
    }
}

fn fail(error: AgentError) -> ExitCode {
    eprintln!("error: {}", error);
    if let Some(hint) = hint_for(&error) {
        eprintln!("hint: {}", hint);
    }
    ExitCode::FAILURE
}

fn hint_for(error: &AgentError) -> Option<&'static str> {
    match error {
        AgentError::Watcher(_) => Some(
            "check the path and permissions; auth and audit logs are usually readable by root only (try sudo)",
        ),
        AgentError::Config(msg) if msg.contains("No readable authentication log") => {
            Some("pass --log-file PATH or set [log_sources].auth_log_paths in the config file")
        }
        AgentError::Storage(_) => Some("pass --data-dir to a writable directory, or --no-store"),
        _ => None,
    }
}

fn load_config(config_path: &Path) -> AgentResult<AgentConfig> {
    if config_path.exists() {
        info!("Loading configuration from: {}", config_path.display());
        AgentConfig::from_file(config_path)
    } else {
        info!("No config file found, using defaults. Run 'init-config' to generate one.");
        Ok(AgentConfig::default())
    }
}

fn readable(path: &Path) -> bool {
    File::open(path).is_ok()
}

/// Files to watch: the configured auth logs (or the first readable
/// candidate) plus the audit log. The default audit log is skipped when
/// unreadable; explicit paths that cannot be opened fail at watcher start.
fn resolve_sources(config: &AgentConfig, audit_required: bool) -> AgentResult<Vec<PathBuf>> {
    let mut sources = config.log_sources.auth_log_paths.clone();
    if sources.is_empty() {
        let detected = AUTH_LOG_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|p| readable(p))
            .ok_or_else(|| {
                AgentError::Config(format!(
                    "No readable authentication log found (tried {})",
                    AUTH_LOG_CANDIDATES.join(", ")
                ))
            })?;
        info!("Auto-detected authentication log: {}", detected.display());
        sources.push(detected);
    }

    if let Some(audit) = &config.log_sources.audit_log_path {
        if audit_required || readable(audit) {
            sources.push(audit.clone());
        } else {
            warn!(
                "Audit log {} is not readable, command monitoring disabled",
                audit.display()
            );
        }
    }
    Ok(sources)
}

/// Start the agent and wait for Ctrl-C.
async fn cmd_run(config: AgentConfig, store_events: bool, audit_required: bool) -> AgentResult<()> {
    info!("auditdog starting...");

    let sources = resolve_sources(&config, audit_required)?;

    let mut builder = Agent::builder(config.clone());
    for source in &sources {
        builder = builder.source(source);
    }
    if store_events {
        builder = builder.store(Arc::new(JsonlStore::open(&config.general.data_dir)?));
    } else {
        info!("Event storage disabled");
    }

    let mut agent = builder.build()?;
    info!(
        "Brute force blocking: {}, account lockout: {}, risk scoring: {}",
        config.brute_force.blocking_enabled,
        config.privilege.lockout_enabled,
        config.command.risk_scoring
    );

    let shutdown = Arc::new(Notify::new());
    let signal = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || signal.notify_one()) {
        warn!("Could not install signal handler: {}. Use kill to stop.", e);
    }

    agent.start().await?;
    shutdown.notified().await;
    info!("Shutdown signal received. Stopping gracefully...");

    if let Err(e) = agent.stop().await {
        warn!("Shutdown finished with errors: {}", e);
    }
    Ok(())
}

fn parse_time(value: Option<String>, flag: &str) -> AgentResult<Option<DateTime<Utc>>> {
    value
        .map(|v| {
            DateTime::parse_from_rfc3339(&v)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| AgentError::Config(format!("invalid --{} '{}': {}", flag, v, e)))
        })
        .transpose()
}

fn build_query(
    event_type: Option<String>,
    user: Option<String>,
    ip: Option<String>,
    since: Option<String>,
    until: Option<String>,
    limit: Option<usize>,
) -> AgentResult<EventQuery> {
    Ok(EventQuery {
        kind: event_type.map(|k| k.parse::<EventKind>()).transpose()?,
        user,
        ip_address: ip,
        since: parse_time(since, "since")?,
        until: parse_time(until, "until")?,
        limit,
    })
}

fn open_store(config_path: &Path) -> AgentResult<JsonlStore> {
    let config = load_config(config_path)?;
    JsonlStore::open(&config.general.data_dir)
}

fn cmd_query(config_path: &Path, query: &EventQuery, json: bool) -> AgentResult<()> {
    let events = open_store(config_path)?.query_events(query)?;
    if json {
        for event in &events {
            println!("{}", serde_json::to_string(event)?);
        }
    } else {
        print!("{}", render::query_table(&events));
    }
    Ok(())
}

fn cmd_stats(config_path: &Path) -> AgentResult<()> {
    let stats = open_store(config_path)?.stats()?;
    print!("{}", render::stats_table(&stats));
    Ok(())
}

fn cmd_cleanup(config_path: &Path, days: u32) -> AgentResult<()> {
    let deleted = open_store(config_path)?.cleanup_older_than(days)?;
    println!("Deleted {} events older than {} days.", deleted, days);
    Ok(())
}

/// Generate a default configuration file.
fn cmd_init_config(config_path: &Path) -> AgentResult<()> {
    if config_path.exists() {
        return Err(AgentError::Config(format!(
            "Configuration file already exists: {}. Remove it first or use a different path.",
            config_path.display()
        )));
    }

    AgentConfig::write_default(config_path)?;
    println!("Default configuration written to: {}", config_path.display());
    println!();
    println!("Key settings to configure:");
    println!("  [log_sources]  - Auth and audit log paths (empty = auto-detect)");
    println!("  [brute_force]  - threshold, window, blocking_enabled (default false)");
    println!("  [privilege]    - failure_threshold, lockout_enabled (default false)");
    println!("  [command]      - risk_scoring and api_url");
    println!("  [notifications] - webhook_url for alerts");

    Ok(())
}
