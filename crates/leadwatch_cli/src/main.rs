//! LeadWatch process entry point.
//!
//! # Responsibility
//! - Load configuration and initialize logging.
//! - Wire the SQLite lead store and CRM notifier into the lifecycle engine.
//! - Expose lifecycle entry points as subcommands, plus the long-running
//!   scheduler mode.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use leadwatch_core::db::open_db;
use leadwatch_core::{
    default_log_level, init_logging, AppConfig, HttpNotifier, IngestLead, IngestOutcome,
    LeadStore, LifecycleEngine, LifecycleError, Notifier, Scheduler, SqliteLeadStore,
    StageChange, StageChangeOutcome, SweepJob, UnconfiguredNotifier,
};
use log::{info, warn};
use serde_json::{json, Value};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

type Engine = LifecycleEngine<SqliteLeadStore, Box<dyn Notifier>>;

#[derive(Debug, Parser)]
#[command(name = "leadwatch", version, about = "Track stage-one residency of CRM leads")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, default_value = "leadwatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ingest a lead, or restart the clock of an existing one.
    Ingest {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        phone: String,
    },
    /// Report a pipeline stage change for a lead.
    StageChange {
        #[arg(long)]
        email: String,
        #[arg(long)]
        previous_stage: Option<i64>,
        #[arg(long)]
        new_stage: i64,
    },
    /// Read one CRM webhook JSON body from stdin and dispatch it.
    Event,
    /// Run one sweep immediately.
    Sweep {
        #[arg(value_enum)]
        kind: SweepKind,
    },
    /// Print a stored lead as JSON.
    Show {
        #[arg(long)]
        email: String,
    },
    /// Run both sweeps periodically until the process is terminated.
    Run,
    /// Open the database and report status.
    Health,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SweepKind {
    Notify,
    Cleanup,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    let level = config
        .logging
        .level
        .as_deref()
        .unwrap_or_else(|| default_log_level());
    init_logging(level, config.logging.dir.as_deref())
        .map_err(|err| anyhow!("failed to initialize logging: {err}"))?;

    let needs_notifier = matches!(
        cli.command,
        Command::Run
            | Command::Sweep {
                kind: SweepKind::Notify
            }
    );
    let engine = build_engine(&config, needs_notifier)?;

    match cli.command {
        Command::Ingest { name, email, phone } => {
            ingest(&engine, &IngestLead::new(name, email, phone))
        }
        Command::StageChange {
            email,
            previous_stage,
            new_stage,
        } => stage_change(
            &engine,
            &StageChange::new(email, previous_stage, new_stage),
        ),
        Command::Event => {
            let mut body = String::new();
            std::io::stdin()
                .read_to_string(&mut body)
                .context("failed to read event body from stdin")?;
            dispatch_event(&engine, &body)
        }
        Command::Sweep { kind } => {
            let [notify, cleanup] = config.sweep_jobs();
            let job = match kind {
                SweepKind::Notify => notify,
                SweepKind::Cleanup => cleanup,
            };
            sweep(&engine, &job)
        }
        Command::Show { email } => {
            let lead = engine
                .store()
                .find_by_identity(email.trim())
                .context("failed to look up lead")?
                .ok_or_else(|| anyhow!("lead not found: {email}"))?;
            println!("{}", serde_json::to_string_pretty(&lead)?);
            Ok(())
        }
        Command::Run => run_scheduler(engine, &config),
        Command::Health => {
            let leads = engine.store().count().context("failed to count leads")?;
            println!("{}", json!({ "status": "healthy", "leads": leads }));
            Ok(())
        }
    }
}

fn load_config(path: &std::path::Path) -> Result<AppConfig> {
    let mut config = AppConfig::load_or_default(path)?;
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

fn build_engine(config: &AppConfig, needs_notifier: bool) -> Result<Engine> {
    let conn = open_db(&config.database.path).with_context(|| {
        format!(
            "failed to open database `{}`",
            config.database.path.display()
        )
    })?;

    let notifier: Box<dyn Notifier> = match config.notifier_settings() {
        Ok(settings) => Box::new(HttpNotifier::new(settings)?),
        Err(err) if needs_notifier => return Err(err.into()),
        Err(_) => Box::new(UnconfiguredNotifier),
    };

    Ok(LifecycleEngine::new(SqliteLeadStore::new(conn), notifier))
}

fn ingest(engine: &Engine, request: &IngestLead) -> Result<()> {
    let outcome = engine.ingest_lead(request)?;
    let status = match outcome {
        IngestOutcome::Created => "created",
        IngestOutcome::Restarted => "restarted",
    };
    println!("{}", json!({ "status": "success", "outcome": status }));
    Ok(())
}

fn stage_change(engine: &Engine, event: &StageChange) -> Result<()> {
    let status = match engine.handle_stage_change(event) {
        Ok(StageChangeOutcome::Moved) => "moved",
        Ok(StageChangeOutcome::Ignored) => "ignored",
        // Unknown leads are reported but not treated as failures.
        Err(LifecycleError::NotFound(email)) => {
            warn!("event=cli_stage_change module=cli status=not_found email={email}");
            "not_found"
        }
        Err(err) => return Err(err.into()),
    };
    println!("{}", json!({ "status": "success", "outcome": status }));
    Ok(())
}

/// Routes a CRM webhook body: bodies carrying stage fields are stage changes,
/// everything else is an ingestion.
fn dispatch_event(engine: &Engine, body: &str) -> Result<()> {
    let value: Value = serde_json::from_str(body).context("event body is not valid JSON")?;
    let Some(fields) = value.as_object() else {
        bail!("event body must be a JSON object");
    };

    if fields.contains_key("previous_stage") || fields.contains_key("new_stage") {
        let event: StageChange =
            serde_json::from_value(value).context("malformed stage-change event")?;
        stage_change(engine, &event)
    } else {
        let request: IngestLead =
            serde_json::from_value(value).context("malformed ingestion event")?;
        ingest(engine, &request)
    }
}

fn sweep(engine: &Engine, job: &SweepJob) -> Result<()> {
    let count = job.run(engine)?;
    println!("{}", json!({ "job": job.name(), "count": count }));
    Ok(())
}

fn run_scheduler(engine: Engine, config: &AppConfig) -> Result<()> {
    let engine = Arc::new(engine);
    let mut handle = Scheduler::start(engine, config.sweep_jobs())
        .context("failed to start sweep scheduler")?;
    info!(
        "event=scheduler_start module=cli status=ok jobs={}",
        handle.job_count()
    );
    handle.join();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{dispatch_event, Cli, Command, Engine, SweepKind};
    use clap::Parser;
    use leadwatch_core::db::open_db_in_memory;
    use leadwatch_core::{
        LeadStore, LifecycleEngine, Notifier, SqliteLeadStore, UnconfiguredNotifier,
    };

    fn engine() -> Engine {
        let notifier: Box<dyn Notifier> = Box::new(UnconfiguredNotifier);
        LifecycleEngine::new(SqliteLeadStore::new(open_db_in_memory().unwrap()), notifier)
    }

    #[test]
    fn parses_sweep_and_stage_change_commands() {
        let cli = Cli::parse_from(["leadwatch", "sweep", "cleanup"]);
        assert!(matches!(
            cli.command,
            Command::Sweep {
                kind: SweepKind::Cleanup
            }
        ));

        let cli = Cli::parse_from([
            "leadwatch",
            "--config",
            "/etc/leadwatch.toml",
            "stage-change",
            "--email",
            "a@x.com",
            "--new-stage",
            "2",
        ]);
        assert_eq!(cli.config.to_str(), Some("/etc/leadwatch.toml"));
        assert!(matches!(
            cli.command,
            Command::StageChange {
                previous_stage: None,
                new_stage: 2,
                ..
            }
        ));
    }

    #[test]
    fn dispatch_routes_ingestion_and_stage_change_bodies() {
        let engine = engine();
        dispatch_event(
            &engine,
            r#"{"name": "A", "email": "a@x.com", "phone": "1"}"#,
        )
        .unwrap();
        assert!(engine.store().find_by_identity("a@x.com").unwrap().unwrap().in_stage_one);

        dispatch_event(
            &engine,
            r#"{"email": "a@x.com", "previous_stage": 1, "new_stage": 2}"#,
        )
        .unwrap();
        let lead = engine.store().find_by_identity("a@x.com").unwrap().unwrap();
        assert!(!lead.in_stage_one);
        assert!(lead.moved_at.is_some());
    }

    #[test]
    fn dispatch_rejects_incomplete_ingestion_and_non_objects() {
        let engine = engine();
        assert!(dispatch_event(&engine, r#"{"name": "A", "email": "a@x.com"}"#).is_err());
        assert!(dispatch_event(&engine, "[1, 2]").is_err());
        assert!(dispatch_event(&engine, "not json").is_err());
        assert_eq!(engine.store().count().unwrap(), 0);
    }

    #[test]
    fn dispatch_tolerates_unknown_lead_on_stage_change() {
        let engine = engine();
        dispatch_event(
            &engine,
            r#"{"email": "ghost@x.com", "previous_stage": 1, "new_stage": 2}"#,
        )
        .unwrap();
    }
}
