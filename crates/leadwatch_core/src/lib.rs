//! Core lead lifecycle logic for LeadWatch.
//! This crate is the single source of truth for lead lifecycle invariants.

pub mod clock;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod notify;
pub mod repo;
pub mod scheduler;
pub mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ConfigError};
pub use logging::{default_log_level, init_logging, logging_status, LogTarget};
pub use model::lead::{IngestLead, Lead, LeadValidationError, StageChange, STAGE_ONE};
pub use notify::{
    HttpNotifier, HttpNotifierSettings, NotificationPayload, Notifier, NotifierError,
    UnconfiguredNotifier,
};
pub use repo::lead_repo::{LeadStore, RepoError, RepoResult, SqliteLeadStore, UpsertOutcome};
pub use scheduler::{Scheduler, SchedulerHandle, SweepJob};
pub use service::lifecycle::{
    IngestOutcome, LifecycleEngine, LifecycleError, LifecycleResult, StageChangeOutcome,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
