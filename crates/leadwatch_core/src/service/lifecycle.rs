//! Lead lifecycle engine.
//!
//! # Responsibility
//! - Ingest leads with restart-on-duplicate semantics.
//! - Track the transition out of stage one.
//! - Run the notification and cleanup sweeps.
//!
//! # Invariants
//! - Validation failures abort before any store call.
//! - A sweep never aborts because of a single lead; per-lead failures are
//!   logged and the lead is left as it was.
//! - A lead is marked notified only after the notifier reported success, and
//!   only for the residency window that was evaluated.

use crate::clock::{Clock, SystemClock};
use crate::model::lead::{IngestLead, Lead, LeadValidationError, StageChange};
use crate::notify::{NotificationPayload, Notifier};
use crate::repo::lead_repo::{LeadStore, RepoError, UpsertOutcome};
use log::{debug, error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Error returned by lifecycle entry points.
#[derive(Debug)]
pub enum LifecycleError {
    /// Malformed inbound payload; nothing was written.
    Validation(LeadValidationError),
    /// Referenced identity does not exist. Non-fatal for callers.
    NotFound(String),
    /// Store unavailable or write failed; the operation had no effect.
    Storage(RepoError),
}

impl LifecycleError {
    /// Error code used in structured log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "storage",
        }
    }
}

impl Display for LifecycleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "invalid lead event: {err}"),
            Self::NotFound(identity) => write!(f, "lead not found: {identity}"),
            Self::Storage(err) => write!(f, "lead store failure: {err}"),
        }
    }
}

impl Error for LifecycleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::NotFound(_) => None,
            Self::Storage(err) => Some(err),
        }
    }
}

impl From<LeadValidationError> for LifecycleError {
    fn from(value: LeadValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for LifecycleError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Storage(other),
        }
    }
}

/// What `ingest_lead` did with the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Created,
    /// Existing lead was reset to a fresh stage-one window.
    Restarted,
}

/// What `handle_stage_change` did with the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageChangeOutcome {
    Moved,
    /// Event does not leave stage one.
    Ignored,
}

/// Lifecycle state machine over a lead store and an outbound notifier.
pub struct LifecycleEngine<S: LeadStore, N: Notifier> {
    store: S,
    notifier: N,
    clock: Box<dyn Clock>,
}

impl<S: LeadStore, N: Notifier> LifecycleEngine<S, N> {
    /// Creates an engine using the wall clock.
    pub fn new(store: S, notifier: N) -> Self {
        Self::with_clock(store, notifier, Box::new(SystemClock))
    }

    pub fn with_clock(store: S, notifier: N, clock: Box<dyn Clock>) -> Self {
        Self {
            store,
            notifier,
            clock,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Ingests a lead, creating it or restarting its lifecycle clock.
    ///
    /// # Contract
    /// - Missing or blank `name`, `email` or `phone` fails with `Validation`
    ///   before the store is touched.
    /// - The resulting record is always stage-one with a fresh `created_at`,
    ///   `notified=false` and `moved_at=None`, whatever its prior state.
    /// - `name` and `phone` are refreshed from the payload.
    pub fn ingest_lead(&self, request: &IngestLead) -> LifecycleResult<IngestOutcome> {
        let fields = request.validate().inspect_err(|err| {
            warn!("event=lead_ingest module=lifecycle status=rejected error_code=validation error={err}");
        })?;

        let now_ms = self.clock.now_ms();
        let lead = Lead::new_stage_one(fields.identity, fields.name, fields.phone, now_ms);
        let outcome = match self.store.upsert(&lead) {
            Ok(UpsertOutcome::Inserted) => IngestOutcome::Created,
            Ok(UpsertOutcome::Updated) => IngestOutcome::Restarted,
            Err(err) => {
                error!(
                    "event=lead_ingest module=lifecycle status=error error_code=storage email={} error={}",
                    lead.identity, err
                );
                return Err(err.into());
            }
        };

        info!(
            "event=lead_ingest module=lifecycle status=ok outcome={} email={}",
            match outcome {
                IngestOutcome::Created => "created",
                IngestOutcome::Restarted => "restarted",
            },
            lead.identity
        );
        Ok(outcome)
    }

    /// Handles a pipeline stage change reported by the CRM.
    ///
    /// # Contract
    /// - Missing `email` or `new_stage` fails with `Validation`.
    /// - Only `previous_stage == 1` is acted on; anything else, including an
    ///   absent `previous_stage`, returns `Ignored`.
    /// - Leaving stage one sets `in_stage_one=false` and re-stamps `moved_at`;
    ///   `notified` is untouched.
    /// - Unknown identity yields `NotFound`.
    pub fn handle_stage_change(&self, event: &StageChange) -> LifecycleResult<StageChangeOutcome> {
        let identity = event.validate().inspect_err(|err| {
            warn!("event=lead_stage_change module=lifecycle status=rejected error_code=validation error={err}");
        })?;

        if !event.leaves_stage_one() {
            debug!(
                "event=lead_stage_change module=lifecycle status=ignored email={} previous_stage={:?} new_stage={:?}",
                identity, event.previous_stage, event.new_stage
            );
            return Ok(StageChangeOutcome::Ignored);
        }

        let now_ms = self.clock.now_ms();
        match self.store.mark_moved(identity, now_ms) {
            Ok(true) => {
                info!(
                    "event=lead_stage_change module=lifecycle status=ok email={} new_stage={:?}",
                    identity, event.new_stage
                );
                Ok(StageChangeOutcome::Moved)
            }
            Ok(false) => {
                warn!(
                    "event=lead_stage_change module=lifecycle status=not_found email={}",
                    identity
                );
                Err(LifecycleError::NotFound(identity.to_string()))
            }
            Err(err) => {
                error!(
                    "event=lead_stage_change module=lifecycle status=error error_code=storage email={} error={}",
                    identity, err
                );
                Err(err.into())
            }
        }
    }

    /// Notifies the CRM about every lead that overstayed stage one.
    ///
    /// Returns the number of leads selected, not the number delivered. A lead
    /// whose notification fails stays eligible for the next sweep.
    pub fn sweep_notify(&self, retention_threshold: Duration) -> LifecycleResult<usize> {
        let started_at = Instant::now();
        let now_ms = self.clock.now_ms();
        let stale = self
            .store
            .find_stale_stage_one(now_ms, retention_threshold)
            .inspect_err(|err| {
                error!("event=sweep_notify module=lifecycle status=error error_code=storage error={err}");
            })?;

        let mut delivered = 0usize;
        let mut failed = 0usize;
        for lead in &stale {
            let payload = NotificationPayload::for_lead(lead, retention_threshold);
            if let Err(err) = self.notifier.notify(&payload) {
                failed += 1;
                warn!(
                    "event=lead_notify module=lifecycle status=error error_code=notifier email={} error={}",
                    lead.identity, err
                );
                continue;
            }

            match self.store.mark_notified(&lead.identity, lead.created_at) {
                Ok(true) => {
                    delivered += 1;
                    info!(
                        "event=lead_notify module=lifecycle status=ok email={}",
                        lead.identity
                    );
                }
                Ok(false) => {
                    // Re-ingested or deleted while the notification was in flight.
                    delivered += 1;
                    warn!(
                        "event=lead_notify module=lifecycle status=stale_window email={}",
                        lead.identity
                    );
                }
                Err(err) => {
                    failed += 1;
                    error!(
                        "event=lead_notify module=lifecycle status=error error_code=storage email={} error={}",
                        lead.identity, err
                    );
                }
            }
        }

        info!(
            "event=sweep_notify module=lifecycle status=ok selected={} delivered={} failed={} duration_ms={}",
            stale.len(),
            delivered,
            failed,
            started_at.elapsed().as_millis()
        );
        Ok(stale.len())
    }

    /// Deletes leads that finished their observable lifecycle.
    ///
    /// A lead is removed when it was notified and its window started at or
    /// before `now - notified_retention`, or when it left stage one at or
    /// before `now - moved_retention`. Returns the number deleted.
    pub fn sweep_cleanup(
        &self,
        notified_retention: Duration,
        moved_retention: Duration,
    ) -> LifecycleResult<usize> {
        let started_at = Instant::now();
        let now_ms = self.clock.now_ms();
        let expired = self
            .store
            .find_expired(now_ms, notified_retention, moved_retention)
            .inspect_err(|err| {
                error!("event=sweep_cleanup module=lifecycle status=error error_code=storage error={err}");
            })?;

        let mut deleted = 0usize;
        for lead in &expired {
            match self.store.delete_if_expired(
                &lead.identity,
                now_ms,
                notified_retention,
                moved_retention,
            ) {
                Ok(true) => {
                    deleted += 1;
                    debug!(
                        "event=lead_delete module=lifecycle status=ok email={}",
                        lead.identity
                    );
                }
                Ok(false) => debug!(
                    "event=lead_delete module=lifecycle status=skipped email={}",
                    lead.identity
                ),
                Err(err) => error!(
                    "event=lead_delete module=lifecycle status=error error_code=storage email={} error={}",
                    lead.identity, err
                ),
            }
        }

        info!(
            "event=sweep_cleanup module=lifecycle status=ok selected={} deleted={} duration_ms={}",
            expired.len(),
            deleted,
            started_at.elapsed().as_millis()
        );
        Ok(deleted)
    }
}
