//! Lead domain model.
//!
//! # Responsibility
//! - Define the lead record and its stage-one lifecycle transitions.
//! - Validate inbound ingestion and stage-change payloads.
//!
//! # Invariants
//! - `identity` is non-empty and trimmed.
//! - `moved_at` is set if and only if `in_stage_one` is false.
//! - A restart always yields a fresh stage-one record: `notified=false`,
//!   `in_stage_one=true`, `moved_at=None`.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Pipeline stage number whose residency is monitored.
pub const STAGE_ONE: i64 = 1;

/// Contact email used as the unique business key of a lead.
pub type LeadIdentity = String;

/// Validation error for lead records and inbound payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadValidationError {
    /// A required field was absent or blank.
    MissingField(&'static str),
    /// `moved_at` and `in_stage_one` disagree.
    StageStateMismatch {
        in_stage_one: bool,
        moved_at: Option<i64>,
    },
}

impl Display for LeadValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "missing required field `{field}`"),
            Self::StageStateMismatch {
                in_stage_one,
                moved_at,
            } => write!(
                f,
                "inconsistent stage state: in_stage_one={in_stage_one} moved_at={moved_at:?}"
            ),
        }
    }
}

impl Error for LeadValidationError {}

/// Canonical lead record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    /// Storage row id. `None` until the record has been persisted.
    pub id: Option<i64>,
    /// Serialized as `email` to match the CRM schema.
    #[serde(rename = "email")]
    pub identity: LeadIdentity,
    pub name: String,
    pub phone: String,
    /// Unix epoch milliseconds. Start of the current residency window.
    pub created_at: i64,
    /// True once the stale notification for this window was delivered.
    pub notified: bool,
    pub in_stage_one: bool,
    /// Unix epoch milliseconds. Set when the lead leaves stage one.
    pub moved_at: Option<i64>,
}

impl Lead {
    /// Creates a fresh stage-one lead whose residency window starts at `now_ms`.
    pub fn new_stage_one(
        identity: impl Into<String>,
        name: impl Into<String>,
        phone: impl Into<String>,
        now_ms: i64,
    ) -> Self {
        Self {
            id: None,
            identity: identity.into().trim().to_string(),
            name: name.into(),
            phone: phone.into(),
            created_at: now_ms,
            notified: false,
            in_stage_one: true,
            moved_at: None,
        }
    }

    /// Restarts the lifecycle clock. Prior residency history is discarded.
    pub fn restart(&mut self, now_ms: i64) {
        self.created_at = now_ms;
        self.notified = false;
        self.in_stage_one = true;
        self.moved_at = None;
    }

    /// Records that the lead left stage one at `now_ms`.
    ///
    /// `notified` is left untouched. Calling this on an already moved lead
    /// re-stamps `moved_at`.
    pub fn mark_moved(&mut self, now_ms: i64) {
        self.in_stage_one = false;
        self.moved_at = Some(now_ms);
    }

    pub fn mark_notified(&mut self) {
        self.notified = true;
    }

    /// Validates record-level invariants.
    pub fn validate(&self) -> Result<(), LeadValidationError> {
        if self.identity.trim().is_empty() {
            return Err(LeadValidationError::MissingField("email"));
        }
        if self.in_stage_one == self.moved_at.is_some() {
            return Err(LeadValidationError::StageStateMismatch {
                in_stage_one: self.in_stage_one,
                moved_at: self.moved_at,
            });
        }
        Ok(())
    }
}

/// Inbound ingestion payload (new lead entering stage one).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IngestLead {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "email")]
    pub identity: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Validated ingestion fields with a trimmed identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidIngest<'a> {
    pub name: &'a str,
    pub identity: &'a str,
    pub phone: &'a str,
}

impl IngestLead {
    pub fn new(
        name: impl Into<String>,
        identity: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        Self {
            name: Some(name.into()),
            identity: Some(identity.into()),
            phone: Some(phone.into()),
        }
    }

    /// Checks that every field is present and non-blank.
    pub fn validate(&self) -> Result<ValidIngest<'_>, LeadValidationError> {
        let name = required(self.name.as_deref(), "name")?;
        let identity = required(self.identity.as_deref(), "email")?;
        let phone = required(self.phone.as_deref(), "phone")?;
        Ok(ValidIngest {
            name,
            identity: identity.trim(),
            phone,
        })
    }
}

/// Inbound pipeline stage-change payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StageChange {
    #[serde(default, rename = "email")]
    pub identity: Option<String>,
    #[serde(default)]
    pub previous_stage: Option<i64>,
    #[serde(default)]
    pub new_stage: Option<i64>,
}

impl StageChange {
    pub fn new(identity: impl Into<String>, previous_stage: Option<i64>, new_stage: i64) -> Self {
        Self {
            identity: Some(identity.into()),
            previous_stage,
            new_stage: Some(new_stage),
        }
    }

    /// Checks `identity` and `new_stage`; returns the trimmed identity.
    ///
    /// A missing `previous_stage` is not an error.
    pub fn validate(&self) -> Result<&str, LeadValidationError> {
        let identity = required(self.identity.as_deref(), "email")?;
        if self.new_stage.is_none() {
            return Err(LeadValidationError::MissingField("new_stage"));
        }
        Ok(identity.trim())
    }

    /// Returns whether this event moves a lead out of stage one.
    pub fn leaves_stage_one(&self) -> bool {
        self.previous_stage == Some(STAGE_ONE)
    }
}

fn required<'a>(
    value: Option<&'a str>,
    field: &'static str,
) -> Result<&'a str, LeadValidationError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(LeadValidationError::MissingField(field)),
    }
}
