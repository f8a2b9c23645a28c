//! Outbound notification capability.
//!
//! # Responsibility
//! - Define the notifier contract used by the notification sweep.
//! - Deliver stale-lead notifications to the CRM webhook over HTTP.
//!
//! # Invariants
//! - A notifier call is a single blocking attempt; retries belong to the next
//!   sweep cycle.
//! - Only a `200 OK` response counts as delivered.

use crate::model::lead::Lead;
use log::warn;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Outbound notification failure.
#[derive(Debug)]
pub enum NotifierError {
    /// Notifier is not configured (e.g. missing webhook URL).
    NotConfigured(&'static str),
    /// Request could not be built or sent.
    Transport(String),
    /// Remote endpoint answered with a non-success status.
    Rejected { status: u16, body: String },
}

impl Display for NotifierError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConfigured(what) => write!(f, "notifier not configured: {what}"),
            Self::Transport(message) => write!(f, "notification transport failed: {message}"),
            Self::Rejected { status, body } => {
                write!(f, "notification rejected with status {status}: {body}")
            }
        }
    }
}

impl Error for NotifierError {}

/// JSON body sent to the CRM for a lead that overstayed stage one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    pub email: String,
    pub name: String,
    pub phone: String,
    /// Configured threshold expressed in whole days.
    pub retention_days: u64,
}

impl NotificationPayload {
    pub fn for_lead(lead: &Lead, retention_threshold: Duration) -> Self {
        Self {
            email: lead.identity.clone(),
            name: lead.name.clone(),
            phone: lead.phone.clone(),
            retention_days: retention_threshold.as_secs() / SECONDS_PER_DAY,
        }
    }
}

/// Delivers a notification for one lead.
pub trait Notifier: Send + Sync {
    fn notify(&self, payload: &NotificationPayload) -> Result<(), NotifierError>;
}

impl<N: Notifier + ?Sized> Notifier for std::sync::Arc<N> {
    fn notify(&self, payload: &NotificationPayload) -> Result<(), NotifierError> {
        (**self).notify(payload)
    }
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn notify(&self, payload: &NotificationPayload) -> Result<(), NotifierError> {
        (**self).notify(payload)
    }
}

/// Notifier used when no CRM webhook is configured; every call fails, so
/// sweeps leave leads pending.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredNotifier;

impl Notifier for UnconfiguredNotifier {
    fn notify(&self, _payload: &NotificationPayload) -> Result<(), NotifierError> {
        Err(NotifierError::NotConfigured("crm webhook_url"))
    }
}

/// Settings for `HttpNotifier`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpNotifierSettings {
    pub webhook_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// Posts notification payloads as JSON to the CRM webhook.
pub struct HttpNotifier {
    client: Client,
    settings: HttpNotifierSettings,
}

impl HttpNotifier {
    pub fn new(settings: HttpNotifierSettings) -> Result<Self, NotifierError> {
        if settings.webhook_url.trim().is_empty() {
            return Err(NotifierError::NotConfigured("crm webhook_url"));
        }
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|err| NotifierError::Transport(err.to_string()))?;
        Ok(Self { client, settings })
    }
}

impl Notifier for HttpNotifier {
    fn notify(&self, payload: &NotificationPayload) -> Result<(), NotifierError> {
        let mut request = self.client.post(&self.settings.webhook_url).json(payload);
        if let Some(api_key) = self.settings.api_key.as_deref() {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .map_err(|err| NotifierError::Transport(err.to_string()))?;
        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }

        let body = match response.text() {
            Ok(body) => truncate(&body, MAX_ERROR_BODY_CHARS),
            Err(err) => {
                warn!("event=notify_body_read module=notify status=error error={err}");
                String::new()
            }
        };
        Err(NotifierError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    let normalized = value.replace(['\n', '\r'], " ");
    let mut truncated = normalized.chars().take(max_chars).collect::<String>();
    if normalized.chars().count() > max_chars {
        truncated.push_str("...");
    }
    truncated
}
