//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate lead store and notifier calls into lifecycle entry points.
//! - Keep inbound transports and schedulers decoupled from storage details.

pub mod lifecycle;
