//! Lead domain model and inbound event payloads.
//!
//! # Responsibility
//! - Define the canonical lead record used by the store and lifecycle engine.
//! - Define the inbound CRM payloads and their validation.
//!
//! # Invariants
//! - Every lead is identified by its contact email (`identity`).
//! - Deletion is a hard delete; there are no tombstones.

pub mod lead;
