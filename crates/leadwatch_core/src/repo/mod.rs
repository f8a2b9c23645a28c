//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the narrow lead store contract consumed by the lifecycle engine.
//! - Isolate SQLite query details from lifecycle orchestration.
//!
//! # Invariants
//! - Write paths must call `Lead::validate()` before SQL mutations.
//! - Each mutating call is atomic for the single record (or batch) it touches.

pub mod lead_repo;
