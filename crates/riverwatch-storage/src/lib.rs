//! Persistence layer for phases, triggers, trigger history, and source
//! readings.
//!
//! All access goes through [`store::TriggerStore`], a SeaORM-backed
//! store that works against SQLite or PostgreSQL via the connection
//! URL. Counter updates and the phase activation edge are single SQL
//! statements so they stay correct under concurrent trigger
//! completions; revert is the one multi-row transaction.

pub mod entities;
pub mod error;
pub mod store;

#[cfg(test)]
mod tests;

pub use store::{
    PhaseRow, RevertOutcome, SourceReadingRow, TriggerHistoryRow, TriggerRow, TriggerStore,
    TriggerUpdate,
};
