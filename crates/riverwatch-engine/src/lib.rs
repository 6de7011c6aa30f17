//! Trigger & phase activation engine for anticipatory flood action.
//!
//! External forecast readings feed per-data-source threshold evaluators
//! ([`DataSourceAdapter`] implementations). When a trigger's criterion
//! is met its phase counter is incremented atomically, and once every
//! configured requirement is satisfied the phase activates exactly once.
//! Activated phases can be administratively reverted, archiving the
//! trigger state as a versioned history snapshot.
//!
//! Checks are delivered at-least-once by the recurring job queue, so
//! every handler is idempotent: the per-trigger lock plus the
//! "already triggered, skip" guard make overlapping ticks and racing
//! manual activations safe.

pub mod adapters;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod events;
pub mod locks;
pub mod scheduler;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use riverwatch_common::types::{DataSource, TriggerStatement};
use riverwatch_storage::TriggerRow;

use crate::error::EngineError;

/// Per-data-source threshold evaluator, invoked on every scheduler tick
/// for a trigger of that source.
///
/// Implementations are pure with respect to engine state: they read the
/// latest ingested measurement and decide whether the trigger's
/// statement is satisfied. The dispatcher owns the idempotency guard,
/// the counter updates, and the triggered-flag transition.
#[async_trait]
pub trait DataSourceAdapter: Send + Sync {
    /// The data source this adapter evaluates.
    fn data_source(&self) -> DataSource;

    /// Evaluates the trigger's statement against the most recent
    /// reading for `river_basin`. A missing reading is not an error:
    /// the adapter returns `Ok(false)` and the next tick re-evaluates.
    async fn criteria_check(
        &self,
        trigger: &TriggerRow,
        statement: &TriggerStatement,
        river_basin: &str,
    ) -> Result<bool, EngineError>;
}

/// Static lookup table of adapters keyed by data source.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<DataSource, Arc<dyn DataSourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn DataSourceAdapter>) {
        self.adapters.insert(adapter.data_source(), adapter);
    }

    pub fn get(&self, data_source: DataSource) -> Option<&Arc<dyn DataSourceAdapter>> {
        self.adapters.get(&data_source)
    }

    pub fn registered_sources(&self) -> Vec<DataSource> {
        self.adapters.keys().copied().collect()
    }
}
