use crate::config::ServerConfig;
use chrono::{DateTime, Utc};
use riverwatch_engine::coordinator::PhaseActivationCoordinator;
use riverwatch_engine::engine::TriggerEngine;
use riverwatch_storage::TriggerStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<TriggerStore>,
    pub engine: Arc<TriggerEngine>,
    pub coordinator: Arc<PhaseActivationCoordinator>,
    pub start_time: DateTime<Utc>,
    pub config: Arc<ServerConfig>,
}
