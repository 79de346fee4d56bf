use crate::engine::ClusterEngine;
use crate::services::ProcessFeed;
use std::sync::Arc;

/// Shared handles behind every HTTP handler. The engine does its own locking.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ClusterEngine>,
    pub feed: Arc<dyn ProcessFeed>,
}

pub fn new_state(engine: Arc<ClusterEngine>, feed: Arc<dyn ProcessFeed>) -> AppState {
    AppState { engine, feed }
}
