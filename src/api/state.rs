//! Application state shared across handlers.

use std::sync::Arc;

use crate::session::SessionService;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session service managing the lifecycle of every session.
    pub sessions: Arc<SessionService>,
}

impl AppState {
    pub fn new(sessions: Arc<SessionService>) -> Self {
        Self { sessions }
    }
}
