//! Application state for the API server

use crate::{Config, Dispatcher};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request (cheap Arc clone).
#[derive(Clone)]
pub struct AppState {
    /// The dispatcher serving submissions and runs
    pub dispatcher: Arc<Dispatcher>,

    /// Configuration the dispatcher was built from
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(dispatcher: Arc<Dispatcher>, config: Arc<Config>) -> Self {
        Self { dispatcher, config }
    }
}
