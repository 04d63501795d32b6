use std::sync::Arc;

use crate::db::Database;
use crate::dispatch::Dispatcher;

/// Gateway application state (shared)
#[derive(Clone)]
pub struct AppState {
    /// Event router over engine + registry
    pub dispatcher: Arc<Dispatcher>,
    /// PostgreSQL pool, None in mem-store demo mode
    pub db: Option<Arc<Database>>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, db: Option<Arc<Database>>) -> Self {
        Self { dispatcher, db }
    }
}
