use crate::registry::ClientRegistry;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self {
            registry,
            start_time: Utc::now(),
        }
    }
}
