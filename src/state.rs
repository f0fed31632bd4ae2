use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::db::card_store::SqliteCardStore;

/// Shared handle threaded through every route. The store is optional so
/// the process can come up (and report unhealthy) when the database is
/// missing at boot.
#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    started_at_system: SystemTime,
    store: Option<Arc<SqliteCardStore>>,
}

impl AppState {
    pub fn new(store: Option<Arc<SqliteCardStore>>) -> Self {
        Self {
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
            store,
        }
    }

    pub fn store(&self) -> Option<Arc<SqliteCardStore>> {
        self.store.clone()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }
}
