mod conflict;
mod error;
mod locks;
mod mutations;
mod queries;
mod suggest;

pub use conflict::find_conflict;
pub use error::EngineError;
pub use locks::{CommitGuard, ResourceLocks};
pub use suggest::{IMMEDIACY_BUFFER_MS, baseline, suggest_slots};

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::Config;
use crate::store::BookingStore;

/// The scheduling service: conflict checks, slot suggestions and the
/// create/update/delete orchestration on top of a [`BookingStore`].
pub struct Scheduler {
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
    max_suggestions: usize,
    locks: ResourceLocks,
}

impl Scheduler {
    pub fn new(store: Arc<dyn BookingStore>, clock: Arc<dyn Clock>, max_suggestions: usize) -> Self {
        Self {
            store,
            clock,
            max_suggestions,
            locks: ResourceLocks::new(),
        }
    }

    pub fn from_config(store: Arc<dyn BookingStore>, clock: Arc<dyn Clock>, config: &Config) -> Self {
        Self::new(store, clock, config.max_suggestions)
    }

    pub fn store(&self) -> &Arc<dyn BookingStore> {
        &self.store
    }

    pub fn max_suggestions(&self) -> usize {
        self.max_suggestions
    }
}
