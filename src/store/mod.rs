mod memory;
mod wal_store;

pub use memory::{MemoryStore, ResourceSchedule};
pub use wal_store::WalStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("WAL error: {0}")]
    Wal(String),
    /// Backend could not be reached or timed out. Reserved for remote stores.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence collaborator for the scheduler.
///
/// Every `filter` argument uses the tri-state rule of [`ResourceRef::matches`]:
/// a named filter sees its own bookings plus shared ones, and a shared filter
/// sees everything. Each call is atomic on its own; serialising
/// check-then-commit sequences is the scheduler's job.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Bookings matching `filter` whose span overlaps `window`.
    async fn query_overlapping(
        &self,
        filter: &ResourceRef,
        window: Span,
        exclude: Option<BookingId>,
    ) -> Result<Vec<Booking>, StoreError>;

    /// Bookings matching `filter` that end at or after `not_ending_before`,
    /// ascending by `(start, id)`.
    async fn query_from(
        &self,
        filter: &ResourceRef,
        not_ending_before: Ms,
        exclude: Option<BookingId>,
    ) -> Result<Vec<Booking>, StoreError>;

    async fn insert(&self, booking: NewBooking) -> Result<BookingId, StoreError>;

    /// Replace every field of an existing booking. `false` if the id is unknown.
    async fn replace(&self, id: BookingId, booking: NewBooking) -> Result<bool, StoreError>;

    async fn remove(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    async fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    /// All bookings, ascending by `(start, id)`.
    async fn all_bookings(&self) -> Result<Vec<Booking>, StoreError>;

    /// Bookings held against exactly `resource` (no wildcard expansion), ascending by start.
    async fn bookings_on(&self, resource: &ResourceRef) -> Result<Vec<Booking>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}
