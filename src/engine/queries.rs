use tracing::debug;

use crate::model::*;

use super::{EngineError, Scheduler};

impl Scheduler {
    pub async fn get_booking(&self, id: BookingId) -> Result<Booking, EngineError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    /// Every booking, earliest first.
    pub async fn list_bookings(&self) -> Result<Vec<Booking>, EngineError> {
        let bookings = self.store.all_bookings().await?;
        debug!("listed {} bookings", bookings.len());
        Ok(bookings)
    }

    /// Bookings held by exactly this resource, earliest first. Shared bookings
    /// only appear when `resource` is itself shared.
    pub async fn bookings_for_resource(
        &self,
        resource: &ResourceRef,
    ) -> Result<Vec<Booking>, EngineError> {
        let bookings = self.store.bookings_on(resource).await?;
        debug!("listed {} bookings for {resource}", bookings.len());
        Ok(bookings)
    }
}
