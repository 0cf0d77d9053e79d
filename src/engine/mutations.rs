use tracing::{debug, error, info, warn};

use crate::model::*;
use crate::observability::{PROPOSALS_TOTAL, error_label, outcome_label};

use super::conflict::{validate_candidate, validate_patch};
use super::{EngineError, Scheduler};

fn record(kind: &'static str, outcome: &'static str) {
    metrics::counter!(PROPOSALS_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
}

pub(super) fn delete_outcome(result: &Result<Booking, EngineError>) -> &'static str {
    result.as_ref().map_or_else(error_label, |_| "accepted")
}

fn log_store_failure(op: &'static str) -> impl Fn(&EngineError) {
    move |e: &EngineError| {
        if let EngineError::Store(inner) = e {
            error!("{op} failed: {inner}");
        }
    }
}

impl Scheduler {
    /// Book `candidate` if its window is free, otherwise return suggestions.
    pub async fn propose_create(&self, candidate: NewBooking) -> Result<Proposal, EngineError> {
        let result = self
            .create_inner(candidate)
            .await
            .inspect_err(log_store_failure("create"));
        record("create", outcome_label(&result));
        result
    }

    async fn create_inner(&self, candidate: NewBooking) -> Result<Proposal, EngineError> {
        validate_candidate(&candidate)?;
        let _guard = self.locks.acquire(&[&candidate.resource]).await;

        if let Some(existing) = self
            .first_conflict(&candidate.resource, candidate.span(), None)
            .await?
        {
            let suggestions = self
                .suggest(&candidate.resource, candidate.start, candidate.duration_minutes, None)
                .await?;
            debug!(
                "create on {} at {} conflicts with booking {}; {} suggestions",
                candidate.resource,
                candidate.start,
                existing.id,
                suggestions.len()
            );
            return Ok(Proposal::Rejected(suggestions));
        }

        let resource = candidate.resource.clone();
        let id = self.store.insert(candidate).await?;
        info!("booking {id} created on {resource}");
        Ok(Proposal::Accepted(id))
    }

    /// Apply `patch` to booking `id` if the merged window is free.
    ///
    /// Unset patch fields keep the booking's current values before the
    /// conflict check, and the booking never conflicts with itself.
    pub async fn propose_update(
        &self,
        id: BookingId,
        patch: BookingPatch,
    ) -> Result<Proposal, EngineError> {
        let result = self
            .update_inner(id, patch)
            .await
            .inspect_err(log_store_failure("update"));
        record("update", outcome_label(&result));
        result
    }

    async fn update_inner(&self, id: BookingId, patch: BookingPatch) -> Result<Proposal, EngineError> {
        validate_patch(&patch)?;

        // Lock both the current and target resource, then re-read: the booking
        // may have moved or vanished while we waited.
        let (current, _guard) = loop {
            let seen = self.find_for_write(id).await?;
            let target = patch.clone().merge_into(&seen).resource;
            let guard = self.locks.acquire(&[&seen.resource, &target]).await;
            let current = self.find_for_write(id).await?;
            if current.resource == seen.resource {
                break (current, guard);
            }
        };

        let merged = patch.merge_into(&current);
        validate_candidate(&merged)?;

        if let Some(existing) = self
            .first_conflict(&merged.resource, merged.span(), Some(id))
            .await?
        {
            let suggestions = self
                .suggest(&merged.resource, merged.start, merged.duration_minutes, Some(id))
                .await?;
            debug!(
                "update of booking {id} conflicts with booking {}; {} suggestions",
                existing.id,
                suggestions.len()
            );
            return Ok(Proposal::Rejected(suggestions));
        }

        if !self.store.replace(id, merged).await? {
            warn!("booking {id} disappeared before update");
            return Err(EngineError::NotFound(id));
        }
        info!("booking {id} updated");
        Ok(Proposal::Accepted(id))
    }

    /// Remove booking `id`, returning what was removed.
    pub async fn delete(&self, id: BookingId) -> Result<Booking, EngineError> {
        let result = self
            .delete_inner(id)
            .await
            .inspect_err(log_store_failure("delete"));
        record("delete", delete_outcome(&result));
        result
    }

    async fn delete_inner(&self, id: BookingId) -> Result<Booking, EngineError> {
        let existing = self.find_for_write(id).await?;
        let _guard = self.locks.acquire(&[&existing.resource]).await;
        match self.store.remove(id).await? {
            Some(booking) => {
                info!("booking {id} deleted from {}", booking.resource);
                Ok(booking)
            }
            None => {
                warn!("no booking {id} found for deletion");
                Err(EngineError::NotFound(id))
            }
        }
    }

    async fn find_for_write(&self, id: BookingId) -> Result<Booking, EngineError> {
        match self.store.find_by_id(id).await? {
            Some(booking) => Ok(booking),
            None => {
                warn!("no booking {id} found");
                Err(EngineError::NotFound(id))
            }
        }
    }
}
