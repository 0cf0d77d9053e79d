use crate::limits::*;
use crate::model::*;

use super::{EngineError, Scheduler};

pub(crate) fn validate_resource(resource: &ResourceRef) -> Result<(), EngineError> {
    if let ResourceRef::Named(name) = resource {
        if name.is_empty() {
            return Err(EngineError::InvalidInput("resource name is empty"));
        }
        if name.len() > MAX_RESOURCE_NAME_LEN {
            return Err(EngineError::InvalidInput("resource name too long"));
        }
        if name == SHARED_RESOURCE_NAME {
            return Err(EngineError::InvalidInput("\"All\" names the shared resource"));
        }
    }
    Ok(())
}

pub(crate) fn validate_duration(duration_minutes: u32) -> Result<(), EngineError> {
    if duration_minutes == 0 {
        return Err(EngineError::InvalidInput("duration must be positive"));
    }
    if duration_minutes > MAX_DURATION_MINUTES {
        return Err(EngineError::InvalidInput("duration too long"));
    }
    Ok(())
}

pub(crate) fn validate_window(start: Ms, duration_minutes: u32) -> Result<(), EngineError> {
    validate_duration(duration_minutes)?;
    if start < MIN_VALID_TIMESTAMP_MS || start + minutes(duration_minutes) > MAX_VALID_TIMESTAMP_MS
    {
        return Err(EngineError::InvalidInput("timestamp out of range"));
    }
    Ok(())
}

fn validate_text(value: Option<&str>) -> Result<(), EngineError> {
    match value {
        Some(s) if s.len() > MAX_PAYLOAD_LEN => Err(EngineError::InvalidInput("payload too long")),
        _ => Ok(()),
    }
}

pub(crate) fn validate_candidate(candidate: &NewBooking) -> Result<(), EngineError> {
    validate_resource(&candidate.resource)?;
    validate_window(candidate.start, candidate.duration_minutes)?;
    validate_text(candidate.payload.patient_name.as_deref())?;
    validate_text(candidate.payload.description.as_deref())
}

/// Checks the fields a patch actually sets; the merged result is validated again.
pub(crate) fn validate_patch(patch: &BookingPatch) -> Result<(), EngineError> {
    if let Some(resource) = &patch.resource {
        validate_resource(resource)?;
    }
    if let Some(duration) = patch.duration_minutes {
        validate_duration(duration)?;
    }
    if let Some(start) = patch.start
        && !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&start)
    {
        return Err(EngineError::InvalidInput("timestamp out of range"));
    }
    validate_text(patch.patient_name.as_deref())?;
    validate_text(patch.description.as_deref())
}

/// First booking that blocks `span` on `resource`.
///
/// A booking blocks when the resources match (same name, or either side
/// shared), the half-open spans overlap, and it is not the excluded booking.
pub fn find_conflict<'a>(
    existing: &'a [Booking],
    resource: &ResourceRef,
    span: &Span,
    exclude: Option<BookingId>,
) -> Option<&'a Booking> {
    existing.iter().find(|b| {
        Some(b.id) != exclude && resource.matches(&b.resource) && b.span().overlaps(span)
    })
}

impl Scheduler {
    pub(super) async fn first_conflict(
        &self,
        resource: &ResourceRef,
        span: Span,
        exclude: Option<BookingId>,
    ) -> Result<Option<Booking>, EngineError> {
        let candidates = self.store.query_overlapping(resource, span, exclude).await?;
        Ok(find_conflict(&candidates, resource, &span, exclude).cloned())
    }

    /// Does `[start, start + duration)` overlap any booking visible to `resource`?
    /// `exclude` skips the booking being updated.
    pub async fn has_conflict(
        &self,
        resource: &ResourceRef,
        start: Ms,
        duration_minutes: u32,
        exclude: Option<BookingId>,
    ) -> Result<bool, EngineError> {
        validate_resource(resource)?;
        validate_window(start, duration_minutes)?;
        let span = Span::new(start, start + minutes(duration_minutes));
        Ok(self.first_conflict(resource, span, exclude).await?.is_some())
    }
}
