use crate::limits::MAX_VALID_TIMESTAMP_MS;
use crate::model::*;

use super::conflict::{validate_resource, validate_window};
use super::{EngineError, Scheduler};

/// No suggestion starts sooner than this after "now".
pub const IMMEDIACY_BUFFER_MS: Ms = 5 * MINUTE_MS;

/// Earliest instant a suggestion may start.
pub fn baseline(desired_start: Ms, now: Ms) -> Ms {
    desired_start.max(now + IMMEDIACY_BUFFER_MS)
}

/// Greedy gap scan.
///
/// `existing` must be sorted by start. Starting at `baseline`, every gap before
/// the next booking is filled with back-to-back slots of `duration_minutes`;
/// the cursor then jumps to that booking's end. Once the bookings run out the
/// remaining slots follow each other from the last cursor, so the result
/// holds `max` entries unless the slots would run past
/// `MAX_VALID_TIMESTAMP_MS`.
///
/// The cursor never moves backwards, so overlapping input (data that bypassed
/// conflict checks) cannot produce a slot inside an existing booking.
pub fn suggest_slots(
    existing: &[Booking],
    baseline: Ms,
    duration_minutes: u32,
    max: usize,
) -> Vec<Suggestion> {
    let mut out = Vec::with_capacity(max);
    if duration_minutes == 0 || max == 0 {
        return out;
    }
    let step = minutes(duration_minutes);
    let mut cursor = baseline;

    for booking in existing {
        while booking.start - cursor >= step {
            out.push(Suggestion {
                start: cursor,
                duration_minutes,
            });
            if out.len() == max {
                return out;
            }
            cursor += step;
        }
        cursor = cursor.max(booking.end());
    }

    while out.len() < max && cursor + step <= MAX_VALID_TIMESTAMP_MS {
        out.push(Suggestion {
            start: cursor,
            duration_minutes,
        });
        cursor += step;
    }
    out
}

impl Scheduler {
    /// Up to `max_suggestions` conflict-free starts at or after
    /// `max(desired_start, now + 5 min)`, earliest first.
    pub async fn suggest(
        &self,
        resource: &ResourceRef,
        desired_start: Ms,
        duration_minutes: u32,
        exclude: Option<BookingId>,
    ) -> Result<Vec<Suggestion>, EngineError> {
        validate_resource(resource)?;
        validate_window(desired_start, duration_minutes)?;
        let from = baseline(desired_start, self.clock.now());
        let existing = self.store.query_from(resource, from, exclude).await?;
        let suggestions = suggest_slots(&existing, from, duration_minutes, self.max_suggestions);
        metrics::histogram!(crate::observability::SUGGESTIONS_RETURNED)
            .record(suggestions.len() as f64);
        Ok(suggestions)
    }
}
