use thiserror::Error;

use crate::model::BookingId;
use crate::store::StoreError;

/// Failures a scheduler call can report. A conflict is not among them: it is
/// returned as [`crate::model::Proposal::Rejected`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("booking not found: {0}")]
    NotFound(BookingId),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}
