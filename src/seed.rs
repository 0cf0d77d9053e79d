use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::engine::{EngineError, Scheduler};
use crate::model::*;
use crate::observability::SEED_RECORDS_TOTAL;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("cannot read seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed seed file: {0}")]
    Json(#[from] serde_json::Error),
}

/// One appointment in a seed file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedRecord {
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub healthcare_professional_name: Option<String>,
    pub appointment_date: DateTime<Utc>,
    pub duration: u32,
    #[serde(default)]
    pub description: Option<String>,
}

impl SeedRecord {
    /// Missing or empty professional names book against the shared resource.
    pub fn into_candidate(self) -> NewBooking {
        let resource = self
            .healthcare_professional_name
            .as_deref()
            .and_then(ResourceRef::parse)
            .unwrap_or(ResourceRef::Shared);
        NewBooking::new(resource, self.appointment_date.timestamp_millis(), self.duration)
            .with_payload(Payload {
                patient_name: self.patient_name,
                description: self.description,
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub accepted: usize,
    pub rejected: usize,
    pub invalid: usize,
}

pub fn parse_seed(json: &str) -> Result<Vec<SeedRecord>, SeedError> {
    Ok(serde_json::from_str(json)?)
}

pub fn load_seed_file(path: &Path) -> Result<Vec<SeedRecord>, SeedError> {
    let json = std::fs::read_to_string(path)?;
    parse_seed(&json)
}

/// Book every record through the scheduler, in file order.
///
/// Returns `None` without touching the store if it already holds bookings.
/// Conflicting or invalid records are counted and skipped; only store
/// failures abort the import.
pub async fn import(
    scheduler: &Scheduler,
    records: Vec<SeedRecord>,
) -> Result<Option<SeedReport>, EngineError> {
    let existing = scheduler.store().count().await?;
    if existing > 0 {
        info!("store holds {existing} bookings, skipping seed import");
        return Ok(None);
    }

    let mut report = SeedReport::default();
    for (i, record) in records.into_iter().enumerate() {
        let outcome = match scheduler.propose_create(record.into_candidate()).await {
            Ok(Proposal::Accepted(id)) => {
                debug!("seed record {i} booked as {id}");
                report.accepted += 1;
                "accepted"
            }
            Ok(Proposal::Rejected(_)) => {
                warn!("seed record {i} overlaps an earlier booking, skipped");
                report.rejected += 1;
                "rejected"
            }
            Err(EngineError::InvalidInput(reason)) => {
                warn!("seed record {i} invalid: {reason}");
                report.invalid += 1;
                "invalid"
            }
            Err(e) => return Err(e),
        };
        metrics::counter!(SEED_RECORDS_TOTAL, "outcome" => outcome).increment(1);
    }

    info!(
        "seed import: {} accepted, {} rejected, {} invalid",
        report.accepted, report.rejected, report.invalid
    );
    Ok(Some(report))
}
