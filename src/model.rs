use std::fmt;

use serde::{Deserialize, Serialize};

/// Unix milliseconds (UTC). The only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Wire/config spelling of the shared resource.
pub const SHARED_RESOURCE_NAME: &str = "All";

pub fn minutes(n: u32) -> Ms {
    Ms::from(n) * MINUTE_MS
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap: back-to-back spans are disjoint.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// The resource a booking is held against.
///
/// `Shared` is a global lock: a shared booking blocks every named resource and
/// every named booking blocks a shared candidate. Two different `Named`
/// resources never interact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceRef {
    Named(String),
    Shared,
}

impl ResourceRef {
    /// Parse the external spelling. `"All"` is the shared resource; empty names are rejected.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "" => None,
            SHARED_RESOURCE_NAME => Some(ResourceRef::Shared),
            other => Some(ResourceRef::Named(other.to_string())),
        }
    }

    /// Wraps `name` as is. The engine rejects `Named("All")`; use
    /// [`ResourceRef::parse`] for names that may spell the shared resource.
    pub fn named(name: impl Into<String>) -> Self {
        ResourceRef::Named(name.into())
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, ResourceRef::Shared)
    }

    /// Tri-state match: same name, or either side is shared.
    pub fn matches(&self, other: &ResourceRef) -> bool {
        match (self, other) {
            (ResourceRef::Shared, _) | (_, ResourceRef::Shared) => true,
            (ResourceRef::Named(a), ResourceRef::Named(b)) => a == b,
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRef::Named(name) => f.write_str(name),
            ResourceRef::Shared => f.write_str(SHARED_RESOURCE_NAME),
        }
    }
}

/// Store-assigned booking id. Ids start at 1 and are never reused by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookingId(pub u64);

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque booking payload, carried but never inspected by the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub patient_name: Option<String>,
    pub description: Option<String>,
}

/// A candidate booking that has not been persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    pub resource: ResourceRef,
    pub start: Ms,
    pub duration_minutes: u32,
    pub payload: Payload,
}

impl NewBooking {
    pub fn new(resource: ResourceRef, start: Ms, duration_minutes: u32) -> Self {
        Self {
            resource,
            start,
            duration_minutes,
            payload: Payload::default(),
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.start + minutes(self.duration_minutes))
    }

    pub fn into_booking(self, id: BookingId) -> Booking {
        Booking {
            id,
            resource: self.resource,
            start: self.start,
            duration_minutes: self.duration_minutes,
            payload: self.payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub resource: ResourceRef,
    pub start: Ms,
    pub duration_minutes: u32,
    pub payload: Payload,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end())
    }

    pub fn end(&self) -> Ms {
        self.start + minutes(self.duration_minutes)
    }
}

/// Partial update. `None` keeps the current value; `Some(ResourceRef::Shared)`
/// also keeps the current resource, since "All" is not a settable target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingPatch {
    pub resource: Option<ResourceRef>,
    pub start: Option<Ms>,
    pub duration_minutes: Option<u32>,
    pub patient_name: Option<String>,
    pub description: Option<String>,
}

impl BookingPatch {
    /// Resolve unset fields against the current booking.
    pub fn merge_into(self, current: &Booking) -> NewBooking {
        let resource = match self.resource {
            Some(ResourceRef::Named(name)) => ResourceRef::Named(name),
            Some(ResourceRef::Shared) | None => current.resource.clone(),
        };
        NewBooking {
            resource,
            start: self.start.unwrap_or(current.start),
            duration_minutes: self.duration_minutes.unwrap_or(current.duration_minutes),
            payload: Payload {
                patient_name: non_empty(self.patient_name)
                    .or_else(|| current.payload.patient_name.clone()),
                description: non_empty(self.description)
                    .or_else(|| current.payload.description.clone()),
            },
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// An alternative start time offered for a rejected proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub start: Ms,
    pub duration_minutes: u32,
}

impl Suggestion {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.start + minutes(self.duration_minutes))
    }
}

/// Outcome of a create or update proposal. A conflict is an expected result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proposal {
    Accepted(BookingId),
    Rejected(Vec<Suggestion>),
}

impl Proposal {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Proposal::Accepted(_))
    }

    pub fn suggestions(&self) -> &[Suggestion] {
        match self {
            Proposal::Accepted(_) => &[],
            Proposal::Rejected(s) => s,
        }
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated { booking: Booking },
    BookingReplaced { booking: Booking },
    BookingRemoved { id: BookingId },
    /// Ids below `next` are spent, live or not. Heads every compacted log.
    IdsReserved { next: BookingId },
}

impl Event {
    /// Metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::BookingCreated { .. } => "created",
            Event::BookingReplaced { .. } => "replaced",
            Event::BookingRemoved { .. } => "removed",
            Event::IdsReserved { .. } => "ids_reserved",
        }
    }
}
