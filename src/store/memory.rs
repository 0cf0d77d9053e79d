use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::model::*;

use super::{BookingStore, StoreError};

/// Bookings of one resource, sorted by `(start, id)`.
#[derive(Debug, Clone, Default)]
pub struct ResourceSchedule {
    bookings: Vec<Booking>,
}

impl ResourceSchedule {
    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    pub fn bookings(&self) -> &[Booking] {
        &self.bookings
    }

    /// Insert maintaining sort order.
    pub fn insert(&mut self, booking: Booking) {
        let key = (booking.start, booking.id);
        let pos = self
            .bookings
            .binary_search_by_key(&key, |b| (b.start, b.id))
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove(&mut self, id: BookingId) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    /// Bookings whose span overlaps the window.
    /// Binary search skips everything starting at or after `window.end`.
    pub fn overlapping(&self, window: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.start < window.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.end() > window.start)
    }

    /// Bookings ending at or after `t`, in start order.
    pub fn ending_from(&self, t: Ms) -> impl Iterator<Item = &Booking> {
        self.bookings.iter().filter(move |b| b.end() >= t)
    }
}

/// Process-local booking store: one sorted schedule per resource plus an
/// id → resource reverse index.
pub struct MemoryStore {
    schedules: DashMap<ResourceRef, ResourceSchedule>,
    booking_to_resource: DashMap<BookingId, ResourceRef>,
    next_id: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            schedules: DashMap::new(),
            booking_to_resource: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Reserve the next booking id.
    pub fn allocate_id(&self) -> BookingId {
        BookingId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// The id `allocate_id` would hand out next.
    pub fn next_id(&self) -> BookingId {
        BookingId(self.next_id.load(Ordering::SeqCst))
    }

    pub fn resource_of(&self, id: BookingId) -> Option<ResourceRef> {
        self.booking_to_resource.get(&id).map(|e| e.value().clone())
    }

    pub fn get(&self, id: BookingId) -> Option<Booking> {
        let resource = self.resource_of(id)?;
        let schedule = self.schedules.get(&resource)?;
        schedule.bookings.iter().find(|b| b.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.booking_to_resource.len()
    }

    pub fn is_empty(&self) -> bool {
        self.booking_to_resource.is_empty()
    }

    /// Apply an event to the in-memory state. The only mutation path, shared by
    /// live writes and WAL replay.
    pub fn apply(&self, event: &Event) {
        match event {
            Event::BookingCreated { booking } => {
                // Replayed ids must never be handed out again.
                self.next_id.fetch_max(booking.id.0 + 1, Ordering::SeqCst);
                self.place(booking.clone());
            }
            Event::BookingReplaced { booking } => {
                if self.unplace(booking.id).is_some() {
                    self.place(booking.clone());
                }
            }
            Event::BookingRemoved { id } => {
                self.unplace(*id);
            }
            Event::IdsReserved { next } => {
                self.next_id.fetch_max(next.0, Ordering::SeqCst);
            }
        }
    }

    fn place(&self, booking: Booking) {
        let id = booking.id;
        let resource = booking.resource.clone();
        self.schedules
            .entry(resource.clone())
            .or_default()
            .insert(booking);
        self.booking_to_resource.insert(id, resource);
    }

    fn unplace(&self, id: BookingId) -> Option<Booking> {
        let (_, resource) = self.booking_to_resource.remove(&id)?;
        let removed = self
            .schedules
            .get_mut(&resource)
            .and_then(|mut schedule| schedule.remove(id));
        self.schedules.remove_if(&resource, |_, s| s.is_empty());
        removed
    }

    /// Every schedule visible through `filter`, merged and sorted by `(start, id)`.
    fn collect_matching<F>(&self, filter: &ResourceRef, mut pick: F) -> Vec<Booking>
    where
        F: FnMut(&ResourceSchedule, &mut Vec<Booking>),
    {
        let mut out = Vec::new();
        match filter {
            ResourceRef::Shared => {
                for entry in self.schedules.iter() {
                    pick(entry.value(), &mut out);
                }
            }
            named => {
                for key in [named, &ResourceRef::Shared] {
                    if let Some(schedule) = self.schedules.get(key) {
                        pick(schedule.value(), &mut out);
                    }
                }
            }
        }
        out.sort_by_key(|b| (b.start, b.id));
        out
    }

    pub fn overlapping(
        &self,
        filter: &ResourceRef,
        window: Span,
        exclude: Option<BookingId>,
    ) -> Vec<Booking> {
        self.collect_matching(filter, |schedule, out| {
            out.extend(
                schedule
                    .overlapping(&window)
                    .filter(|b| Some(b.id) != exclude)
                    .cloned(),
            );
        })
    }

    pub fn ending_from(
        &self,
        filter: &ResourceRef,
        not_ending_before: Ms,
        exclude: Option<BookingId>,
    ) -> Vec<Booking> {
        self.collect_matching(filter, |schedule, out| {
            out.extend(
                schedule
                    .ending_from(not_ending_before)
                    .filter(|b| Some(b.id) != exclude)
                    .cloned(),
            );
        })
    }

    pub fn snapshot(&self) -> Vec<Booking> {
        self.collect_matching(&ResourceRef::Shared, |schedule, out| {
            out.extend(schedule.bookings.iter().cloned());
        })
    }

    pub fn on_resource(&self, resource: &ResourceRef) -> Vec<Booking> {
        self.schedules
            .get(resource)
            .map(|s| s.bookings.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn query_overlapping(
        &self,
        filter: &ResourceRef,
        window: Span,
        exclude: Option<BookingId>,
    ) -> Result<Vec<Booking>, StoreError> {
        Ok(self.overlapping(filter, window, exclude))
    }

    async fn query_from(
        &self,
        filter: &ResourceRef,
        not_ending_before: Ms,
        exclude: Option<BookingId>,
    ) -> Result<Vec<Booking>, StoreError> {
        Ok(self.ending_from(filter, not_ending_before, exclude))
    }

    async fn insert(&self, booking: NewBooking) -> Result<BookingId, StoreError> {
        let id = self.allocate_id();
        self.apply(&Event::BookingCreated {
            booking: booking.into_booking(id),
        });
        Ok(id)
    }

    async fn replace(&self, id: BookingId, booking: NewBooking) -> Result<bool, StoreError> {
        if self.resource_of(id).is_none() {
            return Ok(false);
        }
        self.apply(&Event::BookingReplaced {
            booking: booking.into_booking(id),
        });
        Ok(true)
    }

    async fn remove(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.unplace(id))
    }

    async fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.get(id))
    }

    async fn all_bookings(&self) -> Result<Vec<Booking>, StoreError> {
        Ok(self.snapshot())
    }

    async fn bookings_on(&self, resource: &ResourceRef) -> Result<Vec<Booking>, StoreError> {
        Ok(self.on_resource(resource))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.len())
    }
}
