use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::info;

use crate::model::*;
use crate::wal::BookingLog;

use super::{BookingStore, MemoryStore, StoreError};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        next_id: BookingId,
        bookings: Vec<Booking>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: BookingLog, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut BookingLog, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut BookingLog, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact {
            next_id,
            bookings,
            response,
        } => {
            let _ = response.send(wal.rewrite(next_id, bookings));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Durable booking store: a [`MemoryStore`] fronted by a write-ahead log.
/// Every mutation is fsynced to the log before it becomes visible.
pub struct WalStore {
    index: MemoryStore,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold this shared; compaction holds it exclusively so the
    /// snapshot it writes cannot miss a concurrent append.
    compaction: RwLock<()>,
}

impl WalStore {
    /// Replay the log at `path` and start the writer task. Must run inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (wal, events) = BookingLog::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let index = MemoryStore::new();
        for event in &events {
            index.apply(event);
        }
        info!(
            "replayed {} WAL events, {} live bookings",
            events.len(),
            index.len()
        );

        Ok(Self {
            index,
            wal_tx,
            compaction: RwLock::new(()),
        })
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// WAL-append then apply.
    async fn persist_and_apply(&self, event: Event) -> Result<(), StoreError> {
        self.wal_append(&event).await?;
        self.index.apply(&event);
        Ok(())
    }

    /// Rewrite the log as the id high-water mark plus one `BookingCreated`
    /// per live booking.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _exclusive = self.compaction.write().await;
        let next_id = self.index.next_id();
        let bookings = self.index.snapshot();
        let live = bookings.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                next_id,
                bookings,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))?;
        info!("compacted WAL to {live} bookings, next id {}", next_id.0);
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Compact when at least `threshold` appends happened since the last compaction.
    pub async fn compact_if_needed(&self, threshold: u64) -> Result<bool, StoreError> {
        if self.appends_since_compact().await < threshold {
            return Ok(false);
        }
        self.compact().await?;
        Ok(true)
    }
}

#[async_trait]
impl BookingStore for WalStore {
    async fn query_overlapping(
        &self,
        filter: &ResourceRef,
        window: Span,
        exclude: Option<BookingId>,
    ) -> Result<Vec<Booking>, StoreError> {
        Ok(self.index.overlapping(filter, window, exclude))
    }

    async fn query_from(
        &self,
        filter: &ResourceRef,
        not_ending_before: Ms,
        exclude: Option<BookingId>,
    ) -> Result<Vec<Booking>, StoreError> {
        Ok(self.index.ending_from(filter, not_ending_before, exclude))
    }

    async fn insert(&self, booking: NewBooking) -> Result<BookingId, StoreError> {
        let _shared = self.compaction.read().await;
        let id = self.index.allocate_id();
        self.persist_and_apply(Event::BookingCreated {
            booking: booking.into_booking(id),
        })
        .await?;
        Ok(id)
    }

    async fn replace(&self, id: BookingId, booking: NewBooking) -> Result<bool, StoreError> {
        let _shared = self.compaction.read().await;
        if self.index.resource_of(id).is_none() {
            return Ok(false);
        }
        self.persist_and_apply(Event::BookingReplaced {
            booking: booking.into_booking(id),
        })
        .await?;
        Ok(true)
    }

    async fn remove(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        let _shared = self.compaction.read().await;
        let Some(existing) = self.index.get(id) else {
            return Ok(None);
        };
        self.persist_and_apply(Event::BookingRemoved { id }).await?;
        Ok(Some(existing))
    }

    async fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.index.get(id))
    }

    async fn all_bookings(&self) -> Result<Vec<Booking>, StoreError> {
        Ok(self.index.snapshot())
    }

    async fn bookings_on(&self, resource: &ResourceRef) -> Result<Vec<Booking>, StoreError> {
        Ok(self.index.on_resource(resource))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.index.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const M: Ms = MINUTE_MS;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("medsched_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn mutations_survive_reopen() {
        let path = test_wal_path("reopen.wal");
        let a = ResourceRef::named("dr-a");
        let (kept, moved) = {
            let store = WalStore::open(&path).unwrap();
            let kept = store.insert(NewBooking::new(a.clone(), 0, 30)).await.unwrap();
            let gone = store.insert(NewBooking::new(a.clone(), 60 * M, 30)).await.unwrap();
            let moved = store.insert(NewBooking::new(a.clone(), 120 * M, 30)).await.unwrap();
            store
                .replace(moved, NewBooking::new(ResourceRef::named("dr-b"), 200 * M, 15))
                .await
                .unwrap();
            store.remove(gone).await.unwrap();
            (kept, moved)
        };

        let store = WalStore::open(&path).unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.find_by_id(kept).await.unwrap().unwrap().start, 0);
        let moved = store.find_by_id(moved).await.unwrap().unwrap();
        assert_eq!(moved.resource, ResourceRef::named("dr-b"));
        assert_eq!(moved.duration_minutes, 15);
    }

    #[tokio::test]
    async fn ids_resume_after_reopen() {
        let path = test_wal_path("resume_ids.wal");
        {
            let store = WalStore::open(&path).unwrap();
            for i in 0..3 {
                store
                    .insert(NewBooking::new(ResourceRef::Shared, i * 60 * M, 30))
                    .await
                    .unwrap();
            }
        }
        let store = WalStore::open(&path).unwrap();
        let id = store
            .insert(NewBooking::new(ResourceRef::Shared, 500 * M, 30))
            .await
            .unwrap();
        assert_eq!(id, BookingId(4));
    }

    #[tokio::test]
    async fn compact_preserves_state_and_resets_counter() {
        let path = test_wal_path("compact.wal");
        let a = ResourceRef::named("dr-a");
        {
            let store = WalStore::open(&path).unwrap();
            let mut last = None;
            for i in 0..10 {
                let id = store.insert(NewBooking::new(a.clone(), i * 60 * M, 30)).await.unwrap();
                if i % 2 == 0 {
                    store.remove(id).await.unwrap();
                }
                last = Some(id);
            }
            assert!(store.appends_since_compact().await >= 15);
            assert!(!store.compact_if_needed(1_000).await.unwrap());
            assert!(store.compact_if_needed(15).await.unwrap());
            assert_eq!(store.appends_since_compact().await, 0);

            // Appends after compaction land in the new file.
            store
                .replace(last.unwrap(), NewBooking::new(a.clone(), 999 * M, 5))
                .await
                .unwrap();
        }

        let store = WalStore::open(&path).unwrap();
        let all = store.all_bookings().await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all.last().unwrap().start, 999 * M);
    }

    #[tokio::test]
    async fn deleted_highest_id_stays_spent_after_compaction() {
        let path = test_wal_path("compact_high_water.wal");
        {
            let store = WalStore::open(&path).unwrap();
            for i in 0..3 {
                store
                    .insert(NewBooking::new(ResourceRef::named("dr-a"), i * 60 * M, 30))
                    .await
                    .unwrap();
            }
            store.remove(BookingId(3)).await.unwrap();
            store.compact().await.unwrap();
        }

        let store = WalStore::open(&path).unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        let id = store
            .insert(NewBooking::new(ResourceRef::named("dr-a"), 500 * M, 30))
            .await
            .unwrap();
        assert_eq!(id, BookingId(4));
    }

    #[tokio::test]
    async fn compacting_an_emptied_store_keeps_ids_spent() {
        let path = test_wal_path("compact_empty.wal");
        {
            let store = WalStore::open(&path).unwrap();
            for i in 0..5 {
                let id = store
                    .insert(NewBooking::new(ResourceRef::Shared, i * 60 * M, 30))
                    .await
                    .unwrap();
                store.remove(id).await.unwrap();
            }
            store.compact().await.unwrap();
        }

        let store = WalStore::open(&path).unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        let id = store
            .insert(NewBooking::new(ResourceRef::Shared, 0, 30))
            .await
            .unwrap();
        assert_eq!(id, BookingId(6));
    }

    #[tokio::test]
    async fn remove_unknown_does_not_touch_log() {
        let path = test_wal_path("remove_unknown.wal");
        let store = WalStore::open(&path).unwrap();
        assert!(store.remove(BookingId(3)).await.unwrap().is_none());
        assert!(!store
            .replace(BookingId(3), NewBooking::new(ResourceRef::Shared, 0, 5))
            .await
            .unwrap());
        assert_eq!(store.appends_since_compact().await, 0);
    }
}
