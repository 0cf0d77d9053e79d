use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;

use medsched::clock::ManualClock;
use medsched::engine::{EngineError, Scheduler};
use medsched::model::*;
use medsched::seed;
use medsched::store::{BookingStore, WalStore};

const T: Ms = 1_900_000_020_000;

fn at(minutes_from_now: i64) -> Ms {
    T + minutes_from_now * MINUTE_MS
}

// ── Test infrastructure ──────────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("medsched_int_test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn open(path: &Path) -> (Arc<WalStore>, Scheduler) {
    let store = Arc::new(WalStore::open(path).unwrap());
    let scheduler = Scheduler::new(store.clone(), Arc::new(ManualClock::new(T)), 4);
    (store, scheduler)
}

async fn create(scheduler: &Scheduler, resource: &str, offset: i64, duration: u32) -> Proposal {
    scheduler
        .propose_create(NewBooking::new(
            ResourceRef::parse(resource).unwrap(),
            at(offset),
            duration,
        ))
        .await
        .unwrap()
}

// ── Durability ───────────────────────────────────────────────

#[tokio::test]
async fn schedule_survives_restart() {
    let path = test_wal_path("restart.wal");
    let before = {
        let (_store, scheduler) = open(&path);
        assert!(create(&scheduler, "dr-test1", 0, 30).await.is_accepted());
        assert!(create(&scheduler, "dr-test2", 120, 30).await.is_accepted());
        assert!(create(&scheduler, "dr-test1", 90, 30).await.is_accepted());

        let patch = BookingPatch {
            resource: Some(ResourceRef::named("dr-test3")),
            patient_name: Some("testP".into()),
            ..Default::default()
        };
        assert!(
            scheduler
                .propose_update(BookingId(1), patch)
                .await
                .unwrap()
                .is_accepted()
        );
        scheduler.delete(BookingId(2)).await.unwrap();
        scheduler.list_bookings().await.unwrap()
    };

    let (_store, scheduler) = open(&path);
    let after = scheduler.list_bookings().await.unwrap();
    assert_eq!(after, before);
    assert_eq!(after.len(), 2);
    assert_eq!(
        scheduler.get_booking(BookingId(1)).await.unwrap().resource,
        ResourceRef::named("dr-test3")
    );
    assert!(matches!(
        scheduler.get_booking(BookingId(2)).await,
        Err(EngineError::NotFound(_))
    ));

    // Ids are never handed out twice, even across restarts
    assert_eq!(
        create(&scheduler, "dr-test2", 120, 30).await,
        Proposal::Accepted(BookingId(4))
    );
}

#[tokio::test]
async fn rejected_proposals_are_not_persisted() {
    let path = test_wal_path("rejected.wal");
    {
        let (_store, scheduler) = open(&path);
        assert!(create(&scheduler, "dr-a", 0, 30).await.is_accepted());
        let rejected = create(&scheduler, "dr-a", 10, 30).await;
        assert_eq!(rejected.suggestions().len(), 4);
    }
    let (store, _scheduler) = open(&path);
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn compaction_preserves_schedule() {
    let path = test_wal_path("compact.wal");
    let before = {
        let (store, scheduler) = open(&path);
        for i in 0..20 {
            assert!(create(&scheduler, "dr-a", i * 30, 30).await.is_accepted());
        }
        for id in (1..=20).step_by(2) {
            scheduler.delete(BookingId(id)).await.unwrap();
        }
        assert_eq!(store.appends_since_compact().await, 30);
        assert!(!store.compact_if_needed(31).await.unwrap());
        assert!(store.compact_if_needed(30).await.unwrap());
        assert_eq!(store.appends_since_compact().await, 0);

        // Writes after compaction land in the new log
        assert!(create(&scheduler, "dr-b", 0, 30).await.is_accepted());
        scheduler.list_bookings().await.unwrap()
    };

    let (_store, scheduler) = open(&path);
    assert_eq!(scheduler.list_bookings().await.unwrap(), before);
    assert_eq!(before.len(), 11);
}

#[tokio::test]
async fn ids_stay_spent_across_compaction_and_restart() {
    let path = test_wal_path("compact_ids.wal");
    {
        let (store, scheduler) = open(&path);
        for offset in [0, 60, 120] {
            assert!(create(&scheduler, "dr-a", offset, 30).await.is_accepted());
        }
        scheduler.delete(BookingId(3)).await.unwrap();
        store.compact().await.unwrap();
    }

    let (_store, scheduler) = open(&path);
    assert_eq!(scheduler.list_bookings().await.unwrap().len(), 2);
    assert_eq!(
        create(&scheduler, "dr-a", 120, 30).await,
        Proposal::Accepted(BookingId(4))
    );
}

// ── Concurrency ──────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_on_durable_store() {
    let path = test_wal_path("concurrent.wal");
    {
        let (_store, scheduler) = open(&path);
        let scheduler = Arc::new(scheduler);
        let handles: Vec<_> = (0..24)
            .map(|i| {
                let scheduler = scheduler.clone();
                // Four professionals, six callers each, all after the same slot
                let resource = format!("dr-{}", i % 4);
                tokio::spawn(async move { create(&scheduler, &resource, 60, 30).await })
            })
            .collect();

        let accepted = join_all(handles)
            .await
            .into_iter()
            .filter(|r| r.as_ref().unwrap().is_accepted())
            .count();
        assert_eq!(accepted, 4);
    }

    let (_store, scheduler) = open(&path);
    let bookings = scheduler.list_bookings().await.unwrap();
    assert_eq!(bookings.len(), 4);
    for name in ["dr-0", "dr-1", "dr-2", "dr-3"] {
        let on = scheduler
            .bookings_for_resource(&ResourceRef::named(name))
            .await
            .unwrap();
        assert_eq!(on.len(), 1);
    }
}

// ── Suggestions over the durable store ───────────────────────

#[tokio::test]
async fn suggestions_round_trip_on_durable_store() {
    let path = test_wal_path("round_trip.wal");
    let (_store, scheduler) = open(&path);
    for offset in [0, 35, 70] {
        assert!(create(&scheduler, "dr-test1", offset, 30).await.is_accepted());
    }
    let Proposal::Rejected(suggestions) = create(&scheduler, "dr-test1", 0, 30).await else {
        panic!("slot at now is taken");
    };
    let starts: Vec<Ms> = suggestions.iter().map(|s| s.start).collect();
    assert_eq!(starts, vec![at(100), at(130), at(160), at(190)]);

    for s in suggestions {
        let result = scheduler
            .propose_create(NewBooking::new(
                ResourceRef::named("dr-test1"),
                s.start,
                s.duration_minutes,
            ))
            .await
            .unwrap();
        assert!(result.is_accepted());
    }
}

// ── Seed import ──────────────────────────────────────────────

#[tokio::test]
async fn seed_imports_once() {
    let path = test_wal_path("seed.wal");
    let seed_path = std::env::temp_dir()
        .join("medsched_int_test")
        .join("seed.json");
    std::fs::write(
        &seed_path,
        r#"[
            {"patientName": "Ann", "healthcareProfessionalName": "dr-test1",
             "appointmentDate": "2030-03-01T09:00:00Z", "duration": 30, "description": "Checkup"},
            {"patientName": "Bob", "healthcareProfessionalName": "dr-test1",
             "appointmentDate": "2030-03-01T09:15:00Z", "duration": 30},
            {"patientName": "Cid", "healthcareProfessionalName": "",
             "appointmentDate": "2030-03-01T11:00:00Z", "duration": 60}
        ]"#,
    )
    .unwrap();

    {
        let (_store, scheduler) = open(&path);
        let records = seed::load_seed_file(&seed_path).unwrap();
        let report = seed::import(&scheduler, records).await.unwrap().unwrap();
        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.invalid, 0);

        let shared = scheduler
            .bookings_for_resource(&ResourceRef::Shared)
            .await
            .unwrap();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].payload.patient_name.as_deref(), Some("Cid"));
    }

    let (store, scheduler) = open(&path);
    let records = seed::load_seed_file(&seed_path).unwrap();
    assert_eq!(seed::import(&scheduler, records).await.unwrap(), None);
    assert_eq!(store.count().await.unwrap(), 2);
}
