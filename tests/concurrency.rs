use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use futures::future::join_all;
use ulid::Ulid;

use vigil::config::Config;
use vigil::engine::{Engine, EngineError};
use vigil::lifecycle::ReservationStatus;
use vigil::model::{CatalogRefs, CustomerSnapshot, OperatingHours, PetSnapshot, Reservation, Room};
use vigil::scheduler::{NewReservation, ReservationPatch, Scheduler};
use vigil::store::ReservationStore;

// ── Test infrastructure ──────────────────────────────────────

fn journal_path() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("vigil_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("vigil.journal")
}

fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
}

fn now() -> NaiveDateTime {
    at("2030-05-01 08:00")
}

fn new_room(name: &str) -> Room {
    Room {
        id: Ulid::new(),
        name: name.into(),
        capacity: Some(30),
        hours: OperatingHours::new(
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        ),
        active: true,
    }
}

fn request(room_id: Ulid, when: NaiveDateTime, family: usize) -> NewReservation {
    NewReservation {
        room_id: Some(room_id),
        scheduled_at: Some(when),
        status: None,
        customer: CustomerSnapshot {
            name: format!("Family {family}"),
            phone: format!("010-0000-{family:04}"),
            ..Default::default()
        },
        pet: PetSnapshot {
            name: format!("Pet {family}"),
            ..Default::default()
        },
        catalog: CatalogRefs::default(),
        memo: None,
    }
}

fn raw(room_id: Ulid, when: NaiveDateTime) -> Reservation {
    let now = Utc::now();
    Reservation {
        id: Ulid::new(),
        room_id,
        scheduled_at: when,
        duration_minutes: 120,
        status: ReservationStatus::Pending,
        customer: CustomerSnapshot::default(),
        pet: PetSnapshot::default(),
        catalog: CatalogRefs::default(),
        memo: None,
        created_at: now,
        updated_at: now,
    }
}

async fn setup() -> (Arc<Scheduler<Engine>>, Room) {
    let engine = Arc::new(Engine::new(journal_path()).unwrap());
    let room = engine.create_room(new_room("Main hall")).await.unwrap();
    let scheduler = Scheduler::new(engine, &Config::default()).with_clock(now);
    (Arc::new(scheduler), room)
}

fn assert_no_overlap(reservations: &[Reservation]) {
    let live: Vec<_> = reservations.iter().filter(|r| r.blocks()).collect();
    for (i, a) in live.iter().enumerate() {
        for b in &live[i + 1..] {
            if a.room_id == b.room_id {
                assert!(!a.span().overlaps(&b.span()), "{} overlaps {}", a.id, b.id);
            }
        }
    }
}

// ── Same slot, many callers ──────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn parallel_bookings_for_one_slot_single_winner() {
    let (scheduler, room) = setup().await;
    let when = at("2030-05-10 10:00");
    let room_id = room.id;

    let attempts = (0..32).map(|family| {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.create_reservation(request(room_id, when, family)).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(EngineError::Conflict { .. })))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(conflicts, 31);

    let day = when.date();
    let stored = scheduler
        .store()
        .list_room_reservations(room.id, day, day)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn staggered_parallel_bookings_never_overlap() {
    let (scheduler, room) = setup().await;
    let base = at("2030-05-10 09:00");
    let room_id = room.id;

    // Every 10 minutes from 09:00 to 15:50, several callers each.
    let attempts = (0..42 * 3).map(|i| {
        let scheduler = scheduler.clone();
        let when = base + TimeDelta::minutes(10 * (i as i64 / 3));
        tokio::spawn(async move { scheduler.create_reservation(request(room_id, when, i)).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();
    assert!(results.iter().any(|r| r.is_ok()));
    for r in &results {
        if let Err(e) = r {
            assert_eq!(e.code(), "CONFLICT", "unexpected error {e}");
        }
    }

    let day = base.date();
    let stored = scheduler
        .store()
        .list_room_reservations(room.id, day, day)
        .await
        .unwrap();
    assert_eq!(stored.len(), results.iter().filter(|r| r.is_ok()).count());
    assert_no_overlap(&stored);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_and_rebook_race() {
    let (scheduler, room) = setup().await;
    let when = at("2030-05-10 13:00");
    let room_id = room.id;
    let first = scheduler.create_reservation(request(room_id, when, 0)).await.unwrap();

    let cancel = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.update_status(first.id, ReservationStatus::Cancelled).await })
    };
    let rebooks = (1..9).map(|family| {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.create_reservation(request(room_id, when, family)).await })
    });
    let rebooked: Vec<_> = join_all(rebooks).await.into_iter().map(|r| r.unwrap()).collect();
    cancel.await.unwrap().unwrap();

    // At most one rebooking can have landed; everything else saw a conflict.
    assert!(rebooked.iter().filter(|r| r.is_ok()).count() <= 1);
    let stored = scheduler
        .store()
        .list_room_reservations(room.id, when.date(), when.date())
        .await
        .unwrap();
    assert_no_overlap(&stored);
}

// ── Cross-room moves ─────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn opposing_moves_do_not_deadlock() {
    let engine = Arc::new(Engine::new(journal_path()).unwrap());
    let hall = engine.create_room(new_room("Hall")).await.unwrap();
    let chapel = engine.create_room(new_room("Chapel")).await.unwrap();

    let mut pairs = Vec::new();
    for day in 1..=20 {
        let when = at("2030-06-01 10:00") + TimeDelta::days(day);
        let a = engine.insert_reservation(raw(hall.id, when)).await.unwrap();
        let b = engine.insert_reservation(raw(chapel.id, when + TimeDelta::hours(3))).await.unwrap();
        pairs.push((a, b));
    }

    let today = now().date();
    let moves = pairs.into_iter().flat_map(|(a, b)| {
        [(a.id, chapel.id), (b.id, hall.id)].map(|(id, room_id)| {
            let engine = engine.clone();
            let patch = ReservationPatch {
                room_id: Some(room_id),
                ..Default::default()
            };
            tokio::spawn(async move { engine.update_reservation(id, patch, today).await })
        })
    });
    let all = tokio::time::timeout(Duration::from_secs(10), join_all(moves))
        .await
        .expect("moves deadlocked");
    for r in all {
        r.unwrap().unwrap();
    }

    let from = at("2030-06-01 00:00").date();
    let to = from + TimeDelta::days(30);
    let stored = engine.list_reservations(from, to).await.unwrap();
    assert_eq!(stored.len(), 40);
    assert_no_overlap(&stored);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn bulk_and_single_updates_interleave_atomically() {
    let (scheduler, room) = setup().await;
    let mut ids = Vec::new();
    for day in 0..10 {
        let when = at("2030-05-10 10:00") + TimeDelta::days(day);
        ids.push(scheduler.create_reservation(request(room.id, when, day as usize)).await.unwrap().id);
    }

    // One caller confirms the whole batch while another cancels a single member.
    let bulk = {
        let scheduler = scheduler.clone();
        let ids = ids.clone();
        tokio::spawn(async move { scheduler.bulk_update_status(&ids, ReservationStatus::Confirmed).await })
    };
    let single = {
        let scheduler = scheduler.clone();
        let victim = ids[4];
        tokio::spawn(async move { scheduler.update_status(victim, ReservationStatus::Cancelled).await })
    };
    let bulk = bulk.await.unwrap();
    single.await.unwrap().unwrap();

    let mut statuses = Vec::new();
    for id in &ids {
        statuses.push(scheduler.store().get_reservation(*id).await.unwrap().status);
    }
    match bulk {
        // Bulk went first: everything confirmed, then one cancelled.
        Ok(_) => {
            assert_eq!(statuses.iter().filter(|s| **s == ReservationStatus::Confirmed).count(), 9);
            assert_eq!(statuses[4], ReservationStatus::Cancelled);
        }
        // Cancel went first: the batch was refused as a whole.
        Err(EngineError::BulkRejected(failures)) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].id, ids[4]);
            assert_eq!(statuses.iter().filter(|s| **s == ReservationStatus::Pending).count(), 9);
        }
        Err(other) => panic!("unexpected error: {other}"),
    }
}

// ── Edits racing other writers ───────────────────────────────

/// Confirms a pending reservation right after handing out a copy of it, so
/// the caller's next write lands on a newer record than the one it read.
struct ConfirmsAfterRead {
    inner: Arc<Engine>,
}

#[async_trait]
impl ReservationStore for ConfirmsAfterRead {
    async fn list_rooms(&self) -> Result<Vec<Room>, EngineError> {
        ReservationStore::list_rooms(&*self.inner).await
    }

    async fn get_room(&self, id: Ulid) -> Result<Room, EngineError> {
        ReservationStore::get_room(&*self.inner, id).await
    }

    async fn list_reservations_by_room_and_date_range(
        &self,
        room_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError> {
        ReservationStore::list_reservations_by_room_and_date_range(&*self.inner, room_id, from, to).await
    }

    async fn list_reservations_by_date_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError> {
        ReservationStore::list_reservations_by_date_range(&*self.inner, from, to).await
    }

    async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let copy = ReservationStore::get_reservation(&*self.inner, id).await?;
        if copy.status == ReservationStatus::Pending {
            ReservationStore::update_reservation_status(&*self.inner, id, ReservationStatus::Confirmed).await?;
        }
        Ok(copy)
    }

    async fn insert_reservation(&self, reservation: Reservation) -> Result<Reservation, EngineError> {
        ReservationStore::insert_reservation(&*self.inner, reservation).await
    }

    async fn update_reservation(
        &self,
        id: Ulid,
        patch: ReservationPatch,
        today: NaiveDate,
    ) -> Result<Reservation, EngineError> {
        ReservationStore::update_reservation(&*self.inner, id, patch, today).await
    }

    async fn update_reservation_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        ReservationStore::update_reservation_status(&*self.inner, id, status).await
    }

    async fn update_reservation_statuses(
        &self,
        ids: &[Ulid],
        status: ReservationStatus,
    ) -> Result<Vec<Reservation>, EngineError> {
        ReservationStore::update_reservation_statuses(&*self.inner, ids, status).await
    }

    async fn delete_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        ReservationStore::delete_reservation(&*self.inner, id).await
    }
}

#[tokio::test]
async fn memo_edit_after_concurrent_confirm_keeps_both() {
    let engine = Arc::new(Engine::new(journal_path()).unwrap());
    let room = engine.create_room(new_room("Main hall")).await.unwrap();
    let booked = engine
        .insert_reservation(raw(room.id, at("2030-05-10 10:00")))
        .await
        .unwrap();

    let store = Arc::new(ConfirmsAfterRead { inner: engine.clone() });
    let scheduler = Scheduler::new(store, &Config::default()).with_clock(now);
    let edited = scheduler
        .update_reservation(
            booked.id,
            ReservationPatch {
                memo: Some("note".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(edited.status, ReservationStatus::Confirmed);
    assert_eq!(edited.memo.as_deref(), Some("note"));
    let stored = engine.get_reservation(booked.id).await.unwrap();
    assert_eq!(stored, edited);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn parallel_field_edits_and_status_changes_all_land() {
    let (scheduler, room) = setup().await;
    let mut ids = Vec::new();
    for day in 0..16 {
        let when = at("2030-05-10 10:00") + TimeDelta::days(day);
        ids.push(scheduler.create_reservation(request(room.id, when, day as usize)).await.unwrap().id);
    }

    // Three writers per reservation, each touching a different field.
    let mut tasks = Vec::new();
    for id in ids.iter().copied() {
        let memo = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                let patch = ReservationPatch {
                    memo: Some(format!("memo {id}")),
                    ..Default::default()
                };
                scheduler.update_reservation(id, patch).await.map(|_| ())
            })
        };
        let staff = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                let patch = ReservationPatch {
                    staff_id: Some("staff-9".into()),
                    ..Default::default()
                };
                scheduler.update_reservation(id, patch).await.map(|_| ())
            })
        };
        let confirm = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                scheduler
                    .update_status(id, ReservationStatus::Confirmed)
                    .await
                    .map(|_| ())
            })
        };
        tasks.extend([memo, staff, confirm]);
    }
    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    for id in ids {
        let r = scheduler.store().get_reservation(id).await.unwrap();
        assert_eq!(r.status, ReservationStatus::Confirmed);
        assert_eq!(r.memo, Some(format!("memo {id}")));
        assert_eq!(r.catalog.staff_id.as_deref(), Some("staff-9"));
    }
}
