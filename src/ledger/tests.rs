use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use ulid::Ulid;

use super::*;
use crate::clock::FixedClock;
use crate::limits::*;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("roombook_test_ledger");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn at(h: u16) -> TimeOfDay {
    TimeOfDay::from_hm(h, 0).unwrap()
}

/// "Today" for every test unless a test moves the clock.
fn today() -> NaiveDate {
    date(2025, 11, 5)
}

fn open(path: PathBuf) -> (Ledger, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(today()));
    let ledger = Ledger::open(path, QuotaPolicy::default(), clock.clone()).unwrap();
    (ledger, clock)
}

fn member(identity: &str, group: &str, role: u8) -> Requester {
    Requester {
        identity: identity.into(),
        name: identity.to_uppercase(),
        group: GroupRef {
            id: group.into(),
            name: format!("Group {group}"),
            parish: Some("St. Mark".into()),
        },
        role: Role(role),
    }
}

fn request(place_id: Ulid, day: NaiveDate, hour: u16) -> NewBooking {
    NewBooking {
        place_id,
        date: day,
        time: at(hour),
        reason: "weekly meeting".into(),
    }
}

async fn add_place(ledger: &Ledger, name: &str) -> Ulid {
    let id = Ulid::new();
    ledger
        .create_place(id, name.into(), Some(format!("{name} room")), None)
        .await
        .unwrap();
    id
}

// ── Places ───────────────────────────────────────────────

#[tokio::test]
async fn places_listed_by_name_and_retired_ones_hidden() {
    let (ledger, _) = open(test_wal_path("places_listed.wal"));
    let chapel = add_place(&ledger, "Chapel").await;
    let _annex = add_place(&ledger, "Annex").await;
    let _hall = add_place(&ledger, "Hall").await;

    let names: Vec<String> = ledger.list_places().into_iter().map(|p| p.name).collect();
    assert_eq!(names, ["Annex", "Chapel", "Hall"]);

    ledger.retire_place(chapel).await.unwrap();
    let names: Vec<String> = ledger.list_places().into_iter().map(|p| p.name).collect();
    assert_eq!(names, ["Annex", "Hall"]);
    assert!(matches!(ledger.retire_place(chapel).await, Err(LedgerError::NotFound(_))));
}

#[tokio::test]
async fn place_validation() {
    let (ledger, _) = open(test_wal_path("place_validation.wal"));
    let id = add_place(&ledger, "Hall").await;

    assert!(matches!(
        ledger.create_place(id, "Again".into(), None, None).await,
        Err(LedgerError::AlreadyExists(_))
    ));
    assert!(matches!(
        ledger.create_place(Ulid::new(), "  ".into(), None, None).await,
        Err(LedgerError::InvalidInput(_))
    ));
    assert!(matches!(
        ledger
            .create_place(Ulid::new(), "x".repeat(MAX_NAME_LEN + 1), None, None)
            .await,
        Err(LedgerError::LimitExceeded(_))
    ));
    assert!(matches!(
        ledger
            .create_place(Ulid::new(), "Loft".into(), Some("d".repeat(MAX_DESCRIPTION_LEN + 1)), None)
            .await,
        Err(LedgerError::LimitExceeded(_))
    ));
    assert!(matches!(
        ledger
            .create_place(Ulid::new(), "Loft".into(), None, Some(vec![at(10), at(9)]))
            .await,
        Err(LedgerError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn custom_schedule_drives_slots() {
    let (ledger, _) = open(test_wal_path("custom_schedule.wal"));
    let id = Ulid::new();
    let schedule = vec![TimeOfDay::from_hm(18, 30).unwrap(), TimeOfDay::from_hm(20, 0).unwrap()];
    ledger
        .create_place(id, "Youth room".into(), None, Some(schedule.clone()))
        .await
        .unwrap();

    let slots = ledger.list_slots(id, date(2025, 11, 10), "g1").await.unwrap();
    let times: Vec<TimeOfDay> = slots.iter().map(|s| s.time).collect();
    assert_eq!(times, schedule);

    let off_grid = ledger
        .create_booking(&member("kim", "g1", 2), request(id, date(2025, 11, 10), 10))
        .await;
    assert!(matches!(off_grid, Err(LedgerError::InvalidInput(_))));
}

// ── Slot derivation ──────────────────────────────────────

#[tokio::test]
async fn slots_of_unknown_or_retired_place_are_not_found() {
    let (ledger, _) = open(test_wal_path("slots_not_found.wal"));
    assert!(matches!(
        ledger.list_slots(Ulid::new(), date(2025, 11, 10), "g1").await,
        Err(LedgerError::NotFound(_))
    ));
    let id = add_place(&ledger, "Hall").await;
    ledger.retire_place(id).await.unwrap();
    assert!(matches!(
        ledger.list_slots(id, date(2025, 11, 10), "g1").await,
        Err(LedgerError::NotFound(_))
    ));
}

#[tokio::test]
async fn empty_day_is_all_available() {
    let (ledger, _) = open(test_wal_path("empty_day.wal"));
    let id = add_place(&ledger, "Hall").await;
    let slots = ledger.list_slots(id, date(2025, 11, 10), "g1").await.unwrap();
    assert_eq!(slots.len(), 9);
    assert!(slots.iter().all(|s| s.status == SlotStatus::Available && s.holder.is_none()));
}

#[tokio::test]
async fn booking_round_trip_through_slots_and_listing() {
    let (ledger, _) = open(test_wal_path("round_trip.wal"));
    let place = add_place(&ledger, "Hall").await;
    let kim = member("kim", "g1", 2);
    let day = date(2025, 11, 10);

    let booking = ledger.create_booking(&kim, request(place, day, 10)).await.unwrap();
    assert_eq!(booking.requester, "kim");
    assert_eq!(booking.group.id, "g1");

    let mine = ledger.list_slots(place, day, "g1").await.unwrap();
    let slot = mine.get(at(10)).unwrap();
    assert_eq!(slot.status, SlotStatus::BookedBySelf);
    let holder = slot.holder.unwrap();
    assert_eq!(holder.booking_id, booking.id);
    assert_eq!(holder.reserved_by, "KIM");
    assert_eq!(holder.reason, "weekly meeting");

    let theirs = ledger.list_slots(place, day, "g2").await.unwrap();
    assert_eq!(theirs.get(at(10)).unwrap().status, SlotStatus::BookedByOther);

    assert_eq!(ledger.list_for_requester("kim", today()).await, vec![booking.clone()]);

    ledger.cancel_booking(booking.id, "kim").await.unwrap();
    let after = ledger.list_slots(place, day, "g2").await.unwrap();
    assert_eq!(after.get(at(10)).unwrap().status, SlotStatus::Available);
    assert!(ledger.list_for_requester("kim", today()).await.is_empty());
}

#[tokio::test]
async fn slot_view_is_a_snapshot() {
    let (ledger, _) = open(test_wal_path("slot_snapshot.wal"));
    let place = add_place(&ledger, "Hall").await;
    let day = date(2025, 11, 10);
    let view = ledger.list_slots(place, day, "g1").await.unwrap();

    ledger
        .create_booking(&member("kim", "g1", 2), request(place, day, 9))
        .await
        .unwrap();

    assert_eq!(view.get(at(9)).unwrap().status, SlotStatus::Available);
    let fresh = ledger.list_slots(place, day, "g1").await.unwrap();
    assert_eq!(fresh.get(at(9)).unwrap().status, SlotStatus::BookedBySelf);
}

// ── Admission ────────────────────────────────────────────

#[tokio::test]
async fn quota_scenario_two_then_rejected() {
    let (ledger, _) = open(test_wal_path("quota_scenario.wal"));
    let place1 = add_place(&ledger, "Place1").await;
    let place2 = add_place(&ledger, "Place2").await;
    let a = member("anna", "g1", 2);
    let day = date(2025, 11, 10);

    assert_eq!(ledger.current_count("g1", day), 0);
    ledger.create_booking(&a, request(place1, day, 10)).await.unwrap();
    assert_eq!(ledger.current_count("g1", day), 1);
    ledger.create_booking(&a, request(place2, day, 14)).await.unwrap();
    assert_eq!(ledger.current_count("g1", day), 2);

    let third = ledger.create_booking(&a, request(place1, day, 16)).await;
    match third {
        Err(LedgerError::QuotaExceeded { count, ceiling, .. }) => assert_eq!((count, ceiling), (2, 2)),
        other => panic!("expected QuotaExceeded, got {other:?}"),
    }
    assert_eq!(ledger.current_count("g1", day), 2);
    assert!(!ledger.can_admit(&a, day));
    assert!(ledger.quota_status(&a, day).at_ceiling());

    // Another date is untouched.
    assert!(ledger.can_admit(&a, date(2025, 11, 11)));
}

#[tokio::test]
async fn quota_is_shared_within_a_group() {
    let (ledger, _) = open(test_wal_path("quota_group.wal"));
    let place = add_place(&ledger, "Hall").await;
    let leader = member("lee", "g1", 2);
    let deputy = member("dana", "g1", 3);
    let other = member("omar", "g2", 2);
    let day = date(2025, 11, 10);

    ledger.create_booking(&leader, request(place, day, 9)).await.unwrap();
    ledger.create_booking(&deputy, request(place, day, 10)).await.unwrap();
    assert!(matches!(
        ledger.create_booking(&deputy, request(place, day, 11)).await,
        Err(LedgerError::QuotaExceeded { .. })
    ));
    ledger.create_booking(&other, request(place, day, 11)).await.unwrap();
}

#[tokio::test]
async fn exempt_role_books_past_the_ceiling() {
    let (ledger, _) = open(test_wal_path("exempt.wal"));
    let place = add_place(&ledger, "Hall").await;
    let admin = member("root", "office", 0);
    let day = date(2025, 11, 10);

    for hour in 9..14 {
        ledger.create_booking(&admin, request(place, day, hour)).await.unwrap();
    }
    assert_eq!(ledger.current_count("office", day), 5);
    let status = ledger.quota_status(&admin, day);
    assert!(status.exempt);
    assert!(!status.at_ceiling());
    assert!(ledger.can_admit(&admin, day));
}

#[tokio::test]
async fn past_date_rejected_regardless_of_state() {
    let (ledger, _) = open(test_wal_path("past_date.wal"));
    let place = add_place(&ledger, "Hall").await;
    let past = date(2025, 11, 1);

    for who in [member("kim", "g1", 2), member("root", "office", 0)] {
        let result = ledger.create_booking(&who, request(place, past, 10)).await;
        assert!(matches!(result, Err(LedgerError::PastDate(d)) if d == past));
    }
    // Today is still open.
    ledger
        .create_booking(&member("kim", "g1", 2), request(place, today(), 10))
        .await
        .unwrap();
}

#[tokio::test]
async fn moving_clock_closes_yesterday() {
    let (ledger, clock) = open(test_wal_path("moving_clock.wal"));
    let place = add_place(&ledger, "Hall").await;
    let kim = member("kim", "g1", 2);
    ledger.create_booking(&kim, request(place, today(), 9)).await.unwrap();

    clock.set_today(today().succ_opt().unwrap());
    assert!(matches!(
        ledger.create_booking(&kim, request(place, today(), 10)).await,
        Err(LedgerError::PastDate(_))
    ));
}

#[tokio::test]
async fn too_far_ahead_is_invalid() {
    let (ledger, _) = open(test_wal_path("horizon.wal"));
    let place = add_place(&ledger, "Hall").await;
    let far = today() + chrono::Days::new(MAX_BOOKING_HORIZON_DAYS as u64 + 1);
    assert!(matches!(
        ledger.create_booking(&member("kim", "g1", 2), request(place, far, 10)).await,
        Err(LedgerError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn double_booking_is_a_conflict() {
    let (ledger, _) = open(test_wal_path("conflict.wal"));
    let place = add_place(&ledger, "Hall").await;
    let day = date(2025, 11, 10);
    let first = ledger
        .create_booking(&member("kim", "g1", 2), request(place, day, 10))
        .await
        .unwrap();
    match ledger.create_booking(&member("omar", "g2", 2), request(place, day, 10)).await {
        Err(LedgerError::Conflict { existing, time, .. }) => {
            assert_eq!(existing, first.id);
            assert_eq!(time, at(10));
        }
        other => panic!("expected Conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn invalid_input_is_checked_first() {
    let (ledger, _) = open(test_wal_path("invalid_first.wal"));
    let place = add_place(&ledger, "Hall").await;
    let mut bad = request(place, date(2025, 11, 1), 10);
    bad.reason = "".into();
    // Past date and empty reason: the input error wins.
    assert!(matches!(
        ledger.create_booking(&member("kim", "g1", 2), bad).await,
        Err(LedgerError::InvalidInput(_))
    ));
    assert!(matches!(
        ledger
            .create_booking(&member("kim", "g1", 2), request(Ulid::new(), date(2025, 11, 10), 10))
            .await,
        Err(LedgerError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn quota_checked_before_uniqueness() {
    let (ledger, _) = open(test_wal_path("quota_before_conflict.wal"));
    let place = add_place(&ledger, "Hall").await;
    let day = date(2025, 11, 10);
    let kim = member("kim", "g1", 2);
    ledger.create_booking(&kim, request(place, day, 9)).await.unwrap();
    ledger.create_booking(&kim, request(place, day, 10)).await.unwrap();
    // Slot 10:00 is taken and the group is at its ceiling.
    assert!(matches!(
        ledger.create_booking(&kim, request(place, day, 10)).await,
        Err(LedgerError::QuotaExceeded { .. })
    ));
}

#[tokio::test]
async fn retired_place_refuses_bookings_but_allows_cancel() {
    let (ledger, _) = open(test_wal_path("retired_place.wal"));
    let place = add_place(&ledger, "Hall").await;
    let kim = member("kim", "g1", 2);
    let day = date(2025, 11, 10);
    let kept = ledger.create_booking(&kim, request(place, day, 9)).await.unwrap();

    ledger.retire_place(place).await.unwrap();
    assert!(matches!(
        ledger.create_booking(&kim, request(place, day, 10)).await,
        Err(LedgerError::InvalidInput(_))
    ));
    ledger.cancel_booking(kept.id, "kim").await.unwrap();
}

// ── Cancellation ─────────────────────────────────────────

#[tokio::test]
async fn cancel_twice_is_success_then_not_found() {
    let (ledger, _) = open(test_wal_path("cancel_twice.wal"));
    let place = add_place(&ledger, "Hall").await;
    let day = date(2025, 11, 10);
    let kim = member("kim", "g1", 2);
    let b = ledger.create_booking(&kim, request(place, day, 10)).await.unwrap();

    ledger.cancel_booking(b.id, "kim").await.unwrap();
    assert!(matches!(ledger.cancel_booking(b.id, "kim").await, Err(LedgerError::NotFound(_))));

    // The slot was freed once: one new booking fits, a second conflicts.
    ledger.create_booking(&kim, request(place, day, 10)).await.unwrap();
    assert!(matches!(
        ledger.create_booking(&member("omar", "g2", 2), request(place, day, 10)).await,
        Err(LedgerError::Conflict { .. })
    ));
    assert_eq!(ledger.current_count("g1", day), 1);
}

#[tokio::test]
async fn only_the_owner_may_cancel() {
    let (ledger, _) = open(test_wal_path("not_owner.wal"));
    let place = add_place(&ledger, "Hall").await;
    let b = ledger
        .create_booking(&member("kim", "g1", 2), request(place, date(2025, 11, 10), 10))
        .await
        .unwrap();

    // Same group, different member: still not the owner.
    assert!(matches!(ledger.cancel_booking(b.id, "dana").await, Err(LedgerError::NotOwner(_))));
    assert!(ledger.get_booking(&b.id).await.is_some());
    assert!(matches!(
        ledger.cancel_booking(Ulid::new(), "kim").await,
        Err(LedgerError::NotFound(_))
    ));
}

#[tokio::test]
async fn cancel_frees_quota() {
    let (ledger, _) = open(test_wal_path("cancel_frees_quota.wal"));
    let place = add_place(&ledger, "Hall").await;
    let day = date(2025, 11, 10);
    let kim = member("kim", "g1", 2);
    let first = ledger.create_booking(&kim, request(place, day, 9)).await.unwrap();
    ledger.create_booking(&kim, request(place, day, 10)).await.unwrap();
    assert!(!ledger.can_admit(&kim, day));

    ledger.cancel_booking(first.id, "kim").await.unwrap();
    assert_eq!(ledger.current_count("g1", day), 1);
    ledger.create_booking(&kim, request(place, day, 11)).await.unwrap();
}

// ── Listings ─────────────────────────────────────────────

#[tokio::test]
async fn my_bookings_ordered_by_date_then_time_from_date() {
    let (ledger, _) = open(test_wal_path("my_bookings.wal"));
    let hall = add_place(&ledger, "Hall").await;
    let chapel = add_place(&ledger, "Chapel").await;
    let admin = member("root", "office", 0);

    let d1 = date(2025, 11, 6);
    let d2 = date(2025, 11, 8);
    ledger.create_booking(&admin, request(hall, d2, 9)).await.unwrap();
    ledger.create_booking(&admin, request(chapel, d1, 15)).await.unwrap();
    ledger.create_booking(&admin, request(hall, d1, 11)).await.unwrap();
    ledger
        .create_booking(&member("kim", "g1", 2), request(hall, d1, 9))
        .await
        .unwrap();

    let all = ledger.list_for_requester("root", today()).await;
    let keys: Vec<(NaiveDate, TimeOfDay)> = all.iter().map(|b| (b.date, b.time)).collect();
    assert_eq!(keys, vec![(d1, at(11)), (d1, at(15)), (d2, at(9))]);

    let later = ledger.list_for_requester("root", d2).await;
    assert_eq!(later.len(), 1);

    let on_d1 = ledger.bookings_on_date("root", d1).await;
    assert_eq!(on_d1.len(), 2);
    assert!(on_d1.iter().all(|b| b.date == d1));
    assert!(ledger.list_for_requester("nobody", today()).await.is_empty());
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_creates_on_one_slot_admit_exactly_one() {
    let (ledger, _) = open(test_wal_path("race_one_slot.wal"));
    let ledger = Arc::new(ledger);
    let place = add_place(&ledger, "Hall").await;
    let day = date(2025, 11, 10);

    let mut handles = Vec::new();
    for i in 0..16 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            let who = member(&format!("m{i}"), &format!("g{i}"), 2);
            ledger.create_booking(&who, request(place, day, 10)).await
        }));
    }

    let mut won = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => won += 1,
            Err(LedgerError::Conflict { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!((won, conflicts), (1, 15));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_creates_never_exceed_the_ceiling() {
    let (ledger, _) = open(test_wal_path("race_quota.wal"));
    let ledger = Arc::new(ledger);
    let places = [
        add_place(&ledger, "A").await,
        add_place(&ledger, "B").await,
        add_place(&ledger, "C").await,
    ];
    let day = date(2025, 11, 10);

    let mut handles = Vec::new();
    for (i, place) in places.iter().copied().enumerate() {
        for hour in 9..12 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let who = member(&format!("m{i}"), "g1", 2);
                ledger.create_booking(&who, request(place, day, hour)).await
            }));
        }
    }

    let mut admitted = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(LedgerError::QuotaExceeded { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(admitted, 2);
    assert_eq!(ledger.current_count("g1", day), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancel_and_create_keep_invariants() {
    let (ledger, _) = open(test_wal_path("race_cancel_create.wal"));
    let ledger = Arc::new(ledger);
    let place = add_place(&ledger, "Hall").await;
    let day = date(2025, 11, 10);
    let kim = member("kim", "g1", 2);
    let a = ledger.create_booking(&kim, request(place, day, 9)).await.unwrap();
    ledger.create_booking(&kim, request(place, day, 10)).await.unwrap();

    let cancel = {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.cancel_booking(a.id, "kim").await })
    };
    let create = {
        let ledger = ledger.clone();
        let kim = kim.clone();
        tokio::spawn(async move { ledger.create_booking(&kim, request(place, day, 11)).await })
    };
    cancel.await.unwrap().unwrap();
    let created = create.await.unwrap();

    let count = ledger.current_count("g1", day);
    assert!(count <= 2);
    assert_eq!(count, if created.is_ok() { 2 } else { 1 });

    let slots = ledger.list_slots(place, day, "g1").await.unwrap();
    let taken: HashSet<TimeOfDay> = slots
        .iter()
        .filter(|s| s.status != SlotStatus::Available)
        .map(|s| s.time)
        .collect();
    assert_eq!(taken.len() as u32, count);
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn replay_restores_places_bookings_and_cancellations() {
    let path = test_wal_path("replay.wal");
    let day = date(2025, 11, 10);
    let (kept, place) = {
        let (ledger, _) = open(path.clone());
        let place = add_place(&ledger, "Hall").await;
        let retired = add_place(&ledger, "Old hall").await;
        ledger.retire_place(retired).await.unwrap();
        let kim = member("kim", "g1", 2);
        let kept = ledger.create_booking(&kim, request(place, day, 9)).await.unwrap();
        let gone = ledger.create_booking(&kim, request(place, day, 10)).await.unwrap();
        ledger.cancel_booking(gone.id, "kim").await.unwrap();
        (kept, place)
    };

    let (ledger, _) = open(path);
    assert_eq!(ledger.list_places().len(), 1);
    assert_eq!(ledger.list_for_requester("kim", today()).await, vec![kept]);
    assert_eq!(ledger.current_count("g1", day), 1);
    let slots = ledger.list_slots(place, day, "g2").await.unwrap();
    assert_eq!(slots.get(at(9)).unwrap().status, SlotStatus::BookedByOther);
    assert_eq!(slots.get(at(10)).unwrap().status, SlotStatus::Available);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn group_commit_persists_concurrent_bookings() {
    let path = test_wal_path("group_commit.wal");
    let day = date(2025, 11, 10);
    {
        let (ledger, _) = open(path.clone());
        let ledger = Arc::new(ledger);
        let place = add_place(&ledger, "Hall").await;
        let mut handles = Vec::new();
        for hour in 9..=17 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let who = member(&format!("m{hour}"), &format!("g{hour}"), 2);
                ledger.create_booking(&who, request(place, day, hour)).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
    }

    let (ledger, _) = open(path);
    let place = ledger.list_places()[0].id;
    let slots = ledger.list_slots(place, day, "nobody").await.unwrap();
    assert!(slots.iter().all(|s| s.status == SlotStatus::BookedByOther));
}

#[tokio::test]
async fn wal_appends_counted_and_reset_by_compaction() {
    let (ledger, _) = open(test_wal_path("appends_counter.wal"));
    assert_eq!(ledger.wal_appends_since_compact().await, 0);

    let place = add_place(&ledger, "Hall").await;
    let kim = member("kim", "g1", 2);
    let b = ledger.create_booking(&kim, request(place, date(2025, 11, 10), 9)).await.unwrap();
    ledger.cancel_booking(b.id, "kim").await.unwrap();
    assert_eq!(ledger.wal_appends_since_compact().await, 3);

    ledger.compact_wal().await.unwrap();
    assert_eq!(ledger.wal_appends_since_compact().await, 0);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction_state.wal");
    let day = date(2025, 11, 10);
    let expected = {
        let (ledger, _) = open(path.clone());
        let place = add_place(&ledger, "Hall").await;
        let retired = add_place(&ledger, "Attic").await;
        ledger.retire_place(retired).await.unwrap();
        let admin = member("root", "office", 0);
        for hour in 9..15 {
            let b = ledger.create_booking(&admin, request(place, day, hour)).await.unwrap();
            if hour % 2 == 0 {
                ledger.cancel_booking(b.id, "root").await.unwrap();
            }
        }
        ledger.compact_wal().await.unwrap();
        ledger.list_for_requester("root", today()).await
    };
    assert_eq!(expected.len(), 3);

    let (ledger, _) = open(path);
    assert_eq!(ledger.list_for_requester("root", today()).await, expected);
    assert_eq!(ledger.list_places().len(), 1);
    assert_eq!(ledger.get_place(&ledger.list_places()[0].id).unwrap().name, "Hall");
}

#[tokio::test]
async fn prune_drops_old_bookings_for_good() {
    let path = test_wal_path("prune.wal");
    let old_day = date(2025, 11, 6);
    let new_day = date(2025, 11, 20);
    {
        let (ledger, clock) = open(path.clone());
        let place = add_place(&ledger, "Hall").await;
        let admin = member("root", "office", 0);
        ledger.create_booking(&admin, request(place, old_day, 9)).await.unwrap();
        ledger.create_booking(&admin, request(place, new_day, 9)).await.unwrap();

        clock.set_today(date(2025, 11, 15));
        let removed = ledger.prune_before(date(2025, 11, 15)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(ledger.prune_before(date(2025, 11, 15)).await.unwrap(), 0);
    }

    let (ledger, _) = open(path);
    let left = ledger.list_for_requester("root", date(2025, 1, 1)).await;
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].date, new_day);
}

// ── Limits ───────────────────────────────────────────────

#[tokio::test]
async fn place_count_is_capped() {
    let (ledger, _) = open(test_wal_path("place_cap.wal"));
    for i in 0..MAX_PLACES_PER_TENANT {
        ledger
            .create_place(Ulid::new(), format!("Room {i}"), None, None)
            .await
            .unwrap();
    }
    assert!(matches!(
        ledger.create_place(Ulid::new(), "One more".into(), None, None).await,
        Err(LedgerError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn identity_shape_is_validated() {
    let (ledger, _) = open(test_wal_path("identity_shape.wal"));
    let place = add_place(&ledger, "Hall").await;
    let nameless = member("", "g1", 2);
    assert!(matches!(
        ledger.create_booking(&nameless, request(place, date(2025, 11, 10), 9)).await,
        Err(LedgerError::InvalidInput(_))
    ));
    let long = member(&"k".repeat(MAX_IDENTITY_LEN + 1), "g1", 2);
    assert!(matches!(
        ledger.create_booking(&long, request(place, date(2025, 11, 10), 9)).await,
        Err(LedgerError::InvalidInput(_))
    ));
}
