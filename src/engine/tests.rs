use super::*;
use crate::config::Config;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::path::PathBuf;
use tokio_test::assert_ok;
use ulid::Ulid;

fn test_config(name: &str) -> Config {
    let dir: PathBuf = std::env::temp_dir().join("tutorgrid_test_engine").join(name);
    let _ = std::fs::remove_dir_all(&dir);
    Config {
        data_dir: dir,
        display_tz: chrono_tz::Tz::UTC,
        compact_threshold: 1000,
        metrics_port: None,
    }
}

fn open_engine(name: &str) -> Engine {
    Engine::open(&test_config(name)).unwrap()
}

fn tutor() -> TutorId {
    TutorId(Ulid::new())
}

fn student() -> StudentId {
    StudentId(Ulid::new())
}

/// A day far enough out that every grid instant is in the future.
fn future_day() -> NaiveDate {
    (Utc::now() + Duration::days(7)).date_naive()
}

fn at(day: NaiveDate, h: u32, m: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_hms_opt(h, m, 0).unwrap())
}

// ── Slot creation ────────────────────────────────────────

#[tokio::test]
async fn create_slot_appears_open_in_own_list() {
    let engine = open_engine("create_list");
    let t = tutor();
    let day = future_day();

    let id = engine
        .create_slot(t, at(day, 13, 0), SlotDuration::Min30)
        .await
        .unwrap();

    let slots = engine.slots_for_tutor(t).await;
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].id, id);
    assert_eq!(slots[0].start, at(day, 13, 0));
    assert!(!slots[0].booked);
}

#[tokio::test]
async fn create_slot_misaligned_start_rejected() {
    let engine = open_engine("create_misaligned");
    let day = future_day();
    let result = engine
        .create_slot(tutor(), at(day, 13, 15), SlotDuration::Min30)
        .await;
    assert!(matches!(result, Err(EngineError::InvalidInterval(_))));
}

#[tokio::test]
async fn create_slot_past_start_rejected() {
    let engine = open_engine("create_past");
    let yesterday = (Utc::now() - Duration::days(1)).date_naive();
    let result = engine
        .create_slot(tutor(), at(yesterday, 13, 0), SlotDuration::Min30)
        .await;
    assert!(matches!(result, Err(EngineError::InvalidInterval(_))));
}

#[tokio::test]
async fn create_slot_duplicate_start_conflicts() {
    let engine = open_engine("create_dup");
    let t = tutor();
    let start = at(future_day(), 13, 0);

    let first = engine.create_slot(t, start, SlotDuration::Min30).await.unwrap();
    let result = engine.create_slot(t, start, SlotDuration::Min60).await;
    assert!(matches!(result, Err(EngineError::Conflict(id)) if id == first));
}

#[tokio::test]
async fn create_slot_overlap_conflicts() {
    let engine = open_engine("create_overlap");
    let t = tutor();
    let day = future_day();

    let hour = engine
        .create_slot(t, at(day, 13, 0), SlotDuration::Min60)
        .await
        .unwrap();
    // [13:30, 14:00) sits inside [13:00, 14:00).
    let result = engine.create_slot(t, at(day, 13, 30), SlotDuration::Min30).await;
    assert!(matches!(result, Err(EngineError::Conflict(id)) if id == hour));
}

#[tokio::test]
async fn adjacent_slots_do_not_conflict() {
    let engine = open_engine("create_adjacent");
    let t = tutor();
    let day = future_day();

    assert_ok!(engine.create_slot(t, at(day, 13, 0), SlotDuration::Min30).await);
    assert_ok!(engine.create_slot(t, at(day, 13, 30), SlotDuration::Min30).await);
    assert_ok!(engine.create_slot(t, at(day, 12, 0), SlotDuration::Min60).await);
    assert_eq!(engine.slots_for_tutor(t).await.len(), 3);
}

#[tokio::test]
async fn different_tutors_may_share_a_start() {
    let engine = open_engine("create_two_tutors");
    let day = future_day();
    let start = at(day, 13, 0);

    assert_ok!(engine.create_slot(tutor(), start, SlotDuration::Min30).await);
    assert_ok!(engine.create_slot(tutor(), start, SlotDuration::Min30).await);
}

#[tokio::test]
async fn concurrent_overlapping_creates_single_winner() {
    let engine = std::sync::Arc::new(open_engine("create_race"));
    let t = tutor();
    let day = future_day();

    let (a, b) = tokio::join!(
        engine.create_slot(t, at(day, 13, 0), SlotDuration::Min60),
        engine.create_slot(t, at(day, 13, 30), SlotDuration::Min30),
    );
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    assert_eq!(engine.slots_for_tutor(t).await.len(), 1);
}

// ── Slot deletion ────────────────────────────────────────

#[tokio::test]
async fn delete_open_slot_removes_it() {
    let engine = open_engine("delete_open");
    let t = tutor();
    let id = engine
        .create_slot(t, at(future_day(), 13, 0), SlotDuration::Min30)
        .await
        .unwrap();

    assert_ok!(engine.delete_slot(t, id).await);
    assert!(engine.slots_for_tutor(t).await.is_empty());
    assert!(matches!(
        engine.delete_slot(t, id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn delete_by_non_owner_forbidden() {
    let engine = open_engine("delete_forbidden");
    let owner = tutor();
    let id = engine
        .create_slot(owner, at(future_day(), 13, 0), SlotDuration::Min30)
        .await
        .unwrap();

    assert!(matches!(
        engine.delete_slot(tutor(), id).await,
        Err(EngineError::Forbidden)
    ));
    assert_eq!(engine.slots_for_tutor(owner).await.len(), 1);
}

#[tokio::test]
async fn delete_booked_slot_protected_until_cancelled() {
    let engine = open_engine("delete_booked");
    let t = tutor();
    let s = student();
    let id = engine
        .create_slot(t, at(future_day(), 13, 0), SlotDuration::Min30)
        .await
        .unwrap();
    let res = engine.reserve_slot(s, id).await.unwrap();

    let result = engine.delete_slot(t, id).await;
    assert!(matches!(result, Err(EngineError::HasActiveBooking(blocked)) if blocked == id));
    // Slot and reservation both survive the rejected delete.
    assert_eq!(engine.slots_for_tutor(t).await.len(), 1);
    assert_eq!(engine.reservations_for_student(s).await.len(), 1);

    engine.cancel_reservation(s, res).await.unwrap();
    assert_ok!(engine.delete_slot(t, id).await);
    assert!(engine.slots_for_tutor(t).await.is_empty());
}

// ── Reserve / cancel ─────────────────────────────────────

#[tokio::test]
async fn reserve_flips_booked_and_second_attempt_fails() {
    let engine = open_engine("reserve_flip");
    let t = tutor();
    let id = engine
        .create_slot(t, at(future_day(), 13, 0), SlotDuration::Min30)
        .await
        .unwrap();

    let x = student();
    assert_ok!(engine.reserve_slot(x, id).await);
    assert!(engine.slots_for_tutor(t).await[0].booked);

    let result = engine.reserve_slot(student(), id).await;
    assert!(matches!(result, Err(EngineError::AlreadyBooked(b)) if b == id));
}

#[tokio::test]
async fn concurrent_reserves_exactly_one_winner() {
    let engine = std::sync::Arc::new(open_engine("reserve_race"));
    let id = engine
        .create_slot(tutor(), at(future_day(), 13, 0), SlotDuration::Min30)
        .await
        .unwrap();

    let x = student();
    let y = student();
    let (a, b) = tokio::join!(engine.reserve_slot(x, id), engine.reserve_slot(y, id));

    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(loser, Err(EngineError::AlreadyBooked(_))));

    // Exactly one reservation exists afterwards.
    let held = engine.reservations_for_student(x).await.len()
        + engine.reservations_for_student(y).await.len();
    assert_eq!(held, 1);
}

#[tokio::test]
async fn cancel_reverts_slot_to_open() {
    let engine = open_engine("cancel_reopen");
    let t = tutor();
    let s = student();
    let id = engine
        .create_slot(t, at(future_day(), 13, 0), SlotDuration::Min30)
        .await
        .unwrap();
    let res = engine.reserve_slot(s, id).await.unwrap();

    let freed = engine.cancel_reservation(s, res).await.unwrap();
    assert_eq!(freed, id);
    assert!(!engine.slots_for_tutor(t).await[0].booked);
    assert!(engine.reservations_for_student(s).await.is_empty());
    // Slot is reservable again.
    assert_ok!(engine.reserve_slot(student(), id).await);
}

#[tokio::test]
async fn cancel_by_other_student_forbidden() {
    let engine = open_engine("cancel_forbidden");
    let s = student();
    let id = engine
        .create_slot(tutor(), at(future_day(), 13, 0), SlotDuration::Min30)
        .await
        .unwrap();
    let res = engine.reserve_slot(s, id).await.unwrap();

    assert!(matches!(
        engine.cancel_reservation(student(), res).await,
        Err(EngineError::Forbidden)
    ));
    assert_eq!(engine.reservations_for_student(s).await.len(), 1);
}

#[tokio::test]
async fn unknown_ids_not_found() {
    let engine = open_engine("unknown_ids");
    assert!(matches!(
        engine.reserve_slot(student(), SlotId(Ulid::new())).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine.delete_slot(tutor(), SlotId(Ulid::new())).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine
            .cancel_reservation(student(), ReservationId(Ulid::new()))
            .await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Tutor availability ───────────────────────────────────

#[tokio::test]
async fn empty_calendar_offers_full_grid() {
    let engine = open_engine("avail_full_grid");
    let grid = engine
        .tutor_open_starts(tutor(), future_day(), SlotDuration::Min30)
        .await
        .unwrap();
    assert_eq!(grid.len(), 47); // 00:00 through 23:00
}

#[tokio::test]
async fn busy_half_hour_excluded_neighbors_kept() {
    let engine = open_engine("avail_neighbors");
    let t = tutor();
    let day = future_day();
    engine
        .create_slot(t, at(day, 14, 0), SlotDuration::Min30)
        .await
        .unwrap();

    let open = engine.tutor_open_starts(t, day, SlotDuration::Min30).await.unwrap();
    assert!(!open.contains(&at(day, 14, 0)));
    assert!(open.contains(&at(day, 13, 30)));
    assert!(open.contains(&at(day, 14, 30)));
    assert_eq!(open.len(), 46);
}

#[tokio::test]
async fn hour_request_drops_straddling_candidates() {
    let engine = open_engine("avail_hour");
    let t = tutor();
    let day = future_day();
    engine
        .create_slot(t, at(day, 14, 0), SlotDuration::Min30)
        .await
        .unwrap();

    let open = engine.tutor_open_starts(t, day, SlotDuration::Min60).await.unwrap();
    // Both 13:30 and 14:00 would cross the busy half hour.
    assert!(!open.contains(&at(day, 13, 30)));
    assert!(!open.contains(&at(day, 14, 0)));
    assert!(open.contains(&at(day, 13, 0)));
    assert!(open.contains(&at(day, 14, 30)));
}

#[tokio::test]
async fn availability_ignores_other_tutors_slots() {
    let engine = open_engine("avail_isolated");
    let day = future_day();
    engine
        .create_slot(tutor(), at(day, 14, 0), SlotDuration::Min30)
        .await
        .unwrap();

    let open = engine
        .tutor_open_starts(tutor(), day, SlotDuration::Min30)
        .await
        .unwrap();
    assert!(open.contains(&at(day, 14, 0)));
}

#[tokio::test]
async fn availability_past_day_rejected_for_both_roles() {
    let engine = open_engine("avail_past");
    let yesterday = (Utc::now() - Duration::days(1)).date_naive();
    assert!(matches!(
        engine
            .tutor_open_starts(tutor(), yesterday, SlotDuration::Min30)
            .await,
        Err(EngineError::InvalidDate)
    ));
    assert!(matches!(
        engine
            .student_open_starts(student(), yesterday, SlotDuration::Min30)
            .await,
        Err(EngineError::InvalidDate)
    ));
}

// ── Student availability ─────────────────────────────────

#[tokio::test]
async fn student_sees_open_slots_of_matching_duration() {
    let engine = open_engine("student_sees");
    let day = future_day();
    engine
        .create_slot(tutor(), at(day, 13, 0), SlotDuration::Min30)
        .await
        .unwrap();
    engine
        .create_slot(tutor(), at(day, 15, 0), SlotDuration::Min60)
        .await
        .unwrap();

    let open = engine
        .student_open_starts(student(), day, SlotDuration::Min30)
        .await
        .unwrap();
    assert_eq!(open, vec![at(day, 13, 0)]);
}

#[tokio::test]
async fn student_availability_dedups_across_tutors() {
    let engine = open_engine("student_dedup");
    let day = future_day();
    let start = at(day, 13, 0);
    engine.create_slot(tutor(), start, SlotDuration::Min30).await.unwrap();
    engine.create_slot(tutor(), start, SlotDuration::Min30).await.unwrap();

    let open = engine
        .student_open_starts(student(), day, SlotDuration::Min30)
        .await
        .unwrap();
    assert_eq!(open, vec![start]);
}

#[tokio::test]
async fn booked_slots_hidden_from_students() {
    let engine = open_engine("student_booked_hidden");
    let day = future_day();
    let id = engine
        .create_slot(tutor(), at(day, 13, 0), SlotDuration::Min30)
        .await
        .unwrap();
    engine.reserve_slot(student(), id).await.unwrap();

    let open = engine
        .student_open_starts(student(), day, SlotDuration::Min30)
        .await
        .unwrap();
    assert!(open.is_empty());
}

#[tokio::test]
async fn own_reservation_overlap_hides_other_tutors_slot() {
    let engine = open_engine("student_own_overlap");
    let day = future_day();

    // Student holds [13:00, 14:00) with tutor A.
    let s = student();
    let held = engine
        .create_slot(tutor(), at(day, 13, 0), SlotDuration::Min60)
        .await
        .unwrap();
    engine.reserve_slot(s, held).await.unwrap();

    // Tutor B offers [13:30, 14:00) and [14:00, 14:30).
    let b = tutor();
    engine.create_slot(b, at(day, 13, 30), SlotDuration::Min30).await.unwrap();
    engine.create_slot(b, at(day, 14, 0), SlotDuration::Min30).await.unwrap();

    let open = engine.student_open_starts(s, day, SlotDuration::Min30).await.unwrap();
    assert_eq!(open, vec![at(day, 14, 0)]);

    // Another student without the clash sees both.
    let other = engine
        .student_open_starts(student(), day, SlotDuration::Min30)
        .await
        .unwrap();
    assert_eq!(other, vec![at(day, 13, 30), at(day, 14, 0)]);
}

#[tokio::test]
async fn exact_instant_query_shares_eligibility_rules() {
    let engine = open_engine("exact_instant");
    let day = future_day();
    let s = student();

    // Held [13:00, 14:00) blocks the exact query at 13:30 too.
    let held = engine
        .create_slot(tutor(), at(day, 13, 0), SlotDuration::Min60)
        .await
        .unwrap();
    engine.reserve_slot(s, held).await.unwrap();

    let b = tutor();
    let clashing = engine
        .create_slot(b, at(day, 13, 30), SlotDuration::Min30)
        .await
        .unwrap();
    let free = engine
        .create_slot(b, at(day, 14, 0), SlotDuration::Min30)
        .await
        .unwrap();

    assert!(engine
        .reservable_slots_at(s, at(day, 13, 30), SlotDuration::Min30)
        .await
        .is_empty());

    let matches = engine
        .reservable_slots_at(s, at(day, 14, 0), SlotDuration::Min30)
        .await;
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].id, free);
    assert_ne!(matches[0].id, clashing);
    assert_eq!(matches[0].tutor, b);

    // Duration must match exactly.
    assert!(engine
        .reservable_slots_at(s, at(day, 14, 0), SlotDuration::Min60)
        .await
        .is_empty());
}

#[tokio::test]
async fn role_dispatch_selects_variant() {
    let engine = open_engine("role_dispatch");
    let day = future_day();
    let t = tutor();
    engine.create_slot(t, at(day, 13, 0), SlotDuration::Min30).await.unwrap();

    let as_tutor = engine
        .resolve_open_starts(Actor { id: t.0, role: Role::Tutor }, day, SlotDuration::Min30)
        .await
        .unwrap();
    assert!(!as_tutor.contains(&at(day, 13, 0)));

    let as_student = engine
        .resolve_open_starts(
            Actor { id: Ulid::new(), role: Role::Student },
            day,
            SlotDuration::Min30,
        )
        .await
        .unwrap();
    assert_eq!(as_student, vec![at(day, 13, 0)]);
}

// ── Listing ──────────────────────────────────────────────

#[tokio::test]
async fn reservation_list_sorted_by_slot_start() {
    let engine = open_engine("reservation_list");
    let day = future_day();
    let s = student();

    let late = engine
        .create_slot(tutor(), at(day, 15, 0), SlotDuration::Min30)
        .await
        .unwrap();
    let early = engine
        .create_slot(tutor(), at(day, 9, 0), SlotDuration::Min60)
        .await
        .unwrap();
    engine.reserve_slot(s, late).await.unwrap();
    engine.reserve_slot(s, early).await.unwrap();

    let held = engine.reservations_for_student(s).await;
    assert_eq!(held.len(), 2);
    assert_eq!(held[0].slot, early);
    assert_eq!(held[0].duration, SlotDuration::Min60);
    assert_eq!(held[1].slot, late);
}

#[tokio::test]
async fn display_timezone_conversion() {
    let mut config = test_config("display_tz");
    config.display_tz = chrono_tz::Tz::Asia__Seoul;
    let engine = Engine::open(&config).unwrap();

    let utc_noon = Utc.with_ymd_and_hms(2025, 6, 7, 12, 0, 0).unwrap();
    let local = engine.in_display_tz(utc_noon);
    assert_eq!(local.to_rfc3339(), "2025-06-07T21:00:00+09:00");
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn replay_restores_slots_and_booked_state() {
    let config = test_config("replay_restore");
    let t = tutor();
    let s = student();
    let day = future_day();

    let (open_id, booked_id) = {
        let engine = Engine::open(&config).unwrap();
        let open_id = engine
            .create_slot(t, at(day, 13, 0), SlotDuration::Min30)
            .await
            .unwrap();
        let booked_id = engine
            .create_slot(t, at(day, 14, 0), SlotDuration::Min60)
            .await
            .unwrap();
        engine.reserve_slot(s, booked_id).await.unwrap();
        // A deleted slot must not reappear.
        let gone = engine
            .create_slot(t, at(day, 16, 0), SlotDuration::Min30)
            .await
            .unwrap();
        engine.delete_slot(t, gone).await.unwrap();
        (open_id, booked_id)
    };

    let engine = Engine::open(&config).unwrap();
    let slots = engine.slots_for_tutor(t).await;
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0].id, open_id);
    assert!(!slots[0].booked);
    assert_eq!(slots[1].id, booked_id);
    assert!(slots[1].booked);

    // Reservation identity and student index survive replay.
    let held = engine.reservations_for_student(s).await;
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].slot, booked_id);
    assert!(matches!(
        engine.reserve_slot(student(), booked_id).await,
        Err(EngineError::AlreadyBooked(_))
    ));
}

#[tokio::test]
async fn cancelled_reservation_stays_cancelled_after_replay() {
    let config = test_config("replay_cancel");
    let t = tutor();
    let s = student();
    let day = future_day();

    let id = {
        let engine = Engine::open(&config).unwrap();
        let id = engine
            .create_slot(t, at(day, 13, 0), SlotDuration::Min30)
            .await
            .unwrap();
        let res = engine.reserve_slot(s, id).await.unwrap();
        engine.cancel_reservation(s, res).await.unwrap();
        id
    };

    let engine = Engine::open(&config).unwrap();
    let slots = engine.slots_for_tutor(t).await;
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].id, id);
    assert!(!slots[0].booked);
    assert!(engine.reservations_for_student(s).await.is_empty());
}

#[tokio::test]
async fn compaction_preserves_state() {
    let config = test_config("compact_state");
    let t = tutor();
    let s = student();
    let day = future_day();

    {
        let engine = Engine::open(&config).unwrap();
        let keep = engine
            .create_slot(t, at(day, 13, 0), SlotDuration::Min30)
            .await
            .unwrap();
        engine.reserve_slot(s, keep).await.unwrap();
        // Churn that compaction should erase from the log.
        for h in 15..20 {
            let id = engine
                .create_slot(t, at(day, h, 0), SlotDuration::Min30)
                .await
                .unwrap();
            engine.delete_slot(t, id).await.unwrap();
        }
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }

    let engine = Engine::open(&config).unwrap();
    let slots = engine.slots_for_tutor(t).await;
    assert_eq!(slots.len(), 1);
    assert!(slots[0].booked);
    assert_eq!(engine.reservations_for_student(s).await.len(), 1);
}

// ── End to end ───────────────────────────────────────────

#[tokio::test]
async fn booking_round_trip() {
    let engine = open_engine("round_trip");
    let t = tutor();
    let day = future_day();
    let start = at(day, 13, 0);

    // Tutor publishes a half-hour slot; it lists as open.
    let id = engine.create_slot(t, start, SlotDuration::Min30).await.unwrap();
    let listed = engine.slots_for_tutor(t).await;
    assert_eq!(listed[0].id, id);
    assert!(!listed[0].booked);

    // Student finds it in the day view and at the exact instant.
    let s = student();
    let open = engine.student_open_starts(s, day, SlotDuration::Min30).await.unwrap();
    assert!(open.contains(&start));
    let candidates = engine.reservable_slots_at(s, start, SlotDuration::Min30).await;
    assert_eq!(candidates[0].id, id);

    // Reserve: slot flips to booked and shows in the student's list.
    engine.reserve_slot(s, id).await.unwrap();
    assert!(engine.slots_for_tutor(t).await[0].booked);
    assert_eq!(engine.reservations_for_student(s).await[0].slot, id);

    // Gone from other students' views; a second reservation fails.
    let rival = student();
    let open = engine
        .student_open_starts(rival, day, SlotDuration::Min30)
        .await
        .unwrap();
    assert!(open.is_empty());
    assert!(matches!(
        engine.reserve_slot(rival, id).await,
        Err(EngineError::AlreadyBooked(_))
    ));
}
