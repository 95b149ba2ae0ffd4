//! Engine-level tests over the in-process store with a manual clock

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_test::{assert_err, assert_ok};

use pustaka_server::{
    config::CirculationConfig,
    error::{AppError, CirculationError},
    models::{
        reservation::CreateReservation, BorrowRecordQuery, BorrowStatus, CatalogItem,
        CreateCatalogItem, NotificationKind, Reservation, ReservationStatus,
    },
    repository::memory::MemoryStore,
    services::{
        clock::{Clock, ManualClock},
        engine::EngineContext,
        events::{CirculationEvent, EventBus},
        policy::{CirculationPolicy, EngineTuning, PolicyHandle, UpdateCirculationPolicy},
        Services,
    },
};

const STAFF: i32 = 900;
const ALICE: i32 = 1;
const BUDI: i32 = 2;
const CITRA: i32 = 3;
const DEWI: i32 = 4;

struct Harness {
    services: Services,
    clock: Arc<ManualClock>,
    policy: PolicyHandle,
    events: UnboundedReceiver<CirculationEvent>,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(start()));
    let (bus, events) = EventBus::new();
    let policy = PolicyHandle::new(CirculationPolicy::from(&CirculationConfig::default()));
    let ctx = EngineContext::new(
        Arc::new(MemoryStore::new()),
        clock.clone(),
        policy.clone(),
        bus,
        EngineTuning {
            lock_timeout: StdDuration::from_millis(500),
            retry_attempts: 3,
            retry_base_backoff: StdDuration::from_millis(1),
        },
    );
    Harness {
        services: Services::new(ctx, None),
        clock,
        policy,
        events,
    }
}

impl Harness {
    async fn item(&self, copies: i32) -> CatalogItem {
        self.services
            .catalog
            .create_item(
                CreateCatalogItem {
                    title: "Cantik Itu Luka".to_string(),
                    total_copies: copies,
                },
                STAFF,
            )
            .await
            .unwrap()
    }

    async fn reserve(&self, borrower_id: i32, item_id: i32) -> Result<Reservation, AppError> {
        self.services
            .reservations
            .enqueue(
                CreateReservation {
                    item_id,
                    borrower_id: Some(borrower_id),
                },
                borrower_id,
            )
            .await
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn drain(&mut self) -> Vec<CirculationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Bounds, conservation and queue contiguity for one item
    async fn assert_invariants(&self, item_id: i32) {
        let item = self.services.catalog.get_item(item_id).await.unwrap();
        assert!(item.available_copies >= 0 && item.available_copies <= item.total_copies);

        let (records, _) = self
            .services
            .circulation
            .list(&BorrowRecordQuery {
                item_id: Some(item_id),
                per_page: Some(200),
                ..Default::default()
            })
            .await
            .unwrap();
        let open = records.iter().filter(|r| r.is_open()).count() as i32;
        assert_eq!(item.total_copies - item.available_copies, open);

        let positions: Vec<i32> = self
            .services
            .reservations
            .item_queue(item_id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.queue_position)
            .collect();
        assert_eq!(positions, (1..=positions.len() as i32).collect::<Vec<_>>());
    }
}

fn rejection(err: AppError) -> CirculationError {
    match err {
        AppError::Circulation(e) => e,
        other => panic!("expected a circulation rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn borrow_takes_one_copy_with_default_due_date() {
    let h = harness();
    let item = h.item(3).await;

    let record = h.services.circulation.borrow(ALICE, item.id, None, ALICE).await.unwrap();

    assert_eq!(record.status, BorrowStatus::Active);
    assert_eq!(record.borrowed_at, start());
    assert_eq!(record.due_at, start() + Duration::days(14));
    assert_eq!(h.services.catalog.get_item(item.id).await.unwrap().available_copies, 2);
    h.assert_invariants(item.id).await;
}

#[tokio::test]
async fn late_return_charges_every_started_day() {
    let h = harness();
    let item = h.item(3).await;
    let record = h.services.circulation.borrow(ALICE, item.id, None, ALICE).await.unwrap();

    h.clock.advance(Duration::days(20));
    let returned = h.services.circulation.return_item(record.id, STAFF).await.unwrap();

    assert_eq!(returned.status, BorrowStatus::Returned);
    assert_eq!(returned.returned_at, Some(start() + Duration::days(20)));
    assert_eq!(returned.fine_amount, Decimal::new(6000, 0));
    assert_eq!(returned.processed_by, Some(STAFF));
    assert_eq!(h.services.catalog.get_item(item.id).await.unwrap().available_copies, 3);
    h.assert_invariants(item.id).await;
}

#[tokio::test]
async fn one_minute_late_costs_a_full_day() {
    let h = harness();
    let item = h.item(1).await;
    let due_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    h.clock.set(due_at - Duration::days(7));

    let record = h
        .services
        .circulation
        .borrow(ALICE, item.id, Some(due_at), ALICE)
        .await
        .unwrap();
    h.clock.set(due_at + Duration::minutes(1));
    let returned = h.services.circulation.return_item(record.id, STAFF).await.unwrap();

    assert_eq!(returned.fine_amount, Decimal::new(1000, 0));
}

#[tokio::test]
async fn return_hands_the_copy_to_the_first_waiter() {
    let mut h = harness();
    let item = h.item(1).await;
    let loan = h.services.circulation.borrow(ALICE, item.id, None, ALICE).await.unwrap();

    let reservation = h.reserve(BUDI, item.id).await.unwrap();
    assert_eq!(reservation.queue_position, 1);
    assert_eq!(reservation.status, ReservationStatus::Waiting);
    h.drain();

    h.services.circulation.return_item(loan.id, STAFF).await.unwrap();

    let held = h.services.reservations.get(reservation.id).await.unwrap();
    assert_eq!(held.status, ReservationStatus::Fulfillable);
    assert_eq!(held.notified_at, Some(start()));

    let notified: Vec<_> = h
        .drain()
        .iter()
        .filter_map(|e| e.notification())
        .collect();
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].recipient_id, BUDI);
    assert_eq!(notified[0].kind, NotificationKind::ReservationFulfillable);

    // The copy is on the shelf but earmarked for Budi
    let err = h.services.circulation.borrow(DEWI, item.id, None, DEWI).await.unwrap_err();
    assert_eq!(rejection(err), CirculationError::ItemUnavailable { item_id: item.id });

    h.services.circulation.borrow(BUDI, item.id, None, BUDI).await.unwrap();
    let completed = h.services.reservations.get(reservation.id).await.unwrap();
    assert_eq!(completed.status, ReservationStatus::Completed);
    assert_eq!(h.services.catalog.get_item(item.id).await.unwrap().available_copies, 0);
    h.assert_invariants(item.id).await;
}

#[tokio::test]
async fn cancelling_a_fulfillable_hold_promotes_the_next_waiter() {
    let h = harness();
    let item = h.item(1).await;
    let loan = h.services.circulation.borrow(ALICE, item.id, None, ALICE).await.unwrap();
    let budi = h.reserve(BUDI, item.id).await.unwrap();
    let citra = h.reserve(CITRA, item.id).await.unwrap();
    assert_eq!(citra.queue_position, 2);

    h.services.circulation.return_item(loan.id, STAFF).await.unwrap();
    let citra_now = h.services.reservations.get(citra.id).await.unwrap();
    assert_eq!(citra_now.status, ReservationStatus::Waiting);
    assert_eq!(citra_now.queue_position, 1);

    let cancelled = h.services.reservations.cancel(budi.id, BUDI, false).await.unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);

    let citra_now = h.services.reservations.get(citra.id).await.unwrap();
    assert_eq!(citra_now.status, ReservationStatus::Fulfillable);
    assert_eq!(citra_now.queue_position, 1);
    h.assert_invariants(item.id).await;
}

#[tokio::test]
async fn unavailable_item_can_be_reserved_instead() {
    let h = harness();
    let item = h.item(1).await;
    h.services.circulation.borrow(ALICE, item.id, None, ALICE).await.unwrap();

    let err = h.services.circulation.borrow(BUDI, item.id, None, BUDI).await.unwrap_err();
    assert_eq!(rejection(err), CirculationError::ItemUnavailable { item_id: item.id });

    let reservation = h.reserve(BUDI, item.id).await.unwrap();
    assert_eq!(reservation.queue_position, 1);
}

#[tokio::test]
async fn reserving_an_available_item_is_rejected() {
    let h = harness();
    let item = h.item(2).await;

    let err = h.reserve(BUDI, item.id).await.unwrap_err();
    assert_eq!(rejection(err), CirculationError::ItemAvailable { item_id: item.id });
}

#[tokio::test]
async fn second_return_is_rejected_without_side_effects() {
    let h = harness();
    let item = h.item(2).await;
    let record = h.services.circulation.borrow(ALICE, item.id, None, ALICE).await.unwrap();
    let first = h.services.circulation.return_item(record.id, STAFF).await.unwrap();

    h.clock.advance(Duration::days(30));
    let err = h.services.circulation.return_item(record.id, STAFF).await.unwrap_err();
    assert_eq!(rejection(err), CirculationError::AlreadyReturned { record_id: record.id });

    assert_eq!(h.services.circulation.get(record.id).await.unwrap(), first);
    assert_eq!(h.services.catalog.get_item(item.id).await.unwrap().available_copies, 2);
}

#[tokio::test]
async fn one_open_loan_per_borrower_and_item() {
    let h = harness();
    let item = h.item(3).await;
    h.services.circulation.borrow(ALICE, item.id, None, ALICE).await.unwrap();

    let err = h.services.circulation.borrow(ALICE, item.id, None, ALICE).await.unwrap_err();
    assert_eq!(
        rejection(err),
        CirculationError::DuplicateActiveLoan {
            borrower_id: ALICE,
            item_id: item.id
        }
    );
    h.assert_invariants(item.id).await;
}

#[tokio::test]
async fn one_live_reservation_per_borrower_and_item() {
    let h = harness();
    let item = h.item(1).await;
    h.services.circulation.borrow(ALICE, item.id, None, ALICE).await.unwrap();
    h.reserve(BUDI, item.id).await.unwrap();

    let err = h.reserve(BUDI, item.id).await.unwrap_err();
    assert_eq!(
        rejection(err),
        CirculationError::DuplicateReservation {
            borrower_id: BUDI,
            item_id: item.id
        }
    );

    let err = h.reserve(ALICE, item.id).await.unwrap_err();
    assert!(matches!(rejection(err), CirculationError::DuplicateActiveLoan { .. }));
}

#[tokio::test]
async fn cancelling_a_waiter_closes_the_gap() {
    let h = harness();
    let item = h.item(1).await;
    h.services.circulation.borrow(ALICE, item.id, None, ALICE).await.unwrap();
    let budi = h.reserve(BUDI, item.id).await.unwrap();
    let citra = h.reserve(CITRA, item.id).await.unwrap();
    let dewi = h.reserve(DEWI, item.id).await.unwrap();

    h.services.reservations.cancel(citra.id, STAFF, true).await.unwrap();

    let queue = h.services.reservations.item_queue(item.id).await.unwrap();
    let order: Vec<(i32, i32)> = queue.iter().map(|r| (r.id, r.queue_position)).collect();
    assert_eq!(order, vec![(budi.id, 1), (dewi.id, 2)]);

    // Requeueing lands at the back
    let again = h.reserve(CITRA, item.id).await.unwrap();
    assert_eq!(again.queue_position, 3);
    h.assert_invariants(item.id).await;
}

#[tokio::test]
async fn only_the_holder_or_staff_may_cancel() {
    let h = harness();
    let item = h.item(1).await;
    h.services.circulation.borrow(ALICE, item.id, None, ALICE).await.unwrap();
    let budi = h.reserve(BUDI, item.id).await.unwrap();

    let err = h.services.reservations.cancel(budi.id, CITRA, false).await.unwrap_err();
    assert!(matches!(rejection(err), CirculationError::NotReservationHolder { .. }));

    h.services.reservations.cancel(budi.id, BUDI, false).await.unwrap();
    let err = h.services.reservations.cancel(budi.id, BUDI, false).await.unwrap_err();
    assert_eq!(
        rejection(err),
        CirculationError::ReservationNotActive {
            reservation_id: budi.id
        }
    );
}

#[tokio::test]
async fn loan_limit_spans_items() {
    let h = harness();
    for _ in 0..3 {
        let item = h.item(1).await;
        h.services.circulation.borrow(ALICE, item.id, None, ALICE).await.unwrap();
    }
    let fourth = h.item(1).await;

    let err = h.services.circulation.borrow(ALICE, fourth.id, None, ALICE).await.unwrap_err();
    assert_eq!(
        rejection(err),
        CirculationError::MaxLoansReached {
            borrower_id: ALICE,
            max: 3
        }
    );
    assert_eq!(h.services.catalog.get_item(fourth.id).await.unwrap().available_copies, 1);
}

#[tokio::test]
async fn due_date_must_fall_within_the_maximum_loan() {
    let h = harness();
    let item = h.item(1).await;

    let too_late = start() + Duration::days(31);
    let err = h
        .services
        .circulation
        .borrow(ALICE, item.id, Some(too_late), ALICE)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let in_the_past = start() - Duration::hours(1);
    let err = h
        .services
        .circulation
        .borrow(ALICE, item.id, Some(in_the_past), ALICE)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let record = h
        .services
        .circulation
        .borrow(ALICE, item.id, Some(start() + Duration::days(30)), ALICE)
        .await
        .unwrap();
    assert_eq!(record.due_at, start() + Duration::days(30));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_borrows_of_the_last_copy() {
    let h = harness();
    let item = h.item(1).await;

    let first = {
        let services = h.services.clone();
        tokio::spawn(async move { services.circulation.borrow(ALICE, item.id, None, ALICE).await })
    };
    let second = {
        let services = h.services.clone();
        tokio::spawn(async move { services.circulation.borrow(BUDI, item.id, None, BUDI).await })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.into_iter().find_map(|r| r.err()).unwrap();
    assert_eq!(rejection(loser), CirculationError::ItemUnavailable { item_id: item.id });
    h.assert_invariants(item.id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_concurrent_borrowers_never_overdraw() {
    let h = harness();
    let item = h.item(3).await;

    let mut tasks = Vec::new();
    for borrower in 100..110 {
        let services = h.services.clone();
        tasks.push(tokio::spawn(async move {
            services.circulation.borrow(borrower, item.id, None, borrower).await
        }));
    }
    let mut granted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => granted += 1,
            Err(e) => assert!(matches!(rejection(e), CirculationError::ItemUnavailable { .. })),
        }
    }

    assert_eq!(granted, 3);
    assert_eq!(h.services.catalog.get_item(item.id).await.unwrap().available_copies, 0);
    h.assert_invariants(item.id).await;
}

#[tokio::test]
async fn overdue_is_derived_and_cached_by_the_sweep() {
    let mut h = harness();
    let item = h.item(1).await;
    let record = h.services.circulation.borrow(ALICE, item.id, None, ALICE).await.unwrap();

    h.clock.advance(Duration::days(15));
    assert_eq!(h.services.circulation.get(record.id).await.unwrap().status, BorrowStatus::Overdue);
    h.drain();

    let report = h.services.sweeper.sweep_once().await.unwrap();
    assert_eq!(report.marked_overdue, 1);
    let notified: Vec<_> = h.drain().iter().filter_map(|e| e.notification()).collect();
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].kind, NotificationKind::LoanOverdue);

    let (overdue, total) = h
        .services
        .circulation
        .list(&BorrowRecordQuery {
            status: Some(BorrowStatus::Overdue),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(overdue[0].id, record.id);

    let again = h.services.sweeper.sweep_once().await.unwrap();
    assert_eq!(again.marked_overdue, 0);

    let returned = h.services.circulation.return_item(record.id, STAFF).await.unwrap();
    assert_eq!(returned.status, BorrowStatus::Returned);
}

#[tokio::test]
async fn expired_hold_passes_to_the_next_waiter() {
    let h = harness();
    let item = h.item(1).await;
    let loan = h.services.circulation.borrow(ALICE, item.id, None, ALICE).await.unwrap();
    let budi = h.reserve(BUDI, item.id).await.unwrap();
    let citra = h.reserve(CITRA, item.id).await.unwrap();
    h.services.circulation.return_item(loan.id, STAFF).await.unwrap();

    h.clock.advance(Duration::hours(47));
    assert_eq!(h.services.sweeper.sweep_once().await.unwrap().expired_holds, 0);

    h.clock.advance(Duration::hours(2));
    let report = h.services.sweeper.sweep_once().await.unwrap();
    assert_eq!(report.expired_holds, 1);

    assert_eq!(
        h.services.reservations.get(budi.id).await.unwrap().status,
        ReservationStatus::Cancelled
    );
    let citra_now = h.services.reservations.get(citra.id).await.unwrap();
    assert_eq!(citra_now.status, ReservationStatus::Fulfillable);
    assert_eq!(citra_now.notified_at, Some(start() + Duration::hours(49)));
    h.assert_invariants(item.id).await;
}

#[tokio::test]
async fn fines_are_settled_once() {
    let h = harness();
    let item = h.item(2).await;
    let late = h.services.circulation.borrow(ALICE, item.id, None, ALICE).await.unwrap();
    let on_time = h.services.circulation.borrow(BUDI, item.id, None, BUDI).await.unwrap();

    let err = h.services.circulation.settle_fine(late.id, STAFF).await.unwrap_err();
    assert!(matches!(rejection(err), CirculationError::FineNotOutstanding { .. }));

    h.services.circulation.return_item(on_time.id, STAFF).await.unwrap();
    h.clock.advance(Duration::days(16));
    h.services.circulation.return_item(late.id, STAFF).await.unwrap();

    let err = h.services.circulation.settle_fine(on_time.id, STAFF).await.unwrap_err();
    assert!(matches!(rejection(err), CirculationError::FineNotOutstanding { .. }));

    let settled = h.services.circulation.settle_fine(late.id, STAFF).await.unwrap();
    assert!(settled.fine_settled);
    assert_eq!(settled.fine_amount, Decimal::new(2000, 0));

    let err = h.services.circulation.settle_fine(late.id, STAFF).await.unwrap_err();
    assert!(matches!(rejection(err), CirculationError::FineNotOutstanding { .. }));
}

#[tokio::test]
async fn policy_changes_only_affect_later_operations() {
    let h = harness();
    let item = h.item(2).await;
    let first = h.services.circulation.borrow(ALICE, item.id, None, ALICE).await.unwrap();
    h.clock.advance(Duration::days(15));
    let closed = h.services.circulation.return_item(first.id, STAFF).await.unwrap();
    assert_eq!(closed.fine_amount, Decimal::new(1000, 0));

    h.services
        .settings
        .update(
            UpdateCirculationPolicy {
                per_day_rate: Some(Decimal::new(2500, 0)),
                default_loan_days: Some(7),
                ..Default::default()
            },
            STAFF,
        )
        .await
        .unwrap();

    assert_eq!(h.services.circulation.get(first.id).await.unwrap().fine_amount, Decimal::new(1000, 0));

    let second = h.services.circulation.borrow(BUDI, item.id, None, BUDI).await.unwrap();
    assert_eq!(second.due_at, h.now() + Duration::days(7));
    h.clock.advance(Duration::days(8));
    let closed = h.services.circulation.return_item(second.id, STAFF).await.unwrap();
    assert_eq!(closed.fine_amount, Decimal::new(2500, 0));
}

#[tokio::test]
async fn added_copies_go_to_the_queue_first() {
    let h = harness();
    let item = h.item(1).await;
    h.services.circulation.borrow(ALICE, item.id, None, ALICE).await.unwrap();
    let budi = h.reserve(BUDI, item.id).await.unwrap();

    let adjusted = h.services.catalog.adjust_total_copies(item.id, 2, STAFF).await.unwrap();
    assert_eq!(adjusted.available_copies, 1);
    assert_eq!(
        h.services.reservations.get(budi.id).await.unwrap().status,
        ReservationStatus::Fulfillable
    );

    // Neither the loaned copy nor the held one can be removed
    let err = assert_err!(h.services.catalog.adjust_total_copies(item.id, 1, STAFF).await);
    assert!(matches!(err, AppError::Validation(_)));
    let err = assert_err!(h.services.catalog.adjust_total_copies(item.id, 0, STAFF).await);
    assert!(matches!(err, AppError::Validation(_)));

    assert_ok!(h.services.catalog.adjust_total_copies(item.id, 4, STAFF).await);
    assert_eq!(h.services.catalog.get_item(item.id).await.unwrap().available_copies, 3);
    h.assert_invariants(item.id).await;
}

#[tokio::test]
async fn item_with_open_loans_cannot_be_deleted() {
    let h = harness();
    let item = h.item(1).await;
    let loan = h.services.circulation.borrow(ALICE, item.id, None, ALICE).await.unwrap();
    let budi = h.reserve(BUDI, item.id).await.unwrap();

    let err = h.services.catalog.delete_item(item.id, STAFF).await.unwrap_err();
    assert_eq!(
        rejection(err),
        CirculationError::ItemHasOpenLoans {
            item_id: item.id,
            open_loans: 1
        }
    );

    h.services.circulation.return_item(loan.id, STAFF).await.unwrap();
    assert_ok!(h.services.catalog.delete_item(item.id, STAFF).await);

    assert!(matches!(
        h.services.catalog.get_item(item.id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        h.services.reservations.get(budi.id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        h.services.circulation.borrow(CITRA, item.id, None, CITRA).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn out_of_range_policy_is_reported_not_panicked() {
    let h = harness();
    let item = h.item(1).await;

    let err = h
        .services
        .settings
        .update(
            UpdateCirculationPolicy {
                default_loan_days: Some(100_000_000),
                max_borrow_duration_days: Some(100_000_000),
                ..Default::default()
            },
            STAFF,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(h.services.settings.get().default_loan_days, 14);

    // A policy that bypassed validation still fails cleanly
    h.policy.replace(CirculationPolicy {
        default_loan_days: i64::MAX / 2,
        max_borrow_duration_days: i64::MAX / 2,
        grace_window_hours: i64::MAX / 2,
        ..CirculationPolicy::from(&CirculationConfig::default())
    });
    let err = h.services.circulation.borrow(ALICE, item.id, None, ALICE).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    let err = h.services.sweeper.sweep_once().await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(h.services.catalog.get_item(item.id).await.unwrap().available_copies, 1);
}
