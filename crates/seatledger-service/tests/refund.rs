//! Refund integration tests.

mod common;

use chrono::{Duration, Utc};

use common::TestHarness;
use seatledger_core::{
    BuyerId, CourseId, PurchaseOutcome, RefundIneligibility, RefundOutcome, RefundPolicy,
    RevokeOutcome,
};

async fn bought(harness: &TestHarness, course_id: CourseId) -> BuyerId {
    let buyer_id = BuyerId::generate();
    let outcome = harness.state.enrollment.purchase(course_id, buyer_id).await;
    assert!(outcome.is_success(), "purchase failed: {outcome:?}");
    buyer_id
}

// ============================================================================
// Eligibility
// ============================================================================

#[tokio::test]
async fn refund_restores_seat_and_allows_repurchase() {
    let harness = TestHarness::new();
    let course_id = harness.create_course(1).await;
    let buyer_id = bought(&harness, course_id).await;

    let RefundOutcome::Success(receipt) = harness.state.refunds.refund(course_id, buyer_id).await
    else {
        panic!("refund should succeed");
    };
    assert_eq!(receipt.seats_remaining, 1);
    assert!(receipt.record.refunded);
    assert!(!harness
        .state
        .enrollment
        .has_active_purchase(course_id, buyer_id)
        .await
        .unwrap());

    assert!(harness
        .state
        .enrollment
        .purchase(course_id, buyer_id)
        .await
        .is_success());
    let records = harness.purchase_records(course_id, buyer_id).await;
    assert_eq!(records.len(), 2);
    assert_eq!(records.iter().filter(|r| r.is_active()).count(), 1);
}

#[tokio::test]
async fn refund_without_purchase_is_not_found() {
    let harness = TestHarness::new();
    let course_id = harness.create_course(1).await;

    let outcome = harness
        .state
        .refunds
        .refund(course_id, BuyerId::generate())
        .await;

    assert_eq!(outcome, RefundOutcome::NotFound);
    assert_eq!(outcome.code(), "not_found");
}

#[tokio::test]
async fn refund_after_window_is_not_eligible() {
    let harness = TestHarness::new();
    let course_id = harness
        .create_course_with(
            2,
            Utc::now() - Duration::days(3),
            RefundPolicy {
                window_seconds: Duration::days(1).num_seconds(),
                max_attended_sessions: 5,
            },
        )
        .await;
    let buyer_id = bought(&harness, course_id).await;

    let outcome = harness.state.refunds.refund(course_id, buyer_id).await;

    assert!(matches!(
        outcome,
        RefundOutcome::NotEligible(RefundIneligibility::WindowElapsed { .. })
    ));
    assert_eq!(harness.seats_remaining(course_id).await, 1);
    assert!(harness
        .state
        .enrollment
        .has_active_purchase(course_id, buyer_id)
        .await
        .unwrap());
}

#[tokio::test]
async fn refund_inside_window_after_start_succeeds() {
    let harness = TestHarness::new();
    let course_id = harness
        .create_course_with(1, Utc::now() - Duration::hours(1), RefundPolicy::default())
        .await;
    let buyer_id = bought(&harness, course_id).await;

    assert!(harness
        .state
        .refunds
        .refund(course_id, buyer_id)
        .await
        .is_success());
}

#[tokio::test]
async fn attendance_blocks_refund() {
    let harness = TestHarness::new();
    let course_id = harness.create_course(2).await;
    let buyer_id = bought(&harness, course_id).await;

    harness
        .store
        .record_attendance(&course_id, &buyer_id)
        .await
        .unwrap();

    let outcome = harness.state.refunds.refund(course_id, buyer_id).await;

    assert_eq!(
        outcome,
        RefundOutcome::NotEligible(RefundIneligibility::AttendanceExceeded {
            attended: 1,
            limit: 1
        })
    );
    assert_eq!(harness.seats_remaining(course_id).await, 1);
}

// ============================================================================
// Refund Status
// ============================================================================

#[tokio::test]
async fn revoked_purchase_cannot_be_refunded() {
    let harness = TestHarness::new();
    let course_id = harness.create_course(2).await;
    let buyer_id = bought(&harness, course_id).await;
    let refunds = &harness.state.refunds;

    assert_eq!(
        refunds.revoke_refundable(course_id, buyer_id).await,
        RevokeOutcome::Revoked
    );
    assert_eq!(
        refunds.revoke_refundable(course_id, buyer_id).await,
        RevokeOutcome::AlreadyNonRefundable
    );
    assert_eq!(
        refunds.revoke_refundable(course_id, BuyerId::generate()).await,
        RevokeOutcome::NotFound
    );

    assert_eq!(
        refunds.refund(course_id, buyer_id).await,
        RefundOutcome::NotEligible(RefundIneligibility::NotRefundable)
    );
    assert_eq!(harness.seats_remaining(course_id).await, 1);
}

// ============================================================================
// Reversibility
// ============================================================================

#[tokio::test]
async fn purchase_then_refund_restores_prior_count() {
    let harness = TestHarness::new();
    let course_id = harness.create_course(4).await;
    bought(&harness, course_id).await;
    let before = harness.seats_remaining(course_id).await;

    let buyer_id = bought(&harness, course_id).await;
    assert_eq!(harness.seats_remaining(course_id).await, before - 1);

    assert!(harness
        .state
        .refunds
        .refund(course_id, buyer_id)
        .await
        .is_success());
    assert_eq!(harness.seats_remaining(course_id).await, before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn refunds_and_purchases_interleave_safely() {
    let harness = TestHarness::new();
    let course_id = harness.create_course(3).await;
    let holders = [
        bought(&harness, course_id).await,
        bought(&harness, course_id).await,
        bought(&harness, course_id).await,
    ];

    let mut tasks = Vec::new();
    for buyer_id in holders {
        let refunds = harness.state.refunds.clone();
        tasks.push(tokio::spawn(async move {
            refunds.refund(course_id, buyer_id).await.is_success()
        }));
    }
    for _ in 0..6 {
        let enrollment = harness.state.enrollment.clone();
        tasks.push(tokio::spawn(async move {
            matches!(
                enrollment.purchase(course_id, BuyerId::generate()).await,
                PurchaseOutcome::Success(_)
            )
        }));
    }

    let results: Vec<bool> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    let (refunded, purchased) = results.split_at(3);

    assert!(refunded.iter().all(|ok| *ok));
    let purchased = purchased.iter().filter(|ok| **ok).count();
    let remaining = harness.seats_remaining(course_id).await;
    assert!(purchased <= 3);
    assert_eq!(remaining, 3 - i32::try_from(purchased).unwrap());
}
