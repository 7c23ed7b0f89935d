// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for Billing System
//!
//! Tests boundary conditions and races in:
//! - Charging around paid work (no overspend, no charge on failure)
//! - Credits and idempotent webhook delivery
//! - Daily reward cooldown
//! - Admin adjustments

#[cfg(test)]
mod charge_tests {
    use crate::ledger::*;
    use crate::memory::MemoryLedger;
    use crate::BillingError;
    use pointgate_shared::{MemoryAccounts, Privilege, UserId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn setup(balance: i64) -> (Arc<MemoryLedger>, UserId) {
        let accounts = Arc::new(MemoryAccounts::new());
        let user = accounts.seed("ada", balance, Privilege::Ordinary).unwrap();
        (Arc::new(MemoryLedger::new(accounts)), user)
    }

    // =========================================================================
    // Happy path: 10 points, price 5 -> 5 left, work result returned
    // =========================================================================
    #[tokio::test]
    async fn test_successful_work_commits_debit() {
        let (ledger, user) = setup(10);

        let charged = charge_and_run(ledger.as_ref(), user, 5, || async {
            Ok::<_, &str>("artifact")
        })
        .await
        .unwrap();

        assert_eq!(charged.outcome, "artifact");
        assert_eq!(charged.balance, 5);
        assert_eq!(ledger.balance(user).await.unwrap(), 5);
    }

    // =========================================================================
    // Insufficient: 3 points, price 5 -> rejected, work never runs
    // =========================================================================
    #[tokio::test]
    async fn test_insufficient_balance_skips_work() {
        let (ledger, user) = setup(3);
        let calls = AtomicUsize::new(0);

        let result = charge_and_run(ledger.as_ref(), user, 5, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(())
        })
        .await;

        assert!(matches!(
            result,
            Err(ChargeError::Ledger(BillingError::InsufficientBalance {
                balance: 3,
                price: 5
            }))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(ledger.balance(user).await.unwrap(), 3);
    }

    // =========================================================================
    // Exact balance: 5 points, price 5 -> allowed, 0 left
    // =========================================================================
    #[tokio::test]
    async fn test_exact_balance_is_enough() {
        let (ledger, user) = setup(5);

        let charged = charge_and_run(ledger.as_ref(), user, 5, || async { Ok::<_, &str>(()) })
            .await
            .unwrap();

        assert_eq!(charged.balance, 0);
    }

    // =========================================================================
    // Failed work: debit rolled back, reported balance is the original
    // =========================================================================
    #[tokio::test]
    async fn test_failed_work_leaves_balance_untouched() {
        let (ledger, user) = setup(10);

        let result = charge_and_run(ledger.as_ref(), user, 5, || async {
            Err::<(), _>("provider down")
        })
        .await;

        match result {
            Err(ChargeError::Work { error, balance }) => {
                assert_eq!(error, "provider down");
                assert_eq!(balance, 10);
            }
            other => panic!("expected work failure, got {other:?}"),
        }
        assert_eq!(ledger.balance(user).await.unwrap(), 10);
    }

    // =========================================================================
    // Zero price still runs the full path
    // =========================================================================
    #[tokio::test]
    async fn test_zero_price_runs_work() {
        let (ledger, user) = setup(0);

        let charged = charge_and_run(ledger.as_ref(), user, 0, || async { Ok::<_, &str>(42) })
            .await
            .unwrap();

        assert_eq!(charged.outcome, 42);
        assert_eq!(charged.balance, 0);
    }

    #[tokio::test]
    async fn test_negative_price_is_rejected() {
        let (ledger, user) = setup(10);

        let result = charge_and_run(ledger.as_ref(), user, -1, || async { Ok::<_, &str>(()) }).await;

        assert!(matches!(
            result,
            Err(ChargeError::Ledger(BillingError::InvalidAmount(_)))
        ));
        assert_eq!(ledger.balance(user).await.unwrap(), 10);
    }

    // =========================================================================
    // Concurrency: 10 points, 5 parallel calls at price 3 -> exactly 3 succeed
    // =========================================================================
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_never_overspend() {
        let (ledger, user) = setup(10);
        let barrier = Arc::new(tokio::sync::Barrier::new(5));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let ledger = ledger.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    charge_and_run(ledger.as_ref(), user, 3, || async {
                        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                        Ok::<_, &str>(())
                    })
                    .await
                    .is_ok()
                })
            })
            .collect();

        let successes = futures::future::join_all(handles)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();

        assert_eq!(successes, 3);
        assert_eq!(ledger.balance(user).await.unwrap(), 1);
    }

    // =========================================================================
    // Cancellation: dropping the call mid-work releases the hold
    // =========================================================================
    #[tokio::test]
    async fn test_dropped_call_leaves_balance_untouched() {
        let (ledger, user) = setup(10);

        let call = charge_and_run(ledger.as_ref(), user, 5, || async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok::<_, &str>(())
        });
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(20), call).await;

        assert!(timed_out.is_err());
        assert_eq!(ledger.balance(user).await.unwrap(), 10);

        // the row lock went with the dropped future
        let hold = ledger.hold(user, 10).await.unwrap();
        hold.release().await;
    }
}

#[cfg(test)]
mod credit_tests {
    use crate::ledger::*;
    use crate::memory::MemoryLedger;
    use crate::BillingError;
    use pointgate_shared::{MemoryAccounts, Privilege, UserId};
    use std::sync::Arc;

    fn setup(balance: i64) -> (MemoryLedger, UserId) {
        let accounts = Arc::new(MemoryAccounts::new());
        let user = accounts.seed("ada", balance, Privilege::Ordinary).unwrap();
        (MemoryLedger::new(accounts), user)
    }

    #[tokio::test]
    async fn test_idempotent_credit_applies_once() {
        let (ledger, user) = setup(0);

        let first = ledger
            .credit(user, 100, CreditEntry::idempotent("purchase", "cs_test_1"))
            .await
            .unwrap();
        let second = ledger
            .credit(user, 100, CreditEntry::idempotent("purchase", "cs_test_1"))
            .await
            .unwrap();

        assert_eq!(first, CreditOutcome::Applied { balance: 100 });
        assert_eq!(second, CreditOutcome::Duplicate);
        assert_eq!(ledger.balance(user).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_credits_without_key_always_apply() {
        let (ledger, user) = setup(0);

        ledger.credit(user, 5, CreditEntry::new("gift")).await.unwrap();
        ledger.credit(user, 5, CreditEntry::new("gift")).await.unwrap();

        assert_eq!(ledger.balance(user).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_non_positive_credit_rejected() {
        let (ledger, user) = setup(0);

        for points in [0, -5] {
            let result = ledger.credit(user, points, CreditEntry::new("gift")).await;
            assert!(matches!(result, Err(BillingError::InvalidAmount(_))));
        }
    }

    #[tokio::test]
    async fn test_admin_adjust_never_goes_negative() {
        let (ledger, user) = setup(10);

        assert_eq!(ledger.adjust(user, -4, "refund").await.unwrap(), 6);
        let overdraw = ledger.adjust(user, -7, "mistake").await;

        assert!(matches!(overdraw, Err(BillingError::InvalidAmount(_))));
        assert_eq!(ledger.balance(user).await.unwrap(), 6);
        assert_eq!(ledger.adjust(user, -6, "zero out").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_adjust_of_zero_rejected() {
        let (ledger, user) = setup(10);
        assert!(matches!(
            ledger.adjust(user, 0, "noop").await,
            Err(BillingError::InvalidAmount(_))
        ));
    }
}

#[cfg(test)]
mod reward_tests {
    use crate::ledger::Ledger;
    use crate::memory::MemoryLedger;
    use crate::rewards::{RewardService, REWARD_COOLDOWN};
    use crate::BillingError;
    use pointgate_shared::{
        default_document, MemoryAccounts, MemorySettingsRepository, Privilege, SettingsStore,
    };
    use std::sync::Arc;
    use time::{Duration, OffsetDateTime};

    fn service(balance: i64) -> (RewardService, Arc<MemoryLedger>, pointgate_shared::UserId) {
        let accounts = Arc::new(MemoryAccounts::new());
        let user = accounts.seed("ada", balance, Privilege::Ordinary).unwrap();
        let ledger = Arc::new(MemoryLedger::new(accounts));
        let settings = Arc::new(SettingsStore::new(Arc::new(
            MemorySettingsRepository::with_document(default_document()),
        )));
        (RewardService::new(ledger.clone(), settings), ledger, user)
    }

    #[tokio::test]
    async fn test_first_claim_credits_daily_points() {
        let (rewards, _, user) = service(0);
        let now = OffsetDateTime::now_utc();

        let claim = rewards.claim_daily(user, now).await.unwrap();

        assert_eq!(claim.balance, 5);
        assert_eq!(claim.next_claim_at, now + REWARD_COOLDOWN);
    }

    #[tokio::test]
    async fn test_second_claim_within_cooldown_rejected() {
        let (rewards, ledger, user) = service(0);
        let now = OffsetDateTime::now_utc();

        rewards.claim_daily(user, now).await.unwrap();
        let again = rewards.claim_daily(user, now + Duration::hours(23)).await;

        match again {
            Err(BillingError::RewardOnCooldown { next_claim_at }) => {
                assert_eq!(next_claim_at, now + REWARD_COOLDOWN)
            }
            other => panic!("expected cooldown, got {other:?}"),
        }
        assert_eq!(ledger.balance(user).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_claim_after_cooldown_succeeds() {
        let (rewards, _, user) = service(0);
        let now = OffsetDateTime::now_utc();

        rewards.claim_daily(user, now).await.unwrap();
        let claim = rewards.claim_daily(user, now + REWARD_COOLDOWN).await.unwrap();

        assert_eq!(claim.balance, 10);
    }
}

#[cfg(test)]
mod webhook_tests {
    use crate::ledger::Ledger;
    use crate::memory::MemoryLedger;
    use crate::webhooks::{sign_payload, WebhookHandler, WebhookOutcome};
    use crate::BillingError;
    use pointgate_shared::{MemoryAccounts, Privilege, UserId};
    use serde_json::json;
    use std::sync::Arc;
    use time::OffsetDateTime;

    const SECRET: &str = "whsec_edge_case";

    fn setup() -> (WebhookHandler, Arc<MemoryLedger>, UserId) {
        let accounts = Arc::new(MemoryAccounts::new());
        let user = accounts.seed("ada", 0, Privilege::Ordinary).unwrap();
        let ledger = Arc::new(MemoryLedger::new(accounts));
        (
            WebhookHandler::new(ledger.clone(), SECRET.to_string()),
            ledger,
            user,
        )
    }

    fn checkout_event(event_type: &str, session_id: &str, status: &str, user: UserId) -> String {
        json!({
            "id": format!("evt_{session_id}"),
            "type": event_type,
            "data": { "object": {
                "id": session_id,
                "object": "checkout.session",
                "payment_status": status,
                "metadata": { "user_id": user.to_string(), "package_id": "starter", "points": "100" }
            }}
        })
        .to_string()
    }

    fn signed(payload: &str) -> String {
        let t = OffsetDateTime::now_utc().unix_timestamp();
        format!("t={t},v1={}", sign_payload(payload, SECRET, t).unwrap())
    }

    // =========================================================================
    // Stripe retries delivery: the same session credits exactly once
    // =========================================================================
    #[tokio::test]
    async fn test_duplicate_delivery_credits_once() {
        let (handler, ledger, user) = setup();
        let payload = checkout_event("checkout.session.completed", "cs_1", "paid", user);

        let first = handler.verify_event(&payload, &signed(&payload)).unwrap();
        let second = handler.verify_event(&payload, &signed(&payload)).unwrap();

        assert_eq!(
            handler.handle_event(first).await.unwrap(),
            WebhookOutcome::Credited {
                user_id: user,
                points: 100,
                balance: 100
            }
        );
        assert_eq!(
            handler.handle_event(second).await.unwrap(),
            WebhookOutcome::Duplicate
        );
        assert_eq!(ledger.balance(user).await.unwrap(), 100);
    }

    // =========================================================================
    // Completed-then-async-succeeded for the same session credits once
    // =========================================================================
    #[tokio::test]
    async fn test_async_success_after_unpaid_completion() {
        let (handler, ledger, user) = setup();
        let unpaid = checkout_event("checkout.session.completed", "cs_2", "unpaid", user);
        let paid = checkout_event("checkout.session.async_payment_succeeded", "cs_2", "paid", user);

        let event = handler.verify_event(&unpaid, &signed(&unpaid)).unwrap();
        assert_eq!(
            handler.handle_event(event).await.unwrap(),
            WebhookOutcome::AwaitingPayment
        );

        let event = handler.verify_event(&paid, &signed(&paid)).unwrap();
        assert!(matches!(
            handler.handle_event(event).await.unwrap(),
            WebhookOutcome::Credited { points: 100, .. }
        ));
        assert_eq!(ledger.balance(user).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_unrelated_events_are_ignored() {
        let (handler, ledger, user) = setup();
        let payload = json!({
            "id": "evt_x",
            "type": "invoice.paid",
            "data": { "object": { "id": "in_1" } }
        })
        .to_string();

        let event = handler.verify_event(&payload, &signed(&payload)).unwrap();

        assert_eq!(
            handler.handle_event(event).await.unwrap(),
            WebhookOutcome::Ignored
        );
        assert_eq!(ledger.balance(user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bad_signature_rejected_before_parsing() {
        let (handler, _, user) = setup();
        let payload = checkout_event("checkout.session.completed", "cs_3", "paid", user);
        let t = OffsetDateTime::now_utc().unix_timestamp();
        let forged = format!("t={t},v1={}", "ab".repeat(32));

        assert!(matches!(
            handler.verify_event(&payload, &forged),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[tokio::test]
    async fn test_missing_metadata_is_a_payload_error() {
        let (handler, _, _) = setup();
        let payload = json!({
            "id": "evt_y",
            "type": "checkout.session.completed",
            "data": { "object": { "id": "cs_4", "payment_status": "paid", "metadata": {} } }
        })
        .to_string();

        let event = handler.verify_event(&payload, &signed(&payload)).unwrap();

        assert!(matches!(
            handler.handle_event(event).await,
            Err(BillingError::WebhookPayload(_))
        ));
    }
}
