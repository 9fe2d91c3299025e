// Grace-period state machine.
//
// New stores get a fee-free window after activation. A daily check walks
// every active store with a configured window and performs at most one of
// two transitions per store:
//   - window expired  -> flip platform_fees_active on (once, irreversibly)
//                        and send the activation notice
//   - 1-2 days left   -> send a single warning email, gated by
//                        grace_period_notification_sent
//
// Both transitions are compare-and-set at the repository, so a concurrent
// or repeated run cannot double-fire. Email failures are logged and never
// roll back the transition they were attached to.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::notify::Notifier;
use crate::stores::{Store, StoreRepository};

#[derive(Debug, Clone, Default, Serialize)]
pub struct GraceCheckSummary {
    pub evaluated: usize,
    pub warnings_sent: usize,
    pub fees_activated: usize,
    /// True when another run was already in progress and this one bailed
    pub skipped: bool,
}

pub struct GracePeriodService {
    stores: Arc<dyn StoreRepository>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    grace_period_days: i64,
    run_in_progress: AtomicBool,
}

impl GracePeriodService {
    pub fn new(
        stores: Arc<dyn StoreRepository>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        grace_period_days: i64,
    ) -> Self {
        Self {
            stores,
            notifier,
            clock,
            grace_period_days,
            run_in_progress: AtomicBool::new(false),
        }
    }

    /// One full pass over all active stores. Mutually exclusive: a pass
    /// that starts while another is running (a slow email call can stall a
    /// pass past the next tick) returns immediately with `skipped = true`.
    pub async fn run_check(&self) -> AppResult<GraceCheckSummary> {
        if self
            .run_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Grace-period check already running, skipping this pass");
            return Ok(GraceCheckSummary {
                skipped: true,
                ..Default::default()
            });
        }

        let result = self.run_check_inner().await;
        self.run_in_progress.store(false, Ordering::SeqCst);
        result
    }

    async fn run_check_inner(&self) -> AppResult<GraceCheckSummary> {
        let now = self.clock.now();
        let stores = self.stores.active_with_grace_period().await?;
        let mut summary = GraceCheckSummary::default();

        info!("Grace-period check: evaluating {} stores", stores.len());

        for store in stores {
            summary.evaluated += 1;
            if let Err(e) = self.evaluate_store(&store, now, &mut summary).await {
                // One broken store must not starve the rest of the pass
                error!("Grace-period evaluation failed for store {}: {}", store.id, e);
            }
        }

        info!(
            "Grace-period check done: {} evaluated, {} warnings, {} activations",
            summary.evaluated, summary.warnings_sent, summary.fees_activated
        );
        Ok(summary)
    }

    async fn evaluate_store(
        &self,
        store: &Store,
        now: DateTime<Utc>,
        summary: &mut GraceCheckSummary,
    ) -> AppResult<()> {
        let (start, end) = match (store.grace_period_start, store.grace_period_end) {
            (Some(start), Some(end)) => (start, end),
            _ => return Ok(()),
        };

        let in_grace = start <= now && now <= end;
        let days_remaining = days_remaining(end, now);

        if !in_grace && now > end && !store.platform_fees_active {
            if self.stores.activate_fees(store.id).await? {
                summary.fees_activated += 1;
                info!("Platform fees activated for store {} ({})", store.name, store.id);
                self.send_activation_notice(store).await;
            }
        } else if in_grace
            && (days_remaining == 1 || days_remaining == 2)
            && !store.grace_period_notification_sent
        {
            // Flag first: a delivery failure must not re-arm a duplicate
            // send on the next pass
            if self.stores.mark_notification_sent(store.id).await? {
                summary.warnings_sent += 1;
                self.send_warning(store, days_remaining).await;
            }
        }

        Ok(())
    }

    /// Set the grace window at store activation. Called exactly once per
    /// activation; re-running it resets the window and both flags.
    pub async fn initialize_grace_period(
        &self,
        store_id: Uuid,
        activation_date: DateTime<Utc>,
    ) -> AppResult<Store> {
        let end = activation_date + Duration::days(self.grace_period_days);
        let store = self
            .stores
            .initialize_grace_period(store_id, activation_date, end)
            .await?;
        info!(
            "Grace period initialized for store {}: {} -> {}",
            store_id, activation_date, end
        );
        Ok(store)
    }

    /// Manual override: re-send the warning email. Resets the idempotency
    /// flag only when `force_notification` is set.
    pub async fn force_send_warning(
        &self,
        store_id: Uuid,
        days_remaining: i64,
        force_notification: bool,
    ) -> AppResult<bool> {
        let store = self
            .stores
            .get(store_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("store {}", store_id)))?;

        if force_notification {
            info!("Operator forced warning resend for store {}", store_id);
            self.stores.reset_notification_flag(store_id).await?;
        }

        if !self.stores.mark_notification_sent(store_id).await? {
            return Ok(false);
        }

        self.send_warning(&store, days_remaining).await;
        Ok(true)
    }

    /// Manual override: activate fees ahead of (or after) the window.
    /// No-op when fees are already active; never re-sends the notice for
    /// an already-active store.
    pub async fn force_activate_fees(
        &self,
        store_id: Uuid,
        send_notification: bool,
    ) -> AppResult<bool> {
        let store = self
            .stores
            .get(store_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("store {}", store_id)))?;

        if !self.stores.activate_fees(store_id).await? {
            return Ok(false);
        }

        info!("Operator force-activated platform fees for store {}", store_id);
        if send_notification {
            self.send_activation_notice(&store).await;
        }
        Ok(true)
    }

    async fn send_warning(&self, store: &Store, days_remaining: i64) {
        let subject = format!(
            "Your fee-free period ends in {} day{}",
            days_remaining,
            if days_remaining == 1 { "" } else { "s" }
        );
        let body = format!(
            "Hi {},\n\nYour platform-fee grace period ends in {} day(s). \
             After that, the standard platform commission applies to new orders.",
            store.name, days_remaining
        );
        if let Err(e) = self.notifier.send_email(&store.email, &subject, &body).await {
            error!("Warning email for store {} failed: {}", store.id, e);
        }
    }

    async fn send_activation_notice(&self, store: &Store) {
        let body = format!(
            "Hi {},\n\nYour grace period has ended and platform fees are now \
             active for new orders.",
            store.name
        );
        if let Err(e) = self
            .notifier
            .send_email(&store.email, "Platform fees are now active", &body)
            .await
        {
            error!("Activation email for store {} failed: {}", store.id, e);
        }
    }
}

/// Whole days until `end`, rounded up, clamped to zero
pub fn days_remaining(end: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let seconds = (end - now).num_seconds();
    if seconds <= 0 {
        return 0;
    }
    (seconds + 86_399) / 86_400
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grace::clock::ManualClock;
    use crate::notify::mock::MockNotifier;
    use crate::stores::MemoryStoreRepository;
    use chrono::TimeZone;
    use std::sync::atomic::Ordering as AtomicOrdering;

    struct Fixture {
        stores: Arc<MemoryStoreRepository>,
        notifier: Arc<MockNotifier>,
        clock: Arc<ManualClock>,
        service: GracePeriodService,
        store_id: Uuid,
    }

    async fn fixture(start_offset_days: i64, window_days: i64) -> Fixture {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let stores = Arc::new(MemoryStoreRepository::new());
        let notifier = Arc::new(MockNotifier::new());
        let clock = Arc::new(ManualClock::at(now));
        let store_id = Uuid::new_v4();

        let mut store = MemoryStoreRepository::store(store_id, "acme");
        let start = now - Duration::days(start_offset_days);
        store.grace_period_start = Some(start);
        store.grace_period_end = Some(start + Duration::days(window_days));
        stores.insert(store).await;

        let service = GracePeriodService::new(
            stores.clone(),
            notifier.clone(),
            clock.clone(),
            window_days,
        );

        Fixture {
            stores,
            notifier,
            clock,
            service,
            store_id,
        }
    }

    #[test]
    fn test_days_remaining_rounds_up_and_clamps() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(days_remaining(now + Duration::hours(1), now), 1);
        assert_eq!(days_remaining(now + Duration::hours(25), now), 2);
        assert_eq!(days_remaining(now + Duration::days(2), now), 2);
        assert_eq!(days_remaining(now, now), 0);
        assert_eq!(days_remaining(now - Duration::days(3), now), 0);
    }

    #[tokio::test]
    async fn test_warning_at_two_days_sent_exactly_once() {
        // 58 days into a 60-day window: 2 days remaining
        let f = fixture(58, 60).await;

        let summary = f.service.run_check().await.unwrap();
        assert_eq!(summary.warnings_sent, 1);

        // Same day, second pass: suppressed by the flag
        let summary = f.service.run_check().await.unwrap();
        assert_eq!(summary.warnings_sent, 0);
        assert_eq!(f.notifier.sent_count().await, 1);

        // Next day (1 day remaining): still suppressed
        f.clock.advance(Duration::days(1));
        let summary = f.service.run_check().await.unwrap();
        assert_eq!(summary.warnings_sent, 0);
        assert_eq!(f.notifier.sent_count().await, 1);
    }

    #[tokio::test]
    async fn test_fee_activation_fires_once_and_is_monotone() {
        // Window already expired
        let f = fixture(61, 60).await;

        let summary = f.service.run_check().await.unwrap();
        assert_eq!(summary.fees_activated, 1);
        assert_eq!(f.notifier.sent_count().await, 1);

        let store = f.stores.get(f.store_id).await.unwrap().unwrap();
        assert!(store.platform_fees_active);

        // Re-running on an already-active store is a no-op
        for _ in 0..3 {
            f.clock.advance(Duration::days(1));
            let summary = f.service.run_check().await.unwrap();
            assert_eq!(summary.fees_activated, 0);
        }
        assert_eq!(f.notifier.sent_count().await, 1);

        let store = f.stores.get(f.store_id).await.unwrap().unwrap();
        assert!(store.platform_fees_active);
    }

    #[tokio::test]
    async fn test_email_failure_does_not_block_activation_or_rearm() {
        let f = fixture(61, 60).await;
        f.notifier.fail_sends.store(true, AtomicOrdering::SeqCst);

        let summary = f.service.run_check().await.unwrap();
        assert_eq!(summary.fees_activated, 1);

        // Fees flipped despite the failed email
        let store = f.stores.get(f.store_id).await.unwrap().unwrap();
        assert!(store.platform_fees_active);

        // Delivery recovers, but no duplicate activation notice goes out
        f.notifier.fail_sends.store(false, AtomicOrdering::SeqCst);
        f.service.run_check().await.unwrap();
        assert_eq!(f.notifier.sent_count().await, 0);
    }

    #[tokio::test]
    async fn test_mid_window_store_is_untouched() {
        let f = fixture(10, 60).await;

        let summary = f.service.run_check().await.unwrap();
        assert_eq!(summary.evaluated, 1);
        assert_eq!(summary.warnings_sent, 0);
        assert_eq!(summary.fees_activated, 0);

        let store = f.stores.get(f.store_id).await.unwrap().unwrap();
        assert!(!store.platform_fees_active);
        assert!(!store.grace_period_notification_sent);
    }

    #[tokio::test]
    async fn test_initialize_grace_period_sets_window_and_resets_flags() {
        let f = fixture(61, 60).await;
        f.service.run_check().await.unwrap();

        let activation = f.clock.now();
        let store = f
            .service
            .initialize_grace_period(f.store_id, activation)
            .await
            .unwrap();

        assert_eq!(store.grace_period_start, Some(activation));
        assert_eq!(
            store.grace_period_end,
            Some(activation + Duration::days(60))
        );
        assert!(!store.platform_fees_active);
        assert!(!store.grace_period_notification_sent);
    }

    #[tokio::test]
    async fn test_force_resend_requires_explicit_flag() {
        let f = fixture(58, 60).await;
        f.service.run_check().await.unwrap();
        assert_eq!(f.notifier.sent_count().await, 1);

        // Without force: flag already set, nothing sent
        let sent = f
            .service
            .force_send_warning(f.store_id, 2, false)
            .await
            .unwrap();
        assert!(!sent);
        assert_eq!(f.notifier.sent_count().await, 1);

        // With force: flag reset and one more email goes out
        let sent = f
            .service
            .force_send_warning(f.store_id, 2, true)
            .await
            .unwrap();
        assert!(sent);
        assert_eq!(f.notifier.sent_count().await, 2);
    }

    /// Notifier that parks inside send_email until released, so a test can
    /// hold one pass open while issuing another
    #[derive(Default)]
    struct StallingNotifier {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl Notifier for StallingNotifier {
        async fn send_email(&self, _to: &str, _subject: &str, _body: &str) -> AppResult<()> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_check_started_during_running_pass_is_skipped() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let stores = Arc::new(MemoryStoreRepository::new());
        let notifier = Arc::new(StallingNotifier::default());
        let clock = Arc::new(ManualClock::at(now));
        let store_id = Uuid::new_v4();

        // Expired window: the pass will try to send the activation notice
        let mut store = MemoryStoreRepository::store(store_id, "acme");
        let start = now - Duration::days(61);
        store.grace_period_start = Some(start);
        store.grace_period_end = Some(start + Duration::days(60));
        stores.insert(store).await;

        let service = Arc::new(GracePeriodService::new(
            stores.clone(),
            notifier.clone(),
            clock,
            60,
        ));

        let first = {
            let service = service.clone();
            tokio::spawn(async move { service.run_check().await })
        };
        // First pass is now parked inside the email, still holding the guard
        notifier.entered.notified().await;

        let second = service.run_check().await.unwrap();
        assert!(second.skipped);
        assert_eq!(second.evaluated, 0);

        notifier.release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(!first.skipped);
        assert_eq!(first.fees_activated, 1);

        // The store was transitioned exactly once across both calls
        let store = stores.get(store_id).await.unwrap().unwrap();
        assert!(store.platform_fees_active);
    }

    #[tokio::test]
    async fn test_force_activate_is_noop_when_already_active() {
        let f = fixture(61, 60).await;
        f.service.run_check().await.unwrap();

        let flipped = f
            .service
            .force_activate_fees(f.store_id, true)
            .await
            .unwrap();
        assert!(!flipped);
        // Only the original activation notice exists
        assert_eq!(f.notifier.sent_count().await, 1);
    }
}
