//! End-to-end behaviour of the engine over the in-memory store

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, TimeDelta, TimeZone, Utc};
use pretty_assertions::assert_eq;
use sendgate_common::{
    BucketKey, Clock, Domain, Identity, IdentityId, ManualClock, Priority, RateLimitConfig,
    RateLimitConfigPatch, RetryConfig, TenantId, UsageIncrement, WarmupStatus,
};
use sendgate_quota::{
    DistributionStrategy, Engine, EngineConfig, FailureReason, SendRequest, SendStatus,
    SharedRng, StrategyKind, TimeRange,
};
use sendgate_store::{MemoryStore, QuotaStore, TestStore};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 14, 0, 0).unwrap()
}

fn warmed(id: &str) -> Identity {
    Identity::new(id, "acme", start() - TimeDelta::days(120), WarmupStatus::Completed)
}

fn fresh(id: &str) -> Identity {
    Identity::new(id, "acme", start() - TimeDelta::days(1), WarmupStatus::NotStarted)
}

struct Harness {
    store: TestStore,
    clock: Arc<ManualClock>,
    engine: Engine,
}

fn harness(identities: impl IntoIterator<Item = Identity>) -> Harness {
    let store = TestStore::new(MemoryStore::with_identities(identities));
    let clock = Arc::new(ManualClock::new(start()));
    let backend = Arc::new(store.clone());
    let engine = Engine::builder(backend.clone(), backend)
        .clock(clock.clone())
        .rng(SharedRng::seeded(17))
        .config(EngineConfig::default())
        .build();

    Harness {
        store,
        clock,
        engine,
    }
}

fn gmail() -> Domain {
    Domain::new("gmail.com")
}

/// Replay `count` sends spread through the early hours of the current day
async fn seed_usage(store: &TestStore, identity: &IdentityId, count: u32, to_gmail: u32) {
    let midnight = Utc.with_ymd_and_hms(2025, 3, 10, 0, 10, 0).unwrap();
    let utc = FixedOffset::east_opt(0).unwrap();

    for i in 0..count {
        let at = midnight + TimeDelta::minutes(i64::from(i) * 10);
        let domain = if i < to_gmail { gmail() } else { Domain::new("yahoo.com") };
        store
            .upsert_usage(
                identity,
                &UsageIncrement {
                    key: BucketKey::at(at, utc),
                    domain,
                    at,
                    burst_window: TimeDelta::minutes(10),
                },
            )
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_near_daily_limit_then_exhausted() {
    let h = harness([warmed("id-1")]);
    let id = IdentityId::new("id-1");
    seed_usage(&h.store, &id, 49, 5).await;

    let quota = h.engine.check_quota(&id, &gmail(), Priority::Normal).await;
    assert_eq!(quota.daily_remaining, 1);
    assert_eq!(quota.domain_remaining, 5);
    assert!(quota.is_available);
    assert_eq!(quota.next_available_slot, start());

    h.engine.record_send(&id, &gmail(), true, None).await;

    let quota = h.engine.check_quota(&id, &gmail(), Priority::Normal).await;
    assert_eq!(quota.daily_remaining, 0);
    assert!(!quota.is_available);
    assert_eq!(
        quota.next_available_slot,
        Utc.with_ymd_and_hms(2025, 3, 11, 9, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn test_retry_until_exhausted() {
    let h = harness([warmed("id-1")]);
    let policy = RetryConfig {
        jitter: false,
        ..RetryConfig::default()
    };
    let mut request = SendRequest::new(gmail(), Priority::Normal, start());

    request.mark_attempted();
    let decision = h.engine.schedule_retry(&mut request, "TIMEOUT", Some(&policy));
    assert!(decision.should_retry);
    assert_eq!(decision.retry_at, Some(start() + TimeDelta::milliseconds(5000)));

    for _ in 0..2 {
        request.mark_attempted();
        assert!(h.engine.schedule_retry(&mut request, "TIMEOUT", Some(&policy)).should_retry);
    }

    request.mark_attempted();
    let decision = h.engine.schedule_retry(&mut request, "TIMEOUT", Some(&policy));
    assert!(!decision.should_retry);
    assert!(decision.final_failure);
    assert_eq!(decision.reason, Some(FailureReason::RetriesExhausted));
    assert_eq!(request.status, SendStatus::Failed);
}

#[tokio::test]
async fn test_non_retryable_error() {
    let h = harness([warmed("id-1")]);
    let mut request = SendRequest::new(gmail(), Priority::High, start());

    let decision = h
        .engine
        .schedule_retry(&mut request, "INVALID_RECIPIENT", None);

    assert!(!decision.should_retry);
    assert!(decision.final_failure);
    assert_eq!(decision.reason, Some(FailureReason::NonRetryable));
}

#[tokio::test]
async fn test_retry_uses_identity_policy() {
    let h = harness([warmed("id-1")]);
    let id = IdentityId::new("id-1");
    let patch = RateLimitConfigPatch {
        retry: Some(RetryConfig {
            max_attempts: 1,
            jitter: false,
            ..RetryConfig::default()
        }),
        ..RateLimitConfigPatch::default()
    };
    h.engine.update_config(&id, &patch).await.unwrap();

    let mut request = SendRequest::new(gmail(), Priority::Normal, start());
    assert!(h.engine.schedule_retry_for(&id, &mut request, "TIMEOUT").await.should_retry);

    let decision = h.engine.schedule_retry_for(&id, &mut request, "TIMEOUT").await;
    assert_eq!(decision.reason, Some(FailureReason::RetriesExhausted));
}

#[tokio::test]
async fn test_priority_strategy_selects_highest() {
    let h = harness([warmed("A"), warmed("B")]);
    let strategy = DistributionStrategy::new(StrategyKind::Priority)
        .with_priority("A", 1)
        .with_priority("B", 5);

    let selected = h
        .engine
        .select_identity(&TenantId::new("acme"), &gmail(), &strategy, Priority::Normal)
        .await
        .unwrap();

    assert_eq!(selected.identity, IdentityId::new("B"));
    assert_eq!(selected.scheduled_for, None);
}

#[tokio::test]
async fn test_recording_invalidates_cached_quota() {
    let h = harness([warmed("id-1")]);
    let id = IdentityId::new("id-1");

    let before = h.engine.check_quota(&id, &gmail(), Priority::Normal).await;
    assert_eq!(h.engine.cache().len(), 1);

    h.engine.record_send(&id, &gmail(), false, Some("TIMEOUT")).await;
    assert!(h.engine.cache().is_empty());

    let after = h.engine.check_quota(&id, &gmail(), Priority::Normal).await;
    assert_eq!(after.daily_remaining, before.daily_remaining - 1);
    assert_eq!(after.hourly_remaining, before.hourly_remaining - 1);
    assert_eq!(after.domain_remaining, before.domain_remaining - 1);
}

#[tokio::test]
async fn test_cache_serves_until_ttl() {
    let h = harness([warmed("id-1")]);
    let id = IdentityId::new("id-1");

    let first = h.engine.check_quota(&id, &gmail(), Priority::Normal).await;

    // A write behind the engine's back is only seen once the entry expires
    seed_usage(&h.store, &id, 3, 0).await;
    h.clock.advance(TimeDelta::minutes(4));
    let cached = h.engine.check_quota(&id, &gmail(), Priority::Normal).await;
    assert_eq!(cached, first);

    h.clock.advance(TimeDelta::minutes(1));
    let recomputed = h.engine.check_quota(&id, &gmail(), Priority::Normal).await;
    assert_eq!(recomputed.daily_remaining, first.daily_remaining - 3);
}

#[tokio::test]
async fn test_burst_across_hour_triggers_cooldown() {
    let h = harness([fresh("id-1")]);
    let id = IdentityId::new("id-1");
    h.clock.set(start() - TimeDelta::minutes(2));

    for domain in ["a.com", "b.com", "c.com"] {
        h.engine.record_send(&id, &Domain::new(domain), true, None).await;
        h.clock.advance(TimeDelta::minutes(1));
    }

    // Sends at 13:58, 13:59 and 14:00 form one burst of three
    let quota = h.engine.check_quota(&id, &gmail(), Priority::Normal).await;
    assert!(!quota.is_available);
    assert_eq!(quota.burst_available, 0);
    let cooldown_end = start() + TimeDelta::minutes(15);
    assert_eq!(quota.cooldown_until, Some(cooldown_end));
    assert_eq!(quota.next_available_slot, cooldown_end);

    h.clock.set(cooldown_end + TimeDelta::seconds(1));
    let quota = h.engine.check_quota(&id, &gmail(), Priority::Normal).await;
    assert!(quota.is_available);
    assert_eq!(quota.burst_available, 3);
    assert_eq!(quota.daily_remaining, 12);
}

#[tokio::test]
async fn test_oversized_cooldown_keeps_identity_paused() {
    let h = harness([warmed("id-1")]);
    let id = IdentityId::new("id-1");
    let mut config = h.engine.get_config(&id).await.unwrap();
    config.burst_limit = 1;
    config.cooldown_secs = 100_000_000_000_000_000;
    h.store.put_config(&id, config).await.unwrap();

    h.engine.record_send(&id, &gmail(), true, None).await;
    let quota = h.engine.check_quota(&id, &gmail(), Priority::Normal).await;

    assert!(!quota.is_available);
    assert!(!quota.fail_closed);
    assert_eq!(quota.burst_available, 0);
    assert_eq!(quota.cooldown_until, Some(DateTime::<Utc>::MAX_UTC));
}

#[tokio::test]
async fn test_store_failure_fails_closed() {
    let h = harness([warmed("id-1")]);
    let id = IdentityId::new("id-1");
    h.store.fail_usage_reads(true);

    let quota = h.engine.check_quota(&id, &gmail(), Priority::High).await;

    assert!(quota.fail_closed);
    assert!(!quota.is_available);
    assert_eq!(quota.daily_remaining, 0);
    assert_eq!(quota.next_available_slot, start() + TimeDelta::hours(1));

    // Fail-closed quotas are not cached
    h.store.fail_usage_reads(false);
    assert!(h.engine.check_quota(&id, &gmail(), Priority::High).await.is_available);
}

#[tokio::test]
async fn test_unknown_identity_fails_closed() {
    let h = harness(Vec::<Identity>::new());
    let quota = h
        .engine
        .check_quota(&IdentityId::new("ghost"), &gmail(), Priority::Normal)
        .await;
    assert!(quota.fail_closed);
}

#[tokio::test]
async fn test_all_unavailable_defers_to_earliest() {
    let h = harness([warmed("A"), warmed("B")]);
    let a = IdentityId::new("A");
    let b = IdentityId::new("B");

    // A is out for the day, B only for the hour
    h.engine
        .update_config(&a, &RateLimitConfigPatch { daily_limit: Some(1), ..Default::default() })
        .await
        .unwrap();
    h.engine
        .update_config(&b, &RateLimitConfigPatch { hourly_limit: Some(1), ..Default::default() })
        .await
        .unwrap();
    h.engine.record_send(&a, &gmail(), true, None).await;
    h.engine.record_send(&b, &gmail(), true, None).await;

    let selected = h
        .engine
        .select_identity(
            &TenantId::new("acme"),
            &gmail(),
            &DistributionStrategy::default(),
            Priority::Normal,
        )
        .await
        .unwrap();

    assert_eq!(selected.identity, b);
    assert_eq!(
        selected.scheduled_for,
        Some(Utc.with_ymd_and_hms(2025, 3, 10, 15, 0, 0).unwrap())
    );
    assert!(!selected.quota.is_available);
}

#[tokio::test]
async fn test_update_config_rejects_and_keeps_limits() {
    let h = harness([warmed("id-1")]);
    let id = IdentityId::new("id-1");
    let before = h.engine.get_config(&id).await.unwrap();

    let err = h
        .engine
        .update_config(
            &id,
            &RateLimitConfigPatch {
                hourly_limit: Some(0),
                cooldown_secs: Some(30),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(err.to_string().contains("hourly_limit"));
    assert!(err.to_string().contains("cooldown_secs"));
    assert_eq!(h.engine.get_config(&id).await.unwrap(), before);
}

#[tokio::test]
async fn test_update_config_takes_effect_immediately() {
    let h = harness([warmed("id-1")]);
    let id = IdentityId::new("id-1");

    let quota = h.engine.check_quota(&id, &gmail(), Priority::Normal).await;
    assert_eq!(quota.daily_remaining, 50);

    h.engine
        .update_config(&id, &RateLimitConfigPatch { daily_limit: Some(80), ..Default::default() })
        .await
        .unwrap();

    let quota = h.engine.check_quota(&id, &gmail(), Priority::Normal).await;
    assert_eq!(quota.daily_remaining, 80);
}

#[tokio::test]
async fn test_warmup_caps_new_identity() {
    let h = harness([fresh("id-1")]);
    let id = IdentityId::new("id-1");

    let config: RateLimitConfig = h.engine.get_config(&id).await.unwrap();
    assert!(config.warmup_mode);
    assert_eq!(config.effective_daily_limit(), config.daily_limit.min(15));

    let quota = h.engine.check_quota(&id, &gmail(), Priority::Low).await;
    assert_eq!(quota.daily_remaining, 15);
}

#[tokio::test]
async fn test_stats_reflect_recorded_sends() {
    let h = harness([warmed("id-1"), warmed("id-2")]);
    let id = IdentityId::new("id-1");

    h.engine.record_send(&id, &gmail(), true, None).await;
    h.clock.advance(TimeDelta::minutes(1));
    h.engine.record_send(&id, &Domain::new("yahoo.com"), false, Some("SERVER_ERROR")).await;
    h.clock.advance(TimeDelta::minutes(1));

    let stats = h
        .engine
        .get_stats(&TenantId::new("acme"), TimeRange::last(TimeDelta::hours(1), h.clock.now()))
        .await;

    assert_eq!(stats.total_attempts, 2);
    assert_eq!(stats.identities.len(), 2);
    assert_eq!(stats.identities[0].failures, 1);
    assert_eq!(stats.identities[0].domains, 2);
    assert_eq!(stats.identities[1].attempts, 0);
}
