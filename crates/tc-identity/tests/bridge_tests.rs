//! Inbound billing event tests

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use tc_identity::collaborators::{BillingClient, MemorySettingsService};
use tc_identity::events::{EventBridge, HandleOutcome};
use tc_identity::tenant::{MemoryTenantRepository, TenantProvisioningService, TenantRepository};
use tc_identity::{CacheLayer, Result, Tenant};
use tc_queue::{MemoryQueue, QueueConsumer};

struct NoPlan;

#[async_trait]
impl BillingClient for NoPlan {
    async fn free_tier_plan_id(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

struct Harness {
    bridge: Arc<EventBridge>,
    provisioning: Arc<TenantProvisioningService>,
    repo: MemoryTenantRepository,
    settings: MemorySettingsService,
}

fn harness() -> Harness {
    let repo = MemoryTenantRepository::new();
    let settings = MemorySettingsService::new();
    let provisioning = Arc::new(TenantProvisioningService::new(
        Arc::new(repo.clone()),
        CacheLayer::in_memory(),
        Arc::new(NoPlan),
        Arc::new(settings.clone()),
    ));
    let bridge = Arc::new(EventBridge::new(
        provisioning.clone(),
        Arc::new(settings.clone()),
    ));
    Harness {
        bridge,
        provisioning,
        repo,
        settings,
    }
}

async fn acme(h: &Harness) -> Tenant {
    h.provisioning
        .create_tenant("Acme", "acme.test", None)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_plan_switched_for_unknown_tenant_is_dropped() {
    let h = harness();
    let body = br#"{"tenantId":"missing","action":"plan_switched","planId":"plan_pro","timestamp":"2024-01-01T00:00:00Z"}"#;
    assert_eq!(h.bridge.handle_message(body).await, HandleOutcome::Dropped);
    assert!(h.repo.is_empty());
}

#[tokio::test]
async fn test_plan_switched_updates_plan() {
    let h = harness();
    let tenant = acme(&h).await;
    let body = format!(
        r#"{{"tenantId":"{}","action":"plan_switched","planId":"plan_pro"}}"#,
        tenant.id
    );

    assert_eq!(h.bridge.handle_message(body.as_bytes()).await, HandleOutcome::Applied);
    let stored = h.repo.find_by_id(&tenant.id).await.unwrap().unwrap();
    assert_eq!(stored.plan_id.as_deref(), Some("plan_pro"));
    assert_eq!(stored.subscription_id, None);
    assert_eq!(
        h.provisioning.get_tenant(&tenant.id).await.unwrap().plan_id.as_deref(),
        Some("plan_pro")
    );
}

#[tokio::test]
async fn test_subscription_created_sets_subscription() {
    let h = harness();
    let tenant = acme(&h).await;
    let body = format!(
        r#"{{"tenantId":"{}","action":"subscription_created","planId":"plan_team","subscriptionId":"sub_9"}}"#,
        tenant.id
    );

    assert_eq!(h.bridge.handle_message(body.as_bytes()).await, HandleOutcome::Applied);
    let stored = h.repo.find_by_id(&tenant.id).await.unwrap().unwrap();
    assert_eq!(stored.plan_id.as_deref(), Some("plan_team"));
    assert_eq!(stored.subscription_id.as_deref(), Some("sub_9"));
}

#[tokio::test]
async fn test_missing_plan_id_is_dropped() {
    let h = harness();
    let tenant = acme(&h).await;
    let body = format!(r#"{{"tenantId":"{}","action":"plan_switched"}}"#, tenant.id);
    assert_eq!(h.bridge.handle_message(body.as_bytes()).await, HandleOutcome::Dropped);
}

#[tokio::test]
async fn test_logo_updated_goes_to_settings() {
    let h = harness();
    let tenant = acme(&h).await;
    let body = format!(
        r#"{{"tenantId":"{}","action":"logo_updated","logoUrl":"https://cdn.test/acme.png"}}"#,
        tenant.id
    );

    assert_eq!(h.bridge.handle_message(body.as_bytes()).await, HandleOutcome::Applied);
    assert_eq!(
        h.settings.get(&tenant.id).unwrap().logo_url.as_deref(),
        Some("https://cdn.test/acme.png")
    );
}

#[tokio::test]
async fn test_malformed_messages_are_dropped() {
    let h = harness();
    assert_eq!(h.bridge.handle_message(b"not json").await, HandleOutcome::Dropped);
    assert_eq!(
        h.bridge.handle_message(br#"{"action":"plan_switched","planId":"p"}"#).await,
        HandleOutcome::Dropped
    );
    assert_eq!(
        h.bridge.handle_message(br#"{"tenantId":"T1","action":"logo_updated"}"#).await,
        HandleOutcome::Dropped
    );
}

#[tokio::test]
async fn test_unknown_action_is_ignored() {
    let h = harness();
    let body = br#"{"tenantId":"T1","action":"invoice_paid"}"#;
    assert_eq!(h.bridge.handle_message(body).await, HandleOutcome::Ignored);
}

#[tokio::test]
async fn test_run_acks_every_message_and_stops_on_shutdown() {
    let h = harness();
    let tenant = acme(&h).await;

    let queue = Arc::new(MemoryQueue::new("billing"));
    queue.push_raw(format!(
        r#"{{"tenantId":"{}","action":"plan_switched","planId":"plan_pro"}}"#,
        tenant.id
    ));
    queue.push_raw("garbage");
    queue.push_raw(r#"{"tenantId":"missing","action":"plan_switched","planId":"plan_pro"}"#);
    queue.push_raw(r#"{"tenantId":"T1","action":"something_else"}"#);

    assert!(queue.is_healthy());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let bridge = h.bridge.clone();
    let consumer = queue.clone();
    let task = tokio::spawn(async move {
        bridge
            .run(consumer, shutdown_rx, 2, Duration::from_millis(10))
            .await
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while queue.acked_count() < 4 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(queue.pending(), 0);
    assert_eq!(queue.in_flight(), 0);
    assert!(!queue.is_healthy());
    let stored = h.repo.find_by_id(&tenant.id).await.unwrap().unwrap();
    assert_eq!(stored.plan_id.as_deref(), Some("plan_pro"));
}
