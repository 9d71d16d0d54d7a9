use crate::account::AccountGateway;
use crate::config::DonkyConfig;
use crate::error::DonkyError;
use crate::notification::{OutboundNotification, ServerNotification};
use crate::sequence::{SequenceTaskKind, SequenceTaskQueue, TaskTicket};
use crate::store::NotificationQueueStore;
use crate::subscription::{
    ModuleDefinition, NotificationHandler, SubscriptionRegistry, SubscriptionRequest,
};
use crate::sync::{SyncReport, SynchroniseEngine};
use donky_transport::SynchroniseTransport;
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

struct BackgroundSync {
    cancel: CancellationToken,
}

/// Entry point handed to application modules.
///
/// Constructed explicitly with its collaborators rather than through a
/// global instance, so hosts and tests choose their own store, transport,
/// and gateway implementations.
pub struct DonkyCore {
    config: DonkyConfig,
    store: Arc<dyn NotificationQueueStore>,
    registry: Arc<SubscriptionRegistry>,
    engine: Arc<SynchroniseEngine>,
    sequence: SequenceTaskQueue,
    gateway: Arc<dyn AccountGateway>,
    background: Mutex<Option<BackgroundSync>>,
}

impl DonkyCore {
    pub fn new(
        store: Arc<dyn NotificationQueueStore>,
        transport: Arc<dyn SynchroniseTransport>,
        gateway: Arc<dyn AccountGateway>,
        config: DonkyConfig,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let engine = Arc::new(SynchroniseEngine::new(
            store.clone(),
            registry.clone(),
            transport,
            config.batch_limit,
        ));
        let sequence = SequenceTaskQueue::new(config.task_retry_delay());
        Self {
            config,
            store,
            registry,
            engine,
            sequence,
            gateway,
            background: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DonkyConfig {
        &self.config
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn NotificationQueueStore> {
        &self.store
    }

    // --- subscriptions ---------------------------------------------------

    pub fn subscribe_to_notifications(
        &self,
        module: &ModuleDefinition,
        requests: Vec<SubscriptionRequest>,
    ) {
        self.registry.subscribe(module, requests);
    }

    pub fn unsubscribe_from_notifications(
        &self,
        module: &ModuleDefinition,
        notification_type: &str,
        handler: &NotificationHandler,
    ) {
        self.registry.unsubscribe(module, notification_type, handler);
    }

    // --- outbound queue / synchronise ------------------------------------

    /// Queues an outbound notification for the next synchronise cycle and
    /// returns its id.
    pub async fn queue_notification(
        &self,
        notification_type: &str,
        payload: JsonValue,
    ) -> Result<String, DonkyError> {
        if notification_type.trim().is_empty() {
            return Err(DonkyError::validation_failed(
                [("type".to_owned(), "notification type must not be empty".to_owned())].into(),
            ));
        }
        let notification = OutboundNotification::new(notification_type, payload);
        let id = notification.id.clone();
        self.store.insert(notification).await?;
        Ok(id)
    }

    /// Runs a synchronise cycle, waiting for any in-flight cycle first.
    pub async fn synchronise(&self) -> Result<SyncReport, DonkyError> {
        self.engine.synchronise().await
    }

    /// Fire-and-forget flavour: coalesces into `Ok(None)` when a cycle is
    /// already running.
    pub async fn try_synchronise(&self) -> Result<Option<SyncReport>, DonkyError> {
        self.engine.try_synchronise().await
    }

    /// Entry point for server-initiated pushes delivered over the
    /// persistent channel. The host wires the channel's push handler to
    /// this; the raw body is parsed, dispatched to subscribers, and
    /// acknowledged on the next cycle like any cycle-delivered inbound.
    pub async fn handle_server_push(&self, raw: JsonValue) -> Result<usize, DonkyError> {
        let notification: ServerNotification = serde_json::from_value(raw).map_err(|err| {
            DonkyError::validation_failed(
                [("body".to_owned(), format!("malformed push notification: {err}"))].into(),
            )
        })?;
        self.engine.dispatch_push(notification).await
    }

    /// Starts the periodic background sync: one cycle immediately, then
    /// one per configured interval, each coalescing with explicit calls.
    /// A second start while running is a no-op.
    pub fn start_background_sync(&self) {
        let mut guard = self.background.lock().expect("background sync mutex poisoned");
        if guard.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let engine = self.engine.clone();
        let interval = self.config.sync_interval();
        let token = cancel.clone();
        tokio::spawn(async move {
            loop {
                match engine.try_synchronise().await {
                    Ok(Some(report)) => {
                        log::debug!(
                            "sync: background cycle sent={} received={}",
                            report.sent,
                            report.received
                        );
                    }
                    Ok(None) => {}
                    Err(err) => log::warn!("sync: background cycle failed: {err}"),
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });
        *guard = Some(BackgroundSync { cancel });
    }

    /// Stops the periodic timer. An in-flight cycle is never torn down
    /// mid-submission: it runs to completion (transmitting or requeueing
    /// its claimed batch) and the loop exits at the next select point.
    pub fn stop_background_sync(&self) {
        let mut guard = self.background.lock().expect("background sync mutex poisoned");
        if let Some(background) = guard.take() {
            background.cancel.cancel();
        }
    }

    // --- sequenced account updates ---------------------------------------

    pub fn add_registration_update_task(&self, payload: JsonValue) -> TaskTicket {
        let gateway = self.gateway.clone();
        self.sequence.enqueue(SequenceTaskKind::UpdateRegistration, async move {
            gateway.update_registration(payload).await
        })
    }

    pub fn add_user_update_task(&self, payload: JsonValue) -> TaskTicket {
        let gateway = self.gateway.clone();
        self.sequence
            .enqueue(SequenceTaskKind::UpdateUser, async move { gateway.update_user(payload).await })
    }

    pub fn add_device_update_task(&self, payload: JsonValue) -> TaskTicket {
        let gateway = self.gateway.clone();
        self.sequence.enqueue(SequenceTaskKind::UpdateDevice, async move {
            gateway.update_device(payload).await
        })
    }

    pub fn add_tags_update_task(&self, payload: JsonValue) -> TaskTicket {
        let gateway = self.gateway.clone();
        self.sequence
            .enqueue(SequenceTaskKind::UpdateTags, async move { gateway.update_tags(payload).await })
    }

    pub fn add_additional_properties_update_task(&self, payload: JsonValue) -> TaskTicket {
        let gateway = self.gateway.clone();
        self.sequence.enqueue(SequenceTaskKind::UpdateAdditionalProperties, async move {
            gateway.update_additional_properties(payload).await
        })
    }

    /// True when no account-update task is queued or executing.
    pub fn account_queue_idle(&self) -> bool {
        self.sequence.is_idle()
    }
}

impl Drop for DonkyCore {
    fn drop(&mut self) {
        self.stop_background_sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryQueueStore;
    use async_trait::async_trait;
    use donky_transport::{SyncRequest, SyncResponse, TransportError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingTransport {
        submissions: AtomicUsize,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl SynchroniseTransport for CountingTransport {
        async fn submit(&self, _request: SyncRequest) -> Result<SyncResponse, TransportError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.submissions.fetch_add(1, Ordering::SeqCst);
            Ok(SyncResponse::default())
        }
    }

    struct RecordingGateway {
        calls: std::sync::Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl AccountGateway for RecordingGateway {
        async fn update_registration(&self, _payload: JsonValue) -> Result<JsonValue, DonkyError> {
            self.calls.lock().expect("calls").push("registration");
            Ok(JsonValue::Null)
        }
        async fn update_user(&self, _payload: JsonValue) -> Result<JsonValue, DonkyError> {
            self.calls.lock().expect("calls").push("user");
            Ok(json!({ "userUpdated": true }))
        }
        async fn update_device(&self, _payload: JsonValue) -> Result<JsonValue, DonkyError> {
            self.calls.lock().expect("calls").push("device");
            Ok(JsonValue::Null)
        }
        async fn update_tags(&self, _payload: JsonValue) -> Result<JsonValue, DonkyError> {
            self.calls.lock().expect("calls").push("tags");
            Ok(JsonValue::Null)
        }
        async fn update_additional_properties(
            &self,
            _payload: JsonValue,
        ) -> Result<JsonValue, DonkyError> {
            self.calls.lock().expect("calls").push("additional");
            Ok(JsonValue::Null)
        }
    }

    fn core_with(transport: Arc<CountingTransport>, gateway: Arc<RecordingGateway>) -> DonkyCore {
        let config = DonkyConfig { task_retry_delay_ms: 10, ..DonkyConfig::default() };
        DonkyCore::new(Arc::new(MemoryQueueStore::new()), transport, gateway, config)
    }

    fn gateway() -> Arc<RecordingGateway> {
        Arc::new(RecordingGateway { calls: std::sync::Mutex::new(Vec::new()) })
    }

    #[tokio::test]
    async fn queue_notification_validates_the_type() {
        let core = core_with(Arc::new(CountingTransport::default()), gateway());
        let err = core.queue_notification("  ", json!({})).await.expect_err("empty type");
        assert!(err.validation_failures().expect("failures").contains_key("type"));

        let id = core.queue_notification("MessageRead", json!({ "m": 1 })).await.expect("queued");
        assert!(!id.is_empty());
        assert_eq!(core.store().pending_count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn account_updates_run_in_submission_order() {
        let gateway = gateway();
        let core = core_with(Arc::new(CountingTransport::default()), gateway.clone());

        let user = core.add_user_update_task(json!({ "displayName": "a" }));
        let tags = core.add_tags_update_task(json!({ "tags": ["news"] }));
        let device = core.add_device_update_task(json!({ "deviceName": "phone" }));

        let report = user.wait().await.expect("user report");
        assert_eq!(report.outcome.expect("user success")["userUpdated"], true);
        tags.wait().await.expect("tags report").outcome.expect("tags success");
        device.wait().await.expect("device report").outcome.expect("device success");

        assert_eq!(*gateway.calls.lock().expect("calls"), vec!["user", "tags", "device"]);
    }

    #[tokio::test]
    async fn stopping_mid_cycle_never_loses_the_claimed_batch() {
        let transport = Arc::new(CountingTransport {
            delay: Some(Duration::from_millis(100)),
            ..CountingTransport::default()
        });
        let core = core_with(transport.clone(), gateway());
        core.queue_notification("MessageRead", json!({ "messageId": "m1" }))
            .await
            .expect("queued");

        core.start_background_sync();
        // Stop while the immediate first cycle is parked on the submit.
        tokio::time::sleep(Duration::from_millis(20)).await;
        core.stop_background_sync();

        tokio::time::sleep(Duration::from_millis(200)).await;
        // The in-flight cycle must finish: the claimed notification is
        // either transmitted (here: completed submit, empty store) or
        // back in the store, never silently dropped.
        assert_eq!(transport.submissions.load(Ordering::SeqCst), 1);
        assert_eq!(core.store().pending_count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn a_server_push_is_validated_and_acknowledged() {
        let core = core_with(Arc::new(CountingTransport::default()), gateway());

        let err = core
            .handle_server_push(json!({ "type": 42 }))
            .await
            .expect_err("malformed push");
        assert!(err.validation_failures().expect("failures").contains_key("body"));

        let reached = core
            .handle_server_push(json!({ "id": "p1", "type": "NewDeviceAddedToUser" }))
            .await
            .expect("push");
        assert_eq!(reached, 0);
        // Unsubscribed type still produces a deferred acknowledgement.
        assert_eq!(core.store().pending_count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn background_sync_runs_an_immediate_cycle_and_stops_cleanly() {
        let transport = Arc::new(CountingTransport::default());
        let core = core_with(transport.clone(), gateway());

        core.start_background_sync();
        core.start_background_sync(); // second start is a no-op

        for _ in 0..100 {
            if transport.submissions.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(transport.submissions.load(Ordering::SeqCst) >= 1);

        core.stop_background_sync();
        let after_stop = transport.submissions.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.submissions.load(Ordering::SeqCst), after_stop);
    }
}
