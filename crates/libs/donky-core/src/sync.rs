use crate::error::DonkyError;
use crate::notification::{
    acknowledgement, AcknowledgementResult, OutboundNotification, ServerNotification,
};
use crate::store::NotificationQueueStore;
use crate::subscription::SubscriptionRegistry;
use donky_transport::{SyncRequest, SynchroniseTransport};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Outcome of one completed synchronise cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Outbound notifications transmitted and removed from the store.
    pub sent: usize,
    /// Inbound server notifications received in the response.
    pub received: usize,
    /// Acknowledgements queued for the next cycle.
    pub acknowledged: usize,
}

/// Drives one round-trip synchronise cycle: claim pending outbound
/// notifications, submit them, dispatch the inbound response grouped by
/// type, and queue deferred acknowledgements.
///
/// Cycles never overlap. `synchronise` blocks until any in-flight cycle
/// finishes and then runs its own; `try_synchronise` coalesces into a
/// no-op instead, which is what the background timer uses.
pub struct SynchroniseEngine {
    store: Arc<dyn NotificationQueueStore>,
    registry: Arc<SubscriptionRegistry>,
    transport: Arc<dyn SynchroniseTransport>,
    batch_limit: usize,
    cycle_guard: Mutex<()>,
}

impl SynchroniseEngine {
    pub fn new(
        store: Arc<dyn NotificationQueueStore>,
        registry: Arc<SubscriptionRegistry>,
        transport: Arc<dyn SynchroniseTransport>,
        batch_limit: usize,
    ) -> Self {
        Self { store, registry, transport, batch_limit, cycle_guard: Mutex::new(()) }
    }

    pub async fn synchronise(&self) -> Result<SyncReport, DonkyError> {
        let _guard = self.cycle_guard.lock().await;
        self.run_cycle().await
    }

    /// Runs a cycle unless one is already in flight; returns `Ok(None)`
    /// when coalesced.
    pub async fn try_synchronise(&self) -> Result<Option<SyncReport>, DonkyError> {
        match self.cycle_guard.try_lock() {
            Ok(_guard) => self.run_cycle().await.map(Some),
            Err(_) => {
                log::debug!("sync: cycle already in flight, coalescing");
                Ok(None)
            }
        }
    }

    async fn run_cycle(&self) -> Result<SyncReport, DonkyError> {
        // Claim a bounded batch: snapshot, then remove atomically. A
        // failed submission puts the whole batch back.
        let batch = self.store.list_pending(self.batch_limit).await?;
        let ids: Vec<String> = batch.iter().map(|n| n.id.clone()).collect();
        self.store.delete_by_ids(&ids).await?;

        let request = SyncRequest::new(batch.iter().map(OutboundNotification::to_wire).collect());
        log::debug!("sync: submitting {} outbound notification(s)", batch.len());

        let response = match self.transport.submit(request).await {
            Ok(response) => response,
            Err(err) => {
                log::warn!("sync: submission failed, requeueing batch: {err}");
                let lost = self.requeue(batch).await;
                return Err(with_requeue_failures(err.into(), lost));
            }
        };

        // Interpret the whole response before dispatching anything: a
        // malformed entry fails the cycle closed, with the batch back in
        // the store for the next attempt.
        let mut inbound = Vec::with_capacity(response.server_notifications.len());
        for raw in response.server_notifications {
            match serde_json::from_value::<ServerNotification>(raw) {
                Ok(notification) => inbound.push(notification),
                Err(err) => {
                    log::warn!("sync: malformed server notification, failing cycle: {err}");
                    let lost = self.requeue(batch).await;
                    return Err(with_requeue_failures(
                        DonkyError::new(
                            crate::error::code::TRANSPORT_FAILED,
                            crate::error::ErrorCategory::Transport,
                            format!("malformed server notification: {err}"),
                        )
                        .with_retryable(true),
                        lost,
                    ));
                }
            }
        }

        let received = inbound.len();
        let mut acknowledged = 0;
        for (notification_type, group) in group_by_type(inbound) {
            let reached = self.registry.dispatch_batch(&notification_type, group.clone());
            log::debug!(
                "sync: dispatched {} '{}' notification(s) to {} subscription(s)",
                group.len(),
                notification_type,
                reached
            );

            // Acknowledgements ride the next cycle, never this one.
            let result = match self.registry.wants_acknowledgement(&notification_type) {
                Some(true) => Some(AcknowledgementResult::Delivered),
                Some(false) => None,
                None => Some(AcknowledgementResult::DeliveredNoSubscription),
            };
            if let Some(result) = result {
                for notification in &group {
                    self.store.insert(acknowledgement(notification, result)).await?;
                    acknowledged += 1;
                }
            }
        }

        Ok(SyncReport { sent: ids.len(), received, acknowledged })
    }

    /// Dispatches one server-initiated push arriving over the persistent
    /// channel, outside any cycle. Acknowledgement rules are the same as
    /// for cycle-delivered notifications: the ack is queued and rides the
    /// next cycle. Returns the number of subscriptions reached.
    pub async fn dispatch_push(
        &self,
        notification: ServerNotification,
    ) -> Result<usize, DonkyError> {
        let notification_type = notification.notification_type.clone();
        let result = match self.registry.wants_acknowledgement(&notification_type) {
            Some(true) => Some(AcknowledgementResult::Delivered),
            Some(false) => None,
            None => Some(AcknowledgementResult::DeliveredNoSubscription),
        };
        if let Some(result) = result {
            self.store.insert(acknowledgement(&notification, result)).await?;
        }
        let reached = self.registry.dispatch(notification);
        log::debug!("sync: push '{notification_type}' reached {reached} subscription(s)");
        Ok(reached)
    }

    /// Restores a claimed batch after a failed submission. Returns the
    /// ids that could not be reinserted; restoration stays best-effort,
    /// but the caller surfaces those ids so the host can react.
    async fn requeue(&self, batch: Vec<OutboundNotification>) -> Vec<String> {
        let mut failed = Vec::new();
        for notification in batch {
            let id = notification.id.clone();
            if let Err(err) = self.store.insert(notification).await {
                log::error!("sync: failed to requeue outbound notification {id}: {err}");
                failed.push(id);
            }
        }
        failed
    }
}

fn with_requeue_failures(error: DonkyError, failed_ids: Vec<String>) -> DonkyError {
    if failed_ids.is_empty() {
        return error;
    }
    error.with_detail("requeueFailedIds", serde_json::Value::from(failed_ids))
}

/// Groups same-type notifications, preserving first-seen type order and
/// arrival order within each group.
fn group_by_type(
    notifications: Vec<ServerNotification>,
) -> Vec<(String, Vec<ServerNotification>)> {
    let mut groups: Vec<(String, Vec<ServerNotification>)> = Vec::new();
    for notification in notifications {
        match groups.iter_mut().find(|(ty, _)| *ty == notification.notification_type) {
            Some((_, group)) => group.push(notification),
            None => {
                groups.push((notification.notification_type.clone(), vec![notification]));
            }
        }
    }
    groups
}
