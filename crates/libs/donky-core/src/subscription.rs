use crate::notification::ServerNotification;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Identity of the module owning a subscription.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleDefinition {
    pub name: String,
    pub version: String,
}

impl ModuleDefinition {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self { name: name.into(), version: version.into() }
    }
}

/// Whether a notification type is app-defined or a Donky system type
/// (RichMessage, SimplePushMessage, ...). Dispatch is identical for both;
/// the category only sets the auto-acknowledge default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationCategory {
    Content,
    DonkyInternal,
}

impl NotificationCategory {
    fn default_auto_acknowledge(self) -> bool {
        matches!(self, Self::DonkyInternal)
    }
}

pub type SingleHandler = Arc<dyn Fn(ServerNotification) + Send + Sync>;
pub type BatchHandler = Arc<dyn Fn(Vec<ServerNotification>) + Send + Sync>;

/// Callback registered for a notification type. Identity (the allocation
/// behind the `Arc`) is the unsubscribe key together with the type string.
#[derive(Clone)]
pub enum NotificationHandler {
    Single(SingleHandler),
    Batch(BatchHandler),
}

impl NotificationHandler {
    pub fn single(f: impl Fn(ServerNotification) + Send + Sync + 'static) -> Self {
        Self::Single(Arc::new(f))
    }

    pub fn batch(f: impl Fn(Vec<ServerNotification>) + Send + Sync + 'static) -> Self {
        Self::Batch(Arc::new(f))
    }

    fn same_callback(&self, other: &NotificationHandler) -> bool {
        match (self, other) {
            (Self::Single(a), Self::Single(b)) => {
                std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
            }
            (Self::Batch(a), Self::Batch(b)) => {
                std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
            }
            _ => false,
        }
    }
}

/// Registration submitted by a module at initialisation.
#[derive(Clone)]
pub struct SubscriptionRequest {
    pub notification_type: String,
    pub category: NotificationCategory,
    pub handler: NotificationHandler,
    /// `None` takes the category default (internal: on, content: off).
    pub auto_acknowledge: Option<bool>,
}

impl SubscriptionRequest {
    pub fn new(
        notification_type: impl Into<String>,
        category: NotificationCategory,
        handler: NotificationHandler,
    ) -> Self {
        Self {
            notification_type: notification_type.into(),
            category,
            handler,
            auto_acknowledge: None,
        }
    }

    pub fn with_auto_acknowledge(mut self, auto_acknowledge: bool) -> Self {
        self.auto_acknowledge = Some(auto_acknowledge);
        self
    }
}

#[derive(Clone)]
struct Subscription {
    module: ModuleDefinition,
    notification_type: String,
    handler: NotificationHandler,
    auto_acknowledge: bool,
}

/// Maps notification-type strings to registered listeners, many-to-many.
///
/// The subscription list is copy-on-write: dispatch iterates an `Arc`
/// snapshot, so a concurrent subscribe or unsubscribe can never
/// invalidate an in-flight fan-out. Handlers run on spawned tasks; a slow
/// subscriber cannot stall the synchronise cycle.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: RwLock<Arc<Vec<Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, module: &ModuleDefinition, requests: Vec<SubscriptionRequest>) {
        if requests.is_empty() {
            return;
        }
        let mut guard = self.subscriptions.write().expect("subscription lock poisoned");
        let mut next = (**guard).clone();
        for request in requests {
            log::debug!(
                "reg: {} v{} subscribes to '{}'",
                module.name,
                module.version,
                request.notification_type
            );
            let auto_acknowledge = request
                .auto_acknowledge
                .unwrap_or_else(|| request.category.default_auto_acknowledge());
            next.push(Subscription {
                module: module.clone(),
                notification_type: request.notification_type,
                handler: request.handler,
                auto_acknowledge,
            });
        }
        *guard = Arc::new(next);
    }

    /// Removes subscriptions matching the type and callback identity.
    /// Unknown pairs are a no-op.
    pub fn unsubscribe(
        &self,
        module: &ModuleDefinition,
        notification_type: &str,
        handler: &NotificationHandler,
    ) {
        let mut guard = self.subscriptions.write().expect("subscription lock poisoned");
        let before = guard.len();
        let next: Vec<Subscription> = guard
            .iter()
            .filter(|sub| {
                !(sub.notification_type == notification_type
                    && sub.handler.same_callback(handler))
            })
            .cloned()
            .collect();
        if next.len() == before {
            log::debug!("reg: {} unsubscribe of '{notification_type}' matched nothing", module.name);
        }
        *guard = Arc::new(next);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().expect("subscription lock poisoned").len()
    }

    pub fn has_subscription(&self, notification_type: &str) -> bool {
        self.subscriptions
            .read()
            .expect("subscription lock poisoned")
            .iter()
            .any(|sub| sub.notification_type == notification_type)
    }

    /// Whether any subscription for the type asks for an automatic
    /// acknowledgement. `None` when no subscription matches at all.
    pub fn wants_acknowledgement(&self, notification_type: &str) -> Option<bool> {
        let snapshot = self.subscriptions.read().expect("subscription lock poisoned").clone();
        let mut matched = false;
        for sub in snapshot.iter() {
            if sub.notification_type == notification_type {
                matched = true;
                if sub.auto_acknowledge {
                    return Some(true);
                }
            }
        }
        matched.then_some(false)
    }

    /// Delivers a same-type group to every matching subscription. Batch
    /// handlers get the whole group once; single handlers get one call
    /// per notification. Returns the number of subscriptions reached.
    pub fn dispatch_batch(
        &self,
        notification_type: &str,
        notifications: Vec<ServerNotification>,
    ) -> usize {
        if notifications.is_empty() {
            return 0;
        }
        let snapshot = self.subscriptions.read().expect("subscription lock poisoned").clone();
        let mut reached = 0;
        for sub in snapshot.iter() {
            if sub.notification_type != notification_type {
                continue;
            }
            reached += 1;
            log::trace!("reg: '{notification_type}' -> {}", sub.module.name);
            let group = notifications.clone();
            match sub.handler.clone() {
                NotificationHandler::Batch(handler) => {
                    tokio::spawn(async move {
                        handler(group);
                    });
                }
                NotificationHandler::Single(handler) => {
                    tokio::spawn(async move {
                        for notification in group {
                            handler(notification);
                        }
                    });
                }
            }
        }
        if reached == 0 {
            log::debug!("reg: no subscription for '{notification_type}'");
        }
        reached
    }

    pub fn dispatch(&self, notification: ServerNotification) -> usize {
        let notification_type = notification.notification_type.clone();
        self.dispatch_batch(&notification_type, vec![notification])
    }
}
