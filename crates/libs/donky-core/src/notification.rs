use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Process-unique notification id: creation time plus a counter, hex.
pub fn generate_id() -> String {
    let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:04x}", now_millis(), seq & 0xffff)
}

/// A client-to-server notification, owned by the queue store until the
/// server acknowledges receipt.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutboundNotification {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub payload: JsonValue,
    pub created_at: i64,
}

impl OutboundNotification {
    pub fn new(notification_type: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            id: generate_id(),
            notification_type: notification_type.into(),
            payload,
            created_at: now_millis(),
        }
    }

    /// Wire form submitted inside a synchronise request.
    pub fn to_wire(&self) -> JsonValue {
        json!({
            "id": self.id,
            "type": self.notification_type,
            "payload": self.payload,
            "createdAt": self.created_at,
        })
    }
}

/// A server-to-client notification. Transient: it exists only for the
/// duration of the synchronise cycle that delivered it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerNotification {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    #[serde(default)]
    pub payload: JsonValue,
    #[serde(default)]
    pub server_created_on: Option<String>,
}

/// Delivery outcome reported back inside an acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcknowledgementResult {
    Delivered,
    DeliveredNoSubscription,
}

impl AcknowledgementResult {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "Delivered",
            Self::DeliveredNoSubscription => "DeliveredNoSubscription",
        }
    }
}

pub const ACKNOWLEDGEMENT_TYPE: &str = "Acknowledgement";

/// Builds the outbound acknowledgement for an inbound notification. It is
/// queued during the cycle that dispatched the inbound and transmitted on
/// the next cycle.
pub fn acknowledgement(
    inbound: &ServerNotification,
    result: AcknowledgementResult,
) -> OutboundNotification {
    OutboundNotification::new(
        ACKNOWLEDGEMENT_TYPE,
        json!({
            "serverNotificationId": inbound.id,
            "serverNotificationType": inbound.notification_type,
            "result": result.as_str(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(generate_id()));
        }
    }

    #[test]
    fn server_notification_parses_with_missing_optionals() {
        let parsed: ServerNotification = serde_json::from_value(json!({
            "id": "sn-1",
            "type": "RichMessage",
        }))
        .expect("minimal body");
        assert_eq!(parsed.notification_type, "RichMessage");
        assert_eq!(parsed.payload, JsonValue::Null);
        assert_eq!(parsed.server_created_on, None);
    }

    #[test]
    fn acknowledgement_references_the_inbound() {
        let inbound = ServerNotification {
            id: "sn-9".into(),
            notification_type: "SimplePushMessage".into(),
            payload: JsonValue::Null,
            server_created_on: None,
        };
        let ack = acknowledgement(&inbound, AcknowledgementResult::Delivered);
        assert_eq!(ack.notification_type, ACKNOWLEDGEMENT_TYPE);
        assert_eq!(ack.payload["serverNotificationId"], "sn-9");
        assert_eq!(ack.payload["result"], "Delivered");
    }
}
