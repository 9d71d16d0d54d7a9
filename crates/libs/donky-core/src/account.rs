use crate::error::DonkyError;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// External collaborator performing the account/registration mutations on
/// the network. Implementations do blocking I/O internally; the sequence
/// queue guarantees their calls never overlap.
///
/// Payloads are opaque maps: their field names and types are a contract
/// between the host app and the backing service.
#[async_trait]
pub trait AccountGateway: Send + Sync {
    async fn update_registration(&self, payload: JsonValue) -> Result<JsonValue, DonkyError>;

    async fn update_user(&self, payload: JsonValue) -> Result<JsonValue, DonkyError>;

    async fn update_device(&self, payload: JsonValue) -> Result<JsonValue, DonkyError>;

    async fn update_tags(&self, payload: JsonValue) -> Result<JsonValue, DonkyError>;

    async fn update_additional_properties(
        &self,
        payload: JsonValue,
    ) -> Result<JsonValue, DonkyError>;
}
