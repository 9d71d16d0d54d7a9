//! Transport layer for the Donky synchronise cycle.
//!
//! The synchronise engine speaks one contract ([`SynchroniseTransport`]);
//! behind it the [`TransportSelector`] prefers a persistent bidirectional
//! channel when connected and falls back to a stateless request/response
//! call otherwise. Payloads cross this boundary as opaque JSON values;
//! the wire schema is a contract between the host app and the backing
//! service, not this crate.

pub mod contract;
pub mod error;
pub mod selector;

pub use contract::{
    ChannelAuth, ChannelAuthProvider, PersistentChannel, PushHandler, RestTransport, SyncRequest,
    SyncResponse, SynchroniseTransport,
};
pub use error::TransportError;
pub use selector::{ChannelState, TransportSelector, TransportSelectorConfig};
