//! Donky notification synchronisation core.
//!
//! The portable heart of the SDK: a durable queue of outbound
//! notifications, a strictly-ordered single-flight queue for account
//! mutations, a many-to-many subscription registry, and the synchronise
//! engine that ties them together over a pluggable transport.
//!
//! Everything platform-specific (UI, persistence mechanics beyond the
//! queue store contract, push wire formats) stays behind traits:
//! [`store::NotificationQueueStore`], [`account::AccountGateway`], and
//! `donky_transport::SynchroniseTransport`.

pub mod account;
pub mod config;
pub mod core;
pub mod error;
pub mod notification;
pub mod pipeline;
pub mod sequence;
pub mod store;
pub mod subscription;
pub mod sync;

pub use account::AccountGateway;
pub use config::DonkyConfig;
pub use crate::core::DonkyCore;
pub use error::{DonkyError, ErrorCategory};
pub use notification::{
    acknowledgement, AcknowledgementResult, OutboundNotification, ServerNotification,
};
pub use pipeline::{run_initialisation, ModuleInitialiser};
pub use sequence::{SequenceTaskKind, SequenceTaskQueue, TaskReport, TaskTicket};
pub use store::{MemoryQueueStore, NotificationQueueStore, SqliteQueueStore};
pub use subscription::{
    ModuleDefinition, NotificationCategory, NotificationHandler, SubscriptionRegistry,
    SubscriptionRequest,
};
pub use sync::{SyncReport, SynchroniseEngine};
