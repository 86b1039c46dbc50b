//! # gateway-core
//!
//! Shared kernel for the real-time connection gateway workspace: identifier
//! newtypes, wire frames, configuration, the gateway-wide error taxonomy, a
//! monotonic clock abstraction and a bounded-call helper.
//!
//! Every other crate in this workspace depends on `gateway-core`; it depends
//! on none of them, the same acyclic shape the teacher's `spark-core`
//! occupies relative to `spark-switch`/`spark-transport-tcp`.

pub mod backoff;
pub mod config;
pub mod context;
pub mod error;
pub mod frame;
pub mod ids;
pub mod metrics;
pub mod time;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use frame::{InboundFrame, MembershipEventType, OutboundFrame};
pub use ids::{ConnectionKey, ConversationId, DeviceId, GroupId, MsgId, UserId};
