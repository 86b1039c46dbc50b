//! Narrow capability surfaces for the gateway's egress collaborators
//! (spec §6, §9's "no collaborator leaks its transport types into the
//! core" rule): auth, routing, and the event bus. The session directory,
//! membership source and dedup store contracts live in their own crates.

use async_trait::async_trait;
use gateway_core::UserId;

use crate::error::SwitchError;

/// Resolves a bearer credential extracted from the `/ws` upgrade's
/// `Authorization` header into `(user_id, device_id)` (spec §4.2).
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn validate_token(&self, token: &str) -> Result<AuthenticatedIdentity, SwitchError>;
}

pub struct AuthenticatedIdentity {
    pub user_id: UserId,
    /// Raw device identifier as asserted by the credential; the Connection
    /// still runs it through `DeviceId::parse` before trusting it (spec
    /// §4.2: UUID v4 shape is validated at the gateway, not delegated to
    /// the auth service).
    pub raw_device_id: String,
}

/// Outcome of a routing-service call for one message (spec §6).
pub struct RouteOutcome {
    pub sequence_number: u64,
    pub accepted: bool,
    pub message: Option<String>,
}

/// The downstream message router private/group delivery is handed off to.
#[async_trait]
pub trait RoutingService: Send + Sync {
    async fn route_private(
        &self,
        msg_id: &str,
        sender: &UserId,
        recipient: &str,
        content: &str,
    ) -> Result<RouteOutcome, SwitchError>;

    async fn route_group(
        &self,
        msg_id: &str,
        sender: &UserId,
        group_id: &str,
        content: &str,
    ) -> Result<RouteOutcome, SwitchError>;
}

/// One event observed on the shared bus (spec §4.6).
#[derive(Clone, Debug)]
pub enum BusEvent {
    GroupMessage {
        group_id: gateway_core::GroupId,
        msg_id: gateway_core::MsgId,
        sender_id: UserId,
        content: String,
        sequence_number: u64,
        timestamp: i64,
    },
    MembershipChange {
        group_id: gateway_core::GroupId,
        user_id: UserId,
        event_type: gateway_core::MembershipEventType,
        timestamp: i64,
    },
    ReadReceipt {
        msg_id: gateway_core::MsgId,
        sender_id: UserId,
        reader_id: UserId,
        conversation_id: gateway_core::ConversationId,
        read_at: i64,
        timestamp: i64,
    },
}

/// The bus topics the Event consumer subscribes to (spec §4.6).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Topic {
    GroupMsg,
    MembershipChange,
    ReadReceiptEvents,
}

/// A handle to one subscription's event stream. Implementations hand back
/// events already deserialized into [`BusEvent`]; reconnect-on-drop is the
/// event bus's job, not the consumer's (spec §4.6: "the consumer retries
/// with exponential backoff" describes the consumer's handling of a failed
/// *subscribe* call, not of the connection underneath an open stream).
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Subscribes to `topic`, returning a receiver that yields events as
    /// they arrive. Re-establishing a dropped subscription is the caller's
    /// responsibility via repeated calls to this method.
    async fn subscribe(&self, topic: Topic) -> Result<tokio::sync::mpsc::Receiver<BusEvent>, SwitchError>;
}
