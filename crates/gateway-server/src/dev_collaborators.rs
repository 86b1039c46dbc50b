//! Standalone-mode stand-ins for the two egress collaborators spec §1
//! declares "deliberately out of scope" — token verification and message
//! routing. Every other collaborator (session directory, membership
//! source, dedup store) ships a real network-backed implementation in its
//! own crate; these two have no such implementation here because their
//! wire protocol belongs to services this repository does not own.
//!
//! `main.rs` wires these in when no production auth/routing endpoint is
//! configured, so the binary is runnable standalone for development and
//! for the integration tests under `tests/`. A real deployment supplies its
//! own [`gateway_switch::AuthService`]/[`gateway_switch::RoutingService`]
//! through the same [`crate::Collaborators`] struct.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use gateway_core::UserId;
use gateway_switch::{AuthService, AuthenticatedIdentity, RouteOutcome, RoutingService, SwitchError};

/// Accepts any bearer credential of the form `"{user_id}:{device_id}"`.
/// Stands in for a real token-verification service.
pub struct DevAuthService;

#[async_trait]
impl AuthService for DevAuthService {
    async fn validate_token(&self, token: &str) -> Result<AuthenticatedIdentity, SwitchError> {
        let (user_id, device_id) = token.split_once(':').ok_or_else(|| SwitchError::Unauthenticated {
            reason: "expected a \"user_id:device_id\" bearer token in standalone mode".to_owned(),
        })?;
        if user_id.is_empty() || device_id.is_empty() {
            return Err(SwitchError::Unauthenticated {
                reason: "user_id and device_id must be non-empty".to_owned(),
            });
        }
        Ok(AuthenticatedIdentity {
            user_id: UserId::from(user_id),
            raw_device_id: device_id.to_owned(),
        })
    }
}

/// Accepts every inbound message and hands back a monotonically
/// increasing sequence number. Stands in for a real routing service.
pub struct DevRoutingService {
    next_sequence: AtomicU64,
}

impl DevRoutingService {
    pub fn new() -> Self {
        Self {
            next_sequence: AtomicU64::new(1),
        }
    }

    fn next(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for DevRoutingService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoutingService for DevRoutingService {
    async fn route_private(
        &self,
        _msg_id: &str,
        _sender: &UserId,
        _recipient: &str,
        _content: &str,
    ) -> Result<RouteOutcome, SwitchError> {
        Ok(RouteOutcome {
            sequence_number: self.next(),
            accepted: true,
            message: None,
        })
    }

    async fn route_group(
        &self,
        _msg_id: &str,
        _sender: &UserId,
        _group_id: &str,
        _content: &str,
    ) -> Result<RouteOutcome, SwitchError> {
        Ok(RouteOutcome {
            sequence_number: self.next(),
            accepted: true,
            message: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dev_auth_parses_user_and_device() {
        let auth = DevAuthService;
        let identity = auth.validate_token("user_a:550e8400-e29b-41d4-a716-446655440000").await.unwrap();
        assert_eq!(identity.user_id, UserId::from("user_a"));
        assert_eq!(identity.raw_device_id, "550e8400-e29b-41d4-a716-446655440000");
    }

    #[tokio::test]
    async fn dev_auth_rejects_malformed_token() {
        let auth = DevAuthService;
        assert!(auth.validate_token("not-a-pair").await.is_err());
    }

    #[tokio::test]
    async fn dev_routing_assigns_increasing_sequence_numbers() {
        let routing = DevRoutingService::new();
        let user = UserId::from("user_a");
        let first = routing.route_private("m1", &user, "user_b", "hi").await.unwrap();
        let second = routing.route_private("m2", &user, "user_b", "hi").await.unwrap();
        assert!(second.sequence_number > first.sequence_number);
    }
}
