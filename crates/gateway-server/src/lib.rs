//! # gateway-server
//!
//! The gateway supervisor (spec §4.1): owns configuration, the connection
//! map, the Push service, the Event consumer and the metrics recorder, and
//! exposes the `/ws`, `/health` and `/metrics` HTTP surface (spec §6)
//! `gateway-switch`'s collaborator traits are deliberately silent about.
//!
//! Grounded in the teacher's top-level host/listener split
//! (`spark-hosting::host::Host` owning service/middleware registries while
//! a transport listener drives accept loops) generalized to this system's
//! single transport shape: one supervisor, one axum router, one connection
//! map.

pub mod config_loader;
pub mod dev_collaborators;
pub mod http;
pub mod shutdown;
pub mod ws;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gateway_core::time::SharedClock;
use gateway_core::GatewayConfig;
use gateway_dedup::DedupStore;
use gateway_directory::SessionDirectory;
use gateway_membership::{MembershipCache, MembershipSource};
use gateway_switch::connection::transport::{FrameSink, FrameSource};
use gateway_switch::connection::{Connection, ConnectionDeps};
use gateway_switch::{AuthService, ConnectionMap, EventBus, EventConsumer, PushService, RoutingService};

/// Every pluggable egress collaborator the supervisor is constructed with
/// (spec §4.1: "exposes a dependency-injection surface for tests"). Tests
/// substitute in-memory fakes; `main.rs` wires the Redis-backed and
/// network-backed implementations in production.
pub struct Collaborators {
    pub auth: Arc<dyn AuthService>,
    pub directory: Arc<dyn SessionDirectory>,
    pub routing: Arc<dyn RoutingService>,
    pub dedup: Arc<dyn DedupStore>,
    pub membership_source: Arc<dyn MembershipSource>,
    pub event_bus: Arc<dyn EventBus>,
    pub clock: SharedClock,
}

/// Why a `/ws` upgrade was refused before a Connection ever reached its
/// own state machine.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeRejected {
    #[error("gateway at capacity ({max_connections} connections)")]
    AtCapacity { max_connections: usize },
}

/// Owns the connection map and the components wired on top of it (spec
/// §4.1). One instance per process; `start`/`shutdown` bracket its
/// lifetime, the same "created at start, torn down at shutdown" rule
/// spec.md §9 states for the connection map, metrics surface and
/// membership cache.
pub struct Supervisor {
    config: Arc<GatewayConfig>,
    node_id: String,
    connections: Arc<ConnectionMap>,
    connection_deps: Arc<ConnectionDeps>,
    membership: Arc<MembershipCache>,
    push: Arc<PushService>,
    event_consumer: Arc<EventConsumer>,
    ready: AtomicBool,
}

impl Supervisor {
    pub fn new(config: GatewayConfig, node_id: impl Into<String>, collaborators: Collaborators) -> Arc<Self> {
        let node_id = node_id.into();
        let config = Arc::new(config);
        let connections = Arc::new(ConnectionMap::new());

        let connection_deps = Arc::new(ConnectionDeps {
            auth: collaborators.auth,
            directory: collaborators.directory.clone(),
            routing: collaborators.routing,
            dedup: collaborators.dedup,
            connections: connections.clone(),
            clock: collaborators.clock,
        });

        let membership = Arc::new(MembershipCache::new(
            collaborators.membership_source,
            connections.clone(),
            config.group_cache_ttl(),
            config.large_group_threshold,
        ));

        let push = Arc::new(PushService::new(
            connections.clone(),
            collaborators.directory,
            node_id.clone(),
            config.push_write_timeout(),
        ));

        let event_consumer = Arc::new(EventConsumer::new(
            connections.clone(),
            membership.clone(),
            collaborators.event_bus,
            push.clone(),
        ));

        Arc::new(Self {
            config,
            node_id,
            connections,
            connection_deps,
            membership,
            push,
            event_consumer,
            ready: AtomicBool::new(false),
        })
    }

    /// Starts the Event consumer's per-topic background tasks and flips the
    /// readiness gate `/health` reports (spec §4.1 `start(config)`).
    pub fn start(self: &Arc<Self>) {
        self.event_consumer.start();
        self.ready.store(true, Ordering::SeqCst);
        tracing::info!(node_id = %self.node_id, "gateway supervisor started");
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &Arc<GatewayConfig> {
        &self.config
    }

    pub fn connections(&self) -> &Arc<ConnectionMap> {
        &self.connections
    }

    pub fn push(&self) -> &Arc<PushService> {
        &self.push
    }

    pub fn membership(&self) -> &Arc<MembershipCache> {
        &self.membership
    }

    /// Admits one accepted WebSocket upgrade, enforcing `max_connections`
    /// before spawning a Connection to drive the rest of the handshake
    /// (spec §6's config table: "Reject upgrade with 503 beyond this").
    /// Returns immediately; the Connection itself runs to completion on a
    /// spawned task.
    pub fn handle_client_handshake(
        self: &Arc<Self>,
        token: Option<String>,
        sink: Box<dyn FrameSink>,
        source: Box<dyn FrameSource>,
    ) -> Result<(), HandshakeRejected> {
        if self.connections.len() >= self.config.max_connections {
            return Err(HandshakeRejected::AtCapacity {
                max_connections: self.config.max_connections,
            });
        }

        let token = token.unwrap_or_default();
        let connection = Connection::new(token, self.node_id.clone(), self.config.clone(), self.connection_deps.clone());
        tokio::spawn(async move {
            let final_state = connection.run(sink, source).await;
            tracing::debug!(?final_state, "connection run loop exited");
        });
        Ok(())
    }

    /// Signals every live Connection to close, waits up to `deadline` for
    /// writer mailboxes to drain, then returns regardless (spec §4.1:
    /// "Failure to drain is logged, not fatal").
    pub async fn shutdown(self: &Arc<Self>, deadline: Duration) {
        self.ready.store(false, Ordering::SeqCst);
        self.event_consumer.stop();

        for handle in self.connections.snapshot() {
            handle.request_close();
        }

        let deadline_at = tokio::time::Instant::now() + deadline;
        while tokio::time::Instant::now() < deadline_at {
            if self.connections.is_empty() {
                tracing::info!("all connections drained before shutdown deadline");
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if !self.connections.is_empty() {
            tracing::warn!(
                remaining = self.connections.len(),
                "shutdown deadline elapsed with connections still open, proceeding anyway"
            );
        }
    }
}
