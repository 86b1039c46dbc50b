//! The Connection state machine (spec §4.2): one instance per accepted
//! WebSocket upgrade, driving handshake → auth → register → active dispatch
//! → close.
//!
//! Grounded in `spark_switch::core::session::CallSession` for the overall
//! shape (a struct wrapping a state enum plus the collaborators it needs to
//! advance through it) and in spec.md §5 for the three-cooperating-tasks
//! runtime model this file actually spawns.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use gateway_core::error::codes;
use gateway_core::time::SharedClock;
use gateway_core::{ConnectionKey, DeviceId, GatewayConfig, InboundFrame, OutboundFrame, UserId};
use gateway_dedup::DedupStore;
use gateway_directory::{DirectoryError, LeaseRenewer, LeaseStatus, SessionDirectory};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{AuthService, RoutingService};
use crate::connection::mailbox::{EnqueueOutcome, Mailbox};
use crate::connection::rate_limit::RateLimiter;
use crate::connection::state::ConnectionState;
use crate::connection::transport::{FrameSink, FrameSource, RecvOutcome};
use crate::connection_map::{ConnectionHandle, ConnectionMap};

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Egress collaborators + shared state a Connection needs to run. Bundled
/// behind one `Arc` so `gateway-server` constructs it once per supervisor
/// and clones it cheaply per accepted connection.
pub struct ConnectionDeps {
    pub auth: Arc<dyn AuthService>,
    pub directory: Arc<dyn SessionDirectory>,
    pub routing: Arc<dyn RoutingService>,
    pub dedup: Arc<dyn DedupStore>,
    pub connections: Arc<ConnectionMap>,
    pub clock: SharedClock,
}

struct ActivityTracker {
    clock: SharedClock,
    last: Mutex<Instant>,
}

impl ActivityTracker {
    fn new(clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            clock,
            last: Mutex::new(now),
        }
    }

    fn touch(&self) {
        *self.last.lock() = self.clock.now();
    }

    fn idle_for(&self) -> Duration {
        self.clock.now().saturating_duration_since(*self.last.lock())
    }
}

/// Result of [`Connection::do_handshake`]: either the resolved identity or
/// the error code/message to send back before closing.
enum HandshakeOutcome {
    Authenticated(UserId, DeviceId),
    Rejected { code: &'static str, message: String },
}

/// One accepted WebSocket connection, not yet handshaked.
pub struct Connection {
    token: String,
    node_id: String,
    config: Arc<GatewayConfig>,
    deps: Arc<ConnectionDeps>,
}

impl Connection {
    pub fn new(
        token: impl Into<String>,
        node_id: impl Into<String>,
        config: Arc<GatewayConfig>,
        deps: Arc<ConnectionDeps>,
    ) -> Self {
        Self {
            token: token.into(),
            node_id: node_id.into(),
            config,
            deps,
        }
    }

    /// Drives the Connection from `NEW` to a terminal state. Blocks until
    /// the connection closes; the caller typically `tokio::spawn`s this.
    pub async fn run(
        self,
        mut writer_transport: Box<dyn FrameSink>,
        reader_transport: Box<dyn FrameSource>,
    ) -> ConnectionState {
        let mut state = ConnectionState::New;
        state = self.advance(state, ConnectionState::Handshaking);

        state = self.advance(state, ConnectionState::Authenticating);
        // spec §4.2: "HANDSHAKING→AUTHENTICATING with `handshake_timeout`" bounds
        // the whole auth+register sequence, on top of (and tighter than) each
        // collaborator's own per-call timeout.
        let (user_id, device_id) =
            match tokio::time::timeout(self.config.handshake_timeout(), self.do_handshake()).await {
                Ok(HandshakeOutcome::Authenticated(user_id, device_id)) => {
                    state = self.advance(state, ConnectionState::Registering);
                    (user_id, device_id)
                }
                Ok(HandshakeOutcome::Rejected { code, message }) => {
                    return self.reject(&mut writer_transport, code, message).await;
                }
                Err(_elapsed) => {
                    tracing::info!("handshake timed out");
                    return self
                        .reject(&mut writer_transport, codes::INVALID_TOKEN, "handshake timed out")
                        .await;
                }
            };

        state = self.advance(state, ConnectionState::Active);
        gateway_core::metrics::connection_opened();

        let key = ConnectionKey::new(&user_id, &device_id);
        let (mailbox, mailbox_rx) = Mailbox::new(self.config.mailbox_capacity);
        let cancellation = CancellationToken::new();
        let handle = ConnectionHandle::new(
            key.clone(),
            user_id.clone(),
            device_id.clone(),
            mailbox.clone(),
            cancellation.clone(),
        );
        if let Some(previous) = self.deps.connections.insert_or_replace(handle.clone()) {
            previous.request_close();
        }

        let (mut lease_status, renewer_handle) = LeaseRenewer::spawn(
            self.deps.directory.clone(),
            user_id.clone(),
            self.config.registry_renew_interval(),
            3,
        );

        let activity = Arc::new(ActivityTracker::new(self.deps.clock.clone()));
        let rate_limiter = RateLimiter::new(self.config.max_messages_per_second, self.deps.clock.clone());

        let ctx = Arc::new(ActiveContext {
            user_id: user_id.clone(),
            dedup: self.deps.dedup.clone(),
            routing: self.deps.routing.clone(),
            rate_limiter,
            dedup_ttl: self.config.dedup_ttl(),
            routing_call_timeout: self.config.routing_call_timeout(),
            mailbox: mailbox.clone(),
            activity: activity.clone(),
        });

        let reader_handle = tokio::spawn(reader_task(
            reader_transport,
            ctx,
            self.config.read_timeout(),
            cancellation.clone(),
        ));
        let writer_handle = tokio::spawn(writer_task(
            writer_transport,
            mailbox_rx,
            self.config.write_timeout(),
            cancellation.clone(),
        ));
        let heartbeat_handle = tokio::spawn(heartbeat_task(
            mailbox.clone(),
            activity,
            self.config.heartbeat_interval(),
            self.config.heartbeat_timeout(),
            self.config.pong_timeout(),
            self.config.write_timeout(),
            cancellation.clone(),
        ));

        tokio::select! {
            _ = cancellation.cancelled() => {}
            changed = lease_status.changed() => {
                if changed.is_ok() && matches!(*lease_status.borrow(), LeaseStatus::LeaseLost) {
                    tracing::warn!(%user_id, "closing connection after directory lease loss");
                    cancellation.cancel();
                }
            }
        }
        cancellation.cancel();
        renewer_handle.abort();
        let _ = tokio::join!(reader_handle, writer_handle, heartbeat_handle);

        state = self.advance(state, ConnectionState::Closing);
        self.deps.connections.remove_if_current(&key, &handle);
        match tokio::time::timeout(
            self.config.registry_call_timeout(),
            self.deps.directory.unregister(&user_id, &device_id),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(%user_id, error = %err, "best-effort directory unregister failed"),
            Err(_) => tracing::warn!(%user_id, "directory unregister timed out"),
        }
        gateway_core::metrics::connection_closed("closed");

        self.advance(state, ConnectionState::Closed)
    }

    fn advance(&self, from: ConnectionState, to: ConnectionState) -> ConnectionState {
        debug_assert!(from.can_transition_to(to), "illegal transition {from:?} -> {to:?}");
        to
    }

    /// Runs the AUTHENTICATING and REGISTERING phases (spec §4.2), bounded
    /// as a whole by `handshake_timeout` in [`Self::run`]. Reports the
    /// outcome rather than writing to the transport itself, so the caller
    /// can distinguish an explicit rejection from the overall handshake
    /// deadline elapsing.
    async fn do_handshake(&self) -> HandshakeOutcome {
        let identity = match tokio::time::timeout(
            self.config.auth_timeout(),
            self.deps.auth.validate_token(&self.token),
        )
        .await
        {
            Ok(Ok(identity)) => identity,
            Ok(Err(err)) => {
                tracing::info!(error = %err, "authentication rejected");
                return HandshakeOutcome::Rejected {
                    code: codes::INVALID_TOKEN,
                    message: err.to_string(),
                };
            }
            Err(_elapsed) => {
                tracing::info!("authentication timed out");
                return HandshakeOutcome::Rejected {
                    code: codes::INVALID_TOKEN,
                    message: "authentication timed out".to_owned(),
                };
            }
        };

        let device_id = match DeviceId::parse(&identity.raw_device_id) {
            Ok(device_id) => device_id,
            Err(err) => {
                tracing::info!(raw = %identity.raw_device_id, "device id rejected");
                return HandshakeOutcome::Rejected {
                    code: codes::INVALID_DEVICE_ID,
                    message: err.to_string(),
                };
            }
        };
        let user_id = identity.user_id;

        match tokio::time::timeout(
            self.config.registry_call_timeout(),
            self.deps.directory.register(&user_id, &device_id, &self.node_id),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(DirectoryError::MaxDevicesExceeded)) => {
                return HandshakeOutcome::Rejected {
                    code: codes::MAX_DEVICES_EXCEEDED,
                    message: "user already has the maximum of 5 registered devices".to_owned(),
                };
            }
            Ok(Err(err)) => {
                return HandshakeOutcome::Rejected {
                    code: codes::INTERNAL,
                    message: err.to_string(),
                };
            }
            Err(_elapsed) => {
                return HandshakeOutcome::Rejected {
                    code: codes::INTERNAL,
                    message: "directory register timed out".to_owned(),
                };
            }
        }

        HandshakeOutcome::Authenticated(user_id, device_id)
    }

    async fn reject(
        &self,
        writer_transport: &mut Box<dyn FrameSink>,
        code: &str,
        message: impl Into<String>,
    ) -> ConnectionState {
        gateway_core::metrics::connection_closed("rejected");
        let _ = writer_transport
            .send(OutboundFrame::error(code, message, now_millis()))
            .await;
        writer_transport.close().await;
        ConnectionState::Rejected
    }
}

/// Per-connection state the reader task needs to dispatch `ACTIVE` frames.
/// Not `Send`-sensitive: everything here is either `Arc`-shared or `Copy`.
struct ActiveContext {
    user_id: UserId,
    dedup: Arc<dyn DedupStore>,
    routing: Arc<dyn RoutingService>,
    rate_limiter: RateLimiter,
    dedup_ttl: Duration,
    routing_call_timeout: Duration,
    mailbox: Mailbox,
    activity: Arc<ActivityTracker>,
}

async fn reader_task(
    mut source: Box<dyn FrameSource>,
    ctx: Arc<ActiveContext>,
    read_timeout: Duration,
    cancellation: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancellation.cancelled() => return,
            outcome = tokio::time::timeout(read_timeout, source.recv()) => {
                match outcome {
                    Err(_elapsed) => {
                        tracing::info!("read side idle past read_timeout, closing connection");
                        cancellation.cancel();
                        return;
                    }
                    Ok(RecvOutcome::Closed) => {
                        cancellation.cancel();
                        return;
                    }
                    Ok(RecvOutcome::Invalid { received }) => {
                        gateway_core::metrics::inbound_message("invalid");
                        let _ = ctx.mailbox.try_enqueue(OutboundFrame::error(
                            codes::INVALID_MESSAGE,
                            format!("unrecognized frame type: {received}"),
                            now_millis(),
                        ));
                    }
                    Ok(RecvOutcome::Frame(frame)) => {
                        ctx.activity.touch();
                        dispatch_frame(&ctx, frame).await;
                    }
                }
            }
        }
    }
}

async fn dispatch_frame(ctx: &ActiveContext, frame: InboundFrame) {
    match frame {
        InboundFrame::Heartbeat => {
            gateway_core::metrics::inbound_message("heartbeat");
            let _ = ctx.mailbox.try_enqueue(OutboundFrame::Heartbeat);
        }
        InboundFrame::Ack { msg_id } => {
            // No standalone delivery-tracker component exists in this
            // system (the routing service already returns a sequence
            // number synchronously); client acks are observability only.
            gateway_core::metrics::inbound_message("ack");
            tracing::debug!(%msg_id, "client acknowledged delivery");
        }
        InboundFrame::SendMsg {
            msg_id,
            recipient,
            content,
            timestamp,
        } => {
            gateway_core::metrics::inbound_message("send_msg");
            handle_send_msg(ctx, msg_id, recipient, content, timestamp).await;
        }
    }
}

async fn handle_send_msg(
    ctx: &ActiveContext,
    msg_id: String,
    recipient: String,
    content: String,
    _timestamp: i64,
) {
    if !ctx.rate_limiter.try_acquire() {
        gateway_core::metrics::rate_limit_rejection();
        let _ = ctx.mailbox.try_enqueue(OutboundFrame::error(
            codes::RATE_LIMIT_EXCEEDED,
            "per-connection rate limit exceeded",
            now_millis(),
        ));
        return;
    }

    let already_seen = match ctx.dedup.seen_then_mark(&msg_id, ctx.dedup_ttl).await {
        Ok(seen) => seen,
        Err(err) => {
            gateway_core::metrics::dedup_store_failure();
            tracing::warn!(%msg_id, error = %err, "dedup store failure, failing open");
            false
        }
    };

    if already_seen {
        gateway_core::metrics::dedup_hit();
        let _ = ctx.mailbox.try_enqueue(OutboundFrame::Ack {
            msg_id,
            sequence_number: 0,
            timestamp: now_millis(),
        });
        return;
    }

    let route_result = tokio::time::timeout(ctx.routing_call_timeout, async {
        if let Some(group_id) = recipient.strip_prefix("group_") {
            ctx.routing
                .route_group(&msg_id, &ctx.user_id, group_id, &content)
                .await
        } else {
            ctx.routing
                .route_private(&msg_id, &ctx.user_id, &recipient, &content)
                .await
        }
    })
    .await;

    match route_result {
        Ok(Ok(outcome)) if outcome.accepted => {
            let _ = ctx.mailbox.try_enqueue(OutboundFrame::Ack {
                msg_id,
                sequence_number: outcome.sequence_number,
                timestamp: now_millis(),
            });
        }
        Ok(Ok(outcome)) => {
            let _ = ctx.mailbox.try_enqueue(OutboundFrame::error(
                codes::INTERNAL,
                outcome.message.unwrap_or_else(|| "message was not accepted".to_owned()),
                now_millis(),
            ));
        }
        Ok(Err(err)) => {
            let _ = ctx
                .mailbox
                .try_enqueue(OutboundFrame::error(codes::INTERNAL, err.to_string(), now_millis()));
        }
        Err(_elapsed) => {
            let _ = ctx.mailbox.try_enqueue(OutboundFrame::error(
                codes::INTERNAL,
                "routing service call timed out",
                now_millis(),
            ));
        }
    }
}

async fn writer_task(
    mut sink: Box<dyn FrameSink>,
    mut mailbox_rx: mpsc::Receiver<OutboundFrame>,
    write_timeout: Duration,
    cancellation: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancellation.cancelled() => break,
            maybe_frame = mailbox_rx.recv() => {
                match maybe_frame {
                    None => break,
                    Some(frame) => {
                        match tokio::time::timeout(write_timeout, sink.send(frame)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => {
                                tracing::info!(error = %err, "transport write failed");
                                cancellation.cancel();
                                break;
                            }
                            Err(_elapsed) => {
                                tracing::info!("transport write timed out, closing");
                                cancellation.cancel();
                                break;
                            }
                        }
                    }
                }
            }
        }
    }
    sink.close().await;
}

async fn heartbeat_task(
    mailbox: Mailbox,
    activity: Arc<ActivityTracker>,
    interval: Duration,
    heartbeat_timeout: Duration,
    pong_timeout: Duration,
    write_timeout: Duration,
    cancellation: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately.
    let mut backlog_since: Option<Instant> = None;
    loop {
        tokio::select! {
            _ = cancellation.cancelled() => return,
            _ = ticker.tick() => {
                // heartbeat_timeout (spec §6): hard ceiling on total
                // inactivity, independent of the heartbeat cadence itself.
                if activity.idle_for() > heartbeat_timeout {
                    tracing::info!("heartbeat timeout elapsed with no client activity, closing connection");
                    cancellation.cancel();
                    return;
                }

                // pong_timeout (spec §4.2 "heartbeat miss"): the tighter of
                // the two, checked on every tick so it fires without waiting
                // for heartbeat_timeout to also elapse.
                if activity.idle_for() > pong_timeout {
                    tracing::info!("pong timeout elapsed, closing connection");
                    cancellation.cancel();
                    return;
                }

                // Liveness under client stall (spec §5/§8): a mailbox stuck at
                // capacity is a stalled writer; close once that backlog has
                // persisted longer than the write deadline.
                if mailbox.len() >= mailbox.capacity() {
                    let since = *backlog_since.get_or_insert_with(Instant::now);
                    if since.elapsed() > write_timeout {
                        tracing::info!("mailbox stayed above the high watermark past the write deadline, closing");
                        cancellation.cancel();
                        return;
                    }
                } else {
                    backlog_since = None;
                }

                if matches!(mailbox.try_enqueue(OutboundFrame::Heartbeat), EnqueueOutcome::Closed) {
                    cancellation.cancel();
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{AuthenticatedIdentity, RouteOutcome};
    use crate::error::SwitchError;
    use async_trait::async_trait;
    use gateway_directory::{DirectoryEvent, SessionEntry};
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Mutex as AsyncMutex;

    struct FakeAuth {
        user_id: &'static str,
        device_id: &'static str,
    }

    #[async_trait]
    impl AuthService for FakeAuth {
        async fn validate_token(&self, _token: &str) -> Result<AuthenticatedIdentity, SwitchError> {
            Ok(AuthenticatedIdentity {
                user_id: UserId::from(self.user_id),
                raw_device_id: self.device_id.to_owned(),
            })
        }
    }

    struct FakeDirectory;

    #[async_trait]
    impl SessionDirectory for FakeDirectory {
        async fn register(&self, _: &UserId, _: &DeviceId, _: &str) -> Result<(), DirectoryError> {
            Ok(())
        }
        async fn renew(&self, _: &UserId) -> Result<(), DirectoryError> {
            Ok(())
        }
        async fn unregister(&self, _: &UserId, _: &DeviceId) -> Result<(), DirectoryError> {
            Ok(())
        }
        async fn lookup_user(&self, _: &UserId) -> Result<Vec<SessionEntry>, DirectoryError> {
            Ok(Vec::new())
        }
        fn watch_users(&self) -> tokio::sync::broadcast::Receiver<DirectoryEvent> {
            tokio::sync::broadcast::channel(1).1
        }
    }

    struct CountingRouting {
        calls: AtomicU32,
    }

    #[async_trait]
    impl RoutingService for CountingRouting {
        async fn route_private(
            &self,
            _msg_id: &str,
            _sender: &UserId,
            _recipient: &str,
            _content: &str,
        ) -> Result<RouteOutcome, SwitchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(RouteOutcome {
                sequence_number: n as u64,
                accepted: true,
                message: None,
            })
        }
        async fn route_group(
            &self,
            msg_id: &str,
            sender: &UserId,
            group_id: &str,
            content: &str,
        ) -> Result<RouteOutcome, SwitchError> {
            self.route_private(msg_id, sender, group_id, content).await
        }
    }

    struct ScriptedSource {
        frames: std::collections::VecDeque<RecvOutcome>,
    }

    impl ScriptedSource {
        fn new(frames: Vec<InboundFrame>) -> Self {
            let mut queue: std::collections::VecDeque<RecvOutcome> =
                frames.into_iter().map(RecvOutcome::Frame).collect();
            queue.push_back(RecvOutcome::Closed);
            Self { frames: queue }
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn recv(&mut self) -> RecvOutcome {
            self.frames.pop_front().unwrap_or(RecvOutcome::Closed)
        }
    }

    struct RecordingSink {
        sent: Arc<AsyncMutex<Vec<OutboundFrame>>>,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send(&mut self, frame: OutboundFrame) -> Result<(), std::io::Error> {
            self.sent.lock().await.push(frame);
            Ok(())
        }
        async fn close(&mut self) {}
    }

    fn config() -> Arc<GatewayConfig> {
        let mut cfg = GatewayConfig::default();
        cfg.auth_timeout_secs = 1;
        cfg.registry_call_timeout_secs = 1;
        cfg.routing_call_timeout_secs = 1;
        cfg.heartbeat_interval_secs = 3600;
        cfg.pong_timeout_secs = 3600;
        cfg.mailbox_capacity = 32;
        Arc::new(cfg)
    }

    fn device() -> &'static str {
        "550e8400-e29b-41d4-a716-446655440000"
    }

    #[tokio::test]
    async fn invalid_device_id_is_rejected_before_active() {
        let deps = Arc::new(ConnectionDeps {
            auth: Arc::new(FakeAuth {
                user_id: "user_a",
                device_id: "not-a-uuid",
            }),
            directory: Arc::new(FakeDirectory),
            routing: Arc::new(CountingRouting {
                calls: AtomicU32::new(0),
            }),
            dedup: Arc::new(gateway_dedup::InMemoryDedupStore::new()),
            connections: Arc::new(ConnectionMap::new()),
            clock: gateway_core::time::system_clock(),
        });
        let connection = Connection::new("tok", "node-1", config(), deps);
        let sent = Arc::new(AsyncMutex::new(Vec::new()));
        let sink = Box::new(RecordingSink { sent: sent.clone() });
        let source = Box::new(ScriptedSource::new(Vec::new()));

        let final_state = connection.run(sink, source).await;
        assert_eq!(final_state, ConnectionState::Rejected);
        let sent = sent.lock().await;
        assert!(matches!(sent.first(), Some(OutboundFrame::Error { error_code, .. }) if error_code == "INVALID_DEVICE_ID"));
    }

    #[tokio::test]
    async fn duplicate_send_msg_calls_routing_once_and_acks_twice() {
        let routing = Arc::new(CountingRouting {
            calls: AtomicU32::new(0),
        });
        let deps = Arc::new(ConnectionDeps {
            auth: Arc::new(FakeAuth {
                user_id: "user_a",
                device_id: device(),
            }),
            directory: Arc::new(FakeDirectory),
            routing: routing.clone(),
            dedup: Arc::new(gateway_dedup::InMemoryDedupStore::new()),
            connections: Arc::new(ConnectionMap::new()),
            clock: gateway_core::time::system_clock(),
        });
        let connection = Connection::new("tok", "node-1", config(), deps);
        let sent = Arc::new(AsyncMutex::new(Vec::new()));
        let sink = Box::new(RecordingSink { sent: sent.clone() });
        let frame = InboundFrame::SendMsg {
            msg_id: "m1".into(),
            recipient: "user_b".into(),
            content: "hi".into(),
            timestamp: 0,
        };
        let source = Box::new(ScriptedSource::new(vec![frame.clone(), frame]));

        let final_state = connection.run(sink, source).await;
        assert_eq!(final_state, ConnectionState::Closed);
        assert_eq!(routing.calls.load(Ordering::SeqCst), 1);
        let sent = sent.lock().await;
        let ack_count = sent
            .iter()
            .filter(|f| matches!(f, OutboundFrame::Ack { .. }))
            .count();
        assert_eq!(ack_count, 2);
    }

    #[tokio::test]
    async fn rate_limit_trip_drops_excess_frames() {
        let mut cfg = GatewayConfig::default();
        cfg.auth_timeout_secs = 1;
        cfg.registry_call_timeout_secs = 1;
        cfg.routing_call_timeout_secs = 1;
        cfg.heartbeat_interval_secs = 3600;
        cfg.pong_timeout_secs = 3600;
        cfg.mailbox_capacity = 64;
        cfg.max_messages_per_second = 2;
        let routing = Arc::new(CountingRouting {
            calls: AtomicU32::new(0),
        });
        let deps = Arc::new(ConnectionDeps {
            auth: Arc::new(FakeAuth {
                user_id: "user_a",
                device_id: device(),
            }),
            directory: Arc::new(FakeDirectory),
            routing: routing.clone(),
            dedup: Arc::new(gateway_dedup::InMemoryDedupStore::new()),
            connections: Arc::new(ConnectionMap::new()),
            clock: gateway_core::time::system_clock(),
        });
        let connection = Connection::new("tok", "node-1", Arc::new(cfg), deps);
        let sent = Arc::new(AsyncMutex::new(Vec::new()));
        let sink = Box::new(RecordingSink { sent: sent.clone() });
        let frames = (0..5)
            .map(|i| InboundFrame::SendMsg {
                msg_id: format!("m{i}"),
                recipient: "user_b".into(),
                content: "hi".into(),
                timestamp: 0,
            })
            .collect();
        let source = Box::new(ScriptedSource::new(frames));

        let _ = connection.run(sink, source).await;
        assert_eq!(routing.calls.load(Ordering::SeqCst), 2);
        let sent = sent.lock().await;
        let rejections = sent
            .iter()
            .filter(|f| matches!(f, OutboundFrame::Error { error_code, .. } if error_code == "RATE_LIMIT_EXCEEDED"))
            .count();
        assert_eq!(rejections, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn mailbox_stuck_above_watermark_triggers_close() {
        let (mailbox, _rx) = Mailbox::new(2);
        // Fill the mailbox and never drain it, simulating a stalled client.
        let _ = mailbox.try_enqueue(OutboundFrame::Heartbeat);
        let _ = mailbox.try_enqueue(OutboundFrame::Heartbeat);
        let activity = Arc::new(ActivityTracker::new(gateway_core::time::system_clock()));
        let cancellation = CancellationToken::new();

        let handle = tokio::spawn(heartbeat_task(
            mailbox,
            activity,
            Duration::from_secs(1),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            Duration::from_secs(5),
            cancellation.clone(),
        ));

        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert!(!cancellation.is_cancelled());

        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert!(cancellation.is_cancelled());
        handle.abort();
    }
}
