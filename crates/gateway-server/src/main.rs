//! Gateway supervisor binary (spec §4.1, §6): parses CLI/config, wires the
//! collaborators, starts the [`gateway_server::Supervisor`] and serves the
//! `/ws`, `/health`, `/metrics` HTTP surface until a shutdown signal drains
//! it. Grounded in the teacher's `spark-hosting` binary shape (config load,
//! tracing init, component construction, `axum::serve` with graceful
//! shutdown) generalized from SIP/RTP transports to this single WebSocket
//! surface; CLI parsing and logging init follow the pack's `montana`
//! example (`clap::Parser` + `tracing_subscriber::fmt().with_env_filter`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use gateway_core::time::system_clock;
use gateway_core::GatewayConfig;
use gateway_dedup::{DedupStore, InMemoryDedupStore, RedisDedupStore};
use gateway_directory::{InMemorySessionDirectory, RedisSessionDirectory, SessionDirectory};
use gateway_membership::{InMemoryMembershipSource, MembershipSource};
use gateway_server::dev_collaborators::{DevAuthService, DevRoutingService};
use gateway_server::http::{router, AppState};
use gateway_server::shutdown::run_until_shutdown;
use gateway_server::{Collaborators, Supervisor};
use gateway_switch::{EventBus, InMemoryEventBus, RedisEventBus};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Dedup key prefix for the Redis-backed store (spec §4.5's idempotency
/// window is keyed by `msg_id` alone; the prefix only namespaces it within
/// a shared Redis instance).
const DEDUP_KEY_PREFIX: &str = "gw:dedup";

#[derive(Parser)]
#[command(name = "gateway-server", version, about = "Real-time IM connection gateway")]
struct Args {
    /// Path to a TOML config file. Falls back to `GATEWAY_CONFIG`, then built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// This node's identifier, recorded in the session directory so pushes
    /// know which node owns a device (spec §4.3).
    #[arg(long, default_value = "node-1")]
    node_id: String,

    /// Address the HTTP/WebSocket surface binds to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Redis URL for the session directory, dedup store and event bus. When
    /// absent the gateway runs standalone with in-memory collaborators,
    /// suitable for development and single-node testing, not for a cluster
    /// (spec §9: directory/dedup/bus state must be shared across nodes).
    #[arg(long)]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("gateway_server=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let config = match gateway_server::config_loader::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let metrics_handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(err) => {
            tracing::error!(error = %err, "failed to install prometheus recorder");
            std::process::exit(1);
        }
    };

    let collaborators = match build_collaborators(&config, args.redis_url.as_deref()).await {
        Ok(collaborators) => collaborators,
        Err(err) => {
            tracing::error!(error = %err, "failed to wire collaborators");
            std::process::exit(1);
        }
    };

    let supervisor = Supervisor::new(config, args.node_id.clone(), collaborators);
    supervisor.start();

    let listener = match tokio::net::TcpListener::bind(args.bind).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, bind = %args.bind, "failed to bind listener");
            std::process::exit(1);
        }
    };
    tracing::info!(bind = %args.bind, node_id = %args.node_id, "gateway listening");

    let app = router(AppState {
        supervisor: supervisor.clone(),
        metrics_handle,
    });

    let drain_deadline = supervisor.config().shutdown_drain();
    let serve_supervisor = supervisor.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(run_until_shutdown(serve_supervisor, drain_deadline))
        .await;

    if let Err(err) = result {
        tracing::error!(error = %err, "server loop exited with an error");
        std::process::exit(1);
    }
}

/// Picks in-memory or Redis-backed collaborators per `--redis-url`. The
/// token-verification and routing collaborators have no implementation in
/// this repository regardless of mode — spec §1 lists both as external
/// services this gateway only consumes, never owns (see `dev_collaborators`).
async fn build_collaborators(
    config: &GatewayConfig,
    redis_url: Option<&str>,
) -> Result<Collaborators, Box<dyn std::error::Error>> {
    let auth = Arc::new(DevAuthService);
    let routing = Arc::new(DevRoutingService::new());
    let membership_source: Arc<dyn MembershipSource> = Arc::new(InMemoryMembershipSource::new());

    let (directory, dedup, event_bus): (Arc<dyn SessionDirectory>, Arc<dyn DedupStore>, Arc<dyn EventBus>) =
        match redis_url {
            Some(redis_url) => {
                tracing::info!("wiring Redis-backed directory, dedup store and event bus");
                let directory = RedisSessionDirectory::connect(redis_url, config.registry_ttl()).await?;
                let dedup = RedisDedupStore::connect(redis_url, DEDUP_KEY_PREFIX).await?;
                let event_bus = RedisEventBus::connect(redis_url).await?;
                (directory, Arc::new(dedup), event_bus)
            }
            None => {
                tracing::info!("no --redis-url given, running standalone with in-memory collaborators");
                let (directory, _sweeper) = InMemorySessionDirectory::spawn(config.registry_ttl());
                let dedup = Arc::new(InMemoryDedupStore::new());
                let event_bus = Arc::new(InMemoryEventBus::new());
                (directory, dedup, event_bus)
            }
        };

    Ok(Collaborators {
        auth,
        directory,
        routing,
        dedup,
        membership_source,
        event_bus,
        clock: system_clock(),
    })
}
