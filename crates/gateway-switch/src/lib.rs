//! # gateway-switch
//!
//! The connection engine: per-connection state machine, the shared
//! connection map, the Push service and the Event consumer (spec §4.2,
//! §4.5, §4.6). Depends on `gateway-core`, `gateway-directory`,
//! `gateway-membership` and `gateway-dedup`; nothing in those crates
//! depends back on this one, the same acyclic shape the teacher's
//! `spark-switch` occupies relative to `spark-core`.

pub mod applications;
pub mod collaborators;
pub mod connection;
pub mod connection_map;
pub mod error;
pub mod event_bus_memory;
pub mod event_bus_redis;

pub use applications::{EventConsumer, PushOutcome, PushService};
pub use collaborators::{AuthService, AuthenticatedIdentity, BusEvent, EventBus, RouteOutcome, RoutingService, Topic};
pub use connection::{Connection, ConnectionDeps};
pub use connection::state::ConnectionState;
pub use connection_map::{ConnectionHandle, ConnectionMap};
pub use error::SwitchError;
pub use event_bus_memory::InMemoryEventBus;
pub use event_bus_redis::RedisEventBus;
