//! # gateway-directory
//!
//! Session directory client (spec §4.3): the leased `(user_id, device_id) ->
//! node_id` registry that lets any gateway node resolve where a user's other
//! devices are currently connected, backed by [`memory::InMemorySessionDirectory`]
//! for tests/single-node mode or [`redis_directory::RedisSessionDirectory`] in
//! production.

pub mod error;
pub mod lease;
pub mod memory;
pub mod redis_directory;
pub mod traits;

pub use error::DirectoryError;
pub use lease::{LeaseRenewer, LeaseStatus};
pub use memory::InMemorySessionDirectory;
pub use redis_directory::RedisSessionDirectory;
pub use traits::{DirectoryEvent, SessionDirectory, SessionEntry};
