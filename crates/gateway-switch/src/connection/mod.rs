pub mod connection;
pub mod mailbox;
pub mod rate_limit;
pub mod state;
pub mod transport;

pub use connection::{Connection, ConnectionDeps};
