pub mod events_consumer;
pub mod push;

pub use events_consumer::EventConsumer;
pub use push::{PushOutcome, PushService};
