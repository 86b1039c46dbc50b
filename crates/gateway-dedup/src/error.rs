use thiserror::Error;

/// Dedup store failure domain. Per spec §7 every caller treats this as
/// fail-open (proceed as not-seen, log + count a metric) rather than
/// propagating it to the client.
#[derive(Debug, Error)]
pub enum DedupError {
    #[error("dedup store unavailable: {0}")]
    Unavailable(String),
}
