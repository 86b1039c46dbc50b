//! Bounded-call helper.
//!
//! # Design summary
//! - **Why**: spec §5 names a fixed timeout for every suspension point that
//!   crosses a collaborator boundary (auth, directory, routing, mailbox,
//!   dedup). Wrapping each call site by hand in `tokio::time::timeout` is
//!   easy to get subtly wrong (forgetting to map the elapsed error into the
//!   gateway's own error type); this module is the one place that does it,
//!   grounded in the same "every external call is bounded" rule the
//!   teacher's transport layer applies to `accept`/`connect`.
//! - **What**: `bounded` takes an operation label (used only for the
//!   resulting [`GatewayError::Timeout`] message) and a future, and returns
//!   the future's own error type unchanged on success, or a timeout error
//!   convertible via [`crate::error::GatewayError`].

use std::future::Future;
use std::time::Duration;

use crate::error::GatewayError;

/// Runs `future` to completion or returns `Err(GatewayError::Timeout)` if
/// `deadline` elapses first. `operation` is a short label such as
/// `"auth.validate_token"`, used only for diagnostics.
pub async fn bounded<T, E, F>(
    operation: &str,
    deadline: Duration,
    future: F,
) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(deadline, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(GatewayError::internal(operation, err)),
        Err(_elapsed) => Err(GatewayError::timeout(operation, deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn returns_timeout_error_past_deadline() {
        let fut = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, std::io::Error>(())
        };
        let result = bounded("test.op", Duration::from_millis(5), fut).await;
        assert!(matches!(result, Err(GatewayError::Timeout { .. })));
    }

    #[tokio::test]
    async fn passes_through_success() {
        let fut = async { Ok::<_, std::io::Error>(42) };
        let result = bounded("test.op", Duration::from_secs(1), fut).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn wraps_inner_error_as_internal() {
        let fut = async {
            Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "boom"))
        };
        let result = bounded("test.op", Duration::from_secs(1), fut).await;
        assert!(matches!(result, Err(GatewayError::Internal { .. })));
    }
}
