//! Background lease-renewal loop for a single connection's directory entry.
//!
//! Grounded in `gateway_core::backoff` (jittered exponential retry) and the
//! teacher's state-machine discipline in `spark_switch::core::session`: a
//! connection's directory membership is itself a tiny state machine —
//! `Renewing -> Renewing | LeaseLost` — and `LeaseRenewer` is the task that
//! drives it forward on a timer instead of on inbound signaling.

use std::sync::Arc;
use std::time::Duration;

use gateway_core::backoff::{BackoffPolicy, RetryState};
use gateway_core::UserId;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::traits::SessionDirectory;

/// Current status of a connection's directory lease, as observed by its
/// [`LeaseRenewer`]. `LeaseLost` is terminal: the renewer task exits after
/// publishing it, and the connection must close (spec §4.2/§7: a connection
/// that can no longer prove its own liveness to the directory is no longer
/// routable and must stop accepting traffic).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LeaseStatus {
    Renewing,
    LeaseLost,
}

/// Periodically renews one user's directory lease, retrying transient
/// failures with jittered backoff and giving up after `max_consecutive_failures`.
pub struct LeaseRenewer {
    status_tx: watch::Sender<LeaseStatus>,
}

impl LeaseRenewer {
    /// Spawns the renewal loop and returns a status watch plus its join handle.
    /// The connection task should `select!` on `status.changed()` alongside
    /// its socket read/write to notice `LeaseLost` promptly.
    pub fn spawn(
        directory: Arc<dyn SessionDirectory>,
        user_id: UserId,
        renew_interval: Duration,
        max_consecutive_failures: u32,
    ) -> (watch::Receiver<LeaseStatus>, JoinHandle<()>) {
        let (status_tx, status_rx) = watch::channel(LeaseStatus::Renewing);
        let renewer = Self { status_tx };
        let handle = tokio::spawn(async move {
            renewer
                .run(directory, user_id, renew_interval, max_consecutive_failures)
                .await;
        });
        (status_rx, handle)
    }

    async fn run(
        self,
        directory: Arc<dyn SessionDirectory>,
        user_id: UserId,
        renew_interval: Duration,
        max_consecutive_failures: u32,
    ) {
        let policy = BackoffPolicy::default();
        let mut retry = RetryState::default();
        let mut consecutive_failures: u32 = 0;
        let mut ticker = tokio::time::interval(renew_interval);
        ticker.tick().await; // first tick fires immediately; skip it, the initial register already happened.

        loop {
            ticker.tick().await;
            match directory.renew(&user_id).await {
                Ok(()) => {
                    consecutive_failures = 0;
                    retry.reset();
                }
                Err(err) => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        user_id = %user_id,
                        attempt = consecutive_failures,
                        error = %err,
                        "directory lease renewal failed"
                    );
                    if consecutive_failures >= max_consecutive_failures {
                        tracing::error!(user_id = %user_id, "directory lease lost after repeated renewal failures");
                        let _ = self.status_tx.send(LeaseStatus::LeaseLost);
                        return;
                    }
                    tokio::time::sleep(retry.next_delay(&policy)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DirectoryError;
    use crate::memory::InMemorySessionDirectory;
    use gateway_core::DeviceId;

    #[tokio::test]
    async fn successful_renewals_never_report_lease_lost() {
        let (dir, sweep_handle) = InMemorySessionDirectory::spawn(Duration::from_secs(90));
        let user = UserId::from("user_z");
        dir.register(
            &user,
            &DeviceId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap(),
            "node-1",
        )
        .await
        .unwrap();

        let (mut status, handle) =
            LeaseRenewer::spawn(dir.clone(), user, Duration::from_millis(20), 3);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(*status.borrow(), LeaseStatus::Renewing);

        handle.abort();
        sweep_handle.abort();
        let _ = status.changed();
    }

    struct AlwaysFailingDirectory;

    #[async_trait::async_trait]
    impl SessionDirectory for AlwaysFailingDirectory {
        async fn register(
            &self,
            _user_id: &UserId,
            _device_id: &DeviceId,
            _node_id: &str,
        ) -> Result<(), DirectoryError> {
            Ok(())
        }

        async fn renew(&self, _user_id: &UserId) -> Result<(), DirectoryError> {
            Err(DirectoryError::Unavailable("simulated outage".into()))
        }

        async fn unregister(
            &self,
            _user_id: &UserId,
            _device_id: &DeviceId,
        ) -> Result<(), DirectoryError> {
            Ok(())
        }

        async fn lookup_user(&self, _user_id: &UserId) -> Result<Vec<crate::traits::SessionEntry>, DirectoryError> {
            Ok(Vec::new())
        }

        fn watch_users(&self) -> tokio::sync::broadcast::Receiver<crate::traits::DirectoryEvent> {
            tokio::sync::broadcast::channel(1).1
        }
    }

    #[tokio::test]
    async fn sustained_failure_reports_lease_lost() {
        let directory: Arc<dyn SessionDirectory> = Arc::new(AlwaysFailingDirectory);
        let (mut status, handle) = LeaseRenewer::spawn(
            directory,
            UserId::from("user_y"),
            Duration::from_millis(10),
            2,
        );

        tokio::time::timeout(Duration::from_secs(5), status.changed())
            .await
            .expect("status should change before the test timeout")
            .unwrap();
        assert_eq!(*status.borrow(), LeaseStatus::LeaseLost);
        let _ = handle.await;
    }
}
