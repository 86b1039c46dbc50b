//! In-memory session directory.
//!
//! # Design summary
//! - **Why**: every crate's test suite and `gateway-server`'s single-node
//!   dev-mode wiring need a [`crate::traits::SessionDirectory`] without a
//!   Redis instance; grounded in the teacher's `LocationStore`
//!   (`DashMap`-backed `Aor -> ContactUri` table), generalized from one
//!   mapping to the full lease/TTL/watch contract spec §4.3 describes.
//! - **What**: one `DashMap<UserId, Lease>` entry per user, a background
//!   sweep task that expires leases whose TTL has lapsed without a renewal,
//!   and a `broadcast` channel standing in for the directory's watch stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use gateway_core::{DeviceId, UserId};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::DirectoryError;
use crate::traits::{DirectoryEvent, SessionDirectory, SessionEntry};

const MAX_DEVICES_PER_USER: usize = 5;
const EVENT_CHANNEL_CAPACITY: usize = 4096;

#[derive(Clone, Debug)]
struct DeviceRecord {
    device_id: DeviceId,
    node_id: String,
    connected_at: i64,
}

struct Lease {
    devices: Vec<DeviceRecord>,
    expires_at: Instant,
}

pub struct InMemorySessionDirectory {
    ttl: Duration,
    leases: DashMap<UserId, Lease>,
    events: broadcast::Sender<DirectoryEvent>,
}

impl InMemorySessionDirectory {
    /// Builds the directory and spawns its lease-expiry sweep task on the
    /// current Tokio runtime. The returned handle can be aborted by the
    /// caller on shutdown; letting it run is also safe since it only touches
    /// directory-internal state.
    pub fn spawn(ttl: Duration) -> (Arc<Self>, tokio::task::JoinHandle<()>) {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let this = Arc::new(Self {
            ttl,
            leases: DashMap::new(),
            events: tx,
        });
        let sweeper = this.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1).min(ttl));
            loop {
                interval.tick().await;
                sweeper.sweep_expired();
            }
        });
        (this, handle)
    }

    fn sweep_expired(&self) {
        let now = Instant::now();
        let expired_users: Vec<UserId> = self
            .leases
            .iter()
            .filter(|entry| entry.expires_at <= now)
            .map(|entry| entry.key().clone())
            .collect();

        for user_id in expired_users {
            if let Some((_, lease)) = self.leases.remove(&user_id) {
                for device in lease.devices {
                    let _ = self.events.send(DirectoryEvent::Removed {
                        user_id: user_id.clone(),
                        device_id: device.device_id,
                    });
                }
            }
        }
    }

    fn now_millis() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionDirectory for InMemorySessionDirectory {
    async fn register(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        node_id: &str,
    ) -> Result<(), DirectoryError> {
        let mut entry = self.leases.entry(user_id.clone()).or_insert_with(|| Lease {
            devices: Vec::new(),
            expires_at: Instant::now() + self.ttl,
        });

        let already_present = entry
            .devices
            .iter()
            .any(|device| &device.device_id == device_id);

        if !already_present && entry.devices.len() >= MAX_DEVICES_PER_USER {
            return Err(DirectoryError::MaxDevicesExceeded);
        }

        if already_present {
            if let Some(device) = entry
                .devices
                .iter_mut()
                .find(|device| &device.device_id == device_id)
            {
                device.node_id = node_id.to_owned();
            }
        } else {
            let record = DeviceRecord {
                device_id: device_id.clone(),
                node_id: node_id.to_owned(),
                connected_at: Self::now_millis(),
            };
            entry.devices.push(record.clone());
            let _ = self.events.send(DirectoryEvent::Created(SessionEntry {
                user_id: user_id.clone(),
                device_id: device_id.clone(),
                node_id: node_id.to_owned(),
                connected_at: record.connected_at,
            }));
        }

        entry.expires_at = Instant::now() + self.ttl;
        Ok(())
    }

    async fn renew(&self, user_id: &UserId) -> Result<(), DirectoryError> {
        match self.leases.get_mut(user_id) {
            Some(mut lease) => {
                lease.expires_at = Instant::now() + self.ttl;
                Ok(())
            }
            None => Err(DirectoryError::NoActiveLease {
                user_id: user_id.to_string(),
            }),
        }
    }

    async fn unregister(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Result<(), DirectoryError> {
        let mut remove_user = false;
        if let Some(mut lease) = self.leases.get_mut(user_id) {
            lease.devices.retain(|device| &device.device_id != device_id);
            remove_user = lease.devices.is_empty();
        }
        if remove_user {
            self.leases.remove(user_id);
        }
        let _ = self.events.send(DirectoryEvent::Removed {
            user_id: user_id.clone(),
            device_id: device_id.clone(),
        });
        Ok(())
    }

    async fn lookup_user(&self, user_id: &UserId) -> Result<Vec<SessionEntry>, DirectoryError> {
        Ok(self
            .leases
            .get(user_id)
            .map(|lease| {
                lease
                    .devices
                    .iter()
                    .map(|device| SessionEntry {
                        user_id: user_id.clone(),
                        device_id: device.device_id.clone(),
                        node_id: device.node_id.clone(),
                        connected_at: device.connected_at,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn watch_users(&self) -> broadcast::Receiver<DirectoryEvent> {
        self.events.subscribe()
    }
}
