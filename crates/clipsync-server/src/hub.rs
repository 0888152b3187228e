//! Room registry.
//!
//! Tracks which devices of which user are connected right now and fans
//! clips out to them. Each user has one room; each joined device owns a
//! bounded mailbox that its connection's writer task drains.
//!
//! Delivery is at-most-once: a full mailbox drops the message for that
//! device only, and the sender never waits on a slow consumer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, info};

use clipsync_shared::constants::DEFAULT_MAILBOX_CAPACITY;
use clipsync_shared::{DeviceId, UserId};

// ---------------------------------------------------------------------------
// Registrations
// ---------------------------------------------------------------------------

/// A device's live entry in a room.
///
/// The room holds the only long-lived sender, so removing (or replacing)
/// the entry is what ends the mailbox stream.
struct Subscription {
    epoch: u64,
    tx: mpsc::Sender<Bytes>,
}

type Room = HashMap<DeviceId, Subscription>;

/// Receiving end of a device's outbound queue.
#[derive(Debug)]
pub struct Mailbox {
    rx: mpsc::Receiver<Bytes>,
}

impl Mailbox {
    /// Next queued payload, or `None` once the registration is gone.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    #[cfg(test)]
    pub fn try_recv(&mut self) -> Result<Bytes, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }
}

/// Handle to one specific join, consumed by [`Hub::leave`].
///
/// Carries the epoch assigned at join time so that a late leave cannot
/// evict a newer registration of the same device.
#[derive(Debug)]
pub struct Registration {
    user_id: UserId,
    device_id: DeviceId,
    epoch: u64,
}

impl Registration {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Point-in-time counters for the admin endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub rooms: usize,
    pub devices: usize,
    pub delivered: u64,
    pub dropped: u64,
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

pub struct Hub {
    rooms: RwLock<HashMap<UserId, Room>>,
    mailbox_capacity: usize,
    next_epoch: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Hub {
    /// Create a hub whose mailboxes hold `mailbox_capacity` payloads.
    /// Zero selects [`DEFAULT_MAILBOX_CAPACITY`].
    pub fn new(mailbox_capacity: usize) -> Self {
        let mailbox_capacity = if mailbox_capacity == 0 {
            DEFAULT_MAILBOX_CAPACITY
        } else {
            mailbox_capacity
        };

        Self {
            rooms: RwLock::new(HashMap::new()),
            mailbox_capacity,
            next_epoch: AtomicU64::new(1),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn mailbox_capacity(&self) -> usize {
        self.mailbox_capacity
    }

    /// Register `device_id` in `user_id`'s room (created if missing).
    ///
    /// Replaces any existing registration for the same device; the
    /// replaced mailbox reaches end-of-stream.
    pub async fn join(&self, user_id: UserId, device_id: DeviceId) -> (Mailbox, Registration) {
        let (tx, rx) = mpsc::channel(self.mailbox_capacity);
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);

        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(user_id.clone()).or_default();
        let superseded = room.insert(device_id.clone(), Subscription { epoch, tx });

        info!(
            user = %user_id,
            device = %device_id,
            epoch,
            devices = room.len(),
            superseded = ?superseded.map(|s| s.epoch),
            "Device joined room"
        );

        (Mailbox { rx }, Registration { user_id, device_id, epoch })
    }

    /// Unregister the device this handle was issued for.
    ///
    /// Removes the entry only while it is still the registration that
    /// `join` returned. Deletes the room once it is empty. Returns whether
    /// anything was removed; either way the handle's mailbox no longer has
    /// a sender in the registry.
    pub async fn leave(&self, registration: Registration) -> bool {
        let Registration {
            user_id,
            device_id,
            epoch,
        } = registration;

        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(&user_id) else {
            debug!(user = %user_id, device = %device_id, epoch, "Leave for vanished room");
            return false;
        };

        let removed = match room.get(&device_id) {
            Some(current) if current.epoch == epoch => room.remove(&device_id).is_some(),
            _ => false,
        };

        if room.is_empty() {
            rooms.remove(&user_id);
            info!(user = %user_id, "Removed empty room");
        }

        if removed {
            info!(user = %user_id, device = %device_id, epoch, "Device left room");
        } else {
            debug!(
                user = %user_id,
                device = %device_id,
                epoch,
                "Stale leave ignored, device was re-registered"
            );
        }

        removed
    }

    /// Queue `payload` for every device in `user_id`'s room except `from`.
    ///
    /// The read lock is held only while the recipient list is copied; the
    /// enqueue attempts happen after it is released.
    pub async fn broadcast(&self, user_id: &UserId, from: &DeviceId, payload: Bytes) {
        let targets: Vec<(DeviceId, mpsc::Sender<Bytes>)> = {
            let rooms = self.rooms.read().await;
            let Some(room) = rooms.get(user_id) else {
                return;
            };
            room.iter()
                .filter(|(device_id, _)| *device_id != from)
                .map(|(device_id, sub)| (device_id.clone(), sub.tx.clone()))
                .collect()
        };

        for (device_id, tx) in targets {
            match tx.try_send(payload.clone()) {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        user = %user_id,
                        target = %device_id,
                        "Dropping clip for slow device"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(
                        user = %user_id,
                        target = %device_id,
                        "Mailbox closed mid-broadcast"
                    );
                }
            }
        }
    }

    /// Devices currently joined under `user_id`, sorted.
    pub async fn devices(&self, user_id: &UserId) -> Vec<DeviceId> {
        let rooms = self.rooms.read().await;
        let mut devices: Vec<DeviceId> = rooms
            .get(user_id)
            .map(|room| room.keys().cloned().collect())
            .unwrap_or_default();
        devices.sort();
        devices
    }

    pub async fn stats(&self) -> HubStats {
        let rooms = self.rooms.read().await;
        HubStats {
            rooms: rooms.len(),
            devices: rooms.values().map(|room| room.len()).sum(),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_MAILBOX_CAPACITY)
    }
}
