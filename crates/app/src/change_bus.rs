//! Per-device change bus backed by a tokio broadcast channel.

use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;

use thingrules_domain::property::PropertyMap;

use crate::ports::device::PropertyChange;

/// Default channel capacity; a slow subscriber past this lags.
pub const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of [`PropertyChange`] deltas for a single device.
///
/// Publishing succeeds even when there are no active subscribers
/// (the change is simply dropped). Closing the bus drops the sender so
/// every subscriber observes end-of-stream.
pub struct ChangeBus {
    device: String,
    sender: Mutex<Option<broadcast::Sender<PropertyChange>>>,
}

impl ChangeBus {
    /// Create a bus for `device` with the given channel capacity.
    #[must_use]
    pub fn new(device: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            device: device.into(),
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Subscribe to changes published *after* this call.
    ///
    /// After [`close`](Self::close) the returned receiver is already at
    /// end-of-stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PropertyChange> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Publish a delta. Empty deltas are not published.
    ///
    /// Returns `true` if the delta was handed to the channel.
    pub fn publish(&self, properties: PropertyMap) -> bool {
        if properties.is_empty() {
            return false;
        }
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            return false;
        };
        // send fails only when there are zero receivers, which is fine.
        let _ = sender.send(PropertyChange {
            device: self.device.clone(),
            properties,
        });
        true
    }

    /// Stop publishing and release all subscribers.
    pub fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
