//! Registry of live subscriber connections and fan-out of updates to them.
//!
//! Each connection owns a bounded outbound queue; the socket writer drains it.
//! Pushing never waits on a slow client: when a queue is full the message is
//! dropped for that connection only. The registry lock is held only to
//! mutate or snapshot the registry, never across a send.

use crate::error::{Error, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

pub mod messages;

pub use self::messages::{ClientCommand, Group, HubMessage, SubscriberFilter};

pub type ConnectionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Connected,
    Closing,
}

struct Subscriber {
    group: Group,
    filter: SubscriberFilter,
    state: ConnectionState,
    sender: mpsc::Sender<HubMessage>,
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub delivered: usize,
    /// Skipped because the connection's queue was full
    pub dropped: usize,
    /// Connections found closed and removed from the registry
    pub removed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub violations: usize,
    pub dashboard: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    Skipped,
    Full,
    Dead,
}

type Target = (
    ConnectionId,
    ConnectionState,
    SubscriberFilter,
    mpsc::Sender<HubMessage>,
);

pub struct BroadcastHub {
    subscribers: RwLock<HashMap<ConnectionId, Subscriber>>,
    outbound_buffer: usize,
}

impl BroadcastHub {
    pub fn new(outbound_buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            outbound_buffer: outbound_buffer.max(1),
        }
    }

    /// Register a connection. The returned receiver is its outbound queue.
    pub fn connect(
        &self,
        group: Group,
        filter: SubscriberFilter,
    ) -> (ConnectionId, mpsc::Receiver<HubMessage>) {
        self.connect_with(group, filter, None)
    }

    /// Register a connection with `first` already queued, so no push can
    /// reach the client ahead of it.
    pub fn connect_with(
        &self,
        group: Group,
        filter: SubscriberFilter,
        first: Option<HubMessage>,
    ) -> (ConnectionId, mpsc::Receiver<HubMessage>) {
        let (sender, receiver) = mpsc::channel(self.outbound_buffer);
        if let Some(message) = first {
            // fresh queue with capacity >= 1
            if sender.try_send(message).is_err() {
                warn!("Could not queue first message for new {} connection", group);
            }
        }
        let id = Uuid::new_v4();
        let subscriber = Subscriber {
            group,
            filter,
            state: ConnectionState::Connected,
            sender,
        };

        let total = {
            let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
            subscribers.insert(id, subscriber);
            subscribers.len()
        };
        info!("WebSocket {} connected to {} ({} total)", id, group, total);
        (id, receiver)
    }

    /// Remove a connection. Returns false if it was already gone.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let removed = self
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some();
        if removed {
            info!("WebSocket {} disconnected", id);
        }
        removed
    }

    /// Flag a connection as going away; the next delivery attempt removes it.
    pub fn mark_closing(&self, id: ConnectionId) {
        if let Some(subscriber) = self
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&id)
        {
            subscriber.state = ConnectionState::Closing;
        }
    }

    pub fn update_filter(&self, id: ConnectionId, filter: SubscriberFilter) -> Result<()> {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        match subscribers.get_mut(&id) {
            Some(subscriber) => {
                debug!("WebSocket {} filter -> {:?}", id, filter);
                subscriber.filter = filter;
                Ok(())
            }
            None => Err(Error::NotFound(format!("connection {}", id))),
        }
    }

    pub fn filter_of(&self, id: ConnectionId) -> Option<SubscriberFilter> {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .map(|s| s.filter.clone())
    }

    /// Queue `message` for one connection only, unfiltered
    pub fn send_to(&self, id: ConnectionId, message: HubMessage) -> Result<()> {
        let target = {
            let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
            subscribers
                .get(&id)
                .map(|s| (s.state, s.sender.clone()))
        };
        let (state, sender) = target.ok_or_else(|| Error::NotFound(format!("connection {}", id)))?;

        match deliver(state, &sender, Some(message)) {
            Delivery::Sent | Delivery::Skipped => Ok(()),
            Delivery::Full => {
                warn!("WebSocket {} outbound queue full, message dropped", id);
                Ok(())
            }
            Delivery::Dead => {
                self.disconnect(id);
                Err(Error::NotFound(format!("connection {} is closed", id)))
            }
        }
    }

    /// Fan `message` out to every connection in `group`, narrowed by each
    /// connection's filter. Dead connections are removed; the rest still
    /// receive the message.
    pub fn push(&self, group: Group, message: &HubMessage) -> PushReport {
        let snapshot: Vec<Target> = {
            let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
            subscribers
                .iter()
                .filter(|(_, s)| s.group == group)
                .map(|(id, s)| (*id, s.state, s.filter.clone(), s.sender.clone()))
                .collect()
        };

        let mut report = PushReport::default();
        let mut dead = Vec::new();
        for (id, state, filter, sender) in snapshot {
            match deliver(state, &sender, message.filtered_for(&filter)) {
                Delivery::Sent => report.delivered += 1,
                Delivery::Skipped => {}
                Delivery::Full => {
                    warn!("WebSocket {} outbound queue full, message dropped", id);
                    report.dropped += 1;
                }
                Delivery::Dead => dead.push(id),
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
            for id in &dead {
                if subscribers.remove(id).is_some() {
                    report.removed += 1;
                }
            }
            info!("Removed {} dead {} connections", report.removed, group);
        }

        report
    }

    pub fn stats(&self) -> HubStats {
        let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        let violations = subscribers
            .values()
            .filter(|s| s.group == Group::Violations)
            .count();
        HubStats {
            violations,
            dashboard: subscribers.len() - violations,
            total: subscribers.len(),
        }
    }
}

fn deliver(
    state: ConnectionState,
    sender: &mpsc::Sender<HubMessage>,
    message: Option<HubMessage>,
) -> Delivery {
    if state != ConnectionState::Connected || sender.is_closed() {
        return Delivery::Dead;
    }
    let Some(message) = message else {
        return Delivery::Skipped;
    };
    match sender.try_send(message) {
        Ok(()) => Delivery::Sent,
        Err(TrySendError::Full(_)) => Delivery::Full,
        Err(TrySendError::Closed(_)) => Delivery::Dead,
    }
}

#[cfg(test)]
mod tests;
