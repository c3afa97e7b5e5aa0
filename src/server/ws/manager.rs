//! WebSocket connection registry and topic fan-out.
//!
//! Clients register an outbound sender; topics are sets of client ids.
//! Membership changes take the mutex; broadcasts iterate over a snapshot so
//! a slow or dead client never blocks the others. Sends that fail mark the
//! client dead and purge it from every topic.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

/// Outbound channel for one client; carries serialized JSON text frames.
pub type OutboundSender = UnboundedSender<String>;

#[derive(Default)]
struct WsRegistry {
    clients: HashMap<String, OutboundSender>,
    topics: HashMap<String, HashSet<String>>,
}

/// Connection registry, topic subscriptions, and broadcast primitives.
pub struct WsManager {
    inner: Mutex<WsRegistry>,
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WsManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(WsRegistry::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WsRegistry> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a client's outbound channel.
    pub fn connect(&self, client_id: &str, sender: OutboundSender) {
        let mut reg = self.lock();
        reg.clients.insert(client_id.to_string(), sender);
        tracing::debug!("WS client '{}' connected", client_id);
    }

    /// Remove a client and purge it from every topic.
    pub fn disconnect(&self, client_id: &str) {
        let mut reg = self.lock();
        reg.clients.remove(client_id);
        for members in reg.topics.values_mut() {
            members.remove(client_id);
        }
        reg.topics.retain(|_, members| !members.is_empty());
        tracing::debug!("WS client '{}' disconnected", client_id);
    }

    pub fn subscribe(&self, client_id: &str, topic: &str) {
        let mut reg = self.lock();
        reg.topics
            .entry(topic.to_string())
            .or_default()
            .insert(client_id.to_string());
    }

    pub fn unsubscribe(&self, client_id: &str, topic: &str) {
        let mut reg = self.lock();
        if let Some(members) = reg.topics.get_mut(topic) {
            members.remove(client_id);
            if members.is_empty() {
                reg.topics.remove(topic);
            }
        }
    }

    /// Send one message to every subscriber of `topic`.
    ///
    /// Tolerates per-client failure: dead clients are collected and purged,
    /// never propagated to the rest of the fan-out. Returns the number of
    /// successful sends.
    pub fn broadcast(&self, topic: &str, message: &Value) -> usize {
        let text = message.to_string();
        // Snapshot members and senders; send outside the lock.
        let targets: Vec<(String, OutboundSender)> = {
            let reg = self.lock();
            match reg.topics.get(topic) {
                Some(members) => members
                    .iter()
                    .filter_map(|id| {
                        reg.clients
                            .get(id)
                            .map(|sender| (id.clone(), sender.clone()))
                    })
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, sender) in targets {
            if sender.send(text.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(id);
            }
        }
        for id in dead {
            tracing::debug!("Purging dead WS client '{}'", id);
            self.disconnect(&id);
        }
        delivered
    }

    /// Send one message to one client. Returns whether the send succeeded;
    /// a failed send purges the client.
    pub fn send(&self, client_id: &str, message: &Value) -> bool {
        let sender = {
            let reg = self.lock();
            reg.clients.get(client_id).cloned()
        };
        match sender {
            Some(sender) if sender.send(message.to_string()).is_ok() => true,
            Some(_) => {
                self.disconnect(client_id);
                false
            }
            None => false,
        }
    }

    pub fn client_count(&self) -> usize {
        self.lock().clients.len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock().topics.get(topic).map_or(0, HashSet::len)
    }
}
