//! Named broadcast channels for repo-update messages.
//!
//! One process-local registry multiplexes every replica in the
//! process. Subscribers register a handler, optionally filtered by an
//! index key matched against the message's project id; delivery
//! preserves push order.

use crate::error::{SyncError, SyncResult};
use entivc_protocol::RepoUpdateMessage;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Identifies one subscription within a channel.
pub type SubscriptionId = u64;

type Handler = Arc<dyn Fn(&RepoUpdateMessage) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    index_key: Option<String>,
    handler: Handler,
}

/// A single named broadcast channel.
pub struct Channel {
    name: String,
    next_id: AtomicU64,
    subscribers: RwLock<Vec<Subscription>>,
    closed: AtomicBool,
}

impl Channel {
    fn new(name: String) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Delivers a message to every matching subscriber, in
    /// subscription order.
    pub fn push(&self, message: &RepoUpdateMessage) -> SyncResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::ChannelClosed {
                name: self.name.clone(),
            });
        }

        // Clone handlers out so a handler may subscribe or unsubscribe
        // without deadlocking the registry.
        let handlers: Vec<Handler> = self
            .subscribers
            .read()
            .iter()
            .filter(|s| {
                s.index_key
                    .as_deref()
                    .map_or(true, |key| key == message.project_id)
            })
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in handlers {
            handler(message);
        }
        Ok(())
    }

    /// Registers a handler; `index_key` limits delivery to messages
    /// for that project.
    pub fn subscribe(
        &self,
        index_key: Option<String>,
        handler: impl Fn(&RepoUpdateMessage) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.write().push(Subscription {
            id,
            index_key,
            handler: Arc::new(handler),
        });
        id
    }

    /// Removes a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.write().retain(|s| s.id != id);
    }

    /// Returns the number of active subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers.write().clear();
    }
}

/// Registry of named channels.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Arc<Channel>>>,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the named channel, creating it on first use.
    pub fn channel(&self, name: &str) -> Arc<Channel> {
        if let Some(channel) = self.channels.read().get(name) {
            return Arc::clone(channel);
        }
        let mut channels = self.channels.write();
        Arc::clone(
            channels
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Channel::new(name.to_string()))),
        )
    }

    /// Closes and removes a channel; pending handles start failing.
    pub fn close(&self, name: &str) {
        if let Some(channel) = self.channels.write().remove(name) {
            channel.close();
        }
    }
}
