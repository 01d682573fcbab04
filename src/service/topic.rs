use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};

use dashmap::{DashMap, DashSet};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{CommandResponse, KvError};

/// Capacity of one subscriber's delivery queue. The queue is a ring: when it
/// is full the oldest item is overwritten, so a slow reader only ever sees
/// the most recent items and a publisher is never blocked.
const SUBSCRIPTION_CAPACITY: usize = 10;

/// The next id generator of a subscription.
static NEXT_ID: AtomicU32 = AtomicU32::new(1);

/// Get the next id of a subscription. Status 0 marks the end of a
/// subscription stream, so an allocation that wraps through 0 skips it.
fn get_next_subscription_id() -> u32 {
    loop {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

/// A trait for a topic registry.
pub trait Topic: Send + Sync + 'static {
    /// Subscribe to a topic.
    fn subscribe(self, name: String) -> Subscription;
    /// Unsubscribe from a topic. Returns the id if the subscription existed
    /// under that topic.
    fn unsubscribe(self, name: String, id: u32) -> Result<u32, KvError>;
    /// Publish messages to every current subscriber of a topic.
    fn publish(self, name: String, data: Vec<Arc<CommandResponse>>);
}

/// The receiving side of one `Subscribe` call, handed to the stream that
/// serves the subscriber.
pub struct Subscription {
    pub id: u32,
    pub rx: broadcast::Receiver<Arc<CommandResponse>>,
    /// Set by unsubscribe or broker shutdown; once set, nothing queued may
    /// still be delivered.
    pub cancelled: Arc<AtomicBool>,
}

/// The sending side kept in the registry.
struct SubscriptionHandle {
    topic: String,
    tx: broadcast::Sender<Arc<CommandResponse>>,
    cancelled: Arc<AtomicBool>,
}

/// A broadcaster for topics.
#[derive(Default)]
pub struct Broadcaster {
    /// The topics, key is the topic name, value is the set of subscription ids.
    topics: DashMap<String, DashSet<u32>>,
    /// The subscriptions, key is the subscription id. The owning topic is
    /// recorded on the handle so unsubscribe never scans the topic map.
    subscriptions: DashMap<u32, SubscriptionHandle>,
}

impl Topic for Arc<Broadcaster> {
    fn subscribe(self, name: String) -> Subscription {
        let id = {
            let entry = self.topics.entry(name.clone()).or_default();
            let id = get_next_subscription_id();
            entry.value().insert(id);
            id
        };

        let (tx, rx) = broadcast::channel(SUBSCRIPTION_CAPACITY);
        let cancelled = Arc::new(AtomicBool::new(false));

        self.subscriptions.insert(
            id,
            SubscriptionHandle {
                topic: name,
                tx,
                cancelled: cancelled.clone(),
            },
        );
        debug!("Subscription {} is added", id);

        Subscription { id, rx, cancelled }
    }

    fn unsubscribe(self, name: String, id: u32) -> Result<u32, KvError> {
        self.remove_subscription(name, id)
            .ok_or(KvError::NotFoundSubscription(id))
    }

    fn publish(self, name: String, data: Vec<Arc<CommandResponse>>) {
        let mut dead = vec![];

        if let Some(topic) = self.topics.get(&name) {
            let subscriptions = topic.value().clone();

            drop(topic); // unlock quickly

            for id in subscriptions.into_iter() {
                if let Some(sub) = self.subscriptions.get(&id) {
                    for item in &data {
                        // a ring send never waits; it only fails when the
                        // receiver is gone
                        if sub.tx.send(item.clone()).is_err() {
                            warn!("Subscription {} is gone, removing it", id);
                            dead.push(id);
                            break;
                        }
                    }
                }
            }
        }

        for id in dead {
            _ = self.remove_subscription(name.clone(), id);
        }
    }
}

impl Broadcaster {
    /// Cancel a subscription and drop its sender. Returns the id if it was
    /// registered under the given topic; an unknown or already cancelled id
    /// yields None.
    pub fn remove_subscription(&self, name: String, id: u32) -> Option<u32> {
        match self.subscriptions.get(&id) {
            // the flag must be up before the sender goes away, so nothing
            // still queued is delivered once removal is observable
            Some(sub) if sub.topic == name => sub.cancelled.store(true, Ordering::Release),
            _ => return None,
        }

        if let Some(v) = self.topics.get_mut(&name) {
            v.remove(&id);
            if v.is_empty() {
                info!("Topic is empty, removing it: {}", name);
                drop(v); // unlock quickly
                self.topics.remove(&name);
            }
        }
        debug!("Unsubscribed from topic: {}, id: {}", name, id);
        self.subscriptions.remove(&id).map(|(id, _)| id)
    }

    /// Cancel every subscription. Used on server shutdown so each subscriber
    /// stream observes its terminal frame.
    pub fn cancel_all(&self) {
        let ids: Vec<u32> = self.subscriptions.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, sub)) = self.subscriptions.remove(&id) {
                sub.cancelled.store(true, Ordering::Release);
            }
        }
        self.topics.clear();
    }
}
