//! Process-wide pub/sub bus fanning typed events into every connected
//! app-WebSocket subscriber.
//!
//! Each subscriber owns a bounded queue. Publishing never blocks: a full
//! (or gone) queue drops that subscriber, whose client will reconnect and
//! re-sync from a fresh snapshot. Events published from one task arrive at
//! any given subscriber in publication order.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::types::Event;

pub type SubscriberId = u64;

pub struct EventHub {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<Event>>>,
    next_id: AtomicU64,
    queue_size: usize,
}

impl EventHub {
    pub fn new(queue_size: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_size: queue_size.max(1),
        }
    }

    /// Register a subscriber; the receiver closes when the hub drops the
    /// subscriber on overflow.
    pub fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<Event>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_size);
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.insert(id, tx);
        }
        debug!(event = "daemon.hub.subscribed", subscriber_id = id);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.remove(&id);
        }
        debug!(event = "daemon.hub.unsubscribed", subscriber_id = id);
    }

    /// Fan an event to every subscriber. Slow or closed subscribers are
    /// dropped.
    pub fn publish(&self, event: Event) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return;
        };
        let mut dropped: Vec<SubscriberId> = Vec::new();
        for (&id, tx) in subscribers.iter() {
            if let Err(e) = tx.try_send(event.clone()) {
                match e {
                    mpsc::error::TrySendError::Full(_) => {
                        warn!(
                            event = "daemon.hub.subscriber_overflow",
                            subscriber_id = id,
                        );
                    }
                    mpsc::error::TrySendError::Closed(_) => {}
                }
                dropped.push(id);
            }
        }
        for id in dropped {
            subscribers.remove(&id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_deleted(id: &str) -> Event {
        Event::SessionDeleted {
            session_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let hub = EventHub::new(16);
        let (_id1, mut rx1) = hub.subscribe();
        let (_id2, mut rx2) = hub.subscribe();

        hub.publish(session_deleted("s1"));

        assert_eq!(rx1.recv().await.unwrap(), session_deleted("s1"));
        assert_eq!(rx2.recv().await.unwrap(), session_deleted("s1"));
    }

    #[tokio::test]
    async fn test_order_preserved_per_subscriber() {
        let hub = EventHub::new(16);
        let (_id, mut rx) = hub.subscribe();
        for i in 0..5 {
            hub.publish(session_deleted(&format!("s{}", i)));
        }
        for i in 0..5 {
            assert_eq!(rx.recv().await.unwrap(), session_deleted(&format!("s{}", i)));
        }
    }

    #[tokio::test]
    async fn test_overflow_drops_subscriber() {
        let hub = EventHub::new(2);
        let (_id, mut rx) = hub.subscribe();
        for i in 0..5 {
            hub.publish(session_deleted(&format!("s{}", i)));
        }
        assert_eq!(hub.subscriber_count(), 0);

        // The queued events are still readable, then the channel closes.
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_receiver_is_pruned() {
        let hub = EventHub::new(16);
        let (_id, rx) = hub.subscribe();
        drop(rx);
        hub.publish(session_deleted("s1"));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let hub = EventHub::new(16);
        let (id, _rx) = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        hub.unsubscribe(id);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
