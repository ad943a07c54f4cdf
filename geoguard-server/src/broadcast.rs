//! Fan-out of intrusion messages to live push subscribers.
//!
//! Each subscriber owns a bounded queue. Publishing never waits: a full
//! queue misses that message, a closed one is dropped from the set.

use log::{debug, trace, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

use geoguard_core::IntrusionMessage;

type Subscribers = HashMap<u64, mpsc::Sender<Arc<str>>>;

/// Outcome of one broadcast
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Subscribers whose queue was full
    pub skipped: usize,
    /// Subscribers found closed and removed
    pub dropped: usize,
}

#[derive(Clone)]
pub struct Broadcaster {
    subscribers: Arc<Mutex<Subscribers>>,
    next_id: Arc<AtomicU64>,
    queue_len: usize,
}

impl Broadcaster {
    pub fn new(queue_len: usize) -> Self {
        Broadcaster {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            queue_len: queue_len.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_len);
        self.lock().insert(id, tx);
        debug!("Push subscriber {} connected", id);

        Subscription {
            id,
            rx,
            subscribers: self.subscribers.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Serialize once, then offer the text to every subscriber
    pub fn broadcast(&self, message: &IntrusionMessage) -> BroadcastReport {
        let text: Arc<str> = match serde_json::to_string(message) {
            Ok(text) => text.into(),
            Err(e) => {
                warn!("Cannot serialize push message: {}", e);
                return BroadcastReport::default();
            }
        };
        self.send_text(text)
    }

    fn send_text(&self, text: Arc<str>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut subscribers = self.lock();

        subscribers.retain(|id, tx| match tx.try_send(text.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Push subscriber {} is not keeping up, message skipped", id);
                report.skipped += 1;
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Push subscriber {} went away", id);
                report.dropped += 1;
                false
            }
        });

        trace!("Broadcast {:?}", report);
        report
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Receiving end of one push subscriber; unsubscribes when dropped
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Arc<str>>,
    subscribers: Arc<Mutex<Subscribers>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next JSON message; `None` once the broadcaster is gone
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
        debug!("Push subscriber {} disconnected", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoguard_core::{AlertClass, AlertKind, AlertLog, NewAlert, VesselId, ZoneId};

    fn message() -> IntrusionMessage {
        let mut log = AlertLog::new(VesselId::from("V1"), 0);
        let event = log.append(NewAlert {
            vessel_id: VesselId::from("V1"),
            zone_id: ZoneId::from("Z1"),
            zone_name: "Harbour".to_owned(),
            alert_class: AlertClass::new("Warning"),
            kind: AlertKind::Entered,
            at_millis: 1_000,
            comment: None,
        });
        IntrusionMessage::from_alert(event)
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_json() {
        let broadcaster = Broadcaster::new(4);
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();

        let report = broadcaster.broadcast(&message());
        assert_eq!(report.delivered, 2);

        for sub in [&mut a, &mut b] {
            let text = sub.recv().await.unwrap();
            let json: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(json["type"], "intrusion");
            assert_eq!(json["event"], "entry");
            assert_eq!(json["vesselId"], "V1");
        }
    }

    #[tokio::test]
    async fn test_full_subscriber_is_skipped() {
        let broadcaster = Broadcaster::new(1);
        let mut slow = broadcaster.subscribe();
        let mut fast = broadcaster.subscribe();

        assert_eq!(broadcaster.broadcast(&message()).delivered, 2);
        fast.recv().await.unwrap();

        let report = broadcaster.broadcast(&message());
        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, 1);
        // Still subscribed
        assert_eq!(broadcaster.subscriber_count(), 2);

        slow.recv().await.unwrap();
        fast.recv().await.unwrap();
    }

    #[test]
    fn test_drop_unsubscribes() {
        let broadcaster = Broadcaster::new(4);
        let sub = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);

        drop(sub);
        assert_eq!(broadcaster.subscriber_count(), 0);
        assert_eq!(broadcaster.broadcast(&message()), BroadcastReport::default());
    }

    #[test]
    fn test_closed_receiver_is_removed() {
        let broadcaster = Broadcaster::new(4);
        let (tx, rx) = mpsc::channel(1);
        broadcaster.lock().insert(99, tx);
        drop(rx);

        let report = broadcaster.broadcast(&message());
        assert_eq!(report.dropped, 1);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
