//! In-process publish/subscribe bus.
//!
//! Delivery is synchronous on the publishing thread, in subscription order. Handlers must
//! not block; anything slow should hop to its own thread, which is what
//! [`EventBus::subscribe_channel`] does for the presentation surfaces.
//!
//! The subscriber list is never locked while a handler runs, so handlers may subscribe,
//! unsubscribe or publish from inside a delivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{EventTopic, LauncherEvent};

pub type EventHandler = Arc<dyn Fn(&LauncherEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    topic: EventTopic,
    handler: EventHandler,
}

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.lock().len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe<F>(&self, topic: EventTopic, handler: F) -> SubscriptionId
    where
        F: Fn(&LauncherEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Subscriber {
            id,
            topic,
            handler: Arc::new(handler),
        });
        id
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.lock();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Deliver `event` to every current subscriber of its topic.
    ///
    /// A subscriber removed while this call is in flight may still see this one event.
    pub fn publish(&self, event: LauncherEvent) {
        let topic = event.topic();
        let handlers: Vec<EventHandler> = self
            .lock()
            .iter()
            .filter(|s| s.topic == topic)
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in handlers {
            handler(&event);
        }
    }

    /// Forward the given topics into an unbounded channel.
    ///
    /// Sending never blocks the publisher. Once the receiver is dropped the forwarding
    /// handlers become no-ops; unsubscribe the returned ids to remove them.
    pub fn subscribe_channel(
        &self,
        topics: &[EventTopic],
    ) -> (Vec<SubscriptionId>, mpsc::Receiver<LauncherEvent>) {
        let (tx, rx) = mpsc::channel::<LauncherEvent>();
        let ids = topics
            .iter()
            .map(|topic| {
                let tx = tx.clone();
                self.subscribe(*topic, move |event| {
                    let _ = tx.send(event.clone());
                })
            })
            .collect();
        (ids, rx)
    }

    pub fn subscriber_count(&self, topic: EventTopic) -> usize {
        self.lock().iter().filter(|s| s.topic == topic).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    // -------------------------------------------------------------------------
    // Fan-out + topic filtering
    // -------------------------------------------------------------------------

    #[test]
    fn publish_reaches_every_subscriber_of_the_topic() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            bus.subscribe(EventTopic::StateChange, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        let other = Arc::new(AtomicUsize::new(0));
        let other_hits = Arc::clone(&other);
        bus.subscribe(EventTopic::Exit, move |_| {
            other_hits.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(LauncherEvent::StateChange);

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(other.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(LauncherEvent::Exit);
        bus.publish(LauncherEvent::Log(b"nobody listens".to_vec()));
    }

    #[test]
    fn late_subscriber_sees_no_replay() {
        let bus = EventBus::new();
        bus.publish(LauncherEvent::StateChange);
        let (_ids, rx) = bus.subscribe_channel(&[EventTopic::StateChange]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn same_topic_events_arrive_in_publish_order() {
        let bus = EventBus::new();
        let (_ids, rx) = bus.subscribe_channel(&[EventTopic::Log]);
        for i in 0..10u8 {
            bus.publish(LauncherEvent::Log(vec![i]));
        }
        let got: Vec<Vec<u8>> = rx
            .try_iter()
            .map(|e| match e {
                LauncherEvent::Log(b) => b,
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        let expected: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i]).collect();
        assert_eq!(got, expected);
    }

    // -------------------------------------------------------------------------
    // Subscription management + re-entrancy
    // -------------------------------------------------------------------------

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = bus.subscribe(EventTopic::Exit, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(LauncherEvent::Exit);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(LauncherEvent::Exit);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(EventTopic::Exit), 0);
    }

    #[test]
    fn handler_can_unsubscribe_itself_and_subscribe_others() {
        let bus = Arc::new(EventBus::new());
        let own_id: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));

        let bus_in = Arc::clone(&bus);
        let own_in = Arc::clone(&own_id);
        let hits_in = Arc::clone(&hits);
        let id = bus.subscribe(EventTopic::StateChange, move |_| {
            hits_in.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = own_in.lock().unwrap().take() {
                bus_in.unsubscribe(id);
            }
            bus_in.subscribe(EventTopic::Exit, |_| {});
        });
        *own_id.lock().unwrap() = Some(id);

        bus.publish(LauncherEvent::StateChange);
        bus.publish(LauncherEvent::StateChange);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(EventTopic::StateChange), 0);
        assert_eq!(bus.subscriber_count(EventTopic::Exit), 1);
    }

    #[test]
    fn handler_can_publish_on_another_topic() {
        let bus = Arc::new(EventBus::new());
        let (_ids, rx) = bus.subscribe_channel(&[EventTopic::Log]);
        let bus_in = Arc::clone(&bus);
        bus.subscribe(EventTopic::StateChange, move |_| {
            bus_in.publish(LauncherEvent::Log(b"re-rendered".to_vec()));
        });

        bus.publish(LauncherEvent::StateChange);

        assert_eq!(
            rx.try_recv().ok(),
            Some(LauncherEvent::Log(b"re-rendered".to_vec()))
        );
    }

    #[test]
    fn dropped_channel_receiver_does_not_break_publish() {
        let bus = EventBus::new();
        let (ids, rx) = bus.subscribe_channel(&EventTopic::ALL);
        drop(rx);
        bus.publish(LauncherEvent::StateChange);
        assert_eq!(ids.len(), 3);
        for id in ids {
            assert!(bus.unsubscribe(id));
        }
    }
}
