//! Publish/subscribe transport seams
//!
//! The calibration engine only needs two capabilities from a transport:
//! publishing a payload to a topic and registering a handler for a topic.
//! Delivery is at-most-once; nothing here confirms that a payload arrived.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::CalibrationResult;

/// Callback invoked for every payload received on a topic
pub type MessageHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Something frames and commands can be published to
pub trait FrameSink: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]) -> CalibrationResult<()>;
}

/// Something handlers can be registered with
pub trait Subscriber: Send + Sync {
    fn subscribe(&self, topic: &str, handler: MessageHandler) -> CalibrationResult<()>;
}

/// In-process message bus.
///
/// Handlers run on the publisher's thread. They are cloned out of the
/// registry before dispatch, so a handler may publish or subscribe
/// without deadlocking.
#[derive(Default)]
pub struct MessageBus {
    handlers: RwLock<HashMap<String, Vec<MessageHandler>>>,
    published: AtomicU64,
}

impl MessageBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of handlers registered for `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.handlers.read().get(topic).map_or(0, Vec::len)
    }

    /// Total payloads published since creation
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl FrameSink for MessageBus {
    fn publish(&self, topic: &str, payload: &[u8]) -> CalibrationResult<()> {
        self.published.fetch_add(1, Ordering::Relaxed);

        let handlers = match self.handlers.read().get(topic) {
            Some(handlers) => handlers.clone(),
            None => {
                tracing::trace!("No subscribers on {}, dropping {} bytes", topic, payload.len());
                return Ok(());
            }
        };

        for handler in handlers {
            handler(payload);
        }
        Ok(())
    }
}

impl Subscriber for MessageBus {
    fn subscribe(&self, topic: &str, handler: MessageHandler) -> CalibrationResult<()> {
        self.handlers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(handler);
        tracing::debug!("Subscribed handler to {}", topic);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_publish_reaches_topic_subscribers_only() {
        let bus = MessageBus::new();
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&received);
        bus.subscribe("a", Arc::new(move |p: &[u8]| sink.lock().push(p.to_vec())))
            .expect("Subscribe failed");

        bus.publish("a", b"one").expect("Publish failed");
        bus.publish("b", b"two").expect("Publish failed");

        assert_eq!(*received.lock(), vec![b"one".to_vec()]);
        assert_eq!(bus.published_count(), 2);
        assert_eq!(bus.subscriber_count("a"), 1);
        assert_eq!(bus.subscriber_count("b"), 0);
    }

    #[test]
    fn test_handler_may_publish_reentrantly() {
        let bus = MessageBus::new();
        let echoed = Arc::new(Mutex::new(0usize));

        let inner_bus = Arc::clone(&bus);
        bus.subscribe(
            "ping",
            Arc::new(move |p: &[u8]| {
                let _ = inner_bus.publish("pong", p);
            }),
        )
        .expect("Subscribe failed");

        let counter = Arc::clone(&echoed);
        bus.subscribe("pong", Arc::new(move |_: &[u8]| *counter.lock() += 1))
            .expect("Subscribe failed");

        bus.publish("ping", b"x").expect("Publish failed");
        assert_eq!(*echoed.lock(), 1);
    }
}
