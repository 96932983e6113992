//! In-process `StockChanged` fan-out.
//!
//! Used when the ledger runs embedded in one process (and in tests): report caches and
//! low-stock alerting subscribe here and `StockLedgerService` publishes after each commit.
//! Channels are unbounded, so a slow subscriber never holds up a commit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::bus::{EventBus, Subscription};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InMemoryBusError {
    #[error("event bus is closed")]
    Closed,
}

/// Broadcast bus over `std::sync::mpsc` channels.
///
/// Every subscription gets its own copy of each message published after it subscribed.
/// Subscribers whose receiver was dropped are pruned on the next publish.
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Vec<mpsc::Sender<M>>>,
    closed: AtomicBool,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live subscriptions as of the last publish.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Shut the bus down: current subscriptions disconnect once drained and every later
    /// `publish` fails with `InMemoryBusError::Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        if self.is_closed() {
            return Err(InMemoryBusError::Closed);
        }
        self.subscribers
            .lock()
            .retain(|tx| tx.send(message.clone()).is_ok());
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        // On a closed bus the sender is dropped here and the subscription is born disconnected.
        if !self.is_closed() {
            self.subscribers.lock().push(tx);
        }
        Subscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_gets_a_copy() {
        let bus = InMemoryEventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(7u32).unwrap();

        assert_eq!(a.try_recv().unwrap(), 7);
        assert_eq!(b.try_recv().unwrap(), 7);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = InMemoryEventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());

        bus.publish("x".to_string()).unwrap();

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(keep.drain(), vec!["x".to_string()]);
    }

    #[test]
    fn messages_before_subscribe_are_not_delivered() {
        let bus = InMemoryEventBus::new();
        bus.publish(1u8).unwrap();
        let late = bus.subscribe();
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn closed_bus_rejects_publishes_and_disconnects_subscribers() {
        let bus = InMemoryEventBus::new();
        let sub = bus.subscribe();
        bus.publish(1u8).unwrap();

        bus.close();

        assert_eq!(bus.publish(2u8), Err(InMemoryBusError::Closed));
        assert_eq!(sub.recv().unwrap(), 1);
        assert!(sub.recv().is_err());
        assert!(bus.subscribe().recv().is_err());
        assert_eq!(bus.subscriber_count(), 0);
    }
}
