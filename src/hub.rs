//! Event hub (C5): demultiplexes one upstream watch stream into many
//! bounded subscriber channels.
//!
//! A slow subscriber never blocks the fan-out: `try_send` either delivers
//! or the subscriber is dropped outright, closing its channel. The
//! subscriber list is snapshotted before dispatch so add/remove only ever
//! holds the lock across a short critical section, never across a send.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::RegistryError;
use crate::model::ChangeEvent;

/// Default per-subscriber buffer. A subscriber that falls this far behind
/// the upstream watch is dropped rather than allowed to stall the hub.
pub const SUBSCRIBER_BUFFER: usize = 256;

pub struct EventHub<T> {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<Arc<ChangeEvent<T>>>>>,
    next_id: AtomicU64,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + Sync + 'static> EventHub<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            driver: Mutex::new(None),
        })
    }

    /// Spawns the task that drains `stream` (the route store's watch
    /// stream for one family) and fans each event out to subscribers. The
    /// first error on `stream`, or the stream's natural end, closes the
    /// hub: every subscriber's channel is dropped, which is the terminal
    /// condition they observe as EOF.
    pub fn spawn_driver(
        self: &Arc<Self>,
        mut stream: BoxStream<'static, Result<ChangeEvent<T>, RegistryError>>,
    ) {
        let hub = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(event) => hub.dispatch(Arc::new(event)),
                    Err(_) => break,
                }
            }
            hub.close();
        });
        *self.driver.lock() = Some(handle);
    }

    /// Registers a new subscriber with a bounded buffer, returning its id
    /// (for [`EventHub::unsubscribe`]) and the receiving half of its channel.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<Arc<ChangeEvent<T>>>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.lock().insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().remove(&id);
    }

    fn dispatch(&self, event: Arc<ChangeEvent<T>>) {
        let snapshot: Vec<(u64, mpsc::Sender<Arc<ChangeEvent<T>>>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut dropped = Vec::new();
        for (id, tx) in snapshot {
            if tx.try_send(event.clone()).is_err() {
                dropped.push(id);
            }
        }

        if !dropped.is_empty() {
            let mut subs = self.subscribers.lock();
            for id in dropped {
                subs.remove(&id);
            }
        }
    }

    /// Closes the upstream watcher's downstream effects: every subscriber
    /// channel is dropped. Called on driver shutdown or explicitly during
    /// graceful service shutdown.
    pub fn close(&self) {
        self.subscribers.lock().clear();
        if let Some(handle) = self.driver.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChangeKind;
    use futures_util::stream;

    fn event(index: u64) -> ChangeEvent<u32> {
        ChangeEvent {
            kind: ChangeKind::Create,
            index,
            payload: index as u32,
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn fans_out_to_all_subscribers() {
        let hub = EventHub::<u32>::new();
        let (_id1, mut rx1) = hub.subscribe();
        let (_id2, mut rx2) = hub.subscribe();

        let stream = stream::iter(vec![Ok(event(1)), Ok(event(2))]);
        hub.spawn_driver(Box::pin(stream));

        assert_eq!(rx1.recv().await.unwrap().index, 1);
        assert_eq!(rx1.recv().await.unwrap().index, 2);
        assert_eq!(rx2.recv().await.unwrap().index, 1);
        assert_eq!(rx2.recv().await.unwrap().index, 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn closing_hub_ends_subscriber_streams() {
        let hub = EventHub::<u32>::new();
        let (_id, mut rx) = hub.subscribe();
        hub.close();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn drops_subscriber_whose_buffer_is_full() {
        let hub = EventHub::<u32>::new();
        let (_id, rx) = hub.subscribe();
        // Don't read `rx`; flood past SUBSCRIBER_BUFFER so the subscriber gets dropped.
        for i in 0..(SUBSCRIBER_BUFFER as u64 + 10) {
            hub.dispatch(Arc::new(event(i)));
        }
        assert_eq!(hub.subscribers.lock().len(), 0);
        drop(rx);
    }
}
