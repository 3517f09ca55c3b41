//! Core event bus implementation
//!
//! Single dispatcher task draining three priority lanes. Publishing only
//! enqueues; subscribers run serialized on the dispatcher, so a slow
//! handler never blocks a publisher.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use super::{BusMessage, EventHandler, EventPriority};

/// Snapshot of bus counters
#[derive(Debug, Clone, Copy, Default)]
pub struct BusStats {
    /// Events accepted into a queue
    pub published: u64,
    /// Events fully dispatched to all subscribers
    pub dispatched: u64,
    /// Publishes that found no subscriber for the event type
    pub dropped: u64,
    /// Handler invocations that returned an error
    pub handler_errors: u64,
}

struct BusInner<M: BusMessage> {
    handlers: RwLock<FxHashMap<&'static str, Vec<Arc<dyn EventHandler<M>>>>>,
    lanes: Mutex<[VecDeque<M>; EventPriority::COUNT]>,
    notify: Notify,
    running: AtomicBool,
    published: AtomicU64,
    dispatched: AtomicU64,
    dropped: AtomicU64,
    handler_errors: AtomicU64,
}

/// Priority-aware in-process event bus
pub struct EventBus<M: BusMessage> {
    inner: Arc<BusInner<M>>,
}

impl<M: BusMessage> Clone for EventBus<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: BusMessage> Default for EventBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: BusMessage> EventBus<M> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                handlers: RwLock::new(FxHashMap::default()),
                lanes: Mutex::new(std::array::from_fn(|_| VecDeque::new())),
                notify: Notify::new(),
                running: AtomicBool::new(false),
                published: AtomicU64::new(0),
                dispatched: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                handler_errors: AtomicU64::new(0),
            }),
        }
    }

    /// Register a handler for an event type; returns the handler id
    pub fn subscribe<H>(&self, event_type: &'static str, handler: H) -> String
    where
        H: EventHandler<M> + 'static,
    {
        let handler: Arc<dyn EventHandler<M>> = Arc::new(handler);
        let id = handler.id().to_string();
        let mut handlers = self.inner.handlers.write();
        let registered = handlers.entry(event_type).or_default();
        registered.push(handler);
        debug!(event_type, handler_id = %id, count = registered.len(), "handler subscribed");
        id
    }

    /// Number of handlers registered for an event type
    #[must_use]
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.inner
            .handlers
            .read()
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Enqueue an event for dispatch
    ///
    /// Returns whether at least one subscriber is registered for the event
    /// type. Never blocks beyond the enqueue. Publishing onto a bus whose
    /// dispatcher has not been started fails soft.
    pub fn publish(&self, event: M) -> bool {
        if !self.inner.running.load(Ordering::Acquire) {
            warn!(event_type = event.event_type(), "bus not running, dropping publish");
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let event_type = event.event_type();
        if self.subscriber_count(event_type) == 0 {
            debug!(event_type, "no subscribers for event type");
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let lane = event.priority().lane();
        {
            let mut lanes = self.inner.lanes.lock();
            lanes[lane].push_back(event);
        }
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        self.inner.notify.notify_one();
        true
    }

    /// Start the dispatcher task; idempotent
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            debug!("event bus dispatcher started");
            loop {
                let next = {
                    let mut lanes = inner.lanes.lock();
                    lanes.iter_mut().find_map(VecDeque::pop_front)
                };

                match next {
                    Some(event) => {
                        let event_type = event.event_type();
                        let handlers: Vec<Arc<dyn EventHandler<M>>> = inner
                            .handlers
                            .read()
                            .get(event_type)
                            .cloned()
                            .unwrap_or_default();

                        for handler in handlers {
                            if let Err(e) = handler.handle(event.clone()).await {
                                error!(
                                    event_type,
                                    handler_id = handler.id(),
                                    error = %e,
                                    "event handler failed"
                                );
                                inner.handler_errors.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        inner.dispatched.fetch_add(1, Ordering::Relaxed);
                    }
                    None => {
                        if !inner.running.load(Ordering::Acquire) {
                            break;
                        }
                        inner.notify.notified().await;
                    }
                }
            }
            debug!("event bus dispatcher stopped");
        });
    }

    /// Stop the dispatcher after it drains the queues
    pub fn shutdown(&self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner.notify.notify_one();
    }

    /// Wait until all currently queued events have been dispatched
    ///
    /// Test and shutdown helper; polls the queue depth.
    pub async fn quiesce(&self) {
        loop {
            let published = self.inner.published.load(Ordering::Relaxed);
            let dispatched = self.inner.dispatched.load(Ordering::Relaxed);
            if dispatched >= published {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            dispatched: self.inner.dispatched.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            handler_errors: self.inner.handler_errors.load(Ordering::Relaxed),
        }
    }
}
