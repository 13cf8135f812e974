use std::{
    collections::VecDeque,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
};

use tracing::error;

use crate::lock;

pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Process-local observer list.
///
/// Clones share the same subscribers. Events are delivered synchronously,
/// in subscription order. An event published while a dispatch is already
/// running is queued and delivered after the current one completes, so a
/// subscriber that mutates the store never re-enters its own callbacks.
pub struct EventBus<E> {
    inner: Arc<BusInner<E>>,
}

struct BusInner<E> {
    subscribers: Mutex<Vec<(u64, Callback<E>)>>,
    next_id: AtomicU64,
    dispatch: Mutex<Dispatch<E>>,
}

struct Dispatch<E> {
    running: bool,
    queue: VecDeque<E>,
}

/// Handle returned by [`EventBus::subscribe`].
#[must_use = "dropping a Subscription keeps the callback subscribed; call unsubscribe"]
pub struct Subscription<E> {
    id: u64,
    bus: Weak<BusInner<E>>,
}

impl<E> Subscription<E> {
    pub fn unsubscribe(self) {
        if let Some(bus) = self.bus.upgrade() {
            lock(&bus.subscribers).retain(|(id, _)| *id != self.id);
        }
    }
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        EventBus {
            inner: self.inner.clone(),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        EventBus {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                dispatch: Mutex::new(Dispatch {
                    running: false,
                    queue: VecDeque::new(),
                }),
            }),
        }
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribing the same `Arc` twice yields a handle to the existing
    /// subscription rather than a second delivery.
    pub fn subscribe(&self, callback: Callback<E>) -> Subscription<E> {
        let mut subscribers = lock(&self.inner.subscribers);
        let id = match subscribers
            .iter()
            .find(|(_, existing)| Arc::ptr_eq(existing, &callback))
        {
            Some((id, _)) => *id,
            None => {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                subscribers.push((id, callback));
                id
            }
        };
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    pub fn notify(&self, event: E) {
        {
            let mut dispatch = lock(&self.inner.dispatch);
            dispatch.queue.push_back(event);
            if dispatch.running {
                return;
            }
            dispatch.running = true;
        }

        loop {
            let event = {
                let mut dispatch = lock(&self.inner.dispatch);
                match dispatch.queue.pop_front() {
                    Some(event) => event,
                    None => {
                        dispatch.running = false;
                        return;
                    }
                }
            };
            // Snapshot so callbacks may subscribe or unsubscribe freely.
            let subscribers: Vec<Callback<E>> = lock(&self.inner.subscribers)
                .iter()
                .map(|(_, callback)| callback.clone())
                .collect();
            for callback in subscribers {
                if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                    error!("event subscriber panicked; continuing with the remaining subscribers");
                }
            }
        }
    }
}
