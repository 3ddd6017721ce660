//! Event handler traits and the multi-subscriber dispatcher

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};

/// A trait for types that can be used as event handlers
pub trait EventHandler<T>: Send {
    /// Handle an event
    fn handle(&mut self, event: T);
}

// Implementations for closures
impl<T, F> EventHandler<T> for F
where
    F: FnMut(T) + Send,
{
    fn handle(&mut self, event: T) {
        self(event)
    }
}

/// A registered handler plus the events dispatched to it while it was running
/// on the same thread.
struct Slot<T> {
    handler: RefCell<Box<dyn EventHandler<T>>>,
    deferred: RefCell<VecDeque<T>>,
}

type SharedHandler<T> = Arc<ReentrantMutex<Slot<T>>>;

struct Handlers<T> {
    next_id: u64,
    entries: Vec<(u64, SharedHandler<T>)>,
}

/// Dispatcher that delivers every event to every registered handler.
///
/// Handlers only see events dispatched after they subscribed. Dispatching
/// snapshots the handler list first, so a handler may subscribe or unsubscribe
/// (itself included) without deadlocking.
pub struct EventDispatcher<T> {
    handlers: Arc<Mutex<Handlers<T>>>,
}

impl<T: Clone + Send + 'static> EventDispatcher<T> {
    /// Create a new event dispatcher
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(Handlers {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a handler, returning the handle that removes it again.
    pub fn subscribe<H>(&self, handler: H) -> Subscription
    where
        H: EventHandler<T> + 'static,
    {
        let mut handlers = self.handlers.lock();
        let id = handlers.next_id;
        handlers.next_id += 1;
        let slot = Slot {
            handler: RefCell::new(Box::new(handler) as Box<dyn EventHandler<T>>),
            deferred: RefCell::new(VecDeque::new()),
        };
        handlers
            .entries
            .push((id, Arc::new(ReentrantMutex::new(slot))));

        let weak: Weak<Mutex<Handlers<T>>> = Arc::downgrade(&self.handlers);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(handlers) = weak.upgrade() {
                    handlers.lock().entries.retain(|(entry, _)| *entry != id);
                }
            })),
        }
    }

    /// Dispatch an event to all handlers
    pub fn dispatch(&self, event: T) {
        let snapshot: Vec<SharedHandler<T>> = self
            .handlers
            .lock()
            .entries
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for shared in snapshot {
            let slot = shared.lock();
            let Ok(mut handler) = slot.handler.try_borrow_mut() else {
                // Re-entered from inside this handler.
                slot.deferred.borrow_mut().push_back(event.clone());
                continue;
            };

            handler.handle(event.clone());
            // The queue borrow must end before the handler runs again.
            #[allow(clippy::while_let_loop)]
            loop {
                let next = slot.deferred.borrow_mut().pop_front();
                match next {
                    Some(deferred) => handler.handle(deferred),
                    None => break,
                }
            }
        }
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.lock().entries.len()
    }

    /// `true` if no handler is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all handlers
    pub fn clear(&self) {
        // Drop the handlers outside the lock; they may own channel senders whose
        // drop wakes other threads.
        let removed = std::mem::take(&mut self.handlers.lock().entries);
        drop(removed);
    }
}

impl<T: Clone + Send + 'static> Default for EventDispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for EventDispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers.lock().entries.len())
            .finish()
    }
}

/// Handle to a registered event handler.
///
/// Dropping the handle leaves the handler registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[must_use = "dropping a Subscription keeps the handler registered; call `unsubscribe` to remove it"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the handler. No further events are delivered to it once this returns,
    /// except one already being dispatched concurrently.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}
