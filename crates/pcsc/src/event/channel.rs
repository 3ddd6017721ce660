//! Channel-based event streams

use tokio::sync::mpsc::{self, UnboundedReceiver, error::TryRecvError};

use super::handler::{EventDispatcher, Subscription};

/// Receiving end of a dispatcher subscription.
///
/// Every event dispatched after the stream was created is queued, in order.
/// The stream ends once the dispatcher drops its handlers (for readers, right
/// after the `Disconnect` event). Dropping the stream unsubscribes.
#[derive(Debug)]
pub struct EventStream<T> {
    receiver: UnboundedReceiver<T>,
    subscription: Option<Subscription>,
}

impl<T: Clone + Send + 'static> EventStream<T> {
    pub(crate) fn subscribe(dispatcher: &EventDispatcher<T>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription = dispatcher.subscribe(move |event| {
            let _ = sender.send(event);
        });

        Self {
            receiver,
            subscription: Some(subscription),
        }
    }
}

impl<T> EventStream<T> {
    /// Wait for the next event. `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Wait for the next event from outside an async runtime.
    ///
    /// # Panics
    ///
    /// Panics when called from within an async execution context.
    pub fn blocking_recv(&mut self) -> Option<T> {
        self.receiver.blocking_recv()
    }
}

impl<T> Drop for EventStream<T> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}
