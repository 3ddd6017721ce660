//! Attached card readers

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tracing::{debug, trace};

use crate::card::Card;
use crate::error::PcscError;
use crate::event::{EventStream, ReaderEvent, ReaderEventDispatcher, Subscription};
use crate::service::CardService;
use crate::status::ReaderStatusFlags;
use crate::types::{CardMode, Protocol};

/// A card reader attached to the system, as seen by a running
/// [`Client`](crate::Client).
///
/// Readers are cheap to clone; clones refer to the same reader. Once the
/// reader is detached (or the client stops) it publishes a single
/// [`ReaderEvent::Disconnect`], drops its subscribers and refuses new
/// connections. Cards already connected through it keep working until the
/// service reports otherwise.
#[derive(Clone)]
pub struct Reader {
    inner: Arc<ReaderInner>,
}

struct ReaderInner {
    name: String,
    service: Arc<dyn CardService>,
    events: ReaderEventDispatcher,
    detached: AtomicBool,
    capacity: usize,
}

impl Reader {
    pub(crate) fn new(name: String, service: Arc<dyn CardService>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(ReaderInner {
                name,
                service,
                events: ReaderEventDispatcher::new(),
                detached: AtomicBool::new(false),
                capacity,
            }),
        }
    }

    /// The driver-reported reader name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// `false` once the reader published its disconnect event.
    pub fn is_attached(&self) -> bool {
        !self.inner.detached.load(Ordering::Acquire)
    }

    /// Connect to the card in this reader, letting the service pick T=0 or T=1.
    pub async fn connect(&self, mode: CardMode) -> Result<Card, PcscError> {
        self.connect_with_protocol(mode, Protocol::Any).await
    }

    /// Connect to the card in this reader with a protocol preference.
    ///
    /// [`Protocol::Unset`] is only accepted with [`CardMode::Direct`], which
    /// talks to the reader without requiring a card.
    pub async fn connect_with_protocol(
        &self,
        mode: CardMode,
        protocol: Protocol,
    ) -> Result<Card, PcscError> {
        if protocol == Protocol::Unset && mode != CardMode::Direct {
            return Err(PcscError::UnsetProtocol);
        }
        if !self.is_attached() {
            return Err(PcscError::ReaderDisconnected(self.inner.name.clone()));
        }

        let handle = self
            .inner
            .service
            .connect(&self.inner.name, mode, protocol)
            .await?;

        Ok(Card::new(
            self.inner.name.clone(),
            handle,
            mode,
            self.inner.capacity,
        ))
    }

    /// Call `handler` for every status transition of this reader.
    pub fn on_change<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(ReaderStatusFlags, Bytes) + Send + 'static,
    {
        self.inner.events.subscribe(move |event| {
            if let ReaderEvent::Change { status, atr } = event {
                handler(status, atr);
            }
        })
    }

    /// Call `handler` once when this reader is detached.
    pub fn on_disconnect<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut() + Send + 'static,
    {
        self.inner.events.subscribe(move |event| {
            if let ReaderEvent::Disconnect = event {
                handler();
            }
        })
    }

    /// Stream of every event published by this reader from now on.
    pub fn events(&self) -> EventStream<ReaderEvent> {
        EventStream::subscribe(&self.inner.events)
    }

    /// `true` if both values refer to the same reader.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn emit_change(&self, status: ReaderStatusFlags, atr: Bytes) {
        if !self.is_attached() {
            return;
        }
        trace!(reader = %self.inner.name, %status, "reader change");
        self.inner
            .events
            .dispatch(ReaderEvent::Change { status, atr });
    }

    /// Publish the disconnect event and drop every subscriber. Runs at most once.
    pub(crate) fn detach(&self) {
        if self.inner.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(reader = %self.inner.name, "reader detached");
        self.inner.events.dispatch(ReaderEvent::Disconnect);
        self.inner.events.clear();
    }
}

impl PartialEq for Reader {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Reader {}

impl fmt::Display for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("name", &self.inner.name)
            .field("attached", &self.is_attached())
            .field("subscribers", &self.inner.events.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockService;
    use crate::status::ReaderStatus;
    use parking_lot::Mutex;

    fn reader(service: &Arc<MockService>) -> Reader {
        Reader::new(
            "Reader A".into(),
            Arc::clone(service) as Arc<dyn CardService>,
            crate::MAX_BUFFER_LEN,
        )
    }

    #[test]
    fn test_name_and_display() {
        let service = Arc::new(MockService::new());
        let reader = reader(&service);
        assert_eq!(reader.name(), "Reader A");
        assert_eq!(reader.to_string(), "Reader A");
        assert_eq!(reader, reader.clone());
        assert_ne!(reader, self::reader(&service));
    }

    #[test]
    fn test_no_change_after_disconnect() {
        let service = Arc::new(MockService::new());
        let reader = reader(&service);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let _change = reader.on_change(move |status, _| sink.lock().push(format!("{status}")));
        let sink = Arc::clone(&seen);
        let _disconnect = reader.on_disconnect(move || sink.lock().push("disconnect".into()));

        reader.emit_change(ReaderStatus::Empty.into(), Bytes::new());
        reader.detach();
        reader.detach();
        reader.emit_change(ReaderStatus::Present.into(), Bytes::new());

        assert_eq!(*seen.lock(), vec!["EMPTY".to_string(), "disconnect".to_string()]);
        assert!(!reader.is_attached());
    }

    #[tokio::test]
    async fn test_unset_protocol_requires_direct() {
        let service = Arc::new(MockService::new());
        let reader = reader(&service);

        let err = reader
            .connect_with_protocol(CardMode::Shared, Protocol::Unset)
            .await
            .unwrap_err();
        assert!(matches!(err, PcscError::UnsetProtocol));
        assert!(err.is_misuse());

        let card = reader
            .connect_with_protocol(CardMode::Direct, Protocol::Unset)
            .await
            .unwrap();
        assert_eq!(card.protocol().unwrap(), Protocol::Unset);
    }

    #[tokio::test]
    async fn test_connect_without_card_fails() {
        let service = Arc::new(MockService::new());
        let reader = reader(&service);

        let err = reader.connect(CardMode::Shared).await.unwrap_err();
        assert!(!err.is_misuse());
        assert_eq!(err.code(), "PCSC_NO_SMARTCARD");
    }

    #[tokio::test]
    async fn test_connect_negotiates_protocol() {
        let service = Arc::new(MockService::new());
        service.insert_card("Reader A", &[0x3b, 0x8f]);
        let reader = reader(&service);

        let card = reader.connect(CardMode::Shared).await.unwrap();
        assert_eq!(card.reader_name(), "Reader A");
        assert_eq!(card.protocol().unwrap(), Protocol::T1);
    }

    #[tokio::test]
    async fn test_detached_reader_refuses_connect() {
        let service = Arc::new(MockService::new());
        service.insert_card("Reader A", &[0x3b]);
        let reader = reader(&service);
        reader.detach();

        assert!(matches!(
            reader.connect(CardMode::Shared).await,
            Err(PcscError::ReaderDisconnected(_))
        ));
    }
}
