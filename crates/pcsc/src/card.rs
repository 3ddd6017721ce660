//! Card connections and transactions

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::attributes::AttributeId;
use crate::error::PcscError;
use crate::service::{CardHandle, RawCardState};
use crate::status::CardStatusFlags;
use crate::types::{CardMode, ControlCode, Disposition, MAX_BUFFER_LEN_EXTENDED, Protocol};

/// An open connection to a card inserted in a [`Reader`](crate::Reader).
///
/// Created by [`Reader::connect`](crate::Reader::connect) and invalidated by
/// [`disconnect`](Self::disconnect): every call after a successful disconnect
/// fails with [`PcscError::Disconnected`]. Dropping a connected card closes it
/// with [`Disposition::Leave`].
///
/// Calls are not retried: a removed or reset card surfaces as the service's
/// error and the caller decides whether to [`reconnect`](Self::reconnect).
pub struct Card {
    inner: Arc<CardInner>,
}

struct CardInner {
    reader: String,
    handle: Box<dyn CardHandle>,
    mode: Mutex<CardMode>,
    protocol: Mutex<Protocol>,
    capacity: usize,
    closed: AtomicBool,
    in_transaction: AtomicBool,
}

impl CardInner {
    fn ensure_open(&self) -> Result<(), PcscError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PcscError::Disconnected);
        }
        Ok(())
    }

    fn ensure_no_transaction(&self) -> Result<(), PcscError> {
        if self.in_transaction.load(Ordering::Acquire) {
            return Err(PcscError::TransactionInProgress);
        }
        Ok(())
    }

    async fn end_transaction(&self, disposition: Disposition) -> Result<(), PcscError> {
        self.ensure_open()?;
        self.handle.end_transaction(disposition).await?;
        self.in_transaction.store(false, Ordering::Release);
        trace!(reader = %self.reader, ?disposition, "transaction ended");
        Ok(())
    }
}

impl Card {
    pub(crate) fn new(
        reader: String,
        handle: Box<dyn CardHandle>,
        mode: CardMode,
        capacity: usize,
    ) -> Self {
        let protocol = handle.protocol();
        Self {
            inner: Arc::new(CardInner {
                reader,
                handle,
                mode: Mutex::new(mode),
                protocol: Mutex::new(protocol),
                capacity,
                closed: AtomicBool::new(false),
                in_transaction: AtomicBool::new(false),
            }),
        }
    }

    /// Name of the reader holding the card.
    pub fn reader_name(&self) -> &str {
        &self.inner.reader
    }

    /// Access mode of the connection.
    pub fn mode(&self) -> CardMode {
        *self.inner.mode.lock()
    }

    /// The currently active protocol.
    ///
    /// Set when the connection is established and updated by
    /// [`reconnect`](Self::reconnect). A protocol negotiated through
    /// [`control`](Self::control) is *not* reflected here.
    pub fn protocol(&self) -> Result<Protocol, PcscError> {
        self.inner.ensure_open()?;
        Ok(*self.inner.protocol.lock())
    }

    /// `true` until [`disconnect`](Self::disconnect) succeeds.
    pub fn is_connected(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }

    /// Send an APDU to the card with the active protocol.
    pub async fn transmit(&self, input: &[u8]) -> Result<Bytes, PcscError> {
        self.transmit_with_capacity(input, self.inner.capacity).await
    }

    /// Send an APDU, reserving `capacity` bytes for the response.
    pub async fn transmit_with_capacity(
        &self,
        input: &[u8],
        capacity: usize,
    ) -> Result<Bytes, PcscError> {
        self.inner.ensure_open()?;
        trace!(reader = %self.inner.reader, command = %hex::encode_upper(input), "transmit");
        self.inner.handle.transmit(None, input, capacity).await
    }

    /// Send an APDU with an explicit protocol.
    ///
    /// Needed for [`CardMode::Direct`] connections made with
    /// [`Protocol::Unset`], once a protocol was set through [`control`](Self::control).
    pub async fn transmit_with_protocol(
        &self,
        protocol: Protocol,
        input: &[u8],
    ) -> Result<Bytes, PcscError> {
        self.inner.ensure_open()?;
        trace!(reader = %self.inner.reader, %protocol, command = %hex::encode_upper(input), "transmit");
        self.inner
            .handle
            .transmit(Some(protocol), input, self.inner.capacity)
            .await
    }

    /// Send a command directly to the reader driver (IFD handler).
    ///
    /// Build `code` with [`control_code`](crate::control_code) for portability.
    pub async fn control(&self, code: ControlCode, input: &[u8]) -> Result<Bytes, PcscError> {
        self.control_with_capacity(code, input, self.inner.capacity)
            .await
    }

    /// Send a driver command, reserving `capacity` bytes for the response.
    pub async fn control_with_capacity(
        &self,
        code: ControlCode,
        input: &[u8],
        capacity: usize,
    ) -> Result<Bytes, PcscError> {
        self.inner.ensure_open()?;
        trace!(reader = %self.inner.reader, %code, "control");
        self.inner.handle.control(code, input, capacity).await
    }

    /// Read an attribute of the reader driver.
    pub async fn attribute_get(&self, id: AttributeId) -> Result<Bytes, PcscError> {
        self.attribute_get_with_capacity(id, MAX_BUFFER_LEN_EXTENDED)
            .await
    }

    /// Read an attribute, reserving `capacity` bytes for the value.
    pub async fn attribute_get_with_capacity(
        &self,
        id: AttributeId,
        capacity: usize,
    ) -> Result<Bytes, PcscError> {
        self.inner.ensure_open()?;
        self.inner.handle.attribute_get(id, capacity).await
    }

    /// Write an attribute of the reader driver.
    pub async fn attribute_set(&self, id: AttributeId, value: &[u8]) -> Result<(), PcscError> {
        self.inner.ensure_open()?;
        self.inner.handle.attribute_set(id, value).await
    }

    /// Re-establish a connection, e.g. after another process reset the card.
    ///
    /// The request always uses the previously active protocol; to change
    /// protocols, disconnect and connect again. Returns the active protocol.
    pub async fn reconnect(
        &self,
        mode: CardMode,
        initialization: Disposition,
    ) -> Result<Protocol, PcscError> {
        self.inner.ensure_open()?;
        self.inner.ensure_no_transaction()?;

        let previous = *self.inner.protocol.lock();
        let protocol = self
            .inner
            .handle
            .reconnect(mode, previous, initialization)
            .await?;

        *self.inner.protocol.lock() = protocol;
        *self.inner.mode.lock() = mode;
        debug!(reader = %self.inner.reader, ?mode, %protocol, "card reconnected");
        Ok(protocol)
    }

    /// Snapshot of the current card state.
    pub async fn state(&self) -> Result<CardState, PcscError> {
        self.inner.ensure_open()?;
        self.inner.handle.state().await.map(CardState::from)
    }

    /// Take a temporary exclusive lock on a shared connection, so that several
    /// commands run without interruption from other processes.
    ///
    /// Only one transaction can be open per card. It must be ended with
    /// [`Transaction::end`]; a transaction dropped without ending is released in
    /// the background with [`Disposition::Leave`].
    pub async fn transaction(&self) -> Result<Transaction, PcscError> {
        self.inner.ensure_open()?;
        if self
            .inner
            .in_transaction
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PcscError::TransactionInProgress);
        }

        if let Err(e) = self.inner.handle.begin_transaction().await {
            self.inner.in_transaction.store(false, Ordering::Release);
            return Err(e);
        }

        trace!(reader = %self.inner.reader, "transaction started");
        Ok(Transaction {
            card: Some(Arc::clone(&self.inner)),
        })
    }

    /// Close the connection. The card is unusable afterwards.
    pub async fn disconnect(&self, disposition: Disposition) -> Result<(), PcscError> {
        self.inner.ensure_open()?;
        self.inner.ensure_no_transaction()?;

        self.inner.handle.disconnect(disposition).await?;
        self.inner.closed.store(true, Ordering::Release);
        debug!(reader = %self.inner.reader, ?disposition, "card disconnected");
        Ok(())
    }
}

impl fmt::Debug for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Card")
            .field("reader", &self.inner.reader)
            .field("mode", &self.mode())
            .field("protocol", &*self.inner.protocol.lock())
            .field("connected", &self.is_connected())
            .field(
                "in_transaction",
                &self.inner.in_transaction.load(Ordering::Acquire),
            )
            .finish()
    }
}

/// An open exclusive lock on a [`Card`], see [`Card::transaction`].
#[must_use = "a transaction holds the reader exclusively until `end` is called"]
pub struct Transaction {
    card: Option<Arc<CardInner>>,
}

impl Transaction {
    /// Release the lock, applying `disposition` to the card.
    ///
    /// On failure the transaction is considered still open on the service side
    /// and is closed with [`Disposition::Leave`] on drop.
    pub async fn end(mut self, disposition: Disposition) -> Result<(), PcscError> {
        let Some(card) = self.card.take() else {
            return Err(PcscError::NoTransaction);
        };

        match card.end_transaction(disposition).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.card = Some(card);
                Err(e)
            }
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let Some(card) = self.card.take() else {
            return;
        };

        if card.closed.load(Ordering::Acquire) {
            return;
        }

        warn!(reader = %card.reader, "transaction dropped without end, releasing with LEAVE");
        card.handle.release_transaction();
        card.in_transaction.store(false, Ordering::Release);
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("reader", &self.card.as_ref().map(|card| card.reader.as_str()))
            .finish()
    }
}

/// The state of a connected card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardState {
    /// Card ATR
    pub atr: Bytes,
    /// Currently active protocol
    pub protocol: Protocol,
    /// Name of the reader holding the card
    pub reader_name: String,
    /// Current card status
    pub status: CardStatusFlags,
}

impl From<RawCardState> for CardState {
    fn from(raw: RawCardState) -> Self {
        Self {
            atr: raw.atr,
            protocol: raw.protocol,
            reader_name: raw.reader_name,
            status: CardStatusFlags::from_raw(raw.status),
        }
    }
}

impl fmt::Display for CardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}]:", self.reader_name)?;
        writeln!(f, "    Protocol: {}", self.protocol)?;
        writeln!(f, "    Status: {}", self.status)?;
        write!(f, "    ATR: {{ ")?;
        for (i, byte) in self.atr.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        write!(f, " }}")
    }
}
