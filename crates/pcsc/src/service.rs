//! Boundary between the session layer and a smart-card service.
//!
//! [`CardService`] is the monitoring and connection side of the service,
//! [`CardHandle`] is one open card connection. The native implementation lives
//! in [`crate::backend`]; anything else that speaks the same contract (a
//! remote service, a simulator) can be plugged into a
//! [`Client`](crate::Client) instead.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::attributes::AttributeId;
use crate::error::PcscError;
use crate::types::{CardMode, ControlCode, Disposition, Protocol};

/// Notification pushed by a monitoring session.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A reader reported a state change.
    Change {
        /// Driver-reported reader name
        reader: String,
        /// Raw reader status bits
        status: u32,
        /// ATR of the inserted card, empty if there is none
        atr: Bytes,
    },
    /// The monitoring session hit an error.
    Error(PcscError),
}

/// Sending half handed to [`CardService::start`]. The session pushes its
/// notifications here, in order, from its own thread.
pub type MonitorSender = crossbeam_channel::Sender<MonitorEvent>;

/// Receiving half of a monitoring session.
pub type MonitorReceiver = crossbeam_channel::Receiver<MonitorEvent>;

/// Create the channel linking a monitoring session to its consumer.
pub fn monitor_channel() -> (MonitorSender, MonitorReceiver) {
    crossbeam_channel::unbounded()
}

/// Raw card state as reported by a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCardState {
    /// Card ATR
    pub atr: Bytes,
    /// Currently active protocol
    pub protocol: Protocol,
    /// Name of the reader holding the card
    pub reader_name: String,
    /// Raw card status bits
    pub status: u32,
}

/// Monitoring and connection side of a smart-card service.
#[async_trait]
pub trait CardService: fmt::Debug + Send + Sync + 'static {
    /// Start the background monitoring session.
    ///
    /// The session pushes a [`MonitorEvent::Change`] for every attached reader
    /// when it starts and for every state transition afterwards. It drops
    /// `events` when it ends.
    fn start(&self, events: MonitorSender) -> Result<(), PcscError>;

    /// Stop the monitoring session. No notification is pushed once this returns.
    fn stop(&self) -> Result<(), PcscError>;

    /// Connect to the card in `reader`.
    async fn connect(
        &self,
        reader: &str,
        mode: CardMode,
        protocol: Protocol,
    ) -> Result<Box<dyn CardHandle>, PcscError>;
}

/// One open connection to a card.
///
/// Every call may suspend until the service responds. Implementations process
/// calls on one handle in the order they were made.
#[async_trait]
pub trait CardHandle: fmt::Debug + Send + Sync {
    /// Protocol negotiated when the connection was established.
    fn protocol(&self) -> Protocol;

    /// Send an APDU, with the active protocol or `protocol` if given.
    async fn transmit(
        &self,
        protocol: Option<Protocol>,
        input: &[u8],
        capacity: usize,
    ) -> Result<Bytes, PcscError>;

    /// Send a control command to the reader driver.
    async fn control(
        &self,
        code: ControlCode,
        input: &[u8],
        capacity: usize,
    ) -> Result<Bytes, PcscError>;

    /// Read a reader attribute.
    async fn attribute_get(&self, id: AttributeId, capacity: usize) -> Result<Bytes, PcscError>;

    /// Write a reader attribute.
    async fn attribute_set(&self, id: AttributeId, value: &[u8]) -> Result<(), PcscError>;

    /// Re-establish the connection, returning the active protocol.
    async fn reconnect(
        &self,
        mode: CardMode,
        protocol: Protocol,
        initialization: Disposition,
    ) -> Result<Protocol, PcscError>;

    /// Query the current card state.
    async fn state(&self) -> Result<RawCardState, PcscError>;

    /// Take the exclusive transaction lock.
    async fn begin_transaction(&self) -> Result<(), PcscError>;

    /// Release the exclusive transaction lock.
    async fn end_transaction(&self, disposition: Disposition) -> Result<(), PcscError>;

    /// Close the connection.
    async fn disconnect(&self, disposition: Disposition) -> Result<(), PcscError>;

    /// Queue the release of the transaction lock with [`Disposition::Leave`]
    /// without waiting for the outcome.
    ///
    /// Must not block, and must be ordered before any call made after it
    /// returns. Used for transactions dropped without being ended.
    fn release_transaction(&self);
}
