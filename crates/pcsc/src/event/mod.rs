//! Event types and handling for PC/SC sessions

pub mod channel;
pub use channel::*;

pub mod handler;
pub use handler::*;

use bytes::Bytes;

use crate::error::PcscError;
use crate::reader::Reader;
use crate::status::ReaderStatusFlags;

/// Events published by a [`Client`](crate::Client)
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A reader was sighted for the first time since it was attached,
    /// or was already attached when monitoring started
    Reader(Reader),
    /// The monitoring session reported an error while running
    Error(PcscError),
}

/// Events published by a [`Reader`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// The reader reported a status transition
    Change {
        /// New reader status
        status: ReaderStatusFlags,
        /// ATR of the inserted card, empty if there is none
        atr: Bytes,
    },
    /// The reader is no longer attached; no further events follow
    Disconnect,
}

/// Dispatcher for client events
pub type ClientEventDispatcher = EventDispatcher<ClientEvent>;

/// Dispatcher for reader events
pub type ReaderEventDispatcher = EventDispatcher<ReaderEvent>;
