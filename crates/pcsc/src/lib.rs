//! Event-driven PC/SC reader monitoring and card sessions
//!
//! A [`Client`] watches the readers attached to the system and publishes each
//! one as a [`Reader`]. Readers publish their status transitions and hand out
//! [`Card`] connections, which carry the APDU, control, attribute and
//! transaction operations.
//!
//! All blocking PC/SC calls run on dedicated threads: one monitor thread per
//! running client and one worker thread per connected card. Card operations are
//! `async` and can be awaited from any executor.
//!
//! The native service is one implementation of the [`CardService`] boundary;
//! [`Client::with_service`] accepts any other.
//!
//! # Examples
//!
//! ```no_run
//! use nexum_pcsc::{CardMode, Client, Disposition, ReaderStatus};
//! use tokio::sync::mpsc;
//!
//! # async fn run() -> Result<(), nexum_pcsc::PcscError> {
//! let client = Client::new()?;
//! let (inserted, mut cards) = mpsc::unbounded_channel();
//!
//! // A reader publishes its first change right after being announced, so
//! // subscribe from inside the handler.
//! let _readers = client.on_reader(move |reader| {
//!     let inserted = inserted.clone();
//!     let target = reader.clone();
//!     let _ = reader.on_change(move |status, _atr| {
//!         if status.has(&[ReaderStatus::Present]) {
//!             let _ = inserted.send(target.clone());
//!         }
//!     });
//! });
//! client.start()?;
//!
//! while let Some(reader) = cards.recv().await {
//!     let card = reader.connect(CardMode::Shared).await?;
//!     println!("{}", card.state().await?);
//!     card.disconnect(Disposition::Leave).await?;
//! }
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![warn(missing_docs)]

pub mod attributes;
mod backend;
mod card;
mod client;
mod config;
mod error;
pub mod event;
#[cfg(test)]
mod mock;
mod reader;
pub mod service;
mod status;
mod types;

// Public exports
pub use attributes::AttributeId;
pub use backend::{PcscCardHandle, PcscService};
pub use card::{Card, CardState, Transaction};
pub use client::Client;
pub use config::{ClientConfig, ContextScope};
pub use error::{ErrorOrigin, PcscError};
pub use event::{ClientEvent, EventStream, ReaderEvent, Subscription};
pub use reader::Reader;
pub use service::{CardHandle, CardService};
pub use status::{
    CardStatus, CardStatusFlags, ReaderStatus, ReaderStatusFlags, StatusFlag, StatusFlags,
    card_status_string, reader_status_string,
};
pub use types::{
    CardMode, ControlCode, Disposition, FEATURE_REQUEST_FUNCTION, MAX_ATR_LEN, MAX_BUFFER_LEN,
    MAX_BUFFER_LEN_EXTENDED, MAX_READERS, Protocol, SET_PROTOCOL_FUNCTION, control_code,
    protocol_string,
};
