//! Card connections served by a dedicated worker thread

use std::ffi::CString;
use std::fmt;
use std::thread;

use async_trait::async_trait;
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use pcsc::{Card, Context};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use super::{active_protocol, disposition, protocols, share_mode};
use crate::attributes::{self, AttributeId};
use crate::error::PcscError;
use crate::service::{CardHandle, RawCardState};
use crate::status::CardStatus;
use crate::types::{CardMode, ControlCode, Disposition, Protocol};

type Reply<T> = oneshot::Sender<Result<T, PcscError>>;

enum Request {
    Transmit {
        protocol: Option<Protocol>,
        input: Vec<u8>,
        capacity: usize,
        reply: Reply<Bytes>,
    },
    Control {
        code: ControlCode,
        input: Vec<u8>,
        capacity: usize,
        reply: Reply<Bytes>,
    },
    GetAttribute {
        id: AttributeId,
        capacity: usize,
        reply: Reply<Bytes>,
    },
    SetAttribute {
        id: AttributeId,
        value: Vec<u8>,
        reply: Reply<()>,
    },
    Reconnect {
        mode: CardMode,
        protocol: Protocol,
        initialization: Disposition,
        reply: Reply<Protocol>,
    },
    State {
        reply: Reply<RawCardState>,
    },
    BeginTransaction {
        reply: Reply<()>,
    },
    EndTransaction {
        disposition: Disposition,
        reply: Reply<()>,
    },
    Disconnect {
        disposition: Disposition,
        reply: Reply<()>,
    },
}

/// Card connection backed by a native PC/SC card handle.
///
/// The handle lives on its own thread and processes requests in order. Dropping
/// the last reference closes the connection with [`Disposition::Leave`].
pub struct PcscCardHandle {
    reader: String,
    protocol: Protocol,
    requests: Sender<Request>,
}

impl PcscCardHandle {
    /// Connect to the card in `reader` on a new worker thread.
    pub(crate) async fn connect(
        context: &Context,
        reader: &str,
        mode: CardMode,
        protocol: Protocol,
    ) -> Result<Self, PcscError> {
        let name =
            CString::new(reader).map_err(|_| PcscError::InvalidReaderName(reader.to_string()))?;
        let preferred = protocols(protocol)?;
        let context = context.clone();

        let (ready_tx, ready_rx) = oneshot::channel::<Result<Protocol, PcscError>>();
        let (requests, requests_rx) = crossbeam_channel::unbounded();
        let worker_reader = reader.to_string();

        thread::Builder::new()
            .name(format!("pcsc-card {reader}"))
            .spawn(move || {
                let card = match context.connect(&name, share_mode(mode), preferred) {
                    Ok(card) => card,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };

                let active = active_protocol(card.status2_owned().ok().and_then(|s| s.protocol2()));
                if ready_tx.send(Ok(active)).is_err() {
                    // The caller went away while connecting.
                    let _ = card.disconnect(pcsc::Disposition::LeaveCard);
                    return;
                }

                Worker {
                    reader: worker_reader,
                    protocol: active,
                    requests: requests_rx,
                }
                .run(card);
            })?;

        let protocol = ready_rx.await.map_err(|_| PcscError::HandleClosed)??;
        debug!(%reader, ?mode, %protocol, "card connected");

        Ok(Self {
            reader: reader.to_string(),
            protocol,
            requests,
        })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Request,
    ) -> Result<T, PcscError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(build(reply))
            .map_err(|_| PcscError::HandleClosed)?;
        response.await.map_err(|_| PcscError::HandleClosed)?
    }
}

impl fmt::Debug for PcscCardHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscCardHandle")
            .field("reader", &self.reader)
            .field("protocol", &self.protocol)
            .finish()
    }
}

#[async_trait]
impl CardHandle for PcscCardHandle {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn transmit(
        &self,
        protocol: Option<Protocol>,
        input: &[u8],
        capacity: usize,
    ) -> Result<Bytes, PcscError> {
        let input = input.to_vec();
        self.request(|reply| Request::Transmit {
            protocol,
            input,
            capacity,
            reply,
        })
        .await
    }

    async fn control(
        &self,
        code: ControlCode,
        input: &[u8],
        capacity: usize,
    ) -> Result<Bytes, PcscError> {
        let input = input.to_vec();
        self.request(|reply| Request::Control {
            code,
            input,
            capacity,
            reply,
        })
        .await
    }

    async fn attribute_get(&self, id: AttributeId, capacity: usize) -> Result<Bytes, PcscError> {
        self.request(|reply| Request::GetAttribute {
            id,
            capacity,
            reply,
        })
        .await
    }

    async fn attribute_set(&self, id: AttributeId, value: &[u8]) -> Result<(), PcscError> {
        let value = value.to_vec();
        self.request(|reply| Request::SetAttribute { id, value, reply })
            .await
    }

    async fn reconnect(
        &self,
        mode: CardMode,
        protocol: Protocol,
        initialization: Disposition,
    ) -> Result<Protocol, PcscError> {
        self.request(|reply| Request::Reconnect {
            mode,
            protocol,
            initialization,
            reply,
        })
        .await
    }

    async fn state(&self) -> Result<RawCardState, PcscError> {
        self.request(|reply| Request::State { reply }).await
    }

    async fn begin_transaction(&self) -> Result<(), PcscError> {
        self.request(|reply| Request::BeginTransaction { reply })
            .await
    }

    async fn end_transaction(&self, disposition: Disposition) -> Result<(), PcscError> {
        self.request(|reply| Request::EndTransaction { disposition, reply })
            .await
    }

    async fn disconnect(&self, disposition: Disposition) -> Result<(), PcscError> {
        self.request(|reply| Request::Disconnect { disposition, reply })
            .await
    }

    fn release_transaction(&self) {
        // Nobody waits for the reply; the worker logs a failed release.
        let (reply, _) = oneshot::channel();
        let request = Request::EndTransaction {
            disposition: Disposition::Leave,
            reply,
        };
        if self.requests.send(request).is_err() {
            debug!(reader = %self.reader, "card worker gone, transaction already released");
        }
    }
}

/// Owner of one native card handle.
struct Worker {
    reader: String,
    protocol: Protocol,
    requests: Receiver<Request>,
}

impl Worker {
    fn run(mut self, mut card: Card) {
        while let Ok(request) = self.requests.recv() {
            match request {
                Request::Reconnect {
                    mode,
                    protocol,
                    initialization,
                    reply,
                } => {
                    let _ = reply.send(self.reconnect(&mut card, mode, protocol, initialization));
                }
                Request::BeginTransaction { reply } => match card.transaction() {
                    Ok(transaction) => {
                        let _ = reply.send(Ok(()));
                        if !self.run_transaction(transaction) {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e.into()));
                    }
                },
                Request::EndTransaction { reply, .. } => {
                    let _ = reply.send(Err(PcscError::NoTransaction));
                }
                Request::Disconnect { disposition: d, reply } => {
                    match card.disconnect(disposition(d)) {
                        Ok(()) => {
                            let _ = reply.send(Ok(()));
                            trace!(reader = %self.reader, "card worker finished");
                            return;
                        }
                        Err((returned, e)) => {
                            card = returned;
                            let _ = reply.send(Err(e.into()));
                        }
                    }
                }
                other => self.serve(&card, other),
            }
        }

        // `pcsc::Card` resets on drop; an abandoned handle leaves the card as is.
        if let Err((_, e)) = card.disconnect(pcsc::Disposition::LeaveCard) {
            warn!(reader = %self.reader, error = %e, "failed to release dropped card");
        }
        trace!(reader = %self.reader, "card handle dropped");
    }

    /// Serve requests while the transaction lock is held. Returns `false` when
    /// the handle was dropped.
    fn run_transaction(&self, mut transaction: pcsc::Transaction<'_>) -> bool {
        loop {
            let Ok(request) = self.requests.recv() else {
                warn!(reader = %self.reader, "card handle dropped inside a transaction");
                return false;
            };

            match request {
                Request::EndTransaction { disposition: d, reply } => {
                    match transaction.end(disposition(d)) {
                        Ok(()) => {
                            let _ = reply.send(Ok(()));
                            return true;
                        }
                        Err((returned, e)) => {
                            transaction = returned;
                            if let Err(Err(e)) = reply.send(Err(e.into())) {
                                warn!(reader = %self.reader, error = %e, "failed to release transaction");
                            }
                        }
                    }
                }
                other => self.serve(&transaction, other),
            }
        }
    }

    fn serve(&self, card: &Card, request: Request) {
        match request {
            Request::Transmit {
                protocol,
                input,
                capacity,
                reply,
            } => {
                let _ = reply.send(self.transmit(card, protocol, &input, capacity));
            }
            Request::Control {
                code,
                input,
                capacity,
                reply,
            } => {
                let mut buffer = vec![0u8; capacity];
                let result = card
                    .control(code.raw().into(), &input, &mut buffer)
                    .map(Bytes::copy_from_slice)
                    .map_err(PcscError::from);
                let _ = reply.send(result);
            }
            Request::GetAttribute {
                id,
                capacity,
                reply,
            } => {
                let result = native_attribute(id).and_then(|attribute| {
                    let mut buffer = vec![0u8; capacity];
                    card.get_attribute(attribute, &mut buffer)
                        .map(Bytes::copy_from_slice)
                        .map_err(PcscError::from)
                });
                let _ = reply.send(result);
            }
            Request::SetAttribute { id, value, reply } => {
                let result = native_attribute(id).and_then(|attribute| {
                    card.set_attribute(attribute, &value)
                        .map_err(PcscError::from)
                });
                let _ = reply.send(result);
            }
            Request::State { reply } => {
                let _ = reply.send(self.state(card));
            }
            // Only reachable while a transaction is open; `run` handles these
            // itself otherwise.
            Request::BeginTransaction { reply } | Request::Disconnect { reply, .. } => {
                let _ = reply.send(Err(PcscError::TransactionInProgress));
            }
            Request::Reconnect { reply, .. } => {
                let _ = reply.send(Err(PcscError::TransactionInProgress));
            }
            Request::EndTransaction { reply, .. } => {
                let _ = reply.send(Err(PcscError::NoTransaction));
            }
        }
    }

    fn transmit(
        &self,
        card: &Card,
        protocol: Option<Protocol>,
        input: &[u8],
        capacity: usize,
    ) -> Result<Bytes, PcscError> {
        if let Some(protocol) = protocol {
            if protocol != self.protocol {
                return Err(PcscError::Unsupported(
                    "transmit with a protocol other than the active one",
                ));
            }
        }

        let mut buffer = vec![0u8; capacity];
        let response = card.transmit(input, &mut buffer)?;
        Ok(Bytes::copy_from_slice(response))
    }

    fn reconnect(
        &mut self,
        card: &mut Card,
        mode: CardMode,
        protocol: Protocol,
        initialization: Disposition,
    ) -> Result<Protocol, PcscError> {
        card.reconnect(share_mode(mode), protocols(protocol)?, disposition(initialization))?;
        self.protocol = active_protocol(card.status2_owned()?.protocol2());
        Ok(self.protocol)
    }

    fn state(&self, card: &Card) -> Result<RawCardState, PcscError> {
        let status = card.status2_owned()?;
        Ok(RawCardState {
            atr: Bytes::copy_from_slice(status.atr()),
            protocol: active_protocol(status.protocol2()),
            reader_name: self.reader.clone(),
            status: card_status(status.status()),
        })
    }
}

fn card_status(status: pcsc::Status) -> u32 {
    [
        (pcsc::Status::UNKNOWN, CardStatus::Unknown),
        (pcsc::Status::ABSENT, CardStatus::Absent),
        (pcsc::Status::PRESENT, CardStatus::Present),
        (pcsc::Status::SWALLOWED, CardStatus::Swallowed),
        (pcsc::Status::POWERED, CardStatus::Powered),
        (pcsc::Status::NEGOTIABLE, CardStatus::Negotiable),
        (pcsc::Status::SPECIFIC, CardStatus::Specific),
    ]
    .into_iter()
    .filter(|(native, _)| status.contains(*native))
    .fold(0, |raw, (_, flag)| raw | flag as u32)
}

/// Attributes the native binding can address.
fn native_attribute(id: AttributeId) -> Result<pcsc::Attribute, PcscError> {
    use pcsc::Attribute;

    Ok(match id {
        attributes::VENDOR_NAME => Attribute::VendorName,
        attributes::VENDOR_IFD_TYPE => Attribute::VendorIfdType,
        attributes::VENDOR_IFD_VERSION => Attribute::VendorIfdVersion,
        attributes::VENDOR_IFD_SERIAL_NO => Attribute::VendorIfdSerialNo,
        attributes::CHANNEL_ID => Attribute::ChannelId,
        attributes::CURRENT_PROTOCOL_TYPE => Attribute::CurrentProtocolType,
        attributes::ICC_PRESENCE => Attribute::IccPresence,
        attributes::ATR_STRING => Attribute::AtrString,
        attributes::DEVICE_FRIENDLY_NAME => Attribute::DeviceFriendlyName,
        attributes::DEVICE_SYSTEM_NAME => Attribute::DeviceSystemName,
        other => return Err(PcscError::UnsupportedAttribute(other.raw())),
    })
}
