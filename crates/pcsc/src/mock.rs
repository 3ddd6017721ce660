//! In-memory card service for tests

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;

use crate::attributes::{self, AttributeId};
use crate::error::PcscError;
use crate::service::{CardHandle, CardService, MonitorEvent, MonitorSender, RawCardState};
use crate::status::{CardStatus, ReaderStatusFlags};
use crate::types::{CardMode, ControlCode, Disposition, Protocol};

/// Service whose monitor is driven by the test through `push_*`.
#[derive(Debug, Default)]
pub(crate) struct MockService {
    sender: Mutex<Option<MonitorSender>>,
    cards: Mutex<HashMap<String, Bytes>>,
    start_error: Mutex<Option<PcscError>>,
}

impl MockService {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert_card(&self, reader: &str, atr: &[u8]) {
        self.cards
            .lock()
            .insert(reader.to_string(), Bytes::copy_from_slice(atr));
    }

    pub(crate) fn fail_start(&self, error: PcscError) {
        *self.start_error.lock() = Some(error);
    }

    pub(crate) fn sender(&self) -> Option<MonitorSender> {
        self.sender.lock().clone()
    }

    pub(crate) fn push_change(&self, reader: &str, status: ReaderStatusFlags, atr: &[u8]) {
        self.push(MonitorEvent::Change {
            reader: reader.to_string(),
            status: status.raw(),
            atr: Bytes::copy_from_slice(atr),
        });
    }

    pub(crate) fn push_error(&self, error: PcscError) {
        self.push(MonitorEvent::Error(error));
    }

    fn push(&self, event: MonitorEvent) {
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.send(event);
        }
    }
}

#[async_trait]
impl CardService for MockService {
    fn start(&self, events: MonitorSender) -> Result<(), PcscError> {
        if let Some(error) = self.start_error.lock().take() {
            return Err(error);
        }
        *self.sender.lock() = Some(events);
        Ok(())
    }

    fn stop(&self) -> Result<(), PcscError> {
        self.sender.lock().take();
        Ok(())
    }

    async fn connect(
        &self,
        reader: &str,
        mode: CardMode,
        protocol: Protocol,
    ) -> Result<Box<dyn CardHandle>, PcscError> {
        let atr = self.cards.lock().get(reader).cloned();
        let atr = match (atr, mode) {
            (Some(atr), _) => atr,
            (None, CardMode::Direct) => Bytes::new(),
            (None, _) => return Err(PcscError::Pcsc(pcsc::Error::NoSmartcard)),
        };

        let protocol = match protocol {
            Protocol::Any => Protocol::T1,
            other => other,
        };
        Ok(Box::new(MockCardHandle::new(reader, protocol, &atr)))
    }
}

#[derive(Debug)]
struct MockCard {
    reader: String,
    protocol: Protocol,
    atr: Bytes,
    calls: Vec<String>,
    fail_next: Option<PcscError>,
    in_transaction: bool,
    attributes: HashMap<u32, Bytes>,
}

/// Card handle recording every call it receives.
#[derive(Debug, Clone)]
pub(crate) struct MockCardHandle {
    card: Arc<Mutex<MockCard>>,
}

impl MockCardHandle {
    pub(crate) fn new(reader: &str, protocol: Protocol, atr: &[u8]) -> Self {
        let atr = Bytes::copy_from_slice(atr);
        let mut attributes = HashMap::new();
        attributes.insert(attributes::ATR_STRING.raw(), atr.clone());

        Self {
            card: Arc::new(Mutex::new(MockCard {
                reader: reader.to_string(),
                protocol,
                atr,
                calls: Vec::new(),
                fail_next: None,
                in_transaction: false,
                attributes,
            })),
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.card.lock().calls.clone()
    }

    pub(crate) fn fail_next(&self, error: PcscError) {
        self.card.lock().fail_next = Some(error);
    }

    pub(crate) fn in_transaction(&self) -> bool {
        self.card.lock().in_transaction
    }

    /// Record `call` and apply a pending failure.
    fn enter(&self, call: String) -> Result<parking_lot::MutexGuard<'_, MockCard>, PcscError> {
        let mut card = self.card.lock();
        card.calls.push(call);
        match card.fail_next.take() {
            Some(error) => Err(error),
            None => Ok(card),
        }
    }
}

fn respond(input: &[u8], capacity: usize) -> Result<Bytes, PcscError> {
    if input.len() + 2 > capacity {
        return Err(PcscError::Pcsc(pcsc::Error::InsufficientBuffer));
    }
    let mut response = BytesMut::with_capacity(input.len() + 2);
    response.put_slice(input);
    response.put_slice(&[0x90, 0x00]);
    Ok(response.freeze())
}

#[async_trait]
impl CardHandle for MockCardHandle {
    fn protocol(&self) -> Protocol {
        self.card.lock().protocol
    }

    async fn transmit(
        &self,
        protocol: Option<Protocol>,
        input: &[u8],
        capacity: usize,
    ) -> Result<Bytes, PcscError> {
        let _card = self.enter(format!("transmit({protocol:?})"))?;
        respond(input, capacity)
    }

    async fn control(
        &self,
        code: ControlCode,
        input: &[u8],
        capacity: usize,
    ) -> Result<Bytes, PcscError> {
        let _card = self.enter(format!("control({code})"))?;
        respond(input, capacity)
    }

    async fn attribute_get(&self, id: AttributeId, capacity: usize) -> Result<Bytes, PcscError> {
        let card = self.enter(format!("attribute_get({id})"))?;
        match card.attributes.get(&id.raw()) {
            Some(value) if value.len() > capacity => {
                Err(PcscError::Pcsc(pcsc::Error::InsufficientBuffer))
            }
            Some(value) => Ok(value.clone()),
            None => Err(PcscError::UnsupportedAttribute(id.raw())),
        }
    }

    async fn attribute_set(&self, id: AttributeId, value: &[u8]) -> Result<(), PcscError> {
        let mut card = self.enter(format!("attribute_set({id})"))?;
        card.attributes
            .insert(id.raw(), Bytes::copy_from_slice(value));
        Ok(())
    }

    async fn reconnect(
        &self,
        mode: CardMode,
        protocol: Protocol,
        initialization: Disposition,
    ) -> Result<Protocol, PcscError> {
        let mut card =
            self.enter(format!("reconnect({mode:?}, {protocol:?}, {initialization:?})"))?;
        card.protocol = protocol;
        Ok(protocol)
    }

    async fn state(&self) -> Result<RawCardState, PcscError> {
        let card = self.enter("state".into())?;
        Ok(RawCardState {
            atr: card.atr.clone(),
            protocol: card.protocol,
            reader_name: card.reader.clone(),
            status: (CardStatus::Present | CardStatus::Powered | CardStatus::Specific).raw(),
        })
    }

    async fn begin_transaction(&self) -> Result<(), PcscError> {
        let mut card = self.enter("begin_transaction".into())?;
        if card.in_transaction {
            return Err(PcscError::Pcsc(pcsc::Error::SharingViolation));
        }
        card.in_transaction = true;
        Ok(())
    }

    async fn end_transaction(&self, disposition: Disposition) -> Result<(), PcscError> {
        let mut card = self.enter(format!("end_transaction({disposition:?})"))?;
        if !card.in_transaction {
            return Err(PcscError::Pcsc(pcsc::Error::NotTransacted));
        }
        card.in_transaction = false;
        Ok(())
    }

    async fn disconnect(&self, disposition: Disposition) -> Result<(), PcscError> {
        let _card = self.enter(format!("disconnect({disposition:?})"))?;
        Ok(())
    }

    fn release_transaction(&self) {
        let mut card = self.card.lock();
        card.calls.push("release_transaction".into());
        card.in_transaction = false;
    }
}
