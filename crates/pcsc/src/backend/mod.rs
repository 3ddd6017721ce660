//! Native PC/SC implementation of the card service boundary
//!
//! [`PcscService`] runs the reader monitor on a dedicated thread with its own
//! context and gives every card connection a worker thread that owns the
//! native card handle. Blocking PC/SC calls never run on an async executor.

mod handle;
mod manager;
mod monitor;

pub use handle::PcscCardHandle;
pub use manager::PcscService;

use crate::error::PcscError;
use crate::types::{CardMode, Disposition, Protocol};

pub(crate) const fn share_mode(mode: CardMode) -> pcsc::ShareMode {
    match mode {
        CardMode::Exclusive => pcsc::ShareMode::Exclusive,
        CardMode::Shared => pcsc::ShareMode::Shared,
        CardMode::Direct => pcsc::ShareMode::Direct,
    }
}

pub(crate) fn protocols(protocol: Protocol) -> Result<pcsc::Protocols, PcscError> {
    match protocol {
        Protocol::Unset => Ok(pcsc::Protocols::UNDEFINED),
        Protocol::T0 => Ok(pcsc::Protocols::T0),
        Protocol::T1 => Ok(pcsc::Protocols::T1),
        Protocol::Any => Ok(pcsc::Protocols::ANY),
        Protocol::T15 => Err(PcscError::Unsupported("the T15 protocol")),
    }
}

pub(crate) const fn disposition(disposition: Disposition) -> pcsc::Disposition {
    match disposition {
        Disposition::Leave => pcsc::Disposition::LeaveCard,
        Disposition::Reset => pcsc::Disposition::ResetCard,
        Disposition::Unpower => pcsc::Disposition::UnpowerCard,
        Disposition::Eject => pcsc::Disposition::EjectCard,
    }
}

pub(crate) const fn active_protocol(protocol: Option<pcsc::Protocol>) -> Protocol {
    match protocol {
        Some(pcsc::Protocol::T0) => Protocol::T0,
        Some(pcsc::Protocol::T1) => Protocol::T1,
        _ => Protocol::Unset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_mapping() {
        assert_eq!(protocols(Protocol::Any).unwrap(), pcsc::Protocols::ANY);
        assert_eq!(
            protocols(Protocol::Unset).unwrap(),
            pcsc::Protocols::UNDEFINED
        );
        assert!(matches!(
            protocols(Protocol::T15),
            Err(PcscError::Unsupported(_))
        ));
        assert_eq!(active_protocol(Some(pcsc::Protocol::T1)), Protocol::T1);
        assert_eq!(active_protocol(None), Protocol::Unset);
    }
}
