//! Reader (IFD handler) attribute identifiers.
//!
//! Attribute ids are built from a class and a tag, `class << 16 | tag`, the
//! same way the platform headers define `SCARD_ATTR_*`. The list below is not
//! exhaustive; [`AttributeId::new`] builds any other id.
#![allow(missing_docs)]

use std::fmt;

/// Attribute class namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AttributeClass {
    /// Vendor information.
    VendorInfo = 1,
    /// Communication definitions.
    Communications = 2,
    /// Protocol definitions.
    Protocol = 3,
    /// Power management definitions.
    PowerMgmt = 4,
    /// Security assurance definitions.
    Security = 5,
    /// Mechanical characteristic definitions.
    Mechanical = 6,
    /// Vendor specific definitions.
    VendorDefined = 7,
    /// Interface device protocol options.
    IfdProtocol = 8,
    /// ICC state specific definitions.
    IccState = 9,
    /// System-specific definitions.
    System = 0x7fff,
}

/// Identifier of a reader attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeId(u32);

impl AttributeId {
    /// Build an id from its class and tag.
    pub const fn new(class: AttributeClass, tag: u16) -> Self {
        Self(((class as u32) << 16) | tag as u32)
    }

    /// Wrap a raw attribute id.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw attribute id.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Class half of the id, if it is a known class.
    pub const fn class(self) -> Option<AttributeClass> {
        match self.0 >> 16 {
            1 => Some(AttributeClass::VendorInfo),
            2 => Some(AttributeClass::Communications),
            3 => Some(AttributeClass::Protocol),
            4 => Some(AttributeClass::PowerMgmt),
            5 => Some(AttributeClass::Security),
            6 => Some(AttributeClass::Mechanical),
            7 => Some(AttributeClass::VendorDefined),
            8 => Some(AttributeClass::IfdProtocol),
            9 => Some(AttributeClass::IccState),
            0x7fff => Some(AttributeClass::System),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

use AttributeClass::*;

pub const VENDOR_NAME: AttributeId = AttributeId::new(VendorInfo, 0x0100);
pub const VENDOR_IFD_TYPE: AttributeId = AttributeId::new(VendorInfo, 0x0101);
pub const VENDOR_IFD_VERSION: AttributeId = AttributeId::new(VendorInfo, 0x0102);
pub const VENDOR_IFD_SERIAL_NO: AttributeId = AttributeId::new(VendorInfo, 0x0103);
pub const CHANNEL_ID: AttributeId = AttributeId::new(Communications, 0x0110);
pub const ASYNC_PROTOCOL_TYPES: AttributeId = AttributeId::new(Protocol, 0x0120);
pub const DEFAULT_CLK: AttributeId = AttributeId::new(Protocol, 0x0121);
pub const MAX_CLK: AttributeId = AttributeId::new(Protocol, 0x0122);
pub const DEFAULT_DATA_RATE: AttributeId = AttributeId::new(Protocol, 0x0123);
pub const MAX_DATA_RATE: AttributeId = AttributeId::new(Protocol, 0x0124);
pub const MAX_IFSD: AttributeId = AttributeId::new(Protocol, 0x0125);
pub const SYNC_PROTOCOL_TYPES: AttributeId = AttributeId::new(Protocol, 0x0126);
pub const POWER_MGMT_SUPPORT: AttributeId = AttributeId::new(PowerMgmt, 0x0131);
pub const USER_TO_CARD_AUTH_DEVICE: AttributeId = AttributeId::new(Security, 0x0140);
pub const USER_AUTH_INPUT_DEVICE: AttributeId = AttributeId::new(Security, 0x0142);
pub const CHARACTERISTICS: AttributeId = AttributeId::new(Mechanical, 0x0150);
pub const CURRENT_PROTOCOL_TYPE: AttributeId = AttributeId::new(IfdProtocol, 0x0201);
pub const CURRENT_CLK: AttributeId = AttributeId::new(IfdProtocol, 0x0202);
pub const CURRENT_F: AttributeId = AttributeId::new(IfdProtocol, 0x0203);
pub const CURRENT_D: AttributeId = AttributeId::new(IfdProtocol, 0x0204);
pub const CURRENT_N: AttributeId = AttributeId::new(IfdProtocol, 0x0205);
pub const CURRENT_W: AttributeId = AttributeId::new(IfdProtocol, 0x0206);
pub const CURRENT_IFSC: AttributeId = AttributeId::new(IfdProtocol, 0x0207);
pub const CURRENT_IFSD: AttributeId = AttributeId::new(IfdProtocol, 0x0208);
pub const CURRENT_BWT: AttributeId = AttributeId::new(IfdProtocol, 0x0209);
pub const CURRENT_CWT: AttributeId = AttributeId::new(IfdProtocol, 0x020a);
pub const CURRENT_EBC_ENCODING: AttributeId = AttributeId::new(IfdProtocol, 0x020b);
pub const EXTENDED_BWT: AttributeId = AttributeId::new(IfdProtocol, 0x020c);
pub const ICC_PRESENCE: AttributeId = AttributeId::new(IccState, 0x0300);
pub const ICC_INTERFACE_STATUS: AttributeId = AttributeId::new(IccState, 0x0301);
pub const CURRENT_IO_STATE: AttributeId = AttributeId::new(IccState, 0x0302);
pub const ATR_STRING: AttributeId = AttributeId::new(IccState, 0x0303);
pub const ICC_TYPE_PER_ATR: AttributeId = AttributeId::new(IccState, 0x0304);
pub const ESC_RESET: AttributeId = AttributeId::new(VendorDefined, 0xa000);
pub const ESC_CANCEL: AttributeId = AttributeId::new(VendorDefined, 0xa003);
pub const ESC_AUTH_REQUEST: AttributeId = AttributeId::new(VendorDefined, 0xa005);
pub const MAX_INPUT: AttributeId = AttributeId::new(VendorDefined, 0xa007);
pub const DEVICE_UNIT: AttributeId = AttributeId::new(System, 0x0001);
pub const DEVICE_IN_USE: AttributeId = AttributeId::new(System, 0x0002);
pub const DEVICE_FRIENDLY_NAME: AttributeId = AttributeId::new(System, 0x0003);
pub const DEVICE_SYSTEM_NAME: AttributeId = AttributeId::new(System, 0x0004);
pub const DEVICE_FRIENDLY_NAME_W: AttributeId = AttributeId::new(System, 0x0005);
pub const DEVICE_SYSTEM_NAME_W: AttributeId = AttributeId::new(System, 0x0006);
pub const SUPPRESS_T1_IFS_REQUEST: AttributeId = AttributeId::new(System, 0x0007);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_ids() {
        assert_eq!(VENDOR_NAME.raw(), 0x0001_0100);
        assert_eq!(ATR_STRING.raw(), 0x0009_0303);
        assert_eq!(DEVICE_FRIENDLY_NAME.raw(), 0x7fff_0003);
        assert_eq!(ATR_STRING.class(), Some(AttributeClass::IccState));
        assert_eq!(AttributeId::from_raw(0x0042_0000).class(), None);
    }
}
