//! Connection parameters shared verbatim with the PC/SC service.

use std::fmt;

/// Maximum number of bytes in an ATR value.
pub const MAX_ATR_LEN: usize = 33;

/// Maximum number of bytes in a short APDU response or control buffer.
pub const MAX_BUFFER_LEN: usize = 264;

/// Maximum number of bytes in an extended APDU response buffer.
pub const MAX_BUFFER_LEN_EXTENDED: usize = 65538;

/// Maximum number of readers monitored at once.
pub const MAX_READERS: usize = 16;

/// Access mode requested for a card connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CardMode {
    /// No other process can access the reader until disconnected.
    Exclusive = 1,
    /// Other processes can access the reader as well.
    Shared = 2,
    /// Direct connection to the reader, without requiring a card.
    ///
    /// Shared on Unix systems and exclusive on Windows.
    Direct = 3,
}

/// Action taken on the card when a connection or transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Disposition {
    /// Do nothing.
    Leave = 0,
    /// Warm reset.
    Reset = 1,
    /// Power down (cold reset).
    Unpower = 2,
    /// Eject the card. Not supported by any known hardware.
    Eject = 3,
}

/// Card communication protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Protocol {
    /// No protocol negotiated. Only valid together with [`CardMode::Direct`].
    Unset = 0,
    /// The T=0 protocol.
    T0 = 1,
    /// The T=1 protocol.
    T1 = 2,
    /// Either T=0 or T=1, whichever suits the card. Only valid as a preference.
    Any = 3,
    /// The T=15 protocol.
    T15 = 8,
}

impl Protocol {
    /// Look up a protocol by its raw value.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Unset),
            1 => Some(Self::T0),
            2 => Some(Self::T1),
            3 => Some(Self::Any),
            8 => Some(Self::T15),
            _ => None,
        }
    }

    /// Raw protocol value.
    pub const fn raw(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(protocol_string(*self))
    }
}

/// String representation of a protocol, for diagnostics.
pub const fn protocol_string(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Unset => "UNSET",
        Protocol::T0 => "T0",
        Protocol::T1 => "T1",
        Protocol::Any => "ANY",
        Protocol::T15 => "T15",
    }
}

/// A platform-specific reader control code, as accepted by `control`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlCode(u32);

impl ControlCode {
    /// Get the `IOCTL_FEATURE_REQUEST` (CCID `GET_FEATURE_REQUEST`) control code.
    pub const fn feature_request() -> Self {
        control_code(FEATURE_REQUEST_FUNCTION)
    }

    /// Get the `IOCTL_SMARTCARD_SET_PROTOCOL` control code.
    pub const fn set_protocol() -> Self {
        control_code(SET_PROTOCOL_FUNCTION)
    }

    /// Wrap an already platform-encoded control code.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw control code value.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ControlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Function code of the CCID feature request.
pub const FEATURE_REQUEST_FUNCTION: u32 = 3400;

/// Function code of the set-protocol request.
pub const SET_PROTOCOL_FUNCTION: u32 = 12;

/// Construct a platform-specific reader control code from a function code.
///
/// Only the low 14 bits of `function` fit the function field.
#[cfg(windows)]
pub const fn control_code(function: u32) -> ControlCode {
    // CTL_CODE(FILE_DEVICE_SMARTCARD, function, METHOD_BUFFERED, FILE_ANY_ACCESS)
    ControlCode((0x31 << 16) | ((function & 0x3fff) << 2))
}

/// Construct a platform-specific reader control code from a function code.
///
/// Function codes are meant to fit below `0x0200_0000`; larger ones wrap.
#[cfg(not(windows))]
pub const fn control_code(function: u32) -> ControlCode {
    ControlCode(0x4200_0000_u32.wrapping_add(function))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_raw_roundtrip() {
        for protocol in [
            Protocol::Unset,
            Protocol::T0,
            Protocol::T1,
            Protocol::Any,
            Protocol::T15,
        ] {
            assert_eq!(Protocol::from_raw(protocol.raw()), Some(protocol));
        }
        assert_eq!(Protocol::from_raw(4), None);
        assert_eq!(Protocol::Any.raw(), Protocol::T0.raw() | Protocol::T1.raw());
    }

    #[test]
    fn test_fixed_constants() {
        assert_eq!(CardMode::Exclusive as u32, 1);
        assert_eq!(CardMode::Shared as u32, 2);
        assert_eq!(CardMode::Direct as u32, 3);
        assert_eq!(Disposition::Leave as u32, 0);
        assert_eq!(Disposition::Eject as u32, 3);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_control_code_unix() {
        assert_eq!(control_code(3400).raw(), 0x4200_0d48);
        assert_eq!(ControlCode::feature_request(), control_code(3400));
        assert_eq!(ControlCode::set_protocol().raw(), 0x4200_000c);
        assert_eq!(control_code(u32::MAX).raw(), 0x41ff_ffff);
    }

    #[cfg(windows)]
    #[test]
    fn test_control_code_windows() {
        assert_eq!(control_code(3400).raw(), 0x0031_3520);
        assert_eq!(control_code(u32::MAX).raw(), 0x0031_fffc);
    }
}
