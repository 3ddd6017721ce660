//! Bit-flag views over raw reader and card status masks.
//!
//! The PC/SC service reports reader and card conditions as raw integer masks.
//! [`StatusFlags`] wraps one such mask together with the flag domain it is
//! interpreted in, so a reader mask can never be tested against card flags:
//!
//! ```
//! use nexum_pcsc::{ReaderStatus, ReaderStatusFlags};
//!
//! let status = ReaderStatusFlags::from_raw(0x22);
//! assert!(status.has(&[ReaderStatus::Present, ReaderStatus::Changed]));
//! assert!(!status.has_any(&[ReaderStatus::Mute, ReaderStatus::InUse]));
//! assert_eq!(status.to_string(), "CHANGED | PRESENT");
//! ```

use std::fmt;
use std::marker::PhantomData;

/// A closed set of single-bit status flags sharing one raw mask.
pub trait StatusFlag: Copy + fmt::Debug + Send + Sync + 'static {
    /// Every flag of the domain, in ascending bit order.
    const ALL: &'static [Self];

    /// The single bit this flag occupies.
    fn bits(self) -> u32;

    /// Diagnostic name of the flag.
    fn name(self) -> &'static str;
}

macro_rules! status_domain {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:literal => $label:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value,)+
        }

        impl StatusFlag for $name {
            const ALL: &'static [Self] = &[$(Self::$variant,)+];

            fn bits(self) -> u32 {
                self as u32
            }

            fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }
        }

        impl std::ops::BitOr for $name {
            type Output = StatusFlags<$name>;

            fn bitor(self, rhs: Self) -> Self::Output {
                StatusFlags::from_raw(self.bits() | rhs.bits())
            }
        }

        impl std::ops::BitOr<$name> for StatusFlags<$name> {
            type Output = Self;

            fn bitor(self, rhs: $name) -> Self::Output {
                Self::from_raw(self.raw() | rhs.bits())
            }
        }

        impl From<$name> for StatusFlags<$name> {
            fn from(flag: $name) -> Self {
                Self::from_raw(flag.bits())
            }
        }
    };
}

status_domain! {
    /// Status of a connected (or previously connected) card reader.
    ReaderStatus {
        /// The reader should be ignored by the service.
        Ignore = 0x0001 => "IGNORE",
        /// The reader state differs from the previously known state.
        Changed = 0x0002 => "CHANGED",
        /// The reader name is not recognized by the service.
        Unknown = 0x0004 => "UNKNOWN",
        /// The reader state is unavailable.
        Unavailable = 0x0008 => "UNAVAILABLE",
        /// No card in the reader.
        Empty = 0x0010 => "EMPTY",
        /// A card is present in the reader.
        Present = 0x0020 => "PRESENT",
        /// The card ATR matches one of the target ATRs.
        AtrMatch = 0x0040 => "ATR_MATCH",
        /// The card is in exclusive use by another process.
        Exclusive = 0x0080 => "EXCLUSIVE",
        /// The card is in use by another process, possibly shared.
        InUse = 0x0100 => "IN_USE",
        /// The card does not respond.
        Mute = 0x0200 => "MUTE",
        /// The card is present but not powered.
        Unpowered = 0x0400 => "UNPOWERED",
    }
}

status_domain! {
    /// Status of a card in a reader, as reported by a card connection.
    CardStatus {
        /// Unknown state.
        Unknown = 0x0001 => "UNKNOWN",
        /// No card in the reader.
        Absent = 0x0002 => "ABSENT",
        /// A card is present but not in position for use.
        Present = 0x0004 => "PRESENT",
        /// A card is in position for use but not powered.
        Swallowed = 0x0008 => "SWALLOWED",
        /// The card is powered but the reader does not know its mode.
        Powered = 0x0010 => "POWERED",
        /// The card has been reset and awaits PTS negotiation.
        Negotiable = 0x0020 => "NEGOTIABLE",
        /// The card has been reset and a protocol has been established.
        Specific = 0x0040 => "SPECIFIC",
    }
}

/// Immutable view of a raw status mask in the flag domain `F`.
pub struct StatusFlags<F> {
    raw: u32,
    _domain: PhantomData<F>,
}

/// Status flags of a card reader.
pub type ReaderStatusFlags = StatusFlags<ReaderStatus>;

/// Status flags of a connected card.
pub type CardStatusFlags = StatusFlags<CardStatus>;

impl<F: StatusFlag> StatusFlags<F> {
    /// Wrap a raw mask as reported by the service.
    pub const fn from_raw(raw: u32) -> Self {
        Self {
            raw,
            _domain: PhantomData,
        }
    }

    /// The raw mask value.
    pub const fn raw(&self) -> u32 {
        self.raw
    }

    /// `true` iff *all* of `flags` are set. An empty slice is trivially held.
    pub fn has(&self, flags: &[F]) -> bool {
        let mask = mask_of(flags);
        self.raw & mask == mask
    }

    /// `true` if *any* of `flags` is set.
    pub fn has_any(&self, flags: &[F]) -> bool {
        self.raw & mask_of(flags) != 0
    }

    /// The known flags set in this mask, in ascending bit order.
    pub fn iter(&self) -> impl Iterator<Item = F> + '_ {
        F::ALL.iter().copied().filter(|flag| self.raw & flag.bits() != 0)
    }
}

fn mask_of<F: StatusFlag>(flags: &[F]) -> u32 {
    flags.iter().fold(0, |mask, flag| mask | flag.bits())
}

// Manual impls avoid spurious `F: Trait` bounds from derives.
impl<F> Clone for StatusFlags<F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F> Copy for StatusFlags<F> {}

impl<F> PartialEq for StatusFlags<F> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<F> Eq for StatusFlags<F> {}

impl<F: StatusFlag> fmt::Debug for StatusFlags<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StatusFlags")
            .field(&format_args!("{:#06x}", self.raw))
            .field(&format_args!("{}", self))
            .finish()
    }
}

impl<F: StatusFlag> fmt::Display for StatusFlags<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.iter().map(F::name);
        match names.next() {
            None => f.write_str("NONE"),
            Some(first) => {
                f.write_str(first)?;
                for name in names {
                    write!(f, " | {}", name)?;
                }
                Ok(())
            }
        }
    }
}

/// Human-readable names of the reader status flags set in `raw`.
pub fn reader_status_string(raw: u32) -> String {
    ReaderStatusFlags::from_raw(raw).to_string()
}

/// Human-readable names of the card status flags set in `raw`.
pub fn card_status_string(raw: u32) -> String {
    CardStatusFlags::from_raw(raw).to_string()
}
