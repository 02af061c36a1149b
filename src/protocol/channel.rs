use derive_more::{Display, Error};
use std::{fmt, str::FromStr};
use strum::EnumIter;

/// Size in bytes of each digital process-image area.
pub const AREA_BYTES: u16 = 2;

/// One of the two fixed digital memory regions of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, Display)]
pub enum DigitalArea {
    /// Process-image inputs, read only
    #[display("inputs")]
    Inputs,
    /// Process-image outputs, read/write
    #[display("outputs")]
    Outputs,
}

impl DigitalArea {
    /// Channel name prefix (`I` or `Q`).
    pub fn prefix(&self) -> char {
        match self {
            DigitalArea::Inputs => 'I',
            DigitalArea::Outputs => 'Q',
        }
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, DigitalArea::Outputs)
    }

    /// Whether `len` bytes starting at `offset` stay inside the area.
    pub fn contains(&self, offset: u16, len: u16) -> bool {
        len > 0 && offset.checked_add(len).is_some_and(|end| end <= AREA_BYTES)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
#[display("invalid channel name '{name}': {reason}")]
pub struct ChannelParseError {
    pub name: String,
    pub reason: &'static str,
}

/// A single addressable digital channel such as `I0.3` or `Q1.7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel {
    area: DigitalArea,
    byte: u8,
    bit: u8,
}

impl Channel {
    /// Build a channel, checking byte and bit against the area bounds.
    pub fn new(area: DigitalArea, byte: u8, bit: u8) -> Option<Self> {
        if u16::from(byte) < AREA_BYTES && bit < super::bitfield::BITS_PER_BYTE {
            Some(Self { area, byte, bit })
        } else {
            None
        }
    }

    pub fn area(&self) -> DigitalArea {
        self.area
    }

    pub fn byte(&self) -> u8 {
        self.byte
    }

    pub fn bit(&self) -> u8 {
        self.bit
    }

    /// Every channel of `area`, byte-major, bit-minor.
    pub fn all(area: DigitalArea) -> impl Iterator<Item = Channel> {
        (0..AREA_BYTES as u8)
            .flat_map(move |byte| (0..super::bitfield::BITS_PER_BYTE).map(move |bit| (byte, bit)))
            .map(move |(byte, bit)| Channel { area, byte, bit })
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}.{}", self.area.prefix(), self.byte, self.bit)
    }
}

impl FromStr for Channel {
    type Err = ChannelParseError;

    /// Parse `I<byte>.<bit>` / `Q<byte>.<bit>`, case-insensitive prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let err = |reason| ChannelParseError {
            name: name.to_string(),
            reason,
        };

        let mut chars = name.chars();
        let area = match chars.next().map(|c| c.to_ascii_uppercase()) {
            Some('I') => DigitalArea::Inputs,
            Some('Q') => DigitalArea::Outputs,
            _ => return Err(err("expected prefix 'I' or 'Q'")),
        };
        let (byte, bit) = chars
            .as_str()
            .split_once('.')
            .ok_or_else(|| err("expected <byte>.<bit>"))?;
        let byte: u8 = byte.parse().map_err(|_| err("byte index is not a number"))?;
        let bit: u8 = bit.parse().map_err(|_| err("bit index is not a number"))?;

        Channel::new(area, byte, bit).ok_or_else(|| err("byte must be 0..=1 and bit 0..=7"))
    }
}
