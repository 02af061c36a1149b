//! Bit-level access to process-image bytes.
//!
//! Bits are numbered LSB first: bit 0 of a byte is `0b0000_0001`, bit 7 is
//! `0b1000_0000`. Callers validate the bit index through [`Channel`] before
//! reaching these helpers; out-of-range indices are masked to `0..=7`.
//!
//! [`Channel`]: super::channel::Channel

/// Number of addressable bits in one process-image byte.
pub const BITS_PER_BYTE: u8 = 8;

/// Mask selecting `bit` inside a byte.
#[inline]
pub fn bit_mask(bit: u8) -> u8 {
    1u8 << (bit & 0x07)
}

/// Read one bit of `byte`.
#[inline]
pub fn decode(byte: u8, bit: u8) -> bool {
    byte & bit_mask(bit) != 0
}

/// Return `byte` with `bit` forced to `value`; the other seven bits are kept.
#[inline]
pub fn encode(byte: u8, bit: u8, value: bool) -> u8 {
    if value {
        byte | bit_mask(bit)
    } else {
        byte & !bit_mask(bit)
    }
}

/// Return `byte` with `bit` inverted.
#[inline]
pub fn toggle(byte: u8, bit: u8) -> u8 {
    byte ^ bit_mask(bit)
}

/// Read the bit at `(byte_index, bit)` of a byte array.
pub fn read_bit(bytes: &[u8], byte_index: usize, bit: u8) -> Option<bool> {
    bytes.get(byte_index).map(|b| decode(*b, bit))
}

/// Write the bit at `(byte_index, bit)` of a byte array in place.
/// Returns `false` when the index is outside the slice.
pub fn write_bit(bytes: &mut [u8], byte_index: usize, bit: u8, value: bool) -> bool {
    match bytes.get_mut(byte_index) {
        Some(b) => {
            *b = encode(*b, bit, value);
            true
        }
        None => false,
    }
}

/// Expand bytes into individual bits, byte by byte, LSB first.
pub fn unpack(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|b| (0..BITS_PER_BYTE).map(move |bit| decode(*b, bit)))
        .collect()
}
