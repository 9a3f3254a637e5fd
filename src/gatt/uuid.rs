//! 16-, 32-, or 128-bit Bluetooth UUIDs.
//!
//! All forms are stored expanded to 128 bits over the Bluetooth Base UUID,
//! so a 16-bit UUID discovered on one peer compares equal to the same UUID
//! delivered in 128-bit form by another.

use core::fmt;

const SHIFT: u32 = u128::BITS - u32::BITS;
const BASE: u128 = 0x00000000_0000_1000_8000_00805F9B34FB;
const MASK_16: u128 = !((u16::MAX as u128) << SHIFT);
const MASK_32: u128 = !((u32::MAX as u128) << SHIFT);

/// HID-over-GATT service.
pub const HID_SERVICE: Uuid = Uuid::from_u16(0x1812);
/// HID Report characteristic.
pub const HID_REPORT: Uuid = Uuid::from_u16(0x2A4D);
/// Client Characteristic Configuration descriptor.
pub const CCCD: Uuid = Uuid::from_u16(0x2902);
/// Battery service.
pub const BATTERY_SERVICE: Uuid = Uuid::from_u16(0x180F);
/// Battery Level characteristic.
pub const BATTERY_LEVEL: Uuid = Uuid::from_u16(0x2A19);

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Uuid(u128);

impl Uuid {
    /// Assigned 16-bit SIG UUID.
    pub const fn from_u16(v: u16) -> Self {
        Self(BASE | (v as u128) << SHIFT)
    }

    pub const fn from_u32(v: u32) -> Self {
        Self(BASE | (v as u128) << SHIFT)
    }

    pub const fn from_u128(v: u128) -> Self {
        Self(v)
    }

    /// Parses the little-endian wire form (2, 4, or 16 bytes).
    pub fn from_le_bytes(b: &[u8]) -> Option<Self> {
        match b.len() {
            2 => Some(Self::from_u16(u16::from_le_bytes([b[0], b[1]]))),
            4 => Some(Self::from_u32(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))),
            16 => {
                let mut raw = [0u8; 16];
                raw.copy_from_slice(b);
                Some(Self(u128::from_le_bytes(raw)))
            }
            _ => None,
        }
    }

    /// Returns the 16-bit alias, if this is an assigned 16-bit UUID.
    pub fn as_u16(self) -> Option<u16> {
        let v = (self.0 >> SHIFT) as u16;
        (self.0 & MASK_16 == BASE).then_some(v)
    }

    /// Returns the 32-bit alias, if this UUID lives on the Base UUID.
    pub fn as_u32(self) -> Option<u32> {
        (self.0 & MASK_32 == BASE).then_some((self.0 >> SHIFT) as u32)
    }

    pub const fn as_u128(self) -> u128 {
        self.0
    }
}

impl From<u16> for Uuid {
    fn from(v: u16) -> Self {
        Self::from_u16(v)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(v) = self.as_u16() {
            return write!(f, "{:#06X}", v);
        }
        let v = self.0;
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:04X}-{:012X}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xFFFF_FFFF_FFFF
        )
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uuid({})", self)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Uuid {
    fn format(&self, f: defmt::Formatter) {
        match self.as_u16() {
            Some(v) => defmt::write!(f, "{=u16:#x}", v),
            None => defmt::write!(f, "{=u128:#x}", self.0),
        }
    }
}
