//! Mouse notifications in, USB HID mouse reports out.
//!
//! BLE payload (HID-over-GATT report, no report ID):
//! ```text
//! Byte 0:   Button bitfield (bit 0 = left, 1 = right, 2 = middle, 3/4 = back/forward)
//! Byte 1:   Upper button bits (ignored)
//! Byte 2-4: 24-bit little-endian field holding two 12-bit signed deltas
//!           bits 0..11 = X, bits 12..23 = Y
//! Byte 5:   Wheel (signed)
//! Byte 6:   Horizontal pan (signed, optional)
//! ```
//!
//! USB report (7 bytes):
//! ```text
//! Byte 0:   Buttons
//! Byte 1-2: X (i16 LE)
//! Byte 3-4: Y (i16 LE)
//! Byte 5:   Wheel (i8)
//! Byte 6:   AC Pan (i8)
//! ```

/// Minimum BLE payload length: buttons, spare, packed deltas, wheel.
pub const MOUSE_BLE_MIN_LEN: usize = 6;

/// USB mouse report size in bytes.
pub const MOUSE_REPORT_SIZE: usize = 7;

const FIELD_MASK: u32 = 0x0FFF;
const SIGN_BIT: u32 = 0x0800;
const SIGN_EXTEND: u32 = 0xFFFF_F000;

/// Motion decoded from the packed 24-bit delta field.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MouseDelta {
    pub x: i16,
    pub y: i16,
}

/// Sign-extends a 12-bit two's-complement field into an `i16`.
///
/// Only the low 12 bits of `raw` are considered.
pub const fn sign_extend_12(raw: u32) -> i16 {
    let mut v = raw & FIELD_MASK;
    if v & SIGN_BIT != 0 {
        v |= SIGN_EXTEND;
    }
    v as i32 as i16
}

/// Unpacks X (low 12 bits) and Y (high 12 bits) from the three bytes of
/// the delta field, least significant byte first.
pub fn unpack_deltas(packed: [u8; 3]) -> MouseDelta {
    let val = u32::from_le_bytes([packed[0], packed[1], packed[2], 0]);
    MouseDelta {
        x: sign_extend_12(val),
        y: sign_extend_12(val >> 12),
    }
}

/// USB HID mouse report with 16-bit relative axes and horizontal pan.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MouseReport {
    pub buttons: u8,
    pub x: i16,
    pub y: i16,
    pub wheel: i8,
    pub pan: i8,
}

impl MouseReport {
    /// Decode a BLE mouse notification. `None` if the payload is too short.
    pub fn from_ble_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < MOUSE_BLE_MIN_LEN {
            return None;
        }
        let delta = unpack_deltas([data[2], data[3], data[4]]);
        Some(Self {
            buttons: data[0],
            x: delta.x,
            y: delta.y,
            wheel: data[5] as i8,
            pan: data.get(6).map_or(0, |&b| b as i8),
        })
    }

    /// Serialise into a byte slice for USB HID transmission.
    /// Returns the number of bytes written, or 0 if `buf` is too small.
    pub fn serialize(&self, buf: &mut [u8]) -> usize {
        if buf.len() < MOUSE_REPORT_SIZE {
            return 0;
        }
        buf[0] = self.buttons;
        buf[1..3].copy_from_slice(&self.x.to_le_bytes());
        buf[3..5].copy_from_slice(&self.y.to_le_bytes());
        buf[5] = self.wheel as u8;
        buf[6] = self.pan as u8;
        MOUSE_REPORT_SIZE
    }

    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// USB HID Report Descriptor: 5 buttons, 16-bit X/Y, wheel, AC Pan.
pub const MOUSE_REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x02, // Usage (Mouse)
    0xA1, 0x01, // Collection (Application)
    0x09, 0x01, //   Usage (Pointer)
    0xA1, 0x00, //   Collection (Physical)
    //
    //   - Buttons (5 bits + 3 padding) -
    0x05, 0x09, //     Usage Page (Buttons)
    0x19, 0x01, //     Usage Minimum (Button 1)
    0x29, 0x05, //     Usage Maximum (Button 5)
    0x15, 0x00, //     Logical Minimum (0)
    0x25, 0x01, //     Logical Maximum (1)
    0x95, 0x05, //     Report Count (5)
    0x75, 0x01, //     Report Size (1)
    0x81, 0x02, //     Input (Data, Variable, Absolute)
    0x95, 0x01, //     Report Count (1)
    0x75, 0x03, //     Report Size (3)
    0x81, 0x01, //     Input (Constant)
    //
    //   - X, Y (16-bit) -
    0x05, 0x01, //     Usage Page (Generic Desktop)
    0x09, 0x30, //     Usage (X)
    0x09, 0x31, //     Usage (Y)
    0x16, 0x01, 0x80, // Logical Minimum (-32767)
    0x26, 0xFF, 0x7F, // Logical Maximum (32767)
    0x75, 0x10, //     Report Size (16)
    0x95, 0x02, //     Report Count (2)
    0x81, 0x06, //     Input (Data, Variable, Relative)
    //
    //   - Wheel -
    0x09, 0x38, //     Usage (Wheel)
    0x15, 0x81, //     Logical Minimum (-127)
    0x25, 0x7F, //     Logical Maximum (127)
    0x75, 0x08, //     Report Size (8)
    0x95, 0x01, //     Report Count (1)
    0x81, 0x06, //     Input (Data, Variable, Relative)
    //
    //   - Horizontal pan -
    0x05, 0x0C, //     Usage Page (Consumer)
    0x0A, 0x38, 0x02, // Usage (AC Pan)
    0x15, 0x81, //     Logical Minimum (-127)
    0x25, 0x7F, //     Logical Maximum (127)
    0x75, 0x08, //     Report Size (8)
    0x95, 0x01, //     Report Count (1)
    0x81, 0x06, //     Input (Data, Variable, Relative)
    //
    0xC0, //   End Collection (Physical)
    0xC0, // End Collection (Application)
];
