//! HID report types and the BLE notification → USB report translator.

pub mod keyboard;
pub mod mouse;
pub mod translator;


pub use keyboard::KeyboardReport;
pub use mouse::{MouseDelta, MouseReport};
pub use translator::ReportRouter;

/// Which USB report a subscribed characteristic feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReportKind {
    Keyboard,
    Mouse,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HidReport {
    Keyboard(KeyboardReport),
    Mouse(MouseReport),
}

impl HidReport {
    /// Decode a notification payload as the given report kind.
    pub fn decode(kind: ReportKind, payload: &[u8]) -> Option<Self> {
        match kind {
            ReportKind::Keyboard => KeyboardReport::from_ble_bytes(payload).map(HidReport::Keyboard),
            ReportKind::Mouse => MouseReport::from_ble_bytes(payload).map(HidReport::Mouse),
        }
    }

    pub fn kind(&self) -> ReportKind {
        match self {
            HidReport::Keyboard(_) => ReportKind::Keyboard,
            HidReport::Mouse(_) => ReportKind::Mouse,
        }
    }

    /// Serialise into the USB wire layout. Returns bytes written, 0 if
    /// `buf` is too small.
    pub fn serialize(&self, buf: &mut [u8]) -> usize {
        match self {
            HidReport::Keyboard(kb) => kb.serialize(buf),
            HidReport::Mouse(m) => m.serialize(buf),
        }
    }
}
