//! Application-wide constants and runtime configuration.
//!
//! Compile-time defaults live at the top so they can be tuned in one
//! place; [`Config`] carries the knobs a deployment may want to change
//! without rebuilding the core.

use crate::ble::adv::AdvFields;
use crate::ble::{Address, ScanParams};
use crate::gatt::{CacheLimits, Handle};
use crate::hid::ReportKind;

// Attribute cache pools

/// Simultaneous peripheral connections.
pub const MAX_PEERS: usize = 2;
/// Service slots shared by all peers.
pub const MAX_SERVICES: usize = 64;
/// Characteristic slots shared by all peers.
pub const MAX_CHARACTERISTICS: usize = 64;
/// Descriptor slots shared by all peers.
pub const MAX_DESCRIPTORS: usize = 64;

// BLE

/// Scan interval and window (in 0.625 ms units). Equal values = continuous scan.
pub const BLE_SCAN_INTERVAL: u16 = 10;
pub const BLE_SCAN_WINDOW: u16 = 10;

/// Passive, duplicate-filtered scan.
pub const BLE_SCAN_PARAMS: ScanParams = ScanParams {
    passive: true,
    filter_duplicates: true,
    interval: BLE_SCAN_INTERVAL,
    window: BLE_SCAN_WINDOW,
};

/// Connection attempt timeout (ms).
pub const BLE_CONNECT_TIMEOUT_MS: u32 = 30_000;

/// Local name the dongle pairs with out of the box.
pub const TARGET_NAME: &str = "MX Master 3 Mac";

/// Known attribute handles on the MX Master 3 (firmware-specific).
/// Value handle 0x2F carries the thumb buttons as keyboard reports,
/// 0x33 carries pointer motion.
pub const KEYBOARD_VALUE_HANDLE: Handle = 0x002F;
pub const KEYBOARD_CCCD_HANDLE: Handle = 0x0030;
pub const MOUSE_VALUE_HANDLE: Handle = 0x0033;
pub const MOUSE_CCCD_HANDLE: Handle = 0x0034;

/// CCCD value enabling notifications.
pub const CCCD_NOTIFY: [u8; 2] = [0x01, 0x00];

/// Report bindings tracked per connection.
pub const MAX_BINDINGS: usize = 4;

/// Lifecycle transitions kept for diagnostics.
pub const HISTORY_DEPTH: usize = 16;

// USB

/// USB VID/PID - use the "pid.codes" open-source test VID.
/// Replace with your own allocated VID/PID for production.
pub const USB_VID: u16 = 0x1209;
pub const USB_PID: u16 = 0x0001;

/// USB device strings.
pub const USB_MANUFACTURER: &str = "hogp2usb";
pub const USB_PRODUCT: &str = "BLE HID to USB Bridge";
pub const USB_SERIAL_NUMBER: &str = "000001";

/// USB HID polling interval (ms). 1 ms = 1000 Hz for lowest latency.
pub const USB_HID_POLL_MS: u8 = 1;

/// Reports buffered between the BLE context and the USB writer.
pub const REPORT_QUEUE_DEPTH: usize = 16;

// Runtime configuration

/// Which advertiser to connect to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Target {
    /// Exact local name (complete or shortened).
    Name(&'static str),
    Address(Address),
    /// Anything advertising the HID service UUID.
    HidService,
}

impl Target {
    pub fn matches(&self, address: &Address, fields: &AdvFields) -> bool {
        match self {
            Target::Name(name) => fields.name() == Some(*name),
            Target::Address(a) => a == address,
            Target::HidService => fields.advertises_uuid16(0x1812),
        }
    }
}

/// How a report characteristic is found after discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Locator {
    /// The `occurrence`-th notifiable HID Report characteristic (0-based,
    /// ascending handle order) and its CCCD.
    ByUuid { occurrence: u8 },
    /// Known handles, checked against the cache before use.
    FixedHandles { value: Handle, cccd: Handle },
    /// `ByUuid` first; the known handles only if no such report exists.
    ByUuidOr { occurrence: u8, value: Handle, cccd: Handle },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReportBinding {
    pub kind: ReportKind,
    pub locator: Locator,
}

/// What to do when a bonded peer asks to pair again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BondConflictPolicy {
    /// Delete the stale bond and let pairing continue.
    #[default]
    DiscardAndRetry,
    /// Keep the old bond and refuse the new pairing.
    Reject,
}

/// Subscriptions of the stock dongle: keyboard first, then the mouse.
/// Reports are looked up by UUID; the MX Master 3 handles are the fallback.
pub const DEFAULT_SUBSCRIPTIONS: &[ReportBinding] = &[
    ReportBinding {
        kind: ReportKind::Keyboard,
        locator: Locator::ByUuidOr {
            occurrence: 0,
            value: KEYBOARD_VALUE_HANDLE,
            cccd: KEYBOARD_CCCD_HANDLE,
        },
    },
    ReportBinding {
        kind: ReportKind::Mouse,
        locator: Locator::ByUuidOr {
            occurrence: 1,
            value: MOUSE_VALUE_HANDLE,
            cccd: MOUSE_CCCD_HANDLE,
        },
    },
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub target: Target,
    pub scan: ScanParams,
    pub connect_timeout_ms: u32,
    /// Simultaneous links; clamped to the cache's peer capacity.
    pub max_links: usize,
    /// Written in order once discovery completes.
    pub subscriptions: &'static [ReportBinding],
    pub bond_conflict: BondConflictPolicy,
    /// Read the Battery Level once streaming starts.
    pub read_battery: bool,
    /// Attribute cache pool maximums, clamped to the compiled capacities.
    pub limits: CacheLimits,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            target: Target::Name(TARGET_NAME),
            scan: BLE_SCAN_PARAMS,
            connect_timeout_ms: BLE_CONNECT_TIMEOUT_MS,
            max_links: 1,
            subscriptions: DEFAULT_SUBSCRIPTIONS,
            bond_conflict: BondConflictPolicy::DiscardAndRetry,
            read_battery: false,
            limits: CacheLimits::FULL,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
