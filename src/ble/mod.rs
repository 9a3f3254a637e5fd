//! Bluetooth Low Energy central side.
//!
//! The radio, link layer, and security manager belong to the host stack;
//! the bridge talks to it through [`BleHost`] (requests out) and
//! [`HostEvent`] (completions and link events in). Everything is driven
//! from one event context, so nothing here locks.
//!
//! 1. **Advertisement parsing** ([`adv`]) - picks the target out of scan reports.
//! 2. **Central** ([`central`]) - the per-connection lifecycle state machine.
//! 3. **Queue adapter** ([`queue`]) - a [`BleHost`] that records requests
//!    as commands for a host task to execute.

pub mod adv;
pub mod central;
pub mod queue;

use core::fmt;

use crate::error::HostError;
use crate::gatt::{Discovered, GattClient, Handle};

/// Host-stack connection handle.
pub type ConnHandle = u16;

/// HCI reason "Remote User Terminated Connection".
pub const REMOTE_USER_TERMINATED: u8 = 0x13;

/// Address type as reported in advertising reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressKind {
    Public,
    RandomStatic,
    RandomPrivateResolvable,
    RandomPrivateNonResolvable,
}

/// BLE device address, `bytes` least significant first as on the air.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Address {
    pub kind: AddressKind,
    pub bytes: [u8; 6],
}

impl Address {
    pub const fn new(kind: AddressKind, bytes: [u8; 6]) -> Self {
        Self { kind, bytes }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

/// Scan filter parameters. Interval and window are in 0.625 ms units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanParams {
    pub passive: bool,
    pub filter_duplicates: bool,
    pub interval: u16,
    pub window: u16,
}

/// Requests the central issues to the BLE host stack.
///
/// Every call only initiates the operation; the outcome arrives later as a
/// [`HostEvent`] on the same context.
pub trait BleHost: GattClient {
    fn start_scan(&mut self, params: &ScanParams) -> Result<(), HostError>;
    fn cancel_scan(&mut self) -> Result<(), HostError>;
    fn connect(&mut self, address: &Address, timeout_ms: u32) -> Result<(), HostError>;
    fn initiate_security(&mut self, conn: ConnHandle) -> Result<(), HostError>;
    fn write(&mut self, conn: ConnHandle, handle: Handle, value: &[u8]) -> Result<(), HostError>;
    fn read(&mut self, conn: ConnHandle, handle: Handle) -> Result<(), HostError>;
    fn terminate(&mut self, conn: ConnHandle, reason: u8) -> Result<(), HostError>;
    /// Forgets the stored bond with the peer on `conn`.
    fn delete_bond(&mut self, conn: ConnHandle) -> Result<(), HostError>;
}

/// Events delivered by the host stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostEvent<'a> {
    Advertisement {
        address: Address,
        rssi: i8,
        data: &'a [u8],
    },
    ScanComplete {
        reason: u16,
    },
    LinkEstablished {
        conn: ConnHandle,
        address: Address,
        status: Result<(), HostError>,
    },
    Disconnected {
        conn: ConnHandle,
        reason: u16,
    },
    EncryptionChanged {
        conn: ConnHandle,
        status: Result<(), HostError>,
    },
    MtuChanged {
        conn: ConnHandle,
        mtu: u16,
    },
    Discovery {
        conn: ConnHandle,
        item: Discovered,
    },
    WriteComplete {
        conn: ConnHandle,
        handle: Handle,
        status: Result<(), HostError>,
    },
    ReadComplete {
        conn: ConnHandle,
        handle: Handle,
        value: Result<&'a [u8], HostError>,
    },
    Notification {
        conn: ConnHandle,
        handle: Handle,
        data: &'a [u8],
    },
}
