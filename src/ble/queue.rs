//! Command/event queues between the central and a BLE host task.
//!
//! [`QueuedHost`] implements [`BleHost`] by recording each request as a
//! [`HostCommand`]; the task owning the real host stack drains and executes
//! them. Events travel the other way as [`QueuedEvent`], an owned copy of
//! [`HostEvent`] that can sit in a channel.
//!
//! With the `embedded` feature, [`run_central`] pumps both directions over
//! `embassy-sync` channels.

use heapless::{Deque, Vec};

use super::{Address, BleHost, ConnHandle, HostEvent, ScanParams};
use crate::error::{Error, HostError};
use crate::gatt::{Discovered, GattClient, Handle, HandleRange};

/// Longest legacy advertising payload.
pub const MAX_ADV_LEN: usize = 31;
/// Longest attribute value carried in a write, read, or notification.
pub const MAX_VALUE_LEN: usize = 64;

/// One request for the host stack.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostCommand {
    StartScan(ScanParams),
    CancelScan,
    Connect { address: Address, timeout_ms: u32 },
    InitiateSecurity(ConnHandle),
    DiscoverServices(ConnHandle),
    DiscoverCharacteristics { conn: ConnHandle, range: HandleRange },
    DiscoverDescriptors { conn: ConnHandle, range: HandleRange },
    Write {
        conn: ConnHandle,
        handle: Handle,
        value: Vec<u8, MAX_VALUE_LEN>,
    },
    Read { conn: ConnHandle, handle: Handle },
    Terminate { conn: ConnHandle, reason: u8 },
    DeleteBond(ConnHandle),
}

/// [`BleHost`] that queues up to `N` commands. A full queue answers
/// [`HostError::BUSY`].
pub struct QueuedHost<const N: usize> {
    queue: Deque<HostCommand, N>,
}

impl<const N: usize> Default for QueuedHost<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> QueuedHost<N> {
    pub const fn new() -> Self {
        Self { queue: Deque::new() }
    }

    /// Oldest pending command.
    pub fn pop(&mut self) -> Option<HostCommand> {
        self.queue.pop_front()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    fn push(&mut self, cmd: HostCommand) -> Result<(), HostError> {
        self.queue.push_back(cmd).map_err(|_| HostError::BUSY)
    }
}

impl<const N: usize> GattClient for QueuedHost<N> {
    fn discover_all_services(&mut self, conn: ConnHandle) -> Result<(), HostError> {
        self.push(HostCommand::DiscoverServices(conn))
    }

    fn discover_characteristics(&mut self, conn: ConnHandle, range: HandleRange) -> Result<(), HostError> {
        self.push(HostCommand::DiscoverCharacteristics { conn, range })
    }

    fn discover_descriptors(&mut self, conn: ConnHandle, range: HandleRange) -> Result<(), HostError> {
        self.push(HostCommand::DiscoverDescriptors { conn, range })
    }
}

impl<const N: usize> BleHost for QueuedHost<N> {
    fn start_scan(&mut self, params: &ScanParams) -> Result<(), HostError> {
        self.push(HostCommand::StartScan(*params))
    }

    fn cancel_scan(&mut self) -> Result<(), HostError> {
        self.push(HostCommand::CancelScan)
    }

    fn connect(&mut self, address: &Address, timeout_ms: u32) -> Result<(), HostError> {
        self.push(HostCommand::Connect {
            address: *address,
            timeout_ms,
        })
    }

    fn initiate_security(&mut self, conn: ConnHandle) -> Result<(), HostError> {
        self.push(HostCommand::InitiateSecurity(conn))
    }

    fn write(&mut self, conn: ConnHandle, handle: Handle, value: &[u8]) -> Result<(), HostError> {
        let value = Vec::from_slice(value).map_err(|_| HostError::INVALID_LENGTH)?;
        self.push(HostCommand::Write { conn, handle, value })
    }

    fn read(&mut self, conn: ConnHandle, handle: Handle) -> Result<(), HostError> {
        self.push(HostCommand::Read { conn, handle })
    }

    fn terminate(&mut self, conn: ConnHandle, reason: u8) -> Result<(), HostError> {
        self.push(HostCommand::Terminate { conn, reason })
    }

    fn delete_bond(&mut self, conn: ConnHandle) -> Result<(), HostError> {
        self.push(HostCommand::DeleteBond(conn))
    }
}

/// Owned form of [`HostEvent`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueuedEvent {
    Advertisement {
        address: Address,
        rssi: i8,
        data: Vec<u8, MAX_ADV_LEN>,
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
        value: Result<Vec<u8, MAX_VALUE_LEN>, HostError>,
    },
    Notification {
        conn: ConnHandle,
        handle: Handle,
        data: Vec<u8, MAX_VALUE_LEN>,
    },
}

impl QueuedEvent {
    /// Copies `event`. Payloads longer than the queue slots are rejected
    /// with [`Error::ResourceExhausted`].
    pub fn from_event(event: &HostEvent<'_>) -> Result<Self, Error> {
        fn copy<const N: usize>(data: &[u8]) -> Result<Vec<u8, N>, Error> {
            Vec::from_slice(data).map_err(|_| Error::ResourceExhausted)
        }

        Ok(match *event {
            HostEvent::Advertisement { address, rssi, data } => QueuedEvent::Advertisement {
                address,
                rssi,
                data: copy(data)?,
            },
            HostEvent::ScanComplete { reason } => QueuedEvent::ScanComplete { reason },
            HostEvent::LinkEstablished {
                conn,
                address,
                status,
            } => QueuedEvent::LinkEstablished {
                conn,
                address,
                status,
            },
            HostEvent::Disconnected { conn, reason } => QueuedEvent::Disconnected { conn, reason },
            HostEvent::EncryptionChanged { conn, status } => {
                QueuedEvent::EncryptionChanged { conn, status }
            }
            HostEvent::MtuChanged { conn, mtu } => QueuedEvent::MtuChanged { conn, mtu },
            HostEvent::Discovery { conn, item } => QueuedEvent::Discovery { conn, item },
            HostEvent::WriteComplete {
                conn,
                handle,
                status,
            } => QueuedEvent::WriteComplete {
                conn,
                handle,
                status,
            },
            HostEvent::ReadComplete {
                conn,
                handle,
                value,
            } => QueuedEvent::ReadComplete {
                conn,
                handle,
                value: match value {
                    Ok(v) => Ok(copy(v)?),
                    Err(e) => Err(e),
                },
            },
            HostEvent::Notification { conn, handle, data } => QueuedEvent::Notification {
                conn,
                handle,
                data: copy(data)?,
            },
        })
    }

    /// Borrowed view for [`Central::handle`](super::central::Central::handle).
    pub fn as_event(&self) -> HostEvent<'_> {
        match self {
            QueuedEvent::Advertisement { address, rssi, data } => HostEvent::Advertisement {
                address: *address,
                rssi: *rssi,
                data,
            },
            QueuedEvent::ScanComplete { reason } => HostEvent::ScanComplete { reason: *reason },
            QueuedEvent::LinkEstablished {
                conn,
                address,
                status,
            } => HostEvent::LinkEstablished {
                conn: *conn,
                address: *address,
                status: *status,
            },
            QueuedEvent::Disconnected { conn, reason } => HostEvent::Disconnected {
                conn: *conn,
                reason: *reason,
            },
            QueuedEvent::EncryptionChanged { conn, status } => HostEvent::EncryptionChanged {
                conn: *conn,
                status: *status,
            },
            QueuedEvent::MtuChanged { conn, mtu } => HostEvent::MtuChanged {
                conn: *conn,
                mtu: *mtu,
            },
            QueuedEvent::Discovery { conn, item } => HostEvent::Discovery {
                conn: *conn,
                item: *item,
            },
            QueuedEvent::WriteComplete {
                conn,
                handle,
                status,
            } => HostEvent::WriteComplete {
                conn: *conn,
                handle: *handle,
                status: *status,
            },
            QueuedEvent::ReadComplete {
                conn,
                handle,
                value,
            } => HostEvent::ReadComplete {
                conn: *conn,
                handle: *handle,
                value: value.as_deref().map_err(|e| *e),
            },
            QueuedEvent::Notification { conn, handle, data } => HostEvent::Notification {
                conn: *conn,
                handle: *handle,
                data,
            },
        }
    }
}

#[cfg(feature = "embedded")]
pub use pump::run_central;

#[cfg(feature = "embedded")]
mod pump {
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embassy_sync::channel::{Receiver, Sender};

    use super::{HostCommand, QueuedEvent, QueuedHost};
    use crate::ble::central::Central;
    use crate::usb::UsbHid;

    /// Runs the central forever: applies each incoming host event, then
    /// forwards the commands it produced to the host task.
    pub async fn run_central<
        U: UsbHid,
        const Q: usize,
        const E: usize,
        const K: usize,
        const P: usize,
        const S: usize,
        const C: usize,
        const D: usize,
    >(
        central: &mut Central<QueuedHost<Q>, U, P, S, C, D>,
        events: Receiver<'_, CriticalSectionRawMutex, QueuedEvent, E>,
        commands: Sender<'_, CriticalSectionRawMutex, HostCommand, K>,
    ) -> ! {
        if let Err(e) = central.start() {
            error!("central: initial scan failed: {}", e);
        }
        loop {
            while let Some(cmd) = central.host_mut().pop() {
                commands.send(cmd).await;
            }
            let event = events.receive().await;
            central.handle(event.as_event());
        }
    }
}
