//! Shared fakes for the integration tests.

#![allow(dead_code)]

use hogp2usb::ble::queue::HostCommand;
use hogp2usb::ble::{Address, AddressKind, BleHost, ConnHandle, HostEvent, ScanParams};
use hogp2usb::error::{Error, HostError};
use hogp2usb::gatt::uuid::{BATTERY_LEVEL, BATTERY_SERVICE, CCCD, HID_REPORT, HID_SERVICE};
use hogp2usb::gatt::{
    CharProps, CharacteristicDef, DescriptorDef, Discovered, GattClient, Handle, HandleRange,
    ServiceDef,
};
use hogp2usb::hid::{KeyboardReport, MouseReport};
use hogp2usb::usb::UsbHid;
use hogp2usb::{Central, Config};

pub const MOUSE_ADDR: Address = Address::new(AddressKind::RandomStatic, [0x11, 0x22, 0x33, 0x44, 0x55, 0xC6]);

/// Records every request as the command a real host task would receive.
#[derive(Default)]
pub struct MockHost {
    pub commands: Vec<HostCommand>,
    pub refuse_discovery: bool,
}

impl MockHost {
    pub fn writes(&self) -> Vec<Handle> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                HostCommand::Write { handle, .. } => Some(*handle),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&HostCommand) -> bool) -> usize {
        self.commands.iter().filter(|c| pred(c)).count()
    }
}

impl GattClient for MockHost {
    fn discover_all_services(&mut self, conn: ConnHandle) -> Result<(), HostError> {
        if self.refuse_discovery {
            return Err(HostError::BUSY);
        }
        self.commands.push(HostCommand::DiscoverServices(conn));
        Ok(())
    }

    fn discover_characteristics(&mut self, conn: ConnHandle, range: HandleRange) -> Result<(), HostError> {
        self.commands.push(HostCommand::DiscoverCharacteristics { conn, range });
        Ok(())
    }

    fn discover_descriptors(&mut self, conn: ConnHandle, range: HandleRange) -> Result<(), HostError> {
        self.commands.push(HostCommand::DiscoverDescriptors { conn, range });
        Ok(())
    }
}

impl BleHost for MockHost {
    fn start_scan(&mut self, params: &ScanParams) -> Result<(), HostError> {
        self.commands.push(HostCommand::StartScan(*params));
        Ok(())
    }

    fn cancel_scan(&mut self) -> Result<(), HostError> {
        self.commands.push(HostCommand::CancelScan);
        Ok(())
    }

    fn connect(&mut self, address: &Address, timeout_ms: u32) -> Result<(), HostError> {
        self.commands.push(HostCommand::Connect {
            address: *address,
            timeout_ms,
        });
        Ok(())
    }

    fn initiate_security(&mut self, conn: ConnHandle) -> Result<(), HostError> {
        self.commands.push(HostCommand::InitiateSecurity(conn));
        Ok(())
    }

    fn write(&mut self, conn: ConnHandle, handle: Handle, value: &[u8]) -> Result<(), HostError> {
        let value = heapless::Vec::from_slice(value).map_err(|_| HostError::INVALID_LENGTH)?;
        self.commands.push(HostCommand::Write { conn, handle, value });
        Ok(())
    }

    fn read(&mut self, conn: ConnHandle, handle: Handle) -> Result<(), HostError> {
        self.commands.push(HostCommand::Read { conn, handle });
        Ok(())
    }

    fn terminate(&mut self, conn: ConnHandle, reason: u8) -> Result<(), HostError> {
        self.commands.push(HostCommand::Terminate { conn, reason });
        Ok(())
    }

    fn delete_bond(&mut self, conn: ConnHandle) -> Result<(), HostError> {
        self.commands.push(HostCommand::DeleteBond(conn));
        Ok(())
    }
}

/// USB sink whose readiness the test controls.
pub struct MockUsb {
    pub ready: bool,
    pub mice: Vec<MouseReport>,
    pub keys: Vec<KeyboardReport>,
}

impl Default for MockUsb {
    fn default() -> Self {
        Self {
            ready: true,
            mice: Vec::new(),
            keys: Vec::new(),
        }
    }
}

impl UsbHid for MockUsb {
    fn ready(&self) -> bool {
        self.ready
    }

    fn submit_mouse(&mut self, report: &MouseReport) -> Result<(), Error> {
        self.mice.push(*report);
        Ok(())
    }

    fn submit_keyboard(&mut self, report: &KeyboardReport) -> Result<(), Error> {
        self.keys.push(*report);
        Ok(())
    }
}

pub type Bridge = Central<MockHost, MockUsb, 2, 16, 16, 16>;

pub fn bridge(config: Config) -> Bridge {
    let mut b = Bridge::new(MockHost::default(), MockUsb::default(), config);
    b.start().expect("scan start");
    b
}

/// Flags + complete local name.
pub fn named_adv(name: &str) -> Vec<u8> {
    let mut adv = vec![0x02, 0x01, 0x06, name.len() as u8 + 1, 0x09];
    adv.extend_from_slice(name.as_bytes());
    adv
}

/// GATT database of the stock mouse: Battery service, then HID with a
/// keyboard report at 0x2F and a mouse report at 0x33.
pub fn mouse_database() -> Vec<Discovered> {
    let notify = CharProps::READ | CharProps::NOTIFY;
    vec![
        Discovered::Service(ServiceDef {
            range: HandleRange::new(0x10, 0x13),
            uuid: BATTERY_SERVICE,
        }),
        Discovered::Service(ServiceDef {
            range: HandleRange::new(0x28, 0x36),
            uuid: HID_SERVICE,
        }),
        Discovered::Done(Ok(())),
        // Battery characteristics
        Discovered::Characteristic(CharacteristicDef {
            decl_handle: 0x11,
            value_handle: 0x12,
            properties: notify,
            uuid: BATTERY_LEVEL,
        }),
        Discovered::Done(Ok(())),
        // HID characteristics
        Discovered::Characteristic(CharacteristicDef {
            decl_handle: 0x2E,
            value_handle: 0x2F,
            properties: notify,
            uuid: HID_REPORT,
        }),
        Discovered::Characteristic(CharacteristicDef {
            decl_handle: 0x32,
            value_handle: 0x33,
            properties: notify,
            uuid: HID_REPORT,
        }),
        Discovered::Done(Ok(())),
        // Battery level descriptors (0x13)
        Discovered::Descriptor(DescriptorDef {
            handle: 0x13,
            uuid: CCCD,
        }),
        Discovered::Done(Ok(())),
        // Keyboard report descriptors (0x30..=0x31)
        Discovered::Descriptor(DescriptorDef {
            handle: 0x30,
            uuid: CCCD,
        }),
        Discovered::Done(Ok(())),
        // Mouse report descriptors (0x34..=0x36)
        Discovered::Descriptor(DescriptorDef {
            handle: 0x34,
            uuid: CCCD,
        }),
        Discovered::Done(Ok(())),
    ]
}

/// Advertisement through security for `conn`.
pub fn connect(b: &mut Bridge, conn: ConnHandle) {
    connect_peer(b, conn, MOUSE_ADDR);
}

pub fn connect_peer<const P: usize, const S: usize, const C: usize, const D: usize>(
    b: &mut Central<MockHost, MockUsb, P, S, C, D>,
    conn: ConnHandle,
    address: Address,
) {
    b.handle(HostEvent::Advertisement {
        address,
        rssi: -52,
        data: &named_adv("MX Master 3 Mac"),
    });
    b.handle(HostEvent::LinkEstablished {
        conn,
        address,
        status: Ok(()),
    });
    b.handle(HostEvent::EncryptionChanged { conn, status: Ok(()) });
}

/// Runs discovery with [`mouse_database`] and acknowledges every CCCD write.
pub fn bring_up(b: &mut Bridge, conn: ConnHandle) {
    bring_up_peer(b, conn, MOUSE_ADDR);
}

pub fn bring_up_peer<const P: usize, const S: usize, const C: usize, const D: usize>(
    b: &mut Central<MockHost, MockUsb, P, S, C, D>,
    conn: ConnHandle,
    address: Address,
) {
    connect_peer(b, conn, address);
    for item in mouse_database() {
        b.handle(HostEvent::Discovery { conn, item });
    }
    ack_writes(b, conn);
}

/// Acknowledges CCCD writes until no new one is issued.
pub fn ack_writes<const P: usize, const S: usize, const C: usize, const D: usize>(
    b: &mut Central<MockHost, MockUsb, P, S, C, D>,
    conn: ConnHandle,
) {
    let mut acked = Vec::new();
    while let Some(HostCommand::Write { handle, .. }) = b.host().commands.last().cloned() {
        if acked.contains(&handle) {
            break;
        }
        acked.push(handle);
        b.handle(HostEvent::WriteComplete {
            conn,
            handle,
            status: Ok(()),
        });
    }
}
