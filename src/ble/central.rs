//! Connection lifecycle: scan → connect → secure → discover → subscribe →
//! stream, and back to scanning when a link goes away.
//!
//! [`Central`] owns the attribute cache, the per-link report routes, and the two
//! collaborators. Feed it every [`HostEvent`] through [`Central::handle`];
//! it issues the follow-up requests itself.
//!
//! Any discovery, subscription, or security failure terminates the link
//! and the slot is released once the host reports the disconnect.

use heapless::{HistoryBuffer, Vec};

use super::adv::AdvFields;
use super::{Address, BleHost, ConnHandle, HostEvent, REMOTE_USER_TERMINATED};
use crate::config::{self, BondConflictPolicy, Config, Locator, ReportBinding};
use crate::error::{CacheError, Error, HostError};
use crate::gatt::uuid::{BATTERY_LEVEL, BATTERY_SERVICE, CCCD, HID_REPORT, HID_SERVICE};
use crate::gatt::{discovery, AttributeCache, CharProps, Discovered, Handle};
use crate::hid::ReportRouter;
use crate::usb::{Delivery, UsbHid};

/// Lifecycle state. `Scanning` and `Connecting` describe the radio before
/// a connection handle exists; the rest are per link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    Scanning,
    Connecting,
    LinkEstablished,
    Securing,
    Encrypted,
    Discovering,
    Subscribing,
    Streaming,
    Terminated,
}

/// What the radio is doing on behalf of the central.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanState {
    Idle,
    Scanning,
    Connecting,
}

/// One entry in the transition history. `conn` is `None` for radio-level
/// states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transition {
    pub conn: Option<ConnHandle>,
    pub state: LinkState,
}

/// Answer to a repeat-pairing request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RepeatPairingAction {
    /// The stale bond is gone; let pairing run again.
    Retry,
    /// Keep the existing bond and drop the request.
    Ignore,
}

struct Link {
    conn: ConnHandle,
    address: Address,
    state: LinkState,
    /// Index into `Config::subscriptions` of the next binding to write.
    next_binding: usize,
    /// CCCD whose write is in flight.
    pending_write: Option<Handle>,
    /// Battery Level value handle whose read is in flight.
    battery_read: Option<Handle>,
    battery_level: Option<u8>,
    /// Subscribed value handles and the report each one feeds.
    routes: ReportRouter<{ config::MAX_BINDINGS }>,
}

pub struct Central<
    H,
    U,
    const P: usize = { config::MAX_PEERS },
    const S: usize = { config::MAX_SERVICES },
    const C: usize = { config::MAX_CHARACTERISTICS },
    const D: usize = { config::MAX_DESCRIPTORS },
> {
    host: H,
    usb: U,
    config: Config,
    cache: AttributeCache<P, S, C, D>,
    links: Vec<Link, P>,
    scan: ScanState,
    history: HistoryBuffer<Transition, { config::HISTORY_DEPTH }>,
    last_error: Option<Error>,
}

impl<H, U, const P: usize, const S: usize, const C: usize, const D: usize> Central<H, U, P, S, C, D>
where
    H: BleHost,
    U: UsbHid,
{
    pub fn new(host: H, usb: U, config: Config) -> Self {
        Self {
            host,
            usb,
            config,
            cache: AttributeCache::with_limits(config.limits),
            links: Vec::new(),
            scan: ScanState::Idle,
            history: HistoryBuffer::new(),
            last_error: None,
        }
    }

    /// Starts scanning for the configured target. Does nothing while the
    /// radio is busy or every allowed link is in use.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.scan != ScanState::Idle || self.links.len() >= self.max_links() {
            return Ok(());
        }
        self.host
            .start_scan(&self.config.scan)
            .map_err(Error::LinkFailed)?;
        self.scan = ScanState::Scanning;
        self.record(None, LinkState::Scanning);
        Ok(())
    }

    fn max_links(&self) -> usize {
        self.config.max_links.min(P)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════

    pub fn scan_state(&self) -> ScanState {
        self.scan
    }

    pub fn link_state(&self, conn: ConnHandle) -> Option<LinkState> {
        self.link(conn).map(|l| l.state)
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn peer_address(&self, conn: ConnHandle) -> Option<Address> {
        self.link(conn).map(|l| l.address)
    }

    /// Last Battery Level read from `conn`, in percent.
    pub fn battery_level(&self, conn: ConnHandle) -> Option<u8> {
        self.link(conn).and_then(|l| l.battery_level)
    }

    /// Recent transitions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = Transition> + '_ {
        self.history.oldest_ordered().copied()
    }

    /// The error that ended the most recent link, if any.
    pub fn last_error(&self) -> Option<Error> {
        self.last_error
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &AttributeCache<P, S, C, D> {
        &self.cache
    }

    /// Report routes of `conn`, if it is a tracked link.
    pub fn routes(&self, conn: ConnHandle) -> Option<&ReportRouter<{ config::MAX_BINDINGS }>> {
        self.link(conn).map(|l| &l.routes)
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn usb(&self) -> &U {
        &self.usb
    }

    pub fn usb_mut(&mut self) -> &mut U {
        &mut self.usb
    }

    // ═══════════════════════════════════════════════════════════════════
    // Event dispatch
    // ═══════════════════════════════════════════════════════════════════

    pub fn handle(&mut self, event: HostEvent<'_>) {
        match event {
            HostEvent::Advertisement { address, rssi, data } => {
                self.on_advertisement(address, rssi, data)
            }
            HostEvent::ScanComplete { reason } => self.on_scan_complete(reason),
            HostEvent::LinkEstablished {
                conn,
                address,
                status,
            } => self.on_link_established(conn, address, status),
            HostEvent::Disconnected { conn, reason } => self.on_disconnected(conn, reason),
            HostEvent::EncryptionChanged { conn, status } => self.on_encryption_changed(conn, status),
            HostEvent::MtuChanged { conn, mtu } => {
                info!("link {}: mtu {}", conn, mtu);
            }
            HostEvent::Discovery { conn, item } => self.on_discovery(conn, item),
            HostEvent::WriteComplete {
                conn,
                handle,
                status,
            } => self.on_write_complete(conn, handle, status),
            HostEvent::ReadComplete {
                conn,
                handle,
                value,
            } => self.on_read_complete(conn, handle, value),
            HostEvent::Notification { conn, handle, data } => {
                self.on_notification(conn, handle, data)
            }
        }
    }

    /// Host callback for a peer that wants to pair while a bond exists.
    pub fn on_repeat_pairing(&mut self, conn: ConnHandle) -> RepeatPairingAction {
        match self.config.bond_conflict {
            BondConflictPolicy::Reject => {
                warn!("link {}: repeat pairing rejected, keeping bond", conn);
                RepeatPairingAction::Ignore
            }
            BondConflictPolicy::DiscardAndRetry => match self.host.delete_bond(conn) {
                Ok(()) => {
                    warn!("link {}: repeat pairing, stale bond discarded", conn);
                    RepeatPairingAction::Retry
                }
                Err(e) => {
                    warn!("link {}: could not delete bond: {}", conn, e);
                    RepeatPairingAction::Ignore
                }
            },
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Scanning & connecting
    // ═══════════════════════════════════════════════════════════════════

    fn on_advertisement(&mut self, address: Address, rssi: i8, data: &[u8]) {
        if self.scan != ScanState::Scanning {
            return;
        }
        let fields = AdvFields::parse(data);
        if !self.config.target.matches(&address, &fields) {
            return;
        }
        if self.links.iter().any(|l| l.address == address) {
            return;
        }
        info!("found target, rssi {}", rssi);

        if let Err(e) = self.host.cancel_scan() {
            warn!("failed to cancel scan: {}", e);
            return;
        }
        self.scan = ScanState::Connecting;
        self.record(None, LinkState::Connecting);

        if let Err(e) = self.host.connect(&address, self.config.connect_timeout_ms) {
            error!("connect request failed: {}", e);
            self.last_error = Some(Error::LinkFailed(e));
            self.scan = ScanState::Idle;
            self.resume_scan();
        }
    }

    fn on_scan_complete(&mut self, reason: u16) {
        info!("scan complete, reason {}", reason);
        if self.scan == ScanState::Scanning {
            self.scan = ScanState::Idle;
            self.resume_scan();
        }
    }

    fn on_link_established(&mut self, conn: ConnHandle, address: Address, status: Result<(), HostError>) {
        if self.scan == ScanState::Connecting {
            self.scan = ScanState::Idle;
        }
        if let Err(e) = status {
            warn!("connection failed: {}", e);
            self.last_error = Some(Error::LinkFailed(e));
            self.resume_scan();
            return;
        }

        match self.cache.add_peer(conn) {
            Ok(()) => {}
            // Same handle re-reported by the host: keep the existing peer.
            Err(CacheError::Conflict) => {
                debug!("link {}: peer already tracked", conn);
            }
            Err(e) => {
                error!("link {}: no peer slot: {}", conn, e);
                self.reject(conn, e.into());
                return;
            }
        }
        if self.link(conn).is_none() {
            let link = Link {
                conn,
                address,
                state: LinkState::LinkEstablished,
                next_binding: 0,
                pending_write: None,
                battery_read: None,
                battery_level: None,
                routes: ReportRouter::new(),
            };
            if self.links.push(link).is_err() {
                error!("link {}: no link slot", conn);
                self.cache.delete_peer(conn).ok();
                self.reject(conn, Error::ResourceExhausted);
                return;
            }
        }
        info!("link {}: established with {}", conn, address);
        self.record(Some(conn), LinkState::LinkEstablished);

        self.set_state(conn, LinkState::Securing);
        if let Err(e) = self.host.initiate_security(conn) {
            self.fail(conn, Error::SecurityFailed(e));
            return;
        }
        self.resume_scan();
    }

    // ═══════════════════════════════════════════════════════════════════
    // Security, discovery, subscription
    // ═══════════════════════════════════════════════════════════════════

    fn on_encryption_changed(&mut self, conn: ConnHandle, status: Result<(), HostError>) {
        if self.link_state(conn) != Some(LinkState::Securing) {
            debug!("link {}: encryption change outside securing", conn);
            return;
        }
        if let Err(e) = status {
            self.fail(conn, Error::SecurityFailed(e));
            return;
        }
        self.set_state(conn, LinkState::Encrypted);

        self.set_state(conn, LinkState::Discovering);
        if let Some(done) = discovery::start(&mut self.cache, &mut self.host, conn) {
            self.on_discovery_done(conn, done);
        }
    }

    fn on_discovery(&mut self, conn: ConnHandle, item: Discovered) {
        if self.link_state(conn) != Some(LinkState::Discovering) {
            return;
        }
        if let Some(done) = discovery::on_result(&mut self.cache, &mut self.host, conn, item) {
            self.on_discovery_done(conn, done);
        }
    }

    fn on_discovery_done(&mut self, conn: ConnHandle, done: Result<(), Error>) {
        if let Err(e) = done {
            self.fail(conn, e);
            return;
        }
        let usage = self.cache.usage();
        info!(
            "link {}: discovered, pools {}/{}/{}",
            conn, usage.services, usage.characteristics, usage.descriptors
        );
        self.set_state(conn, LinkState::Subscribing);
        if let Some(link) = self.link_mut(conn) {
            link.next_binding = 0;
        }
        self.subscribe_next(conn);
    }

    /// Writes the CCCD of the next resolvable binding, or enters streaming
    /// once every binding has been tried.
    fn subscribe_next(&mut self, conn: ConnHandle) {
        let Some(start) = self.link(conn).map(|l| l.next_binding) else {
            return;
        };
        let bindings = self.config.subscriptions;

        for (i, binding) in bindings.iter().enumerate().skip(start) {
            let (value, cccd) = match self.resolve(conn, binding) {
                Ok(handles) => handles,
                Err(e) if e.is_fatal() => {
                    self.fail(conn, e);
                    return;
                }
                Err(e) => {
                    warn!("link {}: {} report not found: {}", conn, binding.kind, e);
                    continue;
                }
            };
            let Some(link) = self.link_mut(conn) else {
                return;
            };
            if let Err(e) = link.routes.bind(conn, value, binding.kind) {
                warn!("link {}: cannot route handle {}: {}", conn, value, e);
                continue;
            }
            link.next_binding = i + 1;
            link.pending_write = Some(cccd);
            debug!("link {}: subscribing {} via cccd {:#x}", conn, binding.kind, cccd);
            if let Err(e) = self.host.write(conn, cccd, &config::CCCD_NOTIFY) {
                self.fail(conn, Error::SubscriptionFailed(e));
            }
            return;
        }

        if self.link(conn).is_some_and(|l| l.routes.is_bound(conn)) {
            self.enter_streaming(conn);
        } else {
            error!("link {}: nothing to subscribe to", conn);
            self.fail(conn, Error::NotFound);
        }
    }

    /// Resolves a binding to `(value handle, CCCD handle)` using the cache.
    fn resolve(&self, conn: ConnHandle, binding: &ReportBinding) -> Result<(Handle, Handle), Error> {
        match binding.locator {
            Locator::FixedHandles { value, cccd } => self.resolve_fixed(conn, value, cccd),
            Locator::ByUuid { occurrence } => self.resolve_uuid(conn, occurrence),
            Locator::ByUuidOr {
                occurrence,
                value,
                cccd,
            } => self.resolve_uuid(conn, occurrence).or_else(|e| {
                debug!("link {}: report #{} not found by uuid ({}), trying {:#x}", conn, occurrence, e, value);
                self.resolve_fixed(conn, value, cccd)
            }),
        }
    }

    /// Checks that `value` is a HID Report inside the HID service and that
    /// `cccd` is its Client Characteristic Configuration descriptor.
    fn resolve_fixed(&self, conn: ConnHandle, value: Handle, cccd: Handle) -> Result<(Handle, Handle), Error> {
        let (svc, chr) = self
            .cache
            .characteristic_by_value(conn, value)
            .ok_or(Error::NotFound)?;
        if svc.uuid() != HID_SERVICE || chr.uuid() != HID_REPORT {
            return Err(Error::NotFound);
        }
        match self.cache.find_descriptor(conn, value, cccd).exact {
            Some(d) if d.uuid() == CCCD => Ok((value, cccd)),
            _ => Err(Error::NotFound),
        }
    }

    /// The `occurrence`-th notifiable HID Report and its CCCD.
    fn resolve_uuid(&self, conn: ConnHandle, occurrence: u8) -> Result<(Handle, Handle), Error> {
        let chr = self
            .cache
            .characteristics_by_uuid(conn, HID_SERVICE, HID_REPORT)
            .filter(|c| c.properties().contains(CharProps::NOTIFY))
            .nth(occurrence as usize)
            .ok_or(Error::NotFound)?;
        let cccd = self
            .cache
            .descriptors(chr)
            .find(|d| d.uuid() == CCCD)
            .ok_or(Error::NotFound)?;
        Ok((chr.value_handle(), cccd.handle()))
    }

    fn on_write_complete(&mut self, conn: ConnHandle, handle: Handle, status: Result<(), HostError>) {
        let expected = self
            .link(conn)
            .filter(|l| l.state == LinkState::Subscribing)
            .and_then(|l| l.pending_write);
        if expected != Some(handle) {
            trace!("link {}: unexpected write completion for {}", conn, handle);
            return;
        }
        if let Err(e) = status {
            self.fail(conn, Error::SubscriptionFailed(e));
            return;
        }
        if let Some(link) = self.link_mut(conn) {
            link.pending_write = None;
        }
        self.subscribe_next(conn);
    }

    fn enter_streaming(&mut self, conn: ConnHandle) {
        self.set_state(conn, LinkState::Streaming);
        if !self.config.read_battery {
            return;
        }
        let battery = self
            .cache
            .find_characteristic_by_uuid(conn, BATTERY_SERVICE, BATTERY_LEVEL)
            .map(|c| c.value_handle());
        match battery {
            Ok(handle) => match self.host.read(conn, handle) {
                Ok(()) => {
                    if let Some(link) = self.link_mut(conn) {
                        link.battery_read = Some(handle);
                    }
                }
                Err(e) => warn!("link {}: battery read failed: {}", conn, e),
            },
            Err(e) => warn!("link {}: no battery level: {}", conn, e),
        }
    }

    fn on_read_complete(&mut self, conn: ConnHandle, handle: Handle, value: Result<&[u8], HostError>) {
        let Some(link) = self.link_mut(conn) else {
            return;
        };
        if link.battery_read != Some(handle) {
            return;
        }
        link.battery_read = None;
        match value {
            Ok(v) => {
                link.battery_level = v.first().copied();
                info!("link {}: battery {}%", conn, link.battery_level);
            }
            Err(e) => warn!("link {}: battery read failed: {}", conn, e),
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Streaming
    // ═══════════════════════════════════════════════════════════════════

    fn on_notification(&mut self, conn: ConnHandle, handle: Handle, data: &[u8]) {
        trace!("link {}: notify {} ({} bytes)", conn, handle, data.len());
        if !matches!(
            self.link_state(conn),
            Some(LinkState::Subscribing | LinkState::Streaming)
        ) {
            return;
        }
        let Some(report) = self
            .link(conn)
            .and_then(|l| l.routes.translate(conn, handle, data))
        else {
            return;
        };
        match self.usb.deliver(&report) {
            Ok(Delivery::Sent) => {}
            Ok(Delivery::Dropped) => trace!("usb busy, {} report dropped", report.kind()),
            Err(e) => warn!("usb submit failed: {}", e),
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Teardown
    // ═══════════════════════════════════════════════════════════════════

    /// Terminates `conn` after a fatal error. Cleanup happens when the
    /// disconnect arrives, or right away if the host refuses to terminate.
    fn fail(&mut self, conn: ConnHandle, err: Error) {
        error!("link {}: {}, terminating", conn, err);
        self.last_error = Some(err);
        self.set_state(conn, LinkState::Terminated);
        if let Err(e) = self.host.terminate(conn, REMOTE_USER_TERMINATED) {
            warn!("link {}: terminate failed: {}", conn, e);
            self.release(conn);
            self.resume_scan();
        }
    }

    /// Drops a connection that never got a link slot.
    fn reject(&mut self, conn: ConnHandle, err: Error) {
        self.last_error = Some(err);
        if let Err(e) = self.host.terminate(conn, REMOTE_USER_TERMINATED) {
            warn!("link {}: terminate failed: {}", conn, e);
        }
        self.resume_scan();
    }

    fn on_disconnected(&mut self, conn: ConnHandle, reason: u16) {
        let Some(state) = self.link_state(conn) else {
            debug!("disconnect for unknown conn {}", conn);
            return;
        };
        info!("link {}: disconnected, reason {:#x}", conn, reason);
        if state != LinkState::Terminated {
            self.last_error = Some(Error::Disconnected { reason });
            self.set_state(conn, LinkState::Terminated);
        }
        self.release(conn);
        self.resume_scan();
    }

    /// Frees everything held for `conn`.
    fn release(&mut self, conn: ConnHandle) {
        if self.cache.delete_peer(conn).is_err() {
            debug!("link {}: no cached peer", conn);
        }
        self.links.retain(|l| l.conn != conn);
    }

    /// Scans again if the radio is idle and another link is allowed.
    fn resume_scan(&mut self) {
        if let Err(e) = self.start() {
            error!("failed to start scan: {}", e);
            self.last_error = Some(e);
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════════════

    fn link(&self, conn: ConnHandle) -> Option<&Link> {
        self.links.iter().find(|l| l.conn == conn)
    }

    fn link_mut(&mut self, conn: ConnHandle) -> Option<&mut Link> {
        self.links.iter_mut().find(|l| l.conn == conn)
    }

    fn set_state(&mut self, conn: ConnHandle, state: LinkState) {
        let Some(link) = self.link_mut(conn) else {
            return;
        };
        if link.state == state {
            return;
        }
        link.state = state;
        self.record(Some(conn), state);
    }

    fn record(&mut self, conn: Option<ConnHandle>, state: LinkState) {
        info!("{} -> {}", conn, state);
        self.history.write(Transition { conn, state });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::AddressKind;
    use crate::ble::ScanParams;
    use crate::gatt::{CharacteristicDef, DescriptorDef, GattClient, HandleRange, ServiceDef};
    use crate::hid::{KeyboardReport, MouseReport};
    use std::vec::Vec as StdVec;

    const PEER: Address = Address::new(AddressKind::RandomStatic, [0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xC0]);

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Scan,
        CancelScan,
        Connect,
        Security(ConnHandle),
        Services,
        Characteristics(HandleRange),
        Descriptors(HandleRange),
        Write(Handle),
        Read(Handle),
        Terminate(ConnHandle),
        DeleteBond,
    }

    #[derive(Default)]
    struct Host {
        calls: StdVec<Call>,
        refuse_security: bool,
        refuse_terminate: bool,
    }

    impl GattClient for Host {
        fn discover_all_services(&mut self, _: ConnHandle) -> Result<(), HostError> {
            self.calls.push(Call::Services);
            Ok(())
        }
        fn discover_characteristics(&mut self, _: ConnHandle, r: HandleRange) -> Result<(), HostError> {
            self.calls.push(Call::Characteristics(r));
            Ok(())
        }
        fn discover_descriptors(&mut self, _: ConnHandle, r: HandleRange) -> Result<(), HostError> {
            self.calls.push(Call::Descriptors(r));
            Ok(())
        }
    }

    impl BleHost for Host {
        fn start_scan(&mut self, _: &ScanParams) -> Result<(), HostError> {
            self.calls.push(Call::Scan);
            Ok(())
        }
        fn cancel_scan(&mut self) -> Result<(), HostError> {
            self.calls.push(Call::CancelScan);
            Ok(())
        }
        fn connect(&mut self, _: &Address, _: u32) -> Result<(), HostError> {
            self.calls.push(Call::Connect);
            Ok(())
        }
        fn initiate_security(&mut self, conn: ConnHandle) -> Result<(), HostError> {
            if self.refuse_security {
                return Err(HostError(0x06));
            }
            self.calls.push(Call::Security(conn));
            Ok(())
        }
        fn write(&mut self, _: ConnHandle, handle: Handle, value: &[u8]) -> Result<(), HostError> {
            assert_eq!(value, config::CCCD_NOTIFY);
            self.calls.push(Call::Write(handle));
            Ok(())
        }
        fn read(&mut self, _: ConnHandle, handle: Handle) -> Result<(), HostError> {
            self.calls.push(Call::Read(handle));
            Ok(())
        }
        fn terminate(&mut self, conn: ConnHandle, reason: u8) -> Result<(), HostError> {
            assert_eq!(reason, REMOTE_USER_TERMINATED);
            if self.refuse_terminate {
                return Err(HostError(0x02));
            }
            self.calls.push(Call::Terminate(conn));
            Ok(())
        }
        fn delete_bond(&mut self, _: ConnHandle) -> Result<(), HostError> {
            self.calls.push(Call::DeleteBond);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Usb {
        busy: bool,
        mice: StdVec<MouseReport>,
        keys: StdVec<KeyboardReport>,
    }

    impl UsbHid for Usb {
        fn ready(&self) -> bool {
            !self.busy
        }
        fn submit_mouse(&mut self, r: &MouseReport) -> Result<(), Error> {
            self.mice.push(*r);
            Ok(())
        }
        fn submit_keyboard(&mut self, r: &KeyboardReport) -> Result<(), Error> {
            self.keys.push(*r);
            Ok(())
        }
    }

    type TestCentral = Central<Host, Usb, 2, 8, 8, 8>;

    fn named(name: &str) -> StdVec<u8> {
        let mut adv = std::vec![name.len() as u8 + 1, 0x09];
        adv.extend_from_slice(name.as_bytes());
        adv
    }

    fn central(config: Config) -> TestCentral {
        let mut c = TestCentral::new(Host::default(), Usb::default(), config);
        c.start().unwrap();
        c
    }

    fn connect(c: &mut TestCentral, conn: ConnHandle) {
        c.handle(HostEvent::Advertisement {
            address: PEER,
            rssi: -40,
            data: &named(config::TARGET_NAME),
        });
        c.handle(HostEvent::LinkEstablished {
            conn,
            address: PEER,
            status: Ok(()),
        });
    }

    /// HID service 0x28..=0x36 laid out like the stock mouse.
    fn discover(c: &mut TestCentral, conn: ConnHandle) {
        let items = [
            Discovered::Service(ServiceDef {
                range: HandleRange::new(0x28, 0x36),
                uuid: HID_SERVICE,
            }),
            Discovered::Done(Ok(())),
            Discovered::Characteristic(CharacteristicDef {
                decl_handle: 0x2E,
                value_handle: 0x2F,
                properties: CharProps::READ | CharProps::NOTIFY,
                uuid: HID_REPORT,
            }),
            Discovered::Characteristic(CharacteristicDef {
                decl_handle: 0x32,
                value_handle: 0x33,
                properties: CharProps::READ | CharProps::NOTIFY,
                uuid: HID_REPORT,
            }),
            Discovered::Done(Ok(())),
            Discovered::Descriptor(DescriptorDef {
                handle: 0x30,
                uuid: CCCD,
            }),
            Discovered::Done(Ok(())),
            Discovered::Descriptor(DescriptorDef {
                handle: 0x34,
                uuid: CCCD,
            }),
            Discovered::Done(Ok(())),
        ];
        for item in items {
            c.handle(HostEvent::Discovery { conn, item });
        }
    }

    #[test]
    fn ignores_other_advertisers() {
        let mut c = central(Config::default());
        c.handle(HostEvent::Advertisement {
            address: PEER,
            rssi: -40,
            data: &named("Some Keyboard"),
        });
        assert_eq!(c.scan_state(), ScanState::Scanning);
        assert_eq!(c.host().calls, [Call::Scan]);
    }

    #[test]
    fn default_reports_are_subscribed_in_order() {
        let mut c = central(Config::default());
        connect(&mut c, 1);
        assert_eq!(c.link_state(1), Some(LinkState::Securing));
        c.handle(HostEvent::EncryptionChanged { conn: 1, status: Ok(()) });
        discover(&mut c, 1);
        assert_eq!(c.link_state(1), Some(LinkState::Subscribing));
        assert_eq!(c.host().calls.last(), Some(&Call::Write(0x30)));

        c.handle(HostEvent::WriteComplete {
            conn: 1,
            handle: 0x30,
            status: Ok(()),
        });
        assert_eq!(c.host().calls.last(), Some(&Call::Write(0x34)));
        c.handle(HostEvent::WriteComplete {
            conn: 1,
            handle: 0x34,
            status: Ok(()),
        });
        assert_eq!(c.link_state(1), Some(LinkState::Streaming));
    }

    #[test]
    fn missing_uuid_occurrence_falls_back_to_known_handles() {
        const FALLBACK: &[ReportBinding] = &[ReportBinding {
            kind: crate::hid::ReportKind::Mouse,
            locator: Locator::ByUuidOr {
                occurrence: 4,
                value: 0x33,
                cccd: 0x34,
            },
        }];
        let mut c = central(Config {
            subscriptions: FALLBACK,
            ..Config::default()
        });
        connect(&mut c, 1);
        c.handle(HostEvent::EncryptionChanged { conn: 1, status: Ok(()) });
        discover(&mut c, 1);
        assert_eq!(c.host().calls.last(), Some(&Call::Write(0x34)));
        assert_eq!(
            c.routes(1).and_then(|r| r.kind_of(1, 0x33)),
            Some(crate::hid::ReportKind::Mouse)
        );
    }

    #[test]
    fn security_refusal_terminates() {
        let mut c = central(Config::default());
        c.host_mut().refuse_security = true;
        connect(&mut c, 4);
        assert_eq!(c.link_state(4), Some(LinkState::Terminated));
        assert_eq!(c.host().calls.last(), Some(&Call::Terminate(4)));
        assert_eq!(c.last_error(), Some(Error::SecurityFailed(HostError(0x06))));

        c.handle(HostEvent::Disconnected { conn: 4, reason: 0x16 });
        assert_eq!(c.link_count(), 0);
        assert_eq!(c.scan_state(), ScanState::Scanning);
    }

    #[test]
    fn failed_connection_resumes_scanning() {
        let mut c = central(Config::default());
        c.handle(HostEvent::Advertisement {
            address: PEER,
            rssi: -40,
            data: &named(config::TARGET_NAME),
        });
        assert_eq!(c.scan_state(), ScanState::Connecting);
        c.handle(HostEvent::LinkEstablished {
            conn: 0,
            address: PEER,
            status: Err(HostError(0x0D)),
        });
        assert_eq!(c.scan_state(), ScanState::Scanning);
        assert_eq!(c.link_count(), 0);
        assert_eq!(c.last_error(), Some(Error::LinkFailed(HostError(0x0D))));
    }

    #[test]
    fn missing_subscription_targets_terminate() {
        const NOWHERE: &[ReportBinding] = &[ReportBinding {
            kind: crate::hid::ReportKind::Mouse,
            locator: Locator::FixedHandles {
                value: 0x99,
                cccd: 0x9A,
            },
        }];
        let mut c = central(Config {
            subscriptions: NOWHERE,
            ..Config::default()
        });
        connect(&mut c, 1);
        c.handle(HostEvent::EncryptionChanged { conn: 1, status: Ok(()) });
        discover(&mut c, 1);
        assert_eq!(c.link_state(1), Some(LinkState::Terminated));
        assert_eq!(c.last_error(), Some(Error::NotFound));
    }

    #[test]
    fn terminate_refusal_releases_immediately() {
        let mut c = central(Config::default());
        connect(&mut c, 2);
        c.host_mut().refuse_terminate = true;
        c.handle(HostEvent::EncryptionChanged {
            conn: 2,
            status: Err(HostError(0x05)),
        });
        assert_eq!(c.link_state(2), None);
        assert!(c.cache().peer(2).is_none());
        assert_eq!(c.scan_state(), ScanState::Scanning);
    }

    #[test]
    fn repeat_pairing_policy() {
        let mut c = central(Config::default());
        assert_eq!(c.on_repeat_pairing(1), RepeatPairingAction::Retry);
        assert_eq!(c.host().calls.last(), Some(&Call::DeleteBond));

        let mut c = central(Config {
            bond_conflict: BondConflictPolicy::Reject,
            ..Config::default()
        });
        assert_eq!(c.on_repeat_pairing(1), RepeatPairingAction::Ignore);
        assert!(!c.host().calls.contains(&Call::DeleteBond));
    }

    #[test]
    fn scan_completion_restarts_scan() {
        let mut c = central(Config::default());
        c.handle(HostEvent::ScanComplete { reason: 0 });
        assert_eq!(c.host().calls, [Call::Scan, Call::Scan]);
        assert_eq!(c.scan_state(), ScanState::Scanning);
    }

    #[test]
    fn notifications_before_streaming_are_ignored() {
        let mut c = central(Config::default());
        connect(&mut c, 1);
        c.handle(HostEvent::Notification {
            conn: 1,
            handle: 0x33,
            data: &[0, 0, 1, 0, 0, 0],
        });
        assert!(c.usb().mice.is_empty());
    }
}
