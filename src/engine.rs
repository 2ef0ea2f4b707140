// SPDX-License-Identifier: Apache-2.0

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::{
    device::DhcpV6Device,
    duid::{acquire_duid, derive_iaid},
    event::DhcpEventPool,
    fsm::FsmContext,
    DhcpError, DhcpV6AddressEvent, DhcpV6Config, DhcpV6DeviceEvent,
    DhcpV6EngineConfig, DhcpV6Event, DhcpV6EventKind, DhcpV6Lease,
    DhcpV6LinkEvent, DhcpV6Request, DhcpV6State, ErrorKind, NetInfo,
    NisporNetInfo,
};

/// Lease life cycle notification for the host.
#[derive(Debug, PartialEq, Clone)]
#[non_exhaustive]
pub enum DhcpV6LeaseEvent {
    LeaseAcquired {
        ifindex: u32,
        uuid: u128,
        lease: DhcpV6Lease,
    },
    LeaseFailed {
        ifindex: u32,
        uuid: u128,
        error: DhcpError,
    },
    /// A committed lease expired or became unusable, reacquisition is
    /// running.
    LeaseLost { ifindex: u32, uuid: u128 },
    LeaseReleased { ifindex: u32, uuid: u128 },
}

/// Per-process DHCPv6 client engine owning one device per interface.
///
/// The engine is single threaded and event driven: run [DhcpV6Engine::poll]
/// in a loop and feed every returned event to [DhcpV6Engine::process],
/// which returns the lease events to apply. Kernel link and address
/// changes are fed in through [DhcpV6Engine::device_event],
/// [DhcpV6Engine::link_event] and [DhcpV6Engine::address_event].
#[derive(Debug)]
pub struct DhcpV6Engine {
    conf: DhcpV6EngineConfig,
    netinfo: Box<dyn NetInfo>,
    devices: HashMap<u32, Rc<RefCell<DhcpV6Device>>>,
    pool: DhcpEventPool,
}

impl DhcpV6Engine {
    pub fn new(conf: DhcpV6EngineConfig) -> Result<Self, DhcpError> {
        Self::with_netinfo(conf, Box::new(NisporNetInfo::new()))
    }

    /// Engine with a custom [NetInfo] source.
    pub fn with_netinfo(
        conf: DhcpV6EngineConfig,
        netinfo: Box<dyn NetInfo>,
    ) -> Result<Self, DhcpError> {
        Ok(Self {
            conf,
            netinfo,
            devices: HashMap::new(),
            pool: DhcpEventPool::new()?,
        })
    }

    /// Start acquiring a lease on the given interface. The request is kept
    /// so a later restart can replay it. Progress is reported through the
    /// events returned here and by [DhcpV6Engine::process].
    pub fn acquire(
        &mut self,
        ifindex: u32,
        request: DhcpV6Request,
    ) -> Result<Vec<DhcpV6LeaseEvent>, DhcpError> {
        let iface = self.netinfo.iface_by_index(ifindex)?;

        // One device per interface index; a re-acquire replaces the
        // running configuration atomically.
        let device = match self.devices.get(&ifindex) {
            Some(device) => {
                self.pool.remove_device(ifindex);
                let mut dev = device.borrow_mut();
                dev.retrans.disarm();
                dev.xid = 0;
                dev.close();
                device.clone()
            }
            None => {
                let iaid = derive_iaid(&iface)?;
                let device = Rc::new(RefCell::new(DhcpV6Device::new(
                    iface.name.as_str(),
                    ifindex,
                    iaid,
                )));
                self.devices.insert(ifindex, device.clone());
                device
            }
        };

        let duid = acquire_duid(
            self.netinfo.as_ref(),
            ifindex,
            request.clientid.as_deref(),
            self.conf.default_duid.as_deref(),
            self.conf.duid_file.as_deref(),
        )?;
        let config = DhcpV6Config::new(
            &request,
            duid,
            device.borrow().iaid,
            &self.conf,
        );

        let mut emits = Vec::new();
        let result = {
            let mut ctx = FsmContext {
                pool: &mut self.pool,
                netinfo: self.netinfo.as_ref(),
                conf: &self.conf,
                emits: &mut emits,
            };
            let mut dev = device.borrow_mut();
            dev.set_request(Some(request));
            dev.fsm_acquire(&mut ctx, config)
        };
        if let Err(e) = result {
            self.pool.remove_device(ifindex);
            device
                .borrow_mut()
                .stop(self.conf.lease_dir.as_deref());
            return Err(e);
        }
        Ok(emits)
    }

    /// Release the lease of the interface with one best effort Release
    /// message and forget the device.
    pub fn release(
        &mut self,
        ifindex: u32,
    ) -> Result<Vec<DhcpV6LeaseEvent>, DhcpError> {
        let device = self.device(ifindex)?;
        let mut emits = Vec::new();
        {
            let mut ctx = FsmContext {
                pool: &mut self.pool,
                netinfo: self.netinfo.as_ref(),
                conf: &self.conf,
                emits: &mut emits,
            };
            device.borrow_mut().fsm_release(&mut ctx)?;
        }
        self.devices.remove(&ifindex);
        Ok(emits)
    }

    /// Stop lease acquisition on the interface without releasing. The
    /// device and its recorded request survive for a later re-acquire.
    pub fn stop(&mut self, ifindex: u32) -> Result<(), DhcpError> {
        let device = self.device(ifindex)?;
        self.pool.remove_device(ifindex);
        device.borrow_mut().stop(self.conf.lease_dir.as_deref());
        Ok(())
    }

    /// Wait for device events, up to `wait_time_ms` (-1 blocks).
    pub fn poll(
        &mut self,
        wait_time_ms: isize,
    ) -> Result<Vec<DhcpV6Event>, DhcpError> {
        self.pool.poll(wait_time_ms)
    }

    /// Dispatch one event returned by [DhcpV6Engine::poll].
    pub fn process(
        &mut self,
        event: DhcpV6Event,
    ) -> Result<Vec<DhcpV6LeaseEvent>, DhcpError> {
        let device = match self.devices.get(&event.ifindex) {
            Some(device) => device.clone(),
            None => {
                log::debug!("Dropping event {event} of unknown device");
                return Ok(Vec::new());
            }
        };
        let mut emits = Vec::new();
        match event.kind {
            DhcpV6EventKind::UdpPackageIn => loop {
                let packet = device.borrow_mut().recv_one();
                match packet {
                    Ok(Some((payload, src_ip))) => {
                        let mut ctx = FsmContext {
                            pool: &mut self.pool,
                            netinfo: self.netinfo.as_ref(),
                            conf: &self.conf,
                            emits: &mut emits,
                        };
                        device.borrow_mut().process_packet(
                            &mut ctx,
                            payload.as_slice(),
                            src_ip,
                        )?;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::info!("Ignoring receive failure: {e}");
                        break;
                    }
                }
            },
            kind => {
                let mut ctx = FsmContext {
                    pool: &mut self.pool,
                    netinfo: self.netinfo.as_ref(),
                    conf: &self.conf,
                    emits: &mut emits,
                };
                let mut dev = device.borrow_mut();
                match kind {
                    DhcpV6EventKind::FsmTimeout => {
                        dev.fsm_timeout(&mut ctx)?
                    }
                    DhcpV6EventKind::Retransmit => {
                        dev.fsm_retransmit(&mut ctx)?
                    }
                    DhcpV6EventKind::Renew => dev.fsm_t1(&mut ctx)?,
                    DhcpV6EventKind::Rebind => dev.fsm_t2(&mut ctx)?,
                    DhcpV6EventKind::LeaseExpired => {
                        dev.fsm_lease_expired(&mut ctx)?
                    }
                    DhcpV6EventKind::UdpPackageIn => unreachable!(),
                }
            }
        }
        Ok(emits)
    }

    /// Interface life cycle event from the host netlink watcher.
    pub fn device_event(
        &mut self,
        ifindex: u32,
        event: DhcpV6DeviceEvent,
    ) -> Result<(), DhcpError> {
        let device = self.device(ifindex)?;
        match event {
            DhcpV6DeviceEvent::Up(name) => {
                let mut dev = device.borrow_mut();
                if dev.ifname != name {
                    log::debug!(
                        "{}: Updating interface name to {name}",
                        dev.ifname
                    );
                    dev.ifname = name;
                }
                Ok(())
            }
            DhcpV6DeviceEvent::Down => {
                log::debug!("Network interface index {ifindex} went down");
                self.stop(ifindex)
            }
        }
    }

    /// Carrier event from the host netlink watcher.
    pub fn link_event(
        &mut self,
        ifindex: u32,
        event: DhcpV6LinkEvent,
    ) -> Result<Vec<DhcpV6LeaseEvent>, DhcpError> {
        let device = self.device(ifindex)?;
        let mut emits = Vec::new();
        let mut ctx = FsmContext {
            pool: &mut self.pool,
            netinfo: self.netinfo.as_ref(),
            conf: &self.conf,
            emits: &mut emits,
        };
        device
            .borrow_mut()
            .fsm_link_event(&mut ctx, event == DhcpV6LinkEvent::LinkUp)?;
        Ok(emits)
    }

    /// Address event from the host netlink watcher.
    pub fn address_event(
        &mut self,
        ifindex: u32,
        event: DhcpV6AddressEvent,
    ) -> Result<Vec<DhcpV6LeaseEvent>, DhcpError> {
        let device = self.device(ifindex)?;
        let mut emits = Vec::new();
        let mut ctx = FsmContext {
            pool: &mut self.pool,
            netinfo: self.netinfo.as_ref(),
            conf: &self.conf,
            emits: &mut emits,
        };
        match event {
            DhcpV6AddressEvent::Update(addr, tentative, duplicate) => {
                device.borrow_mut().fsm_address_event(
                    &mut ctx, addr, false, tentative, duplicate,
                )?;
            }
            DhcpV6AddressEvent::Delete(addr) => {
                device.borrow_mut().fsm_address_event(
                    &mut ctx, addr, true, false, false,
                )?;
            }
        }
        Ok(emits)
    }

    pub fn device_state(&self, ifindex: u32) -> Option<DhcpV6State> {
        self.devices
            .get(&ifindex)
            .map(|device| device.borrow().state)
    }

    pub fn lease(&self, ifindex: u32) -> Option<DhcpV6Lease> {
        self.devices
            .get(&ifindex)
            .and_then(|device| device.borrow().lease.clone())
    }

    pub(crate) fn epoll_fd(&self) -> std::os::unix::io::RawFd {
        self.pool.epoll_fd()
    }

    fn device(
        &self,
        ifindex: u32,
    ) -> Result<Rc<RefCell<DhcpV6Device>>, DhcpError> {
        self.devices.get(&ifindex).cloned().ok_or_else(|| {
            DhcpError::new(
                ErrorKind::InvalidArgument,
                format!("No DHCPv6 device for interface index {ifindex}"),
            )
        })
    }

    #[cfg(test)]
    pub(crate) fn test_device(
        &self,
        ifindex: u32,
    ) -> Rc<RefCell<DhcpV6Device>> {
        self.devices.get(&ifindex).unwrap().clone()
    }
}

#[cfg(test)]
mod test {
    use std::net::Ipv6Addr;
    use std::str::FromStr;

    use super::*;
    use crate::testing::{TestNetInfo, TestTransport};
    use crate::{
        msg::DhcpV6MessageType, DhcpV6Duid, DhcpV6DuidUuid, DhcpV6Message,
        DhcpV6Option, DhcpV6OptionCode, DhcpV6OptionIaAddr, DhcpV6OptionIaNa,
        DhcpV6OptionStatus, DhcpV6OptionStatusCode, NetIfaceAddrFlag,
    };

    const ETH0: u32 = 2;

    fn fsm_timeout() -> DhcpV6Event {
        DhcpV6Event {
            ifindex: ETH0,
            kind: DhcpV6EventKind::FsmTimeout,
        }
    }

    fn retransmit() -> DhcpV6Event {
        DhcpV6Event {
            ifindex: ETH0,
            kind: DhcpV6EventKind::Retransmit,
        }
    }

    fn udp_in() -> DhcpV6Event {
        DhcpV6Event {
            ifindex: ETH0,
            kind: DhcpV6EventKind::UdpPackageIn,
        }
    }

    fn new_engine() -> DhcpV6Engine {
        DhcpV6Engine::with_netinfo(
            DhcpV6EngineConfig::default(),
            Box::new(TestNetInfo::new_eth0()),
        )
        .unwrap()
    }

    fn engine_with_transport() -> (DhcpV6Engine, TestTransport) {
        let mut engine = new_engine();
        let emits = engine.acquire(ETH0, DhcpV6Request::new(7)).unwrap();
        assert!(emits.is_empty());
        assert_eq!(engine.device_state(ETH0), Some(DhcpV6State::Selecting));
        let transport = TestTransport::new();
        engine.test_device(ETH0).borrow_mut().transport =
            Some(Box::new(transport.clone()));
        (engine, transport)
    }

    fn srv_duid() -> DhcpV6Duid {
        DhcpV6Duid::UUID(DhcpV6DuidUuid::new(0xbeef))
    }

    fn srv_ip() -> Ipv6Addr {
        Ipv6Addr::from_str("fe80::1").unwrap()
    }

    fn advertise(xid: u32, preference: Option<u8>) -> Vec<u8> {
        let mut msg = DhcpV6Message::new(DhcpV6MessageType::Advertise, xid);
        msg.add_option(DhcpV6Option::ServerId(srv_duid()));
        let mut ia = DhcpV6OptionIaNa::new(0x00112233, 100, 200);
        ia.addresses.push(DhcpV6OptionIaAddr::new(
            Ipv6Addr::from_str("2001:db8::1").unwrap(),
            300,
            600,
        ));
        msg.add_option(DhcpV6Option::IANA(ia));
        if let Some(preference) = preference {
            msg.add_option(DhcpV6Option::Preference(preference));
        }
        msg.emit()
    }

    fn reply(xid: u32, cli_duid: DhcpV6Duid) -> Vec<u8> {
        let mut msg = DhcpV6Message::new(DhcpV6MessageType::Reply, xid);
        msg.add_option(DhcpV6Option::ClientId(cli_duid));
        msg.add_option(DhcpV6Option::ServerId(srv_duid()));
        let mut ia = DhcpV6OptionIaNa::new(0x00112233, 100, 200);
        ia.addresses.push(DhcpV6OptionIaAddr::new(
            Ipv6Addr::from_str("2001:db8::1").unwrap(),
            300,
            600,
        ));
        msg.add_option(DhcpV6Option::IANA(ia));
        msg.emit()
    }

    fn last_sent(transport: &TestTransport) -> DhcpV6Message {
        let sent = transport.sent();
        DhcpV6Message::parse(sent.last().unwrap().0.as_slice()).unwrap()
    }

    fn bind_device(
        engine: &mut DhcpV6Engine,
        transport: &TestTransport,
    ) -> Vec<DhcpV6LeaseEvent> {
        // Initial delay elapsed, Solicit goes out.
        engine.process(fsm_timeout()).unwrap();
        let solicit = last_sent(transport);
        assert_eq!(solicit.msg_type, DhcpV6MessageType::Solicit);

        transport.push_inbound(advertise(solicit.xid(), Some(0)), srv_ip());
        engine.process(udp_in()).unwrap();
        assert_eq!(
            engine.device_state(ETH0),
            Some(DhcpV6State::Selecting)
        );

        // First RT elapsed, the collected offer wins.
        engine.process(fsm_timeout()).unwrap();
        let request = last_sent(transport);
        assert_eq!(request.msg_type, DhcpV6MessageType::Request);
        assert_eq!(
            engine.device_state(ETH0),
            Some(DhcpV6State::Requesting)
        );

        let cli_duid = engine
            .test_device(ETH0)
            .borrow()
            .config
            .as_ref()
            .unwrap()
            .duid()
            .clone();
        transport.push_inbound(reply(request.xid(), cli_duid), srv_ip());
        engine.process(udp_in()).unwrap()
    }

    #[test]
    fn happy_path_solicit_advertise_request_reply() {
        let (mut engine, transport) = engine_with_transport();
        // IAID is derived from the trailing hwaddr bytes.
        assert_eq!(
            engine.test_device(ETH0).borrow().iaid,
            0x00112233
        );

        let emits = bind_device(&mut engine, &transport);
        assert_eq!(engine.device_state(ETH0), Some(DhcpV6State::Bound));
        match &emits[..] {
            [DhcpV6LeaseEvent::LeaseAcquired { ifindex, uuid, lease }] => {
                assert_eq!(*ifindex, ETH0);
                assert_eq!(*uuid, 7);
                assert_eq!(lease.t1_sec(), 100);
                assert_eq!(lease.t2_sec(), 200);
            }
            other => panic!("Expecting LeaseAcquired, got {other:?}"),
        }

        // The Solicit carried our IAID inside IA_NA.
        let solicit =
            DhcpV6Message::parse(transport.sent()[0].0.as_slice()).unwrap();
        match solicit.get_option_first(DhcpV6OptionCode::IANA) {
            Some(DhcpV6Option::IANA(ia)) => {
                assert_eq!(ia.iaid, 0x00112233)
            }
            other => panic!("Expecting IA_NA in Solicit, got {other:?}"),
        }
        // Solicit went to All_DHCP_Relay_Agents_and_Servers scoped to the
        // interface.
        let (_, dest) = transport.sent()[0].clone();
        assert_eq!(dest.ip().to_string(), "ff02::1:2");
        assert_eq!(dest.port(), 547);
        assert_eq!(dest.scope_id(), ETH0);

        // T1 timer armed.
        assert!(engine.pool.has_timer(DhcpV6Event {
            ifindex: ETH0,
            kind: DhcpV6EventKind::Renew,
        }));
    }

    #[test]
    fn preference_255_shortcuts_selecting() {
        let (mut engine, transport) = engine_with_transport();
        engine.process(fsm_timeout()).unwrap();
        let solicit = last_sent(&transport);

        transport
            .push_inbound(advertise(solicit.xid(), Some(255)), srv_ip());
        engine.process(udp_in()).unwrap();

        // Request went out without waiting for the first RT.
        assert_eq!(
            engine.device_state(ETH0),
            Some(DhcpV6State::Requesting)
        );
        assert_eq!(
            last_sent(&transport).msg_type,
            DhcpV6MessageType::Request
        );
    }

    #[test]
    fn tentative_lladdr_waits_then_starts() {
        let mut netinfo = TestNetInfo::new_eth0();
        netinfo.ifaces[0].addrs[0].flags = vec![NetIfaceAddrFlag::Tentative];
        let mut engine = DhcpV6Engine::with_netinfo(
            DhcpV6EngineConfig::default(),
            Box::new(netinfo),
        )
        .unwrap();

        engine.acquire(ETH0, DhcpV6Request::new(7)).unwrap();
        assert_eq!(engine.device_state(ETH0), Some(DhcpV6State::WaitReady));

        // Duplicate address detection finished.
        let emits = engine
            .address_event(
                ETH0,
                DhcpV6AddressEvent::Update(
                    Ipv6Addr::from_str("fe80::5054:ff:fe11:2233").unwrap(),
                    false,
                    false,
                ),
            )
            .unwrap();
        assert!(emits.is_empty());
        assert_eq!(engine.device_state(ETH0), Some(DhcpV6State::Selecting));
    }

    #[test]
    fn tentative_lladdr_fails_on_timeout() {
        let mut netinfo = TestNetInfo::new_eth0();
        netinfo.ifaces[0].addrs[0].flags = vec![NetIfaceAddrFlag::Tentative];
        let mut engine = DhcpV6Engine::with_netinfo(
            DhcpV6EngineConfig::default(),
            Box::new(netinfo),
        )
        .unwrap();

        engine.acquire(ETH0, DhcpV6Request::new(7)).unwrap();
        let emits = engine.process(fsm_timeout()).unwrap();
        match &emits[..] {
            [DhcpV6LeaseEvent::LeaseFailed { error, .. }] => {
                assert_eq!(error.kind(), &ErrorKind::NoLinkLocal)
            }
            other => panic!("Expecting LeaseFailed, got {other:?}"),
        }
        assert_eq!(engine.device_state(ETH0), Some(DhcpV6State::Stopped));
    }

    #[test]
    fn link_flap_triggers_confirm() {
        let (mut engine, transport) = engine_with_transport();
        bind_device(&mut engine, &transport);
        assert_eq!(engine.device_state(ETH0), Some(DhcpV6State::Bound));

        engine
            .link_event(ETH0, DhcpV6LinkEvent::LinkDown)
            .unwrap();
        assert_eq!(engine.device_state(ETH0), Some(DhcpV6State::Bound));

        engine.link_event(ETH0, DhcpV6LinkEvent::LinkUp).unwrap();
        assert_eq!(
            engine.device_state(ETH0),
            Some(DhcpV6State::Confirming)
        );

        // Initial Confirm delay elapsed.
        engine.process(fsm_timeout()).unwrap();
        let confirm = last_sent(&transport);
        assert_eq!(confirm.msg_type, DhcpV6MessageType::Confirm);

        // Server confirms, lease kept and no reacquisition.
        let mut msg = DhcpV6Message::new(
            DhcpV6MessageType::Reply,
            confirm.xid(),
        );
        msg.add_option(DhcpV6Option::ServerId(srv_duid()));
        msg.add_option(DhcpV6Option::StatusCode(DhcpV6OptionStatus {
            status: DhcpV6OptionStatusCode::Success,
            message: String::new(),
        }));
        transport.push_inbound(msg.emit(), srv_ip());
        let emits = engine.process(udp_in()).unwrap();
        assert!(emits.is_empty());
        assert_eq!(engine.device_state(ETH0), Some(DhcpV6State::Bound));
        assert!(engine.lease(ETH0).is_some());
    }

    #[test]
    fn request_mrc_exhaustion_returns_to_selecting() {
        let (mut engine, transport) = engine_with_transport();
        engine.process(fsm_timeout()).unwrap();
        let solicit = last_sent(&transport);
        transport.push_inbound(advertise(solicit.xid(), Some(0)), srv_ip());
        engine.process(udp_in()).unwrap();
        engine.process(fsm_timeout()).unwrap();
        assert_eq!(
            engine.device_state(ETH0),
            Some(DhcpV6State::Requesting)
        );

        // The server never replies. REQ_MAX_RC is 10.
        for _ in 0..12 {
            engine.process(retransmit()).unwrap();
        }
        assert_eq!(
            engine.device_state(ETH0),
            Some(DhcpV6State::Selecting)
        );
        let dev = engine.test_device(ETH0);
        assert!(dev.borrow().best_offer.lease.is_none());
        let request_count = transport
            .sent()
            .iter()
            .map(|(payload, _)| {
                DhcpV6Message::parse(payload.as_slice()).unwrap().msg_type
            })
            .filter(|msg_type| *msg_type == DhcpV6MessageType::Request)
            .count();
        assert_eq!(request_count, 10);
    }

    #[test]
    fn selecting_first_rt_uses_a_single_timer() {
        let (mut engine, transport) = engine_with_transport();
        // Initial delay over, Solicit out. Only the FSM timer is armed
        // while Selecting.
        engine.process(fsm_timeout()).unwrap();
        assert!(engine.pool.has_timer(fsm_timeout()));
        assert!(!engine.pool.has_timer(retransmit()));

        // A stray retransmit tick while Selecting must not resend.
        engine.process(retransmit()).unwrap();
        assert_eq!(transport.sent().len(), 1);

        // No offer by the first RT: the backoff advances on the same
        // timer.
        engine.process(fsm_timeout()).unwrap();
        assert_eq!(transport.sent().len(), 2);
        assert_eq!(
            engine.device_state(ETH0),
            Some(DhcpV6State::Selecting)
        );
        assert!(engine.pool.has_timer(fsm_timeout()));
        assert!(!engine.pool.has_timer(retransmit()));

        // Offer collected, the next tick selects it; only then does the
        // retransmit timer take over, so the selection can never race a
        // queued Solicit resend into a duplicate Request.
        let solicit = last_sent(&transport);
        transport.push_inbound(advertise(solicit.xid(), Some(0)), srv_ip());
        engine.process(udp_in()).unwrap();
        engine.process(fsm_timeout()).unwrap();
        assert_eq!(
            engine.device_state(ETH0),
            Some(DhcpV6State::Requesting)
        );
        assert!(engine.pool.has_timer(retransmit()));
        let request_count = transport
            .sent()
            .iter()
            .map(|(payload, _)| {
                DhcpV6Message::parse(payload.as_slice()).unwrap().msg_type
            })
            .filter(|msg_type| *msg_type == DhcpV6MessageType::Request)
            .count();
        assert_eq!(request_count, 1);
    }

    #[test]
    fn link_down_pauses_selecting() {
        let (mut engine, transport) = engine_with_transport();
        engine.process(fsm_timeout()).unwrap();
        let solicit = last_sent(&transport);
        transport.push_inbound(advertise(solicit.xid(), Some(0)), srv_ip());
        engine.process(udp_in()).unwrap();

        // Carrier lost: the whole exchange pauses, including the first-RT
        // deadline that would otherwise select and transmit on a down
        // interface.
        engine
            .link_event(ETH0, DhcpV6LinkEvent::LinkDown)
            .unwrap();
        assert_eq!(
            engine.device_state(ETH0),
            Some(DhcpV6State::Selecting)
        );
        assert!(!engine.pool.has_timer(fsm_timeout()));
        assert!(!engine.pool.has_timer(retransmit()));
        assert_eq!(transport.sent().len(), 1);

        // Carrier back: acquisition restarts with a fresh initial delay.
        engine.link_event(ETH0, DhcpV6LinkEvent::LinkUp).unwrap();
        assert_eq!(
            engine.device_state(ETH0),
            Some(DhcpV6State::Selecting)
        );
        assert!(engine.pool.has_timer(fsm_timeout()));
        assert_eq!(transport.sent().len(), 1);
    }

    #[test]
    fn rename_updates_ifname_only() {
        let (mut engine, _) = engine_with_transport();
        engine
            .device_event(ETH0, DhcpV6DeviceEvent::Up("enp0s3".to_string()))
            .unwrap();
        let dev = engine.test_device(ETH0);
        assert_eq!(dev.borrow().ifname, "enp0s3");
        assert_eq!(dev.borrow().ifindex, ETH0);
    }

    #[test]
    fn one_device_per_ifindex() {
        let mut engine = new_engine();
        engine.acquire(ETH0, DhcpV6Request::new(1)).unwrap();
        engine.acquire(ETH0, DhcpV6Request::new(2)).unwrap();
        assert_eq!(engine.devices.len(), 1);
        assert_eq!(
            engine
                .test_device(ETH0)
                .borrow()
                .config
                .as_ref()
                .unwrap()
                .uuid(),
            2
        );
    }

    #[test]
    fn device_down_stops_but_keeps_device() {
        let (mut engine, transport) = engine_with_transport();
        bind_device(&mut engine, &transport);
        engine
            .device_event(ETH0, DhcpV6DeviceEvent::Down)
            .unwrap();
        assert_eq!(engine.device_state(ETH0), Some(DhcpV6State::Init));
        assert!(engine.lease(ETH0).is_none());
        // Stop also forgets the recorded request and config.
        assert!(engine.test_device(ETH0).borrow().request.is_none());
        assert!(engine.test_device(ETH0).borrow().config.is_none());
    }

    #[test]
    fn release_sends_once_and_forgets_device() {
        let (mut engine, transport) = engine_with_transport();
        bind_device(&mut engine, &transport);

        // Keep the injected transport across the release.
        engine.test_device(ETH0).borrow_mut().transport =
            Some(Box::new(transport.clone()));
        let emits = engine.release(ETH0).unwrap();
        assert!(matches!(
            emits[..],
            [DhcpV6LeaseEvent::LeaseReleased { ifindex: ETH0, uuid: 7 }]
        ));
        assert_eq!(
            last_sent(&transport).msg_type,
            DhcpV6MessageType::Release
        );
        assert_eq!(engine.device_state(ETH0), None);
    }

    #[test]
    fn rapid_commit_reply_binds_directly() {
        let mut engine = new_engine();
        let mut request = DhcpV6Request::new(9);
        request.rapid_commit = true;
        engine.acquire(ETH0, request).unwrap();
        let transport = TestTransport::new();
        engine.test_device(ETH0).borrow_mut().transport =
            Some(Box::new(transport.clone()));

        engine.process(fsm_timeout()).unwrap();
        let solicit = last_sent(&transport);
        assert!(solicit.has_option(DhcpV6OptionCode::RapidCommit));

        let cli_duid = engine
            .test_device(ETH0)
            .borrow()
            .config
            .as_ref()
            .unwrap()
            .duid()
            .clone();
        let mut msg = DhcpV6Message::parse(
            reply(solicit.xid(), cli_duid).as_slice(),
        )
        .unwrap();
        msg.add_option(DhcpV6Option::RapidCommit);
        transport.push_inbound(msg.emit(), srv_ip());
        let emits = engine.process(udp_in()).unwrap();
        assert!(matches!(
            emits[..],
            [DhcpV6LeaseEvent::LeaseAcquired { .. }]
        ));
        assert_eq!(engine.device_state(ETH0), Some(DhcpV6State::Bound));
    }
}
