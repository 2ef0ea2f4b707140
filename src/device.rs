// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::{
    lease::DhcpV6BestOffer, msg::DHCPV6_XID_MAX, retransmit::RetransState,
    socket::UdpTransport, time::BootTime, BufferMut, DhcpError, DhcpV6Config,
    DhcpV6Request, ErrorKind, NetInfo, Transport,
};

// Large enough for any DHCPv6 message we emit, the IPv6 minimum MTU
// (RFC 2460 section 5).
const WBUF_SIZE: usize = 1280;

/// Client state of a device.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[non_exhaustive]
pub enum DhcpV6State {
    #[default]
    Init,
    /// Waiting for the link-local address to finish duplicate address
    /// detection.
    WaitReady,
    /// Solicit sent, collecting Advertise messages.
    Selecting,
    /// Request sent for the best offer, waiting for Reply.
    Requesting,
    /// Validating a Reply before committing the lease.
    ValidateOffer,
    /// Lease committed, waiting on T1.
    Bound,
    /// Renew sent to the lease provider, waiting for Reply.
    Renewing,
    /// Rebind multicast sent, waiting for any server Reply.
    Rebinding,
    /// Confirm sent after link re-appeared, waiting for Reply.
    Confirming,
    /// Decline sent for a duplicate address, waiting for Reply.
    Declining,
    /// Information-request sent, no address acquisition.
    InfoRequest,
    /// Release sent, best effort.
    Releasing,
    Stopped,
}

impl std::fmt::Display for DhcpV6State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Init => "init",
                Self::WaitReady => "wait-ready",
                Self::Selecting => "selecting",
                Self::Requesting => "requesting",
                Self::ValidateOffer => "validate-offer",
                Self::Bound => "bound",
                Self::Renewing => "renewing",
                Self::Rebinding => "rebinding",
                Self::Confirming => "confirming",
                Self::Declining => "declining",
                Self::InfoRequest => "info-request",
                Self::Releasing => "releasing",
                Self::Stopped => "stopped",
            }
        )
    }
}

impl DhcpV6State {
    /// States whose exchange is driven by the retransmission controller.
    pub(crate) fn is_retransmitting(&self) -> bool {
        matches!(
            self,
            Self::Selecting
                | Self::Requesting
                | Self::Confirming
                | Self::Renewing
                | Self::Rebinding
                | Self::Declining
                | Self::InfoRequest
                | Self::Releasing
        )
    }
}

/// Link-local readiness of an interface.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum LladdrCheck {
    Ready(Ipv6Addr),
    /// Only tentative or no link-local addresses yet.
    Wait,
}

/// Per-interface client state. At most one device exists per interface
/// index, enforced by the engine registry.
#[derive(Debug)]
pub(crate) struct DhcpV6Device {
    pub(crate) ifname: String,
    pub(crate) ifindex: u32,
    pub(crate) lladdr: Option<Ipv6Addr>,
    pub(crate) state: DhcpV6State,
    pub(crate) fail_on_timeout: bool,
    pub(crate) link_was_down: bool,
    pub(crate) config: Option<DhcpV6Config>,
    pub(crate) request: Option<DhcpV6Request>,
    pub(crate) lease: Option<crate::DhcpV6Lease>,
    pub(crate) best_offer: DhcpV6BestOffer,
    pub(crate) msg_buf: BufferMut,
    pub(crate) retrans: RetransState,
    pub(crate) iaid: u32,
    pub(crate) xid: u32,
    pub(crate) start_time: BootTime,
    pub(crate) transport: Option<Box<dyn Transport>>,
}

impl DhcpV6Device {
    pub(crate) fn new(ifname: &str, ifindex: u32, iaid: u32) -> Self {
        log::debug!("Creating DHCPv6 device for {ifname} index {ifindex}");
        Self {
            ifname: ifname.to_string(),
            ifindex,
            lladdr: None,
            state: DhcpV6State::Init,
            fail_on_timeout: false,
            link_was_down: false,
            config: None,
            request: None,
            lease: None,
            best_offer: DhcpV6BestOffer::new(),
            msg_buf: BufferMut::with_capacity(WBUF_SIZE),
            retrans: RetransState::default(),
            iaid,
            xid: 0,
            start_time: BootTime::now(),
            transport: None,
        }
    }

    pub(crate) fn set_config(&mut self, config: Option<DhcpV6Config>) {
        self.config = config;
    }

    pub(crate) fn set_request(&mut self, request: Option<DhcpV6Request>) {
        self.request = request;
    }

    pub(crate) fn set_lease(&mut self, lease: Option<crate::DhcpV6Lease>) {
        self.lease = lease;
    }

    /// Fresh 24-bit transaction id for a new exchange.
    pub(crate) fn regen_xid(&mut self) {
        self.xid = rand::thread_rng().gen_range(1..=DHCPV6_XID_MAX);
    }

    pub(crate) fn alloc_buffer(&mut self) {
        if self.msg_buf.data.capacity() < WBUF_SIZE {
            self.msg_buf.data.reserve(WBUF_SIZE);
        }
        self.msg_buf.clear();
    }

    pub(crate) fn clear_buffer(&mut self) {
        self.msg_buf.clear();
    }

    pub(crate) fn lease_file_path(
        &self,
        lease_dir: Option<&Path>,
    ) -> Option<PathBuf> {
        lease_dir.map(|dir| dir.join(format!("dhcp6-{}.lease", self.ifname)))
    }

    pub(crate) fn drop_lease(&mut self, lease_dir: Option<&Path>) {
        if self.lease.take().is_some() {
            if let Some(file_path) = self.lease_file_path(lease_dir) {
                if let Err(e) = std::fs::remove_file(&file_path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        log::warn!(
                            "{}: Failed to remove lease file {}: {e}",
                            self.ifname,
                            file_path.display()
                        );
                    }
                }
            }
        }
    }

    pub(crate) fn drop_best_offer(&mut self) {
        self.best_offer.reset();
    }

    pub(crate) fn close(&mut self) {
        self.transport = None;
        self.clear_buffer();
    }

    /// Cease lease acquisition and forget the current configuration. The
    /// device itself stays registered. The engine removes the pending
    /// timers and socket watches along with this.
    pub(crate) fn stop(&mut self, lease_dir: Option<&Path>) {
        log::debug!("{}: Stopping DHCPv6 device", self.ifname);
        self.drop_lease(lease_dir);
        self.drop_best_offer();
        self.state = DhcpV6State::Init;
        self.fail_on_timeout = false;
        self.retrans.disarm();
        self.xid = 0;
        self.close();
        self.set_config(None);
        self.set_request(None);
    }

    /// Time since the first transmission of the running exchange in
    /// hundredths of a second, for the elapsed-time option.
    pub(crate) fn uptime(&self, clamp: u32) -> u32 {
        self.retrans.uptime_hundredths(clamp)
    }

    /// Look for a usable link-local IPv6 address, storing it when found.
    pub(crate) fn find_lladdr(
        &mut self,
        netinfo: &dyn NetInfo,
    ) -> Result<LladdrCheck, DhcpError> {
        let iface = netinfo.iface_by_index(self.ifindex)?;
        if !iface.link_up {
            return Err(DhcpError::new(
                ErrorKind::LinkDown,
                format!("{}: Link is not up", self.ifname),
            ));
        }

        let linklocals: Vec<&crate::NetIfaceAddr> = iface
            .addrs
            .iter()
            .filter(|addr| addr.is_linklocal())
            .collect();

        if let Some(dup) = linklocals.iter().find(|addr| addr.is_duplicate())
        {
            return Err(DhcpError::new(
                ErrorKind::DuplicateLinkLocal,
                format!(
                    "{}: Link-local IPv6 address is marked duplicate: {}",
                    self.ifname, dup.address
                ),
            ));
        }
        if let Some(usable) =
            linklocals.iter().find(|addr| !addr.is_tentative())
        {
            log::debug!(
                "{}: Found usable link-local IPv6 address: {}",
                self.ifname,
                usable.address
            );
            self.lladdr = Some(usable.address);
            return Ok(LladdrCheck::Ready(usable.address));
        }
        if linklocals.is_empty() {
            log::debug!(
                "{}: Link-local IPv6 address not (yet) available",
                self.ifname
            );
        } else {
            log::debug!(
                "{}: Link-local IPv6 address is tentative",
                self.ifname
            );
        }
        Ok(LladdrCheck::Wait)
    }

    /// One packet off the transport, `None` when drained or closed.
    pub(crate) fn recv_one(
        &mut self,
    ) -> Result<Option<(Vec<u8>, Ipv6Addr)>, DhcpError> {
        match self.transport.as_mut() {
            Some(transport) => transport.recv(),
            None => Ok(None),
        }
    }

    pub(crate) fn open_transport(&mut self) -> Result<(), DhcpError> {
        if self.transport.is_some() {
            return Ok(());
        }
        let lladdr = self.lladdr.ok_or_else(|| {
            DhcpError::new(
                ErrorKind::NoLinkLocal,
                format!(
                    "{}: No link-local address to bind DHCPv6 socket",
                    self.ifname
                ),
            )
        })?;
        self.transport = Some(Box::new(UdpTransport::new(
            self.ifname.as_str(),
            self.ifindex,
            lladdr,
        )?));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;
    use crate::testing::TestNetInfo;
    use crate::{NetIfaceAddr, NetIfaceAddrFlag};

    fn ready_device() -> DhcpV6Device {
        DhcpV6Device::new("eth0", 2, 0x00112233)
    }

    #[test]
    fn stop_twice_is_idempotent() {
        let mut dev = ready_device();
        dev.state = DhcpV6State::Selecting;
        dev.regen_xid();
        dev.stop(None);
        assert_eq!(dev.state, DhcpV6State::Init);
        assert_eq!(dev.xid, 0);
        assert!(dev.config.is_none());
        assert!(dev.request.is_none());
        assert!(dev.lease.is_none());
        dev.stop(None);
        assert_eq!(dev.state, DhcpV6State::Init);
    }

    #[test]
    fn xid_is_24_bit() {
        let mut dev = ready_device();
        for _ in 0..100 {
            dev.regen_xid();
            assert!(dev.xid > 0);
            assert_eq!(dev.xid & 0xFF00_0000, 0);
        }
    }

    #[test]
    fn find_lladdr_states() {
        let mut netinfo = TestNetInfo::new_eth0();
        let mut dev = ready_device();

        // Usable link-local address.
        assert_eq!(
            dev.find_lladdr(&netinfo).unwrap(),
            LladdrCheck::Ready(
                Ipv6Addr::from_str("fe80::5054:ff:fe11:2233").unwrap()
            )
        );
        assert!(dev.lladdr.is_some());

        // Tentative only.
        netinfo.ifaces[0].addrs = vec![NetIfaceAddr {
            address: Ipv6Addr::from_str("fe80::5054:ff:fe11:2233").unwrap(),
            prefix_len: 64,
            flags: vec![NetIfaceAddrFlag::Tentative],
        }];
        let mut dev = ready_device();
        assert_eq!(dev.find_lladdr(&netinfo).unwrap(), LladdrCheck::Wait);
        assert!(dev.lladdr.is_none());

        // Duplicate fails.
        netinfo.ifaces[0].addrs[0].flags = vec![NetIfaceAddrFlag::Duplicate];
        assert_eq!(
            dev.find_lladdr(&netinfo).unwrap_err().kind(),
            &ErrorKind::DuplicateLinkLocal
        );

        // Link down fails.
        netinfo.ifaces[0].link_up = false;
        assert_eq!(
            dev.find_lladdr(&netinfo).unwrap_err().kind(),
            &ErrorKind::LinkDown
        );

        // Missing interface fails.
        dev.ifindex = 99;
        assert_eq!(
            dev.find_lladdr(&netinfo).unwrap_err().kind(),
            &ErrorKind::NoInterface
        );
    }
}
