// SPDX-License-Identifier: Apache-2.0

// Test doubles for the NetInfo and Transport seams, used by the device,
// FSM and engine tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::str::FromStr;

use crate::{
    DhcpError, ErrorKind, NetIface, NetIfaceAddr, NetIfaceAddrFlag, NetInfo,
    Transport,
};

#[derive(Debug, Default)]
pub(crate) struct TestNetInfo {
    pub(crate) ifaces: Vec<NetIface>,
}

impl TestNetInfo {
    /// eth0, ifindex 2, hwaddr 52:54:00:11:22:33 with a usable link-local
    /// address.
    pub(crate) fn new_eth0() -> Self {
        Self {
            ifaces: vec![NetIface {
                name: "eth0".to_string(),
                index: 2,
                hwaddr: vec![0x52, 0x54, 0x00, 0x11, 0x22, 0x33],
                arp_type: 1,
                vlan_id: None,
                link_up: true,
                network_up: true,
                addrs: vec![NetIfaceAddr {
                    address: Ipv6Addr::from_str("fe80::5054:ff:fe11:2233")
                        .unwrap(),
                    prefix_len: 64,
                    flags: vec![NetIfaceAddrFlag::Permanent],
                }],
            }],
        }
    }
}

impl NetInfo for TestNetInfo {
    fn iface_by_index(&self, ifindex: u32) -> Result<NetIface, DhcpError> {
        self.ifaces
            .iter()
            .find(|iface| iface.index == ifindex)
            .cloned()
            .ok_or_else(|| {
                DhcpError::new(
                    ErrorKind::NoInterface,
                    format!(
                        "Unable to find network interface by index {ifindex}"
                    ),
                )
            })
    }

    fn ifaces(&self) -> Result<Vec<NetIface>, DhcpError> {
        Ok(self.ifaces.clone())
    }
}

#[derive(Debug, Default)]
pub(crate) struct TestTransportLog {
    pub(crate) sent: Vec<(Vec<u8>, SocketAddrV6)>,
    pub(crate) inbound: VecDeque<(Vec<u8>, Ipv6Addr)>,
    pub(crate) fail_send: bool,
}

/// In-memory transport capturing outbound frames and feeding queued
/// inbound ones. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub(crate) struct TestTransport {
    pub(crate) log: Rc<RefCell<TestTransportLog>>,
}

impl TestTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn sent(&self) -> Vec<(Vec<u8>, SocketAddrV6)> {
        self.log.borrow().sent.clone()
    }

    pub(crate) fn push_inbound(&self, payload: Vec<u8>, src: Ipv6Addr) {
        self.log.borrow_mut().inbound.push_back((payload, src));
    }
}

impl Transport for TestTransport {
    fn send_to(
        &mut self,
        payload: &[u8],
        dst: &SocketAddrV6,
    ) -> Result<usize, DhcpError> {
        if self.log.borrow().fail_send {
            return Err(DhcpError::new(
                ErrorKind::SendFailed,
                "TestTransport send failure".to_string(),
            ));
        }
        self.log.borrow_mut().sent.push((payload.to_vec(), *dst));
        Ok(payload.len())
    }

    fn recv(&mut self) -> Result<Option<(Vec<u8>, Ipv6Addr)>, DhcpError> {
        Ok(self.log.borrow_mut().inbound.pop_front())
    }

    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}
