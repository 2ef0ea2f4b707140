// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv6Addr;
use std::str::FromStr;

use nispor::{
    Iface, IfaceFlag, IfaceType, Ipv6AddrFlag, NetState, NetStateFilter,
    NetStateIfaceFilter,
};

use crate::{DhcpError, ErrorKind};

// https://www.iana.org/assignments/arp-parameters/arp-parameters.xhtml
pub(crate) const ARP_HW_TYPE_ETHERNET: u16 = 1;
pub(crate) const ARP_HW_TYPE_IEEE802: u16 = 6;
pub(crate) const ARP_HW_TYPE_INFINIBAND: u16 = 32;
pub(crate) const ARP_HW_TYPE_LOOPBACK: u16 = 772;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum NetIfaceAddrFlag {
    Tentative,
    /// Duplicate address detection failed for this address.
    Duplicate,
    Deprecated,
    Permanent,
}

#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub struct NetIfaceAddr {
    pub address: Ipv6Addr,
    pub prefix_len: u8,
    pub flags: Vec<NetIfaceAddrFlag>,
}

impl NetIfaceAddr {
    pub fn is_linklocal(&self) -> bool {
        is_ipv6_unicast_link_local(&self.address)
    }

    pub fn is_tentative(&self) -> bool {
        self.flags.contains(&NetIfaceAddrFlag::Tentative)
    }

    pub fn is_duplicate(&self) -> bool {
        self.flags.contains(&NetIfaceAddrFlag::Duplicate)
    }
}

/// Interface state as reported by the kernel, the subset the DHCPv6 engine
/// consumes.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
#[non_exhaustive]
pub struct NetIface {
    pub name: String,
    pub index: u32,
    pub hwaddr: Vec<u8>,
    pub arp_type: u16,
    pub vlan_id: Option<u16>,
    /// Carrier present (lower layer up).
    pub link_up: bool,
    /// Administratively up.
    pub network_up: bool,
    pub addrs: Vec<NetIfaceAddr>,
}

/// Read-only view into the host network state. The engine queries it when
/// starting a lease acquisition and when deriving the client identity.
pub trait NetInfo: std::fmt::Debug {
    fn iface_by_index(&self, ifindex: u32) -> Result<NetIface, DhcpError>;

    fn ifaces(&self) -> Result<Vec<NetIface>, DhcpError>;
}

/// [NetInfo] backed by the nispor crate.
#[derive(Debug, Default)]
pub struct NisporNetInfo {}

impl NisporNetInfo {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NetInfo for NisporNetInfo {
    fn iface_by_index(&self, ifindex: u32) -> Result<NetIface, DhcpError> {
        self.ifaces()?
            .into_iter()
            .find(|iface| iface.index == ifindex)
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
        Ok(get_nispor_ifaces()?.iter().map(to_net_iface).collect())
    }
}

// We use a thread to invoke nispor which has `tokio::block_on` that would
// panic when the caller itself runs inside a tokio context.
fn get_nispor_ifaces() -> Result<Vec<Iface>, DhcpError> {
    match std::thread::spawn(move || {
        let mut filter = NetStateFilter::minimum();
        let mut iface_filter = NetStateIfaceFilter::minimum();
        iface_filter.include_ip_address = true;
        filter.iface = Some(iface_filter);

        match NetState::retrieve_with_filter(&filter) {
            Ok(state) => Ok(state.ifaces.into_values().collect()),
            Err(e) => Err(DhcpError::new(
                ErrorKind::Bug,
                format!("Failed to retrieve network state: {e}"),
            )),
        }
    })
    .join()
    {
        Ok(n) => n,
        Err(e) => Err(DhcpError::new(
            ErrorKind::Bug,
            format!("Failed to invoke nispor thread: {e:?}"),
        )),
    }
}

fn to_net_iface(np_iface: &Iface) -> NetIface {
    let mut addrs = Vec::new();
    if let Some(ip_addrs) =
        np_iface.ipv6.as_ref().map(|i| i.addresses.as_slice())
    {
        for ip_addr in ip_addrs {
            let address = match Ipv6Addr::from_str(ip_addr.address.as_str()) {
                Ok(a) => a,
                Err(_) => continue,
            };
            let mut flags = Vec::new();
            if ip_addr.flags.contains(&Ipv6AddrFlag::Tentative) {
                flags.push(NetIfaceAddrFlag::Tentative);
            }
            if ip_addr.flags.contains(&Ipv6AddrFlag::Dadfailed) {
                flags.push(NetIfaceAddrFlag::Duplicate);
            }
            if ip_addr.flags.contains(&Ipv6AddrFlag::Deprecated) {
                flags.push(NetIfaceAddrFlag::Deprecated);
            }
            if ip_addr.flags.contains(&Ipv6AddrFlag::Permanent) {
                flags.push(NetIfaceAddrFlag::Permanent);
            }
            addrs.push(NetIfaceAddr {
                address,
                prefix_len: ip_addr.prefix_len,
                flags,
            });
        }
    }

    NetIface {
        name: np_iface.name.clone(),
        index: np_iface.index,
        hwaddr: mac_str_to_u8_array(np_iface.mac_address.as_str()),
        arp_type: match np_iface.iface_type {
            IfaceType::Loopback => ARP_HW_TYPE_LOOPBACK,
            _ => ARP_HW_TYPE_ETHERNET,
        },
        vlan_id: np_iface.vlan.as_ref().map(|v| v.vlan_id),
        link_up: np_iface.flags.contains(&IfaceFlag::LowerUp),
        network_up: np_iface.flags.contains(&IfaceFlag::Up),
        addrs,
    }
}

pub(crate) fn mac_str_to_u8_array(mac: &str) -> Vec<u8> {
    let mut ret = Vec::new();
    for item in mac.split(':') {
        match u8::from_str_radix(item, 16) {
            Ok(i) => ret.push(i),
            Err(e) => {
                log::warn!("Failed to convert to MAC address to bytes {e}");
                return Vec::new();
            }
        }
    }
    ret
}

// Copy from Rust official std::net::Ipv6Addr::is_unicast_link_local() which
// is experimental.
pub(crate) fn is_ipv6_unicast_link_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mac_string_to_bytes() {
        assert_eq!(
            mac_str_to_u8_array("52:54:00:11:22:33"),
            vec![0x52, 0x54, 0x00, 0x11, 0x22, 0x33]
        );
        assert_eq!(mac_str_to_u8_array("not-a-mac"), Vec::<u8>::new());
    }

    #[test]
    fn link_local_check() {
        assert!(is_ipv6_unicast_link_local(
            &Ipv6Addr::from_str("fe80::5054:ff:fe11:2233").unwrap()
        ));
        assert!(!is_ipv6_unicast_link_local(
            &Ipv6Addr::from_str("2001:db8::1").unwrap()
        ));
    }
}
