// SPDX-License-Identifier: Apache-2.0

use std::net::{Ipv6Addr, SocketAddrV6, UdpSocket};
use std::os::unix::io::{AsRawFd, RawFd};

use crate::{DhcpError, ErrorKind};

/// RFC 3315: All_DHCP_Relay_Agents_and_Servers
const ALL_DHCP_RELAY_AGENTS_AND_SERVERS: Ipv6Addr =
    Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 1, 2);

const CLIENT_PORT: u16 = 546;
const SERVER_PORT: u16 = 547;

pub(crate) fn multicast_dest(ifindex: u32) -> SocketAddrV6 {
    SocketAddrV6::new(ALL_DHCP_RELAY_AGENTS_AND_SERVERS, SERVER_PORT, 0, ifindex)
}

pub(crate) fn unicast_dest(addr: Ipv6Addr) -> SocketAddrV6 {
    SocketAddrV6::new(addr, SERVER_PORT, 0, 0)
}

/// Datagram transport of a device. The engine registers the raw file
/// descriptor with its event pool and drains packets when readable.
pub trait Transport: std::fmt::Debug {
    fn send_to(
        &mut self,
        payload: &[u8],
        dst: &SocketAddrV6,
    ) -> Result<usize, DhcpError>;

    /// Non-blocking receive of a packet and its source address, `None`
    /// once drained.
    fn recv(&mut self) -> Result<Option<(Vec<u8>, Ipv6Addr)>, DhcpError>;

    /// File descriptor to watch for readability, `None` when the transport
    /// is not fd-backed.
    fn raw_fd(&self) -> Option<RawFd>;
}

/// UDP transport bound to the link-local address on the client port.
#[derive(Debug)]
pub(crate) struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub(crate) fn new(
        iface_name: &str,
        ifindex: u32,
        src_ip: Ipv6Addr,
    ) -> Result<Self, DhcpError> {
        let so_addr = SocketAddrV6::new(src_ip, CLIENT_PORT, 0, ifindex);
        log::debug!(
            "Creating UDP socket on [{src_ip}]:{CLIENT_PORT} on interface \
             {iface_name}(index {ifindex})"
        );
        let socket = UdpSocket::bind(so_addr).map_err(|e| {
            DhcpError::new(
                ErrorKind::SendFailed,
                format!(
                    "Failed to bind UDP socket on [{src_ip}]:{CLIENT_PORT} \
                     of interface {iface_name}: {e}"
                ),
            )
        })?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }
}

impl Transport for UdpTransport {
    fn send_to(
        &mut self,
        payload: &[u8],
        dst: &SocketAddrV6,
    ) -> Result<usize, DhcpError> {
        self.socket.send_to(payload, dst).map_err(|e| {
            DhcpError::new(
                ErrorKind::SendFailed,
                format!("Failed to send DHCPv6 message to {dst}: {e}"),
            )
        })
    }

    fn recv(&mut self) -> Result<Option<(Vec<u8>, Ipv6Addr)>, DhcpError> {
        let mut buffer = [0u8; 1500];
        match self.socket.recv_from(&mut buffer) {
            Ok((received, src)) => {
                let src_ip = match src {
                    std::net::SocketAddr::V6(v6) => *v6.ip(),
                    std::net::SocketAddr::V4(_) => {
                        return Err(DhcpError::new(
                            ErrorKind::RecvFailed,
                            "Received IPv4 packet on DHCPv6 socket"
                                .to_string(),
                        ))
                    }
                };
                Ok(Some((buffer[..received].to_vec(), src_ip)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(DhcpError::new(
                ErrorKind::RecvFailed,
                format!("Failed to receive DHCPv6 message: {e}"),
            )),
        }
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.socket.as_raw_fd())
    }
}
