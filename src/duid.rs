// SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::time::{Duration, SystemTime};

use rand::Rng;

use crate::{
    buffer::{Buffer, BufferMut},
    netinfo::{
        ARP_HW_TYPE_ETHERNET, ARP_HW_TYPE_IEEE802, ARP_HW_TYPE_INFINIBAND,
    },
    DhcpError, ErrorContext, ErrorKind, NetIface, NetInfo,
};

#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum DhcpV6Duid {
    /// DUID Based on Link-Layer Address Plus Time
    LinkLayerAddressPlusTime(DhcpV6DuidLinkLayerAddrPlusTime),
    /// DUID Assigned by Vendor Based on Enterprise Number
    EnterpriseNumber(DhcpV6DuidEnterpriseNumber),
    /// DUID Based on Link-Layer Address
    LinkLayerAddress(DhcpV6DuidLinkLayerAddr),
    /// DUID Based on Universally Unique Identifier
    UUID(DhcpV6DuidUuid),
    /// Opaque byte array
    Raw(Vec<u8>),
}

impl Default for DhcpV6Duid {
    fn default() -> Self {
        Self::Raw(Vec::new())
    }
}

const DUID_TYPE_LLT: u16 = 1;
const DUID_TYPE_EN: u16 = 2;
const DUID_TYPE_LL: u16 = 3;
const DUID_TYPE_UUID: u16 = 4;

// RFC 3315: a DUID is at least the 2 byte type code plus one byte of data
// and at most 128 bytes of data.
const DUID_MIN_LEN: usize = 3;
const DUID_MAX_LEN: usize = 130;

impl DhcpV6Duid {
    pub(crate) fn parse(
        buf: &mut Buffer,
        len: usize,
    ) -> Result<Self, DhcpError> {
        // Instead of directly modifying the input buffer, limit the data
        // range to the option length.
        let raw = buf.get_bytes(len).context("Invalid DHCPv6 DUID")?;
        let mut buf = Buffer::new(raw);
        let id_type = buf.get_u16_be().context("Invalid DHCPv6 DUID type")?;
        // RFC 3315, 9.1: clients and servers MUST treat DUIDs as opaque
        // values and MUST only compare DUIDs for equality. Hence we do not
        // raise a parsing error here but fall back to an opaque byte array.
        Ok(match id_type {
            DUID_TYPE_LLT => {
                match DhcpV6DuidLinkLayerAddrPlusTime::parse(&mut buf, len) {
                    Ok(v) => Self::LinkLayerAddressPlusTime(v),
                    Err(_) => Self::Raw(raw.to_vec()),
                }
            }
            DUID_TYPE_EN => {
                match DhcpV6DuidEnterpriseNumber::parse(&mut buf, len) {
                    Ok(v) => Self::EnterpriseNumber(v),
                    Err(_) => Self::Raw(raw.to_vec()),
                }
            }
            DUID_TYPE_LL => match DhcpV6DuidLinkLayerAddr::parse(&mut buf, len)
            {
                Ok(v) => Self::LinkLayerAddress(v),
                Err(_) => Self::Raw(raw.to_vec()),
            },
            DUID_TYPE_UUID => match DhcpV6DuidUuid::parse(&mut buf, len) {
                Ok(v) => Self::UUID(v),
                Err(_) => Self::Raw(raw.to_vec()),
            },
            _ => Self::Raw(raw.to_vec()),
        })
    }

    pub(crate) fn emit(&self, buf: &mut BufferMut) {
        match self {
            Self::LinkLayerAddressPlusTime(v) => v.emit(buf),
            Self::EnterpriseNumber(v) => v.emit(buf),
            Self::LinkLayerAddress(v) => v.emit(buf),
            Self::UUID(v) => v.emit(buf),
            Self::Raw(v) => buf.write_bytes(v.as_slice()),
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = BufferMut::new();
        self.emit(&mut buf);
        buf.data
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::Raw(Vec::new())
    }

    /// Parse a hex string DUID, with or without `:` separators, e.g.
    /// `00:01:00:01:2b:71:2f:d1:52:54:00:11:22:33`.
    pub fn parse_hex(hex: &str) -> Result<Self, DhcpError> {
        let cleaned: String =
            hex.chars().filter(|c| *c != ':' && *c != '-').collect();
        if cleaned.len() % 2 != 0 {
            return Err(DhcpError::new(
                ErrorKind::InvalidArgument,
                format!("Invalid hex string DUID: {hex}"),
            ));
        }
        let mut raw = Vec::new();
        for i in (0..cleaned.len()).step_by(2) {
            raw.push(u8::from_str_radix(&cleaned[i..i + 2], 16).map_err(
                |e| {
                    DhcpError::new(
                        ErrorKind::InvalidArgument,
                        format!("Invalid hex string DUID {hex}: {e}"),
                    )
                },
            )?);
        }
        if raw.len() < DUID_MIN_LEN || raw.len() > DUID_MAX_LEN {
            return Err(DhcpError::new(
                ErrorKind::InvalidArgument,
                format!(
                    "Invalid DUID length {}, expecting {DUID_MIN_LEN} to \
                     {DUID_MAX_LEN} bytes",
                    raw.len()
                ),
            ));
        }
        let len = raw.len();
        Self::parse(&mut Buffer::new(raw.as_slice()), len)
    }

    pub fn to_hex_string(&self) -> String {
        self.to_vec()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<String>>()
            .join(":")
    }
}

impl std::fmt::Display for DhcpV6Duid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex_string())
    }
}

// RFC 3315 9.2. DUID Based on Link-Layer Address Plus Time (DUID-LLT)
// The base time is midnight (UTC), January 1, 2000.
const BASE_TIME: Duration = Duration::new(946684800, 0);

// Type 1
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub struct DhcpV6DuidLinkLayerAddrPlusTime {
    pub hardware_type: u16,
    pub time: u32,
    pub link_layer_address: Vec<u8>,
}

impl DhcpV6DuidLinkLayerAddrPlusTime {
    pub fn new(hardware_type: u16, link_layer_address: &[u8]) -> Self {
        let time: u32 = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .ok()
            .and_then(|s| s.checked_sub(BASE_TIME))
            .map(|t| t.as_secs())
            .map(|t| t as u32)
            .unwrap_or_default();

        Self {
            hardware_type,
            time,
            link_layer_address: link_layer_address.to_vec(),
        }
    }

    pub(crate) fn parse(
        buf: &mut Buffer,
        len: usize,
    ) -> Result<Self, DhcpError> {
        Ok(Self {
            hardware_type: buf
                .get_u16_be()
                .context("Invalid DHCPv6 DUID LLT hardware type")?,
            time: buf.get_u32_be().context("Invalid DHCPv6 DUID LLT time")?,
            link_layer_address: buf
                .get_bytes(
                    len.checked_sub(8)
                        .context("DHCPv6 DUID LLT too short")?,
                )
                .context("Invalid DHCPv6 DUID LLT link layer address")?
                .to_vec(),
        })
    }

    pub(crate) fn emit(&self, buf: &mut BufferMut) {
        buf.write_u16_be(DUID_TYPE_LLT);
        buf.write_u16_be(self.hardware_type);
        buf.write_u32_be(self.time);
        buf.write_bytes(self.link_layer_address.as_slice());
    }
}

// Type 2
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub struct DhcpV6DuidEnterpriseNumber {
    pub enterprise_number: u32,
    pub identifier: Vec<u8>,
}

impl DhcpV6DuidEnterpriseNumber {
    pub fn new(enterprise_number: u32, identifier: &[u8]) -> Self {
        Self {
            enterprise_number,
            identifier: identifier.to_vec(),
        }
    }

    pub(crate) fn parse(
        buf: &mut Buffer,
        len: usize,
    ) -> Result<Self, DhcpError> {
        Ok(Self {
            enterprise_number: buf
                .get_u32_be()
                .context("Invalid DHCPv6 DUID EN enterprise number")?,
            identifier: buf
                .get_bytes(
                    len.checked_sub(6)
                        .context("DHCPv6 DUID EN too short")?,
                )
                .context("Invalid DHCPv6 DUID EN identifier")?
                .to_vec(),
        })
    }

    pub(crate) fn emit(&self, buf: &mut BufferMut) {
        buf.write_u16_be(DUID_TYPE_EN);
        buf.write_u32_be(self.enterprise_number);
        buf.write_bytes(self.identifier.as_slice());
    }
}

// Type 3
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub struct DhcpV6DuidLinkLayerAddr {
    pub hardware_type: u16,
    pub link_layer_address: Vec<u8>,
}

impl DhcpV6DuidLinkLayerAddr {
    pub fn new(hardware_type: u16, link_layer_address: &[u8]) -> Self {
        Self {
            hardware_type,
            link_layer_address: link_layer_address.to_vec(),
        }
    }

    pub(crate) fn parse(
        buf: &mut Buffer,
        len: usize,
    ) -> Result<Self, DhcpError> {
        Ok(Self {
            hardware_type: buf
                .get_u16_be()
                .context("Invalid DHCPv6 DUID LL hardware type")?,
            link_layer_address: buf
                .get_bytes(
                    len.checked_sub(4)
                        .context("DHCPv6 DUID LL too short")?,
                )
                .context("Invalid DHCPv6 DUID LL link layer address")?
                .to_vec(),
        })
    }

    pub(crate) fn emit(&self, buf: &mut BufferMut) {
        buf.write_u16_be(DUID_TYPE_LL);
        buf.write_u16_be(self.hardware_type);
        buf.write_bytes(self.link_layer_address.as_slice());
    }
}

// Type 4
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub struct DhcpV6DuidUuid {
    pub uuid: u128,
}

impl DhcpV6DuidUuid {
    pub fn new(uuid: u128) -> Self {
        Self { uuid }
    }

    /// RFC 6355 with a random (version 4, RFC 4122) UUID.
    pub(crate) fn new_random() -> Self {
        let mut raw = [0u8; 16];
        rand::thread_rng().fill(&mut raw);
        raw[6] = (raw[6] & 0x0f) | 0x40;
        raw[8] = (raw[8] & 0x3f) | 0x80;
        Self {
            uuid: u128::from_be_bytes(raw),
        }
    }

    pub(crate) fn parse(
        buf: &mut Buffer,
        len: usize,
    ) -> Result<Self, DhcpError> {
        if len != 18 {
            // Still need to consume the buffer in case the caller decided
            // to move on even with error
            buf.get_bytes(len.saturating_sub(2)).ok();
            Err(DhcpError::new(
                ErrorKind::InvalidDhcpMessage,
                format!(
                    "Invalid DHCPv6 DUID UUID, expecting 16 bytes, got {} \
                     bytes",
                    len - 2
                ),
            ))
        } else {
            Ok(Self {
                uuid: buf.get_u128_be().context("Invalid DHCPv6 DUID UUID")?,
            })
        }
    }

    pub(crate) fn emit(&self, buf: &mut BufferMut) {
        buf.write_u16_be(DUID_TYPE_UUID);
        buf.write_u128_be(self.uuid);
    }
}

/// Load a persisted DUID, stored as raw wire bytes: the 2-byte type
/// followed by the DUID body.
pub(crate) fn load_duid(file_path: &Path) -> Option<DhcpV6Duid> {
    let raw = match std::fs::read(file_path) {
        Ok(raw) => raw,
        Err(e) => {
            log::debug!(
                "No persisted DUID at {}: {e}",
                file_path.display()
            );
            return None;
        }
    };
    if raw.len() < DUID_MIN_LEN || raw.len() > DUID_MAX_LEN {
        log::warn!(
            "Ignoring persisted DUID at {} with invalid length {}",
            file_path.display(),
            raw.len()
        );
        return None;
    }
    let len = raw.len();
    DhcpV6Duid::parse(&mut Buffer::new(raw.as_slice()), len).ok()
}

pub(crate) fn save_duid(file_path: &Path, duid: &DhcpV6Duid) {
    if let Err(e) = std::fs::write(file_path, duid.to_vec()) {
        log::warn!(
            "Failed to persist DUID to {}: {e}",
            file_path.display()
        );
    }
}

/// Generate a new DUID: DUID-LLT from the current interface hardware
/// address when present, otherwise from another interface preferring
/// ethernet, IEEE 802 and infiniband links, otherwise DUID-UUID from a
/// random UUID.
pub(crate) fn generate_duid(
    netinfo: &dyn NetInfo,
    ifindex: u32,
) -> DhcpV6Duid {
    if let Ok(iface) = netinfo.iface_by_index(ifindex) {
        if !iface.hwaddr.is_empty() {
            return DhcpV6Duid::LinkLayerAddressPlusTime(
                DhcpV6DuidLinkLayerAddrPlusTime::new(
                    iface.arp_type,
                    iface.hwaddr.as_slice(),
                ),
            );
        }
    }

    if let Ok(ifaces) = netinfo.ifaces() {
        for arp_type in [
            ARP_HW_TYPE_ETHERNET,
            ARP_HW_TYPE_IEEE802,
            ARP_HW_TYPE_INFINIBAND,
        ] {
            for iface in &ifaces {
                if iface.index == ifindex
                    || iface.arp_type != arp_type
                    || iface.hwaddr.is_empty()
                {
                    continue;
                }
                return DhcpV6Duid::LinkLayerAddressPlusTime(
                    DhcpV6DuidLinkLayerAddrPlusTime::new(
                        iface.arp_type,
                        iface.hwaddr.as_slice(),
                    ),
                );
            }
        }
    }

    DhcpV6Duid::UUID(DhcpV6DuidUuid::new_random())
}

/// Resolve the client DUID for a lease acquisition, first non-empty wins:
///  1. hex DUID carried in the acquire request
///  2. process wide configured default DUID
///  3. DUID persisted on disk
///  4. freshly generated DUID, which is then persisted
pub(crate) fn acquire_duid(
    netinfo: &dyn NetInfo,
    ifindex: u32,
    preferred: Option<&str>,
    default_duid: Option<&str>,
    duid_file: Option<&Path>,
) -> Result<DhcpV6Duid, DhcpError> {
    let mut save = true;
    let mut duid = DhcpV6Duid::default();

    if let Some(preferred) = preferred {
        match DhcpV6Duid::parse_hex(preferred) {
            Ok(d) => duid = d,
            Err(e) => {
                log::debug!("Discarding requested client DUID: {e}");
            }
        }
    }
    if duid.is_empty() {
        if let Some(default_duid) = default_duid {
            match DhcpV6Duid::parse_hex(default_duid) {
                Ok(d) => duid = d,
                Err(e) => {
                    log::warn!("Discarding configured default DUID: {e}");
                }
            }
        }
    }
    if duid.is_empty() {
        if let Some(loaded) =
            duid_file.and_then(|file_path| load_duid(file_path))
        {
            duid = loaded;
            save = false;
        }
    }
    if duid.is_empty() {
        duid = generate_duid(netinfo, ifindex);
    }

    if duid.is_empty() {
        return Err(DhcpError::new(
            ErrorKind::NoIdentity,
            "Unable to find usable or generate client DUID".to_string(),
        ));
    }
    if save {
        if let Some(file_path) = duid_file {
            save_duid(file_path, &duid);
        }
    }
    Ok(duid)
}

/// Derive the IAID of an interface: the trailing 4 bytes of the hardware
/// address when it is at least 4 bytes long, otherwise the interface name,
/// VLAN tag and interface index XORed together.
pub(crate) fn derive_iaid(iface: &NetIface) -> Result<u32, DhcpError> {
    if iface.hwaddr.len() >= 4 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&iface.hwaddr[iface.hwaddr.len() - 4..]);
        return Ok(u32::from_be_bytes(raw));
    }
    if !iface.name.is_empty() {
        let name_raw = iface.name.as_bytes();
        let mut raw = [0u8; 4];
        let len = std::cmp::min(name_raw.len(), 4);
        raw[..len].copy_from_slice(&name_raw[..len]);
        let mut iaid = u32::from_ne_bytes(raw);
        if let Some(vlan_id) = iface.vlan_id {
            if vlan_id > 0 {
                iaid ^= vlan_id as u32;
            }
        }
        iaid ^= iface.index;
        return Ok(iaid);
    }
    Err(DhcpError::new(
        ErrorKind::NoIaid,
        format!(
            "Unable to derive IAID for interface index {}: no hardware \
             address and no interface name",
            iface.index
        ),
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_iface() -> NetIface {
        NetIface {
            name: "eth0".to_string(),
            index: 2,
            hwaddr: vec![0x52, 0x54, 0x00, 0x11, 0x22, 0x33],
            arp_type: ARP_HW_TYPE_ETHERNET,
            ..Default::default()
        }
    }

    #[test]
    fn iaid_from_hwaddr_tail() {
        assert_eq!(derive_iaid(&test_iface()).unwrap(), 0x00112233);
    }

    #[test]
    fn iaid_from_four_byte_hwaddr() {
        let mut iface = test_iface();
        iface.hwaddr = vec![0xde, 0xad, 0xbe, 0xef];
        assert_eq!(derive_iaid(&iface).unwrap(), 0xdeadbeef);
    }

    #[test]
    fn iaid_from_name_and_index() {
        let mut iface = test_iface();
        iface.hwaddr = Vec::new();
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&b"eth0"[..4]);
        assert_eq!(
            derive_iaid(&iface).unwrap(),
            u32::from_ne_bytes(raw) ^ 2
        );
        iface.vlan_id = Some(100);
        assert_eq!(
            derive_iaid(&iface).unwrap(),
            u32::from_ne_bytes(raw) ^ 100 ^ 2
        );
    }

    #[test]
    fn iaid_needs_hwaddr_or_name() {
        let mut iface = test_iface();
        iface.hwaddr = Vec::new();
        iface.name = String::new();
        assert_eq!(
            derive_iaid(&iface).unwrap_err().kind(),
            &ErrorKind::NoIaid
        );
    }

    #[test]
    fn duid_hex_round_trip() {
        let duid = DhcpV6Duid::parse_hex(
            "00:01:00:01:2b:71:2f:d1:52:54:00:11:22:33",
        )
        .unwrap();
        assert_eq!(
            duid,
            DhcpV6Duid::LinkLayerAddressPlusTime(
                DhcpV6DuidLinkLayerAddrPlusTime {
                    hardware_type: 1,
                    time: 0x2b712fd1,
                    link_layer_address: vec![
                        0x52, 0x54, 0x00, 0x11, 0x22, 0x33
                    ],
                }
            )
        );
        assert_eq!(
            duid.to_hex_string(),
            "00:01:00:01:2b:71:2f:d1:52:54:00:11:22:33"
        );
    }

    #[test]
    fn duid_file_round_trip() {
        let duid = DhcpV6Duid::UUID(DhcpV6DuidUuid::new_random());
        let file_path =
            std::env::temp_dir().join("mirzam-duid-round-trip-test");
        save_duid(&file_path, &duid);
        assert_eq!(load_duid(&file_path), Some(duid));
        std::fs::remove_file(&file_path).ok();
    }

    #[test]
    fn random_uuid_duid_is_version_4() {
        let duid = DhcpV6DuidUuid::new_random();
        let raw = duid.uuid.to_be_bytes();
        assert_eq!(raw[6] & 0xf0, 0x40);
        assert_eq!(raw[8] & 0xc0, 0x80);
    }
}
