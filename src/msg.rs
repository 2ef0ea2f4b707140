// SPDX-License-Identifier: Apache-2.0

use crate::{
    option::DhcpV6Options, Buffer, BufferMut, DhcpError, DhcpV6Option,
    DhcpV6OptionCode, ErrorContext, ErrorKind,
};

/// DHCPv6 Message Type
///
/// Defined by RFC 3315 - 5.3. DHCP Message Types
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash, Default)]
#[non_exhaustive]
#[repr(u8)]
pub enum DhcpV6MessageType {
    #[default]
    Solicit = 1,
    Advertise = 2,
    Request = 3,
    Confirm = 4,
    Renew = 5,
    Rebind = 6,
    Reply = 7,
    Release = 8,
    Decline = 9,
    Reconfigure = 10,
    InformationRequest = 11,
    RelayForward = 12,
    RelayReply = 13,
}

impl std::fmt::Display for DhcpV6MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                DhcpV6MessageType::Solicit => "Solicit",
                DhcpV6MessageType::Advertise => "Advertise",
                DhcpV6MessageType::Request => "Request",
                DhcpV6MessageType::Confirm => "Confirm",
                DhcpV6MessageType::Renew => "Renew",
                DhcpV6MessageType::Rebind => "Rebind",
                DhcpV6MessageType::Reply => "Reply",
                DhcpV6MessageType::Release => "Release",
                DhcpV6MessageType::Decline => "Decline",
                DhcpV6MessageType::Reconfigure => "Reconfigure",
                DhcpV6MessageType::InformationRequest => "Information-request",
                DhcpV6MessageType::RelayForward => "Relay-forward",
                DhcpV6MessageType::RelayReply => "Relay-reply",
            }
        )
    }
}

impl From<DhcpV6MessageType> for u8 {
    fn from(v: DhcpV6MessageType) -> u8 {
        v as u8
    }
}

impl std::convert::TryFrom<u8> for DhcpV6MessageType {
    type Error = DhcpError;

    fn try_from(d: u8) -> Result<Self, DhcpError> {
        match d {
            d if d == Self::Solicit as u8 => Ok(Self::Solicit),
            d if d == Self::Advertise as u8 => Ok(Self::Advertise),
            d if d == Self::Request as u8 => Ok(Self::Request),
            d if d == Self::Confirm as u8 => Ok(Self::Confirm),
            d if d == Self::Renew as u8 => Ok(Self::Renew),
            d if d == Self::Rebind as u8 => Ok(Self::Rebind),
            d if d == Self::Reply as u8 => Ok(Self::Reply),
            d if d == Self::Release as u8 => Ok(Self::Release),
            d if d == Self::Decline as u8 => Ok(Self::Decline),
            d if d == Self::Reconfigure as u8 => Ok(Self::Reconfigure),
            d if d == Self::InformationRequest as u8 => {
                Ok(Self::InformationRequest)
            }
            d if d == Self::RelayForward as u8 => Ok(Self::RelayForward),
            d if d == Self::RelayReply as u8 => Ok(Self::RelayReply),
            _ => Err(DhcpError::new(
                ErrorKind::NotSupported,
                format!("DHCPv6 message type {d} is not supported"),
            )),
        }
    }
}

// In RFC 3315, the `transaction-id` is a 3-octet field.
const DHCPV6_TRANSACTION_ID_LEN: usize = 3;

pub(crate) const DHCPV6_XID_MAX: u32 = 0x00FF_FFFF;

/// Typed DHCPv6 message: message type, 24 bit transaction id and the option
/// set.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
#[non_exhaustive]
pub struct DhcpV6Message {
    pub msg_type: DhcpV6MessageType,
    xid: [u8; DHCPV6_TRANSACTION_ID_LEN],
    pub(crate) options: DhcpV6Options,
}

impl DhcpV6Message {
    pub fn new(msg_type: DhcpV6MessageType, xid: u32) -> Self {
        let mut ret = Self {
            msg_type,
            xid: [0; DHCPV6_TRANSACTION_ID_LEN],
            options: DhcpV6Options::new(),
        };
        ret.xid.copy_from_slice(&xid.to_be_bytes()[1..]);
        ret
    }

    pub fn xid(&self) -> u32 {
        let mut ret = [0u8; 4];
        ret[1..].copy_from_slice(&self.xid);
        u32::from_be_bytes(ret)
    }

    pub fn add_option(&mut self, opt: DhcpV6Option) {
        self.options.insert(opt);
    }

    pub fn get_option_first(
        &self,
        code: DhcpV6OptionCode,
    ) -> Option<&DhcpV6Option> {
        self.options.get_first(code)
    }

    pub fn get_options(&self, code: DhcpV6OptionCode) -> &[DhcpV6Option] {
        self.options.get_all(code)
    }

    pub fn has_option(&self, code: DhcpV6OptionCode) -> bool {
        self.options.contains(code)
    }

    pub fn parse(payload: &[u8]) -> Result<Self, DhcpError> {
        let mut buf = Buffer::new(payload);

        let mut ret = Self {
            msg_type: buf
                .get_u8()
                .context("Invalid DHCPv6 message type")?
                .try_into()?,
            ..Default::default()
        };

        ret.xid.copy_from_slice(
            buf.get_bytes(DHCPV6_TRANSACTION_ID_LEN)
                .context("Invalid DHCPv6 message transaction-id")?,
        );
        ret.options = DhcpV6Options::parse(&mut buf)?;
        Ok(ret)
    }

    pub(crate) fn emit_to(&self, buf: &mut BufferMut) {
        buf.write_u8(self.msg_type.into());
        buf.write_bytes(&self.xid);
        self.options.emit(buf);
    }

    pub fn emit(&self) -> Vec<u8> {
        let mut buf = BufferMut::new();
        self.emit_to(&mut buf);
        buf.data
    }
}

#[cfg(test)]
mod test {
    use std::net::Ipv6Addr;
    use std::str::FromStr;

    use super::*;
    use crate::{
        DhcpV6Duid, DhcpV6DuidLinkLayerAddr, DhcpV6OptionIaAddr,
        DhcpV6OptionIaNa, DhcpV6OptionVendorClass,
    };

    #[test]
    fn xid_is_24_bit() {
        let msg = DhcpV6Message::new(DhcpV6MessageType::Solicit, 0xdeadbeef);
        assert_eq!(msg.xid(), 0x00adbeef);
        assert_eq!(msg.emit()[0], 1);
    }

    #[test]
    fn message_round_trip_is_option_order_independent(
    ) -> Result<(), DhcpError> {
        let duid = DhcpV6Duid::LinkLayerAddress(DhcpV6DuidLinkLayerAddr::new(
            1,
            &[0x52, 0x54, 0x00, 0x11, 0x22, 0x33],
        ));
        let mut ia = DhcpV6OptionIaNa::new(0x00112233, 0, 0);
        ia.addresses.push(DhcpV6OptionIaAddr::new(
            Ipv6Addr::from_str("2001:db8::1").unwrap(),
            300,
            600,
        ));

        let mut msg = DhcpV6Message::new(DhcpV6MessageType::Request, 0x123456);
        // Insertion order differs from wire order on purpose.
        msg.add_option(DhcpV6Option::ElapsedTime(10));
        msg.add_option(DhcpV6Option::IANA(ia));
        msg.add_option(DhcpV6Option::RapidCommit);
        msg.add_option(DhcpV6Option::VendorClass(
            DhcpV6OptionVendorClass::new(
                7075,
                vec!["mirzam/0.1.0".to_string()],
            ),
        ));
        msg.add_option(DhcpV6Option::ClientId(duid));
        msg.add_option(DhcpV6Option::OptionRequestOption(vec![
            DhcpV6OptionCode::DnsServers,
            DhcpV6OptionCode::DomainList,
        ]));

        let parsed = DhcpV6Message::parse(&msg.emit())?;
        assert_eq!(parsed, msg);
        Ok(())
    }
}
