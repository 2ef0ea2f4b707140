// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv6Addr;

use crate::{
    option::get_option_payload, Buffer, BufferMut, DhcpError, DhcpV6Option,
    DhcpV6OptionCode, DhcpV6OptionStatus, ErrorContext, ErrorKind,
};

/// RFC 3315 22.4. Identity Association for Non-temporary Addresses Option
#[derive(Debug, PartialEq, Eq, Clone, Default)]
#[non_exhaustive]
pub struct DhcpV6OptionIaNa {
    pub iaid: u32,
    pub t1_sec: u32,
    pub t2_sec: u32,
    pub addresses: Vec<DhcpV6OptionIaAddr>,
    pub status: Option<DhcpV6OptionStatus>,
}

impl DhcpV6OptionIaNa {
    pub(crate) const fn code() -> DhcpV6OptionCode {
        DhcpV6OptionCode::IANA
    }

    pub fn new(iaid: u32, t1_sec: u32, t2_sec: u32) -> Self {
        Self {
            iaid,
            t1_sec,
            t2_sec,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.addresses.iter().all(|addr| addr.is_success())
            && (self.status.is_none()
                || self.status.as_ref().map(|s| s.is_success()) == Some(true))
    }

    pub(crate) fn parse(buf: &mut Buffer) -> Result<Self, DhcpError> {
        let raw = get_option_payload(buf, Self::code())?;
        let mut buf = Buffer::new(raw.as_slice());
        let mut ret = Self {
            iaid: buf
                .get_u32_be()
                .context("Invalid DHCPv6 option OPTION_IA_NA IAID")?,
            t1_sec: buf
                .get_u32_be()
                .context("Invalid DHCPv6 option OPTION_IA_NA T1")?,
            t2_sec: buf
                .get_u32_be()
                .context("Invalid DHCPv6 option OPTION_IA_NA T2")?,
            ..Default::default()
        };

        while !buf.is_empty() {
            match DhcpV6Option::parse(&mut buf)? {
                DhcpV6Option::StatusCode(v) => ret.status = Some(v),
                DhcpV6Option::IAAddr(v) => ret.addresses.push(v),
                opt => {
                    return Err(unexpected_sub_option(Self::code(), &opt));
                }
            }
        }
        Ok(ret)
    }

    pub(crate) fn emit(&self, buf: &mut BufferMut) {
        let mut value_buf = BufferMut::new();
        value_buf.write_u32_be(self.iaid);
        value_buf.write_u32_be(self.t1_sec);
        value_buf.write_u32_be(self.t2_sec);
        for address in &self.addresses {
            address.emit(&mut value_buf);
        }
        if let Some(status) = self.status.as_ref() {
            status.emit(&mut value_buf);
        }

        buf.write_u16_be(Self::code().into());
        buf.write_u16_be(value_buf.len() as u16);
        buf.write_bytes(&value_buf.data);
    }
}

/// RFC 3315 22.5. Identity Association for Temporary Addresses Option
#[derive(Debug, PartialEq, Eq, Clone, Default)]
#[non_exhaustive]
pub struct DhcpV6OptionIaTa {
    pub iaid: u32,
    pub addresses: Vec<DhcpV6OptionIaAddr>,
    pub status: Option<DhcpV6OptionStatus>,
}

impl DhcpV6OptionIaTa {
    pub(crate) const fn code() -> DhcpV6OptionCode {
        DhcpV6OptionCode::IATA
    }

    pub fn new(iaid: u32) -> Self {
        Self {
            iaid,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.addresses.iter().all(|addr| addr.is_success())
            && (self.status.is_none()
                || self.status.as_ref().map(|s| s.is_success()) == Some(true))
    }

    pub(crate) fn parse(buf: &mut Buffer) -> Result<Self, DhcpError> {
        let raw = get_option_payload(buf, Self::code())?;
        let mut buf = Buffer::new(raw.as_slice());
        let mut ret = Self {
            iaid: buf
                .get_u32_be()
                .context("Invalid DHCPv6 option OPTION_IA_TA IAID")?,
            ..Default::default()
        };

        while !buf.is_empty() {
            match DhcpV6Option::parse(&mut buf)? {
                DhcpV6Option::StatusCode(v) => ret.status = Some(v),
                DhcpV6Option::IAAddr(v) => ret.addresses.push(v),
                opt => {
                    return Err(unexpected_sub_option(Self::code(), &opt));
                }
            }
        }
        Ok(ret)
    }

    pub(crate) fn emit(&self, buf: &mut BufferMut) {
        let mut value_buf = BufferMut::new();
        value_buf.write_u32_be(self.iaid);
        for address in &self.addresses {
            address.emit(&mut value_buf);
        }
        if let Some(status) = self.status.as_ref() {
            status.emit(&mut value_buf);
        }

        buf.write_u16_be(Self::code().into());
        buf.write_u16_be(value_buf.len() as u16);
        buf.write_bytes(&value_buf.data);
    }
}

/// RFC 3633 Identity Association for Prefix Delegation Option
#[derive(Debug, PartialEq, Eq, Clone, Default)]
#[non_exhaustive]
pub struct DhcpV6OptionIaPd {
    pub iaid: u32,
    pub t1_sec: u32,
    pub t2_sec: u32,
    pub prefixes: Vec<DhcpV6OptionIaPrefix>,
    pub status: Option<DhcpV6OptionStatus>,
}

impl DhcpV6OptionIaPd {
    pub(crate) const fn code() -> DhcpV6OptionCode {
        DhcpV6OptionCode::IAPD
    }

    pub fn new(iaid: u32, t1_sec: u32, t2_sec: u32) -> Self {
        Self {
            iaid,
            t1_sec,
            t2_sec,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.prefixes.iter().all(|prefix| prefix.is_success())
            && (self.status.is_none()
                || self.status.as_ref().map(|s| s.is_success()) == Some(true))
    }

    pub(crate) fn parse(buf: &mut Buffer) -> Result<Self, DhcpError> {
        let raw = get_option_payload(buf, Self::code())?;
        let mut buf = Buffer::new(raw.as_slice());
        let mut ret = Self {
            iaid: buf
                .get_u32_be()
                .context("Invalid DHCPv6 option OPTION_IA_PD IAID")?,
            t1_sec: buf
                .get_u32_be()
                .context("Invalid DHCPv6 option OPTION_IA_PD T1")?,
            t2_sec: buf
                .get_u32_be()
                .context("Invalid DHCPv6 option OPTION_IA_PD T2")?,
            ..Default::default()
        };

        while !buf.is_empty() {
            match DhcpV6Option::parse(&mut buf)? {
                DhcpV6Option::StatusCode(v) => ret.status = Some(v),
                DhcpV6Option::IAPrefix(v) => ret.prefixes.push(v),
                opt => {
                    return Err(unexpected_sub_option(Self::code(), &opt));
                }
            }
        }
        Ok(ret)
    }

    pub(crate) fn emit(&self, buf: &mut BufferMut) {
        let mut value_buf = BufferMut::new();
        value_buf.write_u32_be(self.iaid);
        value_buf.write_u32_be(self.t1_sec);
        value_buf.write_u32_be(self.t2_sec);
        for prefix in &self.prefixes {
            prefix.emit(&mut value_buf);
        }
        if let Some(status) = self.status.as_ref() {
            status.emit(&mut value_buf);
        }

        buf.write_u16_be(Self::code().into());
        buf.write_u16_be(value_buf.len() as u16);
        buf.write_bytes(&value_buf.data);
    }
}

/// RFC 3315 22.6. IA Address Option
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub struct DhcpV6OptionIaAddr {
    pub address: Ipv6Addr,
    pub preferred_time_sec: u32,
    pub valid_time_sec: u32,
    pub status: Option<DhcpV6OptionStatus>,
}

impl Default for DhcpV6OptionIaAddr {
    fn default() -> Self {
        Self {
            address: Ipv6Addr::UNSPECIFIED,
            preferred_time_sec: 0,
            valid_time_sec: 0,
            status: None,
        }
    }
}

impl DhcpV6OptionIaAddr {
    pub(crate) const fn code() -> DhcpV6OptionCode {
        DhcpV6OptionCode::IAAddr
    }

    pub fn new(
        address: Ipv6Addr,
        preferred_time_sec: u32,
        valid_time_sec: u32,
    ) -> Self {
        Self {
            address,
            preferred_time_sec,
            valid_time_sec,
            ..Default::default()
        }
    }

    // RFC 3315: if the Status Code option does not appear in a message in
    // which the option could appear, the status of the message is assumed
    // to be Success.
    pub(crate) fn is_success(&self) -> bool {
        self.status.as_ref().map(|s| s.is_success()) != Some(false)
    }

    pub(crate) fn parse(buf: &mut Buffer) -> Result<Self, DhcpError> {
        let raw = get_option_payload(buf, Self::code())?;
        let mut buf = Buffer::new(raw.as_slice());
        Ok(Self {
            address: buf
                .get_ipv6()
                .context("Invalid DHCPv6 option OPTION_IAADDR address")?,
            preferred_time_sec: buf.get_u32_be().context(
                "Invalid DHCPv6 option OPTION_IAADDR preferred time",
            )?,
            valid_time_sec: buf
                .get_u32_be()
                .context("Invalid DHCPv6 option OPTION_IAADDR valid time")?,
            status: {
                if buf.is_empty() {
                    None
                } else {
                    Some(DhcpV6OptionStatus::parse(&mut buf)?)
                }
            },
        })
    }

    pub(crate) fn emit(&self, buf: &mut BufferMut) {
        let mut value_buf = BufferMut::new();
        value_buf.write_ipv6(self.address);
        value_buf.write_u32_be(self.preferred_time_sec);
        value_buf.write_u32_be(self.valid_time_sec);
        if let Some(status) = self.status.as_ref() {
            status.emit(&mut value_buf);
        }

        buf.write_u16_be(Self::code().into());
        buf.write_u16_be(value_buf.len() as u16);
        buf.write_bytes(&value_buf.data);
    }
}

/// RFC 3633 IA Prefix Option
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub struct DhcpV6OptionIaPrefix {
    pub preferred_time_sec: u32,
    pub valid_time_sec: u32,
    pub prefix_len: u8,
    pub prefix: Ipv6Addr,
    pub status: Option<DhcpV6OptionStatus>,
}

impl Default for DhcpV6OptionIaPrefix {
    fn default() -> Self {
        Self {
            preferred_time_sec: 0,
            valid_time_sec: 0,
            prefix_len: 0,
            prefix: Ipv6Addr::UNSPECIFIED,
            status: None,
        }
    }
}

impl DhcpV6OptionIaPrefix {
    pub(crate) const fn code() -> DhcpV6OptionCode {
        DhcpV6OptionCode::IAPrefix
    }

    pub fn new(
        prefix: Ipv6Addr,
        prefix_len: u8,
        preferred_time_sec: u32,
        valid_time_sec: u32,
    ) -> Self {
        Self {
            preferred_time_sec,
            valid_time_sec,
            prefix_len,
            prefix,
            status: None,
        }
    }

    /// Prefix length hint for a Solicit, RFC 3633 section 10.
    pub fn new_hint(prefix_len: u8) -> Self {
        Self {
            prefix_len,
            ..Default::default()
        }
    }

    pub(crate) fn is_success(&self) -> bool {
        self.status.as_ref().map(|s| s.is_success()) != Some(false)
    }

    pub(crate) fn parse(buf: &mut Buffer) -> Result<Self, DhcpError> {
        let raw = get_option_payload(buf, Self::code())?;
        let mut buf = Buffer::new(raw.as_slice());
        Ok(Self {
            preferred_time_sec: buf.get_u32_be().context(
                "Invalid DHCPv6 option OPTION_IAPREFIX preferred time",
            )?,
            valid_time_sec: buf
                .get_u32_be()
                .context("Invalid DHCPv6 option OPTION_IAPREFIX valid time")?,
            prefix_len: buf.get_u8().context(
                "Invalid DHCPv6 option OPTION_IAPREFIX prefix length",
            )?,
            prefix: buf
                .get_ipv6()
                .context("Invalid DHCPv6 option OPTION_IAPREFIX prefix")?,
            status: {
                if buf.is_empty() {
                    None
                } else {
                    Some(DhcpV6OptionStatus::parse(&mut buf)?)
                }
            },
        })
    }

    pub(crate) fn emit(&self, buf: &mut BufferMut) {
        let mut value_buf = BufferMut::new();
        value_buf.write_u32_be(self.preferred_time_sec);
        value_buf.write_u32_be(self.valid_time_sec);
        value_buf.write_u8(self.prefix_len);
        value_buf.write_ipv6(self.prefix);
        if let Some(status) = self.status.as_ref() {
            status.emit(&mut value_buf);
        }

        buf.write_u16_be(Self::code().into());
        buf.write_u16_be(value_buf.len() as u16);
        buf.write_bytes(&value_buf.data);
    }
}

fn unexpected_sub_option(
    parent: DhcpV6OptionCode,
    got: &DhcpV6Option,
) -> DhcpError {
    DhcpError::new(
        ErrorKind::InvalidDhcpMessage,
        format!(
            "Unexpected sub-option {} in DHCPv6 option {parent}",
            got.code()
        ),
    )
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;
    use crate::DhcpV6OptionStatusCode;

    #[test]
    fn parse_iana() -> Result<(), DhcpError> {
        let raw = &[
            0x00, 0x03, 0x00, 0x28, 0x00, 0x11, 0x22, 0x33, 0x00, 0x00, 0x00,
            0x64, 0x00, 0x00, 0x00, 0xc8, 0x00, 0x05, 0x00, 0x18, 0x20, 0x01,
            0x0d, 0xb8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x01, 0x00, 0x00, 0x01, 0x2c, 0x00, 0x00, 0x02, 0x58,
        ];
        let mut buf = Buffer::new(raw.as_slice());

        let opt = DhcpV6Option::parse(&mut buf)?;

        assert_eq!(
            opt,
            DhcpV6Option::IANA(DhcpV6OptionIaNa {
                iaid: 0x00112233,
                t1_sec: 100,
                t2_sec: 200,
                addresses: vec![DhcpV6OptionIaAddr {
                    preferred_time_sec: 300,
                    valid_time_sec: 600,
                    address: Ipv6Addr::from_str("2001:db8::1").unwrap(),
                    status: None,
                }],
                status: None,
            })
        );

        let mut buf = BufferMut::new();
        opt.emit(&mut buf);
        assert_eq!(buf.data.as_slice(), raw);
        Ok(())
    }

    #[test]
    fn parse_iana_multiple_addresses() -> Result<(), DhcpError> {
        let mut ia = DhcpV6OptionIaNa::new(0xfd2abc8e, 60, 105);
        ia.addresses.push(DhcpV6OptionIaAddr::new(
            Ipv6Addr::from_str("2001:db8:a::1").unwrap(),
            120,
            120,
        ));
        ia.addresses.push(DhcpV6OptionIaAddr::new(
            Ipv6Addr::from_str("2001:db8:a::2").unwrap(),
            120,
            120,
        ));

        let mut buf = BufferMut::new();
        ia.emit(&mut buf);

        let parsed =
            DhcpV6OptionIaNa::parse(&mut Buffer::new(buf.data.as_slice()))?;
        assert_eq!(parsed, ia);
        assert_eq!(parsed.addresses.len(), 2);
        Ok(())
    }

    #[test]
    fn parse_pd_no_prefix() -> Result<(), DhcpError> {
        let raw = &[
            0x00, 0x19, 0x00, 0x1f, 0xc1, 0xdb, 0x20, 0x5c, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0d, 0x00, 0x0f, 0x00, 0x06,
            0x4e, 0x4f, 0x50, 0x52, 0x45, 0x46, 0x49, 0x58, 0x41, 0x56, 0x41,
            0x49, 0x4c,
        ];

        let mut buf = Buffer::new(raw);
        let opt = DhcpV6Option::parse(&mut buf)?;

        assert_eq!(
            opt,
            DhcpV6Option::IAPD(DhcpV6OptionIaPd {
                iaid: 0xc1db205c,
                t1_sec: 0,
                t2_sec: 0,
                prefixes: Vec::new(),
                status: Some(DhcpV6OptionStatus {
                    status: DhcpV6OptionStatusCode::NoPrefixAvail,
                    message: "NOPREFIXAVAIL".into(),
                })
            })
        );
        if let DhcpV6Option::IAPD(v) = &opt {
            assert!(!v.is_success());
        }

        let mut buf = BufferMut::new();
        opt.emit(&mut buf);
        assert_eq!(buf.data.as_slice(), raw);
        Ok(())
    }

    #[test]
    fn failed_address_status_fails_ia() {
        let mut ia = DhcpV6OptionIaNa::new(1, 0, 0);
        ia.addresses.push(DhcpV6OptionIaAddr {
            address: Ipv6Addr::from_str("2001:db8::1").unwrap(),
            preferred_time_sec: 0,
            valid_time_sec: 0,
            status: Some(DhcpV6OptionStatus {
                status: DhcpV6OptionStatusCode::NoBinding,
                message: String::new(),
            }),
        });
        assert!(!ia.is_success());
    }
}
