// SPDX-License-Identifier: Apache-2.0

use crate::{
    option::get_option_payload, Buffer, BufferMut, DhcpError,
    DhcpV6OptionCode, ErrorContext, ErrorKind,
};

// RFC 3315 24.4. Status Codes
const STATUS_CODE_SUCCESS: u16 = 0;
const STATUS_CODE_UNSPEC_FAIL: u16 = 1;
const STATUS_CODE_NO_ADDRS_AVAIL: u16 = 2;
const STATUS_CODE_NO_BINDING: u16 = 3;
const STATUS_CODE_NOT_ON_LINK: u16 = 4;
const STATUS_CODE_USE_MULTICAST: u16 = 5;
const STATUS_CODE_NO_PREFIX_AVAIL: u16 = 6;

#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub enum DhcpV6OptionStatusCode {
    Success,
    UnspecFail,
    NoAddrsAvail,
    NoBinding,
    NotOnLink,
    UseMulticast,
    NoPrefixAvail,
    Other(u16),
}

impl From<u16> for DhcpV6OptionStatusCode {
    fn from(d: u16) -> Self {
        match d {
            STATUS_CODE_SUCCESS => Self::Success,
            STATUS_CODE_UNSPEC_FAIL => Self::UnspecFail,
            STATUS_CODE_NO_ADDRS_AVAIL => Self::NoAddrsAvail,
            STATUS_CODE_NO_BINDING => Self::NoBinding,
            STATUS_CODE_NOT_ON_LINK => Self::NotOnLink,
            STATUS_CODE_USE_MULTICAST => Self::UseMulticast,
            STATUS_CODE_NO_PREFIX_AVAIL => Self::NoPrefixAvail,
            _ => Self::Other(d),
        }
    }
}

impl From<DhcpV6OptionStatusCode> for u16 {
    fn from(v: DhcpV6OptionStatusCode) -> u16 {
        match v {
            DhcpV6OptionStatusCode::Success => STATUS_CODE_SUCCESS,
            DhcpV6OptionStatusCode::UnspecFail => STATUS_CODE_UNSPEC_FAIL,
            DhcpV6OptionStatusCode::NoAddrsAvail => STATUS_CODE_NO_ADDRS_AVAIL,
            DhcpV6OptionStatusCode::NoBinding => STATUS_CODE_NO_BINDING,
            DhcpV6OptionStatusCode::NotOnLink => STATUS_CODE_NOT_ON_LINK,
            DhcpV6OptionStatusCode::UseMulticast => STATUS_CODE_USE_MULTICAST,
            DhcpV6OptionStatusCode::NoPrefixAvail => {
                STATUS_CODE_NO_PREFIX_AVAIL
            }
            DhcpV6OptionStatusCode::Other(d) => d,
        }
    }
}

impl std::fmt::Display for DhcpV6OptionStatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Success => "Success",
            Self::UnspecFail => "UnspecFail",
            Self::NoAddrsAvail => "NoAddrsAvail",
            Self::NoBinding => "NoBinding",
            Self::NotOnLink => "NotOnLink",
            Self::UseMulticast => "UseMulticast",
            Self::NoPrefixAvail => "NoPrefixAvail",
            Self::Other(d) => return write!(f, "unknown({d})"),
        };
        write!(f, "{name}")
    }
}

/// RFC 3315 22.13. Status Code Option: a 2 byte status code followed by a
/// UTF-8 message.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DhcpV6OptionStatus {
    pub status: DhcpV6OptionStatusCode,
    pub message: String,
}

impl DhcpV6OptionStatus {
    pub(crate) const fn code() -> DhcpV6OptionCode {
        DhcpV6OptionCode::StatusCode
    }

    pub(crate) fn is_success(&self) -> bool {
        self.status == DhcpV6OptionStatusCode::Success
    }

    /// The one Confirm outcome that invalidates the lease.
    pub(crate) fn is_not_on_link(&self) -> bool {
        self.status == DhcpV6OptionStatusCode::NotOnLink
    }

    /// The server-reported failure as the engine error it maps to.
    pub(crate) fn to_error(&self) -> DhcpError {
        DhcpError::new(
            ErrorKind::ServerRejected(self.status),
            format!(
                "DHCPv6 server replied status code {}, message {}",
                self.status, self.message
            ),
        )
    }

    pub(crate) fn parse(buf: &mut Buffer) -> Result<Self, DhcpError> {
        let raw = get_option_payload(buf, Self::code())?;
        let mut buf = Buffer::new(raw.as_slice());
        let status = buf
            .get_u16_be()
            .context("Invalid DHCPv6 OPTION_STATUS_CODE status-code")?
            .into();
        let message = buf
            .get_string_without_null(buf.remain_len())
            .context("Invalid DHCPv6 OPTION_STATUS_CODE message")?;
        Ok(Self { status, message })
    }

    pub(crate) fn emit(&self, buf: &mut BufferMut) {
        let mut value_buf = BufferMut::new();
        value_buf.write_u16_be(self.status.into());
        value_buf.write_string_without_null(&self.message);

        buf.write_u16_be(Self::code().into());
        buf.write_u16_be(value_buf.len() as u16);
        buf.write_bytes(&value_buf.data);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::DhcpV6Option;

    #[test]
    fn parse_status_not_on_link() -> Result<(), DhcpError> {
        let raw = &[
            0x00, 0x0d, 0x00, 0x0d, 0x00, 0x04, 0x6e, 0x6f, 0x74, 0x20, 0x6f,
            0x6e, 0x20, 0x6c, 0x69, 0x6e, 0x6b,
        ];

        let mut buf = Buffer::new(raw);
        let opt = DhcpV6Option::parse(&mut buf)?;

        let status = DhcpV6OptionStatus {
            status: DhcpV6OptionStatusCode::NotOnLink,
            message: "not on link".into(),
        };
        assert_eq!(opt, DhcpV6Option::StatusCode(status.clone()));
        assert!(status.is_not_on_link());
        assert!(!status.is_success());

        let mut buf = BufferMut::new();
        opt.emit(&mut buf);
        assert_eq!(buf.data.as_slice(), raw);
        Ok(())
    }

    #[test]
    fn parse_status_without_message() -> Result<(), DhcpError> {
        let raw = &[0x00, 0x0d, 0x00, 0x02, 0x00, 0x02];

        let mut buf = Buffer::new(raw);
        let opt = DhcpV6Option::parse(&mut buf)?;

        assert_eq!(
            opt,
            DhcpV6Option::StatusCode(DhcpV6OptionStatus {
                status: DhcpV6OptionStatusCode::NoAddrsAvail,
                message: String::new(),
            })
        );
        Ok(())
    }

    #[test]
    fn truncated_status_payload_is_an_error() {
        // One payload byte cannot carry the 2 byte status code.
        let raw = &[0x00, 0x0d, 0x00, 0x01, 0x00];
        assert!(DhcpV6OptionStatus::parse(&mut Buffer::new(raw)).is_err());
    }

    #[test]
    fn failure_maps_to_server_rejected() {
        let status = DhcpV6OptionStatus {
            status: DhcpV6OptionStatusCode::NoAddrsAvail,
            message: "out of addresses".to_string(),
        };
        let e = status.to_error();
        assert_eq!(
            e.kind(),
            &ErrorKind::ServerRejected(DhcpV6OptionStatusCode::NoAddrsAvail)
        );
    }
}
