// SPDX-License-Identifier: Apache-2.0

use std::{cmp::Ordering, collections::HashMap, net::Ipv6Addr};

use crate::{
    Buffer, BufferMut, DhcpError, DhcpV6Duid, DhcpV6OptionIaAddr,
    DhcpV6OptionIaNa, DhcpV6OptionIaPd, DhcpV6OptionIaPrefix,
    DhcpV6OptionIaTa, DhcpV6OptionStatus, ErrorContext, ErrorKind,
};

/// Option set of a DHCPv6 message. DHCPv6 allows an option code to appear
/// more than once, hence every code maps to a list.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub(crate) struct DhcpV6Options {
    data: HashMap<DhcpV6OptionCode, Vec<DhcpV6Option>>,
}

impl DhcpV6Options {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get_data_raw(&self, code: u16) -> Option<Vec<Vec<u8>>> {
        let opts = self.data.get(&DhcpV6OptionCode::from(code))?;
        let mut ret: Vec<Vec<u8>> = Vec::new();
        for opt in opts {
            let mut buf = BufferMut::new();
            opt.emit(&mut buf);
            ret.push(buf.data);
        }
        Some(ret)
    }

    pub(crate) fn get_first(
        &self,
        code: DhcpV6OptionCode,
    ) -> Option<&DhcpV6Option> {
        self.data.get(&code).and_then(|opts| opts.first())
    }

    pub(crate) fn get_all(
        &self,
        code: DhcpV6OptionCode,
    ) -> &[DhcpV6Option] {
        self.data
            .get(&code)
            .map(|opts| opts.as_slice())
            .unwrap_or_default()
    }

    pub(crate) fn insert(&mut self, opt: DhcpV6Option) {
        self.data.entry(opt.code()).or_default().push(opt);
    }

    pub(crate) fn contains(&self, code: DhcpV6OptionCode) -> bool {
        self.data.contains_key(&code)
    }

    pub(crate) fn parse(buf: &mut Buffer) -> Result<Self, DhcpError> {
        let mut ret = Self::new();
        while !buf.is_empty() {
            let remain = buf.remain_len();
            match DhcpV6Option::parse(buf) {
                Ok(opt) => {
                    ret.insert(opt);
                }
                Err(e) => {
                    log::info!(
                        "Ignore DHCPv6 option due to parsing error: {e}"
                    );
                    // A truncated option header consumes nothing, the rest
                    // of the buffer is unparsable.
                    if buf.remain_len() == remain {
                        break;
                    }
                    continue;
                }
            }
        }
        Ok(ret)
    }

    pub(crate) fn emit(&self, buf: &mut BufferMut) {
        let mut all_opts: Vec<&DhcpV6Option> = Vec::new();

        for opts in self.data.values() {
            for opt in opts {
                all_opts.push(opt);
            }
        }

        all_opts.sort_unstable();

        for opt in all_opts {
            opt.emit(buf);
        }
    }
}

const OPTION_CLIENTID: u16 = 1;
const OPTION_SERVERID: u16 = 2;
const OPTION_IA_NA: u16 = 3;
const OPTION_IA_TA: u16 = 4;
const OPTION_IAADDR: u16 = 5;
const OPTION_ORO: u16 = 6;
const OPTION_PREFERENCE: u16 = 7;
const OPTION_ELAPSED_TIME: u16 = 8;
const OPTION_UNICAST: u16 = 12;
const OPTION_STATUS_CODE: u16 = 13;
const OPTION_RAPID_COMMIT: u16 = 14;
const OPTION_USER_CLASS: u16 = 15;
const OPTION_VENDOR_CLASS: u16 = 16;
const OPTION_VENDOR_OPTS: u16 = 17;
const OPTION_RECONF_ACCEPT: u16 = 20;
const OPTION_DNS_SERVERS: u16 = 23;
const OPTION_DOMAIN_LIST: u16 = 24;
const OPTION_IA_PD: u16 = 25;
const OPTION_IAPREFIX: u16 = 26;
const OPTION_FQDN: u16 = 39;
const OPTION_NTP_SERVER: u16 = 56;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Default)]
#[non_exhaustive]
pub enum DhcpV6OptionCode {
    #[default]
    ClientId,
    ServerId,
    IANA,
    IATA,
    IAPD,
    IAAddr,
    IAPrefix,
    OptionRequestOption,
    Preference,
    ElapsedTime,
    ServerUnicast,
    StatusCode,
    RapidCommit,
    UserClass,
    VendorClass,
    VendorOpts,
    ReconfigureAccept,
    DnsServers,
    DomainList,
    Fqdn,
    NtpServer,
    Other(u16),
}

impl From<DhcpV6OptionCode> for u16 {
    fn from(v: DhcpV6OptionCode) -> u16 {
        match v {
            DhcpV6OptionCode::ClientId => OPTION_CLIENTID,
            DhcpV6OptionCode::ServerId => OPTION_SERVERID,
            DhcpV6OptionCode::IANA => OPTION_IA_NA,
            DhcpV6OptionCode::IATA => OPTION_IA_TA,
            DhcpV6OptionCode::IAPD => OPTION_IA_PD,
            DhcpV6OptionCode::IAAddr => OPTION_IAADDR,
            DhcpV6OptionCode::IAPrefix => OPTION_IAPREFIX,
            DhcpV6OptionCode::OptionRequestOption => OPTION_ORO,
            DhcpV6OptionCode::Preference => OPTION_PREFERENCE,
            DhcpV6OptionCode::ElapsedTime => OPTION_ELAPSED_TIME,
            DhcpV6OptionCode::ServerUnicast => OPTION_UNICAST,
            DhcpV6OptionCode::StatusCode => OPTION_STATUS_CODE,
            DhcpV6OptionCode::RapidCommit => OPTION_RAPID_COMMIT,
            DhcpV6OptionCode::UserClass => OPTION_USER_CLASS,
            DhcpV6OptionCode::VendorClass => OPTION_VENDOR_CLASS,
            DhcpV6OptionCode::VendorOpts => OPTION_VENDOR_OPTS,
            DhcpV6OptionCode::ReconfigureAccept => OPTION_RECONF_ACCEPT,
            DhcpV6OptionCode::DnsServers => OPTION_DNS_SERVERS,
            DhcpV6OptionCode::DomainList => OPTION_DOMAIN_LIST,
            DhcpV6OptionCode::Fqdn => OPTION_FQDN,
            DhcpV6OptionCode::NtpServer => OPTION_NTP_SERVER,
            DhcpV6OptionCode::Other(d) => d,
        }
    }
}

impl From<u16> for DhcpV6OptionCode {
    fn from(d: u16) -> Self {
        match d {
            OPTION_CLIENTID => Self::ClientId,
            OPTION_SERVERID => Self::ServerId,
            OPTION_IA_NA => Self::IANA,
            OPTION_IA_TA => Self::IATA,
            OPTION_IA_PD => Self::IAPD,
            OPTION_IAADDR => Self::IAAddr,
            OPTION_IAPREFIX => Self::IAPrefix,
            OPTION_ORO => Self::OptionRequestOption,
            OPTION_PREFERENCE => Self::Preference,
            OPTION_ELAPSED_TIME => Self::ElapsedTime,
            OPTION_UNICAST => Self::ServerUnicast,
            OPTION_STATUS_CODE => Self::StatusCode,
            OPTION_RAPID_COMMIT => Self::RapidCommit,
            OPTION_USER_CLASS => Self::UserClass,
            OPTION_VENDOR_CLASS => Self::VendorClass,
            OPTION_VENDOR_OPTS => Self::VendorOpts,
            OPTION_RECONF_ACCEPT => Self::ReconfigureAccept,
            OPTION_DNS_SERVERS => Self::DnsServers,
            OPTION_DOMAIN_LIST => Self::DomainList,
            OPTION_FQDN => Self::Fqdn,
            OPTION_NTP_SERVER => Self::NtpServer,
            _ => Self::Other(d),
        }
    }
}

impl Ord for DhcpV6OptionCode {
    fn cmp(&self, other: &Self) -> Ordering {
        u16::from(*self).cmp(&u16::from(*other))
    }
}

impl PartialOrd for DhcpV6OptionCode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for DhcpV6OptionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientId => write!(f, "OPTION_CLIENTID"),
            Self::ServerId => write!(f, "OPTION_SERVERID"),
            Self::IANA => write!(f, "OPTION_IA_NA"),
            Self::IATA => write!(f, "OPTION_IA_TA"),
            Self::IAPD => write!(f, "OPTION_IA_PD"),
            Self::IAAddr => write!(f, "OPTION_IAADDR"),
            Self::IAPrefix => write!(f, "OPTION_IAPREFIX"),
            Self::OptionRequestOption => write!(f, "OPTION_ORO"),
            Self::Preference => write!(f, "OPTION_PREFERENCE"),
            Self::ElapsedTime => write!(f, "OPTION_ELAPSED_TIME"),
            Self::ServerUnicast => write!(f, "OPTION_UNICAST"),
            Self::StatusCode => write!(f, "OPTION_STATUS_CODE"),
            Self::RapidCommit => write!(f, "OPTION_RAPID_COMMIT"),
            Self::UserClass => write!(f, "OPTION_USER_CLASS"),
            Self::VendorClass => write!(f, "OPTION_VENDOR_CLASS"),
            Self::VendorOpts => write!(f, "OPTION_VENDOR_OPTS"),
            Self::ReconfigureAccept => write!(f, "OPTION_RECONF_ACCEPT"),
            Self::DnsServers => write!(f, "OPTION_DNS_SERVERS"),
            Self::DomainList => write!(f, "OPTION_DOMAIN_LIST"),
            Self::Fqdn => write!(f, "OPTION_CLIENT_FQDN"),
            Self::NtpServer => write!(f, "OPTION_NTP_SERVER"),
            Self::Other(d) => write!(f, "Unknown({d})"),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum DhcpV6Option {
    ClientId(DhcpV6Duid),
    ServerId(DhcpV6Duid),
    IANA(DhcpV6OptionIaNa),
    IATA(DhcpV6OptionIaTa),
    IAPD(DhcpV6OptionIaPd),
    IAAddr(DhcpV6OptionIaAddr),
    IAPrefix(DhcpV6OptionIaPrefix),
    OptionRequestOption(Vec<DhcpV6OptionCode>),
    Preference(u8),
    /// Time since the start of the exchange in hundredths of a second.
    ElapsedTime(u16),
    ServerUnicast(Ipv6Addr),
    StatusCode(DhcpV6OptionStatus),
    RapidCommit,
    /// RFC 3315 22.15
    UserClass(Vec<String>),
    /// RFC 3315 22.16
    VendorClass(DhcpV6OptionVendorClass),
    /// RFC 3315 22.17
    VendorOpts(DhcpV6OptionVendorOpts),
    /// RFC 3315 22.20
    ReconfigureAccept,
    /// RFC 3646
    DnsServers(Vec<Ipv6Addr>),
    /// RFC 3646
    DomainList(Vec<String>),
    /// RFC 4704, flags plus domain name
    Fqdn(u8, String),
    /// RFC 5908
    NtpServer(Vec<DhcpV6OptionNtpServer>),
    Unknown(DhcpV6OptionUnknown),
}

impl Ord for DhcpV6Option {
    fn cmp(&self, other: &Self) -> Ordering {
        self.code().cmp(&other.code())
    }
}

impl PartialOrd for DhcpV6Option {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl DhcpV6Option {
    pub fn code(&self) -> DhcpV6OptionCode {
        match self {
            Self::ClientId(_) => DhcpV6OptionCode::ClientId,
            Self::ServerId(_) => DhcpV6OptionCode::ServerId,
            Self::IANA(_) => DhcpV6OptionCode::IANA,
            Self::IATA(_) => DhcpV6OptionCode::IATA,
            Self::IAPD(_) => DhcpV6OptionCode::IAPD,
            Self::IAAddr(_) => DhcpV6OptionCode::IAAddr,
            Self::IAPrefix(_) => DhcpV6OptionCode::IAPrefix,
            Self::OptionRequestOption(_) => {
                DhcpV6OptionCode::OptionRequestOption
            }
            Self::Preference(_) => DhcpV6OptionCode::Preference,
            Self::ElapsedTime(_) => DhcpV6OptionCode::ElapsedTime,
            Self::ServerUnicast(_) => DhcpV6OptionCode::ServerUnicast,
            Self::StatusCode(_) => DhcpV6OptionCode::StatusCode,
            Self::RapidCommit => DhcpV6OptionCode::RapidCommit,
            Self::UserClass(_) => DhcpV6OptionCode::UserClass,
            Self::VendorClass(_) => DhcpV6OptionCode::VendorClass,
            Self::VendorOpts(_) => DhcpV6OptionCode::VendorOpts,
            Self::ReconfigureAccept => DhcpV6OptionCode::ReconfigureAccept,
            Self::DnsServers(_) => DhcpV6OptionCode::DnsServers,
            Self::DomainList(_) => DhcpV6OptionCode::DomainList,
            Self::Fqdn(_, _) => DhcpV6OptionCode::Fqdn,
            Self::NtpServer(_) => DhcpV6OptionCode::NtpServer,
            Self::Unknown(u) => DhcpV6OptionCode::Other(u.code),
        }
    }

    pub(crate) fn parse(buf: &mut Buffer) -> Result<DhcpV6Option, DhcpError> {
        let code: DhcpV6OptionCode = buf
            .peek_u16_be()
            .context("Invalid DHCPv6 option code")?
            .into();
        let len: usize = buf
            .peek_u16_be_offset(2)
            .context("Invalid DHCPv6 option length")?
            .into();
        let opt_raw = buf.get_bytes(len + 4).context(
            format!("Invalid DHCPv6 option {code} with length {len}")
                .as_str(),
        )?;
        let mut opt_buf = Buffer::new(opt_raw);

        Ok(match code {
            DhcpV6OptionCode::IAAddr => {
                Self::IAAddr(DhcpV6OptionIaAddr::parse(&mut opt_buf)?)
            }
            DhcpV6OptionCode::IAPrefix => {
                Self::IAPrefix(DhcpV6OptionIaPrefix::parse(&mut opt_buf)?)
            }
            DhcpV6OptionCode::ClientId => {
                skip_option_header(&mut opt_buf)?;
                Self::ClientId(DhcpV6Duid::parse(&mut opt_buf, len)?)
            }
            DhcpV6OptionCode::ServerId => {
                skip_option_header(&mut opt_buf)?;
                Self::ServerId(DhcpV6Duid::parse(&mut opt_buf, len)?)
            }
            DhcpV6OptionCode::IANA => {
                Self::IANA(DhcpV6OptionIaNa::parse(&mut opt_buf)?)
            }
            DhcpV6OptionCode::IATA => {
                Self::IATA(DhcpV6OptionIaTa::parse(&mut opt_buf)?)
            }
            DhcpV6OptionCode::IAPD => {
                Self::IAPD(DhcpV6OptionIaPd::parse(&mut opt_buf)?)
            }
            DhcpV6OptionCode::OptionRequestOption => {
                skip_option_header(&mut opt_buf)?;
                let mut opts: Vec<DhcpV6OptionCode> = Vec::new();
                for _ in 0..len / 2 {
                    opts.push(
                        opt_buf
                            .get_u16_be()
                            .context("Invalid DHCPv6 option OPTION_ORO")?
                            .into(),
                    );
                }
                Self::OptionRequestOption(opts)
            }
            DhcpV6OptionCode::Preference => Self::Preference({
                skip_option_header(&mut opt_buf)?;
                opt_buf
                    .get_u8()
                    .context("Invalid DHCPv6 option OPTION_PREFERENCE")?
            }),
            DhcpV6OptionCode::ElapsedTime => Self::ElapsedTime({
                skip_option_header(&mut opt_buf)?;
                opt_buf
                    .get_u16_be()
                    .context("Invalid DHCPv6 option OPTION_ELAPSED_TIME")?
            }),
            DhcpV6OptionCode::ServerUnicast => Self::ServerUnicast({
                skip_option_header(&mut opt_buf)?;
                opt_buf
                    .get_ipv6()
                    .context("Invalid DHCPv6 option OPTION_UNICAST")?
            }),
            DhcpV6OptionCode::StatusCode => {
                Self::StatusCode(DhcpV6OptionStatus::parse(&mut opt_buf)?)
            }
            DhcpV6OptionCode::RapidCommit => {
                skip_option_header(&mut opt_buf)?;
                Self::RapidCommit
            }
            DhcpV6OptionCode::ReconfigureAccept => {
                skip_option_header(&mut opt_buf)?;
                Self::ReconfigureAccept
            }
            DhcpV6OptionCode::UserClass => {
                skip_option_header(&mut opt_buf)?;
                let mut classes = Vec::new();
                while !opt_buf.is_empty() {
                    let class_len = opt_buf.get_u16_be().context(
                        "Invalid DHCPv6 option OPTION_USER_CLASS length",
                    )?;
                    classes.push(
                        opt_buf
                            .get_string_without_null(class_len.into())
                            .context(
                                "Invalid DHCPv6 option OPTION_USER_CLASS \
                                 instance",
                            )?,
                    );
                }
                Self::UserClass(classes)
            }
            DhcpV6OptionCode::VendorClass => {
                skip_option_header(&mut opt_buf)?;
                Self::VendorClass(DhcpV6OptionVendorClass::parse(
                    &mut opt_buf,
                )?)
            }
            DhcpV6OptionCode::VendorOpts => {
                skip_option_header(&mut opt_buf)?;
                Self::VendorOpts(DhcpV6OptionVendorOpts::parse(&mut opt_buf)?)
            }
            DhcpV6OptionCode::DnsServers => {
                skip_option_header(&mut opt_buf)?;
                let mut addrs = Vec::new();
                for _ in 0..len / 16 {
                    addrs.push(opt_buf.get_ipv6().context(
                        "Invalid DHCPv6 option OPTION_DNS_SERVERS",
                    )?);
                }
                Self::DnsServers(addrs)
            }
            DhcpV6OptionCode::DomainList => {
                skip_option_header(&mut opt_buf)?;
                let mut domains = Vec::new();
                while !opt_buf.is_empty() {
                    domains.push(parse_domain_name(&mut opt_buf)?);
                }
                Self::DomainList(domains)
            }
            DhcpV6OptionCode::Fqdn => {
                skip_option_header(&mut opt_buf)?;
                let flags = opt_buf
                    .get_u8()
                    .context("Invalid DHCPv6 option OPTION_CLIENT_FQDN")?;
                let domain = if opt_buf.is_empty() {
                    String::new()
                } else {
                    parse_domain_name(&mut opt_buf)?
                };
                Self::Fqdn(flags, domain)
            }
            DhcpV6OptionCode::NtpServer => {
                skip_option_header(&mut opt_buf)?;
                let mut srvs: Vec<DhcpV6OptionNtpServer> = Vec::new();
                while !opt_buf.is_empty() {
                    srvs.push(DhcpV6OptionNtpServer::parse(&mut opt_buf)?);
                }
                Self::NtpServer(srvs)
            }
            DhcpV6OptionCode::Other(d) => Self::Unknown({
                skip_option_header(&mut opt_buf)?;
                DhcpV6OptionUnknown {
                    code: d,
                    raw: opt_buf
                        .get_bytes(len)
                        .context(
                            format!("Invalid DHCPv6 option {d}").as_str(),
                        )?
                        .to_vec(),
                }
            }),
        })
    }

    pub(crate) fn emit(&self, buf: &mut BufferMut) {
        match self {
            Self::ClientId(duid) | Self::ServerId(duid) => {
                let raw = duid.to_vec();
                buf.write_u16_be(self.code().into());
                buf.write_u16_be(raw.len() as u16);
                buf.write_bytes(raw.as_slice());
            }
            Self::IANA(v) => v.emit(buf),
            Self::IATA(v) => v.emit(buf),
            Self::IAPD(v) => v.emit(buf),
            Self::IAAddr(v) => v.emit(buf),
            Self::IAPrefix(v) => v.emit(buf),
            Self::OptionRequestOption(codes) => {
                buf.write_u16_be(self.code().into());
                buf.write_u16_be((codes.len() * 2) as u16);
                for code in codes {
                    buf.write_u16_be((*code).into());
                }
            }
            Self::Preference(v) => {
                buf.write_u16_be(self.code().into());
                buf.write_u16_be(1);
                buf.write_u8(*v);
            }
            Self::ElapsedTime(v) => {
                buf.write_u16_be(self.code().into());
                buf.write_u16_be(2);
                buf.write_u16_be(*v);
            }
            Self::ServerUnicast(v) => {
                buf.write_u16_be(self.code().into());
                buf.write_u16_be(16);
                buf.write_ipv6(*v);
            }
            Self::StatusCode(v) => v.emit(buf),
            Self::RapidCommit | Self::ReconfigureAccept => {
                buf.write_u16_be(self.code().into());
                buf.write_u16_be(0);
            }
            Self::UserClass(classes) => {
                let mut value_buf = BufferMut::new();
                for class in classes {
                    value_buf.write_u16_be(class.len() as u16);
                    value_buf.write_string_without_null(class);
                }
                buf.write_u16_be(self.code().into());
                buf.write_u16_be(value_buf.len() as u16);
                buf.write_bytes(&value_buf.data);
            }
            Self::VendorClass(v) => {
                let mut value_buf = BufferMut::new();
                v.emit(&mut value_buf);
                buf.write_u16_be(self.code().into());
                buf.write_u16_be(value_buf.len() as u16);
                buf.write_bytes(&value_buf.data);
            }
            Self::VendorOpts(v) => {
                let mut value_buf = BufferMut::new();
                v.emit(&mut value_buf);
                buf.write_u16_be(self.code().into());
                buf.write_u16_be(value_buf.len() as u16);
                buf.write_bytes(&value_buf.data);
            }
            Self::DnsServers(addrs) => {
                buf.write_u16_be(self.code().into());
                buf.write_u16_be((addrs.len() * 16) as u16);
                for addr in addrs {
                    buf.write_ipv6(*addr);
                }
            }
            Self::DomainList(domains) => {
                let mut value_buf = BufferMut::new();
                for domain in domains {
                    emit_domain_name(domain, &mut value_buf);
                }
                buf.write_u16_be(self.code().into());
                buf.write_u16_be(value_buf.len() as u16);
                buf.write_bytes(&value_buf.data);
            }
            Self::Fqdn(flags, domain) => {
                let mut value_buf = BufferMut::new();
                value_buf.write_u8(*flags);
                if !domain.is_empty() {
                    emit_domain_name(domain, &mut value_buf);
                }
                buf.write_u16_be(self.code().into());
                buf.write_u16_be(value_buf.len() as u16);
                buf.write_bytes(&value_buf.data);
            }
            Self::NtpServer(srvs) => {
                let mut value_buf = BufferMut::new();
                for srv in srvs {
                    srv.emit(&mut value_buf);
                }
                buf.write_u16_be(self.code().into());
                buf.write_u16_be(value_buf.len() as u16);
                buf.write_bytes(&value_buf.data);
            }
            Self::Unknown(v) => {
                buf.write_u16_be(v.code);
                buf.write_u16_be(v.raw.len() as u16);
                buf.write_bytes(v.raw.as_slice());
            }
        }
    }
}

fn skip_option_header(buf: &mut Buffer) -> Result<(), DhcpError> {
    buf.get_u16_be().context("Invalid DHCPv6 option code")?;
    buf.get_u16_be().context("Invalid DHCPv6 option length")?;
    Ok(())
}

// Verify the leading option code against the expectation and return the
// option payload as an owned byte vector.
pub(crate) fn get_option_payload(
    buf: &mut Buffer,
    expected: DhcpV6OptionCode,
) -> Result<Vec<u8>, DhcpError> {
    let code = buf.get_u16_be().context("Invalid DHCPv6 option code")?;
    if code != expected.into() {
        return Err(DhcpError::new(
            ErrorKind::InvalidDhcpMessage,
            format!(
                "Expecting DHCPv6 option {expected} code {}, got {code}",
                u16::from(expected),
            ),
        ));
    }
    let len = buf.get_u16_be().context("Invalid DHCPv6 option len")?;
    Ok(buf
        .get_bytes(len.into())
        .context(format!("Invalid DHCPv6 option {expected}").as_str())?
        .to_vec())
}

// RFC 1035 3.1: a domain name is a sequence of labels, each a one octet
// length followed by that many octets, terminated by the zero length root
// label.
fn parse_domain_name(buf: &mut Buffer) -> Result<String, DhcpError> {
    let mut labels: Vec<String> = Vec::new();
    loop {
        let label_len = buf
            .get_u8()
            .context("Invalid domain name label length")?;
        if label_len == 0 {
            break;
        }
        if label_len > 63 {
            return Err(DhcpError::new(
                ErrorKind::InvalidDhcpMessage,
                format!("Invalid domain name label length {label_len}"),
            ));
        }
        labels.push(
            buf.get_string_without_null(label_len.into())
                .context("Invalid domain name label")?,
        );
    }
    Ok(labels.join("."))
}

fn emit_domain_name(domain: &str, buf: &mut BufferMut) {
    for label in domain.split('.').filter(|l| !l.is_empty()) {
        buf.write_u8(label.len() as u8);
        buf.write_string_without_null(label);
    }
    buf.write_u8(0);
}

/// RFC 3315 22.16. Vendor Class Option
#[derive(Debug, PartialEq, Eq, Clone, Default)]
#[non_exhaustive]
pub struct DhcpV6OptionVendorClass {
    pub enterprise_number: u32,
    pub data: Vec<String>,
}

impl DhcpV6OptionVendorClass {
    pub fn new(enterprise_number: u32, data: Vec<String>) -> Self {
        Self {
            enterprise_number,
            data,
        }
    }

    fn parse(buf: &mut Buffer) -> Result<Self, DhcpError> {
        let mut ret = Self {
            enterprise_number: buf.get_u32_be().context(
                "Invalid DHCPv6 option OPTION_VENDOR_CLASS enterprise number",
            )?,
            data: Vec::new(),
        };
        while !buf.is_empty() {
            let data_len = buf.get_u16_be().context(
                "Invalid DHCPv6 option OPTION_VENDOR_CLASS data length",
            )?;
            ret.data.push(
                buf.get_string_without_null(data_len.into()).context(
                    "Invalid DHCPv6 option OPTION_VENDOR_CLASS data",
                )?,
            );
        }
        Ok(ret)
    }

    fn emit(&self, buf: &mut BufferMut) {
        buf.write_u32_be(self.enterprise_number);
        for data in &self.data {
            buf.write_u16_be(data.len() as u16);
            buf.write_string_without_null(data);
        }
    }
}

/// RFC 3315 22.17. Vendor-specific Information Option. Vendor options are
/// carried as numeric code and opaque value pairs.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
#[non_exhaustive]
pub struct DhcpV6OptionVendorOpts {
    pub enterprise_number: u32,
    pub opts: Vec<(u16, Vec<u8>)>,
}

impl DhcpV6OptionVendorOpts {
    pub fn new(enterprise_number: u32, opts: Vec<(u16, Vec<u8>)>) -> Self {
        Self {
            enterprise_number,
            opts,
        }
    }

    fn parse(buf: &mut Buffer) -> Result<Self, DhcpError> {
        let mut ret = Self {
            enterprise_number: buf.get_u32_be().context(
                "Invalid DHCPv6 option OPTION_VENDOR_OPTS enterprise number",
            )?,
            opts: Vec::new(),
        };
        while !buf.is_empty() {
            let opt_code = buf.get_u16_be().context(
                "Invalid DHCPv6 option OPTION_VENDOR_OPTS sub-option code",
            )?;
            let opt_len = buf.get_u16_be().context(
                "Invalid DHCPv6 option OPTION_VENDOR_OPTS sub-option length",
            )?;
            ret.opts.push((
                opt_code,
                buf.get_bytes(opt_len.into())
                    .context(
                        "Invalid DHCPv6 option OPTION_VENDOR_OPTS sub-option",
                    )?
                    .to_vec(),
            ));
        }
        Ok(ret)
    }

    fn emit(&self, buf: &mut BufferMut) {
        buf.write_u32_be(self.enterprise_number);
        for (code, data) in &self.opts {
            buf.write_u16_be(*code);
            buf.write_u16_be(data.len() as u16);
            buf.write_bytes(data.as_slice());
        }
    }
}

/// RFC 5908 NTP Server Option sub-options.
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum DhcpV6OptionNtpServer {
    ServerAddress(Ipv6Addr),
    MulticastAddress(Ipv6Addr),
    ServerFqdn(String),
    Unknown(DhcpV6OptionUnknown),
}

const NTP_SUBOPTION_SRV_ADDR: u16 = 1;
const NTP_SUBOPTION_MC_ADDR: u16 = 2;
const NTP_SUBOPTION_SRV_FQDN: u16 = 3;

impl DhcpV6OptionNtpServer {
    fn parse(buf: &mut Buffer) -> Result<Self, DhcpError> {
        let code = buf
            .get_u16_be()
            .context("Invalid DHCPv6 OPTION_NTP_SERVER sub-option code")?;
        let len = buf
            .get_u16_be()
            .context("Invalid DHCPv6 OPTION_NTP_SERVER sub-option length")?;
        match code {
            NTP_SUBOPTION_SRV_ADDR | NTP_SUBOPTION_MC_ADDR => {
                if len != 16 {
                    return Err(DhcpError::new(
                        ErrorKind::InvalidDhcpMessage,
                        format!(
                            "Invalid DHCPv6 NTP address sub-option length \
                             {len}, expecting 16"
                        ),
                    ));
                }
                let addr = buf
                    .get_ipv6()
                    .context("Invalid DHCPv6 NTP server address")?;
                if code == NTP_SUBOPTION_SRV_ADDR {
                    Ok(Self::ServerAddress(addr))
                } else {
                    Ok(Self::MulticastAddress(addr))
                }
            }
            NTP_SUBOPTION_SRV_FQDN => {
                let raw = buf
                    .get_bytes(len.into())
                    .context("Invalid DHCPv6 NTP server FQDN")?;
                let mut fqdn_buf = Buffer::new(raw);
                Ok(Self::ServerFqdn(parse_domain_name(&mut fqdn_buf)?))
            }
            _ => Ok(Self::Unknown(DhcpV6OptionUnknown {
                code,
                raw: buf
                    .get_bytes(len.into())
                    .context("Invalid DHCPv6 NTP sub-option")?
                    .to_vec(),
            })),
        }
    }

    fn emit(&self, buf: &mut BufferMut) {
        match self {
            Self::ServerAddress(addr) => {
                buf.write_u16_be(NTP_SUBOPTION_SRV_ADDR);
                buf.write_u16_be(16);
                buf.write_ipv6(*addr);
            }
            Self::MulticastAddress(addr) => {
                buf.write_u16_be(NTP_SUBOPTION_MC_ADDR);
                buf.write_u16_be(16);
                buf.write_ipv6(*addr);
            }
            Self::ServerFqdn(fqdn) => {
                let mut fqdn_buf = BufferMut::new();
                emit_domain_name(fqdn, &mut fqdn_buf);
                buf.write_u16_be(NTP_SUBOPTION_SRV_FQDN);
                buf.write_u16_be(fqdn_buf.len() as u16);
                buf.write_bytes(&fqdn_buf.data);
            }
            Self::Unknown(v) => {
                buf.write_u16_be(v.code);
                buf.write_u16_be(v.raw.len() as u16);
                buf.write_bytes(v.raw.as_slice());
            }
        }
    }
}

/// Option unknown to this crate, preserved as opaque bytes.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
#[non_exhaustive]
pub struct DhcpV6OptionUnknown {
    pub code: u16,
    pub raw: Vec<u8>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_preference() -> Result<(), DhcpError> {
        let raw = &[0x00, 0x07, 0x00, 0x01, 0xff];
        let mut buf = Buffer::new(raw);
        let opt = DhcpV6Option::parse(&mut buf)?;
        assert_eq!(opt, DhcpV6Option::Preference(255));

        let mut buf = BufferMut::new();
        opt.emit(&mut buf);
        assert_eq!(buf.data.as_slice(), raw);
        Ok(())
    }

    #[test]
    fn parse_domain_list() -> Result<(), DhcpError> {
        let raw = &[
            0x00, 0x18, 0x00, 0x12, 0x07, 0x65, 0x78, 0x61, 0x6d, 0x70, 0x6c,
            0x65, 0x03, 0x63, 0x6f, 0x6d, 0x00, 0x03, 0x6c, 0x61, 0x62, 0x00,
        ];
        let mut buf = Buffer::new(raw);
        let opt = DhcpV6Option::parse(&mut buf)?;
        assert_eq!(
            opt,
            DhcpV6Option::DomainList(vec![
                "example.com".to_string(),
                "lab".to_string()
            ])
        );

        let mut buf = BufferMut::new();
        opt.emit(&mut buf);
        assert_eq!(buf.data.as_slice(), raw);
        Ok(())
    }

    #[test]
    fn vendor_class_round_trip() -> Result<(), DhcpError> {
        let opt = DhcpV6Option::VendorClass(DhcpV6OptionVendorClass::new(
            7075,
            vec!["mirzam/0.1.0".to_string()],
        ));
        let mut buf = BufferMut::new();
        opt.emit(&mut buf);

        let parsed =
            DhcpV6Option::parse(&mut Buffer::new(buf.data.as_slice()))?;
        assert_eq!(parsed, opt);
        Ok(())
    }

    #[test]
    fn vendor_opts_round_trip() -> Result<(), DhcpError> {
        let opt = DhcpV6Option::VendorOpts(DhcpV6OptionVendorOpts::new(
            7075,
            vec![(1, b"one".to_vec()), (7, b"seven".to_vec())],
        ));
        let mut buf = BufferMut::new();
        opt.emit(&mut buf);

        let parsed =
            DhcpV6Option::parse(&mut Buffer::new(buf.data.as_slice()))?;
        assert_eq!(parsed, opt);
        Ok(())
    }

    #[test]
    fn user_class_round_trip() -> Result<(), DhcpError> {
        let opt = DhcpV6Option::UserClass(vec![
            "rack-12".to_string(),
            "pdu-3".to_string(),
        ]);
        let mut buf = BufferMut::new();
        opt.emit(&mut buf);

        let parsed =
            DhcpV6Option::parse(&mut Buffer::new(buf.data.as_slice()))?;
        assert_eq!(parsed, opt);
        Ok(())
    }

    #[test]
    fn fqdn_round_trip() -> Result<(), DhcpError> {
        let opt = DhcpV6Option::Fqdn(0x01, "host1.example.com".to_string());
        let mut buf = BufferMut::new();
        opt.emit(&mut buf);

        let parsed =
            DhcpV6Option::parse(&mut Buffer::new(buf.data.as_slice()))?;
        assert_eq!(parsed, opt);
        Ok(())
    }

    #[test]
    fn unknown_option_preserved() -> Result<(), DhcpError> {
        let raw = &[0x01, 0x99, 0x00, 0x03, 0x0a, 0x0b, 0x0c];
        let mut buf = Buffer::new(raw);
        let opt = DhcpV6Option::parse(&mut buf)?;
        assert_eq!(
            opt,
            DhcpV6Option::Unknown(DhcpV6OptionUnknown {
                code: 0x0199,
                raw: vec![0x0a, 0x0b, 0x0c],
            })
        );

        let mut buf = BufferMut::new();
        opt.emit(&mut buf);
        assert_eq!(buf.data.as_slice(), raw);
        Ok(())
    }
}
