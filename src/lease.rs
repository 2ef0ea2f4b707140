// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv6Addr;

use crate::{
    option::DhcpV6Options, time::BootTime, DhcpError, DhcpV6Duid,
    DhcpV6IaType, DhcpV6Message, DhcpV6Option, DhcpV6OptionCode,
    DhcpV6OptionIaAddr, DhcpV6OptionIaPrefix, DhcpV6OptionNtpServer,
    ErrorKind,
};

/// One identity association granted by the server.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
#[non_exhaustive]
pub struct DhcpV6LeaseIa {
    pub ia_type: DhcpV6IaType,
    pub iaid: u32,
    pub t1_sec: u32,
    pub t2_sec: u32,
    pub addresses: Vec<DhcpV6OptionIaAddr>,
    pub prefixes: Vec<DhcpV6OptionIaPrefix>,
}

impl DhcpV6LeaseIa {
    fn min_preferred_sec(&self) -> u32 {
        self.addresses
            .iter()
            .map(|a| a.preferred_time_sec)
            .chain(self.prefixes.iter().map(|p| p.preferred_time_sec))
            .filter(|t| *t > 0)
            .min()
            .unwrap_or(0)
    }

    fn min_valid_sec(&self) -> u32 {
        self.addresses
            .iter()
            .map(|a| a.valid_time_sec)
            .chain(self.prefixes.iter().map(|p| p.valid_time_sec))
            .filter(|t| *t > 0)
            .min()
            .unwrap_or(0)
    }

    // RFC 3315 22.4: T1 and T2 of zero leave the renew and rebind times to
    // the discretion of the client.
    fn apply_default_times(&mut self) {
        let preferred = self.min_preferred_sec();
        if self.t1_sec == 0 && preferred != 0 {
            self.t1_sec = preferred / 2;
        }
        if self.t2_sec == 0 && preferred != 0 {
            self.t2_sec = preferred / 5 * 4;
        }
    }

    fn sanitize(&self) -> Result<(), DhcpError> {
        if self.t2_sec != 0 && self.t1_sec > self.t2_sec {
            return Err(DhcpError::new(
                ErrorKind::InvalidDhcpMessage,
                format!(
                    "DHCPv6 {} {:#x} contains T1({} secs) bigger than T2({} \
                     secs)",
                    self.ia_type, self.iaid, self.t1_sec, self.t2_sec
                ),
            ));
        }
        for addr in &self.addresses {
            if addr.preferred_time_sec > addr.valid_time_sec {
                return Err(DhcpError::new(
                    ErrorKind::InvalidDhcpMessage,
                    format!(
                        "DHCPv6 address {} contains preferred({} secs) \
                         bigger than valid({} secs)",
                        addr.address,
                        addr.preferred_time_sec,
                        addr.valid_time_sec
                    ),
                ));
            }
        }
        for prefix in &self.prefixes {
            if prefix.preferred_time_sec > prefix.valid_time_sec {
                return Err(DhcpError::new(
                    ErrorKind::InvalidDhcpMessage,
                    format!(
                        "DHCPv6 prefix {}/{} contains preferred({} secs) \
                         bigger than valid({} secs)",
                        prefix.prefix,
                        prefix.prefix_len,
                        prefix.preferred_time_sec,
                        prefix.valid_time_sec
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Address configuration record extracted from a server Advertise or Reply.
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub struct DhcpV6Lease {
    /// UUID of the acquire request this lease answers.
    pub uuid: u128,
    pub xid: u32,
    pub ias: Vec<DhcpV6LeaseIa>,
    pub cli_duid: DhcpV6Duid,
    pub srv_duid: DhcpV6Duid,
    /// Source address of the server message.
    pub srv_ip: Ipv6Addr,
    /// RFC 3315 22.12 Server Unicast option, when the server allows
    /// unicast Renew/Release/Decline.
    pub srv_unicast: Option<Ipv6Addr>,
    pub preference: u8,
    pub acquired_at: BootTime,
    /// Lease of an Information-request flow, carries options only.
    pub info_only: bool,
    dhcp_opts: DhcpV6Options,
}

impl Default for DhcpV6Lease {
    fn default() -> Self {
        Self {
            uuid: 0,
            xid: 0,
            ias: Vec::new(),
            cli_duid: DhcpV6Duid::default(),
            srv_duid: DhcpV6Duid::default(),
            srv_ip: Ipv6Addr::UNSPECIFIED,
            srv_unicast: None,
            preference: 0,
            acquired_at: BootTime::default(),
            info_only: false,
            dhcp_opts: DhcpV6Options::default(),
        }
    }
}

impl DhcpV6Lease {
    pub(crate) fn new_from_msg(
        msg: &DhcpV6Message,
        srv_ip: Ipv6Addr,
        uuid: u128,
        info_only: bool,
    ) -> Result<Self, DhcpError> {
        let mut ret = Self {
            uuid,
            xid: msg.xid(),
            srv_ip,
            info_only,
            acquired_at: BootTime::now(),
            dhcp_opts: msg.options.clone(),
            ..Default::default()
        };

        if let Some(DhcpV6Option::StatusCode(v)) =
            msg.get_option_first(DhcpV6OptionCode::StatusCode)
        {
            if !v.is_success() {
                return Err(v.to_error());
            }
        }

        if let Some(DhcpV6Option::ClientId(v)) =
            msg.get_option_first(DhcpV6OptionCode::ClientId)
        {
            ret.cli_duid = v.clone();
        }
        if let Some(DhcpV6Option::ServerId(v)) =
            msg.get_option_first(DhcpV6OptionCode::ServerId)
        {
            ret.srv_duid = v.clone();
        }
        if let Some(DhcpV6Option::ServerUnicast(v)) =
            msg.get_option_first(DhcpV6OptionCode::ServerUnicast)
        {
            ret.srv_unicast = Some(*v);
        }
        if let Some(DhcpV6Option::Preference(v)) =
            msg.get_option_first(DhcpV6OptionCode::Preference)
        {
            ret.preference = *v;
        }

        for opt in msg.get_options(DhcpV6OptionCode::IANA) {
            if let DhcpV6Option::IANA(v) = opt {
                if !v.is_success() {
                    log_ia_failure(DhcpV6IaType::NonTemporaryAddresses, opt);
                    continue;
                }
                let mut ia = DhcpV6LeaseIa {
                    ia_type: DhcpV6IaType::NonTemporaryAddresses,
                    iaid: v.iaid,
                    t1_sec: v.t1_sec,
                    t2_sec: v.t2_sec,
                    addresses: v.addresses.clone(),
                    prefixes: Vec::new(),
                };
                ia.apply_default_times();
                ret.ias.push(ia);
            }
        }
        for opt in msg.get_options(DhcpV6OptionCode::IATA) {
            if let DhcpV6Option::IATA(v) = opt {
                if !v.is_success() {
                    log_ia_failure(DhcpV6IaType::TemporaryAddresses, opt);
                    continue;
                }
                ret.ias.push(DhcpV6LeaseIa {
                    ia_type: DhcpV6IaType::TemporaryAddresses,
                    iaid: v.iaid,
                    t1_sec: 0,
                    t2_sec: 0,
                    addresses: v.addresses.clone(),
                    prefixes: Vec::new(),
                });
            }
        }
        for opt in msg.get_options(DhcpV6OptionCode::IAPD) {
            if let DhcpV6Option::IAPD(v) = opt {
                if !v.is_success() {
                    log_ia_failure(DhcpV6IaType::PrefixDelegation, opt);
                    continue;
                }
                let mut ia = DhcpV6LeaseIa {
                    ia_type: DhcpV6IaType::PrefixDelegation,
                    iaid: v.iaid,
                    t1_sec: v.t1_sec,
                    t2_sec: v.t2_sec,
                    addresses: Vec::new(),
                    prefixes: v.prefixes.clone(),
                };
                ia.apply_default_times();
                ret.ias.push(ia);
            }
        }

        ret.sanitize()?;
        Ok(ret)
    }

    fn sanitize(&self) -> Result<(), DhcpError> {
        if self.srv_duid.is_empty() {
            return Err(DhcpError::new(
                ErrorKind::InvalidDhcpMessage,
                "DHCPv6 lease contains empty server DUID".to_string(),
            ));
        }
        if !self.info_only
            && self
                .ias
                .iter()
                .all(|ia| ia.addresses.is_empty() && ia.prefixes.is_empty())
        {
            return Err(DhcpError::new(
                ErrorKind::NoLease,
                "DHCPv6 server granted no address and no prefix".to_string(),
            ));
        }
        for ia in &self.ias {
            ia.sanitize()?;
        }
        Ok(())
    }

    /// Earliest renewal time across the granted IAs, zero when unknown.
    pub fn t1_sec(&self) -> u32 {
        self.ias
            .iter()
            .map(|ia| ia.t1_sec)
            .filter(|t| *t > 0)
            .min()
            .unwrap_or(0)
    }

    /// Earliest rebind time across the granted IAs, zero when unknown.
    pub fn t2_sec(&self) -> u32 {
        self.ias
            .iter()
            .map(|ia| ia.t2_sec)
            .filter(|t| *t > 0)
            .min()
            .unwrap_or(0)
    }

    /// Earliest valid lifetime end across all addresses and prefixes.
    pub fn valid_sec(&self) -> u32 {
        self.ias
            .iter()
            .map(|ia| ia.min_valid_sec())
            .filter(|t| *t > 0)
            .min()
            .unwrap_or(0)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &DhcpV6OptionIaAddr> {
        self.ias.iter().flat_map(|ia| ia.addresses.iter())
    }

    /// Whether the lease still has valid lifetime left.
    pub fn is_valid(&self) -> bool {
        if self.info_only {
            return true;
        }
        let valid = self.valid_sec();
        valid > 0
            && self.acquired_at.is_set()
            && self.acquired_at.elapsed_millis() / 1000 < valid as u64
    }

    /// Raw payload of the given option code as carried in the server
    /// message, for host consumption of options this crate does not type.
    pub fn get_option_raw(&self, code: u16) -> Option<Vec<Vec<u8>>> {
        self.dhcp_opts.get_data_raw(code)
    }

    pub fn dns_servers(&self) -> Vec<Ipv6Addr> {
        if let Some(DhcpV6Option::DnsServers(v)) =
            self.dhcp_opts.get_first(DhcpV6OptionCode::DnsServers)
        {
            v.clone()
        } else {
            Vec::new()
        }
    }

    pub fn domain_search(&self) -> Vec<String> {
        if let Some(DhcpV6Option::DomainList(v)) =
            self.dhcp_opts.get_first(DhcpV6OptionCode::DomainList)
        {
            v.clone()
        } else {
            Vec::new()
        }
    }

    pub fn ntp_servers(&self) -> Vec<DhcpV6OptionNtpServer> {
        if let Some(DhcpV6Option::NtpServer(v)) =
            self.dhcp_opts.get_first(DhcpV6OptionCode::NtpServer)
        {
            v.clone()
        } else {
            Vec::new()
        }
    }

}

fn log_ia_failure(ia_type: DhcpV6IaType, opt: &DhcpV6Option) {
    log::info!(
        "DHCPv6 server reported failure for {ia_type} option: {opt:?}"
    );
}

/// Highest weighted Advertise collected while Selecting.
#[derive(Debug, Clone, Default)]
pub(crate) struct DhcpV6BestOffer {
    pub(crate) lease: Option<DhcpV6Lease>,
    pub(crate) weight: i32,
}

impl DhcpV6BestOffer {
    pub(crate) fn new() -> Self {
        Self {
            lease: None,
            weight: -1,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.lease = None;
        self.weight = -1;
    }

    /// Keep the offer when it beats the current one, ties are broken by
    /// earliest arrival.
    pub(crate) fn update(&mut self, lease: DhcpV6Lease, weight: i32) -> bool {
        if weight > self.weight {
            self.lease = Some(lease);
            self.weight = weight;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;
    use crate::{
        msg::DhcpV6MessageType, DhcpV6DuidUuid, DhcpV6OptionIaNa,
        DhcpV6OptionStatus, DhcpV6OptionStatusCode,
    };

    fn reply_msg() -> DhcpV6Message {
        let mut msg = DhcpV6Message::new(DhcpV6MessageType::Reply, 0x123456);
        msg.add_option(DhcpV6Option::ClientId(DhcpV6Duid::UUID(
            DhcpV6DuidUuid::new(0x01),
        )));
        msg.add_option(DhcpV6Option::ServerId(DhcpV6Duid::UUID(
            DhcpV6DuidUuid::new(0x02),
        )));
        let mut ia = DhcpV6OptionIaNa::new(0x00112233, 100, 200);
        ia.addresses.push(DhcpV6OptionIaAddr::new(
            Ipv6Addr::from_str("2001:db8::1").unwrap(),
            300,
            600,
        ));
        msg.add_option(DhcpV6Option::IANA(ia));
        msg
    }

    #[test]
    fn lease_from_reply() {
        let lease = DhcpV6Lease::new_from_msg(
            &reply_msg(),
            Ipv6Addr::from_str("fe80::1").unwrap(),
            7,
            false,
        )
        .unwrap();
        assert_eq!(lease.uuid, 7);
        assert_eq!(lease.xid, 0x123456);
        assert_eq!(lease.t1_sec(), 100);
        assert_eq!(lease.t2_sec(), 200);
        assert_eq!(lease.valid_sec(), 600);
        assert_eq!(lease.ias.len(), 1);
        assert!(lease.is_valid());
    }

    #[test]
    fn zero_t1_t2_default_from_preferred() {
        let mut msg = DhcpV6Message::new(DhcpV6MessageType::Reply, 1);
        msg.add_option(DhcpV6Option::ServerId(DhcpV6Duid::UUID(
            DhcpV6DuidUuid::new(0x02),
        )));
        let mut ia = DhcpV6OptionIaNa::new(1, 0, 0);
        ia.addresses.push(DhcpV6OptionIaAddr::new(
            Ipv6Addr::from_str("2001:db8::1").unwrap(),
            1000,
            2000,
        ));
        msg.add_option(DhcpV6Option::IANA(ia));

        let lease = DhcpV6Lease::new_from_msg(
            &msg,
            Ipv6Addr::UNSPECIFIED,
            1,
            false,
        )
        .unwrap();
        assert_eq!(lease.t1_sec(), 500);
        assert_eq!(lease.t2_sec(), 800);
    }

    #[test]
    fn rejected_status_code_surfaces_as_server_rejected() {
        let mut msg = DhcpV6Message::new(DhcpV6MessageType::Reply, 1);
        msg.add_option(DhcpV6Option::StatusCode(DhcpV6OptionStatus {
            status: DhcpV6OptionStatusCode::NoAddrsAvail,
            message: "out of addresses".to_string(),
        }));
        let e = DhcpV6Lease::new_from_msg(
            &msg,
            Ipv6Addr::UNSPECIFIED,
            1,
            false,
        )
        .unwrap_err();
        assert_eq!(
            e.kind(),
            &ErrorKind::ServerRejected(DhcpV6OptionStatusCode::NoAddrsAvail)
        );
    }

    #[test]
    fn lease_without_address_is_rejected() {
        let mut msg = DhcpV6Message::new(DhcpV6MessageType::Reply, 1);
        msg.add_option(DhcpV6Option::ServerId(DhcpV6Duid::UUID(
            DhcpV6DuidUuid::new(0x02),
        )));
        msg.add_option(DhcpV6Option::IANA(DhcpV6OptionIaNa::new(1, 1, 2)));
        let e = DhcpV6Lease::new_from_msg(
            &msg,
            Ipv6Addr::UNSPECIFIED,
            1,
            false,
        )
        .unwrap_err();
        assert_eq!(e.kind(), &ErrorKind::NoLease);
    }

    #[test]
    fn t1_bigger_than_t2_is_invalid() {
        let mut msg = DhcpV6Message::new(DhcpV6MessageType::Reply, 1);
        msg.add_option(DhcpV6Option::ServerId(DhcpV6Duid::UUID(
            DhcpV6DuidUuid::new(0x02),
        )));
        let mut ia = DhcpV6OptionIaNa::new(1, 300, 200);
        ia.addresses.push(DhcpV6OptionIaAddr::new(
            Ipv6Addr::from_str("2001:db8::1").unwrap(),
            300,
            600,
        ));
        msg.add_option(DhcpV6Option::IANA(ia));
        let e = DhcpV6Lease::new_from_msg(
            &msg,
            Ipv6Addr::UNSPECIFIED,
            1,
            false,
        )
        .unwrap_err();
        assert_eq!(e.kind(), &ErrorKind::InvalidDhcpMessage);
    }

    #[test]
    fn best_offer_keeps_highest_weight() {
        let lease = DhcpV6Lease::new_from_msg(
            &reply_msg(),
            Ipv6Addr::UNSPECIFIED,
            1,
            false,
        )
        .unwrap();
        let mut offer = DhcpV6BestOffer::new();
        assert_eq!(offer.weight, -1);
        assert!(offer.update(lease.clone(), 0));
        assert!(!offer.update(lease.clone(), 0));
        assert!(offer.update(lease, 10));
        offer.reset();
        assert!(offer.lease.is_none());
        assert_eq!(offer.weight, -1);
    }
}
