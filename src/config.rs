// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use crate::{
    policy::DhcpV6ServerPreference, DhcpV6Duid, DhcpV6Option,
    DhcpV6OptionCode, DhcpV6OptionIaAddr, DhcpV6OptionIaNa, DhcpV6OptionIaPd,
    DhcpV6OptionIaPrefix, DhcpV6OptionIaTa, DhcpV6OptionVendorClass,
    DhcpV6OptionVendorOpts,
};

/// Categories of lease content the host applies on success.
pub const DHCP6_UPDATE_HOSTNAME: u32 = 1 << 0;
pub const DHCP6_UPDATE_DNS: u32 = 1 << 1;
pub const DHCP6_UPDATE_NIS: u32 = 1 << 2;
pub const DHCP6_UPDATE_NTP: u32 = 1 << 3;
pub const DHCP6_UPDATE_ROUTES: u32 = 1 << 4;

// http://www.iana.org/assignments/enterprise-numbers
const VENDOR_ENTERPRISE_NUMBER: u32 = 7075; // SUSE
const VENDOR_VERSION_STRING: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

const DEFAULT_PREFERRED_LIFETIME_SEC: u32 = 3600;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[non_exhaustive]
pub enum DhcpV6IaType {
    #[default]
    NonTemporaryAddresses,
    TemporaryAddresses,
    PrefixDelegation,
}

impl std::fmt::Display for DhcpV6IaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::NonTemporaryAddresses => "IA_NA",
                Self::TemporaryAddresses => "IA_TA",
                Self::PrefixDelegation => "IA_PD",
            }
        )
    }
}

impl From<DhcpV6IaType> for DhcpV6OptionCode {
    fn from(v: DhcpV6IaType) -> Self {
        match v {
            DhcpV6IaType::NonTemporaryAddresses => DhcpV6OptionCode::IANA,
            DhcpV6IaType::TemporaryAddresses => DhcpV6OptionCode::IATA,
            DhcpV6IaType::PrefixDelegation => DhcpV6OptionCode::IAPD,
        }
    }
}

/// Identity association requested for a lease acquisition, optionally
/// carrying address or prefix hints and T1/T2 renewal times.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
#[non_exhaustive]
pub struct DhcpV6Ia {
    pub ia_type: DhcpV6IaType,
    pub iaid: u32,
    pub t1_sec: u32,
    pub t2_sec: u32,
    pub addresses: Vec<DhcpV6OptionIaAddr>,
    pub prefixes: Vec<DhcpV6OptionIaPrefix>,
}

impl DhcpV6Ia {
    pub fn new_na(iaid: u32) -> Self {
        Self {
            ia_type: DhcpV6IaType::NonTemporaryAddresses,
            iaid,
            ..Default::default()
        }
    }

    pub fn new_ta(iaid: u32) -> Self {
        Self {
            ia_type: DhcpV6IaType::TemporaryAddresses,
            iaid,
            ..Default::default()
        }
    }

    pub fn new_pd(iaid: u32, prefix_len_hint: u8) -> Self {
        Self {
            ia_type: DhcpV6IaType::PrefixDelegation,
            iaid,
            prefixes: vec![DhcpV6OptionIaPrefix::new_hint(prefix_len_hint)],
            ..Default::default()
        }
    }

    // RFC 3315 22.4: T1 and T2 are the times at which the client contacts
    // the server to renew or rebind the addresses of this IA.
    pub(crate) fn set_default_lifetimes(&mut self, preferred_sec: u32) {
        self.t1_sec = preferred_sec / 2;
        self.t2_sec = preferred_sec / 5 * 4;
    }

    pub(crate) fn to_option(&self) -> DhcpV6Option {
        match self.ia_type {
            DhcpV6IaType::NonTemporaryAddresses => {
                let mut ia = DhcpV6OptionIaNa::new(
                    self.iaid, self.t1_sec, self.t2_sec,
                );
                ia.addresses = self.addresses.clone();
                DhcpV6Option::IANA(ia)
            }
            DhcpV6IaType::TemporaryAddresses => {
                let mut ia = DhcpV6OptionIaTa::new(self.iaid);
                ia.addresses = self.addresses.clone();
                DhcpV6Option::IATA(ia)
            }
            DhcpV6IaType::PrefixDelegation => {
                let mut ia = DhcpV6OptionIaPd::new(
                    self.iaid, self.t1_sec, self.t2_sec,
                );
                ia.prefixes = self.prefixes.clone();
                DhcpV6Option::IAPD(ia)
            }
        }
    }
}

/// Raw lease acquisition parameters as received from the host, before DUID
/// defaulting and hostname sanitization. Kept on the device so the
/// acquisition can be replayed after restart or reload.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
#[non_exhaustive]
pub struct DhcpV6Request {
    pub uuid: u128,
    pub update: u32,
    /// Information-request flow, no address acquisition.
    pub info_only: bool,
    pub rapid_commit: bool,
    /// Hex string DUID overriding the persisted client identity.
    pub clientid: Option<String>,
    pub ia_list: Vec<DhcpV6Ia>,
    pub hostname: Option<String>,
    pub user_class: Vec<String>,
    pub vendor_class: Option<DhcpV6OptionVendorClass>,
    pub vendor_opts: Option<DhcpV6OptionVendorOpts>,
    pub preferred_lifetime_sec: Option<u32>,
}

impl DhcpV6Request {
    pub fn new(uuid: u128) -> Self {
        Self {
            uuid,
            ..Default::default()
        }
    }
}

/// Configuration of a single lease acquisition attempt, derived from a
/// [DhcpV6Request]. Immutable for the lifetime of the attempt and replaced
/// atomically on re-acquire.
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub struct DhcpV6Config {
    pub(crate) uuid: u128,
    pub(crate) update: u32,
    pub(crate) info_only: bool,
    pub(crate) rapid_commit: bool,
    pub(crate) lease_time_sec: u32,
    pub(crate) duid: DhcpV6Duid,
    pub(crate) ia_list: Vec<DhcpV6Ia>,
    pub(crate) hostname: Option<String>,
    pub(crate) user_class: Vec<String>,
    pub(crate) vendor_class: DhcpV6OptionVendorClass,
    pub(crate) vendor_opts: Option<DhcpV6OptionVendorOpts>,
    pub(crate) request_opts: Vec<DhcpV6OptionCode>,
}

impl DhcpV6Config {
    pub(crate) fn new(
        request: &DhcpV6Request,
        duid: DhcpV6Duid,
        iaid: u32,
        engine_conf: &DhcpV6EngineConfig,
    ) -> Self {
        let lease_time_sec = request
            .preferred_lifetime_sec
            .unwrap_or(DEFAULT_PREFERRED_LIFETIME_SEC);

        let ia_list = if request.info_only {
            Vec::new()
        } else if request.ia_list.is_empty() {
            let mut ia = DhcpV6Ia::new_na(iaid);
            ia.set_default_lifetimes(lease_time_sec);
            vec![ia]
        } else {
            // Multiple IAs of the same type are taken as is, the server is
            // the authority on rejecting duplicate IAIDs.
            request.ia_list.clone()
        };

        let hostname = request.hostname.as_ref().and_then(|hostname| {
            if check_domain_name(hostname) {
                Some(hostname.clone())
            } else {
                log::debug!(
                    "Discarded request to use suspect hostname: {hostname:?}"
                );
                None
            }
        });

        let user_class = if request.user_class.is_empty() {
            engine_conf.user_class.clone()
        } else {
            request.user_class.clone()
        };

        let vendor_class = request
            .vendor_class
            .clone()
            .or_else(|| engine_conf.vendor_class.clone())
            .unwrap_or_else(|| {
                DhcpV6OptionVendorClass::new(
                    VENDOR_ENTERPRISE_NUMBER,
                    vec![VENDOR_VERSION_STRING.to_string()],
                )
            });

        let vendor_opts = request
            .vendor_opts
            .clone()
            .or_else(|| engine_conf.vendor_opts.clone());

        Self {
            uuid: request.uuid,
            update: request.update,
            info_only: request.info_only,
            rapid_commit: request.rapid_commit,
            lease_time_sec,
            duid,
            ia_list,
            hostname,
            user_class,
            vendor_class,
            vendor_opts,
            request_opts: vec![
                DhcpV6OptionCode::DnsServers,
                DhcpV6OptionCode::DomainList,
                DhcpV6OptionCode::NtpServer,
            ],
        }
    }

    pub fn uuid(&self) -> u128 {
        self.uuid
    }

    pub fn duid(&self) -> &DhcpV6Duid {
        &self.duid
    }
}

/// Process wide engine configuration shared by all devices.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
#[non_exhaustive]
pub struct DhcpV6EngineConfig {
    /// Hex string DUID used for every device unless the acquire request
    /// carries its own.
    pub default_duid: Option<String>,
    /// Path of the persisted DUID, raw wire bytes.
    pub duid_file: Option<PathBuf>,
    /// Directory holding per interface lease files, removed when a lease
    /// is dropped.
    pub lease_dir: Option<PathBuf>,
    /// Servers whose Advertise is rejected outright.
    pub ignore_servers: Vec<std::net::Ipv6Addr>,
    pub preferred_servers: Vec<DhcpV6ServerPreference>,
    pub user_class: Vec<String>,
    pub vendor_class: Option<DhcpV6OptionVendorClass>,
    pub vendor_opts: Option<DhcpV6OptionVendorOpts>,
}

impl DhcpV6EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }
}

// RFC 1035 domain name check with the RFC 1123 relaxation allowing labels
// to start with a digit.
pub(crate) fn check_domain_name(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn domain_name_check() {
        assert!(check_domain_name("host1"));
        assert!(check_domain_name("host1.example.com"));
        assert!(check_domain_name("host1.example.com."));
        assert!(check_domain_name("9front.example"));
        assert!(!check_domain_name(""));
        assert!(!check_domain_name("host_1.example.com"));
        assert!(!check_domain_name("-host.example.com"));
        assert!(!check_domain_name("host-.example.com"));
        assert!(!check_domain_name("host..example.com"));
        assert!(!check_domain_name(&"a".repeat(64)));
    }

    #[test]
    fn default_ia_na_when_request_has_none() {
        let request = DhcpV6Request::new(1);
        let config = DhcpV6Config::new(
            &request,
            DhcpV6Duid::default(),
            0x00112233,
            &DhcpV6EngineConfig::default(),
        );
        assert_eq!(
            config.ia_list,
            vec![DhcpV6Ia {
                ia_type: DhcpV6IaType::NonTemporaryAddresses,
                iaid: 0x00112233,
                t1_sec: 1800,
                t2_sec: 2880,
                addresses: Vec::new(),
                prefixes: Vec::new(),
            }]
        );
    }

    #[test]
    fn info_only_request_has_no_ia() {
        let mut request = DhcpV6Request::new(1);
        request.info_only = true;
        request.ia_list = vec![DhcpV6Ia::new_na(1)];
        let config = DhcpV6Config::new(
            &request,
            DhcpV6Duid::default(),
            1,
            &DhcpV6EngineConfig::default(),
        );
        assert!(config.ia_list.is_empty());
    }

    #[test]
    fn suspect_hostname_is_discarded() {
        let mut request = DhcpV6Request::new(1);
        request.hostname = Some("bad host!".to_string());
        let config = DhcpV6Config::new(
            &request,
            DhcpV6Duid::default(),
            1,
            &DhcpV6EngineConfig::default(),
        );
        assert_eq!(config.hostname, None);
    }

    #[test]
    fn vendor_class_defaults_to_package_version() {
        let request = DhcpV6Request::new(1);
        let config = DhcpV6Config::new(
            &request,
            DhcpV6Duid::default(),
            1,
            &DhcpV6EngineConfig::default(),
        );
        assert_eq!(config.vendor_class.enterprise_number, 7075);
        assert_eq!(config.vendor_class.data, vec![format!(
            "mirzam/{}",
            env!("CARGO_PKG_VERSION")
        )]);
    }
}
