// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv6Addr;

use crate::{DhcpV6Duid, DhcpV6EngineConfig};

/// An Advertise carrying this weight ends the Selecting collection wait
/// immediately, RFC 3315 17.1.3.
pub(crate) const SELECT_IMMEDIATE_WEIGHT: i32 = 255;

/// Administratively preferred server. A match by DUID or address overrides
/// the preference option weight the server advertised.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
#[non_exhaustive]
pub struct DhcpV6ServerPreference {
    pub duid: Option<DhcpV6Duid>,
    pub address: Option<Ipv6Addr>,
    pub weight: i32,
}

impl DhcpV6ServerPreference {
    fn matches(&self, addr: &Ipv6Addr, duid: &DhcpV6Duid) -> bool {
        if let Some(pref_duid) = self.duid.as_ref() {
            if pref_duid == duid {
                return true;
            }
        }
        if let Some(pref_addr) = self.address.as_ref() {
            if pref_addr == addr {
                return true;
            }
        }
        false
    }
}

/// Score an Advertise: `None` rejects the server, otherwise the returned
/// weight competes for the best offer, higher wins and ties are broken by
/// earliest arrival.
pub(crate) fn score_advertise(
    conf: &DhcpV6EngineConfig,
    srv_addr: &Ipv6Addr,
    srv_duid: &DhcpV6Duid,
    preference: u8,
) -> Option<i32> {
    if conf.ignore_servers.contains(srv_addr) {
        log::debug!("Ignoring Advertise from blocked server {srv_addr}");
        return None;
    }

    let mut weight = preference as i32;
    for pref in &conf.preferred_servers {
        if pref.matches(srv_addr, srv_duid) {
            weight = pref.weight;
            break;
        }
    }
    Some(weight)
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;
    use crate::DhcpV6DuidUuid;

    fn srv_addr() -> Ipv6Addr {
        Ipv6Addr::from_str("fe80::1").unwrap()
    }

    fn srv_duid() -> DhcpV6Duid {
        DhcpV6Duid::UUID(DhcpV6DuidUuid::new(0x1234))
    }

    #[test]
    fn weight_defaults_to_preference_option() {
        let conf = DhcpV6EngineConfig::default();
        assert_eq!(
            score_advertise(&conf, &srv_addr(), &srv_duid(), 7),
            Some(7)
        );
    }

    #[test]
    fn ignored_server_is_rejected() {
        let mut conf = DhcpV6EngineConfig::default();
        conf.ignore_servers.push(srv_addr());
        assert_eq!(
            score_advertise(&conf, &srv_addr(), &srv_duid(), 255),
            None
        );
    }

    #[test]
    fn preferred_server_weight_overrides_preference() {
        let mut conf = DhcpV6EngineConfig::default();
        conf.preferred_servers.push(DhcpV6ServerPreference {
            duid: Some(srv_duid()),
            address: None,
            weight: 100,
        });
        assert_eq!(
            score_advertise(&conf, &srv_addr(), &srv_duid(), 3),
            Some(100)
        );
    }

    #[test]
    fn preferred_server_matches_by_address() {
        let mut conf = DhcpV6EngineConfig::default();
        conf.preferred_servers.push(DhcpV6ServerPreference {
            duid: None,
            address: Some(srv_addr()),
            weight: 1,
        });
        // Another server keeps its advertised preference.
        assert_eq!(
            score_advertise(
                &conf,
                &Ipv6Addr::from_str("fe80::2").unwrap(),
                &srv_duid(),
                9
            ),
            Some(9)
        );
        assert_eq!(
            score_advertise(&conf, &srv_addr(), &srv_duid(), 9),
            Some(1)
        );
    }
}
