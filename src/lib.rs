// SPDX-License-Identifier: Apache-2.0

mod buffer;
mod config;
mod device;
mod duid;
mod engine;
mod engine_async;
mod error;
mod event;
mod fsm;
mod lease;
mod msg;
mod netinfo;
mod option;
mod option_ia;
mod option_status;
mod policy;
mod retransmit;
mod socket;
#[cfg(test)]
mod testing;
mod time;

pub use crate::config::{
    DhcpV6Config, DhcpV6EngineConfig, DhcpV6Ia, DhcpV6IaType, DhcpV6Request,
    DHCP6_UPDATE_DNS, DHCP6_UPDATE_HOSTNAME, DHCP6_UPDATE_NIS,
    DHCP6_UPDATE_NTP, DHCP6_UPDATE_ROUTES,
};
pub use crate::device::DhcpV6State;
pub use crate::duid::{
    DhcpV6Duid, DhcpV6DuidEnterpriseNumber, DhcpV6DuidLinkLayerAddr,
    DhcpV6DuidLinkLayerAddrPlusTime, DhcpV6DuidUuid,
};
pub use crate::engine::{DhcpV6Engine, DhcpV6LeaseEvent};
pub use crate::engine_async::DhcpV6EngineAsync;
pub use crate::error::{DhcpError, ErrorContext, ErrorKind};
pub use crate::event::{
    DhcpV6AddressEvent, DhcpV6DeviceEvent, DhcpV6Event, DhcpV6EventKind,
    DhcpV6LinkEvent,
};
pub use crate::lease::{DhcpV6Lease, DhcpV6LeaseIa};
pub use crate::msg::{DhcpV6Message, DhcpV6MessageType};
pub use crate::netinfo::{
    NetIface, NetIfaceAddr, NetIfaceAddrFlag, NetInfo, NisporNetInfo,
};
pub use crate::option::{
    DhcpV6Option, DhcpV6OptionCode, DhcpV6OptionNtpServer,
    DhcpV6OptionUnknown, DhcpV6OptionVendorClass, DhcpV6OptionVendorOpts,
};
pub use crate::option_ia::{
    DhcpV6OptionIaAddr, DhcpV6OptionIaNa, DhcpV6OptionIaPd,
    DhcpV6OptionIaPrefix, DhcpV6OptionIaTa,
};
pub use crate::option_status::{DhcpV6OptionStatus, DhcpV6OptionStatusCode};
pub use crate::policy::DhcpV6ServerPreference;
pub use crate::socket::Transport;

pub(crate) use crate::buffer::{Buffer, BufferMut};
