// SPDX-License-Identifier: Apache-2.0

use crate::DhcpV6OptionStatusCode;

#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum ErrorKind {
    InvalidArgument,
    /// Interface not found in kernel network state.
    NoInterface,
    /// Interface carrier is down.
    LinkDown,
    /// No usable link-local IPv6 address on the interface.
    NoLinkLocal,
    /// The link-local IPv6 address failed duplicate address detection.
    DuplicateLinkLocal,
    /// No client DUID could be loaded or generated.
    NoIdentity,
    /// No IAID could be derived for the interface.
    NoIaid,
    SendFailed,
    RecvFailed,
    InvalidDhcpMessage,
    /// Maximum retransmission count exceeded.
    MrcExceeded,
    /// Maximum retransmission duration exceeded.
    MrdExpired,
    /// DHCPv6 server replied with a failure status code.
    ServerRejected(DhcpV6OptionStatusCode),
    Canceled,
    Timeout,
    NoLease,
    NotSupported,
    Bug,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DhcpError {
    kind: ErrorKind,
    msg: String,
}

impl DhcpError {
    pub fn new(kind: ErrorKind, msg: String) -> Self {
        Self { kind, msg }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn msg(&self) -> &str {
        self.msg.as_str()
    }
}

impl std::fmt::Display for DhcpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.msg)
    }
}

impl std::error::Error for DhcpError {}

impl From<std::io::Error> for DhcpError {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Bug, format!("IO error: {e}"))
    }
}

impl From<nix::Error> for DhcpError {
    fn from(e: nix::Error) -> Self {
        Self::new(ErrorKind::Bug, format!("System error: {e}"))
    }
}

pub trait ErrorContext<T> {
    /// Attach a context message to the error path.
    fn context(self, msg: &str) -> Result<T, DhcpError>;
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T, DhcpError> {
        self.ok_or_else(|| {
            DhcpError::new(ErrorKind::InvalidDhcpMessage, msg.to_string())
        })
    }
}

impl<T> ErrorContext<T> for Result<T, DhcpError> {
    fn context(self, msg: &str) -> Result<T, DhcpError> {
        self.map_err(|e| {
            DhcpError::new(e.kind.clone(), format!("{msg}: {}", e.msg))
        })
    }
}
