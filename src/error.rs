use std::io;
use std::net;
use std::num::ParseIntError;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// Indicates a second gather attempt on an agent whose session has
    /// already left the `New` state.
    #[error("attempting to gather candidates during gathering state")]
    ErrMultipleGatherAttempted,
    /// Indicates `gather_candidates()` was called before a candidate
    /// handler was installed.
    #[error("no on_candidate handler provided")]
    ErrNoOnCandidateHandler,
    #[error("username is empty")]
    ErrUsernameEmpty,
    #[error("password is empty")]
    ErrPasswordEmpty,
    #[error("UDPMux is not enabled")]
    ErrUdpMuxDisabled,
    #[error("candidate IP could not be found")]
    ErrCandidateIpNotFound,
    /// Returned by a TCPMux that has no listener for the requested
    /// family; expected whenever ICE-TCP is disabled.
    #[error("TCPMux is not initialized")]
    ErrTcpMuxNotInitialized,
    #[error("the agent is closed")]
    ErrClosed,
    #[error("invalid port")]
    ErrPort,
    #[error("i/o timeout")]
    ErrTimeout,

    #[error("local ufrag is less than 24 bits long")]
    ErrLocalUfragInsufficientBits,
    #[error("local pwd is less than 128 bits long")]
    ErrLocalPwdInsufficientBits,
    #[error("STUN or TURN urls provided, but no server reflexive or relay candidate types")]
    ErrUselessUrlsProvided,

    #[error("unknown scheme type")]
    ErrSchemeType,
    #[error("invalid hostname")]
    ErrHost,
    #[error("unknown proto type")]
    ErrProtoType,
    #[error("queries not supported in stun address")]
    ErrStunQuery,
    #[error("invalid query")]
    ErrInvalidQuery,

    #[error("failed to parse address")]
    ErrAddressParseFailed,
    #[error("unable to determine network type")]
    ErrDetermineNetworkType,
    #[error("invalid 1:1 NAT IP mapping")]
    ErrInvalidNat1to1IpMapping,
    #[error("external mapped IP not found")]
    ErrExternalMappedIpNotFound,
    #[error("unsupported 1:1 NAT IP candidate type")]
    ErrUnsupportedNat1to1IpCandidateType,
    #[error("invalid mDNS hostname, must end with .local")]
    ErrInvalidMulticastDnsHostName,
    #[error("mDNS gathering cannot be used with 1:1 NAT IP mapping for host candidates")]
    ErrMulticastDnsWithNat1to1IpMapping,

    #[error("parse int: {0}")]
    ParseInt(#[from] ParseIntError),
    #[error("parse addr: {0}")]
    ParseIp(#[from] net::AddrParseError),
    #[error("{0}")]
    Io(#[source] IoError),
    #[error("{0}")]
    Util(#[from] util::Error),
    #[error("{0}")]
    Stun(#[from] stun::Error),
    #[error("{0}")]
    Turn(#[from] turn::Error),
    #[error("{0}")]
    Dtls(#[from] dtls::Error),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// io::Error does not implement PartialEq; comparing the kind is enough
// for the error matching done in this crate.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}
