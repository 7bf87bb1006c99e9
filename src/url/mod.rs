
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::*;

/// The type of server used in the ice.URL structure.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Serialize, Deserialize)]
pub enum SchemeType {
    /// Indicates the URL represents a STUN server.
    Stun,

    /// Indicates the URL represents a STUNS (secure) server.
    Stuns,

    /// Indicates the URL represents a TURN server.
    Turn,

    /// Indicates the URL represents a TURNS (secure) server.
    Turns,

    /// Default public constant to use for "enum" like struct comparisons
    /// when no value was defined.
    Unknown,
}

impl Default for SchemeType {
    fn default() -> Self {
        Self::Unknown
    }
}

impl From<&str> for SchemeType {
    /// Defines a procedure for creating a new `SchemeType` from a raw
    /// string naming the scheme type.
    fn from(raw: &str) -> Self {
        match raw {
            "stun" => Self::Stun,
            "stuns" => Self::Stuns,
            "turn" => Self::Turn,
            "turns" => Self::Turns,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for SchemeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Stun => "stun",
            Self::Stuns => "stuns",
            Self::Turn => "turn",
            Self::Turns => "turns",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// The transport protocol type that is used in the `Url` structure.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Serialize, Deserialize)]
pub enum ProtoType {
    /// Indicates the URL uses a UDP transport.
    Udp,

    /// Indicates the URL uses a TCP transport.
    Tcp,

    Unknown,
}

impl Default for ProtoType {
    fn default() -> Self {
        Self::Unknown
    }
}

impl From<&str> for ProtoType {
    fn from(raw: &str) -> Self {
        match raw {
            "udp" => Self::Udp,
            "tcp" => Self::Tcp,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ProtoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Represents a STUN (rfc7064) or TURN (rfc7065) URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Url {
    pub scheme: SchemeType,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub proto: ProtoType,
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.scheme == SchemeType::Turn || self.scheme == SchemeType::Turns {
            write!(
                f,
                "{}:{}:{}?transport={}",
                self.scheme, host, self.port, self.proto
            )
        } else {
            write!(f, "{}:{}:{}", self.scheme, host, self.port)
        }
    }
}

impl Url {
    /// Parses a STUN or TURN urls following the ABNF syntax described in
    /// <https://tools.ietf.org/html/rfc7064> and
    /// <https://tools.ietf.org/html/rfc7065> respectively.
    pub fn parse_url(raw: &str) -> Result<Url> {
        let (scheme_str, rest) = raw.split_once(':').ok_or(Error::ErrSchemeType)?;
        let scheme = SchemeType::from(scheme_str);
        if scheme == SchemeType::Unknown {
            return Err(Error::ErrSchemeType);
        }

        let (authority, query) = match rest.split_once('?') {
            Some((authority, query)) => (authority, Some(query)),
            None => (rest, None),
        };

        let default_port = if scheme == SchemeType::Stun || scheme == SchemeType::Turn {
            3478
        } else {
            5349
        };
        let (host, port) = split_host_port(authority, default_port)?;

        let mut proto = match scheme {
            SchemeType::Stun | SchemeType::Turn => ProtoType::Udp,
            SchemeType::Stuns | SchemeType::Turns => ProtoType::Tcp,
            SchemeType::Unknown => return Err(Error::ErrSchemeType),
        };

        if let Some(query) = query {
            if scheme == SchemeType::Stun || scheme == SchemeType::Stuns {
                return Err(Error::ErrStunQuery);
            }

            let (key, value) = query.split_once('=').ok_or(Error::ErrInvalidQuery)?;
            if key != "transport" {
                return Err(Error::ErrInvalidQuery);
            }
            proto = ProtoType::from(value);
            if proto == ProtoType::Unknown {
                return Err(Error::ErrProtoType);
            }
        }

        Ok(Url {
            scheme,
            host,
            port,
            username: String::new(),
            password: String::new(),
            proto,
        })
    }

    /// Returns whether the this URL's scheme describes secure scheme or not.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.scheme == SchemeType::Stuns || self.scheme == SchemeType::Turns
    }
}

/// Splits an `host[:port]` authority, unwrapping a bracketed IPv6 host.
fn split_host_port(authority: &str, default_port: u16) -> Result<(String, u16)> {
    if authority.is_empty() {
        return Err(Error::ErrHost);
    }

    if let Some(rest) = authority.strip_prefix('[') {
        let (host, rest) = rest.split_once(']').ok_or(Error::ErrHost)?;
        if host.is_empty() {
            return Err(Error::ErrHost);
        }
        let port = match rest.strip_prefix(':') {
            Some(port_str) => port_str.parse::<u16>().map_err(|_| Error::ErrPort)?,
            None if rest.is_empty() => default_port,
            None => return Err(Error::ErrHost),
        };
        Ok((host.to_owned(), port))
    } else if let Some((host, port_str)) = authority.rsplit_once(':') {
        if host.is_empty() || host.contains(':') {
            return Err(Error::ErrHost);
        }
        let port = port_str.parse::<u16>().map_err(|_| Error::ErrPort)?;
        Ok((host.to_owned(), port))
    } else {
        Ok((authority.to_owned(), default_port))
    }
}
