use std::fmt;

use serde::{Deserialize, Serialize};

/// TcpType is the type of ICE TCP candidate, RFC 6544.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Serialize, Deserialize)]
pub enum TcpType {
    /// The default value. For example UDP candidates do not need this field.
    Unspecified,
    /// Active TCP candidates open an outbound connection.
    Active,
    /// Passive TCP candidates only accept inbound connections.
    Passive,
    /// Like `Active` and `Passive` at the same time.
    SimultaneousOpen,
}

impl From<&str> for TcpType {
    fn from(raw: &str) -> Self {
        match raw {
            "active" => Self::Active,
            "passive" => Self::Passive,
            "so" => Self::SimultaneousOpen,
            _ => Self::Unspecified,
        }
    }
}

impl fmt::Display for TcpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Passive => "passive",
            Self::SimultaneousOpen => "so",
            Self::Unspecified => "unspecified",
        };
        write!(f, "{s}")
    }
}

impl Default for TcpType {
    fn default() -> Self {
        Self::Unspecified
    }
}

#[cfg(test)]
mod tcp_type_test {
    use super::*;

    #[test]
    fn test_tcp_type() {
        assert_eq!(TcpType::from("active"), TcpType::Active);
        assert_eq!(TcpType::from("passive"), TcpType::Passive);
        assert_eq!(TcpType::from("so"), TcpType::SimultaneousOpen);
        assert_eq!(TcpType::from("something else"), TcpType::Unspecified);

        assert_eq!(TcpType::Active.to_string(), "active");
        assert_eq!(TcpType::Passive.to_string(), "passive");
        assert_eq!(TcpType::SimultaneousOpen.to_string(), "so");
        assert_eq!(TcpType::Unspecified.to_string(), "unspecified");
    }
}
