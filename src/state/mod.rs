use std::fmt;

use serde::{Deserialize, Serialize};

/// Describes the state of the candidate gathering process.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Serialize, Deserialize)]
pub enum GatheringState {
    Unspecified,

    /// Indicates candidate gathering is not yet started.
    New,

    /// Indicates candidate gathering is ongoing.
    Gathering,

    /// Indicates candidate gathering has been completed.
    Complete,
}

impl From<u8> for GatheringState {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::New,
            2 => Self::Gathering,
            3 => Self::Complete,
            _ => Self::Unspecified,
        }
    }
}

impl Default for GatheringState {
    fn default() -> Self {
        Self::New
    }
}

impl fmt::Display for GatheringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::New => "new",
            Self::Gathering => "gathering",
            Self::Complete => "complete",
            Self::Unspecified => "unspecified",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod state_test {
    use super::*;

    #[test]
    fn test_gathering_state_string() {
        let tests = vec![
            (GatheringState::New, "new"),
            (GatheringState::Gathering, "gathering"),
            (GatheringState::Complete, "complete"),
            (GatheringState::Unspecified, "unspecified"),
        ];

        for (state, expected) in tests {
            assert_eq!(state.to_string(), expected);
        }
    }

    #[test]
    fn test_gathering_state_from_u8() {
        assert_eq!(GatheringState::from(1), GatheringState::New);
        assert_eq!(GatheringState::from(2), GatheringState::Gathering);
        assert_eq!(GatheringState::from(3), GatheringState::Complete);
        assert_eq!(GatheringState::from(0), GatheringState::Unspecified);
    }
}
