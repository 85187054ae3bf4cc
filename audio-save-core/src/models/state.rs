use serde::{Deserialize, Serialize};

/// Stream run state, forwarded unchanged to every backend.
///
/// ```text
/// Stopped → Acquired → Paused ↔ Running
///    ↑__________________________|
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StreamState {
    #[default]
    Stopped,
    Acquired,
    Paused,
    Running,
}

impl StreamState {
    /// Wire value used in device control records.
    pub fn as_raw(self) -> i32 {
        match self {
            Self::Stopped => 0,
            Self::Acquired => 1,
            Self::Paused => 2,
            Self::Running => 3,
        }
    }

    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Stopped),
            1 => Some(Self::Acquired),
            2 => Some(Self::Paused),
            3 => Some(Self::Running),
            _ => None,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_values_match_device_abi() {
        assert_eq!(StreamState::Stopped.as_raw(), 0);
        assert_eq!(StreamState::Running.as_raw(), 3);
        assert_eq!(StreamState::from_raw(2), Some(StreamState::Paused));
        assert_eq!(StreamState::from_raw(7), None);
    }
}
