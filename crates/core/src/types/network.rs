//! Network registration types parsed from `+CREG` responses

use serde::{Deserialize, Serialize};

/// GSM registration status (`<stat>` field of `+CREG`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RegistrationStatus {
    NotRegistered,
    Registered,
    Searching,
    Denied,
    Unknown,
    Roaming,
}

impl RegistrationStatus {
    /// Map the numeric `<stat>` code.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::NotRegistered,
            1 => Self::Registered,
            2 => Self::Searching,
            3 => Self::Denied,
            5 => Self::Roaming,
            _ => Self::Unknown,
        }
    }

    /// The numeric `<stat>` code.
    pub fn code(self) -> u8 {
        match self {
            Self::NotRegistered => 0,
            Self::Registered => 1,
            Self::Searching => 2,
            Self::Denied => 3,
            Self::Unknown => 4,
            Self::Roaming => 5,
        }
    }

    /// Whether the modem can pass traffic (home network or roaming).
    pub fn is_registered(self) -> bool {
        matches!(self, Self::Registered | Self::Roaming)
    }
}

/// One `+CREG: <n>,<stat>` reading.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkRegistration {
    /// The `<n>` field: unsolicited result code setting.
    pub action: u8,
    /// The `<stat>` field.
    pub status: RegistrationStatus,
}

impl NetworkRegistration {
    pub fn new(action: u8, status_code: u8) -> Self {
        Self {
            action,
            status: RegistrationStatus::from_code(status_code),
        }
    }

    /// Synthetic reading used when the boot banner announces readiness.
    pub fn registered() -> Self {
        Self {
            action: 0,
            status: RegistrationStatus::Registered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip() {
        for code in [0u8, 1, 2, 3, 5] {
            assert_eq!(RegistrationStatus::from_code(code).code(), code);
        }
        assert_eq!(RegistrationStatus::from_code(9), RegistrationStatus::Unknown);
    }

    #[test]
    fn test_registered_includes_roaming() {
        assert!(RegistrationStatus::Registered.is_registered());
        assert!(RegistrationStatus::Roaming.is_registered());
        assert!(!RegistrationStatus::Searching.is_registered());
    }
}
