//! SIM PIN state reported by `AT+CPIN?`

use serde::{Deserialize, Serialize};

/// SIM lock state, mapped from the token the modem prints after `+CPIN:`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PinState {
    /// SIM is unlocked and usable.
    Ready,
    /// SIM expects its PIN.
    NeedPin,
    /// SIM is blocked and expects the PUK.
    NeedPuk,
    /// Anything else the modem may report (no SIM, hardware fault).
    Error,
}

impl PinState {
    /// Map the text after `+CPIN: ` to a state.
    pub fn from_token(token: &str) -> Self {
        match token {
            "READY" => Self::Ready,
            "SIM PIN" => Self::NeedPin,
            "SIM PUK" => Self::NeedPuk,
            _ => Self::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_mapping() {
        assert_eq!(PinState::from_token("READY"), PinState::Ready);
        assert_eq!(PinState::from_token("SIM PIN"), PinState::NeedPin);
        assert_eq!(PinState::from_token("SIM PUK"), PinState::NeedPuk);
        assert_eq!(PinState::from_token("SIM PIN2"), PinState::Error);
    }
}
