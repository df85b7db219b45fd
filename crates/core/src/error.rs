//! Error types for simgate-core

use thiserror::Error;

use crate::parse::ResponseError;
use crate::types::PinState;

/// Driver error type.
///
/// Handlers never panic or throw: every failure reaches the caller through
/// the job's completion future as one of these variants.
#[derive(Debug, Error)]
pub enum ModemError {
    #[error("modem failed liveness probe")]
    Check,

    #[error("malformed registration response: {0}")]
    Parse(String),

    #[error("malformed registration payload, expected two comma-separated integers: {0}")]
    ParseComma(String),

    #[error("SIM is locked: {0:?}")]
    PinRequired(PinState),

    #[error("SIM rejected the configured PIN")]
    PinIncorrect,

    #[error("PIN status check failed: {0}")]
    CheckPin(String),

    #[error("command rejected: {0}")]
    Command(String),

    #[error("command failed: {raw}")]
    Generic { raw: String },

    #[error("command timed out without a terminal response")]
    Unhandled { lines: Vec<String> },

    #[error("SMS send failed: {0}")]
    SmsSend(String),

    #[error("job cancelled by queue clear")]
    Cancelled,

    #[error("reset limit exceeded, modem presumed dead")]
    FatalReset,

    #[error("serial transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("PDU codec error: {0}")]
    Pdu(String),

    #[error("unknown SMS id {0}")]
    UnknownSms(u64),

    #[error("command engine stopped")]
    EngineClosed,
}

impl From<ResponseError> for ModemError {
    fn from(err: ResponseError) -> Self {
        match err {
            ResponseError::Generic { raw } => Self::Generic { raw },
            ResponseError::Reported { message } => Self::Command(message),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, ModemError>;
