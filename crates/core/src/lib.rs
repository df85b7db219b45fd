//! simgate-core — host-side driver for SIM800L-family GSM modems
//!
//! This crate turns an unreliable, line-oriented, half-duplex AT dialogue
//! over a UART into a supervised asynchronous API:
//! - A serialized command engine (one outstanding AT command, strict FIFO
//!   with a non-preemptive immediate lane, per-job timeouts)
//! - A handler library for the commands whose replies need more than
//!   OK/ERROR (PIN flows, registration parsing, the two-step PDU send)
//! - A supervisor running the cold-boot sequence, a brownout detector and a
//!   network-registration watchdog with a bounded soft-reset policy
//! - An SMS coordinator owning the outbox and routing delivery reports back
//!   to the part that sent them
//!
//! PDU encoding, the OS serial port and application wiring stay outside:
//! plug them in through [`PduCodec`], [`SerialLink`] and the event stream.

pub mod engine;
pub mod error;
mod handler;
pub mod job;
pub mod modem;
pub mod parse;
pub mod pdu;
mod sms;
pub mod status;
mod supervisor;
pub mod transport;
pub mod types;

pub use engine::EngineHandle;
pub use error::{ModemError, Result};
pub use job::{CommandKind, JobInfo};
pub use modem::{Modem, ModemConfig, DEFAULT_CNMI};
pub use pdu::{
    DeliveryPdu, MockCodec, NullCodec, NumberType, PduCodec, PduPart, PduRequest, SmsEncoding,
    TpduType,
};
pub use status::{ModemStatus, ModemStatusSnapshot};
pub use transport::{MockHandle, MockLink, SerialLink, SerialTransport};
pub use types::{
    ModemEvent, NetworkRegistration, PartId, PartStatus, PinState, RegistrationStatus,
    SmsErrorEvent, SmsId, SmsOptions, SmsPartSnapshot, SmsSnapshot, SmsStatus, SmsStatusChange,
};
