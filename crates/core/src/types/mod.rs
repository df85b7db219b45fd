//! Domain types for the modem driver

mod event;
mod network;
mod pin;
mod sms;

pub use event::ModemEvent;
pub use network::{NetworkRegistration, RegistrationStatus};
pub use pin::PinState;
pub use sms::{
    PartId, PartStatus, SmsErrorEvent, SmsId, SmsOptions, SmsPartSnapshot, SmsSnapshot, SmsStatus,
    SmsStatusChange,
};
