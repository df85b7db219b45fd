//! SMS domain types: identifiers, statuses and snapshots

use serde::{Deserialize, Serialize};

use crate::pdu::{NumberType, SmsEncoding};

/// Identifier of a queued SMS.
pub type SmsId = u64;

/// Identifier of one PDU part of an SMS.
pub type PartId = u64;

/// Lifecycle of a single PDU part.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PartStatus {
    /// Created, not yet handed to the engine.
    Idle,
    /// An `AT+CMGS` job for this part is queued or in flight.
    Sending,
    /// The modem accepted the part and returned a short reference.
    Sent,
    /// A delivery report confirmed arrival at the handset.
    Delivered,
    /// Send failed or a delivery report carried a failure status.
    Error,
}

/// Aggregate lifecycle of a whole (possibly multipart) SMS.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SmsStatus {
    Idle,
    Sending,
    Sent,
    Delivered,
    Error,
}

impl From<PartStatus> for SmsStatus {
    fn from(status: PartStatus) -> Self {
        match status {
            PartStatus::Idle => Self::Idle,
            PartStatus::Sending => Self::Sending,
            PartStatus::Sent => Self::Sent,
            PartStatus::Delivered => Self::Delivered,
            PartStatus::Error => Self::Error,
        }
    }
}

/// Per-message options accepted by [`crate::Modem::send_sms`].
#[derive(Debug, Clone)]
pub struct SmsOptions {
    /// Payload encoding.
    pub encoding: SmsEncoding,
    /// Receiver number format.
    pub receiver_type: NumberType,
    /// SMSC override; falls back to the modem-wide configuration.
    pub smsc: Option<String>,
    /// Request a delivery report; falls back to the modem-wide configuration.
    pub delivery_report: Option<bool>,
}

impl Default for SmsOptions {
    fn default() -> Self {
        Self {
            encoding: SmsEncoding::Gsm7,
            receiver_type: NumberType::International,
            smsc: None,
            delivery_report: None,
        }
    }
}

/// Point-in-time view of one part, for callers that poll instead of
/// subscribing to events.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SmsPartSnapshot {
    pub id: PartId,
    /// The integer returned by `+CMGS:`, once the part is sent.
    pub short_reference: Option<u8>,
    pub status: PartStatus,
    pub error: Option<String>,
}

/// Point-in-time view of a whole SMS.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SmsSnapshot {
    pub id: SmsId,
    pub receiver: String,
    pub status: SmsStatus,
    pub parts: Vec<SmsPartSnapshot>,
}

/// Payload of [`crate::ModemEvent::SmsStatusChange`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SmsStatusChange {
    pub sms: SmsId,
    pub part: PartId,
    pub part_status: PartStatus,
    pub sms_status: SmsStatus,
    /// Human-readable detail, e.g. the delivery status map entry.
    pub message: Option<String>,
}

/// Payload of [`crate::ModemEvent::SmsError`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SmsErrorEvent {
    pub sms: SmsId,
    pub part: PartId,
    pub error: String,
    /// Raw delivery status byte, when the failure came from a report.
    pub error_status: Option<u8>,
}
