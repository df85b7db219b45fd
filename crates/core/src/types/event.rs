//! Driver event types
//!
//! The event set is closed: every observable happening of the driver is one
//! variant here, fanned out on a `tokio::sync::broadcast` channel. Events
//! from a single handler run are ordered and never coalesced.

use serde::Serialize;

use super::network::NetworkRegistration;
use super::sms::{SmsErrorEvent, SmsStatusChange};
use crate::job::JobInfo;

/// Everything the driver reports to its subscribers.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum ModemEvent {
    /// Serial transport handed to the driver; emitted once at startup.
    Opened,
    /// Result of a liveness probe (`AT`); emitted on every probe.
    ModemReady(bool),
    /// Initialization sequence completed.
    Initialized,
    /// A registration reading was parsed (internal consumers).
    Network(NetworkRegistration),
    /// The same reading, re-emitted for external consumers.
    NetworkStatus(NetworkRegistration),
    /// A liveness probe failed while the modem was presumed alive.
    Brownout,
    /// Unhandled incoming data; carries the joined fragments.
    Incoming(String),
    /// A job expired without a terminal response.
    Timeout(JobInfo),
    /// Diagnostic error surface.
    Error(String),
    /// Raw delivery report captured from a `+CDS:` indication.
    DeliveryReport { short_id: u8, data: String },
    /// An SMS part (and its aggregate) changed status.
    SmsStatusChange(SmsStatusChange),
    /// An SMS part failed to send or to deliver.
    SmsError(SmsErrorEvent),
}
