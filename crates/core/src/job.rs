//! Command jobs: the engine's unit of work
//!
//! A job carries the command bytes, the handler that will consume the reply,
//! and a oneshot completion channel. `CommandSpec` constructors are the only
//! place AT command strings are assembled.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::ModemError;
use crate::handler::Handler;
use crate::types::{NetworkRegistration, PinState};

/// Default per-job timeout.
pub(crate) const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(15);
/// SMS sends wait on the network; give them extra headroom.
pub(crate) const SMS_SEND_TIMEOUT: Duration = Duration::from_secs(20);
/// Settle wait after `AT+CFUN`; expiry is the success path.
pub(crate) const RESET_SETTLE_TIMEOUT: Duration = Duration::from_secs(6);

/// Substitute control byte terminating a PDU body (Ctrl-Z).
pub(crate) const CTRL_Z: u8 = 0x1A;
/// Escape control byte aborting a pending `>` prompt.
pub(crate) const ESC: u8 = 0x1B;

pub type JobId = u64;

/// Semantic tag of a job, for diagnostics and engine special-casing.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    CheckModem,
    VerboseErrors,
    CheckPin,
    PinUnlock,
    CnmiConfig,
    SetSmsMode,
    CheckNetwork,
    Reset,
    AbortPrompt,
    SmsSend,
    Incoming,
    Raw,
}

/// What a completed job yields.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// The parsed fragments of the reply (default handler).
    Lines(Vec<String>),
    /// SIM lock state (check-pin, pin-unlock).
    Pin(PinState),
    /// Registration reading (check-network).
    Network(NetworkRegistration),
    /// Short reference returned by `+CMGS:`.
    SmsReference(u8),
    /// The reset settle window elapsed and the queue was cleared.
    ResetDone,
    /// Fire-and-forget bytes reached the port.
    Written,
}

/// Everything needed to enqueue a job.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub(crate) command: Vec<u8>,
    pub(crate) kind: CommandKind,
    pub(crate) handler: Handler,
    /// Head insertion instead of tail. Never preempts a written command.
    pub(crate) immediate: bool,
    /// Follow-up byte sequences a handler may write mid-job (PDU bodies).
    pub(crate) subcommands: Vec<Vec<u8>>,
    /// Caller correlation tag, carried into diagnostics.
    pub(crate) reference: Option<u64>,
    pub(crate) timeout: Option<Duration>,
}

impl CommandSpec {
    fn new(command: impl Into<Vec<u8>>, kind: CommandKind, handler: Handler) -> Self {
        Self {
            command: command.into(),
            kind,
            handler,
            immediate: false,
            subcommands: Vec::new(),
            reference: None,
            timeout: None,
        }
    }

    /// Liveness probe.
    pub(crate) fn check_modem() -> Self {
        Self::new("AT", CommandKind::CheckModem, Handler::CheckModem)
    }

    /// Verbose `+CME ERROR` reporting.
    pub(crate) fn verbose_errors() -> Self {
        Self::new("AT+CMEE=2", CommandKind::VerboseErrors, Handler::Default)
    }

    pub(crate) fn check_pin() -> Self {
        Self::new("AT+CPIN?", CommandKind::CheckPin, Handler::CheckPin)
    }

    pub(crate) fn unlock_pin(pin: &str) -> Self {
        Self::new(
            format!("AT+CPIN={pin}"),
            CommandKind::PinUnlock,
            Handler::PinUnlock,
        )
    }

    /// New-message indication routing.
    pub(crate) fn cnmi(config: &str) -> Self {
        Self::new(
            format!("AT+CNMI={config}"),
            CommandKind::CnmiConfig,
            Handler::Default,
        )
    }

    /// PDU mode; text mode is never used.
    pub(crate) fn sms_mode() -> Self {
        Self::new("AT+CMGF=0", CommandKind::SetSmsMode, Handler::Default)
    }

    pub(crate) fn check_network() -> Self {
        Self::new("AT+CREG?", CommandKind::CheckNetwork, Handler::CheckNetwork)
    }

    /// Soft reset. The handler never waits for `OK`; the settle timeout is
    /// the completion path.
    pub(crate) fn reset(mode: &str) -> Self {
        let mut spec = Self::new(
            format!("AT+CFUN={mode}"),
            CommandKind::Reset,
            Handler::ResetSettle,
        );
        spec.immediate = true;
        spec.timeout = Some(RESET_SETTLE_TIMEOUT);
        spec
    }

    /// CR + ESC to escape a pending PDU prompt before a reset.
    pub(crate) fn abort_prompt() -> Self {
        let mut spec = Self::new(
            vec![b'\r', ESC],
            CommandKind::AbortPrompt,
            Handler::AbortPrompt,
        );
        spec.immediate = true;
        spec
    }

    /// `AT+CMGS=<len>` followed, on the `>` prompt, by the PDU body and
    /// Ctrl-Z.
    pub(crate) fn sms_send(tpdu_length: usize, smsc_tpdu: &str, reference: u64) -> Self {
        let mut body = smsc_tpdu.as_bytes().to_vec();
        body.push(CTRL_Z);
        let mut spec = Self::new(
            format!("AT+CMGS={tpdu_length}"),
            CommandKind::SmsSend,
            Handler::SmsSend,
        );
        spec.subcommands = vec![body];
        spec.reference = Some(reference);
        spec.timeout = Some(SMS_SEND_TIMEOUT);
        spec
    }

    /// Synthetic job the engine creates when bytes arrive with an empty
    /// queue.
    pub(crate) fn incoming() -> Self {
        Self::new(Vec::new(), CommandKind::Incoming, Handler::Incoming)
    }

    /// Arbitrary AT command with the default OK/ERROR handler.
    pub(crate) fn raw(command: &str) -> Self {
        Self::new(command.as_bytes().to_vec(), CommandKind::Raw, Handler::Default)
    }
}

/// Serializable job summary carried in diagnostics events.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JobInfo {
    pub id: JobId,
    pub kind: CommandKind,
    pub reference: Option<u64>,
}

pub(crate) type JobResult = std::result::Result<CommandOutcome, ModemError>;

/// An enqueued unit of work. Mutated only by the engine and its handler.
pub(crate) struct Job {
    pub id: JobId,
    pub spec: CommandSpec,
    /// Next subcommand to write (the CMGS body step).
    pub sub_index: usize,
    /// Command bytes have reached the port.
    pub written: bool,
    pub deadline: Option<Instant>,
    /// A delivery report was already captured during this job's lifetime.
    pub cds_captured: bool,
    done: Option<oneshot::Sender<JobResult>>,
}

impl Job {
    pub fn new(id: JobId, spec: CommandSpec, done: Option<oneshot::Sender<JobResult>>) -> Self {
        Self {
            id,
            spec,
            sub_index: 0,
            written: false,
            deadline: None,
            cds_captured: false,
            done,
        }
    }

    pub fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id,
            kind: self.spec.kind,
            reference: self.spec.reference,
        }
    }

    /// Complete the job, delivering the result to the waiter if one exists.
    pub fn finish(mut self, result: JobResult) {
        match self.done.take() {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => {
                if let Err(err) = result {
                    tracing::debug!(job = self.id, kind = ?self.spec.kind, error = %err, "internal job failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sms_send_spec_appends_ctrl_z() {
        let spec = CommandSpec::sms_send(23, "0011000B", 7);
        assert_eq!(spec.command, b"AT+CMGS=23");
        assert_eq!(spec.subcommands.len(), 1);
        assert_eq!(spec.subcommands[0].last(), Some(&CTRL_Z));
        assert_eq!(spec.reference, Some(7));
        assert_eq!(spec.timeout, Some(SMS_SEND_TIMEOUT));
    }

    #[test]
    fn test_abort_prompt_is_immediate_and_ends_with_esc() {
        let spec = CommandSpec::abort_prompt();
        assert!(spec.immediate);
        assert_eq!(spec.command, vec![b'\r', ESC]);
    }

    #[test]
    fn test_reset_spec_uses_settle_timeout() {
        let spec = CommandSpec::reset("1,1");
        assert_eq!(spec.command, b"AT+CFUN=1,1");
        assert!(spec.immediate);
        assert_eq!(spec.timeout, Some(RESET_SETTLE_TIMEOUT));
    }

    #[test]
    fn test_finish_without_waiter_does_not_panic() {
        let job = Job::new(1, CommandSpec::check_modem(), None);
        job.finish(Err(ModemError::Cancelled));
    }
}
