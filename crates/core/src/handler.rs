//! Per-command reply handlers
//!
//! Each handler is one variant of a sum type; the engine feeds the full
//! accumulation buffer to the head job's handler every time bytes arrive, and
//! the handler decides whether to keep waiting, write follow-up bytes, or
//! complete the job. Handlers surface failure through the job result and
//! never panic.

use tokio::sync::broadcast;

use crate::error::ModemError;
use crate::job::{CommandOutcome, Job};
use crate::parse;
use crate::status::ModemStatus;
use crate::types::{ModemEvent, NetworkRegistration, PinState};

/// What a handler invocation decided.
#[derive(Debug)]
pub(crate) enum Verdict {
    /// Terminal condition not reached; keep accumulating.
    Pending,
    /// Write these bytes to the port verbatim and keep the job active.
    Write(Vec<u8>),
    /// The job is over.
    Done(crate::job::JobResult),
}

/// Restricted view handlers get into the rest of the driver: the event
/// channel, the documented state mutations, and a follow-up queue.
pub(crate) struct HandlerCtx<'a> {
    pub events: &'a broadcast::Sender<ModemEvent>,
    pub status: &'a ModemStatus,
    /// Specs enqueued at the tail once the current dispatch ends.
    pub followups: &'a mut Vec<crate::job::CommandSpec>,
}

impl HandlerCtx<'_> {
    fn emit(&self, event: ModemEvent) {
        let _ = self.events.send(event);
    }
}

/// The handler library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handler {
    /// Terminates on OK or a reported error; ignores everything else.
    Default,
    /// `AT` liveness probe; doubles as the brownout detector's sensor.
    CheckModem,
    /// `AT+CPIN?` state query.
    CheckPin,
    /// `AT+CPIN=<pin>`; OK alone is not terminal, the modem confirms with a
    /// later `+CPIN: READY` line.
    PinUnlock,
    /// `AT+CREG?` registration query.
    CheckNetwork,
    /// `AT+CFUN` settle wait; completes via timeout, never via bytes.
    ResetSettle,
    /// `AT+CMGS` two-step send: body on the `>` prompt, reference on OK.
    SmsSend,
    /// CR+ESC prompt escape; the engine completes it right after the write.
    AbortPrompt,
    /// Unsolicited data with an empty queue.
    Incoming,
}

impl Handler {
    /// Whether a stray `+CDS:` in this handler's buffer should still be
    /// captured as a delivery report. The incoming handler routes reports
    /// itself.
    pub fn allows_delivery_capture(self) -> bool {
        !matches!(self, Self::Incoming)
    }

    /// Consume the accumulated buffer after new bytes arrived.
    pub fn on_data(
        self,
        job: &mut Job,
        buffer: &[u8],
        lines: &[String],
        ctx: &mut HandlerCtx<'_>,
    ) -> Verdict {
        match self {
            Self::Default => default_on_data(buffer, lines),
            Self::CheckModem => check_modem_on_data(buffer, lines, ctx),
            Self::CheckPin => check_pin_on_data(buffer, lines, ctx),
            Self::PinUnlock => pin_unlock_on_data(buffer, lines, ctx),
            Self::CheckNetwork => check_network_on_data(buffer, lines, ctx),
            Self::ResetSettle => Verdict::Pending,
            Self::SmsSend => sms_send_on_data(job, buffer, lines),
            Self::AbortPrompt => Verdict::Pending,
            Self::Incoming => incoming_on_data(buffer, lines, ctx),
        }
    }

    /// The job's timeout fired. Must return a terminal verdict.
    pub fn on_timeout(self, lines: &[String], ctx: &mut HandlerCtx<'_>) -> crate::job::JobResult {
        match self {
            Self::CheckModem => {
                ctx.emit(ModemEvent::ModemReady(false));
                Err(ModemError::Unhandled {
                    lines: lines.to_vec(),
                })
            }
            Self::ResetSettle => Ok(CommandOutcome::ResetDone),
            Self::AbortPrompt => Ok(CommandOutcome::Written),
            Self::Incoming => {
                ctx.emit(ModemEvent::Incoming(lines.join("\n")));
                Ok(CommandOutcome::Lines(lines.to_vec()))
            }
            _ => Err(ModemError::Unhandled {
                lines: lines.to_vec(),
            }),
        }
    }
}

fn default_on_data(buffer: &[u8], lines: &[String]) -> Verdict {
    if parse::is_ok(buffer) {
        return Verdict::Done(Ok(CommandOutcome::Lines(lines.to_vec())));
    }
    if let Some(err) = parse::response_error(buffer) {
        return Verdict::Done(Err(err.into()));
    }
    Verdict::Pending
}

fn check_modem_on_data(buffer: &[u8], lines: &[String], ctx: &mut HandlerCtx<'_>) -> Verdict {
    if parse::is_ok(buffer) {
        ctx.emit(ModemEvent::ModemReady(true));
        return Verdict::Done(Ok(CommandOutcome::Lines(lines.to_vec())));
    }
    if parse::response_error(buffer).is_some() {
        ctx.emit(ModemEvent::ModemReady(false));
        return Verdict::Done(Err(ModemError::Check));
    }
    Verdict::Pending
}

fn pin_fragment_state(fragment: &str) -> PinState {
    match fragment.split_once(' ') {
        Some((_, token)) => PinState::from_token(token.trim()),
        None => PinState::Error,
    }
}

fn check_pin_on_data(buffer: &[u8], lines: &[String], ctx: &mut HandlerCtx<'_>) -> Verdict {
    if let Some(err) = parse::response_error(buffer) {
        let message = match err {
            parse::ResponseError::Reported { message } => message,
            parse::ResponseError::Generic { raw } => raw,
        };
        return Verdict::Done(Err(ModemError::CheckPin(message)));
    }
    if !parse::is_ok(buffer) {
        return Verdict::Pending;
    }
    let Some(fragment) = parse::first_with_prefix(lines, "+CPIN") else {
        return Verdict::Done(Err(ModemError::CheckPin(
            "reply missing +CPIN fragment".to_owned(),
        )));
    };
    let state = pin_fragment_state(fragment);
    ctx.status.set_sim_unlocked(state == PinState::Ready);
    match state {
        PinState::Ready => Verdict::Done(Ok(CommandOutcome::Pin(state))),
        _ => Verdict::Done(Err(ModemError::PinRequired(state))),
    }
}

fn pin_unlock_on_data(buffer: &[u8], lines: &[String], ctx: &mut HandlerCtx<'_>) -> Verdict {
    if parse::response_error(buffer).is_some() {
        return Verdict::Done(Err(ModemError::PinIncorrect));
    }
    // An OK only acknowledges the command; the SIM confirms with a trailing
    // +CPIN line once the unlock actually went through.
    if parse::ends_with_crlf(buffer) {
        if let Some(last) = lines.last() {
            if last.starts_with("+CPIN") {
                let state = pin_fragment_state(last);
                ctx.status.set_sim_unlocked(state == PinState::Ready);
                return match state {
                    PinState::Ready => Verdict::Done(Ok(CommandOutcome::Pin(state))),
                    _ => Verdict::Done(Err(ModemError::PinRequired(state))),
                };
            }
        }
    }
    Verdict::Pending
}

fn check_network_on_data(buffer: &[u8], lines: &[String], ctx: &mut HandlerCtx<'_>) -> Verdict {
    if let Some(err) = parse::response_error(buffer) {
        return Verdict::Done(Err(err.into()));
    }
    if !parse::is_ok(buffer) {
        return Verdict::Pending;
    }
    let Some(fragment) = parse::first_with_prefix(lines, "+CREG: ") else {
        return Verdict::Done(Err(ModemError::Parse(lines.join("\n"))));
    };
    let Some(tail) = fragment.strip_prefix("+CREG: ") else {
        return Verdict::Done(Err(ModemError::Parse(fragment.to_owned())));
    };
    let mut fields = tail.split(',');
    let parsed = match (fields.next(), fields.next()) {
        (Some(action), Some(status)) => action
            .trim()
            .parse::<u8>()
            .and_then(|a| status.trim().parse::<u8>().map(|s| (a, s)))
            .ok(),
        _ => None,
    };
    let Some((action, status)) = parsed else {
        return Verdict::Done(Err(ModemError::ParseComma(tail.to_owned())));
    };
    let reading = NetworkRegistration::new(action, status);
    ctx.emit(ModemEvent::Network(reading));
    ctx.emit(ModemEvent::NetworkStatus(reading));
    Verdict::Done(Ok(CommandOutcome::Network(reading)))
}

fn sms_send_on_data(job: &mut Job, buffer: &[u8], lines: &[String]) -> Verdict {
    if let Some(err) = parse::response_error(buffer) {
        let message = match err {
            parse::ResponseError::Reported { message } => message,
            parse::ResponseError::Generic { raw } => raw,
        };
        return Verdict::Done(Err(ModemError::SmsSend(message)));
    }
    if parse::is_ok(buffer) {
        let reference = lines
            .iter()
            .find(|l| l.contains("+CMGS: "))
            .and_then(|l| l.split("+CMGS: ").last())
            .and_then(|n| n.trim().parse::<u8>().ok());
        return match reference {
            Some(n) => Verdict::Done(Ok(CommandOutcome::SmsReference(n))),
            None => Verdict::Done(Err(ModemError::SmsSend(
                "reply missing +CMGS reference".to_owned(),
            ))),
        };
    }
    if parse::is_waiting_for_input(lines) && job.sub_index == 0 {
        return match job.spec.subcommands.first() {
            Some(body) => {
                job.sub_index = 1;
                Verdict::Write(body.clone())
            }
            None => Verdict::Done(Err(ModemError::SmsSend("no PDU body attached".to_owned()))),
        };
    }
    Verdict::Pending
}

fn incoming_on_data(buffer: &[u8], lines: &[String], ctx: &mut HandlerCtx<'_>) -> Verdict {
    let terminated = parse::ends_with_crlf(buffer);
    if !terminated {
        return Verdict::Pending;
    }

    let mut handled = false;

    if let Some((short_id, data)) = parse::delivery_report(lines, terminated) {
        ctx.emit(ModemEvent::DeliveryReport { short_id, data });
        handled = true;
    } else if parse::has_delivery_header(lines) {
        // Header seen, payload line still in flight; hold the job open.
        return Verdict::Pending;
    }

    if parse::is_network_ready_banner(lines) {
        ctx.emit(ModemEvent::Network(NetworkRegistration::registered()));
        handled = true;
    }

    if parse::has_sms_indication(lines) {
        tracing::info!("new SMS indication received");
        handled = true;
    }

    if parse::has_registration_change(lines) {
        ctx.followups.push(crate::job::CommandSpec::check_network());
        handled = true;
    }

    if handled {
        Verdict::Done(Ok(CommandOutcome::Lines(lines.to_vec())))
    } else {
        Verdict::Pending
    }
}
