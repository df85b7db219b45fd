//! SMS coordination: outbox, spooler and delivery-report routing
//!
//! The coordinator owns every SMS record by id and is the only writer of
//! part state, so each part transition emits exactly one status event. It
//! talks to the engine through the handle and learns about delivery reports
//! from the event stream, which keeps the SMS side free of any reference
//! back into the modem internals.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::engine::EngineHandle;
use crate::error::{ModemError, Result};
use crate::job::{CommandOutcome, CommandSpec};
use crate::modem::ModemConfig;
use crate::pdu::{NumberType, PduCodec, PduPart, PduRequest, TpduType};
use crate::status::ModemStatus;
use crate::types::{
    ModemEvent, PartId, PartStatus, SmsErrorEvent, SmsId, SmsOptions, SmsPartSnapshot,
    SmsSnapshot, SmsStatus, SmsStatusChange,
};

/// Outbox inspection period.
const SPOOL_PERIOD: Duration = Duration::from_millis(500);

/// Requests the facade sends the coordinator, plus internal part outcomes.
pub(crate) enum SmsMsg {
    Send {
        receiver: String,
        text: String,
        options: SmsOptions,
        done: oneshot::Sender<Result<SmsId>>,
    },
    Status {
        id: SmsId,
        done: oneshot::Sender<Option<SmsSnapshot>>,
    },
    UpdateText {
        id: SmsId,
        text: String,
        done: oneshot::Sender<Result<()>>,
    },
    PartOutcome {
        sms: SmsId,
        part: PartId,
        outcome: Result<u8>,
    },
}

struct PartRecord {
    id: PartId,
    pdu: PduPart,
    /// `+CMGS:` reference used to correlate the delivery report.
    short_reference: Option<u8>,
    status: PartStatus,
    error: Option<String>,
}

struct SmsRecord {
    id: SmsId,
    request: PduRequest,
    parts: Vec<PartRecord>,
    /// Cleared by the spooler when the message is handed to the engine.
    send_requested: bool,
}

impl SmsRecord {
    /// Aggregate status: the last part once it has left IDLE, the first part
    /// otherwise. DELIVERED is only reported once every part got there, so
    /// an out-of-order report cannot claim early delivery.
    fn aggregate_status(&self) -> SmsStatus {
        let Some(last) = self.parts.last() else {
            return SmsStatus::Idle;
        };
        let candidate = if last.status != PartStatus::Idle {
            last.status
        } else {
            self.parts[0].status
        };
        if candidate == PartStatus::Delivered
            && !self.parts.iter().all(|p| p.status == PartStatus::Delivered)
        {
            return SmsStatus::Sent;
        }
        candidate.into()
    }
}

pub(crate) struct SmsCoordinator {
    engine: EngineHandle,
    events: broadcast::Sender<ModemEvent>,
    status: Arc<ModemStatus>,
    codec: Arc<dyn PduCodec>,
    config: ModemConfig,
    rx: mpsc::UnboundedReceiver<SmsMsg>,
    /// Clone handed to part-send tasks for their outcomes.
    tx: mpsc::UnboundedSender<SmsMsg>,
    outbox: VecDeque<SmsId>,
    /// Records outlive the outbox so late delivery reports still route.
    store: BTreeMap<SmsId, SmsRecord>,
    next_sms: SmsId,
    next_part: PartId,
}

impl SmsCoordinator {
    pub(crate) fn spawn(
        engine: EngineHandle,
        events: broadcast::Sender<ModemEvent>,
        events_rx: broadcast::Receiver<ModemEvent>,
        status: Arc<ModemStatus>,
        codec: Arc<dyn PduCodec>,
        config: ModemConfig,
    ) -> mpsc::UnboundedSender<SmsMsg> {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = SmsCoordinator {
            engine,
            events,
            status,
            codec,
            config,
            rx,
            tx: tx.clone(),
            outbox: VecDeque::new(),
            store: BTreeMap::new(),
            next_sms: 0,
            next_part: 0,
        };
        tokio::spawn(coordinator.run(events_rx));
        tx
    }

    async fn run(mut self, mut events_rx: broadcast::Receiver<ModemEvent>) {
        let mut spooler = interval_at(Instant::now() + SPOOL_PERIOD, SPOOL_PERIOD);
        spooler.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                msg = self.rx.recv() => match msg {
                    Some(SmsMsg::Send { receiver, text, options, done }) => {
                        let _ = done.send(self.create(&receiver, &text, options));
                    }
                    Some(SmsMsg::Status { id, done }) => {
                        let _ = done.send(self.snapshot(id));
                    }
                    Some(SmsMsg::UpdateText { id, text, done }) => {
                        let _ = done.send(self.update_text(id, text));
                    }
                    Some(SmsMsg::PartOutcome { sms, part, outcome }) => {
                        self.on_part_outcome(sms, part, outcome);
                    }
                    None => break,
                },
                event = events_rx.recv() => match event {
                    Ok(ModemEvent::DeliveryReport { short_id, data }) => {
                        self.route_delivery(short_id, &data);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "SMS coordinator lagged behind event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = spooler.tick() => self.spool(),
            }
        }
    }

    /// Build a record, queue it in the outbox and mark it for sending.
    fn create(&mut self, receiver: &str, text: &str, options: SmsOptions) -> Result<SmsId> {
        let request = PduRequest {
            smsc: options.smsc.clone().or_else(|| self.config.smsc.clone()),
            smsc_type: NumberType::International,
            receiver: sanitize_receiver(receiver),
            receiver_type: options.receiver_type,
            encoding: options.encoding,
            request_status: options.delivery_report.unwrap_or(self.config.delivery_report),
            text: text.to_owned(),
        };
        let parts = self.build_parts(&request)?;
        self.next_sms += 1;
        let id = self.next_sms;
        tracing::info!(sms = id, parts = parts.len(), receiver = %request.receiver, "SMS queued");
        self.store.insert(
            id,
            SmsRecord {
                id,
                request,
                parts,
                send_requested: true,
            },
        );
        self.outbox.push_back(id);
        Ok(id)
    }

    fn build_parts(&mut self, request: &PduRequest) -> Result<Vec<PartRecord>> {
        let pdus = self.codec.generate(request)?;
        if pdus.is_empty() {
            return Err(ModemError::Pdu("codec produced no parts".to_owned()));
        }
        Ok(pdus
            .into_iter()
            .map(|pdu| {
                self.next_part += 1;
                PartRecord {
                    id: self.next_part,
                    pdu,
                    short_reference: None,
                    status: PartStatus::Idle,
                    error: None,
                }
            })
            .collect())
    }

    /// One head decision per tick: send it, retire it, or rotate it out of
    /// the way so a stuck message cannot block the queue.
    fn spool(&mut self) {
        if !(self.status.initialized() && self.status.network_ready()) {
            return;
        }
        let Some(&id) = self.outbox.front() else {
            return;
        };
        let Some(record) = self.store.get_mut(&id) else {
            self.outbox.pop_front();
            return;
        };
        let aggregate = record.aggregate_status();
        if record.send_requested && aggregate == SmsStatus::Idle {
            record.send_requested = false;
            self.dispatch_sms(id);
        } else if matches!(aggregate, SmsStatus::Sent | SmsStatus::Delivered) {
            self.outbox.pop_front();
            tracing::debug!(sms = id, status = ?aggregate, "SMS left the outbox");
        } else {
            self.outbox.rotate_left(1);
        }
    }

    /// Enqueue one send job per part, in order, and collect the outcomes
    /// through the internal channel.
    fn dispatch_sms(&mut self, id: SmsId) {
        let Some(record) = self.store.get_mut(&id) else {
            return;
        };
        tracing::info!(sms = id, parts = record.parts.len(), "sending SMS");
        for index in 0..record.parts.len() {
            set_part_status(&self.events, record, index, PartStatus::Sending, None);
            let part = &record.parts[index];
            let spec = CommandSpec::sms_send(part.pdu.tpdu_length, &part.pdu.smsc_tpdu, part.id);
            let pending = self.engine.submit(spec);
            let tx = self.tx.clone();
            let part_id = part.id;
            tokio::spawn(async move {
                let outcome = match pending.await {
                    Ok(Ok(CommandOutcome::SmsReference(reference))) => Ok(reference),
                    Ok(Ok(_)) => Err(ModemError::SmsSend("unexpected engine outcome".to_owned())),
                    Ok(Err(err)) => Err(err),
                    Err(_) => Err(ModemError::EngineClosed),
                };
                let _ = tx.send(SmsMsg::PartOutcome {
                    sms: id,
                    part: part_id,
                    outcome,
                });
            });
        }
    }

    fn on_part_outcome(&mut self, sms: SmsId, part: PartId, outcome: Result<u8>) {
        let Some(record) = self.store.get_mut(&sms) else {
            return;
        };
        let Some(index) = record.parts.iter().position(|p| p.id == part) else {
            return;
        };
        match outcome {
            Ok(reference) => {
                record.parts[index].short_reference = Some(reference);
                tracing::debug!(sms, part, reference, "part accepted by the modem");
                set_part_status(&self.events, record, index, PartStatus::Sent, None);
            }
            Err(err) => {
                let message = err.to_string();
                record.parts[index].error = Some(message.clone());
                let _ = self.events.send(ModemEvent::SmsError(SmsErrorEvent {
                    sms,
                    part,
                    error: message.clone(),
                    error_status: None,
                }));
                set_part_status(&self.events, record, index, PartStatus::Error, Some(message));
            }
        }
    }

    /// Correlate a raw delivery report with the part that carries its
    /// reference. Dispatched to at most one part, at most once.
    fn route_delivery(&mut self, short_id: u8, data: &str) {
        let report = match self.codec.parse_delivery(data) {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(short_id, error = %err, "unparseable delivery report");
                return;
            }
        };
        if report.tpdu_type != TpduType::StatusReport {
            tracing::debug!(short_id, tpdu = ?report.tpdu_type, "ignoring non-status-report PDU");
            return;
        }
        for record in self.store.values_mut() {
            let Some(index) = record
                .parts
                .iter()
                .position(|p| p.short_reference == Some(report.reference))
            else {
                continue;
            };
            if record.parts[index].status != PartStatus::Sent {
                tracing::debug!(reference = report.reference, "duplicate delivery report ignored");
                return;
            }
            if report.status == 0x00 {
                set_part_status(
                    &self.events,
                    record,
                    index,
                    PartStatus::Delivered,
                    Some(delivery_status_message(report.status)),
                );
            } else {
                let message = delivery_status_message(report.status);
                record.parts[index].error = Some(message.clone());
                let _ = self.events.send(ModemEvent::SmsError(SmsErrorEvent {
                    sms: record.id,
                    part: record.parts[index].id,
                    error: message.clone(),
                    error_status: Some(report.status),
                }));
                set_part_status(&self.events, record, index, PartStatus::Error, Some(message));
            }
            return;
        }
        tracing::debug!(reference = report.reference, "delivery report matched no part");
    }

    /// Regenerate the part list for a new text, allowed only while every
    /// part is still IDLE.
    fn update_text(&mut self, id: SmsId, text: String) -> Result<()> {
        let Some(record) = self.store.get(&id) else {
            return Err(ModemError::UnknownSms(id));
        };
        if record.parts.iter().any(|p| p.status != PartStatus::Idle) {
            return Err(ModemError::SmsSend(
                "text can only change before sending starts".to_owned(),
            ));
        }
        let mut request = record.request.clone();
        request.text = text;
        let parts = self.build_parts(&request)?;
        if let Some(record) = self.store.get_mut(&id) {
            record.request = request;
            record.parts = parts;
        }
        Ok(())
    }

    fn snapshot(&self, id: SmsId) -> Option<SmsSnapshot> {
        self.store.get(&id).map(|record| SmsSnapshot {
            id: record.id,
            receiver: record.request.receiver.clone(),
            status: record.aggregate_status(),
            parts: record
                .parts
                .iter()
                .map(|p| SmsPartSnapshot {
                    id: p.id,
                    short_reference: p.short_reference,
                    status: p.status,
                    error: p.error.clone(),
                })
                .collect(),
        })
    }
}

/// Single choke point for part transitions; guarantees one status event per
/// transition.
fn set_part_status(
    events: &broadcast::Sender<ModemEvent>,
    record: &mut SmsRecord,
    index: usize,
    status: PartStatus,
    message: Option<String>,
) {
    if record.parts[index].status == status {
        return;
    }
    record.parts[index].status = status;
    let change = SmsStatusChange {
        sms: record.id,
        part: record.parts[index].id,
        part_status: status,
        sms_status: record.aggregate_status(),
        message,
    };
    let _ = events.send(ModemEvent::SmsStatusChange(change));
}

/// Strip number separators the PDU codec must not see.
fn sanitize_receiver(receiver: &str) -> String {
    receiver
        .chars()
        .filter(|c| !matches!(c, '.' | '-' | '+') && !c.is_whitespace())
        .collect()
}

/// TP-Status octet map for delivery reports.
fn delivery_status_message(status: u8) -> String {
    match status {
        0x00 => "delivered",
        0x41 => "incompatible destination",
        0x43 => "not available",
        0x50 => "recipient not registered",
        0x60 => "full",
        0x61 => "busy",
        0x62 => "not answering",
        0x72 => "line suspended",
        other => return format!("delivery status {other:#04x}"),
    }
    .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::SmsEncoding;

    fn record_with_statuses(statuses: &[PartStatus]) -> SmsRecord {
        SmsRecord {
            id: 1,
            request: PduRequest {
                smsc: None,
                smsc_type: NumberType::International,
                receiver: "4915112345678".to_owned(),
                receiver_type: NumberType::International,
                encoding: SmsEncoding::Gsm7,
                request_status: true,
                text: "hi".to_owned(),
            },
            parts: statuses
                .iter()
                .enumerate()
                .map(|(i, &status)| PartRecord {
                    id: i as PartId + 1,
                    pdu: PduPart {
                        tpdu_length: 10,
                        smsc_tpdu: "00".to_owned(),
                    },
                    short_reference: None,
                    status,
                    error: None,
                })
                .collect(),
            send_requested: false,
        }
    }

    #[test]
    fn test_sanitize_receiver_strips_separators() {
        assert_eq!(sanitize_receiver("+49 151.1234-5678"), "4915112345678");
    }

    #[test]
    fn test_aggregate_uses_last_part_once_it_moved() {
        let record = record_with_statuses(&[PartStatus::Sent, PartStatus::Sending]);
        assert_eq!(record.aggregate_status(), SmsStatus::Sending);
    }

    #[test]
    fn test_aggregate_falls_back_to_first_part() {
        let record = record_with_statuses(&[PartStatus::Sending, PartStatus::Idle]);
        assert_eq!(record.aggregate_status(), SmsStatus::Sending);
    }

    #[test]
    fn test_aggregate_delivered_requires_all_parts_delivered() {
        let record = record_with_statuses(&[PartStatus::Sent, PartStatus::Delivered]);
        assert_eq!(record.aggregate_status(), SmsStatus::Sent);

        let record = record_with_statuses(&[PartStatus::Delivered, PartStatus::Delivered]);
        assert_eq!(record.aggregate_status(), SmsStatus::Delivered);
    }

    #[test]
    fn test_delivery_status_map() {
        assert_eq!(delivery_status_message(0x00), "delivered");
        assert_eq!(delivery_status_message(0x41), "incompatible destination");
        assert_eq!(delivery_status_message(0x62), "not answering");
        assert_eq!(delivery_status_message(0x7F), "delivery status 0x7f");
    }

    #[test]
    fn test_part_transition_emits_exactly_one_event() {
        let (events, mut rx) = broadcast::channel(16);
        let mut record = record_with_statuses(&[PartStatus::Idle]);

        set_part_status(&events, &mut record, 0, PartStatus::Sending, None);
        set_part_status(&events, &mut record, 0, PartStatus::Sending, None);

        assert!(matches!(
            rx.try_recv().unwrap(),
            ModemEvent::SmsStatusChange(change)
                if change.part_status == PartStatus::Sending
        ));
        assert!(rx.try_recv().is_err());
    }
}
