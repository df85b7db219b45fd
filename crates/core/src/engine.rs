//! Serialized AT command engine
//!
//! One task owns the serial link, a strict FIFO job queue and the
//! accumulation buffer. Exactly one command is outstanding at a time: the
//! head job's bytes are written once, then every inbound chunk is fed to the
//! head job's handler until it completes, times out, or the queue is
//! cleared. Immediate jobs jump the queue but never preempt a command whose
//! bytes already reached the port.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

use crate::error::{ModemError, Result};
use crate::handler::{Handler, HandlerCtx, Verdict};
use crate::job::{CommandKind, CommandOutcome, CommandSpec, Job, JobId, JobResult, CTRL_Z, ESC};
use crate::parse;
use crate::status::ModemStatus;
use crate::transport::SerialLink;
use crate::types::ModemEvent;

pub(crate) enum EngineMsg {
    Exec {
        spec: CommandSpec,
        done: oneshot::Sender<JobResult>,
    },
}

/// Cheap handle used by the supervisor, the SMS coordinator and the facade
/// to enqueue work.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineMsg>,
}

impl EngineHandle {
    /// Enqueue a job and return its completion channel without awaiting.
    /// Jobs submitted from one task reach the modem in submission order.
    pub(crate) fn submit(&self, spec: CommandSpec) -> oneshot::Receiver<JobResult> {
        let (done, rx) = oneshot::channel();
        let _ = self.tx.send(EngineMsg::Exec { spec, done });
        rx
    }

    /// Enqueue a job and wait for its result.
    pub(crate) async fn exec(&self, spec: CommandSpec) -> JobResult {
        match self.submit(spec).await {
            Ok(result) => result,
            Err(_) => Err(ModemError::EngineClosed),
        }
    }

    /// Enqueue a job whose result is only observable through events.
    pub(crate) fn kick(&self, spec: CommandSpec) {
        let _ = self.submit(spec);
    }

    /// Run an arbitrary AT command with the default OK/ERROR handler and
    /// return the parsed reply fragments.
    pub async fn exec_raw(&self, command: &str) -> Result<Vec<String>> {
        match self.exec(CommandSpec::raw(command)).await? {
            CommandOutcome::Lines(lines) => Ok(lines),
            _ => Ok(Vec::new()),
        }
    }
}

pub(crate) struct Engine<L: SerialLink> {
    link: L,
    rx: mpsc::UnboundedReceiver<EngineMsg>,
    events: broadcast::Sender<ModemEvent>,
    status: Arc<ModemStatus>,
    queue: VecDeque<Job>,
    /// Raw bytes since the active job started; owned by that job's handler.
    buffer: Vec<u8>,
    /// Guards against reentrant handler invocation.
    busy: bool,
    next_id: JobId,
    default_timeout: Duration,
}

impl<L: SerialLink> Engine<L> {
    /// Spawn the engine task and return its handle.
    pub(crate) fn spawn(
        link: L,
        events: broadcast::Sender<ModemEvent>,
        status: Arc<ModemStatus>,
        default_timeout: Duration,
    ) -> EngineHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Engine {
            link,
            rx,
            events,
            status,
            queue: VecDeque::new(),
            buffer: Vec::new(),
            busy: false,
            next_id: 0,
            default_timeout,
        };
        tokio::spawn(engine.run());
        EngineHandle { tx }
    }

    async fn run(mut self) {
        tracing::debug!("command engine running");
        loop {
            self.activate_head().await;
            let deadline = self.queue.front().and_then(|j| j.deadline);
            tokio::select! {
                biased;
                msg = self.rx.recv() => match msg {
                    Some(EngineMsg::Exec { spec, done }) => self.enqueue(spec, Some(done)),
                    None => break,
                },
                chunk = self.link.read() => match chunk {
                    Ok(chunk) => {
                        if !chunk.is_empty() {
                            self.ingest(&chunk).await;
                        }
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "serial link failed");
                        let _ = self.events.send(ModemEvent::Error(err.to_string()));
                        break;
                    }
                },
                _ = sleep_until_opt(deadline), if deadline.is_some() => self.expire_head(),
            }
        }
        // link gone or every handle dropped: fail whatever is still queued
        while let Some(job) = self.queue.pop_front() {
            job.finish(Err(ModemError::Cancelled));
        }
        tracing::debug!("command engine stopped");
    }

    fn enqueue(&mut self, spec: CommandSpec, done: Option<oneshot::Sender<JobResult>>) {
        self.next_id += 1;
        let job = Job::new(self.next_id, spec, done);
        tracing::debug!(id = job.id, kind = ?job.spec.kind, immediate = job.spec.immediate, "job enqueued");
        if job.spec.immediate {
            // Head insertion, but an already-written command is never
            // preempted; the new job runs as soon as the head completes.
            if self.queue.front().is_some_and(|j| j.written) {
                self.queue.insert(1, job);
            } else {
                self.queue.push_front(job);
            }
        } else {
            self.queue.push_back(job);
        }
    }

    /// Write the head job's command bytes the first time it is observed as
    /// head. Appends CR unless the command already ends in SUB or ESC.
    async fn activate_head(&mut self) {
        loop {
            let Some(job) = self.queue.front_mut() else {
                return;
            };
            if job.written {
                return;
            }
            let mut bytes = job.spec.command.clone();
            if !matches!(bytes.last(), Some(&CTRL_Z) | Some(&ESC)) {
                bytes.push(b'\r');
            }
            tracing::debug!(id = job.id, kind = ?job.spec.kind, "writing command");
            match self.link.write(&bytes).await {
                Ok(()) => {
                    job.written = true;
                    job.deadline =
                        Some(Instant::now() + job.spec.timeout.unwrap_or(self.default_timeout));
                    if matches!(job.spec.handler, Handler::AbortPrompt) {
                        // Fire-and-forget write; no reply expected.
                        if let Some(job) = self.queue.pop_front() {
                            job.finish(Ok(CommandOutcome::Written));
                        }
                        self.buffer.clear();
                        continue;
                    }
                    return;
                }
                Err(err) => {
                    if let Some(job) = self.queue.pop_front() {
                        job.finish(Err(err.into()));
                    }
                    continue;
                }
            }
        }
    }

    async fn ingest(&mut self, chunk: &[u8]) {
        tracing::trace!(len = chunk.len(), "inbound bytes");
        self.buffer.extend_from_slice(chunk);
        if self.queue.is_empty() {
            // Unsolicited data: synthesize a job so the incoming handler
            // owns the buffer like any other.
            self.next_id += 1;
            let mut job = Job::new(self.next_id, CommandSpec::incoming(), None);
            job.written = true;
            job.deadline = Some(Instant::now() + self.default_timeout);
            tracing::debug!(id = job.id, "incoming-data job created");
            self.queue.push_front(job);
        }
        self.dispatch().await;
    }

    /// Feed the accumulated buffer to the head job's handler.
    async fn dispatch(&mut self) {
        if self.busy {
            return;
        }
        let lines = parse::split_lines(&self.buffer);
        let terminated = parse::ends_with_crlf(&self.buffer);
        let mut followups = Vec::new();
        let verdict = {
            let Some(job) = self.queue.front_mut() else {
                return;
            };
            if !job.written {
                return;
            }
            let handler = job.spec.handler;
            // A delivery report may arrive while another command is
            // outstanding; capture it so the SMS side still sees it.
            if handler.allows_delivery_capture() && !job.cds_captured {
                if let Some((short_id, data)) = parse::delivery_report(&lines, terminated) {
                    tracing::debug!(short_id, "delivery report captured mid-command");
                    let _ = self.events.send(ModemEvent::DeliveryReport { short_id, data });
                    job.cds_captured = true;
                }
            }
            self.busy = true;
            let mut ctx = HandlerCtx {
                events: &self.events,
                status: &self.status,
                followups: &mut followups,
            };
            let verdict = handler.on_data(job, &self.buffer, &lines, &mut ctx);
            self.busy = false;
            verdict
        };
        match verdict {
            Verdict::Pending => {}
            Verdict::Write(bytes) => {
                tracing::debug!(len = bytes.len(), "writing subcommand");
                if let Err(err) = self.link.write(&bytes).await {
                    if let Some(job) = self.queue.pop_front() {
                        job.finish(Err(err.into()));
                    }
                    self.buffer.clear();
                }
            }
            Verdict::Done(result) => {
                if let Some(job) = self.queue.pop_front() {
                    tracing::debug!(id = job.id, ok = result.is_ok(), "job completed");
                    job.finish(result);
                }
                self.buffer.clear();
            }
        }
        for spec in followups {
            self.enqueue(spec, None);
        }
    }

    /// The head job's deadline fired.
    fn expire_head(&mut self) {
        let lines = parse::split_lines(&self.buffer);
        let mut followups = Vec::new();
        let result = {
            let Some(job) = self.queue.front() else {
                return;
            };
            tracing::warn!(id = job.id, kind = ?job.spec.kind, "job deadline expired");
            let mut ctx = HandlerCtx {
                events: &self.events,
                status: &self.status,
                followups: &mut followups,
            };
            job.spec.handler.on_timeout(&lines, &mut ctx)
        };
        let Some(job) = self.queue.pop_front() else {
            return;
        };
        if job.spec.kind == CommandKind::Reset {
            self.complete_reset();
        }
        if let Err(ref err) = result {
            let _ = self.events.send(ModemEvent::Timeout(job.info()));
            let _ = self.events.send(ModemEvent::Error(err.to_string()));
        }
        job.finish(result);
        self.buffer.clear();
        for spec in followups {
            self.enqueue(spec, None);
        }
    }

    /// The settle window after `AT+CFUN` elapsed: wholesale queue clear,
    /// lifecycle back to cold state. Pending jobs fail with `Cancelled`.
    fn complete_reset(&mut self) {
        let cancelled = self.queue.len();
        while let Some(job) = self.queue.pop_front() {
            job.finish(Err(ModemError::Cancelled));
        }
        self.buffer.clear();
        self.status.clear_after_reset();
        tracing::info!(cancelled, "reset settled, queue cleared");
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
