//! Modem supervision: cold boot, liveness, registration, reset policy
//!
//! The supervisor owns the lifecycle flags and counters. It runs the
//! initialization sequence, probes liveness every 20 s (brownout detector),
//! checks registration every 60 s (installed lazily on the first reading),
//! and escalates persistent failures into a bounded soft-reset policy.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::engine::EngineHandle;
use crate::error::ModemError;
use crate::job::CommandSpec;
use crate::modem::ModemConfig;
use crate::status::ModemStatus;
use crate::types::{ModemEvent, NetworkRegistration, PinState};

/// Liveness probe period.
const BROWNOUT_PERIOD: Duration = Duration::from_secs(20);
/// Registration check period.
const NETWORK_PERIOD: Duration = Duration::from_secs(60);
/// Initialization attempts before the failure is surfaced.
const INIT_RETRY_LIMIT: u32 = 3;
/// Consecutive failed probes tolerated before a reset.
const BROWNOUT_LIMIT: u32 = 3;
/// Consecutive lost registration readings tolerated before a reset.
const NETWORK_RETRY_LIMIT: u32 = 3;
/// Soft resets allowed before the modem is declared dead.
const RESET_LIMIT: u32 = 5;
/// `AT+CFUN` argument: full functionality, reset the MT first.
const RESET_MODE: &str = "1,1";

enum InitError {
    /// The modem did not even answer `AT`; no point retrying.
    Fatal(ModemError),
    /// A later step failed; a reset may recover it.
    Recoverable(ModemError),
}

pub(crate) struct Supervisor {
    engine: EngineHandle,
    events: broadcast::Sender<ModemEvent>,
    status: Arc<ModemStatus>,
    config: ModemConfig,
}

impl Supervisor {
    pub(crate) fn spawn(
        engine: EngineHandle,
        events: broadcast::Sender<ModemEvent>,
        events_rx: broadcast::Receiver<ModemEvent>,
        status: Arc<ModemStatus>,
        config: ModemConfig,
    ) -> tokio::task::JoinHandle<()> {
        let supervisor = Supervisor {
            engine,
            events,
            status,
            config,
        };
        tokio::spawn(supervisor.run(events_rx))
    }

    async fn run(self, mut events_rx: broadcast::Receiver<ModemEvent>) {
        let _ = self.events.send(ModemEvent::Opened);
        self.initialize_with_retry().await;

        let mut brownout = interval_at(Instant::now() + BROWNOUT_PERIOD, BROWNOUT_PERIOD);
        brownout.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // installed lazily once the first registration reading arrives
        let mut network: Option<Interval> = None;

        loop {
            tokio::select! {
                biased;
                _ = brownout.tick() => self.brownout_probe().await,
                _ = tick_opt(&mut network) => {
                    if self.status.initialized() {
                        self.engine.kick(CommandSpec::check_network());
                    }
                }
                event = events_rx.recv() => match event {
                    Ok(ModemEvent::Network(reading)) => {
                        if network.is_none() {
                            let mut monitor =
                                interval_at(Instant::now() + NETWORK_PERIOD, NETWORK_PERIOD);
                            monitor.set_missed_tick_behavior(MissedTickBehavior::Delay);
                            network = Some(monitor);
                            tracing::debug!("network monitor installed");
                        }
                        self.handle_network(reading).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "supervisor lagged behind event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    /// The cold-boot sequence: probe, verbose errors, PIN, CNMI, PDU mode,
    /// then kick a registration check.
    async fn initialize(&self) -> Result<(), InitError> {
        tracing::info!("initializing modem");
        self.engine
            .exec(CommandSpec::check_modem())
            .await
            .map_err(InitError::Fatal)?;
        self.engine
            .exec(CommandSpec::verbose_errors())
            .await
            .map_err(InitError::Recoverable)?;

        if let Err(err) = self.engine.exec(CommandSpec::check_pin()).await {
            match (&err, &self.config.pin) {
                (ModemError::PinRequired(PinState::NeedPin), Some(pin)) => {
                    // one attempt only; a wrong PIN must not burn retries
                    tracing::info!("SIM locked, attempting unlock");
                    self.engine
                        .exec(CommandSpec::unlock_pin(pin))
                        .await
                        .map_err(InitError::Recoverable)?;
                }
                _ => return Err(InitError::Recoverable(err)),
            }
        }

        if let Err(err) = self
            .engine
            .exec(CommandSpec::cnmi(&self.config.custom_cnmi))
            .await
        {
            // indication routing is degraded but the modem is usable
            tracing::warn!(error = %err, "CNMI configuration failed");
        }

        self.engine
            .exec(CommandSpec::sms_mode())
            .await
            .map_err(InitError::Recoverable)?;

        self.status.set_initialized(true);
        self.status.zero_retry_number();
        self.status.zero_reset_number();
        let _ = self.events.send(ModemEvent::Initialized);
        self.engine.kick(CommandSpec::check_network());
        tracing::info!("modem initialized");
        Ok(())
    }

    async fn initialize_with_retry(&self) {
        let mut attempts = 0u32;
        loop {
            match self.initialize().await {
                Ok(()) => return,
                Err(InitError::Fatal(err)) => {
                    tracing::error!(error = %err, "modem unreachable, giving up");
                    let _ = self.events.send(ModemEvent::Error(err.to_string()));
                    return;
                }
                Err(InitError::Recoverable(err)) => {
                    attempts += 1;
                    self.status.bump_retry_number();
                    tracing::warn!(error = %err, attempts, "initialization failed");
                    if attempts < INIT_RETRY_LIMIT {
                        if self.reset().await.is_err() {
                            let _ = self
                                .events
                                .send(ModemEvent::Error(ModemError::FatalReset.to_string()));
                            return;
                        }
                    } else {
                        let _ = self.events.send(ModemEvent::Error(err.to_string()));
                        return;
                    }
                }
            }
        }
    }

    /// Issue one liveness probe and keep the brownout counter.
    async fn brownout_probe(&self) {
        if self.status.initialized() {
            match self.engine.exec(CommandSpec::check_modem()).await {
                Ok(_) => {
                    self.status.zero_brownout_number();
                    return;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "liveness probe failed");
                }
            }
        }
        let _ = self.events.send(ModemEvent::Brownout);
        let brownouts = self.status.bump_brownout_number();
        if brownouts > BROWNOUT_LIMIT {
            tracing::warn!(brownouts, "brownout threshold exceeded, resetting");
            self.reset_and_reinit().await;
        }
    }

    /// Track one registration reading.
    async fn handle_network(&self, reading: NetworkRegistration) {
        if reading.status.is_registered() {
            if !self.status.network_ready() {
                tracing::info!(status = ?reading.status, "network registered");
            }
            self.status.set_network_ready(true);
            self.status.zero_network_retry();
        } else {
            self.status.set_network_ready(false);
            let losses = self.status.bump_network_retry();
            tracing::warn!(losses, status = ?reading.status, "network not registered");
            if losses > NETWORK_RETRY_LIMIT {
                self.reset_and_reinit().await;
            }
        }
    }

    /// Soft-reset the modem: escape any pending PDU prompt, then `AT+CFUN`.
    /// The engine clears the queue when the settle window elapses.
    async fn reset(&self) -> Result<(), ModemError> {
        let resets = self.status.bump_reset_number();
        if resets > RESET_LIMIT {
            tracing::error!("reset budget exhausted");
            return Err(ModemError::FatalReset);
        }
        tracing::warn!(resets, "soft-resetting modem");
        self.engine.exec(CommandSpec::abort_prompt()).await?;
        self.engine.exec(CommandSpec::reset(RESET_MODE)).await?;
        Ok(())
    }

    async fn reset_and_reinit(&self) {
        match self.reset().await {
            Ok(()) => self.initialize_with_retry().await,
            Err(err) => {
                let _ = self.events.send(ModemEvent::Error(err.to_string()));
            }
        }
    }
}

async fn tick_opt(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::job::DEFAULT_COMMAND_TIMEOUT;
    use crate::transport::MockLink;

    fn supervisor_fixture() -> (Supervisor, tokio::task::JoinHandle<()>) {
        let (link, mut handle) = MockLink::pair();
        let (events, _rx) = broadcast::channel(64);
        let status = Arc::new(ModemStatus::default());
        let engine = Engine::spawn(link, events.clone(), status.clone(), DEFAULT_COMMAND_TIMEOUT);
        // drain writes so the engine never blocks on the port
        let drain = tokio::spawn(async move {
            loop {
                if handle.written().await.is_empty() {
                    break;
                }
            }
        });
        (
            Supervisor {
                engine,
                events,
                status,
                config: ModemConfig::default(),
            },
            drain,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_budget_is_bounded() {
        let (supervisor, _drain) = supervisor_fixture();
        for _ in 0..RESET_LIMIT {
            assert!(supervisor.reset().await.is_ok());
        }
        assert!(matches!(
            supervisor.reset().await,
            Err(ModemError::FatalReset)
        ));
        assert_eq!(supervisor.status.reset_number(), RESET_LIMIT + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_brownout_probe_emits_event_when_uninitialized() {
        let (supervisor, _drain) = supervisor_fixture();
        let mut events = supervisor.events.subscribe();
        supervisor.brownout_probe().await;
        assert_eq!(events.recv().await.unwrap(), ModemEvent::Brownout);
        assert_eq!(supervisor.status.brownout_number(), 1);
    }
}
