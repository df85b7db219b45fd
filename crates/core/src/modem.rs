//! The modem facade: wiring, configuration and the public API
//!
//! `Modem::new` spawns the three driver tasks (engine, supervisor, SMS
//! coordinator) over a caller-supplied serial link and PDU codec, and hands
//! back thin async accessors. Subscribe to events right after construction;
//! the cold-boot sequence starts immediately.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::engine::{Engine, EngineHandle};
use crate::error::{ModemError, Result};
use crate::job::DEFAULT_COMMAND_TIMEOUT;
use crate::pdu::PduCodec;
use crate::sms::{SmsCoordinator, SmsMsg};
use crate::status::{ModemStatus, ModemStatusSnapshot};
use crate::supervisor::Supervisor;
use crate::transport::SerialLink;
use crate::types::{ModemEvent, SmsId, SmsOptions, SmsSnapshot};

/// Default `AT+CNMI` configuration: buffer indications, route delivery
/// reports directly.
pub const DEFAULT_CNMI: &str = "2,1,2,1,0";

/// Event channel depth; slow subscribers lag rather than block the driver.
const EVENT_CAPACITY: usize = 256;

/// Construction-time configuration.
#[derive(Debug, Clone)]
pub struct ModemConfig {
    /// `AT+CNMI` string applied during initialization.
    pub custom_cnmi: String,
    /// Request delivery reports for outgoing SMS by default.
    pub delivery_report: bool,
    /// Policy flag for downstream SIM cleanup; no deletion is issued yet.
    pub auto_delete_from_sim: bool,
    /// Applied once when the SIM reports NEED_PIN.
    pub pin: Option<String>,
    /// SMSC override forwarded to the PDU codec.
    pub smsc: Option<String>,
    /// Default per-command timeout.
    pub command_timeout: Duration,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            custom_cnmi: DEFAULT_CNMI.to_owned(),
            delivery_report: true,
            auto_delete_from_sim: true,
            pin: None,
            smsc: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl ModemConfig {
    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = Some(pin.into());
        self
    }

    pub fn with_cnmi(mut self, cnmi: impl Into<String>) -> Self {
        self.custom_cnmi = cnmi.into();
        self
    }

    pub fn with_smsc(mut self, smsc: impl Into<String>) -> Self {
        self.smsc = Some(smsc.into());
        self
    }

    pub fn with_delivery_report(mut self, enabled: bool) -> Self {
        self.delivery_report = enabled;
        self
    }

    pub fn with_auto_delete(mut self, enabled: bool) -> Self {
        self.auto_delete_from_sim = enabled;
        self
    }
}

/// Handle to a supervised modem.
pub struct Modem {
    engine: EngineHandle,
    sms: mpsc::UnboundedSender<SmsMsg>,
    events: broadcast::Sender<ModemEvent>,
    status: Arc<ModemStatus>,
}

impl Modem {
    /// Spawn the driver over `link`. Initialization starts right away; the
    /// `Opened` event is the first thing subscribers see.
    pub fn new<L: SerialLink>(link: L, config: ModemConfig, codec: Arc<dyn PduCodec>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let status = Arc::new(ModemStatus::default());

        let engine = Engine::spawn(link, events.clone(), status.clone(), config.command_timeout);
        let sms = SmsCoordinator::spawn(
            engine.clone(),
            events.clone(),
            events.subscribe(),
            status.clone(),
            codec,
            config.clone(),
        );
        let _ = Supervisor::spawn(
            engine.clone(),
            events.clone(),
            events.subscribe(),
            status.clone(),
            config,
        );

        Self {
            engine,
            sms,
            events,
            status,
        }
    }

    /// Subscribe to the driver's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ModemEvent> {
        self.events.subscribe()
    }

    /// Current lifecycle flags and counters.
    pub fn status(&self) -> ModemStatusSnapshot {
        self.status.snapshot()
    }

    /// Queue an SMS for sending. Returns once the parts are generated; track
    /// progress through events or [`sms_status`](Self::sms_status).
    pub async fn send_sms(
        &self,
        receiver: &str,
        text: &str,
        options: SmsOptions,
    ) -> Result<SmsId> {
        let (done, rx) = oneshot::channel();
        self.sms
            .send(SmsMsg::Send {
                receiver: receiver.to_owned(),
                text: text.to_owned(),
                options,
                done,
            })
            .map_err(|_| ModemError::EngineClosed)?;
        rx.await.map_err(|_| ModemError::EngineClosed)?
    }

    /// Snapshot of a queued SMS, or `None` for an unknown id.
    pub async fn sms_status(&self, id: SmsId) -> Option<SmsSnapshot> {
        let (done, rx) = oneshot::channel();
        self.sms.send(SmsMsg::Status { id, done }).ok()?;
        rx.await.ok().flatten()
    }

    /// Replace the text of a queued SMS. Fails once any part left IDLE.
    pub async fn update_sms_text(&self, id: SmsId, text: &str) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.sms
            .send(SmsMsg::UpdateText {
                id,
                text: text.to_owned(),
                done,
            })
            .map_err(|_| ModemError::EngineClosed)?;
        rx.await.map_err(|_| ModemError::EngineClosed)?
    }

    /// Run an arbitrary AT command with the default OK/ERROR handler.
    pub async fn exec_raw(&self, command: &str) -> Result<Vec<String>> {
        self.engine.exec_raw(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ModemConfig::default();
        assert_eq!(config.custom_cnmi, "2,1,2,1,0");
        assert!(config.delivery_report);
        assert!(config.auto_delete_from_sim);
        assert_eq!(config.pin, None);
        assert_eq!(config.command_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_config_builders() {
        let config = ModemConfig::default()
            .with_pin("1234")
            .with_cnmi("2,2,0,0,0")
            .with_smsc("+491710760000")
            .with_delivery_report(false)
            .with_auto_delete(false);
        assert_eq!(config.pin.as_deref(), Some("1234"));
        assert_eq!(config.custom_cnmi, "2,2,0,0,0");
        assert_eq!(config.smsc.as_deref(), Some("+491710760000"));
        assert!(!config.delivery_report);
        assert!(!config.auto_delete_from_sim);
    }
}
