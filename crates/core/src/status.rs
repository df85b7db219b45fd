//! Shared lifecycle state of the supervised modem
//!
//! The supervisor owns the policy around these flags and counters; handlers
//! get only the documented narrow mutations (check-pin touches the SIM flag,
//! registration handling touches the network flag, reset clears the whole
//! lifecycle block).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use serde::Serialize;

/// Process-wide modem lifecycle flags and counters.
#[derive(Debug, Default)]
pub struct ModemStatus {
    initialized: AtomicBool,
    network_ready: AtomicBool,
    sim_unlocked: AtomicBool,
    /// Initialization attempts since the last success.
    retry_number: AtomicU32,
    /// Total soft resets; bounded by the supervisor.
    reset_number: AtomicU32,
    /// Consecutive failed registration checks.
    network_retry: AtomicU32,
    /// Consecutive failed liveness probes.
    brownout_number: AtomicU32,
}

/// Serializable point-in-time copy of [`ModemStatus`].
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ModemStatusSnapshot {
    pub initialized: bool,
    pub network_ready: bool,
    pub sim_unlocked: bool,
    pub retry_number: u32,
    pub reset_number: u32,
    pub network_retry: u32,
    pub brownout_number: u32,
}

impl ModemStatus {
    pub fn initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    pub fn network_ready(&self) -> bool {
        self.network_ready.load(Ordering::Relaxed)
    }

    pub fn sim_unlocked(&self) -> bool {
        self.sim_unlocked.load(Ordering::Relaxed)
    }

    pub fn retry_number(&self) -> u32 {
        self.retry_number.load(Ordering::Relaxed)
    }

    pub fn reset_number(&self) -> u32 {
        self.reset_number.load(Ordering::Relaxed)
    }

    pub fn network_retry(&self) -> u32 {
        self.network_retry.load(Ordering::Relaxed)
    }

    pub fn brownout_number(&self) -> u32 {
        self.brownout_number.load(Ordering::Relaxed)
    }

    pub(crate) fn set_initialized(&self, value: bool) {
        self.initialized.store(value, Ordering::Relaxed);
    }

    pub(crate) fn set_network_ready(&self, value: bool) {
        self.network_ready.store(value, Ordering::Relaxed);
    }

    pub(crate) fn set_sim_unlocked(&self, value: bool) {
        self.sim_unlocked.store(value, Ordering::Relaxed);
    }

    /// Increment and return the new value.
    pub(crate) fn bump_retry_number(&self) -> u32 {
        self.retry_number.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn bump_reset_number(&self) -> u32 {
        self.reset_number.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn bump_network_retry(&self) -> u32 {
        self.network_retry.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn bump_brownout_number(&self) -> u32 {
        self.brownout_number.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn zero_retry_number(&self) {
        self.retry_number.store(0, Ordering::Relaxed);
    }

    pub(crate) fn zero_reset_number(&self) {
        self.reset_number.store(0, Ordering::Relaxed);
    }

    pub(crate) fn zero_network_retry(&self) {
        self.network_retry.store(0, Ordering::Relaxed);
    }

    pub(crate) fn zero_brownout_number(&self) {
        self.brownout_number.store(0, Ordering::Relaxed);
    }

    /// State after a completed soft reset: nothing initialized, nothing
    /// registered, every recovery counter back to zero. The reset counter
    /// itself survives; only a successful initialization clears it.
    pub(crate) fn clear_after_reset(&self) {
        self.set_initialized(false);
        self.set_network_ready(false);
        self.zero_retry_number();
        self.zero_network_retry();
        self.zero_brownout_number();
    }

    pub fn snapshot(&self) -> ModemStatusSnapshot {
        ModemStatusSnapshot {
            initialized: self.initialized(),
            network_ready: self.network_ready(),
            sim_unlocked: self.sim_unlocked(),
            retry_number: self.retry_number(),
            reset_number: self.reset_number(),
            network_retry: self.network_retry(),
            brownout_number: self.brownout_number(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_bump_and_zero() {
        let status = ModemStatus::default();
        assert_eq!(status.bump_brownout_number(), 1);
        assert_eq!(status.bump_brownout_number(), 2);
        status.zero_brownout_number();
        assert_eq!(status.brownout_number(), 0);
    }

    #[test]
    fn test_clear_after_reset() {
        let status = ModemStatus::default();
        status.set_initialized(true);
        status.set_network_ready(true);
        status.bump_retry_number();
        status.bump_network_retry();
        status.bump_brownout_number();
        status.bump_reset_number();

        status.clear_after_reset();

        let snap = status.snapshot();
        assert!(!snap.initialized);
        assert!(!snap.network_ready);
        assert_eq!(snap.retry_number, 0);
        assert_eq!(snap.network_retry, 0);
        assert_eq!(snap.brownout_number, 0);
        // the reset counter is the supervisor's budget, not transient state
        assert_eq!(snap.reset_number, 1);
    }
}
