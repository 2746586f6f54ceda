//! In-memory output driver for development machines and tests.
//! Writes are silent; every level change is recorded.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use diffuser_core::error::{DiffuserError, Result};
use diffuser_core::traits::Actuator;
use diffuser_core::types::Channel;

/// One recorded write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinWrite {
    pub channel: Channel,
    pub high: bool,
}

#[derive(Default)]
struct MockState {
    pins: BTreeMap<Channel, u8>,
    levels: BTreeMap<Channel, bool>,
    writes: Vec<PinWrite>,
    max_high: usize,
    failing: BTreeSet<Channel>,
    cleaned_up: bool,
}

impl MockState {
    fn write(&mut self, channel: Channel, high: bool) -> Result<()> {
        if high && self.failing.contains(&channel) {
            return Err(DiffuserError::ActuatorFault(format!("simulated write failure on {channel}")));
        }
        self.levels.insert(channel, high);
        self.writes.push(PinWrite { channel, high });
        let high_now = self.levels.values().filter(|h| **h).count();
        self.max_high = self.max_high.max(high_now);
        Ok(())
    }
}

/// Mock GPIO: keeps levels in memory.
#[derive(Default)]
pub struct MockActuator {
    state: Mutex<MockState>,
}

impl MockActuator {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_high(&self, channel: Channel) -> bool {
        self.state().levels.get(&channel).copied().unwrap_or(false)
    }

    /// Channels currently HIGH.
    pub fn high_channels(&self) -> Vec<Channel> {
        self.state()
            .levels
            .iter()
            .filter(|(_, high)| **high)
            .map(|(c, _)| *c)
            .collect()
    }

    /// Largest number of channels that were ever HIGH at the same time.
    pub fn max_concurrent_high(&self) -> usize {
        self.state().max_high
    }

    pub fn writes(&self) -> Vec<PinWrite> {
        self.state().writes.clone()
    }

    pub fn pin_of(&self, channel: Channel) -> Option<u8> {
        self.state().pins.get(&channel).copied()
    }

    /// Make every HIGH write on `channel` fail with an actuator fault.
    pub fn fail_writes_for(&self, channel: Channel) {
        self.state().failing.insert(channel);
    }

    pub fn was_cleaned_up(&self) -> bool {
        self.state().cleaned_up
    }
}

impl Actuator for MockActuator {
    fn name(&self) -> &str {
        "mock"
    }

    fn setup(&self, channel: Channel, pin: u8) -> Result<()> {
        let mut state = self.state();
        state.pins.insert(channel, pin);
        state.write(channel, false)
    }

    fn set_high(&self, channel: Channel) -> Result<()> {
        self.state().write(channel, true)
    }

    fn set_low(&self, channel: Channel) -> Result<()> {
        self.state().write(channel, false)
    }

    fn cleanup(&self) -> Result<()> {
        let mut state = self.state();
        for level in state.levels.values_mut() {
            *level = false;
        }
        state.cleaned_up = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracks_concurrent_high() {
        let mock = MockActuator::new();
        mock.set_high(Channel::Red).unwrap();
        mock.set_high(Channel::Blue).unwrap();
        mock.set_low(Channel::Red).unwrap();
        assert_eq!(mock.high_channels(), vec![Channel::Blue]);
        assert_eq!(mock.max_concurrent_high(), 2);
        assert_eq!(mock.writes().len(), 3);
    }

    #[test]
    fn test_simulated_failure() {
        let mock = MockActuator::new();
        mock.fail_writes_for(Channel::Green);
        assert!(matches!(mock.set_high(Channel::Green), Err(DiffuserError::ActuatorFault(_))));
        assert!(!mock.is_high(Channel::Green));
        assert!(mock.set_low(Channel::Green).is_ok());
    }

    #[test]
    fn test_setup_and_cleanup() {
        let mock = MockActuator::new();
        mock.setup(Channel::Yellow, 18).unwrap();
        assert_eq!(mock.pin_of(Channel::Yellow), Some(18));
        mock.set_high(Channel::Yellow).unwrap();
        mock.cleanup().unwrap();
        assert!(mock.was_cleaned_up());
        assert!(mock.high_channels().is_empty());
    }
}
