//! Actuation state and the status snapshot handed to callers.

use chrono::{DateTime, Utc};
use diffuser_core::types::{Channel, ChannelMap};
use serde::Serialize;

/// Mutable controller state. Only touched under the controller lock.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActuationState {
    /// Channel the pulse task is driving.
    pub active_channel: Option<Channel>,
    /// Channel claimed by the automatic schedule, if any.
    pub active_schedule_channel: Option<Channel>,
    /// A manual activation has taken the output from the schedule.
    pub user_override: bool,
    /// Anchor of the running duty cycle, for phase reconstruction.
    pub cycle_start_time: Option<DateTime<Utc>>,
    pub current_cycle_time: Option<u32>,
    pub current_pulse_duration: Option<u32>,
    /// When a scheduled run will complete on its own.
    pub schedule_end_deadline: Option<DateTime<Utc>>,
}

impl ActuationState {
    /// Forget the current activation but keep the override flag.
    pub(crate) fn clear_activation(&mut self) {
        self.active_channel = None;
        self.active_schedule_channel = None;
        self.schedule_end_deadline = None;
        self.cycle_start_time = None;
        self.current_cycle_time = None;
        self.current_pulse_duration = None;
    }
}

/// Immutable copy of the controller state plus derived flags.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub active: bool,
    pub is_scheduled: bool,
    #[serde(flatten)]
    pub state: ActuationState,
    pub channel_map: ChannelMap,
    pub driver: String,
    pub hardware_available: bool,
}

impl ControllerStatus {
    pub(crate) fn snapshot(
        state: &ActuationState,
        channel_map: &ChannelMap,
        driver: &str,
        hardware_available: bool,
    ) -> Self {
        Self {
            active: state.active_channel.is_some(),
            is_scheduled: state.active_schedule_channel.is_some() && !state.user_override,
            state: state.clone(),
            channel_map: channel_map.clone(),
            driver: driver.to_string(),
            hardware_available,
        }
    }

    pub fn active_channel(&self) -> Option<Channel> {
        self.state.active_channel
    }

    pub fn active_schedule_channel(&self) -> Option<Channel> {
        self.state.active_schedule_channel
    }

    pub fn user_override(&self) -> bool {
        self.state.user_override
    }
}
