//! Cycle controller: exclusive owner of the output hardware.
//!
//! Every state change goes through one `tokio::sync::Mutex`. The pulse task
//! takes the same lock only to record its timing anchor, to check the
//! override flag at the ceiling, and to clean up after a natural finish.
//! A generation counter keeps a task that outlived its bounded stop-wait
//! from touching the state of the activation that replaced it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use diffuser_core::config::DiffuserConfig;
use diffuser_core::error::{DiffuserError, Result};
use diffuser_core::traits::Actuator;
use diffuser_core::types::{Channel, ChannelMap};

use crate::state::{ActuationState, ControllerStatus};

const DEFAULT_STOP_WAIT: Duration = Duration::from_millis(100);

/// Parameters of one activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activation {
    pub channel: Channel,
    /// Full period, seconds.
    pub cycle_time: u32,
    /// HIGH portion of each period, seconds.
    pub pulse_duration: u32,
    pub scheduled: bool,
    /// Scheduled runs stop on their own after this long.
    pub ceiling: Option<Duration>,
}

impl Activation {
    /// Operator-initiated run; pulses until replaced or deactivated.
    pub fn manual(channel: Channel, cycle_time: u32, pulse_duration: u32) -> Self {
        Self {
            channel,
            cycle_time,
            pulse_duration,
            scheduled: false,
            ceiling: None,
        }
    }

    pub fn scheduled(channel: Channel, cycle_time: u32, pulse_duration: u32, ceiling: Option<Duration>) -> Self {
        Self {
            channel,
            cycle_time,
            pulse_duration,
            scheduled: true,
            ceiling,
        }
    }
}

struct PulseTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    channels: ChannelMap,
    state: ActuationState,
    task: Option<PulseTask>,
    generation: u64,
}

/// The cycle controller. Cheap to share behind an `Arc`.
pub struct CycleController {
    actuator: Arc<dyn Actuator>,
    inner: Arc<Mutex<Inner>>,
    stop_wait: Duration,
}

impl CycleController {
    /// Create a controller and drive every mapped channel LOW.
    pub fn new(actuator: Arc<dyn Actuator>, channels: ChannelMap) -> Self {
        setup_channels(actuator.as_ref(), &channels);
        Self {
            actuator,
            inner: Arc::new(Mutex::new(Inner {
                channels,
                state: ActuationState::default(),
                task: None,
                generation: 0,
            })),
            stop_wait: DEFAULT_STOP_WAIT,
        }
    }

    /// Create a controller from the `[channels]` and `[controller]` config.
    pub fn from_config(actuator: Arc<dyn Actuator>, config: &DiffuserConfig) -> Self {
        Self::new(actuator, config.channels.clone())
            .with_stop_wait(Duration::from_millis(config.controller.stop_wait_ms))
    }

    /// Bound on how long a new activation waits for the old pulse task.
    pub fn with_stop_wait(mut self, stop_wait: Duration) -> Self {
        self.stop_wait = stop_wait;
        self
    }

    /// Stop whatever is pulsing and start `activation`.
    ///
    /// Manual activations set the user override and drop any schedule claim.
    /// Scheduled activations claim the channel for the schedule and leave the
    /// override flag as it is.
    pub async fn activate(&self, activation: Activation) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.activate_locked(&mut inner, activation).await
    }

    /// Clear a stale manual override and start a scheduled run, atomically.
    pub async fn force_schedule_transition(
        &self,
        channel: Channel,
        cycle_time: u32,
        pulse_duration: u32,
        ceiling: Option<Duration>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state.user_override {
            tracing::info!("🔁 New schedule session: clearing user override");
            inner.state.user_override = false;
        }
        let activation = Activation::scheduled(channel, cycle_time, pulse_duration, ceiling);
        self.activate_locked(&mut inner, activation).await
    }

    /// Stop the pulse task, force everything LOW and reset all state.
    pub async fn deactivate(&self) {
        let mut inner = self.inner.lock().await;
        self.deactivate_locked(&mut inner).await;
    }

    /// Let the schedule resume on its next tick. The output is left alone.
    pub async fn clear_user_override(&self) {
        let mut inner = self.inner.lock().await;
        inner.state.user_override = false;
        tracing::info!("✋ User override cleared, schedules can resume");
    }

    pub async fn status(&self) -> ControllerStatus {
        let inner = self.inner.lock().await;
        ControllerStatus::snapshot(
            &inner.state,
            &inner.channels,
            self.actuator.name(),
            self.actuator.is_hardware(),
        )
    }

    /// Replace the channel map: deactivate, then set up every new pin.
    pub async fn set_channel_map(&self, channels: ChannelMap) {
        let mut inner = self.inner.lock().await;
        self.deactivate_locked(&mut inner).await;
        setup_channels(self.actuator.as_ref(), &channels);
        inner.channels = channels;
        tracing::info!("🔌 Channel map reloaded ({} channels)", inner.channels.len());
    }

    /// Deactivate and release the hardware.
    pub async fn cleanup(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.deactivate_locked(&mut inner).await;
        self.actuator.cleanup()?;
        tracing::info!("🧹 Actuator cleanup completed");
        Ok(())
    }

    async fn activate_locked(&self, inner: &mut Inner, activation: Activation) -> Result<()> {
        let channel = activation.channel;
        if !inner.channels.contains_key(&channel) {
            tracing::error!("❌ Unknown channel: {channel}");
            return Err(DiffuserError::InvalidChannel(channel.to_string()));
        }

        self.stop_task(inner).await;

        let state = &mut inner.state;
        state.active_channel = Some(channel);
        state.cycle_start_time = None;
        state.current_cycle_time = Some(activation.cycle_time);
        state.current_pulse_duration = Some(activation.pulse_duration);

        if activation.scheduled {
            state.active_schedule_channel = Some(channel);
            state.schedule_end_deadline = activation
                .ceiling
                .and_then(|c| chrono::Duration::from_std(c).ok())
                .and_then(|c| Utc::now().checked_add_signed(c));
            tracing::info!("📅 Schedule activated: {channel} (ceiling: {:?})", activation.ceiling);
        } else {
            let previous = state.active_schedule_channel.take();
            state.schedule_end_deadline = None;
            state.user_override = true;
            match previous {
                Some(prev) => tracing::info!("✋ User override: switching from scheduled {prev} to {channel}"),
                None => tracing::info!("✋ User manual activation: {channel}"),
            }
        }

        inner.generation += 1;
        let (stop_tx, stop_rx) = watch::channel(false);
        let ctx = PulseContext {
            actuator: Arc::clone(&self.actuator),
            inner: Arc::clone(&self.inner),
            generation: inner.generation,
            activation,
            stop: stop_rx,
        };
        inner.task = Some(PulseTask {
            stop: stop_tx,
            handle: tokio::spawn(run_pulse_task(ctx)),
        });

        tracing::info!(
            "💨 Activated {channel} (cycle: {}s, pulse: {}s)",
            activation.cycle_time,
            activation.pulse_duration
        );
        Ok(())
    }

    async fn deactivate_locked(&self, inner: &mut Inner) {
        self.stop_task(inner).await;
        inner.generation += 1;
        inner.state = ActuationState::default();
        tracing::info!("⏹️ All channels deactivated");
    }

    /// Signal the pulse task, wait a bounded time for it, then force every
    /// mapped channel LOW whether or not it has exited.
    async fn stop_task(&self, inner: &mut Inner) {
        if let Some(PulseTask { stop, mut handle }) = inner.task.take() {
            let _ = stop.send(true);
            match tokio::time::timeout(self.stop_wait, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("⚠️ Pulse task ended abnormally: {e}"),
                Err(_) => tracing::warn!(
                    "⚠️ Pulse task still running after {:?}, proceeding",
                    self.stop_wait
                ),
            }
        }
        for channel in inner.channels.keys() {
            if let Err(e) = self.actuator.set_low(*channel) {
                tracing::warn!("⚠️ Failed to drive {channel} LOW: {e}");
            }
        }
    }
}

fn setup_channels(actuator: &dyn Actuator, channels: &ChannelMap) {
    for (channel, pin) in channels {
        match actuator.setup(*channel, *pin) {
            Ok(()) => tracing::debug!("Initialized pin {pin} for {channel}"),
            Err(e) => tracing::error!("❌ Error setting up pin {pin} for {channel}: {e}"),
        }
    }
}

/// How a pulse task ended.
#[derive(Debug, PartialEq, Eq)]
enum Exit {
    Completed,
    Cancelled,
}

struct PulseContext {
    actuator: Arc<dyn Actuator>,
    inner: Arc<Mutex<Inner>>,
    generation: u64,
    activation: Activation,
    stop: watch::Receiver<bool>,
}

impl PulseContext {
    fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Sleep for `duration`; true if stopped meanwhile.
    async fn wait(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_stopped(),
            _ = self.stop.changed() => true,
        }
    }

    /// Take the controller lock, unless this task has been superseded.
    async fn lock_current(&mut self) -> Option<MutexGuard<'_, Inner>> {
        let guard = tokio::select! {
            guard = self.inner.lock() => guard,
            _ = self.stop.changed() => return None,
        };
        (guard.generation == self.generation).then_some(guard)
    }

    async fn pulse_loop(&mut self) -> Exit {
        let channel = self.activation.channel;
        let anchor = Instant::now();
        match self.lock_current().await {
            Some(mut inner) => inner.state.cycle_start_time = Some(Utc::now()),
            None => return Exit::Cancelled,
        }
        tracing::debug!("Cycle timing anchored for {channel}");

        let pulse = Duration::from_secs(u64::from(self.activation.pulse_duration));
        let rest_secs = self.activation.cycle_time.saturating_sub(self.activation.pulse_duration).max(1);
        let rest = Duration::from_secs(u64::from(rest_secs));

        loop {
            if let (true, Some(ceiling)) = (self.activation.scheduled, self.activation.ceiling) {
                if anchor.elapsed() >= ceiling {
                    let overridden = match self.lock_current().await {
                        Some(inner) => inner.state.user_override,
                        None => return Exit::Cancelled,
                    };
                    if !overridden {
                        tracing::info!("📅 Scheduled run of {channel} completed after {ceiling:?}");
                        return Exit::Completed;
                    }
                }
            }
            if self.is_stopped() {
                return Exit::Cancelled;
            }

            match self.actuator.set_high(channel) {
                Ok(()) => tracing::debug!("{channel} HIGH"),
                Err(e) => {
                    tracing::warn!("⚠️ Failed to drive {channel} HIGH: {e}");
                    let _ = self.actuator.set_low(channel);
                }
            }
            if self.wait(pulse).await {
                return Exit::Cancelled;
            }

            match self.actuator.set_low(channel) {
                Ok(()) => tracing::debug!("{channel} LOW"),
                Err(e) => tracing::warn!("⚠️ Failed to drive {channel} LOW: {e}"),
            }
            if self.wait(rest).await {
                return Exit::Cancelled;
            }
        }
    }
}

/// Drives the channel LOW when dropped, including during a panic unwind.
struct LowOnExit {
    actuator: Arc<dyn Actuator>,
    channel: Channel,
}

impl Drop for LowOnExit {
    fn drop(&mut self) {
        if let Err(e) = self.actuator.set_low(self.channel) {
            tracing::warn!("⚠️ Failed to drive {} LOW on exit: {e}", self.channel);
        }
    }
}

async fn run_pulse_task(mut ctx: PulseContext) {
    let channel = ctx.activation.channel;
    let guard = LowOnExit {
        actuator: Arc::clone(&ctx.actuator),
        channel,
    };
    let exit = ctx.pulse_loop().await;
    drop(guard);

    if exit == Exit::Cancelled || !ctx.activation.scheduled {
        return;
    }

    // Nobody awaits a natural finish, so the task clears its own claim.
    if let Some(mut inner) = ctx.lock_current().await {
        if !inner.state.user_override {
            inner.state.clear_activation();
            inner.task = None;
            tracing::info!("📅 Scheduled run of {channel} cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockActuator;
    use diffuser_core::types::default_channel_map;

    fn controller() -> (Arc<MockActuator>, CycleController) {
        let mock = Arc::new(MockActuator::new());
        let ctl = CycleController::new(mock.clone(), default_channel_map());
        (mock, ctl)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn test_manual_activation_sets_override() {
        let (mock, ctl) = controller();
        ctl.activate(Activation::manual(Channel::Red, 60, 10)).await.unwrap();
        settle().await;

        let status = ctl.status().await;
        assert!(status.active);
        assert!(status.user_override());
        assert_eq!(status.active_schedule_channel(), None);
        assert!(!status.is_scheduled);
        assert!(status.state.cycle_start_time.is_some());
        assert_eq!(status.state.current_cycle_time, Some(60));
        assert!(mock.is_high(Channel::Red));
        ctl.deactivate().await;
    }

    #[tokio::test]
    async fn test_manual_preempts_schedule() {
        let (mock, ctl) = controller();
        ctl.activate(Activation::scheduled(Channel::Red, 60, 10, Some(Duration::from_secs(600))))
            .await
            .unwrap();
        settle().await;
        assert!(mock.is_high(Channel::Red));
        assert!(ctl.status().await.is_scheduled);

        ctl.activate(Activation::manual(Channel::Blue, 60, 10)).await.unwrap();
        settle().await;

        let status = ctl.status().await;
        assert_eq!(status.active_channel(), Some(Channel::Blue));
        assert!(status.user_override());
        assert_eq!(status.active_schedule_channel(), None);
        assert_eq!(status.state.schedule_end_deadline, None);
        assert!(!mock.is_high(Channel::Red));
        assert!(mock.is_high(Channel::Blue));
        ctl.deactivate().await;
    }

    #[tokio::test]
    async fn test_unknown_channel_rejected() {
        let mock = Arc::new(MockActuator::new());
        let channels = ChannelMap::from([(Channel::Red, 20)]);
        let ctl = CycleController::new(mock.clone(), channels);

        let err = ctl.activate(Activation::manual(Channel::Green, 60, 10)).await;
        assert!(matches!(err, Err(DiffuserError::InvalidChannel(_))));
        assert!(!ctl.status().await.active);
        assert!(mock.high_channels().is_empty());
    }

    #[tokio::test]
    async fn test_deactivate_forces_low_and_clears() {
        let (mock, ctl) = controller();
        ctl.activate(Activation::manual(Channel::Green, 60, 10)).await.unwrap();
        settle().await;
        assert!(mock.is_high(Channel::Green));

        ctl.deactivate().await;
        let status = ctl.status().await;
        assert!(!status.active);
        assert!(!status.user_override());
        assert_eq!(status.state, ActuationState::default());
        assert!(mock.high_channels().is_empty());
    }

    #[tokio::test]
    async fn test_at_most_one_channel_high() {
        let (mock, ctl) = controller();
        for channel in [Channel::Red, Channel::Blue, Channel::Yellow, Channel::Green, Channel::Red] {
            ctl.activate(Activation::manual(channel, 60, 10)).await.unwrap();
            settle().await;
            assert_eq!(mock.high_channels(), vec![channel]);
        }
        ctl.activate(Activation::scheduled(Channel::Blue, 60, 10, None)).await.unwrap();
        settle().await;
        ctl.deactivate().await;

        assert!(mock.max_concurrent_high() <= 1);
        assert!(mock.high_channels().is_empty());
    }

    #[tokio::test]
    async fn test_clear_override_keeps_output() {
        let (mock, ctl) = controller();
        ctl.activate(Activation::manual(Channel::Yellow, 60, 10)).await.unwrap();
        settle().await;
        ctl.clear_user_override().await;

        let status = ctl.status().await;
        assert!(!status.user_override());
        assert_eq!(status.active_channel(), Some(Channel::Yellow));
        assert!(mock.is_high(Channel::Yellow));
        ctl.deactivate().await;
    }

    #[tokio::test]
    async fn test_huge_ceiling_has_no_deadline() {
        let (mock, ctl) = controller();
        let ceiling = Duration::from_secs(10_000_000_000_000);
        ctl.activate(Activation::scheduled(Channel::Red, 60, 10, Some(ceiling)))
            .await
            .unwrap();
        settle().await;

        let status = ctl.status().await;
        assert!(status.is_scheduled);
        assert_eq!(status.state.schedule_end_deadline, None);
        assert!(mock.is_high(Channel::Red));
        ctl.deactivate().await;
    }

    #[tokio::test]
    async fn test_scheduled_activation_keeps_override() {
        let (_mock, ctl) = controller();
        ctl.activate(Activation::manual(Channel::Red, 60, 10)).await.unwrap();
        ctl.activate(Activation::scheduled(Channel::Blue, 60, 10, None)).await.unwrap();

        let status = ctl.status().await;
        assert!(status.user_override());
        assert_eq!(status.active_schedule_channel(), Some(Channel::Blue));
        assert!(!status.is_scheduled);
        ctl.deactivate().await;
    }

    #[tokio::test]
    async fn test_force_transition_clears_override() {
        let (mock, ctl) = controller();
        ctl.activate(Activation::manual(Channel::Red, 60, 10)).await.unwrap();
        ctl.force_schedule_transition(Channel::Green, 60, 10, Some(Duration::from_secs(120)))
            .await
            .unwrap();
        settle().await;

        let status = ctl.status().await;
        assert!(!status.user_override());
        assert!(status.is_scheduled);
        assert!(status.state.schedule_end_deadline.is_some());
        assert!(mock.is_high(Channel::Green));
        assert!(!mock.is_high(Channel::Red));
        ctl.deactivate().await;
    }

    #[tokio::test]
    async fn test_scheduled_run_completes_and_cleans_up() {
        let (mock, ctl) = controller();
        ctl.activate(Activation::scheduled(Channel::Red, 2, 1, Some(Duration::from_millis(50))))
            .await
            .unwrap();
        settle().await;
        assert!(mock.is_high(Channel::Red));

        // Ceiling is checked at the top of the next cycle (after 1s HIGH + 1s LOW).
        tokio::time::sleep(Duration::from_millis(2300)).await;
        let status = ctl.status().await;
        assert!(!status.active);
        assert_eq!(status.active_schedule_channel(), None);
        assert_eq!(status.state.schedule_end_deadline, None);
        assert!(mock.high_channels().is_empty());
    }

    #[tokio::test]
    async fn test_pulse_then_rest() {
        let (mock, ctl) = controller();
        ctl.activate(Activation::manual(Channel::Blue, 3, 1)).await.unwrap();
        settle().await;
        assert!(mock.is_high(Channel::Blue));

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(!mock.is_high(Channel::Blue));
        assert!(ctl.status().await.active);
        ctl.deactivate().await;
    }

    #[tokio::test]
    async fn test_actuator_fault_does_not_kill_task() {
        let (mock, ctl) = controller();
        mock.fail_writes_for(Channel::Red);
        ctl.activate(Activation::manual(Channel::Red, 60, 10)).await.unwrap();
        settle().await;

        assert!(!mock.is_high(Channel::Red));
        assert!(ctl.status().await.active);
        ctl.deactivate().await;
    }

    #[tokio::test]
    async fn test_set_channel_map_deactivates() {
        let (mock, ctl) = controller();
        ctl.activate(Activation::manual(Channel::Red, 60, 10)).await.unwrap();
        settle().await;

        ctl.set_channel_map(ChannelMap::from([(Channel::Red, 5)])).await;
        let status = ctl.status().await;
        assert!(!status.active);
        assert_eq!(status.channel_map.len(), 1);
        assert_eq!(mock.pin_of(Channel::Red), Some(5));
        assert!(!mock.is_high(Channel::Red));
    }

    #[tokio::test]
    async fn test_cleanup_releases_hardware() {
        let (mock, ctl) = controller();
        ctl.activate(Activation::manual(Channel::Green, 60, 10)).await.unwrap();
        ctl.cleanup().await.unwrap();
        assert!(mock.was_cleaned_up());
        assert!(!ctl.status().await.active);
    }
}
