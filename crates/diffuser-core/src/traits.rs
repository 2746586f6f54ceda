//! Seams to the outside world: the output hardware and the rule source.

use crate::error::Result;
use crate::types::{Channel, ScheduleRule};

/// Low-level driver that turns a logical channel into a physical signal.
///
/// Implementations must be cheap to call and must not block for long:
/// the cycle controller writes from inside its pulse task.
pub trait Actuator: Send + Sync {
    /// Driver name for logs and status.
    fn name(&self) -> &str;

    /// Bind `channel` to `pin` and drive it LOW.
    fn setup(&self, channel: Channel, pin: u8) -> Result<()> {
        let _ = pin;
        self.set_low(channel)
    }

    fn set_high(&self, channel: Channel) -> Result<()>;

    fn set_low(&self, channel: Channel) -> Result<()>;

    /// Release every bound output.
    fn cleanup(&self) -> Result<()>;

    /// Whether writes reach real hardware.
    fn is_hardware(&self) -> bool {
        false
    }
}

/// Read-only source of the current rule set, re-read every monitor tick.
pub trait RuleStore: Send + Sync {
    /// All rules in list order. Malformed entries are dropped by the store.
    fn load_all(&self) -> Result<Vec<ScheduleRule>>;
}
