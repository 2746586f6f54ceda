//! # Diffuser Actuator
//!
//! Owns the output hardware. A single [`CycleController`] serializes every
//! manual and scheduled activation behind one lock and runs at most one
//! duty-cycle pulse task at a time.
//!
//! ```text
//! activate(channel, cycle, pulse, scheduled, ceiling)
//!   ├── stop previous pulse task (bounded wait)
//!   ├── force every channel LOW
//!   ├── update ActuationState
//!   └── spawn pulse task: HIGH pulse → LOW rest → repeat
//! ```

pub mod controller;
pub mod mock;
pub mod state;
pub mod sysfs;

pub use controller::{Activation, CycleController};
pub use mock::MockActuator;
pub use state::{ActuationState, ControllerStatus};
pub use sysfs::SysfsActuator;
