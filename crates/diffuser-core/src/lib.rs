//! # Diffuser Core
//!
//! Shared vocabulary for the Diffuser workspace: schedule rules, channels,
//! the actuator and rule-store seams, configuration and the error taxonomy.
//!
//! Nothing here owns state or spawns tasks. The controller lives in
//! `diffuser-actuator`, the schedule monitor in `diffuser-scheduler`.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::DiffuserConfig;
pub use error::{DiffuserError, Result};
pub use traits::{Actuator, RuleStore};
pub use types::{Channel, ChannelMap, RecurrencePattern, RuleDraft, ScheduleRule};
