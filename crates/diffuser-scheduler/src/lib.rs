//! # Diffuser Scheduler
//!
//! Decides which rule should be driving the output at any minute, and keeps
//! conflicting rules out of the rule set in the first place.
//!
//! ## Architecture
//! ```text
//! ScheduleMonitor (wakes at every :00)
//!   ├── RuleStore::load_all()        → rules, in list order
//!   ├── recurrence::applies_today()  → day filter
//!   ├── recurrence::in_window()      → half-open, wraps past midnight
//!   └── on transition → CycleController
//!                         ├── force_schedule_transition (start)
//!                         └── deactivate                 (stop)
//!
//! overlap::find_conflicts()  ← called by writers before persisting a rule
//! upcoming::next_rule()      ← "what runs next" for status displays
//! ```

pub mod monitor;
pub mod overlap;
pub mod recurrence;
pub mod store;
pub mod upcoming;

pub use monitor::{MonitorHandle, ScheduleMonitor, TickOutcome};
pub use overlap::{find_conflicts, find_conflicts_for_draft, time_ranges_overlap};
pub use recurrence::{applies_today, in_window};
pub use store::{JsonRuleStore, MemoryRuleStore};
pub use upcoming::next_rule;
