/// Dispatch subsystem
///
/// Event-triggered runs and cron schedule maintenance.

// Event trigger and schedule upsert
pub mod dispatcher;

// Symbolic schedule classes and their random resolution
pub mod schedule;

pub use dispatcher::Dispatcher;
pub use schedule::{resolve_schedule, ScheduleSpec};
