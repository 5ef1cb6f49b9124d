//! Metrics definitions for the Room Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rc_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded by code, never by room or user IDs:
//! - `kind`: room_creation, janitor, agent, other
//! - `outcome`: acquired/contended, success/error/skipped
//! - `reason`: `EndReason` variants
//! - `to`: `UserStatus` variants
//! - `task`: janitor task names

use crate::models::{EndReason, UserStatus};
use metrics::{counter, gauge};

/// Metric: `rc_rooms_created_total`
pub fn record_room_created() {
    counter!("rc_rooms_created_total").increment(1);
}

/// Metric: `rc_rooms_ended_total`
/// Labels: `reason`
pub fn record_room_ended(reason: EndReason) {
    counter!("rc_rooms_ended_total", "reason" => reason.as_str()).increment(1);
}

/// Metric: `rc_lock_acquire_total`
/// Labels: `kind`, `outcome`
pub fn record_lock_acquire(kind: &'static str, acquired: bool) {
    let outcome = if acquired { "acquired" } else { "contended" };
    counter!("rc_lock_acquire_total", "kind" => kind, "outcome" => outcome).increment(1);
}

/// Metric: `rc_presence_transitions_total`
/// Labels: `to`
pub fn record_presence_transition(to: UserStatus) {
    counter!("rc_presence_transitions_total", "to" => to.as_str()).increment(1);
}

/// Janitor task run outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Error,
    /// Another instance (or an overrunning run here) held the task lock.
    Skipped,
}

impl TaskOutcome {
    fn as_str(self) -> &'static str {
        match self {
            TaskOutcome::Success => "success",
            TaskOutcome::Error => "error",
            TaskOutcome::Skipped => "skipped",
        }
    }
}

/// Metric: `rc_janitor_task_runs_total`
/// Labels: `task`, `outcome`
pub fn record_janitor_run(task: &'static str, outcome: TaskOutcome) {
    counter!("rc_janitor_task_runs_total", "task" => task, "outcome" => outcome.as_str())
        .increment(1);
}

/// Metric: `rc_room_self_heals_total`
///
/// A read path or sweep found the durable record running without live state.
pub fn record_self_heal() {
    counter!("rc_room_self_heals_total").increment(1);
}

/// Metric: `rc_agent_leases_lost_total`
pub fn record_agent_lease_lost() {
    counter!("rc_agent_leases_lost_total").increment(1);
}

/// Metric: `rc_agents_running`
pub fn set_agents_running(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_agents_running").set(count as f64);
}
