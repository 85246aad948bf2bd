//! Metrics collector for the task scheduler
//!
//! Values are recorded through the `metrics` facade; exporting them is left to
//! whichever recorder the host installs.

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use tracing::debug;

use scheduler_domain::SchedulerStatus;

/// Metrics collector for the task scheduler
#[derive(Clone)]
pub struct SchedulerMetrics {
    // Task execution metrics
    task_executions_total: Counter,
    task_failures_total: Counter,
    task_retries_total: Counter,
    task_execution_duration: Histogram,
    task_terminal_total: Counter,

    // Scheduler metrics
    pending_timeouts: Gauge,
    processing_tasks: Gauge,
    recovered_tasks_total: Counter,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self {
            task_executions_total: counter!("scheduler_task_executions_total"),
            task_failures_total: counter!("scheduler_task_failures_total"),
            task_retries_total: counter!("scheduler_task_retries_total"),
            task_execution_duration: histogram!("scheduler_task_execution_duration_seconds"),
            task_terminal_total: counter!("scheduler_task_terminal_total"),
            pending_timeouts: gauge!("scheduler_pending_timeouts"),
            processing_tasks: gauge!("scheduler_processing_tasks"),
            recovered_tasks_total: counter!("scheduler_recovered_tasks_total"),
        }
    }

    /// Record a finished execution attempt
    pub fn record_task_execution(&self, type_name: &str, success: bool, duration_seconds: f64) {
        self.task_executions_total.increment(1);
        self.task_execution_duration.record(duration_seconds);
        if !success {
            self.task_failures_total.increment(1);
        }

        debug!(
            task_type = type_name,
            success = success,
            duration_seconds = duration_seconds,
            "Task execution completed"
        );
    }

    pub fn record_task_retry(&self) {
        self.task_retries_total.increment(1);
    }

    /// Record a task that will never be scheduled again
    pub fn record_task_terminal(&self) {
        self.task_terminal_total.increment(1);
    }

    pub fn record_recovered(&self, count: u64) {
        self.recovered_tasks_total.increment(count);
    }

    pub fn update_status(&self, status: &SchedulerStatus) {
        self.pending_timeouts.set(status.pending_timeouts as f64);
        self.processing_tasks.set(status.processing_count as f64);
    }
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
