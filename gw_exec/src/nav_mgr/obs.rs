//! # Task observability
//!
//! Progress of running tasks is reported to a [`FeedbackSink`]. The default sink writes it to the
//! log.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::nav::{NavFeedback, NavTaskError};
use log::{info, warn};

use super::{TaskKind, TaskOutcome};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Receiver of task progress reports.
pub trait FeedbackSink: Send + Sync {
    /// A feedback sample of a running task.
    fn feedback(&self, task_id: u64, kind: TaskKind, feedback: &NavFeedback);

    /// A task reached its terminal state. `error` holds the details of a failure, when the
    /// navigation subsystem provided them.
    fn finished(
        &self,
        task_id: u64,
        kind: TaskKind,
        outcome: TaskOutcome,
        error: Option<&NavTaskError>,
    );
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Sink writing task progress to the log.
#[derive(Debug, Default)]
pub struct LogFeedbackSink;

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl FeedbackSink for LogFeedbackSink {
    fn feedback(&self, task_id: u64, kind: TaskKind, feedback: &NavFeedback) {
        match kind {
            TaskKind::Goal => info!(
                "Task {}: distance remaining {}, speed {}",
                task_id,
                fmt_opt(feedback.distance_to_goal, "m"),
                fmt_opt(feedback.speed, "m/s")
            ),
            TaskKind::Backup => info!(
                "Task {}: distance traveled {}",
                task_id,
                fmt_opt(feedback.distance_traveled, "m")
            ),
        }
    }

    fn finished(
        &self,
        task_id: u64,
        kind: TaskKind,
        outcome: TaskOutcome,
        error: Option<&NavTaskError>,
    ) {
        match (outcome, error) {
            (TaskOutcome::Failed, Some(e)) => warn!(
                "Task {} ({}) failed with error {}: {}",
                task_id, kind, e.code, e.msg
            ),
            (TaskOutcome::Failed, None) | (TaskOutcome::Unknown, _) => {
                warn!("Task {} ({}) finished: {:?}", task_id, kind, outcome)
            }
            _ => info!("Task {} ({}) finished: {:?}", task_id, kind, outcome),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn fmt_opt(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{:.3} {}", v, unit),
        None => "n/a".into(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fmt_opt() {
        assert_eq!(fmt_opt(Some(1.23456), "m"), "1.235 m");
        assert_eq!(fmt_opt(None, "m"), "n/a");
    }
}
