//! # Task states and outcomes

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{api::status, eqpt::nav::NavResultCode};
use std::fmt;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Terminal state of a navigation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskOutcome {
    Succeeded,
    Canceled,
    Failed,

    /// The navigation subsystem reported a result outside the recognised set
    Unknown,
}

/// The kind of a navigation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Plan to and follow a path to a goal position
    Goal,

    /// Straight line backup
    Backup,
}

/// State of a navigation task over its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Accepted by the gateway, not yet started on the navigation subsystem
    Pending,

    /// Started on the navigation subsystem
    Running,

    Finished(TaskOutcome),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TaskOutcome {
    /// The status string reported to HTTP clients.
    pub fn status_str(&self) -> &'static str {
        match self {
            Self::Succeeded => status::SUCCEEDED,
            Self::Canceled => status::CANCELED,
            Self::Failed => status::FAILED,
            Self::Unknown => status::UNKNOWN,
        }
    }
}

impl From<NavResultCode> for TaskOutcome {
    fn from(code: NavResultCode) -> Self {
        match code {
            NavResultCode::SUCCEEDED => Self::Succeeded,
            NavResultCode::CANCELED => Self::Canceled,
            NavResultCode::FAILED => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Goal => write!(f, "goal"),
            Self::Backup => write!(f, "backup"),
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Finished(o) => write!(f, "{}", o.status_str()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_result_mapping_is_total() {
        assert_eq!(TaskOutcome::from(NavResultCode::SUCCEEDED), TaskOutcome::Succeeded);
        assert_eq!(TaskOutcome::from(NavResultCode::CANCELED), TaskOutcome::Canceled);
        assert_eq!(TaskOutcome::from(NavResultCode::FAILED), TaskOutcome::Failed);
        assert_eq!(TaskOutcome::from(NavResultCode::UNKNOWN), TaskOutcome::Unknown);

        for code in [-1, 4, 42, i32::MAX, i32::MIN].iter() {
            assert_eq!(TaskOutcome::from(NavResultCode(*code)), TaskOutcome::Unknown);
        }
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(TaskOutcome::Succeeded.status_str(), "succeded");
        assert_eq!(TaskOutcome::Canceled.status_str(), "canceled");
        assert_eq!(TaskOutcome::Failed.status_str(), "failed");
        assert_eq!(TaskOutcome::Unknown.status_str(), "unknown");
        assert_eq!(TaskState::Finished(TaskOutcome::Failed).to_string(), "failed");
        assert_eq!(TaskState::Running.to_string(), "running");
    }
}
