use std::fmt;

use serde::{Deserialize, Serialize};

use super::job::{Role, ServiceJob};
use crate::error::ServiceError;

/// The four statuses of a service visit.
///
/// Each visit flows through: PENDING → IN_PROGRESS → COMPLETED | CANCELLED,
/// or straight from PENDING to CANCELLED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl ServiceStatus {
    /// No field of a job in a terminal status may change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, ServiceStatus::Completed | ServiceStatus::Cancelled)
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Pending => write!(f, "PENDING"),
            ServiceStatus::InProgress => write!(f, "IN_PROGRESS"),
            ServiceStatus::Completed => write!(f, "COMPLETED"),
            ServiceStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// A legal move between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// PENDING → IN_PROGRESS.
    Start,
    /// IN_PROGRESS → COMPLETED.
    Finish,
    /// PENDING | IN_PROGRESS → CANCELLED.
    Cancel,
}

impl Transition {
    pub fn target(self) -> ServiceStatus {
        match self {
            Transition::Start => ServiceStatus::InProgress,
            Transition::Finish => ServiceStatus::Completed,
            Transition::Cancel => ServiceStatus::Cancelled,
        }
    }

    /// Whether the caller must supply a fresh position before commit.
    pub fn requires_position(self, role: Role) -> bool {
        match self {
            Transition::Start | Transition::Finish => true,
            Transition::Cancel => role == Role::Technician,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Start => write!(f, "start"),
            Transition::Finish => write!(f, "finish"),
            Transition::Cancel => write!(f, "cancel"),
        }
    }
}

/// Decides which moves a job may make. Holds no state; jobs are only mutated
/// by the lifecycle engine once evidence is in hand.
pub struct StateMachine;

impl StateMachine {
    /// Resolve the transition that takes `job` to `target`.
    ///
    /// - Terminal jobs reject everything.
    /// - `Pending → InProgress` is a start, `InProgress → Completed` a finish.
    /// - Either non-terminal status may be cancelled.
    pub fn plan(job: &ServiceJob, target: ServiceStatus) -> Result<Transition, ServiceError> {
        let from = job.status();
        if from.is_terminal() {
            return Err(ServiceError::Terminal {
                id: job.id.clone(),
                status: from,
            });
        }

        match (from, target) {
            (ServiceStatus::Pending, ServiceStatus::InProgress) => Ok(Transition::Start),
            (ServiceStatus::InProgress, ServiceStatus::Completed) => Ok(Transition::Finish),
            (ServiceStatus::Pending | ServiceStatus::InProgress, ServiceStatus::Cancelled) => {
                Ok(Transition::Cancel)
            }
            _ => Err(ServiceError::InvalidTransition {
                id: job.id.clone(),
                from,
                to: target,
            }),
        }
    }

    /// Technicians can only be (re)assigned while the job is pending.
    pub fn ensure_assignable(job: &ServiceJob) -> Result<(), ServiceError> {
        match job.status() {
            ServiceStatus::Pending => Ok(()),
            status if status.is_terminal() => Err(ServiceError::Terminal {
                id: job.id.clone(),
                status,
            }),
            status => Err(ServiceError::AssignmentLocked {
                id: job.id.clone(),
                status,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_in(status: ServiceStatus) -> ServiceJob {
        let mut job = ServiceJob::new("S100");
        job.status = status;
        job
    }

    #[test]
    fn legal_moves() {
        assert_eq!(
            StateMachine::plan(&job_in(ServiceStatus::Pending), ServiceStatus::InProgress).unwrap(),
            Transition::Start
        );
        assert_eq!(
            StateMachine::plan(&job_in(ServiceStatus::InProgress), ServiceStatus::Completed)
                .unwrap(),
            Transition::Finish
        );
        assert_eq!(
            StateMachine::plan(&job_in(ServiceStatus::Pending), ServiceStatus::Cancelled).unwrap(),
            Transition::Cancel
        );
        assert_eq!(
            StateMachine::plan(&job_in(ServiceStatus::InProgress), ServiceStatus::Cancelled)
                .unwrap(),
            Transition::Cancel
        );
    }

    #[test]
    fn pending_cannot_jump_to_completed() {
        let err = StateMachine::plan(&job_in(ServiceStatus::Pending), ServiceStatus::Completed)
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InvalidTransition {
                from: ServiceStatus::Pending,
                to: ServiceStatus::Completed,
                ..
            }
        ));
    }

    #[test]
    fn in_progress_cannot_restart() {
        assert!(
            StateMachine::plan(&job_in(ServiceStatus::InProgress), ServiceStatus::InProgress)
                .is_err()
        );
        assert!(
            StateMachine::plan(&job_in(ServiceStatus::InProgress), ServiceStatus::Pending).is_err()
        );
    }

    #[test]
    fn terminal_statuses_reject_everything() {
        for status in [ServiceStatus::Completed, ServiceStatus::Cancelled] {
            for target in [
                ServiceStatus::Pending,
                ServiceStatus::InProgress,
                ServiceStatus::Completed,
                ServiceStatus::Cancelled,
            ] {
                let err = StateMachine::plan(&job_in(status), target).unwrap_err();
                assert!(matches!(err, ServiceError::Terminal { .. }), "{status} -> {target}");
            }
        }
    }

    #[test]
    fn assignment_only_while_pending() {
        assert!(StateMachine::ensure_assignable(&job_in(ServiceStatus::Pending)).is_ok());
        assert!(matches!(
            StateMachine::ensure_assignable(&job_in(ServiceStatus::InProgress)),
            Err(ServiceError::AssignmentLocked { .. })
        ));
        assert!(matches!(
            StateMachine::ensure_assignable(&job_in(ServiceStatus::Completed)),
            Err(ServiceError::Terminal { .. })
        ));
    }

    #[test]
    fn position_requirements() {
        assert!(Transition::Start.requires_position(Role::Admin));
        assert!(Transition::Finish.requires_position(Role::Technician));
        assert!(Transition::Cancel.requires_position(Role::Technician));
        assert!(!Transition::Cancel.requires_position(Role::Admin));
    }

    #[test]
    fn status_display() {
        assert_eq!(ServiceStatus::Pending.to_string(), "PENDING");
        assert_eq!(ServiceStatus::InProgress.to_string(), "IN_PROGRESS");
        assert_eq!(ServiceStatus::Completed.to_string(), "COMPLETED");
        assert_eq!(ServiceStatus::Cancelled.to_string(), "CANCELLED");
    }
}
