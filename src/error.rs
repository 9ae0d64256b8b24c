use thiserror::Error;

use crate::lifecycle::{Evidence, ServiceStatus};
use crate::location::LocationError;
use crate::store::StorageError;

/// Why a lifecycle operation was refused. The job is never partially changed
/// when one of these is returned.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service not found: {0}")]
    NotFound(String),

    #[error("service already exists: {0}")]
    AlreadyExists(String),

    #[error("service {id} is {status} and can no longer change")]
    Terminal { id: String, status: ServiceStatus },

    #[error("service {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: ServiceStatus,
        to: ServiceStatus,
    },

    #[error("service {id} needs {evidence} before it can change")]
    MissingEvidence { id: String, evidence: Evidence },

    #[error("service {id} cannot be reassigned while {status}")]
    AssignmentLocked { id: String, status: ServiceStatus },

    #[error("service {id} was changed by someone else while this change was in progress")]
    ConcurrentModification { id: String },

    #[error("location error: {0}")]
    Location(#[from] LocationError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ServiceError {
    /// Short message for the user.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::Location(e) => e.user_message().to_string(),
            ServiceError::Storage(e) => e.user_message().to_string(),
            other => other.to_string(),
        }
    }

    /// Longer guidance, when there is something the user can do.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            ServiceError::Location(e) => Some(e.remediation()),
            ServiceError::Storage(e) => Some(e.remediation()),
            ServiceError::MissingEvidence { evidence, .. } => Some(match evidence {
                Evidence::Photo => "Take a photo of the finished work and try again.",
                Evidence::ClientSignature => "Ask the client to sign and try again.",
                Evidence::TechnicianSignature => "Sign as the technician and try again.",
                Evidence::CancellationReason => "Describe why the visit is being cancelled.",
            }),
            ServiceError::ConcurrentModification { .. } => {
                Some("Reload the service to see the latest changes, then try again.")
            }
            _ => None,
        }
    }
}
