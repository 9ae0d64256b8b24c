use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::ServiceStatus;
use crate::location::Position;

/// Who is operating the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Technician,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Technician => write!(f, "technician"),
        }
    }
}

/// The user requesting a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    pub role: Role,
}

impl Caller {
    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Admin,
        }
    }

    pub fn technician(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Technician,
        }
    }
}

/// An artifact a transition can require before it commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    Photo,
    ClientSignature,
    TechnicianSignature,
    CancellationReason,
}

impl fmt::Display for Evidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evidence::Photo => write!(f, "a photo of the work"),
            Evidence::ClientSignature => write!(f, "the client's signature"),
            Evidence::TechnicianSignature => write!(f, "the technician's signature"),
            Evidence::CancellationReason => write!(f, "a cancellation reason"),
        }
    }
}

/// Supplies proof-of-completion images as opaque data strings (typically
/// data URLs). Only emptiness is checked.
pub trait ProofSource {
    fn photo(&self) -> Option<String>;
    fn client_signature(&self) -> Option<String>;
    fn technician_signature(&self) -> Option<String>;
}

/// Proof images already captured by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProofBundle {
    pub photo: Option<String>,
    pub client_signature: Option<String>,
    pub technician_signature: Option<String>,
}

impl ProofSource for ProofBundle {
    fn photo(&self) -> Option<String> {
        self.photo.clone()
    }

    fn client_signature(&self) -> Option<String> {
        self.client_signature.clone()
    }

    fn technician_signature(&self) -> Option<String> {
        self.technician_signature.clone()
    }
}

/// Proof stored on a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionProof {
    pub photo: String,
    pub client_signature: String,
    /// Absent when an administrator closed the job.
    pub technician_signature: Option<String>,
}

impl ProofSource for CompletionProof {
    fn photo(&self) -> Option<String> {
        Some(self.photo.clone())
    }

    fn client_signature(&self) -> Option<String> {
        Some(self.client_signature.clone())
    }

    fn technician_signature(&self) -> Option<String> {
        self.technician_signature.clone()
    }
}

/// When something happened, and where the device was.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub at: DateTime<Utc>,
    /// `None` only for an administrator's cancellation.
    pub position: Option<Position>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentAction {
    Assigned,
    Unassigned,
}

/// One entry in a job's append-only assignment history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentEvent {
    pub technician_id: String,
    pub at: DateTime<Utc>,
    pub action: AssignmentAction,
}

/// A single field-service visit.
///
/// Status, evidence and assignment fields are only writable inside the crate;
/// outside code changes them through `ServiceLifecycle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceJob {
    pub id: String,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub(crate) status: ServiceStatus,
    #[serde(default)]
    pub(crate) technician: Option<String>,
    #[serde(default)]
    pub(crate) started: Option<Checkpoint>,
    /// Completion or cancellation.
    #[serde(default)]
    pub(crate) closed: Option<Checkpoint>,
    #[serde(default)]
    pub(crate) proof: Option<CompletionProof>,
    #[serde(default)]
    pub(crate) cancellation_reason: Option<String>,
    #[serde(default)]
    pub(crate) assignment_history: Vec<AssignmentEvent>,
    /// Bumped on every committed change.
    #[serde(default)]
    pub(crate) version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceJob {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            client: None,
            address: None,
            description: None,
            status: ServiceStatus::Pending,
            technician: None,
            started: None,
            closed: None,
            proof: None,
            cancellation_reason: None,
            assignment_history: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn status(&self) -> ServiceStatus {
        self.status
    }

    pub fn technician(&self) -> Option<&str> {
        self.technician.as_deref()
    }

    pub fn started(&self) -> Option<&Checkpoint> {
        self.started.as_ref()
    }

    pub fn closed(&self) -> Option<&Checkpoint> {
        self.closed.as_ref()
    }

    pub fn proof(&self) -> Option<&CompletionProof> {
        self.proof.as_ref()
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn assignment_history(&self) -> &[AssignmentEvent] {
        &self.assignment_history
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether `technician_id` was taken off this job at some point.
    pub fn was_unassigned(&self, technician_id: &str) -> bool {
        self.assignment_history
            .iter()
            .any(|e| e.technician_id == technician_id && e.action == AssignmentAction::Unassigned)
    }

    /// Record an assignment change. Resets the job to pending and drops any
    /// start evidence.
    pub(crate) fn set_technician(&mut self, technician: Option<&str>, at: DateTime<Utc>) {
        if let Some(previous) = self.technician.take() {
            self.assignment_history.push(AssignmentEvent {
                technician_id: previous,
                at,
                action: AssignmentAction::Unassigned,
            });
        }
        if let Some(technician) = technician {
            self.assignment_history.push(AssignmentEvent {
                technician_id: technician.to_string(),
                at,
                action: AssignmentAction::Assigned,
            });
            self.technician = Some(technician.to_string());
        }
        self.status = ServiceStatus::Pending;
        self.started = None;
    }
}

/// Read-only summary of a visit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitSummary {
    pub job_id: String,
    pub client: Option<String>,
    pub status: ServiceStatus,
    pub technician: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub started_position: Option<Position>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_position: Option<Position>,
    /// Minutes between start and close, when both happened.
    pub on_site_minutes: Option<i64>,
    pub proof_attached: bool,
    pub cancellation_reason: Option<String>,
    pub reassignments: usize,
}

impl VisitSummary {
    pub fn from_job(job: &ServiceJob) -> Self {
        let started_at = job.started.as_ref().map(|c| c.at);
        let closed_at = job.closed.as_ref().map(|c| c.at);
        let on_site_minutes = match (started_at, closed_at) {
            (Some(start), Some(end)) => Some((end - start).num_minutes()),
            _ => None,
        };

        Self {
            job_id: job.id.clone(),
            client: job.client.clone(),
            status: job.status,
            technician: job.technician.clone(),
            started_at,
            started_position: job.started.as_ref().and_then(|c| c.position.clone()),
            closed_at,
            closed_position: job.closed.as_ref().and_then(|c| c.position.clone()),
            on_site_minutes,
            proof_attached: job.proof.is_some(),
            cancellation_reason: job.cancellation_reason.clone(),
            reassignments: job
                .assignment_history
                .iter()
                .filter(|e| e.action == AssignmentAction::Unassigned)
                .count(),
        }
    }
}
