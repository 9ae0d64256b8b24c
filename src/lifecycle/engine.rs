//! Evidence-gated lifecycle for service visits.
//!
//! Every mutating operation follows the same order:
//!
//! 1. plan the move against the job as currently stored;
//! 2. gather all required evidence (position, proof, reason) without touching
//!    the stored record;
//! 3. load, apply, bump the version and save the whole list in one write;
//! 4. only then notify.
//!
//! A failure at any step returns before anything is written or sent.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::job::{Caller, Checkpoint, CompletionProof, Evidence, ProofSource, Role, ServiceJob};
use super::state::{ServiceStatus, StateMachine, Transition};
use crate::error::ServiceError;
use crate::location::{
    AcquisitionMode, LocationAcquirer, PermissionNegotiator, PermissionQuery, PermissionState,
    Position, PositionSensor,
};
use crate::notify::{Notifier, NotifyTarget};
use crate::store::RecordStore;

/// Store key for service jobs.
pub const SERVICES_KEY: &str = "services";

/// Inputs a transition may need besides the position.
#[derive(Default)]
pub struct TransitionExtras<'a> {
    /// Required for cancellation.
    pub reason: Option<String>,
    /// Required for completion.
    pub proof: Option<&'a dyn ProofSource>,
}

/// Everything a transition needs, collected before the job is touched.
enum Gathered {
    Start {
        at: DateTime<Utc>,
        position: Position,
    },
    Finish {
        at: DateTime<Utc>,
        position: Position,
        proof: CompletionProof,
    },
    Cancel {
        at: DateTime<Utc>,
        position: Option<Position>,
        reason: String,
    },
}

impl Gathered {
    fn apply(self, job: &mut ServiceJob) {
        match self {
            Gathered::Start { at, position } => {
                job.status = ServiceStatus::InProgress;
                job.started = Some(Checkpoint {
                    at,
                    position: Some(position),
                });
            }
            Gathered::Finish {
                at,
                position,
                proof,
            } => {
                job.status = ServiceStatus::Completed;
                job.closed = Some(Checkpoint {
                    at,
                    position: Some(position),
                });
                job.proof = Some(proof);
            }
            Gathered::Cancel {
                at,
                position,
                reason,
            } => {
                job.status = ServiceStatus::Cancelled;
                job.closed = Some(Checkpoint { at, position });
                job.cancellation_reason = Some(reason);
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Owns the acquirer, the record store and the notifier for one session.
pub struct ServiceLifecycle<S, R, N> {
    acquirer: LocationAcquirer<S>,
    store: R,
    notifier: N,
    position_mode: AcquisitionMode,
}

impl<S, R, N> ServiceLifecycle<S, R, N>
where
    S: PositionSensor,
    R: RecordStore,
    N: Notifier,
{
    pub fn new(acquirer: LocationAcquirer<S>, store: R, notifier: N) -> Self {
        Self {
            acquirer,
            store,
            notifier,
            position_mode: AcquisitionMode::Fast,
        }
    }

    /// Use escalating acquisition instead of the fast path for transitions.
    #[must_use]
    pub fn with_position_mode(mut self, mode: AcquisitionMode) -> Self {
        self.position_mode = mode;
        self
    }

    pub fn acquirer(&self) -> &LocationAcquirer<S> {
        &self.acquirer
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Advisory permission state to show before a location-gated
    /// transition. Never reads the sensor and never blocks the transition.
    pub async fn permission_hint(&self) -> PermissionState
    where
        S: PermissionQuery,
    {
        PermissionNegotiator::new(&self.acquirer, self.acquirer.sensor())
            .current_state()
            .await
    }

    pub fn list(&self) -> Result<Vec<ServiceJob>, ServiceError> {
        Ok(self.store.load(SERVICES_KEY, Vec::new())?)
    }

    pub fn get(&self, id: &str) -> Result<ServiceJob, ServiceError> {
        self.list()?
            .into_iter()
            .find(|job| job.id == id)
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    /// Persist a new job. It always starts pending, unassigned, at version 0.
    pub fn create(&self, job: ServiceJob) -> Result<ServiceJob, ServiceError> {
        let mut jobs = self.list()?;
        if jobs.iter().any(|j| j.id == job.id) {
            return Err(ServiceError::AlreadyExists(job.id));
        }

        let mut fresh = ServiceJob::new(job.id);
        fresh.client = job.client;
        fresh.address = job.address;
        fresh.description = job.description;
        jobs.push(fresh.clone());
        self.store.save(SERVICES_KEY, &jobs)?;

        info!(service = %fresh.id, "service created");
        Ok(fresh)
    }

    /// Give the job to `technician`, resetting it to pending.
    pub fn assign(&self, id: &str, technician: &str) -> Result<ServiceJob, ServiceError> {
        let job = self.get(id)?;
        StateMachine::ensure_assignable(&job)?;
        if job.technician() == Some(technician) {
            return Ok(job);
        }

        let returning = job.was_unassigned(technician);
        let previous = job.technician.clone();
        let now = Utc::now();
        let committed = self.commit(id, job.version, |job| {
            job.set_technician(Some(technician), now);
        })?;
        info!(service = id, technician, returning, "technician assigned");

        if let Some(previous) = previous {
            self.notifier.send(
                &NotifyTarget::User(previous),
                &format!("You were unassigned from service {id}"),
            );
        }
        let message = if returning {
            format!("You were reassigned to service {id}")
        } else {
            format!("You were assigned service {id}")
        };
        self.notifier
            .send(&NotifyTarget::User(technician.to_string()), &message);

        Ok(committed)
    }

    /// Take the job away from its technician.
    pub fn unassign(&self, id: &str) -> Result<ServiceJob, ServiceError> {
        let job = self.get(id)?;
        StateMachine::ensure_assignable(&job)?;
        let Some(previous) = job.technician.clone() else {
            return Ok(job);
        };

        let now = Utc::now();
        let committed = self.commit(id, job.version, |job| job.set_technician(None, now))?;
        info!(service = id, technician = %previous, "technician unassigned");

        self.notifier.send(
            &NotifyTarget::User(previous),
            &format!("You were unassigned from service {id}"),
        );
        Ok(committed)
    }

    pub async fn start(&self, id: &str, caller: &Caller) -> Result<ServiceJob, ServiceError> {
        self.request_transition(id, ServiceStatus::InProgress, caller, TransitionExtras::default())
            .await
    }

    pub async fn finish(
        &self,
        id: &str,
        caller: &Caller,
        proof: &dyn ProofSource,
    ) -> Result<ServiceJob, ServiceError> {
        let extras = TransitionExtras {
            reason: None,
            proof: Some(proof),
        };
        self.request_transition(id, ServiceStatus::Completed, caller, extras)
            .await
    }

    pub async fn cancel(
        &self,
        id: &str,
        caller: &Caller,
        reason: &str,
    ) -> Result<ServiceJob, ServiceError> {
        let extras = TransitionExtras {
            reason: Some(reason.to_string()),
            proof: None,
        };
        self.request_transition(id, ServiceStatus::Cancelled, caller, extras)
            .await
    }

    /// Move job `id` to `target` once every required piece of evidence is in
    /// hand. Returns the committed job.
    pub async fn request_transition(
        &self,
        id: &str,
        target: ServiceStatus,
        caller: &Caller,
        extras: TransitionExtras<'_>,
    ) -> Result<ServiceJob, ServiceError> {
        let job = self.get(id)?;
        let transition = StateMachine::plan(&job, target)?;

        let result = match self.gather(&job, transition, caller, extras).await {
            Ok(gathered) => self.commit(id, job.version, |job| gathered.apply(job)),
            Err(err) => Err(err),
        };
        let committed = match result {
            Ok(committed) => committed,
            Err(err) => {
                warn!(service = id, %transition, caller = %caller.id, %err, "transition aborted");
                return Err(err);
            }
        };

        info!(
            service = id,
            %transition,
            status = %committed.status,
            caller = %caller.id,
            "transition committed"
        );
        self.announce(&committed, transition, caller);
        Ok(committed)
    }

    async fn gather(
        &self,
        job: &ServiceJob,
        transition: Transition,
        caller: &Caller,
        extras: TransitionExtras<'_>,
    ) -> Result<Gathered, ServiceError> {
        let missing = |evidence| ServiceError::MissingEvidence {
            id: job.id.clone(),
            evidence,
        };

        match transition {
            Transition::Start => {
                let position = self.capture().await?;
                Ok(Gathered::Start {
                    at: Utc::now(),
                    position,
                })
            }
            Transition::Finish => {
                // Position first: if it fails, proof is never requested.
                let position = self.capture().await?;
                let proof = extras.proof.ok_or_else(|| missing(Evidence::Photo))?;

                let photo = non_empty(proof.photo()).ok_or_else(|| missing(Evidence::Photo))?;
                let client_signature = non_empty(proof.client_signature())
                    .ok_or_else(|| missing(Evidence::ClientSignature))?;
                let technician_signature = match caller.role {
                    Role::Technician => Some(
                        non_empty(proof.technician_signature())
                            .ok_or_else(|| missing(Evidence::TechnicianSignature))?,
                    ),
                    Role::Admin => non_empty(proof.technician_signature()),
                };

                Ok(Gathered::Finish {
                    at: Utc::now(),
                    position,
                    proof: CompletionProof {
                        photo,
                        client_signature,
                        technician_signature,
                    },
                })
            }
            Transition::Cancel => {
                // The reason is checked before the sensor is touched.
                let reason = non_empty(extras.reason)
                    .map(|r| r.trim().to_string())
                    .ok_or_else(|| missing(Evidence::CancellationReason))?;
                let position = if transition.requires_position(caller.role) {
                    Some(self.capture().await?)
                } else {
                    None
                };
                Ok(Gathered::Cancel {
                    at: Utc::now(),
                    position,
                    reason,
                })
            }
        }
    }

    async fn capture(&self) -> Result<Position, ServiceError> {
        let position = match self.position_mode {
            AcquisitionMode::Fast => self.acquirer.acquire_fast().await?,
            AcquisitionMode::Precise => self.acquirer.acquire_precise().await?,
        };
        Ok(position)
    }

    /// Apply `change` to the stored job and persist, provided nobody else
    /// committed since `expected_version` was read.
    fn commit(
        &self,
        id: &str,
        expected_version: u64,
        change: impl FnOnce(&mut ServiceJob),
    ) -> Result<ServiceJob, ServiceError> {
        let mut jobs = self.list()?;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))?;
        if job.version != expected_version {
            return Err(ServiceError::ConcurrentModification { id: id.to_string() });
        }

        change(job);
        job.version += 1;
        job.updated_at = Utc::now();
        let committed = job.clone();

        self.store.save(SERVICES_KEY, &jobs)?;
        Ok(committed)
    }

    fn announce(&self, job: &ServiceJob, transition: Transition, caller: &Caller) {
        let id = &job.id;
        let who = &caller.id;
        let (target, message) = match (transition, caller.role) {
            (Transition::Start, _) => (
                NotifyTarget::Role(Role::Admin),
                format!("{who} started service {id}"),
            ),
            (Transition::Finish, _) => (
                NotifyTarget::Role(Role::Admin),
                format!("{who} completed service {id}"),
            ),
            (Transition::Cancel, Role::Technician) => (
                NotifyTarget::Role(Role::Admin),
                format!(
                    "{who} cancelled service {id}: {}",
                    job.cancellation_reason().unwrap_or_default()
                ),
            ),
            (Transition::Cancel, Role::Admin) => match job.technician() {
                Some(technician) => (
                    NotifyTarget::User(technician.to_string()),
                    format!(
                        "Service {id} was cancelled: {}",
                        job.cancellation_reason().unwrap_or_default()
                    ),
                ),
                None => return,
            },
        };
        self.notifier.send(&target, &message);
    }
}
