mod engine;
mod job;
mod state;

pub use engine::{SERVICES_KEY, ServiceLifecycle, TransitionExtras};
pub use job::{
    AssignmentAction, AssignmentEvent, Caller, Checkpoint, CompletionProof, Evidence, ProofBundle,
    ProofSource, Role, ServiceJob, VisitSummary,
};
pub use state::{ServiceStatus, StateMachine, Transition};
