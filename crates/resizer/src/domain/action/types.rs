use core::error::Error;
use std::fmt;
use std::time::Duration;

use api_types::ActionOutcomeKind;
use api_types::ActionResponse;
use error_stack::Report;

/// Workload controllers whose pod template scheduler can be swapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ControllerKind {
    Deployment,
    ReplicaSet,
    ReplicationController,
}

impl ControllerKind {
    /// Parse an owner reference kind. Any other kind cannot be handled.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "Deployment" => Some(Self::Deployment),
            "ReplicaSet" => Some(Self::ReplicaSet),
            "ReplicationController" => Some(Self::ReplicationController),
            _ => None,
        }
    }
}

/// Identity of the controller owning a pod.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParentRef {
    pub namespace: String,
    pub kind: ControllerKind,
    pub name: String,
}

impl ParentRef {
    pub fn new(namespace: impl Into<String>, kind: ControllerKind, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            name: name.into(),
        }
    }

    /// Lease key shared by every action touching this controller.
    pub fn lock_key(&self) -> String {
        format!("{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Reasons an action can fail.
#[derive(Debug, Clone, PartialEq, derive_more::Display)]
pub enum ActionError {
    #[display("Invalid action request: {message}")]
    ValidationError { message: String },
    #[display("Hosting pod ({display_name}) id mismatch [{from_container} vs. {from_request}]")]
    IdentityMismatch {
        display_name: String,
        from_container: String,
        from_request: String,
    },
    #[display("Unsupported commodity change: {message}")]
    UnsupportedCommodity { message: String },
    #[display("New capacity should be bigger than zero (requested {amount})")]
    NonPositiveCapacity { amount: f64 },
    #[display("Dependency failed: {message}")]
    DependencyError { message: String },
    #[display("Unsupported parent controller {kind} of pod {pod}")]
    UnsupportedController { kind: String, pod: String },
    #[display("Timed out after {waited:?} waiting for lock {key}")]
    LockTimeout { key: String, waited: Duration },
    #[display("Failed to disable scheduler of {parent}: {message}")]
    SchedulerUpdateFailed { parent: String, message: String },
    #[display("Write conflicts persisted after {attempts} attempts to resize pod {pod}")]
    MutationConflictExhausted { pod: String, attempts: u32 },
    #[display("Failed to resize pod {pod}: {message}")]
    MutationFailed { pod: String, message: String },
    #[display("Replacement {replacement} of deleted pod {pod} could not be handed to its controller")]
    ReplacementNotAdopted { pod: String, replacement: String },
    #[display("Pod {pod} is not running after {attempts} checks")]
    VerificationTimeout { pod: String, attempts: u32 },
    #[display("Pod {pod} is being deleted")]
    PodDeletedDuringAction { pod: String },
}

impl Error for ActionError {}

impl ActionError {
    /// Whether the dispatcher may resubmit the action later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::LockTimeout { .. }
            | Self::SchedulerUpdateFailed { .. }
            | Self::MutationConflictExhausted { .. }
            | Self::MutationFailed { .. } => true,
            Self::ValidationError { .. }
            | Self::IdentityMismatch { .. }
            | Self::UnsupportedCommodity { .. }
            | Self::NonPositiveCapacity { .. }
            | Self::DependencyError { .. }
            | Self::UnsupportedController { .. }
            | Self::ReplacementNotAdopted { .. }
            | Self::VerificationTimeout { .. }
            | Self::PodDeletedDuringAction { .. } => false,
        }
    }
}

/// Result of one action, reported to the dispatcher.
#[derive(Debug)]
pub enum ActionOutcome {
    /// `pod` is the `namespace/name` of the running, resized pod
    Succeeded { pod: String },
    RetryableFailure { error: Report<ActionError> },
    PermanentFailure { error: Report<ActionError> },
}

impl ActionOutcome {
    pub fn kind(&self) -> ActionOutcomeKind {
        match self {
            Self::Succeeded { .. } => ActionOutcomeKind::Succeeded,
            Self::RetryableFailure { .. } => ActionOutcomeKind::RetryableFailure,
            Self::PermanentFailure { .. } => ActionOutcomeKind::PermanentFailure,
        }
    }

    pub fn error(&self) -> Option<&ActionError> {
        match self {
            Self::Succeeded { .. } => None,
            Self::RetryableFailure { error } | Self::PermanentFailure { error } => {
                Some(error.current_context())
            }
        }
    }
}

impl From<Result<String, Report<ActionError>>> for ActionOutcome {
    fn from(result: Result<String, Report<ActionError>>) -> Self {
        match result {
            Ok(pod) => Self::Succeeded { pod },
            Err(error) if error.current_context().is_retryable() => {
                Self::RetryableFailure { error }
            }
            Err(error) => Self::PermanentFailure { error },
        }
    }
}

impl From<&ActionOutcome> for ActionResponse {
    fn from(outcome: &ActionOutcome) -> Self {
        let message = match outcome {
            ActionOutcome::Succeeded { pod } => format!("resized container of pod {pod}"),
            ActionOutcome::RetryableFailure { error } | ActionOutcome::PermanentFailure { error } => {
                error.current_context().to_string()
            }
        };
        Self {
            outcome: outcome.kind(),
            message,
        }
    }
}
