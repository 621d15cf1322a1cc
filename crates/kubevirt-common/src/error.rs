//! Error types for the KubeVirt worker provider
//!
//! Errors are structured with fields to aid debugging in production. Every
//! variant carries the name of the object or field it concerns, and errors
//! raised inside a reconciliation pass are wrapped with the stage that failed.

use std::fmt;

use thiserror::Error;

/// Collaborator name used for errors coming from the Kubernetes API
pub const KUBERNETES_COLLABORATOR: &str = "kubernetes";

/// Stage of a reconciliation pass, in execution order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReconcileStage {
    /// Reading the worker specification and cloud profile
    ReadSpec,
    /// Resolving machine image versions against the cloud profile
    ResolveImages,
    /// Computing machine classes and deployments
    ComputeDesired,
    /// Ensuring per-class data volumes on the provider cluster
    EnsureVolumes,
    /// Applying machine classes and their secrets
    ApplyClasses,
    /// Applying machine deployments
    ApplyDeployments,
    /// Deleting deployments and classes that are no longer desired
    DeleteStale,
    /// Writing the worker status back
    ReportStatus,
}

impl ReconcileStage {
    /// Stable name used in logs and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileStage::ReadSpec => "read-spec",
            ReconcileStage::ResolveImages => "resolve-images",
            ReconcileStage::ComputeDesired => "compute-desired",
            ReconcileStage::EnsureVolumes => "ensure-volumes",
            ReconcileStage::ApplyClasses => "apply-classes",
            ReconcileStage::ApplyDeployments => "apply-deployments",
            ReconcileStage::DeleteStale => "delete-stale",
            ReconcileStage::ReportStatus => "report-status",
        }
    }
}

impl fmt::Display for ReconcileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single object that failed to apply
#[derive(Debug)]
pub struct ObjectFailure {
    /// Name of the object (machine class, secret or deployment)
    pub name: String,
    /// Why it failed
    pub error: Error,
}

/// Main error type for worker reconciliation
#[derive(Debug, Error)]
pub enum Error {
    /// A pool references an image name/version absent from the cloud profile
    #[error("machine image {name}/{version} not found in cloud profile")]
    ImageNotFound {
        /// Image name as written in the pool
        name: String,
        /// Image version as written in the pool
        version: String,
    },

    /// An existing data volume differs from the desired one in an immutable field
    #[error("data volume {volume}: field {field} cannot change from {existing:?} to {desired:?}")]
    VolumeSpecConflict {
        /// Name of the data volume
        volume: String,
        /// Field path that differs (e.g., "spec.source.http.url")
        field: String,
        /// Value found on the provider cluster
        existing: String,
        /// Value computed for this pass
        desired: String,
    },

    /// A collaborator (secret store, provider cluster, applier) could not be reached
    #[error("{collaborator} unavailable: {message}")]
    UpstreamUnavailable {
        /// Which collaborator failed (e.g., "kubernetes", "secret-source")
        collaborator: String,
        /// Description of what failed
        message: String,
    },

    /// The worker specification violates a data-model rule
    #[error("invalid worker pool spec at {field}: {message}")]
    InvalidPoolSpec {
        /// The invalid field path (e.g., "spec.pools[0].zones")
        field: String,
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Broken internal invariant
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },

    /// An error annotated with the reconciliation stage it happened in
    #[error("{stage}: {source}")]
    Stage {
        /// Stage that failed
        stage: ReconcileStage,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// Some objects of an apply stage failed; the others were applied
    #[error(
        "{stage}: {} of {total} objects failed: {}",
        .failures.len(),
        format_failures(.failures)
    )]
    PartialApply {
        /// Stage the objects belong to
        stage: ReconcileStage,
        /// Number of objects attempted
        total: usize,
        /// Per-object failures
        failures: Vec<ObjectFailure>,
    },
}

fn format_failures(failures: &[ObjectFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.name, f.error))
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Self::upstream(KUBERNETES_COLLABORATOR, err.to_string())
    }
}

impl Error {
    /// Create an image-not-found error
    pub fn image_not_found(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::ImageNotFound {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Create a data volume conflict error for an immutable field
    pub fn volume_conflict(
        volume: impl Into<String>,
        field: impl Into<String>,
        existing: impl Into<String>,
        desired: impl Into<String>,
    ) -> Self {
        Self::VolumeSpecConflict {
            volume: volume.into(),
            field: field.into(),
            existing: existing.into(),
            desired: desired.into(),
        }
    }

    /// Create an upstream error for the named collaborator
    pub fn upstream(collaborator: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            collaborator: collaborator.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid pool spec error with a field path
    pub fn invalid_pool(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidPoolSpec {
            field: field.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Annotate this error with the stage it happened in
    ///
    /// Errors that already carry a stage are returned unchanged, so the
    /// innermost stage wins.
    pub fn in_stage(self, stage: ReconcileStage) -> Self {
        match self {
            Error::Stage { .. } | Error::PartialApply { .. } => self,
            other => Error::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage this error was raised in, if annotated
    pub fn stage(&self) -> Option<ReconcileStage> {
        match self {
            Error::Stage { stage, .. } | Error::PartialApply { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The underlying error with any stage annotation removed
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this error is retryable
    ///
    /// Spec errors (invalid pools, volume conflicts, serialization) need a
    /// configuration fix. Upstream outages and partial applies clear up on a
    /// later pass, and a missing image resolves once the cloud profile lists it.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ImageNotFound { .. } => true,
            Error::VolumeSpecConflict { .. } => false,
            Error::UpstreamUnavailable { .. } => true,
            Error::InvalidPoolSpec { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
            Error::Stage { source, .. } => source.is_retryable(),
            Error::PartialApply { .. } => true,
        }
    }
}
