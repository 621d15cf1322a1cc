//! Common types for the KubeVirt worker provider: worker and cloud profile
//! types, provider configuration decoding, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod quantity;
pub mod telemetry;

pub use error::{Error, ObjectFailure, ReconcileStage};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API version of provider-specific configuration documents
/// (WorkerConfig, CloudProfileConfig, InfrastructureStatus, WorkerStatus)
pub const PROVIDER_API_VERSION: &str = "kubevirt.provider.extensions.gardener.cloud/v1alpha1";

/// Key holding the provider cluster kubeconfig in the worker's credentials secret
pub const KUBECONFIG_SECRET_KEY: &str = "kubeconfig";
