//! Worker reconciliation for the KubeVirt provider
//!
//! Turns a worker's pools into machine classes, machine deployments and the
//! data volumes the classes boot from, and applies them:
//!
//! - [`zones`]: distributing counts over zones
//! - [`hash`]: rollout hash of a pool
//! - [`image`]: image resolution against the cloud profile
//! - [`data_volume`]: boot disk volumes on the provider cluster
//! - [`machine_class`] and [`deployment`]: desired objects
//! - [`delegate`] and [`reconciler`]: the staged pass
//!
//! Collaborators live behind the traits in [`client`], with Kubernetes-backed
//! implementations in [`kubernetes`] and file-backed ones in [`file`].

#![deny(missing_docs)]

pub mod client;
pub mod constants;
pub mod data_volume;
pub mod delegate;
pub mod deployment;
pub mod file;
pub mod hash;
pub mod image;
pub mod kubernetes;
pub mod machine_class;
pub mod manifest;
pub mod plan;
pub mod reconciler;
pub mod zones;

pub use client::{
    CloudProfileSource, ManifestApplier, ProviderClient, ProviderClientFactory, ReleaseValues,
    SecretSource, WorkerSource,
};
pub use data_volume::{DataVolumeReconciler, DataVolumeRequest, VolumeOutcome, VolumeReadiness};
pub use delegate::{
    Collaborators, DeletedObjects, DesiredState, ReconcilerConfig, WorkerDelegate,
};
pub use deployment::MachineDeployment;
pub use machine_class::MachineClass;
pub use reconciler::{ReconcileReport, Reconciler};
pub use zones::ZoningStrategy;

#[cfg(test)]
pub use client::{
    MockCloudProfileSource, MockManifestApplier, MockProviderClient, MockProviderClientFactory,
    MockSecretSource, MockWorkerSource,
};

pub use kubevirt_common::{Error, Result};
