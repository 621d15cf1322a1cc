//! Collaborator abstractions
//!
//! Every external system a reconciliation pass talks to sits behind one of
//! these traits, so tests can mock them while production uses the
//! Kubernetes-backed implementations in [`crate::kubernetes`] or the file-backed
//! ones in [`crate::file`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::Serialize;

#[cfg(test)]
use mockall::automock;

use crate::data_volume::DataVolume;
use crate::deployment::MachineDeployment;
use crate::machine_class::MachineClass;
use kubevirt_common::crd::{CloudProfile, SecretRef, Worker, WorkerStatus};
use kubevirt_common::Error;

/// Source of the worker request and sink for its status
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkerSource: Send + Sync {
    /// Read the current worker request
    async fn read_worker(&self) -> Result<Worker, Error>;

    /// Write the worker status back
    async fn report_status(&self, status: &WorkerStatus) -> Result<(), Error>;
}

/// Source of cloud profiles
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudProfileSource: Send + Sync {
    /// Get the cloud profile with the given name
    async fn cloud_profile(&self, name: &str) -> Result<CloudProfile, Error>;
}

/// Source of secret contents
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Read all data keys of a secret
    async fn secret_data(&self, secret: &SecretRef) -> Result<BTreeMap<String, Vec<u8>>, Error>;
}

/// Values document for one release apply
///
/// Exactly one object is carried per apply, so a failure is attributable to
/// a single machine class or deployment.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseValues {
    /// Machine classes to apply, each with its secret
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub machine_classes: Vec<MachineClass>,

    /// Machine deployments to apply
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub machine_deployments: Vec<MachineDeployment>,
}

impl ReleaseValues {
    /// Values carrying a single machine class
    pub fn machine_class(class: MachineClass) -> Self {
        Self {
            machine_classes: vec![class],
            ..Default::default()
        }
    }

    /// Values carrying a single machine deployment
    pub fn machine_deployment(deployment: MachineDeployment) -> Self {
        Self {
            machine_deployments: vec![deployment],
            ..Default::default()
        }
    }
}

/// Applies rendered objects to the cluster namespace
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManifestApplier: Send + Sync {
    /// Render `values` for `release` and apply the result into `namespace`
    async fn apply(
        &self,
        namespace: &str,
        release: &str,
        values: &ReleaseValues,
    ) -> Result<(), Error>;

    /// Names of the machine classes or deployments previously applied for `release`
    async fn released(&self, namespace: &str, release: &str) -> Result<Vec<String>, Error>;

    /// Delete one object of `release` (a class goes together with its secret)
    ///
    /// A missing object is not an error.
    async fn delete(&self, namespace: &str, release: &str, name: &str) -> Result<(), Error>;
}

/// Data volume access on the provider cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Get a data volume by name; `None` if it does not exist
    async fn get_data_volume(&self, name: &str) -> Result<Option<DataVolume>, Error>;

    /// Create a data volume
    async fn create_data_volume(&self, volume: &DataVolume) -> Result<(), Error>;

    /// Set the storage request of an existing data volume, leaving every other field as is
    async fn resize_data_volume(&self, name: &str, size: &Quantity) -> Result<(), Error>;

    /// Delete a data volume; a missing volume is not an error
    async fn delete_data_volume(&self, name: &str) -> Result<(), Error>;
}

/// Builds provider cluster clients from kubeconfig bytes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProviderClientFactory: Send + Sync {
    /// Create a client for the provider cluster described by `kubeconfig`
    async fn provider_client(&self, kubeconfig: &[u8]) -> Result<Arc<dyn ProviderClient>, Error>;
}
