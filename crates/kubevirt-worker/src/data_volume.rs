//! Per-class root disk images on the provider cluster
//!
//! Every machine class gets a CDI DataVolume, named after the class, that
//! imports the pool's image from its HTTP source. Machines clone their root
//! disk from it. Source, storage class and access modes are immutable once
//! created; the size may only grow.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::ProviderClient;
use crate::constants::{ACCESS_MODE_READ_WRITE_ONCE, STORAGE_RESOURCE};
use kubevirt_common::quantity::compare_quantities;
use kubevirt_common::{Error, Result};

/// A CDI data volume as this provider reads and writes it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataVolume {
    /// Object name, equal to the machine class name
    pub name: String,
    /// Desired state
    pub spec: DataVolumeSpec,
    /// Observed state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DataVolumeStatus>,
}

/// Data volume spec
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DataVolumeSpec {
    /// Where the disk contents come from
    #[serde(default)]
    pub source: DataVolumeSource,
    /// Claim backing the volume
    #[serde(default)]
    pub pvc: PvcSpec,
}

/// Data volume source; only HTTP imports are produced
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DataVolumeSource {
    /// Import over HTTP(S)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpSource>,
}

/// HTTP import source
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpSource {
    /// Image URL
    pub url: String,
}

/// Claim spec of a data volume
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PvcSpec {
    /// Storage class; `None` uses the cluster default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    /// Access modes
    #[serde(default)]
    pub access_modes: Vec<String>,
    /// Resource requests
    #[serde(default)]
    pub resources: PvcResources,
}

/// Claim resource requests
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PvcResources {
    /// Requested quantities keyed by resource name
    #[serde(default)]
    pub requests: BTreeMap<String, Quantity>,
}

/// Observed state of a data volume
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DataVolumeStatus {
    /// CDI phase (e.g., "ImportInProgress", "Succeeded")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// Whether machines may be created from a data volume
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeReadiness {
    /// The import finished
    Ready,
    /// Still populating, but machines can be created and will wait for it
    Acceptable,
    /// Not usable yet (no phase, pending, failed or unknown)
    NotReady,
}

impl VolumeReadiness {
    /// Classify a CDI phase
    pub fn from_phase(phase: Option<&str>) -> Self {
        match phase {
            Some("Succeeded") => VolumeReadiness::Ready,
            Some(
                "WaitForFirstConsumer" | "PendingPopulation" | "ImportScheduled"
                | "ImportInProgress" | "CloneScheduled" | "CloneInProgress",
            ) => VolumeReadiness::Acceptable,
            _ => VolumeReadiness::NotReady,
        }
    }

    /// Whether deployments using this volume may be given capacity
    pub fn allows_capacity(self) -> bool {
        !matches!(self, VolumeReadiness::NotReady)
    }
}

/// What `ensure` did to a volume
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeAction {
    /// The volume did not exist and was created
    Created,
    /// The volume's size was grown
    Updated,
    /// The volume already matched
    Unchanged,
}

/// Result of ensuring one data volume
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeOutcome {
    /// Volume name
    pub name: String,
    /// What was done
    pub action: VolumeAction,
    /// Readiness after the action
    pub readiness: VolumeReadiness,
}

/// Desired data volume for one machine class
#[derive(Clone, Debug, PartialEq)]
pub struct DataVolumeRequest {
    /// Volume name, equal to the machine class name
    pub name: String,
    /// Image URL to import
    pub source_url: String,
    /// Storage class; `None` uses the cluster default
    pub storage_class: Option<String>,
    /// Volume size
    pub size: Quantity,
}

impl DataVolumeRequest {
    /// The data volume object this request describes
    pub fn to_data_volume(&self) -> DataVolume {
        DataVolume {
            name: self.name.clone(),
            spec: DataVolumeSpec {
                source: DataVolumeSource {
                    http: Some(HttpSource {
                        url: self.source_url.clone(),
                    }),
                },
                pvc: PvcSpec {
                    storage_class_name: self.storage_class.clone(),
                    access_modes: vec![ACCESS_MODE_READ_WRITE_ONCE.to_string()],
                    resources: PvcResources {
                        requests: BTreeMap::from([(
                            STORAGE_RESOURCE.to_string(),
                            self.size.clone(),
                        )]),
                    },
                },
            },
            status: None,
        }
    }
}

/// Creates and grows data volumes through a provider client
pub struct DataVolumeReconciler<'a> {
    client: &'a dyn ProviderClient,
}

impl<'a> DataVolumeReconciler<'a> {
    /// Create a reconciler on top of a provider client
    pub fn new(client: &'a dyn ProviderClient) -> Self {
        Self { client }
    }

    /// Make the data volume for `request` exist and match it
    ///
    /// Creates the volume when missing and grows it when the desired size is
    /// larger. Never writes when nothing changed, so repeated calls are safe.
    pub async fn ensure(&self, request: &DataVolumeRequest) -> Result<VolumeOutcome> {
        let Some(existing) = self.client.get_data_volume(&request.name).await? else {
            self.client.create_data_volume(&request.to_data_volume()).await?;
            info!(volume = %request.name, url = %request.source_url, "Created data volume");

            // CDI may already have scheduled the import
            let created = self.client.get_data_volume(&request.name).await?;
            return Ok(VolumeOutcome {
                name: request.name.clone(),
                action: VolumeAction::Created,
                readiness: VolumeReadiness::from_phase(
                    created
                        .as_ref()
                        .and_then(|v| v.status.as_ref())
                        .and_then(|s| s.phase.as_deref()),
                ),
            });
        };

        let readiness = VolumeReadiness::from_phase(
            existing.status.as_ref().and_then(|s| s.phase.as_deref()),
        );

        check_immutable_fields(&existing, request)?;

        let action = match grown_size(&existing, request)? {
            Some(size) => {
                self.client.resize_data_volume(&request.name, &size).await?;
                info!(volume = %request.name, size = %request.size.0, "Grew data volume");
                VolumeAction::Updated
            }
            None => {
                debug!(volume = %request.name, readiness = ?readiness, "Data volume up to date");
                VolumeAction::Unchanged
            }
        };

        Ok(VolumeOutcome {
            name: request.name.clone(),
            action,
            readiness,
        })
    }
}

fn check_immutable_fields(existing: &DataVolume, request: &DataVolumeRequest) -> Result<()> {
    let existing_url = existing
        .spec
        .source
        .http
        .as_ref()
        .map(|h| h.url.as_str())
        .unwrap_or_default();
    if existing_url != request.source_url {
        return Err(Error::volume_conflict(
            &request.name,
            "spec.source.http.url",
            existing_url,
            &request.source_url,
        ));
    }

    let existing_class = existing.spec.pvc.storage_class_name.as_deref();
    if existing_class != request.storage_class.as_deref() {
        return Err(Error::volume_conflict(
            &request.name,
            "spec.pvc.storageClassName",
            existing_class.unwrap_or_default(),
            request.storage_class.as_deref().unwrap_or_default(),
        ));
    }

    let modes = &existing.spec.pvc.access_modes;
    if modes.len() != 1 || modes[0] != ACCESS_MODE_READ_WRITE_ONCE {
        return Err(Error::volume_conflict(
            &request.name,
            "spec.pvc.accessModes",
            modes.join(","),
            ACCESS_MODE_READ_WRITE_ONCE,
        ));
    }

    Ok(())
}

/// The new size if the volume must grow; errors if it would shrink
fn grown_size(existing: &DataVolume, request: &DataVolumeRequest) -> Result<Option<Quantity>> {
    let Some(current) = existing.spec.pvc.resources.requests.get(STORAGE_RESOURCE) else {
        return Ok(Some(request.size.clone()));
    };
    let ordering = compare_quantities(current, &request.size).map_err(|m| {
        Error::serialization_for_kind("DataVolume", format!("volume {}: {}", request.name, m))
    })?;
    match ordering {
        Ordering::Less => Ok(Some(request.size.clone())),
        Ordering::Equal => Ok(None),
        Ordering::Greater => Err(Error::volume_conflict(
            &request.name,
            "spec.pvc.resources.requests.storage",
            &current.0,
            &request.size.0,
        )),
    }
}
