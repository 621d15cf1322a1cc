//! Provider-specific configuration documents and their decoder
//!
//! Pools, cloud profiles and the infrastructure step carry opaque JSON
//! documents tagged with `apiVersion` and `kind`. [`ProviderConfigDecoder`]
//! checks the tag and decodes them into typed values.

use k8s_openapi::api::core::v1::PodDNSConfig;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{CloudProfile, WorkerPool, WorkerSpec};
use crate::{Error, PROVIDER_API_VERSION};

/// Kind of the per-pool configuration document
pub const WORKER_CONFIG_KIND: &str = "WorkerConfig";
/// Kind of the cloud profile configuration document
pub const CLOUD_PROFILE_CONFIG_KIND: &str = "CloudProfileConfig";
/// Kind of the infrastructure status document
pub const INFRASTRUCTURE_STATUS_KIND: &str = "InfrastructureStatus";
/// Kind of the worker status document
pub const WORKER_STATUS_KIND: &str = "WorkerStatus";

/// Per-pool provider configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WorkerConfig {
    /// DNS policy for the virtual machines (e.g., "Default", "None")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_policy: Option<String>,

    /// DNS configuration for the virtual machines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_config: Option<PodDNSConfig>,

    /// CPU override for the machine type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<Quantity>,

    /// Memory override for the machine type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Quantity>,
}

/// Provider section of a cloud profile
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CloudProfileConfig {
    /// Images and their download locations
    #[serde(default)]
    pub machine_images: Vec<MachineImages>,
}

/// All versions of one image name
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MachineImages {
    /// Image name
    pub name: String,
    /// Known versions
    #[serde(default)]
    pub versions: Vec<MachineImageVersion>,
}

/// One image version and where to fetch it
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MachineImageVersion {
    /// Version string, compared verbatim
    pub version: String,
    /// HTTP(S) URL of the disk image
    #[serde(rename = "sourceURL")]
    pub source_url: String,
}

/// Status written by the infrastructure step
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct InfrastructureStatus {
    /// Networks machines attach to
    #[serde(default)]
    pub networks: Vec<NetworkStatus>,
}

/// A network machines attach to
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NetworkStatus {
    /// Network attachment name
    pub name: String,
    /// Whether this is the machine's default (pod) network
    #[serde(default)]
    pub default: bool,
}

/// A resolved machine image, as reported in the worker status
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct MachineImage {
    /// Image name
    pub name: String,
    /// Image version
    pub version: String,
    /// Resolved download location
    #[serde(rename = "sourceURL")]
    pub source_url: String,
}

/// Status reported back for a worker
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    /// Always [`PROVIDER_API_VERSION`]
    pub api_version: String,
    /// Always [`WORKER_STATUS_KIND`]
    pub kind: String,
    /// Images in use, deduplicated, in first-seen pool order
    pub machine_images: Vec<MachineImage>,
}

impl WorkerStatus {
    /// Build a status from resolved images
    pub fn new(machine_images: Vec<MachineImage>) -> Self {
        Self {
            api_version: PROVIDER_API_VERSION.to_string(),
            kind: WORKER_STATUS_KIND.to_string(),
            machine_images,
        }
    }
}

/// Decodes tagged provider configuration documents
///
/// Stateless; one instance is shared by reference across a pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProviderConfigDecoder;

impl ProviderConfigDecoder {
    /// Create a decoder
    pub fn new() -> Self {
        Self
    }

    /// Decode a pool's WorkerConfig; `None` when the pool carries none
    pub fn worker_config(
        &self,
        pool: &WorkerPool,
        index: usize,
    ) -> Result<Option<WorkerConfig>, Error> {
        let Some(raw) = pool.provider_config.as_ref() else {
            return Ok(None);
        };
        let field = format!("spec.pools[{index}].providerConfig");
        decode(raw, WORKER_CONFIG_KIND)
            .map(Some)
            .map_err(|m| Error::invalid_pool(field, m))
    }

    /// Decode a cloud profile's CloudProfileConfig; empty when absent
    pub fn cloud_profile_config(
        &self,
        profile: &CloudProfile,
    ) -> Result<CloudProfileConfig, Error> {
        match profile.provider_config.as_ref() {
            Some(raw) => decode(raw, CLOUD_PROFILE_CONFIG_KIND).map_err(|m| {
                Error::serialization_for_kind(
                    CLOUD_PROFILE_CONFIG_KIND,
                    format!("cloud profile {}: {}", profile.name, m),
                )
            }),
            None => Ok(CloudProfileConfig::default()),
        }
    }

    /// Decode the worker's InfrastructureStatus; empty when absent
    pub fn infrastructure_status(&self, spec: &WorkerSpec) -> Result<InfrastructureStatus, Error> {
        match spec.infrastructure_provider_status.as_ref() {
            Some(raw) => decode(raw, INFRASTRUCTURE_STATUS_KIND).map_err(|m| {
                Error::serialization_for_kind(
                    INFRASTRUCTURE_STATUS_KIND,
                    format!("spec.infrastructureProviderStatus: {}", m),
                )
            }),
            None => Ok(InfrastructureStatus::default()),
        }
    }
}

/// Check the type tag, then decode the remaining fields strictly
fn decode<T: DeserializeOwned>(raw: &serde_json::Value, kind: &str) -> Result<T, String> {
    let obj = raw
        .as_object()
        .ok_or_else(|| format!("expected a {kind} object"))?;

    let api_version = obj.get("apiVersion").and_then(|v| v.as_str());
    if api_version != Some(PROVIDER_API_VERSION) {
        return Err(format!(
            "apiVersion must be {PROVIDER_API_VERSION}, got {}",
            api_version.unwrap_or("<none>")
        ));
    }
    let actual_kind = obj.get("kind").and_then(|v| v.as_str());
    if actual_kind != Some(kind) {
        return Err(format!(
            "kind must be {kind}, got {}",
            actual_kind.unwrap_or("<none>")
        ));
    }

    let mut fields = obj.clone();
    fields.remove("apiVersion");
    fields.remove("kind");
    serde_json::from_value(serde_json::Value::Object(fields))
        .map_err(|e| format!("failed to decode {kind}: {e}"))
}
