//! Worker specification: the set of pools a cluster asks for

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use k8s_openapi::api::core::v1::Taint;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::{Deserialize, Serialize};

use crate::Error;

/// A worker request for one cluster
///
/// `namespace` is the cluster's namespace in the seed; every generated
/// object lives there and its name is prefixed with it.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    /// Namespace of the owning cluster
    pub namespace: String,
    /// Name of the cloud profile the cluster was created from
    pub cloud_profile: String,
    /// Pool set and cluster-level settings
    pub spec: WorkerSpec,
}

/// Specification of all worker pools of a cluster
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSpec {
    /// Secret holding the provider cluster kubeconfig
    pub secret_ref: SecretRef,

    /// Region the cluster runs in
    pub region: String,

    /// Raw InfrastructureStatus document written by the infrastructure step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_provider_status: Option<serde_json::Value>,

    /// Worker pools, in declaration order
    #[serde(default)]
    pub pools: Vec<WorkerPool>,

    /// SSH public key injected into every machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_public_key: Option<String>,
}

impl WorkerSpec {
    /// Validate the pool set
    ///
    /// Pool names must be unique and every pool must pass
    /// [`WorkerPool::validate`]. Errors carry the offending field path.
    pub fn validate(&self) -> Result<(), Error> {
        if self.region.is_empty() {
            return Err(Error::invalid_pool("spec.region", "region cannot be empty"));
        }

        let mut names = BTreeSet::new();
        for (index, pool) in self.pools.iter().enumerate() {
            pool.validate(index)?;
            if !names.insert(pool.name.as_str()) {
                return Err(Error::invalid_pool(
                    format!("spec.pools[{index}].name"),
                    format!("duplicate pool name {:?}", pool.name),
                ));
            }
        }
        Ok(())
    }
}

/// Reference to a secret by name and namespace
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SecretRef {
    /// Secret name
    pub name: String,
    /// Secret namespace
    pub namespace: String,
}

/// A named group of identical machines spread across zones
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPool {
    /// Pool name, unique within the worker
    pub name: String,

    /// Machine type from the cloud profile catalog
    pub machine_type: String,

    /// Machine image name and version
    pub machine_image: MachineImageRef,

    /// Minimum number of machines across all zones
    pub minimum: u32,

    /// Maximum number of machines across all zones
    pub maximum: u32,

    /// Extra machines allowed during a rolling update (count or "N%" of maximum)
    #[serde(default = "default_max_surge")]
    pub max_surge: IntOrString,

    /// Machines allowed to be unavailable during a rolling update (count or "N%" of minimum)
    #[serde(default = "default_max_unavailable")]
    pub max_unavailable: IntOrString,

    /// Availability zones the pool spans
    pub zones: Vec<String>,

    /// Cloud-init user data for the machines
    #[serde(default)]
    pub user_data: String,

    /// Raw WorkerConfig document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<serde_json::Value>,

    /// Root volume override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<PoolVolume>,

    /// Labels set on the nodes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Annotations set on the nodes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Taints set on the nodes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,

    /// Machine lifecycle overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_settings: Option<MachineSettings>,
}

fn default_max_surge() -> IntOrString {
    IntOrString::Int(1)
}

fn default_max_unavailable() -> IntOrString {
    IntOrString::Int(0)
}

impl WorkerPool {
    /// Validate the pool at position `index` in the worker spec
    pub fn validate(&self, index: usize) -> Result<(), Error> {
        let field = |name: &str| format!("spec.pools[{index}].{name}");

        if self.name.is_empty() {
            return Err(Error::invalid_pool(field("name"), "pool name cannot be empty"));
        }
        if self.machine_type.is_empty() {
            return Err(Error::invalid_pool(
                field("machineType"),
                "machine type cannot be empty",
            ));
        }
        if self.machine_image.name.is_empty() || self.machine_image.version.is_empty() {
            return Err(Error::invalid_pool(
                field("machineImage"),
                "machine image name and version are required",
            ));
        }
        if self.maximum < self.minimum {
            return Err(Error::invalid_pool(
                field("maximum"),
                format!(
                    "maximum ({}) must be >= minimum ({})",
                    self.maximum, self.minimum
                ),
            ));
        }
        if self.zones.is_empty() {
            return Err(Error::invalid_pool(field("zones"), "at least one zone is required"));
        }
        let mut seen = BTreeSet::new();
        for zone in &self.zones {
            if zone.is_empty() {
                return Err(Error::invalid_pool(field("zones"), "zone names cannot be empty"));
            }
            if !seen.insert(zone.as_str()) {
                return Err(Error::invalid_pool(
                    field("zones"),
                    format!("zone {zone:?} listed more than once"),
                ));
            }
        }
        check_int_or_percent(&self.max_surge)
            .map_err(|m| Error::invalid_pool(field("maxSurge"), m))?;
        check_int_or_percent(&self.max_unavailable)
            .map_err(|m| Error::invalid_pool(field("maxUnavailable"), m))?;
        Ok(())
    }
}

fn check_int_or_percent(value: &IntOrString) -> Result<(), String> {
    match value {
        IntOrString::Int(i) if *i < 0 => Err(format!("must not be negative, got {i}")),
        IntOrString::Int(_) => Ok(()),
        IntOrString::String(s) => parse_percent(s)
            .map(|_| ())
            .ok_or_else(|| format!("expected an integer or a percentage like \"25%\", got {s:?}")),
    }
}

/// Parse a percentage string like "25%" into its integer value
pub fn parse_percent(value: &str) -> Option<u32> {
    value.strip_suffix('%')?.trim().parse().ok()
}

/// Machine image reference as written in a pool
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MachineImageRef {
    /// Image name (e.g., "ubuntu")
    pub name: String,
    /// Image version, compared verbatim (e.g., "16.04")
    pub version: String,
}

/// Root volume of a pool's machines
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PoolVolume {
    /// Storage class for the root volume
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    /// Root volume size
    pub size: Quantity,
}

/// Machine lifecycle overrides for a pool
///
/// Every field is optional; an absent value leaves the machine controller's
/// own default in effect.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineSettings {
    /// How long to wait for a node to drain
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub machine_drain_timeout: Option<Duration>,

    /// How long a machine may stay unhealthy before it is replaced
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub machine_health_timeout: Option<Duration>,

    /// How long machine creation may take
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub machine_creation_timeout: Option<Duration>,

    /// Pod eviction attempts during drain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_evict_retries: Option<u32>,

    /// Node conditions that mark a machine unhealthy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_conditions: Option<Vec<String>>,
}
