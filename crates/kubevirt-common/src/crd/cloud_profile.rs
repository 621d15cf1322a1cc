//! Cloud profile: the catalog of machine types and images a cluster may use

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};

/// A cloud profile
///
/// Machine images and their download locations live in the provider-specific
/// `provider_config` (a CloudProfileConfig document).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudProfile {
    /// Profile name
    pub name: String,

    /// Machine types offered by the profile
    #[serde(default)]
    pub machine_types: Vec<MachineType>,

    /// Raw CloudProfileConfig document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<serde_json::Value>,
}

impl CloudProfile {
    /// Look up a machine type by name
    pub fn machine_type(&self, name: &str) -> Option<&MachineType> {
        self.machine_types.iter().find(|mt| mt.name == name)
    }
}

/// A machine type: CPU, memory and default root storage
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineType {
    /// Type name referenced by pools
    pub name: String,
    /// CPU count (e.g., "2" or "300m")
    pub cpu: Quantity,
    /// Memory (e.g., "4096Mi")
    pub memory: Quantity,
    /// Default root storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<MachineTypeStorage>,
}

/// Default root storage of a machine type
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineTypeStorage {
    /// Storage class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    /// Volume size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_size: Option<Quantity>,
}
