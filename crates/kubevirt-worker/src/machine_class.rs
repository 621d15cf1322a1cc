//! Machine class synthesis
//!
//! A machine class is the template machines of one deployment are created
//! from: sizing, image, networks, DNS and the secret carrying user data and
//! the provider kubeconfig.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::PodDNSConfig;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::Serialize;

use kubevirt_common::crd::{CloudProfile, InfrastructureStatus};
use kubevirt_common::{Error, Result};

use crate::constants::{ROLE_NODE, TAG_CLUSTER, TAG_MACHINE_CLASS, TAG_ROLE};
use crate::data_volume::DataVolumeRequest;
use crate::plan::PoolPlan;
use crate::zones::{zone_groups, ZoningStrategy};

/// Placeholder shown instead of secret material
pub const REDACTED: &str = "<redacted>";

/// A network the machines attach to
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NetworkAttachment {
    /// Network attachment name
    pub name: String,
    /// Whether this is the default network
    pub default: bool,
}

/// Secret material of a machine class
#[derive(Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineClassSecret {
    /// Machine user data
    pub cloud_config: String,
    /// Provider cluster kubeconfig
    pub kubeconfig: String,
}

impl fmt::Debug for MachineClassSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineClassSecret")
            .field("cloud_config", &REDACTED)
            .field("kubeconfig", &REDACTED)
            .finish()
    }
}

/// A machine class for one pool and zone group
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineClass {
    /// Class name: `<namespace>-<pool>-<suffix>-<hash>`
    pub name: String,
    /// Storage class of the root volume
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    /// Root volume size
    pub pvc_size: Quantity,
    /// CPU
    pub cpus: Quantity,
    /// Memory
    pub memory: Quantity,
    /// Image download location
    #[serde(rename = "sourceURL")]
    pub source_url: String,
    /// SSH public keys
    pub ssh_keys: Vec<String>,
    /// Networks to attach
    pub networks: Vec<NetworkAttachment>,
    /// Region
    pub region: String,
    /// Zones machines may be placed in
    pub zones: Vec<String>,
    /// Name of the secret holding [`MachineClass::secret`]
    pub secret_name: String,
    /// Secret material
    pub secret: MachineClassSecret,
    /// Bookkeeping tags
    pub tags: BTreeMap<String, String>,
    /// DNS policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_policy: Option<String>,
    /// DNS configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_config: Option<PodDNSConfig>,
}

impl MachineClass {
    /// Copy with secret material replaced by a placeholder, for display
    pub fn redacted(&self) -> Self {
        let mut class = self.clone();
        class.secret = MachineClassSecret {
            cloud_config: REDACTED.to_string(),
            kubeconfig: REDACTED.to_string(),
        };
        class
    }

    /// The data volume this class's machines clone their root disk from
    pub fn data_volume_request(&self) -> DataVolumeRequest {
        DataVolumeRequest {
            name: self.name.clone(),
            source_url: self.source_url.clone(),
            storage_class: self.storage_class_name.clone(),
            size: self.pvc_size.clone(),
        }
    }
}

/// Cluster-wide inputs of class synthesis
#[derive(Clone, Debug)]
pub struct ClassContext<'a> {
    /// Cluster namespace
    pub namespace: &'a str,
    /// Cluster region
    pub region: &'a str,
    /// SSH public key, if any
    pub ssh_public_key: Option<&'a str>,
    /// Provider cluster kubeconfig
    pub kubeconfig: &'a str,
    /// Machine type catalog
    pub cloud_profile: &'a CloudProfile,
    /// Networks from the infrastructure step
    pub infrastructure: &'a InfrastructureStatus,
    /// Deployment layout
    pub strategy: ZoningStrategy,
}

/// Build the machine classes for every pool, in pool then zone order
pub fn synthesize_machine_classes(
    ctx: &ClassContext<'_>,
    plans: &[PoolPlan<'_>],
) -> Result<Vec<MachineClass>> {
    let networks: Vec<NetworkAttachment> = ctx
        .infrastructure
        .networks
        .iter()
        .map(|n| NetworkAttachment {
            name: n.name.clone(),
            default: n.default,
        })
        .collect();
    let ssh_keys: Vec<String> = ctx.ssh_public_key.map(str::to_string).into_iter().collect();

    let mut classes = Vec::new();
    for plan in plans {
        let pool = plan.pool;
        let field = |name: &str| format!("spec.pools[{}].{}", plan.index, name);

        let machine_type = ctx.cloud_profile.machine_type(&pool.machine_type).ok_or_else(|| {
            Error::invalid_pool(
                field("machineType"),
                format!(
                    "machine type {} not found in cloud profile {}",
                    pool.machine_type, ctx.cloud_profile.name
                ),
            )
        })?;
        let type_storage = machine_type.storage.as_ref();

        let storage_class_name = pool
            .volume
            .as_ref()
            .and_then(|v| v.type_.clone())
            .or_else(|| type_storage.and_then(|s| s.class.clone()));
        let pvc_size = pool
            .volume
            .as_ref()
            .map(|v| v.size.clone())
            .or_else(|| type_storage.and_then(|s| s.storage_size.clone()))
            .ok_or_else(|| {
                Error::invalid_pool(
                    field("volume"),
                    format!(
                        "no volume size on the pool and none on machine type {}",
                        machine_type.name
                    ),
                )
            })?;

        let config = plan.worker_config.as_ref();
        let cpus = config
            .and_then(|c| c.cpu.clone())
            .unwrap_or_else(|| machine_type.cpu.clone());
        let memory = config
            .and_then(|c| c.memory.clone())
            .unwrap_or_else(|| machine_type.memory.clone());

        for group in zone_groups(&pool.zones, ctx.strategy) {
            let name = plan.class_name(ctx.namespace, &group.suffix);
            let tags = BTreeMap::from([
                (TAG_CLUSTER.to_string(), ctx.namespace.to_string()),
                (TAG_ROLE.to_string(), ROLE_NODE.to_string()),
                (TAG_MACHINE_CLASS.to_string(), name.clone()),
            ]);

            classes.push(MachineClass {
                secret_name: name.clone(),
                name,
                storage_class_name: storage_class_name.clone(),
                pvc_size: pvc_size.clone(),
                cpus: cpus.clone(),
                memory: memory.clone(),
                source_url: plan.image.source_url.clone(),
                ssh_keys: ssh_keys.clone(),
                networks: networks.clone(),
                region: ctx.region.to_string(),
                zones: group.zones.to_vec(),
                secret: MachineClassSecret {
                    cloud_config: pool.user_data.clone(),
                    kubeconfig: ctx.kubeconfig.to_string(),
                },
                tags,
                dns_policy: config.and_then(|c| c.dns_policy.clone()),
                dns_config: config.and_then(|c| c.dns_config.clone()),
            });
        }
    }
    Ok(classes)
}
