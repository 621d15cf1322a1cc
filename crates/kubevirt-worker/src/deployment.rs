//! Machine deployment assembly
//!
//! One deployment per pool and zone group, sized by distributing the pool's
//! bounds and rollout parameters over the groups.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::Taint;
use serde::Serialize;

use kubevirt_common::crd::MachineSettings;
use kubevirt_common::{Error, Result};

use crate::machine_class::MachineClass;
use crate::plan::PoolPlan;
use crate::zones::{
    distribute_int_or_percent, distribute_over_zones, zone_groups, Rounding, ZoningStrategy,
};

/// Machine lifecycle settings of a deployment
///
/// `None` leaves the machine controller's default in effect (drain 2h,
/// health 10m, creation 20m, 10 eviction retries at the time of writing).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfiguration {
    /// Node drain timeout
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub machine_drain_timeout: Option<Duration>,
    /// Unhealthy machine replacement timeout
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub machine_health_timeout: Option<Duration>,
    /// Machine creation timeout
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub machine_creation_timeout: Option<Duration>,
    /// Pod eviction retries during drain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_evict_retries: Option<u32>,
    /// Comma-separated node conditions that mark a machine unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_conditions: Option<String>,
}

impl From<&MachineSettings> for MachineConfiguration {
    fn from(settings: &MachineSettings) -> Self {
        Self {
            machine_drain_timeout: settings.machine_drain_timeout,
            machine_health_timeout: settings.machine_health_timeout,
            machine_creation_timeout: settings.machine_creation_timeout,
            max_evict_retries: settings.max_evict_retries,
            node_conditions: settings.node_conditions.as_ref().map(|c| c.join(",")),
        }
    }
}

/// A machine deployment descriptor for one pool and zone group
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeployment {
    /// Deployment name: `<namespace>-<pool>-<suffix>`
    pub name: String,
    /// Machine class the machines are created from
    pub class_name: String,
    /// Secret referenced by the machine class
    pub secret_name: String,
    /// Minimum machines in this group
    pub minimum: u32,
    /// Maximum machines in this group
    pub maximum: u32,
    /// Extra machines allowed during a rollout
    pub max_surge: u32,
    /// Machines allowed to be unavailable during a rollout
    pub max_unavailable: u32,
    /// Node labels
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Node annotations
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Node taints
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,
    /// Machine lifecycle settings
    pub machine_configuration: MachineConfiguration,
}

impl MachineDeployment {
    /// Copy that keeps the live replica count but never raises it
    ///
    /// Used while the class's data volume is not ready: a new deployment
    /// starts empty and a serving one keeps its machines.
    pub fn holding_capacity(&self) -> Self {
        Self {
            minimum: 0,
            ..self.clone()
        }
    }
}

/// Build the deployments for every pool, in pool then zone order
///
/// Every deployment references a class from `classes`; a missing class is an
/// internal error.
pub fn assemble_machine_deployments(
    namespace: &str,
    plans: &[PoolPlan<'_>],
    classes: &[MachineClass],
    strategy: ZoningStrategy,
) -> Result<Vec<MachineDeployment>> {
    let mut deployments = Vec::new();
    for plan in plans {
        let pool = plan.pool;
        let field = |name: &str| format!("spec.pools[{}].{}", plan.index, name);
        let machine_configuration = pool
            .machine_settings
            .as_ref()
            .map(MachineConfiguration::from)
            .unwrap_or_default();

        for group in zone_groups(&pool.zones, strategy) {
            let class_name = plan.class_name(namespace, &group.suffix);
            let class = classes.iter().find(|c| c.name == class_name).ok_or_else(|| {
                Error::internal_with_context(
                    "assemble_machine_deployments",
                    format!("no machine class {} for pool {}", class_name, pool.name),
                )
            })?;

            let max_surge = distribute_int_or_percent(
                group.index,
                &pool.max_surge,
                group.count,
                pool.maximum,
                Rounding::Up,
            )
            .ok_or_else(|| Error::invalid_pool(field("maxSurge"), "not a count or percentage"))?;
            let max_unavailable = distribute_int_or_percent(
                group.index,
                &pool.max_unavailable,
                group.count,
                pool.minimum,
                Rounding::Down,
            )
            .ok_or_else(|| {
                Error::invalid_pool(field("maxUnavailable"), "not a count or percentage")
            })?;

            deployments.push(MachineDeployment {
                name: plan.deployment_name(namespace, &group.suffix),
                class_name: class.name.clone(),
                secret_name: class.secret_name.clone(),
                minimum: distribute_over_zones(group.index, pool.minimum, group.count),
                maximum: distribute_over_zones(group.index, pool.maximum, group.count),
                max_surge,
                max_unavailable,
                labels: pool.labels.clone(),
                annotations: pool.annotations.clone(),
                taints: pool.taints.clone(),
                machine_configuration: machine_configuration.clone(),
            });
        }
    }
    Ok(deployments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine_class::{MachineClassSecret, REDACTED};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
    use kubevirt_common::crd::{MachineImage, MachineImageRef, WorkerPool};

    const NS: &str = "shoot--dev--kubevirt-1";
    const HASH: &str = "0123456789abcdef";

    fn pool(zones: &[&str]) -> WorkerPool {
        WorkerPool {
            name: "pool-1".to_string(),
            machine_type: "local-1".to_string(),
            machine_image: MachineImageRef {
                name: "ubuntu".to_string(),
                version: "16.04".to_string(),
            },
            minimum: 5,
            maximum: 7,
            max_surge: IntOrString::Int(3),
            max_unavailable: IntOrString::Int(2),
            zones: zones.iter().map(|z| z.to_string()).collect(),
            user_data: String::new(),
            provider_config: None,
            volume: None,
            labels: BTreeMap::from([("team".to_string(), "a".to_string())]),
            annotations: Default::default(),
            taints: vec![],
            machine_settings: None,
        }
    }

    fn plan(pool: &WorkerPool) -> PoolPlan<'_> {
        PoolPlan {
            index: 0,
            pool,
            hash: HASH.to_string(),
            image: MachineImage {
                name: "ubuntu".to_string(),
                version: "16.04".to_string(),
                source_url: "https://example.com/xenial.img".to_string(),
            },
            worker_config: None,
        }
    }

    fn class(name: String) -> MachineClass {
        MachineClass {
            secret_name: name.clone(),
            name,
            storage_class_name: None,
            pvc_size: Quantity("8Gi".to_string()),
            cpus: Quantity("2".to_string()),
            memory: Quantity("4Gi".to_string()),
            source_url: String::new(),
            ssh_keys: vec![],
            networks: vec![],
            region: "local".to_string(),
            zones: vec![],
            secret: MachineClassSecret {
                cloud_config: REDACTED.to_string(),
                kubeconfig: REDACTED.to_string(),
            },
            tags: Default::default(),
            dns_policy: None,
            dns_config: None,
        }
    }

    fn classes_for(suffixes: &[&str]) -> Vec<MachineClass> {
        suffixes
            .iter()
            .map(|s| class(format!("{NS}-pool-1-{s}-{HASH}")))
            .collect()
    }

    #[test]
    fn single_zone_pool_keeps_its_numbers() {
        let pool = pool(&["local-1"]);
        let deployments = assemble_machine_deployments(
            NS,
            &[plan(&pool)],
            &classes_for(&["z"]),
            ZoningStrategy::Aggregate,
        )
        .unwrap();

        assert_eq!(deployments.len(), 1);
        let d = &deployments[0];
        assert_eq!(d.name, format!("{NS}-pool-1-z"));
        assert_eq!(d.class_name, format!("{NS}-pool-1-z-{HASH}"));
        assert_eq!(d.secret_name, d.class_name);
        assert_eq!((d.minimum, d.maximum, d.max_surge, d.max_unavailable), (5, 7, 3, 2));
        assert_eq!(d.labels["team"], "a");
        assert_eq!(d.machine_configuration, MachineConfiguration::default());
    }

    #[test]
    fn per_zone_deployments_split_numbers() {
        let pool = pool(&["a", "b", "c"]);
        let deployments = assemble_machine_deployments(
            NS,
            &[plan(&pool)],
            &classes_for(&["z1", "z2", "z3"]),
            ZoningStrategy::PerZone,
        )
        .unwrap();

        let mins: Vec<u32> = deployments.iter().map(|d| d.minimum).collect();
        let maxs: Vec<u32> = deployments.iter().map(|d| d.maximum).collect();
        let surges: Vec<u32> = deployments.iter().map(|d| d.max_surge).collect();
        let unavailable: Vec<u32> = deployments.iter().map(|d| d.max_unavailable).collect();
        assert_eq!(mins, vec![2, 2, 1]);
        assert_eq!(maxs, vec![3, 2, 2]);
        assert_eq!(surges, vec![1, 1, 1]);
        assert_eq!(unavailable, vec![1, 1, 0]);
        assert_eq!(deployments[2].name, format!("{NS}-pool-1-z3"));
    }

    #[test]
    fn percentages_resolve_against_pool_bounds() {
        let mut pool = pool(&["local-1"]);
        pool.max_surge = IntOrString::String("50%".to_string());
        pool.max_unavailable = IntOrString::String("50%".to_string());
        let deployments = assemble_machine_deployments(
            NS,
            &[plan(&pool)],
            &classes_for(&["z"]),
            ZoningStrategy::Aggregate,
        )
        .unwrap();

        // 50% of maximum 7 rounded up, 50% of minimum 5 rounded down
        assert_eq!(deployments[0].max_surge, 4);
        assert_eq!(deployments[0].max_unavailable, 2);
    }

    #[test]
    fn machine_settings_become_configuration() {
        let mut pool = pool(&["local-1"]);
        pool.machine_settings = Some(MachineSettings {
            machine_drain_timeout: Some(Duration::from_secs(600)),
            max_evict_retries: Some(30),
            node_conditions: Some(vec!["ReadonlyFilesystem".to_string(), "KernelDeadlock".to_string()]),
            ..Default::default()
        });
        let deployments = assemble_machine_deployments(
            NS,
            &[plan(&pool)],
            &classes_for(&["z"]),
            ZoningStrategy::Aggregate,
        )
        .unwrap();

        let config = &deployments[0].machine_configuration;
        assert_eq!(config.machine_drain_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.machine_health_timeout, None);
        assert_eq!(config.max_evict_retries, Some(30));
        assert_eq!(config.node_conditions.as_deref(), Some("ReadonlyFilesystem,KernelDeadlock"));
    }

    #[test]
    fn missing_class_is_internal_error() {
        let pool = pool(&["local-1"]);
        let err = assemble_machine_deployments(NS, &[plan(&pool)], &[], ZoningStrategy::Aggregate)
            .unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));
    }

    #[test]
    fn holding_capacity_drops_the_minimum_only() {
        let pool = pool(&["local-1"]);
        let d = assemble_machine_deployments(
            NS,
            &[plan(&pool)],
            &classes_for(&["z"]),
            ZoningStrategy::Aggregate,
        )
        .unwrap()
        .remove(0);
        let gated = d.holding_capacity();
        assert_eq!((gated.minimum, gated.maximum), (0, d.maximum));
        assert_eq!(gated.class_name, d.class_name);
        assert_eq!(gated.max_surge, d.max_surge);
    }

    #[test]
    fn configuration_serializes_durations_as_text() {
        let config = MachineConfiguration {
            machine_drain_timeout: Some(Duration::from_secs(7200)),
            ..Default::default()
        };
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["machineDrainTimeout"], "2h");
        assert!(value.get("machineHealthTimeout").is_none());
    }
}
