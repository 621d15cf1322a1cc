//! Per-pool facts shared by machine class synthesis and deployment assembly

use kubevirt_common::crd::{
    MachineImage, ProviderConfigDecoder, WorkerConfig, WorkerPool, WorkerSpec,
};
use kubevirt_common::{Error, Result};

use crate::hash::worker_pool_hash;

/// Everything derived from one pool before objects are generated
#[derive(Clone, Debug)]
pub struct PoolPlan<'a> {
    /// Position of the pool in the worker spec
    pub index: usize,
    /// The pool itself
    pub pool: &'a WorkerPool,
    /// Rollout hash of the pool
    pub hash: String,
    /// The pool's resolved image
    pub image: MachineImage,
    /// Decoded provider configuration, if the pool has one
    pub worker_config: Option<WorkerConfig>,
}

impl PoolPlan<'_> {
    /// Name of the deployment for a zone group of this pool
    pub fn deployment_name(&self, namespace: &str, suffix: &str) -> String {
        format!("{}-{}-{}", namespace, self.pool.name, suffix)
    }

    /// Name of the machine class (and its secret and data volume) for a zone group
    pub fn class_name(&self, namespace: &str, suffix: &str) -> String {
        format!("{}-{}", self.deployment_name(namespace, suffix), self.hash)
    }
}

/// Build plans for every pool of `spec`
///
/// `images` must hold every pool's resolved image.
pub fn plan_pools<'a>(
    spec: &'a WorkerSpec,
    images: &[MachineImage],
    decoder: &ProviderConfigDecoder,
) -> Result<Vec<PoolPlan<'a>>> {
    spec.pools
        .iter()
        .enumerate()
        .map(|(index, pool)| {
            let image = images
                .iter()
                .find(|i| {
                    i.name == pool.machine_image.name && i.version == pool.machine_image.version
                })
                .cloned()
                .ok_or_else(|| {
                    Error::image_not_found(&pool.machine_image.name, &pool.machine_image.version)
                })?;
            Ok(PoolPlan {
                index,
                pool,
                hash: worker_pool_hash(pool)?,
                image,
                worker_config: decoder.worker_config(pool, index)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
    use kubevirt_common::crd::{MachineImageRef, SecretRef};

    fn spec() -> WorkerSpec {
        WorkerSpec {
            secret_ref: SecretRef {
                name: "s".to_string(),
                namespace: "ns".to_string(),
            },
            region: "local".to_string(),
            infrastructure_provider_status: None,
            pools: vec![WorkerPool {
                name: "pool-1".to_string(),
                machine_type: "local-1".to_string(),
                machine_image: MachineImageRef {
                    name: "ubuntu".to_string(),
                    version: "16.04".to_string(),
                },
                minimum: 1,
                maximum: 2,
                max_surge: IntOrString::Int(1),
                max_unavailable: IntOrString::Int(0),
                zones: vec!["local-1".to_string()],
                user_data: String::new(),
                provider_config: None,
                volume: None,
                labels: Default::default(),
                annotations: Default::default(),
                taints: vec![],
                machine_settings: None,
            }],
            ssh_public_key: None,
        }
    }

    fn ubuntu() -> MachineImage {
        MachineImage {
            name: "ubuntu".to_string(),
            version: "16.04".to_string(),
            source_url: "https://example.com/xenial.img".to_string(),
        }
    }

    #[test]
    fn names_follow_namespace_pool_suffix_hash() {
        let spec = spec();
        let plans = plan_pools(&spec, &[ubuntu()], &ProviderConfigDecoder::new()).unwrap();
        let plan = &plans[0];

        assert_eq!(plan.deployment_name("shoot--dev", "z"), "shoot--dev-pool-1-z");
        assert_eq!(
            plan.class_name("shoot--dev", "z"),
            format!("shoot--dev-pool-1-z-{}", plan.hash)
        );
        assert_eq!(plan.image.source_url, "https://example.com/xenial.img");
        assert!(plan.worker_config.is_none());
    }

    #[test]
    fn unresolved_image_fails() {
        let spec = spec();
        let err = plan_pools(&spec, &[], &ProviderConfigDecoder::new()).unwrap_err();
        assert!(matches!(err, Error::ImageNotFound { .. }));
    }
}
