//! Per-worker operations on top of a computed desired state
//!
//! A [`WorkerDelegate`] is built for one worker and one pass. It resolves
//! images, computes the desired machine classes and deployments exactly once,
//! and exposes the stage operations the reconciler drives.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use kubevirt_common::crd::{
    CloudProfile, MachineImage, ProviderConfigDecoder, Worker, WorkerStatus,
};
use kubevirt_common::{Error, ObjectFailure, ReconcileStage, Result, KUBECONFIG_SECRET_KEY};

use crate::client::{ManifestApplier, ProviderClientFactory, ReleaseValues, SecretSource};
use crate::constants::{MACHINE_CLASS_KIND, MACHINE_CLASS_RELEASE, MACHINE_DEPLOYMENT_RELEASE};
use crate::data_volume::{DataVolumeReconciler, VolumeOutcome};
use crate::deployment::{assemble_machine_deployments, MachineDeployment};
use crate::image::resolve_pool_images;
use crate::machine_class::{synthesize_machine_classes, ClassContext, MachineClass};
use crate::plan::plan_pools;
use crate::zones::ZoningStrategy;

/// Settings of a reconciliation pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Deployment layout for multi-zone pools
    pub zoning: ZoningStrategy,
    /// Field manager for server-side apply
    pub field_manager: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            zoning: ZoningStrategy::default(),
            field_manager: crate::constants::DEFAULT_FIELD_MANAGER.to_string(),
        }
    }
}

/// External systems a delegate talks to
#[derive(Clone)]
pub struct Collaborators {
    /// Reads the worker's credentials secret
    pub secrets: Arc<dyn SecretSource>,
    /// Applies machine classes and deployments
    pub applier: Arc<dyn ManifestApplier>,
    /// Connects to the provider cluster
    pub provider_clients: Arc<dyn ProviderClientFactory>,
}

/// Everything a pass wants to exist, computed once and never mutated
#[derive(Clone, Debug)]
pub struct DesiredState {
    /// Resolved images, deduplicated in pool order
    pub images: Vec<MachineImage>,
    /// Machine classes in pool then zone order
    pub classes: Vec<MachineClass>,
    /// Machine deployments in pool then zone order
    pub deployments: Vec<MachineDeployment>,
    kubeconfig: Vec<u8>,
}

/// Objects an earlier pass applied that the cleanup step removed
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedObjects {
    /// Deleted machine deployment names
    pub deployments: Vec<String>,
    /// Deleted machine class names; their secrets and data volumes went with them
    pub classes: Vec<String>,
}

/// Operations on one worker's pools
pub struct WorkerDelegate {
    worker: Worker,
    cloud_profile: CloudProfile,
    decoder: ProviderConfigDecoder,
    collaborators: Collaborators,
    config: ReconcilerConfig,
    desired: OnceCell<Arc<DesiredState>>,
}

impl WorkerDelegate {
    /// Create a delegate for one worker
    pub fn new(
        worker: Worker,
        cloud_profile: CloudProfile,
        decoder: ProviderConfigDecoder,
        collaborators: Collaborators,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            worker,
            cloud_profile,
            decoder,
            collaborators,
            config,
            desired: OnceCell::new(),
        }
    }

    /// Namespace of the worker's cluster
    pub fn namespace(&self) -> &str {
        &self.worker.namespace
    }

    /// Kind of the machine classes this provider generates
    pub fn machine_class_kind(&self) -> &'static str {
        MACHINE_CLASS_KIND
    }

    /// Worker status listing every image in use
    pub async fn get_machine_images(&self) -> Result<WorkerStatus> {
        Ok(WorkerStatus::new(self.resolve_images()?))
    }

    /// Compute the machine deployments without touching any cluster
    pub async fn generate_machine_deployments(&self) -> Result<Vec<MachineDeployment>> {
        Ok(self.desired_state().await?.deployments.clone())
    }

    /// Ensure data volumes and apply every machine class
    ///
    /// Returns the volume outcomes keyed by class name.
    pub async fn deploy_machine_classes(&self) -> Result<BTreeMap<String, VolumeOutcome>> {
        let desired = self.desired_state().await?;
        let volumes = self.ensure_volumes(&desired).await?;
        self.apply_classes(&desired).await?;
        Ok(volumes)
    }

    /// Validate the worker spec and resolve every pool's image
    pub fn resolve_images(&self) -> Result<Vec<MachineImage>> {
        self.worker
            .spec
            .validate()
            .map_err(|e| e.in_stage(ReconcileStage::ReadSpec))?;

        let profile_config = self
            .decoder
            .cloud_profile_config(&self.cloud_profile)
            .map_err(|e| e.in_stage(ReconcileStage::ResolveImages))?;
        resolve_pool_images(&self.worker.spec.pools, &profile_config)
            .map_err(|e| e.in_stage(ReconcileStage::ResolveImages))
    }

    /// The desired state, computed on first use
    pub async fn desired_state(&self) -> Result<Arc<DesiredState>> {
        self.desired
            .get_or_try_init(|| async {
                let images = self.resolve_images()?;
                self.compute_desired(images)
                    .await
                    .map(Arc::new)
                    .map_err(|e| e.in_stage(ReconcileStage::ComputeDesired))
            })
            .await
            .cloned()
    }

    async fn compute_desired(&self, images: Vec<MachineImage>) -> Result<DesiredState> {
        let spec = &self.worker.spec;
        let namespace = &self.worker.namespace;

        let secret = self.collaborators.secrets.secret_data(&spec.secret_ref).await?;
        let kubeconfig = secret.get(KUBECONFIG_SECRET_KEY).cloned().ok_or_else(|| {
            Error::upstream(
                "secret-source",
                format!(
                    "secret {}/{} has no {} key",
                    spec.secret_ref.namespace, spec.secret_ref.name, KUBECONFIG_SECRET_KEY
                ),
            )
        })?;
        let kubeconfig_text = String::from_utf8(kubeconfig.clone()).map_err(|e| {
            Error::serialization_for_kind("Kubeconfig", format!("kubeconfig is not UTF-8: {}", e))
        })?;

        let infrastructure = self.decoder.infrastructure_status(spec)?;
        let plans = plan_pools(spec, &images, &self.decoder)?;

        let ctx = ClassContext {
            namespace,
            region: &spec.region,
            ssh_public_key: spec.ssh_public_key.as_deref(),
            kubeconfig: &kubeconfig_text,
            cloud_profile: &self.cloud_profile,
            infrastructure: &infrastructure,
            strategy: self.config.zoning,
        };
        let classes = synthesize_machine_classes(&ctx, &plans)?;
        let deployments =
            assemble_machine_deployments(namespace, &plans, &classes, self.config.zoning)?;

        debug!(
            namespace = %namespace,
            classes = classes.len(),
            deployments = deployments.len(),
            "Computed desired state"
        );

        Ok(DesiredState {
            images,
            classes,
            deployments,
            kubeconfig,
        })
    }

    /// Ensure one data volume per machine class, stopping at the first failure
    pub async fn ensure_volumes(
        &self,
        desired: &DesiredState,
    ) -> Result<BTreeMap<String, VolumeOutcome>> {
        let stage = ReconcileStage::EnsureVolumes;
        let mut outcomes = BTreeMap::new();
        if desired.classes.is_empty() {
            return Ok(outcomes);
        }

        let client = self
            .collaborators
            .provider_clients
            .provider_client(&desired.kubeconfig)
            .await
            .map_err(|e| e.in_stage(stage))?;
        let reconciler = DataVolumeReconciler::new(client.as_ref());

        for class in &desired.classes {
            let outcome = reconciler
                .ensure(&class.data_volume_request())
                .await
                .map_err(|e| e.in_stage(stage))?;
            outcomes.insert(class.name.clone(), outcome);
        }
        Ok(outcomes)
    }

    /// Apply every machine class, one at a time
    pub async fn apply_classes(&self, desired: &DesiredState) -> Result<()> {
        let values = desired
            .classes
            .iter()
            .map(|c| (c.name.clone(), ReleaseValues::machine_class(c.clone())));
        self.apply_each(ReconcileStage::ApplyClasses, MACHINE_CLASS_RELEASE, values)
            .await
    }

    /// Apply every machine deployment, one at a time
    ///
    /// Deployments whose class's volume is not usable yet are applied holding
    /// their live replica count; their names are returned.
    pub async fn apply_deployments(
        &self,
        desired: &DesiredState,
        volumes: &BTreeMap<String, VolumeOutcome>,
    ) -> Result<Vec<String>> {
        let mut gated = Vec::new();
        let mut values = Vec::with_capacity(desired.deployments.len());
        for deployment in &desired.deployments {
            let usable = volumes
                .get(&deployment.class_name)
                .is_some_and(|v| v.readiness.allows_capacity());
            let deployment = if usable {
                deployment.clone()
            } else {
                debug!(
                    deployment = %deployment.name,
                    "Data volume not ready, holding capacity"
                );
                gated.push(deployment.name.clone());
                deployment.holding_capacity()
            };
            values.push((
                deployment.name.clone(),
                ReleaseValues::machine_deployment(deployment),
            ));
        }

        self.apply_each(
            ReconcileStage::ApplyDeployments,
            MACHINE_DEPLOYMENT_RELEASE,
            values,
        )
        .await?;
        Ok(gated)
    }

    /// Delete what earlier passes applied and `desired` no longer contains
    ///
    /// Stale deployments go first. Each stale class then loses its data volume
    /// before the class and its secret, so an interrupted cleanup resumes on
    /// the next pass. Classes are kept while any stale deployment failed to go.
    pub async fn delete_stale(&self, desired: &DesiredState) -> Result<DeletedObjects> {
        let stage = ReconcileStage::DeleteStale;
        let namespace = &self.worker.namespace;
        let applier = &self.collaborators.applier;
        let mut deleted = DeletedObjects::default();
        let mut total = 0;
        let mut failures = Vec::new();

        let wanted: BTreeSet<&str> = desired.deployments.iter().map(|d| d.name.as_str()).collect();
        let live = applier
            .released(namespace, MACHINE_DEPLOYMENT_RELEASE)
            .await
            .map_err(|e| e.in_stage(stage))?;
        for name in live.into_iter().filter(|n| !wanted.contains(n.as_str())) {
            total += 1;
            match applier.delete(namespace, MACHINE_DEPLOYMENT_RELEASE, &name).await {
                Ok(()) => deleted.deployments.push(name),
                Err(error) => {
                    warn!(stage = %stage, object = %name, error = %error, "Delete failed");
                    failures.push(ObjectFailure { name, error });
                }
            }
        }

        if failures.is_empty() {
            let wanted: BTreeSet<&str> = desired.classes.iter().map(|c| c.name.as_str()).collect();
            let stale: Vec<String> = applier
                .released(namespace, MACHINE_CLASS_RELEASE)
                .await
                .map_err(|e| e.in_stage(stage))?
                .into_iter()
                .filter(|n| !wanted.contains(n.as_str()))
                .collect();

            if !stale.is_empty() {
                let client = self
                    .collaborators
                    .provider_clients
                    .provider_client(&desired.kubeconfig)
                    .await
                    .map_err(|e| e.in_stage(stage))?;
                for name in stale {
                    total += 1;
                    let result = match client.delete_data_volume(&name).await {
                        Ok(()) => applier.delete(namespace, MACHINE_CLASS_RELEASE, &name).await,
                        Err(error) => Err(error),
                    };
                    match result {
                        Ok(()) => deleted.classes.push(name),
                        Err(error) => {
                            warn!(stage = %stage, object = %name, error = %error, "Delete failed");
                            failures.push(ObjectFailure { name, error });
                        }
                    }
                }
            }
        }

        if !failures.is_empty() {
            return Err(Error::PartialApply {
                stage,
                total,
                failures,
            });
        }
        if total > 0 {
            info!(
                deployments = ?deleted.deployments,
                classes = ?deleted.classes,
                "Deleted stale objects"
            );
        }
        Ok(deleted)
    }

    async fn apply_each(
        &self,
        stage: ReconcileStage,
        release: &str,
        values: impl IntoIterator<Item = (String, ReleaseValues)>,
    ) -> Result<()> {
        let namespace = &self.worker.namespace;
        let mut total = 0;
        let mut failures = Vec::new();

        for (name, value) in values {
            total += 1;
            if let Err(error) = self.collaborators.applier.apply(namespace, release, &value).await {
                warn!(stage = %stage, object = %name, error = %error, "Apply failed");
                failures.push(ObjectFailure { name, error });
            }
        }

        if failures.is_empty() {
            info!(stage = %stage, release = %release, objects = total, "Applied release");
            Ok(())
        } else {
            Err(Error::PartialApply {
                stage,
                total,
                failures,
            })
        }
    }
}
