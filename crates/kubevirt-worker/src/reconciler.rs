//! The staged reconciliation pass
//!
//! `ReadSpec → ResolveImages → ComputeDesired → EnsureVolumes → ApplyClasses →
//! ApplyDeployments → DeleteStale → ReportStatus`. Every stage gates the next;
//! apply and delete stages report per-object failures and never roll back
//! earlier writes.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, info_span, instrument, warn, Instrument};

use kubevirt_common::crd::{ProviderConfigDecoder, WorkerStatus};
use kubevirt_common::{ReconcileStage, Result};

use crate::client::{CloudProfileSource, WorkerSource};
use crate::data_volume::VolumeOutcome;
use crate::delegate::{Collaborators, DeletedObjects, ReconcilerConfig, WorkerDelegate};

/// What a successful pass did
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Applied machine class names
    pub classes: Vec<String>,
    /// Applied machine deployment names
    pub deployments: Vec<String>,
    /// Data volume outcomes keyed by class name
    pub volumes: BTreeMap<String, VolumeOutcome>,
    /// Deployments held at their live size because their volume is not ready
    pub gated: Vec<String>,
    /// Objects of earlier passes that are no longer desired and were deleted
    pub deleted: DeletedObjects,
    /// Reported worker status
    pub status: WorkerStatus,
}

/// Drives reconciliation passes for one worker
pub struct Reconciler {
    workers: Arc<dyn WorkerSource>,
    cloud_profiles: Arc<dyn CloudProfileSource>,
    collaborators: Collaborators,
    decoder: ProviderConfigDecoder,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a reconciler
    pub fn new(
        workers: Arc<dyn WorkerSource>,
        cloud_profiles: Arc<dyn CloudProfileSource>,
        collaborators: Collaborators,
        decoder: ProviderConfigDecoder,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            workers,
            cloud_profiles,
            collaborators,
            decoder,
            config,
        }
    }

    /// Read the worker and its cloud profile and build a delegate for them
    pub async fn delegate(&self) -> Result<WorkerDelegate> {
        let stage = ReconcileStage::ReadSpec;
        let worker = self
            .workers
            .read_worker()
            .await
            .map_err(|e| e.in_stage(stage))?;
        let cloud_profile = self
            .cloud_profiles
            .cloud_profile(&worker.cloud_profile)
            .await
            .map_err(|e| e.in_stage(stage))?;

        Ok(WorkerDelegate::new(
            worker,
            cloud_profile,
            self.decoder,
            self.collaborators.clone(),
            self.config.clone(),
        ))
    }

    /// Run one full pass
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let delegate = self.delegate().await?;
        let span = info_span!(
            "reconcile_pass",
            namespace = %delegate.namespace(),
            zoning = %self.config.zoning
        );

        async move {
            let desired = delegate.desired_state().await?;

            let volumes = delegate.ensure_volumes(&desired).await?;
            delegate.apply_classes(&desired).await?;
            let gated = delegate.apply_deployments(&desired, &volumes).await?;
            if !gated.is_empty() {
                warn!(
                    gated = ?gated,
                    "Deployments held at their live size until their data volumes are ready"
                );
            }
            let deleted = delegate.delete_stale(&desired).await?;

            let status = WorkerStatus::new(desired.images.clone());
            self.workers
                .report_status(&status)
                .await
                .map_err(|e| e.in_stage(ReconcileStage::ReportStatus))?;

            info!(
                classes = desired.classes.len(),
                deployments = desired.deployments.len(),
                gated = gated.len(),
                deleted = deleted.deployments.len() + deleted.classes.len(),
                "Reconcile pass complete"
            );

            Ok(ReconcileReport {
                classes: desired.classes.iter().map(|c| c.name.clone()).collect(),
                deployments: desired.deployments.iter().map(|d| d.name.clone()).collect(),
                volumes,
                gated,
                deleted,
                status,
            })
        }
        .instrument(span)
        .await
    }
}
