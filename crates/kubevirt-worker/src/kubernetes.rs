//! Kubernetes-backed collaborators
//!
//! Machine classes, deployments and data volumes are custom resources without
//! generated types, so they go through `DynamicObject`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::{debug, info};

use kubevirt_common::crd::SecretRef;
use kubevirt_common::kube_utils::{build_api_resource, client_from_kubeconfig};
use kubevirt_common::{Error, Result};

use crate::client::{
    ManifestApplier, ProviderClient, ProviderClientFactory, ReleaseValues, SecretSource,
};
use crate::constants::{
    DATA_VOLUME_API_VERSION, DATA_VOLUME_KIND, MACHINE_API_VERSION, MACHINE_CLASS_KIND,
    MACHINE_CLASS_RELEASE, MACHINE_DEPLOYMENT_KIND, MACHINE_DEPLOYMENT_RELEASE, RELEASE_LABEL,
    STORAGE_RESOURCE,
};
use crate::data_volume::{DataVolume, DataVolumeSpec, DataVolumeStatus};
use crate::manifest::{desired_replicas, render_release, Manifest};

/// Reads secrets from the cluster the worker lives in
pub struct KubeSecretSource {
    client: Client,
}

impl KubeSecretSource {
    /// Create a secret source on top of a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretSource for KubeSecretSource {
    async fn secret_data(&self, secret: &SecretRef) -> Result<BTreeMap<String, Vec<u8>>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &secret.namespace);
        let found = api.get(&secret.name).await.map_err(|e| {
            Error::upstream(
                "secret-source",
                format!("failed to get secret {}/{}: {}", secret.namespace, secret.name, e),
            )
        })?;
        Ok(found
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, value.0))
            .collect())
    }
}

/// Server-side applies rendered releases into the cluster namespace
pub struct KubeManifestApplier {
    client: Client,
    field_manager: String,
}

impl KubeManifestApplier {
    /// Create an applier that applies as `field_manager`
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    /// Live replica counts of the deployments about to be applied
    async fn live_replicas(
        &self,
        namespace: &str,
        values: &ReleaseValues,
    ) -> Result<BTreeMap<String, u32>> {
        let mut replicas = BTreeMap::new();
        if values.machine_deployments.is_empty() {
            return Ok(replicas);
        }

        let api = self.api(namespace, MACHINE_API_VERSION, MACHINE_DEPLOYMENT_KIND);
        for deployment in &values.machine_deployments {
            let live = api.get_opt(&deployment.name).await?.and_then(|md| {
                md.data
                    .get("spec")
                    .and_then(|s| s.get("replicas"))
                    .and_then(|r| r.as_u64())
                    .and_then(|r| u32::try_from(r).ok())
            });
            let count = desired_replicas(live, deployment);
            debug!(
                deployment = %deployment.name,
                live = ?live,
                replicas = count,
                "Resolved replicas"
            );
            replicas.insert(deployment.name.clone(), count);
        }
        Ok(replicas)
    }

    async fn apply_manifest(&self, manifest: &Manifest) -> Result<()> {
        let obj: DynamicObject = serde_json::from_value(manifest.to_value()?)
            .map_err(|e| Error::serialization_for_kind(&manifest.kind, e.to_string()))?;

        let api = self.api(
            &manifest.metadata.namespace,
            &manifest.api_version,
            &manifest.kind,
        );
        api.patch(
            &manifest.metadata.name,
            &PatchParams::apply(&self.field_manager).force(),
            &Patch::Apply(&obj),
        )
        .await?;

        info!(
            kind = %manifest.kind,
            name = %manifest.metadata.name,
            namespace = %manifest.metadata.namespace,
            "Applied manifest"
        );
        Ok(())
    }

    fn api(&self, namespace: &str, api_version: &str, kind: &str) -> Api<DynamicObject> {
        let ar = build_api_resource(api_version, kind);
        Api::namespaced_with(self.client.clone(), namespace, &ar)
    }
}

/// Kind of the object a release is listed and deleted by
fn release_kind(release: &str) -> Result<&'static str> {
    match release {
        MACHINE_CLASS_RELEASE => Ok(MACHINE_CLASS_KIND),
        MACHINE_DEPLOYMENT_RELEASE => Ok(MACHINE_DEPLOYMENT_KIND),
        other => Err(Error::internal_with_context(
            "release",
            format!("unknown release {}", other),
        )),
    }
}

/// Delete `name`, treating a missing object as already deleted
async fn delete_if_present(api: &Api<DynamicObject>, kind: &str, name: &str) -> Result<()> {
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            info!(kind = %kind, name = %name, "Deleted object");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            debug!(kind = %kind, name = %name, "Object not found (already deleted)");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ManifestApplier for KubeManifestApplier {
    async fn apply(&self, namespace: &str, release: &str, values: &ReleaseValues) -> Result<()> {
        let replicas = self.live_replicas(namespace, values).await?;
        for manifest in render_release(namespace, release, values, &replicas)? {
            self.apply_manifest(&manifest).await?;
        }
        Ok(())
    }

    async fn released(&self, namespace: &str, release: &str) -> Result<Vec<String>> {
        let kind = release_kind(release)?;
        let list = self
            .api(namespace, MACHINE_API_VERSION, kind)
            .list(&ListParams::default().labels(&format!("{}={}", RELEASE_LABEL, release)))
            .await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|obj| obj.metadata.name)
            .collect())
    }

    async fn delete(&self, namespace: &str, release: &str, name: &str) -> Result<()> {
        let kind = release_kind(release)?;
        delete_if_present(&self.api(namespace, MACHINE_API_VERSION, kind), kind, name).await?;
        if kind == MACHINE_CLASS_KIND {
            // the class secret shares the class name
            delete_if_present(&self.api(namespace, "v1", "Secret"), "Secret", name).await?;
        }
        Ok(())
    }
}

/// Data volume access on the provider cluster, in the kubeconfig's default namespace
pub struct KubeProviderClient {
    api: Api<DynamicObject>,
}

impl KubeProviderClient {
    /// Create a provider client on top of a kube client
    pub fn new(client: Client) -> Self {
        let ar = build_api_resource(DATA_VOLUME_API_VERSION, DATA_VOLUME_KIND);
        Self {
            api: Api::default_namespaced_with(client, &ar),
        }
    }

    fn to_object(volume: &DataVolume) -> Result<DynamicObject> {
        let ar = build_api_resource(DATA_VOLUME_API_VERSION, DATA_VOLUME_KIND);
        let spec = serde_json::to_value(&volume.spec)
            .map_err(|e| Error::serialization_for_kind(DATA_VOLUME_KIND, e.to_string()))?;
        Ok(DynamicObject::new(&volume.name, &ar).data(serde_json::json!({ "spec": spec })))
    }

    /// Merge patch touching only the storage request
    fn resize_patch(size: &Quantity) -> serde_json::Value {
        serde_json::json!({
            "spec": { "pvc": { "resources": { "requests": { STORAGE_RESOURCE: size } } } }
        })
    }

    fn from_object(obj: DynamicObject) -> Result<DataVolume> {
        let decode_err = |e: serde_json::Error| {
            Error::serialization_for_kind(DATA_VOLUME_KIND, e.to_string())
        };
        let spec: DataVolumeSpec = match obj.data.get("spec") {
            Some(spec) => serde_json::from_value(spec.clone()).map_err(decode_err)?,
            None => DataVolumeSpec::default(),
        };
        let status: Option<DataVolumeStatus> = match obj.data.get("status") {
            Some(status) => Some(serde_json::from_value(status.clone()).map_err(decode_err)?),
            None => None,
        };
        Ok(DataVolume {
            name: obj.metadata.name.unwrap_or_default(),
            spec,
            status,
        })
    }
}

#[async_trait]
impl ProviderClient for KubeProviderClient {
    async fn get_data_volume(&self, name: &str) -> Result<Option<DataVolume>> {
        self.api
            .get_opt(name)
            .await?
            .map(Self::from_object)
            .transpose()
    }

    async fn create_data_volume(&self, volume: &DataVolume) -> Result<()> {
        self.api
            .create(&PostParams::default(), &Self::to_object(volume)?)
            .await?;
        Ok(())
    }

    async fn resize_data_volume(&self, name: &str, size: &Quantity) -> Result<()> {
        self.api
            .patch(
                name,
                &PatchParams::default(),
                &Patch::Merge(&Self::resize_patch(size)),
            )
            .await?;
        Ok(())
    }

    async fn delete_data_volume(&self, name: &str) -> Result<()> {
        delete_if_present(&self.api, DATA_VOLUME_KIND, name).await
    }
}

/// Builds [`KubeProviderClient`]s from kubeconfig bytes
#[derive(Clone, Copy, Debug, Default)]
pub struct KubeProviderClientFactory;

#[async_trait]
impl ProviderClientFactory for KubeProviderClientFactory {
    async fn provider_client(&self, kubeconfig: &[u8]) -> Result<Arc<dyn ProviderClient>> {
        let client = client_from_kubeconfig(kubeconfig).await?;
        Ok(Arc::new(KubeProviderClient::new(client)))
    }
}
