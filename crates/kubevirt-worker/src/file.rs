//! File-backed collaborators for running outside a controller
//!
//! Worker and cloud profile documents are read from YAML files, the provider
//! kubeconfig from a plain file. The worker status is written next to them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::info;

use kubevirt_common::crd::{CloudProfile, SecretRef, Worker, WorkerStatus};
use kubevirt_common::{Error, Result, KUBECONFIG_SECRET_KEY};

use crate::client::{
    CloudProfileSource, ManifestApplier, ProviderClient, ProviderClientFactory, ReleaseValues,
    SecretSource, WorkerSource,
};

async fn read_file(path: &Path, collaborator: &str) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        Error::upstream(
            collaborator,
            format!("failed to read {}: {}", path.display(), e),
        )
    })
}

async fn read_yaml<T: DeserializeOwned>(path: &Path, collaborator: &str, kind: &str) -> Result<T> {
    let bytes = read_file(path, collaborator).await?;
    serde_yaml::from_slice(&bytes).map_err(|e| {
        Error::serialization_for_kind(kind, format!("{}: {}", path.display(), e))
    })
}

/// Reads the worker from a YAML file and optionally writes its status to another
pub struct FileWorkerSource {
    worker_path: PathBuf,
    status_path: Option<PathBuf>,
}

impl FileWorkerSource {
    /// Create a source reading `worker_path`; status is discarded without a `status_path`
    pub fn new(worker_path: impl Into<PathBuf>, status_path: Option<PathBuf>) -> Self {
        Self {
            worker_path: worker_path.into(),
            status_path,
        }
    }
}

#[async_trait]
impl WorkerSource for FileWorkerSource {
    async fn read_worker(&self) -> Result<Worker> {
        read_yaml(&self.worker_path, "worker-source", "Worker").await
    }

    async fn report_status(&self, status: &WorkerStatus) -> Result<()> {
        let Some(path) = &self.status_path else {
            return Ok(());
        };
        let yaml = serde_yaml::to_string(status)
            .map_err(|e| Error::serialization_for_kind("WorkerStatus", e.to_string()))?;
        tokio::fs::write(path, yaml).await.map_err(|e| {
            Error::upstream(
                "worker-source",
                format!("failed to write {}: {}", path.display(), e),
            )
        })?;
        info!(path = %path.display(), images = status.machine_images.len(), "Wrote worker status");
        Ok(())
    }
}

/// Serves a single cloud profile from a YAML file
pub struct FileCloudProfileSource {
    path: PathBuf,
}

impl FileCloudProfileSource {
    /// Create a source reading `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CloudProfileSource for FileCloudProfileSource {
    async fn cloud_profile(&self, name: &str) -> Result<CloudProfile> {
        let profile: CloudProfile =
            read_yaml(&self.path, "cloud-profile-source", "CloudProfile").await?;
        if profile.name != name {
            return Err(Error::upstream(
                "cloud-profile-source",
                format!(
                    "{} holds cloud profile {}, worker asks for {}",
                    self.path.display(),
                    profile.name,
                    name
                ),
            ));
        }
        Ok(profile)
    }
}

/// Serves the provider kubeconfig from a file as the worker's credentials secret
pub struct FileSecretSource {
    kubeconfig_path: PathBuf,
}

impl FileSecretSource {
    /// Create a source reading the kubeconfig at `kubeconfig_path`
    pub fn new(kubeconfig_path: impl Into<PathBuf>) -> Self {
        Self {
            kubeconfig_path: kubeconfig_path.into(),
        }
    }
}

#[async_trait]
impl SecretSource for FileSecretSource {
    async fn secret_data(&self, _secret: &SecretRef) -> Result<BTreeMap<String, Vec<u8>>> {
        let kubeconfig = read_file(&self.kubeconfig_path, "secret-source").await?;
        Ok(BTreeMap::from([(KUBECONFIG_SECRET_KEY.to_string(), kubeconfig)]))
    }
}

/// Collaborator for render-only runs: every call fails
#[derive(Clone, Copy, Debug, Default)]
pub struct Offline;

fn offline_error() -> Error {
    Error::upstream("offline", "no cluster connection in render mode")
}

#[async_trait]
impl ManifestApplier for Offline {
    async fn apply(&self, _namespace: &str, _release: &str, _values: &ReleaseValues) -> Result<()> {
        Err(offline_error())
    }

    async fn released(&self, _namespace: &str, _release: &str) -> Result<Vec<String>> {
        Err(offline_error())
    }

    async fn delete(&self, _namespace: &str, _release: &str, _name: &str) -> Result<()> {
        Err(offline_error())
    }
}

#[async_trait]
impl ProviderClientFactory for Offline {
    async fn provider_client(&self, _kubeconfig: &[u8]) -> Result<Arc<dyn ProviderClient>> {
        Err(offline_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("kubevirt-worker-{}-{}", std::process::id(), name))
    }

    #[tokio::test]
    async fn worker_is_read_from_yaml() {
        let path = temp_path("worker.yaml");
        tokio::fs::write(
            &path,
            r#"
namespace: shoot--dev--kubevirt-1
cloudProfile: kubevirt
spec:
  secretRef: { name: cloudprovider, namespace: shoot--dev--kubevirt-1 }
  region: local
  pools:
    - name: pool-1
      machineType: local-1
      machineImage: { name: ubuntu, version: "16.04" }
      minimum: 1
      maximum: 2
      zones: [local-1]
"#,
        )
        .await
        .unwrap();

        let worker = FileWorkerSource::new(&path, None).read_worker().await.unwrap();
        assert_eq!(worker.namespace, "shoot--dev--kubevirt-1");
        assert_eq!(worker.spec.pools[0].machine_image.version, "16.04");
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn status_is_written_when_configured() {
        let worker_path = temp_path("unused.yaml");
        let status_path = temp_path("status.yaml");
        let source = FileWorkerSource::new(&worker_path, Some(status_path.clone()));

        source.report_status(&WorkerStatus::new(vec![])).await.unwrap();
        let written = tokio::fs::read_to_string(&status_path).await.unwrap();
        assert!(written.contains("kind: WorkerStatus"));
        let _ = tokio::fs::remove_file(&status_path).await;
    }

    #[tokio::test]
    async fn missing_file_is_upstream_error() {
        let source = FileCloudProfileSource::new(temp_path("does-not-exist.yaml"));
        let err = source.cloud_profile("kubevirt").await.unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable { .. }));
    }

    #[tokio::test]
    async fn kubeconfig_is_served_under_its_key() {
        let path = temp_path("kubeconfig");
        tokio::fs::write(&path, b"apiVersion: v1\nkind: Config\n").await.unwrap();

        let data = FileSecretSource::new(&path)
            .secret_data(&SecretRef {
                name: "cloudprovider".to_string(),
                namespace: "ns".to_string(),
            })
            .await
            .unwrap();
        assert!(data[KUBECONFIG_SECRET_KEY].starts_with(b"apiVersion"));
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn offline_collaborators_refuse_work() {
        let err = Offline
            .apply("ns", "machine-class", &ReleaseValues::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("render mode"));
        assert!(Offline.released("ns", "machine-class").await.is_err());
        assert!(Offline.provider_client(b"").await.is_err());
    }
}
