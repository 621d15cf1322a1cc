//! End-to-end scenarios over in-memory collaborators
//!
//! The fakes record every write so each scenario can check what reached the
//! applier and the provider cluster, not just what the engine returned.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_json::json;

use kubevirt_common::crd::{
    CloudProfile, MachineImageRef, MachineType, MachineTypeStorage, ProviderConfigDecoder,
    SecretRef, Worker, WorkerPool, WorkerSpec, WorkerStatus,
};
use kubevirt_common::{Error, ReconcileStage, Result, KUBECONFIG_SECRET_KEY, PROVIDER_API_VERSION};
use kubevirt_worker::data_volume::{
    DataVolume, DataVolumeRequest, DataVolumeStatus, VolumeAction,
};
use kubevirt_worker::manifest::desired_replicas;
use kubevirt_worker::{
    CloudProfileSource, Collaborators, DataVolumeReconciler, ManifestApplier, ProviderClient,
    ProviderClientFactory, ReconcilerConfig, Reconciler, ReleaseValues, SecretSource,
    WorkerDelegate, WorkerSource, ZoningStrategy,
};

const NS: &str = "shoot--dev--kubevirt-1";

// =============================================================================
// Fakes
// =============================================================================

struct StaticWorker {
    worker: Mutex<Worker>,
    statuses: Mutex<Vec<WorkerStatus>>,
}

#[async_trait]
impl WorkerSource for StaticWorker {
    async fn read_worker(&self) -> Result<Worker> {
        Ok(self.worker.lock().unwrap().clone())
    }

    async fn report_status(&self, status: &WorkerStatus) -> Result<()> {
        self.statuses.lock().unwrap().push(status.clone());
        Ok(())
    }
}

struct StaticProfile(CloudProfile);

#[async_trait]
impl CloudProfileSource for StaticProfile {
    async fn cloud_profile(&self, name: &str) -> Result<CloudProfile> {
        if name == self.0.name {
            Ok(self.0.clone())
        } else {
            Err(Error::upstream("cloud-profile-source", format!("no profile {name}")))
        }
    }
}

struct StaticSecret;

#[async_trait]
impl SecretSource for StaticSecret {
    async fn secret_data(&self, _secret: &SecretRef) -> Result<BTreeMap<String, Vec<u8>>> {
        Ok(BTreeMap::from([(
            KUBECONFIG_SECRET_KEY.to_string(),
            b"apiVersion: v1\nkind: Config\n".to_vec(),
        )]))
    }
}

/// Applier that keeps the applied object names per release like a live namespace
#[derive(Default)]
struct RecordingApplier {
    applied: Mutex<Vec<(String, ReleaseValues)>>,
    live: Mutex<BTreeMap<String, BTreeSet<String>>>,
    deleted: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ManifestApplier for RecordingApplier {
    async fn apply(&self, namespace: &str, release: &str, values: &ReleaseValues) -> Result<()> {
        assert_eq!(namespace, NS);
        let names = values
            .machine_classes
            .iter()
            .map(|c| c.name.clone())
            .chain(values.machine_deployments.iter().map(|d| d.name.clone()));
        self.live
            .lock()
            .unwrap()
            .entry(release.to_string())
            .or_default()
            .extend(names);
        self.applied
            .lock()
            .unwrap()
            .push((release.to_string(), values.clone()));
        Ok(())
    }

    async fn released(&self, namespace: &str, release: &str) -> Result<Vec<String>> {
        assert_eq!(namespace, NS);
        Ok(self
            .live
            .lock()
            .unwrap()
            .get(release)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, namespace: &str, release: &str, name: &str) -> Result<()> {
        assert_eq!(namespace, NS);
        if let Some(names) = self.live.lock().unwrap().get_mut(release) {
            names.remove(name);
        }
        self.deleted
            .lock()
            .unwrap()
            .push((release.to_string(), name.to_string()));
        Ok(())
    }
}

/// Provider cluster holding data volumes in memory and counting writes
#[derive(Default)]
struct InMemoryProvider {
    volumes: Mutex<BTreeMap<String, DataVolume>>,
    creates: Mutex<u32>,
    resizes: Mutex<u32>,
    deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl ProviderClient for InMemoryProvider {
    async fn get_data_volume(&self, name: &str) -> Result<Option<DataVolume>> {
        Ok(self.volumes.lock().unwrap().get(name).cloned())
    }

    async fn create_data_volume(&self, volume: &DataVolume) -> Result<()> {
        *self.creates.lock().unwrap() += 1;
        self.volumes
            .lock()
            .unwrap()
            .insert(volume.name.clone(), volume.clone());
        Ok(())
    }

    async fn resize_data_volume(&self, name: &str, size: &Quantity) -> Result<()> {
        *self.resizes.lock().unwrap() += 1;
        if let Some(volume) = self.volumes.lock().unwrap().get_mut(name) {
            volume
                .spec
                .pvc
                .resources
                .requests
                .insert("storage".to_string(), size.clone());
        }
        Ok(())
    }

    async fn delete_data_volume(&self, name: &str) -> Result<()> {
        self.volumes.lock().unwrap().remove(name);
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

impl InMemoryProvider {
    fn finish_imports(&self) {
        for volume in self.volumes.lock().unwrap().values_mut() {
            volume.status = Some(DataVolumeStatus {
                phase: Some("Succeeded".to_string()),
            });
        }
    }
}

struct SharedProvider(Arc<InMemoryProvider>);

#[async_trait]
impl ProviderClientFactory for SharedProvider {
    async fn provider_client(&self, _kubeconfig: &[u8]) -> Result<Arc<dyn ProviderClient>> {
        Ok(self.0.clone())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn pool(name: &str, version: &str, zones: &[&str]) -> WorkerPool {
    WorkerPool {
        name: name.to_string(),
        machine_type: "local-1".to_string(),
        machine_image: MachineImageRef {
            name: "ubuntu".to_string(),
            version: version.to_string(),
        },
        minimum: 5,
        maximum: 7,
        max_surge: IntOrString::Int(3),
        max_unavailable: IntOrString::Int(2),
        zones: zones.iter().map(|z| z.to_string()).collect(),
        user_data: "#cloud-config\npackages: [htop]\n".to_string(),
        provider_config: None,
        volume: None,
        labels: Default::default(),
        annotations: Default::default(),
        taints: vec![],
        machine_settings: None,
    }
}

fn worker(pools: Vec<WorkerPool>) -> Worker {
    Worker {
        namespace: NS.to_string(),
        cloud_profile: "kubevirt".to_string(),
        spec: WorkerSpec {
            secret_ref: SecretRef {
                name: "cloudprovider".to_string(),
                namespace: NS.to_string(),
            },
            region: "local".to_string(),
            infrastructure_provider_status: Some(json!({
                "apiVersion": PROVIDER_API_VERSION,
                "kind": "InfrastructureStatus",
                "networks": [{ "name": "default/net-1", "default": true }]
            })),
            pools,
            ssh_public_key: Some("ssh-ed25519 AAAA admin".to_string()),
        },
    }
}

fn profile(versions: &[&str]) -> CloudProfile {
    let versions: Vec<_> = versions
        .iter()
        .map(|v| {
            json!({
                "version": v,
                "sourceURL": format!("https://images.example.com/ubuntu-{v}.img"),
            })
        })
        .collect();
    CloudProfile {
        name: "kubevirt".to_string(),
        machine_types: vec![MachineType {
            name: "local-1".to_string(),
            cpu: Quantity("2".to_string()),
            memory: Quantity("4096Mi".to_string()),
            storage: Some(MachineTypeStorage {
                class: Some("standard".to_string()),
                storage_size: Some(Quantity("20Gi".to_string())),
            }),
        }],
        provider_config: Some(json!({
            "apiVersion": PROVIDER_API_VERSION,
            "kind": "CloudProfileConfig",
            "machineImages": [{ "name": "ubuntu", "versions": versions }]
        })),
    }
}

struct Harness {
    worker: Arc<StaticWorker>,
    applier: Arc<RecordingApplier>,
    provider: Arc<InMemoryProvider>,
    reconciler: Reconciler,
}

fn harness(worker: Worker, profile: CloudProfile, zoning: ZoningStrategy) -> Harness {
    let worker = Arc::new(StaticWorker {
        worker: Mutex::new(worker),
        statuses: Mutex::new(Vec::new()),
    });
    let applier = Arc::new(RecordingApplier::default());
    let provider = Arc::new(InMemoryProvider::default());
    let reconciler = Reconciler::new(
        worker.clone(),
        Arc::new(StaticProfile(profile)),
        Collaborators {
            secrets: Arc::new(StaticSecret),
            applier: applier.clone(),
            provider_clients: Arc::new(SharedProvider(provider.clone())),
        },
        ProviderConfigDecoder::new(),
        ReconcilerConfig {
            zoning,
            ..Default::default()
        },
    );
    Harness {
        worker,
        applier,
        provider,
        reconciler,
    }
}

async fn delegate_for(worker: Worker, profile: CloudProfile) -> WorkerDelegate {
    harness(worker, profile, ZoningStrategy::Aggregate)
        .reconciler
        .delegate()
        .await
        .unwrap()
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn single_pool_yields_one_deployment_and_class() {
    let delegate = delegate_for(
        worker(vec![pool("pool-1", "16.04", &["local-1"])]),
        profile(&["16.04"]),
    )
    .await;

    let deployments = delegate.generate_machine_deployments().await.unwrap();
    assert_eq!(deployments.len(), 1);
    let d = &deployments[0];
    assert_eq!(d.name, format!("{NS}-pool-1-z"));
    assert_eq!((d.minimum, d.maximum, d.max_surge, d.max_unavailable), (5, 7, 3, 2));
    assert_eq!(d.secret_name, d.class_name);

    let desired = delegate.desired_state().await.unwrap();
    assert_eq!(desired.classes.len(), 1);
    let class = &desired.classes[0];
    assert_eq!(class.name, d.class_name);
    assert_eq!(class.cpus, Quantity("2".to_string()));
    assert_eq!(class.memory, Quantity("4096Mi".to_string()));
    assert_eq!(class.source_url, "https://images.example.com/ubuntu-16.04.img");
    assert_eq!(class.networks.len(), 1);
    assert_eq!(class.ssh_keys, vec!["ssh-ed25519 AAAA admin".to_string()]);
}

#[tokio::test]
async fn class_hash_is_stable_and_follows_the_image_version() {
    let both = profile(&["16.04", "18.04"]);

    let first = delegate_for(worker(vec![pool("pool-1", "16.04", &["local-1"])]), both.clone())
        .await
        .generate_machine_deployments()
        .await
        .unwrap();
    let again = delegate_for(worker(vec![pool("pool-1", "16.04", &["local-1"])]), both.clone())
        .await
        .generate_machine_deployments()
        .await
        .unwrap();
    let upgraded = delegate_for(worker(vec![pool("pool-1", "18.04", &["local-1"])]), both)
        .await
        .generate_machine_deployments()
        .await
        .unwrap();

    assert_eq!(first[0].class_name, again[0].class_name);
    assert_ne!(first[0].class_name, upgraded[0].class_name);
    assert_eq!(first[0].name, upgraded[0].name);
}

#[tokio::test]
async fn scaling_changes_do_not_rename_the_class() {
    let mut scaled = pool("pool-1", "16.04", &["local-1"]);
    scaled.minimum = 1;
    scaled.maximum = 10;
    scaled.max_surge = IntOrString::String("50%".to_string());

    let before = delegate_for(
        worker(vec![pool("pool-1", "16.04", &["local-1"])]),
        profile(&["16.04"]),
    )
    .await
    .generate_machine_deployments()
    .await
    .unwrap();
    let rescaled = delegate_for(worker(vec![scaled]), profile(&["16.04"]))
        .await
        .generate_machine_deployments()
        .await
        .unwrap();

    assert_eq!(before[0].class_name, rescaled[0].class_name);
    assert_eq!(rescaled[0].max_surge, 5);
}

#[tokio::test]
async fn identical_pools_share_the_hash_suffix() {
    let delegate = delegate_for(
        worker(vec![
            pool("pool-a", "16.04", &["local-1"]),
            pool("pool-b", "16.04", &["local-1"]),
        ]),
        profile(&["16.04"]),
    )
    .await;
    let deployments = delegate.generate_machine_deployments().await.unwrap();

    assert_ne!(deployments[0].name, deployments[1].name);
    let suffix = |d: &kubevirt_worker::MachineDeployment| {
        d.class_name
            .rsplit('-')
            .next()
            .map(str::to_string)
            .unwrap_or_default()
    };
    assert_eq!(suffix(&deployments[0]), suffix(&deployments[1]));
}

#[tokio::test]
async fn missing_image_applies_nothing() {
    let h = harness(
        worker(vec![pool("pool-1", "16.04", &["local-1"])]),
        profile(&["18.04"]),
        ZoningStrategy::Aggregate,
    );

    let err = h.reconciler.reconcile().await.unwrap_err();
    assert!(matches!(err.root(), Error::ImageNotFound { .. }));
    assert_eq!(err.stage(), Some(ReconcileStage::ResolveImages));

    assert!(h.applier.applied.lock().unwrap().is_empty());
    assert!(h.provider.volumes.lock().unwrap().is_empty());
    assert!(h.worker.statuses.lock().unwrap().is_empty());
}

#[tokio::test]
async fn volume_reconciler_creates_once() {
    let provider = InMemoryProvider::default();
    let reconciler = DataVolumeReconciler::new(&provider);
    let request = DataVolumeRequest {
        name: format!("{NS}-pool-1-z-0123456789abcdef"),
        source_url: "https://images.example.com/ubuntu-16.04.img".to_string(),
        storage_class: Some("standard".to_string()),
        size: Quantity("20Gi".to_string()),
    };

    let first = reconciler.ensure(&request).await.unwrap();
    let second = reconciler.ensure(&request).await.unwrap();

    assert_eq!(first.action, VolumeAction::Created);
    assert_eq!(second.action, VolumeAction::Unchanged);
    assert_eq!(*provider.creates.lock().unwrap(), 1);
    assert_eq!(*provider.resizes.lock().unwrap(), 0);
}

#[tokio::test]
async fn per_zone_pass_splits_counts_and_gates_new_volumes() {
    let h = harness(
        worker(vec![pool("pool-1", "16.04", &["zone-a", "zone-b", "zone-c"])]),
        profile(&["16.04"]),
        ZoningStrategy::PerZone,
    );

    let report = h.reconciler.reconcile().await.unwrap();
    assert_eq!(
        report.deployments,
        vec![
            format!("{NS}-pool-1-z1"),
            format!("{NS}-pool-1-z2"),
            format!("{NS}-pool-1-z3"),
        ]
    );
    // freshly created volumes have no phase, so every deployment is held
    assert_eq!(report.gated, report.deployments);
    assert_eq!(*h.provider.creates.lock().unwrap(), 3);

    let applied = h.applier.applied.lock().unwrap();
    let deployments: Vec<_> = applied
        .iter()
        .filter(|(release, _)| release == "machine-deployment")
        .flat_map(|(_, values)| values.machine_deployments.iter())
        .collect();
    assert_eq!(deployments.len(), 3);
    assert!(deployments.iter().all(|d| d.minimum == 0));
    assert!(deployments.iter().all(|d| desired_replicas(None, d) == 0));

    let statuses = h.worker.statuses.lock().unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].machine_images[0].version, "16.04");
}

#[tokio::test]
async fn second_pass_lifts_the_gate_once_volumes_import() {
    let h = harness(
        worker(vec![pool("pool-1", "16.04", &["local-1"])]),
        profile(&["16.04"]),
        ZoningStrategy::Aggregate,
    );
    let first = h.reconciler.reconcile().await.unwrap();
    assert_eq!(first.gated.len(), 1);

    h.provider.finish_imports();

    let second = h.reconciler.reconcile().await.unwrap();
    assert!(second.gated.is_empty());
    assert_eq!(*h.provider.creates.lock().unwrap(), 1);

    let applied = h.applier.applied.lock().unwrap();
    let last = applied
        .iter()
        .rev()
        .find(|(release, _)| release == "machine-deployment")
        .map(|(_, values)| &values.machine_deployments[0]);
    assert_eq!(last.map(|d| (d.minimum, d.maximum)), Some((5, 7)));
}

fn last_deployment(
    applier: &RecordingApplier,
    name: &str,
) -> Option<kubevirt_worker::MachineDeployment> {
    applier
        .applied
        .lock()
        .unwrap()
        .iter()
        .rev()
        .flat_map(|(_, values)| values.machine_deployments.iter())
        .find(|d| d.name == name)
        .cloned()
}

#[tokio::test]
async fn image_rollout_keeps_serving_machines_while_the_new_volume_imports() {
    let h = harness(
        worker(vec![pool("pool-1", "16.04", &["local-1"])]),
        profile(&["16.04", "18.04"]),
        ZoningStrategy::Aggregate,
    );
    h.reconciler.reconcile().await.unwrap();
    h.provider.finish_imports();
    let serving = h.reconciler.reconcile().await.unwrap();
    assert!(serving.gated.is_empty());

    *h.worker.worker.lock().unwrap() = worker(vec![pool("pool-1", "18.04", &["local-1"])]);
    let rollout = h.reconciler.reconcile().await.unwrap();

    let name = format!("{NS}-pool-1-z");
    assert_eq!(rollout.gated, vec![name.clone()]);
    assert_ne!(rollout.classes, serving.classes);
    let held = last_deployment(&h.applier, &name).unwrap();
    assert_eq!(held.class_name, rollout.classes[0]);
    // the deployment already runs 5 machines; the gate must not scale it down
    assert_eq!(desired_replicas(Some(5), &held), 5);
    assert_eq!(desired_replicas(Some(3), &held), 3);
}

#[tokio::test]
async fn removed_pool_is_deleted_with_its_class_and_volume() {
    let h = harness(
        worker(vec![
            pool("pool-a", "16.04", &["local-1"]),
            pool("pool-b", "18.04", &["local-1"]),
        ]),
        profile(&["16.04", "18.04"]),
        ZoningStrategy::Aggregate,
    );
    let first = h.reconciler.reconcile().await.unwrap();
    assert_eq!(first.deleted, Default::default());
    let class_b = first
        .classes
        .iter()
        .find(|c| c.contains("pool-b"))
        .cloned()
        .unwrap();

    *h.worker.worker.lock().unwrap() = worker(vec![pool("pool-a", "16.04", &["local-1"])]);
    let second = h.reconciler.reconcile().await.unwrap();

    assert_eq!(second.deleted.deployments, vec![format!("{NS}-pool-b-z")]);
    assert_eq!(second.deleted.classes, vec![class_b.clone()]);
    assert_eq!(
        *h.applier.deleted.lock().unwrap(),
        vec![
            ("machine-deployment".to_string(), format!("{NS}-pool-b-z")),
            ("machine-class".to_string(), class_b.clone()),
        ]
    );
    assert_eq!(*h.provider.deleted.lock().unwrap(), vec![class_b.clone()]);
    assert!(!h.provider.volumes.lock().unwrap().contains_key(&class_b));

    // a third pass finds nothing left to delete
    let third = h.reconciler.reconcile().await.unwrap();
    assert_eq!(third.deleted, Default::default());
}
