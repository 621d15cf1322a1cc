//! Rendering machine classes and deployments into Kubernetes manifests
//!
//! The applier turns each [`crate::client::ReleaseValues`] document into
//! untyped manifests and server-side applies them.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;

use kubevirt_common::{Error, Result};

use crate::client::ReleaseValues;
use crate::constants::{
    MACHINE_API_VERSION, MACHINE_CLASS_KIND, MACHINE_CLASS_PROVIDER, MACHINE_DEPLOYMENT_KIND,
    RELEASE_LABEL, SECRET_KEY_CLOUD_CONFIG, SECRET_KEY_KUBECONFIG,
};
use crate::deployment::{MachineConfiguration, MachineDeployment};
use crate::machine_class::MachineClass;

/// A manifest represented as an untyped Kubernetes resource
///
/// Top-level fields other than apiVersion, kind and metadata differ between
/// kinds (`spec` for deployments, `providerSpec` for machine classes, `data`
/// for secrets), so they are kept in a flattened map.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// API version (e.g., "machine.sapcloud.io/v1alpha1")
    pub api_version: String,
    /// Kind of resource (e.g., "MachineClass")
    pub kind: String,
    /// Resource metadata
    pub metadata: ManifestMetadata,
    /// Remaining top-level fields
    #[serde(flatten)]
    pub body: serde_json::Map<String, serde_json::Value>,
}

/// Metadata for a manifest
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ManifestMetadata {
    /// Name of the resource
    pub name: String,
    /// Namespace
    pub namespace: String,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Manifest {
    /// Create a new manifest without body fields
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            metadata: ManifestMetadata {
                name: name.into(),
                namespace: namespace.into(),
                labels: BTreeMap::new(),
            },
            body: serde_json::Map::new(),
        }
    }

    /// Set a top-level field
    pub fn with_field(mut self, key: &str, value: serde_json::Value) -> Self {
        self.body.insert(key.to_string(), value);
        self
    }

    /// Add a label
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.metadata.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Serialize the manifest to a JSON value
    pub fn to_value(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self)
            .map_err(|e| Error::serialization_for_kind(&self.kind, e.to_string()))
    }
}

/// Render every object of a release into manifests
///
/// Machine classes render as the class followed by its secret.
/// `replicas` gives the replica count for each deployment by name.
pub fn render_release(
    namespace: &str,
    release: &str,
    values: &ReleaseValues,
    replicas: &BTreeMap<String, u32>,
) -> Result<Vec<Manifest>> {
    let mut manifests = Vec::new();
    for class in &values.machine_classes {
        manifests.push(render_machine_class(namespace, class)?.with_label(RELEASE_LABEL, release));
        manifests.push(
            render_machine_class_secret(namespace, class).with_label(RELEASE_LABEL, release),
        );
    }
    for deployment in &values.machine_deployments {
        let count = replicas
            .get(&deployment.name)
            .copied()
            .unwrap_or(deployment.minimum);
        manifests.push(
            render_machine_deployment(namespace, deployment, count)
                .with_label(RELEASE_LABEL, release),
        );
    }
    Ok(manifests)
}

/// Render a machine class; secret material goes to the secret instead
pub fn render_machine_class(namespace: &str, class: &MachineClass) -> Result<Manifest> {
    let mut provider_spec = serde_json::to_value(class)
        .map_err(|e| Error::serialization_for_kind(MACHINE_CLASS_KIND, e.to_string()))?;
    if let Some(spec) = provider_spec.as_object_mut() {
        spec.remove("secret");
        spec.remove("secretName");
        spec.remove("name");
    }

    Ok(
        Manifest::new(MACHINE_API_VERSION, MACHINE_CLASS_KIND, &class.name, namespace)
            .with_field("providerSpec", provider_spec)
            .with_field("provider", json!(MACHINE_CLASS_PROVIDER))
            .with_field(
                "secretRef",
                json!({ "name": class.secret_name, "namespace": namespace }),
            ),
    )
}

/// Render the secret holding a machine class's user data and kubeconfig
pub fn render_machine_class_secret(namespace: &str, class: &MachineClass) -> Manifest {
    Manifest::new("v1", "Secret", &class.secret_name, namespace)
        .with_field("type", json!("Opaque"))
        .with_field(
            "data",
            json!({
                SECRET_KEY_CLOUD_CONFIG: STANDARD.encode(&class.secret.cloud_config),
                SECRET_KEY_KUBECONFIG: STANDARD.encode(&class.secret.kubeconfig),
            }),
        )
}

/// Render a machine deployment with the given replica count
pub fn render_machine_deployment(
    namespace: &str,
    deployment: &MachineDeployment,
    replicas: u32,
) -> Manifest {
    let mut template_spec = json!({
        "class": {
            "kind": MACHINE_CLASS_KIND,
            "name": deployment.class_name,
        },
        "nodeTemplate": {
            "metadata": {
                "labels": deployment.labels,
                "annotations": deployment.annotations,
            },
            "spec": {
                "taints": deployment.taints,
            },
        },
    });
    if let Some(spec) = template_spec.as_object_mut() {
        spec.extend(machine_configuration_fields(&deployment.machine_configuration));
    }

    let spec = json!({
        "replicas": replicas,
        "selector": {
            "matchLabels": { "name": deployment.name },
        },
        "strategy": {
            "type": "RollingUpdate",
            "rollingUpdate": {
                "maxSurge": deployment.max_surge,
                "maxUnavailable": deployment.max_unavailable,
            },
        },
        "template": {
            "metadata": {
                "labels": { "name": deployment.name },
            },
            "spec": template_spec,
        },
    });

    Manifest::new(
        MACHINE_API_VERSION,
        MACHINE_DEPLOYMENT_KIND,
        &deployment.name,
        namespace,
    )
    .with_field("spec", spec)
}

/// Lifecycle fields in the machine controller's format; durations as "<n>s"
fn machine_configuration_fields(
    config: &MachineConfiguration,
) -> serde_json::Map<String, serde_json::Value> {
    let seconds = |d: &Duration| json!(format!("{}s", d.as_secs()));
    let mut fields = serde_json::Map::new();
    if let Some(d) = &config.machine_drain_timeout {
        fields.insert("drainTimeout".to_string(), seconds(d));
    }
    if let Some(d) = &config.machine_health_timeout {
        fields.insert("healthTimeout".to_string(), seconds(d));
    }
    if let Some(d) = &config.machine_creation_timeout {
        fields.insert("creationTimeout".to_string(), seconds(d));
    }
    if let Some(retries) = config.max_evict_retries {
        fields.insert("maxEvictRetries".to_string(), json!(retries));
    }
    if let Some(conditions) = &config.node_conditions {
        fields.insert("nodeConditions".to_string(), json!(conditions));
    }
    fields
}

/// Replica count for a deployment given its live count
///
/// Keeps a live count inside `[minimum, maximum]` so autoscaling decisions
/// survive re-applies; starts new deployments at `minimum`.
pub fn desired_replicas(live: Option<u32>, deployment: &MachineDeployment) -> u32 {
    match live {
        Some(count) => count.clamp(deployment.minimum, deployment.maximum.max(deployment.minimum)),
        None => deployment.minimum,
    }
}
