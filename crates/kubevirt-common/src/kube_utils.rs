//! Shared Kubernetes utilities using kube-rs
//!
//! Machine classes, machine deployments and data volumes are custom resources
//! without generated Rust types, so they are handled as `DynamicObject`s with
//! an `ApiResource` built from their apiVersion and kind.

use std::fmt::Write;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use tracing::debug;

use crate::Error;

/// Collaborator name used for errors talking to the provider cluster
pub const PROVIDER_CLUSTER_COLLABORATOR: &str = "provider-cluster";

/// Known plural forms for the kinds this provider touches
const KIND_PLURALS: &[(&str, &str)] = &[
    // machine.sapcloud.io
    ("machineclass", "machineclasses"),
    ("machinedeployment", "machinedeployments"),
    // cdi.kubevirt.io
    ("datavolume", "datavolumes"),
    // core
    ("secret", "secrets"),
];

/// Build an `ApiResource` for a known apiVersion and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split an apiVersion into group and version
///
/// ```
/// use kubevirt_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("cdi.kubevirt.io/v1beta1");
/// assert_eq!(group, "cdi.kubevirt.io");
/// assert_eq!(version, "v1beta1");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Pluralize a Kubernetes resource kind
///
/// Uses a lookup table for known kinds, falling back to simple
/// pluralization rules for unknown ones.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Compute a deterministic hash of the input string, returning a 16-char hex digest.
///
/// Uses truncated SHA-256 for stability across Rust toolchain versions.
/// `DefaultHasher` is NOT guaranteed stable across Rust releases, so this
/// function should be used whenever the hash ends up in an object name.
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// Create a kube client from raw kubeconfig bytes
///
/// Used for the provider cluster, whose kubeconfig is read from the worker's
/// credentials secret rather than from disk.
pub async fn client_from_kubeconfig(kubeconfig: &[u8]) -> Result<Client, Error> {
    let text = std::str::from_utf8(kubeconfig).map_err(|e| {
        Error::serialization_for_kind("Kubeconfig", format!("kubeconfig is not UTF-8: {}", e))
    })?;
    let kubeconfig = Kubeconfig::from_yaml(text).map_err(|e| {
        Error::serialization_for_kind("Kubeconfig", format!("failed to parse kubeconfig: {}", e))
    })?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            Error::upstream(
                PROVIDER_CLUSTER_COLLABORATOR,
                format!("failed to load kubeconfig: {}", e),
            )
        })?;
    debug!(cluster_url = %config.cluster_url, "Loaded provider cluster kubeconfig");
    Client::try_from(config).map_err(|e| {
        Error::upstream(
            PROVIDER_CLUSTER_COLLABORATOR,
            format!("failed to create client: {}", e),
        )
    })
}

/// Create a kube client from an optional kubeconfig path, inferring the
/// in-cluster or default config when no path is given
pub async fn create_client(kubeconfig: Option<&std::path::Path>) -> Result<Client, Error> {
    let load_error = |e: String| {
        Error::upstream(
            crate::error::KUBERNETES_COLLABORATOR,
            format!("failed to load kubeconfig: {}", e),
        )
    };

    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| load_error(e.to_string()))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| load_error(e.to_string()))?
        }
        None => Config::infer()
            .await
            .map_err(|e| load_error(e.to_string()))?,
    };
    debug!(
        cluster_url = %config.cluster_url,
        namespace = %config.default_namespace,
        "Loaded kube config"
    );

    Client::try_from(config).map_err(|e| {
        Error::upstream(
            crate::error::KUBERNETES_COLLABORATOR,
            format!("failed to create client: {}", e),
        )
    })
}
