//! Shared constants for machine classes, deployments and data volumes

// ============================================================================
// Machine controller resources
// ============================================================================

/// API version of MachineClass and MachineDeployment
pub const MACHINE_API_VERSION: &str = "machine.sapcloud.io/v1alpha1";

/// Kind of the generated machine classes
pub const MACHINE_CLASS_KIND: &str = "MachineClass";

/// Kind of the generated machine deployments
pub const MACHINE_DEPLOYMENT_KIND: &str = "MachineDeployment";

/// Provider name recorded on machine classes
pub const MACHINE_CLASS_PROVIDER: &str = "KubeVirt";

/// Release name for machine classes and their secrets
pub const MACHINE_CLASS_RELEASE: &str = "machine-class";

/// Release name for machine deployments
pub const MACHINE_DEPLOYMENT_RELEASE: &str = "machine-deployment";

/// Label recording which release an applied object belongs to
pub const RELEASE_LABEL: &str = "kubevirt.provider.extensions.gardener.cloud/release";

// ============================================================================
// Machine class tags
// ============================================================================

/// Tag carrying the cluster namespace
pub const TAG_CLUSTER: &str = "mcm.gardener.cloud/cluster";

/// Tag carrying the machine role
pub const TAG_ROLE: &str = "mcm.gardener.cloud/role";

/// Tag carrying the machine class name
pub const TAG_MACHINE_CLASS: &str = "mcm.gardener.cloud/machineclass";

/// Role value for worker machines
pub const ROLE_NODE: &str = "node";

// ============================================================================
// Machine class secret keys
// ============================================================================

/// Secret key holding the machine user data
pub const SECRET_KEY_CLOUD_CONFIG: &str = "cloudConfig";

/// Secret key holding the provider cluster kubeconfig
pub const SECRET_KEY_KUBECONFIG: &str = "kubeconfig";

// ============================================================================
// Data volumes (CDI)
// ============================================================================

/// API version of CDI data volumes
pub const DATA_VOLUME_API_VERSION: &str = "cdi.kubevirt.io/v1beta1";

/// Kind of CDI data volumes
pub const DATA_VOLUME_KIND: &str = "DataVolume";

/// Access mode of every machine root volume
pub const ACCESS_MODE_READ_WRITE_ONCE: &str = "ReadWriteOnce";

/// Resource name of the storage request
pub const STORAGE_RESOURCE: &str = "storage";

// ============================================================================
// Defaults
// ============================================================================

/// Field manager used for server-side apply unless configured otherwise
pub const DEFAULT_FIELD_MANAGER: &str = "kubevirt-worker";
