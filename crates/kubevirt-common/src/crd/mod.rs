//! Worker, cloud profile and provider configuration types
//!
//! These are the inputs of a reconciliation pass. The host system owns them;
//! this crate only reads them.

mod cloud_profile;
mod provider_config;
mod worker;

pub use cloud_profile::{CloudProfile, MachineType, MachineTypeStorage};
pub use provider_config::{
    CloudProfileConfig, InfrastructureStatus, MachineImage, MachineImageVersion, MachineImages,
    NetworkStatus, ProviderConfigDecoder, WorkerConfig, WorkerStatus, CLOUD_PROFILE_CONFIG_KIND,
    INFRASTRUCTURE_STATUS_KIND, WORKER_CONFIG_KIND, WORKER_STATUS_KIND,
};
pub use worker::{
    parse_percent, MachineImageRef, MachineSettings, PoolVolume, SecretRef, Worker, WorkerPool,
    WorkerSpec,
};
