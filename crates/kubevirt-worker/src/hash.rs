//! Content-based identity of a worker pool
//!
//! The hash covers exactly the fields whose change must roll every machine of
//! the pool: machine type, image, user data, zones, provider configuration
//! and root volume. Scaling bounds, rollout parameters, lifecycle settings and
//! the pool name are left out, so they can change without a rollout.

use serde::Serialize;
use serde_json::Value;

use kubevirt_common::crd::{MachineImageRef, PoolVolume, WorkerPool};
use kubevirt_common::kube_utils::deterministic_hash;
use kubevirt_common::{Error, Result};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RolloutFields<'a> {
    machine_type: &'a str,
    machine_image: &'a MachineImageRef,
    user_data: &'a str,
    zones: Vec<&'a str>,
    provider_config: Option<&'a Value>,
    volume: Option<&'a PoolVolume>,
}

/// Compute the rollout hash of a pool
///
/// Zones are sorted and JSON objects are serialized with sorted keys, so the
/// result depends only on content, never on ordering.
pub fn worker_pool_hash(pool: &WorkerPool) -> Result<String> {
    let mut zones: Vec<&str> = pool.zones.iter().map(String::as_str).collect();
    zones.sort_unstable();

    let fields = RolloutFields {
        machine_type: &pool.machine_type,
        machine_image: &pool.machine_image,
        user_data: &pool.user_data,
        zones,
        provider_config: pool.provider_config.as_ref(),
        volume: pool.volume.as_ref(),
    };
    let value = serde_json::to_value(&fields).map_err(|e| {
        Error::serialization(format!("failed to hash pool {}: {}", pool.name, e))
    })?;

    Ok(deterministic_hash(&canonical_json(&value)))
}

/// Serialize a JSON value with object keys sorted at every level
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
