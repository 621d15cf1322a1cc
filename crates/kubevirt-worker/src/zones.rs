//! Splitting pool-level quantities across zones
//!
//! A total is divided evenly; the remainder goes one unit at a time to the
//! lowest-indexed zones, so per-zone shares always add up to the total and
//! never differ by more than one.

use std::fmt;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kubevirt_common::crd::parse_percent;

/// Share of `total` assigned to zone `zone_index` out of `zone_count`
///
/// Returns 0 when there are no zones.
pub fn distribute_over_zones(zone_index: u32, total: u32, zone_count: u32) -> u32 {
    if zone_count == 0 {
        return 0;
    }
    let base = total / zone_count;
    let remainder = total % zone_count;
    base + u32::from(zone_index < remainder)
}

/// Rounding applied when a percentage does not divide evenly
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rounding {
    /// Round up (used for max surge)
    Up,
    /// Round down (used for max unavailable)
    Down,
}

/// Resolve an integer-or-percentage against `base`
///
/// Returns `None` for negative integers and malformed percentages.
pub fn resolve_int_or_percent(value: &IntOrString, base: u32, rounding: Rounding) -> Option<u32> {
    match value {
        IntOrString::Int(i) => u32::try_from(*i).ok(),
        IntOrString::String(s) => {
            let percent = u64::from(parse_percent(s)?);
            let scaled = u64::from(base) * percent;
            let resolved = match rounding {
                Rounding::Up => scaled.div_ceil(100),
                Rounding::Down => scaled / 100,
            };
            u32::try_from(resolved).ok()
        }
    }
}

/// Resolve an integer-or-percentage against `base`, then take zone `zone_index`'s share
pub fn distribute_int_or_percent(
    zone_index: u32,
    value: &IntOrString,
    zone_count: u32,
    base: u32,
    rounding: Rounding,
) -> Option<u32> {
    resolve_int_or_percent(value, base, rounding)
        .map(|total| distribute_over_zones(zone_index, total, zone_count))
}

/// How a multi-zone pool maps onto machine deployments
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ZoningStrategy {
    /// One deployment per pool spanning all zones (name suffix `z`)
    #[default]
    Aggregate,
    /// One deployment per zone (name suffix `z1`, `z2`, ...)
    PerZone,
}

impl fmt::Display for ZoningStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoningStrategy::Aggregate => f.write_str("aggregate"),
            ZoningStrategy::PerZone => f.write_str("per-zone"),
        }
    }
}

impl FromStr for ZoningStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aggregate" => Ok(ZoningStrategy::Aggregate),
            "per-zone" => Ok(ZoningStrategy::PerZone),
            other => Err(format!(
                "unknown zoning strategy {other:?}, expected aggregate or per-zone"
            )),
        }
    }
}

/// One deployment's slice of a pool's zones
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZoneGroup<'a> {
    /// Name suffix for the deployment (`z`, `z1`, ...)
    pub suffix: String,
    /// Zones the deployment's machine class may place machines in
    pub zones: &'a [String],
    /// Index used when distributing pool quantities
    pub index: u32,
    /// Number of groups the pool quantities are distributed over
    pub count: u32,
}

/// Split a pool's zones into deployment groups
pub fn zone_groups(zones: &[String], strategy: ZoningStrategy) -> Vec<ZoneGroup<'_>> {
    match strategy {
        ZoningStrategy::Aggregate => vec![ZoneGroup {
            suffix: "z".to_string(),
            zones,
            index: 0,
            count: 1,
        }],
        ZoningStrategy::PerZone => {
            let count = zones.len() as u32;
            (0..zones.len())
                .map(|i| ZoneGroup {
                    suffix: format!("z{}", i + 1),
                    zones: &zones[i..=i],
                    index: i as u32,
                    count,
                })
                .collect()
        }
    }
}
