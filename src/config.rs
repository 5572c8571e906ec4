//! Farm configuration: the document a farmer supplies at startup, and the
//! validation rules enforced before the reconciler is allowed to run.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::{FarmerbotError, Result};

/// Minimum farmer balance (in TFT) required to start the reconciler.
/// Value mirrors the original control loop's inline threshold; there is no
/// canonical source constant to derive it from, so it is named as a
/// standalone tunable rather than implied by any on-chain parameter.
pub const MIN_BALANCE_TO_RUN: f64 = 0.002;

/// Balance below which startup proceeds but logs a warning.
pub const RECOMMENDED_BALANCE_TO_RUN: f64 = 1.0;

/// Minimum balance required before a manual `poweron`/`poweroff` RPC call
/// is allowed to issue a chain transaction.
pub const MIN_BALANCE_FOR_ACTION: f64 = 0.002;

fn default_wake_up_threshold() -> u8 {
    80
}

fn default_periodic_wake_up_limit() -> u32 {
    1
}

fn default_periodic_wake_up_start() -> NaiveTime {
    NaiveTime::from_hms_opt(7, 0, 0).unwrap()
}

/// Power-management policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerConfig {
    #[serde(default = "default_wake_up_threshold")]
    pub wake_up_threshold: u8,

    #[serde(
        default = "default_periodic_wake_up_start",
        with = "time_of_day_format"
    )]
    pub periodic_wake_up_start: NaiveTime,

    #[serde(default = "default_periodic_wake_up_limit")]
    pub periodic_wake_up_limit: u32,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            wake_up_threshold: default_wake_up_threshold(),
            periodic_wake_up_start: default_periodic_wake_up_start(),
            periodic_wake_up_limit: default_periodic_wake_up_limit(),
        }
    }
}

mod time_of_day_format {
    use chrono::NaiveTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&s, "%H:%M").map_err(serde::de::Error::custom)
    }
}

/// Immutable-for-the-run farm configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmConfig {
    pub farm_id: u32,

    #[serde(default)]
    pub included_nodes: Vec<u32>,
    #[serde(default)]
    pub excluded_nodes: Vec<u32>,
    #[serde(default)]
    pub priority_nodes: Vec<u32>,
    #[serde(default)]
    pub never_shut_down_nodes: Vec<u32>,

    #[serde(default)]
    pub continue_on_powering_on_err: bool,

    #[serde(default)]
    pub power: PowerConfig,
}

impl FarmConfig {
    /// Validate the configured node lists against the farm's actual node
    /// listing. All violations are fatal at startup.
    pub fn validate(&self, farm_nodes: &[u32]) -> Result<()> {
        let exists = |id: &u32| farm_nodes.contains(id);

        for id in self
            .included_nodes
            .iter()
            .chain(self.priority_nodes.iter())
            .chain(self.never_shut_down_nodes.iter())
        {
            if !exists(id) {
                return Err(FarmerbotError::Fatal(format!(
                    "node {id} does not exist in farm {}",
                    self.farm_id
                )));
            }
        }

        for id in &self.excluded_nodes {
            if self.included_nodes.contains(id)
                || self.priority_nodes.contains(id)
                || self.never_shut_down_nodes.contains(id)
            {
                return Err(FarmerbotError::Fatal(format!(
                    "node {id} appears in both excluded_nodes and another node list"
                )));
            }
        }

        if !self.included_nodes.is_empty() {
            for id in self.priority_nodes.iter().chain(self.never_shut_down_nodes.iter()) {
                if !self.included_nodes.contains(id) {
                    return Err(FarmerbotError::Fatal(format!(
                        "node {id} is not in included_nodes, but included_nodes is non-empty"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> FarmConfig {
        FarmConfig {
            farm_id: 25,
            included_nodes: vec![],
            excluded_nodes: vec![],
            priority_nodes: vec![],
            never_shut_down_nodes: vec![],
            continue_on_powering_on_err: false,
            power: PowerConfig::default(),
        }
    }

    const FARM_NODES: &[u32] = &[20, 21, 22, 23, 24, 30, 31, 32, 34, 40, 41];

    #[test]
    fn valid_combination_passes() {
        let mut c = base();
        c.included_nodes = vec![20, 21, 22, 30, 31, 32, 40, 41];
        c.priority_nodes = vec![20, 21];
        c.excluded_nodes = vec![23, 24, 34];
        c.never_shut_down_nodes = vec![22, 30];
        assert!(c.validate(FARM_NODES).is_ok());
    }

    #[test]
    fn invalid_included_node_fails() {
        let mut c = base();
        c.included_nodes = vec![26, 27];
        assert!(c.validate(FARM_NODES).is_err());
    }

    #[test]
    fn priority_must_be_subset_of_included() {
        let mut c = base();
        c.included_nodes = vec![21];
        c.priority_nodes = vec![20, 21];
        assert!(c.validate(FARM_NODES).is_err());
    }

    #[test]
    fn never_shutdown_must_be_subset_of_included() {
        let mut c = base();
        c.included_nodes = vec![21];
        c.never_shut_down_nodes = vec![20, 21];
        assert!(c.validate(FARM_NODES).is_err());
    }

    #[test]
    fn overlap_between_included_and_excluded_fails() {
        let mut c = base();
        c.included_nodes = vec![21];
        c.excluded_nodes = vec![20, 21];
        assert!(c.validate(FARM_NODES).is_err());
    }

    #[test]
    fn all_nodes_included_mode_allows_disjoint_lists() {
        let mut c = base();
        c.priority_nodes = vec![21];
        c.excluded_nodes = vec![22];
        c.never_shut_down_nodes = vec![20];
        assert!(c.validate(FARM_NODES).is_ok());
    }

    #[test]
    fn all_nodes_included_mode_still_checks_existence() {
        let mut c = base();
        c.priority_nodes = vec![26, 27];
        assert!(c.validate(FARM_NODES).is_err());
    }

    #[test]
    fn periodic_wake_up_start_round_trips_through_hh_mm() {
        let toml_str = r#"
            farm_id = 1
            [power]
            periodic_wake_up_start = "08:30"
        "#;
        let c: FarmConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(c.power.periodic_wake_up_start, NaiveTime::from_hms_opt(8, 30, 0).unwrap());
    }
}
