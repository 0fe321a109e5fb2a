//! Engine configuration.
//!
//! Layered as defaults, then an optional TOML file, then `COORDLIFT_*`
//! environment variables; the CLI applies its flags last and calls
//! [`EngineConfig::validate`]. Analyses receive a [`AnalysisSettings`] copy;
//! nothing here is global.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cost::CostVector;
use crate::error::ConfigError;

/// Failure assumption for replicas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultModel {
    #[default]
    Crash,
    Byzantine,
}

impl FaultModel {
    pub fn min_replicas(self) -> usize {
        match self {
            FaultModel::Crash => 1,
            FaultModel::Byzantine => 4,
        }
    }

    /// Largest number of faulty replicas `n` replicas can tolerate.
    pub fn tolerated_faults(self, n: usize) -> usize {
        match self {
            FaultModel::Crash => n.saturating_sub(1) / 2,
            FaultModel::Byzantine => n.saturating_sub(1) / 3,
        }
    }
}

impl FromStr for FaultModel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "crash" => Ok(FaultModel::Crash),
            "byzantine" => Ok(FaultModel::Byzantine),
            other => Err(ConfigError::UnknownFaultModel(other.to_string())),
        }
    }
}

impl fmt::Display for FaultModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultModel::Crash => write!(f, "crash"),
            FaultModel::Byzantine => write!(f, "byzantine"),
        }
    }
}

/// Size caps bounding the decidable tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Caps {
    /// Most state keys a Tier 1 effect may touch.
    pub tier1_state_cap: usize,
    /// Most expression nodes in a Tier 2 body.
    pub tier2_expr_cap: usize,
    /// Most predicate atoms in a Tier 3 body.
    pub tier3_formula_cap: usize,
    /// Largest `bound` accepted on `rec`.
    pub recursion_depth_cap: u32,
}

impl Default for Caps {
    fn default() -> Self {
        Self {
            tier1_state_cap: 16,
            tier2_expr_cap: 256,
            tier3_formula_cap: 64,
            recursion_depth_cap: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Candidate evaluations before the planner gives up with `Partial`.
    pub max_iterations: usize,
    /// Wall-clock budget for one plan search.
    pub deadline_ms: Option<u64>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            deadline_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub fault_model: FaultModel,
    pub replicas: usize,
    pub caps: Caps,
    /// Units per cost dimension when ranking transformations.
    pub cost_weights: CostVector,
    pub planner: PlannerConfig,
    /// Minimum heuristic confidence for speculative execution.
    pub speculation_floor: f64,
    /// Sample budget of the counterexample search.
    pub counterexample_samples: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fault_model: FaultModel::Crash,
            replicas: 3,
            caps: Caps::default(),
            cost_weights: CostVector::splat(1.0),
            planner: PlannerConfig::default(),
            speculation_floor: 0.6,
            counterexample_samples: 512,
        }
    }
}

/// The configuration subset threaded through every analysis stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    pub fault_model: FaultModel,
    pub replicas: usize,
    pub caps: Caps,
    pub speculation_floor: f64,
    pub counterexample_samples: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        EngineConfig::default().settings()
    }
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::CapOutOfRange {
            name: name.to_string(),
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn parse_env<T: FromStr>(field: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        reason: format!("'{}' is not a valid value", raw),
    })
}

impl EngineConfig {
    /// Read a TOML config file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::File {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Overlay `COORDLIFT_*` variables from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Overlay `COORDLIFT_*` variables from an arbitrary lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("COORDLIFT_FAULT_MODEL") {
            self.fault_model = v.parse()?;
        }
        if let Some(v) = lookup("COORDLIFT_REPLICAS") {
            self.replicas = parse_env("replicas", &v)?;
        }
        if let Some(v) = lookup("COORDLIFT_TIER1_STATE_CAP") {
            self.caps.tier1_state_cap = parse_env("tier1_state_cap", &v)?;
        }
        if let Some(v) = lookup("COORDLIFT_TIER2_EXPR_CAP") {
            self.caps.tier2_expr_cap = parse_env("tier2_expr_cap", &v)?;
        }
        if let Some(v) = lookup("COORDLIFT_TIER3_FORMULA_CAP") {
            self.caps.tier3_formula_cap = parse_env("tier3_formula_cap", &v)?;
        }
        if let Some(v) = lookup("COORDLIFT_RECURSION_DEPTH_CAP") {
            self.caps.recursion_depth_cap = parse_env("recursion_depth_cap", &v)?;
        }
        if let Some(v) = lookup("COORDLIFT_MAX_ITERATIONS") {
            self.planner.max_iterations = parse_env("max_iterations", &v)?;
        }
        if let Some(v) = lookup("COORDLIFT_DEADLINE_MS") {
            self.planner.deadline_ms = Some(parse_env("deadline_ms", &v)?);
        }
        if let Some(v) = lookup("COORDLIFT_SPECULATION_FLOOR") {
            self.speculation_floor = parse_env("speculation_floor", &v)?;
        }
        if let Some(v) = lookup("COORDLIFT_COUNTEREXAMPLE_SAMPLES") {
            self.counterexample_samples = parse_env("counterexample_samples", &v)?;
        }
        Ok(())
    }

    /// Defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let minimum = self.fault_model.min_replicas();
        if self.replicas < minimum {
            return Err(ConfigError::TooFewReplicas {
                model: self.fault_model.to_string(),
                replicas: self.replicas,
                minimum,
            });
        }
        check_range("tier1_state_cap", self.caps.tier1_state_cap as u64, 1, 1024)?;
        check_range("tier2_expr_cap", self.caps.tier2_expr_cap as u64, 1, 100_000)?;
        check_range("tier3_formula_cap", self.caps.tier3_formula_cap as u64, 1, 10_000)?;
        check_range(
            "recursion_depth_cap",
            u64::from(self.caps.recursion_depth_cap),
            1,
            1024,
        )?;
        check_range(
            "counterexample_samples",
            self.counterexample_samples as u64,
            1,
            1_000_000,
        )?;
        check_range("max_iterations", self.planner.max_iterations as u64, 1, u64::MAX)?;
        if !(0.0..=1.0).contains(&self.speculation_floor) {
            return Err(ConfigError::InvalidValue {
                field: "speculation_floor".to_string(),
                reason: format!("{} is outside [0, 1]", self.speculation_floor),
            });
        }
        let weights = self.cost_weights.components();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || weights.iter().all(|w| *w == 0.0)
        {
            return Err(ConfigError::InvalidValue {
                field: "cost_weights".to_string(),
                reason: "weights must be finite, non-negative and not all zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn settings(&self) -> AnalysisSettings {
        AnalysisSettings {
            fault_model: self.fault_model,
            replicas: self.replicas,
            caps: self.caps,
            speculation_floor: self.speculation_floor,
            counterexample_samples: self.counterexample_samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.caps.tier2_expr_cap, 256);
        assert_eq!(config.planner.max_iterations, 10_000);
    }

    #[test]
    fn test_byzantine_needs_four_replicas() {
        let config = EngineConfig {
            fault_model: FaultModel::Byzantine,
            replicas: 3,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooFewReplicas { minimum: 4, .. })
        ));
    }

    #[test]
    fn test_partial_toml_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "fault_model = \"byzantine\"\nreplicas = 7\n[caps]\ntier2_expr_cap = 32").unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.fault_model, FaultModel::Byzantine);
        assert_eq!(config.replicas, 7);
        assert_eq!(config.caps.tier2_expr_cap, 32);
        assert_eq!(config.caps.tier3_formula_cap, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = [
            ("COORDLIFT_FAULT_MODEL", "byzantine"),
            ("COORDLIFT_REPLICAS", "4"),
            ("COORDLIFT_DEADLINE_MS", "250"),
        ]
        .into_iter()
        .collect();
        let mut config = EngineConfig::default();
        config
            .apply_env_with(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.fault_model, FaultModel::Byzantine);
        assert_eq!(config.replicas, 4);
        assert_eq!(config.planner.deadline_ms, Some(250));
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_env_with(|k| (k == "COORDLIFT_REPLICAS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert!("paxos".parse::<FaultModel>().is_err());
    }

    #[test]
    fn test_tolerated_faults() {
        assert_eq!(FaultModel::Crash.tolerated_faults(5), 2);
        assert_eq!(FaultModel::Byzantine.tolerated_faults(4), 1);
        assert_eq!(FaultModel::Byzantine.tolerated_faults(7), 2);
    }
}
