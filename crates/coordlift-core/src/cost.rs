//! Semantic cost vectors and budgets.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Per-dimension semantic cost. Costs only accumulate: no transformation
/// refunds a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CostVector {
    pub consistency: f64,
    pub staleness: f64,
    pub latency: f64,
    pub availability: f64,
    pub complexity: f64,
    pub risk: f64,
}

pub const DIMENSIONS: [&str; 6] = [
    "consistency",
    "staleness",
    "latency",
    "availability",
    "complexity",
    "risk",
];

const EPSILON: f64 = 1e-9;

impl CostVector {
    pub const ZERO: CostVector = CostVector::splat(0.0);

    /// Budget that admits any cost.
    pub const UNLIMITED: CostVector = CostVector::splat(f64::MAX);

    pub const fn splat(v: f64) -> CostVector {
        CostVector {
            consistency: v,
            staleness: v,
            latency: v,
            availability: v,
            complexity: v,
            risk: v,
        }
    }

    pub fn components(&self) -> [f64; 6] {
        [
            self.consistency,
            self.staleness,
            self.latency,
            self.availability,
            self.complexity,
            self.risk,
        ]
    }

    pub(crate) fn from_components(c: [f64; 6]) -> CostVector {
        CostVector {
            consistency: c[0],
            staleness: c[1],
            latency: c[2],
            availability: c[3],
            complexity: c[4],
            risk: c[5],
        }
    }

    fn component_mut(&mut self, name: &str) -> Option<&mut f64> {
        Some(match name {
            "consistency" => &mut self.consistency,
            "staleness" => &mut self.staleness,
            "latency" => &mut self.latency,
            "availability" => &mut self.availability,
            "complexity" => &mut self.complexity,
            "risk" => &mut self.risk,
            _ => return None,
        })
    }

    /// Componentwise sum, saturating at the unlimited sentinel.
    pub fn add(&self, other: &CostVector) -> CostVector {
        let (a, b) = (self.components(), other.components());
        let mut out = [0.0; 6];
        for i in 0..6 {
            out[i] = (a[i] + b[i]).min(f64::MAX);
        }
        CostVector::from_components(out)
    }

    /// Every component is at most the budget's.
    pub fn within(&self, budget: &CostVector) -> bool {
        self.components()
            .iter()
            .zip(budget.components())
            .all(|(c, b)| *c <= b + EPSILON)
    }

    /// Weighted scalarisation used to rank transformations.
    pub fn scalar(&self, weights: &CostVector) -> f64 {
        self.components()
            .iter()
            .zip(weights.components())
            .map(|(c, w)| c * w)
            .sum()
    }

    pub fn is_zero(&self) -> bool {
        self.components().iter().all(|c| c.abs() <= EPSILON)
    }

    pub fn is_unlimited(&self) -> bool {
        self.components().iter().all(|c| *c >= f64::MAX)
    }

    /// Parse a cost spec: `unlimited`, a single number applied to every
    /// dimension, or `dim=value` pairs separated by commas (missing
    /// dimensions are zero).
    pub fn parse(spec: &str) -> Result<CostVector, ConfigError> {
        let text = spec.trim();
        let invalid = |reason: String| ConfigError::InvalidCostSpec {
            spec: spec.to_string(),
            reason,
        };
        if text.eq_ignore_ascii_case("unlimited") {
            return Ok(CostVector::UNLIMITED);
        }
        if let Ok(v) = text.parse::<f64>() {
            check_amount(v).map_err(invalid)?;
            return Ok(CostVector::splat(v));
        }
        let mut out = CostVector::ZERO;
        for pair in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid(format!("'{}' is not dim=value", pair)))?;
            let value: f64 = value
                .trim()
                .parse()
                .map_err(|_| invalid(format!("'{}' is not a number", value.trim())))?;
            check_amount(value).map_err(invalid)?;
            let slot = out
                .component_mut(name.trim())
                .ok_or_else(|| invalid(format!("unknown dimension '{}'", name.trim())))?;
            *slot = value;
        }
        Ok(out)
    }
}

fn check_amount(v: f64) -> Result<(), String> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(format!("{} must be a finite non-negative number", v))
    }
}

impl fmt::Display for CostVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unlimited() {
            return write!(f, "unlimited");
        }
        let parts: Vec<String> = DIMENSIONS
            .iter()
            .zip(self.components())
            .filter(|(_, v)| v.abs() > EPSILON)
            .map(|(n, v)| {
                if v >= f64::MAX {
                    format!("{}=unlimited", n)
                } else {
                    format!("{}={}", n, v)
                }
            })
            .collect();
        if parts.is_empty() {
            write!(f, "0")
        } else {
            write!(f, "{}", parts.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs_single_and_unlimited() {
        let c = CostVector::parse("consistency=1, risk=0.5").unwrap();
        assert_eq!(c.consistency, 1.0);
        assert_eq!(c.risk, 0.5);
        assert_eq!(c.latency, 0.0);

        assert_eq!(CostVector::parse("2").unwrap(), CostVector::splat(2.0));
        assert!(CostVector::parse("unlimited").unwrap().is_unlimited());
    }

    #[test]
    fn test_parse_rejects_unknown_dimensions_and_negatives() {
        assert!(CostVector::parse("speed=1").is_err());
        assert!(CostVector::parse("-1").is_err());
        assert!(CostVector::parse("consistency=abc").is_err());
    }

    #[test]
    fn test_within_is_componentwise() {
        let budget = CostVector::parse("consistency=1,complexity=1").unwrap();
        assert!(CostVector::parse("consistency=1").unwrap().within(&budget));
        assert!(!CostVector::parse("staleness=0.1").unwrap().within(&budget));
        assert!(CostVector::splat(1e6).within(&CostVector::UNLIMITED));
    }

    #[test]
    fn test_add_accumulates_and_displays() {
        let a = CostVector::parse("consistency=1").unwrap();
        let b = CostVector::parse("consistency=1,complexity=0.5").unwrap();
        let sum = a.add(&b);
        assert_eq!(sum.to_string(), "consistency=2,complexity=0.5");
        assert_eq!(CostVector::ZERO.to_string(), "0");
        assert_eq!(sum.scalar(&CostVector::splat(1.0)), 2.5);
    }
}
