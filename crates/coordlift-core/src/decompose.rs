//! Partition of classified effects into the liftable and the agreed part.

use serde::{Deserialize, Serialize};

use crate::classifier::{self, ClassifiedEffect};
use crate::config::AnalysisSettings;
use crate::model::OperationSpec;

/// Existential and universal parts of an operation.
///
/// Fields are private so the lifting fraction can only be produced by
/// [`Decomposition::new`], which is also the deserialisation path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DecompositionRepr")]
pub struct Decomposition {
    existential_part: Vec<ClassifiedEffect>,
    universal_part: Vec<ClassifiedEffect>,
    lifting_fraction: f64,
}

#[derive(Deserialize)]
struct DecompositionRepr {
    existential_part: Vec<ClassifiedEffect>,
    universal_part: Vec<ClassifiedEffect>,
}

impl From<DecompositionRepr> for Decomposition {
    fn from(repr: DecompositionRepr) -> Self {
        let mut all = repr.existential_part;
        all.extend(repr.universal_part);
        Decomposition::new(all)
    }
}

impl Decomposition {
    /// Partition by verdict: `Existential` goes to the existential part,
    /// `Universal` and `Unknown` to the universal part. Both parts are kept
    /// in ordinal order.
    pub fn new(effects: Vec<ClassifiedEffect>) -> Self {
        let (mut existential_part, mut universal_part): (Vec<_>, Vec<_>) = effects
            .into_iter()
            .partition(|c| c.verdict.is_existential());
        existential_part.sort_by_key(|c| c.effect.ordinal);
        universal_part.sort_by_key(|c| c.effect.ordinal);
        let total = existential_part.len() + universal_part.len();
        let lifting_fraction = if total == 0 {
            1.0
        } else {
            existential_part.len() as f64 / total as f64
        };
        Self {
            existential_part,
            universal_part,
            lifting_fraction,
        }
    }

    pub fn existential_part(&self) -> &[ClassifiedEffect] {
        &self.existential_part
    }

    pub fn universal_part(&self) -> &[ClassifiedEffect] {
        &self.universal_part
    }

    pub fn lifting_fraction(&self) -> f64 {
        self.lifting_fraction
    }

    pub fn len(&self) -> usize {
        self.existential_part.len() + self.universal_part.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every effect in ordinal order.
    pub fn effects(&self) -> Vec<&ClassifiedEffect> {
        let mut all: Vec<&ClassifiedEffect> = self
            .existential_part
            .iter()
            .chain(self.universal_part.iter())
            .collect();
        all.sort_by_key(|c| c.effect.ordinal);
        all
    }

    /// Rebuild with `id` replaced by `replacement` (one or more effects).
    pub fn replace(&self, id: &str, replacement: Vec<ClassifiedEffect>) -> Decomposition {
        let mut all: Vec<ClassifiedEffect> = Vec::with_capacity(self.len() + 1);
        let mut replacement = Some(replacement);
        for c in self.effects() {
            if c.effect.id == id {
                if let Some(r) = replacement.take() {
                    all.extend(r);
                }
            } else {
                all.push(c.clone());
            }
        }
        Decomposition::new(all)
    }
}

/// Classify and partition an operation.
pub fn decompose(spec: &OperationSpec, settings: &AnalysisSettings) -> Decomposition {
    Decomposition::new(classifier::classify_all(spec, settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{parse, RawOperationSpec, SpecFormat};

    fn spec(yaml: &str) -> OperationSpec {
        parse(&RawOperationSpec::from_text(yaml, SpecFormat::Yaml).unwrap(), 64).unwrap()
    }

    const MIXED: &str = r#"
name: mixed
state: {views: nat, leader: int}
params: {id: int}
effects:
  - {name: bump, key_pattern: views, kind: increment, body: "self + 1"}
  - {name: elect, key_pattern: leader, kind: assign, body: "id", invariant: "forall replica: unique(leader)"}
  - {name: peek, key_pattern: views, kind: read, body: "views", consistency: eventual}
"#;

    #[test]
    fn test_partitions_and_recomputes_fraction() {
        let d = decompose(&spec(MIXED), &AnalysisSettings::default());
        assert_eq!(d.existential_part().len(), 2);
        assert_eq!(d.universal_part().len(), 1);
        assert_eq!(d.len(), 3);
        assert!((d.lifting_fraction() - 2.0 / 3.0).abs() < 1e-12);
        let ids: Vec<&str> = d.effects().iter().map(|c| c.effect.id.as_str()).collect();
        assert_eq!(ids, vec!["bump", "elect", "peek"]);
    }

    #[test]
    fn test_empty_decomposition_is_fully_lifted() {
        let d = Decomposition::new(Vec::new());
        assert!(d.is_empty());
        assert_eq!(d.lifting_fraction(), 1.0);
    }

    #[test]
    fn test_deserialisation_recomputes_stale_fraction() {
        let d = decompose(&spec(MIXED), &AnalysisSettings::default());
        let mut json = serde_json::to_value(&d).unwrap();
        json["lifting_fraction"] = serde_json::json!(0.0);
        let back: Decomposition = serde_json::from_value(json).unwrap();
        assert_eq!(back.lifting_fraction(), d.lifting_fraction());
        assert_eq!(back, d);
    }

    #[test]
    fn test_replace_keeps_ordinal_order() {
        let d = decompose(&spec(MIXED), &AnalysisSettings::default());
        let bump = d.existential_part()[0].clone();
        let replaced = d.replace("elect", vec![]);
        assert_eq!(replaced.len(), 2);
        assert_eq!(replaced.lifting_fraction(), 1.0);
        assert_eq!(replaced.effects()[0], &bump);
    }
}
