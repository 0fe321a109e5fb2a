//! Restructuring catalog.
//!
//! A fixed, read-only registry of semantics-adjusting transformations.
//! Each one targets the first eligible universal effect (by ordinal) and
//! returns a new decomposition; nothing is mutated in place.

pub mod compose;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::classifier::{
    self, ClassifiedEffect, ExistentialProof, UniversalReason, VerificationVerdict, WitnessRule,
};
use crate::config::AnalysisSettings;
use crate::cost::CostVector;
use crate::decompose::Decomposition;
use crate::model::{
    Builtin, ConsistencyLevel, EffectKind, EffectNode, EffectRole, Expr, Ordinal, Quantifier,
};

pub use compose::{compose, precedes, Application, Composite};

/// Catalog identifiers. Declaration order is the canonical order and the
/// planner's tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransformId {
    WeakenConsistency,
    ShardByKey,
    CacheRead,
    BatchWrites,
    SpeculativeExecute,
    RecursiveDecompose,
}

impl TransformId {
    pub const ALL: [TransformId; 6] = [
        TransformId::WeakenConsistency,
        TransformId::ShardByKey,
        TransformId::CacheRead,
        TransformId::BatchWrites,
        TransformId::SpeculativeExecute,
        TransformId::RecursiveDecompose,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransformId::WeakenConsistency => "weaken-consistency",
            TransformId::ShardByKey => "shard-by-key",
            TransformId::CacheRead => "cache-read",
            TransformId::BatchWrites => "batch-writes",
            TransformId::SpeculativeExecute => "speculative-execute",
            TransformId::RecursiveDecompose => "recursive-decompose",
        }
    }

    /// The registry entry for this id.
    pub fn transformation(self) -> &'static Transformation {
        &CATALOG[self as usize]
    }
}

impl fmt::Display for TransformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransformId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransformId::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown transformation '{}'", s))
    }
}

/// Which effect a transformation would act on, or why it cannot.
type Precondition = fn(&Decomposition, &AnalysisSettings) -> Result<String, String>;
type Rewrite = fn(&ClassifiedEffect, &AnalysisSettings) -> Vec<ClassifiedEffect>;

/// One catalog entry.
pub struct Transformation {
    pub id: TransformId,
    pub summary: &'static str,
    /// Expected lifting gain; advisory, used only for ranking.
    pub delta_l: f64,
    pub cost: CostVector,
    precondition: Precondition,
    rewrite: Rewrite,
}

impl fmt::Debug for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformation")
            .field("id", &self.id)
            .field("delta_l", &self.delta_l)
            .field("cost", &self.cost)
            .finish()
    }
}

impl Transformation {
    /// The effect this transformation would rewrite, or the failed
    /// precondition.
    pub fn target(&self, d: &Decomposition, settings: &AnalysisSettings) -> Result<String, String> {
        (self.precondition)(d, settings)
    }

    pub fn can_apply(&self, d: &Decomposition, settings: &AnalysisSettings) -> bool {
        self.target(d, settings).is_ok()
    }

    /// Apply to the first eligible effect. `None` when the precondition fails.
    pub fn apply(&self, d: &Decomposition, settings: &AnalysisSettings) -> Option<Decomposition> {
        let target = self.target(d, settings).ok()?;
        let effect = d.universal_part().iter().find(|c| c.effect.id == target)?;
        Some(d.replace(&target, (self.rewrite)(effect, settings)))
    }

    /// Serializable description for listings.
    pub fn info(&self) -> TransformInfo {
        TransformInfo {
            id: self.id,
            summary: self.summary.to_string(),
            delta_l: self.delta_l,
            cost: self.cost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformInfo {
    pub id: TransformId,
    pub summary: String,
    pub delta_l: f64,
    pub cost: CostVector,
}

/// Process-wide registry, indexed by `TransformId as usize`.
pub static CATALOG: [Transformation; 6] = [
    Transformation {
        id: TransformId::WeakenConsistency,
        summary: "relax invariants to eventual, or downgrade strong foreign reads to causal",
        delta_l: 0.3,
        cost: CostVector {
            consistency: 1.0,
            ..CostVector::ZERO
        },
        precondition: weaken_target,
        rewrite: weaken,
    },
    Transformation {
        id: TransformId::ShardByKey,
        summary: "give each key instance a single owner replica",
        delta_l: 0.4,
        cost: CostVector {
            availability: 1.0,
            complexity: 0.5,
            ..CostVector::ZERO
        },
        precondition: shard_target,
        rewrite: shard,
    },
    Transformation {
        id: TransformId::CacheRead,
        summary: "serve a linearizable read from a bounded-staleness cache",
        delta_l: 0.35,
        cost: CostVector {
            staleness: 1.0,
            ..CostVector::ZERO
        },
        precondition: cache_target,
        rewrite: cache,
    },
    Transformation {
        id: TransformId::BatchWrites,
        summary: "split a numeric threshold into per-replica escrow shares",
        delta_l: 0.3,
        cost: CostVector {
            latency: 1.0,
            ..CostVector::ZERO
        },
        precondition: batch_target,
        rewrite: batch,
    },
    Transformation {
        id: TransformId::SpeculativeExecute,
        summary: "execute optimistically and roll back on conflict",
        delta_l: 0.25,
        cost: CostVector {
            risk: 1.0,
            ..CostVector::ZERO
        },
        precondition: speculate_target,
        rewrite: speculate,
    },
    Transformation {
        id: TransformId::RecursiveDecompose,
        summary: "split a write into a read fragment and a commit fragment",
        delta_l: 0.2,
        cost: CostVector {
            complexity: 1.0,
            ..CostVector::ZERO
        },
        precondition: split_target,
        rewrite: split,
    },
];

pub fn catalog() -> &'static [Transformation] {
    &CATALOG
}

/// Whether `t`'s precondition holds on `d`.
pub fn can_apply(t: TransformId, d: &Decomposition, settings: &AnalysisSettings) -> bool {
    t.transformation().can_apply(d, settings)
}

fn first_universal(
    d: &Decomposition,
    what: &str,
    eligible: impl Fn(&ClassifiedEffect) -> bool,
) -> Result<String, String> {
    d.universal_part()
        .iter()
        .find(|c| eligible(c))
        .map(|c| c.effect.id.clone())
        .ok_or_else(|| format!("no universal effect {}", what))
}

fn strong_foreign_reads(e: &EffectNode) -> bool {
    !e.is_read() && !e.foreign_reads().is_empty() && e.read_level.is_strong()
}

fn granted(c: &ClassifiedEffect, t: TransformId, note: String) -> ClassifiedEffect {
    let mut out = c.with_verdict(VerificationVerdict::Existential {
        proof: ExistentialProof::Witness {
            rule: WitnessRule::Transform {
                transform: t.as_str().to_string(),
            },
        },
    });
    out.effect.annotations.push(format!("{}: {}", t, note));
    out
}

fn relaxable(c: &ClassifiedEffect) -> bool {
    matches!(
        c.verdict.universal_reason(),
        Some(
            UniversalReason::NonMonotoneThreshold
                | UniversalReason::ForallInvariant
                | UniversalReason::Unclassified
        )
    )
}

fn weaken_target(d: &Decomposition, _: &AnalysisSettings) -> Result<String, String> {
    first_universal(d, "with a relaxable invariant or strong foreign reads", |c| {
        relaxable(c) || strong_foreign_reads(&c.effect)
    })
}

fn weaken(c: &ClassifiedEffect, _: &AnalysisSettings) -> Vec<ClassifiedEffect> {
    if relaxable(c) {
        let mut out = granted(
            c,
            TransformId::WeakenConsistency,
            "invariants relaxed to eventual".to_string(),
        );
        for inv in &mut out.effect.invariants {
            inv.quantifier = Quantifier::Exists;
        }
        return vec![out];
    }
    let mut out = c.with_verdict(c.verdict.clone());
    out.effect.read_level = ConsistencyLevel::Causal;
    out.effect.annotations.push(format!(
        "{}: foreign reads downgraded to causal",
        TransformId::WeakenConsistency
    ));
    vec![out]
}

fn shard_target(d: &Decomposition, _: &AnalysisSettings) -> Result<String, String> {
    first_universal(
        d,
        "with a sharded key, a key-local invariant and no strong foreign reads",
        |c| {
            let e = &c.effect;
            let local = e.invariant_keys().iter().all(|k| *k == e.key.name);
            let reason_ok = matches!(
                c.verdict.universal_reason(),
                Some(
                    UniversalReason::Uniqueness
                        | UniversalReason::ForallInvariant
                        | UniversalReason::NonMonotoneThreshold
                )
            );
            !e.is_read() && e.key.is_sharded() && local && !strong_foreign_reads(e) && reason_ok
        },
    )
}

fn shard(c: &ClassifiedEffect, _: &AnalysisSettings) -> Vec<ClassifiedEffect> {
    let dims = c.effect.key.dims().join(", ");
    vec![granted(
        c,
        TransformId::ShardByKey,
        format!("single owner per {{{}}}", dims),
    )]
}

fn cache_target(d: &Decomposition, _: &AnalysisSettings) -> Result<String, String> {
    first_universal(d, "that is a linearizable read", |c| {
        c.effect.is_read() && c.effect.read_level.is_strong()
    })
}

fn cache(c: &ClassifiedEffect, settings: &AnalysisSettings) -> Vec<ClassifiedEffect> {
    let mut effect = c.effect.clone();
    effect.read_level = ConsistencyLevel::Cached;
    effect.annotations.push(format!(
        "{}: served from a bounded-staleness cache",
        TransformId::CacheRead
    ));
    vec![classifier::classify_effect(&effect, settings)]
}

fn batch_target(d: &Decomposition, _: &AnalysisSettings) -> Result<String, String> {
    first_universal(d, "guarding a non-monotone threshold on a numeric key", |c| {
        c.verdict.universal_reason() == Some(UniversalReason::NonMonotoneThreshold)
            && c.effect.key_type().is_numeric()
    })
}

fn batch(c: &ClassifiedEffect, settings: &AnalysisSettings) -> Vec<ClassifiedEffect> {
    vec![granted(
        c,
        TransformId::BatchWrites,
        format!("escrow split across {} replicas", settings.replicas),
    )]
}

fn speculate_target(d: &Decomposition, settings: &AnalysisSettings) -> Result<String, String> {
    let floor = settings.speculation_floor;
    first_universal(
        d,
        &format!("left unclassified with confidence >= {}", floor),
        |c| matches!(c.verdict, VerificationVerdict::Unknown { confidence, .. } if confidence >= floor),
    )
}

fn speculate(c: &ClassifiedEffect, _: &AnalysisSettings) -> Vec<ClassifiedEffect> {
    vec![granted(
        c,
        TransformId::SpeculativeExecute,
        "optimistic execution with rollback".to_string(),
    )]
}

fn split_target(d: &Decomposition, _: &AnalysisSettings) -> Result<String, String> {
    first_universal(d, "writing with foreign reads", |c| {
        let e = &c.effect;
        !e.is_read() && e.role == EffectRole::Whole && !e.foreign_reads().is_empty()
    })
}

/// Split into an observation of the foreign keys and a commit that takes
/// the observed values as arguments. Both fragments are re-classified.
fn split(c: &ClassifiedEffect, settings: &AnalysisSettings) -> Vec<ClassifiedEffect> {
    let parent = &c.effect;
    let foreign: Vec<String> = parent
        .foreign_reads()
        .into_iter()
        .map(str::to_string)
        .collect();
    let note = format!(
        "{}: split from {}",
        TransformId::RecursiveDecompose,
        parent.id
    );

    let mut read = parent.clone();
    read.id = format!("{}.read", parent.id);
    read.ordinal = Ordinal {
        index: parent.ordinal.index,
        fragment: 1,
    };
    read.kind = EffectKind::Read;
    read.body = Expr::call(
        Builtin::Snapshot,
        foreign.iter().map(|k| Expr::key(k)).collect(),
    );
    read.invariants = Vec::new();
    read.reads = foreign.iter().cloned().collect();
    read.symbols = parent
        .symbols
        .iter()
        .filter(|(k, _)| foreign.contains(k) || **k == parent.key.name)
        .map(|(k, t)| (k.clone(), t.clone()))
        .collect();
    read.role = EffectRole::ReadFragment {
        parent: parent.id.clone(),
    };
    read.annotations.push(note.clone());

    let mut commit = parent.clone();
    commit.id = format!("{}.commit", parent.id);
    commit.ordinal = Ordinal {
        index: parent.ordinal.index,
        fragment: 2,
    };
    let mut body = parent.body.clone();
    for k in &foreign {
        body = body.substitute_key(k, &Expr::param(&format!("{}@read", k)));
    }
    commit.body = body;
    commit.reads = commit.body.keys();
    for k in &foreign {
        if let Some(t) = commit.symbols.remove(k) {
            commit.symbols.insert(format!("{}@read", k), t);
        }
    }
    // Invariants may still mention foreign keys.
    for inv in &commit.invariants {
        for k in inv.keys() {
            if let Some(t) = parent.symbols.get(&k) {
                commit.symbols.insert(k, t.clone());
            }
        }
    }
    commit.role = EffectRole::CommitFragment {
        parent: parent.id.clone(),
    };
    commit.annotations.push(note);

    vec![
        classifier::classify_effect(&read, settings),
        classifier::classify_effect(&commit, settings),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompose::decompose;
    use crate::model::{parse, OperationSpec, RawOperationSpec, SpecFormat};

    fn spec(yaml: &str) -> OperationSpec {
        parse(&RawOperationSpec::from_text(yaml, SpecFormat::Yaml).unwrap(), 64).unwrap()
    }

    const CHECKOUT: &str = r#"
name: checkout
state: {cart: "set<string>", order: int}
params: {oid: int}
effects:
  - name: checkout
    key_pattern: "order/{user}"
    kind: assign
    body: "if size(cart) > 0 then oid else self"
    invariant: "forall replica: unique(order)"
"#;

    #[test]
    fn test_registry_is_indexed_by_id() {
        for (i, t) in CATALOG.iter().enumerate() {
            assert_eq!(t.id as usize, i);
            assert_eq!(t.id.transformation().id, t.id);
            assert_eq!(t.id.as_str().parse::<TransformId>().unwrap(), t.id);
            assert!(!t.cost.is_zero());
        }
    }

    #[test]
    fn test_weaken_downgrades_strong_foreign_reads() {
        let s = AnalysisSettings::default();
        let d = decompose(&spec(CHECKOUT), &s);
        assert_eq!(d.lifting_fraction(), 0.0);
        let t = TransformId::WeakenConsistency.transformation();
        assert_eq!(t.target(&d, &s).unwrap(), "checkout");
        let after = t.apply(&d, &s).unwrap();
        let e = &after.universal_part()[0].effect;
        assert_eq!(e.read_level, ConsistencyLevel::Causal);
        assert_eq!(after.lifting_fraction(), 0.0);
        assert!(!t.can_apply(&after, &s));
    }

    #[test]
    fn test_shard_requires_weak_foreign_reads() {
        let s = AnalysisSettings::default();
        let d = decompose(&spec(CHECKOUT), &s);
        let shard = TransformId::ShardByKey.transformation();
        assert!(shard.target(&d, &s).unwrap_err().contains("sharded key"));
        let weakened = TransformId::WeakenConsistency
            .transformation()
            .apply(&d, &s)
            .unwrap();
        let sharded = shard.apply(&weakened, &s).unwrap();
        assert_eq!(sharded.lifting_fraction(), 1.0);
        assert!(sharded.existential_part()[0].effect.annotations[1].starts_with("shard-by-key"));
    }

    #[test]
    fn test_split_creates_two_reclassified_fragments() {
        let s = AnalysisSettings::default();
        let d = decompose(&spec(CHECKOUT), &s);
        let split = TransformId::RecursiveDecompose
            .transformation()
            .apply(&d, &s)
            .unwrap();
        assert_eq!(split.len(), 2);
        let ids: Vec<&str> = split.effects().iter().map(|c| c.effect.id.as_str()).collect();
        assert_eq!(ids, vec!["checkout.read", "checkout.commit"]);
        // The read fragment inherits the linearizable level.
        assert_eq!(
            split.universal_part()[0].verdict.universal_reason(),
            Some(UniversalReason::LinearizableRead)
        );
        let commit = &split.effects()[1].effect;
        assert!(commit.body.params().contains("cart@read"));
        assert!(!commit.reads.contains("cart"));

        let cached = TransformId::CacheRead
            .transformation()
            .apply(&split, &s)
            .unwrap();
        assert_eq!(cached.lifting_fraction(), 0.5);
    }

    #[test]
    fn test_leader_has_no_applicable_transformation() {
        let s = AnalysisSettings::default();
        let d = decompose(
            &spec(
                r#"
name: leader
state: {leader: int}
params: {id: int}
effects:
  - {name: elect, key_pattern: leader, kind: assign, body: "id", invariant: "forall replica: unique(leader)"}
"#,
            ),
            &s,
        );
        for t in catalog() {
            assert!(!t.can_apply(&d, &s), "{} should not apply", t.id);
        }
    }

    #[test]
    fn test_speculation_respects_the_floor() {
        let doc = r#"
name: t
state: {x: int}
params: {v: int}
opaque: [score]
effects:
  - {name: e, key_pattern: x, kind: increment, body: "self + score(v)"}
"#;
        let d = decompose(&spec(doc), &AnalysisSettings::default());
        let t = TransformId::SpeculativeExecute.transformation();
        assert!(t.can_apply(&d, &AnalysisSettings::default()));
        let strict = AnalysisSettings {
            speculation_floor: 0.9,
            ..AnalysisSettings::default()
        };
        assert!(!t.can_apply(&d, &strict));
    }
}
