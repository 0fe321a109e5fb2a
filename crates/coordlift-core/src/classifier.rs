//! Verification classifier.
//!
//! Decides per effect whether correctness can be witnessed by one replica
//! (existential, liftable to a merge) or needs every non-faulty replica
//! (universal, routed to consensus). The fault model is an explicit input.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::commutativity::{self, tier, Accumulator, CommutativityResult, Tier};
use crate::config::{AnalysisSettings, FaultModel};
use crate::metrics::METRICS;
use crate::model::{
    BinOp, Builtin, ConsistencyLevel, EffectNode, Expr, Invariant, OperationSpec, Quantifier,
    UnOp, ValueType,
};
use crate::obs;

/// Explicit existential witness rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum WitnessRule {
    /// `exists replica: P`.
    ExistsQuantifier,
    /// A threshold the body can only move away from.
    MonotoneThreshold,
    /// Observation below linearizable consistency.
    WeakRead { level: ConsistencyLevel },
    /// Granted by a catalog transformation.
    Transform { transform: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "proof", rename_all = "snake_case")]
pub enum ExistentialProof {
    Commutativity { tier: Tier },
    Witness { rule: WitnessRule },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniversalReason {
    Uniqueness,
    NonMonotoneThreshold,
    ForallInvariant,
    LinearizableRead,
    /// An `Unknown` verdict routed conservatively.
    Unclassified,
}

impl fmt::Display for UniversalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UniversalReason::Uniqueness => "uniqueness",
            UniversalReason::NonMonotoneThreshold => "non_monotone_threshold",
            UniversalReason::ForallInvariant => "forall_invariant",
            UniversalReason::LinearizableRead => "linearizable_read",
            UniversalReason::Unclassified => "unclassified",
        };
        write!(f, "{}", s)
    }
}

/// What agreement a universal effect needs under the configured faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementRequirement {
    pub fault_model: FaultModel,
    pub replicas: usize,
    pub tolerated_faults: usize,
    /// Replicas that must answer before the effect commits.
    pub quorum: usize,
}

impl AgreementRequirement {
    /// Crash faults need no contradicting evidence from a live majority;
    /// byzantine faults need `2f+1` matching answers out of `n >= 3f+1`.
    pub fn for_settings(settings: &AnalysisSettings) -> Self {
        let n = settings.replicas;
        let f = settings.fault_model.tolerated_faults(n);
        let quorum = match settings.fault_model {
            FaultModel::Crash => n / 2 + 1,
            FaultModel::Byzantine => 2 * f + 1,
        };
        Self {
            fault_model: settings.fault_model,
            replicas: n,
            tolerated_faults: f,
            quorum,
        }
    }
}

impl fmt::Display for AgreementRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} quorum {}/{} (f={})",
            self.fault_model, self.quorum, self.replicas, self.tolerated_faults
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum VerificationVerdict {
    Existential {
        proof: ExistentialProof,
    },
    Universal {
        reason: UniversalReason,
        agreement: AgreementRequirement,
    },
    Unknown {
        /// Estimated probability that the effect is safe to lift.
        confidence: f64,
        basis: String,
    },
}

impl VerificationVerdict {
    pub fn is_existential(&self) -> bool {
        matches!(self, VerificationVerdict::Existential { .. })
    }

    /// Reason used downstream; `Unknown` counts as `Unclassified`.
    pub fn universal_reason(&self) -> Option<UniversalReason> {
        match self {
            VerificationVerdict::Existential { .. } => None,
            VerificationVerdict::Universal { reason, .. } => Some(*reason),
            VerificationVerdict::Unknown { .. } => Some(UniversalReason::Unclassified),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            VerificationVerdict::Existential { .. } => "existential",
            VerificationVerdict::Universal { .. } => "universal",
            VerificationVerdict::Unknown { .. } => "unknown",
        }
    }

    /// Short human-readable basis, e.g. `commutativity (tier 1)`.
    pub fn basis(&self) -> String {
        match self {
            VerificationVerdict::Existential {
                proof: ExistentialProof::Commutativity { tier },
            } => format!("commutativity ({})", tier),
            VerificationVerdict::Existential {
                proof: ExistentialProof::Witness { rule },
            } => match rule {
                WitnessRule::ExistsQuantifier => "witness (exists quantifier)".to_string(),
                WitnessRule::MonotoneThreshold => "witness (monotone threshold)".to_string(),
                WitnessRule::WeakRead { level } => format!("witness ({} read)", level),
                WitnessRule::Transform { transform } => format!("witness ({})", transform),
            },
            VerificationVerdict::Universal { reason, agreement } => {
                format!("{}, {}", reason, agreement)
            }
            VerificationVerdict::Unknown { confidence, basis } => {
                format!("{} (confidence {:.2})", basis, confidence)
            }
        }
    }
}

/// An effect together with its verdict and, for writes, the self-check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedEffect {
    pub effect: EffectNode,
    pub verdict: VerificationVerdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_check: Option<CommutativityResult>,
}

impl ClassifiedEffect {
    /// A copy of this effect with a new verdict; the old value is untouched.
    pub fn with_verdict(&self, verdict: VerificationVerdict) -> Self {
        Self {
            effect: self.effect.clone(),
            verdict,
            self_check: self.self_check.clone(),
        }
    }
}

/// Classify every effect of an operation, in ordinal order.
pub fn classify_all(spec: &OperationSpec, settings: &AnalysisSettings) -> Vec<ClassifiedEffect> {
    spec.effects
        .iter()
        .map(|e| classify_effect(e, settings))
        .collect()
}

/// Classify one effect, keeping the self-commutativity result for reports.
pub fn classify_effect(effect: &EffectNode, settings: &AnalysisSettings) -> ClassifiedEffect {
    let self_check = (!effect.is_read()).then(|| commutativity::check_self(effect, settings));
    let verdict = verdict_for(effect, self_check.as_ref(), settings);

    METRICS.inc_effects_classified();
    match &verdict {
        VerificationVerdict::Unknown { confidence, basis } => {
            obs::emit_classification_uncertain(&effect.id, *confidence, basis)
        }
        other => obs::emit_effect_classified(&effect.id, other.label(), &other.basis()),
    }
    ClassifiedEffect {
        effect: effect.clone(),
        verdict,
        self_check,
    }
}

/// Classify one effect.
pub fn classify(effect: &EffectNode, settings: &AnalysisSettings) -> VerificationVerdict {
    classify_effect(effect, settings).verdict
}

fn verdict_for(
    effect: &EffectNode,
    self_check: Option<&CommutativityResult>,
    settings: &AnalysisSettings,
) -> VerificationVerdict {
    let universal = |reason| VerificationVerdict::Universal {
        reason,
        agreement: AgreementRequirement::for_settings(settings),
    };

    if effect.is_read() {
        return if effect.read_level.is_strong() {
            universal(UniversalReason::LinearizableRead)
        } else {
            VerificationVerdict::Existential {
                proof: ExistentialProof::Witness {
                    rule: WitnessRule::WeakRead {
                        level: effect.read_level,
                    },
                },
            }
        };
    }

    if let Some(CommutativityResult::Commutes { tier, .. }) = self_check {
        return VerificationVerdict::Existential {
            proof: ExistentialProof::Commutativity { tier: *tier },
        };
    }

    match invariant_shape(effect) {
        Shape::Universal(reason) => universal(reason),
        Shape::Existential(rule) => VerificationVerdict::Existential {
            proof: ExistentialProof::Witness { rule },
        },
        Shape::Unknown(why) => {
            let (confidence, basis) = match self_check {
                Some(CommutativityResult::Undecidable { heuristic }) => (
                    heuristic.confidence,
                    format!("{}; {:?} idiom", heuristic.reason, heuristic.idiom),
                ),
                Some(r) if r.witness().is_some() => {
                    (0.0, "concurrent instances refuted by a witness".to_string())
                }
                _ => (0.2, "self-commutativity not proven".to_string()),
            };
            VerificationVerdict::Unknown {
                confidence,
                basis: format!("{}; {}", basis, why),
            }
        }
    }
}

enum Shape {
    Existential(WitnessRule),
    Universal(UniversalReason),
    Unknown(String),
}

/// Combine per-conjunct shapes: any universal wins, then unknown.
fn invariant_shape(effect: &EffectNode) -> Shape {
    if effect.invariants.is_empty() {
        return Shape::Unknown("no invariant".to_string());
    }
    let mut universal: Option<UniversalReason> = None;
    let mut unknown: Option<String> = None;
    let mut existential: Option<WitnessRule> = None;
    for inv in &effect.invariants {
        for shape in conjunct_shapes(effect, inv) {
            match shape {
                Shape::Universal(r) => universal = Some(universal.map_or(r, |u| u.min(r))),
                Shape::Unknown(why) => unknown = unknown.or(Some(why)),
                Shape::Existential(rule) => existential = existential.or(Some(rule)),
            }
        }
    }
    if let Some(r) = universal {
        return Shape::Universal(r);
    }
    if let Some(why) = unknown {
        return Shape::Unknown(why);
    }
    match existential {
        Some(rule) => Shape::Existential(rule),
        None => Shape::Unknown("empty invariant".to_string()),
    }
}

fn conjuncts<'a>(e: &'a Expr, out: &mut Vec<&'a Expr>) {
    match e {
        Expr::Binary {
            op: BinOp::And,
            lhs,
            rhs,
        } => {
            conjuncts(lhs, out);
            conjuncts(rhs, out);
        }
        other => out.push(other),
    }
}

fn conjunct_shapes(effect: &EffectNode, inv: &Invariant) -> Vec<Shape> {
    let unique = inv
        .predicate
        .any(&|e| matches!(e, Expr::Call { func: Builtin::Unique, .. }));
    if unique {
        return vec![Shape::Universal(UniversalReason::Uniqueness)];
    }
    match inv.quantifier {
        Quantifier::Forall => return vec![Shape::Universal(UniversalReason::ForallInvariant)],
        Quantifier::Exists => return vec![Shape::Existential(WitnessRule::ExistsQuantifier)],
        Quantifier::Bare => {}
    }
    let mut parts = Vec::new();
    conjuncts(&inv.predicate, &mut parts);
    parts
        .into_iter()
        .map(|p| threshold_shape(effect, p))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Lower,
    Upper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Steady,
    NonDecreasing,
    NonIncreasing,
    Unknown,
}

impl Direction {
    fn join(self, other: Direction) -> Direction {
        match (self, other) {
            (Direction::Steady, d) | (d, Direction::Steady) => d,
            (a, b) if a == b => a,
            _ => Direction::Unknown,
        }
    }

    fn keeps(self, bound: Bound) -> bool {
        matches!(
            (self, bound),
            (Direction::Steady, _)
                | (Direction::NonDecreasing, Bound::Lower)
                | (Direction::NonIncreasing, Bound::Upper)
        )
    }
}

fn threshold_shape(effect: &EffectNode, pred: &Expr) -> Shape {
    let target = effect.key.name.as_str();
    let Some((bound, measured)) = threshold(pred, target) else {
        return Shape::Unknown(format!("invariant '{}' has no recognised shape", pred));
    };
    if direction(&effect.body, target, measured, effect).keeps(bound) {
        Shape::Existential(WitnessRule::MonotoneThreshold)
    } else {
        Shape::Universal(UniversalReason::NonMonotoneThreshold)
    }
}

/// Which quantity of the target a threshold constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Measure {
    Value,
    Size,
}

fn measured(e: &Expr, target: &str) -> Option<Measure> {
    match e {
        Expr::Key { name } if name == target => Some(Measure::Value),
        Expr::Call {
            func: Builtin::Size,
            args,
        } if matches!(&args[0], Expr::Key { name } if name == target) => Some(Measure::Size),
        _ => None,
    }
}

/// Recognise `t >= c`, `t > c`, `t <= c`, `t < c` (either side) where `t`
/// is the target or its size and `c` reads no keys.
fn threshold(pred: &Expr, target: &str) -> Option<(Bound, Measure)> {
    let Expr::Binary { op, lhs, rhs } = pred else {
        return None;
    };
    let (m, flipped) = match (measured(lhs, target), measured(rhs, target)) {
        (Some(m), None) if rhs.keys().is_empty() => (m, false),
        (None, Some(m)) if lhs.keys().is_empty() => (m, true),
        _ => return None,
    };
    let bound = match (op, flipped) {
        (BinOp::Ge | BinOp::Gt, false) | (BinOp::Le | BinOp::Lt, true) => Bound::Lower,
        (BinOp::Le | BinOp::Lt, false) | (BinOp::Ge | BinOp::Gt, true) => Bound::Upper,
        _ => return None,
    };
    Some((bound, m))
}

fn nonnegative(e: &Expr, effect: &EffectNode) -> bool {
    let nat = |name: &str| effect.symbols.get(name) == Some(&ValueType::Nat);
    match e {
        Expr::Lit { .. } => e.as_int().is_some_and(|v| v >= 0),
        Expr::Param { name } | Expr::Key { name } => nat(name),
        Expr::Binary {
            op: BinOp::Add | BinOp::Mul,
            lhs,
            rhs,
        } => nonnegative(lhs, effect) && nonnegative(rhs, effect),
        Expr::Call {
            func: Builtin::Size | Builtin::Abs,
            ..
        } => true,
        _ => false,
    }
}

fn direction(body: &Expr, target: &str, measure: Measure, effect: &EffectNode) -> Direction {
    if matches!(body, Expr::Key { name } if name == target) {
        return Direction::Steady;
    }
    if let Expr::If {
        then, otherwise, ..
    } = body
    {
        return direction(then, target, measure, effect)
            .join(direction(otherwise, target, measure, effect));
    }
    let Some((acc, operand)) = tier::accumulator(body, target) else {
        return Direction::Unknown;
    };
    match (measure, acc) {
        (Measure::Value, Accumulator::Additive) => match &operand {
            Expr::Unary {
                op: UnOp::Neg,
                arg,
            } if nonnegative(arg, effect) => Direction::NonIncreasing,
            e if nonnegative(e, effect) => Direction::NonDecreasing,
            e if e.as_int().is_some_and(|v| v < 0) => Direction::NonIncreasing,
            _ => Direction::Unknown,
        },
        (Measure::Value, Accumulator::Max) => Direction::NonDecreasing,
        (Measure::Value, Accumulator::Min) => Direction::NonIncreasing,
        (Measure::Size, Accumulator::Union) => Direction::NonDecreasing,
        (Measure::Size, Accumulator::Remove) => Direction::NonIncreasing,
        _ => Direction::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{parse, RawOperationSpec, SpecFormat};

    fn spec(yaml: &str) -> OperationSpec {
        let raw = RawOperationSpec::from_text(yaml, SpecFormat::Yaml).unwrap();
        parse(&raw, 64).unwrap()
    }

    fn one(state: &str, params: &str, kind: &str, body: &str, invariant: Option<&str>) -> EffectNode {
        let inv = invariant
            .map(|i| format!(", invariant: \"{}\"", i))
            .unwrap_or_default();
        spec(&format!(
            r#"
name: t
state: {{{}}}
params: {{{}}}
effects:
  - {{name: e, key_pattern: "x", kind: {}, body: "{}"{}}}
"#,
            state, params, kind, body, inv
        ))
        .effects
        .remove(0)
    }

    fn settings() -> AnalysisSettings {
        AnalysisSettings::default()
    }

    #[test]
    fn test_counter_is_existential_by_commutativity() {
        let e = one("x: nat", "n: nat", "increment", "self + n", None);
        assert_eq!(
            classify(&e, &settings()),
            VerificationVerdict::Existential {
                proof: ExistentialProof::Commutativity {
                    tier: Tier::Semilattice
                }
            }
        );
    }

    #[test]
    fn test_unique_leader_is_universal_with_quorum() {
        let e = one("x: int", "id: int", "assign", "id", Some("forall replica: unique(x)"));
        match classify(&e, &settings()) {
            VerificationVerdict::Universal { reason, agreement } => {
                assert_eq!(reason, UniversalReason::Uniqueness);
                assert_eq!(agreement.quorum, 2);
                assert_eq!(agreement.tolerated_faults, 1);
            }
            other => panic!("expected universal, got {:?}", other),
        }
    }

    #[test]
    fn test_byzantine_agreement_needs_two_f_plus_one() {
        let s = AnalysisSettings {
            fault_model: FaultModel::Byzantine,
            replicas: 7,
            ..settings()
        };
        let req = AgreementRequirement::for_settings(&s);
        assert_eq!(req.tolerated_faults, 2);
        assert_eq!(req.quorum, 5);
    }

    #[test]
    fn test_exists_invariant_is_a_witness() {
        let e = one("x: int", "v: int", "assign", "v", Some("exists replica: x >= 0"));
        assert_eq!(
            classify(&e, &settings()),
            VerificationVerdict::Existential {
                proof: ExistentialProof::Witness {
                    rule: WitnessRule::ExistsQuantifier
                }
            }
        );
    }

    #[test]
    fn test_monotone_threshold_is_a_witness() {
        let e = one(
            "x: int",
            "v: int",
            "assign",
            "if self > v then self + 1 else self + 2",
            Some("self >= 0"),
        );
        assert_eq!(
            classify(&e, &settings()),
            VerificationVerdict::Existential {
                proof: ExistentialProof::Witness {
                    rule: WitnessRule::MonotoneThreshold
                }
            }
        );
    }

    #[test]
    fn test_guarded_decrement_is_non_monotone() {
        let e = one(
            "x: int",
            "n: nat",
            "assign",
            "if self >= n then self - n else self",
            Some("self >= 0"),
        );
        assert_eq!(
            classify(&e, &settings()).universal_reason(),
            Some(UniversalReason::NonMonotoneThreshold)
        );
    }

    #[test]
    fn test_reads_follow_consistency_level() {
        let doc = r#"
name: t
state: {x: int}
effects:
  - {name: strong, key_pattern: x, kind: read, body: "x"}
  - {name: weak, key_pattern: x, kind: read, body: "x", consistency: causal}
"#;
        let s = spec(doc);
        assert_eq!(
            classify(&s.effects[0], &settings()).universal_reason(),
            Some(UniversalReason::LinearizableRead)
        );
        assert!(classify(&s.effects[1], &settings()).is_existential());
    }

    #[test]
    fn test_unrecognised_invariant_is_unknown() {
        let e = one("x: int", "v: int", "assign", "v", Some("x != 3"));
        match classify(&e, &settings()) {
            VerificationVerdict::Unknown { confidence, .. } => assert_eq!(confidence, 0.0),
            other => panic!("expected unknown, got {:?}", other),
        }
    }

    #[test]
    fn test_undecidable_accumulation_carries_heuristic_confidence() {
        let doc = r#"
name: t
state: {x: int}
params: {v: int}
opaque: [score]
effects:
  - {name: e, key_pattern: x, kind: increment, body: "self + score(v)"}
"#;
        let e = &spec(doc).effects[0];
        match classify(e, &settings()) {
            VerificationVerdict::Unknown { confidence, basis } => {
                assert_eq!(confidence, 0.75);
                assert!(basis.contains("opaque"));
            }
            other => panic!("expected unknown, got {:?}", other),
        }
    }

    #[test]
    fn test_universal_takes_precedence_over_existential() {
        let e = one(
            "x: int",
            "v: int",
            "assign",
            "v",
            Some("exists replica: x >= 0"),
        );
        let mut e = e;
        e.invariants.push(Invariant {
            source: "forall replica: x <= 9".to_string(),
            quantifier: Quantifier::Forall,
            predicate: Expr::binary(BinOp::Le, Expr::key("x"), Expr::int(9)),
        });
        assert_eq!(
            classify(&e, &settings()).universal_reason(),
            Some(UniversalReason::ForallInvariant)
        );
    }
}
