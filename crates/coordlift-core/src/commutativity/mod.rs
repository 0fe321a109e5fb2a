//! Commutativity detection.
//!
//! `check` decides whether applying two effects in either order yields the
//! same state and the same observations. Inside the decidable tiers a
//! `Commutes` answer is a proof; `DoesNotCommute` is either refuted by a
//! concrete witness or a conservative answer. Tier 4 pairs always come back
//! `Undecidable` with a heuristic attached.

pub mod heuristic;
pub mod normalize;
pub mod relational;
pub mod search;
pub mod tier;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AnalysisSettings;
use crate::metrics::METRICS;
use crate::model::EffectNode;

pub use heuristic::{Heuristic, Idiom};
pub use search::Witness;
pub use tier::{Accumulator, Tier, TierAssessment};

use relational::RelVerdict;
use tier::ConstantShape;

/// Why a pair was judged the way it was.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "basis", rename_all = "snake_case")]
pub enum Basis {
    /// Neither effect touches what the other writes.
    DisjointFootprint,
    /// One side leaves the state untouched.
    Identity,
    /// Both sides assign the same constant.
    ConstantEquality,
    /// Same commutative, associative accumulator on the same key.
    OperatorAlgebra { accumulator: Accumulator },
    /// Both orders normalize to the same expressions.
    NormalForm,
    /// A relational rule decided the pair.
    Relational { rule: String },
    /// A concrete input on which the orders disagree.
    Refuted { witness: Witness },
    /// Normal forms differ and no witness was found.
    NormalFormMismatch,
    /// The decision procedure gave up; treated as not commuting.
    Inconclusive { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommutativityResult {
    Commutes { tier: Tier, basis: Basis },
    DoesNotCommute { tier: Tier, basis: Basis },
    Undecidable { heuristic: Heuristic },
}

impl CommutativityResult {
    /// True only for a proof.
    pub fn commutes(&self) -> bool {
        matches!(self, CommutativityResult::Commutes { .. })
    }

    pub fn tier(&self) -> Tier {
        match self {
            CommutativityResult::Commutes { tier, .. }
            | CommutativityResult::DoesNotCommute { tier, .. } => *tier,
            CommutativityResult::Undecidable { heuristic } => heuristic.tier,
        }
    }

    pub fn witness(&self) -> Option<&Witness> {
        match self {
            CommutativityResult::DoesNotCommute {
                basis: Basis::Refuted { witness },
                ..
            } => Some(witness),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CommutativityResult::Commutes { .. } => "commutes",
            CommutativityResult::DoesNotCommute { .. } => "does_not_commute",
            CommutativityResult::Undecidable { .. } => "undecidable",
        }
    }
}

/// Footprints are independent when neither writes what the other touches.
pub fn independent(a: &EffectNode, b: &EffectNode) -> bool {
    let touches = |e: &EffectNode, key: &str| e.reads.contains(key) || e.writes() == Some(key);
    let a_clear = a.writes().map_or(true, |w| !touches(b, w));
    let b_clear = b.writes().map_or(true, |w| !a.reads.contains(w));
    a_clear && b_clear
}

/// A fresh instance of an effect whose params are renamed with `suffix`,
/// modelling a concurrent invocation with independent arguments.
pub fn instance(effect: &EffectNode, suffix: &str) -> EffectNode {
    let params = effect.body.params();
    let mut renamed = effect.clone();
    renamed.id = format!("{}{}", effect.id, suffix);
    renamed.body = effect.body.rename_params(suffix);
    for inv in &mut renamed.invariants {
        inv.predicate = inv.predicate.rename_params(suffix);
    }
    renamed.symbols = effect
        .symbols
        .iter()
        .map(|(name, ty)| {
            let name = if params.contains(name) {
                format!("{}{}", name, suffix)
            } else {
                name.clone()
            };
            (name, ty.clone())
        })
        .collect();
    renamed
}

/// Whether two concurrent invocations of one effect commute.
pub fn check_self(effect: &EffectNode, settings: &AnalysisSettings) -> CommutativityResult {
    check(&instance(effect, "#1"), &instance(effect, "#2"), settings)
}

/// Decide commutativity of two effects.
pub fn check(a: &EffectNode, b: &EffectNode, settings: &AnalysisSettings) -> CommutativityResult {
    let ta = tier::assess(a, &settings.caps);
    let tb = tier::assess(b, &settings.caps);
    let tier = ta.tier.max(tb.tier);

    if !tier.is_decidable() {
        METRICS.inc_undecidable();
        let heuristic = heuristic::estimate(a, b, &ta, &tb);
        debug!(
            a = %a.id,
            b = %b.id,
            idiom = ?heuristic.idiom,
            confidence = heuristic.confidence,
            "pair outside the decidable tiers"
        );
        return CommutativityResult::Undecidable { heuristic };
    }

    let result = decide(a, b, &ta, &tb, tier, settings);
    debug!(a = %a.id, b = %b.id, %tier, result = result.label(), "commutativity decided");
    result
}

fn decide(
    a: &EffectNode,
    b: &EffectNode,
    ta: &TierAssessment,
    tb: &TierAssessment,
    tier: Tier,
    settings: &AnalysisSettings,
) -> CommutativityResult {
    let commutes = |basis| CommutativityResult::Commutes { tier, basis };

    if independent(a, b) {
        return commutes(Basis::DisjointFootprint);
    }
    let identity = |e: &EffectNode, t: &TierAssessment| {
        !e.is_read() && t.constant == Some(ConstantShape::Identity)
    };
    if identity(a, ta) || identity(b, tb) {
        return commutes(Basis::Identity);
    }

    let same_key = a.writes().is_some() && a.writes() == b.writes();
    if !a.is_read() && !b.is_read() && same_key {
        if ta.constant == Some(ConstantShape::Constant)
            && tb.constant == Some(ConstantShape::Constant)
            && search::normal_forms_agree(a, b)
        {
            return commutes(Basis::ConstantEquality);
        }
        if let (Some((x, _)), Some((y, _))) = (&ta.accumulator, &tb.accumulator) {
            if x == y {
                return commutes(Basis::OperatorAlgebra { accumulator: *x });
            }
        }
        if ta.tier == Tier::Relational && tb.tier == Tier::Relational {
            return relational_pair(a, b, settings);
        }
    }

    if search::normal_forms_agree(a, b) {
        return commutes(Basis::NormalForm);
    }
    refute(a, b, tier, settings, Basis::NormalFormMismatch)
}

fn refute(
    a: &EffectNode,
    b: &EffectNode,
    tier: Tier,
    settings: &AnalysisSettings,
    fallback: Basis,
) -> CommutativityResult {
    let basis = match search::find_counterexample(a, b, settings.counterexample_samples) {
        Some(witness) => Basis::Refuted { witness },
        None => fallback,
    };
    CommutativityResult::DoesNotCommute { tier, basis }
}

fn relational_pair(a: &EffectNode, b: &EffectNode, settings: &AnalysisSettings) -> CommutativityResult {
    let tier = Tier::Relational;
    match relational::decide(a, b) {
        RelVerdict::Commutes { rule } => CommutativityResult::Commutes {
            tier,
            basis: Basis::Relational { rule },
        },
        RelVerdict::Conflict { rule, model } => {
            let confirmed = model.and_then(|m| {
                let (state, params) = relational::model_inputs(&m, a, b);
                search::confirm(a, b, state, params)
            });
            match confirmed {
                Some(witness) => CommutativityResult::DoesNotCommute {
                    tier,
                    basis: Basis::Refuted { witness },
                },
                None => refute(a, b, tier, settings, Basis::Relational { rule }),
            }
        }
        RelVerdict::Unknown { rule, reason } => refute(
            a,
            b,
            tier,
            settings,
            Basis::Inconclusive {
                reason: format!("{}: {}", rule, reason),
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{parse, RawOperationSpec, SpecFormat};

    fn effects(yaml: &str) -> Vec<EffectNode> {
        let raw = RawOperationSpec::from_text(yaml, SpecFormat::Yaml).unwrap();
        parse(&raw, 64).unwrap().effects
    }

    fn pair(state: &str, params: &str, a: (&str, &str, &str), b: (&str, &str, &str)) -> Vec<EffectNode> {
        effects(&format!(
            r#"
name: t
state: {{{}}}
params: {{{}}}
effects:
  - {{name: a, key_pattern: "{}", kind: {}, body: "{}"}}
  - {{name: b, key_pattern: "{}", kind: {}, body: "{}"}}
"#,
            state, params, a.0, a.1, a.2, b.0, b.1, b.2
        ))
    }

    fn settings() -> AnalysisSettings {
        AnalysisSettings::default()
    }

    #[test]
    fn test_counter_increments_commute_by_algebra() {
        let e = pair("c: int", "n: int", ("c", "increment", "self + n"), ("c", "increment", "self + 1"));
        let r = check(&e[0], &e[1], &settings());
        assert_eq!(
            r,
            CommutativityResult::Commutes {
                tier: Tier::Semilattice,
                basis: Basis::OperatorAlgebra {
                    accumulator: Accumulator::Additive
                }
            }
        );
    }

    #[test]
    fn test_disjoint_keys_commute() {
        let e = pair("x: int, y: int", "", ("x", "assign", "5"), ("y", "assign", "self * 2"));
        let r = check(&e[0], &e[1], &settings());
        assert!(matches!(
            r,
            CommutativityResult::Commutes {
                basis: Basis::DisjointFootprint,
                ..
            }
        ));
    }

    #[test]
    fn test_different_constants_are_refuted() {
        let e = pair("x: int", "", ("x", "assign", "1"), ("x", "assign", "2"));
        let r = check(&e[0], &e[1], &settings());
        let w = r.witness().expect("witness");
        assert_ne!(w.a_then_b["x"], w.b_then_a["x"]);
    }

    #[test]
    fn test_equal_constants_commute() {
        let e = pair("x: int", "", ("x", "assign", "1 + 1"), ("x", "assign", "2"));
        assert!(matches!(
            check(&e[0], &e[1], &settings()),
            CommutativityResult::Commutes {
                basis: Basis::ConstantEquality,
                ..
            }
        ));
    }

    #[test]
    fn test_add_and_double_do_not_commute() {
        let e = pair("x: int", "", ("x", "assign", "self + 1"), ("x", "assign", "self * 2"));
        let r = check(&e[0], &e[1], &settings());
        assert!(!r.commutes());
        assert!(r.witness().is_some());
    }

    #[test]
    fn test_scaling_commutes_by_normal_form() {
        let e = pair("x: int", "", ("x", "assign", "self * 2"), ("x", "assign", "self * 3"));
        assert!(matches!(
            check(&e[0], &e[1], &settings()),
            CommutativityResult::Commutes {
                tier: Tier::Algebraic,
                basis: Basis::NormalForm
            }
        ));
    }

    #[test]
    fn test_read_of_written_key_is_refuted() {
        let e = pair("x: int", "", ("x", "read", "x"), ("x", "increment", "self + 1"));
        let r = check(&e[0], &e[1], &settings());
        assert!(r.witness().is_some());
    }

    #[test]
    fn test_opaque_body_is_undecidable() {
        let e = effects(
            r#"
name: t
state: {x: int}
opaque: [hash]
effects:
  - {name: a, key_pattern: x, kind: assign, body: "hash(self)"}
  - {name: b, key_pattern: x, kind: assign, body: "self + 1"}
"#,
        );
        match check(&e[0], &e[1], &settings()) {
            CommutativityResult::Undecidable { heuristic } => {
                assert_eq!(heuristic.tier, Tier::General);
                assert_eq!(heuristic.idiom, Idiom::NoIdiom);
                assert!(!heuristic.likely_commutes);
            }
            other => panic!("expected undecidable, got {:?}", other),
        }
    }

    #[test]
    fn test_accumulating_opaque_operands_is_a_likely_idiom() {
        let e = effects(
            r#"
name: t
state: {x: int}
params: {v: int}
opaque: [score]
effects:
  - {name: a, key_pattern: x, kind: increment, body: "self + score(v)"}
"#,
        );
        match check_self(&e[0], &settings()) {
            CommutativityResult::Undecidable { heuristic } => {
                assert_eq!(heuristic.idiom, Idiom::AccumulateIntoSelf);
                assert!(heuristic.likely_commutes);
            }
            other => panic!("expected undecidable, got {:?}", other),
        }
    }

    #[test]
    fn test_self_check_renames_params() {
        let e = pair("x: int", "v: int", ("x", "assign", "v"), ("x", "assign", "v"));
        let r = check_self(&e[0], &settings());
        // Two concurrent last-writer assignments with independent arguments.
        assert!(r.witness().is_some());
    }

    #[test]
    fn test_insert_and_disjoint_delete_commute() {
        let e = effects(
            r#"
name: t
state: {orders: "relation<id:int,qty:nat>"}
params: {id: int}
effects:
  - {name: a, key_pattern: orders, kind: insert, body: "insert(self, row(id: id, qty: 1))"}
  - {name: b, key_pattern: orders, kind: delete_where, body: "delete_where(self, it.qty > 5)"}
"#,
        );
        assert!(matches!(
            check(&e[0], &e[1], &settings()),
            CommutativityResult::Commutes {
                tier: Tier::Relational,
                basis: Basis::Relational { .. }
            }
        ));
    }

    #[test]
    fn test_insert_and_matching_delete_are_refuted_with_a_model() {
        let e = effects(
            r#"
name: t
state: {orders: "relation<id:int,qty:nat>"}
params: {id: int}
effects:
  - {name: a, key_pattern: orders, kind: insert, body: "insert(self, row(id: id, qty: 1))"}
  - {name: b, key_pattern: orders, kind: delete_where, body: "delete_where(self, it.id == 7)"}
"#,
        );
        let r = check(&e[0], &e[1], &settings());
        let w = r.witness().expect("witness");
        assert_eq!(w.params["id"], crate::model::Value::Int(7));
    }

    #[test]
    fn test_updates_of_distinct_columns_commute() {
        let e = effects(
            r#"
name: t
state: {orders: "relation<id:int,qty:nat,open:bool>"}
effects:
  - {name: a, key_pattern: orders, kind: update_where, body: "update_where(self, it.id == 1, set(qty, 0))"}
  - {name: b, key_pattern: orders, kind: update_where, body: "update_where(self, it.id == 2, set(open, false))"}
"#,
        );
        assert!(check(&e[0], &e[1], &settings()).commutes());
    }

    #[test]
    fn test_independence_is_symmetric() {
        let e = pair("x: int, y: int", "", ("x", "assign", "y"), ("y", "increment", "self + 1"));
        assert!(!independent(&e[0], &e[1]));
        assert!(!independent(&e[1], &e[0]));
    }
}
