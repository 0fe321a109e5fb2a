//! Symbolic composition of two effects and the bounded counterexample
//! search used to refute commutativity.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::normalize::normalize;
use crate::model::eval::{self, Bindings, Value};
use crate::model::{EffectNode, Expr, ValueType};

/// Concrete inputs on which the two application orders disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    pub state: Bindings,
    pub params: Bindings,
    pub a_then_b: Bindings,
    pub b_then_a: Bindings,
}

/// Final values of every written key plus every observation, for one
/// application order.
#[derive(Debug, Clone, PartialEq)]
struct Outcome {
    writes: BTreeMap<String, Expr>,
    observations: BTreeMap<String, Expr>,
}

fn substitute_keys(e: &Expr, sigma: &BTreeMap<String, Expr>) -> Expr {
    e.rewrite(&|n| match n {
        Expr::Key { name } => sigma.get(name).cloned(),
        _ => None,
    })
}

fn compose(first: &EffectNode, second: &EffectNode) -> Outcome {
    let mut sigma = BTreeMap::new();
    let mut observations = BTreeMap::new();
    for effect in [first, second] {
        let value = substitute_keys(&effect.body, &sigma);
        match effect.writes() {
            Some(key) => {
                sigma.insert(key.to_string(), value);
            }
            None => {
                observations.insert(effect.id.clone(), value);
            }
        }
    }
    Outcome {
        writes: sigma,
        observations,
    }
}

fn normal(outcome: &Outcome) -> Option<(BTreeMap<String, Expr>, BTreeMap<String, Expr>)> {
    let mut writes = BTreeMap::new();
    for (k, v) in &outcome.writes {
        writes.insert(k.clone(), normalize(v)?);
    }
    let mut observations = BTreeMap::new();
    for (k, v) in &outcome.observations {
        observations.insert(k.clone(), normalize(v)?);
    }
    Some((writes, observations))
}

/// Whether both application orders normalize to the same state and the
/// same observations. Equal normal forms prove commutativity.
pub fn normal_forms_agree(a: &EffectNode, b: &EffectNode) -> bool {
    let ab = compose(a, b);
    let ba = compose(b, a);
    match (normal(&ab), normal(&ba)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Deterministic sample values for a type.
pub fn samples(ty: &ValueType) -> Vec<Value> {
    match ty {
        ValueType::Int | ValueType::Any => [0, 1, -1, 2, 3, 5].into_iter().map(Value::Int).collect(),
        ValueType::Nat => [0, 1, 2, 3, 5].into_iter().map(Value::Int).collect(),
        ValueType::Bool => vec![Value::Bool(false), Value::Bool(true)],
        ValueType::Str => vec![Value::Str("a".to_string()), Value::Str("b".to_string())],
        ValueType::Row(cols) => {
            let first: BTreeMap<String, Value> = cols
                .iter()
                .map(|(c, t)| (c.clone(), pick(t, 0)))
                .collect();
            let second: BTreeMap<String, Value> = cols
                .iter()
                .map(|(c, t)| (c.clone(), pick(t, 1)))
                .collect();
            vec![Value::Row(first), Value::Row(second)]
        }
        ValueType::Set(inner) => {
            let (x, y) = (pick(inner, 0), pick(inner, 1));
            let mut out = vec![Value::Set(BTreeSet::new())];
            out.push(Value::Set([x.clone()].into_iter().collect()));
            out.push(Value::Set([y.clone()].into_iter().collect()));
            out.push(Value::Set([x, y].into_iter().collect()));
            out
        }
    }
}

fn pick(ty: &ValueType, i: usize) -> Value {
    let s = samples(ty);
    s.get(i.min(s.len().saturating_sub(1)))
        .cloned()
        .unwrap_or_else(|| Value::default_for(ty))
}

fn splitmix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn run(first: &EffectNode, second: &EffectNode, state: &Bindings, params: &Bindings) -> Option<Bindings> {
    let mut out = state.clone();
    let mut observed = BTreeMap::new();
    for effect in [first, second] {
        if effect.is_read() {
            observed.insert(
                format!("{}@observed", effect.id),
                eval::eval(&effect.body, &out, params).ok()?,
            );
        }
        out = eval::apply(effect, &out, params).ok()?;
    }
    out.extend(observed);
    Some(out)
}

/// Search a deterministic grid of inputs for a pair of disagreeing orders.
///
/// Enumerates the full grid when it has at most `budget` points, otherwise
/// probes `budget` pseudo-randomly chosen points. Inputs on which either
/// order fails to evaluate are skipped.
pub fn find_counterexample(a: &EffectNode, b: &EffectNode, budget: usize) -> Option<Witness> {
    let mut symbols: BTreeMap<String, ValueType> = a.symbols.clone();
    for (k, t) in &b.symbols {
        symbols.entry(k.clone()).or_insert_with(|| t.clone());
    }
    let params: BTreeSet<String> = a.body.params().union(&b.body.params()).cloned().collect();
    let domains: Vec<(String, Vec<Value>)> = symbols
        .iter()
        .map(|(name, ty)| (name.clone(), samples(ty)))
        .collect();

    let total = domains
        .iter()
        .try_fold(1u64, |acc, (_, d)| acc.checked_mul(d.len().max(1) as u64));
    let exhaustive = matches!(total, Some(t) if t <= budget as u64);
    let count = match total {
        Some(t) if exhaustive => t,
        _ => budget as u64,
    };

    for i in 0..count {
        let mut index = if exhaustive { i } else { splitmix(i) };
        let mut state = Bindings::new();
        let mut param_values = Bindings::new();
        for (name, domain) in &domains {
            let len = domain.len().max(1) as u64;
            let value = domain[(index % len) as usize].clone();
            index /= len;
            if params.contains(name) {
                param_values.insert(name.clone(), value);
            } else {
                state.insert(name.clone(), value);
            }
        }
        let (Some(ab), Some(ba)) = (
            run(a, b, &state, &param_values),
            run(b, a, &state, &param_values),
        ) else {
            continue;
        };
        if ab != ba {
            return Some(Witness {
                state,
                params: param_values,
                a_then_b: ab,
                b_then_a: ba,
            });
        }
    }
    None
}

/// Replay a candidate input and keep it only if the orders disagree.
pub fn confirm(a: &EffectNode, b: &EffectNode, state: Bindings, params: Bindings) -> Option<Witness> {
    let ab = run(a, b, &state, &params)?;
    let ba = run(b, a, &state, &params)?;
    (ab != ba).then_some(Witness {
        state,
        params,
        a_then_b: ab,
        b_then_a: ba,
    })
}
