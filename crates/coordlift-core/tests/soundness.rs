//! Commutativity soundness: every pair the detector proves commutative is
//! replayed in both orders with the reference interpreter over a grid of
//! concrete states and arguments.

use std::collections::BTreeMap;

use coordlift_core::commutativity::{instance, search};
use coordlift_core::model::eval::{self, Bindings, Value};
use coordlift_core::model::ValueType;
use coordlift_core::{check, parse_spec, AnalysisSettings, EffectNode, SpecFormat};

const CORPUS: &str = r#"
name: corpus
state:
  x: int
  n: nat
  s: "set<string>"
  flag: bool
  orders: "relation<id:int,qty:int>"
params: {v: int, w: nat, name: string, id: int, q: int}
effects:
  - {name: inc_v, key_pattern: x, kind: increment, body: "self + v"}
  - {name: inc_1, key_pattern: x, kind: increment, body: "self + 1"}
  - {name: dec_1, key_pattern: x, kind: decrement, body: "self - 1"}
  - {name: raise, key_pattern: x, kind: max, body: "max(self, v)"}
  - {name: lower, key_pattern: x, kind: min, body: "min(self, v)"}
  - {name: set_3, key_pattern: x, kind: assign, body: "3"}
  - {name: set_v, key_pattern: x, kind: assign, body: "v"}
  - {name: keep, key_pattern: x, kind: assign, body: "self"}
  - {name: double, key_pattern: x, kind: update, body: "self * 2"}
  - {name: take, key_pattern: n, kind: assign, body: "if self >= w then self - w else self"}
  - {name: grow, key_pattern: n, kind: increment, body: "self + w"}
  - {name: copy, key_pattern: n, kind: assign, body: "if x >= 0 then x else 0"}
  - {name: tag, key_pattern: s, kind: set_add, body: "add(self, name)"}
  - {name: untag, key_pattern: s, kind: set_remove, body: "remove(self, name)"}
  - {name: seal, key_pattern: flag, kind: assign, body: "self || size(s) > 1"}
  - {name: put, key_pattern: orders, kind: insert, body: "insert(self, row(id: id, qty: q))"}
  - {name: purge, key_pattern: orders, kind: delete_where, body: "delete_where(self, it.qty <= 0)"}
  - {name: drop_id, key_pattern: orders, kind: delete_where, body: "delete_where(self, it.id == id)"}
  - {name: restock, key_pattern: orders, kind: update_where, body: "update_where(self, it.id == id, set(qty, q))"}
  - {name: peek_x, key_pattern: x, kind: read, body: "x"}
  - {name: peek_s, key_pattern: s, kind: read, body: "size(s)"}
"#;

const GRID_LIMIT: u64 = 2048;

fn corpus() -> Vec<EffectNode> {
    parse_spec(CORPUS, SpecFormat::Yaml, 64).unwrap().effects
}

/// Apply `first` then `second`; observations are recorded under the
/// observing effect's id.
fn run(first: &EffectNode, second: &EffectNode, state: &Bindings, params: &Bindings) -> Option<Bindings> {
    let mut out = state.clone();
    let mut seen = BTreeMap::new();
    for e in [first, second] {
        if e.is_read() {
            seen.insert(e.id.clone(), eval::eval(&e.body, &out, params).ok()?);
        }
        out = eval::apply(e, &out, params).ok()?;
    }
    out.extend(seen);
    Some(out)
}

fn grid(a: &EffectNode, b: &EffectNode) -> Vec<(Bindings, Bindings)> {
    let mut symbols: BTreeMap<String, ValueType> = a.symbols.clone();
    symbols.extend(b.symbols.clone());
    let params: Vec<String> = a
        .body
        .params()
        .union(&b.body.params())
        .cloned()
        .collect();
    let domains: Vec<(String, Vec<Value>)> = symbols
        .into_iter()
        .map(|(name, ty)| {
            let values = search::samples(&ty);
            (name, values)
        })
        .collect();
    let total: u64 = domains
        .iter()
        .map(|(_, d)| d.len().max(1) as u64)
        .product::<u64>()
        .min(GRID_LIMIT);

    (0..total)
        .map(|i| {
            let mut index = i;
            let mut state = Bindings::new();
            let mut args = Bindings::new();
            for (name, domain) in &domains {
                let len = domain.len() as u64;
                let v = domain[(index % len) as usize].clone();
                index /= len;
                if params.contains(name) {
                    args.insert(name.clone(), v);
                } else {
                    state.insert(name.clone(), v);
                }
            }
            (state, args)
        })
        .collect()
}

#[test]
fn test_every_proven_pair_commutes_concretely() {
    let settings = AnalysisSettings::default();
    let effects = corpus();
    let mut proven = 0;
    for a in &effects {
        for b in &effects {
            let (a1, b2) = (instance(a, "#1"), instance(b, "#2"));
            let result = check(&a1, &b2, &settings);
            if !result.commutes() {
                continue;
            }
            proven += 1;
            for (state, args) in grid(&a1, &b2) {
                let (Some(ab), Some(ba)) = (run(&a1, &b2, &state, &args), run(&b2, &a1, &state, &args))
                else {
                    continue;
                };
                assert_eq!(
                    ab, ba,
                    "{} / {} claimed {:?} but diverge on state {:?} args {:?}",
                    a.id, b.id, result, state, args
                );
            }
        }
    }
    // The corpus is built so that a good share of pairs is provable.
    assert!(proven > 50, "only {} pairs proven", proven);
}

#[test]
fn test_refutations_carry_replayable_witnesses() {
    let settings = AnalysisSettings::default();
    let effects = corpus();
    let mut refuted = 0;
    for a in &effects {
        for b in &effects {
            let (a1, b2) = (instance(a, "#1"), instance(b, "#2"));
            if let Some(w) = check(&a1, &b2, &settings).witness() {
                refuted += 1;
                let ab = run(&a1, &b2, &w.state, &w.params);
                let ba = run(&b2, &a1, &w.state, &w.params);
                assert!(ab.is_some() && ba.is_some());
                assert_ne!(ab, ba, "{} / {} witness does not reproduce", a.id, b.id);
            }
        }
    }
    assert!(refuted > 0);
}

#[test]
fn test_no_decidable_pair_is_left_undecidable() {
    let settings = AnalysisSettings::default();
    let effects = corpus();
    for a in &effects {
        for b in &effects {
            let r = check(&instance(a, "#1"), &instance(b, "#2"), &settings);
            assert!(r.tier().is_decidable(), "{} / {} -> {:?}", a.id, b.id, r);
        }
    }
}
