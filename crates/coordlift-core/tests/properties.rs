//! Structural properties across a small library of operations.

use coordlift_core::{
    compose, decompose, parse_spec, AnalysisSettings, Composite, CostVector, Decomposition,
    OperationSpec, Planner, SpecFormat, TransformId,
};

const LIBRARY: &[&str] = &[
    r#"
name: wallet
state: {balance: int, limit: int}
params: {amount: nat}
effects:
  - {name: deposit, key_pattern: balance, kind: increment, body: "self + amount"}
  - {name: withdraw, key_pattern: balance, kind: assign, body: "if self >= amount then self - amount else self", invariant: "self >= 0"}
  - {name: audit, key_pattern: balance, kind: read, body: "balance"}
"#,
    r#"
name: checkout
state: {cart: "set<string>", order: int, stock: int}
params: {sku: string, oid: int, n: nat}
effects:
  - {name: add, key_pattern: "cart/{user}", kind: set_add, body: "add(self, sku)"}
  - name: checkout
    key_pattern: "order/{user}"
    kind: assign
    body: "if size(cart) > 0 then oid else self"
    invariant: "forall replica: unique(order)"
  - {name: reserve, key_pattern: stock, kind: decrement, body: "self - n", invariant: "self >= 0"}
"#,
    r#"
name: feed
state: {posts: "relation<id:int,likes:int>", seen: int}
params: {id: int, v: int}
opaque: [rank]
effects:
  - {name: post, key_pattern: posts, kind: insert, body: "insert(self, row(id: id, likes: 0))"}
  - {name: prune, key_pattern: posts, kind: delete_where, body: "delete_where(self, it.likes < 0)"}
  - {name: score, key_pattern: seen, kind: increment, body: "self + rank(v)"}
  - {name: browse, key_pattern: seen, kind: read, body: "seen", consistency: eventual}
"#,
    r#"
name: registry
state: {owner: int, epoch: int}
params: {id: int}
effects:
  - {name: claim, key_pattern: "owner/{slot}", kind: assign, body: "id", invariant: "forall replica: owner >= 0"}
  - {name: tick, key_pattern: epoch, kind: max, body: "max(self, id)"}
  - {name: lookup, key_pattern: owner, kind: read, body: "owner"}
"#,
];

fn library() -> Vec<OperationSpec> {
    LIBRARY
        .iter()
        .map(|doc| parse_spec(doc, SpecFormat::Yaml, 64).unwrap())
        .collect()
}

fn budgets() -> Vec<CostVector> {
    ["0", "consistency=1", "latency=1,staleness=1", "risk=1,complexity=1", "2", "unlimited"]
        .iter()
        .map(|s| CostVector::parse(s).unwrap())
        .collect()
}

fn assert_complete(spec: &OperationSpec, d: &Decomposition) {
    let e = d.existential_part().len();
    let u = d.universal_part().len();
    assert_eq!(e + u, d.len());
    let expected = if d.is_empty() {
        1.0
    } else {
        e as f64 / (e + u) as f64
    };
    assert_eq!(d.lifting_fraction(), expected, "{}", spec.name);
}

#[test]
fn test_decomposition_is_complete() {
    let settings = AnalysisSettings::default();
    for spec in library() {
        let d = decompose(&spec, &settings);
        assert_eq!(d.len(), spec.effects.len(), "{}", spec.name);
        assert_complete(&spec, &d);
        let mut ids: Vec<&str> = d.effects().iter().map(|c| c.effect.id.as_str()).collect();
        ids.sort_unstable();
        let mut expected: Vec<&str> = spec.effects.iter().map(|e| e.id.as_str()).collect();
        expected.sort_unstable();
        assert_eq!(ids, expected);
    }
}

#[test]
fn test_transformations_keep_the_fraction_consistent() {
    let settings = AnalysisSettings::default();
    for spec in library() {
        let d = decompose(&spec, &settings);
        for id in TransformId::ALL {
            if let Some(next) = id.transformation().apply(&d, &settings) {
                assert_complete(&spec, &next);
                assert!(next.len() >= d.len());
            }
        }
    }
}

#[test]
fn test_composition_monoid_laws() {
    let settings = AnalysisSettings::default();
    let identity = Composite::identity();
    for spec in library() {
        let d = decompose(&spec, &settings);
        for t1 in TransformId::ALL {
            let x = Composite::single(t1);
            assert_eq!(compose(&identity, &x), x);
            assert_eq!(compose(&x, &identity), x);
            for t2 in TransformId::ALL {
                for t3 in TransformId::ALL {
                    let (y, z) = (Composite::single(t2), Composite::single(t3));
                    let left = compose(&compose(&x, &y), &z).apply(&d, &settings);
                    let right = compose(&x, &compose(&y, &z)).apply(&d, &settings);
                    assert_eq!(left.decomposition, right.decomposition);
                    assert_eq!(left.cost, right.cost);
                }
            }
        }
    }
}

#[test]
fn test_some_pair_of_transformations_does_not_commute() {
    let settings = AnalysisSettings::default();
    let found = library().iter().any(|spec| {
        let d = decompose(spec, &settings);
        TransformId::ALL.iter().any(|a| {
            TransformId::ALL.iter().any(|b| {
                let ab = Composite::from(vec![*a, *b]).apply(&d, &settings);
                let ba = Composite::from(vec![*b, *a]).apply(&d, &settings);
                ab.decomposition != ba.decomposition
            })
        })
    });
    assert!(found);
}

#[test]
fn test_plans_are_monotone_and_within_budget() {
    let planner = Planner::default();
    for spec in library() {
        let d = decompose(&spec, &planner.settings);
        for budget in budgets() {
            let result = planner.plan(&d, 1.0, &budget, 8);
            let plan = result.plan();
            let mut last = plan.initial_lifting_fraction;
            for step in &plan.steps {
                assert!(step.lifting_before + 1e-12 >= last);
                assert!(step.lifting_after + 1e-12 >= step.lifting_before);
                assert!(step.cost_after.within(&budget));
                last = step.lifting_after;
            }
            assert!(plan.cost.within(&budget));
            assert!(plan.lifting_fraction() + 1e-12 >= plan.initial_lifting_fraction);
        }
    }
}

#[test]
fn test_plans_are_byte_identical_across_runs() {
    let planner = Planner::default();
    for spec in library() {
        let d = decompose(&spec, &planner.settings);
        for budget in budgets() {
            let a = serde_json::to_vec(&planner.plan(&d, 1.0, &budget, 8)).unwrap();
            let b = serde_json::to_vec(&planner.plan(&d, 1.0, &budget, 8)).unwrap();
            assert_eq!(a, b);
        }
    }
}

#[test]
fn test_greedy_never_beats_the_exhaustive_search() {
    // Three steps keep the exhaustive tree far below the iteration cap.
    let planner = Planner::default();
    for spec in library() {
        let d = decompose(&spec, &planner.settings);
        for budget in budgets() {
            let greedy = planner.plan(&d, 1.0, &budget, 3);
            let optimal = planner.optimal_plan(&d, 1.0, &budget, 3);
            let greedy_l = greedy.plan().lifting_fraction();
            assert!(greedy_l + 1e-12 >= d.lifting_fraction());
            assert!(
                optimal.lifting_fraction() + 1e-12 >= greedy_l,
                "{} under {}: greedy {} optimal {}",
                spec.name,
                budget,
                greedy_l,
                optimal.lifting_fraction()
            );
            assert!(optimal.cost.within(&budget));
        }
    }
}
