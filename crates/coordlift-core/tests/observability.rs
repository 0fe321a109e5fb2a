//! Observability tests for the analysis pipeline.
//!
//! Lifecycle events are emitted from inside the crate; these tests drive each
//! emitter and the full pipeline under a capturing subscriber.

use coordlift_core::{
    emit_analysis_started, emit_classification_uncertain, emit_descriptor_emitted,
    emit_effect_classified, emit_plan_finished, emit_plan_step, new_analysis_id, parse_spec,
    AnalysisSpan, CostVector, Engine, SpecFormat, METRICS,
};
use tracing_test::traced_test;

const MIXED: &str = r#"
name: mixed
state: {hits: int, owner: int, score: int}
params: {id: int, x: int}
effects:
  - {name: hit, key_pattern: hits, kind: increment, body: "self + 1"}
  - {name: own, key_pattern: owner, kind: assign, body: "id", invariant: "forall replica: unique(owner)"}
  - name: rescore
    key_pattern: score
    kind: update
    body: "rec f(n) bound 4 = if n <= 0 then 0 else 1 + f(n - 1) in self + f(x)"
"#;

#[traced_test]
#[test]
fn test_emit_analysis_started_logs_operation() {
    emit_analysis_started("a-100", "checkout", 3);
}

#[traced_test]
#[test]
fn test_emit_effect_classified_logs_verdict() {
    emit_effect_classified("checkout.commit", "universal", "uniqueness invariant");
}

/// Uncertain classifications are warnings.
#[traced_test]
#[test]
fn test_emit_classification_uncertain_logs_warning() {
    emit_classification_uncertain("rescore", 0.4, "general recursion");
}

#[traced_test]
#[test]
fn test_emit_plan_events() {
    emit_plan_step(1, "weaken-consistency", 0.5, 0.5);
    emit_plan_finished("partial", 1, 0.5, "consistency=1");
    emit_descriptor_emitted("checkout", 5, 1, 0.83);
}

#[traced_test]
#[test]
fn test_analysis_span_enter_and_drop() {
    let id = new_analysis_id();
    assert!(!id.is_empty());
    let span = AnalysisSpan::enter(&id, "checkout");
    drop(span);
}

#[traced_test]
#[test]
fn test_full_pipeline_emits_without_panicking() {
    let engine = Engine::default();
    let op = parse_spec(MIXED, SpecFormat::Yaml, 64).unwrap();
    let out = engine
        .restructure(&op, 1.0, &CostVector::UNLIMITED, 8)
        .unwrap();
    assert_eq!(out.descriptor.effects.len(), out.result.plan().decomposition.len());
}

/// Counters are process-wide and tests run in parallel, so only growth is
/// asserted.
#[test]
fn test_pipeline_moves_the_counters() {
    let before_analyses = METRICS.analyses();
    let before_effects = METRICS.effects_classified();
    let before_plans =
        METRICS.plans_achieved() + METRICS.plans_partial() + METRICS.plans_infeasible();

    let engine = Engine::default();
    let op = parse_spec(MIXED, SpecFormat::Yaml, 64).unwrap();
    engine
        .restructure(&op, 1.0, &CostVector::ZERO, 4)
        .unwrap();

    assert!(METRICS.analyses() > before_analyses);
    assert!(METRICS.effects_classified() >= before_effects + 3);
    assert!(
        METRICS.plans_achieved() + METRICS.plans_partial() + METRICS.plans_infeasible()
            > before_plans
    );
    METRICS.flush();
}
