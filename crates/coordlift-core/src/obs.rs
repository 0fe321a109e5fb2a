//! Structured observability hooks for the analysis lifecycle.
//!
//! This module provides:
//! - Analysis-scoped tracing spans via the `AnalysisSpan` RAII guard
//! - Emission functions for lifecycle events: start, classification,
//!   plan steps, plan outcome, descriptor emission
//!
//! Events are emitted at `info!` level, uncertain classifications at
//! `warn!`. Filtering follows `RUST_LOG`.

use tracing::{info, warn};
use uuid::Uuid;

/// RAII guard that enters an analysis-scoped span.
///
/// ```ignore
/// let _span = AnalysisSpan::enter(&analysis_id, "checkout");
/// // every event below carries analysis_id and operation
/// ```
pub struct AnalysisSpan {
    _span: tracing::span::EnteredSpan,
}

impl AnalysisSpan {
    pub fn enter(analysis_id: &str, operation: &str) -> Self {
        let span = tracing::info_span!(
            "coordlift.analysis",
            analysis_id = %analysis_id,
            operation = %operation,
        );
        Self {
            _span: span.entered(),
        }
    }
}

/// Fresh identifier for one analysis run.
pub fn new_analysis_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn emit_analysis_started(analysis_id: &str, operation: &str, effects: usize) {
    info!(
        event = "analysis.started",
        analysis_id = %analysis_id,
        operation = %operation,
        effects = effects,
    );
}

/// Emit event: one effect received its verdict.
pub fn emit_effect_classified(effect_ref: &str, verdict: &str, basis: &str) {
    info!(
        event = "effect.classified",
        effect_ref = %effect_ref,
        verdict = %verdict,
        basis = %basis,
    );
}

/// Emit warning: an effect could not be classified and is routed to
/// consensus conservatively.
pub fn emit_classification_uncertain(effect_ref: &str, confidence: f64, basis: &str) {
    warn!(
        event = "classification.uncertain",
        effect_ref = %effect_ref,
        confidence = confidence,
        basis = %basis,
    );
}

pub fn emit_plan_step(step: usize, transform: &str, lifting_before: f64, lifting_after: f64) {
    info!(
        event = "plan.step",
        step = step,
        transform = %transform,
        lifting_before = lifting_before,
        lifting_after = lifting_after,
    );
}

pub fn emit_plan_finished(outcome: &str, steps: usize, lifting_fraction: f64, cost: &str) {
    info!(
        event = "plan.finished",
        outcome = %outcome,
        steps = steps,
        lifting_fraction = lifting_fraction,
        cost = %cost,
    );
}

pub fn emit_descriptor_emitted(operation: &str, merge: usize, consensus: usize, lifting_fraction: f64) {
    info!(
        event = "descriptor.emitted",
        operation = %operation,
        merge = merge,
        consensus = consensus,
        lifting_fraction = lifting_fraction,
    );
}
