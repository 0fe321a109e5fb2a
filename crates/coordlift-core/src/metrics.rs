//! Global atomic counters for analysis runs.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a CLI invocation).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations and no locking.
pub struct Metrics {
    analyses: AtomicU64,
    effects_classified: AtomicU64,
    undecidable_pairs: AtomicU64,
    plan_steps: AtomicU64,
    plans_achieved: AtomicU64,
    plans_partial: AtomicU64,
    plans_infeasible: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            analyses: AtomicU64::new(0),
            effects_classified: AtomicU64::new(0),
            undecidable_pairs: AtomicU64::new(0),
            plan_steps: AtomicU64::new(0),
            plans_achieved: AtomicU64::new(0),
            plans_partial: AtomicU64::new(0),
            plans_infeasible: AtomicU64::new(0),
        }
    }

    /// Increment the analyses counter by one.
    pub fn inc_analyses(&self) {
        self.analyses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "analyses", "counter incremented");
    }

    /// Increment the effects-classified counter by one.
    pub fn inc_effects_classified(&self) {
        self.effects_classified.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "effects_classified", "counter incremented");
    }

    /// Increment the undecidable-pairs counter by one.
    pub fn inc_undecidable(&self) {
        self.undecidable_pairs.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "undecidable_pairs", "counter incremented");
    }

    /// Increment the plan-steps counter by one.
    pub fn inc_plan_steps(&self) {
        self.plan_steps.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "plan_steps", "counter incremented");
    }

    pub fn inc_plans_achieved(&self) {
        self.plans_achieved.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "plans_achieved", "counter incremented");
    }

    pub fn inc_plans_partial(&self) {
        self.plans_partial.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "plans_partial", "counter incremented");
    }

    pub fn inc_plans_infeasible(&self) {
        self.plans_infeasible.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "plans_infeasible", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            analyses = self.analyses(),
            effects_classified = self.effects_classified(),
            undecidable_pairs = self.undecidable_pairs(),
            plan_steps = self.plan_steps(),
            plans_achieved = self.plans_achieved(),
            plans_partial = self.plans_partial(),
            plans_infeasible = self.plans_infeasible(),
        );
    }

    pub fn analyses(&self) -> u64 {
        self.analyses.load(Ordering::Relaxed)
    }

    pub fn effects_classified(&self) -> u64 {
        self.effects_classified.load(Ordering::Relaxed)
    }

    pub fn undecidable_pairs(&self) -> u64 {
        self.undecidable_pairs.load(Ordering::Relaxed)
    }

    pub fn plan_steps(&self) -> u64 {
        self.plan_steps.load(Ordering::Relaxed)
    }

    pub fn plans_achieved(&self) -> u64 {
        self.plans_achieved.load(Ordering::Relaxed)
    }

    pub fn plans_partial(&self) -> u64 {
        self.plans_partial.load(Ordering::Relaxed)
    }

    pub fn plans_infeasible(&self) -> u64 {
        self.plans_infeasible.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for c in [
            &self.analyses,
            &self.effects_classified,
            &self.undecidable_pairs,
            &self.plan_steps,
            &self.plans_achieved,
            &self.plans_partial,
            &self.plans_infeasible,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}
