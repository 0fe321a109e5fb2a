//! Auto-restructure planner.
//!
//! Greedy search in canonical catalog order: rank transformations by
//! `delta_l / cost`, then repeatedly apply the best-ranked one that is
//! applicable, affordable and does not lower the lifting fraction. The
//! search is bounded by `max_steps`, an iteration budget and an optional
//! wall-clock deadline, and always returns a terminal result.

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::catalog::{TransformId, CATALOG};
use crate::config::{AnalysisSettings, EngineConfig, PlannerConfig};
use crate::cost::CostVector;
use crate::decompose::Decomposition;
use crate::error::Result;
use crate::metrics::METRICS;
use crate::model::digest::compute_digest;
use crate::obs;

const EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub transform: TransformId,
    /// Effect the step rewrote.
    pub target: String,
    pub lifting_before: f64,
    pub lifting_after: f64,
    /// Cumulative cost after this step.
    pub cost_after: CostVector,
}

/// An ordered transformation sequence with its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub initial_lifting_fraction: f64,
    pub steps: Vec<PlanStep>,
    pub decomposition: Decomposition,
    pub cost: CostVector,
}

impl Plan {
    fn baseline(d: &Decomposition) -> Self {
        Self {
            initial_lifting_fraction: d.lifting_fraction(),
            steps: Vec::new(),
            decomposition: d.clone(),
            cost: CostVector::ZERO,
        }
    }

    pub fn lifting_fraction(&self) -> f64 {
        self.decomposition.lifting_fraction()
    }

    pub fn transforms(&self) -> Vec<TransformId> {
        self.steps.iter().map(|s| s.transform).collect()
    }

    /// SHA-256 over the canonical JSON form; equal plans have equal digests.
    pub fn digest(&self) -> Result<String> {
        compute_digest(&serde_json::to_value(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxSteps,
    IterationLimit,
    Deadline,
    /// Nothing applicable fits the remaining budget without lowering L.
    NoAffordableStep,
}

/// A transformation whose precondition failed on the input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blocked {
    pub transform: TransformId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlanResult {
    Achieved {
        plan: Plan,
    },
    Partial {
        plan: Plan,
        achieved_l: f64,
        stop: StopReason,
        /// Budget left after the last step.
        remaining: CostVector,
    },
    /// No transformation was applicable at all.
    Infeasible {
        baseline: Plan,
        blocked: Vec<Blocked>,
    },
}

impl PlanResult {
    pub fn plan(&self) -> &Plan {
        match self {
            PlanResult::Achieved { plan } | PlanResult::Partial { plan, .. } => plan,
            PlanResult::Infeasible { baseline, .. } => baseline,
        }
    }

    pub fn is_achieved(&self) -> bool {
        matches!(self, PlanResult::Achieved { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlanResult::Achieved { .. } => "achieved",
            PlanResult::Partial { .. } => "partial",
            PlanResult::Infeasible { .. } => "infeasible",
        }
    }
}

/// Planner limits and ranking weights, copied out of an [`EngineConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Planner {
    pub settings: AnalysisSettings,
    pub limits: PlannerConfig,
    pub weights: CostVector,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

fn remaining(budget: &CostVector, spent: &CostVector) -> CostVector {
    let (b, s) = (budget.components(), spent.components());
    let mut out = [0.0; 6];
    for i in 0..6 {
        out[i] = if b[i] >= f64::MAX {
            f64::MAX
        } else {
            (b[i] - s[i]).max(0.0)
        };
    }
    CostVector::from_components(out)
}

impl Planner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            settings: config.settings(),
            limits: config.planner,
            weights: config.cost_weights,
        }
    }

    /// Catalog ids by descending `delta_l / weighted cost`, ties broken by
    /// canonical id order.
    pub fn ranking(&self) -> Vec<TransformId> {
        let efficiency = |id: TransformId| {
            let t = id.transformation();
            let cost = t.cost.scalar(&self.weights);
            if cost <= EPSILON {
                f64::MAX
            } else {
                t.delta_l / cost
            }
        };
        let mut ids = TransformId::ALL.to_vec();
        ids.sort_by(|a, b| {
            efficiency(*b)
                .partial_cmp(&efficiency(*a))
                .unwrap_or(Ordering::Equal)
                .then(a.cmp(b))
        });
        ids
    }

    /// Failed precondition of every catalog entry on `d`.
    pub fn blocked(&self, d: &Decomposition) -> Vec<Blocked> {
        CATALOG
            .iter()
            .filter_map(|t| {
                t.target(d, &self.settings).err().map(|reason| Blocked {
                    transform: t.id,
                    reason,
                })
            })
            .collect()
    }

    /// Greedy restructuring towards `target_l` within `budget`.
    ///
    /// `target_l` is expected in `[0, 1]`; callers validate it.
    pub fn plan(
        &self,
        d: &Decomposition,
        target_l: f64,
        budget: &CostVector,
        max_steps: usize,
    ) -> PlanResult {
        let started = Instant::now();
        let deadline = self.limits.deadline_ms.map(Duration::from_millis);
        let ranking = self.ranking();
        let mut plan = Plan::baseline(d);
        let mut iterations = 0usize;

        let result = loop {
            if plan.lifting_fraction() + EPSILON >= target_l {
                break PlanResult::Achieved { plan };
            }
            let stop = if plan.steps.len() >= max_steps {
                Some(StopReason::MaxSteps)
            } else if deadline.is_some_and(|limit| started.elapsed() >= limit) {
                Some(StopReason::Deadline)
            } else {
                None
            };
            if let Some(stop) = stop {
                break self.unfinished(d, plan, stop, budget);
            }

            let mut chosen = None;
            let mut exhausted = false;
            for id in &ranking {
                iterations += 1;
                if iterations > self.limits.max_iterations {
                    exhausted = true;
                    break;
                }
                let t = id.transformation();
                let Ok(target) = t.target(&plan.decomposition, &self.settings) else {
                    continue;
                };
                let cost = plan.cost.add(&t.cost);
                if !cost.within(budget) {
                    continue;
                }
                let Some(next) = t.apply(&plan.decomposition, &self.settings) else {
                    continue;
                };
                let before = plan.lifting_fraction();
                if next.lifting_fraction() + EPSILON < before || next == plan.decomposition {
                    continue;
                }
                chosen = Some((*id, target, next, cost));
                break;
            }
            if exhausted {
                break self.unfinished(d, plan, StopReason::IterationLimit, budget);
            }
            let Some((transform, target, next, cost)) = chosen else {
                break self.unfinished(d, plan, StopReason::NoAffordableStep, budget);
            };

            let step = PlanStep {
                transform,
                target,
                lifting_before: plan.lifting_fraction(),
                lifting_after: next.lifting_fraction(),
                cost_after: cost,
            };
            obs::emit_plan_step(
                plan.steps.len() + 1,
                transform.as_str(),
                step.lifting_before,
                step.lifting_after,
            );
            METRICS.inc_plan_steps();
            plan.steps.push(step);
            plan.decomposition = next;
            plan.cost = cost;
        };

        match &result {
            PlanResult::Achieved { .. } => METRICS.inc_plans_achieved(),
            PlanResult::Partial { .. } => METRICS.inc_plans_partial(),
            PlanResult::Infeasible { .. } => METRICS.inc_plans_infeasible(),
        }
        let p = result.plan();
        obs::emit_plan_finished(
            result.label(),
            p.steps.len(),
            p.lifting_fraction(),
            &p.cost.to_string(),
        );
        result
    }

    fn unfinished(
        &self,
        input: &Decomposition,
        plan: Plan,
        stop: StopReason,
        budget: &CostVector,
    ) -> PlanResult {
        if plan.steps.is_empty() {
            let blocked = self.blocked(input);
            if blocked.len() == CATALOG.len() {
                return PlanResult::Infeasible {
                    baseline: plan,
                    blocked,
                };
            }
        }
        PlanResult::Partial {
            achieved_l: plan.lifting_fraction(),
            remaining: remaining(budget, &plan.cost),
            stop,
            plan,
        }
    }

    /// Exhaustive search over the same monotone, affordable plan space.
    ///
    /// Returns the plan with the highest lifting fraction, then the lowest
    /// weighted cost, then the fewest steps. Exponential in `max_steps`;
    /// `max_iterations` bounds the explored nodes.
    pub fn optimal_plan(
        &self,
        d: &Decomposition,
        target_l: f64,
        budget: &CostVector,
        max_steps: usize,
    ) -> Plan {
        let mut best = Plan::baseline(d);
        let mut visited = 0usize;
        self.explore(
            Plan::baseline(d),
            target_l,
            budget,
            max_steps,
            &mut visited,
            &mut best,
        );
        best
    }

    fn better(&self, a: &Plan, b: &Plan) -> bool {
        let (la, lb) = (a.lifting_fraction(), b.lifting_fraction());
        if (la - lb).abs() > EPSILON {
            return la > lb;
        }
        let (ca, cb) = (a.cost.scalar(&self.weights), b.cost.scalar(&self.weights));
        if (ca - cb).abs() > EPSILON {
            return ca < cb;
        }
        a.steps.len() < b.steps.len()
    }

    fn explore(
        &self,
        plan: Plan,
        target_l: f64,
        budget: &CostVector,
        max_steps: usize,
        visited: &mut usize,
        best: &mut Plan,
    ) {
        *visited += 1;
        if self.better(&plan, best) {
            *best = plan.clone();
        }
        if plan.lifting_fraction() + EPSILON >= target_l
            || plan.steps.len() >= max_steps
            || *visited >= self.limits.max_iterations
        {
            return;
        }
        for id in TransformId::ALL {
            let t = id.transformation();
            let Ok(target) = t.target(&plan.decomposition, &self.settings) else {
                continue;
            };
            let cost = plan.cost.add(&t.cost);
            if !cost.within(budget) {
                continue;
            }
            let Some(next) = t.apply(&plan.decomposition, &self.settings) else {
                continue;
            };
            if next.lifting_fraction() + EPSILON < plan.lifting_fraction()
                || next == plan.decomposition
            {
                continue;
            }
            let mut child = plan.clone();
            child.steps.push(PlanStep {
                transform: id,
                target,
                lifting_before: plan.lifting_fraction(),
                lifting_after: next.lifting_fraction(),
                cost_after: cost,
            });
            child.decomposition = next;
            child.cost = cost;
            self.explore(child, target_l, budget, max_steps, visited, best);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompose::decompose;
    use crate::model::{parse, OperationSpec, RawOperationSpec, SpecFormat};

    fn spec(yaml: &str) -> OperationSpec {
        parse(&RawOperationSpec::from_text(yaml, SpecFormat::Yaml).unwrap(), 64).unwrap()
    }

    const STOCK: &str = r#"
name: stock
state: {stock: int, cart: "set<string>", order: int}
params: {n: nat, oid: int}
effects:
  - {name: take, key_pattern: stock, kind: assign, body: "if self >= n then self - n else self", invariant: "self >= 0"}
  - name: checkout
    key_pattern: "order/{user}"
    kind: assign
    body: "if size(cart) > 0 then oid else self"
    invariant: "forall replica: unique(order)"
"#;

    fn cost(spec: &str) -> CostVector {
        CostVector::parse(spec).unwrap()
    }

    #[test]
    fn test_ranking_is_by_efficiency_then_id() {
        let r = Planner::default().ranking();
        assert_eq!(
            r,
            vec![
                TransformId::CacheRead,
                TransformId::WeakenConsistency,
                TransformId::BatchWrites,
                TransformId::ShardByKey,
                TransformId::SpeculativeExecute,
                TransformId::RecursiveDecompose,
            ]
        );
    }

    #[test]
    fn test_unlimited_budget_achieves_full_lifting() {
        let d = decompose(&spec(STOCK), &AnalysisSettings::default());
        let result = Planner::default().plan(&d, 1.0, &CostVector::UNLIMITED, 10);
        assert!(result.is_achieved(), "{:?}", result.label());
        let plan = result.plan();
        assert_eq!(plan.lifting_fraction(), 1.0);
        for step in &plan.steps {
            assert!(step.lifting_after >= step.lifting_before);
        }
    }

    #[test]
    fn test_budget_limits_the_plan() {
        let d = decompose(&spec(STOCK), &AnalysisSettings::default());
        let result = Planner::default().plan(&d, 1.0, &cost("latency=1"), 10);
        match result {
            PlanResult::Partial {
                plan,
                achieved_l,
                stop,
                remaining,
            } => {
                assert_eq!(plan.transforms(), vec![TransformId::BatchWrites]);
                assert_eq!(achieved_l, 0.5);
                assert_eq!(stop, StopReason::NoAffordableStep);
                assert_eq!(remaining.latency, 0.0);
            }
            other => panic!("expected partial, got {}", other.label()),
        }
    }

    #[test]
    fn test_zero_budget_is_partial_not_infeasible() {
        let d = decompose(&spec(STOCK), &AnalysisSettings::default());
        let result = Planner::default().plan(&d, 1.0, &CostVector::ZERO, 10);
        assert!(matches!(
            result,
            PlanResult::Partial {
                stop: StopReason::NoAffordableStep,
                ..
            }
        ));
        assert!(result.plan().steps.is_empty());
    }

    #[test]
    fn test_max_steps_stops_the_search() {
        let d = decompose(&spec(STOCK), &AnalysisSettings::default());
        let result = Planner::default().plan(&d, 1.0, &CostVector::UNLIMITED, 1);
        assert!(matches!(
            result,
            PlanResult::Partial {
                stop: StopReason::MaxSteps,
                ..
            }
        ));
        assert_eq!(result.plan().steps.len(), 1);
    }

    #[test]
    fn test_iteration_limit_is_a_terminal_result() {
        let d = decompose(&spec(STOCK), &AnalysisSettings::default());
        let planner = Planner {
            limits: PlannerConfig {
                max_iterations: 1,
                deadline_ms: None,
            },
            ..Planner::default()
        };
        let result = planner.plan(&d, 1.0, &CostVector::UNLIMITED, 10);
        assert!(matches!(
            result,
            PlanResult::Partial {
                stop: StopReason::IterationLimit,
                ..
            }
        ));
    }

    #[test]
    fn test_plans_are_deterministic() {
        let d = decompose(&spec(STOCK), &AnalysisSettings::default());
        let p = Planner::default();
        let a = p.plan(&d, 1.0, &cost("consistency=1,latency=1"), 5);
        let b = p.plan(&d, 1.0, &cost("consistency=1,latency=1"), 5);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
        assert_eq!(a.plan().digest().unwrap(), b.plan().digest().unwrap());
    }

    #[test]
    fn test_greedy_reaches_half_of_optimal() {
        let d = decompose(&spec(STOCK), &AnalysisSettings::default());
        let p = Planner::default();
        for budget in ["0", "consistency=1", "latency=1", "consistency=1,complexity=1", "unlimited"] {
            let b = cost(budget);
            let greedy = p.plan(&d, 1.0, &b, 6);
            let optimal = p.optimal_plan(&d, 1.0, &b, 6);
            assert!(
                greedy.plan().lifting_fraction() * 2.0 + EPSILON >= optimal.lifting_fraction(),
                "budget {}",
                budget
            );
            assert!(optimal.cost.within(&b));
        }
    }
}
