//! Composition algebra over transformation sequences.
//!
//! Sequences form a monoid under concatenation with the empty sequence as
//! identity. Application is a guarded left fold: a step whose precondition
//! fails on the current decomposition is a no-op. Concatenation is
//! associative, so `(t1∘t2)∘t3` and `t1∘(t2∘t3)` apply identically, but it
//! is not commutative.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::TransformId;
use crate::config::AnalysisSettings;
use crate::cost::CostVector;
use crate::decompose::Decomposition;

/// A sequence of catalog steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Composite {
    steps: Vec<TransformId>,
}

/// Result of applying a composite.
#[derive(Debug, Clone, PartialEq)]
pub struct Application {
    pub decomposition: Decomposition,
    /// Steps whose precondition held, in order.
    pub applied: Vec<TransformId>,
    /// Sum of the costs of the applied steps.
    pub cost: CostVector,
}

impl Composite {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn single(id: TransformId) -> Self {
        Self { steps: vec![id] }
    }

    pub fn steps(&self) -> &[TransformId] {
        &self.steps
    }

    pub fn is_identity(&self) -> bool {
        self.steps.is_empty()
    }

    /// `self` then `next`.
    pub fn then(&self, next: &Composite) -> Composite {
        let mut steps = self.steps.clone();
        steps.extend_from_slice(&next.steps);
        Composite { steps }
    }

    /// Declared cost of every step, applicable or not.
    pub fn declared_cost(&self) -> CostVector {
        self.steps
            .iter()
            .fold(CostVector::ZERO, |acc, t| acc.add(&t.transformation().cost))
    }

    pub fn apply(&self, d: &Decomposition, settings: &AnalysisSettings) -> Application {
        let mut current = d.clone();
        let mut applied = Vec::new();
        let mut cost = CostVector::ZERO;
        for id in &self.steps {
            let t = id.transformation();
            if let Some(next) = t.apply(&current, settings) {
                current = next;
                applied.push(*id);
                cost = cost.add(&t.cost);
            }
        }
        Application {
            decomposition: current,
            applied,
            cost,
        }
    }

    /// Drop the steps that would be no-ops on `d`.
    pub fn prune(&self, d: &Decomposition, settings: &AnalysisSettings) -> Composite {
        Composite {
            steps: self.apply(d, settings).applied,
        }
    }
}

impl From<Vec<TransformId>> for Composite {
    fn from(steps: Vec<TransformId>) -> Self {
        Self { steps }
    }
}

/// Sequential composition: `t1` first, then `t2`.
pub fn compose(t1: &Composite, t2: &Composite) -> Composite {
    t1.then(t2)
}

/// `t1 <= t2` on `base`: the decomposition `t2` produces is reachable from
/// the one `t1` produces through at most `max_depth` further catalog steps,
/// none of which lowers the lifting fraction.
pub fn precedes(
    t1: &Composite,
    t2: &Composite,
    base: &Decomposition,
    settings: &AnalysisSettings,
    max_depth: usize,
) -> bool {
    let start = t1.apply(base, settings).decomposition;
    let goal = t2.apply(base, settings).decomposition;

    let mut seen: Vec<Decomposition> = vec![start.clone()];
    let mut queue: VecDeque<(Decomposition, usize)> = VecDeque::from([(start, 0)]);
    while let Some((d, depth)) = queue.pop_front() {
        if d == goal {
            return true;
        }
        if depth == max_depth {
            continue;
        }
        for id in TransformId::ALL {
            let Some(next) = id.transformation().apply(&d, settings) else {
                continue;
            };
            if next.lifting_fraction() < d.lifting_fraction() || seen.contains(&next) {
                continue;
            }
            seen.push(next.clone());
            queue.push_back((next, depth + 1));
        }
    }
    false
}
