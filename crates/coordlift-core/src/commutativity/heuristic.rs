//! Idiom matching for pairs outside the decidable tiers.
//!
//! The estimate is deterministic and never a proof: it only tells a human
//! (and the speculation transform) how likely the pair is to commute.

use serde::{Deserialize, Serialize};

use super::tier::{self, Tier, TierAssessment};
use crate::model::EffectNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Idiom {
    /// Both bodies fold an operand into the target with the same operator.
    AccumulateIntoSelf,
    /// Neither effect touches what the other writes.
    DisjointFootprint,
    NoIdiom,
}

impl Idiom {
    fn confidence(self) -> f64 {
        match self {
            Idiom::DisjointFootprint => 0.9,
            Idiom::AccumulateIntoSelf => 0.75,
            Idiom::NoIdiom => 0.1,
        }
    }
}

/// Heuristic verdict attached to an undecidable pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heuristic {
    pub tier: Tier,
    pub reason: String,
    pub idiom: Idiom,
    /// Estimated probability that the pair commutes.
    pub confidence: f64,
    pub likely_commutes: bool,
}

pub(crate) fn estimate(
    a: &EffectNode,
    b: &EffectNode,
    ta: &TierAssessment,
    tb: &TierAssessment,
) -> Heuristic {
    let (tier, reason) = if ta.tier >= tb.tier {
        (ta.tier, format!("{}: {}", a.id, ta.reason))
    } else {
        (tb.tier, format!("{}: {}", b.id, tb.reason))
    };
    let idiom = if super::independent(a, b) {
        Idiom::DisjointFootprint
    } else if same_accumulation(a, b) {
        Idiom::AccumulateIntoSelf
    } else {
        Idiom::NoIdiom
    };
    let confidence = idiom.confidence();
    Heuristic {
        tier,
        reason,
        idiom,
        confidence,
        likely_commutes: confidence >= 0.5,
    }
}

fn same_accumulation(a: &EffectNode, b: &EffectNode) -> bool {
    if a.key.name != b.key.name || a.is_read() || b.is_read() {
        return false;
    }
    match (
        tier::accumulator(&a.body, &a.key.name),
        tier::accumulator(&b.body, &b.key.name),
    ) {
        (Some((x, _)), Some((y, _))) => x == y,
        _ => false,
    }
}
