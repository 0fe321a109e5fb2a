//! External collaborator capabilities.
//!
//! The engine never executes a descriptor; it only routes effects to one of
//! two capabilities supplied by the host:
//! - `MergeStore`: joins two replica states, assumed commutative,
//!   associative and idempotent for every effect routed to it
//! - `ConsensusChannel`: agrees on a proposal with the fault-model
//!   appropriate guarantee
//!
//! In-memory implementations are provided for tests and dry runs.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::classifier::AgreementRequirement;
pub use crate::error::AgreementFailed;

/// A value proposed for agreement on behalf of one effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub effect_ref: String,
    pub value: Value,
}

/// The value a consensus round settled on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgreedValue {
    pub value: Value,
    pub round: u64,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MergeStore: Send + Sync {
    fn name(&self) -> &str;

    async fn merge(&self, local: Value, remote: Value) -> Value;
}

#[async_trait]
pub trait ConsensusChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn agree(&self, proposal: Proposal) -> Result<AgreedValue, AgreementFailed>;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// SemilatticeMergeStore
// ---------------------------------------------------------------------------

/// Merge store that joins JSON values in a fixed semilattice.
///
/// Numbers take the max, booleans `or`, strings the lexicographic max,
/// arrays the sorted set union, objects are joined key by key and `null` is
/// the bottom element. Values of different shapes resolve to the higher
/// shape in `null < bool < number < string < array < object`.
#[derive(Debug, Default)]
pub struct SemilatticeMergeStore {
    merges: Mutex<u64>,
}

impl SemilatticeMergeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of merges served so far.
    pub fn merges(&self) -> u64 {
        *lock(&self.merges)
    }
}

#[async_trait]
impl MergeStore for SemilatticeMergeStore {
    fn name(&self) -> &str {
        "semilattice"
    }

    async fn merge(&self, local: Value, remote: Value) -> Value {
        *lock(&self.merges) += 1;
        join(local, remote)
    }
}

fn rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn number_cmp(a: &serde_json::Number, b: &serde_json::Number) -> Ordering {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => {
            let x = a.as_f64().unwrap_or(f64::NAN);
            let y = b.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
    }
}

/// Least upper bound of two JSON values.
pub fn join(a: Value, b: Value) -> Value {
    match rank(&a).cmp(&rank(&b)) {
        Ordering::Less => return b,
        Ordering::Greater => return a,
        Ordering::Equal => {}
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => Value::Bool(x || y),
        (Value::Number(x), Value::Number(y)) => {
            if number_cmp(&x, &y) == Ordering::Less {
                Value::Number(y)
            } else {
                Value::Number(x)
            }
        }
        (Value::String(x), Value::String(y)) => Value::String(x.max(y)),
        (Value::Array(x), Value::Array(y)) => {
            let mut seen = BTreeSet::new();
            let mut items: Vec<(String, Value)> = Vec::new();
            for v in x.into_iter().chain(y) {
                let key = v.to_string();
                if seen.insert(key.clone()) {
                    items.push((key, v));
                }
            }
            items.sort_by(|l, r| l.0.cmp(&r.0));
            Value::Array(items.into_iter().map(|(_, v)| v).collect())
        }
        (Value::Object(mut x), Value::Object(y)) => {
            for (k, v) in y {
                let merged = match x.remove(&k) {
                    Some(existing) => join(existing, v),
                    None => v,
                };
                x.insert(k, merged);
            }
            Value::Object(x)
        }
        (a, _) => a,
    }
}

// ---------------------------------------------------------------------------
// MemoryConsensusChannel
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ChannelState {
    reachable: usize,
    rejected: BTreeSet<String>,
    log: Vec<Proposal>,
}

/// Single-process consensus stand-in.
///
/// Agreement succeeds when at least `quorum` replicas are reachable and the
/// effect has not been marked as rejected. Every agreed proposal is appended
/// to a log and gets the next round number.
#[derive(Debug)]
pub struct MemoryConsensusChannel {
    quorum: usize,
    state: Mutex<ChannelState>,
}

impl MemoryConsensusChannel {
    /// All `replicas` reachable, `quorum` answers required.
    pub fn new(replicas: usize, quorum: usize) -> Self {
        Self {
            quorum,
            state: Mutex::new(ChannelState {
                reachable: replicas,
                ..ChannelState::default()
            }),
        }
    }

    pub fn for_requirement(req: &AgreementRequirement) -> Self {
        Self::new(req.replicas, req.quorum)
    }

    pub fn set_reachable(&self, replicas: usize) {
        lock(&self.state).reachable = replicas;
    }

    /// Reject every future proposal for `effect_ref`.
    pub fn reject(&self, effect_ref: &str) {
        lock(&self.state).rejected.insert(effect_ref.to_string());
    }

    /// Agreed proposals in round order.
    pub fn log(&self) -> Vec<Proposal> {
        lock(&self.state).log.clone()
    }
}

#[async_trait]
impl ConsensusChannel for MemoryConsensusChannel {
    fn name(&self) -> &str {
        "memory"
    }

    async fn agree(&self, proposal: Proposal) -> Result<AgreedValue, AgreementFailed> {
        let mut state = lock(&self.state);
        if state.reachable < self.quorum {
            return Err(AgreementFailed::NoQuorum {
                needed: self.quorum,
                got: state.reachable,
            });
        }
        if state.rejected.contains(&proposal.effect_ref) {
            return Err(AgreementFailed::Rejected(proposal.effect_ref));
        }
        let value = proposal.value.clone();
        state.log.push(proposal);
        let round = state.log.len() as u64;
        debug!(round, quorum = self.quorum, "proposal agreed");
        Ok(AgreedValue { value, round })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnalysisSettings, FaultModel};
    use serde_json::json;

    fn samples() -> Vec<Value> {
        vec![
            json!(null),
            json!(3),
            json!(7.5),
            json!(true),
            json!("b"),
            json!([1, 2]),
            json!([2, 3]),
            json!({"a": 1, "s": ["p"]}),
            json!({"a": 4, "b": false, "s": ["q"]}),
        ]
    }

    #[test]
    fn test_join_is_a_semilattice() {
        let vs = samples();
        for a in &vs {
            assert_eq!(join(a.clone(), a.clone()), *a, "idempotent on {}", a);
            for b in &vs {
                assert_eq!(join(a.clone(), b.clone()), join(b.clone(), a.clone()));
                for c in &vs {
                    let left = join(join(a.clone(), b.clone()), c.clone());
                    let right = join(a.clone(), join(b.clone(), c.clone()));
                    assert_eq!(left, right, "associative on {} {} {}", a, b, c);
                }
            }
        }
    }

    #[test]
    fn test_join_specific_shapes() {
        assert_eq!(join(json!(3), json!(9)), json!(9));
        assert_eq!(join(json!(false), json!(true)), json!(true));
        assert_eq!(join(json!([3, 1]), json!([1, 2])), json!([1, 2, 3]));
        assert_eq!(
            join(json!({"n": 1, "s": [1]}), json!({"n": 2, "s": [2]})),
            json!({"n": 2, "s": [1, 2]})
        );
        assert_eq!(join(json!(null), json!("x")), json!("x"));
    }

    #[tokio::test]
    async fn test_merge_store_counts_merges() {
        let store = SemilatticeMergeStore::new();
        let merged = store.merge(json!({"views": 4}), json!({"views": 9})).await;
        assert_eq!(merged, json!({"views": 9}));
        assert_eq!(store.merges(), 1);
        assert_eq!(store.name(), "semilattice");
    }

    #[tokio::test]
    async fn test_consensus_rounds_are_sequential() {
        let channel = MemoryConsensusChannel::new(3, 2);
        for i in 1..=3 {
            let agreed = channel
                .agree(Proposal {
                    effect_ref: "elect".to_string(),
                    value: json!(i),
                })
                .await
                .unwrap();
            assert_eq!(agreed.round, i as u64);
            assert_eq!(agreed.value, json!(i));
        }
        assert_eq!(channel.log().len(), 3);
    }

    #[tokio::test]
    async fn test_consensus_without_quorum_fails() {
        let settings = AnalysisSettings {
            fault_model: FaultModel::Byzantine,
            replicas: 4,
            ..AnalysisSettings::default()
        };
        let channel =
            MemoryConsensusChannel::for_requirement(&AgreementRequirement::for_settings(&settings));
        channel.set_reachable(2);
        let err = channel
            .agree(Proposal {
                effect_ref: "elect".to_string(),
                value: json!(1),
            })
            .await
            .unwrap_err();
        assert_eq!(err, AgreementFailed::NoQuorum { needed: 3, got: 2 });
        assert!(channel.log().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_effect() {
        let channel = MemoryConsensusChannel::new(3, 2);
        channel.reject("elect");
        let err = channel
            .agree(Proposal {
                effect_ref: "elect".to_string(),
                value: json!(1),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AgreementFailed::Rejected(r) if r == "elect"));
    }
}
