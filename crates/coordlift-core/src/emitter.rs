//! Protocol emitter.
//!
//! Turns a plan into a [`ProtocolDescriptor`]: every existential effect is
//! routed to the merge store, every other effect to the consensus channel.
//! Emission is pure and deterministic. [`ProtocolDescriptor::bind`] pairs a
//! descriptor with concrete capabilities without executing anything.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability::{AgreedValue, ConsensusChannel, MergeStore, Proposal};
use crate::catalog::TransformId;
use crate::classifier::{
    AgreementRequirement, ClassifiedEffect, ExistentialProof, VerificationVerdict, WitnessRule,
};
use crate::commutativity::{tier, Accumulator};
use crate::config::{AnalysisSettings, FaultModel};
use crate::cost::CostVector;
use crate::error::RouteError;
use crate::model::EffectKind;
use crate::obs;
use crate::planner::Plan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Merge,
    Consensus,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Merge => write!(f, "merge"),
            ExecutionMode::Consensus => write!(f, "consensus"),
        }
    }
}

/// How a merge-routed effect is expected to be joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeHint {
    Counter,
    MaxRegister,
    MinRegister,
    #[serde(rename = "g-set")]
    GrowSet,
    #[serde(rename = "2p-set")]
    RemoveSet,
    Flag,
    /// Row-level set of a relation.
    RelationSet,
    /// Observation served from a snapshot.
    Snapshot,
    /// Single owner per shard key.
    OwnedShard,
    /// Writes pre-allocated per replica and flushed in batches.
    Escrow,
    /// Executed optimistically, rolled back on conflict.
    Speculative,
    /// Invariant relaxed to eventual.
    Eventual,
    /// Whole-state join.
    StateMerge,
}

impl MergeHint {
    fn from_accumulator(acc: Accumulator) -> MergeHint {
        match acc {
            Accumulator::Additive => MergeHint::Counter,
            Accumulator::Max => MergeHint::MaxRegister,
            Accumulator::Min => MergeHint::MinRegister,
            Accumulator::Union => MergeHint::GrowSet,
            Accumulator::Remove => MergeHint::RemoveSet,
            Accumulator::And | Accumulator::Or => MergeHint::Flag,
        }
    }

    fn from_transform(t: &str) -> Option<MergeHint> {
        match t.parse::<TransformId>().ok()? {
            TransformId::WeakenConsistency => Some(MergeHint::Eventual),
            TransformId::ShardByKey => Some(MergeHint::OwnedShard),
            TransformId::CacheRead => Some(MergeHint::Snapshot),
            TransformId::BatchWrites => Some(MergeHint::Escrow),
            TransformId::SpeculativeExecute => Some(MergeHint::Speculative),
            TransformId::RecursiveDecompose => None,
        }
    }

    /// Hint for an existential effect.
    pub fn for_effect(c: &ClassifiedEffect) -> MergeHint {
        if let VerificationVerdict::Existential {
            proof: ExistentialProof::Witness {
                rule: WitnessRule::Transform { transform },
            },
        } = &c.verdict
        {
            if let Some(hint) = MergeHint::from_transform(transform) {
                return hint;
            }
        }
        let e = &c.effect;
        if e.is_read() {
            return MergeHint::Snapshot;
        }
        if let Some((acc, _)) = tier::accumulator(&e.body, &e.key.name) {
            return MergeHint::from_accumulator(acc);
        }
        match e.kind {
            EffectKind::Insert | EffectKind::DeleteWhere | EffectKind::UpdateWhere => {
                MergeHint::RelationSet
            }
            _ => MergeHint::StateMerge,
        }
    }
}

impl fmt::Display for MergeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorEntry {
    pub effect_ref: String,
    pub mode: ExecutionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_hint: Option<MergeHint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agreement: Option<AgreementRequirement>,
}

/// Execution routing for one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolDescriptor {
    pub operation: String,
    /// Merge-routed entries first, then consensus-routed, each in ordinal
    /// order.
    pub effects: Vec<DescriptorEntry>,
    pub lifting_fraction: f64,
    pub cost: CostVector,
    pub fault_model: FaultModel,
    pub transforms: Vec<TransformId>,
}

/// Build the descriptor for `plan`.
pub fn emit(operation: &str, plan: &Plan, settings: &AnalysisSettings) -> ProtocolDescriptor {
    let d = &plan.decomposition;
    let default_agreement = AgreementRequirement::for_settings(settings);

    let merge = d.existential_part().iter().map(|c| DescriptorEntry {
        effect_ref: c.effect.id.clone(),
        mode: ExecutionMode::Merge,
        merge_hint: Some(MergeHint::for_effect(c)),
        agreement: None,
    });
    let consensus = d.universal_part().iter().map(|c| {
        let agreement = match &c.verdict {
            VerificationVerdict::Universal { agreement, .. } => *agreement,
            _ => default_agreement,
        };
        DescriptorEntry {
            effect_ref: c.effect.id.clone(),
            mode: ExecutionMode::Consensus,
            merge_hint: None,
            agreement: Some(agreement),
        }
    });
    let effects: Vec<DescriptorEntry> = merge.chain(consensus).collect();

    let descriptor = ProtocolDescriptor {
        operation: operation.to_string(),
        effects,
        lifting_fraction: d.lifting_fraction(),
        cost: plan.cost,
        fault_model: settings.fault_model,
        transforms: plan.transforms(),
    };
    obs::emit_descriptor_emitted(
        operation,
        descriptor.count(ExecutionMode::Merge),
        descriptor.count(ExecutionMode::Consensus),
        descriptor.lifting_fraction,
    );
    descriptor
}

impl ProtocolDescriptor {
    pub fn count(&self, mode: ExecutionMode) -> usize {
        self.effects.iter().filter(|e| e.mode == mode).count()
    }

    pub fn entry(&self, effect_ref: &str) -> Option<&DescriptorEntry> {
        self.effects.iter().find(|e| e.effect_ref == effect_ref)
    }

    /// Pair every entry with the capability its mode selects.
    pub fn bind(
        &self,
        merge: Arc<dyn MergeStore>,
        consensus: Arc<dyn ConsensusChannel>,
    ) -> RoutingTable {
        let routes = self
            .effects
            .iter()
            .map(|e| {
                let backend = match e.mode {
                    ExecutionMode::Merge => merge.name().to_string(),
                    ExecutionMode::Consensus => consensus.name().to_string(),
                };
                (
                    e.effect_ref.clone(),
                    Route {
                        effect_ref: e.effect_ref.clone(),
                        mode: e.mode,
                        backend,
                    },
                )
            })
            .collect();
        RoutingTable {
            routes,
            merge,
            consensus,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub effect_ref: String,
    pub mode: ExecutionMode,
    /// Name of the bound capability.
    pub backend: String,
}

/// A descriptor bound to concrete capabilities.
pub struct RoutingTable {
    routes: BTreeMap<String, Route>,
    merge: Arc<dyn MergeStore>,
    consensus: Arc<dyn ConsensusChannel>,
}

impl fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingTable")
            .field("routes", &self.routes)
            .field("merge", &self.merge.name())
            .field("consensus", &self.consensus.name())
            .finish()
    }
}

impl RoutingTable {
    pub fn route(&self, effect_ref: &str) -> Option<&Route> {
        self.routes.get(effect_ref)
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }

    fn expect_mode(&self, effect_ref: &str, mode: ExecutionMode) -> Result<(), RouteError> {
        let route = self
            .route(effect_ref)
            .ok_or_else(|| RouteError::UnknownEffect(effect_ref.to_string()))?;
        if route.mode != mode {
            return Err(RouteError::WrongMode {
                effect_ref: effect_ref.to_string(),
                mode: route.mode.to_string(),
            });
        }
        Ok(())
    }

    /// Forward a replica merge for a merge-routed effect.
    pub async fn merge(
        &self,
        effect_ref: &str,
        local: Value,
        remote: Value,
    ) -> Result<Value, RouteError> {
        self.expect_mode(effect_ref, ExecutionMode::Merge)?;
        Ok(self.merge.merge(local, remote).await)
    }

    /// Forward a proposal for a consensus-routed effect.
    pub async fn agree(&self, effect_ref: &str, value: Value) -> Result<AgreedValue, RouteError> {
        self.expect_mode(effect_ref, ExecutionMode::Consensus)?;
        let agreed = self
            .consensus
            .agree(Proposal {
                effect_ref: effect_ref.to_string(),
                value,
            })
            .await?;
        Ok(agreed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{MemoryConsensusChannel, SemilatticeMergeStore};
    use crate::decompose::decompose;
    use crate::model::{parse, RawOperationSpec, SpecFormat};
    use crate::planner::Planner;
    use serde_json::json;

    const SOCIAL: &str = r#"
name: social
state: {views: nat, high: int, tags: "set<string>", leader: int}
params: {id: int, score: int}
effects:
  - {name: bump, key_pattern: views, kind: increment, body: "self + 1"}
  - {name: best, key_pattern: high, kind: max, body: "max(self, score)"}
  - {name: tag, key_pattern: tags, kind: set_add, body: "add(self, \"new\")"}
  - {name: elect, key_pattern: leader, kind: assign, body: "id", invariant: "forall replica: unique(leader)"}
"#;

    fn baseline() -> (Plan, AnalysisSettings) {
        let settings = AnalysisSettings::default();
        let spec = parse(
            &RawOperationSpec::from_text(SOCIAL, SpecFormat::Yaml).unwrap(),
            64,
        )
        .unwrap();
        let d = decompose(&spec, &settings);
        let plan = Planner::default()
            .plan(&d, 0.0, &CostVector::ZERO, 0)
            .plan()
            .clone();
        (plan, settings)
    }

    #[test]
    fn test_routes_by_partition() {
        let (plan, settings) = baseline();
        let desc = emit("social", &plan, &settings);
        assert_eq!(desc.count(ExecutionMode::Merge), 3);
        assert_eq!(desc.count(ExecutionMode::Consensus), 1);
        assert!((desc.lifting_fraction - 0.75).abs() < 1e-12);
        assert!(desc.transforms.is_empty());
        assert!(desc.cost.is_zero());

        let elect = desc.entry("elect").unwrap();
        assert_eq!(elect.mode, ExecutionMode::Consensus);
        assert!(elect.merge_hint.is_none());
        assert_eq!(elect.agreement.unwrap().quorum, 2);
    }

    #[test]
    fn test_merge_hints_follow_accumulators() {
        let (plan, settings) = baseline();
        let desc = emit("social", &plan, &settings);
        assert_eq!(desc.entry("bump").unwrap().merge_hint, Some(MergeHint::Counter));
        assert_eq!(desc.entry("best").unwrap().merge_hint, Some(MergeHint::MaxRegister));
        assert_eq!(desc.entry("tag").unwrap().merge_hint, Some(MergeHint::GrowSet));
    }

    #[test]
    fn test_emission_is_deterministic() {
        let (plan, settings) = baseline();
        let a = serde_json::to_string(&emit("social", &plan, &settings)).unwrap();
        let b = serde_json::to_string(&emit("social", &plan, &settings)).unwrap();
        assert_eq!(a, b);
        assert!(a.contains("\"mode\":\"merge\""));
        assert!(a.contains("\"merge_hint\":\"g-set\""));
    }

    #[test]
    fn test_hint_display() {
        assert_eq!(MergeHint::MaxRegister.to_string(), "max-register");
        assert_eq!(MergeHint::RemoveSet.to_string(), "2p-set");
    }

    #[tokio::test]
    async fn test_bound_table_forwards_to_capabilities() {
        let (plan, settings) = baseline();
        let desc = emit("social", &plan, &settings);
        let store = Arc::new(SemilatticeMergeStore::new());
        let channel = Arc::new(MemoryConsensusChannel::new(3, 2));
        let table = desc.bind(store.clone(), channel.clone());

        assert_eq!(table.route("bump").unwrap().backend, "semilattice");
        assert_eq!(table.route("elect").unwrap().backend, "memory");
        assert_eq!(table.routes().count(), 4);

        let merged = table.merge("bump", json!(3), json!(5)).await.unwrap();
        assert_eq!(merged, json!(5));
        let agreed = table.agree("elect", json!(7)).await.unwrap();
        assert_eq!(agreed.round, 1);
        assert_eq!(store.merges(), 1);
        assert_eq!(channel.log().len(), 1);
    }

    #[tokio::test]
    async fn test_bound_table_rejects_wrong_mode() {
        let (plan, settings) = baseline();
        let table = emit("social", &plan, &settings).bind(
            Arc::new(SemilatticeMergeStore::new()),
            Arc::new(MemoryConsensusChannel::new(3, 2)),
        );
        let err = table.agree("bump", json!(1)).await.unwrap_err();
        assert!(matches!(err, RouteError::WrongMode { .. }));
        let err = table.merge("ghost", json!(1), json!(2)).await.unwrap_err();
        assert_eq!(err, RouteError::UnknownEffect("ghost".to_string()));
    }
}
