//! coordlift core library
//!
//! Static analysis that classifies the effects of a distributed operation as
//! coordination-free (routed to a merge) or coordination-requiring (routed to
//! consensus), and restructures operations to lift more of them.

pub mod capability;
pub mod catalog;
pub mod classifier;
pub mod commutativity;
pub mod config;
pub mod cost;
pub mod decompose;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod model;
pub mod obs;
pub mod planner;
pub mod telemetry;

pub use capability::{
    AgreedValue, ConsensusChannel, MemoryConsensusChannel, MergeStore, Proposal,
    SemilatticeMergeStore,
};
pub use catalog::{
    catalog, compose, precedes, Application, Composite, TransformId, TransformInfo, Transformation,
    CATALOG,
};
pub use classifier::{
    classify, classify_all, AgreementRequirement, ClassifiedEffect, ExistentialProof,
    UniversalReason, VerificationVerdict, WitnessRule,
};
pub use commutativity::{check, check_self, Basis, CommutativityResult, Heuristic, Tier, Witness};
pub use config::{AnalysisSettings, Caps, EngineConfig, FaultModel, PlannerConfig};
pub use cost::CostVector;
pub use decompose::{decompose, Decomposition};
pub use emitter::{
    emit, DescriptorEntry, ExecutionMode, MergeHint, ProtocolDescriptor, Route, RoutingTable,
};
pub use engine::{parse_spec, Analysis, Engine, Restructuring};
pub use error::{AgreementFailed, ConfigError, EngineError, ParseError, Result, RouteError};
pub use metrics::METRICS;
pub use model::{load, EffectKind, EffectNode, OperationSpec, RawOperationSpec, SpecFormat};
pub use obs::{
    emit_analysis_started, emit_classification_uncertain, emit_descriptor_emitted,
    emit_effect_classified, emit_plan_finished, emit_plan_step, new_analysis_id, AnalysisSpan,
};
pub use planner::{Blocked, Plan, PlanResult, PlanStep, Planner, StopReason};
pub use telemetry::init_tracing;
