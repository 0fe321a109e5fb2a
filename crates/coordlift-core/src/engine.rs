//! Pipeline entry points: load, classify, decompose, restructure, emit.
//!
//! Every call is a stateless unit of work over an immutable
//! [`OperationSpec`]; the only shared data is the static catalog, so batch
//! analysis fans out freely.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::classifier::{self, ClassifiedEffect};
use crate::config::{AnalysisSettings, EngineConfig};
use crate::cost::CostVector;
use crate::decompose::Decomposition;
use crate::emitter::{self, ProtocolDescriptor};
use crate::error::{ConfigError, EngineError, Result};
use crate::metrics::METRICS;
use crate::model::{self, OperationSpec, RawOperationSpec, SpecFormat};
use crate::obs::{self, AnalysisSpan};
use crate::planner::{PlanResult, Planner};

/// Per-effect verdicts for one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub analysis_id: String,
    pub operation: String,
    /// Digest of the canonical input document.
    pub digest: String,
    pub analyzed_at: DateTime<Utc>,
    pub effects: Vec<ClassifiedEffect>,
}

impl Analysis {
    pub fn decomposition(&self) -> Decomposition {
        Decomposition::new(self.effects.clone())
    }

    /// Effects whose verdict is `Unknown`.
    pub fn uncertain(&self) -> impl Iterator<Item = &ClassifiedEffect> {
        self.effects
            .iter()
            .filter(|c| matches!(c.verdict, classifier::VerificationVerdict::Unknown { .. }))
    }
}

/// Plan outcome together with the descriptor of its final decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restructuring {
    pub analysis_id: String,
    pub result: PlanResult,
    pub descriptor: ProtocolDescriptor,
}

/// Parse an operation document held in memory.
pub fn parse_spec(text: &str, format: SpecFormat, recursion_depth_cap: u32) -> Result<OperationSpec> {
    let raw = RawOperationSpec::from_text(text, format)?;
    Ok(model::parse(&raw, recursion_depth_cap)?)
}

#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    /// Build an engine over a validated configuration.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn settings(&self) -> AnalysisSettings {
        self.config.settings()
    }

    pub fn load(&self, path: &Path) -> Result<OperationSpec> {
        model::load(path, self.config.caps.recursion_depth_cap)
    }

    /// Classify every effect of `spec`.
    pub fn analyze(&self, spec: &OperationSpec) -> Analysis {
        let analysis_id = obs::new_analysis_id();
        let _span = AnalysisSpan::enter(&analysis_id, &spec.name);
        obs::emit_analysis_started(&analysis_id, &spec.name, spec.effects.len());
        METRICS.inc_analyses();

        let effects = classifier::classify_all(spec, &self.settings());
        Analysis {
            analysis_id,
            operation: spec.name.clone(),
            digest: spec.digest.clone(),
            analyzed_at: Utc::now(),
            effects,
        }
    }

    pub fn decompose(&self, spec: &OperationSpec) -> Decomposition {
        self.analyze(spec).decomposition()
    }

    /// Classify, decompose, plan towards `target_l` and emit the descriptor.
    pub fn restructure(
        &self,
        spec: &OperationSpec,
        target_l: f64,
        budget: &CostVector,
        max_steps: usize,
    ) -> Result<Restructuring> {
        if !target_l.is_finite() || !(0.0..=1.0).contains(&target_l) {
            return Err(ConfigError::InvalidValue {
                field: "target_l".to_string(),
                reason: format!("{} is outside [0, 1]", target_l),
            }
            .into());
        }

        let analysis = self.analyze(spec);
        let _span = AnalysisSpan::enter(&analysis.analysis_id, &spec.name);
        let decomposition = analysis.decomposition();
        debug!(
            lifting_fraction = decomposition.lifting_fraction(),
            target_l, "planning restructure"
        );

        let result = Planner::new(&self.config).plan(&decomposition, target_l, budget, max_steps);
        if !result.is_achieved() {
            warn!(outcome = result.label(), target_l, "target lifting fraction not reached");
        }
        let descriptor = emitter::emit(&spec.name, result.plan(), &self.settings());
        Ok(Restructuring {
            analysis_id: analysis.analysis_id,
            result,
            descriptor,
        })
    }

    /// Load and analyse several files concurrently. Results keep the input
    /// order; a failing file does not stop the others.
    pub async fn analyze_many(&self, paths: &[PathBuf]) -> Result<Vec<Result<Analysis>>> {
        let mut join_set = JoinSet::new();
        for (idx, path) in paths.iter().cloned().enumerate() {
            let engine = self.clone();
            join_set.spawn_blocking(move || {
                let analysis = engine.load(&path).map(|spec| engine.analyze(&spec));
                (idx, analysis)
            });
        }

        let mut slots: Vec<Option<Result<Analysis>>> = paths.iter().map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            let (idx, analysis) =
                joined.map_err(|e| EngineError::Task(format!("analysis task join error: {e}")))?;
            slots[idx] = Some(analysis);
        }

        paths
            .iter()
            .zip(slots)
            .map(|(path, slot)| {
                slot.ok_or_else(|| {
                    EngineError::Task(format!("missing analysis result for {}", path.display()))
                })
            })
            .collect()
    }
}
