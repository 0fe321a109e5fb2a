//! Operation specs: raw input documents and the parsed, immutable IR.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::digest;
use super::error::ParseError;
use super::expr::Expr;
use super::parser::{self, QuantifierPrefix, Scope};
use super::types::ValueType;
use super::typing::TypeEnv;

/// What an effect does to its target key. Decides the required key type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Assign,
    Increment,
    Decrement,
    SetAdd,
    SetRemove,
    Max,
    Min,
    Insert,
    DeleteWhere,
    UpdateWhere,
    /// Observation only; the body is the observed value and the key is
    /// left untouched.
    Read,
    Update,
    Custom,
}

impl EffectKind {
    /// Key-type requirement, as a human-readable name and a predicate.
    fn requirement(self) -> Option<(&'static str, fn(&ValueType) -> bool)> {
        match self {
            EffectKind::Increment | EffectKind::Decrement | EffectKind::Max | EffectKind::Min => {
                Some(("numeric key", ValueType::is_numeric))
            }
            EffectKind::SetAdd | EffectKind::SetRemove => Some(("set key", ValueType::is_set)),
            EffectKind::Insert | EffectKind::DeleteWhere | EffectKind::UpdateWhere => {
                Some(("relation key", ValueType::is_relation))
            }
            _ => None,
        }
    }

    /// Key type assumed when the key is not declared in `state`.
    fn implied_key_type(self) -> ValueType {
        match self {
            EffectKind::Increment | EffectKind::Decrement | EffectKind::Max | EffectKind::Min => {
                ValueType::Int
            }
            EffectKind::SetAdd | EffectKind::SetRemove => {
                ValueType::Set(Box::new(ValueType::Any))
            }
            _ => ValueType::Any,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EffectKind::Assign => "assign",
            EffectKind::Increment => "increment",
            EffectKind::Decrement => "decrement",
            EffectKind::SetAdd => "set_add",
            EffectKind::SetRemove => "set_remove",
            EffectKind::Max => "max",
            EffectKind::Min => "min",
            EffectKind::Insert => "insert",
            EffectKind::DeleteWhere => "delete_where",
            EffectKind::UpdateWhere => "update_where",
            EffectKind::Read => "read",
            EffectKind::Update => "update",
            EffectKind::Custom => "custom",
        }
    }
}

/// Consistency level at which an effect observes foreign keys.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    #[default]
    Linearizable,
    Causal,
    Cached,
    Eventual,
}

impl ConsistencyLevel {
    pub fn is_strong(self) -> bool {
        self == ConsistencyLevel::Linearizable
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConsistencyLevel::Linearizable => "linearizable",
            ConsistencyLevel::Causal => "causal",
            ConsistencyLevel::Cached => "cached",
            ConsistencyLevel::Eventual => "eventual",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "segment", content = "value", rename_all = "snake_case")]
pub enum KeySegment {
    Literal(String),
    Placeholder(String),
}

/// Target key pattern such as `cart/{user}`. Placeholders are shard
/// dimensions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyPattern {
    pub raw: String,
    pub name: String,
    pub segments: Vec<KeySegment>,
}

impl KeyPattern {
    pub fn parse(raw: &str) -> Result<KeyPattern, ParseError> {
        let grammar = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(/([A-Za-z0-9_\-]+|\{[A-Za-z_][A-Za-z0-9_]*\}))*$")
            .map_err(|e| ParseError::InvalidKeyPattern {
                pattern: raw.to_string(),
                reason: e.to_string(),
            })?;
        if !grammar.is_match(raw) {
            return Err(ParseError::InvalidKeyPattern {
                pattern: raw.to_string(),
                reason: "expected name(/segment|/{placeholder})*".to_string(),
            });
        }
        let mut parts = raw.split('/');
        let name = parts.next().unwrap_or_default().to_string();
        let mut seen = BTreeSet::new();
        let mut segments = Vec::new();
        for part in parts {
            if let Some(dim) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                if !seen.insert(dim.to_string()) {
                    return Err(ParseError::InvalidKeyPattern {
                        pattern: raw.to_string(),
                        reason: format!("placeholder '{}' appears twice", dim),
                    });
                }
                segments.push(KeySegment::Placeholder(dim.to_string()));
            } else {
                segments.push(KeySegment::Literal(part.to_string()));
            }
        }
        Ok(KeyPattern {
            raw: raw.to_string(),
            name,
            segments,
        })
    }

    /// Placeholder names in order of appearance.
    pub fn dims(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                KeySegment::Placeholder(p) => Some(p.as_str()),
                KeySegment::Literal(_) => None,
            })
            .collect()
    }

    pub fn is_sharded(&self) -> bool {
        !self.dims().is_empty()
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantifier {
    Forall,
    Exists,
    /// No replica quantifier: a predicate over the local post-state.
    Bare,
}

/// Post-state predicate attached to an effect or to the whole operation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Invariant {
    pub source: String,
    pub quantifier: Quantifier,
    pub predicate: Expr,
}

impl Invariant {
    pub fn keys(&self) -> BTreeSet<String> {
        self.predicate.keys()
    }
}

/// Position of an effect in its operation: `(index, fragment)`. Whole
/// effects use fragment 0; split fragments use 1 (read) and 2 (commit).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Ordinal {
    pub index: usize,
    pub fragment: u8,
}

impl Ordinal {
    pub fn whole(index: usize) -> Self {
        Self { index, fragment: 0 }
    }
}

impl fmt::Display for Ordinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fragment == 0 {
            write!(f, "{}", self.index)
        } else {
            write!(f, "{}.{}", self.index, self.fragment)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum EffectRole {
    Whole,
    ReadFragment { parent: String },
    CommitFragment { parent: String },
}

/// One atomic sub-effect of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectNode {
    /// Stable reference used in plans and descriptors.
    pub id: String,
    pub ordinal: Ordinal,
    pub key: KeyPattern,
    pub kind: EffectKind,
    pub body: Expr,
    pub invariants: Vec<Invariant>,
    /// Every state key the body observes, including the target key.
    pub reads: BTreeSet<String>,
    /// Types of the keys and params the body and invariants mention.
    pub symbols: BTreeMap<String, ValueType>,
    pub read_level: ConsistencyLevel,
    pub role: EffectRole,
    /// Notes left by catalog transformations.
    #[serde(default)]
    pub annotations: Vec<String>,
}

impl EffectNode {
    /// Name of the written key; `None` for observations.
    pub fn writes(&self) -> Option<&str> {
        if self.is_read() {
            None
        } else {
            Some(&self.key.name)
        }
    }

    pub fn is_read(&self) -> bool {
        self.kind == EffectKind::Read || matches!(self.role, EffectRole::ReadFragment { .. })
    }

    /// Keys read besides the target key.
    pub fn foreign_reads(&self) -> BTreeSet<&str> {
        self.reads
            .iter()
            .filter(|k| **k != self.key.name)
            .map(String::as_str)
            .collect()
    }

    pub fn key_type(&self) -> ValueType {
        self.symbols
            .get(&self.key.name)
            .cloned()
            .unwrap_or(ValueType::Any)
    }

    /// Keys mentioned by any invariant.
    pub fn invariant_keys(&self) -> BTreeSet<String> {
        self.invariants.iter().flat_map(|i| i.keys()).collect()
    }
}

/// Parsed, immutable operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSpec {
    pub name: String,
    pub state: BTreeMap<String, ValueType>,
    pub params: BTreeMap<String, ValueType>,
    pub opaque: BTreeSet<String>,
    pub invariants: Vec<Invariant>,
    /// Arena of effects, addressed by `ordinal.index`.
    pub effects: Vec<EffectNode>,
    /// SHA256 of the canonical raw document.
    pub digest: String,
}

impl OperationSpec {
    pub fn effect(&self, id: &str) -> Option<&EffectNode> {
        self.effects.iter().find(|e| e.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawKeyDecl {
    Type(String),
    Detailed {
        #[serde(rename = "type")]
        ty: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEffect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub key_pattern: String,
    pub kind: EffectKind,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invariant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reads: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency: Option<ConsistencyLevel>,
}

/// Operation document as written by users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOperationSpec {
    pub name: String,
    #[serde(default)]
    pub state: BTreeMap<String, RawKeyDecl>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub opaque: Vec<String>,
    #[serde(default)]
    pub invariants: Vec<String>,
    #[serde(default)]
    pub effects: Vec<RawEffect>,
}

/// Document encodings accepted for operation specs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecFormat {
    Json,
    Yaml,
    Toml,
}

impl SpecFormat {
    /// Pick the format from a file extension; JSON when unknown.
    pub fn from_path(path: &Path) -> SpecFormat {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => SpecFormat::Yaml,
            Some("toml") => SpecFormat::Toml,
            _ => SpecFormat::Json,
        }
    }
}

impl RawOperationSpec {
    pub fn from_text(text: &str, format: SpecFormat) -> Result<Self, ParseError> {
        match format {
            SpecFormat::Json => {
                serde_json::from_str(text).map_err(|e| ParseError::Format(e.to_string()))
            }
            SpecFormat::Yaml => {
                serde_yaml::from_str(text).map_err(|e| ParseError::Format(e.to_string()))
            }
            SpecFormat::Toml => toml::from_str(text).map_err(|e| ParseError::Format(e.to_string())),
        }
    }
}

/// Parse a raw document into an [`OperationSpec`].
///
/// Rejects undeclared keys and functions, ill-typed bodies, kinds applied to
/// keys of the wrong type, recursion without a bound or above
/// `recursion_depth_cap`, and declared read sets that disagree with the body.
pub fn parse(raw: &RawOperationSpec, recursion_depth_cap: u32) -> Result<OperationSpec, ParseError> {
    if raw.effects.is_empty() {
        return Err(ParseError::EmptyOperation(raw.name.clone()));
    }

    let mut state = BTreeMap::new();
    let mut declared_patterns = BTreeMap::new();
    for (key, decl) in &raw.state {
        let (ty, pattern) = match decl {
            RawKeyDecl::Type(t) => (t, None),
            RawKeyDecl::Detailed { ty, pattern } => (ty, pattern.as_ref()),
        };
        let ty = ValueType::parse(ty).map_err(|e| ParseError::Format(format!("state '{}': {}", key, e)))?;
        state.insert(key.clone(), ty);
        if let Some(p) = pattern {
            let kp = KeyPattern::parse(p)?;
            if &kp.name != key {
                return Err(ParseError::InvalidKeyPattern {
                    pattern: p.clone(),
                    reason: format!("pattern does not name key '{}'", key),
                });
            }
            declared_patterns.insert(key.clone(), kp);
        }
    }

    let mut params = BTreeMap::new();
    for (name, ty) in &raw.params {
        let ty = ValueType::parse(ty).map_err(|e| ParseError::Format(format!("param '{}': {}", name, e)))?;
        params.insert(name.clone(), ty);
    }
    let opaque: BTreeSet<String> = raw.opaque.iter().cloned().collect();

    // Effect targets implicitly declare their key with a kind-implied type.
    let mut patterns = Vec::with_capacity(raw.effects.len());
    for effect in &raw.effects {
        let mut kp = KeyPattern::parse(&effect.key_pattern)?;
        if !kp.is_sharded() {
            if let Some(declared) = declared_patterns.get(&kp.name) {
                if kp.segments.is_empty() {
                    kp = declared.clone();
                }
            }
        }
        state
            .entry(kp.name.clone())
            .or_insert_with(|| effect.kind.implied_key_type());
        patterns.push(kp);
    }

    let mut names = BTreeSet::new();
    let effect_names: Vec<String> = raw
        .effects
        .iter()
        .enumerate()
        .map(|(i, e)| e.name.clone().unwrap_or_else(|| format!("effect_{}", i)))
        .collect();
    for name in &effect_names {
        if !names.insert(name.clone()) {
            return Err(ParseError::DuplicateEffect(name.clone()));
        }
    }

    let op_scope = Scope {
        keys: &state,
        params: &params,
        opaque: &opaque,
        self_key: None,
        allow_unique: true,
        recursion_cap: recursion_depth_cap,
    };
    let mut invariants = Vec::new();
    for source in &raw.invariants {
        invariants.push(
            parse_invariant(source, op_scope, &state, &params).map_err(|e| e.with_effect(&raw.name))?,
        );
    }

    let mut effects = Vec::with_capacity(raw.effects.len());
    for (index, (effect, key)) in raw.effects.iter().zip(patterns).enumerate() {
        let name = &effect_names[index];
        let node = parse_effect(
            effect,
            name,
            index,
            key,
            EffectContext {
                state: &state,
                params: &params,
                opaque: &opaque,
                op_invariants: &invariants,
                recursion_cap: recursion_depth_cap,
            },
        )
        .map_err(|e| e.with_effect(name))?;
        effects.push(node);
    }

    let digest = serde_json::to_value(raw)
        .map_err(|e| ParseError::Format(e.to_string()))
        .and_then(|v| digest::compute_digest(&v).map_err(|e| ParseError::Format(e.to_string())))?;

    Ok(OperationSpec {
        name: raw.name.clone(),
        state,
        params,
        opaque,
        invariants,
        effects,
        digest,
    })
}

/// Read and parse a spec file, picking the format from its extension.
pub fn load(path: &Path, recursion_depth_cap: u32) -> crate::error::Result<OperationSpec> {
    let text = std::fs::read_to_string(path)?;
    let raw = RawOperationSpec::from_text(&text, SpecFormat::from_path(path))?;
    Ok(parse(&raw, recursion_depth_cap)?)
}

struct EffectContext<'a> {
    state: &'a BTreeMap<String, ValueType>,
    params: &'a BTreeMap<String, ValueType>,
    opaque: &'a BTreeSet<String>,
    op_invariants: &'a [Invariant],
    recursion_cap: u32,
}

fn parse_effect(
    raw: &RawEffect,
    name: &str,
    index: usize,
    key: KeyPattern,
    ctx: EffectContext<'_>,
) -> Result<EffectNode, ParseError> {
    let key_type = ctx.state.get(&key.name).cloned().unwrap_or(ValueType::Any);
    if let Some((expected, ok)) = raw.kind.requirement() {
        if !ok(&key_type) {
            return Err(ParseError::TypeMismatch {
                effect: name.to_string(),
                expected: format!("{} for kind {}", expected, raw.kind.as_str()),
                found: key_type.to_string(),
            });
        }
    }

    let scope = Scope {
        keys: ctx.state,
        params: ctx.params,
        opaque: ctx.opaque,
        self_key: Some(&key.name),
        allow_unique: false,
        recursion_cap: ctx.recursion_cap,
    };
    let body = parser::parse_expr(&raw.body, scope)?;
    let body_type = TypeEnv::new(ctx.state, ctx.params).infer(&body)?;
    if raw.kind != EffectKind::Read && !key_type.compatible(&body_type) {
        return Err(ParseError::TypeMismatch {
            effect: name.to_string(),
            expected: key_type.to_string(),
            found: body_type.to_string(),
        });
    }

    let reads = body.keys();
    if let Some(declared) = &raw.reads {
        let mut declared_set: BTreeSet<String> = declared.iter().cloned().collect();
        let mut inferred = reads.clone();
        declared_set.insert(key.name.clone());
        inferred.insert(key.name.clone());
        if declared_set != inferred {
            return Err(ParseError::InconsistentFootprint {
                effect: name.to_string(),
                declared: declared.clone(),
                inferred: reads.iter().cloned().collect(),
            });
        }
    }

    let mut invariants = Vec::new();
    if let Some(source) = &raw.invariant {
        let scope = Scope {
            allow_unique: true,
            ..scope
        };
        invariants.push(parse_invariant(source, scope, ctx.state, ctx.params)?);
    }
    for inv in ctx.op_invariants {
        if inv.predicate.mentions_key(&key.name) && !invariants.contains(inv) {
            invariants.push(inv.clone());
        }
    }

    let mut symbols = BTreeMap::new();
    let mut mentioned = reads.clone();
    mentioned.insert(key.name.clone());
    for inv in &invariants {
        mentioned.extend(inv.keys());
    }
    for k in mentioned {
        if let Some(t) = ctx.state.get(&k) {
            symbols.insert(k, t.clone());
        }
    }
    let mut used_params = body.params();
    for inv in &invariants {
        used_params.extend(inv.predicate.params());
    }
    for p in used_params {
        if let Some(t) = ctx.params.get(&p) {
            symbols.insert(p, t.clone());
        }
    }

    Ok(EffectNode {
        id: name.to_string(),
        ordinal: Ordinal::whole(index),
        key,
        kind: raw.kind,
        body,
        invariants,
        reads,
        symbols,
        read_level: raw.consistency.unwrap_or_default(),
        role: EffectRole::Whole,
        annotations: Vec::new(),
    })
}

fn parse_invariant(
    source: &str,
    scope: Scope<'_>,
    state: &BTreeMap<String, ValueType>,
    params: &BTreeMap<String, ValueType>,
) -> Result<Invariant, ParseError> {
    let (prefix, predicate) = parser::parse_invariant(source, scope)?;
    let ty = TypeEnv::new(state, params).infer(&predicate)?;
    if !ty.compatible(&ValueType::Bool) {
        return Err(ParseError::TypeMismatch {
            effect: String::new(),
            expected: "bool invariant".to_string(),
            found: ty.to_string(),
        });
    }
    let quantifier = match prefix {
        QuantifierPrefix::Forall => Quantifier::Forall,
        QuantifierPrefix::Exists => Quantifier::Exists,
        QuantifierPrefix::None => Quantifier::Bare,
    };
    Ok(Invariant {
        source: source.to_string(),
        quantifier,
        predicate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_yaml() -> &'static str {
        r#"
name: page_views
state:
  views: nat
params:
  n: nat
effects:
  - name: bump
    key_pattern: views/{page}
    kind: increment
    body: "self + n"
    invariant: "views >= 0"
"#
    }

    #[test]
    fn parses_yaml_counter() {
        let raw = RawOperationSpec::from_text(counter_yaml(), SpecFormat::Yaml).unwrap();
        let spec = parse(&raw, 64).unwrap();
        assert_eq!(spec.effects.len(), 1);
        let bump = &spec.effects[0];
        assert_eq!(bump.id, "bump");
        assert_eq!(bump.key.dims(), vec!["page"]);
        assert_eq!(bump.invariants[0].quantifier, Quantifier::Bare);
        assert!(bump.reads.contains("views"));
        assert_eq!(spec.digest.len(), 64);
    }

    #[test]
    fn minimal_document_declares_keys_implicitly() {
        let raw = RawOperationSpec::from_text(
            r#"{"name":"likes","effects":[{"key_pattern":"likes","kind":"increment","body":"self + 1"}]}"#,
            SpecFormat::Json,
        )
        .unwrap();
        let spec = parse(&raw, 64).unwrap();
        assert_eq!(spec.state["likes"], ValueType::Int);
        assert_eq!(spec.effects[0].id, "effect_0");
    }

    #[test]
    fn rejects_kind_on_wrong_key_type() {
        let raw = RawOperationSpec::from_text(
            r#"{"name":"x","state":{"flag":"bool"},"effects":[{"key_pattern":"flag","kind":"increment","body":"self"}]}"#,
            SpecFormat::Json,
        )
        .unwrap();
        assert!(matches!(
            parse(&raw, 64),
            Err(ParseError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_inconsistent_footprint() {
        let raw = RawOperationSpec::from_text(
            r#"{"name":"x","state":{"a":"int","b":"int"},
                "effects":[{"key_pattern":"a","kind":"assign","body":"b + 1","reads":["a"]}]}"#,
            SpecFormat::Json,
        )
        .unwrap();
        let err = parse(&raw, 64).unwrap_err();
        assert!(matches!(err, ParseError::InconsistentFootprint { .. }));
        assert_eq!(err.effect(), Some("effect_0"));
    }

    #[test]
    fn rejects_empty_and_duplicate_effects() {
        let empty = RawOperationSpec {
            name: "none".to_string(),
            state: BTreeMap::new(),
            params: BTreeMap::new(),
            opaque: Vec::new(),
            invariants: Vec::new(),
            effects: Vec::new(),
        };
        assert!(matches!(parse(&empty, 64), Err(ParseError::EmptyOperation(_))));

        let dup = RawOperationSpec::from_text(
            r#"{"name":"x","effects":[
                {"name":"e","key_pattern":"a","kind":"increment","body":"self + 1"},
                {"name":"e","key_pattern":"a","kind":"increment","body":"self + 2"}]}"#,
            SpecFormat::Json,
        )
        .unwrap();
        assert!(matches!(parse(&dup, 64), Err(ParseError::DuplicateEffect(_))));
    }

    #[test]
    fn operation_invariants_attach_to_effects_on_their_keys() {
        let raw = RawOperationSpec::from_text(
            r#"
name = "stock"
invariants = ["forall replica: stock >= 0"]

[state]
stock = "int"
sold = "int"

[[effects]]
key_pattern = "stock"
kind = "decrement"
body = "self - 1"

[[effects]]
key_pattern = "sold"
kind = "increment"
body = "self + 1"
"#,
            SpecFormat::Toml,
        )
        .unwrap();
        let spec = parse(&raw, 64).unwrap();
        assert_eq!(spec.effects[0].invariants.len(), 1);
        assert!(spec.effects[1].invariants.is_empty());
    }

    #[test]
    fn key_pattern_grammar() {
        assert!(KeyPattern::parse("cart/{user}/items").is_ok());
        assert!(KeyPattern::parse("/cart").is_err());
        assert!(KeyPattern::parse("cart/{u}/{u}").is_err());
        assert!(!KeyPattern::parse("leader").unwrap().is_sharded());
    }
}
