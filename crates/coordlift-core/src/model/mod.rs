//! Operation model: spec documents, the expression language and its IR.
//!
//! - `RawOperationSpec`: the document users write (JSON, YAML or TOML)
//! - `OperationSpec`: the parsed, immutable arena of `EffectNode`s
//! - `Expr`: bodies and invariants in the restricted specification language

pub mod digest;
pub mod error;
pub mod eval;
pub mod expr;
pub mod parser;
pub mod spec;
pub mod types;
pub mod typing;

pub use error::ParseError;
pub use eval::{Bindings, EvalError, Value};
pub use expr::{BinOp, Builtin, Expr, Literal, UnOp};
pub use spec::{
    load, parse, ConsistencyLevel, EffectKind, EffectNode, EffectRole, Invariant, KeyPattern,
    KeySegment, OperationSpec, Ordinal, Quantifier, RawEffect, RawKeyDecl, RawOperationSpec,
    SpecFormat,
};
pub use types::ValueType;
