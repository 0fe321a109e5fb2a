//! Value types of the specification language.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Type of a state key, parameter or expression.
///
/// Relations are sets of rows: `relation<id:int,qty:nat>` parses to
/// `Set(Row{id: Int, qty: Nat})`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "of", rename_all = "snake_case")]
pub enum ValueType {
    Int,
    /// Non-negative integer. Behaves like `Int` in arithmetic; the sign
    /// information feeds monotonicity and satisfiability reasoning.
    Nat,
    Bool,
    Str,
    Set(Box<ValueType>),
    Row(BTreeMap<String, ValueType>),
    /// Element type of `{}` and result of opaque calls.
    Any,
}

impl ValueType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueType::Int | ValueType::Nat | ValueType::Any)
    }

    pub fn is_set(&self) -> bool {
        matches!(self, ValueType::Set(_) | ValueType::Any)
    }

    /// `true` for `Set(Row{..})`.
    pub fn is_relation(&self) -> bool {
        match self {
            ValueType::Set(inner) => matches!(inner.as_ref(), ValueType::Row(_)),
            ValueType::Any => true,
            _ => false,
        }
    }

    /// Column types when this is a relation.
    pub fn relation_columns(&self) -> Option<&BTreeMap<String, ValueType>> {
        match self {
            ValueType::Set(inner) => match inner.as_ref() {
                ValueType::Row(cols) => Some(cols),
                _ => None,
            },
            _ => None,
        }
    }

    /// Structural compatibility. `Nat` and `Int` are interchangeable and
    /// `Any` matches everything.
    pub fn compatible(&self, other: &ValueType) -> bool {
        match (self, other) {
            (ValueType::Any, _) | (_, ValueType::Any) => true,
            (a, b) if a.is_numeric() && b.is_numeric() => true,
            (ValueType::Bool, ValueType::Bool) | (ValueType::Str, ValueType::Str) => true,
            (ValueType::Set(a), ValueType::Set(b)) => a.compatible(b),
            (ValueType::Row(a), ValueType::Row(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, ta), (kb, tb))| ka == kb && ta.compatible(tb))
            }
            _ => false,
        }
    }

    /// Parse a type annotation such as `nat`, `set<string>` or
    /// `relation<id:int,qty:nat>`.
    pub fn parse(text: &str) -> Result<ValueType, String> {
        let t = text.trim();
        match t {
            "int" => return Ok(ValueType::Int),
            "nat" => return Ok(ValueType::Nat),
            "bool" => return Ok(ValueType::Bool),
            "string" | "str" => return Ok(ValueType::Str),
            _ => {}
        }
        if let Some(inner) = strip_generic(t, "set") {
            return Ok(ValueType::Set(Box::new(ValueType::parse(inner)?)));
        }
        if let Some(inner) = strip_generic(t, "relation") {
            let mut cols = BTreeMap::new();
            for field in inner.split(',') {
                let (name, ty) = field
                    .split_once(':')
                    .ok_or_else(|| format!("relation column '{}' needs a type", field.trim()))?;
                let ty = ValueType::parse(ty)?;
                if matches!(ty, ValueType::Set(_) | ValueType::Row(_)) {
                    return Err(format!("relation column '{}' must be scalar", name.trim()));
                }
                if cols.insert(name.trim().to_string(), ty).is_some() {
                    return Err(format!("duplicate relation column '{}'", name.trim()));
                }
            }
            if cols.is_empty() {
                return Err("relation needs at least one column".to_string());
            }
            return Ok(ValueType::Set(Box::new(ValueType::Row(cols))));
        }
        Err(format!("unknown type '{}'", t))
    }
}

fn strip_generic<'a>(text: &'a str, head: &str) -> Option<&'a str> {
    text.strip_prefix(head)?
        .trim_start()
        .strip_prefix('<')?
        .strip_suffix('>')
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Int => write!(f, "int"),
            ValueType::Nat => write!(f, "nat"),
            ValueType::Bool => write!(f, "bool"),
            ValueType::Str => write!(f, "string"),
            ValueType::Any => write!(f, "any"),
            ValueType::Set(inner) => match inner.as_ref() {
                ValueType::Row(cols) => {
                    let cols: Vec<String> =
                        cols.iter().map(|(c, t)| format!("{}:{}", c, t)).collect();
                    write!(f, "relation<{}>", cols.join(","))
                }
                other => write!(f, "set<{}>", other),
            },
            ValueType::Row(cols) => {
                let cols: Vec<String> = cols.iter().map(|(c, t)| format!("{}:{}", c, t)).collect();
                write!(f, "row<{}>", cols.join(","))
            }
        }
    }
}
