//! Reference interpreter for effect bodies.
//!
//! Used to search for and validate non-commutativity witnesses and by the
//! soundness tests, which interleave effects in both orders.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::expr::{BinOp, Builtin, Expr, Literal, UnOp};
use super::spec::{EffectNode, Invariant};
use super::types::ValueType;

/// Runtime value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
    Set(BTreeSet<Value>),
    Row(BTreeMap<String, Value>),
}

impl Value {
    /// Zero value of a type.
    pub fn default_for(ty: &ValueType) -> Value {
        match ty {
            ValueType::Int | ValueType::Nat | ValueType::Any => Value::Int(0),
            ValueType::Bool => Value::Bool(false),
            ValueType::Str => Value::Str(String::new()),
            ValueType::Set(_) => Value::Set(BTreeSet::new()),
            ValueType::Row(cols) => Value::Row(
                cols.iter()
                    .map(|(c, t)| (c.clone(), Value::default_for(t)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Set(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::Row(cols) => {
                let parts: Vec<String> = cols.iter().map(|(c, v)| format!("{}: {}", c, v)).collect();
                write!(f, "row({})", parts.join(", "))
            }
        }
    }
}

/// Key or parameter name to value.
pub type Bindings = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("unbound name '{0}'")]
    Unbound(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("arithmetic overflow")]
    Overflow,

    #[error("recursion in '{function}' exceeded its bound {bound}")]
    DepthExceeded { function: String, bound: u32 },

    #[error("opaque function '{0}' has no interpretation")]
    Opaque(String),
}

type EvalResult<T> = std::result::Result<T, EvalError>;

struct RecFn<'e> {
    name: String,
    params: Vec<String>,
    bound: u32,
    body: &'e Expr,
    captured: Vec<(String, Value)>,
    depth: u32,
}

struct Interp<'a, 'e> {
    state: &'a Bindings,
    params: &'a Bindings,
    locals: Vec<(String, Value)>,
    row: Option<Value>,
    funcs: Vec<RecFn<'e>>,
}

/// Evaluate `expr` against a state and parameter binding.
pub fn eval(expr: &Expr, state: &Bindings, params: &Bindings) -> EvalResult<Value> {
    Interp {
        state,
        params,
        locals: Vec::new(),
        row: None,
        funcs: Vec::new(),
    }
    .eval(expr)
}

/// Apply one effect to a state. Observations leave the state unchanged.
pub fn apply(effect: &EffectNode, state: &Bindings, params: &Bindings) -> EvalResult<Bindings> {
    let mut next = state.clone();
    if effect.is_read() {
        eval(&effect.body, state, params)?;
        return Ok(next);
    }
    let value = eval(&effect.body, state, params)?;
    next.insert(effect.key.name.clone(), value);
    Ok(next)
}

/// Whether `invariant` holds in a single replica state.
pub fn holds(invariant: &Invariant, state: &Bindings, params: &Bindings) -> EvalResult<bool> {
    match eval(&invariant.predicate, state, params)? {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::Type(format!("invariant evaluated to {}", other))),
    }
}

fn int(v: &Value) -> EvalResult<i64> {
    match v {
        Value::Int(i) => Ok(*i),
        other => Err(EvalError::Type(format!("expected int, got {}", other))),
    }
}

fn boolean(v: &Value) -> EvalResult<bool> {
    match v {
        Value::Bool(b) => Ok(*b),
        other => Err(EvalError::Type(format!("expected bool, got {}", other))),
    }
}

fn set(v: Value) -> EvalResult<BTreeSet<Value>> {
    match v {
        Value::Set(s) => Ok(s),
        other => Err(EvalError::Type(format!("expected set, got {}", other))),
    }
}

impl<'a, 'e> Interp<'a, 'e> {
    fn eval(&mut self, e: &'e Expr) -> EvalResult<Value> {
        match e {
            Expr::Lit { value } => Ok(match value {
                Literal::Int(i) => Value::Int(*i),
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            Expr::Key { name } => self
                .state
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::Unbound(name.clone())),
            Expr::Param { name } => self
                .params
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::Unbound(name.clone())),
            Expr::Local { name } => self
                .locals
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| EvalError::Unbound(name.clone())),
            Expr::Row => self
                .row
                .clone()
                .ok_or_else(|| EvalError::Unbound("it".to_string())),
            Expr::Field { base, column } => match self.eval(base)? {
                Value::Row(cols) => cols
                    .get(column)
                    .cloned()
                    .ok_or_else(|| EvalError::Unbound(column.clone())),
                other => Err(EvalError::Type(format!("expected row, got {}", other))),
            },
            Expr::Unary { op, arg } => {
                let v = self.eval(arg)?;
                match op {
                    UnOp::Neg => int(&v)?.checked_neg().map(Value::Int).ok_or(EvalError::Overflow),
                    UnOp::Not => Ok(Value::Bool(!boolean(&v)?)),
                }
            }
            Expr::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs),
            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                if boolean(&self.eval(cond)?)? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Let { name, value, body } => {
                let v = self.eval(value)?;
                self.locals.push((name.clone(), v));
                let out = self.eval(body);
                self.locals.pop();
                out
            }
            Expr::Call { func, args } => self.call(*func, args),
            Expr::SetLit { items } => {
                let mut out = BTreeSet::new();
                for item in items {
                    out.insert(self.eval(item)?);
                }
                Ok(Value::Set(out))
            }
            Expr::RowLit { fields } => {
                let mut out = BTreeMap::new();
                for (c, v) in fields {
                    out.insert(c.clone(), self.eval(v)?);
                }
                Ok(Value::Row(out))
            }
            Expr::Rec {
                name,
                params,
                bound,
                body,
                rest,
            } => {
                self.funcs.push(RecFn {
                    name: name.clone(),
                    params: params.clone(),
                    bound: *bound,
                    body: body.as_ref(),
                    captured: self.locals.clone(),
                    depth: 0,
                });
                let out = self.eval(rest);
                self.funcs.pop();
                out
            }
            Expr::Invoke { name, args } => self.invoke(name, args),
            Expr::Opaque { name, .. } => Err(EvalError::Opaque(name.clone())),
        }
    }

    fn binary(&mut self, op: BinOp, lhs: &'e Expr, rhs: &'e Expr) -> EvalResult<Value> {
        // Short-circuit boolean connectives.
        if op == BinOp::And || op == BinOp::Or {
            let l = boolean(&self.eval(lhs)?)?;
            if (op == BinOp::And && !l) || (op == BinOp::Or && l) {
                return Ok(Value::Bool(l));
            }
            return Ok(Value::Bool(boolean(&self.eval(rhs)?)?));
        }
        let l = self.eval(lhs)?;
        let r = self.eval(rhs)?;
        match op {
            BinOp::Eq => return Ok(Value::Bool(l == r)),
            BinOp::Ne => return Ok(Value::Bool(l != r)),
            _ => {}
        }
        let (a, b) = (int(&l)?, int(&r)?);
        let v = match op {
            BinOp::Add => Value::Int(a.checked_add(b).ok_or(EvalError::Overflow)?),
            BinOp::Sub => Value::Int(a.checked_sub(b).ok_or(EvalError::Overflow)?),
            BinOp::Mul => Value::Int(a.checked_mul(b).ok_or(EvalError::Overflow)?),
            BinOp::Div => {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                Value::Int(a.checked_div(b).ok_or(EvalError::Overflow)?)
            }
            BinOp::Mod => {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                Value::Int(a.checked_rem(b).ok_or(EvalError::Overflow)?)
            }
            BinOp::Lt => Value::Bool(a < b),
            BinOp::Le => Value::Bool(a <= b),
            BinOp::Gt => Value::Bool(a > b),
            BinOp::Ge => Value::Bool(a >= b),
            BinOp::Eq | BinOp::Ne | BinOp::And | BinOp::Or => unreachable!("handled above"),
        };
        Ok(v)
    }

    fn call(&mut self, func: Builtin, args: &'e [Expr]) -> EvalResult<Value> {
        match func {
            Builtin::DeleteWhere => {
                let rows = set(self.eval(&args[0])?)?;
                let mut kept = BTreeSet::new();
                for row in rows {
                    if !self.with_row(&row, &args[1])? {
                        kept.insert(row);
                    }
                }
                return Ok(Value::Set(kept));
            }
            Builtin::UpdateWhere => {
                let rows = set(self.eval(&args[0])?)?;
                let (column, value) = match &args[2] {
                    Expr::Call {
                        func: Builtin::SetColumn,
                        args: set_args,
                    } => match &set_args[0] {
                        Expr::Lit {
                            value: Literal::Str(c),
                        } => (c.clone(), &set_args[1]),
                        other => return Err(EvalError::Type(format!("bad column {}", other))),
                    },
                    other => return Err(EvalError::Type(format!("expected set(..), got {}", other))),
                };
                let mut out = BTreeSet::new();
                for row in rows {
                    if self.with_row(&row, &args[1])? {
                        let saved = self.row.replace(row.clone());
                        let v = self.eval(value);
                        self.row = saved;
                        let Value::Row(mut cols) = row else {
                            return Err(EvalError::Type("relation holds a non-row".to_string()));
                        };
                        cols.insert(column.clone(), v?);
                        out.insert(Value::Row(cols));
                    } else {
                        out.insert(row);
                    }
                }
                return Ok(Value::Set(out));
            }
            Builtin::SetColumn => {
                return Err(EvalError::Type("set(..) outside update_where".to_string()))
            }
            _ => {}
        }

        let mut vals = Vec::with_capacity(args.len());
        for a in args {
            vals.push(self.eval(a)?);
        }
        match func {
            Builtin::Max => Ok(Value::Int(int(&vals[0])?.max(int(&vals[1])?))),
            Builtin::Min => Ok(Value::Int(int(&vals[0])?.min(int(&vals[1])?))),
            Builtin::Abs => int(&vals[0])?
                .checked_abs()
                .map(Value::Int)
                .ok_or(EvalError::Overflow),
            Builtin::Union => {
                let mut a = set(vals[0].clone())?;
                a.extend(set(vals[1].clone())?);
                Ok(Value::Set(a))
            }
            Builtin::Add | Builtin::Insert => {
                let mut a = set(vals[0].clone())?;
                a.insert(vals[1].clone());
                Ok(Value::Set(a))
            }
            Builtin::Remove => {
                let mut a = set(vals[0].clone())?;
                a.remove(&vals[1]);
                Ok(Value::Set(a))
            }
            Builtin::Contains => Ok(Value::Bool(set(vals[0].clone())?.contains(&vals[1]))),
            Builtin::Size => {
                let n = set(vals[0].clone())?.len();
                Ok(Value::Int(i64::try_from(n).map_err(|_| EvalError::Overflow)?))
            }
            // A single replica state never contradicts itself.
            Builtin::Unique => Ok(Value::Bool(true)),
            Builtin::Snapshot => Ok(Value::Set(vals.into_iter().collect())),
            Builtin::DeleteWhere | Builtin::UpdateWhere | Builtin::SetColumn => {
                unreachable!("handled above")
            }
        }
    }

    fn with_row(&mut self, row: &Value, pred: &'e Expr) -> EvalResult<bool> {
        let saved = self.row.replace(row.clone());
        let out = self.eval(pred).and_then(|v| boolean(&v));
        self.row = saved;
        out
    }

    fn invoke(&mut self, name: &str, args: &'e [Expr]) -> EvalResult<Value> {
        let mut vals = Vec::with_capacity(args.len());
        for a in args {
            vals.push(self.eval(a)?);
        }
        let idx = self
            .funcs
            .iter()
            .rposition(|f| f.name == name)
            .ok_or_else(|| EvalError::Unbound(name.to_string()))?;
        if self.funcs[idx].depth >= self.funcs[idx].bound {
            return Err(EvalError::DepthExceeded {
                function: name.to_string(),
                bound: self.funcs[idx].bound,
            });
        }
        self.funcs[idx].depth += 1;
        let mut frame = self.funcs[idx].captured.clone();
        frame.extend(self.funcs[idx].params.iter().cloned().zip(vals));
        let body = self.funcs[idx].body;
        let saved = std::mem::replace(&mut self.locals, frame);
        let out = self.eval(body);
        self.locals = saved;
        self.funcs[idx].depth -= 1;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parser::{parse_expr, Scope};

    fn run(src: &str, state: &[(&str, Value)], params: &[(&str, Value)]) -> EvalResult<Value> {
        let keys: BTreeMap<String, ValueType> = state
            .iter()
            .map(|(k, _)| (k.to_string(), ValueType::Any))
            .collect();
        let param_types: BTreeMap<String, ValueType> = params
            .iter()
            .map(|(k, _)| (k.to_string(), ValueType::Any))
            .collect();
        let opaque = BTreeSet::new();
        let scope = Scope {
            keys: &keys,
            params: &param_types,
            opaque: &opaque,
            self_key: state.first().map(|(k, _)| *k),
            allow_unique: false,
            recursion_cap: 64,
        };
        let expr = parse_expr(src, scope).unwrap();
        let s: Bindings = state.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        let p: Bindings = params.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        eval(&expr, &s, &p)
    }

    #[test]
    fn evaluates_arithmetic_and_conditionals() {
        let v = run(
            "if self >= k then self - k else self",
            &[("stock", Value::Int(5))],
            &[("k", Value::Int(3))],
        )
        .unwrap();
        assert_eq!(v, Value::Int(2));
    }

    #[test]
    fn bounded_recursion_respects_its_bound() {
        let ok = run(
            "rec f(n) bound 5 = if n <= 0 then 0 else n + f(n - 1) in f(self)",
            &[("x", Value::Int(4))],
            &[],
        )
        .unwrap();
        assert_eq!(ok, Value::Int(10));

        let deep = run(
            "rec f(n) bound 2 = if n <= 0 then 0 else n + f(n - 1) in f(self)",
            &[("x", Value::Int(4))],
            &[],
        );
        assert!(matches!(deep, Err(EvalError::DepthExceeded { .. })));
    }

    #[test]
    fn relational_updates_touch_matching_rows() {
        let row = |id: i64, qty: i64| {
            Value::Row(
                [("id".to_string(), Value::Int(id)), ("qty".to_string(), Value::Int(qty))]
                    .into_iter()
                    .collect(),
            )
        };
        let rel = Value::Set([row(1, 0), row(2, 4)].into_iter().collect());
        let deleted = run("delete_where(self, it.qty == 0)", &[("orders", rel.clone())], &[]).unwrap();
        assert_eq!(deleted, Value::Set([row(2, 4)].into_iter().collect()));

        let updated = run(
            "update_where(self, it.id == 2, set(qty, it.qty + 1))",
            &[("orders", rel)],
            &[],
        )
        .unwrap();
        assert_eq!(updated, Value::Set([row(1, 0), row(2, 5)].into_iter().collect()));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let err = run("self / 0", &[("x", Value::Int(1))], &[]).unwrap_err();
        assert_eq!(err, EvalError::DivisionByZero);
    }
}
