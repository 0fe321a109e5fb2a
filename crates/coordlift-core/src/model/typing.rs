//! Type inference over parsed expressions.

use std::collections::BTreeMap;

use super::error::ParseError;
use super::expr::{BinOp, Builtin, Expr, Literal, UnOp};
use super::types::ValueType;

/// Typing environment for one expression.
pub struct TypeEnv<'a> {
    pub keys: &'a BTreeMap<String, ValueType>,
    pub params: &'a BTreeMap<String, ValueType>,
    locals: Vec<(String, ValueType)>,
    row: Option<BTreeMap<String, ValueType>>,
}

impl<'a> TypeEnv<'a> {
    pub fn new(
        keys: &'a BTreeMap<String, ValueType>,
        params: &'a BTreeMap<String, ValueType>,
    ) -> Self {
        Self {
            keys,
            params,
            locals: Vec::new(),
            row: None,
        }
    }

    /// Infer the type of `e`, failing on the first mismatch.
    pub fn infer(&mut self, e: &Expr) -> Result<ValueType, ParseError> {
        match e {
            Expr::Lit { value } => Ok(match value {
                Literal::Int(v) if *v >= 0 => ValueType::Nat,
                Literal::Int(_) => ValueType::Int,
                Literal::Bool(_) => ValueType::Bool,
                Literal::Str(_) => ValueType::Str,
            }),
            Expr::Key { name } => Ok(self.keys.get(name).cloned().unwrap_or(ValueType::Any)),
            Expr::Param { name } => Ok(self.params.get(name).cloned().unwrap_or(ValueType::Any)),
            Expr::Local { name } => Ok(self
                .locals
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, t)| t.clone())
                .unwrap_or(ValueType::Any)),
            Expr::Row => match &self.row {
                Some(cols) => Ok(ValueType::Row(cols.clone())),
                None => Err(mismatch("relational predicate context", "'it'")),
            },
            Expr::Field { base, column } => match self.infer(base)? {
                ValueType::Row(cols) => cols
                    .get(column)
                    .cloned()
                    .ok_or_else(|| mismatch(&format!("column '{}'", column), "missing column")),
                ValueType::Any => Ok(ValueType::Any),
                other => Err(mismatch("row", &other.to_string())),
            },
            Expr::Unary { op, arg } => {
                let t = self.infer(arg)?;
                match op {
                    UnOp::Neg => {
                        expect(&t, t.is_numeric(), "int")?;
                        Ok(ValueType::Int)
                    }
                    UnOp::Not => {
                        expect(&t, t.compatible(&ValueType::Bool), "bool")?;
                        Ok(ValueType::Bool)
                    }
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.infer(lhs)?;
                let r = self.infer(rhs)?;
                self.binary(*op, l, r)
            }
            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                let c = self.infer(cond)?;
                expect(&c, c.compatible(&ValueType::Bool), "bool")?;
                let a = self.infer(then)?;
                let b = self.infer(otherwise)?;
                if !a.compatible(&b) {
                    return Err(mismatch(&a.to_string(), &b.to_string()));
                }
                Ok(join(a, b))
            }
            Expr::Let { name, value, body } => {
                let t = self.infer(value)?;
                self.locals.push((name.clone(), t));
                let out = self.infer(body);
                self.locals.pop();
                out
            }
            Expr::Call { func, args } => self.call(*func, args),
            Expr::SetLit { items } => {
                let mut elem = ValueType::Any;
                for item in items {
                    let t = self.infer(item)?;
                    if !elem.compatible(&t) {
                        return Err(mismatch(&elem.to_string(), &t.to_string()));
                    }
                    elem = join(elem, t);
                }
                Ok(ValueType::Set(Box::new(elem)))
            }
            Expr::RowLit { fields } => {
                let mut cols = BTreeMap::new();
                for (c, v) in fields {
                    cols.insert(c.clone(), self.infer(v)?);
                }
                Ok(ValueType::Row(cols))
            }
            Expr::Rec {
                params, body, rest, ..
            } => {
                let depth = self.locals.len();
                for p in params {
                    self.locals.push((p.clone(), ValueType::Any));
                }
                let checked = self.infer(body);
                self.locals.truncate(depth);
                checked?;
                self.infer(rest)
            }
            Expr::Invoke { args, .. } | Expr::Opaque { args, .. } => {
                for a in args {
                    self.infer(a)?;
                }
                Ok(ValueType::Any)
            }
        }
    }

    fn binary(&self, op: BinOp, l: ValueType, r: ValueType) -> Result<ValueType, ParseError> {
        match op {
            BinOp::Add | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                expect(&l, l.is_numeric(), "int")?;
                expect(&r, r.is_numeric(), "int")?;
                if l == ValueType::Nat && r == ValueType::Nat {
                    Ok(ValueType::Nat)
                } else {
                    Ok(ValueType::Int)
                }
            }
            BinOp::Sub => {
                expect(&l, l.is_numeric(), "int")?;
                expect(&r, r.is_numeric(), "int")?;
                Ok(ValueType::Int)
            }
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                expect(&l, l.is_numeric(), "int")?;
                expect(&r, r.is_numeric(), "int")?;
                Ok(ValueType::Bool)
            }
            BinOp::Eq | BinOp::Ne => {
                if !l.compatible(&r) {
                    return Err(mismatch(&l.to_string(), &r.to_string()));
                }
                Ok(ValueType::Bool)
            }
            BinOp::And | BinOp::Or => {
                expect(&l, l.compatible(&ValueType::Bool), "bool")?;
                expect(&r, r.compatible(&ValueType::Bool), "bool")?;
                Ok(ValueType::Bool)
            }
        }
    }

    fn call(&mut self, func: Builtin, args: &[Expr]) -> Result<ValueType, ParseError> {
        match func {
            Builtin::Max | Builtin::Min => {
                let a = self.infer(&args[0])?;
                let b = self.infer(&args[1])?;
                expect(&a, a.is_numeric(), "int")?;
                expect(&b, b.is_numeric(), "int")?;
                Ok(join(a, b))
            }
            Builtin::Abs => {
                let a = self.infer(&args[0])?;
                expect(&a, a.is_numeric(), "int")?;
                Ok(ValueType::Nat)
            }
            Builtin::Union => {
                let a = self.infer(&args[0])?;
                let b = self.infer(&args[1])?;
                expect(&a, a.is_set(), "set")?;
                if !a.compatible(&b) {
                    return Err(mismatch(&a.to_string(), &b.to_string()));
                }
                Ok(join(a, b))
            }
            Builtin::Add | Builtin::Remove | Builtin::Contains => {
                let s = self.infer(&args[0])?;
                let x = self.infer(&args[1])?;
                expect(&s, s.is_set(), "set")?;
                if let ValueType::Set(inner) = &s {
                    if !inner.compatible(&x) {
                        return Err(mismatch(&inner.to_string(), &x.to_string()));
                    }
                }
                if func == Builtin::Contains {
                    Ok(ValueType::Bool)
                } else {
                    Ok(s)
                }
            }
            Builtin::Size => {
                let s = self.infer(&args[0])?;
                expect(&s, s.is_set(), "set")?;
                Ok(ValueType::Nat)
            }
            Builtin::Insert => {
                let rel = self.infer(&args[0])?;
                expect(&rel, rel.is_relation(), "relation")?;
                let row = self.infer(&args[1])?;
                if let ValueType::Set(inner) = &rel {
                    if !inner.compatible(&row) {
                        return Err(mismatch(&inner.to_string(), &row.to_string()));
                    }
                }
                Ok(rel)
            }
            Builtin::DeleteWhere | Builtin::UpdateWhere => {
                let rel = self.infer(&args[0])?;
                expect(&rel, rel.is_relation(), "relation")?;
                let cols = rel.relation_columns().cloned().unwrap_or_default();
                let saved = self.row.replace(cols.clone());
                let checked = self.relational_args(func, &cols, &args[1..]);
                self.row = saved;
                checked?;
                Ok(rel)
            }
            Builtin::SetColumn => Err(mismatch("update_where argument", "set(...)")),
            Builtin::Unique => {
                self.infer(&args[0])?;
                Ok(ValueType::Bool)
            }
            Builtin::Snapshot => {
                for a in args {
                    self.infer(a)?;
                }
                Ok(ValueType::Any)
            }
        }
    }

    fn relational_args(
        &mut self,
        func: Builtin,
        cols: &BTreeMap<String, ValueType>,
        args: &[Expr],
    ) -> Result<(), ParseError> {
        let pred = self.infer(&args[0])?;
        expect(&pred, pred.compatible(&ValueType::Bool), "bool")?;
        if func == Builtin::UpdateWhere {
            let Expr::Call {
                func: Builtin::SetColumn,
                args: set_args,
            } = &args[1]
            else {
                return Err(mismatch("set(column, value)", &args[1].to_string()));
            };
            let column = match &set_args[0] {
                Expr::Lit {
                    value: Literal::Str(c),
                } => c.clone(),
                other => return Err(mismatch("column name", &other.to_string())),
            };
            let Some(col_ty) = cols.get(&column) else {
                if cols.is_empty() {
                    return Ok(());
                }
                return Err(mismatch(&format!("column '{}'", column), "missing column"));
            };
            let v = self.infer(&set_args[1])?;
            if !col_ty.compatible(&v) {
                return Err(mismatch(&col_ty.to_string(), &v.to_string()));
            }
        }
        Ok(())
    }
}

/// Least upper bound of two compatible types.
pub fn join(a: ValueType, b: ValueType) -> ValueType {
    match (a, b) {
        (ValueType::Any, t) | (t, ValueType::Any) => t,
        (ValueType::Nat, ValueType::Nat) => ValueType::Nat,
        (a, b) if a.is_numeric() && b.is_numeric() => ValueType::Int,
        (ValueType::Set(a), ValueType::Set(b)) => ValueType::Set(Box::new(join(*a, *b))),
        (a, _) => a,
    }
}

fn expect(found: &ValueType, ok: bool, expected: &str) -> Result<(), ParseError> {
    if ok {
        Ok(())
    } else {
        Err(mismatch(expected, &found.to_string()))
    }
}

fn mismatch(expected: &str, found: &str) -> ParseError {
    ParseError::TypeMismatch {
        effect: String::new(),
        expected: expected.to_string(),
        found: found.to_string(),
    }
}
