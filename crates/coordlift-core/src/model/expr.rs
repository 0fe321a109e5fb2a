//! Expression trees of the restricted specification language.
//!
//! Bodies are plain owned trees: recursion is expressed with the bounded
//! `rec` binder, never by sharing nodes, so no body can reference itself.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "lit", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Int(i64),
    Bool(bool),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

/// Builtin functions understood by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Builtin {
    Max,
    Min,
    Abs,
    Union,
    Add,
    Remove,
    Contains,
    Size,
    Insert,
    DeleteWhere,
    UpdateWhere,
    /// `set(col, e)`, only valid as the last argument of `update_where`.
    SetColumn,
    /// `unique(key)`, only valid inside invariants.
    Unique,
    /// Observation of foreign keys by a read fragment. Not user-visible.
    Snapshot,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Builtin> {
        Some(match name {
            "max" => Builtin::Max,
            "min" => Builtin::Min,
            "abs" => Builtin::Abs,
            "union" => Builtin::Union,
            "add" => Builtin::Add,
            "remove" => Builtin::Remove,
            "contains" => Builtin::Contains,
            "size" => Builtin::Size,
            "insert" => Builtin::Insert,
            "delete_where" => Builtin::DeleteWhere,
            "update_where" => Builtin::UpdateWhere,
            "set" => Builtin::SetColumn,
            "unique" => Builtin::Unique,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Max => "max",
            Builtin::Min => "min",
            Builtin::Abs => "abs",
            Builtin::Union => "union",
            Builtin::Add => "add",
            Builtin::Remove => "remove",
            Builtin::Contains => "contains",
            Builtin::Size => "size",
            Builtin::Insert => "insert",
            Builtin::DeleteWhere => "delete_where",
            Builtin::UpdateWhere => "update_where",
            Builtin::SetColumn => "set",
            Builtin::Unique => "unique",
            Builtin::Snapshot => "snapshot",
        }
    }

    pub fn arity(self) -> Option<usize> {
        match self {
            Builtin::Abs | Builtin::Size | Builtin::Unique => Some(1),
            Builtin::Max
            | Builtin::Min
            | Builtin::Union
            | Builtin::Add
            | Builtin::Remove
            | Builtin::Contains
            | Builtin::Insert
            | Builtin::DeleteWhere
            | Builtin::SetColumn => Some(2),
            Builtin::UpdateWhere => Some(3),
            Builtin::Snapshot => None,
        }
    }

    pub fn is_relational(self) -> bool {
        matches!(
            self,
            Builtin::Insert | Builtin::DeleteWhere | Builtin::UpdateWhere
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Expr {
    Lit {
        value: Literal,
    },
    /// Read of a declared state key (`self` resolves to the target key).
    Key {
        name: String,
    },
    Param {
        name: String,
    },
    /// `let`-bound variable or `rec` parameter.
    Local {
        name: String,
    },
    /// The row binder `it` inside relational predicates.
    Row,
    Field {
        base: Box<Expr>,
        column: String,
    },
    Unary {
        op: UnOp,
        arg: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Let {
        name: String,
        value: Box<Expr>,
        body: Box<Expr>,
    },
    Call {
        func: Builtin,
        args: Vec<Expr>,
    },
    SetLit {
        items: Vec<Expr>,
    },
    RowLit {
        fields: Vec<(String, Expr)>,
    },
    /// `rec name(params) bound N = body in rest`.
    Rec {
        name: String,
        params: Vec<String>,
        bound: u32,
        body: Box<Expr>,
        rest: Box<Expr>,
    },
    /// Call of a `rec`-bound function.
    Invoke {
        name: String,
        args: Vec<Expr>,
    },
    /// Call of a declared uninterpreted function.
    Opaque {
        name: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn int(v: i64) -> Expr {
        Expr::Lit {
            value: Literal::Int(v),
        }
    }

    pub fn bool(v: bool) -> Expr {
        Expr::Lit {
            value: Literal::Bool(v),
        }
    }

    pub fn key(name: &str) -> Expr {
        Expr::Key {
            name: name.to_string(),
        }
    }

    pub fn param(name: &str) -> Expr {
        Expr::Param {
            name: name.to_string(),
        }
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn call(func: Builtin, args: Vec<Expr>) -> Expr {
        Expr::Call { func, args }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::Lit {
                value: Literal::Int(v),
            } => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Expr::Lit {
                value: Literal::Bool(v),
            } => Some(*v),
            _ => None,
        }
    }

    pub fn is_lit(&self) -> bool {
        matches!(self, Expr::Lit { .. })
    }

    /// Direct children, in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Lit { .. }
            | Expr::Key { .. }
            | Expr::Param { .. }
            | Expr::Local { .. }
            | Expr::Row => Vec::new(),
            Expr::Field { base, .. } => vec![base],
            Expr::Unary { arg, .. } => vec![arg],
            Expr::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            Expr::If {
                cond,
                then,
                otherwise,
            } => vec![cond, then, otherwise],
            Expr::Let { value, body, .. } => vec![value, body],
            Expr::Call { args, .. } | Expr::Invoke { args, .. } | Expr::Opaque { args, .. } => {
                args.iter().collect()
            }
            Expr::SetLit { items } => items.iter().collect(),
            Expr::RowLit { fields } => fields.iter().map(|(_, e)| e).collect(),
            Expr::Rec { body, rest, .. } => vec![body, rest],
        }
    }

    /// Pre-order visit of every node.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    /// Number of nodes.
    pub fn size(&self) -> usize {
        let mut n = 0;
        self.walk(&mut |_| n += 1);
        n
    }

    /// Any node satisfying `pred`.
    pub fn any(&self, pred: &dyn Fn(&Expr) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        self.children().into_iter().any(|c| c.any(pred))
    }

    /// State keys read anywhere in the tree.
    pub fn keys(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.walk(&mut |e| {
            if let Expr::Key { name } = e {
                out.insert(name.clone());
            }
        });
        out
    }

    /// Parameters referenced anywhere in the tree.
    pub fn params(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.walk(&mut |e| {
            if let Expr::Param { name } = e {
                out.insert(name.clone());
            }
        });
        out
    }

    /// Row columns referenced through `it.col`.
    pub fn columns(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.walk(&mut |e| {
            if let Expr::Field { base, column } = e {
                if matches!(base.as_ref(), Expr::Row) {
                    out.insert(column.clone());
                }
            }
        });
        out
    }

    pub fn mentions_key(&self, key: &str) -> bool {
        self.any(&|e| matches!(e, Expr::Key { name } if name == key))
    }

    /// Rebuild the tree bottom-up, letting `f` replace any node.
    ///
    /// `f` sees a node after its children were rewritten; returning `None`
    /// keeps the node.
    pub fn rewrite(&self, f: &dyn Fn(&Expr) -> Option<Expr>) -> Expr {
        let rebuilt = match self {
            Expr::Lit { .. }
            | Expr::Key { .. }
            | Expr::Param { .. }
            | Expr::Local { .. }
            | Expr::Row => self.clone(),
            Expr::Field { base, column } => Expr::Field {
                base: Box::new(base.rewrite(f)),
                column: column.clone(),
            },
            Expr::Unary { op, arg } => Expr::Unary {
                op: *op,
                arg: Box::new(arg.rewrite(f)),
            },
            Expr::Binary { op, lhs, rhs } => Expr::Binary {
                op: *op,
                lhs: Box::new(lhs.rewrite(f)),
                rhs: Box::new(rhs.rewrite(f)),
            },
            Expr::If {
                cond,
                then,
                otherwise,
            } => Expr::If {
                cond: Box::new(cond.rewrite(f)),
                then: Box::new(then.rewrite(f)),
                otherwise: Box::new(otherwise.rewrite(f)),
            },
            Expr::Let { name, value, body } => Expr::Let {
                name: name.clone(),
                value: Box::new(value.rewrite(f)),
                body: Box::new(body.rewrite(f)),
            },
            Expr::Call { func, args } => Expr::Call {
                func: *func,
                args: args.iter().map(|a| a.rewrite(f)).collect(),
            },
            Expr::SetLit { items } => Expr::SetLit {
                items: items.iter().map(|a| a.rewrite(f)).collect(),
            },
            Expr::RowLit { fields } => Expr::RowLit {
                fields: fields
                    .iter()
                    .map(|(c, e)| (c.clone(), e.rewrite(f)))
                    .collect(),
            },
            Expr::Rec {
                name,
                params,
                bound,
                body,
                rest,
            } => Expr::Rec {
                name: name.clone(),
                params: params.clone(),
                bound: *bound,
                body: Box::new(body.rewrite(f)),
                rest: Box::new(rest.rewrite(f)),
            },
            Expr::Invoke { name, args } => Expr::Invoke {
                name: name.clone(),
                args: args.iter().map(|a| a.rewrite(f)).collect(),
            },
            Expr::Opaque { name, args } => Expr::Opaque {
                name: name.clone(),
                args: args.iter().map(|a| a.rewrite(f)).collect(),
            },
        };
        f(&rebuilt).unwrap_or(rebuilt)
    }

    /// Replace every read of `key` by `with`.
    pub fn substitute_key(&self, key: &str, with: &Expr) -> Expr {
        self.rewrite(&|e| match e {
            Expr::Key { name } if name == key => Some(with.clone()),
            _ => None,
        })
    }

    /// Rename parameters by appending `suffix`; used to model two concurrent
    /// instances of one effect with independent arguments.
    pub fn rename_params(&self, suffix: &str) -> Expr {
        self.rewrite(&|e| match e {
            Expr::Param { name } => Some(Expr::Param {
                name: format!("{}{}", name, suffix),
            }),
            _ => None,
        })
    }

    /// Capture-avoiding substitution of a `let`/`rec` local.
    pub fn substitute_local(&self, local: &str, with: &Expr) -> Expr {
        match self {
            Expr::Local { name } if name == local => with.clone(),
            Expr::Let { name, value, body } => Expr::Let {
                name: name.clone(),
                value: Box::new(value.substitute_local(local, with)),
                body: if name == local {
                    body.clone()
                } else {
                    Box::new(body.substitute_local(local, with))
                },
            },
            Expr::Rec {
                name,
                params,
                bound,
                body,
                rest,
            } => Expr::Rec {
                name: name.clone(),
                params: params.clone(),
                bound: *bound,
                body: if params.iter().any(|p| p == local) {
                    body.clone()
                } else {
                    Box::new(body.substitute_local(local, with))
                },
                rest: Box::new(rest.substitute_local(local, with)),
            },
            Expr::Field { base, column } => Expr::Field {
                base: Box::new(base.substitute_local(local, with)),
                column: column.clone(),
            },
            Expr::Unary { op, arg } => Expr::Unary {
                op: *op,
                arg: Box::new(arg.substitute_local(local, with)),
            },
            Expr::Binary { op, lhs, rhs } => Expr::Binary {
                op: *op,
                lhs: Box::new(lhs.substitute_local(local, with)),
                rhs: Box::new(rhs.substitute_local(local, with)),
            },
            Expr::If {
                cond,
                then,
                otherwise,
            } => Expr::If {
                cond: Box::new(cond.substitute_local(local, with)),
                then: Box::new(then.substitute_local(local, with)),
                otherwise: Box::new(otherwise.substitute_local(local, with)),
            },
            Expr::Call { func, args } => Expr::Call {
                func: *func,
                args: args
                    .iter()
                    .map(|a| a.substitute_local(local, with))
                    .collect(),
            },
            Expr::SetLit { items } => Expr::SetLit {
                items: items
                    .iter()
                    .map(|a| a.substitute_local(local, with))
                    .collect(),
            },
            Expr::RowLit { fields } => Expr::RowLit {
                fields: fields
                    .iter()
                    .map(|(c, e)| (c.clone(), e.substitute_local(local, with)))
                    .collect(),
            },
            Expr::Invoke { name, args } => Expr::Invoke {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|a| a.substitute_local(local, with))
                    .collect(),
            },
            Expr::Opaque { name, args } => Expr::Opaque {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|a| a.substitute_local(local, with))
                    .collect(),
            },
            Expr::Lit { .. } | Expr::Key { .. } | Expr::Param { .. } | Expr::Local { .. } => {
                self.clone()
            }
            Expr::Row => Expr::Row,
        }
    }

    /// Replace the row binder `it` with a concrete row expression.
    pub fn substitute_row(&self, row: &Expr) -> Expr {
        self.rewrite(&|e| match e {
            Expr::Row => Some(row.clone()),
            Expr::Field { base, column } => match base.as_ref() {
                Expr::RowLit { fields } => fields
                    .iter()
                    .find(|(c, _)| c == column)
                    .map(|(_, v)| v.clone()),
                _ => None,
            },
            _ => None,
        })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Lit { value } => match value {
                Literal::Int(v) => write!(f, "{}", v),
                Literal::Bool(v) => write!(f, "{}", v),
                Literal::Str(s) => write!(f, "{:?}", s),
            },
            Expr::Key { name } => write!(f, "{}", name),
            Expr::Param { name } | Expr::Local { name } => write!(f, "{}", name),
            Expr::Row => write!(f, "it"),
            Expr::Field { base, column } => write!(f, "{}.{}", base, column),
            Expr::Unary { op, arg } => match op {
                UnOp::Neg => write!(f, "-({})", arg),
                UnOp::Not => write!(f, "!({})", arg),
            },
            Expr::Binary { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
            Expr::If {
                cond,
                then,
                otherwise,
            } => write!(f, "if {} then {} else {}", cond, then, otherwise),
            Expr::Let { name, value, body } => write!(f, "let {} = {} in {}", name, value, body),
            Expr::Call { func, args } => {
                write!(f, "{}(", func.name())?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Expr::SetLit { items } => {
                write!(f, "{{")?;
                write_list(f, items)?;
                write!(f, "}}")
            }
            Expr::RowLit { fields } => {
                write!(f, "row(")?;
                for (i, (c, e)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", c, e)?;
                }
                write!(f, ")")
            }
            Expr::Rec {
                name,
                params,
                bound,
                body,
                rest,
            } => write!(
                f,
                "rec {}({}) bound {} = {} in {}",
                name,
                params.join(", "),
                bound,
                body,
                rest
            ),
            Expr::Invoke { name, args } | Expr::Opaque { name, args } => {
                write!(f, "{}(", name)?;
                write_list(f, args)?;
                write!(f, ")")
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}
