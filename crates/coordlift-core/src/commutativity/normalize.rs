//! Normal forms for Tier 0-2 expressions.
//!
//! Every rewrite here preserves meaning, so equal normal forms prove equal
//! values. Unequal normal forms prove nothing; callers fall back to a
//! counterexample search.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{BinOp, Builtin, Expr, Literal, UnOp};

/// Integer polynomial: sorted atom lists to coefficients. The empty list
/// is the constant term.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Poly {
    terms: BTreeMap<Vec<Expr>, i64>,
}

impl Poly {
    fn constant(c: i64) -> Poly {
        let mut p = Poly::default();
        if c != 0 {
            p.terms.insert(Vec::new(), c);
        }
        p
    }

    fn atom(e: Expr) -> Poly {
        let mut p = Poly::default();
        p.terms.insert(vec![e], 1);
        p
    }

    fn add(mut self, other: &Poly, sign: i64) -> Option<Poly> {
        for (mono, c) in &other.terms {
            let delta = c.checked_mul(sign)?;
            let slot = self.terms.entry(mono.clone()).or_insert(0);
            *slot = slot.checked_add(delta)?;
            if *slot == 0 {
                self.terms.remove(mono);
            }
        }
        Some(self)
    }

    fn mul(&self, other: &Poly) -> Option<Poly> {
        let mut out = Poly::default();
        for (ma, ca) in &self.terms {
            for (mb, cb) in &other.terms {
                let mut mono = ma.clone();
                mono.extend(mb.iter().cloned());
                mono.sort();
                let mut single = Poly::default();
                single.terms.insert(mono, ca.checked_mul(*cb)?);
                out = out.add(&single, 1)?;
            }
        }
        Some(out)
    }

    fn to_expr(&self) -> Expr {
        let mut sum: Option<Expr> = None;
        for (mono, c) in &self.terms {
            let mut term: Option<Expr> = if *c == 1 && !mono.is_empty() {
                None
            } else {
                Some(Expr::int(*c))
            };
            for atom in mono {
                term = Some(match term {
                    None => atom.clone(),
                    Some(t) => Expr::binary(BinOp::Mul, t, atom.clone()),
                });
            }
            let term = term.unwrap_or_else(|| Expr::int(*c));
            sum = Some(match sum {
                None => term,
                Some(s) => Expr::binary(BinOp::Add, s, term),
            });
        }
        sum.unwrap_or_else(|| Expr::int(0))
    }

    /// Read back a polynomial from an already-normalized expression.
    fn of(e: &Expr) -> Option<Poly> {
        match e {
            Expr::Lit {
                value: Literal::Int(v),
            } => Some(Poly::constant(*v)),
            Expr::Binary {
                op: BinOp::Add,
                lhs,
                rhs,
            } => Poly::of(lhs)?.add(&Poly::of(rhs)?, 1),
            Expr::Binary {
                op: BinOp::Sub,
                lhs,
                rhs,
            } => Poly::of(lhs)?.add(&Poly::of(rhs)?, -1),
            Expr::Binary {
                op: BinOp::Mul,
                lhs,
                rhs,
            } => Poly::of(lhs)?.mul(&Poly::of(rhs)?),
            Expr::Unary { op: UnOp::Neg, arg } => Poly::default().add(&Poly::of(arg)?, -1),
            other => Some(Poly::atom(other.clone())),
        }
    }
}

/// Normalize an expression. `None` when normalization had to give up
/// (coefficient overflow, unexpanded recursion).
pub fn normalize(e: &Expr) -> Option<Expr> {
    let inlined = inline_lets(e)?;
    norm(&inlined)
}

fn inline_lets(e: &Expr) -> Option<Expr> {
    if e.any(&|n| matches!(n, Expr::Rec { .. } | Expr::Invoke { .. })) {
        return None;
    }
    // Bottom-up, so inner lets are gone before an outer value is copied in.
    Some(e.rewrite(&|node| match node {
        Expr::Let { name, value, body } => Some(body.substitute_local(name, value)),
        _ => None,
    }))
}

fn is_arith(e: &Expr) -> bool {
    matches!(
        e,
        Expr::Binary {
            op: BinOp::Add | BinOp::Sub | BinOp::Mul,
            ..
        } | Expr::Unary { op: UnOp::Neg, .. }
    )
}

fn norm(e: &Expr) -> Option<Expr> {
    match e {
        Expr::Lit { .. }
        | Expr::Key { .. }
        | Expr::Param { .. }
        | Expr::Local { .. }
        | Expr::Row => Some(e.clone()),
        Expr::Field { base, column } => Some(Expr::Field {
            base: Box::new(norm(base)?),
            column: column.clone(),
        }),
        _ if is_arith(e) => {
            let normalized = match e {
                Expr::Binary { op, lhs, rhs } => Expr::binary(*op, norm(lhs)?, norm(rhs)?),
                Expr::Unary { op, arg } => Expr::Unary {
                    op: *op,
                    arg: Box::new(norm(arg)?),
                },
                _ => e.clone(),
            };
            Some(Poly::of(&normalized)?.to_expr())
        }
        Expr::Unary { op: UnOp::Not, arg } => {
            let arg = norm(arg)?;
            Some(match arg {
                Expr::Lit {
                    value: Literal::Bool(b),
                } => Expr::bool(!b),
                Expr::Unary {
                    op: UnOp::Not,
                    arg: inner,
                } => *inner,
                other => Expr::Unary {
                    op: UnOp::Not,
                    arg: Box::new(other),
                },
            })
        }
        Expr::Unary { .. } => None,
        Expr::Binary { op, lhs, rhs } => {
            let l = norm(lhs)?;
            let r = norm(rhs)?;
            match op {
                BinOp::And | BinOp::Or => Some(connective(*op, vec![l, r])),
                BinOp::Gt => Some(compare(BinOp::Lt, r, l)),
                BinOp::Ge => Some(compare(BinOp::Le, r, l)),
                BinOp::Eq | BinOp::Ne => {
                    let (a, b) = if l <= r { (l, r) } else { (r, l) };
                    Some(compare(*op, a, b))
                }
                _ => Some(compare(*op, l, r)),
            }
        }
        Expr::If {
            cond,
            then,
            otherwise,
        } => {
            let c = norm(cond)?;
            let t = norm(then)?;
            let o = norm(otherwise)?;
            Some(match c.as_bool() {
                Some(true) => t,
                Some(false) => o,
                None if t == o => t,
                None => Expr::If {
                    cond: Box::new(c),
                    then: Box::new(t),
                    otherwise: Box::new(o),
                },
            })
        }
        Expr::Let { .. } => norm(&inline_lets(e)?),
        Expr::Call { func, args } => {
            let args = args.iter().map(norm).collect::<Option<Vec<_>>>()?;
            Some(call(*func, args))
        }
        Expr::SetLit { items } => {
            let items: BTreeSet<Expr> = items.iter().map(norm).collect::<Option<_>>()?;
            Some(Expr::SetLit {
                items: items.into_iter().collect(),
            })
        }
        Expr::RowLit { fields } => {
            let mut out = Vec::with_capacity(fields.len());
            for (c, v) in fields {
                out.push((c.clone(), norm(v)?));
            }
            out.sort_by(|a, b| a.0.cmp(&b.0));
            Some(Expr::RowLit { fields: out })
        }
        Expr::Rec { .. } | Expr::Invoke { .. } => None,
        Expr::Opaque { name, args } => Some(Expr::Opaque {
            name: name.clone(),
            args: args.iter().map(norm).collect::<Option<Vec<_>>>()?,
        }),
    }
}

/// Comparison with both sides moved onto one polynomial when numeric.
fn compare(op: BinOp, l: Expr, r: Expr) -> Expr {
    if let (Some(a), Some(b)) = (l.as_int(), r.as_int()) {
        let v = match op {
            BinOp::Lt => a < b,
            BinOp::Le => a <= b,
            BinOp::Eq => a == b,
            BinOp::Ne => a != b,
            _ => return Expr::binary(op, l, r),
        };
        return Expr::bool(v);
    }
    if l == r {
        match op {
            BinOp::Le | BinOp::Eq => return Expr::bool(true),
            BinOp::Lt | BinOp::Ne => return Expr::bool(false),
            _ => {}
        }
    }
    Expr::binary(op, l, r)
}

fn flatten(op: BinOp, e: Expr, out: &mut Vec<Expr>) {
    match e {
        Expr::Binary { op: inner, lhs, rhs } if inner == op => {
            flatten(op, *lhs, out);
            flatten(op, *rhs, out);
        }
        other => out.push(other),
    }
}

fn connective(op: BinOp, operands: Vec<Expr>) -> Expr {
    let unit = op == BinOp::And;
    let mut flat = Vec::new();
    for o in operands {
        flatten(op, o, &mut flat);
    }
    let mut set = BTreeSet::new();
    for o in flat {
        match o.as_bool() {
            Some(b) if b == unit => {}
            Some(_) => return Expr::bool(!unit),
            None => {
                set.insert(o);
            }
        }
    }
    let mut items = set.into_iter();
    let Some(first) = items.next() else {
        return Expr::bool(unit);
    };
    items.fold(first, |acc, o| Expr::binary(op, acc, o))
}

fn flatten_call(func: Builtin, e: Expr, out: &mut Vec<Expr>) {
    match e {
        Expr::Call { func: inner, args } if inner == func => {
            for a in args {
                flatten_call(func, a, out);
            }
        }
        other => out.push(other),
    }
}

fn call(func: Builtin, args: Vec<Expr>) -> Expr {
    match func {
        Builtin::Max | Builtin::Min => {
            let mut flat = Vec::new();
            for a in args {
                flatten_call(func, a, &mut flat);
            }
            let mut constant: Option<i64> = None;
            let mut rest = BTreeSet::new();
            for a in flat {
                match a.as_int() {
                    Some(v) => {
                        constant = Some(match (constant, func) {
                            (None, _) => v,
                            (Some(c), Builtin::Max) => c.max(v),
                            (Some(c), _) => c.min(v),
                        })
                    }
                    None => {
                        rest.insert(a);
                    }
                }
            }
            let mut operands: Vec<Expr> = rest.into_iter().collect();
            if let Some(c) = constant {
                operands.insert(0, Expr::int(c));
            }
            if operands.len() == 1 {
                return operands.remove(0);
            }
            Expr::Call {
                func,
                args: operands,
            }
        }
        Builtin::Union | Builtin::Add => {
            let mut flat = Vec::new();
            let args = if func == Builtin::Add {
                let mut it = args.into_iter();
                let set = it.next().unwrap_or(Expr::SetLit { items: Vec::new() });
                let elem: Vec<Expr> = it.collect();
                vec![set, Expr::SetLit { items: elem }]
            } else {
                args
            };
            for a in args {
                flatten_call(Builtin::Union, a, &mut flat);
            }
            let mut literal = BTreeSet::new();
            let mut rest = BTreeSet::new();
            for a in flat {
                match a {
                    Expr::SetLit { items } => literal.extend(items),
                    other => {
                        rest.insert(other);
                    }
                }
            }
            let mut operands: Vec<Expr> = rest.into_iter().collect();
            if !literal.is_empty() || operands.is_empty() {
                operands.push(Expr::SetLit {
                    items: literal.into_iter().collect(),
                });
            }
            if operands.len() == 1 {
                return operands.remove(0);
            }
            Expr::Call {
                func: Builtin::Union,
                args: operands,
            }
        }
        Builtin::Abs => match args[0].as_int() {
            Some(v) => v.checked_abs().map(Expr::int).unwrap_or(Expr::Call { func, args }),
            None => Expr::Call { func, args },
        },
        Builtin::Size => match &args[0] {
            Expr::SetLit { items } if items.iter().all(Expr::is_lit) => {
                i64::try_from(items.len()).map(Expr::int).unwrap_or(Expr::Call { func, args })
            }
            _ => Expr::Call { func, args },
        },
        _ => Expr::Call { func, args },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(n: &str) -> Expr {
        Expr::key(n)
    }

    fn p(n: &str) -> Expr {
        Expr::param(n)
    }

    #[test]
    fn additive_chains_are_order_independent() {
        let a = Expr::binary(BinOp::Add, Expr::binary(BinOp::Add, k("n"), p("x")), p("y"));
        let b = Expr::binary(BinOp::Add, Expr::binary(BinOp::Add, k("n"), p("y")), p("x"));
        assert_eq!(normalize(&a), normalize(&b));
        let c = Expr::binary(BinOp::Sub, Expr::binary(BinOp::Add, k("n"), p("x")), p("x"));
        assert_eq!(normalize(&c), Some(k("n")));
    }

    #[test]
    fn polynomials_distribute() {
        let lhs = Expr::binary(
            BinOp::Mul,
            Expr::binary(BinOp::Add, k("a"), Expr::int(1)),
            Expr::int(2),
        );
        let rhs = Expr::binary(
            BinOp::Add,
            Expr::binary(BinOp::Add, k("a"), k("a")),
            Expr::int(2),
        );
        assert_eq!(normalize(&lhs), normalize(&rhs));
    }

    #[test]
    fn set_adds_merge_into_one_literal() {
        let ab = Expr::call(
            Builtin::Add,
            vec![Expr::call(Builtin::Add, vec![k("s"), p("x")]), p("y")],
        );
        let ba = Expr::call(
            Builtin::Add,
            vec![Expr::call(Builtin::Add, vec![k("s"), p("y")]), p("x")],
        );
        assert_eq!(normalize(&ab), normalize(&ba));
    }

    #[test]
    fn max_is_flattened_and_deduplicated() {
        let a = Expr::call(
            Builtin::Max,
            vec![Expr::call(Builtin::Max, vec![k("m"), p("x")]), k("m")],
        );
        let b = Expr::call(Builtin::Max, vec![p("x"), k("m")]);
        assert_eq!(normalize(&a), normalize(&b));
    }

    #[test]
    fn lets_inline_and_branches_collapse() {
        let e = Expr::Let {
            name: "t".to_string(),
            value: Box::new(p("x")),
            body: Box::new(Expr::If {
                cond: Box::new(Expr::binary(BinOp::Gt, k("n"), Expr::int(0))),
                then: Box::new(Expr::binary(BinOp::Add, k("n"), Expr::Local { name: "t".to_string() })),
                otherwise: Box::new(Expr::binary(BinOp::Add, p("x"), k("n"))),
            }),
        };
        assert_eq!(
            normalize(&e),
            normalize(&Expr::binary(BinOp::Add, k("n"), p("x")))
        );
    }

    #[test]
    fn guarded_decrements_do_not_normalize_equal() {
        let guard = |q: &str, inner: Expr| Expr::If {
            cond: Box::new(Expr::binary(BinOp::Ge, inner.clone(), p(q))),
            then: Box::new(Expr::binary(BinOp::Sub, inner.clone(), p(q))),
            otherwise: Box::new(inner),
        };
        let ab = guard("y", guard("x", k("n")));
        let ba = guard("x", guard("y", k("n")));
        assert_ne!(normalize(&ab), normalize(&ba));
    }

    #[test]
    fn recursion_is_not_normalized() {
        let e = Expr::Invoke {
            name: "f".to_string(),
            args: vec![k("n")],
        };
        assert_eq!(normalize(&e), None);
    }
}
