//! Tier 3: commutativity of relational operations.
//!
//! Pairs of `insert`, `delete_where` and `update_where` on one relation are
//! decided by rules that reduce to satisfiability of predicate conjunctions.
//! Predicates are boolean combinations of `var op const` atoms plus
//! `var == var` / `var != var`, decided by union-find over equalities,
//! per-class intervals and a small search over disequalities.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::eval::{Bindings, Value};
use crate::model::{BinOp, Builtin, EffectNode, Expr, Literal, UnOp, ValueType};

use super::normalize::normalize;

/// Most DNF clauses explored before the procedure gives up.
const DNF_CLAUSE_CAP: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Term {
    Const(Literal),
    Var { name: String, offset: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Atom {
    /// One of `Eq`, `Ne`, `Lt`, `Le`.
    op: BinOp,
    lhs: Term,
    rhs: Term,
}

impl Atom {
    fn negate(self) -> Atom {
        match self.op {
            BinOp::Eq => Atom { op: BinOp::Ne, ..self },
            BinOp::Ne => Atom { op: BinOp::Eq, ..self },
            BinOp::Lt => Atom {
                op: BinOp::Le,
                lhs: self.rhs,
                rhs: self.lhs,
            },
            _ => Atom {
                op: BinOp::Lt,
                lhs: self.rhs,
                rhs: self.lhs,
            },
        }
    }
}

#[derive(Debug, Clone)]
enum Formula {
    Const(bool),
    Atom(Atom),
    And(Vec<Formula>),
    Or(Vec<Formula>),
    Not(Box<Formula>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sat {
    Sat(BTreeMap<String, Value>),
    Unsat,
    Unknown(String),
}

fn term(e: &Expr) -> Result<Term, String> {
    match e {
        Expr::Lit { value } => Ok(Term::Const(value.clone())),
        Expr::Param { name } => Ok(Term::Var {
            name: format!("p:{}", name),
            offset: 0,
        }),
        Expr::Key { name } => Ok(Term::Var {
            name: format!("k:{}", name),
            offset: 0,
        }),
        Expr::Field { base, column } if matches!(base.as_ref(), Expr::Row) => Ok(Term::Var {
            name: format!("r:{}", column),
            offset: 0,
        }),
        Expr::Binary {
            op: op @ (BinOp::Add | BinOp::Sub),
            lhs,
            rhs,
        } => {
            let delta = rhs
                .as_int()
                .ok_or_else(|| format!("'{}' is not an offset term", e))?;
            let delta = if *op == BinOp::Sub {
                delta.checked_neg().ok_or("offset overflow")?
            } else {
                delta
            };
            match term(lhs)? {
                Term::Const(Literal::Int(c)) => Ok(Term::Const(Literal::Int(
                    c.checked_add(delta).ok_or("offset overflow")?,
                ))),
                Term::Var { name, offset } => Ok(Term::Var {
                    name,
                    offset: offset.checked_add(delta).ok_or("offset overflow")?,
                }),
                Term::Const(_) => Err(format!("'{}' adds to a non-integer", e)),
            }
        }
        other => Err(format!("'{}' is not a simple term", other)),
    }
}

fn formula(e: &Expr) -> Result<Formula, String> {
    match e {
        Expr::Lit {
            value: Literal::Bool(b),
        } => Ok(Formula::Const(*b)),
        Expr::Unary { op: UnOp::Not, arg } => Ok(Formula::Not(Box::new(formula(arg)?))),
        Expr::Binary {
            op: BinOp::And,
            lhs,
            rhs,
        } => Ok(Formula::And(vec![formula(lhs)?, formula(rhs)?])),
        Expr::Binary {
            op: BinOp::Or,
            lhs,
            rhs,
        } => Ok(Formula::Or(vec![formula(lhs)?, formula(rhs)?])),
        Expr::Binary { op, lhs, rhs } if op.is_comparison() => {
            let (l, r) = (term(lhs)?, term(rhs)?);
            let atom = match op {
                BinOp::Gt => Atom {
                    op: BinOp::Lt,
                    lhs: r,
                    rhs: l,
                },
                BinOp::Ge => Atom {
                    op: BinOp::Le,
                    lhs: r,
                    rhs: l,
                },
                _ => Atom {
                    op: *op,
                    lhs: l,
                    rhs: r,
                },
            };
            Ok(Formula::Atom(atom))
        }
        Expr::Field { .. } | Expr::Param { .. } | Expr::Key { .. } => Ok(Formula::Atom(Atom {
            op: BinOp::Eq,
            lhs: term(e)?,
            rhs: Term::Const(Literal::Bool(true)),
        })),
        other => Err(format!("'{}' is outside the relational fragment", other)),
    }
}

fn nnf(f: Formula, negated: bool) -> Formula {
    match f {
        Formula::Const(b) => Formula::Const(b != negated),
        Formula::Atom(a) => Formula::Atom(if negated { a.negate() } else { a }),
        Formula::Not(inner) => nnf(*inner, !negated),
        Formula::And(items) => {
            let items = items.into_iter().map(|i| nnf(i, negated)).collect();
            if negated {
                Formula::Or(items)
            } else {
                Formula::And(items)
            }
        }
        Formula::Or(items) => {
            let items = items.into_iter().map(|i| nnf(i, negated)).collect();
            if negated {
                Formula::And(items)
            } else {
                Formula::Or(items)
            }
        }
    }
}

/// Clauses of a formula in negation normal form. `None` above the cap.
fn dnf(f: &Formula) -> Option<Vec<Vec<Atom>>> {
    match f {
        Formula::Const(true) => Some(vec![Vec::new()]),
        Formula::Const(false) => Some(Vec::new()),
        Formula::Atom(a) => Some(vec![vec![a.clone()]]),
        Formula::Or(items) => {
            let mut out = Vec::new();
            for i in items {
                out.extend(dnf(i)?);
                if out.len() > DNF_CLAUSE_CAP {
                    return None;
                }
            }
            Some(out)
        }
        Formula::And(items) => {
            let mut acc: Vec<Vec<Atom>> = vec![Vec::new()];
            for i in items {
                let clauses = dnf(i)?;
                let mut next = Vec::new();
                for left in &acc {
                    for right in &clauses {
                        let mut c = left.clone();
                        c.extend(right.iter().cloned());
                        next.push(c);
                        if next.len() > DNF_CLAUSE_CAP {
                            return None;
                        }
                    }
                }
                acc = next;
            }
            Some(acc)
        }
        Formula::Not(_) => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sort {
    Int,
    Nat,
    Bool,
    Str,
}

fn sort_of(ty: &ValueType) -> Option<Sort> {
    match ty {
        ValueType::Int | ValueType::Any => Some(Sort::Int),
        ValueType::Nat => Some(Sort::Nat),
        ValueType::Bool => Some(Sort::Bool),
        ValueType::Str => Some(Sort::Str),
        _ => None,
    }
}

/// Domain of one equivalence class of variables.
#[derive(Debug, Clone)]
struct Class {
    sort: Sort,
    lo: Option<i128>,
    hi: Option<i128>,
    excluded: BTreeSet<i128>,
    pinned_str: Option<String>,
    excluded_str: BTreeSet<String>,
}

impl Class {
    fn new(sort: Sort) -> Class {
        let (lo, hi) = match sort {
            Sort::Nat => (Some(0), None),
            Sort::Bool => (Some(0), Some(1)),
            _ => (None, None),
        };
        Class {
            sort,
            lo,
            hi,
            excluded: BTreeSet::new(),
            pinned_str: None,
            excluded_str: BTreeSet::new(),
        }
    }

    fn raise_lo(&mut self, v: i128) {
        self.lo = Some(self.lo.map_or(v, |l| l.max(v)));
    }

    fn lower_hi(&mut self, v: i128) {
        self.hi = Some(self.hi.map_or(v, |h| h.min(v)));
    }

    fn is_str(&self) -> bool {
        self.sort == Sort::Str
    }

    /// Values the class may take, when there are at most `limit` of them.
    fn finite_domain(&self, limit: usize) -> Option<Vec<Value>> {
        if self.is_str() {
            return self.pinned_str.as_ref().map(|s| {
                if self.excluded_str.contains(s) {
                    Vec::new()
                } else {
                    vec![Value::Str(s.clone())]
                }
            });
        }
        let (lo, hi) = (self.lo?, self.hi?);
        if hi < lo {
            return Some(Vec::new());
        }
        let span = hi - lo + 1;
        if span > (limit + self.excluded.len()) as i128 {
            return None;
        }
        let values: Vec<Value> = (lo..=hi)
            .filter(|v| !self.excluded.contains(v))
            .map(|v| self.value(v))
            .collect();
        (values.len() <= limit).then_some(values)
    }

    fn value(&self, v: i128) -> Value {
        match self.sort {
            Sort::Bool => Value::Bool(v != 0),
            _ => Value::Int(v as i64),
        }
    }

    fn is_empty(&self) -> bool {
        if self.is_str() {
            return matches!(&self.pinned_str, Some(s) if self.excluded_str.contains(s));
        }
        match (self.lo, self.hi) {
            (Some(l), Some(h)) => {
                if h < l {
                    return true;
                }
                let span = h - l + 1;
                span <= self.excluded.len() as i128
                    && (l..=h).all(|v| self.excluded.contains(&v))
            }
            _ => false,
        }
    }

    /// Any allowed value outside `taken`.
    fn pick(&self, taken: &BTreeSet<Value>) -> Option<Value> {
        if self.is_str() {
            if let Some(s) = &self.pinned_str {
                let v = Value::Str(s.clone());
                return (!taken.contains(&v) && !self.excluded_str.contains(s)).then_some(v);
            }
            return (0..)
                .map(|i| format!("s{}", i))
                .filter(|s| !self.excluded_str.contains(s))
                .map(Value::Str)
                .find(|v| !taken.contains(v));
        }
        let start = match (self.lo, self.hi) {
            (Some(l), _) => l,
            (None, Some(h)) => h.min(0),
            (None, None) => 0,
        };
        let limit = taken.len() + self.excluded.len() + 1;
        let ascending = self.lo.is_some() || self.hi.is_none();
        for step in 0..=(limit as i128) {
            let v = if ascending { start + step } else { start - step };
            if self.hi.is_some_and(|h| v > h) || self.lo.is_some_and(|l| v < l) {
                return None;
            }
            if self.excluded.contains(&v) {
                continue;
            }
            let value = self.value(v);
            if !taken.contains(&value) {
                return Some(value);
            }
        }
        None
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}

fn const_int(lit: &Literal, sort: Sort) -> Option<i128> {
    match (lit, sort) {
        (Literal::Int(v), Sort::Int | Sort::Nat) => Some(i128::from(*v)),
        (Literal::Bool(b), Sort::Bool) => Some(i128::from(*b)),
        _ => None,
    }
}

fn eval_const(op: BinOp, a: &Literal, b: &Literal) -> Option<bool> {
    match (a, b) {
        (Literal::Int(x), Literal::Int(y)) => Some(match op {
            BinOp::Eq => x == y,
            BinOp::Ne => x != y,
            BinOp::Lt => x < y,
            BinOp::Le => x <= y,
            _ => return None,
        }),
        _ => match op {
            BinOp::Eq => Some(a == b),
            BinOp::Ne => Some(a != b),
            _ => None,
        },
    }
}

fn solve_clause(clause: &[Atom], types: &dyn Fn(&str) -> Option<ValueType>) -> Sat {
    let mut names: Vec<String> = Vec::new();
    let mut index: BTreeMap<String, usize> = BTreeMap::new();
    for atom in clause {
        for t in [&atom.lhs, &atom.rhs] {
            if let Term::Var { name, .. } = t {
                if !index.contains_key(name) {
                    index.insert(name.clone(), names.len());
                    names.push(name.clone());
                }
            }
        }
    }
    let mut sorts = Vec::with_capacity(names.len());
    for n in &names {
        match types(n).as_ref().and_then(sort_of) {
            Some(s) => sorts.push(s),
            None => return Sat::Unknown(format!("variable '{}' has no scalar type", n)),
        }
    }

    let mut uf = UnionFind {
        parent: (0..names.len()).collect(),
    };
    let mut bounds: Vec<(usize, BinOp, Literal)> = Vec::new();
    let mut diseq: Vec<(usize, usize)> = Vec::new();
    for atom in clause {
        match (&atom.lhs, &atom.rhs) {
            (Term::Const(a), Term::Const(b)) => match eval_const(atom.op, a, b) {
                Some(true) => {}
                Some(false) => return Sat::Unsat,
                None => return Sat::Unknown(format!("cannot compare {:?} and {:?}", a, b)),
            },
            (Term::Var { name, offset }, Term::Const(c)) => {
                let c = match (c, offset) {
                    (Literal::Int(v), off) => Literal::Int(match v.checked_sub(*off) {
                        Some(x) => x,
                        None => return Sat::Unknown("offset overflow".to_string()),
                    }),
                    (other, 0) => other.clone(),
                    _ => return Sat::Unknown("offset on a non-integer".to_string()),
                };
                bounds.push((index[name], atom.op, c));
            }
            (Term::Const(c), Term::Var { name, offset }) => {
                let c = match (c, offset) {
                    (Literal::Int(v), off) => Literal::Int(match v.checked_sub(*off) {
                        Some(x) => x,
                        None => return Sat::Unknown("offset overflow".to_string()),
                    }),
                    (other, 0) => other.clone(),
                    _ => return Sat::Unknown("offset on a non-integer".to_string()),
                };
                // c < v  ==  v > c, kept as a flipped bound.
                let flipped = match atom.op {
                    BinOp::Lt => BinOp::Gt,
                    BinOp::Le => BinOp::Ge,
                    other => other,
                };
                bounds.push((index[name], flipped, c));
            }
            (
                Term::Var {
                    name: a,
                    offset: oa,
                },
                Term::Var {
                    name: b,
                    offset: ob,
                },
            ) => {
                if oa != ob || !matches!(atom.op, BinOp::Eq | BinOp::Ne) {
                    return Sat::Unknown("ordering between two variables".to_string());
                }
                let (ia, ib) = (index[a], index[b]);
                if atom.op == BinOp::Eq {
                    uf.union(ia, ib);
                } else {
                    diseq.push((ia, ib));
                }
            }
        }
    }

    let mut classes: BTreeMap<usize, Class> = BTreeMap::new();
    for (i, sort) in sorts.iter().enumerate() {
        let root = uf.find(i);
        let class = classes.entry(root).or_insert_with(|| Class::new(*sort));
        if class.sort != *sort {
            let numeric = |s: Sort| matches!(s, Sort::Int | Sort::Nat);
            if numeric(class.sort) && numeric(*sort) {
                if *sort == Sort::Nat {
                    class.raise_lo(0);
                }
            } else {
                return Sat::Unknown("equality between different sorts".to_string());
            }
        }
    }

    for (var, op, c) in bounds {
        let root = uf.find(var);
        let Some(class) = classes.get_mut(&root) else {
            continue;
        };
        if class.is_str() {
            let Literal::Str(s) = c else {
                return Sat::Unknown("string compared to non-string".to_string());
            };
            match op {
                BinOp::Eq => match &class.pinned_str {
                    Some(p) if *p != s => return Sat::Unsat,
                    _ => class.pinned_str = Some(s),
                },
                BinOp::Ne => {
                    class.excluded_str.insert(s);
                }
                _ => return Sat::Unknown("ordering on strings".to_string()),
            }
            continue;
        }
        let Some(v) = const_int(&c, class.sort) else {
            return Sat::Unknown(format!("constant {:?} does not fit the variable", c));
        };
        match op {
            BinOp::Eq => {
                class.raise_lo(v);
                class.lower_hi(v);
            }
            BinOp::Ne => {
                class.excluded.insert(v);
            }
            BinOp::Lt => class.lower_hi(v - 1),
            BinOp::Le => class.lower_hi(v),
            BinOp::Gt => class.raise_lo(v + 1),
            BinOp::Ge => class.raise_lo(v),
            _ => return Sat::Unknown("unsupported comparison".to_string()),
        }
    }

    if classes.values().any(Class::is_empty) {
        return Sat::Unsat;
    }

    // Disequalities between classes.
    let mut edges: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
    for (a, b) in diseq {
        let (ra, rb) = (uf.find(a), uf.find(b));
        if ra == rb {
            return Sat::Unsat;
        }
        edges.entry(ra).or_default().insert(rb);
        edges.entry(rb).or_default().insert(ra);
    }

    let roots: Vec<usize> = classes.keys().copied().collect();
    let mut constrained = Vec::new();
    let mut free = Vec::new();
    for r in &roots {
        let degree = edges.get(r).map_or(0, BTreeSet::len);
        match classes[r].finite_domain(degree) {
            Some(domain) => constrained.push((*r, domain)),
            None => free.push(*r),
        }
    }

    let mut assignment: BTreeMap<usize, Value> = BTreeMap::new();
    if !assign(&constrained, 0, &edges, &mut assignment) {
        return Sat::Unsat;
    }
    for r in free {
        let taken: BTreeSet<Value> = edges
            .get(&r)
            .map(|ns| ns.iter().filter_map(|n| assignment.get(n).cloned()).collect())
            .unwrap_or_default();
        match classes[&r].pick(&taken) {
            Some(v) => {
                assignment.insert(r, v);
            }
            None => return Sat::Unknown("no free value for an unconstrained class".to_string()),
        }
    }

    let mut model = BTreeMap::new();
    for (i, name) in names.iter().enumerate() {
        let root = uf.find(i);
        if let Some(v) = assignment.get(&root) {
            model.insert(name.clone(), v.clone());
        }
    }
    Sat::Sat(model)
}

fn assign(
    constrained: &[(usize, Vec<Value>)],
    at: usize,
    edges: &BTreeMap<usize, BTreeSet<usize>>,
    assignment: &mut BTreeMap<usize, Value>,
) -> bool {
    let Some((root, domain)) = constrained.get(at) else {
        return true;
    };
    for v in domain {
        let clash = edges
            .get(root)
            .is_some_and(|ns| ns.iter().any(|n| assignment.get(n) == Some(v)));
        if clash {
            continue;
        }
        assignment.insert(*root, v.clone());
        if assign(constrained, at + 1, edges, assignment) {
            return true;
        }
        assignment.remove(root);
    }
    false
}

/// Decide satisfiability of a predicate. Variables are named `p:<param>`,
/// `k:<key>` and `r:<column>`.
pub fn satisfiable(pred: &Expr, types: &dyn Fn(&str) -> Option<ValueType>) -> Sat {
    let f = match formula(pred) {
        Ok(f) => nnf(f, false),
        Err(why) => return Sat::Unknown(why),
    };
    let Some(clauses) = dnf(&f) else {
        return Sat::Unknown(format!("more than {} DNF clauses", DNF_CLAUSE_CAP));
    };
    let mut unknown = None;
    for clause in clauses {
        match solve_clause(&clause, types) {
            Sat::Sat(model) => return Sat::Sat(model),
            Sat::Unsat => {}
            Sat::Unknown(why) => unknown = Some(why),
        }
    }
    match unknown {
        Some(why) => Sat::Unknown(why),
        None => Sat::Unsat,
    }
}

enum RelOp<'a> {
    Insert(&'a Expr),
    Delete(&'a Expr),
    Update {
        pred: &'a Expr,
        column: String,
        value: &'a Expr,
    },
}

fn rel_op(effect: &EffectNode) -> Option<RelOp<'_>> {
    let Expr::Call { func, args } = &effect.body else {
        return None;
    };
    match func {
        Builtin::Insert => Some(RelOp::Insert(&args[1])),
        Builtin::DeleteWhere => Some(RelOp::Delete(&args[1])),
        Builtin::UpdateWhere => match &args[2] {
            Expr::Call {
                func: Builtin::SetColumn,
                args: set_args,
            } => match &set_args[0] {
                Expr::Lit {
                    value: Literal::Str(c),
                } => Some(RelOp::Update {
                    pred: &args[1],
                    column: c.clone(),
                    value: &set_args[1],
                }),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    }
}

fn substitute_column(e: &Expr, column: &str, with: &Expr) -> Expr {
    e.rewrite(&|n| match n {
        Expr::Field { base, column: c } if matches!(base.as_ref(), Expr::Row) && c == column => {
            Some(with.clone())
        }
        _ => None,
    })
}

fn and(a: &Expr, b: &Expr) -> Expr {
    Expr::binary(BinOp::And, a.clone(), b.clone())
}

/// Outcome of the relational rules for one pair.
#[derive(Debug, Clone, PartialEq)]
pub enum RelVerdict {
    Commutes { rule: String },
    Conflict {
        rule: String,
        model: Option<BTreeMap<String, Value>>,
    },
    Unknown { rule: String, reason: String },
}

fn by_sat(sat: Sat, rule: &str) -> RelVerdict {
    match sat {
        Sat::Unsat => RelVerdict::Commutes {
            rule: rule.to_string(),
        },
        Sat::Sat(model) => RelVerdict::Conflict {
            rule: rule.to_string(),
            model: Some(model),
        },
        Sat::Unknown(reason) => RelVerdict::Unknown {
            rule: rule.to_string(),
            reason,
        },
    }
}

/// Apply the relational rules to two Tier 3 effects on the same relation.
pub fn decide(a: &EffectNode, b: &EffectNode) -> RelVerdict {
    let columns: BTreeMap<String, ValueType> =
        a.key_type().relation_columns().cloned().unwrap_or_default();
    let types = |name: &str| -> Option<ValueType> {
        let (kind, rest) = name.split_at(2);
        match kind {
            "r:" => columns.get(rest).cloned(),
            "p:" | "k:" => a
                .symbols
                .get(rest)
                .or_else(|| b.symbols.get(rest))
                .cloned(),
            _ => None,
        }
    };
    let (Some(x), Some(y)) = (rel_op(a), rel_op(b)) else {
        return RelVerdict::Unknown {
            rule: "shape".to_string(),
            reason: "not a single relational operation".to_string(),
        };
    };

    match (&x, &y) {
        (RelOp::Insert(_), RelOp::Insert(_)) => RelVerdict::Commutes {
            rule: "insert/insert".to_string(),
        },
        (RelOp::Delete(_), RelOp::Delete(_)) => RelVerdict::Commutes {
            rule: "delete/delete".to_string(),
        },
        (RelOp::Insert(row), RelOp::Delete(p))
        | (RelOp::Delete(p), RelOp::Insert(row))
        | (RelOp::Insert(row), RelOp::Update { pred: p, .. })
        | (RelOp::Update { pred: p, .. }, RelOp::Insert(row)) => {
            let rule = if matches!((&x, &y), (RelOp::Insert(_), RelOp::Delete(_)) | (RelOp::Delete(_), RelOp::Insert(_))) {
                "insert/delete"
            } else {
                "insert/update"
            };
            by_sat(satisfiable(&p.substitute_row(row), &types), rule)
        }
        (
            RelOp::Update {
                pred: p1,
                column,
                value,
            },
            RelOp::Delete(p2),
        )
        | (
            RelOp::Delete(p2),
            RelOp::Update {
                pred: p1,
                column,
                value,
            },
        ) => {
            if !p2.columns().contains(column) {
                return RelVerdict::Commutes {
                    rule: "update/delete column-disjoint".to_string(),
                };
            }
            let rule = "update/delete";
            match satisfiable(&and(p1, p2), &types) {
                Sat::Unsat => {}
                other => return by_sat(other, rule),
            }
            by_sat(
                satisfiable(&and(p1, &substitute_column(p2, column, value)), &types),
                rule,
            )
        }
        (
            RelOp::Update {
                pred: p1,
                column: c1,
                value: e1,
            },
            RelOp::Update {
                pred: p2,
                column: c2,
                value: e2,
            },
        ) => {
            let observes = |c: &String, pred: &Expr, value: &Expr| {
                pred.columns().contains(c) || value.columns().contains(c)
            };
            if observes(c1, p2, e2) || observes(c2, p1, e1) {
                let model = match satisfiable(&and(p1, p2), &types) {
                    Sat::Sat(m) => Some(m),
                    _ => None,
                };
                return RelVerdict::Conflict {
                    rule: "update/update observes an updated column".to_string(),
                    model,
                };
            }
            if c1 != c2 {
                return RelVerdict::Commutes {
                    rule: "update/update distinct columns".to_string(),
                };
            }
            if normalize(e1).is_some() && normalize(e1) == normalize(e2) {
                return RelVerdict::Commutes {
                    rule: "update/update same value".to_string(),
                };
            }
            by_sat(satisfiable(&and(p1, p2), &types), "update/update")
        }
    }
}

/// Turn a satisfying model into concrete inputs for witness replay.
pub fn model_inputs(
    model: &BTreeMap<String, Value>,
    a: &EffectNode,
    b: &EffectNode,
) -> (Bindings, Bindings) {
    let relation = a.key.name.clone();
    let mut state = Bindings::new();
    let mut params = Bindings::new();
    let mut symbols = a.symbols.clone();
    for (k, t) in &b.symbols {
        symbols.entry(k.clone()).or_insert_with(|| t.clone());
    }
    let param_names: BTreeSet<String> = a.body.params().union(&b.body.params()).cloned().collect();
    for (name, ty) in &symbols {
        let v = Value::default_for(ty);
        if param_names.contains(name) {
            params.insert(name.clone(), v);
        } else {
            state.insert(name.clone(), v);
        }
    }
    let mut row: Option<BTreeMap<String, Value>> = None;
    for (var, value) in model {
        let (kind, name) = var.split_at(2);
        match kind {
            "p:" => {
                params.insert(name.to_string(), value.clone());
            }
            "k:" => {
                state.insert(name.to_string(), value.clone());
            }
            "r:" => {
                row.get_or_insert_with(BTreeMap::new)
                    .insert(name.to_string(), value.clone());
            }
            _ => {}
        }
    }
    let rows: BTreeSet<Value> = match row {
        Some(mut cols) => {
            if let Some(schema) = a.key_type().relation_columns() {
                for (c, t) in schema {
                    cols.entry(c.clone()).or_insert_with(|| Value::default_for(t));
                }
            }
            [Value::Row(cols)].into_iter().collect()
        }
        None => BTreeSet::new(),
    };
    state.insert(relation, Value::Set(rows));
    (state, params)
}
