//! Decidability tier assessment of a single effect body.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Caps;
use crate::model::{BinOp, Builtin, EffectNode, Expr, UnOp, ValueType};

/// Language fragment an effect body falls into. Ordered by expressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Identity or constant.
    Constant,
    /// `self ⊕ t` for a commutative, associative ⊕.
    Semilattice,
    /// Bounded non-recursive algebraic expression.
    Algebraic,
    /// Single relational operation with a restricted predicate.
    Relational,
    /// Anything else: bounded recursion, opaque calls, cap overflow.
    General,
}

impl Tier {
    pub fn level(self) -> u8 {
        match self {
            Tier::Constant => 0,
            Tier::Semilattice => 1,
            Tier::Algebraic => 2,
            Tier::Relational => 3,
            Tier::General => 4,
        }
    }

    pub fn is_decidable(self) -> bool {
        self != Tier::General
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier {}", self.level())
    }
}

/// Operator family of a Tier 1 body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accumulator {
    /// `+` and `-` with an operand independent of the target.
    Additive,
    Max,
    Min,
    /// `union` and `add`.
    Union,
    Remove,
    And,
    Or,
}

impl Accumulator {
    pub fn name(self) -> &'static str {
        match self {
            Accumulator::Additive => "additive",
            Accumulator::Max => "max",
            Accumulator::Min => "min",
            Accumulator::Union => "union",
            Accumulator::Remove => "remove",
            Accumulator::And => "and",
            Accumulator::Or => "or",
        }
    }
}

/// Shape of a Tier 0 body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantShape {
    Identity,
    Constant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TierAssessment {
    pub tier: Tier,
    pub reason: String,
    pub constant: Option<ConstantShape>,
    pub accumulator: Option<(Accumulator, Expr)>,
}

impl TierAssessment {
    fn new(tier: Tier, reason: impl Into<String>) -> Self {
        Self {
            tier,
            reason: reason.into(),
            constant: None,
            accumulator: None,
        }
    }
}

/// Place an effect into its decidability tier.
pub fn assess(effect: &EffectNode, caps: &Caps) -> TierAssessment {
    let body = &effect.body;
    if let Some(why) = general_construct(body) {
        return TierAssessment::new(Tier::General, why);
    }
    if body.size() > caps.tier2_expr_cap {
        return TierAssessment::new(
            Tier::General,
            format!(
                "body has {} nodes, above tier2_expr_cap {}",
                body.size(),
                caps.tier2_expr_cap
            ),
        );
    }

    let target = effect.key.name.as_str();
    if effect.is_read() {
        let mut a = TierAssessment::new(Tier::Constant, "observation only");
        a.constant = Some(ConstantShape::Identity);
        return a;
    }
    if matches!(body, Expr::Key { name } if name == target) {
        let mut a = TierAssessment::new(Tier::Constant, "identity");
        a.constant = Some(ConstantShape::Identity);
        return a;
    }
    if body.keys().is_empty() {
        let mut a = TierAssessment::new(Tier::Constant, "constant assignment");
        a.constant = Some(ConstantShape::Constant);
        return a;
    }

    let relational = effect.key_type().is_relation() && effect.key_type() != ValueType::Any
        || body.any(&|e| matches!(e, Expr::Call { func, .. } if func.is_relational()));
    if relational {
        return match relational_fragment(effect, caps) {
            Ok(()) => TierAssessment::new(Tier::Relational, "single relational operation"),
            Err(why) => TierAssessment::new(Tier::General, why),
        };
    }

    if let Some((acc, operand)) = accumulator(body, target) {
        if effect.reads.len() <= caps.tier1_state_cap {
            let mut a = TierAssessment::new(
                Tier::Semilattice,
                format!("{} accumulation into the target", acc.name()),
            );
            a.accumulator = Some((acc, operand));
            return a;
        }
    }
    TierAssessment::new(Tier::Algebraic, "bounded algebraic expression")
}

fn general_construct(body: &Expr) -> Option<String> {
    let mut found = None;
    body.walk(&mut |e| {
        if found.is_some() {
            return;
        }
        found = match e {
            Expr::Rec { name, bound, .. } => {
                Some(format!("recursive function '{}' (bound {})", name, bound))
            }
            Expr::Opaque { name, .. } => Some(format!("call to opaque function '{}'", name)),
            _ => None,
        };
    });
    found
}

/// Recognise `self ⊕ t` where `t` does not read the target.
pub fn accumulator(body: &Expr, target: &str) -> Option<(Accumulator, Expr)> {
    let is_self = |e: &Expr| matches!(e, Expr::Key { name } if name == target);
    let (acc, operand) = match body {
        Expr::Binary { op, lhs, rhs } => match op {
            BinOp::Add if is_self(lhs) => (Accumulator::Additive, rhs.as_ref().clone()),
            BinOp::Add if is_self(rhs) => (Accumulator::Additive, lhs.as_ref().clone()),
            BinOp::Sub if is_self(lhs) => (
                Accumulator::Additive,
                Expr::Unary {
                    op: UnOp::Neg,
                    arg: rhs.clone(),
                },
            ),
            BinOp::And if is_self(lhs) => (Accumulator::And, rhs.as_ref().clone()),
            BinOp::And if is_self(rhs) => (Accumulator::And, lhs.as_ref().clone()),
            BinOp::Or if is_self(lhs) => (Accumulator::Or, rhs.as_ref().clone()),
            BinOp::Or if is_self(rhs) => (Accumulator::Or, lhs.as_ref().clone()),
            _ => return None,
        },
        Expr::Call { func, args } if args.len() == 2 => {
            let acc = match func {
                Builtin::Max => Accumulator::Max,
                Builtin::Min => Accumulator::Min,
                Builtin::Union => Accumulator::Union,
                Builtin::Add => Accumulator::Union,
                Builtin::Remove => Accumulator::Remove,
                _ => return None,
            };
            let symmetric = matches!(acc, Accumulator::Max | Accumulator::Min)
                || *func == Builtin::Union;
            if is_self(&args[0]) {
                let operand = if *func == Builtin::Add || *func == Builtin::Remove {
                    Expr::SetLit {
                        items: vec![args[1].clone()],
                    }
                } else {
                    args[1].clone()
                };
                (acc, operand)
            } else if symmetric && is_self(&args[1]) {
                (acc, args[0].clone())
            } else {
                return None;
            }
        }
        _ => return None,
    };
    if operand.mentions_key(target) {
        return None;
    }
    Some((acc, operand))
}

/// A term allowed on either side of a Tier 3 predicate atom.
fn simple_term(e: &Expr) -> bool {
    match e {
        Expr::Lit { .. } | Expr::Param { .. } | Expr::Key { .. } => true,
        Expr::Field { base, .. } => matches!(base.as_ref(), Expr::Row),
        Expr::Binary {
            op: BinOp::Add | BinOp::Sub,
            lhs,
            rhs,
        } => simple_term(lhs) && rhs.as_int().is_some(),
        _ => false,
    }
}

fn is_variable(e: &Expr) -> bool {
    match e {
        Expr::Lit { .. } => false,
        Expr::Binary { lhs, .. } => is_variable(lhs),
        _ => true,
    }
}

fn has_offset(e: &Expr) -> bool {
    matches!(e, Expr::Binary { .. })
}

/// Count atoms of a restricted predicate, or say why it is outside the
/// fragment.
pub fn predicate_atoms(pred: &Expr, target: &str) -> Result<usize, String> {
    match pred {
        Expr::Lit { .. } => Ok(0),
        Expr::Unary { op: UnOp::Not, arg } => predicate_atoms(arg, target),
        Expr::Binary {
            op: BinOp::And | BinOp::Or,
            lhs,
            rhs,
        } => Ok(predicate_atoms(lhs, target)? + predicate_atoms(rhs, target)?),
        Expr::Binary { op, lhs, rhs } if op.is_comparison() => {
            if !simple_term(lhs) || !simple_term(rhs) {
                return Err(format!("predicate atom '{}' is not term-op-term", pred));
            }
            if lhs.mentions_key(target) || rhs.mentions_key(target) {
                return Err("predicate reads the relation it filters".to_string());
            }
            if is_variable(lhs) && is_variable(rhs) {
                let ordering = !matches!(op, BinOp::Eq | BinOp::Ne);
                if ordering || has_offset(lhs) || has_offset(rhs) {
                    return Err(format!(
                        "predicate atom '{}' relates two variables beyond equality",
                        pred
                    ));
                }
            }
            Ok(1)
        }
        Expr::Field { base, .. } if matches!(base.as_ref(), Expr::Row) => Ok(1),
        other => Err(format!("predicate '{}' is outside the relational fragment", other)),
    }
}

fn relational_fragment(effect: &EffectNode, caps: &Caps) -> Result<(), String> {
    let target = effect.key.name.as_str();
    let Expr::Call { func, args } = &effect.body else {
        return Err("relational key written by a non-relational expression".to_string());
    };
    if !func.is_relational() {
        return Err(format!("'{}' is not a relational operation", func.name()));
    }
    if !matches!(&args[0], Expr::Key { name } if name == target) {
        return Err("relational operation does not apply to the target".to_string());
    }
    let atoms = match func {
        Builtin::Insert => {
            let Expr::RowLit { fields } = &args[1] else {
                return Err("inserted row is not a row literal".to_string());
            };
            for (_, v) in fields {
                if !simple_term(v) || matches!(v, Expr::Field { .. }) || v.mentions_key(target) {
                    return Err(format!("inserted field '{}' is not a simple term", v));
                }
            }
            0
        }
        Builtin::DeleteWhere => predicate_atoms(&args[1], target)?,
        Builtin::UpdateWhere => {
            let atoms = predicate_atoms(&args[1], target)?;
            let Expr::Call {
                func: Builtin::SetColumn,
                args: set_args,
            } = &args[2]
            else {
                return Err("update without set(column, value)".to_string());
            };
            if !simple_term(&set_args[1]) || set_args[1].mentions_key(target) {
                return Err(format!("update value '{}' is not a simple term", set_args[1]));
            }
            atoms
        }
        _ => 0,
    };
    if atoms > caps.tier3_formula_cap {
        return Err(format!(
            "predicate has {} atoms, above tier3_formula_cap {}",
            atoms, caps.tier3_formula_cap
        ));
    }
    Ok(())
}
