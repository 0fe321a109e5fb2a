//! Lexer and recursive-descent parser for effect bodies and invariants.

use std::collections::{BTreeMap, BTreeSet};

use super::error::ParseError;
use super::expr::{BinOp, Builtin, Expr, Literal, UnOp};
use super::types::ValueType;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Int(i64),
    Str(String),
    Ident(String),
    Sym(&'static str),
    Eof,
}

const SYMBOLS: [&str; 22] = [
    "==", "!=", "<=", ">=", "&&", "||", "+", "-", "*", "/", "%", "<", ">", "!", "(", ")", "{",
    "}", ",", ":", "=", ".",
];

fn lex(src: &str) -> Result<Vec<(Tok, usize)>, ParseError> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    'outer: while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                i += 1;
            }
            let text = &src[start..i];
            let value = text.parse::<i64>().map_err(|_| syntax(start, "integer literal out of range"))?;
            out.push((Tok::Int(value), start));
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            out.push((Tok::Ident(src[start..i].to_string()), start));
            continue;
        }
        if c == '"' {
            let start = i;
            let Some(len) = src[i + 1..].find('"') else {
                return Err(syntax(start, "unterminated string literal"));
            };
            out.push((Tok::Str(src[i + 1..i + 1 + len].to_string()), start));
            i += len + 2;
            continue;
        }
        for sym in SYMBOLS {
            if src[i..].starts_with(sym) {
                out.push((Tok::Sym(sym), i));
                i += sym.len();
                continue 'outer;
            }
        }
        return Err(syntax(i, &format!("unexpected character '{}'", c)));
    }
    out.push((Tok::Eof, src.len()));
    Ok(out)
}

fn syntax(offset: usize, message: &str) -> ParseError {
    ParseError::Syntax {
        effect: String::new(),
        offset,
        message: message.to_string(),
    }
}

const KEYWORDS: [&str; 11] = [
    "let", "in", "if", "then", "else", "rec", "bound", "true", "false", "self", "it",
];

/// Names visible to an expression.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub keys: &'a BTreeMap<String, ValueType>,
    pub params: &'a BTreeMap<String, ValueType>,
    pub opaque: &'a BTreeSet<String>,
    /// Key that `self` resolves to; `None` inside operation-level invariants.
    pub self_key: Option<&'a str>,
    pub allow_unique: bool,
    pub recursion_cap: u32,
}

struct Parser<'a> {
    toks: Vec<(Tok, usize)>,
    pos: usize,
    scope: Scope<'a>,
    locals: Vec<String>,
    funcs: Vec<String>,
}

/// Parse an effect body or a bare predicate.
pub fn parse_expr(src: &str, scope: Scope<'_>) -> Result<Expr, ParseError> {
    let mut p = Parser {
        toks: lex(src)?,
        pos: 0,
        scope,
        locals: Vec::new(),
        funcs: Vec::new(),
    };
    let e = p.expr()?;
    p.expect_eof()?;
    Ok(e)
}

/// Quantifier prefix of an invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantifierPrefix {
    Forall,
    Exists,
    None,
}

/// Parse `forall <var>: pred`, `exists <var>: pred` or a bare `pred`.
pub fn parse_invariant(
    src: &str,
    scope: Scope<'_>,
) -> Result<(QuantifierPrefix, Expr), ParseError> {
    let mut p = Parser {
        toks: lex(src)?,
        pos: 0,
        scope,
        locals: Vec::new(),
        funcs: Vec::new(),
    };
    let quantifier = match (p.peek().clone(), p.peek_at(1).clone(), p.peek_at(2).clone()) {
        (Tok::Ident(q), Tok::Ident(_), Tok::Sym(":")) if q == "forall" || q == "exists" => {
            p.pos += 3;
            if q == "forall" {
                QuantifierPrefix::Forall
            } else {
                QuantifierPrefix::Exists
            }
        }
        _ => QuantifierPrefix::None,
    };
    let e = p.expr()?;
    p.expect_eof()?;
    Ok((quantifier, e))
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Tok {
        &self.toks[self.pos].0
    }

    fn peek_at(&self, ahead: usize) -> &Tok {
        let idx = (self.pos + ahead).min(self.toks.len() - 1);
        &self.toks[idx].0
    }

    fn offset(&self) -> usize {
        self.toks[self.pos].1
    }

    fn bump(&mut self) -> Tok {
        let t = self.toks[self.pos].0.clone();
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn eat_sym(&mut self, sym: &str) -> bool {
        if matches!(self.peek(), Tok::Sym(s) if *s == sym) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if matches!(self.peek(), Tok::Ident(s) if s == kw) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, sym: &str) -> Result<(), ParseError> {
        if self.eat_sym(sym) {
            Ok(())
        } else {
            Err(syntax(
                self.offset(),
                &format!("expected '{}', found {:?}", sym, self.peek()),
            ))
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), ParseError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(syntax(
                self.offset(),
                &format!("expected '{}', found {:?}", kw, self.peek()),
            ))
        }
    }

    fn expect_eof(&self) -> Result<(), ParseError> {
        match self.peek() {
            Tok::Eof => Ok(()),
            other => Err(syntax(
                self.offset(),
                &format!("unexpected trailing input {:?}", other),
            )),
        }
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        let offset = self.offset();
        match self.bump() {
            Tok::Ident(name) if !KEYWORDS.contains(&name.as_str()) => Ok(name),
            other => Err(syntax(offset, &format!("expected identifier, found {:?}", other))),
        }
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        if self.eat_kw("let") {
            let name = self.ident()?;
            self.expect_sym("=")?;
            let value = self.expr()?;
            self.expect_kw("in")?;
            self.locals.push(name.clone());
            let body = self.expr();
            self.locals.pop();
            return Ok(Expr::Let {
                name,
                value: Box::new(value),
                body: Box::new(body?),
            });
        }
        if self.eat_kw("if") {
            let cond = self.expr()?;
            self.expect_kw("then")?;
            let then = self.expr()?;
            self.expect_kw("else")?;
            let otherwise = self.expr()?;
            return Ok(Expr::If {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        if self.eat_kw("rec") {
            return self.rec();
        }
        self.or()
    }

    fn rec(&mut self) -> Result<Expr, ParseError> {
        let name = self.ident()?;
        self.expect_sym("(")?;
        let mut params = vec![self.ident()?];
        while self.eat_sym(",") {
            params.push(self.ident()?);
        }
        self.expect_sym(")")?;
        let bound = if self.eat_kw("bound") {
            let offset = self.offset();
            match self.bump() {
                Tok::Int(n) if n >= 0 => {
                    let n = u32::try_from(n).unwrap_or(u32::MAX);
                    if n > self.scope.recursion_cap {
                        return Err(ParseError::UnboundedRecursion {
                            effect: String::new(),
                            function: name,
                            detail: format!(
                                "bound {} exceeds recursion depth cap {}",
                                n, self.scope.recursion_cap
                            ),
                        });
                    }
                    n
                }
                other => {
                    return Err(syntax(
                        offset,
                        &format!("expected recursion bound, found {:?}", other),
                    ))
                }
            }
        } else {
            return Err(ParseError::UnboundedRecursion {
                effect: String::new(),
                function: name,
                detail: "missing 'bound N' annotation".to_string(),
            });
        };
        self.expect_sym("=")?;
        self.funcs.push(name.clone());
        let depth = self.locals.len();
        self.locals.extend(params.iter().cloned());
        let body = self.expr();
        self.locals.truncate(depth);
        let body = match body {
            Ok(b) => b,
            Err(e) => {
                self.funcs.pop();
                return Err(e);
            }
        };
        let rest = self.expect_kw("in").and_then(|_| self.expr());
        self.funcs.pop();
        Ok(Expr::Rec {
            name,
            params,
            bound,
            body: Box::new(body),
            rest: Box::new(rest?),
        })
    }

    fn or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.and()?;
        while self.eat_sym("||") {
            let rhs = self.and()?;
            lhs = Expr::binary(BinOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.cmp()?;
        while self.eat_sym("&&") {
            let rhs = self.cmp()?;
            lhs = Expr::binary(BinOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn cmp(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.sum()?;
        let op = match self.peek() {
            Tok::Sym("==") => BinOp::Eq,
            Tok::Sym("!=") => BinOp::Ne,
            Tok::Sym("<") => BinOp::Lt,
            Tok::Sym("<=") => BinOp::Le,
            Tok::Sym(">") => BinOp::Gt,
            Tok::Sym(">=") => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.bump();
        let rhs = self.sum()?;
        Ok(Expr::binary(op, lhs, rhs))
    }

    fn sum(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Sym("+") => BinOp::Add,
                Tok::Sym("-") => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.term()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Tok::Sym("*") => BinOp::Mul,
                Tok::Sym("/") => BinOp::Div,
                Tok::Sym("%") => BinOp::Mod,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.unary()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat_sym("!") {
            return Ok(Expr::Unary {
                op: UnOp::Not,
                arg: Box::new(self.unary()?),
            });
        }
        if self.eat_sym("-") {
            return Ok(Expr::Unary {
                op: UnOp::Neg,
                arg: Box::new(self.unary()?),
            });
        }
        let mut e = self.primary()?;
        while self.eat_sym(".") {
            let column = self.ident()?;
            e = Expr::Field {
                base: Box::new(e),
                column,
            };
        }
        Ok(e)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let offset = self.offset();
        match self.bump() {
            Tok::Int(v) => Ok(Expr::int(v)),
            Tok::Str(s) => Ok(Expr::Lit {
                value: Literal::Str(s),
            }),
            Tok::Sym("(") => {
                let e = self.expr()?;
                self.expect_sym(")")?;
                Ok(e)
            }
            Tok::Sym("{") => {
                let mut items = Vec::new();
                if !self.eat_sym("}") {
                    items.push(self.expr()?);
                    while self.eat_sym(",") {
                        items.push(self.expr()?);
                    }
                    self.expect_sym("}")?;
                }
                Ok(Expr::SetLit { items })
            }
            Tok::Ident(name) => self.named(name, offset),
            other => Err(syntax(offset, &format!("unexpected token {:?}", other))),
        }
    }

    fn named(&mut self, name: String, offset: usize) -> Result<Expr, ParseError> {
        match name.as_str() {
            "true" => return Ok(Expr::bool(true)),
            "false" => return Ok(Expr::bool(false)),
            "it" => return Ok(Expr::Row),
            "self" => {
                return match self.scope.self_key {
                    Some(key) => Ok(Expr::key(key)),
                    None => Err(syntax(offset, "'self' is only valid inside an effect")),
                }
            }
            _ => {}
        }
        if KEYWORDS.contains(&name.as_str()) {
            return Err(syntax(offset, &format!("unexpected keyword '{}'", name)));
        }
        if matches!(self.peek(), Tok::Sym("(")) {
            self.bump();
            return self.call(name, offset);
        }
        if self.locals.iter().rev().any(|l| *l == name) {
            return Ok(Expr::Local { name });
        }
        if self.scope.params.contains_key(&name) {
            return Ok(Expr::Param { name });
        }
        if self.scope.keys.contains_key(&name) {
            return Ok(Expr::Key { name });
        }
        Err(ParseError::UnknownKey {
            effect: String::new(),
            key: name,
        })
    }

    fn call(&mut self, name: String, offset: usize) -> Result<Expr, ParseError> {
        if name == "row" {
            let mut fields = Vec::new();
            if !self.eat_sym(")") {
                loop {
                    let column = self.ident()?;
                    self.expect_sym(":")?;
                    fields.push((column, self.expr()?));
                    if !self.eat_sym(",") {
                        break;
                    }
                }
                self.expect_sym(")")?;
            }
            return Ok(Expr::RowLit { fields });
        }

        // `set(col, e)` names a column as its first argument.
        if name == "set" {
            let column = self.ident()?;
            self.expect_sym(",")?;
            let value = self.expr()?;
            self.expect_sym(")")?;
            return Ok(Expr::call(
                Builtin::SetColumn,
                vec![
                    Expr::Lit {
                        value: Literal::Str(column),
                    },
                    value,
                ],
            ));
        }

        let mut args = Vec::new();
        if !self.eat_sym(")") {
            args.push(self.expr()?);
            while self.eat_sym(",") {
                args.push(self.expr()?);
            }
            self.expect_sym(")")?;
        }

        if self.funcs.iter().rev().any(|f| *f == name) {
            return Ok(Expr::Invoke { name, args });
        }
        if let Some(func) = Builtin::from_name(&name) {
            if func == Builtin::Unique && !self.scope.allow_unique {
                return Err(syntax(offset, "unique(...) is only valid inside invariants"));
            }
            if let Some(arity) = func.arity() {
                if args.len() != arity {
                    return Err(syntax(
                        offset,
                        &format!("{} expects {} arguments, got {}", name, arity, args.len()),
                    ));
                }
            }
            return Ok(Expr::call(func, args));
        }
        if self.scope.opaque.contains(&name) {
            return Ok(Expr::Opaque { name, args });
        }
        Err(ParseError::UnknownFunction {
            effect: String::new(),
            function: name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (
        BTreeMap<String, ValueType>,
        BTreeMap<String, ValueType>,
        BTreeSet<String>,
    ) {
        let mut keys = BTreeMap::new();
        keys.insert("stock".to_string(), ValueType::Nat);
        keys.insert("cart".to_string(), ValueType::Set(Box::new(ValueType::Str)));
        let mut params = BTreeMap::new();
        params.insert("qty".to_string(), ValueType::Nat);
        let mut opaque = BTreeSet::new();
        opaque.insert("price_of".to_string());
        (keys, params, opaque)
    }

    fn scope<'a>(
        f: &'a (
            BTreeMap<String, ValueType>,
            BTreeMap<String, ValueType>,
            BTreeSet<String>,
        ),
    ) -> Scope<'a> {
        Scope {
            keys: &f.0,
            params: &f.1,
            opaque: &f.2,
            self_key: Some("stock"),
            allow_unique: false,
            recursion_cap: 16,
        }
    }

    #[test]
    fn parses_precedence_and_self() {
        let f = fixture();
        let e = parse_expr("self - qty * 2 + 1", scope(&f)).unwrap();
        assert_eq!(e.to_string(), "((stock - (qty * 2)) + 1)");
    }

    #[test]
    fn parses_conditionals_and_lets() {
        let f = fixture();
        let e = parse_expr(
            "let q = qty in if self >= q then self - q else self",
            scope(&f),
        )
        .unwrap();
        assert!(matches!(e, Expr::Let { .. }));
        assert!(e.mentions_key("stock"));
    }

    #[test]
    fn rejects_unknown_key() {
        let f = fixture();
        let err = parse_expr("self + bonus", scope(&f)).unwrap_err();
        assert!(matches!(err, ParseError::UnknownKey { key, .. } if key == "bonus"));
    }

    #[test]
    fn rejects_unknown_function() {
        let f = fixture();
        let err = parse_expr("frobnicate(self)", scope(&f)).unwrap_err();
        assert!(matches!(err, ParseError::UnknownFunction { .. }));
    }

    #[test]
    fn rec_requires_bound_within_cap() {
        let f = fixture();
        let missing = parse_expr("rec f(n) = n in f(self)", scope(&f)).unwrap_err();
        assert!(matches!(missing, ParseError::UnboundedRecursion { .. }));

        let over = parse_expr("rec f(n) bound 99 = n in f(self)", scope(&f)).unwrap_err();
        assert!(matches!(over, ParseError::UnboundedRecursion { detail, .. } if detail.contains("99")));

        let ok = parse_expr(
            "rec f(n) bound 8 = if n <= 0 then 0 else n + f(n - 1) in self + f(qty)",
            scope(&f),
        )
        .unwrap();
        assert!(ok.any(&|e| matches!(e, Expr::Invoke { .. })));
    }

    #[test]
    fn opaque_functions_resolve() {
        let f = fixture();
        let e = parse_expr("self + price_of(qty)", scope(&f)).unwrap();
        assert!(e.any(&|e| matches!(e, Expr::Opaque { .. })));
    }

    #[test]
    fn parses_relational_forms() {
        let f = fixture();
        let e = parse_expr(
            "update_where(self, it.qty <= 0 && it.id == qty, set(qty, 1))",
            scope(&f),
        )
        .unwrap();
        assert!(matches!(e, Expr::Call { func: Builtin::UpdateWhere, .. }));
        let r = parse_expr("insert(self, row(id: qty, qty: 2))", scope(&f)).unwrap();
        assert!(r.any(&|e| matches!(e, Expr::RowLit { .. })));
    }

    #[test]
    fn invariant_quantifiers() {
        let f = fixture();
        let mut s = scope(&f);
        s.allow_unique = true;
        let (q, e) = parse_invariant("forall replica: unique(stock)", s).unwrap();
        assert_eq!(q, QuantifierPrefix::Forall);
        assert!(matches!(e, Expr::Call { func: Builtin::Unique, .. }));
        let (q, _) = parse_invariant("exists r: stock > 0", s).unwrap();
        assert_eq!(q, QuantifierPrefix::Exists);
        let (q, _) = parse_invariant("stock >= 0", s).unwrap();
        assert_eq!(q, QuantifierPrefix::None);
    }

    #[test]
    fn reports_offsets_for_syntax_errors() {
        let f = fixture();
        let err = parse_expr("self + ", scope(&f)).unwrap_err();
        assert!(matches!(err, ParseError::Syntax { offset: 7, .. }));
    }
}
