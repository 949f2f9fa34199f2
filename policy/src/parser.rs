// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Recursive-descent / precedence-climbing parser over the token stream
//! produced by [`crate::lexer`]. One call parses one statement string and
//! returns a single [`Node`] root.

use crate::ast::{Node, NextTarget};
use crate::dispatch::{BinOp, UnOp};
use crate::errors::ParseError;
use crate::lexer::{Lexer, Token};
use crate::value::{NextHop4, NextHop6, Value};

struct Parser<'a> {
    toks: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.pos)
    }

    fn bump(&mut self) -> Option<&Token> {
        let t = self.toks.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn is_ident(&self, name: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == name)
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.bump() {
            Some(Token::Ident(s)) => Ok(s.clone()),
            other => Err(ParseError::UnexpectedToken(format!("{other:?}"))),
        }
    }

    fn eat_ident(&mut self, name: &str) -> bool {
        if self.is_ident(name) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn bump_comma(&mut self) -> bool {
        if matches!(self.peek(), Some(Token::Comma)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), Some(Token::Op(s)) if s == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.is_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Node, ParseError> {
        let mut lhs = self.parse_xor()?;
        while self.eat_op("||") {
            let rhs = self.parse_xor()?;
            lhs = Node::Bin(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_xor(&mut self) -> Result<Node, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.eat_op("^") {
            let rhs = self.parse_and()?;
            lhs = Node::Bin(BinOp::Xor, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Node, ParseError> {
        let mut lhs = self.parse_membership()?;
        while self.eat_op("&&") {
            let rhs = self.parse_membership()?;
            lhs = Node::Bin(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    /// `<expr> in <set>` / `<expr> contains <set>` / their `not` negations.
    /// The right operand is a set name (resolved to a `SetRef`) when an
    /// identifier follows; otherwise it's a literal, parsed through
    /// `parse_primary` the same as any other value (e.g. `policy-tags
    /// contains 42`).
    fn parse_membership(&mut self) -> Result<Node, ParseError> {
        let lhs = self.parse_equality()?;
        let negated = self.is_ident("not") && matches!(self.toks.get(self.pos + 1), Some(Token::Ident(s)) if s == "in" || s == "contains");
        if negated {
            self.bump();
        }
        if self.eat_ident("in") || self.eat_ident("contains") {
            let rhs = match self.peek() {
                Some(Token::Ident(name)) => {
                    let name = name.clone();
                    self.bump();
                    Node::SetRef(name)
                }
                _ => self.parse_primary()?,
            };
            let op = if negated { BinOp::NEInt } else { BinOp::Eq };
            return Ok(Node::Bin(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Node, ParseError> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = if self.eat_op("==") {
                BinOp::Eq
            } else if self.eat_op("!=") {
                BinOp::Ne
            } else {
                break;
            };
            let rhs = self.parse_relational()?;
            lhs = Node::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Node, ParseError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = if self.eat_op("<=") {
                BinOp::Le
            } else if self.eat_op(">=") {
                BinOp::Ge
            } else if self.eat_op("<") {
                BinOp::Lt
            } else if self.eat_op(">") {
                BinOp::Gt
            } else {
                break;
            };
            let rhs = self.parse_additive()?;
            lhs = Node::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Node, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                break;
            };
            let rhs = self.parse_multiplicative()?;
            lhs = Node::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Node, ParseError> {
        let mut lhs = self.parse_unary()?;
        while self.eat_op("*") {
            let rhs = self.parse_unary()?;
            lhs = Node::Bin(BinOp::Mul, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Node, ParseError> {
        if self.eat_op("!") {
            let inner = self.parse_unary()?;
            return Ok(Node::Un(UnOp::Not, Box::new(inner)));
        }
        self.parse_postfix()
    }

    /// Postfix suffixes on a primary expression: `head`, `ctr`, and
    /// `regex "<pattern>"`.
    fn parse_postfix(&mut self) -> Result<Node, ParseError> {
        let mut node = self.parse_primary()?;
        loop {
            if self.eat_ident("head") {
                node = Node::Un(UnOp::Head, Box::new(node));
            } else if self.eat_ident("ctr") {
                node = Node::Un(UnOp::Ctr, Box::new(node));
            } else if self.eat_ident("regex") {
                match self.bump() {
                    Some(Token::Str(pattern)) => {
                        node = Node::Regex(pattern.clone(), Box::new(node));
                    }
                    other => return Err(ParseError::UnexpectedToken(format!("{other:?}"))),
                }
            } else {
                break;
            }
        }
        Ok(node)
    }

    fn parse_primary(&mut self) -> Result<Node, ParseError> {
        match self.bump().cloned() {
            Some(Token::Number(n)) => Ok(Node::Elem(Value::U32(n))),
            Some(Token::Str(s)) => Ok(Node::Elem(Value::Str(s))),
            Some(Token::IPv4(a)) => Ok(Node::Elem(Value::IPv4(a))),
            Some(Token::IPv6(a)) => Ok(Node::Elem(Value::IPv6(a))),
            Some(Token::IPv4Net(n)) => Ok(Node::Elem(Value::IPv4Net(n))),
            Some(Token::IPv6Net(n)) => Ok(Node::Elem(Value::IPv6Net(n))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                if !matches!(self.bump(), Some(Token::RParen)) {
                    return Err(ParseError::UnexpectedEof);
                }
                Ok(inner)
            }
            Some(Token::Ident(name)) if name == "policy" => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.bump();
                    let mut names = vec![self.expect_ident()?];
                    while self.bump_comma() {
                        names.push(self.expect_ident()?);
                    }
                    if !matches!(self.bump(), Some(Token::RParen)) {
                        return Err(ParseError::UnexpectedEof);
                    }
                    return Ok(Node::PolicyGroup(names));
                }
                let polname = self.expect_ident()?;
                Ok(Node::Subr(polname))
            }
            Some(Token::Ident(name)) => Ok(Node::Var(name)),
            other => Err(ParseError::UnexpectedToken(format!("{other:?}"))),
        }
    }
}

fn nexthop4_marker(name: &str) -> Option<NextHop4> {
    match name {
        "self" => Some(NextHop4::SelfAddr),
        "peer-address" => Some(NextHop4::PeerAddress),
        "discard" => Some(NextHop4::Discard),
        "reject" => Some(NextHop4::Reject),
        "next-table" => Some(NextHop4::NextTable),
        _ => None,
    }
}

fn nexthop6_marker(name: &str) -> Option<NextHop6> {
    match name {
        "self" => Some(NextHop6::SelfAddr),
        "peer-address" => Some(NextHop6::PeerAddress),
        "discard" => Some(NextHop6::Discard),
        "reject" => Some(NextHop6::Reject),
        "next-table" => Some(NextHop6::NextTable),
        _ => None,
    }
}

/// Parse one statement string, attaching `line` for diagnostics — every
/// node carries the source line it was parsed from.
pub fn parse(stmt: &str, line: u32) -> Result<Node, ParseError> {
    let toks = Lexer::new(stmt).tokenize()?;
    if toks.is_empty() {
        return Err(ParseError::UnexpectedEof);
    }

    if let Token::Ident(kw) = &toks[0] {
        match kw.as_str() {
            "accept" if toks.len() == 1 => return Ok(Node::Line(line, Box::new(Node::Accept))),
            "reject" if toks.len() == 1 => return Ok(Node::Line(line, Box::new(Node::Reject))),
            "next" => {
                let mut p = Parser { toks: &toks, pos: 1 };
                let target = p.expect_ident()?;
                let next = match target.as_str() {
                    "policy" => NextTarget::Policy,
                    "term" => NextTarget::Term,
                    other => return Err(ParseError::UnexpectedToken(other.to_string())),
                };
                return Ok(Node::Line(line, Box::new(Node::Next(next))));
            }
            "protocol" => {
                let mut p = Parser { toks: &toks, pos: 1 };
                let proto = p.expect_ident()?;
                return Ok(Node::Line(line, Box::new(Node::Proto(proto))));
            }
            _ => {}
        }
    }

    // `<var> <op> <rhs>` assignment, recognized by a bare leading identifier
    // followed immediately by an assignment operator.
    if let (Some(Token::Ident(var)), Some(Token::Op(op))) = (toks.first(), toks.get(1)) {
        let modifier = match op.as_str() {
            "=" => Some(None),
            "+=" => Some(Some(BinOp::Add)),
            "-=" => Some(Some(BinOp::Sub)),
            "*=" => Some(Some(BinOp::Mul)),
            _ => None,
        };
        if let Some(modop) = modifier {
            let rhs_toks = &toks[2..];
            if rhs_toks.is_empty() {
                return Err(ParseError::UnexpectedEof);
            }
            // Bare nexthop markers (`self`, `discard`, ...) are resolved
            // here rather than in `primary`, since only an assignment to a
            // `nexthop4`/`nexthop6` variable gives them that meaning.
            if rhs_toks.len() == 1 {
                if let Token::Ident(marker) = &rhs_toks[0] {
                    if let Some(nh) = nexthop4_marker(marker) {
                        if var == "nexthop4" {
                            return Ok(Node::Line(
                                line,
                                Box::new(Node::Assign(var.clone(), modop, Box::new(Node::Elem(Value::NextHop4(nh))))),
                            ));
                        }
                    }
                    if let Some(nh) = nexthop6_marker(marker) {
                        if var == "nexthop6" {
                            return Ok(Node::Line(
                                line,
                                Box::new(Node::Assign(var.clone(), modop, Box::new(Node::Elem(Value::NextHop6(nh))))),
                            ));
                        }
                    }
                }
            }
            let mut p = Parser { toks: rhs_toks, pos: 0 };
            let mut rhs = p.parse_or()?;
            if p.pos != p.toks.len() {
                return Err(ParseError::UnexpectedToken(format!("{:?}", p.toks[p.pos])));
            }
            // A bare address literal assigned to a nexthop variable is
            // promoted to the concrete-address nexthop marker.
            if var == "nexthop4" {
                if let Node::Elem(Value::IPv4(a)) = rhs {
                    rhs = Node::Elem(Value::NextHop4(NextHop4::Addr(a)));
                }
            }
            if var == "nexthop6" {
                if let Node::Elem(Value::IPv6(a)) = rhs {
                    rhs = Node::Elem(Value::NextHop6(NextHop6::Addr(a)));
                }
            }
            return Ok(Node::Line(line, Box::new(Node::Assign(var.clone(), modop, Box::new(rhs)))));
        }
    }

    let mut p = Parser { toks: &toks, pos: 0 };
    let node = p.parse_or()?;
    if p.pos != p.toks.len() {
        return Err(ParseError::UnexpectedToken(format!("{:?}", p.toks[p.pos])));
    }
    Ok(Node::Line(line, Box::new(node)))
}

/// Split an `update_term_block` payload on top-level `;` into individual
/// statement strings, e.g. `"policy-tags += 7; accept"` packs more than one
/// statement into a single delta for operator convenience. Each piece is
/// parsed independently and assigned successive `ConfigNodeId`s by the
/// caller.
pub fn split_statements(s: &str) -> Vec<&str> {
    s.split(';').map(str::trim).filter(|s| !s.is_empty()).collect()
}
