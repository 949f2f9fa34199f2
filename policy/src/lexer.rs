// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Hand-written tokenizer for one statement string.

use crate::errors::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Number(u32),
    Str(String),
    IPv4(std::net::Ipv4Addr),
    IPv6(std::net::Ipv6Addr),
    IPv4Net(ipnet::Ipv4Net),
    IPv6Net(ipnet::Ipv6Net),
    Op(String),
    LParen,
    RParen,
    Comma,
    Semi,
}

pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer { src, pos: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if pred(c) {
                self.bump();
            } else {
                break;
            }
        }
        &self.src[start..self.pos]
    }

    /// Tokenize the whole statement. Regex patterns (`regex "..."`) and
    /// string literals both use double-quoted strings; this lexer does not
    /// distinguish them, leaving pattern-vs-string disambiguation to the
    /// parser (which knows it is in `regex` position).
    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut out = Vec::new();
        loop {
            self.skip_ws();
            let Some(c) = self.peek_char() else { break };
            match c {
                '(' => {
                    self.bump();
                    out.push(Token::LParen);
                }
                ')' => {
                    self.bump();
                    out.push(Token::RParen);
                }
                ',' => {
                    self.bump();
                    out.push(Token::Comma);
                }
                ';' => {
                    self.bump();
                    out.push(Token::Semi);
                }
                '"' => {
                    self.bump();
                    let s = self.take_while(|c| c != '"');
                    if self.bump() != Some('"') {
                        return Err(ParseError::UnexpectedEof);
                    }
                    out.push(Token::Str(s.to_string()));
                }
                '=' | '!' | '<' | '>' | '&' | '|' | '^' | '+' | '-' | '*' => {
                    let s = self.take_while(|c| matches!(c, '=' | '!' | '<' | '>' | '&' | '|' | '^' | '+' | '-' | '*'));
                    out.push(Token::Op(s.to_string()));
                }
                c if c.is_ascii_digit() => {
                    let tok = self.lex_numeric_or_address()?;
                    out.push(tok);
                }
                c if c.is_alphabetic() || c == '_' => {
                    let s = self.take_while(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == ':' || c == '/' || c == '-');
                    out.push(classify_word(s));
                }
                other => return Err(ParseError::UnexpectedToken(other.to_string())),
            }
        }
        Ok(out)
    }

    /// A leading digit could start a plain number, an IPv4/IPv6 address, or
    /// a network prefix. All share the same "greedy word" lexing, so read
    /// the whole token and let the parser/grammar disambiguate by content.
    fn lex_numeric_or_address(&mut self) -> Result<Token, ParseError> {
        let s = self.take_while(|c| c.is_ascii_hexdigit() || c == '.' || c == ':' || c == '/' || c == '_');
        if let Ok(n) = s.parse::<u32>() {
            return Ok(Token::Number(n));
        }
        if let Ok(net) = s.parse::<ipnet::Ipv4Net>() {
            return Ok(Token::IPv4Net(net));
        }
        if let Ok(net) = s.parse::<ipnet::Ipv6Net>() {
            return Ok(Token::IPv6Net(net));
        }
        if let Ok(addr) = s.parse::<std::net::Ipv4Addr>() {
            return Ok(Token::IPv4(addr));
        }
        if let Ok(addr) = s.parse::<std::net::Ipv6Addr>() {
            return Ok(Token::IPv6(addr));
        }
        Err(ParseError::InvalidLiteral(s.to_string(), "not a number or address".to_string()))
    }
}

fn classify_word(s: &str) -> Token {
    Token::Ident(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_comparison() {
        let toks = Lexer::new("med == 100").tokenize().unwrap();
        assert_eq!(toks, vec![Token::Ident("med".into()), Token::Op("==".into()), Token::Number(100)]);
    }

    #[test]
    fn tokenizes_network() {
        let toks = Lexer::new("network4 == 10.0.0.0/8").tokenize().unwrap();
        assert_eq!(toks[2], Token::IPv4Net("10.0.0.0/8".parse().unwrap()));
    }

    #[test]
    fn tokenizes_compound_assign() {
        let toks = Lexer::new("policy-tags += 7").tokenize().unwrap();
        assert_eq!(toks, vec![Token::Ident("policy-tags".into()), Token::Op("+=".into()), Token::Number(7)]);
    }

    #[test]
    fn tokenizes_string_and_regex() {
        let toks = Lexer::new(r#"aspath regex "^65000""#).tokenize().unwrap();
        assert_eq!(
            toks,
            vec![Token::Ident("aspath".into()), Token::Ident("regex".into()), Token::Str("^65000".into())]
        );
    }
}
