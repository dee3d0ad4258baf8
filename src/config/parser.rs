//! Recursive-descent parser over the token stream produced by `lexer`.
//! `ConfigError` carries an optional `Loc` plus a context trace so nested
//! stanza errors can report where in the surrounding block they occurred.

use std::fmt;

use crate::address::Address;
use crate::config::lexer::{Lexer, Loc, Token, TokenKind};
use crate::config::types::{BackendEntry, Config, ListenerConfig, Protocol, TableConfig};

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub loc: Option<Loc>,
    pub context: Vec<String>,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.message)?;
        if let Some(loc) = self.loc {
            write!(f, " (at {})", loc)?;
        }
        if !self.context.is_empty() {
            write!(f, "\n  context:")?;
            for ctx in self.context.iter().rev() {
                write!(f, "\n    - {}", ctx)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}

pub type ParseResult<T> = Result<T, ConfigError>;

fn err(message: impl Into<String>, loc: Option<Loc>) -> ConfigError {
    ConfigError {
        message: message.into(),
        loc,
        context: Vec::new(),
    }
}

struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
}

impl Parser {
    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.cursor).map(|t| &t.kind)
    }

    fn peek_loc(&self) -> Option<Loc> {
        self.tokens.get(self.cursor).map(|t| t.loc)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.cursor).cloned();
        if t.is_some() {
            self.cursor += 1;
        }
        t
    }

    fn expect_word(&mut self) -> ParseResult<String> {
        let loc = self.peek_loc();
        match self.advance() {
            Some(Token {
                kind: TokenKind::Word(s),
                ..
            }) => Ok(s),
            Some(t) => Err(err(format!("expected a word, found '{}'", t.kind), Some(t.loc))),
            None => Err(err("expected a word, found end of file", loc)),
        }
    }

    fn expect_number(&mut self) -> ParseResult<u64> {
        let loc = self.peek_loc();
        match self.advance() {
            Some(Token {
                kind: TokenKind::Number(n),
                ..
            }) => Ok(n),
            Some(t) => Err(err(format!("expected a number, found '{}'", t.kind), Some(t.loc))),
            None => Err(err("expected a number, found end of file", loc)),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<()> {
        let loc = self.peek_loc();
        match self.advance() {
            Some(t) if t.kind == kind => Ok(()),
            Some(t) => Err(err(
                format!("expected '{}', found '{}'", kind, t.kind),
                Some(t.loc),
            )),
            None => Err(err(format!("expected '{}', found end of file", kind), loc)),
        }
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek() == Some(kind)
    }

    /// Tries to consume a trailing bare port number before `{` / `;`.
    fn maybe_port(&mut self) -> ParseResult<Option<u16>> {
        if let Some(TokenKind::Number(_)) = self.peek() {
            let n = self.expect_number()?;
            if n > u16::MAX as u64 {
                return Err(err(
                    format!("port {} is out of range for u16 (max {})", n, u16::MAX),
                    None,
                ));
            }
            Ok(Some(n as u16))
        } else {
            Ok(None)
        }
    }

    fn parse_address(&mut self) -> ParseResult<Address> {
        let loc = self.peek_loc();
        let token = self.expect_word()?;
        let port = self.maybe_port()?;
        Address::parse(&token, port).map_err(|e| err(format!("invalid address '{}': {}", token, e), loc))
    }

    fn parse_config(&mut self) -> ParseResult<Config> {
        let mut config = Config::default();

        while self.peek().is_some() {
            let loc = self.peek_loc();
            let keyword = self.expect_word()?;
            match keyword.as_str() {
                "username" => {
                    let name = self.expect_word()?;
                    self.expect(TokenKind::Semicolon)?;
                    config.username = Some(name);
                }
                "listener" => {
                    let listener = self
                        .parse_listener()
                        .map_err(|mut e| {
                            e.context.push("parsing listener stanza".to_string());
                            e
                        })?;
                    config.listeners.push(listener);
                }
                "table" => {
                    let table = self
                        .parse_table()
                        .map_err(|mut e| {
                            e.context.push("parsing table stanza".to_string());
                            e
                        })?;
                    config.tables.push(table);
                }
                other => {
                    return Err(err(format!("unknown top-level stanza '{}'", other), loc));
                }
            }
        }

        validate_references(&config)?;
        Ok(config)
    }

    fn parse_listener(&mut self) -> ParseResult<ListenerConfig> {
        let address = self.parse_address()?;
        self.expect(TokenKind::LBrace)?;

        let mut protocol = None;
        let mut table = None;
        let mut fallback = None;

        while !self.at(&TokenKind::RBrace) {
            let loc = self.peek_loc();
            let key = self.expect_word()?;
            match key.as_str() {
                "protocol" => {
                    let v = self.expect_word()?;
                    self.expect(TokenKind::Semicolon)?;
                    protocol = Some(match v.as_str() {
                        "tls" => Protocol::Tls,
                        "http" => Protocol::Http,
                        other => {
                            return Err(err(format!("unknown protocol '{}'", other), loc));
                        }
                    });
                }
                "table" => {
                    let v = self.expect_word()?;
                    self.expect(TokenKind::Semicolon)?;
                    table = Some(v);
                }
                "fallback" => {
                    let addr = self.parse_address()?;
                    self.expect(TokenKind::Semicolon)?;
                    fallback = Some(addr);
                }
                other => {
                    return Err(err(format!("unknown listener directive '{}'", other), loc));
                }
            }
        }
        self.expect(TokenKind::RBrace)?;

        Ok(ListenerConfig {
            address,
            protocol: protocol.unwrap_or_default(),
            table,
            fallback,
        })
    }

    fn parse_table(&mut self) -> ParseResult<TableConfig> {
        let name = if let Some(TokenKind::Word(_)) = self.peek() {
            Some(self.expect_word()?)
        } else {
            None
        };
        self.expect(TokenKind::LBrace)?;

        let mut entries = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let pattern = self.expect_word()?;
            let address = self.parse_address()?;
            self.expect(TokenKind::Semicolon)?;
            entries.push(BackendEntry { pattern, address });
        }
        self.expect(TokenKind::RBrace)?;

        Ok(TableConfig { name, entries })
    }
}

fn validate_references(config: &Config) -> ParseResult<()> {
    use std::collections::HashSet;

    let mut seen_names = HashSet::new();
    for table in &config.tables {
        if !seen_names.insert(table.name.clone()) {
            return Err(err(
                match &table.name {
                    Some(n) => format!("duplicate table name '{}'", n),
                    None => "duplicate anonymous table".to_string(),
                },
                None,
            ));
        }
    }

    for listener in &config.listeners {
        if config.table_named(listener.table.as_deref()).is_none() {
            return Err(err(
                match &listener.table {
                    Some(n) => format!("listener references unknown table '{}'", n),
                    None => "listener has no table and no anonymous table is defined".to_string(),
                },
                None,
            ));
        }
    }

    Ok(())
}

pub fn parse_str(input: &str) -> ParseResult<Config> {
    let tokens = Lexer::new(input)
        .tokenize()
        .map_err(|message| err(message, None))?;
    let mut parser = Parser { tokens, cursor: 0 };
    parser.parse_config()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let src = r#"
            username nobody;
            table {
                example.com 10.0.0.1 443;
            }
            listener 0.0.0.0 443 {
                protocol tls;
            }
        "#;
        let cfg = parse_str(src).unwrap();
        assert_eq!(cfg.username.as_deref(), Some("nobody"));
        assert_eq!(cfg.tables.len(), 1);
        assert_eq!(cfg.tables[0].entries.len(), 1);
        assert_eq!(cfg.listeners.len(), 1);
        assert_eq!(cfg.listeners[0].protocol, Protocol::Tls);
    }

    #[test]
    fn named_table_referenced_by_listener() {
        let src = r#"
            table internal {
                foo.test 127.0.0.1 8080;
            }
            listener 0.0.0.0 80 {
                protocol http;
                table internal;
                fallback 127.0.0.1 9000;
            }
        "#;
        let cfg = parse_str(src).unwrap();
        assert_eq!(cfg.listeners[0].table.as_deref(), Some("internal"));
        assert!(cfg.listeners[0].fallback.is_some());
    }

    #[test]
    fn unknown_table_reference_is_an_error() {
        let src = r#"
            listener 0.0.0.0 80 {
                table nope;
            }
        "#;
        assert!(parse_str(src).is_err());
    }

    #[test]
    fn duplicate_table_names_rejected() {
        let src = r#"
            table a { x 127.0.0.1 1; }
            table a { y 127.0.0.1 2; }
        "#;
        assert!(parse_str(src).is_err());
    }

    #[test]
    fn out_of_range_port_rejected() {
        let src = "listener 0.0.0.0 99999 { }";
        let e = parse_str(src).unwrap_err();
        assert!(e.message.contains("out of range"));
    }

    #[test]
    fn hostname_backend_is_parsed_but_not_literal() {
        let src = r#"
            table {
                bad.example backend.internal 80;
            }
            listener 0.0.0.0 80 { protocol http; }
        "#;
        let cfg = parse_str(src).unwrap();
        assert!(!cfg.tables[0].entries[0].address.is_literal());
    }
}
