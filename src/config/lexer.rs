//! Hand-rolled lexer for the config's brace/semicolon stanza grammar.
//! `Token`/`Loc` pair, line/col tracking, `#` comments, tokenizing braces
//! and semicolons rather than significant whitespace.

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loc {
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, col {}", self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Word(String),
    Number(u64),
    LBrace,
    RBrace,
    Semicolon,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Word(s) => write!(f, "{s}"),
            TokenKind::Number(n) => write!(f, "{n}"),
            TokenKind::LBrace => write!(f, "{{"),
            TokenKind::RBrace => write!(f, "}}"),
            TokenKind::Semicolon => write!(f, ";"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub loc: Loc,
}

pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.chars().peekable(),
            line: 1,
            col: 1,
        }
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.input.next();
        if let Some(c) = c {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        c
    }

    fn peek(&mut self) -> Option<&char> {
        self.input.peek()
    }

    fn loc(&self) -> Loc {
        Loc {
            line: self.line,
            col: self.col,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, String> {
        let mut tokens = Vec::new();

        while let Some(&c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
                continue;
            }
            if c == '#' {
                while let Some(&c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
                continue;
            }

            let loc = self.loc();
            match c {
                '{' => {
                    self.advance();
                    tokens.push(Token {
                        kind: TokenKind::LBrace,
                        loc,
                    });
                }
                '}' => {
                    self.advance();
                    tokens.push(Token {
                        kind: TokenKind::RBrace,
                        loc,
                    });
                }
                ';' => {
                    self.advance();
                    tokens.push(Token {
                        kind: TokenKind::Semicolon,
                        loc,
                    });
                }
                '"' => tokens.push(self.scan_quoted(loc)),
                _ => tokens.push(self.scan_word(loc)?),
            }
        }

        Ok(tokens)
    }

    fn scan_quoted(&mut self, loc: Loc) -> Token {
        self.advance(); // opening quote
        let mut s = String::new();
        while let Some(&c) = self.peek() {
            if c == '"' {
                self.advance();
                break;
            }
            s.push(c);
            self.advance();
        }
        Token {
            kind: TokenKind::Word(s),
            loc,
        }
    }

    fn scan_word(&mut self, loc: Loc) -> Result<Token, String> {
        let mut s = String::new();
        while let Some(&c) = self.peek() {
            if c.is_whitespace() || matches!(c, '{' | '}' | ';' | '#') {
                break;
            }
            s.push(c);
            self.advance();
        }
        if s.is_empty() {
            let c = *self.peek().unwrap();
            return Err(format!(
                "unexpected character '{}' at line {}, col {}",
                c, self.line, self.col
            ));
        }
        let kind = match s.parse::<u64>() {
            Ok(n) => TokenKind::Number(n),
            Err(_) => TokenKind::Word(s),
        };
        Ok(Token { kind, loc })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn tokenizes_listener_stanza() {
        let src = "listener 0.0.0.0 443 {\n  protocol tls;\n}\n";
        let got = kinds(src);
        assert_eq!(
            got,
            vec![
                TokenKind::Word("listener".into()),
                TokenKind::Word("0.0.0.0".into()),
                TokenKind::Number(443),
                TokenKind::LBrace,
                TokenKind::Word("protocol".into()),
                TokenKind::Word("tls".into()),
                TokenKind::Semicolon,
                TokenKind::RBrace,
            ]
        );
    }

    #[test]
    fn skips_comments() {
        let got = kinds("username nobody; # run as nobody\n");
        assert_eq!(
            got,
            vec![
                TokenKind::Word("username".into()),
                TokenKind::Word("nobody".into()),
                TokenKind::Semicolon,
            ]
        );
    }

    #[test]
    fn quoted_word_preserves_dots() {
        let got = kinds(r#"table "my.table" { }"#);
        assert_eq!(
            got,
            vec![
                TokenKind::Word("table".into()),
                TokenKind::Word("my.table".into()),
                TokenKind::LBrace,
                TokenKind::RBrace,
            ]
        );
    }
}
