//! Tokenizer for Petsfiles
//!
//! `logos` produces the raw tokens; [`tokenize`] then turns line structure
//! into `Newline`, `Indent` and `Dedent` markers the way Python does.
//! Newlines inside brackets are ignored, as are blank and comment-only lines.

use crate::ast::Loc;
use crate::error::{ErrorKind, ScriptError};
use logos::Logos;
use std::path::Path;
use std::sync::Arc;

/// Raw Petsfile tokens
#[derive(Logos, Debug, PartialEq, Eq, Clone)]
#[logos(skip r"[ \t\r\f]+")]
#[logos(skip r"#[^\n]*")]
#[logos(skip r"\\\r?\n")]
pub enum Token<'a> {
    // ===== Keywords =====
    #[token("def")]
    Def,

    #[token("if")]
    If,

    #[token("elif")]
    Elif,

    #[token("else")]
    Else,

    #[token("for")]
    For,

    #[token("in")]
    In,

    #[token("not")]
    Not,

    #[token("and")]
    And,

    #[token("or")]
    Or,

    #[token("return")]
    Return,

    #[token("pass")]
    Pass,

    #[token("break")]
    Break,

    #[token("continue")]
    Continue,

    #[token("load")]
    Load,

    #[token("True")]
    True,

    #[token("False")]
    False,

    #[token("None")]
    None,

    // ===== Operators =====
    #[token("==")]
    Eq,

    #[token("!=")]
    NotEq,

    #[token("<=")]
    LessEq,

    #[token(">=")]
    GreaterEq,

    #[token("<")]
    Less,

    #[token(">")]
    Greater,

    #[token("+=")]
    PlusAssign,

    #[token("-=")]
    MinusAssign,

    #[token("=")]
    Assign,

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("//")]
    SlashSlash,

    #[token("/")]
    Slash,

    #[token("%")]
    Percent,

    // ===== Delimiters =====
    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token(",")]
    Comma,

    #[token(":")]
    Colon,

    #[token(".")]
    Dot,

    #[token("\n")]
    Newline,

    // ===== Literals =====
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| unescape(lex.slice()))]
    #[regex(r#"'([^'\\\n]|\\.)*'"#, |lex| unescape(lex.slice()))]
    Str(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice())]
    Ident(&'a str),
}

/// Strip the quotes from a string literal and resolve its escapes.
fn unescape(literal: &str) -> Option<String> {
    let body = &literal[1..literal.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            _ => return None,
        }
    }
    Some(out)
}

/// A token after layout processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tok<'a> {
    Lexeme(Token<'a>),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned<'a> {
    pub tok: Tok<'a>,
    pub loc: Loc,
}

/// Maps byte offsets to 1-based line and column numbers.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    fn loc(&self, offset: usize) -> Loc {
        let line = match self.starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        Loc {
            line: line as u32 + 1,
            col: (offset - self.starts[line]) as u32 + 1,
        }
    }
}

/// Tokenize a whole file, including layout tokens. The result always ends
/// with `Newline`, any pending `Dedent`s and `Eof`.
pub fn tokenize<'a>(source: &'a str, file: &Arc<Path>) -> Result<Vec<Spanned<'a>>, ScriptError> {
    let index = LineIndex::new(source);
    let mut lexer = Token::lexer(source);
    let mut out = Vec::new();
    let mut indents = vec![1u32];
    let mut depth = 0usize;
    let mut at_line_start = true;

    while let Some(result) = lexer.next() {
        let loc = index.loc(lexer.span().start);
        let token = match result {
            Ok(token) => token,
            Err(()) => {
                return Err(ScriptError::new(
                    ErrorKind::Syntax,
                    format!("invalid token {:?}", lexer.slice()),
                )
                .at_loc(file, loc));
            }
        };

        if token == Token::Newline {
            if depth == 0 && !at_line_start {
                out.push(Spanned {
                    tok: Tok::Newline,
                    loc,
                });
                at_line_start = true;
            }
            continue;
        }

        if at_line_start && depth == 0 {
            let top = indents.last().copied().unwrap_or(1);
            if loc.col > top {
                indents.push(loc.col);
                out.push(Spanned {
                    tok: Tok::Indent,
                    loc,
                });
            } else {
                while loc.col < indents.last().copied().unwrap_or(1) {
                    indents.pop();
                    out.push(Spanned {
                        tok: Tok::Dedent,
                        loc,
                    });
                }
                if indents.last().copied() != Some(loc.col) {
                    return Err(ScriptError::new(
                        ErrorKind::Syntax,
                        "unindent does not match any outer indentation level",
                    )
                    .at_loc(file, loc));
                }
            }
        }
        at_line_start = false;

        match token {
            Token::LParen | Token::LBracket | Token::LBrace => depth += 1,
            Token::RParen | Token::RBracket | Token::RBrace => depth = depth.saturating_sub(1),
            _ => {}
        }
        out.push(Spanned {
            tok: Tok::Lexeme(token),
            loc,
        });
    }

    let end = index.loc(source.len());
    if !at_line_start {
        out.push(Spanned {
            tok: Tok::Newline,
            loc: end,
        });
    }
    for _ in 1..indents.len() {
        out.push(Spanned {
            tok: Tok::Dedent,
            loc: end,
        });
    }
    out.push(Spanned { tok: Tok::Eof, loc: end });
    Ok(out)
}
