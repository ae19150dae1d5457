//! WGSL token definitions.
//!
//! Literal tokens keep their source slice so suffixes survive into the AST
//! and round-trip through the pretty-printer unchanged.

use logos::{Lexer, Logos, Skip};
use std::ops::Range;

fn skip_block_comment(lex: &mut Lexer<Token>) -> Skip {
    // Block comments nest in WGSL.
    let bytes = lex.remainder().as_bytes();
    let mut depth = 1usize;
    let mut i = 0usize;
    while i < bytes.len() && depth > 0 {
        if bytes[i] == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'*' {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'*' && i + 1 < bytes.len() && bytes[i + 1] == b'/' {
            depth -= 1;
            i += 2;
        } else {
            i += 1;
        }
    }
    lex.bump(i);
    Skip
}

#[derive(Logos, Copy, Clone, Debug, Eq, PartialEq)]
pub enum Token {
    #[token("alias")]
    Alias,
    #[token("break")]
    Break,
    #[token("case")]
    Case,
    #[token("const")]
    Const,
    #[token("const_assert")]
    ConstAssert,
    #[token("continue")]
    Continue,
    #[token("continuing")]
    Continuing,
    #[token("default")]
    Default,
    #[token("diagnostic")]
    Diagnostic,
    #[token("discard")]
    Discard,
    #[token("else")]
    Else,
    #[token("enable")]
    Enable,
    #[token("false")]
    False,
    #[token("fn")]
    Fn,
    #[token("for")]
    For,
    #[token("if")]
    If,
    #[token("let")]
    Let,
    #[token("loop")]
    Loop,
    #[token("override")]
    Override,
    #[token("requires")]
    Requires,
    #[token("return")]
    Return,
    #[token("struct")]
    Struct,
    #[token("switch")]
    Switch,
    #[token("true")]
    True,
    #[token("var")]
    Var,
    #[token("while")]
    While,
    #[token("_")]
    Underscore,

    // Lower priority than the keyword and `_` tokens, which win ties.
    #[regex(r"[_a-zA-Z][_a-zA-Z0-9]*", priority = 1)]
    Identifier,

    #[regex(r"0[xX][0-9a-fA-F]+[iu]?")]
    #[regex(r"(0|[1-9][0-9]*)[iu]?")]
    IntLiteral,

    #[regex(r"[0-9]*\.[0-9]+([eE][+-]?[0-9]+)?[fh]?", priority = 3)]
    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?[fh]?", priority = 2)]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+[fh]?")]
    #[regex(r"(0|[1-9][0-9]*)[fh]")]
    FloatLiteral,

    #[token("(")]
    ParenLeft,
    #[token(")")]
    ParenRight,
    #[token("[")]
    BracketLeft,
    #[token("]")]
    BracketRight,
    #[token("{")]
    BraceLeft,
    #[token("}")]
    BraceRight,
    #[token(",")]
    Comma,
    #[token(".")]
    Period,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token("@")]
    At,
    #[token("->")]
    Arrow,

    #[token("=")]
    Equal,
    #[token("==")]
    EqualEqual,
    #[token("!")]
    Bang,
    #[token("!=")]
    NotEqual,
    #[token("<")]
    LessThan,
    #[token("<=")]
    LessEqual,
    #[token(">")]
    GreaterThan,
    #[token(">=")]
    GreaterEqual,
    #[token("&")]
    Amp,
    #[token("&&")]
    AmpAmp,
    #[token("|")]
    Pipe,
    #[token("||")]
    PipePipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("+")]
    Plus,
    #[token("++")]
    PlusPlus,
    #[token("-")]
    Minus,
    #[token("--")]
    MinusMinus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("<<")]
    ShiftLeft,
    #[token(">>")]
    ShiftRight,
    #[token("+=")]
    PlusEqual,
    #[token("-=")]
    MinusEqual,
    #[token("*=")]
    StarEqual,
    #[token("/=")]
    SlashEqual,
    #[token("%=")]
    PercentEqual,
    #[token("&=")]
    AmpEqual,
    #[token("|=")]
    PipeEqual,
    #[token("^=")]
    CaretEqual,
    #[token("<<=")]
    ShiftLeftEqual,
    #[token(">>=")]
    ShiftRightEqual,

    #[error]
    #[regex(r"[ \t\r\n]+", logos::skip)]
    #[regex(r"//[^\n\r]*", logos::skip)]
    #[token("/*", skip_block_comment)]
    Error,
}

/// The whole token stream of one source, with byte spans back into it.
pub struct TokenStream<'a> {
    pub source: &'a str,
    pub tokens: Vec<(Token, Range<usize>)>,
    line_starts: Vec<usize>,
}

impl<'a> TokenStream<'a> {
    pub fn slice(&self, span: &Range<usize>) -> &'a str {
        &self.source[span.clone()]
    }

    /// 1-based line and column of a byte offset.
    pub fn line_col(&self, offset: usize) -> (u32, u32) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let column = offset - self.line_starts[line];
        (line as u32 + 1, column as u32 + 1)
    }
}

pub fn tokenize(source: &str) -> TokenStream<'_> {
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(source);
    while let Some(token) = lexer.next() {
        tokens.push((token, lexer.span()));
    }
    let mut line_starts = vec![0usize];
    for (i, b) in source.bytes().enumerate() {
        if b == b'\n' {
            line_starts.push(i + 1);
        }
    }
    TokenStream {
        source,
        tokens,
        line_starts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn literal_shapes() {
        assert_eq!(kinds("1"), vec![Token::IntLiteral]);
        assert_eq!(kinds("1u"), vec![Token::IntLiteral]);
        assert_eq!(kinds("0x2f"), vec![Token::IntLiteral]);
        assert_eq!(kinds("1f"), vec![Token::FloatLiteral]);
        assert_eq!(kinds("1.0"), vec![Token::FloatLiteral]);
        assert_eq!(kinds(".5h"), vec![Token::FloatLiteral]);
        assert_eq!(kinds("1e-3"), vec![Token::FloatLiteral]);
    }

    #[test]
    fn compound_operators_take_longest_match() {
        assert_eq!(kinds("a<<=b"), vec![Token::Identifier, Token::ShiftLeftEqual, Token::Identifier]);
        assert_eq!(kinds("a>=b"), vec![Token::Identifier, Token::GreaterEqual, Token::Identifier]);
        assert_eq!(kinds("i++"), vec![Token::Identifier, Token::PlusPlus]);
    }

    #[test]
    fn comments_are_skipped_and_nest() {
        assert_eq!(kinds("a // comment\nb"), vec![Token::Identifier, Token::Identifier]);
        assert_eq!(kinds("a /* x /* y */ z */ b"), vec![Token::Identifier, Token::Identifier]);
    }

    #[test]
    fn keywords_vs_identifiers() {
        assert_eq!(kinds("continuing"), vec![Token::Continuing]);
        assert_eq!(kinds("continue"), vec![Token::Continue]);
        assert_eq!(kinds("_x"), vec![Token::Identifier]);
        assert_eq!(kinds("_"), vec![Token::Underscore]);
    }

    #[test]
    fn line_col_mapping() {
        let ts = tokenize("a\nbb c");
        assert_eq!(ts.line_col(0), (1, 1));
        assert_eq!(ts.line_col(2), (2, 1));
        assert_eq!(ts.line_col(5), (2, 4));
    }
}
