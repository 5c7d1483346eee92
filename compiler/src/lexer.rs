// Lexer for .dfl diagram-definition sources.
//
// Tokenizes box definitions: `def` headers, `use` statements and `link`
// blocks. Uses the `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// DFL token types.
///
/// Whitespace, including newlines, only separates tokens: a whole program may
/// be written on a single line. Identifiers carry no value; use the span to
/// retrieve the text from the source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+|#[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("def")]
    Def,
    #[token("use")]
    Use,
    #[token("as")]
    As,
    #[token("link")]
    Link,

    // ── Combinator symbols ──
    //
    // `>->` must win over `>` and `><`; logos picks the longest match.
    #[token(">->")]
    Arrow,
    /// `><`: join primitive.
    #[token("><")]
    Join,
    /// `<>`: split primitive, or an empty generator list in header position.
    #[token("<>")]
    Split,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,

    // ── Punctuation ──
    #[token("=")]
    Equals,
    #[token("|")]
    Pipe,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
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
    #[token(".")]
    Dot,

    // ── Literals ──
    /// Unsigned integer, used as the `k` in `U{k}`.
    #[regex(r"[0-9]+", parse_int)]
    Int(u32),

    // ── Identifier ──
    //
    // Placed after keywords: logos prioritises fixed `#[token]` matches
    // over regex for the same length, so `use` matches Use, not Ident.
    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Def => write!(f, "def"),
            Token::Use => write!(f, "use"),
            Token::As => write!(f, "as"),
            Token::Link => write!(f, "link"),
            Token::Arrow => write!(f, ">->"),
            Token::Join => write!(f, "><"),
            Token::Split => write!(f, "<>"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Equals => write!(f, "="),
            Token::Pipe => write!(f, "|"),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Comma => write!(f, ","),
            Token::Dot => write!(f, "."),
            Token::Int(v) => write!(f, "{v}"),
            Token::Ident => write!(f, "<ident>"),
        }
    }
}

// ── Callbacks ──

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<u32> {
    lex.slice().parse().ok()
}

// ── Public API ──

/// Lex a DFL source string into tokens.
///
/// Returns all successfully parsed tokens together with any errors for
/// unrecognised characters. Lexing is non-fatal: errors are collected and
/// the lexer continues past bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: lex and assert no errors, return token list.
    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    /// Helper: lex and return (tokens, errors).
    fn lex_all(source: &str) -> (Vec<Token>, Vec<LexError>) {
        let result = lex(source);
        let tokens = result.tokens.into_iter().map(|(t, _)| t).collect();
        (tokens, result.errors)
    }

    // ── Keywords ──

    #[test]
    fn keywords() {
        let tokens = lex_ok("def use as link");
        assert_eq!(
            tokens,
            vec![Token::Def, Token::Use, Token::As, Token::Link]
        );
    }

    #[test]
    fn keyword_vs_ident() {
        // `user` is an identifier, not keyword `use` + `r`
        let tokens = lex_ok("use user linked");
        assert_eq!(tokens, vec![Token::Use, Token::Ident, Token::Ident]);
    }

    // ── Combinators ──

    #[test]
    fn arrow_wins_over_gt() {
        let tokens = lex_ok("X>->R.X");
        assert_eq!(
            tokens,
            vec![
                Token::Ident,
                Token::Arrow,
                Token::Ident,
                Token::Dot,
                Token::Ident,
            ]
        );
    }

    #[test]
    fn join_and_split() {
        let tokens = lex_ok(">< <> < >");
        assert_eq!(
            tokens,
            vec![Token::Join, Token::Split, Token::Lt, Token::Gt]
        );
    }

    #[test]
    fn generator_primitives() {
        let tokens = lex_ok("+a -b *c");
        assert_eq!(
            tokens,
            vec![
                Token::Plus,
                Token::Ident,
                Token::Minus,
                Token::Ident,
                Token::Star,
                Token::Ident,
            ]
        );
    }

    #[test]
    fn union_primitive() {
        let tokens = lex_ok("U{2}");
        assert_eq!(
            tokens,
            vec![Token::Ident, Token::LBrace, Token::Int(2), Token::RBrace]
        );
    }

    #[test]
    fn generic_header() {
        let tokens = lex_ok("<a, b |>");
        assert_eq!(
            tokens,
            vec![
                Token::Lt,
                Token::Ident,
                Token::Comma,
                Token::Ident,
                Token::Pipe,
                Token::Gt,
            ]
        );
    }

    #[test]
    fn int_overflow_is_error() {
        let (_, errors) = lex_all("U{99999999999}");
        assert_eq!(errors.len(), 1);
    }

    // ── Whitespace and comments ──

    #[test]
    fn newlines_are_whitespace() {
        let tokens = lex_ok("a\n\n  b\r\n\tc");
        assert_eq!(tokens, vec![Token::Ident, Token::Ident, Token::Ident]);
    }

    #[test]
    fn comment_skipped() {
        let tokens = lex_ok("foo # this is a comment\nbar");
        assert_eq!(tokens, vec![Token::Ident, Token::Ident]);
    }

    #[test]
    fn comment_only_line() {
        let tokens = lex_ok("# full line comment");
        assert!(tokens.is_empty());
    }

    // ── Spans ──

    #[test]
    fn spans_correct() {
        let result = lex("def foo");
        assert!(result.errors.is_empty());
        assert_eq!(result.tokens.len(), 2);
        assert_eq!(result.tokens[0].1, Span { start: 0, end: 3 });
        assert_eq!(result.tokens[1].1, Span { start: 4, end: 7 });
    }

    // ── Error recovery ──

    #[test]
    fn error_recovery() {
        let (tokens, errors) = lex_all("foo ~ bar");
        // `~` is not a valid token
        assert_eq!(tokens, vec![Token::Ident, Token::Ident]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].span, Span { start: 4, end: 5 });
    }

    // ── Full definition ──

    #[test]
    fn single_line_definition() {
        let source = "def main=[X|Y] use -a[X|Y] as R link X>->R.X, R.Y>->Y";
        let tokens = lex_ok(source);
        assert_eq!(
            tokens,
            vec![
                Token::Def,
                Token::Ident, // main
                Token::Equals,
                Token::LBracket,
                Token::Ident, // X
                Token::Pipe,
                Token::Ident, // Y
                Token::RBracket,
                Token::Use,
                Token::Minus,
                Token::Ident, // a
                Token::LBracket,
                Token::Ident,
                Token::Pipe,
                Token::Ident,
                Token::RBracket,
                Token::As,
                Token::Ident, // R
                Token::Link,
                Token::Ident, // X
                Token::Arrow,
                Token::Ident, // R
                Token::Dot,
                Token::Ident, // X
                Token::Comma,
                Token::Ident, // R
                Token::Dot,
                Token::Ident, // Y
                Token::Arrow,
                Token::Ident, // Y
            ]
        );
    }
}
