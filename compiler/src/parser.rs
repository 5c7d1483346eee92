// Parser for .dfl diagram-definition sources.
//
// Parses a token stream (from the lexer) into an AST. Uses chumsky
// combinators over the logos token stream.
//
// Grammar:
//   program     := definition*
//   definition  := 'def' IDENT '=' generics? ports body
//   generics    := '<>' | '<' idents? ('|' idents?)? '>'
//   ports       := '[' idents? '|' idents? ']'
//   body        := (use_stmt | link_block)*
//   use_stmt    := 'use' box_ref ports 'as' IDENT
//   box_ref     := '+' IDENT | '-' IDENT | '*' IDENT | IDENT '{' INT '}'
//                | '><' | '<>' | IDENT generics?
//   link_block  := 'link' (edge ','?)*
//   edge        := port_ref '>->' port_ref
//   port_ref    := IDENT ('.' IDENT)?
//
// Preconditions: input is valid UTF-8 source text.
// Postconditions: returns an AST plus any syntax diagnostics (lex and parse).
// Failure modes: syntax errors produce `Syntax` diagnostics; no panic.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::diag::{Diagnostic, ErrorKind};
use crate::lexer::Token;

/// Result of parsing: AST plus any syntax diagnostics.
#[derive(Debug)]
pub struct ParseResult {
    pub program: Option<Program>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parse a DFL source string. Lexes then parses.
///
/// Lex errors do not stop parsing; they are reported together with the
/// parse errors. `program` is `None` only when the parser could not produce
/// any output.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = program_parser(source);
    let (program, parse_errors) = parser.parse(stream).into_output_errors();

    let mut diagnostics: Vec<Diagnostic> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Diagnostic::error(ErrorKind::Syntax, span, e.message)
        })
        .collect();
    diagnostics.extend(parse_errors.iter().map(syntax_diagnostic));
    diagnostics.sort_by_key(|d| d.span.start);

    ParseResult {
        program,
        diagnostics,
    }
}

/// Convert a chumsky error into a `Syntax` diagnostic with an
/// expected-token description.
fn syntax_diagnostic(err: &Rich<'_, Token, SimpleSpan>) -> Diagnostic {
    let found = match err.found() {
        Some(tok) => format!("`{tok}`"),
        None => "end of input".to_string(),
    };
    let mut expected: Vec<String> = err.expected().map(ToString::to_string).collect();
    expected.sort();
    expected.dedup();

    let message = if expected.is_empty() {
        format!("unexpected {found}")
    } else {
        format!("expected {}, found {}", expected.join(" or "), found)
    };
    Diagnostic::error(ErrorKind::Syntax, *err.span(), message)
}

/// Body items in source order, split into uses and links afterwards.
enum BodyItem {
    Use(Use),
    Links(Vec<Link>),
}

// ── Main parser builder ──
//
// All grammar rules are built inside `program_parser` so that the `source`
// reference is captured once and shared by all combinators.

fn program_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Program, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    let idents = ident
        .clone()
        .separated_by(just(Token::Comma))
        .collect::<Vec<_>>();

    // ── Generics: '<>' | '<' idents? ('|' idents?)? '>' ──

    let generics = {
        let empty = just(Token::Split).map_with(|_, e| Generics::empty(e.span()));
        let listed = idents
            .clone()
            .then(just(Token::Pipe).ignore_then(idents.clone()).or_not())
            .delimited_by(just(Token::Lt), just(Token::Gt))
            .map_with(|(universal, existential), e| Generics {
                universal,
                existential: existential.unwrap_or_default(),
                span: e.span(),
            });
        empty.or(listed)
    };

    // ── Ports: '[' idents? '|' idents? ']' ──

    let ports = idents
        .clone()
        .then_ignore(just(Token::Pipe))
        .then(idents.clone())
        .delimited_by(just(Token::LBracket), just(Token::RBracket))
        .map_with(|(inputs, outputs), e| PortList {
            inputs,
            outputs,
            span: e.span(),
        });

    // ── Box reference ──

    let box_ref = {
        let add = just(Token::Plus).ignore_then(ident.clone()).map(BoxRef::Add);
        let remove = just(Token::Minus)
            .ignore_then(ident.clone())
            .map(BoxRef::Remove);
        let spawn = just(Token::Star)
            .ignore_then(ident.clone())
            .map(BoxRef::Spawn);
        let indexed = ident
            .clone()
            .then(
                select! { Token::Int(k) => k }
                    .delimited_by(just(Token::LBrace), just(Token::RBrace)),
            )
            .map_with(|(tag, arg), e| BoxRef::Indexed {
                tag,
                arg,
                span: e.span(),
            });
        let join = just(Token::Join).map_with(|_, e| BoxRef::Join(e.span()));
        let split = just(Token::Split).map_with(|_, e| BoxRef::Split(e.span()));
        let definition = ident
            .clone()
            .then(generics.clone().or_not())
            .map(|(name, args)| BoxRef::Definition { name, args });

        // `IDENT{k}` is tried before a plain definition reference.
        choice((add, remove, spawn, indexed, join, split, definition))
    };

    // ── use box_ref ports 'as' IDENT ──

    let use_stmt = just(Token::Use)
        .ignore_then(box_ref)
        .then(ports.clone())
        .then_ignore(just(Token::As))
        .then(ident.clone())
        .map_with(|((target, ports), instance), e| Use {
            target,
            ports,
            instance,
            span: e.span(),
        });

    // ── link (edge ','?)* ──

    let port_ref = ident
        .clone()
        .then(just(Token::Dot).ignore_then(ident.clone()).or_not())
        .map_with(|(first, second), e| match second {
            Some(port) => PortRef {
                instance: Some(first),
                port,
                span: e.span(),
            },
            None => PortRef {
                instance: None,
                port: first,
                span: e.span(),
            },
        });

    let edge = port_ref
        .clone()
        .then_ignore(just(Token::Arrow))
        .then(port_ref)
        .map_with(|(source, target), e| Link {
            source,
            target,
            span: e.span(),
        });

    let link_block = just(Token::Link).ignore_then(
        edge.then_ignore(just(Token::Comma).or_not())
            .repeated()
            .collect::<Vec<_>>(),
    );

    let body_item = use_stmt
        .map(BodyItem::Use)
        .or(link_block.map(BodyItem::Links));

    // ── def IDENT '=' generics? ports body ──

    let definition = just(Token::Def)
        .ignore_then(ident)
        .then_ignore(just(Token::Equals))
        .then(generics.or_not())
        .then(ports)
        .then(body_item.repeated().collect::<Vec<_>>())
        .map_with(|(((name, generics), ports), items), e| {
            let generics = generics.unwrap_or_else(|| {
                let at = ports.span.start;
                Generics::empty((at..at).into())
            });
            let mut uses = Vec::new();
            let mut links = Vec::new();
            for item in items {
                match item {
                    BodyItem::Use(u) => uses.push(u),
                    BodyItem::Links(ls) => links.extend(ls),
                }
            }
            Definition {
                name,
                generics,
                ports,
                uses,
                links,
                span: e.span(),
            }
        });

    // ── Program ──

    definition
        .repeated()
        .collect::<Vec<_>>()
        .map_with(|definitions, e| Program {
            definitions,
            span: e.span(),
        })
}

// ── Tests ──
