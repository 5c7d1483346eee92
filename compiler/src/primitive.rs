// primitive.rs — Primitive combinator catalog
//
// The closed set of built-in boxes. Every other box is a user definition
// that eventually expands into these.
//
// Preconditions: none.
// Postconditions: `lookup` returns a well-formed primitive (arity >= 1).
// Failure modes: unknown tag → `CatalogError::Unknown`; `k < 1` →
//   `CatalogError::ZeroArity`.
// Side effects: none (static, read-only table).

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::diag::ErrorKind;

// ── Primitive ───────────────────────────────────────────────────────────────

/// A built-in combinator instance with its concrete arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Primitive {
    /// `+a`: introduce a fresh generator.
    Add(String),
    /// `-a`: consume a generator that must be present.
    Remove(String),
    /// `*a`: introduce a generator on a spawned branch.
    Spawn(String),
    /// `U{k}`: merge `k` flows.
    Union(u32),
    /// `><`: merge two flows.
    Join,
    /// `<>`: copy one flow onto two.
    Split,
}

/// Input and output arity of a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimitiveSignature {
    pub inputs: usize,
    pub outputs: usize,
}

// ── Fresh symbols ──

/// Separator between a symbol and the instance that introduced it. `#`
/// starts a comment in source, so no written symbol contains it.
const FRESH_SEPARATOR: char = '#';

/// Name for existential `sym` introduced by expansion frame `frame`.
pub fn fresh_symbol(sym: &str, frame: usize) -> String {
    format!("{sym}{FRESH_SEPARATOR}{frame}")
}

/// The symbol as written in source: `e#3` shows as `e`.
pub fn display_symbol(sym: &str) -> &str {
    sym.split_once(FRESH_SEPARATOR).map_or(sym, |(base, _)| base)
}

impl Primitive {
    pub fn signature(&self) -> PrimitiveSignature {
        let (inputs, outputs) = match self {
            Primitive::Add(_) | Primitive::Remove(_) | Primitive::Spawn(_) => (1, 1),
            Primitive::Union(k) => (*k as usize, 1),
            Primitive::Join => (2, 1),
            Primitive::Split => (1, 2),
        };
        PrimitiveSignature { inputs, outputs }
    }

    /// Rename the generator symbol through `bind`; other variants are unchanged.
    pub fn substitute(&self, bind: impl Fn(&str) -> String) -> Primitive {
        match self {
            Primitive::Add(s) => Primitive::Add(bind(s)),
            Primitive::Remove(s) => Primitive::Remove(bind(s)),
            Primitive::Spawn(s) => Primitive::Spawn(bind(s)),
            other => other.clone(),
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Add(s) => write!(f, "+{}", display_symbol(s)),
            Primitive::Remove(s) => write!(f, "-{}", display_symbol(s)),
            Primitive::Spawn(s) => write!(f, "*{}", display_symbol(s)),
            Primitive::Union(k) => write!(f, "U{{{k}}}"),
            Primitive::Join => write!(f, "><"),
            Primitive::Split => write!(f, "<>"),
        }
    }
}

// ── Catalog ─────────────────────────────────────────────────────────────────

/// Argument supplied at a use site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveArg<'a> {
    None,
    Symbol(&'a str),
    Count(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgShape {
    None,
    Symbol,
    Count,
}

struct CatalogEntry {
    tag: &'static str,
    shape: ArgShape,
}

static CATALOG: &[CatalogEntry] = &[
    CatalogEntry { tag: "+", shape: ArgShape::Symbol },
    CatalogEntry { tag: "-", shape: ArgShape::Symbol },
    CatalogEntry { tag: "*", shape: ArgShape::Symbol },
    CatalogEntry { tag: "U", shape: ArgShape::Count },
    CatalogEntry { tag: "><", shape: ArgShape::None },
    CatalogEntry { tag: "<>", shape: ArgShape::None },
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("unknown primitive `{tag}`")]
    Unknown { tag: String },
    #[error("primitive `{tag}{{{k}}}` needs at least one input")]
    ZeroArity { tag: String, k: u32 },
    #[error("primitive `{tag}` takes a different argument")]
    BadArgument { tag: String },
}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::Unknown { .. } => ErrorKind::UnknownPrimitive,
            CatalogError::ZeroArity { .. } | CatalogError::BadArgument { .. } => {
                ErrorKind::ArityMismatch
            }
        }
    }
}

/// Look up a primitive by tag and argument.
pub fn lookup(tag: &str, arg: PrimitiveArg<'_>) -> Result<Primitive, CatalogError> {
    let entry = CATALOG
        .iter()
        .find(|e| e.tag == tag)
        .ok_or_else(|| CatalogError::Unknown {
            tag: tag.to_string(),
        })?;

    let bad = || CatalogError::BadArgument {
        tag: tag.to_string(),
    };
    match (entry.shape, arg) {
        (ArgShape::Symbol, PrimitiveArg::Symbol(s)) => Ok(match tag {
            "+" => Primitive::Add(s.to_string()),
            "-" => Primitive::Remove(s.to_string()),
            _ => Primitive::Spawn(s.to_string()),
        }),
        (ArgShape::Count, PrimitiveArg::Count(0)) => Err(CatalogError::ZeroArity {
            tag: tag.to_string(),
            k: 0,
        }),
        (ArgShape::Count, PrimitiveArg::Count(k)) => Ok(Primitive::Union(k)),
        (ArgShape::None, PrimitiveArg::None) => Ok(if tag == "><" {
            Primitive::Join
        } else {
            Primitive::Split
        }),
        _ => Err(bad()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_primitives() {
        assert_eq!(
            lookup("+", PrimitiveArg::Symbol("a")).unwrap(),
            Primitive::Add("a".into())
        );
        assert_eq!(
            lookup("-", PrimitiveArg::Symbol("a")).unwrap(),
            Primitive::Remove("a".into())
        );
        assert_eq!(
            lookup("*", PrimitiveArg::Symbol("a")).unwrap(),
            Primitive::Spawn("a".into())
        );
    }

    #[test]
    fn union_arity() {
        let p = lookup("U", PrimitiveArg::Count(3)).unwrap();
        let sig = p.signature();
        assert_eq!((sig.inputs, sig.outputs), (3, 1));
    }

    #[test]
    fn union_zero_is_arity_mismatch() {
        let err = lookup("U", PrimitiveArg::Count(0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArityMismatch);
    }

    #[test]
    fn unknown_tag() {
        let err = lookup("V", PrimitiveArg::Count(2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownPrimitive);
        assert_eq!(err.to_string(), "unknown primitive `V`");
    }

    #[test]
    fn join_and_split_are_fixed() {
        let join = lookup("><", PrimitiveArg::None).unwrap().signature();
        assert_eq!((join.inputs, join.outputs), (2, 1));
        let split = lookup("<>", PrimitiveArg::None).unwrap().signature();
        assert_eq!((split.inputs, split.outputs), (1, 2));
    }

    #[test]
    fn substitute_renames_symbol_only() {
        let p = Primitive::Remove("a".into());
        assert_eq!(
            p.substitute(|s| format!("{s}'")),
            Primitive::Remove("a'".into())
        );
        assert_eq!(Primitive::Join.substitute(|_| "z".into()), Primitive::Join);
    }

    #[test]
    fn display_matches_source_syntax() {
        assert_eq!(Primitive::Add("a".into()).to_string(), "+a");
        assert_eq!(Primitive::Union(2).to_string(), "U{2}");
        assert_eq!(Primitive::Split.to_string(), "<>");
    }

    #[test]
    fn fresh_symbols_display_as_written() {
        let fresh = fresh_symbol("e", 3);
        assert_eq!(fresh, "e#3");
        assert_eq!(display_symbol(&fresh), "e");
        assert_eq!(display_symbol("a"), "a");
        assert_eq!(Primitive::Add(fresh).to_string(), "+e");
    }
}
