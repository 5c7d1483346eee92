// AST node types for .dfl source files.
//
// Mirrors the grammar of box definitions: a header with generator
// parameters and boundary ports, a list of `use` statements and the edges
// of its `link` blocks. Every node carries a `SimpleSpan` for error
// reporting in downstream phases.
//
// `Display` re-serializes a program in canonical layout; the output parses
// back to an equivalent AST.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use std::fmt;

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Root ──

/// A complete compilation unit: an ordered sequence of definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub definitions: Vec<Definition>,
    pub span: Span,
}

impl Program {
    pub fn definition(&self, name: &str) -> Option<&Definition> {
        self.definitions.iter().find(|d| d.name.name == name)
    }
}

// ── def IDENT '=' generics? ports body ──

#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub name: Ident,
    pub generics: Generics,
    pub ports: PortList,
    pub uses: Vec<Use>,
    pub links: Vec<Link>,
    pub span: Span,
}

/// Generator parameters `<u1, u2 | e1>` or use-site generator arguments.
///
/// Universal symbols are supplied by the user of a definition; existential
/// symbols are introduced by the definition itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Generics {
    pub universal: Vec<Ident>,
    pub existential: Vec<Ident>,
    pub span: Span,
}

impl Generics {
    pub fn empty(span: Span) -> Self {
        Generics {
            universal: Vec::new(),
            existential: Vec::new(),
            span,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.universal.is_empty() && self.existential.is_empty()
    }

    pub fn len(&self) -> usize {
        self.universal.len() + self.existential.len()
    }
}

/// `[in1, in2 | out1]`
#[derive(Debug, Clone, PartialEq)]
pub struct PortList {
    pub inputs: Vec<Ident>,
    pub outputs: Vec<Ident>,
    pub span: Span,
}

// ── use box_ref ports as IDENT ──

#[derive(Debug, Clone, PartialEq)]
pub struct Use {
    pub target: BoxRef,
    pub ports: PortList,
    pub instance: Ident,
    pub span: Span,
}

/// What a `use` statement instantiates.
#[derive(Debug, Clone, PartialEq)]
pub enum BoxRef {
    /// `+sym`
    Add(Ident),
    /// `-sym`
    Remove(Ident),
    /// `*sym`
    Spawn(Ident),
    /// `TAG{k}`, e.g. `U{2}`. The tag is checked against the catalog later.
    Indexed { tag: Ident, arg: u32, span: Span },
    /// `><`
    Join(Span),
    /// `<>`
    Split(Span),
    /// A user definition, optionally applied to generator arguments.
    Definition { name: Ident, args: Option<Generics> },
}

impl BoxRef {
    pub fn span(&self) -> Span {
        match self {
            BoxRef::Add(sym) | BoxRef::Remove(sym) | BoxRef::Spawn(sym) => sym.span,
            BoxRef::Indexed { span, .. } => *span,
            BoxRef::Join(span) | BoxRef::Split(span) => *span,
            BoxRef::Definition { name, args } => match args {
                Some(args) => (name.span.start..args.span.end).into(),
                None => name.span,
            },
        }
    }
}

// ── link edges: port_ref '>->' port_ref ──

#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub source: PortRef,
    pub target: PortRef,
    pub span: Span,
}

/// `Port` (enclosing boundary) or `Instance.Port`.
#[derive(Debug, Clone, PartialEq)]
pub struct PortRef {
    pub instance: Option<Ident>,
    pub port: Ident,
    pub span: Span,
}

// ── Identifier ──

/// An identifier with its source text and span.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

// ── Pretty printing ──

fn write_idents(f: &mut fmt::Formatter<'_>, idents: &[Ident]) -> fmt::Result {
    for (i, ident) in idents.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", ident.name)?;
    }
    Ok(())
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, def) in self.definitions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{def}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "def {} = ", self.name.name)?;
        if !self.generics.is_empty() {
            write!(f, "{} ", self.generics)?;
        }
        writeln!(f, "{}", self.ports)?;
        for u in &self.uses {
            writeln!(f, "    {u}")?;
        }
        if !self.links.is_empty() {
            writeln!(f, "    link")?;
            for link in &self.links {
                writeln!(f, "        {link}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Generics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<")?;
        write_idents(f, &self.universal)?;
        write!(f, " |")?;
        if !self.existential.is_empty() {
            write!(f, " ")?;
            write_idents(f, &self.existential)?;
        }
        write!(f, ">")
    }
}

impl fmt::Display for PortList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        write_idents(f, &self.inputs)?;
        write!(f, " | ")?;
        write_idents(f, &self.outputs)?;
        write!(f, "]")
    }
}

impl fmt::Display for Use {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "use {} {} as {}", self.target, self.ports, self.instance.name)
    }
}

impl fmt::Display for BoxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoxRef::Add(sym) => write!(f, "+{}", sym.name),
            BoxRef::Remove(sym) => write!(f, "-{}", sym.name),
            BoxRef::Spawn(sym) => write!(f, "*{}", sym.name),
            BoxRef::Indexed { tag, arg, .. } => write!(f, "{}{{{}}}", tag.name, arg),
            BoxRef::Join(_) => write!(f, "><"),
            BoxRef::Split(_) => write!(f, "<>"),
            BoxRef::Definition { name, args } => {
                write!(f, "{}", name.name)?;
                if let Some(args) = args {
                    write!(f, " {args}")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} >-> {}", self.source, self.target)
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(instance) => write!(f, "{}.{}", instance.name, self.port.name),
            None => write!(f, "{}", self.port.name),
        }
    }
}
