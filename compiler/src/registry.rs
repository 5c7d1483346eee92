// registry.rs — Definition registry
//
// Named definitions of one compilation unit with their declared arities.
// Built once from the whole AST before link resolution, so forward
// references and (mutual) recursion resolve without ordering constraints.
//
// Preconditions: a parsed `Program`.
// Postconditions: every first occurrence of a name is registered.
// Failure modes: duplicate names are reported and the later definition is
//   skipped; lookups of unknown names fail with `RegistryError::Unknown`.
// Side effects: none.

use std::collections::HashMap;

use thiserror::Error;

use crate::ast::{Definition, Program, Span};
use crate::diag::{Diagnostic, ErrorKind};

// ── Data types ──────────────────────────────────────────────────────────────

/// Declared shape of one definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefEntry {
    /// Position of the definition in `Program::definitions`.
    pub index: usize,
    pub name: String,
    pub span: Span,
    pub universal: usize,
    pub existential: usize,
    pub inputs: usize,
    pub outputs: usize,
}

impl DefEntry {
    fn from_definition(index: usize, def: &Definition) -> Self {
        DefEntry {
            index,
            name: def.name.name.clone(),
            span: def.name.span,
            universal: def.generics.universal.len(),
            existential: def.generics.existential.len(),
            inputs: def.ports.inputs.len(),
            outputs: def.ports.outputs.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("duplicate definition `{name}`")]
    Duplicate { name: String, first: Span, second: Span },
    #[error("unknown definition `{name}`")]
    Unknown { name: String },
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::Duplicate { .. } => ErrorKind::DuplicateDefinition,
            RegistryError::Unknown { .. } => ErrorKind::UnknownDefinition,
        }
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<DefEntry>,
    by_name: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every definition of `program`, reporting duplicates.
    pub fn build(program: &Program) -> (Registry, Vec<Diagnostic>) {
        let mut registry = Registry::new();
        let mut diagnostics = Vec::new();
        for (index, def) in program.definitions.iter().enumerate() {
            if let Err(err) = registry.register(index, def) {
                let mut diag = Diagnostic::error(err.kind(), def.name.span, err.to_string());
                if let RegistryError::Duplicate { first, .. } = err {
                    diag = diag
                        .with_related(first, "first defined here")
                        .with_hint("rename one of the definitions");
                }
                diagnostics.push(diag);
            }
        }
        (registry, diagnostics)
    }

    /// Add one definition. Fails if the name is already registered.
    pub fn register(&mut self, index: usize, def: &Definition) -> Result<(), RegistryError> {
        if let Some(&slot) = self.by_name.get(&def.name.name) {
            return Err(RegistryError::Duplicate {
                name: def.name.name.clone(),
                first: self.entries[slot].span,
                second: def.name.span,
            });
        }
        self.by_name
            .insert(def.name.name.clone(), self.entries.len());
        self.entries.push(DefEntry::from_definition(index, def));
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<&DefEntry, RegistryError> {
        self.by_name
            .get(name)
            .map(|&slot| &self.entries[slot])
            .ok_or_else(|| RegistryError::Unknown {
                name: name.to_string(),
            })
    }

    /// Registered entries in source order.
    pub fn entries(&self) -> impl Iterator<Item = &DefEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
