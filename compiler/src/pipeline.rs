// pipeline.rs — Compilation state and pass orchestration
//
// Holds all pass artifacts and runs the minimal set of passes for a given
// terminal PassId. `compile` is the one-call entry point used by the CLI
// and the HTTP service.
//
// Preconditions: `CompilationState::new` receives a parsed program.
// Postconditions: artifacts for every required pass are populated, or
//   `has_error` is set and `diagnostics` explains why.
// Failure modes: any pass emitting error-level diagnostics.
// Side effects: calls `on_pass_complete` after each pass; `tracing` events.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::ast::Program;
use crate::diag::{has_errors, locate_all, Diagnostic, ErrorCategory, ErrorKind};
use crate::expand::ExpandOptions;
use crate::pass::{descriptor, required_passes, PassId};
use crate::port_graph::PortGraph;
use crate::registry::Registry;
use crate::resolve::{ResolvedProgram, UseTarget};
use crate::signature::Signature;

// ── Options ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Root definition; `None` picks `main`, else the last definition.
    pub root: Option<String>,
    /// Symbols bound to the root's universal parameters.
    pub generators: Option<Vec<String>>,
    /// Run generator-set inference.
    pub typing: bool,
    pub expand: ExpandOptions,
}

// ── Artifact storage ───────────────────────────────────────────────────────

pub struct CompilationState {
    pub program: Program,
    pub registry: Option<Registry>,
    pub resolved: Option<ResolvedProgram>,
    pub root: Option<usize>,
    pub graph: Option<PortGraph>,
    pub checked: bool,
    pub signature: Option<Signature>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
}

impl CompilationState {
    pub fn new(program: Program) -> Self {
        Self {
            program,
            registry: None,
            resolved: None,
            root: None,
            graph: None,
            checked: false,
            signature: None,
            diagnostics: Vec::new(),
            has_error: false,
        }
    }
}

/// Pipeline execution stopped on error-level diagnostics in a pass.
/// The diagnostics are in `CompilationState::diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    pub failing_pass: PassId,
}

// ── Fingerprint ────────────────────────────────────────────────────────────

/// Identity of one compilation input, for caching and the JSON response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fingerprint {
    /// SHA-256 of the raw source text, hex.
    pub source_hash: String,
    /// SHA-256 of the registry's declared shapes, hex.
    pub registry_fingerprint: String,
    pub compiler_version: &'static str,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut s = String::with_capacity(64);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

pub fn fingerprint(source: &str, registry: &Registry) -> Fingerprint {
    let canonical: Vec<String> = registry
        .entries()
        .map(|e| {
            format!(
                "{}<{}|{}>[{}|{}]",
                e.name, e.universal, e.existential, e.inputs, e.outputs
            )
        })
        .collect();
    Fingerprint {
        source_hash: sha256_hex(source.as_bytes()),
        registry_fingerprint: sha256_hex(canonical.join(";").as_bytes()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Pass bookkeeping ───────────────────────────────────────────────────────

fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic], Duration),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags, elapsed);
    debug!(
        pass = descriptor(pass_id).name,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        diagnostics = diags.len(),
        "pass complete"
    );
    let is_err = has_errors(&diags);
    state.diagnostics.extend(diags);
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

/// A pass ran without its input artifact. Only reachable if the pass table
/// and the runner disagree.
fn missing(state: &mut CompilationState, pass_id: PassId) -> Result<(), PipelineError> {
    state.has_error = true;
    Err(PipelineError {
        failing_pass: pass_id,
    })
}

// ── Root selection ─────────────────────────────────────────────────────────

/// Explicit root, else `main`, else the last definition.
pub fn select_root(program: &Program, root: Option<&str>) -> Result<usize, Diagnostic> {
    let found = match root {
        Some(name) => program.definitions.iter().position(|d| d.name.name == name),
        None => program
            .definitions
            .iter()
            .position(|d| d.name.name == "main")
            .or_else(|| program.definitions.len().checked_sub(1)),
    };
    found.ok_or_else(|| match root {
        Some(name) => Diagnostic::error(
            ErrorKind::UnknownDefinition,
            program.span,
            format!("root definition `{name}` is not defined"),
        ),
        None => Diagnostic::error(
            ErrorKind::UnknownDefinition,
            program.span,
            "program contains no definitions",
        )
        .with_hint("start a diagram with `def main = [X | Y] ...`"),
    })
}

/// Warnings for definitions that the root never reaches.
fn unreachable_definitions(resolved: &ResolvedProgram, root: usize) -> Vec<Diagnostic> {
    let mut seen = HashSet::from([root]);
    let mut stack = vec![root];
    while let Some(index) = stack.pop() {
        for u in &resolved.def(index).uses {
            if let UseTarget::Definition { index: callee, .. } = u.target {
                if seen.insert(callee) {
                    stack.push(callee);
                }
            }
        }
    }
    resolved
        .defs
        .iter()
        .enumerate()
        .filter(|(i, _)| !seen.contains(i))
        .map(|(_, d)| {
            Diagnostic::warning(
                d.span,
                format!(
                    "definition `{}` is never used by `{}`",
                    d.name,
                    resolved.def(root).name
                ),
            )
        })
        .collect()
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    options: &CompileOptions,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic], Duration),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        match pass_id {
            PassId::Register => {
                let (registry, diags) = Registry::build(&state.program);
                state.registry = Some(registry);
                finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::Resolve => {
                let Some(registry) = &state.registry else {
                    return missing(state, pass_id);
                };
                let result = crate::resolve::resolve(&state.program, registry);
                state.resolved = Some(result.resolved);
                finish_pass(
                    state,
                    pass_id,
                    result.diagnostics,
                    t.elapsed(),
                    &mut on_pass_complete,
                )?;
            }
            PassId::Expand => {
                let Some(resolved) = &state.resolved else {
                    return missing(state, pass_id);
                };
                let root = match select_root(&state.program, options.root.as_deref()) {
                    Ok(root) => root,
                    Err(diag) => {
                        return finish_pass(
                            state,
                            pass_id,
                            vec![diag],
                            t.elapsed(),
                            &mut on_pass_complete,
                        )
                    }
                };
                let mut diags = unreachable_definitions(resolved, root);
                let result = crate::expand::expand(
                    resolved,
                    root,
                    options.generators.as_deref(),
                    &options.expand,
                );
                diags.extend(result.diagnostics);
                state.root = Some(root);
                state.graph = result.graph;
                finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::Check => {
                let Some(graph) = &state.graph else {
                    return missing(state, pass_id);
                };
                let diags = crate::check::check(graph, options.expand.deadline)
                    .err()
                    .unwrap_or_default();
                state.checked = diags.is_empty();
                finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::Infer => {
                let Some(graph) = &state.graph else {
                    return missing(state, pass_id);
                };
                let diags = match crate::signature::infer(graph, options.expand.deadline) {
                    Ok(signature) => {
                        state.signature = Some(signature);
                        Vec::new()
                    }
                    Err(diags) => diags,
                };
                finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
            }
        }
    }
    Ok(())
}

// ── One-call compilation ───────────────────────────────────────────────────

/// A finished, checked compilation.
#[derive(Debug)]
pub struct Compilation {
    pub program: Program,
    pub root: String,
    pub graph: PortGraph,
    /// Present when typing was requested.
    pub signature: Option<Signature>,
    pub fingerprint: Fingerprint,
    /// Warning-level diagnostics, located.
    pub warnings: Vec<Diagnostic>,
}

impl Compilation {
    pub fn dot(&self) -> String {
        crate::dot::to_dot(&self.graph, self.signature.as_ref())
    }

    pub fn typing(&self) -> String {
        self.signature
            .as_ref()
            .map(Signature::render)
            .unwrap_or_default()
    }
}

/// Compilation failed; `diagnostics` holds every located diagnostic.
#[derive(Debug, Error)]
#[error("{}", summarize(.diagnostics))]
pub struct CompileError {
    pub diagnostics: Vec<Diagnostic>,
    /// `None` when parsing failed.
    pub failing_pass: Option<PassId>,
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    let errors: Vec<&Diagnostic> = diagnostics.iter().filter(|d| d.is_error()).collect();
    match errors.as_slice() {
        [] => "compilation failed".to_string(),
        [only] => only.message.clone(),
        [first, rest @ ..] => format!("{} (and {} more error(s))", first.message, rest.len()),
    }
}

impl CompileError {
    /// First error-level diagnostic.
    pub fn primary(&self) -> Option<&Diagnostic> {
        self.diagnostics.iter().find(|d| d.is_error())
    }

    pub fn category(&self) -> ErrorCategory {
        self.primary()
            .map_or(ErrorCategory::Semantic, |d| d.kind.category())
    }
}

pub fn compile(source: &str, options: &CompileOptions) -> Result<Compilation, CompileError> {
    compile_with(source, options, |_, _, _| {})
}

/// `compile` with a per-pass callback (used for `--verbose` timing).
pub fn compile_with(
    source: &str,
    options: &CompileOptions,
    on_pass_complete: impl FnMut(PassId, &[Diagnostic], Duration),
) -> Result<Compilation, CompileError> {
    let parsed = crate::parser::parse(source);
    let program = match parsed.program {
        Some(program) if !has_errors(&parsed.diagnostics) => program,
        _ => {
            let mut diagnostics = parsed.diagnostics;
            locate_all(&mut diagnostics, source);
            return Err(CompileError {
                diagnostics,
                failing_pass: None,
            });
        }
    };

    let terminal = if options.typing {
        PassId::Infer
    } else {
        PassId::Check
    };
    let mut state = CompilationState::new(program);
    let outcome = run_pipeline(&mut state, terminal, options, on_pass_complete);
    locate_all(&mut state.diagnostics, source);
    if let Err(err) = outcome {
        return Err(CompileError {
            diagnostics: state.diagnostics,
            failing_pass: Some(err.failing_pass),
        });
    }

    let (Some(registry), Some(root), Some(graph)) = (state.registry, state.root, state.graph)
    else {
        return Err(CompileError {
            diagnostics: state.diagnostics,
            failing_pass: Some(terminal),
        });
    };
    let root = state.program.definitions[root].name.name.clone();
    Ok(Compilation {
        root,
        graph,
        signature: state.signature,
        fingerprint: fingerprint(source, &registry),
        warnings: state.diagnostics,
        program: state.program,
    })
}

// ── Tests ──────────────────────────────────────────────────────────────────
