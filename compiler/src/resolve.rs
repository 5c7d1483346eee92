// resolve.rs — Link resolution for DFL definitions
//
// Walks every definition of the unit and resolves its body: each `use` to a
// primitive or a registered definition (checking the use-site port list and
// generator arguments against the declaration), and each link edge to port
// indices on the boundary or on an instance. Runs before any expansion, so
// a malformed definition is rejected even if expansion would never reach it.
//
// Preconditions: `program` is a parsed AST; `registry` was built from it.
// Postconditions: every `ResolvedLink` refers to an existing use and a
//   declared port in the right direction; every target end is unique.
// Failure modes: unknown names, arity mismatches, unbound ports, wrong
//   direction, fan-in and duplicate instance/port names produce
//   `Diagnostic` entries. Resolution continues past errors.
// Side effects: none.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::ast::*;
use crate::diag::{Diagnostic, ErrorKind};
use crate::primitive::{self, Primitive, PrimitiveArg};
use crate::registry::Registry;

// ── Public types ────────────────────────────────────────────────────────────

/// Result of link resolution.
#[derive(Debug)]
pub struct ResolveResult {
    pub resolved: ResolvedProgram,
    pub diagnostics: Vec<Diagnostic>,
}

/// Resolved definitions, indexed like `Program::definitions`.
#[derive(Debug, Clone)]
pub struct ResolvedProgram {
    pub defs: Vec<ResolvedDef>,
}

impl ResolvedProgram {
    pub fn def(&self, index: usize) -> &ResolvedDef {
        &self.defs[index]
    }

    /// First definition with the given name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.defs.iter().position(|d| d.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedDef {
    pub name: String,
    pub span: Span,
    pub universal: Vec<String>,
    pub existential: Vec<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub uses: Vec<ResolvedUse>,
    pub links: Vec<ResolvedLink>,
}

impl ResolvedDef {
    /// Generator parameters in binding order: universal, then existential.
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.universal
            .iter()
            .chain(self.existential.iter())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedUse {
    pub instance: String,
    pub target: UseTarget,
    /// Use-site (local) port names, positionally matched to the target.
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub span: Span,
}

/// What a use instantiates. Symbols are still written in the enclosing
/// definition's scope; expansion applies the binding.
#[derive(Debug, Clone, PartialEq)]
pub enum UseTarget {
    Primitive(Primitive),
    Definition {
        index: usize,
        /// One symbol per target parameter, universal then existential.
        args: Vec<String>,
        /// The use wrote no existential arguments, so each expansion of it
        /// introduces fresh symbols.
        fresh: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkEnd {
    /// A boundary port: an input when used as a source, an output as a target.
    Boundary(usize),
    Instance { use_index: usize, port: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLink {
    pub source: LinkEnd,
    pub target: LinkEnd,
    pub span: Span,
}

// ── Entry point ─────────────────────────────────────────────────────────────

pub fn resolve(program: &Program, registry: &Registry) -> ResolveResult {
    let mut diagnostics = Vec::new();
    let defs = program
        .definitions
        .iter()
        .map(|def| {
            let mut r = DefResolver {
                program,
                registry,
                diagnostics: &mut diagnostics,
            };
            r.resolve_def(def)
        })
        .collect();
    ResolveResult {
        resolved: ResolvedProgram { defs },
        diagnostics,
    }
}

// ── Per-definition resolver ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Source,
    Target,
}

struct DefResolver<'a> {
    program: &'a Program,
    registry: &'a Registry,
    diagnostics: &'a mut Vec<Diagnostic>,
}

impl<'a> DefResolver<'a> {
    fn error(&mut self, kind: ErrorKind, span: Span, message: String) -> &mut Diagnostic {
        self.diagnostics.push(Diagnostic::error(kind, span, message));
        let last = self.diagnostics.len() - 1;
        &mut self.diagnostics[last]
    }

    fn resolve_def(&mut self, def: &Definition) -> ResolvedDef {
        self.check_unique_ports(&def.ports, &format!("definition `{}`", def.name.name));

        // instance name → index into `uses` (None when the use failed to resolve)
        let mut instances: HashMap<&str, Option<usize>> = HashMap::new();
        let mut first_spans: HashMap<&str, Span> = HashMap::new();
        let mut uses = Vec::new();

        for u in &def.uses {
            if let Some(&first) = first_spans.get(u.instance.name.as_str()) {
                self.error(
                    ErrorKind::DuplicateInstance,
                    u.instance.span,
                    format!(
                        "instance `{}` is declared twice in `{}`",
                        u.instance.name, def.name.name
                    ),
                )
                .related_spans
                .push(crate::diag::RelatedSpan {
                    span: first,
                    label: "first declared here".to_string(),
                });
                continue;
            }
            first_spans.insert(&u.instance.name, u.instance.span);
            self.check_unique_ports(&u.ports, &format!("instance `{}`", u.instance.name));

            let slot = self.resolve_use(u).map(|resolved| {
                uses.push(resolved);
                uses.len() - 1
            });
            instances.insert(&u.instance.name, slot);
        }

        let mut links = Vec::new();
        let mut targets: HashMap<LinkEnd, Span> = HashMap::new();
        for link in &def.links {
            let source = self.resolve_end(def, &uses, &instances, &link.source, Direction::Source);
            let target = self.resolve_end(def, &uses, &instances, &link.target, Direction::Target);
            let (Some(source), Some(target)) = (source, target) else {
                continue;
            };
            match targets.entry(target) {
                Entry::Occupied(first) => {
                    let first = *first.get();
                    let diag = Diagnostic::error(
                        ErrorKind::IllegalFanIn,
                        link.target.span,
                        format!("port `{}` already has an incoming edge", link.target),
                    )
                    .with_related(first, "first edge here")
                    .with_hint("merge the flows explicitly with `U{k}` or `><`");
                    self.diagnostics.push(diag);
                }
                Entry::Vacant(slot) => {
                    slot.insert(link.target.span);
                    links.push(ResolvedLink {
                        source,
                        target,
                        span: link.span,
                    });
                }
            }
        }

        ResolvedDef {
            name: def.name.name.clone(),
            span: def.name.span,
            universal: def.generics.universal.iter().map(|i| i.name.clone()).collect(),
            existential: def.generics.existential.iter().map(|i| i.name.clone()).collect(),
            inputs: def.ports.inputs.iter().map(|i| i.name.clone()).collect(),
            outputs: def.ports.outputs.iter().map(|i| i.name.clone()).collect(),
            uses,
            links,
        }
    }

    fn check_unique_ports(&mut self, ports: &PortList, owner: &str) {
        for list in [&ports.inputs, &ports.outputs] {
            for (i, port) in list.iter().enumerate() {
                if list[..i].iter().any(|p| p.name == port.name) {
                    self.error(
                        ErrorKind::PortMismatch,
                        port.span,
                        format!("port `{}` is declared twice on {}", port.name, owner),
                    );
                }
            }
        }
    }

    // ── Uses ──

    fn resolve_use(&mut self, u: &Use) -> Option<ResolvedUse> {
        let looked_up = match &u.target {
            BoxRef::Definition { name, args } => {
                let entry = match self.registry.resolve(&name.name) {
                    Ok(entry) => entry.clone(),
                    Err(err) => {
                        self.error(err.kind(), name.span, err.to_string());
                        return None;
                    }
                };
                let program = self.program;
                let callee = &program.definitions[entry.index];
                let (args, fresh) = self.bind_args(callee, args.as_ref())?;
                let target = UseTarget::Definition {
                    index: entry.index,
                    args,
                    fresh,
                };
                return self.check_use_ports(u, target, entry.inputs, entry.outputs);
            }
            BoxRef::Add(s) => primitive::lookup("+", PrimitiveArg::Symbol(&s.name)),
            BoxRef::Remove(s) => primitive::lookup("-", PrimitiveArg::Symbol(&s.name)),
            BoxRef::Spawn(s) => primitive::lookup("*", PrimitiveArg::Symbol(&s.name)),
            BoxRef::Indexed { tag, arg, .. } => {
                primitive::lookup(&tag.name, PrimitiveArg::Count(*arg))
            }
            BoxRef::Join(_) => primitive::lookup("><", PrimitiveArg::None),
            BoxRef::Split(_) => primitive::lookup("<>", PrimitiveArg::None),
        };
        match looked_up {
            Ok(prim) => {
                let sig = prim.signature();
                self.check_use_ports(u, UseTarget::Primitive(prim), sig.inputs, sig.outputs)
            }
            Err(err) => {
                self.error(err.kind(), u.target.span(), err.to_string());
                None
            }
        }
    }

    fn check_use_ports(
        &mut self,
        u: &Use,
        target: UseTarget,
        expected_in: usize,
        expected_out: usize,
    ) -> Option<ResolvedUse> {
        let mut ok = true;
        for (what, declared, expected) in [
            ("inputs", &u.ports.inputs, expected_in),
            ("outputs", &u.ports.outputs, expected_out),
        ] {
            if declared.len() != expected {
                ok = false;
                self.error(
                    ErrorKind::ArityMismatch,
                    u.ports.span,
                    format!(
                        "instance `{}` of `{}` lists {} {}, expected {}",
                        u.instance.name,
                        u.target,
                        declared.len(),
                        what,
                        expected
                    ),
                );
            }
        }
        if !ok {
            return None;
        }

        Some(ResolvedUse {
            instance: u.instance.name.clone(),
            target,
            inputs: u.ports.inputs.iter().map(|i| i.name.clone()).collect(),
            outputs: u.ports.outputs.iter().map(|i| i.name.clone()).collect(),
            span: u.span,
        })
    }

    /// Generator arguments for a definition use, in the callee's parameter
    /// order, and whether the existentials were left to the callee. An
    /// omitted list (or omitted existential part) passes the callee's own
    /// parameter names through.
    fn bind_args(
        &mut self,
        callee: &Definition,
        args: Option<&Generics>,
    ) -> Option<(Vec<String>, bool)> {
        let params = &callee.generics;
        let names = |idents: &[Ident]| idents.iter().map(|i| i.name.clone()).collect::<Vec<_>>();
        let Some(args) = args else {
            let mut all = names(&params.universal);
            all.extend(names(&params.existential));
            return Some((all, true));
        };

        let mut ok = true;
        if args.universal.len() != params.universal.len() {
            ok = false;
            self.error(
                ErrorKind::ArityMismatch,
                args.span,
                format!(
                    "`{}` takes {} universal generator(s), {} given",
                    callee.name.name,
                    params.universal.len(),
                    args.universal.len()
                ),
            );
        }
        if !args.existential.is_empty() && args.existential.len() != params.existential.len() {
            ok = false;
            self.error(
                ErrorKind::ArityMismatch,
                args.span,
                format!(
                    "`{}` takes {} existential generator(s), {} given",
                    callee.name.name,
                    params.existential.len(),
                    args.existential.len()
                ),
            );
        }
        if !ok {
            return None;
        }

        let mut all = names(&args.universal);
        let fresh = args.existential.is_empty();
        if fresh {
            all.extend(names(&params.existential));
        } else {
            all.extend(names(&args.existential));
        }
        Some((all, fresh))
    }

    // ── Link ends ──

    fn resolve_end(
        &mut self,
        def: &Definition,
        uses: &[ResolvedUse],
        instances: &HashMap<&str, Option<usize>>,
        end: &PortRef,
        dir: Direction,
    ) -> Option<LinkEnd> {
        let port = end.port.name.as_str();
        let Some(instance) = &end.instance else {
            let (wanted, other, wanted_what, other_what) = match dir {
                Direction::Source => (&def.ports.inputs, &def.ports.outputs, "input", "output"),
                Direction::Target => (&def.ports.outputs, &def.ports.inputs, "output", "input"),
            };
            if let Some(i) = wanted.iter().position(|p| p.name == port) {
                return Some(LinkEnd::Boundary(i));
            }
            if other.iter().any(|p| p.name == port) {
                self.error(
                    ErrorKind::PortMismatch,
                    end.span,
                    format!(
                        "boundary {} `{}` of `{}` cannot be used as an edge {}",
                        other_what,
                        port,
                        def.name.name,
                        direction_word(dir)
                    ),
                );
            } else {
                self.error(
                    ErrorKind::UnboundPort,
                    end.span,
                    format!(
                        "`{}` has no boundary {} `{}`",
                        def.name.name, wanted_what, port
                    ),
                );
            }
            return None;
        };

        let slot = match instances.get(instance.name.as_str()) {
            Some(slot) => *slot,
            None => {
                self.error(
                    ErrorKind::UnboundPort,
                    instance.span,
                    format!(
                        "no instance `{}` in `{}`",
                        instance.name, def.name.name
                    ),
                )
                .hint = Some(format!("declare it with `use ... as {}`", instance.name));
                return None;
            }
        };
        // The use itself failed to resolve and was already reported.
        let use_index = slot?;
        let u = &uses[use_index];
        let (wanted, other, other_what) = match dir {
            Direction::Source => (&u.outputs, &u.inputs, "input"),
            Direction::Target => (&u.inputs, &u.outputs, "output"),
        };
        if let Some(p) = wanted.iter().position(|p| p == port) {
            return Some(LinkEnd::Instance {
                use_index,
                port: p,
            });
        }
        if other.iter().any(|p| p == port) {
            self.error(
                ErrorKind::PortMismatch,
                end.span,
                format!(
                    "`{}` is an {} of `{}` and cannot be used as an edge {}",
                    end,
                    other_what,
                    instance.name,
                    direction_word(dir)
                ),
            );
        } else {
            self.error(
                ErrorKind::UnboundPort,
                end.span,
                format!("instance `{}` has no port `{}`", instance.name, port),
            );
        }
        None
    }
}

fn direction_word(dir: Direction) -> &'static str {
    match dir {
        Direction::Source => "source",
        Direction::Target => "target",
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn resolve_src(source: &str) -> ResolveResult {
        let parsed = parse(source);
        assert!(parsed.diagnostics.is_empty(), "{:#?}", parsed.diagnostics);
        let program = parsed.program.expect("program");
        let (registry, reg_diags) = Registry::build(&program);
        assert!(reg_diags.is_empty(), "{reg_diags:#?}");
        resolve(&program, &registry)
    }

    fn resolve_ok(source: &str) -> ResolvedProgram {
        let result = resolve_src(source);
        assert!(
            result.diagnostics.is_empty(),
            "unexpected diagnostics: {:#?}",
            result.diagnostics
        );
        result.resolved
    }

    fn kinds(source: &str) -> Vec<ErrorKind> {
        resolve_src(source)
            .diagnostics
            .iter()
            .map(|d| d.kind)
            .collect()
    }

    #[test]
    fn resolves_series_of_primitives() {
        let prog = resolve_ok(
            "def main=[X|Y] use -a[X|Y] as R use +a[X|Y] as A link X>->R.X, R.Y>->A.X, A.Y>->Y",
        );
        let main = prog.def(0);
        assert_eq!(main.uses.len(), 2);
        assert_eq!(
            main.uses[0].target,
            UseTarget::Primitive(Primitive::Remove("a".into()))
        );
        assert_eq!(
            main.links,
            vec![
                ResolvedLink {
                    source: LinkEnd::Boundary(0),
                    target: LinkEnd::Instance { use_index: 0, port: 0 },
                    span: main.links[0].span,
                },
                ResolvedLink {
                    source: LinkEnd::Instance { use_index: 0, port: 0 },
                    target: LinkEnd::Instance { use_index: 1, port: 0 },
                    span: main.links[1].span,
                },
                ResolvedLink {
                    source: LinkEnd::Instance { use_index: 1, port: 0 },
                    target: LinkEnd::Boundary(0),
                    span: main.links[2].span,
                },
            ]
        );
    }

    #[test]
    fn use_site_aliases_match_positionally() {
        let prog = resolve_ok(
            "def f = [X | Y] use >< [A, B | C] as J link X >-> J.B, J.C >-> Y",
        );
        let f = prog.def(0);
        assert_eq!(
            f.links[0].target,
            LinkEnd::Instance { use_index: 0, port: 1 }
        );
    }

    #[test]
    fn definition_use_binds_arguments() {
        let prog = resolve_ok(
            "def f = <a |> [X | Y] use f <a |> [X | Y] as Recursive link X >-> Recursive.X, Recursive.Y >-> Y
             def main = [X | Y] use f <c |> [X | Y] as F link X >-> F.X, F.Y >-> Y",
        );
        assert_eq!(
            prog.def(1).uses[0].target,
            UseTarget::Definition {
                index: 0,
                args: vec!["c".into()],
                fresh: true,
            }
        );
    }

    #[test]
    fn omitted_arguments_pass_parameter_names() {
        let prog = resolve_ok(
            "def g = <a | e> [X | Y] link X >-> Y
             def main = [X | Y] use g [X | Y] as G link X >-> G.X, G.Y >-> Y",
        );
        assert_eq!(
            prog.def(1).uses[0].target,
            UseTarget::Definition {
                index: 0,
                args: vec!["a".into(), "e".into()],
                fresh: true,
            }
        );
    }

    #[test]
    fn omitted_existential_arguments_default() {
        let prog = resolve_ok(
            "def g = <a | e> [X | Y] link X >-> Y
             def main = [X | Y] use g <b |> [X | Y] as G link X >-> G.X, G.Y >-> Y",
        );
        assert_eq!(
            prog.def(1).uses[0].target,
            UseTarget::Definition {
                index: 0,
                args: vec!["b".into(), "e".into()],
                fresh: true,
            }
        );
    }

    #[test]
    fn written_existential_arguments_are_kept() {
        let prog = resolve_ok(
            "def g = <a | e> [X | Y] link X >-> Y
             def main = <| f> [X | Y] use g <b | f> [X | Y] as G link X >-> G.X, G.Y >-> Y",
        );
        assert_eq!(
            prog.def(1).uses[0].target,
            UseTarget::Definition {
                index: 0,
                args: vec!["b".into(), "f".into()],
                fresh: false,
            }
        );
    }

    #[test]
    fn fan_out_is_accepted() {
        let prog = resolve_ok(
            "def f = [X | Y] use U{2} [X0, X1 | Y] as U link X >-> U.X0, X >-> U.X1, U.Y >-> Y",
        );
        assert_eq!(prog.def(0).links.len(), 3);
    }

    // ── Errors ──

    #[test]
    fn fan_in_is_rejected() {
        let result = resolve_src(
            "def f = [X0, X1 | Y] use +a [X | Y] as A link X0 >-> A.X, X1 >-> A.X, A.Y >-> Y",
        );
        assert_eq!(result.diagnostics.len(), 1);
        let d = &result.diagnostics[0];
        assert_eq!(d.kind, ErrorKind::IllegalFanIn);
        assert_eq!(d.related_spans.len(), 1);
    }

    #[test]
    fn wrong_port_list_length() {
        assert_eq!(
            kinds("def f = [X | Y] use +a [X0, X1 | Y] as A link X >-> A.X0, A.Y >-> Y"),
            vec![ErrorKind::ArityMismatch]
        );
    }

    #[test]
    fn wrong_definition_port_list_length() {
        assert_eq!(
            kinds(
                "def g = [X | Y] link X >-> Y
                 def f = [X | Y] use g [X | Y0, Y1] as G link X >-> G.X, G.Y0 >-> Y"
            ),
            vec![ErrorKind::ArityMismatch]
        );
    }

    #[test]
    fn wrong_generator_argument_count() {
        assert_eq!(
            kinds(
                "def g = <a |> [X | Y] link X >-> Y
                 def f = [X | Y] use g <a, b |> [X | Y] as G link X >-> G.X, G.Y >-> Y"
            ),
            vec![ErrorKind::ArityMismatch]
        );
    }

    #[test]
    fn unknown_definition() {
        assert_eq!(
            kinds("def f = [X | Y] use g [X | Y] as G link X >-> G.X, G.Y >-> Y"),
            vec![ErrorKind::UnknownDefinition]
        );
    }

    #[test]
    fn unknown_primitive_tag() {
        assert_eq!(
            kinds("def f = [X | Y] use V{2} [X0, X1 | Y] as V link X >-> V.X0"),
            vec![ErrorKind::UnknownPrimitive]
        );
    }

    #[test]
    fn union_of_zero_inputs() {
        assert_eq!(
            kinds("def f = [X | Y] use U{0} [ | Y] as U link U.Y >-> Y"),
            vec![ErrorKind::ArityMismatch]
        );
    }

    #[test]
    fn undeclared_instance_port() {
        assert_eq!(
            kinds("def f = [X | Y] use +a [X | Y] as A link X >-> A.Z, A.Y >-> Y"),
            vec![ErrorKind::UnboundPort]
        );
    }

    #[test]
    fn undeclared_instance() {
        assert_eq!(
            kinds("def f = [X | Y] link X >-> B.X"),
            vec![ErrorKind::UnboundPort]
        );
    }

    #[test]
    fn undeclared_boundary_port() {
        assert_eq!(
            kinds("def f = [X | Y] link Z >-> Y"),
            vec![ErrorKind::UnboundPort]
        );
    }

    #[test]
    fn output_used_as_source() {
        assert_eq!(
            kinds("def f = [X | Y] use +a [X | Y] as A link A.X >-> Y, X >-> A.X"),
            vec![ErrorKind::PortMismatch]
        );
    }

    #[test]
    fn boundary_output_used_as_source() {
        assert_eq!(
            kinds("def f = [X | Y] link Y >-> Y"),
            vec![ErrorKind::PortMismatch]
        );
    }

    #[test]
    fn duplicate_instance() {
        assert_eq!(
            kinds("def f = [X | Y] use +a [X | Y] as A use +b [X | Y] as A"),
            vec![ErrorKind::DuplicateInstance]
        );
    }

    #[test]
    fn duplicate_port_name() {
        assert_eq!(
            kinds("def f = [X, X | Y] link X >-> Y"),
            vec![ErrorKind::PortMismatch]
        );
    }

    #[test]
    fn links_to_failed_use_are_not_reported_again() {
        // Only the arity error; the links to `A` are skipped silently.
        assert_eq!(
            kinds("def f = [X | Y] use +a [X, Z | Y] as A link X >-> A.X, A.Y >-> Y"),
            vec![ErrorKind::ArityMismatch]
        );
    }

    #[test]
    fn all_definitions_are_checked() {
        // `unused` is never referenced from `main` but is still resolved.
        let result = resolve_src(
            "def unused = [X | Y] link X >-> Q
             def main = [X | Y] link X >-> Y",
        );
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].kind, ErrorKind::UnboundPort);
    }
}
