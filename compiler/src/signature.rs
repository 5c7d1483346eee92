// signature.rs — Generator-set inference over a checked port-graph
//
// Every wire (one source port and all of its targets) carries two sets of
// generator symbols: those that must flow through it (`includes`) and those
// that must not (`excludes`). Primitive rules add facts locally and
// propagate them forwards and backwards. A worklist re-applies only the
// sites next to a wire whose sets grew, until the fixpoint. The sets only
// grow and are bounded by the symbols of the program, so the iteration
// terminates.
//
// Preconditions: `graph` passed `check::check` (every input has one source).
// Postconditions: the returned signature describes the root boundary wires.
// Failure modes: a wire that must both carry and not carry a symbol, or a
//   merge whose required symbol no input can supply → `Type` diagnostics;
//   a passed deadline → `ResourceExceeded`.
// Side effects: none.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::time::Instant;

use serde::Serialize;

use crate::diag::{Diagnostic, ErrorKind};
use crate::expand::past;
use crate::port_graph::{Endpoint, NodeKind, PortGraph, Vertex};
use crate::primitive::{display_symbol, Primitive};

/// Site applications between deadline checks.
const DEADLINE_STRIDE: usize = 256;

// ── Output types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortType {
    pub includes: BTreeSet<String>,
    pub excludes: BTreeSet<String>,
}

impl PortType {
    fn conflicts(&self) -> impl Iterator<Item = &String> {
        self.includes.intersection(&self.excludes)
    }
}

/// `{a, !b}`: includes first, then excludes marked with `!`. Fresh
/// symbols show under their written name.
impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = |set: &BTreeSet<String>| -> BTreeSet<String> {
            set.iter().map(|s| display_symbol(s).to_string()).collect()
        };
        let items: Vec<String> = shown(&self.includes)
            .into_iter()
            .chain(shown(&self.excludes).into_iter().map(|s| format!("!{s}")))
            .collect();
        write!(f, "{{{}}}", items.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortSignature {
    pub name: String,
    #[serde(flatten)]
    pub ty: PortType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Signature {
    pub inputs: Vec<PortSignature>,
    pub outputs: Vec<PortSignature>,
}

impl Signature {
    /// Human-readable form: `[X: {a} | Y: {a}]`.
    pub fn render(&self) -> String {
        let side = |ports: &[PortSignature]| {
            ports
                .iter()
                .map(|p| format!("{}: {}", p.name, p.ty))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!("[{} | {}]", side(&self.inputs), side(&self.outputs))
    }

    pub fn input(&self, name: &str) -> Option<&PortType> {
        self.inputs.iter().find(|p| p.name == name).map(|p| &p.ty)
    }

    pub fn output(&self, name: &str) -> Option<&PortType> {
        self.outputs.iter().find(|p| p.name == name).map(|p| &p.ty)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

// ── Solver ──────────────────────────────────────────────────────────────────

type Wire = usize;

/// A node with its input and output wires resolved.
struct Site {
    node: usize,
    inputs: Vec<Wire>,
    outputs: Vec<Wire>,
}

impl Site {
    fn wires(&self) -> impl Iterator<Item = Wire> + '_ {
        self.inputs.iter().chain(&self.outputs).copied()
    }
}

struct Solver {
    facts: Vec<PortType>,
}

impl Solver {
    fn include(&mut self, w: Wire, s: &str) -> bool {
        !self.facts[w].includes.contains(s) && self.facts[w].includes.insert(s.to_string())
    }

    fn exclude(&mut self, w: Wire, s: &str) -> bool {
        !self.facts[w].excludes.contains(s) && self.facts[w].excludes.insert(s.to_string())
    }

    fn copy_includes(&mut self, from: Wire, to: Wire, except: Option<&str>) -> bool {
        let items: Vec<String> = self.facts[from]
            .includes
            .iter()
            .filter(|s| Some(s.as_str()) != except)
            .cloned()
            .collect();
        let mut changed = false;
        for s in items {
            changed |= self.facts[to].includes.insert(s);
        }
        changed
    }

    fn copy_excludes(&mut self, from: Wire, to: Wire, except: Option<&str>) -> bool {
        let items: Vec<String> = self.facts[from]
            .excludes
            .iter()
            .filter(|s| Some(s.as_str()) != except)
            .cloned()
            .collect();
        let mut changed = false;
        for s in items {
            changed |= self.facts[to].excludes.insert(s);
        }
        changed
    }

    /// Facts pass through a 1→1 generator box in both directions, except
    /// for the box's own symbol.
    fn pass_through(&mut self, w: Wire, v: Wire, sym: &str) -> bool {
        let mut changed = false;
        changed |= self.copy_includes(w, v, Some(sym));
        changed |= self.copy_excludes(w, v, Some(sym));
        changed |= self.copy_includes(v, w, Some(sym));
        changed |= self.copy_excludes(v, w, Some(sym));
        changed
    }

    fn apply(&mut self, prim: &Primitive, site: &Site) -> bool {
        let mut changed = false;
        match prim {
            Primitive::Add(a) => {
                let (w, v) = (site.inputs[0], site.outputs[0]);
                changed |= self.include(v, a);
                changed |= self.exclude(w, a);
                changed |= self.pass_through(w, v, a);
            }
            Primitive::Remove(a) => {
                let (w, v) = (site.inputs[0], site.outputs[0]);
                changed |= self.include(w, a);
                changed |= self.exclude(v, a);
                changed |= self.pass_through(w, v, a);
            }
            Primitive::Spawn(a) => {
                let (w, v) = (site.inputs[0], site.outputs[0]);
                changed |= self.include(v, a);
                changed |= self.pass_through(w, v, a);
            }
            Primitive::Union(_) | Primitive::Join => {
                let v = site.outputs[0];
                for &w in &site.inputs {
                    changed |= self.copy_includes(w, v, None);
                    changed |= self.copy_excludes(v, w, None);
                }
                let common: Vec<String> = match site.inputs.split_first() {
                    Some((&first, rest)) => self.facts[first]
                        .excludes
                        .iter()
                        .filter(|s| rest.iter().all(|&w| self.facts[w].excludes.contains(*s)))
                        .cloned()
                        .collect(),
                    None => Vec::new(),
                };
                for s in common {
                    changed |= self.exclude(v, &s);
                }
                // A required symbol that exactly one input can still supply
                // must come from that input.
                let required: Vec<String> = self.facts[v].includes.iter().cloned().collect();
                for s in required {
                    if site.inputs.iter().any(|&w| self.facts[w].includes.contains(&s)) {
                        continue;
                    }
                    let mut candidates = site
                        .inputs
                        .iter()
                        .filter(|&&w| !self.facts[w].excludes.contains(&s));
                    if let (Some(&only), None) = (candidates.next(), candidates.next()) {
                        changed |= self.include(only, &s);
                    }
                }
            }
            Primitive::Split => {
                let w = site.inputs[0];
                for &v in &site.outputs {
                    changed |= self.copy_includes(w, v, None);
                    changed |= self.copy_excludes(w, v, None);
                    changed |= self.copy_includes(v, w, None);
                    changed |= self.copy_excludes(v, w, None);
                }
            }
        }
        changed
    }

    fn size(&self, w: Wire) -> (usize, usize) {
        (self.facts[w].includes.len(), self.facts[w].excludes.len())
    }

    /// Symbols the merge output requires that every input excludes.
    fn unsupplied(&self, site: &Site) -> Vec<String> {
        let v = site.outputs[0];
        self.facts[v]
            .includes
            .iter()
            .filter(|s| {
                site.inputs.iter().all(|&w| {
                    !self.facts[w].includes.contains(*s) && self.facts[w].excludes.contains(*s)
                })
            })
            .cloned()
            .collect()
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

pub fn infer(graph: &PortGraph, deadline: Option<Instant>) -> Result<Signature, Vec<Diagnostic>> {
    // One wire per source endpoint: root inputs, then node outputs.
    let mut wire_of: HashMap<Endpoint, Wire> = HashMap::new();
    let mut sources: Vec<Endpoint> = Vec::new();
    for i in 0..graph.inputs().len() {
        wire_of.insert(Endpoint::input(i), sources.len());
        sources.push(Endpoint::input(i));
    }
    for node in graph.nodes() {
        for j in 0..node.outputs.len() {
            let ep = Endpoint::node(node.id, j);
            wire_of.insert(ep, sources.len());
            sources.push(ep);
        }
    }
    let feeding = |target: Endpoint| -> Option<Wire> {
        graph
            .predecessors(target)
            .next()
            .and_then(|src| wire_of.get(&src).copied())
    };

    let mut sites = Vec::new();
    for (index, node) in graph.nodes().iter().enumerate() {
        if node.is_truncated() {
            continue;
        }
        let inputs: Option<Vec<Wire>> = (0..node.inputs.len())
            .map(|i| feeding(Endpoint::node(node.id, i)))
            .collect();
        let Some(inputs) = inputs else { continue };
        let outputs = (0..node.outputs.len())
            .map(|j| wire_of[&Endpoint::node(node.id, j)])
            .collect();
        sites.push(Site {
            node: index,
            inputs,
            outputs,
        });
    }

    let mut touching: Vec<Vec<usize>> = vec![Vec::new(); sources.len()];
    for (k, site) in sites.iter().enumerate() {
        for w in site.wires() {
            touching[w].push(k);
        }
    }

    let mut solver = Solver {
        facts: vec![PortType::default(); sources.len()],
    };
    let mut queued = vec![true; sites.len()];
    let mut work: VecDeque<usize> = (0..sites.len()).collect();
    let mut steps = 0usize;
    while let Some(k) = work.pop_front() {
        if steps % DEADLINE_STRIDE == 0 && past(deadline) {
            return Err(vec![Diagnostic::error(
                ErrorKind::ResourceExceeded,
                graph.root_span(),
                "type inference did not finish before the compile deadline",
            )
            .with_hint("lower the expansion depth")]);
        }
        steps += 1;
        queued[k] = false;
        let site = &sites[k];
        let NodeKind::Primitive(prim) = &graph.nodes()[site.node].kind else {
            continue;
        };
        let before: Vec<(usize, usize)> = site.wires().map(|w| solver.size(w)).collect();
        if !solver.apply(prim, site) {
            continue;
        }
        for (w, size) in site.wires().zip(before) {
            if solver.size(w) == size {
                continue;
            }
            for &other in &touching[w] {
                if !queued[other] {
                    queued[other] = true;
                    work.push_back(other);
                }
            }
        }
    }

    // ── Contradictions ──

    let mut diagnostics = Vec::new();
    for site in &sites {
        let node = &graph.nodes()[site.node];
        if let NodeKind::Primitive(Primitive::Union(_) | Primitive::Join) = node.kind {
            for s in solver.unsupplied(site) {
                diagnostics.push(
                    Diagnostic::error(
                        ErrorKind::Type,
                        node.provenance.span,
                        format!(
                            "`{}` ({}) must produce `{}` but every input excludes it",
                            node.provenance.path_string(),
                            node.kind,
                            display_symbol(&s)
                        ),
                    )
                    .with_hint(format!("node {} was produced by `{}`", node.id, node.provenance.definition)),
                );
            }
        }
    }
    for (w, source) in sources.iter().enumerate() {
        let conflicts: Vec<&String> = solver.facts[w].conflicts().collect();
        if conflicts.is_empty() {
            continue;
        }
        let symbols = conflicts
            .iter()
            .map(|s| format!("`{}`", display_symbol(s)))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>()
            .join(", ");
        let (what, span) = match source.vertex {
            Vertex::Node(id) => {
                let node = &graph.nodes()[id.0 as usize];
                (
                    format!(
                        "output `{}` of `{}` ({})",
                        node.outputs[source.port],
                        node.provenance.path_string(),
                        node.kind
                    ),
                    node.provenance.span,
                )
            }
            Vertex::Inputs | Vertex::Outputs => (
                format!(
                    "input `{}` of `{}`",
                    graph.inputs()[source.port],
                    graph.root()
                ),
                graph.root_span(),
            ),
        };
        diagnostics.push(Diagnostic::error(
            ErrorKind::Type,
            span,
            format!("{what} must both carry and not carry {symbols}"),
        ));
    }
    if !diagnostics.is_empty() {
        return Err(diagnostics);
    }

    let port = |name: &String, wire: Option<Wire>| PortSignature {
        name: name.clone(),
        ty: wire.map(|w| solver.facts[w].clone()).unwrap_or_default(),
    };
    let inputs = graph
        .inputs()
        .iter()
        .enumerate()
        .map(|(i, name)| port(name, wire_of.get(&Endpoint::input(i)).copied()))
        .collect();
    let outputs = graph
        .outputs()
        .iter()
        .enumerate()
        .map(|(j, name)| port(name, feeding(Endpoint::output(j))))
        .collect();
    Ok(Signature { inputs, outputs })
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::check;
    use crate::expand::{expand, ExpandOptions};
    use crate::parser::parse;
    use crate::registry::Registry;
    use crate::resolve::resolve;

    fn infer_src(source: &str, depth: usize) -> Result<Signature, Vec<Diagnostic>> {
        let program = parse(source).program.unwrap();
        let (registry, _) = Registry::build(&program);
        let resolved = resolve(&program, &registry);
        assert!(resolved.diagnostics.is_empty(), "{:#?}", resolved.diagnostics);
        let root = resolved.resolved.defs.len() - 1;
        let options = ExpandOptions {
            max_depth: depth,
            ..ExpandOptions::default()
        };
        let graph = expand(&resolved.resolved, root, None, &options).graph.unwrap();
        check(&graph, None).unwrap();
        infer(&graph, None)
    }

    fn rendered(source: &str) -> String {
        infer_src(source, 0).unwrap().render()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn add_makes_output_include() {
        let sig = infer_src("def main = [X|Y] use +a [X|Y] as A link X>->A.X, A.Y>->Y", 0).unwrap();
        assert_eq!(sig.output("Y").unwrap().includes, set(&["a"]));
        assert_eq!(sig.input("X").unwrap().excludes, set(&["a"]));
        assert_eq!(sig.render(), "[X: {!a} | Y: {a}]");
    }

    #[test]
    fn remove_then_add_in_series() {
        assert_eq!(
            rendered("def main=[X|Y] use -a[X|Y] as R use +a[X|Y] as A link X>->R.X, R.Y>->A.X, A.Y>->Y"),
            "[X: {a} | Y: {a}]"
        );
    }

    #[test]
    fn spawn_has_no_freshness_requirement() {
        assert_eq!(
            rendered("def main = [X|Y] use *a [X|Y] as S link X>->S.X, S.Y>->Y"),
            "[X: {} | Y: {a}]"
        );
    }

    #[test]
    fn union_pushes_requirement_to_only_candidate() {
        let source = "
            def f = <a, b |> [X0, X1 | Y]
                use -a [X | Y] as RemAUpper
                use U{2} [X0, X1 | Y] as Union
                use -a [X | Y] as RemALower
                use -b [X | Y] as RemB
                use +b [X | Y] as AddB
                link
                    X0 >-> RemAUpper.X
                    X1 >-> AddB.X
                    RemAUpper.Y >-> Union.X0
                    AddB.Y >-> Union.X1
                    Union.Y >-> RemALower.X
                    RemALower.Y >-> RemB.X
                    RemB.Y >-> Y";
        assert_eq!(rendered(source), "[X0: {a}, X1: {a, !b} | Y: {!a, !b}]");
    }

    #[test]
    fn split_and_join_with_truncated_recursion() {
        let source = "
            def f = <a |> [X | Y]
                use <> [X | Y0, Y1] as If
                use +a [X | Y] as AddA
                use *b [X | Y] as SpawnB
                use -b [X | Y] as RemB
                use f <a |> [X | Y] as Recursive
                use >< [X0, X1 | Y] as Join
                link
                    X >-> If.X
                    If.Y0 >-> AddA.X
                    AddA.Y >-> Join.X0
                    If.Y1 >-> SpawnB.X
                    SpawnB.Y >-> Recursive.X
                    Recursive.Y >-> RemB.X
                    RemB.Y >-> Join.X1
                    Join.Y >-> Y";
        assert_eq!(infer_src(source, 0).unwrap().render(), "[X: {!a} | Y: {a}]");
    }

    #[test]
    fn join_of_independent_flows() {
        let source = "
            def f = <a, b|> [X1, X2, X3 | Y]
                use U{2} [X1, X2 | Y] as U
                use >< [X1, X2 | Y] as Join
                use -a [X | Y] as RemA
                use +b [X | Y] as AddB
                link
                    X1 >-> U.X1
                    X2 >-> AddB.X, AddB.Y >-> U.X2
                    U.Y >-> Join.X1
                    X3 >-> RemA.X, RemA.Y >-> Join.X2
                    Join.Y >-> Y";
        assert_eq!(rendered(source), "[X1: {}, X2: {!b}, X3: {a} | Y: {b}]");
    }

    #[test]
    fn double_add_is_a_type_error() {
        let errs = infer_src(
            "def main = [X|Y] use +a [X|Y] as A use +a [X|Y] as B link X>->A.X, A.Y>->B.X, B.Y>->Y",
            0,
        )
        .unwrap_err();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].kind, ErrorKind::Type);
        assert_eq!(
            errs[0].message,
            "output `Y` of `A` (+a) must both carry and not carry `a`"
        );
    }

    #[test]
    fn double_remove_is_a_type_error() {
        let errs = infer_src(
            "def main = [X|Y] use -a [X|Y] as A use -a [X|Y] as B link X>->A.X, A.Y>->B.X, B.Y>->Y",
            0,
        )
        .unwrap_err();
        assert!(errs.iter().all(|d| d.kind == ErrorKind::Type));
        assert!(!errs.is_empty());
    }

    #[test]
    fn merge_without_supplier_is_a_type_error() {
        let errs = infer_src(
            "def main = [X0, X1 | Y]
                use -a [X | Y] as R0
                use -a [X | Y] as R1
                use U{2} [X0, X1 | Y] as U
                use -a [X | Y] as R3
                link X0 >-> R0.X, X1 >-> R1.X, R0.Y >-> U.X0, R1.Y >-> U.X1, U.Y >-> R3.X, R3.Y >-> Y",
            0,
        )
        .unwrap_err();
        assert!(errs
            .iter()
            .any(|d| d.message == "`U` (U{2}) must produce `a` but every input excludes it"));
    }

    #[test]
    fn passthrough_has_empty_signature() {
        assert_eq!(rendered("def main = [X | Y] link X >-> Y"), "[X: {} | Y: {}]");
    }

    #[test]
    fn signature_serializes_flat_ports() {
        let sig = infer_src("def main = [X|Y] use +a [X|Y] as A link X>->A.X, A.Y>->Y", 0).unwrap();
        let json = serde_json::to_value(&sig).unwrap();
        assert_eq!(json["outputs"][0]["name"], "Y");
        assert_eq!(json["outputs"][0]["includes"][0], "a");
        assert_eq!(json["inputs"][0]["excludes"][0], "a");
    }

    fn long_chain(len: usize) -> String {
        let mut src = String::from("def main = [X | Y]\n");
        for i in 0..len {
            src.push_str(&format!("    use *b [X | Y] as S{i}\n"));
        }
        src.push_str("    use -a [X | Y] as R\n    link X >-> S0.X\n");
        for i in 1..len {
            src.push_str(&format!("        S{}.Y >-> S{i}.X\n", i - 1));
        }
        src.push_str(&format!("        S{}.Y >-> R.X, R.Y >-> Y\n", len - 1));
        src
    }

    #[test]
    fn long_chain_reaches_the_fixpoint() {
        let sig = infer_src(&long_chain(3000), 0).unwrap();
        assert_eq!(sig.render(), "[X: {a} | Y: {b, !a}]");
    }

    #[test]
    fn passed_deadline_stops_inference() {
        let program = parse(&long_chain(3000)).program.unwrap();
        let (registry, _) = Registry::build(&program);
        let resolved = resolve(&program, &registry).resolved;
        let graph = expand(&resolved, 0, None, &ExpandOptions::default())
            .graph
            .unwrap();
        let errs = infer(&graph, Some(Instant::now())).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].kind, ErrorKind::ResourceExceeded);
    }

    #[test]
    fn fresh_existentials_do_not_conflict() {
        let source = "
            def inc = <| e> [X | Y] use +e [X | Y] as A link X >-> A.X, A.Y >-> Y
            def main = [X | Y]
                use inc [X | Y] as I
                use inc [X | Y] as J
                link X >-> I.X, I.Y >-> J.X, J.Y >-> Y";
        let sig = infer_src(source, 0).unwrap();
        assert_eq!(sig.output("Y").unwrap().includes.len(), 2);
        assert_eq!(sig.render(), "[X: {!e} | Y: {e}]");
    }

    #[test]
    fn shared_existential_still_conflicts() {
        let source = "
            def inc = <| e> [X | Y] use +e [X | Y] as A link X >-> A.X, A.Y >-> Y
            def main = <| f> [X | Y]
                use inc <| f> [X | Y] as I
                use inc <| f> [X | Y] as J
                link X >-> I.X, I.Y >-> J.X, J.Y >-> Y";
        let errs = infer_src(source, 0).unwrap_err();
        assert!(errs.iter().all(|d| d.kind == ErrorKind::Type));
        assert_eq!(
            errs[0].message,
            "output `Y` of `I/A` (+f) must both carry and not carry `f`"
        );
    }
}
