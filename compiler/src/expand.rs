// expand.rs — Depth-bounded inlining of definitions into a port-graph
//
// Starting from the root definition, every primitive use becomes one node
// and every definition use is replaced by the expansion of its body under
// the use-site generator binding. Existentials the use leaves to the callee
// get a fresh symbol per inlined instance. Expansion runs off an explicit
// frame stack; the frame arena doubles as the ancestry used to detect
// recursion, which compares universal arguments only.
//
// Wiring goes through an intermediate vertex arena: the boundary ports of
// each inlined instance are junction vertices, and the final edges are
// obtained by walking from every node output through junctions to the
// node inputs (or root outputs) they reach.
//
// Preconditions: `program` passed link resolution without errors.
// Postconditions: on success, a validated `PortGraph`; a use is truncated
//   exactly when its recursive level exceeds `max_depth`.
// Failure modes: root generator count mismatch → ArityMismatch; node budget
//   or deadline exceeded → ResourceExceeded (no partial graph).
// Side effects: none.

use std::time::Instant;

use crate::diag::{Diagnostic, ErrorKind};
use crate::port_graph::{
    Endpoint, Instance, NodeId, NodeKind, PortGraph, PortGraphBuilder, Provenance, Status,
};
use crate::primitive::fresh_symbol;
use crate::resolve::{LinkEnd, ResolvedDef, ResolvedProgram, ResolvedUse, UseTarget};

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ExpandOptions {
    /// Number of recursive levels inlined before a recursive use is truncated.
    pub max_depth: usize,
    /// Upper bound on emitted nodes plus inlined instances.
    pub max_nodes: usize,
    pub deadline: Option<Instant>,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        ExpandOptions {
            max_depth: 0,
            max_nodes: 100_000,
            deadline: None,
        }
    }
}

#[derive(Debug)]
pub struct ExpandResult {
    pub graph: Option<PortGraph>,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Expand definition `root` of `program`.
///
/// `generators` binds the root's universal parameters; `None` leaves every
/// parameter bound to its own name.
pub fn expand(
    program: &ResolvedProgram,
    root: usize,
    generators: Option<&[String]>,
    options: &ExpandOptions,
) -> ExpandResult {
    let def = program.def(root);
    let binding = match root_binding(def, generators) {
        Ok(binding) => binding,
        Err(diag) => {
            return ExpandResult {
                graph: None,
                diagnostics: vec![diag],
            }
        }
    };

    let mut expander = Expander::new(program, options, root, binding);
    match expander.run() {
        Ok(graph) => ExpandResult {
            graph: Some(graph),
            diagnostics: Vec::new(),
        },
        Err(diag) => ExpandResult {
            graph: None,
            diagnostics: vec![diag],
        },
    }
}

/// True once `deadline` has passed.
pub fn past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

fn root_binding(def: &ResolvedDef, generators: Option<&[String]>) -> Result<Vec<String>, Diagnostic> {
    let Some(generators) = generators else {
        return Ok(def.params().map(str::to_string).collect());
    };
    if generators.len() != def.universal.len() {
        return Err(Diagnostic::error(
            ErrorKind::ArityMismatch,
            def.span,
            format!(
                "root `{}` takes {} universal generator(s), {} given",
                def.name,
                def.universal.len(),
                generators.len()
            ),
        ));
    }
    let mut binding = generators.to_vec();
    binding.extend(def.existential.iter().cloned());
    Ok(binding)
}

/// Concrete symbol for `sym` written inside `def` under `binding`.
fn bind(def: &ResolvedDef, binding: &[String], sym: &str) -> String {
    def.params()
        .position(|p| p == sym)
        .and_then(|i| binding.get(i))
        .map_or_else(|| sym.to_string(), Clone::clone)
}

// ── Expander ────────────────────────────────────────────────────────────────

type VertexId = usize;

#[derive(Debug, Clone, Copy)]
enum VertexKind {
    /// Boundary port of an inlined instance.
    Junction,
    NodeIn(NodeId, usize),
    NodeOut(NodeId, usize),
    RootIn(usize),
    RootOut(usize),
}

/// One definition being expanded under one binding.
#[derive(Debug)]
struct Frame {
    def: usize,
    binding: Vec<String>,
    level: usize,
    parent: Option<usize>,
    path: Vec<String>,
    inputs: Vec<VertexId>,
    outputs: Vec<VertexId>,
}

struct Expander<'a> {
    program: &'a ResolvedProgram,
    options: &'a ExpandOptions,
    root: usize,
    builder: PortGraphBuilder,
    vertices: Vec<VertexKind>,
    wires: Vec<Vec<VertexId>>,
    frames: Vec<Frame>,
    /// Suffix for the next fresh existential.
    next_fresh: usize,
}

impl<'a> Expander<'a> {
    fn new(
        program: &'a ResolvedProgram,
        options: &'a ExpandOptions,
        root: usize,
        binding: Vec<String>,
    ) -> Self {
        let def = program.def(root);
        let builder = PortGraphBuilder::new(def.name.clone(), def.inputs.clone(), def.outputs.clone())
            .with_generators(binding.clone())
            .with_root_span(def.span);
        let mut expander = Expander {
            program,
            options,
            root,
            builder,
            vertices: Vec::new(),
            wires: Vec::new(),
            frames: Vec::new(),
            next_fresh: 1,
        };
        let inputs = (0..def.inputs.len())
            .map(|i| expander.vertex(VertexKind::RootIn(i)))
            .collect();
        let outputs = (0..def.outputs.len())
            .map(|j| expander.vertex(VertexKind::RootOut(j)))
            .collect();
        expander.frames.push(Frame {
            def: root,
            binding,
            level: 0,
            parent: None,
            path: Vec::new(),
            inputs,
            outputs,
        });
        expander
    }

    fn vertex(&mut self, kind: VertexKind) -> VertexId {
        self.vertices.push(kind);
        self.wires.push(Vec::new());
        self.vertices.len() - 1
    }

    fn run(&mut self) -> Result<PortGraph, Diagnostic> {
        let mut stack = vec![0];
        while let Some(frame) = stack.pop() {
            self.check_deadline()?;
            let children = self.expand_frame(frame)?;
            // Reverse so that children are expanded in source order.
            stack.extend(children.into_iter().rev());
        }
        self.flatten();

        let builder = std::mem::replace(
            &mut self.builder,
            PortGraphBuilder::new(String::new(), Vec::new(), Vec::new()),
        );
        builder.build().map_err(|err| {
            Diagnostic::error(
                ErrorKind::PortMismatch,
                self.program.def(self.root).span,
                format!("internal: expanded graph is malformed: {err}"),
            )
        })
    }

    // ── Budget ──

    fn check_deadline(&self) -> Result<(), Diagnostic> {
        if past(self.options.deadline) {
            return Err(self.resource_error(
                "expansion did not finish before the compile deadline".to_string(),
            ));
        }
        Ok(())
    }

    fn charge(&self) -> Result<(), Diagnostic> {
        let used = self.builder.node_count() + self.frames.len();
        if used >= self.options.max_nodes {
            return Err(self.resource_error(format!(
                "expansion exceeded the budget of {} nodes",
                self.options.max_nodes
            )));
        }
        Ok(())
    }

    fn resource_error(&self, message: String) -> Diagnostic {
        Diagnostic::error(
            ErrorKind::ResourceExceeded,
            self.program.def(self.root).span,
            message,
        )
        .with_hint("lower the expansion depth")
    }

    /// Number of frames from `frame` up to the root that expand `def`
    /// with the universal arguments `universal`.
    fn occurrences(&self, frame: usize, def: usize, universal: &[String]) -> usize {
        let mut count = 0;
        let mut cursor = Some(frame);
        while let Some(i) = cursor {
            let f = &self.frames[i];
            if f.def == def && f.binding.starts_with(universal) {
                count += 1;
            }
            cursor = f.parent;
        }
        count
    }

    // ── Frame expansion ──

    /// Expand the body of one frame. Returns the frames it spawned.
    fn expand_frame(&mut self, fi: usize) -> Result<Vec<usize>, Diagnostic> {
        let program = self.program;
        let def = program.def(self.frames[fi].def);
        let binding = self.frames[fi].binding.clone();
        let level = self.frames[fi].level;

        let mut use_inputs: Vec<Vec<VertexId>> = Vec::with_capacity(def.uses.len());
        let mut use_outputs: Vec<Vec<VertexId>> = Vec::with_capacity(def.uses.len());
        let mut children = Vec::new();

        for u in &def.uses {
            let mut path = self.frames[fi].path.clone();
            path.push(u.instance.clone());

            let (ins, outs) = match &u.target {
                UseTarget::Primitive(prim) => {
                    let prim = prim.substitute(|s| bind(def, &binding, s));
                    let provenance = Provenance {
                        path,
                        definition: def.name.clone(),
                        level,
                        status: Status::Inlined,
                        span: u.span,
                    };
                    self.node_ports(NodeKind::Primitive(prim), u, provenance)?
                }
                UseTarget::Definition { index, args, fresh } => {
                    let callee = program.def(*index);
                    let universal = callee.universal.len();
                    let mut concrete: Vec<String> = Vec::with_capacity(args.len());
                    for (k, s) in args.iter().enumerate() {
                        if *fresh && k >= universal {
                            concrete.push(fresh_symbol(s, self.next_fresh));
                        } else {
                            concrete.push(bind(def, &binding, s));
                        }
                    }
                    if *fresh && args.len() > universal {
                        self.next_fresh += 1;
                    }
                    let recursive =
                        self.occurrences(fi, *index, &concrete[..universal.min(concrete.len())]);

                    if recursive > self.options.max_depth {
                        let provenance = Provenance {
                            path,
                            definition: def.name.clone(),
                            level: recursive,
                            status: Status::DepthExceeded,
                            span: u.span,
                        };
                        let kind = NodeKind::Truncated {
                            definition: callee.name.clone(),
                            generators: concrete,
                        };
                        self.node_ports(kind, u, provenance)?
                    } else {
                        self.charge()?;
                        let child_level = if recursive > 0 { recursive } else { level };
                        let ins: Vec<_> = (0..u.inputs.len())
                            .map(|_| self.vertex(VertexKind::Junction))
                            .collect();
                        let outs: Vec<_> = (0..u.outputs.len())
                            .map(|_| self.vertex(VertexKind::Junction))
                            .collect();
                        self.builder.add_instance(Instance {
                            path: path.clone(),
                            definition: callee.name.clone(),
                            generators: concrete.clone(),
                            level: child_level,
                        });
                        self.frames.push(Frame {
                            def: *index,
                            binding: concrete,
                            level: child_level,
                            parent: Some(fi),
                            path,
                            inputs: ins.clone(),
                            outputs: outs.clone(),
                        });
                        children.push(self.frames.len() - 1);
                        (ins, outs)
                    }
                }
            };
            use_inputs.push(ins);
            use_outputs.push(outs);
        }

        for link in &def.links {
            let source = match link.source {
                LinkEnd::Boundary(i) => self.frames[fi].inputs[i],
                LinkEnd::Instance { use_index, port } => use_outputs[use_index][port],
            };
            let target = match link.target {
                LinkEnd::Boundary(j) => self.frames[fi].outputs[j],
                LinkEnd::Instance { use_index, port } => use_inputs[use_index][port],
            };
            self.wires[source].push(target);
        }

        Ok(children)
    }

    fn node_ports(
        &mut self,
        kind: NodeKind,
        u: &ResolvedUse,
        provenance: Provenance,
    ) -> Result<(Vec<VertexId>, Vec<VertexId>), Diagnostic> {
        self.charge()?;
        let id = self
            .builder
            .add_node(kind, u.inputs.clone(), u.outputs.clone(), provenance);
        let ins = (0..u.inputs.len())
            .map(|k| self.vertex(VertexKind::NodeIn(id, k)))
            .collect();
        let outs = (0..u.outputs.len())
            .map(|k| self.vertex(VertexKind::NodeOut(id, k)))
            .collect();
        Ok((ins, outs))
    }

    // ── Flattening ──

    /// Emit one edge per (source, reachable target) pair, skipping junctions.
    fn flatten(&mut self) {
        // seen[v] == stamp marks v as visited for the current source.
        let mut seen = vec![0usize; self.vertices.len()];
        let mut stack = Vec::new();

        for v in 0..self.vertices.len() {
            let source = match self.vertices[v] {
                VertexKind::NodeOut(id, port) => Endpoint::node(id, port),
                VertexKind::RootIn(i) => Endpoint::input(i),
                _ => continue,
            };
            let stamp = v + 1;
            stack.extend(self.wires[v].iter().rev().copied());
            while let Some(w) = stack.pop() {
                if seen[w] == stamp {
                    continue;
                }
                seen[w] = stamp;
                match self.vertices[w] {
                    VertexKind::Junction => stack.extend(self.wires[w].iter().rev().copied()),
                    VertexKind::NodeIn(id, port) => {
                        self.builder.add_edge(source, Endpoint::node(id, port))
                    }
                    VertexKind::RootOut(j) => self.builder.add_edge(source, Endpoint::output(j)),
                    VertexKind::NodeOut(..) | VertexKind::RootIn(_) => {}
                }
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
