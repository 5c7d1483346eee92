// port_graph.rs — Flat port-graph of one expanded diagram
//
// The output of expansion: primitive nodes (and opaque truncated nodes)
// wired port-to-port, plus the two boundary vertex sets of the root
// definition. Every node records where it came from in the definition tree.
//
// Preconditions: constructed only through `PortGraphBuilder::build()`.
// Postconditions: every edge endpoint refers to an existing vertex and a
//   declared port, sources are outputs (or root inputs), targets are inputs
//   (or root outputs). Immutable after construction.
// Failure modes: `GraphError` on dangling or misdirected endpoints.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::ast::Span;
use crate::primitive::{display_symbol, Primitive};

// ── Identifiers ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EdgeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

// ── Nodes ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Primitive(Primitive),
    /// A recursive use cut off at the depth bound. No facts cross it.
    Truncated {
        definition: String,
        generators: Vec<String>,
    },
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Primitive(p) => write!(f, "{p}"),
            NodeKind::Truncated {
                definition,
                generators,
            } => {
                write!(f, "truncated {definition}")?;
                if !generators.is_empty() {
                    let shown: Vec<&str> = generators.iter().map(|g| display_symbol(g)).collect();
                    write!(f, "<{}>", shown.join(", "))?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Inlined,
    DepthExceeded,
}

/// Where a node came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    /// Instance names from the root down to the node's own use.
    pub path: Vec<String>,
    /// The definition whose body contains the use.
    pub definition: String,
    /// Recursive level of the enclosing expansion.
    pub level: usize,
    pub status: Status,
    /// Source span of the `use` statement.
    #[serde(skip)]
    pub span: Span,
}

impl Provenance {
    pub fn path_string(&self) -> String {
        self.path.join("/")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Use-site port names.
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub provenance: Provenance,
}

impl Node {
    pub fn is_truncated(&self) -> bool {
        matches!(self.kind, NodeKind::Truncated { .. })
    }
}

// ── Edges ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Vertex {
    /// Root input boundary (edge sources only).
    Inputs,
    /// Root output boundary (edge targets only).
    Outputs,
    Node(NodeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Endpoint {
    pub vertex: Vertex,
    pub port: usize,
}

impl Endpoint {
    pub fn input(i: usize) -> Self {
        Endpoint {
            vertex: Vertex::Inputs,
            port: i,
        }
    }

    pub fn output(j: usize) -> Self {
        Endpoint {
            vertex: Vertex::Outputs,
            port: j,
        }
    }

    pub fn node(id: NodeId, port: usize) -> Self {
        Endpoint {
            vertex: Vertex::Node(id),
            port,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: Endpoint,
    pub target: Endpoint,
}

/// An inlined use of a user definition (not the root).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instance {
    pub path: Vec<String>,
    pub definition: String,
    pub generators: Vec<String>,
    pub level: usize,
}

// ── Graph ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct PortGraph {
    root: String,
    generators: Vec<String>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    instances: Vec<Instance>,
    #[serde(skip)]
    root_span: Span,
    #[serde(skip)]
    incoming: HashMap<Endpoint, Vec<EdgeId>>,
    #[serde(skip)]
    outgoing: HashMap<Endpoint, Vec<EdgeId>>,
}

impl PortGraph {
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn root_span(&self) -> Span {
        self.root_span
    }

    /// Concrete generator symbols bound to the root's parameters.
    pub fn generators(&self) -> &[String] {
        &self.generators
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize)
    }

    /// Node whose instance path, written `A/B/C`, equals `path`.
    pub fn node_by_path(&self, path: &str) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| n.provenance.path_string() == path)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0 as usize]
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn incoming(&self, target: Endpoint) -> &[EdgeId] {
        self.incoming.get(&target).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn outgoing(&self, source: Endpoint) -> &[EdgeId] {
        self.outgoing.get(&source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Sources feeding `target`.
    pub fn predecessors(&self, target: Endpoint) -> impl Iterator<Item = Endpoint> + '_ {
        self.incoming(target).iter().map(|&e| self.edge(e).source)
    }

    /// Targets fed by `source`.
    pub fn successors(&self, source: Endpoint) -> impl Iterator<Item = Endpoint> + '_ {
        self.outgoing(source).iter().map(|&e| self.edge(e).target)
    }

    pub fn truncated_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_truncated()).count()
    }

    fn source_label(&self, ep: Endpoint) -> String {
        self.endpoint_label(ep, true)
    }

    fn target_label(&self, ep: Endpoint) -> String {
        self.endpoint_label(ep, false)
    }

    fn endpoint_label(&self, ep: Endpoint, source: bool) -> String {
        let fallback = || ep.port.to_string();
        match ep.vertex {
            Vertex::Inputs => format!(
                "in.{}",
                self.inputs.get(ep.port).cloned().unwrap_or_else(fallback)
            ),
            Vertex::Outputs => format!(
                "out.{}",
                self.outputs.get(ep.port).cloned().unwrap_or_else(fallback)
            ),
            Vertex::Node(id) => {
                let name = self.node(id).and_then(|n| {
                    if source {
                        n.outputs.get(ep.port)
                    } else {
                        n.inputs.get(ep.port)
                    }
                });
                format!("{}.{}", id, name.cloned().unwrap_or_else(fallback))
            }
        }
    }
}

impl fmt::Display for PortGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph {}", self.root)?;
        if !self.generators.is_empty() {
            write!(f, " <{}>", self.generators.join(", "))?;
        }
        writeln!(
            f,
            " [{} | {}]",
            self.inputs.join(", "),
            self.outputs.join(", ")
        )?;
        for node in &self.nodes {
            write!(
                f,
                "  {} {} [{} | {}] at {} ({}, level {}",
                node.id,
                node.kind,
                node.inputs.join(", "),
                node.outputs.join(", "),
                node.provenance.path_string(),
                node.provenance.definition,
                node.provenance.level,
            )?;
            if node.provenance.status == Status::DepthExceeded {
                write!(f, ", depth exceeded")?;
            }
            writeln!(f, ")")?;
        }
        for edge in &self.edges {
            writeln!(
                f,
                "  {} -> {}",
                self.source_label(edge.source),
                self.target_label(edge.target)
            )?;
        }
        Ok(())
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("edge {edge} refers to unknown node {node}")]
    DanglingNode { edge: u32, node: NodeId },
    #[error("edge {edge} refers to port {port} outside the declared ports")]
    PortOutOfRange { edge: u32, port: usize },
    #[error("edge {edge} {what}")]
    WrongDirection { edge: u32, what: &'static str },
}

#[derive(Debug)]
pub struct PortGraphBuilder {
    root: String,
    root_span: Span,
    generators: Vec<String>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    nodes: Vec<Node>,
    edges: Vec<(Endpoint, Endpoint)>,
    instances: Vec<Instance>,
}

impl PortGraphBuilder {
    pub fn new(root: impl Into<String>, inputs: Vec<String>, outputs: Vec<String>) -> Self {
        PortGraphBuilder {
            root: root.into(),
            root_span: (0..0).into(),
            generators: Vec::new(),
            inputs,
            outputs,
            nodes: Vec::new(),
            edges: Vec::new(),
            instances: Vec::new(),
        }
    }

    pub fn with_generators(mut self, generators: Vec<String>) -> Self {
        self.generators = generators;
        self
    }

    pub fn with_root_span(mut self, span: Span) -> Self {
        self.root_span = span;
        self
    }

    pub fn add_node(
        &mut self,
        kind: NodeKind,
        inputs: Vec<String>,
        outputs: Vec<String>,
        provenance: Provenance,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            kind,
            inputs,
            outputs,
            provenance,
        });
        id
    }

    pub fn add_edge(&mut self, source: Endpoint, target: Endpoint) {
        self.edges.push((source, target));
    }

    pub fn add_instance(&mut self, instance: Instance) {
        self.instances.push(instance);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Validate every edge and freeze the graph.
    pub fn build(self) -> Result<PortGraph, GraphError> {
        let mut edges = Vec::with_capacity(self.edges.len());
        let mut incoming: HashMap<Endpoint, Vec<EdgeId>> = HashMap::new();
        let mut outgoing: HashMap<Endpoint, Vec<EdgeId>> = HashMap::new();

        for (i, &(source, target)) in self.edges.iter().enumerate() {
            let edge = i as u32;
            let in_range = |ep: Endpoint, is_source: bool| -> Result<(), GraphError> {
                let limit = match ep.vertex {
                    Vertex::Inputs if is_source => self.inputs.len(),
                    Vertex::Outputs if !is_source => self.outputs.len(),
                    Vertex::Inputs => {
                        return Err(GraphError::WrongDirection {
                            edge,
                            what: "targets a root input",
                        })
                    }
                    Vertex::Outputs => {
                        return Err(GraphError::WrongDirection {
                            edge,
                            what: "starts at a root output",
                        })
                    }
                    Vertex::Node(id) => {
                        let node = self
                            .nodes
                            .get(id.0 as usize)
                            .ok_or(GraphError::DanglingNode { edge, node: id })?;
                        if is_source {
                            node.outputs.len()
                        } else {
                            node.inputs.len()
                        }
                    }
                };
                if ep.port < limit {
                    Ok(())
                } else {
                    Err(GraphError::PortOutOfRange {
                        edge,
                        port: ep.port,
                    })
                }
            };
            in_range(source, true)?;
            in_range(target, false)?;

            let id = EdgeId(edge);
            outgoing.entry(source).or_default().push(id);
            incoming.entry(target).or_default().push(id);
            edges.push(Edge { id, source, target });
        }

        Ok(PortGraph {
            root: self.root,
            generators: self.generators,
            inputs: self.inputs,
            outputs: self.outputs,
            nodes: self.nodes,
            edges,
            instances: self.instances,
            root_span: self.root_span,
            incoming,
            outgoing,
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn prov(path: &str) -> Provenance {
        Provenance {
            path: vec![path.to_string()],
            definition: "main".to_string(),
            level: 0,
            status: Status::Inlined,
            span: (0..0).into(),
        }
    }

    fn one_in_one_out(builder: &mut PortGraphBuilder, prim: Primitive, path: &str) -> NodeId {
        builder.add_node(
            NodeKind::Primitive(prim),
            vec!["X".into()],
            vec!["Y".into()],
            prov(path),
        )
    }

    fn series() -> PortGraph {
        let mut b = PortGraphBuilder::new("main", vec!["X".into()], vec!["Y".into()]);
        let r = one_in_one_out(&mut b, Primitive::Remove("a".into()), "R");
        let a = one_in_one_out(&mut b, Primitive::Add("a".into()), "A");
        b.add_edge(Endpoint::input(0), Endpoint::node(r, 0));
        b.add_edge(Endpoint::node(r, 0), Endpoint::node(a, 0));
        b.add_edge(Endpoint::node(a, 0), Endpoint::output(0));
        b.build().unwrap()
    }

    #[test]
    fn build_indexes_edges() {
        let g = series();
        assert_eq!(g.nodes().len(), 2);
        assert_eq!(g.edges().len(), 3);
        let r = Endpoint::node(NodeId(0), 0);
        assert_eq!(g.predecessors(r).collect::<Vec<_>>(), vec![Endpoint::input(0)]);
        assert_eq!(
            g.successors(r).collect::<Vec<_>>(),
            vec![Endpoint::node(NodeId(1), 0)]
        );
        assert!(g.incoming(Endpoint::input(0)).is_empty());
    }

    #[test]
    fn node_by_path() {
        let g = series();
        assert_eq!(g.node_by_path("A").map(|n| n.id), Some(NodeId(1)));
        assert!(g.node_by_path("B").is_none());
    }

    #[test]
    fn display_dump() {
        let g = series();
        assert_eq!(
            g.to_string(),
            "graph main [X | Y]
  n0 -a [X | Y] at R (main, level 0)
  n1 +a [X | Y] at A (main, level 0)
  in.X -> n0.X
  n0.Y -> n1.X
  n1.Y -> out.Y
"
        );
    }

    #[test]
    fn rejects_dangling_node() {
        let mut b = PortGraphBuilder::new("main", vec!["X".into()], vec![]);
        b.add_edge(Endpoint::input(0), Endpoint::node(NodeId(7), 0));
        assert_eq!(
            b.build().unwrap_err(),
            GraphError::DanglingNode {
                edge: 0,
                node: NodeId(7)
            }
        );
    }

    #[test]
    fn rejects_port_out_of_range() {
        let mut b = PortGraphBuilder::new("main", vec!["X".into()], vec!["Y".into()]);
        let n = one_in_one_out(&mut b, Primitive::Join, "J");
        b.add_edge(Endpoint::input(0), Endpoint::node(n, 3));
        assert!(matches!(
            b.build(),
            Err(GraphError::PortOutOfRange { port: 3, .. })
        ));
    }

    #[test]
    fn rejects_boundary_in_wrong_direction() {
        let mut b = PortGraphBuilder::new("main", vec!["X".into()], vec!["Y".into()]);
        b.add_edge(Endpoint::output(0), Endpoint::input(0));
        assert!(matches!(
            b.build(),
            Err(GraphError::WrongDirection { edge: 0, .. })
        ));
    }

    #[test]
    fn serializes_to_json() {
        let g = series();
        let json = serde_json::to_value(&g).unwrap();
        assert_eq!(json["root"], "main");
        assert_eq!(json["nodes"][0]["kind"]["primitive"]["remove"], "a");
        assert_eq!(json["nodes"][1]["provenance"]["status"], "inlined");
        assert_eq!(json["edges"][0]["source"]["vertex"], "inputs");
        assert_eq!(json["edges"][1]["target"]["vertex"]["node"], 1);
    }
}
