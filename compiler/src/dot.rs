// dot.rs — Graphviz DOT output for expanded port-graphs
//
// Transforms a PortGraph into DOT format suitable for rendering with `dot`.
// Each inlined instance becomes a nested cluster; truncated recursive
// instances are drawn as one dashed box.
//
// Preconditions: `graph` is a fully constructed PortGraph.
// Postconditions: returns a valid DOT string; output is deterministic.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

use crate::port_graph::{Endpoint, Node, NodeKind, PortGraph, Vertex};
use crate::primitive::Primitive;
use crate::signature::Signature;

/// Emit the graph as a Graphviz DOT string, labelling boundary ports with
/// their inferred types when a signature is given.
pub fn to_dot(graph: &PortGraph, signature: Option<&Signature>) -> String {
    Dot { graph, signature }.to_string()
}

pub struct Dot<'a> {
    pub graph: &'a PortGraph,
    pub signature: Option<&'a Signature>,
}

// ── Cluster tree ──

/// Nodes grouped by the instance path that encloses them.
#[derive(Default)]
struct Cluster<'g> {
    nodes: Vec<&'g Node>,
    children: BTreeMap<String, Cluster<'g>>,
}

impl<'g> Cluster<'g> {
    fn insert(&mut self, scope: &[String], node: &'g Node) {
        match scope.split_first() {
            None => self.nodes.push(node),
            Some((head, rest)) => self
                .children
                .entry(head.clone())
                .or_default()
                .insert(rest, node),
        }
    }
}

impl fmt::Display for Dot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = self.graph;
        writeln!(f, "digraph {} {{", quote(graph.root()))?;
        writeln!(f, "    rankdir=LR;")?;
        writeln!(f, "    node [fontname=\"Helvetica\", fontsize=10];")?;
        writeln!(f, "    edge [fontname=\"Helvetica\", fontsize=9, arrowsize=0.6];")?;

        // Boundary ports
        writeln!(f)?;
        for (i, name) in graph.inputs().iter().enumerate() {
            let ty = self.signature.and_then(|s| s.input(name));
            writeln!(
                f,
                "    in{i} [shape=cds, style=filled, fillcolor=lightblue, label={}];",
                port_label(name, ty.map(ToString::to_string))
            )?;
        }
        for (j, name) in graph.outputs().iter().enumerate() {
            let ty = self.signature.and_then(|s| s.output(name));
            writeln!(
                f,
                "    out{j} [shape=cds, style=filled, fillcolor=lightyellow, label={}];",
                port_label(name, ty.map(ToString::to_string))
            )?;
        }
        if graph.inputs().len() > 1 {
            let ids: Vec<String> = (0..graph.inputs().len()).map(|i| format!("in{i}")).collect();
            writeln!(f, "    {{ rank=source; {}; }}", ids.join("; "))?;
        }
        if graph.outputs().len() > 1 {
            let ids: Vec<String> = (0..graph.outputs().len()).map(|j| format!("out{j}")).collect();
            writeln!(f, "    {{ rank=sink; {}; }}", ids.join("; "))?;
        }

        // Nodes, clustered by instance
        let mut root = Cluster::default();
        for node in graph.nodes() {
            let path = &node.provenance.path;
            root.insert(&path[..path.len().saturating_sub(1)], node);
        }
        writeln!(f)?;
        self.write_cluster(f, &root, &mut Vec::new(), "    ")?;

        // Edges
        writeln!(f)?;
        for edge in graph.edges() {
            let mut attrs = Vec::new();
            if let Some(label) = self.port_name(edge.source, true) {
                attrs.push(format!("taillabel={}", quote(label)));
            }
            if let Some(label) = self.port_name(edge.target, false) {
                attrs.push(format!("headlabel={}", quote(label)));
            }
            write!(f, "    {} -> {}", vertex_id(edge.source), vertex_id(edge.target))?;
            if !attrs.is_empty() {
                write!(f, " [{}]", attrs.join(", "))?;
            }
            writeln!(f, ";")?;
        }

        writeln!(f, "}}")
    }
}

impl Dot<'_> {
    fn write_cluster(
        &self,
        f: &mut fmt::Formatter<'_>,
        cluster: &Cluster<'_>,
        path: &mut Vec<String>,
        indent: &str,
    ) -> fmt::Result {
        for node in &cluster.nodes {
            writeln!(f, "{indent}n{} [{}];", node.id.0, node_attrs(node))?;
        }
        for (name, child) in &cluster.children {
            path.push(name.clone());
            let label = match self.graph.instances().iter().find(|i| i.path == *path) {
                Some(instance) => format!("{}: {}", name, instance.definition),
                None => name.clone(),
            };
            writeln!(f, "{indent}subgraph cluster_{} {{", sanitize(&path.join("_")))?;
            writeln!(f, "{indent}    label={};", quote(&label))?;
            writeln!(f, "{indent}    style=rounded;")?;
            writeln!(f, "{indent}    color=gray50;")?;
            self.write_cluster(f, child, path, &format!("{indent}    "))?;
            writeln!(f, "{indent}}}")?;
            path.pop();
        }
        Ok(())
    }

    /// Port name shown at an edge end, for nodes with more than one port on
    /// that side.
    fn port_name(&self, ep: Endpoint, source: bool) -> Option<&str> {
        let Vertex::Node(id) = ep.vertex else {
            return None;
        };
        let node = self.graph.node(id)?;
        let ports = if source { &node.outputs } else { &node.inputs };
        if ports.len() > 1 {
            ports.get(ep.port).map(String::as_str)
        } else {
            None
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn vertex_id(ep: Endpoint) -> String {
    match ep.vertex {
        Vertex::Inputs => format!("in{}", ep.port),
        Vertex::Outputs => format!("out{}", ep.port),
        Vertex::Node(id) => format!("n{}", id.0),
    }
}

fn node_attrs(node: &Node) -> String {
    let tooltip = quote(&node.provenance.path_string());
    match &node.kind {
        NodeKind::Primitive(prim) => {
            let shape = match prim {
                Primitive::Add(_) | Primitive::Remove(_) | Primitive::Spawn(_) => "circle",
                Primitive::Union(_) => "invtrapezium",
                Primitive::Join => "invtriangle",
                Primitive::Split => "triangle",
            };
            format!(
                "shape={shape}, label={}, tooltip={tooltip}",
                quote(&prim.to_string())
            )
        }
        NodeKind::Truncated { .. } => format!(
            "shape=box, style=dashed, label={}, tooltip={tooltip}",
            quote(&format!("{}\n(depth exceeded)", node.kind))
        ),
    }
}

fn port_label(name: &str, ty: Option<String>) -> String {
    match ty {
        Some(ty) => quote(&format!("{name}\n{ty}")),
        None => quote(name),
    }
}

/// Sanitize a name to valid DOT identifier characters.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Double-quoted DOT string with escapes.
fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{compile, CompileOptions};

    fn emit(source: &str, typing: bool) -> String {
        let options = CompileOptions {
            typing,
            ..CompileOptions::default()
        };
        compile(source, &options).unwrap().dot()
    }

    const NESTED: &str = "
        def inc = [X | Y] use +a [X | Y] as A link X >-> A.X, A.Y >-> Y
        def main = [X | Y] use inc [X | Y] as I use -a [X | Y] as R
            link X >-> I.X, I.Y >-> R.X, R.Y >-> Y";

    #[test]
    fn valid_dot_structure() {
        let dot = emit(NESTED, false);
        assert!(dot.starts_with("digraph \"main\" {\n"));
        assert!(dot.ends_with("}\n"));
        assert_eq!(dot.matches('{').count(), dot.matches('}').count());
    }

    #[test]
    fn instances_become_clusters() {
        let dot = emit(NESTED, false);
        assert!(dot.contains("subgraph cluster_I {"));
        assert!(dot.contains("label=\"I: inc\";"));
        // the inner node sits inside the cluster, the outer one does not
        let cluster_start = dot.find("subgraph cluster_I").unwrap();
        let inner = dot.find("n1 [shape=circle, label=\"+a\"").unwrap();
        let outer = dot.find("n0 [shape=circle, label=\"-a\"").unwrap();
        assert!(inner > cluster_start);
        assert!(outer < cluster_start);
    }

    #[test]
    fn edges_connect_boundaries() {
        let dot = emit(NESTED, false);
        assert!(dot.contains("    in0 -> n1;"));
        assert!(dot.contains("    n1 -> n0;"));
        assert!(dot.contains("    n0 -> out0;"));
    }

    #[test]
    fn multi_port_nodes_get_port_labels() {
        let dot = emit(
            "def main = [X | Y] use <> [X | L, R] as S use >< [A, B | Y] as J
             link X >-> S.X, S.L >-> J.A, S.R >-> J.B, J.Y >-> Y",
            false,
        );
        assert!(dot.contains("n0 -> n1 [taillabel=\"L\", headlabel=\"A\"];"));
        assert!(dot.contains("n1 -> out0;"));
    }

    #[test]
    fn truncated_nodes_are_dashed() {
        let dot = emit(
            "def f = [X | Y] use f [X | Y] as F link X >-> F.X, F.Y >-> Y",
            false,
        );
        assert!(dot.contains("style=dashed, label=\"truncated f\\n(depth exceeded)\""));
    }

    #[test]
    fn boundary_ports_show_types() {
        let dot = emit(
            "def main=[X|Y] use -a[X|Y] as R use +a[X|Y] as A link X>->R.X, R.Y>->A.X, A.Y>->Y",
            true,
        );
        assert!(dot.contains("in0 [shape=cds, style=filled, fillcolor=lightblue, label=\"X\\n{a}\"];"));
        assert!(dot.contains("label=\"Y\\n{a}\""));
    }

    #[test]
    fn deterministic_output() {
        assert_eq!(emit(NESTED, true), emit(NESTED, true));
    }

    #[test]
    fn quote_escapes() {
        assert_eq!(quote("a\"b\\c\nd"), "\"a\\\"b\\\\c\\nd\"");
        assert_eq!(sanitize("I/A-b"), "I_A_b");
    }
}
