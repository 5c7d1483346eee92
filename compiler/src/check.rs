// check.rs — Port connectivity check on an expanded port-graph
//
// Every node input must have exactly one incoming edge and every node
// output at least one outgoing edge. At the root boundary, every input must
// feed something and every output must be fed exactly once.
//
// Preconditions: `graph` came out of expansion.
// Postconditions: `Ok(())` means every declared port is connected.
// Failure modes: one `PortMismatch` diagnostic per offending port, naming
//   the instance path; a passed deadline → one `ResourceExceeded`.
// Side effects: none.

use std::time::Instant;

use crate::diag::{Diagnostic, ErrorKind};
use crate::expand::past;
use crate::port_graph::{Endpoint, Node, NodeId, PortGraph};

/// Nodes visited between deadline checks.
const DEADLINE_STRIDE: usize = 1024;

pub fn check(graph: &PortGraph, deadline: Option<Instant>) -> Result<(), Vec<Diagnostic>> {
    let mut diagnostics = Vec::new();

    for (index, node) in graph.nodes().iter().enumerate() {
        if index % DEADLINE_STRIDE == 0 && past(deadline) {
            return Err(vec![Diagnostic::error(
                ErrorKind::ResourceExceeded,
                graph.root_span(),
                "port check did not finish before the compile deadline",
            )]);
        }
        for (i, name) in node.inputs.iter().enumerate() {
            let fed = graph.incoming(Endpoint::node(node.id, i)).len();
            if fed != 1 {
                diagnostics.push(node_error(
                    node,
                    format!(
                        "input `{}` of `{}` ({}) has {} incoming edges, expected exactly one",
                        name,
                        node.provenance.path_string(),
                        node.kind,
                        fed
                    ),
                ));
            }
        }
        for (j, name) in node.outputs.iter().enumerate() {
            if graph.outgoing(Endpoint::node(node.id, j)).is_empty() {
                diagnostics.push(node_error(
                    node,
                    format!(
                        "output `{}` of `{}` ({}) is not connected",
                        name,
                        node.provenance.path_string(),
                        node.kind
                    ),
                ));
            }
        }
    }

    for (i, name) in graph.inputs().iter().enumerate() {
        if graph.outgoing(Endpoint::input(i)).is_empty() {
            diagnostics.push(Diagnostic::error(
                ErrorKind::PortMismatch,
                graph.root_span(),
                format!("input `{}` of `{}` is not connected", name, graph.root()),
            ));
        }
    }
    for (j, name) in graph.outputs().iter().enumerate() {
        let fed = graph.incoming(Endpoint::output(j)).len();
        if fed != 1 {
            diagnostics.push(Diagnostic::error(
                ErrorKind::PortMismatch,
                graph.root_span(),
                format!(
                    "output `{}` of `{}` has {} incoming edges, expected exactly one",
                    name,
                    graph.root(),
                    fed
                ),
            ));
        }
    }

    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

fn node_error(node: &Node, message: String) -> Diagnostic {
    let NodeId(id) = node.id;
    Diagnostic::error(ErrorKind::PortMismatch, node.provenance.span, message)
        .with_hint(format!("node n{id} was produced by `{}`", node.provenance.definition))
}
