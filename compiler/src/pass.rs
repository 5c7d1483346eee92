// pass.rs — Pass descriptors: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's semantic passes (parse is outside the runner),
// their dependency edges, and the artifacts they produce. The pipeline
// runner uses them to compute the minimal pass subset for each --emit
// target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass (parse excluded, it runs before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Register,
    Resolve,
    Expand,
    Check,
    Infer,
}

/// Each maps to a concrete field of the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Registry,  // Registry
    Resolved,  // ResolvedProgram
    Graph,     // PortGraph
    Checked,   // connectivity verdict on the graph
    Signature, // Signature
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Name used in verbose output and logs.
    pub name: &'static str,
    /// Passes whose outputs this pass consumes.
    pub inputs: &'static [PassId],
    pub outputs: &'static [ArtifactId],
    /// Documentation only.
    pub invariants: &'static str,
}

pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Register => PassDescriptor {
            name: "register",
            inputs: &[],
            outputs: &[ArtifactId::Registry],
            invariants: "definition names unique, first definition wins",
        },
        PassId::Resolve => PassDescriptor {
            name: "resolve",
            inputs: &[PassId::Register],
            outputs: &[ArtifactId::Resolved],
            invariants: "every use bound, use-site arity matches, no fan-in",
        },
        PassId::Expand => PassDescriptor {
            name: "expand",
            inputs: &[PassId::Resolve],
            outputs: &[ArtifactId::Graph],
            invariants: "flat graph of primitives, recursion cut at max depth",
        },
        PassId::Check => PassDescriptor {
            name: "check",
            inputs: &[PassId::Expand],
            outputs: &[ArtifactId::Checked],
            invariants: "every port connected as declared",
        },
        PassId::Infer => PassDescriptor {
            name: "infer",
            inputs: &[PassId::Check],
            outputs: &[ArtifactId::Signature],
            invariants: "no wire both carries and excludes a generator",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order.
pub const ALL_PASSES: [PassId; 5] = [
    PassId::Register,
    PassId::Resolve,
    PassId::Expand,
    PassId::Check,
    PassId::Infer,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
