use std::collections::{HashSet, VecDeque};

use anyhow::{Result, bail};

use crate::archive::ArchiveIndex;
use crate::graph::{CallGraph, NodeId, ROOT};

/// The method whose distance is zero by definition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Target {
    /// Internal (slash-separated) class name.
    pub(crate) class: String,
    pub(crate) method: String,
}

impl Target {
    /// Parse a `fully.qualified.ClassName:methodName` specification.
    pub(crate) fn parse(spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.split(':').collect();
        if parts.len() != 2 || parts.iter().any(|part| part.is_empty()) {
            bail!("target must be fully.qualified.ClassName:methodName, got {spec:?}");
        }
        Ok(Self {
            class: parts[0].replace('.', "/"),
            method: parts[1].to_string(),
        })
    }

    pub(crate) fn dotted(&self) -> String {
        format!("{}:{}", self.class.replace('/', "."), self.method)
    }
}

/// Assign every node its shortest caller-distance to `target`.
///
/// The target is located by forward search from the root, then distances
/// relax backward along caller edges. Nodes on no path to the target keep
/// no distance. A target absent from the graph is fatal: without it the
/// whole analysis has nothing to report.
pub(crate) fn compute_distances(
    graph: &mut CallGraph,
    archive: &ArchiveIndex,
    target: &Target,
) -> Result<()> {
    let Some(target_id) = find_target(graph, archive, target) else {
        bail!("target {} not found in the call graph", target.dotted());
    };

    graph.node_mut(target_id).distance = Some(0);
    let mut queue = VecDeque::from([target_id]);
    while let Some(id) = queue.pop_front() {
        let Some(current) = graph.node(id).distance else {
            continue;
        };
        let callers = graph.node(id).callers.clone();
        for caller in callers {
            let candidate = current + 1;
            let node = graph.node_mut(caller);
            let improved = match node.distance {
                None => true,
                Some(existing) => candidate < existing,
            };
            // Re-enqueueing only on improvement keeps the relaxation finite
            // on cyclic graphs.
            if improved {
                node.distance = Some(candidate);
                queue.push_back(caller);
            }
        }
    }

    Ok(())
}

/// Breadth-first search forward from the root for the target method.
fn find_target(graph: &CallGraph, archive: &ArchiveIndex, target: &Target) -> Option<NodeId> {
    let mut queue = VecDeque::from([ROOT]);
    let mut visited: HashSet<NodeId> = HashSet::from([ROOT]);
    while let Some(id) = queue.pop_front() {
        let node = graph.node(id);
        if !node.is_root() {
            let matches = node.key.as_ref().is_some_and(|key| {
                key.class == target.class
                    && key
                        .resolve(archive)
                        .is_some_and(|(_, method)| method.name == target.method)
            });
            if matches {
                return Some(id);
            }
        }
        for &callee in &node.callees {
            if visited.insert(callee) {
                queue.push_back(callee);
            }
        }
    }
    None
}
