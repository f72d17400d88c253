use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::archive::ArchiveIndex;
use crate::graph::{CallGraph, NodeId, ROOT};

/// Render the call graph as a dot digraph, one line per callee edge.
/// Visualization only; nothing consumes this programmatically.
pub(crate) fn render(graph: &CallGraph, archive: &ArchiveIndex) -> String {
    let mut out = String::from("digraph G {\n");
    let mut queue = VecDeque::from([ROOT]);
    let mut visited: HashSet<NodeId> = HashSet::from([ROOT]);
    while let Some(id) = queue.pop_front() {
        let node = graph.node(id);
        for &callee in &node.callees {
            out.push_str(&format!(
                "    \"{}\" -> \"{}\";\n",
                label(graph, archive, id),
                label(graph, archive, callee)
            ));
            if visited.insert(callee) {
                queue.push_back(callee);
            }
        }
    }
    out.push_str("}\n");
    out
}

pub(crate) fn write(graph: &CallGraph, archive: &ArchiveIndex, path: &Path) -> Result<()> {
    fs::write(path, render(graph, archive))
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Abbreviated node label: simple class name, `(I)` prefix for interfaces.
fn label(graph: &CallGraph, archive: &ArchiveIndex, id: NodeId) -> String {
    let node = graph.node(id);
    let Some(key) = &node.key else {
        return "root".to_string();
    };
    match key.resolve(archive) {
        Some((class, method)) => {
            let prefix = if class.is_interface() { "(I)" } else { "" };
            format!("{prefix}{}::{}", class.simple_name(), method.name)
        }
        None => "?".to_string(),
    }
}
