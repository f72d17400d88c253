use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::archive::ArchiveIndex;
use crate::graph::{CallGraph, NodeId, ROOT};

/// The persisted per-class/per-method document: the one artifact crossing
/// the boundary to the instrumentation side.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub(crate) struct DistanceTree {
    pub(crate) classes: Vec<ClassEntry>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub(crate) struct ClassEntry {
    #[serde(rename = "type")]
    pub(crate) kind: EntryKind,
    /// Dotted fully qualified name.
    pub(crate) name: String,
    pub(crate) methods: Vec<MethodEntry>,
}

/// Tag union fixed by the artifact contract. `Root` is reserved for the
/// consuming side; the serializer skips the synthetic root.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum EntryKind {
    Class,
    Interface,
    Root,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub(crate) struct MethodEntry {
    pub(crate) name: String,
    /// `null` when the method lies on no call path to the target.
    pub(crate) distance: Option<u32>,
    pub(crate) calls: Vec<CallRef>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub(crate) struct CallRef {
    /// Dotted class name of the callee.
    pub(crate) name: String,
    pub(crate) method: String,
}

impl DistanceTree {
    /// Flatten the graph forward from the root into class entries, each
    /// method carrying its distance and immediate callees.
    pub(crate) fn build(graph: &CallGraph, archive: &ArchiveIndex) -> Self {
        let mut tree = DistanceTree::default();
        let mut queue = VecDeque::from([ROOT]);
        let mut visited: HashSet<NodeId> = HashSet::from([ROOT]);
        while let Some(id) = queue.pop_front() {
            let node = graph.node(id);
            for &callee in &node.callees {
                if visited.insert(callee) {
                    queue.push_back(callee);
                }
            }
            let Some(key) = &node.key else {
                continue;
            };
            let Some((class, method)) = key.resolve(archive) else {
                continue;
            };
            let kind = if class.is_interface() {
                EntryKind::Interface
            } else {
                EntryKind::Class
            };
            let class_index = tree.find_or_create_class(kind, class.dotted_name());
            let method_index =
                tree.classes[class_index].find_or_create_method(&method.name, node.distance);
            for &callee in &node.callees {
                let Some(callee_key) = &graph.node(callee).key else {
                    continue;
                };
                let Some((callee_class, callee_method)) = callee_key.resolve(archive) else {
                    continue;
                };
                tree.classes[class_index].methods[method_index]
                    .calls
                    .push(CallRef {
                        name: callee_class.dotted_name(),
                        method: callee_method.name.clone(),
                    });
            }
        }
        tree
    }

    fn find_or_create_class(&mut self, kind: EntryKind, name: String) -> usize {
        if let Some(index) = self
            .classes
            .iter()
            .position(|entry| entry.kind == kind && entry.name == name)
        {
            return index;
        }
        self.classes.push(ClassEntry {
            kind,
            name,
            methods: Vec::new(),
        });
        self.classes.len() - 1
    }

    pub(crate) fn save(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).context("serialize distance tree")?;
        writer
            .write_all(b"\n")
            .context("write distance tree trailing newline")?;
        Ok(())
    }

    /// Load a persisted tree, the first thing the instrumentation side does
    /// at startup.
    #[allow(dead_code)]
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file)).context("parse distance tree")
    }
}

impl ClassEntry {
    fn find_or_create_method(&mut self, name: &str, distance: Option<u32>) -> usize {
        if let Some(index) = self.methods.iter().position(|method| method.name == name) {
            return index;
        }
        self.methods.push(MethodEntry {
            name: name.to_string(),
            distance,
            calls: Vec::new(),
        });
        self.methods.len() - 1
    }
}

/// In-memory lookup the instrumentation side derives from a loaded tree to
/// decide what to instrument and which distance to tag on each hit.
#[allow(dead_code)]
pub(crate) struct DistanceIndex {
    distances: HashMap<(String, String), Option<u32>>,
}

#[allow(dead_code)]
impl DistanceIndex {
    pub(crate) fn from_tree(tree: &DistanceTree) -> Self {
        let mut distances = HashMap::new();
        for class in &tree.classes {
            for method in &class.methods {
                distances.insert((class.name.clone(), method.name.clone()), method.distance);
            }
        }
        Self { distances }
    }

    /// `None` when the method is not in the tree at all; `Some(None)` when
    /// it is known but off every path to the target.
    pub(crate) fn distance(&self, class: &str, method: &str) -> Option<Option<u32>> {
        self.distances
            .get(&(class.to_string(), method.to_string()))
            .copied()
    }

    /// Feedback value for one observed call of an instrumented method.
    pub(crate) fn hit(&self, class: &str, method: &str) -> Option<HitEvent> {
        self.distance(class, method).map(|distance| HitEvent {
            owner: class.to_string(),
            method: method.to_string(),
            distance,
        })
    }
}

/// One runtime hit as sent to the fuzz driver.
#[allow(dead_code)]
#[derive(Clone, Debug, Deserialize, Serialize)]
pub(crate) struct HitEvent {
    #[serde(rename = "class")]
    pub(crate) owner: String,
    pub(crate) method: String,
    pub(crate) distance: Option<u32>,
}
