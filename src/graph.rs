use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use anyhow::{Result, bail};
use tracing::warn;

use crate::archive::ArchiveIndex;
use crate::config::AnalysisConfig;
use crate::hierarchy::HierarchyIndex;
use crate::ir::{CallSite, ClassRecord, MethodRecord};

/// Stable index of a node in the graph arena.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct NodeId(usize);

/// The synthetic root is always the first node of the arena.
pub(crate) const ROOT: NodeId = NodeId(0);

/// Identity of a method declaration: owning class plus the slot of the
/// record inside that class. Slots keep same-named overloads distinct even
/// though call resolution matches by name alone.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub(crate) struct MethodKey {
    pub(crate) class: String,
    pub(crate) slot: usize,
}

impl MethodKey {
    pub(crate) fn resolve<'a>(
        &self,
        archive: &'a ArchiveIndex,
    ) -> Option<(&'a ClassRecord, &'a MethodRecord)> {
        let class = archive.get(&self.class)?;
        let method = class.methods.get(self.slot)?;
        Some((class, method))
    }
}

/// One method (or the synthetic root) in the call graph. Neighbors are
/// relations, not ownership: edges are arena indices, so the cyclic graph
/// tears down with the arena.
pub(crate) struct Node {
    /// `None` only for the synthetic root.
    pub(crate) key: Option<MethodKey>,
    pub(crate) callers: Vec<NodeId>,
    pub(crate) callees: Vec<NodeId>,
    /// Caller-hops to the target; `None` until computed, and afterwards for
    /// nodes on no path to the target.
    pub(crate) distance: Option<u32>,
}

impl Node {
    pub(crate) fn is_root(&self) -> bool {
        self.key.is_none()
    }
}

/// Call graph over unique method identities.
pub(crate) struct CallGraph {
    nodes: Vec<Node>,
    registry: HashMap<MethodKey, NodeId>,
}

impl CallGraph {
    fn new() -> Self {
        let root = Node {
            key: None,
            callers: Vec::new(),
            callees: Vec::new(),
            distance: None,
        };
        Self {
            nodes: vec![root],
            registry: HashMap::new(),
        }
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    #[allow(dead_code)]
    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[allow(dead_code)]
    pub(crate) fn lookup(&self, key: &MethodKey) -> Option<NodeId> {
        self.registry.get(key).copied()
    }

    /// Reuse the node registered for `key` or create a fresh one, adding the
    /// caller/callee edge either way. At most one node ever exists per key,
    /// which is what lets cyclic call chains terminate: nodes are expanded
    /// once while edges accumulate freely.
    fn link_or_reuse(&mut self, from: NodeId, key: MethodKey) -> (NodeId, bool) {
        if let Some(&existing) = self.registry.get(&key) {
            self.add_edge(from, existing);
            return (existing, false);
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            key: Some(key.clone()),
            callers: Vec::new(),
            callees: Vec::new(),
            distance: None,
        });
        self.registry.insert(key, id);
        self.add_edge(from, id);
        (id, true)
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId) {
        self.nodes[from.0].callees.push(to);
        self.nodes[to.0].callers.push(from);
    }
}

/// Build the call graph: discover entry points satisfying `entry`, then
/// expand breadth-first, resolving each call site against the hierarchy.
///
/// Zero discovered entries leaves the graph as just the root (a warning,
/// not an error); an entry method that does not belong to its claimed class
/// aborts construction.
pub(crate) fn construct<F>(
    archive: &ArchiveIndex,
    hierarchy: &HierarchyIndex,
    config: &AnalysisConfig,
    entry: F,
) -> Result<CallGraph>
where
    F: Fn(&MethodRecord) -> bool,
{
    let mut builder = GraphBuilder {
        archive,
        hierarchy,
        config,
        graph: CallGraph::new(),
        expanded: HashSet::new(),
        reported_missing: BTreeSet::new(),
    };
    builder.run(entry)?;
    Ok(builder.graph)
}

struct GraphBuilder<'a> {
    archive: &'a ArchiveIndex,
    hierarchy: &'a HierarchyIndex,
    config: &'a AnalysisConfig,
    graph: CallGraph,
    /// Methods whose call sites have already been scanned.
    expanded: HashSet<MethodKey>,
    /// Missing call-target owners already diagnosed.
    reported_missing: BTreeSet<String>,
}

impl<'a> GraphBuilder<'a> {
    fn run<F>(&mut self, entry: F) -> Result<()>
    where
        F: Fn(&MethodRecord) -> bool,
    {
        let entries = self.discover_entries(&entry);
        self.validate_entries(&entries)?;
        if entries.is_empty() {
            warn!("no entry-point methods found; leaving the call graph empty");
            return Ok(());
        }

        let mut queue = VecDeque::new();
        for key in entries {
            let (id, created) = self.graph.link_or_reuse(ROOT, key.clone());
            if created {
                queue.push_back((id, key));
            }
        }

        while let Some((id, key)) = queue.pop_front() {
            if !self.expanded.insert(key.clone()) {
                continue;
            }
            let archive = self.archive;
            let Some((_, method)) = key.resolve(archive) else {
                continue;
            };
            for call in &method.calls {
                match call {
                    CallSite::Direct { owner, name } => {
                        for destination in self.resolve_direct(owner, name) {
                            let (callee, created) =
                                self.graph.link_or_reuse(id, destination.clone());
                            if created {
                                queue.push_back((callee, destination));
                            }
                        }
                    }
                    CallSite::Dynamic { owner, name } => {
                        if let Some(destination) = self.resolve_dynamic(&key.class, owner, name) {
                            let (callee, created) =
                                self.graph.link_or_reuse(id, destination.clone());
                            if created {
                                queue.push_back((callee, destination));
                            }
                        }
                    }
                    CallSite::Opaque => {}
                }
            }
        }

        Ok(())
    }

    /// Scan loaded classes for methods satisfying the entry predicate.
    ///
    /// A class without interfaces offers its own methods. A class with
    /// interfaces is matched through them: the marker may live only on the
    /// interface declaration (generated API stubs), so predicate hits on
    /// interface methods pull the same-named method from the implementing
    /// class.
    fn discover_entries<F>(&self, entry: &F) -> Vec<MethodKey>
    where
        F: Fn(&MethodRecord) -> bool,
    {
        let mut keys = Vec::new();
        for record in self.archive.classes.values() {
            if record.is_interface() || self.config.is_excluded(&record.name) {
                continue;
            }
            if record.interfaces.is_empty() {
                for (slot, method) in record.methods.iter().enumerate() {
                    if entry(method) {
                        keys.push(MethodKey {
                            class: record.name.clone(),
                            slot,
                        });
                    }
                }
            } else {
                for interface_name in &record.interfaces {
                    let Some(interface) = self.archive.get(interface_name) else {
                        continue;
                    };
                    for interface_method in &interface.methods {
                        if !entry(interface_method) {
                            continue;
                        }
                        if let Some(slot) = record.method_slot(&interface_method.name) {
                            keys.push(MethodKey {
                                class: record.name.clone(),
                                slot,
                            });
                        }
                    }
                }
            }
        }
        keys
    }

    /// Integrity check: every discovered entry must name a method its class
    /// actually declares.
    fn validate_entries(&self, entries: &[MethodKey]) -> Result<()> {
        for key in entries {
            if key.resolve(self.archive).is_none() {
                bail!(
                    "entry method slot {} does not belong to class {}",
                    key.slot,
                    key.class
                );
            }
        }
        Ok(())
    }

    /// Dispatch resolution for invokevirtual/special/static/interface sites.
    ///
    /// Interface dispatch fans out to every concrete implementer: the static
    /// over-approximation admits any registered implementation.
    fn resolve_direct(&mut self, owner: &str, name: &str) -> Vec<MethodKey> {
        let archive = self.archive;
        let Some(owner_record) = archive.get(owner) else {
            self.report_missing(owner);
            return Vec::new();
        };

        // A concrete owner declaring the method wins outright.
        if !owner_record.is_interface() {
            if let Some(slot) = owner_record.method_slot(name) {
                return vec![MethodKey {
                    class: owner_record.name.clone(),
                    slot,
                }];
            }
        }

        // Inherited definition: nearest superclass declaring the name.
        let mut current = owner_record.name.as_str();
        while let Some(super_name) = self.hierarchy.superclass_of(current) {
            let Some(super_record) = archive.get(super_name) else {
                break;
            };
            if let Some(slot) = super_record.method_slot(name) {
                return vec![MethodKey {
                    class: super_record.name.clone(),
                    slot,
                }];
            }
            current = super_name;
        }

        if owner_record.is_interface() {
            let targets = self.implementer_targets(&owner_record.name, name);
            if !targets.is_empty() {
                return targets;
            }
        }

        // The name may come from a transitively implemented interface;
        // interface hierarchies can be diamonds, hence the seen set.
        let mut queue: VecDeque<&str> = owner_record.interfaces.iter().map(String::as_str).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        while let Some(interface_name) = queue.pop_front() {
            if !seen.insert(interface_name) {
                continue;
            }
            let Some(interface) = archive.get(interface_name) else {
                continue;
            };
            if interface.method_slot(name).is_some() {
                return self.implementer_targets(&interface.name, name);
            }
            queue.extend(interface.interfaces.iter().map(String::as_str));
        }

        Vec::new()
    }

    /// Matching method of every concrete implementer of `interface`.
    fn implementer_targets(&self, interface: &str, name: &str) -> Vec<MethodKey> {
        self.hierarchy
            .concrete_implementers_of(interface)
            .iter()
            .filter_map(|implementer| {
                let record = self.archive.get(implementer)?;
                let slot = record.method_slot(name)?;
                Some(MethodKey {
                    class: record.name.clone(),
                    slot,
                })
            })
            .collect()
    }

    /// Resolution for invokedynamic sites whose bootstrap named a handle.
    fn resolve_dynamic(&mut self, current_class: &str, owner: &str, name: &str) -> Option<MethodKey> {
        if owner == current_class {
            let record = self.archive.get(current_class)?;
            let slot = record.method_slot(name)?;
            return Some(MethodKey {
                class: record.name.clone(),
                slot,
            });
        }
        let Some(record) = self.archive.get(owner) else {
            self.report_missing(owner);
            return None;
        };
        let slot = record.method_slot(name)?;
        Some(MethodKey {
            class: record.name.clone(),
            slot,
        })
    }

    fn report_missing(&mut self, owner: &str) {
        if self.config.is_platform(owner) {
            return;
        }
        if self.reported_missing.insert(owner.to_string()) {
            warn!("could not find class {owner} in the archive");
        }
    }
}
