use std::collections::BTreeMap;

use crate::archive::ArchiveIndex;

/// Inheritance and implementation relations derived from the loaded
/// classes in one pass after the archive load completes.
///
/// Keys and values only ever name classes present in the archive; platform
/// and library types referenced but not bundled never appear.
pub(crate) struct HierarchyIndex {
    /// class -> its superclass.
    extensions: BTreeMap<String, String>,
    /// superclass -> direct subclasses.
    inheritors: BTreeMap<String, Vec<String>>,
    /// interface -> implementing records, classes and interfaces alike.
    implementers: BTreeMap<String, Vec<String>>,
    /// interface -> concrete implementing classes only.
    concrete_implementers: BTreeMap<String, Vec<String>>,
}

impl HierarchyIndex {
    pub(crate) fn build(archive: &ArchiveIndex) -> Self {
        let mut inheritors: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut implementers: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for record in archive.classes.values() {
            if let Some(super_name) = &record.super_name {
                if super_name != "java/lang/Object" && archive.contains(super_name) {
                    inheritors
                        .entry(super_name.clone())
                        .or_default()
                        .push(record.name.clone());
                }
            }
            for interface in &record.interfaces {
                if archive.contains(interface) {
                    implementers
                        .entry(interface.clone())
                        .or_default()
                        .push(record.name.clone());
                }
            }
        }

        // Invert the subclass lists into the child -> parent map used by
        // inherited-method resolution.
        let mut extensions = BTreeMap::new();
        for (parent, children) in &inheritors {
            for child in children {
                extensions.insert(child.clone(), parent.clone());
            }
        }

        // Interface dispatch only ever lands on concrete classes.
        let mut concrete_implementers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (interface, records) in &implementers {
            let concrete: Vec<String> = records
                .iter()
                .filter(|name| archive.get(name).is_some_and(|record| !record.is_interface()))
                .cloned()
                .collect();
            if !concrete.is_empty() {
                concrete_implementers.insert(interface.clone(), concrete);
            }
        }

        Self {
            extensions,
            inheritors,
            implementers,
            concrete_implementers,
        }
    }

    pub(crate) fn superclass_of(&self, class: &str) -> Option<&str> {
        self.extensions.get(class).map(String::as_str)
    }

    #[allow(dead_code)]
    pub(crate) fn subclasses_of(&self, class: &str) -> &[String] {
        self.inheritors.get(class).map(Vec::as_slice).unwrap_or(&[])
    }

    #[allow(dead_code)]
    pub(crate) fn implementers_of(&self, interface: &str) -> &[String] {
        self.implementers
            .get(interface)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn concrete_implementers_of(&self, interface: &str) -> &[String] {
        self.concrete_implementers
            .get(interface)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
