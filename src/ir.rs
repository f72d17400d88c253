#![allow(dead_code)]

/// Parsed metadata for one class in the loaded archive.
///
/// Records are immutable once parsing completes; every downstream component
/// refers to them through the archive index by internal name.
#[derive(Clone, Debug)]
pub(crate) struct ClassRecord {
    /// Internal (slash-separated) fully qualified name.
    pub(crate) name: String,
    pub(crate) kind: ClassKind,
    /// `None` for the root object type and module descriptors.
    pub(crate) super_name: Option<String>,
    /// Directly implemented interfaces, in declaration order.
    pub(crate) interfaces: Vec<String>,
    pub(crate) methods: Vec<MethodRecord>,
}

/// Class-or-interface tag derived from the access flags.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ClassKind {
    Class,
    Interface,
}

impl ClassRecord {
    pub(crate) fn is_interface(&self) -> bool {
        self.kind == ClassKind::Interface
    }

    /// First method declared under `name`, if any.
    ///
    /// Resolution is by name only; overloads of the same name collapse onto
    /// the earliest declaration.
    pub(crate) fn method_slot(&self, name: &str) -> Option<usize> {
        self.methods.iter().position(|method| method.name == name)
    }

    /// Dotted form of the internal name, as written to external artifacts.
    pub(crate) fn dotted_name(&self) -> String {
        self.name.replace('/', ".")
    }

    /// Simple name (text after the last package separator).
    pub(crate) fn simple_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// Parsed metadata for one declared method.
#[derive(Clone, Debug)]
pub(crate) struct MethodRecord {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    /// Type descriptors of runtime-visible annotations, e.g. `Lapp/web/GetMapping;`.
    pub(crate) annotations: Vec<String>,
    /// Call instructions in bytecode order.
    pub(crate) calls: Vec<CallSite>,
}

/// Call instruction extracted from a method body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum CallSite {
    /// invokevirtual / invokespecial / invokestatic / invokeinterface.
    Direct { owner: String, name: String },
    /// invokedynamic whose bootstrap arguments carry an implementation handle.
    Dynamic { owner: String, name: String },
    /// invokedynamic with no resolvable handle (string concatenation and
    /// similar synthetic bootstraps); never becomes an edge.
    Opaque,
}
