use crate::ir::MethodRecord;

/// Knobs for entry-point discovery and missing-owner diagnostics.
///
/// Entry points are recognized through annotation markers on parsed method
/// metadata rather than a hard-coded framework, so the analysis works with
/// whatever marker set the surrounding toolchain uses.
#[derive(Clone, Debug)]
pub(crate) struct AnalysisConfig {
    /// Annotation descriptor suffixes that mark an entry-point method.
    pub(crate) entry_markers: Vec<String>,
    /// Internal-name prefixes never scanned for entry points (the tool's
    /// own support code shipped inside the archive).
    pub(crate) exclude_prefixes: Vec<String>,
    /// Internal-name prefixes treated as platform or library code when a
    /// call target is missing from the archive.
    pub(crate) platform_prefixes: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            entry_markers: vec!["Mapping;".to_string()],
            exclude_prefixes: Vec::new(),
            platform_prefixes: ["java/", "javax/", "jdk/", "sun/", "com/sun/", "kotlin/", "groovy/"]
                .iter()
                .map(|prefix| prefix.to_string())
                .collect(),
        }
    }
}

impl AnalysisConfig {
    pub(crate) fn is_excluded(&self, class_name: &str) -> bool {
        self.exclude_prefixes
            .iter()
            .any(|prefix| class_name.starts_with(prefix))
    }

    pub(crate) fn is_platform(&self, class_name: &str) -> bool {
        self.platform_prefixes
            .iter()
            .any(|prefix| class_name.starts_with(prefix))
    }

    /// Marker predicate over parsed method metadata.
    pub(crate) fn is_entry_method(&self, method: &MethodRecord) -> bool {
        method.annotations.iter().any(|annotation| {
            self.entry_markers
                .iter()
                .any(|marker| annotation.ends_with(marker))
        })
    }
}
