use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::classfile;
use crate::ir::ClassRecord;

/// All classes parsed out of the root archive and its nested archives,
/// keyed by internal name. Owns every record; downstream components borrow.
pub(crate) struct ArchiveIndex {
    pub(crate) classes: BTreeMap<String, ClassRecord>,
}

impl ArchiveIndex {
    pub(crate) fn get(&self, name: &str) -> Option<&ClassRecord> {
        self.classes.get(name)
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub(crate) fn class_count(&self) -> usize {
        self.classes.len()
    }
}

/// Load every class reachable from the root archive, descending into nested
/// archives. One unreadable entry never aborts the load; the root archive
/// itself failing to open does.
pub(crate) fn load_archive(path: &Path) -> Result<ArchiveIndex> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

    let mut classes = BTreeMap::new();
    load_entries(&mut archive, &path.display().to_string(), &mut classes);
    Ok(ArchiveIndex { classes })
}

fn load_entries<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    source: &str,
    classes: &mut BTreeMap<String, ClassRecord>,
) {
    // Sorted entry order keeps the load deterministic regardless of how the
    // archive was assembled.
    let mut names = Vec::new();
    for index in 0..archive.len() {
        let Ok(entry) = archive.by_index(index) else {
            warn!("unreadable entry #{index} in {source}");
            continue;
        };
        if entry.is_dir() {
            continue;
        }
        names.push(entry.name().to_string());
    }
    names.sort();

    for name in names {
        if name.ends_with(".jar") {
            let Some(data) = read_entry(archive, source, &name) else {
                continue;
            };
            match ZipArchive::new(Cursor::new(data)) {
                Ok(mut nested) => {
                    load_entries(&mut nested, &format!("{source}:{name}"), classes);
                }
                Err(err) => warn!("skipping nested archive {source}:{name}: {err}"),
            }
        } else if name.ends_with(".class") && !name.ends_with("module-info.class") {
            let Some(data) = read_entry(archive, source, &name) else {
                continue;
            };
            if !classfile::has_class_magic(&data) {
                warn!("magic mismatch in class entry {source}:{name}");
                continue;
            }
            match classfile::parse_class(&data) {
                Ok(record) => {
                    if classes.insert(record.name.clone(), record).is_some() {
                        debug!("duplicate class entry {source}:{name}");
                    }
                }
                Err(err) => warn!("skipping malformed class {source}:{name}: {err:#}"),
            }
        }
    }
}

fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    source: &str,
    name: &str,
) -> Option<Vec<u8>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(err) => {
            warn!("failed to open entry {source}:{name}: {err}");
            return None;
        }
    };
    let mut data = Vec::new();
    if let Err(err) = entry.read_to_end(&mut data) {
        warn!("failed to read entry {source}:{name}: {err}");
        return None;
    }
    Some(data)
}
