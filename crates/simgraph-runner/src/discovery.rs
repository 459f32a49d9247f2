//! Scans the experiments directory for definition files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::graph::{LaunchMode, AGGREGATE_STEM};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExperimentDescriptor {
    /// File stem as found on disk; also names the matching effects file.
    pub name: String,
    pub definition_path: PathBuf,
}

impl ExperimentDescriptor {
    /// Stem with its first character upper-cased, used in task identifiers.
    pub fn capitalized_name(&self) -> String {
        capitalize(&self.name)
    }
}

pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Lists definition files with the given extension directly inside `dir`,
/// sorted by name. A missing directory yields no experiments.
pub fn discover(dir: &Path, extension: &str) -> Result<Vec<ExperimentDescriptor>> {
    if !dir.is_dir() {
        tracing::debug!(dir = %dir.display(), "experiments directory absent");
        return Ok(Vec::new());
    }
    let mut found: Vec<ExperimentDescriptor> = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| Error::Discovery {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some(extension) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            tracing::warn!(path = %path.display(), "skipping definition with non UTF-8 name");
            continue;
        };
        found.push(ExperimentDescriptor {
            name: stem.to_string(),
            definition_path: path.to_path_buf(),
        });
    }
    found.sort_by(|a, b| a.name.cmp(&b.name));
    check_unique(&found)?;
    tracing::debug!(count = found.len(), dir = %dir.display(), "discovered experiments");
    Ok(found)
}

/// Two stems that capitalize to the same identifier would register the same
/// tasks, and a stem capitalizing to the aggregate name would shadow an aggregate.
fn check_unique(descriptors: &[ExperimentDescriptor]) -> Result<()> {
    let mut seen: BTreeMap<String, &Path> = BTreeMap::new();
    for d in descriptors {
        let key = d.capitalized_name();
        if key == AGGREGATE_STEM {
            return Err(Error::ReservedName {
                task: LaunchMode::Graphic.task_name(&key),
                path: d.definition_path.clone(),
            });
        }
        if let Some(first) = seen.insert(key.clone(), &d.definition_path) {
            return Err(Error::NameCollision {
                task: key,
                first: first.to_path_buf(),
                second: d.definition_path.clone(),
            });
        }
    }
    Ok(())
}
