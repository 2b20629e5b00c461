use crate::config::SourceConfig;
use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// One COBOL source file: a top-level program or an included module (copybook)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUnit {
    /// Unit id (file name, e.g. `PAYROLL.cbl`)
    pub name: String,
    pub content: String,
    pub is_module: bool,
}

impl SourceUnit {
    pub fn program(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            is_module: false,
        }
    }

    pub fn module(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            is_module: true,
        }
    }

    pub fn is_program(&self) -> bool {
        !self.is_module
    }

    /// File name without extension
    pub fn stem(&self) -> &str {
        unit_stem(&self.name)
    }
}

pub(crate) fn unit_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// Reject unit sets where two units share an id
pub fn ensure_unique_names(units: &[SourceUnit]) -> Result<()> {
    let mut seen = HashSet::with_capacity(units.len());
    for unit in units {
        if !seen.insert(unit.name.as_str()) {
            return Err(OrchestratorError::DuplicateUnit(unit.name.clone()));
        }
    }
    Ok(())
}

/// Load every program and module under `root`, sorted by relative path.
///
/// Files with other extensions are ignored, unreadable files are skipped
/// with a warning, hidden directories are not entered.
pub fn load_units(root: &Path, sources: &SourceConfig) -> Result<Vec<SourceUnit>> {
    if !root.is_dir() {
        return Err(OrchestratorError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Source directory not found: {}", root.display()),
        )));
    }

    let mut paths = Vec::new();
    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
    });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let extension = entry
            .path()
            .extension()
            .map(|ext| ext.to_string_lossy().to_string())
            .unwrap_or_default();

        let is_module = if sources.is_program(&extension) {
            false
        } else if sources.is_module(&extension) {
            true
        } else {
            continue;
        };
        paths.push((entry.into_path(), is_module));
    }
    paths.sort();

    let mut units = Vec::with_capacity(paths.len());
    for (path, is_module) in paths {
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => continue,
        };
        let content = match std::fs::read(&path) {
            // Legacy sources are frequently not valid UTF-8
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                continue;
            }
        };
        debug!("Loaded {} ({} bytes)", path.display(), content.len());
        units.push(SourceUnit {
            name,
            content,
            is_module,
        });
    }

    info!(
        "Loaded {} units ({} programs, {} modules) from {}",
        units.len(),
        units.iter().filter(|u| u.is_program()).count(),
        units.iter().filter(|u| u.is_module).count(),
        root.display()
    );
    Ok(units)
}
