//! Local export directory of deployable scripts.
//!
//! Each observed object is written to `<export_dir>/<schema>/<KIND>/<name>.sql`
//! with a `CREATE OR REPLACE` prefix, ready to be run against a database.
//! An absent or empty export directory marks the first run.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use sourcewatch_core::models::ObjectId;
use sourcewatch_core::normalize::deployable_script;

pub struct ExportDir {
    root: PathBuf,
}

impl ExportDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True when the directory does not exist or holds no entries.
    pub fn is_first_run(&self) -> Result<bool> {
        if !self.root.exists() {
            return Ok(true);
        }
        let mut entries = std::fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read export directory: {}", self.root.display()))?;
        Ok(entries.next().is_none())
    }

    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root).with_context(|| {
            format!("Failed to create export directory: {}", self.root.display())
        })
    }

    /// Write the deployable script for `id`, returning the file path.
    pub fn write(&self, id: &ObjectId, clean: &str) -> Result<PathBuf> {
        let path = self.root.join(id.relative_path());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(&path, deployable_script(clean))
            .with_context(|| format!("Failed to write export file: {}", path.display()))?;
        Ok(path)
    }
}
