//! Portal definition loading from TOML files.
//!
//! Definitions live under `portal-definitions/<category>/<target-id>.toml`.

use crate::{
    definition::PortalDefinition,
    error::{PortalError, Result},
};
use registra_core::{PortalsConfig, TargetId};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default directory name searched for at the workspace root.
pub const DEFAULT_DEFINITIONS_DIR: &str = "portal-definitions";

/// Loader for portal definitions from TOML files.
pub struct PortalLoader {
    /// Base directory containing portal definitions
    definitions_dir: PathBuf,
}

impl PortalLoader {
    /// Create a new loader with the given definitions directory.
    ///
    /// # Errors
    /// Returns error if the directory doesn't exist.
    pub fn new(definitions_dir: impl Into<PathBuf>) -> Result<Self> {
        let definitions_dir = definitions_dir.into();

        if !definitions_dir.is_dir() {
            return Err(PortalError::DirectoryNotFound {
                path: definitions_dir.display().to_string(),
            });
        }

        Ok(Self { definitions_dir })
    }

    /// Create a loader using the default definitions directory.
    ///
    /// Looks for `portal-definitions/` relative to the workspace root.
    ///
    /// # Errors
    /// Returns error if the default directory doesn't exist.
    pub fn with_default_dir() -> Result<Self> {
        let mut current_dir = std::env::current_dir()?;

        loop {
            let cargo_toml = current_dir.join("Cargo.toml");
            if let Ok(contents) = std::fs::read_to_string(&cargo_toml) {
                if contents.contains("[workspace]") {
                    return Self::new(current_dir.join(DEFAULT_DEFINITIONS_DIR));
                }
            }

            match current_dir.parent() {
                Some(parent) => current_dir = parent.to_path_buf(),
                None => break,
            }
        }

        Self::new(PathBuf::from(DEFAULT_DEFINITIONS_DIR))
    }

    /// Create a loader from configuration, falling back to the default directory.
    pub fn from_config(config: &PortalsConfig) -> Result<Self> {
        match &config.definitions_dir {
            Some(dir) => Self::new(dir),
            None => Self::with_default_dir(),
        }
    }

    /// Directory this loader reads from.
    #[must_use]
    pub fn definitions_dir(&self) -> &Path {
        &self.definitions_dir
    }

    /// Load a single portal definition by ID.
    ///
    /// # Errors
    /// Returns error if the definition file doesn't exist, can't be read, or is invalid.
    pub fn load(&self, target_id: &TargetId) -> Result<PortalDefinition> {
        let filename = format!("{}.toml", target_id.as_str());
        let path = Self::find_file(&self.definitions_dir, &filename)?.ok_or_else(|| {
            PortalError::NotFound {
                target_id: target_id.to_string(),
            }
        })?;

        let definition = Self::load_from_path(&path)?;
        if definition.id() != target_id {
            return Err(PortalError::ValidationError {
                target_id: target_id.to_string(),
                reason: format!(
                    "file {} declares id '{}'",
                    path.display(),
                    definition.id()
                ),
            });
        }
        definition.validate()?;

        debug!(
            target_id = %target_id,
            name = %definition.name(),
            "loaded portal definition"
        );

        Ok(definition)
    }

    /// Load all portal definitions from the definitions directory.
    ///
    /// Invalid definitions are logged as warnings and skipped.
    ///
    /// # Errors
    /// Returns error if the directory can't be read.
    pub fn load_all(&self) -> Result<Vec<PortalDefinition>> {
        let mut definitions = Vec::new();

        Self::walk(&self.definitions_dir, &mut definitions)?;

        info!(
            count = definitions.len(),
            dir = %self.definitions_dir.display(),
            "loaded portal definitions"
        );

        Ok(definitions)
    }

    fn walk(dir: &Path, definitions: &mut Vec<PortalDefinition>) -> Result<()> {
        let mut entries = std::fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort();

        for path in entries {
            if path.is_dir() {
                Self::walk(&path, definitions)?;
                continue;
            }
            if path.extension().and_then(|s| s.to_str()) != Some("toml") {
                continue;
            }

            match Self::load_from_path(&path).and_then(|d| d.validate().map(|()| d)) {
                Ok(definition) => definitions.push(definition),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping portal definition"
                    );
                }
            }
        }

        Ok(())
    }

    fn find_file(dir: &Path, filename: &str) -> Result<Option<PathBuf>> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.is_dir() {
                if let Some(found) = Self::find_file(&path, filename)? {
                    return Ok(Some(found));
                }
            } else if path.file_name().and_then(|s| s.to_str()) == Some(filename) {
                return Ok(Some(path));
            }
        }

        Ok(None)
    }

    /// Parse a portal definition from a specific file path without validating it.
    pub fn load_from_path(path: &Path) -> Result<PortalDefinition> {
        let contents = std::fs::read_to_string(path).map_err(|e| PortalError::LoadError {
            path: path.display().to_string(),
            source: Box::new(e),
        })?;

        toml::from_str(&contents).map_err(|e| PortalError::ParseError {
            path: path.display().to_string(),
            source: e,
        })
    }
}
