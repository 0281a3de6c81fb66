use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{LibraryError, Result};

pub const DEFAULT_PREVIEW_MAX_CHARS: usize = 800;
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LibraryConfig {
    pub database_path: PathBuf,
    /// Base directory that relative legacy paths stored on book records are resolved against.
    pub legacy_root: PathBuf,
    pub uploads_dir: PathBuf,
    pub covers_dir: PathBuf,
    pub preview_max_chars: usize,
    pub chunk_size: usize,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("digital_library.db"),
            legacy_root: PathBuf::from("."),
            uploads_dir: PathBuf::from("uploads"),
            covers_dir: PathBuf::from("covers"),
            preview_max_chars: DEFAULT_PREVIEW_MAX_CHARS,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl LibraryConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            LibraryError::Config(format!("cannot read {}: {}", path.display(), err))
        })?;
        let config: LibraryConfig = serde_json::from_str(&raw).map_err(|err| {
            LibraryError::Config(format!("cannot parse {}: {}", path.display(), err))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(LibraryError::Config("chunk_size must be positive".to_string()));
        }
        if self.preview_max_chars == 0 {
            return Err(LibraryError::Config(
                "preview_max_chars must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn uploads_path(&self) -> PathBuf {
        self.legacy_root.join(&self.uploads_dir)
    }

    pub fn covers_path(&self) -> PathBuf {
        self.legacy_root.join(&self.covers_dir)
    }
}
