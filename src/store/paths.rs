//! On-disk layout of one store namespace.
//!
//! ```text
//! <root>/
//!   scratch/      resolver work area, cleared per load
//!   cache/        the persisted payload (file or directory)
//!   state.json    discriminant + payload name, written last
//! ```

use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct StorePaths {
    root: PathBuf,
}

impl StorePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join("scratch")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join("state.json")
    }
}
