use std::path::{Path, PathBuf};
use std::{env, fs};

use crate::error::Result;
use crate::store::Store;

pub const DATA_DIR_ENV: &str = "SOMNUS_DATA_DIR";

/// `~/.somnus`, falling back to the working directory when no home is set.
pub fn default_base_dir() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".somnus")
}

/// Where the daemon keeps its database, pidfile and config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Explicit path, else `SOMNUS_DATA_DIR`, else the default base dir.
    pub fn resolve(explicit: Option<&Path>) -> Self {
        let root = explicit
            .map(PathBuf::from)
            .or_else(|| env::var(DATA_DIR_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(default_base_dir);
        Self { root }
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("somnus.db")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.root.join("somnus.pid")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("somnus.toml")
    }

    /// Create the directory if needed and open the store inside it.
    pub fn open_store(&self) -> Result<Store> {
        fs::create_dir_all(&self.root)?;
        Store::open(&self.db_path())
    }
}
