use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{BackingStore, FileBackingStore, MemoryBackingStore, Result};

fn default_spool_path() -> PathBuf {
    PathBuf::from("/var/spool/hermod")
}

/// The `spool` section of the configuration file.
///
/// ```ron
/// spool: File(path: "/var/spool/hermod"),
/// ```
///
/// `Memory` keeps everything in process memory and loses it on restart.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub enum SpoolConfig {
    File {
        #[serde(default = "default_spool_path")]
        path: PathBuf,
    },
    Memory,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self::File {
            path: default_spool_path(),
        }
    }
}

impl SpoolConfig {
    /// Validates the configuration and opens the store it describes.
    ///
    /// File stores are initialised here: their directories are created and any interrupted
    /// writes are cleaned up.
    ///
    /// # Errors
    /// If the path is unusable or the spool directory cannot be prepared.
    pub fn build(&self) -> Result<Arc<dyn BackingStore>> {
        match self {
            Self::File { path } => {
                let store = FileBackingStore::builder().path(path.clone()).build()?;
                store.init()?;
                Ok(Arc::new(store))
            }
            Self::Memory => Ok(Arc::new(MemoryBackingStore::new())),
        }
    }
}
