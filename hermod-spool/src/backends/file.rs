use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use hermod_common::{Envelope, internal};
use hermod_tracing::traced;
use tokio::fs;

use crate::{
    Result, SpoolError, ValidationError,
    record::SpoolRecord,
    store::BackingStore,
    types::{RECORD_EXTENSION, SpooledMessageId},
};

/// Name of the dead-letter directory inside the spool.
const FAILED_DIR: &str = "failed";

/// Prefix marking in-progress writes. Never listed, and removed by [`FileBackingStore::init`].
const TEMP_PREFIX: &str = ".";
const TEMP_SUFFIX: &str = ".tmp";

const SENSITIVE_PREFIXES: [&str; 9] = [
    "/etc",
    "/bin",
    "/sbin",
    "/usr/bin",
    "/usr/sbin",
    "/boot",
    "/sys",
    "/proc",
    "/dev",
];

/// File-based backing store.
///
/// Each envelope is a single RON document named `<ULID>.ron` in the spool directory; the
/// dead-letter area is the `failed/` subdirectory.
///
/// Writes go to a hidden temporary file first and are then renamed into place, so a crash
/// mid-write never leaves a half-written record where the delivery engine can see it.
#[derive(Debug, Clone)]
pub struct FileBackingStore {
    path: PathBuf,
}

/// Builder for [`FileBackingStore`], validating the path on [`build`](Self::build).
#[derive(Debug, Default)]
pub struct FileBackingStoreBuilder {
    path: Option<PathBuf>,
}

impl FileBackingStoreBuilder {
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// # Errors
    /// If no path was given, or the path is unsafe to use as a spool.
    pub fn build(self) -> std::result::Result<FileBackingStore, ValidationError> {
        let path = self.path.ok_or_else(|| {
            ValidationError::InvalidConfiguration("a spool path is required".to_string())
        })?;
        FileBackingStore::validate_path(&path)?;
        Ok(FileBackingStore { path })
    }
}

impl FileBackingStore {
    #[must_use]
    pub fn builder() -> FileBackingStoreBuilder {
        FileBackingStoreBuilder::default()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rejects relative paths, `..` components, and system directories.
    fn validate_path(path: &Path) -> std::result::Result<(), ValidationError> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(ValidationError::ParentComponent(path.display().to_string()));
        }

        if !path.is_absolute() {
            return Err(ValidationError::NotAbsolute(path.display().to_string()));
        }

        if let Some(prefix) = SENSITIVE_PREFIXES
            .into_iter()
            .find(|prefix| path.starts_with(prefix))
        {
            return Err(ValidationError::SystemDirectory {
                prefix,
                path: path.display().to_string(),
            });
        }

        Ok(())
    }

    /// Creates the spool and dead-letter directories, and removes temporary files left behind
    /// by interrupted writes.
    ///
    /// # Errors
    /// If the directories cannot be created, or the path exists but is not a directory.
    pub fn init(&self) -> Result<()> {
        internal!("Initialising spool at {}", self.path.display());

        for dir in [self.path.clone(), self.failed_dir()] {
            if !dir.try_exists()? {
                internal!("{} does not exist, creating...", dir.display());
                std::fs::create_dir_all(&dir)?;
            } else if !dir.is_dir() {
                return Err(ValidationError::NotDirectory(dir.display().to_string()).into());
            }
        }

        let mut cleaned = 0;
        for dir in [self.path.clone(), self.failed_dir()] {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                if is_temporary(&entry.file_name().to_string_lossy()) {
                    std::fs::remove_file(entry.path())?;
                    cleaned += 1;
                }
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} interrupted writes from spool"
            );
        }

        Ok(())
    }

    fn failed_dir(&self) -> PathBuf {
        self.path.join(FAILED_DIR)
    }

    fn record_path(&self, id: &SpooledMessageId) -> PathBuf {
        self.path.join(id.filename())
    }

    fn failed_path(&self, id: &SpooledMessageId) -> PathBuf {
        self.failed_dir().join(id.filename())
    }

    /// Writes `envelope` to `target` through a temporary file in the same directory.
    async fn write_atomic(&self, target: &Path, envelope: &Envelope) -> Result<()> {
        let text = SpoolRecord::from(envelope).encode()?;

        let filename = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = target.with_file_name(format!("{TEMP_PREFIX}{filename}{TEMP_SUFFIX}"));

        fs::write(&temp, text).await?;
        if let Err(err) = fs::rename(&temp, target).await {
            if let Err(cleanup) = fs::remove_file(&temp).await {
                internal!(
                    level = WARN,
                    "Unable to remove temporary file {}: {cleanup}",
                    temp.display()
                );
            }
            return Err(err.into());
        }

        Ok(())
    }

    async fn read_from(&self, path: &Path, id: &SpooledMessageId) -> Result<Envelope> {
        let text = fs::read_to_string(path).await.map_err(|err| not_found(err, id))?;
        let mut envelope = SpoolRecord::decode(&text)?.into_envelope();
        envelope.set_location(id.to_string());
        Ok(envelope)
    }

    async fn list_in(&self, dir: &Path) -> Result<Vec<SpooledMessageId>> {
        let mut entries = fs::read_dir(dir).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            if let Some(id) = SpooledMessageId::from_filename(&filename.to_string_lossy()) {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }
}

fn is_temporary(filename: &str) -> bool {
    filename.starts_with(TEMP_PREFIX)
        && filename.ends_with(&format!(".{RECORD_EXTENSION}{TEMP_SUFFIX}"))
}

fn not_found(err: std::io::Error, id: &SpooledMessageId) -> SpoolError {
    if err.kind() == ErrorKind::NotFound {
        SpoolError::NotFound(*id)
    } else {
        SpoolError::Io(err)
    }
}

#[async_trait]
impl BackingStore for FileBackingStore {
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all), timing(precision = "ms"))]
    async fn write(&self, envelope: &Envelope) -> Result<SpooledMessageId> {
        let id = SpooledMessageId::generate();
        let path = self.record_path(&id);

        if fs::try_exists(&path).await? {
            return Err(SpoolError::Internal(format!("ULID collision detected: {id}")));
        }

        self.write_atomic(&path, envelope).await?;
        internal!(level = DEBUG, "Spooled message {id} to {}", path.display());

        Ok(id)
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip(self)), timing(precision = "ms"))]
    async fn list(&self) -> Result<Vec<SpooledMessageId>> {
        let ids = self.list_in(&self.path).await?;
        internal!(level = DEBUG, "Found {} messages in spool", ids.len());
        Ok(ids)
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(id = %id)), timing(precision = "ms"))]
    async fn read(&self, id: &SpooledMessageId) -> Result<Envelope> {
        self.read_from(&self.record_path(id), id).await
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(id = %id)), timing(precision = "ms"))]
    async fn update(&self, id: &SpooledMessageId, envelope: &Envelope) -> Result<()> {
        let path = self.record_path(id);
        if !fs::try_exists(&path).await? {
            return Err(SpoolError::NotFound(*id));
        }

        self.write_atomic(&path, envelope).await
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(id = %id)), timing(precision = "ms"))]
    async fn delete(&self, id: &SpooledMessageId) -> Result<()> {
        fs::remove_file(self.record_path(id))
            .await
            .map_err(|err| not_found(err, id))?;
        internal!(level = DEBUG, "Deleted message {id} from spool");
        Ok(())
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(id = %id)), timing(precision = "ms"))]
    async fn fail(&self, id: &SpooledMessageId, envelope: &Envelope) -> Result<()> {
        let source = self.record_path(id);
        if !fs::try_exists(&source).await? {
            return Err(SpoolError::NotFound(*id));
        }

        fs::create_dir_all(self.failed_dir()).await?;
        self.write_atomic(&self.failed_path(id), envelope).await?;
        fs::remove_file(&source).await?;

        internal!(level = WARN, "Moved message {id} to {}", self.failed_dir().display());
        Ok(())
    }

    async fn list_failed(&self) -> Result<Vec<SpooledMessageId>> {
        match self.list_in(&self.failed_dir()).await {
            Err(SpoolError::Io(err)) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            other => other,
        }
    }

    async fn read_failed(&self, id: &SpooledMessageId) -> Result<Envelope> {
        self.read_from(&self.failed_path(id), id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_names() {
        assert!(is_temporary(".01ARZ3NDEKTSV4RRFFQ69G5FAV.ron.tmp"));
        assert!(!is_temporary("01ARZ3NDEKTSV4RRFFQ69G5FAV.ron"));
        assert!(!is_temporary(".hidden"));
    }

    #[test]
    fn builder_requires_a_path() {
        assert!(matches!(
            FileBackingStore::builder().build(),
            Err(ValidationError::InvalidConfiguration(_))
        ));
    }
}
