//! Managed folders: named storage locations created lazily per connection.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ExperimentError, Result};

/// A storage folder handed out by a [`FolderProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedFolder {
    name: String,
    connection: String,
    path: PathBuf,
}

impl ManagedFolder {
    /// Folder name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connection the folder lives on.
    pub fn connection(&self) -> &str {
        &self.connection
    }

    /// Local path of the folder.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Resolves folders by `(name, connection)`, creating them on first use.
pub trait FolderProvider: Send + Sync {
    /// Return the folder, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::TrackingStore`] if the folder cannot be created.
    fn get_or_create(&self, name: &str, connection: &str) -> Result<ManagedFolder>;
}

/// Maps folders to `<root>/<connection>/<name>` on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFolderProvider {
    root: PathBuf,
}

impl LocalFolderProvider {
    /// Provider rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FolderProvider for LocalFolderProvider {
    fn get_or_create(&self, name: &str, connection: &str) -> Result<ManagedFolder> {
        for (what, value) in [("folder name", name), ("connection", connection)] {
            if value.is_empty() || value.contains(['/', '\\']) || value == "." || value == ".." {
                return Err(ExperimentError::TrackingStore(format!(
                    "invalid {what} '{value}'"
                )));
            }
        }

        let path = self.root.join(connection).join(name);
        fs::create_dir_all(&path).map_err(|e| {
            ExperimentError::TrackingStore(format!(
                "cannot create folder {}: {e}",
                path.display()
            ))
        })?;
        debug!(folder = name, connection, path = %path.display(), "Managed folder ready");

        Ok(ManagedFolder {
            name: name.to_string(),
            connection: connection.to_string(),
            path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_folder_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalFolderProvider::new(dir.path());

        let folder = provider.get_or_create("mlruns", "filesystem_managed").unwrap();
        assert!(folder.path().is_dir());
        assert_eq!(folder.path(), dir.path().join("filesystem_managed").join("mlruns"));
        assert_eq!(folder.name(), "mlruns");

        // second call resolves to the same folder
        let again = provider.get_or_create("mlruns", "filesystem_managed").unwrap();
        assert_eq!(folder, again);
    }

    #[test]
    fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalFolderProvider::new(dir.path());
        assert!(provider.get_or_create("../escape", "conn").is_err());
        assert!(provider.get_or_create("runs", "").is_err());
    }
}
