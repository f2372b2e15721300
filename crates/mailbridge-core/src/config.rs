//! Local configuration provider.

use std::io;
use std::path::{Path, PathBuf};

use mailbridge_api::ClientConfig;
use tracing::{debug, info};

use crate::Result;

/// Application directory name under the platform data dir.
const APP_DIR: &str = "mailbridge";

/// Supplies the API configuration and local storage locations.
pub trait Configer: Send + Sync {
    /// API endpoint configuration.
    fn api_config(&self) -> ClientConfig;

    /// Directory holding the credential database.
    fn db_dir(&self) -> PathBuf;

    /// Directory holding the IMAP message cache.
    fn imap_cache_path(&self) -> PathBuf;

    /// Wipes all local state.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory exists but cannot be removed.
    fn clear_data(&self) -> Result<()>;
}

/// [`Configer`] rooted at one directory.
#[derive(Debug, Clone)]
pub struct DirConfig {
    root: PathBuf,
    api: ClientConfig,
}

impl DirConfig {
    /// Creates a configuration rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, api: ClientConfig) -> Self {
        Self {
            root: root.into(),
            api,
        }
    }

    /// Creates a configuration under the platform's local data directory.
    #[must_use]
    pub fn platform(api: ClientConfig) -> Self {
        let root = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        Self::new(root, api)
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the database and cache directories.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(self.db_dir())?;
        std::fs::create_dir_all(self.imap_cache_path())?;
        Ok(())
    }
}

fn remove_dir(path: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

impl Configer for DirConfig {
    fn api_config(&self) -> ClientConfig {
        self.api.clone()
    }

    fn db_dir(&self) -> PathBuf {
        self.root.join("db")
    }

    fn imap_cache_path(&self) -> PathBuf {
        self.root.join("cache").join("imap")
    }

    fn clear_data(&self) -> Result<()> {
        remove_dir(&self.db_dir())?;
        remove_dir(&self.root.join("cache"))?;
        info!("Cleared local data under {}", self.root.display());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn api() -> ClientConfig {
        ClientConfig::with_default_host("test").unwrap()
    }

    #[test]
    fn test_layout() {
        let config = DirConfig::new("/tmp/mb", api());
        assert_eq!(config.db_dir(), PathBuf::from("/tmp/mb/db"));
        assert_eq!(config.imap_cache_path(), PathBuf::from("/tmp/mb/cache/imap"));
        assert_eq!(config.api_config(), api());
    }

    #[test]
    fn test_platform_root_ends_with_app_dir() {
        let config = DirConfig::platform(api());
        assert!(config.root().ends_with(APP_DIR));
    }

    #[test]
    fn test_clear_data_removes_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let config = DirConfig::new(dir.path(), api());
        config.ensure_dirs().unwrap();
        std::fs::write(config.imap_cache_path().join("msg"), b"x").unwrap();

        config.clear_data().unwrap();

        assert!(!config.db_dir().exists());
        assert!(!config.imap_cache_path().exists());
        assert!(dir.path().exists());
    }

    #[test]
    fn test_clear_data_when_nothing_exists() {
        let dir = tempfile::tempdir().unwrap();
        let config = DirConfig::new(dir.path().join("missing"), api());
        config.clear_data().unwrap();
    }
}
