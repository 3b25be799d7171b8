//! Master key provider: the opaque secret store feeding AES key
//! derivation for the encrypted user file.
//!
//! The store itself is an external collaborator — pgvictoria only
//! requires that the same bytes are returned consistently across the
//! process lifetime of both the writer (an external encryption tool) and
//! the reader (this process). Two concrete adapters are provided for the
//! deployments most likely to actually wire one up.

use std::path::{Path, PathBuf};

use crate::error::{ConfigErrorKind, Error, Result};

/// Supplies the master key used to decrypt the user store.
pub trait MasterKeyProvider: Send + Sync {
    /// Fetch the master key bytes.
    fn get_master_key(&self) -> Result<Vec<u8>>;
}

/// Reads the master key from a file, trimming one trailing newline.
pub struct FileMasterKeyProvider {
    path: PathBuf,
}

impl FileMasterKeyProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MasterKeyProvider for FileMasterKeyProvider {
    fn get_master_key(&self) -> Result<Vec<u8>> {
        let mut bytes = std::fs::read(&self.path).map_err(|_| {
            Error::config(
                ConfigErrorKind::MasterKeyMissing,
                format!("master key file {} not found or unreadable", self.path.display()),
            )
        })?;
        while bytes.last() == Some(&b'\n') || bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        if bytes.is_empty() {
            return Err(Error::config(
                ConfigErrorKind::MasterKeyMissing,
                format!("master key file {} is empty", self.path.display()),
            ));
        }
        Ok(bytes)
    }
}

/// Reads the master key from an environment variable.
pub struct EnvMasterKeyProvider {
    var_name: String,
}

impl EnvMasterKeyProvider {
    pub fn new(var_name: impl Into<String>) -> Self {
        Self {
            var_name: var_name.into(),
        }
    }
}

impl MasterKeyProvider for EnvMasterKeyProvider {
    fn get_master_key(&self) -> Result<Vec<u8>> {
        std::env::var(&self.var_name).map(|s| s.into_bytes()).map_err(|_| {
            Error::config(
                ConfigErrorKind::MasterKeyMissing,
                format!("environment variable {} not set", self.var_name),
            )
        })
    }
}

/// Resolve the master key the same way the process entry point does:
/// prefer `PGVICTORIA_MASTER_KEY` if set, otherwise fall back to a
/// `master.key` file next to the configuration directory.
pub fn resolve(config_dir: &Path) -> Result<Vec<u8>> {
    let env_provider = EnvMasterKeyProvider::new("PGVICTORIA_MASTER_KEY");
    if let Ok(key) = env_provider.get_master_key() {
        return Ok(key);
    }

    let file_provider = FileMasterKeyProvider::new(config_dir.join("master.key"));
    file_provider.get_master_key()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_provider_trims_trailing_newline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("master.key");
        std::fs::write(&path, b"topsecret\n").expect("write");

        let provider = FileMasterKeyProvider::new(&path);
        assert_eq!(provider.get_master_key().expect("key"), b"topsecret");
    }

    #[test]
    fn file_provider_errors_on_missing_file() {
        let provider = FileMasterKeyProvider::new("/nonexistent/master.key");
        let err = provider.get_master_key().unwrap_err();
        assert!(matches!(
            err,
            Error::Config {
                kind: ConfigErrorKind::MasterKeyMissing,
                ..
            }
        ));
    }
}
