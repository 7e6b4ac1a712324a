//! Persisted result of a completed bootstrap
//!
//! Once the peers converged, the agreed directory is written to
//! `setup.json` in the working root. On restart its presence lets the
//! launcher go straight to running the cluster with the same identity.
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use starterd_api::PeerDirectory;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed setup file: {0}")]
    Format(#[from] serde_json::Error),
    #[error("setup describes an unfinished bootstrap")]
    Incomplete,
}

pub type SetupResult<T> = std::result::Result<T, SetupError>;

#[derive(Debug, Clone)]
pub struct SetupStore {
    path: PathBuf,
}

impl SetupStore {
    pub const FILE_NAME: &'static str = "setup.json";

    pub fn new(work_dir: &Path) -> Self {
        Self {
            path: work_dir.join(Self::FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored directory, `None` if nothing was stored yet
    pub fn load(&self) -> SetupResult<Option<PeerDirectory>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let directory: PeerDirectory = serde_json::from_slice(&bytes)?;
        if !directory.is_converged() {
            return Err(SetupError::Incomplete);
        }
        Ok(Some(directory))
    }

    /// Directory to resume with, if there's a usable one
    ///
    /// Anything wrong with the stored setup means a normal bootstrap.
    pub fn load_for_resume(&self) -> Option<PeerDirectory> {
        match self.load() {
            Ok(Some(directory)) => {
                info!(
                    path = %self.path.display(),
                    peers = directory.len(),
                    my_index = directory.my_index(),
                    "Found previous setup"
                );
                Some(directory)
            }
            Ok(None) => {
                debug!(path = %self.path.display(), "No previous setup");
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unusable setup file");
                None
            }
        }
    }

    /// Store `directory`
    ///
    /// Written to a temporary file first and then renamed into place.
    pub fn persist(&self, directory: &PeerDirectory) -> SetupResult<()> {
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_vec(directory)?)?;
        fs::rename(&tmp_path, &self.path)?;
        info!(path = %self.path.display(), "Setup saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converged() -> PeerDirectory {
        let mut directory = PeerDirectory::new(3);
        directory.init_self("localhost", "/w1/");
        directory.register("10.0.0.2", "/w/").unwrap();
        directory.register("10.0.0.3", "/w/").unwrap();
        directory.into_joined()
    }

    #[test]
    fn persist_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SetupStore::new(dir.path());

        assert!(store.load().unwrap().is_none());

        let directory = converged();
        store.persist(&directory).unwrap();

        let loaded = store.load_for_resume().unwrap();
        assert_eq!(loaded, directory);
        assert_eq!(loaded.my_index(), 2);
        assert!(!dir.path().join("setup.json.tmp").exists());
    }

    #[test]
    fn malformed_setup_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = SetupStore::new(dir.path());

        fs::write(store.path(), b"{\"Hosts\": [\"a\"").unwrap();
        assert!(matches!(store.load(), Err(SetupError::Format(_))));
        assert!(store.load_for_resume().is_none());
    }

    #[test]
    fn unfinished_setup_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = SetupStore::new(dir.path());

        let mut directory = PeerDirectory::new(3);
        directory.init_self("localhost", "/w/");
        store.persist(&directory).unwrap();

        assert!(matches!(store.load(), Err(SetupError::Incomplete)));
        assert!(store.load_for_resume().is_none());
    }
}
