use std::path::{Path, PathBuf};
use std::sync::Arc;

use fsg_store::FsBlockStore;
use fsg_types::IdentityCredential;
use tempfile::TempDir;

use crate::config::NodeConfig;
use crate::error::{NodeError, NodeResult};

const CONFIG_FILE: &str = "config.toml";
const IDENTITY_FILE: &str = "identity";
const BLOCKS_DIR: &str = "blocks";

/// Ephemeral on-disk repository for one node run.
///
/// Holds the node config, its identity credential and the block store.
/// The directory is removed when the repo is dropped.
pub struct Repo {
    dir: TempDir,
    store: Arc<FsBlockStore>,
}

impl Repo {
    /// Create a fresh repository in the system temp directory.
    pub fn create_temp(config: &NodeConfig, identity: &IdentityCredential) -> NodeResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix("fsg-repo")
            .tempdir()
            .map_err(|e| NodeError::io(std::env::temp_dir(), e))?;
        config.save(&dir.path().join(CONFIG_FILE))?;
        let identity_path = dir.path().join(IDENTITY_FILE);
        std::fs::write(&identity_path, identity.as_bytes())
            .map_err(|e| NodeError::io(&identity_path, e))?;
        let store = Arc::new(FsBlockStore::open(dir.path().join(BLOCKS_DIR))?);
        tracing::debug!(path = %dir.path().display(), "created repo");
        Ok(Self { dir, store })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.path().join(CONFIG_FILE)
    }

    pub fn store(&self) -> &Arc<FsBlockStore> {
        &self.store
    }

    pub fn load_config(&self) -> NodeResult<NodeConfig> {
        NodeConfig::load(&self.config_path())
    }

    pub fn load_identity(&self) -> NodeResult<IdentityCredential> {
        let path = self.dir.path().join(IDENTITY_FILE);
        let bytes = std::fs::read(&path).map_err(|e| NodeError::io(&path, e))?;
        Ok(IdentityCredential::new(bytes))
    }
}

impl std::fmt::Debug for Repo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repo").field("path", &self.dir.path()).finish()
    }
}
