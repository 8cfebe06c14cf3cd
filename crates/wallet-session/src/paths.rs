use directories::ProjectDirs;
use eyre::ContextCompat as _;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl SessionPaths {
    pub fn discover() -> eyre::Result<Self> {
        // Test/CI override knobs.
        if let (Ok(data_dir), Ok(config_dir)) = (
            std::env::var("WALLET_SESSION_DATA_DIR"),
            std::env::var("WALLET_SESSION_CONFIG_DIR"),
        ) {
            let data_dir = PathBuf::from(data_dir);
            return Ok(Self {
                config_dir: PathBuf::from(config_dir),
                log_file: data_dir.join("wallet-session.log.jsonl"),
                data_dir,
            });
        }

        let proj = ProjectDirs::from("", "", "wallet-session")
            .context("failed to resolve project dirs")?;
        let data_dir = proj.data_dir().to_path_buf();
        Ok(Self {
            config_dir: proj.config_dir().to_path_buf(),
            log_file: data_dir.join("wallet-session.log.jsonl"),
            data_dir,
        })
    }

    /// Everything under one root (`<root>/config`, `<root>/data`).
    pub fn in_dir(root: &Path) -> Self {
        let data_dir = root.join("data");
        Self {
            config_dir: root.join("config"),
            log_file: data_dir.join("wallet-session.log.jsonl"),
            data_dir,
        }
    }

    /// Stand-in for the remote registry when running locally.
    pub fn registry_dir(&self) -> PathBuf {
        self.data_dir.join("registry")
    }

    /// Device storage holding the cached selection.
    pub fn local_storage_file(&self) -> PathBuf {
        self.data_dir.join("local_storage.json")
    }

    pub fn ensure_private_dirs(&self) -> eyre::Result<()> {
        crate::fsutil::ensure_private_dir(&self.config_dir)?;
        crate::fsutil::ensure_private_dir(&self.data_dir)?;
        Ok(())
    }
}
