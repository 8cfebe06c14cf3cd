use crate::{config::SessionConfig, paths::SessionPaths};
use eyre::Context as _;
use std::{fs, path::PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

fn is_truthy_env(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn is_falsy_env(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

/// Apply `WALLET_SESSION_*` environment overrides on top of the file config.
fn apply_env_overrides(cfg: &mut SessionConfig) {
    fn env_trimmed(var: &str) -> Option<String> {
        std::env::var(var)
            .ok()
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    }

    if let Some(v) = env_trimmed("WALLET_SESSION_DEFAULT_NETWORK") {
        cfg.default_network = v;
    }
    if let Some(n) = env_trimmed("WALLET_SESSION_SWITCH_COOLDOWN_MS").and_then(|v| v.parse().ok())
    {
        cfg.network_switch_cooldown_ms = n;
    }
    if let Some(v) = env_trimmed("WALLET_SESSION_ANALYTICS") {
        if is_truthy_env(&v) {
            cfg.analytics_enabled = true;
        } else if is_falsy_env(&v) {
            cfg.analytics_enabled = false;
        }
    }
    if let Some(n) = env_trimmed("WALLET_SESSION_NAME_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        cfg.name_resolution_timeout_ms = n;
    }
}

impl ConfigStore {
    pub fn new(paths: &SessionPaths) -> Self {
        Self {
            path: paths.config_dir.join("config.toml"),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn load_or_init_default(&self) -> eyre::Result<SessionConfig> {
        if !self.path.exists() {
            let cfg = SessionConfig::default();
            self.save(&cfg)?;
            let mut cfg = cfg;
            apply_env_overrides(&mut cfg);
            return Ok(cfg);
        }

        let s = fs::read_to_string(&self.path).context("read config.toml")?;
        let mut cfg: SessionConfig = toml::from_str(&s).context("parse config.toml")?;
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    pub fn save(&self, cfg: &SessionConfig) -> eyre::Result<()> {
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_atomic(&self.path, s.as_bytes()).context("write config.toml")?;
        Ok(())
    }
}
