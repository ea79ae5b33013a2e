use crate::{
    config::{KeysplitConfig, RootKeySource},
    paths::KeysplitPaths,
};
use eyre::Context as _;
use std::{fs, path::PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

/// Apply environment variable overrides to the config.
fn apply_env_overrides(cfg: &mut KeysplitConfig) {
    /// Helper: if an env var is set and non-empty, apply `setter` with the trimmed value.
    fn apply_env(var: &str, setter: impl FnOnce(&str)) {
        if let Ok(u) = std::env::var(var) {
            let t = u.trim();
            if !t.is_empty() {
                setter(t);
            }
        }
    }

    apply_env("KEYSPLIT_DB_FILE", |v| {
        v.clone_into(&mut cfg.storage.db_file);
    });
    apply_env("KEYSPLIT_BLOB_DIR", |v| {
        v.clone_into(&mut cfg.storage.blob_dir);
    });
    apply_env("KEYSPLIT_ALLOWED_NETWORKS", |v| {
        cfg.custody.allowed_networks = v
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
    });
    apply_env("KEYSPLIT_ROOT_KEY_HEX", |_| {
        cfg.custody.root_key_source = RootKeySource::Env;
    });
}

impl ConfigStore {
    pub fn new(paths: &KeysplitPaths) -> Self {
        Self {
            path: paths.config_dir.join("config.toml"),
        }
    }

    pub fn load_or_init_default(&self) -> eyre::Result<KeysplitConfig> {
        if !self.path.exists() {
            let cfg = KeysplitConfig::default();
            self.save(&cfg)?;
            let mut effective = cfg;
            apply_env_overrides(&mut effective);
            return Ok(effective);
        }

        let s = fs::read_to_string(&self.path).context("read config.toml")?;
        let mut cfg: KeysplitConfig = toml::from_str(&s).context("parse config.toml")?;
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    pub fn save(&self, cfg: &KeysplitConfig) -> eyre::Result<()> {
        if let Some(parent) = self.path.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_string_atomic_restrictive(
            &self.path,
            &s,
            crate::fsutil::MODE_FILE_PRIVATE,
        )
        .context("write config.toml")?;
        Ok(())
    }
}
