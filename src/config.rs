use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

const DEFAULT_CATALOG_URL: &str =
    "https://raw.githubusercontent.com/d4rksp4rt4n/SteamGamePatcher/refs/heads/main/database/data/patches_database.json";
const DEFAULT_DOWNLOAD_URL_TEMPLATE: &str =
    "https://drive.usercontent.google.com/download?id={id}&export=download&confirm=t";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Overrides Steam root auto-detection when set.
    #[serde(default)]
    pub steam_root: Option<PathBuf>,
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
    /// URL for fetching one archive; `{id}` is replaced with the remote id.
    #[serde(default = "default_download_url_template")]
    pub download_url_template: String,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        let base_dir = base_data_dir()?;
        fs::create_dir_all(&base_dir).context("create app data dir")?;
        let path = base_dir.join("config.json");
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read app config")?;
            let config: AppConfig = serde_json::from_str(&raw).context("parse app config")?;
            return Ok(config);
        }

        let config = AppConfig {
            steam_root: None,
            catalog_url: default_catalog_url(),
            download_url_template: default_download_url_template(),
            cache_dir: None,
        };
        config.save()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let base_dir = base_data_dir()?;
        fs::create_dir_all(&base_dir).context("create app data dir")?;
        let path = base_dir.join("config.json");
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        fs::write(path, raw).context("write app config")?;
        Ok(())
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        let base = BaseDirs::new().context("resolve cache dir")?;
        Ok(base.cache_dir().join("patchkit").join("archives"))
    }
}

pub fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("patchkit"))
}

fn default_catalog_url() -> String {
    DEFAULT_CATALOG_URL.to_string()
}

fn default_download_url_template() -> String {
    DEFAULT_DOWNLOAD_URL_TEMPLATE.to_string()
}
