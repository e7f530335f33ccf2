use crate::{
    applier::ApplyResult,
    cache::ArchiveCache,
    catalog::{Catalog, FileEntry},
    config::{self, AppConfig},
    matcher::{self, MatchedGame},
    steam::{self, InstalledGame},
    sync::{self, HttpCatalogRemote, SyncStore},
    worker::{self, ApplyMessage, ApplyRequest},
};
use anyhow::{bail, Context, Result};
use log::warn;
use std::{
    path::PathBuf,
    sync::mpsc::Receiver,
};

/// Explicit application state: configuration, the synced catalog, the scan
/// result, and the single apply slot. Passed to commands instead of living
/// in globals.
pub struct App {
    pub config: AppConfig,
    pub data_dir: PathBuf,
    pub catalog: Catalog,
    pub catalog_changed: bool,
    /// Why the catalog is stale, when the last sync fell back to cache.
    pub sync_fallback: Option<String>,
    pub installed: Vec<InstalledGame>,
    cache: ArchiveCache,
    apply_slot: Option<Receiver<ApplyMessage>>,
}

impl App {
    /// Load config, sync the catalog (degrading to the cached or empty
    /// catalog on failure), and scan Steam. Never fails on detection or
    /// sync problems; only on unusable local state.
    pub fn initialize() -> Result<Self> {
        let config = AppConfig::load_or_create()?;
        let data_dir = config::base_data_dir()?;
        let cache = ArchiveCache::open(config.cache_dir()?)?;

        let store = SyncStore::new(data_dir.clone());
        let remote = HttpCatalogRemote::new(config.catalog_url.clone());
        let (catalog, catalog_changed, sync_fallback) = match sync::sync(&remote, &store) {
            Ok(outcome) => (outcome.catalog, outcome.changed, outcome.fallback),
            Err(err) => {
                warn!("catalog unavailable: {err:#}");
                (Catalog::default(), false, Some(format!("{err:#}")))
            }
        };

        let installed = match config
            .steam_root
            .clone()
            .or_else(steam::find_steam_root)
        {
            Some(root) => steam::scan_installed(&root),
            None => {
                warn!("Steam installation not found; no games detected");
                Vec::new()
            }
        };

        Ok(Self {
            config,
            data_dir,
            catalog,
            catalog_changed,
            sync_fallback,
            installed,
            cache,
            apply_slot: None,
        })
    }

    /// The displayed list: installed ∩ catalog, sorted by game name.
    pub fn matched(&self) -> Vec<MatchedGame> {
        matcher::match_installed(&self.installed, &self.catalog)
    }

    pub fn find_match(&self, app_id: u32) -> Option<MatchedGame> {
        self.matched()
            .into_iter()
            .find(|game| game.entry.app_id == app_id)
    }

    /// Re-run the conditional sync and swap in the fresh catalog.
    pub fn resync(&mut self) -> Result<bool> {
        let store = SyncStore::new(self.data_dir.clone());
        let remote = HttpCatalogRemote::new(self.config.catalog_url.clone());
        let outcome = sync::sync(&remote, &store)?;
        self.catalog = outcome.catalog;
        self.catalog_changed = outcome.changed;
        self.sync_fallback = outcome.fallback;
        Ok(outcome.changed)
    }

    pub fn apply_in_flight(&self) -> bool {
        self.apply_slot.is_some()
    }

    /// Start the background apply. One operation at a time per instance;
    /// starting a second while one runs is refused, not queued.
    pub fn start_apply(&mut self, target_dir: PathBuf, files: Vec<FileEntry>) -> Result<()> {
        if self.apply_slot.is_some() {
            bail!("a patch operation is already in progress");
        }
        let request = ApplyRequest {
            files,
            target_dir,
            cache_root: self.cache.root().to_path_buf(),
            scratch_root: self.data_dir.join("scratch"),
            download_url_template: self.config.download_url_template.clone(),
        };
        self.apply_slot = Some(worker::spawn_apply(request));
        Ok(())
    }

    /// Block on the in-flight apply until it finishes, handing every
    /// progress message to the callback. Frees the slot on return.
    pub fn drain_apply(
        &mut self,
        mut on_message: impl FnMut(&ApplyMessage),
    ) -> Result<ApplyResult> {
        let rx = self
            .apply_slot
            .take()
            .context("no patch operation in progress")?;
        loop {
            let message = rx.recv().context("apply worker disconnected")?;
            on_message(&message);
            match message {
                ApplyMessage::Completed(result) => return Ok(result),
                ApplyMessage::Failed { error } => bail!("patch operation failed: {error}"),
                _ => {}
            }
        }
    }

    pub fn clear_cache(&self) -> Result<usize> {
        self.cache.clear()
    }

    pub fn cache_root(&self) -> &std::path::Path {
        self.cache.root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_app(root: &std::path::Path) -> App {
        App {
            config: AppConfig {
                steam_root: None,
                catalog_url: "http://localhost/catalog.json".to_string(),
                download_url_template: "http://localhost/files/{id}".to_string(),
                cache_dir: Some(root.join("cache")),
            },
            data_dir: root.join("data"),
            catalog: Catalog::default(),
            catalog_changed: false,
            sync_fallback: None,
            installed: Vec::new(),
            cache: ArchiveCache::open(root.join("cache")).unwrap(),
            apply_slot: None,
        }
    }

    #[test]
    fn only_one_apply_runs_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = test_app(dir.path());
        let target = dir.path().join("game");
        std::fs::create_dir_all(&target).unwrap();

        app.start_apply(target.clone(), Vec::new()).unwrap();
        assert!(app.apply_in_flight());
        assert!(app.start_apply(target.clone(), Vec::new()).is_err());

        let result = app.drain_apply(|_| {}).unwrap();
        assert_eq!(result, ApplyResult::default());
        assert!(!app.apply_in_flight());

        // The slot is free again once the previous run finished.
        app.start_apply(target, Vec::new()).unwrap();
        app.drain_apply(|_| {}).unwrap();
    }
}
