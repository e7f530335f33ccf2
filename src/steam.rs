use anyhow::{Context, Result};
use log::{info, warn};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

/// A game found in a Steam library. Rebuilt on every scan, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledGame {
    pub app_id: u32,
    pub install_path: PathBuf,
}

/// Locate the Steam installation root from the usual per-user locations.
pub fn find_steam_root() -> Option<PathBuf> {
    let home = dirs_home()?;
    let candidates = [
        home.join(".local/share/Steam"),
        home.join(".steam/steam"),
        home.join(".var/app/com.valvesoftware.Steam/.local/share/Steam"),
    ];
    candidates
        .into_iter()
        .find(|candidate| candidate.join("steamapps").is_dir())
}

/// Enumerate installed games across every Steam library. Detection never
/// aborts: a missing root or a manifest that fails to parse is logged and
/// skipped, and the caller gets whatever could be read.
pub fn scan_installed(steam_root: &Path) -> Vec<InstalledGame> {
    let mut libraries = vec![steam_root.join("steamapps")];
    let vdf_path = steam_root.join("steamapps/libraryfolders.vdf");
    if vdf_path.exists() {
        match parse_library_paths(&vdf_path) {
            Ok(paths) => {
                for path in paths {
                    let steamapps = path.join("steamapps");
                    if steamapps.is_dir() && !libraries.contains(&steamapps) {
                        libraries.push(steamapps);
                    }
                }
            }
            Err(err) => warn!("skipping extra Steam libraries: {err:#}"),
        }
    }

    let mut installed: HashMap<u32, PathBuf> = HashMap::new();
    for library in libraries {
        let entries = match fs::read_dir(&library) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("unreadable Steam library {}: {err}", library.display());
                continue;
            }
        };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if !is_app_manifest(&path) {
                continue;
            }
            match read_app_manifest(&path, &library) {
                Some(game) => {
                    installed.entry(game.app_id).or_insert(game.install_path);
                }
                None => warn!("malformed app manifest {}", path.display()),
            }
        }
    }

    let mut games: Vec<InstalledGame> = installed
        .into_iter()
        .map(|(app_id, install_path)| InstalledGame {
            app_id,
            install_path,
        })
        .collect();
    games.sort_by_key(|game| game.app_id);
    info!("found {} installed Steam games", games.len());
    games
}

/// Ask Steam to launch the game. One-line delegation to the OS.
pub fn launch(app_id: u32) -> Result<()> {
    open::that(format!("steam://run/{app_id}")).context("launch via steam://run")
}

fn is_app_manifest(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    name.starts_with("appmanifest_") && name.ends_with(".acf")
}

fn read_app_manifest(path: &Path, library: &Path) -> Option<InstalledGame> {
    let stem = path.file_stem()?.to_str()?;
    let app_id: u32 = stem.strip_prefix("appmanifest_")?.parse().ok()?;

    let raw = fs::read_to_string(path).ok()?;
    let install_dir = raw.lines().find_map(|line| {
        if !line.contains("\"installdir\"") {
            return None;
        }
        let parts: Vec<&str> = line.split('"').collect();
        parts.get(3).map(|value| value.to_string())
    })?;

    let install_path = library.join("common").join(install_dir);
    if !install_path.is_dir() {
        return None;
    }
    Some(InstalledGame {
        app_id,
        install_path,
    })
}

fn parse_library_paths(path: &Path) -> Result<Vec<PathBuf>> {
    let raw = fs::read_to_string(path).context("read libraryfolders.vdf")?;
    let mut paths = Vec::new();

    for line in raw.lines() {
        let line = line.trim();
        if !line.contains("\"path\"") {
            continue;
        }

        let parts: Vec<&str> = line.split('"').collect();
        if parts.len() >= 4 {
            let path = parts[3].replace("\\\\", "\\");
            paths.push(PathBuf::from(path));
        }
    }

    Ok(paths)
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
