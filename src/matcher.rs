use crate::{
    catalog::{Catalog, PatchCatalogEntry},
    steam::InstalledGame,
};
use std::{collections::HashMap, path::PathBuf};

/// A catalog entry joined with its local installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedGame {
    pub entry: PatchCatalogEntry,
    pub install_path: PathBuf,
}

/// Join the installed set against the catalog. Pure: one match per app id
/// present in both inputs, sorted by game name, no side effects.
pub fn match_installed(installed: &[InstalledGame], catalog: &Catalog) -> Vec<MatchedGame> {
    let by_app_id: HashMap<u32, &PathBuf> = installed
        .iter()
        .map(|game| (game.app_id, &game.install_path))
        .collect();

    let mut seen = std::collections::HashSet::new();
    let mut matches: Vec<MatchedGame> = catalog
        .entries
        .iter()
        .filter(|entry| seen.insert(entry.app_id))
        .filter_map(|entry| {
            by_app_id.get(&entry.app_id).map(|path| MatchedGame {
                entry: entry.clone(),
                install_path: (*path).clone(),
            })
        })
        .collect();

    matches.sort_by(|a, b| {
        a.entry
            .game_name
            .to_lowercase()
            .cmp(&b.entry.game_name.to_lowercase())
    });
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::parse_catalog;
    use std::path::Path;

    fn installed(app_ids: &[u32]) -> Vec<InstalledGame> {
        app_ids
            .iter()
            .map(|id| InstalledGame {
                app_id: *id,
                install_path: PathBuf::from(format!("/games/{id}")),
            })
            .collect()
    }

    #[test]
    fn matches_exactly_the_intersection() {
        let raw = r#"{
            "DevA": {
                "Zeta": {"appid": 100, "files": []},
                "Alpha": {"appid": 200, "files": []},
                "NotInstalled": {"appid": 300, "files": []}
            }
        }"#;
        let catalog = parse_catalog(raw).unwrap();
        let matches = match_installed(&installed(&[100, 200, 999]), &catalog);

        let names: Vec<&str> = matches
            .iter()
            .map(|game| game.entry.game_name.as_str())
            .collect();
        assert_eq!(names, vec!["Alpha", "Zeta"]);
        assert_eq!(matches[1].install_path, Path::new("/games/100"));
    }

    #[test]
    fn sorts_case_insensitively() {
        let raw = r#"{
            "DevA": {
                "beta": {"appid": 1, "files": []},
                "Alpha": {"appid": 2, "files": []},
                "GAMMA": {"appid": 3, "files": []}
            }
        }"#;
        let catalog = parse_catalog(raw).unwrap();
        let matches = match_installed(&installed(&[1, 2, 3]), &catalog);
        let names: Vec<&str> = matches
            .iter()
            .map(|game| game.entry.game_name.as_str())
            .collect();
        assert_eq!(names, vec!["Alpha", "beta", "GAMMA"]);
    }

    #[test]
    fn single_entry_catalog_yields_one_match_with_sized_file() {
        let raw = r#"{"DevA": {"Game1": {"appid": 100, "files": [{"id":"f1","size":1024}]}}}"#;
        let catalog = parse_catalog(raw).unwrap();
        let matches = match_installed(&installed(&[100]), &catalog);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].entry.game_name, "Game1");
        assert_eq!(matches[0].entry.files.len(), 1);
        assert_eq!(matches[0].entry.files[0].size_bytes, Some(1024));
    }

    #[test]
    fn empty_inputs_match_nothing() {
        let catalog = parse_catalog("{}").unwrap();
        assert!(match_installed(&installed(&[1]), &catalog).is_empty());
        let raw = r#"{"DevA": {"Game1": {"appid": 100, "files": []}}}"#;
        let catalog = parse_catalog(raw).unwrap();
        assert!(match_installed(&[], &catalog).is_empty());
    }
}
