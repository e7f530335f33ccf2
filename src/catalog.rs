use log::warn;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// One downloadable patch archive belonging to a catalog entry.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileEntry {
    pub remote_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FileEntry {
    pub fn display_path(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.name)
    }

    pub fn display_size(&self) -> String {
        match self.size_bytes {
            Some(bytes) => format_size(bytes),
            None => "unknown".to_string(),
        }
    }
}

/// One patchable game as published in the catalog. Immutable once parsed;
/// the whole catalog is replaced on the next sync.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PatchCatalogEntry {
    pub app_id: u32,
    pub developer: String,
    pub game_name: String,
    pub files: Vec<FileEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CatalogMetadata {
    pub version: Option<String>,
    pub recent_changes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Catalog {
    pub entries: Vec<PatchCatalogEntry>,
    pub metadata: CatalogMetadata,
}

impl Catalog {
    pub fn entry_for(&self, app_id: u32) -> Option<&PatchCatalogEntry> {
        self.entries.iter().find(|entry| entry.app_id == app_id)
    }
}

#[derive(Debug, Error)]
#[error("catalog parse failed: {0}")]
pub struct CatalogParseError(String);

/// Parse the published catalog JSON. The feed is loosely typed, so every
/// game entry is validated individually: a malformed entry is logged and
/// dropped without failing the rest of the catalog.
///
/// Two shapes are accepted: the full feed with a `developers` wrapper and
/// per-developer `games` maps, and the flat shape where top-level keys are
/// developer names mapping game names straight to entries.
pub fn parse_catalog(raw: &str) -> Result<Catalog, CatalogParseError> {
    let root: Value =
        serde_json::from_str(raw).map_err(|err| CatalogParseError(err.to_string()))?;
    let root = root
        .as_object()
        .ok_or_else(|| CatalogParseError("top level is not an object".to_string()))?;

    let metadata = root
        .get("metadata")
        .map(parse_metadata)
        .unwrap_or_default();

    let developers: Box<dyn Iterator<Item = (&String, &Value)>> = match root.get("developers") {
        Some(Value::Object(map)) => Box::new(map.iter()),
        Some(_) => {
            return Err(CatalogParseError(
                "developers key is not an object".to_string(),
            ))
        }
        None => Box::new(root.iter().filter(|(key, _)| key.as_str() != "metadata")),
    };

    let mut entries = Vec::new();
    for (developer, dev_value) in developers {
        let Some(dev_map) = dev_value.as_object() else {
            warn!("catalog: developer {developer} is not an object, skipping");
            continue;
        };
        let games: Box<dyn Iterator<Item = (&String, &Value)>> = match dev_map.get("games") {
            Some(Value::Object(map)) => Box::new(map.iter()),
            _ => Box::new(dev_map.iter().filter(|(key, _)| key.as_str() != "id")),
        };
        for (game_name, game_value) in games {
            match parse_entry(developer, game_name, game_value) {
                Some(entry) => entries.push(entry),
                None => warn!("catalog: rejected entry {game_name} ({developer})"),
            }
        }
    }

    Ok(Catalog { entries, metadata })
}

fn parse_metadata(value: &Value) -> CatalogMetadata {
    let version = value
        .get("version")
        .and_then(Value::as_str)
        .map(str::to_string);
    let recent_changes = value
        .get("recent_changes")
        .and_then(Value::as_array)
        .map(|changes| {
            changes
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    CatalogMetadata {
        version,
        recent_changes,
    }
}

fn parse_entry(developer: &str, game_name: &str, value: &Value) -> Option<PatchCatalogEntry> {
    let map = value.as_object()?;
    let app_id = parse_app_id(map.get("appid")?)?;

    let mut files = Vec::new();
    if let Some(raw_files) = map.get("files").and_then(Value::as_array) {
        for raw in raw_files {
            match parse_file(raw) {
                Some(file) => files.push(file),
                None => warn!("catalog: rejected file entry in {game_name} ({developer})"),
            }
        }
    }

    Some(PatchCatalogEntry {
        app_id,
        developer: developer.to_string(),
        game_name: game_name.to_string(),
        files,
        publisher: string_field(map.get("publisher")),
        notes: string_field(map.get("notes")),
        store_status: string_field(map.get("store_status")),
        patch_version: string_field(map.get("patch_version")),
        last_updated: string_field(map.get("last_updated")),
    })
}

fn parse_file(value: &Value) -> Option<FileEntry> {
    let map = value.as_object()?;
    let remote_id = map.get("id")?.as_str()?.trim().to_string();
    if remote_id.is_empty() {
        return None;
    }
    let name = string_field(map.get("name")).unwrap_or_else(|| remote_id.clone());
    Some(FileEntry {
        remote_id,
        name,
        path: string_field(map.get("path")),
        size_bytes: map.get("size").and_then(parse_size_bytes),
        description: string_field(map.get("description")),
    })
}

fn string_field(value: Option<&Value>) -> Option<String> {
    let raw = value?.as_str()?.trim();
    if raw.is_empty() {
        return None;
    }
    Some(raw.to_string())
}

/// App ids appear both as numbers and as numeric strings in the feed.
fn parse_app_id(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|id| u32::try_from(id).ok()),
        Value::String(raw) => raw.trim().parse().ok(),
        _ => None,
    }
}

/// Sizes appear as raw byte counts or human strings like "199.7 MB".
pub fn parse_size_bytes(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(raw) => parse_size_string(raw),
        _ => None,
    }
}

fn parse_size_string(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("unknown") {
        return None;
    }
    if let Ok(bytes) = raw.parse::<u64>() {
        return Some(bytes);
    }
    for (suffix, multiplier) in [
        ("GB", 1024.0 * 1024.0 * 1024.0),
        ("MB", 1024.0 * 1024.0),
        ("KB", 1024.0),
    ] {
        if let Some(number) = raw.strip_suffix(suffix) {
            let value: f64 = number.trim().parse().ok()?;
            if value < 0.0 {
                return None;
            }
            return Some((value * multiplier) as u64);
        }
    }
    None
}

pub fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / 1024.0 / 1024.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_flat_catalog_shape() {
        let raw = r#"{"DevA": {"Game1": {"appid": 100, "files": [{"id":"f1","size":1024}]}}}"#;
        let catalog = parse_catalog(raw).unwrap();
        assert_eq!(catalog.entries.len(), 1);
        let entry = &catalog.entries[0];
        assert_eq!(entry.app_id, 100);
        assert_eq!(entry.developer, "DevA");
        assert_eq!(entry.game_name, "Game1");
        assert_eq!(entry.files.len(), 1);
        assert_eq!(entry.files[0].remote_id, "f1");
        assert_eq!(entry.files[0].size_bytes, Some(1024));
    }

    #[test]
    fn parses_wrapped_catalog_shape() {
        let raw = json!({
            "metadata": {"version": "2025-08-01", "recent_changes": ["Game1 - Update to f1"]},
            "developers": {
                "DevA": {
                    "id": "folder-1",
                    "games": {
                        "Game1": {
                            "id": "folder-2",
                            "appid": "100",
                            "publisher": "PubA",
                            "notes": "apply after updating",
                            "last_updated": "2025-07-30",
                            "files": [
                                {"id": "f1", "name": "patch.zip", "size": "1.5 MB", "path": "v2/patch.zip"}
                            ]
                        }
                    }
                }
            }
        })
        .to_string();

        let catalog = parse_catalog(&raw).unwrap();
        assert_eq!(catalog.metadata.version.as_deref(), Some("2025-08-01"));
        assert_eq!(catalog.metadata.recent_changes.len(), 1);
        let entry = &catalog.entries[0];
        assert_eq!(entry.app_id, 100);
        assert_eq!(entry.publisher.as_deref(), Some("PubA"));
        assert_eq!(entry.files[0].size_bytes, Some((1.5 * 1024.0 * 1024.0) as u64));
        assert_eq!(entry.files[0].display_path(), "v2/patch.zip");
    }

    #[test]
    fn rejects_malformed_entries_individually() {
        let raw = json!({
            "DevA": {
                "Broken": {"notes": "no appid"},
                "AlsoBroken": "not an object",
                "Good": {"appid": 7, "files": [{"id": "f1"}, {"size": 10}]}
            }
        })
        .to_string();

        let catalog = parse_catalog(&raw).unwrap();
        assert_eq!(catalog.entries.len(), 1);
        assert_eq!(catalog.entries[0].game_name, "Good");
        // The file entry without an id is dropped, the valid one survives.
        assert_eq!(catalog.entries[0].files.len(), 1);
    }

    #[test]
    fn rejects_non_object_root() {
        assert!(parse_catalog("[1, 2, 3]").is_err());
        assert!(parse_catalog("not json").is_err());
    }

    #[test]
    fn parses_size_strings() {
        assert_eq!(parse_size_string("199.7 MB"), Some((199.7f64 * 1024.0 * 1024.0) as u64));
        assert_eq!(parse_size_string("12.0 KB"), Some((12.0f64 * 1024.0) as u64));
        assert_eq!(parse_size_string("2048"), Some(2048));
        assert_eq!(parse_size_string("Unknown"), None);
        assert_eq!(parse_size_string(""), None);
    }
}
