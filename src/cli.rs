use crate::{
    app::App,
    catalog::{format_size, FileEntry},
    steam,
    worker::ApplyMessage,
};
use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

enum CliCommand {
    List { filter: Option<String> },
    Sync,
    Files { app_id: u32 },
    Apply { app_id: u32, files: Vec<String> },
    Changes,
    Launch { app_id: u32 },
    ClearCache,
    Paths,
    Help,
    Version,
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, format) = parse_args(&args)?;

    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("patchkit v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliCommand::Launch { app_id } => steam::launch(app_id),
        command => {
            let mut app = App::initialize()?;
            run_command(&mut app, command, format)
        }
    }
}

fn parse_args(args: &[String]) -> Result<(CliCommand, OutputFormat)> {
    let mut format = OutputFormat::Text;
    let mut tokens: Vec<&str> = Vec::new();

    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--format" | "-f" => {
                let Some(value) = iter.next() else {
                    bail!("--format requires a value (text or json)");
                };
                format = OutputFormat::parse(value)
                    .ok_or_else(|| anyhow::anyhow!("unknown format: {value}"))?;
            }
            other => tokens.push(other),
        }
    }

    let command = match tokens.split_first() {
        None => CliCommand::List { filter: None },
        Some((&"list", rest)) => {
            let filter = parse_filter(rest)?;
            CliCommand::List { filter }
        }
        Some((&"sync", _)) => CliCommand::Sync,
        Some((&"files", rest)) => CliCommand::Files {
            app_id: parse_app_id(rest)?,
        },
        Some((&"apply", rest)) => {
            let app_id = parse_app_id(rest)?;
            let mut files = Vec::new();
            let mut rest = rest[1..].iter();
            while let Some(arg) = rest.next() {
                match *arg {
                    "--file" => match rest.next() {
                        Some(name) => files.push(name.to_string()),
                        None => bail!("--file requires a file name"),
                    },
                    other => bail!("unexpected argument: {other}"),
                }
            }
            CliCommand::Apply { app_id, files }
        }
        Some((&"changes", _)) => CliCommand::Changes,
        Some((&"launch", rest)) => CliCommand::Launch {
            app_id: parse_app_id(rest)?,
        },
        Some((&"clear-cache", _)) => CliCommand::ClearCache,
        Some((&"paths", _)) => CliCommand::Paths,
        Some((&"help", _)) | Some((&"--help", _)) | Some((&"-h", _)) => CliCommand::Help,
        Some((&"version", _)) | Some((&"--version", _)) | Some((&"-V", _)) => CliCommand::Version,
        Some((other, _)) => bail!("unknown command: {other} (try `patchkit help`)"),
    };

    Ok((command, format))
}

fn parse_filter(rest: &[&str]) -> Result<Option<String>> {
    match rest {
        [] => Ok(None),
        ["--filter", value] => Ok(Some(value.to_lowercase())),
        other => bail!("unexpected arguments: {}", other.join(" ")),
    }
}

fn parse_app_id(rest: &[&str]) -> Result<u32> {
    let Some(raw) = rest.first() else {
        bail!("expected a Steam app id");
    };
    raw.parse()
        .map_err(|_| anyhow::anyhow!("invalid app id: {raw}"))
}

fn run_command(app: &mut App, command: CliCommand, format: OutputFormat) -> Result<()> {
    match command {
        CliCommand::List { filter } => list_games(app, filter.as_deref(), format),
        CliCommand::Sync => sync_catalog(app),
        CliCommand::Files { app_id } => list_files(app, app_id, format),
        CliCommand::Apply { app_id, files } => apply_patches(app, app_id, &files),
        CliCommand::Changes => show_changes(app),
        CliCommand::ClearCache => {
            let removed = app.clear_cache()?;
            println!("Removed {removed} cached archive(s)");
            Ok(())
        }
        CliCommand::Paths => list_paths(app, format),
        // Handled before App construction.
        CliCommand::Help | CliCommand::Version | CliCommand::Launch { .. } => Ok(()),
    }
}

#[derive(Serialize)]
struct GameListItem {
    app_id: u32,
    name: String,
    developer: String,
    files: usize,
    install_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    patch_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_updated: Option<String>,
}

fn list_games(app: &App, filter: Option<&str>, format: OutputFormat) -> Result<()> {
    if app.catalog_changed {
        log::info!("catalog was refreshed during startup");
    }
    if let Some(reason) = &app.sync_fallback {
        eprintln!("warning: catalog may be stale ({reason})");
    }

    let items: Vec<GameListItem> = app
        .matched()
        .into_iter()
        .filter(|game| match filter {
            Some(filter) => game.entry.game_name.to_lowercase().contains(filter),
            None => true,
        })
        .map(|game| GameListItem {
            app_id: game.entry.app_id,
            name: game.entry.game_name.clone(),
            developer: game.entry.developer.clone(),
            files: game.entry.files.len(),
            install_path: game.install_path.display().to_string(),
            patch_version: game.entry.patch_version.clone(),
            last_updated: game.entry.last_updated.clone(),
        })
        .collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&items)?),
        OutputFormat::Text => {
            if items.is_empty() {
                println!("No installed games with available patches.");
                return Ok(());
            }
            println!("{:<8} {:<42} {:<24} {:>5}", "APPID", "GAME", "DEVELOPER", "FILES");
            for item in &items {
                println!(
                    "{:<8} {:<42} {:<24} {:>5}",
                    item.app_id,
                    truncate(&item.name, 42),
                    truncate(&item.developer, 24),
                    item.files
                );
            }
        }
    }
    Ok(())
}

fn sync_catalog(app: &mut App) -> Result<()> {
    let changed = app.resync()?;
    let version = app
        .catalog
        .metadata
        .version
        .clone()
        .unwrap_or_else(|| "unknown".to_string());
    if changed {
        println!("Catalog updated (version {version}, {} entries)", app.catalog.entries.len());
    } else {
        println!("Catalog already up to date (version {version})");
    }
    if let Some(reason) = &app.sync_fallback {
        eprintln!("warning: served from cache ({reason})");
    }
    Ok(())
}

#[derive(Serialize)]
struct FileListItem {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

fn list_files(app: &App, app_id: u32, format: OutputFormat) -> Result<()> {
    // Not being installed shouldn't hide what the catalog publishes.
    let entry = match app.find_match(app_id) {
        Some(game) => game.entry,
        None => match app.catalog.entry_for(app_id) {
            Some(entry) => {
                eprintln!("note: {} is not installed locally", entry.game_name);
                entry.clone()
            }
            None => bail!("app id {app_id} is not in the patch catalog"),
        },
    };

    let items: Vec<FileListItem> = entry
        .files
        .iter()
        .map(|file| FileListItem {
            name: file.name.clone(),
            path: file.path.clone(),
            size: file.display_size(),
            description: file.description.clone(),
        })
        .collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&items)?),
        OutputFormat::Text => {
            println!("{}: {} file(s)", entry.game_name, items.len());
            if let Some(notes) = &entry.notes {
                println!("Notes: {notes}");
            }
            for item in &items {
                println!("  {:<50} {:>12}", item.path.as_deref().unwrap_or(&item.name), item.size);
            }
        }
    }
    Ok(())
}

fn apply_patches(app: &mut App, app_id: u32, selected: &[String]) -> Result<()> {
    let Some(game) = app.find_match(app_id) else {
        bail!("app id {app_id} is not an installed game with patches");
    };
    if !game.install_path.is_dir() {
        bail!("game directory not found: {}", game.install_path.display());
    }

    let files: Vec<FileEntry> = if selected.is_empty() {
        game.entry.files.clone()
    } else {
        let mut picked = Vec::new();
        for name in selected {
            match game
                .entry
                .files
                .iter()
                .find(|file| file.name == *name || file.display_path() == name.as_str())
            {
                Some(file) => picked.push(file.clone()),
                None => bail!("no patch file named {name} for {}", game.entry.game_name),
            }
        }
        picked
    };
    if files.is_empty() {
        bail!("no patch files published for {}", game.entry.game_name);
    }

    let total: u64 = files.iter().filter_map(|file| file.size_bytes).sum();
    println!(
        "Applying {} file(s) ({}) to {}",
        files.len(),
        format_size(total),
        game.install_path.display()
    );

    app.start_apply(game.install_path.clone(), files)?;
    let result = app.drain_apply(|message| match message {
        ApplyMessage::Status { file, detail } => println!("  {file}: {detail}"),
        ApplyMessage::FileFinished { file } => println!("  {file}: done"),
        _ => {}
    })?;

    println!(
        "Done: {} added, {} overwritten, {} skipped, {} failed",
        result.files_added,
        result.files_overwritten,
        result.files_skipped,
        result.failures.len()
    );
    for failure in &result.failures {
        eprintln!("  FAILED {}: {}", failure.file, failure.failure);
    }
    if !result.is_clean() {
        bail!("{} file(s) failed; the game directory may be partially patched", result.failures.len());
    }
    Ok(())
}

fn show_changes(app: &App) -> Result<()> {
    let changes = &app.catalog.metadata.recent_changes;
    if changes.is_empty() {
        println!("No recent catalog changes.");
        return Ok(());
    }

    // Change lines look like "Game Name - detail"; group them by game.
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for change in changes {
        match change.split_once(" - ") {
            Some((game, detail)) => grouped
                .entry(game.to_string())
                .or_default()
                .push(detail.to_string()),
            None => grouped
                .entry("Miscellaneous".to_string())
                .or_default()
                .push(change.clone()),
        }
    }

    for (game, details) in grouped {
        println!("{game}:");
        for detail in details {
            println!("  - {detail}");
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct PathsOutput {
    data_dir: String,
    cache_dir: String,
    steam_root: Option<String>,
    catalog_url: String,
}

fn list_paths(app: &App, format: OutputFormat) -> Result<()> {
    let steam_root = app
        .config
        .steam_root
        .clone()
        .or_else(steam::find_steam_root);
    let output = PathsOutput {
        data_dir: app.data_dir.display().to_string(),
        cache_dir: app.cache_root().display().to_string(),
        steam_root: steam_root.map(|root| root.display().to_string()),
        catalog_url: app.config.catalog_url.clone(),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            println!("data dir:    {}", output.data_dir);
            println!("cache dir:   {}", output.cache_dir);
            println!(
                "steam root:  {}",
                output.steam_root.as_deref().unwrap_or("not found")
            );
            println!("catalog url: {}", output.catalog_url);
        }
    }
    Ok(())
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn print_help() {
    println!("patchkit: apply community patches to installed Steam games");
    println!();
    println!("USAGE: patchkit [--format text|json] <command>");
    println!();
    println!("COMMANDS:");
    println!("  list [--filter <substr>]        Installed games with available patches");
    println!("  files <appid>                   Patch files published for a game");
    println!("  apply <appid> [--file <name>]…  Download, extract, and apply patches");
    println!("  sync                            Refresh the patch catalog");
    println!("  changes                         Recent catalog changes");
    println!("  launch <appid>                  Launch the game through Steam");
    println!("  clear-cache                     Delete downloaded archives");
    println!("  paths                           Show resolved directories");
    println!("  help | version");
}
