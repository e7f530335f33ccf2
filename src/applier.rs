use crate::{
    cache::{size_matches, ArchiveCache},
    catalog::FileEntry,
    download::ArchiveStore,
    extract::Extractor,
    worker::ApplyMessage,
};
use anyhow::Result;
use filetime::{set_file_mtime, FileTime};
use log::{info, warn};
use std::{
    fs,
    io::{BufReader, Read},
    path::{Path, PathBuf},
    sync::mpsc::Sender,
};
use thiserror::Error;
use walkdir::WalkDir;

/// Per-unit failure taxonomy. Each variant is terminal for its own file
/// only; sibling files in the same batch keep going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyFailure {
    #[error("download failed: {0}")]
    Download(String),
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("copy failed: {0}")]
    Copy(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub file: String,
    pub failure: ApplyFailure,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyResult {
    pub files_added: usize,
    pub files_overwritten: usize,
    pub files_skipped: usize,
    pub failures: Vec<FailureReport>,
}

impl ApplyResult {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Extensions the integrity tester understands.
const TESTABLE_EXTENSIONS: [&str; 3] = ["zip", "7z", "rar"];

pub struct Applier<'a> {
    store: &'a dyn ArchiveStore,
    extractor: &'a dyn Extractor,
    cache: &'a ArchiveCache,
    scratch_root: PathBuf,
}

impl<'a> Applier<'a> {
    pub fn new(
        store: &'a dyn ArchiveStore,
        extractor: &'a dyn Extractor,
        cache: &'a ArchiveCache,
        scratch_root: PathBuf,
    ) -> Self {
        Self {
            store,
            extractor,
            cache,
            scratch_root,
        }
    }

    /// Download, extract, and copy each selected patch file into the game
    /// directory. Sequential and per-file: a failure is recorded and the
    /// remaining files still run. Mutates the target in place, no rollback.
    pub fn apply(
        &self,
        files: &[FileEntry],
        target_dir: &Path,
        progress: Option<&Sender<ApplyMessage>>,
    ) -> ApplyResult {
        let mut result = ApplyResult::default();

        for file in files {
            let label = file.display_path().to_string();
            let archive = match self.ensure_local(file, progress) {
                Ok(archive) => archive,
                Err(failure) => {
                    warn!("{label}: {failure}");
                    result.failures.push(FailureReport {
                        file: label,
                        failure,
                    });
                    continue;
                }
            };

            send_status(progress, &label, "extracting");
            let scratch = self.scratch_root.join(format!("{}.extract", file.name));
            if let Err(failure) = self.extract_to_scratch(&archive, &scratch) {
                warn!("{label}: {failure}");
                result.failures.push(FailureReport {
                    file: label,
                    failure,
                });
                let _ = fs::remove_dir_all(&scratch);
                continue;
            }

            send_status(progress, &label, "applying");
            let before = (
                result.files_added,
                result.files_overwritten,
                result.files_skipped,
            );
            smart_copy(&scratch, target_dir, &mut result, progress);
            let _ = fs::remove_dir_all(&scratch);

            info!(
                "{label}: applied ({} added, {} overwritten, {} skipped)",
                result.files_added - before.0,
                result.files_overwritten - before.1,
                result.files_skipped - before.2
            );
            if let Some(tx) = progress {
                let _ = tx.send(ApplyMessage::FileFinished { file: label });
            }
        }

        result
    }

    /// Produce a local archive for this entry, reusing the cache when the
    /// cached copy passes the size and integrity checks.
    fn ensure_local(
        &self,
        file: &FileEntry,
        progress: Option<&Sender<ApplyMessage>>,
    ) -> Result<PathBuf, ApplyFailure> {
        let label = file.display_path();
        if let Some(entry) = self.cache.lookup(file) {
            match self.extractor.verify(&entry.local_path) {
                Ok(true) => {
                    send_status(progress, label, "using cached archive");
                    return Ok(entry.local_path);
                }
                Ok(false) => {
                    warn!("cached {} failed integrity test, re-downloading", file.name);
                    self.cache.evict(file);
                }
                Err(err) => return Err(ApplyFailure::Download(format!("{err:#}"))),
            }
        }

        send_status(progress, label, "downloading");
        let dest = self.cache.entry_path(file);
        if let Some(parent) = dest.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                return Err(ApplyFailure::Download(format!("create cache dir: {err}")));
            }
        }
        let written = self
            .store
            .fetch(&file.remote_id, &dest)
            .map_err(|err| ApplyFailure::Download(format!("{err:#}")))?;

        if !size_matches(written, file.size_bytes) {
            // The partial file stays in the cache for inspection.
            return Err(ApplyFailure::Download(format!(
                "size mismatch: expected {:?} bytes, got {written}",
                file.size_bytes
            )));
        }

        if is_testable_archive(&dest) {
            match self.extractor.verify(&dest) {
                Ok(true) => {}
                Ok(false) => {
                    return Err(ApplyFailure::Download(
                        "downloaded archive failed integrity test".to_string(),
                    ))
                }
                Err(err) => return Err(ApplyFailure::Download(format!("{err:#}"))),
            }
        }

        Ok(dest)
    }

    fn extract_to_scratch(&self, archive: &Path, scratch: &Path) -> Result<(), ApplyFailure> {
        if scratch.exists() {
            let _ = fs::remove_dir_all(scratch);
        }
        fs::create_dir_all(scratch)
            .map_err(|err| ApplyFailure::Extraction(format!("create scratch dir: {err}")))?;
        self.extractor
            .extract(archive, scratch)
            .map_err(|err| ApplyFailure::Extraction(format!("{err:#}")))
    }
}

fn is_testable_archive(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            TESTABLE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn send_status(progress: Option<&Sender<ApplyMessage>>, file: &str, detail: &str) {
    if let Some(tx) = progress {
        let _ = tx.send(ApplyMessage::Status {
            file: file.to_string(),
            detail: detail.to_string(),
        });
    }
}

/// Walk the extracted tree and merge it into the game directory: absent
/// destinations are added, differing ones overwritten, identical ones
/// skipped. "Differs" means size-then-byte-content comparison. Copy errors
/// are recorded per file and never stop the walk.
fn smart_copy(
    source: &Path,
    target: &Path,
    result: &mut ApplyResult,
    progress: Option<&Sender<ApplyMessage>>,
) {
    for entry in WalkDir::new(source)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_ignored_path(entry.path()))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                result.failures.push(FailureReport {
                    file: source.display().to_string(),
                    failure: ApplyFailure::Copy(format!("walk extracted tree: {err}")),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = match entry.path().strip_prefix(source) {
            Ok(rel) => rel.to_path_buf(),
            Err(err) => {
                result.failures.push(FailureReport {
                    file: entry.path().display().to_string(),
                    failure: ApplyFailure::Copy(format!("relative path: {err}")),
                });
                continue;
            }
        };
        let dest = target.join(&rel);
        let label = rel.display().to_string();

        let outcome = copy_one(entry.path(), &dest);
        match outcome {
            Ok(CopyOutcome::Added) => {
                result.files_added += 1;
                send_status(progress, &label, "added");
            }
            Ok(CopyOutcome::Overwritten) => {
                result.files_overwritten += 1;
                send_status(progress, &label, "overwritten");
            }
            Ok(CopyOutcome::Skipped) => {
                result.files_skipped += 1;
                send_status(progress, &label, "identical, skipped");
            }
            Err(err) => {
                result.failures.push(FailureReport {
                    file: label,
                    failure: ApplyFailure::Copy(err.to_string()),
                });
            }
        }
    }
}

enum CopyOutcome {
    Added,
    Overwritten,
    Skipped,
}

fn copy_one(source: &Path, dest: &Path) -> std::io::Result<CopyOutcome> {
    if dest.exists() {
        if files_identical(source, dest)? {
            return Ok(CopyOutcome::Skipped);
        }
        fs::copy(source, dest)?;
        preserve_mtime(source, dest);
        return Ok(CopyOutcome::Overwritten);
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, dest)?;
    preserve_mtime(source, dest);
    Ok(CopyOutcome::Added)
}

fn files_identical(a: &Path, b: &Path) -> std::io::Result<bool> {
    let meta_a = fs::metadata(a)?;
    let meta_b = fs::metadata(b)?;
    if meta_a.len() != meta_b.len() {
        return Ok(false);
    }

    let mut reader_a = BufReader::new(fs::File::open(a)?);
    let mut reader_b = BufReader::new(fs::File::open(b)?);
    let mut buf_a = [0u8; 8192];
    let mut buf_b = [0u8; 8192];
    loop {
        let filled_a = fill_buffer(&mut reader_a, &mut buf_a)?;
        let filled_b = fill_buffer(&mut reader_b, &mut buf_b)?;
        if filled_a != filled_b || buf_a[..filled_a] != buf_b[..filled_b] {
            return Ok(false);
        }
        if filled_a == 0 {
            return Ok(true);
        }
    }
}

/// Read until the buffer is full or the stream ends. A short `read` must
/// not desynchronize the chunk comparison above.
fn fill_buffer(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = reader.read(&mut buf[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

fn preserve_mtime(source: &Path, dest: &Path) {
    if let Ok(metadata) = fs::metadata(source) {
        if let Ok(modified) = metadata.modified() {
            let _ = set_file_mtime(dest, FileTime::from_system_time(modified));
        }
    }
}

fn is_ignored_path(path: &Path) -> bool {
    path.components().any(|component| {
        let part = component.as_os_str().to_string_lossy();
        part.eq_ignore_ascii_case("__MACOSX")
            || part.eq_ignore_ascii_case(".ds_store")
            || part.eq_ignore_ascii_case("thumbs.db")
    })
}
