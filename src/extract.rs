use anyhow::{bail, Context, Result};
use filetime::{set_file_mtime, FileTime};
use log::debug;
use std::{
    fs, io,
    path::Path,
    process::{Command, Stdio},
};
use time::{Date, Month, PrimitiveDateTime, Time as TimeOfDay};

/// Subprocess-invoked archive extractor. The contract is "exit code 0 and
/// populated destination on success".
pub trait Extractor {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<()>;

    /// Integrity test. Returns `Ok(true)` when the archive passes or when
    /// no tester is available on this system.
    fn verify(&self, archive: &Path) -> Result<bool> {
        let _ = archive;
        Ok(true)
    }
}

/// Extracts via the `7z` binary (ZIP, 7Z, RAR, and self-extracting EXE all
/// go through it). When the binary is absent, ZIP and 7Z fall back to the
/// in-process decoders; RAR and EXE require the binary.
pub struct SevenZip;

impl Extractor for SevenZip {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest).context("create extraction dir")?;
        match extract_with_7z(archive, dest) {
            Ok(Some(())) => return Ok(()),
            Ok(None) => {}
            Err(err) => return Err(err),
        }

        let extension = archive
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "zip" => extract_zip(archive, dest),
            "7z" => sevenz_rust::decompress_file(archive, dest)
                .with_context(|| format!("extract 7z archive {archive:?}")),
            other => bail!("no 7z binary on PATH and no fallback for .{other} archives"),
        }
    }

    fn verify(&self, archive: &Path) -> Result<bool> {
        let output = Command::new("7z")
            .arg("t")
            .arg(archive)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output();

        let output = match output {
            Ok(output) => output,
            // No tester available; the extraction step will surface damage.
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(err).context("launch 7z"),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("7z t failed for {}: {}", archive.display(), stderr.trim());
            return Ok(false);
        }
        Ok(true)
    }
}

fn extract_with_7z(archive: &Path, dest: &Path) -> Result<Option<()>> {
    let result = Command::new("7z")
        .arg("x")
        .arg(archive)
        .arg(format!("-o{}", dest.display()))
        .args(["-y", "-mmt=on"])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output();

    let output = match result {
        Ok(output) => output,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).context("run 7z x"),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("7z exited with {}: {}", output.status, stderr.trim());
    }
    Ok(Some(()))
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let reader =
        fs::File::open(archive).with_context(|| format!("open {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(reader).context("read zip directory")?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).context("read zip entry")?;
        // Entries with absolute or parent-escaping names are dropped.
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).context("create extracted dir")?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).context("create extracted dir")?;
        }
        let mut out = fs::File::create(&out_path).context("create extracted file")?;
        io::copy(&mut entry, &mut out).context("write extracted file")?;

        if let Some(stamp) = entry.last_modified().and_then(zip_entry_mtime) {
            let _ = set_file_mtime(&out_path, stamp);
        }
    }
    Ok(())
}

fn zip_entry_mtime(dt: zip::DateTime) -> Option<FileTime> {
    let month = Month::try_from(dt.month()).ok()?;
    let date = Date::from_calendar_date(dt.year() as i32, month, dt.day()).ok()?;
    let time = TimeOfDay::from_hms(dt.hour(), dt.minute(), dt.second()).ok()?;
    let unix = PrimitiveDateTime::new(date, time).assume_utc().unix_timestamp();
    Some(FileTime::from_unix_time(unix, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    #[test]
    fn extracts_zip_without_external_binary() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("patch.zip");

        let file = fs::File::create(&archive_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("sub/readme.txt", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"hello").unwrap();
        writer.finish().unwrap();

        let dest = dir.path().join("out");
        extract_zip(&archive_path, &dest).unwrap();
        assert_eq!(fs::read(dest.join("sub/readme.txt")).unwrap(), b"hello");
    }

    #[test]
    fn zip_entries_escaping_the_destination_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("evil.zip");

        let file = fs::File::create(&archive_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("../outside.txt", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"nope").unwrap();
        writer.finish().unwrap();

        let dest = dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        extract_zip(&archive_path, &dest).unwrap();
        assert!(!dir.path().join("outside.txt").exists());
    }
}
