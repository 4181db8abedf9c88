//! ZIP assembly for completed batches.

use std::{fs::File, io};

use anyhow::{Context, Result};
use zip::{CompressionMethod, ZipWriter, write::FileOptions};

use crate::{sanitize::sanitize_filename, store::DownloadStore};

/// Packs the named files from the store into
/// `<sanitized label>_<timestamp>.zip` and returns the archive's filename.
/// Files that disappeared since download are skipped rather than failing the
/// whole archive.
pub fn build_zip(
    store: &DownloadStore,
    filenames: &[String],
    label: &str,
    timestamp: i64,
) -> Result<String> {
    let zip_name = format!("{}_{timestamp}.zip", sanitize_filename(label));
    let zip_path = store.root().join(&zip_name);

    let file =
        File::create(&zip_path).with_context(|| format!("creating {}", zip_path.display()))?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for name in filenames {
        let source_path = store.root().join(name);
        if !source_path.is_file() {
            continue;
        }
        writer
            .start_file(name.as_str(), options)
            .with_context(|| format!("adding {name} to {zip_name}"))?;
        let mut source = File::open(&source_path)
            .with_context(|| format!("opening {}", source_path.display()))?;
        io::copy(&mut source, &mut writer).with_context(|| format!("compressing {name}"))?;
    }

    writer.finish().context("finalizing zip archive")?;
    Ok(zip_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn zip_contains_existing_files_and_skips_missing() {
        let dir = TempDir::new().unwrap();
        let store = DownloadStore::new(dir.path());
        store.ensure().unwrap();
        fs::write(dir.path().join("one.mp3"), b"aaa").unwrap();
        fs::write(dir.path().join("two.mp3"), b"bbb").unwrap();

        let files = vec!["one.mp3".into(), "missing.mp3".into(), "two.mp3".into()];
        let zip_name = build_zip(&store, &files, "My Playlist", 1234).unwrap();
        assert_eq!(zip_name, "My Playlist_1234.zip");

        let archive_file = File::open(dir.path().join(&zip_name)).unwrap();
        let mut archive = zip::ZipArchive::new(archive_file).unwrap();
        assert_eq!(archive.len(), 2);
        assert!(archive.by_name("one.mp3").is_ok());
        assert!(archive.by_name("two.mp3").is_ok());
    }

    #[test]
    fn zip_label_is_sanitized() {
        let dir = TempDir::new().unwrap();
        let store = DownloadStore::new(dir.path());
        store.ensure().unwrap();
        let zip_name = build_zip(&store, &[], "a/b: c?", 7).unwrap();
        assert_eq!(zip_name, "a_b_ c__7.zip");
    }
}
