use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use super::error::DownloadError;

const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

/// Whether `path` starts with a local-file-header signature.
pub fn is_zip(path: &Path) -> io::Result<bool> {
    let mut head = [0u8; 4];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(&head == ZIP_MAGIC)
}

fn zip_error(archive: &Path, source: zip::result::ZipError) -> DownloadError {
    DownloadError::Zip {
        path: archive.display().to_string(),
        source,
    }
}

/// Unpack every entry of `archive` under `dir`. Entries whose names would
/// escape `dir` are skipped. Blocking; run it off the async runtime.
pub fn extract_archive(archive: &Path, dir: &Path) -> Result<Vec<PathBuf>, DownloadError> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file).map_err(|e| zip_error(archive, e))?;
    let mut written = Vec::with_capacity(zip.len());

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| zip_error(archive, e))?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            tracing::warn!("Skipping unsafe archive entry {:?}", entry.name());
            continue;
        };
        let out = dir.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut target = File::create(&out)?;
        io::copy(&mut entry, &mut target)?;
        written.push(out);
    }

    tracing::debug!(
        "Extracted {} files from {}",
        written.len(),
        archive.display()
    );
    Ok(written)
}

/// Extract `path` into `dir` and delete it when it is an archive (flagged
/// by the caller or detected by its signature). Returns how many files were
/// extracted, `None` when the payload was left as is.
pub fn unpack_if_archive(
    path: &Path,
    dir: &Path,
    flagged: bool,
) -> Result<Option<usize>, DownloadError> {
    if !flagged && !is_zip(path)? {
        return Ok(None);
    }
    let files = extract_archive(path, dir)?;
    fs::remove_file(path)?;
    Ok(Some(files.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        for (name, data) in entries {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_is_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        write_zip(&archive, &[("x.jpg", b"x")]);
        assert!(is_zip(&archive).unwrap());

        let plain = dir.path().join("b.jpg");
        fs::write(&plain, b"\xff\xd8\xff\xe0jpeg").unwrap();
        assert!(!is_zip(&plain).unwrap());

        let short = dir.path().join("c");
        fs::write(&short, b"PK").unwrap();
        assert!(!is_zip(&short).unwrap());
    }

    #[test]
    fn test_extract_archive_writes_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("batch.zip");
        write_zip(
            &archive,
            &[("IMG_0001.JPG", b"one"), ("sub/IMG_0002.HEIC", b"two")],
        );
        let out = dir.path().join("out");
        let files = extract_archive(&archive, &out).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(fs::read(out.join("IMG_0001.JPG")).unwrap(), b"one");
        assert_eq!(fs::read(out.join("sub/IMG_0002.HEIC")).unwrap(), b"two");
    }

    #[test]
    fn test_extract_skips_escaping_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("../evil.txt", b"no"), ("ok.jpg", b"yes")]);
        let out = dir.path().join("out");
        let files = extract_archive(&archive, &out).unwrap();
        assert_eq!(files, vec![out.join("ok.jpg")]);
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[test]
    fn test_unpack_if_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("batch.zip");
        write_zip(&archive, &[("a.jpg", b"a")]);
        assert_eq!(unpack_if_archive(&archive, dir.path(), false).unwrap(), Some(1));
        assert!(!archive.exists());
        assert!(dir.path().join("a.jpg").exists());

        let plain = dir.path().join("b.jpg");
        fs::write(&plain, b"jpeg").unwrap();
        assert_eq!(unpack_if_archive(&plain, dir.path(), false).unwrap(), None);
        assert!(plain.exists());
    }

    #[test]
    fn test_flagged_non_zip_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("batch.zip");
        fs::write(&bogus, b"not a zip").unwrap();
        let err = unpack_if_archive(&bogus, dir.path(), true).unwrap_err();
        assert!(matches!(err, DownloadError::Zip { .. }));
    }
}
