use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Result, SyncError};

const IMAGE_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".gif", ".bmp"];

/// One file picked up by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub file_name: String,
    pub path: PathBuf,
}

pub fn is_image_file(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// List the image files directly inside `dir`, sorted by name.
///
/// Subdirectories are not descended into. An empty result is not an error.
pub fn scan_directory(dir: &Path) -> Result<Vec<UploadTarget>> {
    if !dir.is_dir() {
        return Err(SyncError::InvalidDirectory(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let mut targets = Vec::new();
    let mut skipped = 0;

    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().to_string();
        if is_image_file(&file_name) {
            targets.push(UploadTarget { file_name, path });
        } else {
            skipped += 1;
        }
    }

    targets.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    debug!(
        "Scanned {}: {} images, {} other files",
        dir.display(),
        targets.len(),
        skipped
    );

    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_match_is_case_insensitive() {
        assert!(is_image_file("IMG_0001.JPG"));
        assert!(is_image_file("scan.Jpeg"));
        assert!(is_image_file("a.png"));
        assert!(is_image_file("b.gif"));
        assert!(is_image_file("c.BMP"));
        assert!(!is_image_file("notes.txt"));
        assert!(!is_image_file("photo.jpg.part"));
        assert!(!is_image_file("heic.heic"));
        assert!(!is_image_file("jpg"));
    }

    #[test]
    fn scan_is_flat_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.png"), b"png").unwrap();
        fs::write(dir.path().join("a.JPG"), b"jpg").unwrap();
        fs::write(dir.path().join("readme.md"), b"text").unwrap();
        fs::create_dir(dir.path().join("nested.jpg")).unwrap();
        fs::write(dir.path().join("nested.jpg").join("inner.jpg"), b"jpg").unwrap();

        let targets = scan_directory(dir.path()).unwrap();
        let names: Vec<_> = targets.iter().map(|t| t.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.JPG", "b.png"]);
        assert_eq!(targets[0].path, dir.path().join("a.JPG"));
    }

    #[test]
    fn empty_directory_yields_no_targets() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_directory(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn missing_directory_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        assert!(matches!(
            scan_directory(&missing),
            Err(SyncError::InvalidDirectory(_))
        ));

        let file = dir.path().join("file.jpg");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            scan_directory(&file),
            Err(SyncError::InvalidDirectory(_))
        ));
    }
}
