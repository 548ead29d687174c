//! Common assertions for autopack testing

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Asserts that two directory trees hold the same entries
///
/// Entries are compared by relative path and type; regular files by
/// content and symlinks by their stored target. On Unix the permission
/// bits of regular files must match too.
pub fn assert_dirs_equal(dir1: &Path, dir2: &Path) -> Result<()> {
    let entries1 = collect_entries(dir1)?;
    let entries2 = collect_entries(dir2)?;

    assert_eq!(
        entries1, entries2,
        "Different entries under {:?} and {:?}",
        dir1, dir2
    );

    for relative in &entries1 {
        let path1 = dir1.join(relative);
        let path2 = dir2.join(relative);
        let meta1 = fs::symlink_metadata(&path1)?;
        let meta2 = fs::symlink_metadata(&path2)?;

        assert_eq!(
            meta1.file_type().is_dir(),
            meta2.file_type().is_dir(),
            "Directory mismatch for {:?}",
            relative
        );
        assert_eq!(
            meta1.file_type().is_symlink(),
            meta2.file_type().is_symlink(),
            "Symlink mismatch for {:?}",
            relative
        );

        if meta1.file_type().is_symlink() {
            assert_eq!(
                fs::read_link(&path1)?,
                fs::read_link(&path2)?,
                "Link target mismatch for {:?}",
                relative
            );
        } else if meta1.is_file() {
            assert_eq!(
                fs::read(&path1)?,
                fs::read(&path2)?,
                "Content mismatch for {:?}",
                relative
            );
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                assert_eq!(
                    meta1.permissions().mode() & 0o7777,
                    meta2.permissions().mode() & 0o7777,
                    "Permission mismatch for {:?}",
                    relative
                );
            }
        }
    }

    Ok(())
}

/// Asserts that a file has specific permissions (Unix only)
#[cfg(unix)]
pub fn assert_file_permissions(path: &Path, expected: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path)?;
    let mode = metadata.permissions().mode() & 0o777;

    assert_eq!(
        mode, expected,
        "Permission mismatch for {:?}: expected {:o}, got {:o}",
        path, expected, mode
    );

    Ok(())
}

/// Asserts that a directory exists and has nothing in it
pub fn assert_dir_empty(dir: &Path) -> Result<()> {
    let entries = collect_entries(dir)?;
    assert!(entries.is_empty(), "Expected {:?} to be empty, found {:?}", dir, entries);
    Ok(())
}

/// Relative paths of everything under `dir`, sorted
pub fn collect_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry?;
        entries.push(entry.path().strip_prefix(dir)?.to_path_buf());
    }
    entries.sort();
    Ok(entries)
}
