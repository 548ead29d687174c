//! Common test fixtures for autopack testing

use crate::TestDir;
use anyhow::Result;

/// Creates a small tree of text, binary and nested files
pub fn create_test_files(test_dir: &TestDir) -> Result<()> {
    test_dir.create_file("file1.txt", b"This is file 1 content.")?;
    test_dir.create_file("file2.txt", b"This is file 2 content.")?;

    test_dir.create_dir("subdir")?;
    test_dir.create_file("subdir/file3.txt", b"This is file 3 in subdir.")?;
    test_dir.create_dir("subdir/empty")?;

    test_dir.create_file("image.jpg", &[0xFF, 0xD8, 0xFF, 0xE0])?;
    test_dir.create_file("empty.dat", b"")?;

    Ok(())
}

/// Creates the test files plus content large enough to span many frames
pub fn create_archive_structure(test_dir: &TestDir) -> Result<()> {
    create_test_files(test_dir)?;

    test_dir.create_file("README.md", b"# Test Archive\n\nThis is a test archive.")?;
    test_dir.create_file(".hidden", b"dotfile")?;

    let large_content: Vec<u8> = (0..512 * 1024u32).map(|i| (i % 251) as u8).collect();
    test_dir.create_file("src/modules/large.bin", &large_content)?;
    test_dir.create_file("src/main.rs", b"fn main() {}")?;

    Ok(())
}

/// Creates files with distinct permission bits (Unix only)
#[cfg(unix)]
pub fn create_permission_structure(test_dir: &TestDir) -> Result<()> {
    test_dir.create_file_with_mode("bin/run.sh", b"#!/bin/sh\necho hi\n", 0o755)?;
    test_dir.create_file_with_mode("secret.key", b"hunter2", 0o600)?;
    test_dir.create_file_with_mode("shared.txt", b"shared", 0o664)?;
    Ok(())
}

/// Creates a symlink test structure (Unix only)
#[cfg(unix)]
pub fn create_symlink_structure(test_dir: &TestDir) -> Result<()> {
    test_dir.create_file("file1.txt", b"Original file")?;
    test_dir.create_dir("subdir")?;

    test_dir.create_symlink("link_to_file1.txt", "file1.txt")?;
    test_dir.create_symlink("subdir/link_to_parent_file.txt", "../file1.txt")?;
    test_dir.create_symlink("dangling", "does/not/exist")?;

    Ok(())
}
