//! Packing a tree and unpacking the stream reproduces the tree

use anyhow::Result;
use autopack::{Behavior, Packer, StreamOptions, Unpacker};
use autopack_testing::assertions::assert_dirs_equal;
use autopack_testing::fixtures::create_archive_structure;
use autopack_testing::TestDir;
use std::io::{self, Read, Write};
use std::thread;

/// Pipe a packer straight into an unpacker in fixed-size pieces
fn transfer(packer: &mut Packer, unpacker: &mut Unpacker, piece: usize) -> Result<()> {
    let mut buf = vec![0u8; piece];
    loop {
        let n = packer.read(&mut buf)?;
        if n == 0 {
            break;
        }
        unpacker.write_all(&buf[..n])?;
    }
    packer.close()?;
    unpacker.close()?;
    Ok(())
}

fn round_trip(pack_as: Behavior, unpack_as: Behavior) -> Result<()> {
    let source = TestDir::new()?;
    create_archive_structure(&source)?;
    let dest = TestDir::new()?;

    let mut packer = Packer::new(source.path(), pack_as);
    let mut unpacker = Unpacker::new(dest.path(), unpack_as);
    transfer(&mut packer, &mut unpacker, 4096)?;

    assert_dirs_equal(source.path(), dest.path())?;
    Ok(())
}

#[test]
fn test_tar_round_trip() -> Result<()> {
    round_trip(Behavior::Tar, Behavior::Tar)
}

#[test]
fn test_tar_gz_round_trip() -> Result<()> {
    round_trip(Behavior::TarGZ, Behavior::TarGZ)
}

#[test]
fn test_auto_round_trip() -> Result<()> {
    round_trip(Behavior::Auto, Behavior::Auto)
}

#[test]
fn test_plain_tar_detected_by_auto_unpacker() -> Result<()> {
    round_trip(Behavior::Tar, Behavior::Auto)
}

#[test]
fn test_tiny_pieces_and_shallow_pipe() -> Result<()> {
    let source = TestDir::new()?;
    create_archive_structure(&source)?;
    let dest = TestDir::new()?;
    let options = StreamOptions {
        chunk_size: 700,
        pipe_depth: 1,
        compression_level: 1,
    };

    let mut packer = Packer::with_options(source.path(), Behavior::TarGZ, options);
    let mut unpacker = Unpacker::with_options(dest.path(), Behavior::Auto, options);
    transfer(&mut packer, &mut unpacker, 37)?;

    assert_dirs_equal(source.path(), dest.path())?;
    assert_eq!(unpacker.behavior(), Behavior::TarGZ);
    Ok(())
}

#[test]
fn test_io_copy_between_threads() -> Result<()> {
    let source = TestDir::new()?;
    create_archive_structure(&source)?;
    let dest = TestDir::new()?;
    let dest_path = dest.path().to_path_buf();

    let (tx, rx) = std::sync::mpsc::sync_channel::<Vec<u8>>(4);
    let consumer = thread::spawn(move || -> Result<()> {
        let mut unpacker = Unpacker::new(&dest_path, Behavior::Auto);
        for chunk in rx {
            unpacker.write_all(&chunk)?;
        }
        unpacker.close()?;
        Ok(())
    });

    let mut packer = Packer::new(source.path(), Behavior::Auto);
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = packer.read(&mut buf)?;
        if n == 0 {
            break;
        }
        tx.send(buf[..n].to_vec())?;
    }
    drop(tx);
    packer.close()?;
    consumer.join().expect("consumer panicked")?;

    assert_dirs_equal(source.path(), dest.path())?;
    Ok(())
}

#[cfg(unix)]
mod unix {
    use super::*;
    use autopack_testing::assertions::assert_file_permissions;
    use autopack_testing::fixtures::{create_permission_structure, create_symlink_structure};
    use std::fs;
    use std::path::PathBuf;

    #[test]
    fn test_permissions_survive() -> Result<()> {
        let source = TestDir::new()?;
        create_permission_structure(&source)?;
        let dest = TestDir::new()?;

        let mut packer = Packer::new(source.path(), Behavior::TarGZ);
        let mut unpacker = Unpacker::new(dest.path(), Behavior::Auto);
        io::copy(&mut packer, &mut unpacker)?;
        packer.close()?;
        unpacker.close()?;

        assert_file_permissions(&dest.path().join("bin/run.sh"), 0o755)?;
        assert_file_permissions(&dest.path().join("secret.key"), 0o600)?;
        assert_file_permissions(&dest.path().join("shared.txt"), 0o664)?;
        Ok(())
    }

    #[test]
    fn test_symlinks_are_stored_not_followed() -> Result<()> {
        let source = TestDir::new()?;
        create_symlink_structure(&source)?;
        let dest = TestDir::new()?;

        let mut packer = Packer::new(source.path(), Behavior::Tar);
        let mut unpacker = Unpacker::new(dest.path(), Behavior::Tar);
        transfer(&mut packer, &mut unpacker, 512)?;

        assert_dirs_equal(source.path(), dest.path())?;
        assert_eq!(
            fs::read_link(dest.path().join("subdir/link_to_parent_file.txt"))?,
            PathBuf::from("../file1.txt")
        );
        assert_eq!(
            fs::read_link(dest.path().join("dangling"))?,
            PathBuf::from("does/not/exist")
        );
        Ok(())
    }

    #[test]
    fn test_hard_links_inside_destination() -> Result<()> {
        use autopack_testing::helpers::TarBuilder;
        use std::os::unix::fs::MetadataExt;

        let archive = TarBuilder::new()
            .file("data/original.txt", b"shared body", 0o644)?
            .hard_link("data/alias.txt", "data/original.txt")?
            .build()?;
        let dest = TestDir::new()?;

        let mut unpacker = Unpacker::new(dest.path(), Behavior::Auto);
        unpacker.write_all(&archive)?;
        unpacker.close()?;

        let original = fs::metadata(dest.path().join("data/original.txt"))?;
        let alias = fs::metadata(dest.path().join("data/alias.txt"))?;
        assert_eq!(original.ino(), alias.ino());
        assert_eq!(fs::read(dest.path().join("data/alias.txt"))?, b"shared body");
        Ok(())
    }
}
