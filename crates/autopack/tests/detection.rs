//! Format detection through the unpacker's write path

use anyhow::Result;
use autopack::{Behavior, Error, Unpacker};
use autopack_testing::helpers::{garbage, gzip, TarBuilder};
use autopack_testing::TestDir;
use std::io::Write;

fn write_err(unpacker: &mut Unpacker, bytes: &[u8]) -> Error {
    let err = unpacker.write_all(bytes).unwrap_err();
    Error::from_io(&err).cloned().expect("autopack error inside io::Error")
}

#[test]
fn test_zip_is_recognized_but_not_implemented() -> Result<()> {
    let dest = TestDir::new()?;
    let mut unpacker = Unpacker::new(dest.path(), Behavior::Auto);

    let err = write_err(&mut unpacker, &[0x50, 0x4B, 0x03, 0x04, 0x14, 0x00]);
    assert!(matches!(err, Error::NotImplemented(Behavior::Zip)));
    assert_eq!(err.to_string(), "zip has not yet been implemented");

    // The error sticks.
    let again = write_err(&mut unpacker, b"more");
    assert!(matches!(again, Error::NotImplemented(Behavior::Zip)));
    Ok(())
}

#[test]
fn test_xz_is_recognized_but_not_implemented() -> Result<()> {
    let dest = TestDir::new()?;
    let mut unpacker = Unpacker::new(dest.path(), Behavior::Auto);

    let err = write_err(&mut unpacker, &[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00, 0x00]);
    assert!(matches!(err, Error::NotImplemented(Behavior::TarXZ)));
    Ok(())
}

#[test]
fn test_unrecognized_stream_fails_at_budget() -> Result<()> {
    let dest = TestDir::new()?;
    let mut unpacker = Unpacker::new(dest.path(), Behavior::Auto);
    let bytes = garbage(300);

    // Below the budget the bytes are only buffered.
    assert_eq!(unpacker.write(&bytes[..200])?, 200);
    let err = write_err(&mut unpacker, &bytes[200..]);
    assert!(matches!(err, Error::UnableToDetect));
    assert!(matches!(unpacker.close(), Err(Error::UnableToDetect)));
    Ok(())
}

#[test]
fn test_gzip_detected_from_two_bytes() -> Result<()> {
    let dest = TestDir::new()?;
    let archive = TarBuilder::new().file("x.txt", b"x", 0o644)?.build_gz()?;

    let mut unpacker = Unpacker::new(dest.path(), Behavior::Auto);
    assert_eq!(unpacker.write(&archive[..1])?, 1);
    assert_eq!(unpacker.behavior(), Behavior::Auto);
    assert_eq!(unpacker.write(&archive[1..2])?, 1);
    assert_eq!(unpacker.behavior(), Behavior::TarGZ);
    unpacker.write_all(&archive[2..])?;
    unpacker.close()?;

    assert_eq!(std::fs::read(dest.path().join("x.txt"))?, b"x");
    Ok(())
}

#[test]
fn test_configured_format_skips_detection() -> Result<()> {
    let dest = TestDir::new()?;
    let archive = TarBuilder::new().file("x.txt", b"x", 0o644)?.build()?;

    // Not gzip, but the caller said it was.
    let mut unpacker = Unpacker::new(dest.path(), Behavior::TarGZ);
    let result = unpacker.write_all(&archive).and_then(|_| unpacker.flush());
    let closed = unpacker.close();
    assert!(result.is_err() || closed.is_err());
    assert!(!dest.path().join("x.txt").exists());
    Ok(())
}

#[test]
fn test_close_before_any_bytes() -> Result<()> {
    let dest = TestDir::new()?;
    let mut unpacker = Unpacker::new(dest.path(), Behavior::Auto);
    let err = unpacker.close().unwrap_err();
    assert!(matches!(err, Error::Incomplete(_)));
    assert_eq!(err.to_string(), "Unpacker closed prior to any bytes written");
    Ok(())
}

#[test]
fn test_trailing_garbage_after_gzip_archive_is_ignored() -> Result<()> {
    let dest = TestDir::new()?;
    let mut archive = gzip(&TarBuilder::new().file("x.txt", b"x", 0o644)?.build()?)?;
    archive.extend(vec![0u8; 64 * 1024]);

    let mut unpacker = Unpacker::new(dest.path(), Behavior::Auto);
    for chunk in archive.chunks(1000) {
        assert_eq!(unpacker.write(chunk)?, chunk.len());
    }
    unpacker.close()?;
    assert!(dest.path().join("x.txt").exists());
    Ok(())
}
