//! Host capability check

use crate::{Error, Result};

/// Operating system on which auto-packing is refused
pub const UNSUPPORTED_OS: &str = "windows";

/// Fail with [`Error::UnsupportedPlatform`] on the unsupported host
pub fn check_platform(os: &str) -> Result<()> {
    if os == UNSUPPORTED_OS {
        return Err(Error::UnsupportedPlatform(os.to_string()));
    }
    Ok(())
}

pub(crate) fn current_os() -> &'static str {
    std::env::consts::OS
}
