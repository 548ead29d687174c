//! Destination path guard for unpacking
//!
//! Entry names are first resolved lexically against the destination root,
//! so a name cannot escape through `..`. [`resolve_on_disk`] then walks the
//! directories that already exist below the root and refuses any that is a
//! symlink, so an entry cannot escape through a link an earlier entry made.

use crate::{Error, Result};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::error;

/// Resolve an archive entry name (or hard-link target) under `root`
///
/// The joined path is cleaned and must still start with the cleaned root.
/// Absolute names are rejected outright.
pub fn resolve_within(root: &Path, untrusted: &Path) -> Result<PathBuf> {
    let root = clean(root);

    if untrusted.has_root() || matches!(untrusted.components().next(), Some(Component::Prefix(_))) {
        error!(root = ?root, entry = ?untrusted, "Archive entry has an absolute path");
        return Err(Error::PathTraversal {
            entry: untrusted.to_path_buf(),
            resolved: untrusted.to_path_buf(),
        });
    }

    let resolved = clean(&root.join(untrusted));
    let inside = if root == Path::new(".") {
        !matches!(resolved.components().next(), Some(Component::ParentDir))
    } else {
        resolved.starts_with(&root)
    };
    if !inside {
        error!(root = ?root, entry = ?untrusted, resolved = ?resolved, "Archive entry escapes destination");
        return Err(Error::PathTraversal {
            entry: untrusted.to_path_buf(),
            resolved,
        });
    }

    Ok(resolved)
}

/// Resolve `untrusted` under `root` and refuse symlinked parent directories
///
/// Every existing ancestor between the root and the final component is
/// inspected with `symlink_metadata`. The final component itself is not,
/// since callers either replace it or create it fresh.
pub fn resolve_on_disk(root: &Path, untrusted: &Path) -> Result<PathBuf> {
    let resolved = resolve_within(root, untrusted)?;
    let root = clean(root);
    let relative = if root == Path::new(".") {
        resolved.as_path()
    } else {
        resolved
            .strip_prefix(&root)
            .map_err(|_| Error::PathTraversal {
                entry: untrusted.to_path_buf(),
                resolved: resolved.clone(),
            })?
    };

    let mut current = root.clone();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            break;
        }
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                error!(root = ?root, entry = ?untrusted, link = ?current, "Archive entry passes through a symlink");
                return Err(Error::PathTraversal {
                    entry: untrusted.to_path_buf(),
                    resolved: current,
                });
            }
            Ok(_) => {}
            // Nothing below a missing directory can be a link yet.
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => return Err(Error::io(format!("inspecting {}", current.display()), e)),
        }
    }

    Ok(resolved)
}

/// Lexically normalize a path: drop `.`, fold `name/..`
///
/// A `..` that would climb above the start of a relative path is kept, and
/// one at the root of an absolute path is dropped.
pub fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
