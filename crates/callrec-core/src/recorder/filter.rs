//! Target-surface filtering: is a callable defined under the target path?

use std::path::{Component, Path, PathBuf};

use crate::config::PathMatch;
use crate::models::Callable;

/// Whether `callable` is defined in a file under `target_prefix`.
///
/// False when the prefix is empty or the defining file is unknown.
pub fn in_scope(callable: &Callable, target_prefix: &str, mode: PathMatch) -> bool {
    match callable.origin().file.as_deref() {
        Some(file) => path_in_scope(file, target_prefix, mode),
        None => false,
    }
}

/// Path-level half of [`in_scope`].
///
/// `Substring` deliberately keeps raw containment: `/pkg` also matches
/// `/pkg2-parser/mod.py`. `Prefix` compares normalized path components.
pub fn path_in_scope(file: &str, target_prefix: &str, mode: PathMatch) -> bool {
    if target_prefix.is_empty() {
        return false;
    }
    match mode {
        PathMatch::Substring => file.contains(target_prefix),
        PathMatch::Prefix => normalize(file).starts_with(normalize(target_prefix)),
    }
}

fn normalize(path: &str) -> PathBuf {
    let unified = path.replace('\\', "/");
    let mut normalized = PathBuf::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
