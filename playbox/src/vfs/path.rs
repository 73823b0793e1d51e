//! Lexical path handling for the virtual filesystem.
//!
//! Paths are always absolute. `.` and empty components are dropped and `..`
//! pops one level but never above `/`. No symlinks exist, so purely lexical
//! resolution is exact.

use super::error::{VfsError, VfsResult};

/// Split an absolute path into its normalized components.
pub fn components(path: &str) -> VfsResult<Vec<&str>> {
    if !path.starts_with('/') {
        return Err(VfsError::InvalidPath(path.to_string()));
    }

    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }
    Ok(parts)
}

/// Normalize an absolute path into `/a/b` form (`/` for the root).
pub fn normalize(path: &str) -> VfsResult<String> {
    let parts = components(path)?;
    Ok(join_components(&parts))
}

pub(crate) fn join_components(parts: &[&str]) -> String {
    if parts.is_empty() {
        return "/".to_string();
    }
    let mut out = String::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
    for part in parts {
        out.push('/');
        out.push_str(part);
    }
    out
}

/// Parent of a normalized path, `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Join a relative (or absolute) path onto a base directory.
///
/// Absolute `rel` is still interpreted beneath `base`, matching how
/// preopened directories scope every lookup.
pub fn join(base: &str, rel: &str) -> VfsResult<String> {
    let mut combined = String::with_capacity(base.len() + rel.len() + 1);
    combined.push_str(base);
    combined.push('/');
    combined.push_str(rel);
    normalize(&combined)
}

/// Replace the extension of the final component, or append one if it has none.
/// A leading dot (`/.profile`) is not an extension.
pub fn with_extension(path: &str, ext: &str) -> String {
    let file_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[file_start..].rfind('.') {
        Some(dot) if dot > 0 => format!("{}.{}", &path[..file_start + dot], ext),
        _ => format!("{}.{}", path, ext),
    }
}

/// Whether `path` equals `prefix` or lies beneath it.
pub fn is_within(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return path.starts_with('/');
    }
    path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("//a///b/").unwrap(), "/a/b");
        assert_eq!(normalize("/a/./b/../c").unwrap(), "/a/c");
        assert_eq!(normalize("/../../x").unwrap(), "/x");
    }

    #[test]
    fn test_relative_path_rejected() {
        assert_eq!(
            normalize("a/b"),
            Err(VfsError::InvalidPath("a/b".to_string()))
        );
    }

    #[test]
    fn test_parent() {
        assert_eq!(parent("/"), None);
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/a/b/c"), Some("/a/b"));
    }

    #[test]
    fn test_with_extension() {
        assert_eq!(with_extension("/code.cr", "wasm"), "/code.wasm");
        assert_eq!(with_extension("/src/app", "wasm"), "/src/app.wasm");
        assert_eq!(with_extension("/a.b/c", "wasm"), "/a.b/c.wasm");
        assert_eq!(with_extension("/.hidden", "wasm"), "/.hidden.wasm");
    }

    #[test]
    fn test_join_and_within() {
        assert_eq!(join("/", "code.cr").unwrap(), "/code.cr");
        assert_eq!(join("/lib", "../etc").unwrap(), "/etc");
        assert!(is_within("/lib/a", "/lib"));
        assert!(is_within("/lib", "/lib"));
        assert!(!is_within("/library", "/lib"));
        assert!(is_within("/anything", "/"));
    }
}
