//! Path handling shared by the writer and reader: root normalization on the
//! way in, escape-sanitization on the way out.
//!
//! Grounded on `examples/original_source/src/rekord/repository_write.cc`'s
//! `rk_Put` (absolute-root requirement, `C:\foo` → `/c/foo` translation) and
//! `repository_read.cc`'s `ExtractEntries`/`GetFile` path sanitization
//! (non-empty, no `..`, not absolute, no separators unless explicitly
//! restoring a snapshot's root names).

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Translates a Windows-style drive path (`C:\Users\x`) into the
/// POSIX-flavored form rekord stores root names as (`/c/Users/x`), so the
/// same snapshot structure is meaningful whether it was taken on Windows or
/// not. Paths that don't look like a drive path pass through unchanged.
pub fn normalize_root_name(raw: &str) -> String {
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        let drive = (bytes[0] as char).to_ascii_lowercase();
        let rest = &raw[2..].replace('\\', "/");
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        return format!("/{drive}/{rest}");
    }
    raw.replace('\\', "/")
}

/// Validates that `root` is usable as a backup root: absolute, and not
/// containing a `..` component (which would make the stored root name
/// ambiguous on restore).
pub fn validate_root(root: &Path) -> Result<PathBuf> {
    if !root.is_absolute() {
        return Err(Error::Config(format!("backup root must be an absolute path: {}", root.display())));
    }
    if root.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(Error::Config(format!("backup root must not contain '..': {}", root.display())));
    }
    Ok(root.to_path_buf())
}

/// Validates one path component read back out of a directory/snapshot
/// listing before it is joined onto a restore destination.
/// `allow_separators` permits `/`-containing names, used only for a
/// snapshot's own root entries (which store full, already-sanitized root
/// paths, not single path components).
pub fn sanitize_entry_name(name: &str, allow_separators: bool) -> Result<()> {
    if name.is_empty() {
        return Err(Error::UnsafePath("empty entry name".into()));
    }
    if Path::new(name).is_absolute() {
        return Err(Error::UnsafePath(format!("absolute entry name: {name}")));
    }
    if name.split(['/', '\\']).any(|part| part == "..") {
        return Err(Error::UnsafePath(format!("entry name escapes with '..': {name}")));
    }
    if !allow_separators && (name.contains('/') || name.contains('\\')) {
        return Err(Error::UnsafePath(format!("entry name contains a path separator: {name}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_drive_path_is_translated() {
        assert_eq!(normalize_root_name("C:\\Users\\alice"), "/c/Users/alice");
        assert_eq!(normalize_root_name("D:\\"), "/d/");
    }

    #[test]
    fn posix_path_passes_through() {
        assert_eq!(normalize_root_name("/home/alice"), "/home/alice");
    }

    #[test]
    fn relative_root_is_rejected() {
        assert!(validate_root(Path::new("relative/path")).is_err());
    }

    #[test]
    fn dotdot_root_is_rejected() {
        assert!(validate_root(Path::new("/home/../etc")).is_err());
    }

    #[test]
    fn sanitize_rejects_escapes_and_absolute_paths() {
        assert!(sanitize_entry_name("../etc/passwd", false).is_err());
        assert!(sanitize_entry_name("/etc/passwd", false).is_err());
        assert!(sanitize_entry_name("a/b", false).is_err());
        assert!(sanitize_entry_name("a/b", true).is_ok());
        assert!(sanitize_entry_name("", false).is_err());
        assert!(sanitize_entry_name("ok_name.txt", false).is_ok());
    }
}
