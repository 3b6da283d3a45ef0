//! Deterministic resource names
//!
//! A resource name is `prefix-repo-hash`, where `hash` is the first
//! [`HASH_PREFIX_LEN`] hex digits of the SHA-256 of the canonical worktree path.
//! Canonicalization resolves symlinks and relative segments, so the same
//! worktree always maps to the same name no matter how it was spelled.

use crate::errors::{BurrowError, ConfigError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, instrument};

/// Hex digits of the path digest kept in the name (24 bits)
pub const HASH_PREFIX_LEN: usize = 6;

/// Longest accepted resource name (DNS label limit)
pub const MAX_NAME_LEN: usize = 63;

static NAME_CHARSET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]([a-z0-9-]*[a-z0-9])?$").expect("name pattern compiles"));

/// Compose the resource name for a worktree
#[instrument]
pub fn resolve(prefix: &str, repo_name: &str, worktree: &Path) -> Result<String> {
    let repo = sanitize_segment(repo_name).ok_or_else(|| {
        BurrowError::validation(format!(
            "repository name '{}' has no usable characters",
            repo_name
        ))
    })?;
    let canonical = canonicalize_path(worktree)?;
    let hash = path_hash(&canonical);
    let name = format!("{}-{}-{}", prefix, repo, hash);

    debug!(path = %canonical.display(), %name, "Resolved resource name");
    Ok(name)
}

/// Hex prefix of the SHA-256 over the path bytes
pub fn path_hash(canonical: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path_bytes(canonical));
    let digest = format!("{:x}", hasher.finalize());
    digest[..HASH_PREFIX_LEN].to_string()
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

/// Lowercase, map anything outside `[a-z0-9]` to `-`, collapse and trim separators
///
/// Returns `None` when nothing usable remains.
pub fn sanitize_segment(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            out.push(ch);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    (!out.is_empty()).then_some(out)
}

/// Reject names the runtime or ssh config would mangle
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(BurrowError::validation(format!(
            "name '{}' must be 1-{} characters (got {})",
            name,
            MAX_NAME_LEN,
            name.len()
        )));
    }
    if !NAME_CHARSET.is_match(name) {
        return Err(BurrowError::validation(format!(
            "name '{}' must start with a letter, end with a letter or digit, and contain only a-z, 0-9 and '-'",
            name
        )));
    }
    if name.contains("--") {
        return Err(BurrowError::validation(format!(
            "name '{}' must not contain doubled separators",
            name
        )));
    }
    Ok(())
}

/// Absolute, symlink-free form of `path`
///
/// Existing paths go through `fs::canonicalize`. For a path that does not exist
/// yet, the longest existing ancestor is canonicalized and the remaining
/// components are appended after lexical `.`/`..` resolution.
pub fn canonicalize_path(path: &Path) -> Result<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map_err(ConfigError::Io)?.join(path)
    };
    let normalized = normalize_lexically(&absolute);

    let mut existing = normalized.as_path();
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(normalized),
        }
    }

    let mut resolved = existing.canonicalize().map_err(ConfigError::Io)?;
    for part in tail.into_iter().rev() {
        resolved.push(part);
    }
    Ok(resolved)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[test]
    fn test_name_shape_for_nonexistent_path() {
        let name = resolve("dev", "proj", Path::new("/home/u/proj")).unwrap();
        let pattern = Regex::new(r"^dev-proj-[0-9a-f]{6}$").unwrap();
        assert!(pattern.is_match(&name), "unexpected name {}", name);
        assert!(validate_name(&name).is_ok());
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let a = resolve("dev", "proj", Path::new("/home/u/proj")).unwrap();
        let b = resolve("dev", "proj", Path::new("/home/u/proj")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_paths_get_distinct_names() {
        let names: HashSet<String> = (0..200)
            .map(|i| resolve("dev", "proj", &PathBuf::from(format!("/srv/wt/{}", i))).unwrap())
            .collect();
        assert_eq!(names.len(), 200);
    }

    #[test]
    fn test_relative_segments_resolve_identically() {
        let direct = resolve("dev", "proj", Path::new("/home/u/proj")).unwrap();
        let dotted = resolve("dev", "proj", Path::new("/home/u/./other/../proj")).unwrap();
        assert_eq!(direct, dotted);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_resolves_to_target_name() {
        let temp = TempDir::new().unwrap();
        let real = temp.path().join("real");
        std::fs::create_dir(&real).unwrap();
        let link = temp.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        assert_eq!(
            resolve("dev", "proj", &real).unwrap(),
            resolve("dev", "proj", &link).unwrap()
        );
    }

    #[test]
    fn test_repo_name_is_sanitized() {
        let name = resolve("dev", "My_Repo.rs", Path::new("/x")).unwrap();
        assert!(name.starts_with("dev-my-repo-rs-"));
        assert!(resolve("dev", "___", Path::new("/x")).is_err());
    }

    #[test]
    fn test_sanitize_segment() {
        assert_eq!(sanitize_segment("Proj"), Some("proj".to_string()));
        assert_eq!(sanitize_segment("a--b"), Some("a-b".to_string()));
        assert_eq!(sanitize_segment("-a-"), Some("a".to_string()));
        assert_eq!(sanitize_segment("!!"), None);
    }

    #[test]
    fn test_validate_name_rules() {
        assert!(validate_name("dev-proj-abc123").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("Dev-proj").is_err());
        assert!(validate_name("1dev").is_err());
        assert!(validate_name("dev-").is_err());
        assert!(validate_name("dev--proj").is_err());
        assert!(validate_name("dev_proj").is_err());
        assert!(validate_name(&"a".repeat(MAX_NAME_LEN + 1)).is_err());
        assert!(validate_name(&"a".repeat(MAX_NAME_LEN)).is_ok());
    }

    #[test]
    fn test_canonicalize_missing_child_of_existing_dir() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("not-yet").join("deeper");
        let canonical = canonicalize_path(&missing).unwrap();
        assert_eq!(
            canonical,
            temp.path()
                .canonicalize()
                .unwrap()
                .join("not-yet")
                .join("deeper")
        );
    }
}
