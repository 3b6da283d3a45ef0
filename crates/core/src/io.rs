//! File and output helpers
//!
//! `write_private_atomic` is the single way this crate rewrites client-side
//! files: write a sibling temp file restricted to the owning user, then rename
//! it over the destination. `Output` keeps command results on stdout, apart
//! from the tracing output on stderr.

use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Atomically replace `path` with `contents`, mode 0600 on unix
///
/// Missing parent directories are created with mode 0700.
pub fn write_private_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    create_private_dir(parent)?;

    let mut temp = tempfile::Builder::new()
        .prefix(".burrow-")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    restrict_to_owner(temp.path(), 0o600)?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create a directory (and parents) readable only by its owner
pub fn create_private_dir(dir: &Path) -> io::Result<()> {
    if dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(dir)?;
    restrict_to_owner(dir, 0o700)
}

/// Apply a unix mode; a no-op elsewhere
pub fn restrict_to_owner(path: &Path, mode: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
    Ok(())
}

/// Stdout writer for command results
pub struct Output {
    writer: Box<dyn Write>,
}

impl Output {
    /// Output bound to stdout
    pub fn stdout() -> Self {
        Self {
            writer: Box::new(io::stdout()),
        }
    }

    /// Output bound to an arbitrary writer
    pub fn with_writer(writer: Box<dyn Write>) -> Self {
        Self { writer }
    }

    /// Write a value as pretty JSON followed by a newline
    pub fn write_json<T: Serialize>(&mut self, value: &T) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Write one line of text
    pub fn write_line(&mut self, line: &str) -> anyhow::Result<()> {
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_private_atomic_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config");
        write_private_atomic(&path, b"first").unwrap();
        write_private_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_write_private_atomic_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ssh").join("config");
        write_private_atomic(&path, b"Host x\n").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }
}
