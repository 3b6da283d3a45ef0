//! Client-side trust store
//!
//! Two files on the operator's machine make a resource reachable and
//! verifiable: an ssh client config fragment holding one `Host` block per
//! resource, and `known_hosts`, which receives the CA's `@cert-authority`
//! anchor. The config fragment may also contain blocks burrow did not write;
//! every edit touches only the block it names and keeps all other bytes.

use crate::errors::{Result, TrustError};
use crate::io::write_private_atomic;
use serde::Serialize;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// One `Host` block for a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostBlock {
    pub alias: String,
    pub host_name: String,
    pub port: u16,
    pub user: String,
}

impl HostBlock {
    /// Directive lines only, no separating blank line
    pub fn render(&self) -> String {
        format!(
            "Host {}\n    HostName {}\n    Port {}\n    User {}\n",
            self.alias, self.host_name, self.port, self.user
        )
    }
}

/// Line range of a `Host`/`Match` block, `end` exclusive
///
/// A block ends after its last directive. Comments and blank lines that
/// follow it belong to whatever comes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSpan {
    /// Patterns after `Host`; empty for `Match` blocks
    pub patterns: Vec<String>,
    pub start: usize,
    pub end: usize,
}

/// Split a config line into keyword and value (`Key value` or `Key=value`)
pub fn directive(line: &str) -> Option<(&str, &str)> {
    let (key, range) = directive_span(line)?;
    Some((key, &line[range]))
}

/// Keyword and the byte range of its value within `line`
///
/// The value stops before a trailing ` # comment`; enclosing quotes are
/// not part of it.
pub fn directive_span(line: &str) -> Option<(&str, Range<usize>)> {
    let leading = line.len() - line.trim_start().len();
    let body = line[leading..].trim_end();
    if body.is_empty() || body.starts_with('#') {
        return None;
    }
    let key_len = body
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(body.len());
    let after_key = &body[key_len..];
    let separator =
        after_key.len() - after_key.trim_start_matches(|c: char| c.is_whitespace() || c == '=').len();

    let mut start = leading + key_len + separator;
    let mut value = &body[key_len + separator..];
    if let Some(comment) = value.find(" #").or_else(|| value.find("\t#")) {
        value = value[..comment].trim_end();
    }
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        start += 1;
        value = &value[1..value.len() - 1];
    }
    Some((&body[..key_len], start..start + value.len()))
}

/// Lines with their terminators, so joining them reproduces the input exactly
pub fn lines_inclusive(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Every `Host`/`Match` block in file order
pub fn block_spans(lines: &[&str]) -> Vec<BlockSpan> {
    let mut spans: Vec<BlockSpan> = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        let Some((key, value)) = directive(line) else {
            continue;
        };
        let patterns = if key.eq_ignore_ascii_case("host") {
            value.split_whitespace().map(str::to_string).collect()
        } else if key.eq_ignore_ascii_case("match") {
            Vec::new()
        } else {
            if let Some(current) = spans.last_mut() {
                current.end = index + 1;
            }
            continue;
        };
        spans.push(BlockSpan {
            patterns,
            start: index,
            end: index + 1,
        });
    }
    spans
}

fn span_for<'s>(spans: &'s [BlockSpan], alias: &str) -> Option<&'s BlockSpan> {
    spans
        .iter()
        .find(|span| span.patterns.iter().any(|p| p == alias))
}

/// Parse the block for `alias`, if present and complete
pub fn find_block(text: &str, alias: &str) -> Option<HostBlock> {
    let lines = lines_inclusive(text);
    let spans = block_spans(&lines);
    let span = span_for(&spans, alias)?;

    let mut host_name = None;
    let mut port = 22;
    let mut user = String::new();
    for line in &lines[span.start + 1..span.end] {
        match directive(line) {
            Some((key, value)) if key.eq_ignore_ascii_case("hostname") => {
                host_name = Some(value.to_string())
            }
            Some((key, value)) if key.eq_ignore_ascii_case("port") => {
                port = value.parse().ok()?;
            }
            Some((key, value)) if key.eq_ignore_ascii_case("user") => user = value.to_string(),
            _ => {}
        }
    }
    Some(HostBlock {
        alias: alias.to_string(),
        host_name: host_name?,
        port,
        user,
    })
}

/// Replace the block for `block.alias`, or append it
pub fn upsert_block(text: &str, block: &HostBlock) -> String {
    let lines = lines_inclusive(text);
    let spans = block_spans(&lines);
    let rendered = block.render();

    match span_for(&spans, &block.alias) {
        Some(span) => {
            let mut out = lines[..span.start].concat();
            out.push_str(&rendered);
            out.push_str(&lines[span.end..].concat());
            out
        }
        None => {
            let mut out = text.to_string();
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            if !out.trim().is_empty() && !out.ends_with("\n\n") {
                out.push('\n');
            }
            out.push_str(&rendered);
            out
        }
    }
}

/// Text without the block for `alias`; `None` when no such block exists
pub fn remove_block_text(text: &str, alias: &str) -> Option<String> {
    let lines = lines_inclusive(text);
    let spans = block_spans(&lines);
    let span = span_for(&spans, alias)?;
    let mut rest = &lines[span.end..];
    // One separating blank line goes with the block
    let preceded_by_blank = span.start == 0 || lines[span.start - 1].trim().is_empty();
    if preceded_by_blank && rest.first().is_some_and(|line| line.trim().is_empty()) {
        rest = &rest[1..];
    }
    let mut out = lines[..span.start].concat();
    out.push_str(&rest.concat());
    Some(out)
}

/// Where connection entries and the trust anchor are recorded
pub trait TrustStore {
    /// Append a known_hosts line; returns false when an identical line exists
    fn append_known_host_line(&self, line: &str) -> Result<bool>;

    /// Write or replace the block for `block.alias`
    fn write_block(&self, block: &HostBlock) -> Result<()>;

    /// Remove the block for `alias`; returns false when there was none
    fn remove_block(&self, alias: &str) -> Result<bool>;

    /// Full text of the client config fragment (empty when absent)
    fn read_config(&self) -> Result<String>;

    /// Replace the client config fragment
    fn write_config(&self, content: &str) -> Result<()>;

    fn find_block(&self, alias: &str) -> Result<Option<HostBlock>> {
        Ok(find_block(&self.read_config()?, alias))
    }
}

impl<T: TrustStore> TrustStore for &T {
    fn append_known_host_line(&self, line: &str) -> Result<bool> {
        (*self).append_known_host_line(line)
    }

    fn write_block(&self, block: &HostBlock) -> Result<()> {
        (*self).write_block(block)
    }

    fn remove_block(&self, alias: &str) -> Result<bool> {
        (*self).remove_block(alias)
    }

    fn read_config(&self) -> Result<String> {
        (*self).read_config()
    }

    fn write_config(&self, content: &str) -> Result<()> {
        (*self).write_config(content)
    }
}

/// Trust store backed by the ssh client config fragment and known_hosts
#[derive(Debug, Clone)]
pub struct FileTrustStore {
    ssh_config: PathBuf,
    known_hosts: PathBuf,
}

impl FileTrustStore {
    pub fn new(ssh_config: impl Into<PathBuf>, known_hosts: impl Into<PathBuf>) -> Self {
        Self {
            ssh_config: ssh_config.into(),
            known_hosts: known_hosts.into(),
        }
    }

    pub fn ssh_config_path(&self) -> &Path {
        &self.ssh_config
    }

    pub fn known_hosts_path(&self) -> &Path {
        &self.known_hosts
    }

    fn read_optional(path: &Path) -> Result<String> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(TrustError::Io {
                path: path.display().to_string(),
                source,
            }
            .into()),
        }
    }

    fn write(path: &Path, content: &str) -> Result<()> {
        write_private_atomic(path, content.as_bytes()).map_err(|source| {
            TrustError::Io {
                path: path.display().to_string(),
                source,
            }
            .into()
        })
    }
}

impl TrustStore for FileTrustStore {
    #[instrument(skip(self, line))]
    fn append_known_host_line(&self, line: &str) -> Result<bool> {
        let line = line.trim_end();
        let mut content = Self::read_optional(&self.known_hosts)?;
        if content.lines().any(|existing| existing == line) {
            debug!("known_hosts already contains the trust anchor");
            return Ok(false);
        }
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(line);
        content.push('\n');
        Self::write(&self.known_hosts, &content)?;
        Ok(true)
    }

    #[instrument(skip(self), fields(alias = %block.alias))]
    fn write_block(&self, block: &HostBlock) -> Result<()> {
        let current = Self::read_optional(&self.ssh_config)?;
        Self::write(&self.ssh_config, &upsert_block(&current, block))
    }

    #[instrument(skip(self))]
    fn remove_block(&self, alias: &str) -> Result<bool> {
        let current = Self::read_optional(&self.ssh_config)?;
        match remove_block_text(&current, alias) {
            Some(updated) => {
                Self::write(&self.ssh_config, &updated)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn read_config(&self) -> Result<String> {
        Self::read_optional(&self.ssh_config)
    }

    fn write_config(&self, content: &str) -> Result<()> {
        Self::write(&self.ssh_config, content)
    }
}

/// In-memory trust store for tests
pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct MemoryState {
        config: String,
        known_hosts: Vec<String>,
        config_writes: usize,
        fail_writes: bool,
        fail_remove: bool,
    }

    /// Trust store holding both files in memory; clones share state
    #[derive(Debug, Clone, Default)]
    pub struct MemoryTrustStore {
        state: Arc<Mutex<MemoryState>>,
    }

    impl MemoryTrustStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_config(config: &str) -> Self {
            let store = Self::default();
            store.state.lock().unwrap().config = config.to_string();
            store
        }

        pub fn config(&self) -> String {
            self.state.lock().unwrap().config.clone()
        }

        pub fn known_hosts(&self) -> Vec<String> {
            self.state.lock().unwrap().known_hosts.clone()
        }

        /// Number of successful config rewrites
        pub fn config_writes(&self) -> usize {
            self.state.lock().unwrap().config_writes
        }

        pub fn set_fail_writes(&self, fail: bool) {
            self.state.lock().unwrap().fail_writes = fail;
        }

        pub fn set_fail_remove(&self, fail: bool) {
            self.state.lock().unwrap().fail_remove = fail;
        }

        fn io_error(path: &str) -> crate::errors::BurrowError {
            TrustError::Io {
                path: path.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            }
            .into()
        }
    }

    impl TrustStore for MemoryTrustStore {
        fn append_known_host_line(&self, line: &str) -> Result<bool> {
            let mut state = self.state.lock().unwrap();
            if state.fail_writes {
                return Err(Self::io_error("known_hosts"));
            }
            let line = line.trim_end();
            if state.known_hosts.iter().any(|l| l == line) {
                return Ok(false);
            }
            state.known_hosts.push(line.to_string());
            Ok(true)
        }

        fn write_block(&self, block: &HostBlock) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if state.fail_writes {
                return Err(Self::io_error("config"));
            }
            state.config = upsert_block(&state.config, block);
            state.config_writes += 1;
            Ok(())
        }

        fn remove_block(&self, alias: &str) -> Result<bool> {
            let mut state = self.state.lock().unwrap();
            if state.fail_remove {
                return Err(Self::io_error("config"));
            }
            match remove_block_text(&state.config, alias) {
                Some(updated) => {
                    state.config = updated;
                    state.config_writes += 1;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        fn read_config(&self) -> Result<String> {
            Ok(self.state.lock().unwrap().config.clone())
        }

        fn write_config(&self, content: &str) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if state.fail_writes {
                return Err(Self::io_error("config"));
            }
            state.config = content.to_string();
            state.config_writes += 1;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn block(alias: &str, host: &str, port: u16) -> HostBlock {
        HostBlock {
            alias: alias.to_string(),
            host_name: host.to_string(),
            port,
            user: "dev".to_string(),
        }
    }

    const MIXED: &str = "\
# personal hosts
Host github.com
  IdentityFile ~/.ssh/gh

Host dev-proj-abc123
    HostName 10.0.0.5
    Port 2200
    User dev

Match host *.corp
  ProxyJump bastion
";

    #[test]
    fn test_directive_ignores_inline_comment() {
        let line = "    HostName 10.0.0.5 # was 10.0.0.5\n";
        let (key, range) = directive_span(line).unwrap();
        assert_eq!(key, "HostName");
        assert_eq!(range, 13..21);
        assert_eq!(directive(line), Some(("HostName", "10.0.0.5")));
    }

    #[test]
    fn test_directive_forms() {
        assert_eq!(directive("  HostName 10.0.0.5"), Some(("HostName", "10.0.0.5")));
        assert_eq!(directive("Port=2200"), Some(("Port", "2200")));
        assert_eq!(directive("User = \"dev\""), Some(("User", "dev")));
        assert_eq!(directive("  # comment"), None);
        assert_eq!(directive("   "), None);
    }

    #[test]
    fn test_find_block_among_unrelated_entries() {
        let found = find_block(MIXED, "dev-proj-abc123").unwrap();
        assert_eq!(found, block("dev-proj-abc123", "10.0.0.5", 2200));
        assert!(find_block(MIXED, "dev-proj-ffffff").is_none());
    }

    #[test]
    fn test_upsert_replaces_only_target_block() {
        let updated = upsert_block(MIXED, &block("dev-proj-abc123", "10.0.0.9", 2201));
        assert!(updated.starts_with("# personal hosts\nHost github.com\n  IdentityFile ~/.ssh/gh\n\n"));
        assert!(updated.contains("    HostName 10.0.0.9\n    Port 2201\n"));
        assert!(updated.ends_with("Match host *.corp\n  ProxyJump bastion\n"));
        assert!(!updated.contains("10.0.0.5"));
    }

    #[test]
    fn test_upsert_appends_new_block() {
        let updated = upsert_block("Host a\n  User x", &block("dev-b-123456", "h", 2200));
        assert_eq!(
            updated,
            "Host a\n  User x\n\nHost dev-b-123456\n    HostName h\n    Port 2200\n    User dev\n"
        );
        let second = upsert_block(&updated, &block("dev-c-654321", "h", 2201));
        assert!(second.starts_with(&updated));
        assert!(second[updated.len()..].starts_with("\nHost dev-c-654321\n"));
        let fresh = upsert_block("", &block("dev-b-123456", "h", 2200));
        assert!(fresh.starts_with("Host dev-b-123456\n"));
    }

    #[test]
    fn test_remove_block_text() {
        let updated = remove_block_text(MIXED, "dev-proj-abc123").unwrap();
        assert!(!updated.contains("dev-proj-abc123"));
        assert!(updated.contains("Host github.com"));
        assert!(updated.contains("Match host *.corp"));
        assert!(remove_block_text(MIXED, "missing").is_none());
    }

    const COMMENT_ABOVE_NEXT: &str = "\
Host dev-a-111111
    HostName 10.0.0.5

# work bastion, do not edit
Host bastion
    HostName b
";

    #[test]
    fn test_remove_keeps_comment_above_next_block() {
        let updated = remove_block_text(COMMENT_ABOVE_NEXT, "dev-a-111111").unwrap();
        assert_eq!(updated, "# work bastion, do not edit\nHost bastion\n    HostName b\n");
    }

    #[test]
    fn test_upsert_keeps_comment_above_next_block() {
        let updated = upsert_block(COMMENT_ABOVE_NEXT, &block("dev-a-111111", "10.0.0.9", 2200));
        assert!(updated.starts_with("Host dev-a-111111\n    HostName 10.0.0.9\n"));
        assert!(updated.ends_with("\n\n# work bastion, do not edit\nHost bastion\n    HostName b\n"));
        assert_eq!(find_block(&updated, "bastion").map(|b| b.host_name), Some("b".to_string()));
    }

    #[test]
    fn test_block_span_ends_at_last_directive() {
        let lines = lines_inclusive(COMMENT_ABOVE_NEXT);
        let spans = block_spans(&lines);
        assert_eq!((spans[0].start, spans[0].end), (0, 2));
        assert_eq!((spans[1].start, spans[1].end), (4, 6));
    }

    #[test]
    fn test_file_store_known_hosts_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = FileTrustStore::new(
            temp.path().join("config.d/burrow"),
            temp.path().join("known_hosts"),
        );
        std::fs::write(store.known_hosts_path(), "github.com ssh-ed25519 AAAA").unwrap();

        let line = "@cert-authority dev-*,[10.0.0.5]:* ssh-ed25519 AAAACA";
        assert!(store.append_known_host_line(line).unwrap());
        let first = std::fs::read(store.known_hosts_path()).unwrap();
        assert!(!store.append_known_host_line(line).unwrap());
        let second = std::fs::read(store.known_hosts_path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            String::from_utf8(second).unwrap(),
            format!("github.com ssh-ed25519 AAAA\n{}\n", line)
        );
    }

    #[test]
    fn test_file_store_block_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = FileTrustStore::new(
            temp.path().join("config.d/burrow"),
            temp.path().join("known_hosts"),
        );
        assert_eq!(store.read_config().unwrap(), "");
        assert!(!store.remove_block("dev-x-000000").unwrap());

        store.write_block(&block("dev-x-000000", "h", 2200)).unwrap();
        assert_eq!(
            store.find_block("dev-x-000000").unwrap(),
            Some(block("dev-x-000000", "h", 2200))
        );
        assert!(store.remove_block("dev-x-000000").unwrap());
        assert_eq!(store.find_block("dev-x-000000").unwrap(), None);
    }
}
