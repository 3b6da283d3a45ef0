//! Drift detection between recorded trust entries and the active endpoint
//!
//! Every resource's `Host` block records the endpoint it was created against.
//! When the operator moves to another remote host the recorded endpoints go
//! stale. [`diff`] reports the stale entries, [`apply`] rewrites one of them,
//! and [`switch`] moves every entry from the active connection to a new one
//! and flips the active marker in the connection registry.

use crate::errors::{Result, TrustError};
use crate::io::write_private_atomic;
use crate::trust::{block_spans, directive, directive_span, lines_inclusive, TrustStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// A recorded connection entry owned by burrow
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrustEntry {
    pub alias: String,
    pub endpoint: String,
}

/// An entry whose endpoint differs from the active one
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub alias: String,
    pub recorded: String,
    pub expected: String,
}

/// Entries whose first `Host` pattern carries `prefix-`
///
/// Blocks without a `HostName` and blocks owned by anything else are skipped.
pub fn parse_entries(config: &str, prefix: &str) -> Vec<TrustEntry> {
    let alias_prefix = format!("{}-", prefix);
    let lines = lines_inclusive(config);
    block_spans(&lines)
        .into_iter()
        .filter_map(|span| {
            let alias = span.patterns.first()?;
            if !alias.starts_with(&alias_prefix) {
                return None;
            }
            let endpoint = lines[span.start + 1..span.end]
                .iter()
                .filter_map(|line| directive(line))
                .find(|(key, _)| key.eq_ignore_ascii_case("hostname"))
                .map(|(_, value)| value.to_string())?;
            Some(TrustEntry {
                alias: alias.clone(),
                endpoint,
            })
        })
        .collect()
}

/// Entries recorded against anything other than `active_endpoint`
pub fn diff(config: &str, prefix: &str, active_endpoint: &str) -> Vec<Mismatch> {
    parse_entries(config, prefix)
        .into_iter()
        .filter(|entry| entry.endpoint != active_endpoint)
        .map(|entry| Mismatch {
            alias: entry.alias,
            recorded: entry.endpoint,
            expected: active_endpoint.to_string(),
        })
        .collect()
}

/// Rewrite the `HostName` value of `alias`'s block, keeping every other byte
pub fn apply(config: &str, alias: &str, new_endpoint: &str) -> Result<String> {
    let not_found = || TrustError::EntryNotFound {
        alias: alias.to_string(),
    };
    let lines = lines_inclusive(config);
    let spans = block_spans(&lines);
    let span = spans
        .iter()
        .find(|span| span.patterns.first().map(String::as_str) == Some(alias))
        .ok_or_else(not_found)?;

    let (index, rewritten) = (span.start + 1..span.end)
        .find_map(|index| {
            let line = lines[index];
            let (key, value) = directive_span(line)?;
            if !key.eq_ignore_ascii_case("hostname") || value.is_empty() {
                return None;
            }
            Some((
                index,
                format!("{}{}{}", &line[..value.start], new_endpoint, &line[value.end..]),
            ))
        })
        .ok_or_else(not_found)?;

    let mut out = lines[..index].concat();
    out.push_str(&rewritten);
    out.push_str(&lines[index + 1..].concat());
    Ok(out)
}

/// A named remote endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub name: String,
    /// Address clients use to reach published ports
    pub endpoint: String,
    /// Runtime daemon URL, e.g. `ssh://dev@build-box`; local daemon when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl Connection {
    pub fn local() -> Self {
        Self {
            name: "local".to_string(),
            endpoint: "127.0.0.1".to_string(),
            host: None,
        }
    }
}

/// Known connections and the active one, persisted as TOML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRegistry {
    pub active: String,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(skip)]
    path: PathBuf,
}

impl ConnectionRegistry {
    /// Registry holding only the local connection
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            active: "local".to_string(),
            connections: vec![Connection::local()],
            path: path.into(),
        }
    }

    /// Load from `path`; a missing file yields [`ConnectionRegistry::new`]
    #[instrument]
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No connection registry at {}, using local", path.display());
                return Ok(Self::new(path));
            }
            Err(source) => {
                return Err(TrustError::Io {
                    path: path.display().to_string(),
                    source,
                }
                .into())
            }
        };

        let mut registry: Self = toml::from_str(&content).map_err(|e| TrustError::Registry {
            message: format!("{}: {}", path.display(), e),
        })?;
        registry.path = path.to_path_buf();
        registry.active_connection()?;
        Ok(registry)
    }

    /// Atomically persist the registry
    pub fn save(&self) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| TrustError::Registry {
            message: e.to_string(),
        })?;
        write_private_atomic(&self.path, content.as_bytes()).map_err(|source| TrustError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Result<&Connection> {
        self.connections
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| {
                TrustError::UnknownConnection {
                    name: name.to_string(),
                }
                .into()
            })
    }

    pub fn active_connection(&self) -> Result<&Connection> {
        self.get(&self.active)
    }

    /// Add or replace a connection by name
    pub fn upsert(&mut self, connection: Connection) {
        match self.connections.iter_mut().find(|c| c.name == connection.name) {
            Some(existing) => *existing = connection,
            None => self.connections.push(connection),
        }
    }
}

/// One entry moved by a switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rewrite {
    pub alias: String,
    pub from: String,
    pub to: String,
}

/// What a switch did, or would do under `dry_run`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchPlan {
    pub from: Connection,
    pub to: Connection,
    pub rewrites: Vec<Rewrite>,
    pub dry_run: bool,
}

/// Move every entry recorded against the active endpoint to `target`
///
/// With `dry_run` nothing is written; otherwise the config fragment is
/// rewritten first and the registry's active marker is flipped last.
#[instrument(skip(registry, store))]
pub fn switch<T: TrustStore>(
    registry: &mut ConnectionRegistry,
    store: &T,
    prefix: &str,
    target: &str,
    dry_run: bool,
) -> Result<SwitchPlan> {
    let to = registry.get(target)?.clone();
    let from = registry.active_connection()?.clone();
    let config = store.read_config()?;

    let rewrites: Vec<Rewrite> = parse_entries(&config, prefix)
        .into_iter()
        .filter(|entry| entry.endpoint == from.endpoint && from.endpoint != to.endpoint)
        .map(|entry| Rewrite {
            alias: entry.alias,
            from: entry.endpoint,
            to: to.endpoint.clone(),
        })
        .collect();

    let plan = SwitchPlan {
        from,
        to,
        rewrites,
        dry_run,
    };
    if dry_run {
        debug!("Dry run: {} entries would move", plan.rewrites.len());
        return Ok(plan);
    }

    if !plan.rewrites.is_empty() {
        let mut updated = config;
        for rewrite in &plan.rewrites {
            updated = apply(&updated, &rewrite.alias, &rewrite.to)?;
        }
        store.write_config(&updated)?;
    }
    registry.active = plan.to.name.clone();
    registry.save()?;

    info!(
        "Switched from {} to {} ({} entries moved)",
        plan.from.name,
        plan.to.name,
        plan.rewrites.len()
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::mock::MemoryTrustStore;
    use tempfile::TempDir;

    const CONFIG: &str = "\
Host github.com
  HostName github.com

Host dev-proj-abc123
\tHostName   10.0.0.5
    Port 2200
    User dev

Host dev-other-fedcba
    HostName 10.0.0.7
    Port 2201
    User dev

Host devbox
    HostName 10.0.0.5
";

    #[test]
    fn test_parse_entries_keys_on_prefix() {
        let entries = parse_entries(CONFIG, "dev");
        assert_eq!(
            entries,
            vec![
                TrustEntry {
                    alias: "dev-proj-abc123".to_string(),
                    endpoint: "10.0.0.5".to_string()
                },
                TrustEntry {
                    alias: "dev-other-fedcba".to_string(),
                    endpoint: "10.0.0.7".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_diff_empty_iff_all_match() {
        let config = "Host dev-a-111111\n    HostName 10.0.0.7\nHost dev-b-222222\n    HostName 10.0.0.7\n";
        assert!(diff(config, "dev", "10.0.0.7").is_empty());

        let mismatches = diff(config, "dev", "10.0.0.9");
        assert_eq!(mismatches.len(), 2);
        assert_eq!(mismatches[0].recorded, "10.0.0.7");
        assert_eq!(mismatches[0].expected, "10.0.0.9");
    }

    #[test]
    fn test_apply_preserves_formatting() {
        let config = "Host x\n  User a\n\nHost dev-a-111111\n\tHostName=10.0.0.7\n    Port 2200\n";
        let updated = apply(config, "dev-a-111111", "192.168.1.20").unwrap();
        assert_eq!(
            updated,
            "Host x\n  User a\n\nHost dev-a-111111\n\tHostName=192.168.1.20\n    Port 2200\n"
        );
    }

    #[test]
    fn test_apply_with_inline_comment_rewrites_the_value() {
        let config = "Host dev-a-111111\n    HostName 10.0.0.7 # was 10.0.0.7 before the move\n";
        assert!(diff(config, "dev", "10.0.0.7").is_empty());

        let updated = apply(config, "dev-a-111111", "10.0.0.9").unwrap();
        assert_eq!(
            updated,
            "Host dev-a-111111\n    HostName 10.0.0.9 # was 10.0.0.7 before the move\n"
        );
    }

    #[test]
    fn test_apply_unknown_alias() {
        let err = apply(CONFIG, "dev-none-000000", "1.2.3.4").unwrap_err();
        assert!(err.to_string().contains("dev-none-000000"));
    }

    fn registry(dir: &TempDir) -> ConnectionRegistry {
        let mut registry = ConnectionRegistry::new(dir.path().join("connections.toml"));
        registry.upsert(Connection {
            name: "lab".to_string(),
            endpoint: "10.0.0.7".to_string(),
            host: Some("ssh://dev@lab".to_string()),
        });
        registry.upsert(Connection {
            name: "cloud".to_string(),
            endpoint: "203.0.113.4".to_string(),
            host: Some("ssh://dev@cloud".to_string()),
        });
        registry.active = "lab".to_string();
        registry
    }

    #[test]
    fn test_switch_dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(&dir);
        let store = MemoryTrustStore::with_config(CONFIG);

        let plan = switch(&mut registry, &store, "dev", "cloud", true).unwrap();
        assert_eq!(plan.rewrites.len(), 1);
        assert_eq!(plan.rewrites[0].alias, "dev-other-fedcba");
        assert_eq!(store.config(), CONFIG);
        assert_eq!(store.config_writes(), 0);
        assert_eq!(registry.active, "lab");
        assert!(!registry.path().exists());
    }

    #[test]
    fn test_switch_applies_and_flips_active() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(&dir);
        let store = MemoryTrustStore::with_config(CONFIG);

        let plan = switch(&mut registry, &store, "dev", "cloud", false).unwrap();
        assert!(!plan.dry_run);
        assert!(store.config().contains("    HostName 203.0.113.4\n    Port 2201"));
        assert!(store.config().contains("\tHostName   10.0.0.5\n"));
        assert_eq!(registry.active, "cloud");

        let reloaded = ConnectionRegistry::load(registry.path()).unwrap();
        assert_eq!(reloaded.active, "cloud");
        assert_eq!(reloaded.connections.len(), 3);
    }

    #[test]
    fn test_switch_to_unknown_connection() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(&dir);
        let store = MemoryTrustStore::new();
        let err = switch(&mut registry, &store, "dev", "mars", false).unwrap_err();
        assert!(err.is_usage_error());
    }

    #[test]
    fn test_load_missing_registry_defaults_to_local() {
        let dir = TempDir::new().unwrap();
        let registry = ConnectionRegistry::load(&dir.path().join("none.toml")).unwrap();
        assert_eq!(registry.active_connection().unwrap(), &Connection::local());
    }

    #[test]
    fn test_load_rejects_dangling_active() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("connections.toml");
        std::fs::write(
            &path,
            "active = \"gone\"\n\n[[connections]]\nname = \"local\"\nendpoint = \"127.0.0.1\"\n",
        )
        .unwrap();
        assert!(ConnectionRegistry::load(&path).is_err());
    }
}
