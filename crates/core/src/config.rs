//! Operator settings
//!
//! Settings live in a TOML file (default `<config dir>/burrow/config.toml`,
//! overridable with `BURROW_CONFIG` or `--config`). Every field has a default,
//! so a missing file yields a usable configuration.

use crate::errors::{ConfigError, Result};
use crate::identity;
use crate::ports::PortFloors;
use directories_next::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Environment variable overriding the settings file location
pub const ENV_CONFIG: &str = "BURROW_CONFIG";

/// Operator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Name prefix for every managed resource (`prefix-repo-hash`)
    pub prefix: String,
    /// Image used for new resources
    pub base_image: String,
    /// Account inside the resource that owns the workspace and receives SSH keys
    pub remote_user: String,
    /// First host port for SSH
    pub control_port_floor: u16,
    /// First host port for the web/service port
    pub service_port_floor: u16,
    /// Number of candidates scanned above each floor
    pub port_scan_window: u16,
    /// Port sshd listens on inside the resource
    pub control_container_port: u16,
    /// Service port inside the resource
    pub service_container_port: u16,
    /// Paths inside the resource backed by named volumes
    pub persistent_paths: Vec<String>,
    /// Workspace directory inside the resource
    pub workspace_dir: String,
    /// Public key installed for interactive access
    pub client_public_key: Option<PathBuf>,
    /// Local directory copied into the remote user's home on create and rebuild
    pub baseline_dir: Option<PathBuf>,
    /// Shell command run once inside a fresh workspace
    pub init_command: Option<String>,
    /// Local command run by `rebuild --build` before the resource is replaced
    pub build_command: Option<String>,
    /// Abort create/rebuild when no host certificate can be issued
    pub require_host_certificate: bool,
    /// Validity interval passed to the signing utility
    pub certificate_validity: String,
    /// Certificate authority directory
    pub ca_dir: Option<PathBuf>,
    /// Client ssh config file holding one block per resource
    pub ssh_config_path: Option<PathBuf>,
    /// Client known_hosts file receiving the trust anchor
    pub known_hosts_path: Option<PathBuf>,
    /// Connection registry file
    pub connections_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            prefix: "dev".to_string(),
            base_image: "ghcr.io/burrow-dev/devbox:latest".to_string(),
            remote_user: "dev".to_string(),
            control_port_floor: 2200,
            service_port_floor: 3000,
            port_scan_window: 200,
            control_container_port: 22,
            service_container_port: 8080,
            persistent_paths: vec!["/workspace".to_string(), "/home/dev".to_string()],
            workspace_dir: "/workspace".to_string(),
            client_public_key: None,
            baseline_dir: None,
            init_command: None,
            build_command: None,
            require_host_certificate: false,
            certificate_validity: "+520w".to_string(),
            ca_dir: None,
            ssh_config_path: None,
            known_hosts_path: None,
            connections_path: None,
        }
    }
}

/// Fully resolved filesystem locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub ca_dir: PathBuf,
    pub ssh_config: PathBuf,
    pub known_hosts: PathBuf,
    pub connections: PathBuf,
    pub client_public_key: PathBuf,
}

impl Settings {
    /// Load settings from an explicit path, `BURROW_CONFIG`, or the default location
    ///
    /// An explicit path (flag or env) must exist; the default location may be absent.
    #[instrument]
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os(ENV_CONFIG).map(PathBuf::from);
        let (path, required) = match explicit.map(Path::to_path_buf).or(env_path) {
            Some(path) => (Some(path), true),
            None => (default_config_file(), false),
        };

        let Some(path) = path else {
            debug!("No config directory available, using default settings");
            return Ok(Self::default());
        };

        if !path.exists() {
            if required {
                return Err(ConfigError::NotFound {
                    path: path.display().to_string(),
                }
                .into());
            }
            debug!("Settings file {} absent, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(ConfigError::Io)?;
        let settings = Self::from_toml(&content, &path)?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml(content: &str, origin: &Path) -> Result<Self> {
        let settings: Self = toml::from_str(content).map_err(|e| ConfigError::Parsing {
            path: origin.display().to_string(),
            message: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| -> Result<()> {
            Err(ConfigError::Validation { message }.into())
        };

        if identity::sanitize_segment(&self.prefix).as_deref() != Some(self.prefix.as_str()) {
            return invalid(format!(
                "prefix '{}' must be lowercase alphanumerics separated by single hyphens",
                self.prefix
            ));
        }
        if self.control_port_floor == 0 || self.service_port_floor == 0 {
            return invalid("port floors must be non-zero".to_string());
        }
        if self.port_scan_window == 0 {
            return invalid("port_scan_window must be at least 1".to_string());
        }
        let control_end = u32::from(self.control_port_floor) + u32::from(self.port_scan_window);
        let service_end = u32::from(self.service_port_floor) + u32::from(self.port_scan_window);
        let overlaps = u32::from(self.control_port_floor) < service_end
            && u32::from(self.service_port_floor) < control_end;
        if overlaps {
            return invalid(format!(
                "control ports {}..{} overlap service ports {}..{}",
                self.control_port_floor, control_end, self.service_port_floor, service_end
            ));
        }
        if self.remote_user.is_empty() {
            return invalid("remote_user must not be empty".to_string());
        }
        if !self.workspace_dir.starts_with('/') {
            return invalid(format!(
                "workspace_dir '{}' must be an absolute path",
                self.workspace_dir
            ));
        }
        if let Some(bad) = self.persistent_paths.iter().find(|p| !p.starts_with('/')) {
            return invalid(format!("persistent path '{}' must be absolute", bad));
        }
        Ok(())
    }

    /// Port floors for the allocator
    pub fn port_floors(&self) -> PortFloors {
        PortFloors {
            control: self.control_port_floor,
            service: self.service_port_floor,
        }
    }

    /// Home directory of the remote user inside a resource
    pub fn remote_home(&self) -> String {
        if self.remote_user == "root" {
            "/root".to_string()
        } else {
            format!("/home/{}", self.remote_user)
        }
    }

    /// Resolve every optional location against the platform directories
    pub fn resolve_paths(&self) -> Result<ResolvedPaths> {
        let base = BaseDirs::new().ok_or_else(|| ConfigError::Validation {
            message: "cannot determine the home directory".to_string(),
        })?;
        let home = base.home_dir();
        let project = ProjectDirs::from("dev", "burrow", "burrow");
        let data_dir = project
            .as_ref()
            .map(|p| p.data_dir().to_path_buf())
            .unwrap_or_else(|| home.join(".local/share/burrow"));
        let config_dir = project
            .as_ref()
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| home.join(".config/burrow"));

        Ok(ResolvedPaths {
            ca_dir: self.ca_dir.clone().unwrap_or_else(|| data_dir.join("ca")),
            ssh_config: self
                .ssh_config_path
                .clone()
                .unwrap_or_else(|| home.join(".ssh/config.d/burrow")),
            known_hosts: self
                .known_hosts_path
                .clone()
                .unwrap_or_else(|| home.join(".ssh/known_hosts")),
            connections: self
                .connections_path
                .clone()
                .unwrap_or_else(|| config_dir.join("connections.toml")),
            client_public_key: self
                .client_public_key
                .clone()
                .unwrap_or_else(|| home.join(".ssh/id_ed25519.pub")),
        })
    }
}

fn default_config_file() -> Option<PathBuf> {
    ProjectDirs::from("dev", "burrow", "burrow").map(|p| p.config_dir().join("config.toml"))
}
