//! Wiring from settings and the connection registry to the core collaborators

use crate::cli::{CliContext, OutputFormat};
use anyhow::{Context, Result};
use burrow_core::ca::{CertificateAuthority, SshKeygen};
use burrow_core::config::{ResolvedPaths, Settings};
use burrow_core::errors::BurrowError;
use burrow_core::io::Output;
use burrow_core::orchestrator::Orchestrator;
use burrow_core::runtime::{CliRuntime, RuntimeKind};
use burrow_core::trust::FileTrustStore;
use burrow_core::trust_sync::{Connection, ConnectionRegistry};
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;

pub type CliOrchestrator = Orchestrator<CliRuntime, FileTrustStore, SshKeygen>;

/// Settings, resolved locations and the connection registry for one invocation
#[derive(Debug)]
pub struct Environment {
    pub settings: Settings,
    pub paths: ResolvedPaths,
    pub registry: ConnectionRegistry,
    runtime: Option<RuntimeKind>,
}

impl Environment {
    pub fn load(context: &CliContext) -> Result<Self> {
        let settings = Settings::load(context.config.as_deref())?;
        let paths = settings.resolve_paths()?;
        let registry = ConnectionRegistry::load(&paths.connections)?;
        debug!(
            "Active connection {} (registry {})",
            registry.active,
            paths.connections.display()
        );
        Ok(Self {
            settings,
            paths,
            registry,
            runtime: context.runtime,
        })
    }

    pub fn active(&self) -> Result<&Connection> {
        Ok(self.registry.active_connection()?)
    }

    pub fn trust_store(&self) -> FileTrustStore {
        FileTrustStore::new(&self.paths.ssh_config, &self.paths.known_hosts)
    }

    pub fn certificate_authority(&self) -> CertificateAuthority<SshKeygen> {
        CertificateAuthority::open(&self.paths.ca_dir, SshKeygen::new())
            .with_validity(&self.settings.certificate_validity)
    }

    /// Runtime adapter pointed at the active connection's daemon
    pub fn runtime(&self) -> Result<CliRuntime> {
        let kind = RuntimeKind::detect(self.runtime);
        let host = self.active()?.host.clone();
        debug!("Using {} runtime (host: {:?})", kind, host);
        Ok(CliRuntime::new(kind, host))
    }

    /// Client public key to install: the configured one, else the default when present
    fn client_public_key(&self) -> Option<PathBuf> {
        if self.settings.client_public_key.is_some() || self.paths.client_public_key.exists() {
            Some(self.paths.client_public_key.clone())
        } else {
            debug!(
                "No client public key at {}, skipping key install",
                self.paths.client_public_key.display()
            );
            None
        }
    }

    pub fn orchestrator(&self) -> Result<CliOrchestrator> {
        let endpoint = self.active()?.endpoint.clone();
        let mut orchestrator = Orchestrator::new(
            self.runtime()?,
            self.trust_store(),
            self.certificate_authority(),
            self.settings.clone(),
            endpoint,
        );
        if let Some(key) = self.client_public_key() {
            orchestrator = orchestrator.with_client_public_key(key);
        }
        Ok(orchestrator)
    }
}

/// Ask for confirmation on the terminal; refuse when nobody can answer
pub fn confirm(prompt: &str) -> Result<bool> {
    let term = console::Term::stderr();
    if !term.features().is_attended() {
        return Err(BurrowError::validation(
            "confirmation required but no terminal is attached; pass --force or --yes",
        )
        .into());
    }
    term.write_str(&format!("{} [y/N] ", prompt))
        .context("failed to write prompt")?;
    let answer = term.read_line().context("failed to read answer")?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Print `value` as JSON, or the text produced by `render`
pub fn emit<T, F>(format: OutputFormat, value: &T, render: F) -> Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> Vec<String>,
{
    let mut output = Output::stdout();
    match format {
        OutputFormat::Json => output.write_json(value),
        OutputFormat::Text => {
            for line in render(value) {
                output.write_line(&line)?;
            }
            Ok(())
        }
    }
}

/// Warnings go to stderr so stdout stays parseable
pub fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        eprintln!("{} {}", console::style("warning:").yellow().bold(), warning);
    }
}
