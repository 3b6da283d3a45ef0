//! Resource lifecycle pipelines
//!
//! The orchestrator composes identity, port allocation, the certificate
//! authority, the container runtime, and the client trust store into the
//! create, rebuild, and remove pipelines:
//!
//! ```text
//! absent --create--> created --start--> running <--start/stop--> stopped
//!   ^                                      |
//!   |                                   rebuild (remove keeping storage, recreate)
//!   +---------------remove-----------------+
//! ```
//!
//! Every side effect of provisioning pushes its compensation onto a
//! [`CleanupStack`]. A failed create unwinds the stack and returns the original
//! error. A failed rebuild unwinds its own partial work, but the previous
//! resource is already gone at that point, so the error says so explicitly.

use crate::ca::{CertificateAuthority, HostCertificateBundle, KeyTool};
use crate::cleanup::CleanupStack;
use crate::config::Settings;
use crate::errors::{BurrowError, ConfigError, Result};
use crate::identity;
use crate::ports::{allocate_pair, ports_in_use, PortPair};
use crate::runtime::{
    volume_mounts, ContainerRuntime, CreateSpec, Resource, LABEL_CONTROL_PORT, LABEL_MANAGED,
    LABEL_REPO, LABEL_SERVICE_PORT, LABEL_WORKTREE,
};
use crate::trust::{HostBlock, TrustStore};
use crate::worktree;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument, warn};

/// Marker file written into the workspace after the init command succeeds
pub const INIT_MARKER: &str = ".burrow-initialized";

/// Steps of the provisioning pipelines, used for error context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    CreateResource,
    DeliverCertificate,
    StartResource,
    ReconcileOwnership,
    InstallClientKey,
    PopulateContent,
    RegisterTrust,
    ReadState,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateResource => "create resource",
            Self::DeliverCertificate => "deliver host certificate",
            Self::StartResource => "start resource",
            Self::ReconcileOwnership => "reconcile storage ownership",
            Self::InstallClientKey => "install client key",
            Self::PopulateContent => "populate content",
            Self::RegisterTrust => "register trust entry",
            Self::ReadState => "read resource state",
        }
    }
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct StepFailure {
    step: PipelineStep,
    error: BurrowError,
}

trait StepContext<T> {
    fn at(self, step: PipelineStep) -> std::result::Result<T, StepFailure>;
}

impl<T> StepContext<T> for Result<T> {
    fn at(self, step: PipelineStep) -> std::result::Result<T, StepFailure> {
        self.map_err(|error| StepFailure { step, error })
    }
}

/// Input for [`Orchestrator::create`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    /// Any path inside the worktree
    pub path: PathBuf,
    /// Repository name segment; derived from the worktree when absent
    pub repo_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildOptions {
    /// Run the configured build command before replacing the resource
    pub build_image: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Keep the named volumes
    pub keep_storage: bool,
}

/// Summary of an issued host certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSummary {
    pub identity: String,
    pub principals: Vec<String>,
    pub issued_at: DateTime<Utc>,
}

impl From<&HostCertificateBundle> for CertificateSummary {
    fn from(bundle: &HostCertificateBundle) -> Self {
        Self {
            identity: bundle.identity.clone(),
            principals: bundle.principals.clone(),
            issued_at: bundle.issued_at,
        }
    }
}

/// Result of a successful create or rebuild
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionOutcome {
    pub resource: Resource,
    /// `None` when the pipeline continued without a host certificate
    pub certificate: Option<CertificateSummary>,
    pub warnings: Vec<String>,
}

/// Result of a successful remove
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveOutcome {
    pub name: String,
    pub storage_kept: bool,
    /// Non-fatal client-side cleanup failures
    pub warnings: Vec<String>,
}

/// Resource state joined with its client connection entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub resource: Resource,
    pub connection: Option<HostBlock>,
    pub endpoint: String,
    /// The connection entry points at an endpoint other than the active one
    pub stale_connection: bool,
    pub ssh_command: String,
}

/// A baseline file and its path relative to the baseline directory
#[derive(Debug, Clone, PartialEq, Eq)]
struct BaselineFile {
    local: PathBuf,
    relative: String,
}

struct Provision<'p> {
    name: &'p str,
    image: &'p str,
    ports: PortPair,
    labels: BTreeMap<String, String>,
    certificate: Option<&'p HostCertificateBundle>,
    client_key: Option<&'p str>,
    baseline: &'p [BaselineFile],
}

/// Drives resources through their lifecycle
pub struct Orchestrator<R, T, K>
where
    R: ContainerRuntime,
    T: TrustStore,
    K: KeyTool,
{
    runtime: R,
    trust: T,
    ca: CertificateAuthority<K>,
    settings: Settings,
    endpoint: String,
    client_public_key: Option<PathBuf>,
}

impl<R, T, K> Orchestrator<R, T, K>
where
    R: ContainerRuntime,
    T: TrustStore,
    K: KeyTool,
{
    /// `endpoint` is the address clients use to reach published ports
    pub fn new(
        runtime: R,
        trust: T,
        ca: CertificateAuthority<K>,
        settings: Settings,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            trust,
            ca,
            settings,
            endpoint: endpoint.into(),
            client_public_key: None,
        }
    }

    /// Public key installed into every resource for interactive access
    pub fn with_client_public_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_public_key = Some(path.into());
        self
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn trust(&self) -> &T {
        &self.trust
    }

    pub fn ca(&self) -> &CertificateAuthority<K> {
        &self.ca
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Name a create request would produce, without touching the runtime
    pub fn resolve_name(&self, request: &CreateRequest) -> Result<String> {
        let root = worktree::resolve_worktree_root(&request.path)?;
        let repo_name = match &request.repo_name {
            Some(name) => name.clone(),
            None => worktree::repository_name(&root)?,
        };
        let name = identity::resolve(&self.settings.prefix, &repo_name, &root)?;
        identity::validate_name(&name)?;
        Ok(name)
    }

    /// Provision a new resource for a worktree
    #[instrument(skip(self, request), fields(path = %request.path.display()))]
    pub async fn create(&self, request: &CreateRequest) -> Result<ProvisionOutcome> {
        let root = worktree::resolve_worktree_root(&request.path)?;
        let repo_name = match &request.repo_name {
            Some(name) => name.clone(),
            None => worktree::repository_name(&root)?,
        };
        let name = identity::resolve(&self.settings.prefix, &repo_name, &root)?;
        identity::validate_name(&name)?;
        let client_key = self.read_client_key()?;
        let baseline = self.baseline_files()?;

        if self.runtime.exists(&name).await? {
            return Err(BurrowError::Conflict {
                message: format!(
                    "{} already exists; use `burrow rebuild {}` or remove it first",
                    name, name
                ),
            });
        }

        info!("Creating {} for {}", name, root.display());
        let ports = allocate_pair(
            &self.runtime,
            self.settings.port_floors(),
            self.settings.port_scan_window,
        )
        .await?;

        let mut warnings = Vec::new();
        let certificate = self.issue_certificate(&name, &mut warnings).await?;

        let mut labels = BTreeMap::new();
        labels.insert(LABEL_WORKTREE.to_string(), root.display().to_string());
        labels.insert(
            LABEL_REPO.to_string(),
            identity::sanitize_segment(&repo_name).unwrap_or_default(),
        );

        let plan = Provision {
            name: &name,
            image: &self.settings.base_image,
            ports,
            labels,
            certificate: certificate.as_ref(),
            client_key: client_key.as_deref(),
            baseline: &baseline,
        };

        let mut cleanup = CleanupStack::new();
        match self.provision(&plan, &mut cleanup).await {
            Ok(resource) => {
                cleanup.discard();
                info!(
                    "Created {} (ssh port {}, service port {})",
                    name, resource.control_port, resource.service_port
                );
                Ok(ProvisionOutcome {
                    resource,
                    certificate: certificate.as_ref().map(CertificateSummary::from),
                    warnings,
                })
            }
            Err(failure) => {
                error!("Create of {} failed during {}: {}", name, failure.step, failure.error);
                let report = cleanup.unwind().await;
                if !report.is_clean() {
                    warn!(
                        "Rollback of {} incomplete; run `burrow remove {}` to finish cleanup",
                        name, name
                    );
                }
                Err(failure.error)
            }
        }
    }

    /// Replace a resource, keeping its name, ports, image and storage
    #[instrument(skip(self, options))]
    pub async fn rebuild(&self, name: &str, options: &RebuildOptions) -> Result<ProvisionOutcome> {
        identity::validate_name(name)?;
        if options.build_image && self.settings.build_command.is_none() {
            return Err(BurrowError::validation(
                "--build requires `build_command` in the settings file",
            ));
        }
        let client_key = self.read_client_key()?;
        let baseline = self.baseline_files()?;

        let existing = self.runtime.find(name).await?.ok_or_else(|| BurrowError::NotFound {
            name: name.to_string(),
        })?;
        let ports = PortPair {
            control: existing.control_port,
            service: existing.service_port,
        };
        if !existing.is_running() {
            self.check_ports_free(&existing).await?;
        }
        info!(
            "Rebuilding {} on ports {}/{}",
            name, ports.control, ports.service
        );

        if options.build_image {
            self.build_image(&existing.image).await?;
        }

        let mut warnings = Vec::new();
        let certificate = self.issue_certificate(name, &mut warnings).await?;

        if existing.is_running() {
            if let Err(e) = self.runtime.stop(name).await {
                warn!("Stopping {} failed, removing it anyway: {}", name, e);
            }
        }
        self.runtime.remove(name, true).await?;
        debug!("Removed {} with storage kept", name);

        let plan = Provision {
            name,
            image: &existing.image,
            ports,
            labels: existing.labels.clone(),
            certificate: certificate.as_ref(),
            client_key: client_key.as_deref(),
            baseline: &baseline,
        };

        let mut cleanup = CleanupStack::new();
        match self.provision(&plan, &mut cleanup).await {
            Ok(resource) => {
                cleanup.discard();
                info!("Rebuilt {}", name);
                Ok(ProvisionOutcome {
                    resource,
                    certificate: certificate.as_ref().map(CertificateSummary::from),
                    warnings,
                })
            }
            Err(failure) => {
                error!("Rebuild of {} failed during {}: {}", name, failure.step, failure.error);
                cleanup.unwind().await;
                Err(BurrowError::RebuildIncomplete {
                    step: failure.step.to_string(),
                    name: name.to_string(),
                    control_port: ports.control,
                    service_port: ports.service,
                    source: Box::new(failure.error),
                })
            }
        }
    }

    /// Remove a resource and its client connection entry
    #[instrument(skip(self, options))]
    pub async fn remove(&self, name: &str, options: &RemoveOptions) -> Result<RemoveOutcome> {
        identity::validate_name(name)?;
        // Only resources in the managed listing; a same-named foreign container is not ours
        self.require(name).await?;

        let mut warnings = Vec::new();
        match self.trust.remove_block(name) {
            Ok(true) => debug!("Removed connection entry for {}", name),
            Ok(false) => debug!("No connection entry for {}", name),
            Err(e) => warnings.push(format!("failed to remove connection entry: {}", e)),
        }

        self.runtime.remove(name, options.keep_storage).await?;
        info!(
            "Removed {}{}",
            name,
            if options.keep_storage {
                " (storage kept)"
            } else {
                ""
            }
        );
        for warning in &warnings {
            warn!("{}: {}", name, warning);
        }

        Ok(RemoveOutcome {
            name: name.to_string(),
            storage_kept: options.keep_storage,
            warnings,
        })
    }

    /// Start a stopped resource
    ///
    /// Ports of a stopped resource may have been handed to another resource in
    /// the meantime; that is reported as a conflict instead of a bind failure.
    #[instrument(skip(self))]
    pub async fn start(&self, name: &str) -> Result<Resource> {
        identity::validate_name(name)?;
        let resources = self.runtime.list().await?;
        let target = resources
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| BurrowError::NotFound {
                name: name.to_string(),
            })?;
        if target.is_running() {
            debug!("{} already running", name);
            return Ok(target.clone());
        }

        ensure_ports_free(target, &resources)?;

        self.runtime.start(name).await?;
        info!("Started {}", name);
        self.require(name).await
    }

    #[instrument(skip(self))]
    pub async fn stop(&self, name: &str) -> Result<Resource> {
        identity::validate_name(name)?;
        let resource = self.require(name).await?;
        if !resource.is_running() {
            debug!("{} already stopped", name);
            return Ok(resource);
        }
        self.runtime.stop(name).await?;
        info!("Stopped {}", name);
        self.require(name).await
    }

    /// Every managed resource, sorted by name
    pub async fn list(&self) -> Result<Vec<Resource>> {
        let mut resources = self.runtime.list().await?;
        resources.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(resources)
    }

    pub async fn info(&self, name: &str) -> Result<ResourceInfo> {
        identity::validate_name(name)?;
        let resource = self.require(name).await?;
        let connection = match self.trust.find_block(name) {
            Ok(block) => block,
            Err(e) => {
                warn!("Cannot read connection entry for {}: {}", name, e);
                None
            }
        };
        let stale_connection = connection
            .as_ref()
            .is_some_and(|block| block.host_name != self.endpoint);
        Ok(ResourceInfo {
            resource,
            connection,
            endpoint: self.endpoint.clone(),
            stale_connection,
            ssh_command: format!("ssh {}", name),
        })
    }

    async fn check_ports_free(&self, resource: &Resource) -> Result<()> {
        let resources = self.runtime.list().await?;
        ensure_ports_free(resource, &resources)
    }

    async fn require(&self, name: &str) -> Result<Resource> {
        self.runtime
            .find(name)
            .await?
            .ok_or_else(|| BurrowError::NotFound {
                name: name.to_string(),
            })
    }

    /// Steps shared by create and rebuild, from runtime create to trust entry
    async fn provision<'a>(
        &'a self,
        plan: &Provision<'_>,
        cleanup: &mut CleanupStack<'a>,
    ) -> std::result::Result<Resource, StepFailure> {
        let name = plan.name;

        let mut labels = plan.labels.clone();
        labels.insert(LABEL_MANAGED.to_string(), "true".to_string());
        labels.insert(LABEL_CONTROL_PORT.to_string(), plan.ports.control.to_string());
        labels.insert(LABEL_SERVICE_PORT.to_string(), plan.ports.service.to_string());
        let spec = CreateSpec {
            name: name.to_string(),
            image: plan.image.to_string(),
            control_port: plan.ports.control,
            service_port: plan.ports.service,
            control_container_port: self.settings.control_container_port,
            service_container_port: self.settings.service_container_port,
            labels,
            volumes: volume_mounts(name, &self.settings.persistent_paths),
        };
        let created = self
            .runtime
            .create(&spec)
            .await
            .at(PipelineStep::CreateResource)?;
        {
            // Reattached volumes predate this pipeline and are left alone
            let runtime = &self.runtime;
            let owned = name.to_string();
            let new_volumes = created.new_volumes;
            cleanup.push("remove resource", move || async move {
                runtime.remove(&owned, true).await?;
                runtime.remove_volumes(&new_volumes).await
            });
        }

        if let Some(bundle) = plan.certificate {
            self.deliver_certificate(name, bundle)
                .await
                .at(PipelineStep::DeliverCertificate)?;
        }

        self.runtime
            .start(name)
            .await
            .at(PipelineStep::StartResource)?;
        {
            let runtime = &self.runtime;
            let owned = name.to_string();
            cleanup.push("stop resource", move || async move { runtime.stop(&owned).await });
        }

        self.reconcile_ownership(name)
            .await
            .at(PipelineStep::ReconcileOwnership)?;

        if let Some(key) = plan.client_key {
            self.install_client_key(name, key)
                .await
                .at(PipelineStep::InstallClientKey)?;
        }

        self.populate_content(name, plan.baseline)
            .await
            .at(PipelineStep::PopulateContent)?;

        self.register_trust(name, plan.ports, plan.certificate.is_some())
            .at(PipelineStep::RegisterTrust)?;
        {
            let trust = &self.trust;
            let owned = name.to_string();
            cleanup.push("remove trust entry", move || async move {
                trust.remove_block(&owned).map(|_| ())
            });
        }

        self.require(name).await.at(PipelineStep::ReadState)
    }

    /// Issue a host certificate, degrading to `None` unless certificates are required
    async fn issue_certificate(
        &self,
        name: &str,
        warnings: &mut Vec<String>,
    ) -> Result<Option<HostCertificateBundle>> {
        match self.ca.issue_host_certificate(name, &self.endpoint).await {
            Ok(bundle) => Ok(Some(bundle)),
            Err(e) if self.settings.require_host_certificate => Err(e),
            Err(e) => {
                warn!("Continuing without a host certificate for {}: {}", name, e);
                warnings.push(format!(
                    "no host certificate issued ({}); clients will have to trust the host key on first use",
                    e
                ));
                Ok(None)
            }
        }
    }

    async fn deliver_certificate(&self, name: &str, bundle: &HostCertificateBundle) -> Result<()> {
        for (local, remote) in bundle.deliveries() {
            self.runtime.copy_file_in(name, local, remote).await?;
        }
        debug!("Delivered host certificate to {}", name);
        Ok(())
    }

    fn owner(&self) -> String {
        format!("{0}:{0}", self.settings.remote_user)
    }

    async fn exec_checked(&self, name: &str, argv: Vec<String>) -> Result<()> {
        self.runtime.exec(name, &argv).await?.check(name, &argv)?;
        Ok(())
    }

    /// Hand freshly mounted volumes to the remote user
    async fn reconcile_ownership(&self, name: &str) -> Result<()> {
        if self.settings.persistent_paths.is_empty() {
            return Ok(());
        }
        let mut argv = vec!["chown".to_string(), "-R".to_string(), self.owner()];
        argv.extend(self.settings.persistent_paths.iter().cloned());
        self.exec_checked(name, argv).await
    }

    /// Append the client key to `authorized_keys` unless already present
    async fn install_client_key(&self, name: &str, key: &str) -> Result<()> {
        let ssh_dir = format!("{}/.ssh", self.settings.remote_home());
        let authorized_keys = format!("{}/authorized_keys", ssh_dir);
        let script = format!(
            "set -e; key=$(cat); umask 077; mkdir -p {dir}; touch {file}; \
             grep -qxF \"$key\" {file} || printf '%s\\n' \"$key\" >> {file}; \
             chown -R {owner} {dir}",
            dir = shell_words::quote(&ssh_dir),
            file = shell_words::quote(&authorized_keys),
            owner = shell_words::quote(&self.owner()),
        );
        let argv = vec!["sh".to_string(), "-c".to_string(), script];
        self.runtime
            .exec_with_stdin(name, &argv, key.as_bytes())
            .await?
            .check(name, &argv)?;
        debug!("Installed client key in {}", name);
        Ok(())
    }

    /// Copy baseline files into the remote home and run the one-time init command
    async fn populate_content(&self, name: &str, baseline: &[BaselineFile]) -> Result<()> {
        let home = self.settings.remote_home();

        if !baseline.is_empty() {
            let targets: Vec<String> = baseline
                .iter()
                .map(|file| format!("{}/{}", home, file.relative))
                .collect();
            let dirs: BTreeSet<String> = targets
                .iter()
                .filter_map(|target| Path::new(target).parent())
                .map(|dir| dir.display().to_string())
                .collect();

            let mut mkdir = vec!["mkdir".to_string(), "-p".to_string()];
            mkdir.extend(dirs.iter().cloned());
            self.exec_checked(name, mkdir).await?;

            for (file, target) in baseline.iter().zip(&targets) {
                self.runtime.copy_file_in(name, &file.local, target).await?;
            }

            let mut chown = vec!["chown".to_string(), self.owner()];
            chown.extend(dirs);
            chown.extend(targets);
            self.exec_checked(name, chown).await?;
            debug!("Copied {} baseline file(s) into {}", baseline.len(), name);
        }

        if let Some(command) = &self.settings.init_command {
            let workspace = &self.settings.workspace_dir;
            let marker = format!("{}/{}", workspace, INIT_MARKER);
            let script = format!(
                "set -e; if [ ! -e {marker} ]; then mkdir -p {ws}; cd {ws}; {command}; \
                 touch {marker}; chown -R {owner} {ws}; fi",
                marker = shell_words::quote(&marker),
                ws = shell_words::quote(workspace),
                command = command,
                owner = shell_words::quote(&self.owner()),
            );
            let argv = vec![
                "env".to_string(),
                format!("BURROW_NAME={}", name),
                format!("HOME={}", home),
                "sh".to_string(),
                "-c".to_string(),
                script,
            ];
            self.exec_checked(name, argv).await?;
            debug!("Workspace of {} initialized", name);
        }
        Ok(())
    }

    /// Write the client connection entry, plus the CA anchor when a certificate was issued
    fn register_trust(&self, name: &str, ports: PortPair, certified: bool) -> Result<()> {
        if certified {
            let anchor = self
                .ca
                .trust_anchor_line(&self.settings.prefix, &self.endpoint)?;
            if self.trust.append_known_host_line(&anchor)? {
                info!("Trusting burrow certificates for {}", self.endpoint);
            }
        }
        self.trust.write_block(&HostBlock {
            alias: name.to_string(),
            host_name: self.endpoint.clone(),
            port: ports.control,
            user: self.settings.remote_user.clone(),
        })
    }

    async fn build_image(&self, image: &str) -> Result<()> {
        let command = self
            .settings
            .build_command
            .as_deref()
            .ok_or_else(|| BurrowError::validation("no build_command configured"))?;
        info!("Building {} with `{}`", image, command);
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .env("BURROW_IMAGE", image)
            .status()
            .await
            .map_err(|e| BurrowError::Internal {
                message: format!("failed to run build command: {}", e),
            })?;
        if !status.success() {
            return Err(BurrowError::Internal {
                message: format!("build command `{}` exited with {}", command, status),
            });
        }
        Ok(())
    }

    fn read_client_key(&self) -> Result<Option<String>> {
        let Some(path) = &self.client_public_key else {
            return Ok(None);
        };
        let content = fs::read_to_string(path).map_err(|e| {
            BurrowError::validation(format!(
                "cannot read client public key {}: {}",
                path.display(),
                e
            ))
        })?;
        let key = content.trim();
        if key.is_empty() || key.lines().count() != 1 {
            return Err(BurrowError::validation(format!(
                "client public key {} must contain exactly one key",
                path.display()
            )));
        }
        Ok(Some(key.to_string()))
    }

    fn baseline_files(&self) -> Result<Vec<BaselineFile>> {
        let Some(dir) = &self.settings.baseline_dir else {
            return Ok(Vec::new());
        };
        if !dir.is_dir() {
            return Err(BurrowError::validation(format!(
                "baseline directory {} does not exist",
                dir.display()
            )));
        }
        let mut files = Vec::new();
        collect_files(dir, dir, &mut files).map_err(ConfigError::Io)?;
        Ok(files)
    }
}

/// A stopped resource's ports may have been handed to another running resource
fn ensure_ports_free(target: &Resource, resources: &[Resource]) -> Result<()> {
    let others: Vec<Resource> = resources
        .iter()
        .filter(|r| r.name != target.name)
        .cloned()
        .collect();
    let used = ports_in_use(&others);
    if used.contains(&target.control_port) || used.contains(&target.service_port) {
        return Err(BurrowError::Conflict {
            message: format!(
                "ports {}/{} of {} are held by another running resource; remove and recreate it",
                target.control_port, target.service_port, target.name
            ),
        });
    }
    Ok(())
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<BaselineFile>) -> std::io::Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());
    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            if let Ok(relative) = path.strip_prefix(root) {
                let relative = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(BaselineFile {
                    local: path.clone(),
                    relative,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pipeline_step_display() {
        assert_eq!(PipelineStep::StartResource.to_string(), "start resource");
        assert_eq!(
            PipelineStep::DeliverCertificate.to_string(),
            "deliver host certificate"
        );
    }

    #[test]
    fn test_collect_files_is_sorted_and_relative() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(".config/git")).unwrap();
        fs::write(temp.path().join(".config/git/config"), "[user]\n").unwrap();
        fs::write(temp.path().join(".bashrc"), "export X=1\n").unwrap();

        let mut files = Vec::new();
        collect_files(temp.path(), temp.path(), &mut files).unwrap();
        let relative: Vec<&str> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(relative, vec![".bashrc", ".config/git/config"]);
    }

    #[test]
    fn test_step_context_wraps_error() {
        let result: Result<()> = Err(BurrowError::validation("x"));
        let failure = result.at(PipelineStep::InstallClientKey).unwrap_err();
        assert_eq!(failure.step, PipelineStep::InstallClientKey);
    }
}
