//! Container runtime abstraction
//!
//! The orchestrator talks to containers only through [`ContainerRuntime`].
//! [`CliRuntime`] drives the `docker` or `podman` CLI, optionally against a
//! remote daemon; [`mock::MockRuntime`] keeps the fleet in memory for tests.
//!
//! Resource metadata the orchestrator needs later (ports, worktree) is stored
//! as runtime labels so the runtime's listing stays the single source of truth.

use crate::errors::{BurrowError, Result, RuntimeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Marks a container as managed by burrow
pub const LABEL_MANAGED: &str = "burrow.managed";
/// Host port mapped to the in-resource sshd
pub const LABEL_CONTROL_PORT: &str = "burrow.control-port";
/// Host port mapped to the in-resource service port
pub const LABEL_SERVICE_PORT: &str = "burrow.service-port";
/// Canonical worktree path the resource is bound to
pub const LABEL_WORKTREE: &str = "burrow.worktree";
/// Repository name segment
pub const LABEL_REPO: &str = "burrow.repo";
/// Owner label placed on named volumes
pub const LABEL_VOLUME_OWNER: &str = "burrow.owner";

/// Lifecycle state reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Created,
    Running,
    Stopped,
    Removed,
}

impl ResourceStatus {
    /// Map a docker/podman `State` string
    pub fn from_runtime_state(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "created" | "configured" | "initialized" => Self::Created,
            "running" | "restarting" => Self::Running,
            "removing" => Self::Removed,
            _ => Self::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Removed => "removed",
        }
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A managed container as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub name: String,
    pub image: String,
    pub control_port: u16,
    pub service_port: u16,
    pub status: ResourceStatus,
    pub labels: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Resource {
    /// Build from runtime fields; `None` when the port labels are missing
    pub fn from_labels(
        name: String,
        image: String,
        status: ResourceStatus,
        labels: BTreeMap<String, String>,
        created_at: Option<DateTime<Utc>>,
    ) -> Option<Self> {
        let control_port = labels.get(LABEL_CONTROL_PORT)?.parse().ok()?;
        let service_port = labels.get(LABEL_SERVICE_PORT)?.parse().ok()?;
        Some(Self {
            name,
            image,
            control_port,
            service_port,
            status,
            labels,
            created_at,
        })
    }

    pub fn is_running(&self) -> bool {
        self.status == ResourceStatus::Running
    }
}

/// A named volume mounted into the resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub volume: String,
    pub target: String,
}

/// Everything needed to create a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSpec {
    pub name: String,
    pub image: String,
    pub control_port: u16,
    pub service_port: u16,
    pub control_container_port: u16,
    pub service_container_port: u16,
    pub labels: BTreeMap<String, String>,
    pub volumes: Vec<VolumeMount>,
}

/// A freshly created resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedResource {
    pub resource: Resource,
    /// Volumes this create call brought into existence; reattached ones are not listed
    pub new_volumes: Vec<String>,
}

/// Outcome of a command run inside a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into [`RuntimeError::ExecFailed`]
    pub fn check(self, name: &str, argv: &[String]) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(RuntimeError::ExecFailed {
            name: name.to_string(),
            command: argv.join(" "),
            code: self.exit_code,
            stderr: self.stderr.trim().to_string(),
        }
        .into())
    }
}

/// Operations the orchestrator needs from a container runtime
///
/// Every call is a blocking round trip to the runtime; nothing is cached.
#[allow(async_fn_in_trait)]
pub trait ContainerRuntime {
    /// Runtime name for diagnostics
    fn runtime_name(&self) -> &'static str;

    async fn exists(&self, name: &str) -> Result<bool>;

    /// Create a stopped resource
    ///
    /// Named volumes that already exist are reattached. When the container
    /// itself cannot be created, volumes made by this call are removed again.
    async fn create(&self, spec: &CreateSpec) -> Result<CreatedResource>;

    async fn start(&self, name: &str) -> Result<()>;

    async fn stop(&self, name: &str) -> Result<()>;

    /// Remove the resource; named volumes survive when `keep_storage` is set.
    /// Removing something that does not exist succeeds.
    async fn remove(&self, name: &str, keep_storage: bool) -> Result<()>;

    /// Delete named volumes; missing ones are skipped
    async fn remove_volumes(&self, volumes: &[String]) -> Result<()>;

    /// All managed resources, any state
    async fn list(&self) -> Result<Vec<Resource>>;

    async fn exec(&self, name: &str, argv: &[String]) -> Result<ExecResult>;

    async fn exec_with_stdin(&self, name: &str, argv: &[String], stdin: &[u8])
        -> Result<ExecResult>;

    /// Copy a local file into the resource; works on stopped resources
    async fn copy_file_in(&self, name: &str, local: &Path, remote: &str) -> Result<()>;

    /// Look up one resource from a fresh listing
    async fn find(&self, name: &str) -> Result<Option<Resource>> {
        Ok(self.list().await?.into_iter().find(|r| r.name == name))
    }
}

impl<T: ContainerRuntime> ContainerRuntime for &T {
    fn runtime_name(&self) -> &'static str {
        (*self).runtime_name()
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        (*self).exists(name).await
    }

    async fn create(&self, spec: &CreateSpec) -> Result<CreatedResource> {
        (*self).create(spec).await
    }

    async fn start(&self, name: &str) -> Result<()> {
        (*self).start(name).await
    }

    async fn stop(&self, name: &str) -> Result<()> {
        (*self).stop(name).await
    }

    async fn remove(&self, name: &str, keep_storage: bool) -> Result<()> {
        (*self).remove(name, keep_storage).await
    }

    async fn remove_volumes(&self, volumes: &[String]) -> Result<()> {
        (*self).remove_volumes(volumes).await
    }

    async fn list(&self) -> Result<Vec<Resource>> {
        (*self).list().await
    }

    async fn exec(&self, name: &str, argv: &[String]) -> Result<ExecResult> {
        (*self).exec(name, argv).await
    }

    async fn exec_with_stdin(
        &self,
        name: &str,
        argv: &[String],
        stdin: &[u8],
    ) -> Result<ExecResult> {
        (*self).exec_with_stdin(name, argv, stdin).await
    }

    async fn copy_file_in(&self, name: &str, local: &Path, remote: &str) -> Result<()> {
        (*self).copy_file_in(name, local, remote).await
    }
}

/// Runtime selection options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    Docker,
    Podman,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }

    /// Precedence: CLI flag > `BURROW_RUNTIME` > docker
    pub fn detect(cli_runtime: Option<RuntimeKind>) -> RuntimeKind {
        if let Some(runtime) = cli_runtime {
            return runtime;
        }
        std::env::var("BURROW_RUNTIME")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(RuntimeKind::Docker)
    }
}

impl std::str::FromStr for RuntimeKind {
    type Err = BurrowError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            _ => Err(BurrowError::validation(format!(
                "Unknown runtime: {}. Supported runtimes: docker, podman",
                s
            ))),
        }
    }
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CLI-based runtime for docker and podman
///
/// `host` selects a remote daemon (`-H` for docker, `--url` for podman), e.g.
/// `ssh://dev@build-box`.
#[derive(Debug, Clone)]
pub struct CliRuntime {
    kind: RuntimeKind,
    binary: String,
    host: Option<String>,
}

impl CliRuntime {
    pub fn new(kind: RuntimeKind, host: Option<String>) -> Self {
        Self {
            kind,
            binary: kind.as_str().to_string(),
            host,
        }
    }

    /// Override the binary path
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn base_args(&self) -> Vec<String> {
        match (&self.host, self.kind) {
            (Some(host), RuntimeKind::Docker) => vec!["-H".to_string(), host.clone()],
            (Some(host), RuntimeKind::Podman) => vec!["--url".to_string(), host.clone()],
            (None, _) => Vec::new(),
        }
    }

    /// Run the runtime CLI, returning the raw output regardless of exit status
    async fn output(&self, args: &[String], stdin: Option<&[u8]>) -> Result<std::process::Output> {
        let mut full_args = self.base_args();
        full_args.extend(args.iter().cloned());
        debug!("Executing runtime command: {} {}", self.binary, full_args.join(" "));

        let mut command = Command::new(&self.binary);
        command
            .args(&full_args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RuntimeError::NotInstalled {
                    binary: self.binary.clone(),
                }
            } else {
                RuntimeError::CLIError(format!("Failed to execute {}: {}", self.binary, e))
            }
        })?;

        if let Some(bytes) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(bytes).await.map_err(|e| {
                    RuntimeError::CLIError(format!("Failed to write stdin: {}", e))
                })?;
                pipe.shutdown().await.map_err(|e| {
                    RuntimeError::CLIError(format!("Failed to close stdin: {}", e))
                })?;
            }
        }

        child
            .wait_with_output()
            .await
            .map_err(|e| RuntimeError::CLIError(format!("{} did not complete: {}", self.binary, e)).into())
    }

    /// Run the runtime CLI and fail on non-zero exit
    async fn run(&self, args: &[String]) -> Result<String> {
        let output = self.output(args, None).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RuntimeError::CLIError(format!(
                "`{} {}` failed: {}",
                self.binary,
                args.first().map(String::as_str).unwrap_or_default(),
                stderr.trim()
            ))
            .into());
        }
        String::from_utf8(output.stdout)
            .map_err(|e| RuntimeError::Parse(format!("Invalid UTF-8 in runtime output: {}", e)).into())
    }

    async fn volume_exists(&self, volume: &str) -> Result<bool> {
        let output = self
            .output(&to_args(["volume", "inspect", volume]), None)
            .await?;
        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing_object(&stderr) {
            return Ok(false);
        }
        Err(RuntimeError::CLIError(format!("Volume inspect failed: {}", stderr.trim())).into())
    }

    /// Best-effort removal of volumes made by a create that did not finish
    async fn discard_volumes(&self, volumes: &[String]) {
        if let Err(e) = self.remove_volumes(volumes).await {
            warn!("Failed to remove volumes {:?} after a failed create: {}", volumes, e);
        }
    }
}

/// Named volumes backing a resource's persistent paths
///
/// Volume names derive from the resource name, so a resource recreated under
/// the same name reattaches the same storage.
pub fn volume_mounts(resource: &str, targets: &[String]) -> Vec<VolumeMount> {
    targets
        .iter()
        .map(|target| VolumeMount {
            volume: format!(
                "{}-{}",
                resource,
                crate::identity::sanitize_segment(target).unwrap_or_else(|| "root".to_string())
            ),
            target: target.clone(),
        })
        .collect()
}

fn is_missing_object(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("no such container")
        || lower.contains("no such object")
        || lower.contains("no container with name")
        || lower.contains("no such volume")
}

/// Parse one `ps --format '{{json .}}'` line
pub fn parse_ps_line(line: &str) -> Result<Option<Resource>> {
    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| RuntimeError::Parse(format!("Failed to parse container JSON: {}", e)))?;

    let field = |key: &str| value.get(key).and_then(|v| v.as_str()).unwrap_or_default();

    let name = field("Names")
        .split(',')
        .next()
        .unwrap_or_default()
        .trim_start_matches('/')
        .to_string();
    let labels = parse_label_string(field("Labels"));
    let created_at = parse_created_at(field("CreatedAt"));

    Ok(Resource::from_labels(
        name,
        field("Image").to_string(),
        ResourceStatus::from_runtime_state(field("State")),
        labels,
        created_at,
    ))
}

/// Parse the `k=v,k=v` label summary printed by `ps`
///
/// Values may themselves contain commas; a fragment without `=` is appended
/// to the previous value.
pub fn parse_label_string(raw: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    let mut last_key: Option<String> = None;
    for part in raw.split(',') {
        match part.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                labels.insert(key.to_string(), value.to_string());
                last_key = Some(key.to_string());
            }
            _ => {
                if let Some(value) = last_key.as_ref().and_then(|k| labels.get_mut(k)) {
                    value.push(',');
                    value.push_str(part);
                }
            }
        }
    }
    labels
}

/// `2024-05-01 10:22:33 +0000 UTC` -> UTC timestamp
fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed: Vec<&str> = raw.split_whitespace().take(3).collect();
    DateTime::parse_from_str(&trimmed.join(" "), "%Y-%m-%d %H:%M:%S %z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn to_args<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

impl ContainerRuntime for CliRuntime {
    fn runtime_name(&self) -> &'static str {
        self.kind.as_str()
    }

    #[instrument(skip(self))]
    async fn exists(&self, name: &str) -> Result<bool> {
        let output = self
            .output(&to_args(["container", "inspect", "--format", "{{.Name}}", name]), None)
            .await?;
        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing_object(&stderr) {
            return Ok(false);
        }
        Err(RuntimeError::CLIError(format!("Inspect failed: {}", stderr.trim())).into())
    }

    #[instrument(skip(self, spec), fields(name = %spec.name))]
    async fn create(&self, spec: &CreateSpec) -> Result<CreatedResource> {
        let mut new_volumes = Vec::new();
        for volume in &spec.volumes {
            let created = match self.volume_exists(&volume.volume).await {
                Ok(true) => {
                    debug!("Reattaching existing volume {}", volume.volume);
                    continue;
                }
                Ok(false) => {
                    self.run(&to_args([
                        "volume",
                        "create",
                        "--label",
                        &format!("{}={}", LABEL_VOLUME_OWNER, spec.name),
                        &volume.volume,
                    ]))
                    .await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = created {
                self.discard_volumes(&new_volumes).await;
                return Err(e);
            }
            new_volumes.push(volume.volume.clone());
        }

        let mut args = to_args(["create", "--name", &spec.name, "--hostname", &spec.name]);
        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push("--publish".to_string());
        args.push(format!("{}:{}", spec.control_port, spec.control_container_port));
        args.push("--publish".to_string());
        args.push(format!("{}:{}", spec.service_port, spec.service_container_port));
        for volume in &spec.volumes {
            args.push("--mount".to_string());
            args.push(format!(
                "type=volume,source={},target={}",
                volume.volume, volume.target
            ));
        }
        args.push(spec.image.clone());

        if let Err(e) = self.run(&args).await {
            self.discard_volumes(&new_volumes).await;
            return Err(e);
        }
        debug!("Created container {}", spec.name);

        Ok(CreatedResource {
            resource: Resource {
                name: spec.name.clone(),
                image: spec.image.clone(),
                control_port: spec.control_port,
                service_port: spec.service_port,
                status: ResourceStatus::Created,
                labels: spec.labels.clone(),
                created_at: Some(Utc::now()),
            },
            new_volumes,
        })
    }

    #[instrument(skip(self))]
    async fn start(&self, name: &str) -> Result<()> {
        self.run(&to_args(["start", name])).await.map(|_| ())
    }

    #[instrument(skip(self))]
    async fn stop(&self, name: &str) -> Result<()> {
        self.run(&to_args(["stop", name])).await.map(|_| ())
    }

    #[instrument(skip(self))]
    async fn remove(&self, name: &str, keep_storage: bool) -> Result<()> {
        let output = self.output(&to_args(["rm", "--force", name]), None).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !is_missing_object(&stderr) {
                return Err(
                    RuntimeError::CLIError(format!("Remove failed: {}", stderr.trim())).into(),
                );
            }
            debug!("Container {} already absent", name);
        }

        if keep_storage {
            return Ok(());
        }

        let volumes = self
            .run(&to_args([
                "volume",
                "ls",
                "--quiet",
                "--filter",
                &format!("label={}={}", LABEL_VOLUME_OWNER, name),
            ]))
            .await?;
        let owned: Vec<String> = volumes
            .lines()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        self.remove_volumes(&owned).await
    }

    #[instrument(skip(self))]
    async fn remove_volumes(&self, volumes: &[String]) -> Result<()> {
        for volume in volumes {
            let output = self
                .output(&to_args(["volume", "rm", "--force", volume]), None)
                .await?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !is_missing_object(&stderr) {
                    return Err(RuntimeError::CLIError(format!(
                        "Volume remove failed: {}",
                        stderr.trim()
                    ))
                    .into());
                }
            }
            debug!("Removed volume {}", volume);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<Resource>> {
        let stdout = self
            .run(&to_args([
                "ps",
                "--all",
                "--no-trunc",
                "--filter",
                &format!("label={}=true", LABEL_MANAGED),
                "--format",
                "{{json .}}",
            ]))
            .await?;

        let mut resources = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            match parse_ps_line(line)? {
                Some(resource) => resources.push(resource),
                None => debug!("Skipping container without port labels: {}", line),
            }
        }
        Ok(resources)
    }

    #[instrument(skip(self))]
    async fn exec(&self, name: &str, argv: &[String]) -> Result<ExecResult> {
        let mut args = to_args(["exec", name]);
        args.extend(argv.iter().cloned());
        let output = self.output(&args, None).await?;
        Ok(ExecResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    #[instrument(skip(self, stdin))]
    async fn exec_with_stdin(
        &self,
        name: &str,
        argv: &[String],
        stdin: &[u8],
    ) -> Result<ExecResult> {
        let mut args = to_args(["exec", "--interactive", name]);
        args.extend(argv.iter().cloned());
        let output = self.output(&args, Some(stdin)).await?;
        Ok(ExecResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    #[instrument(skip(self))]
    async fn copy_file_in(&self, name: &str, local: &Path, remote: &str) -> Result<()> {
        let source = local.display().to_string();
        self.run(&to_args(["cp", &source, &format!("{}:{}", name, remote)]))
            .await
            .map(|_| ())
    }
}

/// In-memory runtime for tests
pub mod mock {
    use super::*;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::{Arc, Mutex};

    /// Operations that can be made to fail
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum MockOp {
        Exists,
        Create,
        Start,
        Stop,
        Remove,
        RemoveVolumes,
        List,
        Exec,
        CopyFileIn,
    }

    /// A recorded call
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum RuntimeCall {
        Exists(String),
        Create(CreateSpec),
        Start(String),
        Stop(String),
        Remove { name: String, keep_storage: bool },
        RemoveVolumes(Vec<String>),
        List,
        Exec { name: String, argv: Vec<String> },
        ExecWithStdin { name: String, argv: Vec<String>, stdin: Vec<u8> },
        CopyFileIn { name: String, remote: String },
    }

    #[derive(Debug, Clone)]
    struct MockResource {
        resource: Resource,
        files: BTreeMap<String, Vec<u8>>,
    }

    #[derive(Debug, Default)]
    struct MockState {
        resources: BTreeMap<String, MockResource>,
        foreign: BTreeSet<String>,
        volumes: BTreeSet<String>,
        calls: Vec<RuntimeCall>,
        failures: HashMap<MockOp, String>,
        exec_failures: Vec<String>,
    }

    /// Mock runtime; clones share state
    #[derive(Debug, Clone, Default)]
    pub struct MockRuntime {
        state: Arc<Mutex<MockState>>,
    }

    impl MockRuntime {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a resource directly
        pub fn add_resource(&self, resource: Resource) {
            let mut state = self.state.lock().unwrap();
            state.resources.insert(
                resource.name.clone(),
                MockResource {
                    resource,
                    files: BTreeMap::new(),
                },
            );
        }

        /// Seed a container that lacks the managed label and so never shows up in `list`
        pub fn add_foreign_container(&self, name: &str) {
            self.state.lock().unwrap().foreign.insert(name.to_string());
        }

        /// Seed a named volume, as left behind by an earlier removal
        pub fn add_volume(&self, volume: &str) {
            self.state
                .lock()
                .unwrap()
                .volumes
                .insert(volume.to_string());
        }

        /// Make every call of `op` fail with `message`
        pub fn fail_on(&self, op: MockOp, message: &str) {
            self.state
                .lock()
                .unwrap()
                .failures
                .insert(op, message.to_string());
        }

        /// Make execs whose joined argv contains `needle` exit 1
        pub fn fail_exec_matching(&self, needle: &str) {
            self.state
                .lock()
                .unwrap()
                .exec_failures
                .push(needle.to_string());
        }

        pub fn clear_failures(&self) {
            let mut state = self.state.lock().unwrap();
            state.failures.clear();
            state.exec_failures.clear();
        }

        pub fn calls(&self) -> Vec<RuntimeCall> {
            self.state.lock().unwrap().calls.clone()
        }

        pub fn clear_calls(&self) {
            self.state.lock().unwrap().calls.clear();
        }

        /// Number of recorded `create` calls
        pub fn create_calls(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, RuntimeCall::Create(_)))
                .count()
        }

        pub fn resource(&self, name: &str) -> Option<Resource> {
            let state = self.state.lock().unwrap();
            state.resources.get(name).map(|r| r.resource.clone())
        }

        /// Contents of a file copied into a resource
        pub fn file(&self, name: &str, remote: &str) -> Option<Vec<u8>> {
            let state = self.state.lock().unwrap();
            state.resources.get(name)?.files.get(remote).cloned()
        }

        pub fn volumes(&self) -> BTreeSet<String> {
            self.state.lock().unwrap().volumes.clone()
        }

        fn record(&self, call: RuntimeCall, op: MockOp) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call);
            match state.failures.get(&op) {
                Some(message) => Err(RuntimeError::CLIError(message.clone()).into()),
                None => Ok(()),
            }
        }

        fn set_status(&self, name: &str, status: ResourceStatus) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            match state.resources.get_mut(name) {
                Some(entry) => {
                    entry.resource.status = status;
                    Ok(())
                }
                None => Err(RuntimeError::CLIError(format!("No such container: {}", name)).into()),
            }
        }

        fn exec_result(&self, name: &str, argv: &[String]) -> Result<ExecResult> {
            let state = self.state.lock().unwrap();
            let entry = state
                .resources
                .get(name)
                .ok_or_else(|| RuntimeError::CLIError(format!("No such container: {}", name)))?;
            if entry.resource.status != ResourceStatus::Running {
                return Err(
                    RuntimeError::CLIError(format!("container {} is not running", name)).into(),
                );
            }
            let joined = argv.join(" ");
            let failed = state.exec_failures.iter().any(|n| joined.contains(n.as_str()));
            Ok(ExecResult {
                exit_code: i32::from(failed),
                stdout: String::new(),
                stderr: if failed {
                    "mock exec failure".to_string()
                } else {
                    String::new()
                },
            })
        }
    }

    impl ContainerRuntime for MockRuntime {
        fn runtime_name(&self) -> &'static str {
            "mock"
        }

        async fn exists(&self, name: &str) -> Result<bool> {
            self.record(RuntimeCall::Exists(name.to_string()), MockOp::Exists)?;
            let state = self.state.lock().unwrap();
            Ok(state.resources.contains_key(name) || state.foreign.contains(name))
        }

        async fn create(&self, spec: &CreateSpec) -> Result<CreatedResource> {
            // A failed create leaves volumes as they were, like the CLI adapter
            self.record(RuntimeCall::Create(spec.clone()), MockOp::Create)?;
            let mut state = self.state.lock().unwrap();
            if state.resources.contains_key(&spec.name) || state.foreign.contains(&spec.name) {
                return Err(RuntimeError::CLIError(format!(
                    "Conflict. The container name \"/{}\" is already in use",
                    spec.name
                ))
                .into());
            }
            let resource = Resource {
                name: spec.name.clone(),
                image: spec.image.clone(),
                control_port: spec.control_port,
                service_port: spec.service_port,
                status: ResourceStatus::Created,
                labels: spec.labels.clone(),
                created_at: Some(Utc::now()),
            };
            let mut new_volumes = Vec::new();
            for volume in &spec.volumes {
                if state.volumes.insert(volume.volume.clone()) {
                    new_volumes.push(volume.volume.clone());
                }
            }
            state.resources.insert(
                spec.name.clone(),
                MockResource {
                    resource: resource.clone(),
                    files: BTreeMap::new(),
                },
            );
            Ok(CreatedResource {
                resource,
                new_volumes,
            })
        }

        async fn start(&self, name: &str) -> Result<()> {
            self.record(RuntimeCall::Start(name.to_string()), MockOp::Start)?;
            self.set_status(name, ResourceStatus::Running)
        }

        async fn stop(&self, name: &str) -> Result<()> {
            self.record(RuntimeCall::Stop(name.to_string()), MockOp::Stop)?;
            self.set_status(name, ResourceStatus::Stopped)
        }

        async fn remove(&self, name: &str, keep_storage: bool) -> Result<()> {
            self.record(
                RuntimeCall::Remove {
                    name: name.to_string(),
                    keep_storage,
                },
                MockOp::Remove,
            )?;
            let mut state = self.state.lock().unwrap();
            state.resources.remove(name);
            if !keep_storage {
                let prefix = format!("{}-", name);
                state.volumes.retain(|v| !v.starts_with(&prefix));
            }
            Ok(())
        }

        async fn remove_volumes(&self, volumes: &[String]) -> Result<()> {
            self.record(
                RuntimeCall::RemoveVolumes(volumes.to_vec()),
                MockOp::RemoveVolumes,
            )?;
            let mut state = self.state.lock().unwrap();
            for volume in volumes {
                state.volumes.remove(volume);
            }
            Ok(())
        }

        async fn list(&self) -> Result<Vec<Resource>> {
            self.record(RuntimeCall::List, MockOp::List)?;
            let state = self.state.lock().unwrap();
            Ok(state
                .resources
                .values()
                .map(|r| r.resource.clone())
                .collect())
        }

        async fn exec(&self, name: &str, argv: &[String]) -> Result<ExecResult> {
            self.record(
                RuntimeCall::Exec {
                    name: name.to_string(),
                    argv: argv.to_vec(),
                },
                MockOp::Exec,
            )?;
            self.exec_result(name, argv)
        }

        async fn exec_with_stdin(
            &self,
            name: &str,
            argv: &[String],
            stdin: &[u8],
        ) -> Result<ExecResult> {
            self.record(
                RuntimeCall::ExecWithStdin {
                    name: name.to_string(),
                    argv: argv.to_vec(),
                    stdin: stdin.to_vec(),
                },
                MockOp::Exec,
            )?;
            self.exec_result(name, argv)
        }

        async fn copy_file_in(&self, name: &str, local: &Path, remote: &str) -> Result<()> {
            self.record(
                RuntimeCall::CopyFileIn {
                    name: name.to_string(),
                    remote: remote.to_string(),
                },
                MockOp::CopyFileIn,
            )?;
            let contents = std::fs::read(local).map_err(|e| {
                RuntimeError::CLIError(format!("cannot read {}: {}", local.display(), e))
            })?;
            let mut state = self.state.lock().unwrap();
            let entry = state
                .resources
                .get_mut(name)
                .ok_or_else(|| RuntimeError::CLIError(format!("No such container: {}", name)))?;
            entry.files.insert(remote.to_string(), contents);
            Ok(())
        }
    }
}
