//! Shared test helpers for core integration tests.

#![allow(dead_code)]

use burrow_core::ca::mock::FakeKeyTool;
use burrow_core::ca::CertificateAuthority;
use burrow_core::config::Settings;
use burrow_core::orchestrator::{CreateRequest, Orchestrator};
use burrow_core::runtime::mock::{MockRuntime, RuntimeCall};
use burrow_core::runtime::{Resource, ResourceStatus, LABEL_CONTROL_PORT, LABEL_SERVICE_PORT};
use burrow_core::trust::mock::MemoryTrustStore;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tempfile::TempDir;

pub const ENDPOINT: &str = "10.0.0.5";

pub type TestOrchestrator = Orchestrator<MockRuntime, MemoryTrustStore, FakeKeyTool>;

/// An orchestrator wired to in-memory collaborators, with handles to inspect them
pub struct Harness {
    pub temp: TempDir,
    pub runtime: MockRuntime,
    pub trust: MemoryTrustStore,
    pub keys: FakeKeyTool,
    pub orchestrator: TestOrchestrator,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(Settings::default(), true).await
    }

    pub async fn with_settings(settings: Settings) -> Self {
        Self::build(settings, true).await
    }

    /// Harness whose CA was never initialized
    pub async fn without_ca() -> Self {
        Self::build(Settings::default(), false).await
    }

    async fn build(settings: Settings, init_ca: bool) -> Self {
        let temp = TempDir::new().unwrap();
        let runtime = MockRuntime::new();
        let trust = MemoryTrustStore::new();
        let keys = FakeKeyTool::new();
        let ca = CertificateAuthority::open(temp.path().join("ca"), keys.clone());
        if init_ca {
            ca.generate().await.unwrap();
        }
        let orchestrator =
            Orchestrator::new(runtime.clone(), trust.clone(), ca, settings, ENDPOINT);
        Self {
            temp,
            runtime,
            trust,
            keys,
            orchestrator,
        }
    }

    /// Install a client public key and return the key text
    pub fn with_client_key(mut self) -> (Self, String) {
        let key = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIClient operator@laptop".to_string();
        let path = self.temp.path().join("id_ed25519.pub");
        std::fs::write(&path, format!("{}\n", key)).unwrap();
        self.orchestrator = self.orchestrator.with_client_public_key(path);
        (self, key)
    }

    /// Create a primary git worktree directory named `name`
    pub fn worktree(&self, name: &str) -> PathBuf {
        let path = self.temp.path().join("src").join(name);
        std::fs::create_dir_all(path.join(".git")).unwrap();
        path
    }

    pub fn request(&self, worktree: &str) -> CreateRequest {
        CreateRequest {
            path: self.worktree(worktree),
            repo_name: None,
        }
    }

    pub fn count_calls(&self, predicate: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.runtime.calls().iter().filter(|c| predicate(c)).count()
    }

    pub fn removes_of(&self, name: &str) -> Vec<bool> {
        self.runtime
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                RuntimeCall::Remove {
                    name: removed,
                    keep_storage,
                } if removed == name => Some(keep_storage),
                _ => None,
            })
            .collect()
    }

    pub fn stops_of(&self, name: &str) -> usize {
        self.count_calls(|c| matches!(c, RuntimeCall::Stop(n) if n == name))
    }
}

/// A managed resource as the runtime would report it
pub fn resource(name: &str, control: u16, service: u16, status: ResourceStatus) -> Resource {
    let mut labels = BTreeMap::new();
    labels.insert("burrow.managed".to_string(), "true".to_string());
    labels.insert(LABEL_CONTROL_PORT.to_string(), control.to_string());
    labels.insert(LABEL_SERVICE_PORT.to_string(), service.to_string());
    Resource {
        name: name.to_string(),
        image: "ghcr.io/burrow-dev/devbox:latest".to_string(),
        control_port: control,
        service_port: service,
        status,
        labels,
        created_at: None,
    }
}
