//! Private SSH certificate authority
//!
//! Burrow signs the host key of every resource it creates so clients can
//! verify a resource with a single `@cert-authority` line instead of accepting
//! each new host key on first use. The CA keypair lives in a directory readable
//! only by the operator; host keys are generated fresh for every create and
//! rebuild, staged in a temporary directory, and copied into the resource.
//!
//! Key generation and signing go through [`KeyTool`]. [`SshKeygen`] drives the
//! `ssh-keygen` binary; tests use [`mock::FakeKeyTool`].

use crate::errors::{CaError, Result};
use crate::io::{create_private_dir, restrict_to_owner};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// File name of the CA private key inside the CA directory
pub const CA_KEY_FILE: &str = "burrow_ca";

/// Default certificate validity (ten years); host keys rotate by recreation
pub const DEFAULT_VALIDITY: &str = "+520w";

/// Host private key location inside a resource
pub const REMOTE_HOST_KEY: &str = "/etc/ssh/burrow_host_ed25519_key";
/// Host public key location inside a resource
pub const REMOTE_HOST_PUBLIC_KEY: &str = "/etc/ssh/burrow_host_ed25519_key.pub";
/// Host certificate location inside a resource
pub const REMOTE_HOST_CERTIFICATE: &str = "/etc/ssh/burrow_host_ed25519_key-cert.pub";
/// sshd drop-in enabling the certificate
pub const REMOTE_SSHD_CONFIG: &str = "/etc/ssh/sshd_config.d/10-burrow-hostcert.conf";

/// Parameters for signing a host key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest<'a> {
    pub ca_private_key: &'a Path,
    pub public_key: &'a Path,
    pub identity: &'a str,
    pub principals: &'a [String],
    pub validity: &'a str,
}

/// Key generation and host-certificate signing
#[allow(async_fn_in_trait)]
pub trait KeyTool {
    /// Write an unencrypted ed25519 keypair to `path` and `path.pub`
    async fn generate_keypair(&self, path: &Path, comment: &str) -> Result<()>;

    /// Sign `request.public_key` as a host certificate; returns the `*-cert.pub` path
    async fn sign_host_key(&self, request: &SignRequest<'_>) -> Result<PathBuf>;
}

/// Path `ssh-keygen` writes the certificate to for a given public key
pub fn certificate_path_for(public_key: &Path) -> PathBuf {
    let file_name = public_key
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = file_name.strip_suffix(".pub").unwrap_or(&file_name);
    public_key.with_file_name(format!("{}-cert.pub", stem))
}

fn public_key_path_for(private_key: &Path) -> PathBuf {
    let mut name = private_key.as_os_str().to_os_string();
    name.push(".pub");
    PathBuf::from(name)
}

/// `ssh-keygen` subprocess adapter
#[derive(Debug, Clone)]
pub struct SshKeygen {
    binary: String,
}

impl Default for SshKeygen {
    fn default() -> Self {
        Self {
            binary: "ssh-keygen".to_string(),
        }
    }
}

impl SshKeygen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[String]) -> Result<()> {
        debug!("Executing: {} {}", self.binary, args.join(" "));
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| CaError::KeyTool {
                message: format!("failed to run {}: {}", self.binary, e),
            })?;
        if !output.status.success() {
            return Err(CaError::KeyTool {
                message: format!(
                    "{} exited with {}: {}",
                    self.binary,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            }
            .into());
        }
        Ok(())
    }
}

impl KeyTool for SshKeygen {
    async fn generate_keypair(&self, path: &Path, comment: &str) -> Result<()> {
        let args = vec![
            "-q".to_string(),
            "-t".to_string(),
            "ed25519".to_string(),
            "-N".to_string(),
            String::new(),
            "-C".to_string(),
            comment.to_string(),
            "-f".to_string(),
            path.display().to_string(),
        ];
        self.run(&args).await
    }

    async fn sign_host_key(&self, request: &SignRequest<'_>) -> Result<PathBuf> {
        let args = vec![
            "-q".to_string(),
            "-s".to_string(),
            request.ca_private_key.display().to_string(),
            "-I".to_string(),
            request.identity.to_string(),
            "-h".to_string(),
            "-n".to_string(),
            request.principals.join(","),
            "-V".to_string(),
            request.validity.to_string(),
            request.public_key.display().to_string(),
        ];
        self.run(&args).await?;
        Ok(certificate_path_for(request.public_key))
    }
}

/// A freshly issued host key and certificate, staged on local disk
///
/// The staging directory is deleted when the bundle is dropped.
#[derive(Debug)]
pub struct HostCertificateBundle {
    _staging: TempDir,
    pub host_key: PathBuf,
    pub host_public_key: PathBuf,
    pub certificate: PathBuf,
    pub sshd_config: PathBuf,
    pub identity: String,
    pub principals: Vec<String>,
    pub issued_at: DateTime<Utc>,
}

impl HostCertificateBundle {
    /// Local file and destination pairs to copy into the resource
    pub fn deliveries(&self) -> [(&Path, &'static str); 4] {
        [
            (self.host_key.as_path(), REMOTE_HOST_KEY),
            (self.host_public_key.as_path(), REMOTE_HOST_PUBLIC_KEY),
            (self.certificate.as_path(), REMOTE_HOST_CERTIFICATE),
            (self.sshd_config.as_path(), REMOTE_SSHD_CONFIG),
        ]
    }
}

/// sshd drop-in presenting the burrow host key and certificate
pub fn sshd_certificate_config() -> String {
    format!(
        "# Managed by burrow\nHostKey {}\nHostCertificate {}\n",
        REMOTE_HOST_KEY, REMOTE_HOST_CERTIFICATE
    )
}

/// The operator's certificate authority
#[derive(Debug, Clone)]
pub struct CertificateAuthority<K: KeyTool> {
    dir: PathBuf,
    private_key_path: PathBuf,
    public_key_path: PathBuf,
    validity: String,
    tool: K,
}

impl<K: KeyTool> CertificateAuthority<K> {
    /// CA rooted at `dir`; nothing is read or written until used
    pub fn open(dir: impl Into<PathBuf>, tool: K) -> Self {
        let dir = dir.into();
        let private_key_path = dir.join(CA_KEY_FILE);
        let public_key_path = public_key_path_for(&private_key_path);
        Self {
            dir,
            private_key_path,
            public_key_path,
            validity: DEFAULT_VALIDITY.to_string(),
            tool,
        }
    }

    pub fn with_validity(mut self, validity: impl Into<String>) -> Self {
        self.validity = validity.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn private_key_path(&self) -> &Path {
        &self.private_key_path
    }

    pub fn public_key_path(&self) -> &Path {
        &self.public_key_path
    }

    pub fn is_initialized(&self) -> bool {
        self.private_key_path.exists() && self.public_key_path.exists()
    }

    /// Create the CA keypair; refuses to replace an existing one
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn generate(&self) -> Result<()> {
        for existing in [&self.private_key_path, &self.public_key_path] {
            if existing.exists() {
                return Err(CaError::AlreadyExists {
                    path: existing.display().to_string(),
                }
                .into());
            }
        }

        create_private_dir(&self.dir).map_err(CaError::Io)?;
        restrict_to_owner(&self.dir, 0o700).map_err(CaError::Io)?;
        self.tool
            .generate_keypair(&self.private_key_path, "burrow-ca")
            .await?;
        restrict_to_owner(&self.private_key_path, 0o600).map_err(CaError::Io)?;

        info!("Created certificate authority at {}", self.dir.display());
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(CaError::NotInitialized {
                path: self.dir.display().to_string(),
            }
            .into())
        }
    }

    /// The CA public key line, without trailing newline
    pub fn public_key(&self) -> Result<String> {
        self.ensure_initialized()?;
        let content = std::fs::read_to_string(&self.public_key_path).map_err(CaError::Io)?;
        Ok(content.trim().to_string())
    }

    /// Sign an existing host public key for `name`, valid for both the alias and the endpoint
    #[instrument(skip(self, host_public_key))]
    pub async fn sign_host_key(
        &self,
        host_public_key: &Path,
        name: &str,
        endpoint: &str,
    ) -> Result<PathBuf> {
        self.ensure_initialized()?;
        let principals = host_principals(name, endpoint);
        let identity = host_identity(name);
        let request = SignRequest {
            ca_private_key: &self.private_key_path,
            public_key: host_public_key,
            identity: &identity,
            principals: &principals,
            validity: &self.validity,
        };
        let certificate = self.tool.sign_host_key(&request).await?;
        debug!(principals = %principals.join(","), "Signed host key");
        Ok(certificate)
    }

    /// Generate a fresh host keypair and sign it
    #[instrument(skip(self))]
    pub async fn issue_host_certificate(
        &self,
        name: &str,
        endpoint: &str,
    ) -> Result<HostCertificateBundle> {
        self.ensure_initialized()?;

        let staging = tempfile::Builder::new()
            .prefix("burrow-hostkey-")
            .tempdir()
            .map_err(CaError::Io)?;
        let host_key = staging.path().join("ssh_host_ed25519_key");
        let host_public_key = public_key_path_for(&host_key);

        self.tool
            .generate_keypair(&host_key, &format!("burrow-host:{}", name))
            .await?;
        let certificate = self.sign_host_key(&host_public_key, name, endpoint).await?;

        let sshd_config = staging.path().join("10-burrow-hostcert.conf");
        std::fs::write(&sshd_config, sshd_certificate_config()).map_err(CaError::Io)?;

        info!("Issued host certificate for {}", name);
        Ok(HostCertificateBundle {
            _staging: staging,
            host_key,
            host_public_key,
            certificate,
            sshd_config,
            identity: host_identity(name),
            principals: host_principals(name, endpoint),
            issued_at: Utc::now(),
        })
    }

    /// `@cert-authority` line trusting every `prefix-*` alias and every port on `endpoint`
    pub fn trust_anchor_line(&self, prefix: &str, endpoint: &str) -> Result<String> {
        Ok(format_trust_anchor(prefix, endpoint, &self.public_key()?))
    }
}

/// Certificate key identity for a resource
pub fn host_identity(name: &str) -> String {
    format!("burrow-host:{}", name)
}

/// Principals a host certificate is valid for
pub fn host_principals(name: &str, endpoint: &str) -> Vec<String> {
    if name == endpoint {
        vec![name.to_string()]
    } else {
        vec![name.to_string(), endpoint.to_string()]
    }
}

pub fn format_trust_anchor(prefix: &str, endpoint: &str, public_key: &str) -> String {
    format!("@cert-authority {}-*,[{}]:* {}", prefix, endpoint, public_key)
}

/// Deterministic key tool for tests
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// A recorded signing request
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SignedRecord {
        pub identity: String,
        pub principals: Vec<String>,
        pub validity: String,
        pub serial: usize,
    }

    /// Writes placeholder key files instead of running `ssh-keygen`
    #[derive(Debug, Clone, Default)]
    pub struct FakeKeyTool {
        serial: Arc<AtomicUsize>,
        fail_signing: Arc<AtomicBool>,
        signed: Arc<Mutex<Vec<SignedRecord>>>,
    }

    impl FakeKeyTool {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_fail_signing(&self, fail: bool) {
            self.fail_signing.store(fail, Ordering::SeqCst);
        }

        pub fn signed(&self) -> Vec<SignedRecord> {
            self.signed.lock().unwrap().clone()
        }
    }

    impl KeyTool for FakeKeyTool {
        async fn generate_keypair(&self, path: &Path, comment: &str) -> Result<()> {
            let serial = self.serial.fetch_add(1, Ordering::SeqCst);
            std::fs::write(path, format!("FAKE PRIVATE KEY {}\n", serial)).map_err(CaError::Io)?;
            std::fs::write(
                public_key_path_for(path),
                format!("ssh-ed25519 AAAAFAKE{} {}\n", serial, comment),
            )
            .map_err(CaError::Io)?;
            Ok(())
        }

        async fn sign_host_key(&self, request: &SignRequest<'_>) -> Result<PathBuf> {
            if self.fail_signing.load(Ordering::SeqCst) {
                return Err(CaError::KeyTool {
                    message: "signing disabled".to_string(),
                }
                .into());
            }
            let serial = self.serial.fetch_add(1, Ordering::SeqCst);
            let certificate = certificate_path_for(request.public_key);
            std::fs::write(
                &certificate,
                format!(
                    "ssh-ed25519-cert-v01@openssh.com AAAACERT{} id={} principals={} validity={}\n",
                    serial,
                    request.identity,
                    request.principals.join(","),
                    request.validity
                ),
            )
            .map_err(CaError::Io)?;
            self.signed.lock().unwrap().push(SignedRecord {
                identity: request.identity.to_string(),
                principals: request.principals.to_vec(),
                validity: request.validity.to_string(),
                serial,
            });
            Ok(certificate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::FakeKeyTool;
    use super::*;
    use crate::errors::BurrowError;

    fn ca_in(dir: &Path) -> CertificateAuthority<FakeKeyTool> {
        CertificateAuthority::open(dir.join("ca"), FakeKeyTool::new())
    }

    #[test]
    fn test_certificate_path_for() {
        assert_eq!(
            certificate_path_for(Path::new("/tmp/x/host_key.pub")),
            PathBuf::from("/tmp/x/host_key-cert.pub")
        );
    }

    #[tokio::test]
    async fn test_generate_once() {
        let temp = TempDir::new().unwrap();
        let ca = ca_in(temp.path());
        assert!(!ca.is_initialized());

        ca.generate().await.unwrap();
        assert!(ca.is_initialized());
        assert!(ca.public_key().unwrap().starts_with("ssh-ed25519 "));

        let err = ca.generate().await.unwrap_err();
        assert!(matches!(err, BurrowError::Ca(CaError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_generate_refuses_orphaned_public_key() {
        let temp = TempDir::new().unwrap();
        let ca = ca_in(temp.path());
        std::fs::create_dir_all(ca.dir()).unwrap();
        std::fs::write(ca.public_key_path(), "ssh-ed25519 AAAA old\n").unwrap();
        assert!(ca.generate().await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ca_directory_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let temp = TempDir::new().unwrap();
        let ca = ca_in(temp.path());
        ca.generate().await.unwrap();
        let mode = std::fs::metadata(ca.dir()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
        let key_mode = std::fs::metadata(ca.private_key_path())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(key_mode, 0o600);
    }

    #[tokio::test]
    async fn test_issue_requires_initialized_ca() {
        let temp = TempDir::new().unwrap();
        let ca = ca_in(temp.path());
        let err = ca
            .issue_host_certificate("dev-proj-abc123", "10.0.0.5")
            .await
            .unwrap_err();
        assert!(matches!(err, BurrowError::Ca(CaError::NotInitialized { .. })));
    }

    #[tokio::test]
    async fn test_issue_host_certificate_principals() {
        let temp = TempDir::new().unwrap();
        let tool = FakeKeyTool::new();
        let ca = CertificateAuthority::open(temp.path().join("ca"), tool.clone())
            .with_validity("+52w");
        ca.generate().await.unwrap();

        let bundle = ca
            .issue_host_certificate("dev-proj-abc123", "10.0.0.5")
            .await
            .unwrap();
        assert_eq!(bundle.principals, vec!["dev-proj-abc123", "10.0.0.5"]);
        assert_eq!(bundle.identity, "burrow-host:dev-proj-abc123");
        for (local, _) in bundle.deliveries() {
            assert!(local.exists(), "{} missing", local.display());
        }
        let sshd = std::fs::read_to_string(&bundle.sshd_config).unwrap();
        assert!(sshd.contains(&format!("HostCertificate {}", REMOTE_HOST_CERTIFICATE)));

        let signed = tool.signed();
        assert_eq!(signed.len(), 1);
        assert_eq!(signed[0].validity, "+52w");
    }

    #[tokio::test]
    async fn test_staging_is_removed_on_drop() {
        let temp = TempDir::new().unwrap();
        let ca = ca_in(temp.path());
        ca.generate().await.unwrap();
        let bundle = ca.issue_host_certificate("dev-a-000000", "h").await.unwrap();
        let key = bundle.host_key.clone();
        drop(bundle);
        assert!(!key.exists());
    }

    #[tokio::test]
    async fn test_trust_anchor_line() {
        let temp = TempDir::new().unwrap();
        let ca = ca_in(temp.path());
        ca.generate().await.unwrap();
        let line = ca.trust_anchor_line("dev", "10.0.0.5").unwrap();
        assert!(line.starts_with("@cert-authority dev-*,[10.0.0.5]:* ssh-ed25519 "));
        assert!(!line.ends_with('\n'));
    }

    #[test]
    fn test_principals_deduplicate_alias_endpoint() {
        assert_eq!(host_principals("a", "a"), vec!["a"]);
    }
}
