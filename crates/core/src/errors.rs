//! Error types and handling
//!
//! The error taxonomy follows the provisioning pipeline: domain enums for each
//! collaborator (settings, container runtime, certificate authority, trust
//! store, port allocation) are wrapped by [`BurrowError`], which adds the
//! pipeline-level categories (validation, conflict, not-found, and the
//! one-way-door rebuild failure).

use thiserror::Error;

/// Settings and connection-registry errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Settings file could not be parsed
    #[error("Failed to parse settings file {path}: {message}")]
    Parsing { path: String, message: String },

    /// Settings value is out of range or inconsistent
    #[error("Settings validation error: {message}")]
    Validation { message: String },

    /// Settings file I/O error
    #[error("Failed to read settings file")]
    Io(#[from] std::io::Error),

    /// Settings file explicitly requested but missing
    #[error("Settings file not found: {path}")]
    NotFound { path: String },
}

/// Container runtime errors
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Runtime binary is not installed or not accessible
    #[error("Container runtime '{binary}' is not installed or not accessible")]
    NotInstalled { binary: String },

    /// Runtime CLI command failed
    #[error("Runtime CLI error: {0}")]
    CLIError(String),

    /// Command executed inside a resource exited non-zero
    #[error("Command `{command}` failed in {name} with exit code {code}: {stderr}")]
    ExecFailed {
        name: String,
        command: String,
        code: i32,
        stderr: String,
    },

    /// Runtime output could not be interpreted
    #[error("Unexpected runtime output: {0}")]
    Parse(String),
}

/// Certificate authority errors
#[derive(Error, Debug)]
pub enum CaError {
    /// A CA keypair already exists at the configured location
    #[error("A certificate authority already exists at {path}; refusing to overwrite it")]
    AlreadyExists { path: String },

    /// No CA keypair exists yet
    #[error("No certificate authority found at {path}; run `burrow ca init` first")]
    NotInitialized { path: String },

    /// The key generation or signing utility failed
    #[error("Key tool failed: {message}")]
    KeyTool { message: String },

    /// CA storage I/O error
    #[error("Certificate authority I/O error")]
    Io(#[from] std::io::Error),
}

/// Client trust store and connection registry errors
#[derive(Error, Debug)]
pub enum TrustError {
    /// Trust store file I/O error
    #[error("Trust store I/O error at {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// No connection with the requested name is registered
    #[error("Unknown connection: {name}")]
    UnknownConnection { name: String },

    /// No trust entry exists for the alias
    #[error("No trust entry found for {alias}")]
    EntryNotFound { alias: String },

    /// Connection registry is malformed
    #[error("Connection registry error: {message}")]
    Registry { message: String },
}

/// Port allocation errors
#[derive(Error, Debug)]
pub enum PortError {
    /// No free port inside the bounded scan window
    #[error("No free port in {floor}..{end} (scanned {window} candidates)")]
    Exhausted { floor: u16, end: u32, window: u16 },
}

/// Main error enum wrapping all domain-specific errors
#[derive(Error, Debug)]
pub enum BurrowError {
    /// Settings errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Container runtime errors
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Certificate authority errors
    #[error("Certificate error: {0}")]
    Ca(#[from] CaError),

    /// Client trust store errors
    #[error("Trust store error: {0}")]
    Trust(#[from] TrustError),

    /// Port allocation errors
    #[error("Port allocation error: {0}")]
    Port(#[from] PortError),

    /// Input rejected before any side effect
    #[error("Invalid input: {message}")]
    Validation { message: String },

    /// Target state already exists
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Named resource does not exist
    #[error("Resource not found: {name}")]
    NotFound { name: String },

    /// Rebuild failed after the previous resource was already removed
    #[error(
        "Rebuild of {name} failed during {step} (ports {control_port}/{service_port}). \
         The previous resource was already removed and cannot be restored automatically; \
         recreate it manually with `burrow create`"
    )]
    RebuildIncomplete {
        step: String,
        name: String,
        control_port: u16,
        service_port: u16,
        #[source]
        source: Box<BurrowError>,
    },

    /// Internal/generic errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BurrowError {
    /// Shorthand for a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Whether the error was caused by operator input rather than a remote failure
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::Conflict { .. }
                | Self::NotFound { .. }
                | Self::Config(_)
                | Self::Ca(CaError::AlreadyExists { .. })
                | Self::Trust(TrustError::UnknownConnection { .. })
        )
    }
}

/// Convenience type alias for Results with BurrowError
pub type Result<T> = std::result::Result<T, BurrowError>;
