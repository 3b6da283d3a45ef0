use anyhow::Result;
use burrow_core::runtime::RuntimeKind;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Runtime selection options
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum RuntimeOption {
    /// Docker runtime
    Docker,
    /// Podman runtime
    Podman,
}

impl From<RuntimeOption> for RuntimeKind {
    fn from(runtime: RuntimeOption) -> Self {
        match runtime {
            RuntimeOption::Docker => RuntimeKind::Docker,
            RuntimeOption::Podman => RuntimeKind::Podman,
        }
    }
}

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

/// Log format options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

/// Log level options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    /// Error messages only
    Error,
    /// Warning and error messages
    Warn,
    /// Informational messages and above
    Info,
    /// Debug messages and above
    Debug,
    /// All messages including trace
    Trace,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Global options available to all subcommands
#[derive(Debug, Clone)]
pub struct CliContext {
    /// Settings file path
    pub config: Option<PathBuf>,
    /// Container runtime selection
    pub runtime: Option<RuntimeKind>,
    /// Answer yes to every confirmation prompt
    pub yes: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a dev container for the git worktree at PATH
    Create {
        /// Any path inside the worktree
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Repository name used in the resource name (derived from the worktree when omitted)
        #[arg(long = "repo")]
        repo: Option<String>,
        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Replace a dev container, keeping its name, ports and volumes
    ///
    /// If the replacement fails after the old container was removed, the
    /// container is gone and must be recreated with `burrow create`.
    Rebuild {
        name: String,
        /// Run the configured build command first
        #[arg(long, conflicts_with = "skip_build")]
        build: bool,
        /// Reuse the existing image (default)
        #[arg(long)]
        skip_build: bool,
        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Remove a dev container and its connection entry
    Remove {
        name: String,
        /// Do not ask for confirmation
        #[arg(long, short)]
        force: bool,
        /// Keep the named volumes
        #[arg(long)]
        keep_volumes: bool,
    },

    /// Start a stopped dev container
    Start { name: String },

    /// Stop a running dev container
    Stop { name: String },

    /// List managed dev containers
    List {
        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Show a dev container and its connection entry
    Info {
        name: String,
        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Certificate authority management
    Ca {
        #[command(subcommand)]
        command: CaCommands,
    },

    /// Client trust entries and connections
    Trust {
        #[command(subcommand)]
        command: TrustCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum CaCommands {
    /// Generate the CA keypair (refuses to overwrite an existing one)
    Init,
    /// Print the known_hosts line trusting certificates for the active endpoint
    Anchor,
}

#[derive(Debug, Subcommand)]
pub enum TrustCommands {
    /// Report entries recorded against another endpoint than the active one
    Diff {
        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },
    /// Point one entry at a new endpoint
    Apply { alias: String, endpoint: String },
    /// Move every entry to another connection and make it active
    Switch {
        connection: String,
        /// Show what would change without writing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Register or update a named connection
    AddConnection {
        name: String,
        /// Address clients use to reach published ports
        endpoint: String,
        /// Runtime daemon URL, e.g. ssh://dev@build-box
        #[arg(long)]
        host: Option<String>,
    },
    /// List registered connections
    Connections,
}

/// Dev containers bound to git worktrees, reachable over certificate-trusted SSH
#[derive(Debug, Parser)]
#[command(name = "burrow", version)]
pub struct Cli {
    /// Log format (text or json); falls back to BURROW_LOG_FORMAT
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    #[arg(long, global = true, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Settings file (defaults to BURROW_CONFIG, then the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Container runtime (defaults to BURROW_RUNTIME, then docker)
    #[arg(long, global = true, value_enum)]
    pub runtime: Option<RuntimeOption>,

    /// Assume yes for every confirmation prompt
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn context(&self) -> CliContext {
        CliContext {
            config: self.config.clone(),
            runtime: self.runtime.map(Into::into),
            yes: self.yes,
        }
    }

    /// Initialize logging, then run the selected subcommand
    pub async fn dispatch(self) -> Result<()> {
        let context = self.context();
        let log_format = match &self.log_format {
            Some(LogFormat::Text) => Some("text"),
            Some(LogFormat::Json) => Some("json"),
            None => None,
        };
        let log_level = self.log_level.as_str();
        if std::env::var_os(burrow_core::logging::ENV_LOG).is_none()
            && std::env::var_os("RUST_LOG").is_none()
        {
            std::env::set_var(
                "RUST_LOG",
                format!("burrow={},burrow_core={}", log_level, log_level),
            );
        }
        burrow_core::logging::init(log_format)?;
        tracing::debug!("CLI initialized with log level: {}", log_level);

        match self.command {
            Commands::Create { path, repo, output } => {
                crate::commands::create::execute(&context, path, repo, output).await
            }
            Commands::Rebuild {
                name,
                build,
                skip_build: _,
                output,
            } => crate::commands::rebuild::execute(&context, &name, build, output).await,
            Commands::Remove {
                name,
                force,
                keep_volumes,
            } => crate::commands::remove::execute(&context, &name, force, keep_volumes).await,
            Commands::Start { name } => crate::commands::power::start(&context, &name).await,
            Commands::Stop { name } => crate::commands::power::stop(&context, &name).await,
            Commands::List { output } => crate::commands::inspect::list(&context, output).await,
            Commands::Info { name, output } => {
                crate::commands::inspect::info(&context, &name, output).await
            }
            Commands::Ca { command } => match command {
                CaCommands::Init => crate::commands::ca::init(&context).await,
                CaCommands::Anchor => crate::commands::ca::anchor(&context),
            },
            Commands::Trust { command } => match command {
                TrustCommands::Diff { output } => crate::commands::trust::diff(&context, output),
                TrustCommands::Apply { alias, endpoint } => {
                    crate::commands::trust::apply(&context, &alias, &endpoint)
                }
                TrustCommands::Switch {
                    connection,
                    dry_run,
                } => crate::commands::trust::switch(&context, &connection, dry_run),
                TrustCommands::AddConnection {
                    name,
                    endpoint,
                    host,
                } => crate::commands::trust::add_connection(&context, name, endpoint, host),
                TrustCommands::Connections => crate::commands::trust::connections(&context),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_rebuild_build_flags_conflict() {
        let parsed = Cli::try_parse_from(["burrow", "rebuild", "dev-a-123456", "--build", "--skip-build"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["burrow", "list", "--runtime", "podman", "--yes"]).unwrap();
        let context = cli.context();
        assert_eq!(context.runtime, Some(RuntimeKind::Podman));
        assert!(context.yes);
    }

    #[test]
    fn test_create_defaults_to_current_directory() {
        let cli = Cli::try_parse_from(["burrow", "create"]).unwrap();
        match cli.command {
            Commands::Create { path, repo, output } => {
                assert_eq!(path, PathBuf::from("."));
                assert!(repo.is_none());
                assert_eq!(output, OutputFormat::Text);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
