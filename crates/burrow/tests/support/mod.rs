//! Isolated settings and client files for CLI tests

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub const STALE_CONFIG: &str = "\
Host github.com
  HostName github.com

Host dev-proj-abc123
    HostName 10.0.0.5
    Port 2200
    User dev

";

/// A settings file pointing every client-side location into a temp directory
pub struct Sandbox {
    pub temp: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let settings = format!(
            "ca_dir = {:?}\nssh_config_path = {:?}\nknown_hosts_path = {:?}\nconnections_path = {:?}\n",
            root.join("ca"),
            root.join("ssh/burrow"),
            root.join("ssh/known_hosts"),
            root.join("connections.toml"),
        );
        fs::write(root.join("config.toml"), settings).unwrap();
        Self { temp }
    }

    pub fn with_ssh_config(self, content: &str) -> Self {
        fs::create_dir_all(self.temp.path().join("ssh")).unwrap();
        fs::write(self.ssh_config(), content).unwrap();
        self
    }

    pub fn ssh_config(&self) -> PathBuf {
        self.temp.path().join("ssh/burrow")
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("burrow").unwrap();
        cmd.env("BURROW_CONFIG", self.temp.path().join("config.toml"))
            .env_remove("BURROW_RUNTIME")
            .env_remove("BURROW_LOG")
            .env_remove("BURROW_LOG_FORMAT")
            .env("NO_COLOR", "1");
        cmd
    }
}
