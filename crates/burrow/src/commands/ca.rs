//! `burrow ca init` and `burrow ca anchor`

use crate::cli::CliContext;
use crate::commands::shared::Environment;
use anyhow::Result;
use burrow_core::io::Output;
use burrow_core::trust::TrustStore;
use tracing::{info, instrument};

/// Generate the CA and trust it for the active endpoint
#[instrument(skip(context))]
pub async fn init(context: &CliContext) -> Result<()> {
    let environment = Environment::load(context)?;
    let ca = environment.certificate_authority();
    ca.generate().await?;

    let endpoint = &environment.active()?.endpoint;
    let anchor = ca.trust_anchor_line(&environment.settings.prefix, endpoint)?;
    if environment.trust_store().append_known_host_line(&anchor)? {
        info!(
            "Added trust anchor for {} to {}",
            endpoint,
            environment.paths.known_hosts.display()
        );
    }

    let mut output = Output::stdout();
    output.write_line(&format!(
        "Certificate authority created at {}",
        ca.dir().display()
    ))?;
    output.write_line(&format!("Public key: {}", ca.public_key_path().display()))
}

/// Print the known_hosts line for the active endpoint
pub fn anchor(context: &CliContext) -> Result<()> {
    let environment = Environment::load(context)?;
    let ca = environment.certificate_authority();
    let line = ca.trust_anchor_line(
        &environment.settings.prefix,
        &environment.active()?.endpoint,
    )?;
    Output::stdout().write_line(&line)
}
