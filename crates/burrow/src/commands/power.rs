//! `burrow start` and `burrow stop`

use crate::cli::CliContext;
use crate::commands::shared::Environment;
use anyhow::Result;
use burrow_core::io::Output;
use tracing::instrument;

#[instrument(skip(context))]
pub async fn start(context: &CliContext, name: &str) -> Result<()> {
    let environment = Environment::load(context)?;
    let resource = environment.orchestrator()?.start(name).await?;
    Output::stdout().write_line(&format!("{} {}", resource.name, resource.status))
}

#[instrument(skip(context))]
pub async fn stop(context: &CliContext, name: &str) -> Result<()> {
    let environment = Environment::load(context)?;
    let resource = environment.orchestrator()?.stop(name).await?;
    Output::stdout().write_line(&format!("{} {}", resource.name, resource.status))
}
