//! `burrow rebuild`

use crate::cli::{CliContext, OutputFormat};
use crate::commands::create::render_outcome;
use crate::commands::shared::{emit, print_warnings, Environment};
use anyhow::Result;
use burrow_core::orchestrator::RebuildOptions;
use tracing::instrument;

#[instrument(skip(context))]
pub async fn execute(
    context: &CliContext,
    name: &str,
    build_image: bool,
    output: OutputFormat,
) -> Result<()> {
    let environment = Environment::load(context)?;
    let orchestrator = environment.orchestrator()?;
    let outcome = orchestrator
        .rebuild(name, &RebuildOptions { build_image })
        .await?;

    print_warnings(&outcome.warnings);
    emit(output, &outcome, |outcome| {
        render_outcome("Rebuilt", orchestrator.endpoint(), outcome)
    })
}
