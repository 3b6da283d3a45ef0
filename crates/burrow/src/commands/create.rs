//! `burrow create`

use crate::cli::{CliContext, OutputFormat};
use crate::commands::shared::{emit, print_warnings, Environment};
use anyhow::Result;
use burrow_core::orchestrator::{CreateRequest, ProvisionOutcome};
use console::style;
use std::path::PathBuf;
use tracing::instrument;

#[instrument(skip(context))]
pub async fn execute(
    context: &CliContext,
    path: PathBuf,
    repo_name: Option<String>,
    output: OutputFormat,
) -> Result<()> {
    let environment = Environment::load(context)?;
    let orchestrator = environment.orchestrator()?;
    let outcome = orchestrator
        .create(&CreateRequest { path, repo_name })
        .await?;

    print_warnings(&outcome.warnings);
    emit(output, &outcome, |outcome| {
        render_outcome("Created", orchestrator.endpoint(), outcome)
    })
}

/// Text summary shared by create and rebuild
pub fn render_outcome(verb: &str, endpoint: &str, outcome: &ProvisionOutcome) -> Vec<String> {
    let resource = &outcome.resource;
    let mut lines = vec![
        format!("{} {}", verb, style(&resource.name).bold()),
        format!(
            "  ssh      ssh {}  ({}:{})",
            resource.name, endpoint, resource.control_port
        ),
        format!("  service  http://{}:{}", endpoint, resource.service_port),
    ];
    match &outcome.certificate {
        Some(certificate) => lines.push(format!(
            "  cert     {} [{}]",
            certificate.identity,
            certificate.principals.join(", ")
        )),
        None => lines.push(format!("  cert     {}", style("none").yellow())),
    }
    lines
}
