//! `burrow remove`

use crate::cli::CliContext;
use crate::commands::shared::{confirm, print_warnings, Environment};
use anyhow::Result;
use burrow_core::identity::validate_name;
use burrow_core::io::Output;
use burrow_core::orchestrator::RemoveOptions;
use tracing::{info, instrument};

#[instrument(skip(context))]
pub async fn execute(
    context: &CliContext,
    name: &str,
    force: bool,
    keep_volumes: bool,
) -> Result<()> {
    validate_name(name)?;
    if !(force || context.yes) {
        let prompt = if keep_volumes {
            format!("Remove {}? Volumes will be kept.", name)
        } else {
            format!("Remove {} and its volumes?", name)
        };
        if !confirm(&prompt)? {
            info!("Remove of {} cancelled", name);
            return Ok(());
        }
    }

    let environment = Environment::load(context)?;
    let orchestrator = environment.orchestrator()?;
    let outcome = orchestrator
        .remove(
            name,
            &RemoveOptions {
                keep_storage: keep_volumes,
            },
        )
        .await?;

    print_warnings(&outcome.warnings);
    Output::stdout().write_line(&format!(
        "Removed {}{}",
        outcome.name,
        if outcome.storage_kept {
            " (volumes kept)"
        } else {
            ""
        }
    ))
}
