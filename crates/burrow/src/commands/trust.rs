//! `burrow trust`: drift between connection entries and the active endpoint

use crate::cli::{CliContext, OutputFormat};
use crate::commands::shared::{emit, Environment};
use anyhow::Result;
use burrow_core::errors::BurrowError;
use burrow_core::io::Output;
use burrow_core::trust::TrustStore;
use burrow_core::trust_sync::{self, Connection};
use console::style;
use tracing::{info, instrument};

/// Endpoints end up verbatim in ssh config, so reject anything that would split a directive
fn validate_endpoint(endpoint: &str) -> Result<()> {
    if endpoint.is_empty() || endpoint.chars().any(|c| c.is_whitespace() || c == '#') {
        return Err(
            BurrowError::validation(format!("invalid endpoint '{}'", endpoint)).into(),
        );
    }
    Ok(())
}

pub fn diff(context: &CliContext, output: OutputFormat) -> Result<()> {
    let environment = Environment::load(context)?;
    let active = environment.active()?;
    let config = environment.trust_store().read_config()?;
    let mismatches = trust_sync::diff(&config, &environment.settings.prefix, &active.endpoint);

    emit(output, &mismatches, |mismatches| {
        if mismatches.is_empty() {
            return vec![format!(
                "All entries point at {} ({})",
                active.endpoint, active.name
            )];
        }
        mismatches
            .iter()
            .map(|m| {
                format!(
                    "{}  {} -> {}",
                    m.alias,
                    style(&m.recorded).red(),
                    style(&m.expected).green()
                )
            })
            .collect()
    })
}

#[instrument(skip(context))]
pub fn apply(context: &CliContext, alias: &str, endpoint: &str) -> Result<()> {
    validate_endpoint(endpoint)?;
    let environment = Environment::load(context)?;
    let store = environment.trust_store();
    let updated = trust_sync::apply(&store.read_config()?, alias, endpoint)?;
    store.write_config(&updated)?;
    info!("Pointed {} at {}", alias, endpoint);
    Output::stdout().write_line(&format!("{} -> {}", alias, endpoint))
}

#[instrument(skip(context))]
pub fn switch(context: &CliContext, target: &str, dry_run: bool) -> Result<()> {
    let mut environment = Environment::load(context)?;
    let store = environment.trust_store();
    let prefix = environment.settings.prefix.clone();
    let plan = trust_sync::switch(&mut environment.registry, &store, &prefix, target, dry_run)?;

    let mut output = Output::stdout();
    let verb = if plan.dry_run { "Would move" } else { "Moved" };
    for rewrite in &plan.rewrites {
        output.write_line(&format!(
            "{} {}  {} -> {}",
            verb, rewrite.alias, rewrite.from, rewrite.to
        ))?;
    }
    let summary = if plan.dry_run {
        format!(
            "Dry run: {} entries would move from {} to {}",
            plan.rewrites.len(),
            plan.from.name,
            plan.to.name
        )
    } else {
        format!("Active connection is now {}", plan.to.name)
    };
    output.write_line(&summary)
}

#[instrument(skip(context))]
pub fn add_connection(
    context: &CliContext,
    name: String,
    endpoint: String,
    host: Option<String>,
) -> Result<()> {
    validate_endpoint(&endpoint)?;
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(BurrowError::validation(format!("invalid connection name '{}'", name)).into());
    }
    let mut environment = Environment::load(context)?;
    environment.registry.upsert(Connection {
        name: name.clone(),
        endpoint,
        host,
    });
    environment.registry.save()?;
    Output::stdout().write_line(&format!("Saved connection {}", name))
}

pub fn connections(context: &CliContext) -> Result<()> {
    let environment = Environment::load(context)?;
    let mut output = Output::stdout();
    for connection in &environment.registry.connections {
        let marker = if connection.name == environment.registry.active {
            "*"
        } else {
            " "
        };
        output.write_line(&format!(
            "{} {}  {}  {}",
            marker,
            connection.name,
            connection.endpoint,
            connection.host.as_deref().unwrap_or("local daemon")
        ))?;
    }
    Ok(())
}
