//! `burrow list` and `burrow info`

use crate::cli::{CliContext, OutputFormat};
use crate::commands::shared::{emit, Environment};
use anyhow::Result;
use burrow_core::orchestrator::ResourceInfo;
use burrow_core::runtime::{Resource, ResourceStatus, LABEL_WORKTREE};
use console::style;
use tracing::instrument;

#[instrument(skip(context))]
pub async fn list(context: &CliContext, output: OutputFormat) -> Result<()> {
    let environment = Environment::load(context)?;
    let resources = environment.orchestrator()?.list().await?;
    emit(output, &resources, |resources| render_table(resources))
}

#[instrument(skip(context))]
pub async fn info(context: &CliContext, name: &str, output: OutputFormat) -> Result<()> {
    let environment = Environment::load(context)?;
    let info = environment.orchestrator()?.info(name).await?;
    emit(output, &info, render_info)
}

fn colored_status(status: ResourceStatus) -> String {
    let padded = format!("{:<8}", status.as_str());
    match status {
        ResourceStatus::Running => style(padded).green().to_string(),
        ResourceStatus::Created => style(padded).yellow().to_string(),
        ResourceStatus::Stopped => style(padded).dim().to_string(),
    }
}

fn render_table(resources: &[Resource]) -> Vec<String> {
    if resources.is_empty() {
        return vec!["No dev containers".to_string()];
    }
    let width = resources
        .iter()
        .map(|r| r.name.len())
        .max()
        .unwrap_or(0)
        .max(4);
    let mut lines = vec![format!(
        "{:<width$}  {:<8}  {:>5}  {:>5}  WORKTREE",
        "NAME",
        "STATUS",
        "SSH",
        "HTTP",
        width = width
    )];
    for resource in resources {
        lines.push(format!(
            "{:<width$}  {}  {:>5}  {:>5}  {}",
            resource.name,
            colored_status(resource.status),
            resource.control_port,
            resource.service_port,
            resource
                .labels
                .get(LABEL_WORKTREE)
                .map(String::as_str)
                .unwrap_or("-"),
            width = width
        ));
    }
    lines
}

fn render_info(info: &ResourceInfo) -> Vec<String> {
    let resource = &info.resource;
    let mut lines = vec![
        format!("{}", style(&resource.name).bold()),
        format!("  status    {}", colored_status(resource.status)),
        format!("  image     {}", resource.image),
        format!("  ssh port  {}", resource.control_port),
        format!("  http      http://{}:{}", info.endpoint, resource.service_port),
    ];
    if let Some(worktree) = resource.labels.get(LABEL_WORKTREE) {
        lines.push(format!("  worktree  {}", worktree));
    }
    if let Some(created) = resource.created_at {
        lines.push(format!("  created   {}", created.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    match &info.connection {
        Some(block) if info.stale_connection => lines.push(format!(
            "  connect   {}  {}",
            info.ssh_command,
            style(format!(
                "(entry points at {}, active endpoint is {}; run `burrow trust diff`)",
                block.host_name, info.endpoint
            ))
            .yellow()
        )),
        Some(_) => lines.push(format!("  connect   {}", info.ssh_command)),
        None => lines.push(format!(
            "  connect   {}",
            style("no connection entry; rebuild to restore it").yellow()
        )),
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn resource(name: &str, status: ResourceStatus) -> Resource {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_WORKTREE.to_string(), "/src/proj".to_string());
        Resource {
            name: name.to_string(),
            image: "img".to_string(),
            control_port: 2200,
            service_port: 3000,
            status,
            labels,
            created_at: None,
        }
    }

    #[test]
    fn test_render_table() {
        console::set_colors_enabled(false);
        let lines = render_table(&[resource("dev-proj-abc123", ResourceStatus::Running)]);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("NAME "));
        assert_eq!(
            lines[1],
            "dev-proj-abc123  running    2200   3000  /src/proj"
        );
    }

    #[test]
    fn test_render_empty_table() {
        assert_eq!(render_table(&[]), vec!["No dev containers".to_string()]);
    }

    #[test]
    fn test_render_info_without_connection() {
        console::set_colors_enabled(false);
        let info = ResourceInfo {
            resource: resource("dev-proj-abc123", ResourceStatus::Stopped),
            connection: None,
            endpoint: "127.0.0.1".to_string(),
            stale_connection: false,
            ssh_command: "ssh dev-proj-abc123".to_string(),
        };
        let lines = render_info(&info);
        assert!(lines.iter().any(|l| l == "  worktree  /src/proj"));
        assert!(lines.last().unwrap().contains("no connection entry"));
    }
}
