//! Git worktree discovery
//!
//! A resource is bound to the root of a git working tree. Any path inside the
//! tree, including a subdirectory of a linked worktree, resolves to the same
//! root so the derived name does not depend on where the command was run.

use crate::errors::{BurrowError, ConfigError, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, instrument};

/// Where a worktree's git metadata lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorktreeKind {
    /// `.git` is a directory
    Primary,
    /// `.git` is a file pointing at `<main>/.git/worktrees/<name>`
    Linked { main_repository: PathBuf },
    /// `.git` is a file pointing somewhere else (submodules)
    Other,
}

/// A discovered worktree root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worktree {
    pub root: PathBuf,
    pub kind: WorktreeKind,
}

/// Find the worktree containing `path`
///
/// Returns `Ok(None)` when no `.git` entry exists above the canonical path.
#[instrument]
pub fn find_worktree(path: &Path) -> Result<Option<Worktree>> {
    let canonical = crate::identity::canonicalize_path(path)?;

    let mut current = canonical.as_path();
    loop {
        let git_path = current.join(".git");
        if git_path.is_dir() {
            debug!("Found primary worktree at {}", current.display());
            return Ok(Some(Worktree {
                root: current.to_path_buf(),
                kind: WorktreeKind::Primary,
            }));
        }
        if git_path.is_file() {
            let kind = match parse_gitdir_file(&git_path)? {
                Some(gitdir) => match main_repository_of(&gitdir) {
                    Some(main_repository) => WorktreeKind::Linked { main_repository },
                    None => WorktreeKind::Other,
                },
                None => WorktreeKind::Other,
            };
            debug!("Found worktree at {} ({:?})", current.display(), kind);
            return Ok(Some(Worktree {
                root: current.to_path_buf(),
                kind,
            }));
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => return Ok(None),
        }
    }
}

/// Root a resource should be bound to: the enclosing worktree, or the path itself
pub fn resolve_worktree_root(path: &Path) -> Result<PathBuf> {
    match find_worktree(path)? {
        Some(worktree) => Ok(worktree.root),
        None => crate::identity::canonicalize_path(path),
    }
}

/// Default repository name for a worktree root
///
/// Linked worktrees report the main repository's directory name so every
/// worktree of one repository shares the `prefix-repo-` namespace.
pub fn repository_name(path: &Path) -> Result<String> {
    let worktree = find_worktree(path)?;
    let named = match &worktree {
        Some(Worktree {
            kind: WorktreeKind::Linked { main_repository },
            ..
        }) => main_repository.as_path(),
        Some(Worktree { root, .. }) => root.as_path(),
        None => path,
    };

    named
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            BurrowError::validation(format!(
                "cannot derive a repository name from {}; pass --repo",
                named.display()
            ))
        })
}

/// Read the `gitdir:` pointer from a `.git` file
fn parse_gitdir_file(git_file: &Path) -> Result<Option<PathBuf>> {
    let content = fs::read_to_string(git_file).map_err(ConfigError::Io)?;
    let gitdir = content
        .lines()
        .find_map(|line| line.trim().strip_prefix("gitdir:"))
        .map(|rest| PathBuf::from(rest.trim()));

    Ok(gitdir.map(|dir| {
        if dir.is_relative() {
            git_file.parent().map(|p| p.join(&dir)).unwrap_or(dir)
        } else {
            dir
        }
    }))
}

/// `<main>/.git/worktrees/<name>` -> `<main>`
fn main_repository_of(gitdir: &Path) -> Option<PathBuf> {
    let components: Vec<Component<'_>> = gitdir.components().collect();
    let position = components.windows(2).rposition(|pair| {
        matches!(
            (pair[0], pair[1]),
            (Component::Normal(a), Component::Normal(b)) if a == ".git" && b == "worktrees"
        )
    })?;
    Some(components[..position].iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_no_git_returns_none() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        assert_eq!(find_worktree(temp.path())?, None);
        assert_eq!(
            resolve_worktree_root(temp.path())?,
            temp.path().canonicalize()?
        );
        Ok(())
    }

    #[test]
    fn test_primary_worktree_from_subdirectory() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        fs::create_dir(temp.path().join(".git"))?;
        let sub = temp.path().join("src").join("deep");
        fs::create_dir_all(&sub)?;

        let worktree = find_worktree(&sub)?.expect("worktree");
        assert_eq!(worktree.root, temp.path().canonicalize()?);
        assert_eq!(worktree.kind, WorktreeKind::Primary);
        Ok(())
    }

    #[test]
    fn test_linked_worktree_reports_main_repository() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let linked = temp.path().join("feature-x");
        fs::create_dir(&linked)?;
        fs::write(
            linked.join(".git"),
            "gitdir: /home/u/proj/.git/worktrees/feature-x\n",
        )?;

        let worktree = find_worktree(&linked)?.expect("worktree");
        assert_eq!(
            worktree.kind,
            WorktreeKind::Linked {
                main_repository: PathBuf::from("/home/u/proj")
            }
        );
        assert_eq!(repository_name(&linked)?, "proj");
        Ok(())
    }

    #[test]
    fn test_submodule_git_file_is_not_linked() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        fs::write(
            temp.path().join(".git"),
            "gitdir: /home/u/my-worktrees-project/.git/modules/sub\n",
        )?;
        let worktree = find_worktree(temp.path())?.expect("worktree");
        assert_eq!(worktree.kind, WorktreeKind::Other);
        Ok(())
    }

    #[test]
    fn test_repository_name_of_primary() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let repo = temp.path().join("my-repo");
        fs::create_dir_all(repo.join(".git"))?;
        assert_eq!(repository_name(&repo.join("."))?, "my-repo");
        Ok(())
    }

    #[test]
    fn test_relative_gitdir_is_resolved_against_worktree() {
        let temp = TempDir::new().unwrap();
        let git_file = temp.path().join(".git");
        fs::write(&git_file, "gitdir: ../main/.git/worktrees/wt\n").unwrap();
        let gitdir = parse_gitdir_file(&git_file).unwrap().unwrap();
        assert!(gitdir.starts_with(temp.path()));
    }
}
