//! Names derived from real git worktrees

use burrow_core::identity;
use burrow_core::worktree::{find_worktree, repository_name, resolve_worktree_root, WorktreeKind};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn is_git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
    let output = Command::new("git").current_dir(dir).args(args).output()?;
    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).into_owned().into());
    }
    Ok(())
}

/// `<temp>/shop` with one commit and a linked worktree at `<temp>/shop-feature`
fn setup_git_worktree_fixture() -> Result<(TempDir, PathBuf, PathBuf), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    let main_path = temp.path().join("shop");
    fs::create_dir_all(&main_path)?;

    git(&main_path, &["init", "-q"])?;
    git(&main_path, &["config", "user.email", "test@example.com"])?;
    git(&main_path, &["config", "user.name", "Test User"])?;
    fs::write(main_path.join("README.md"), "# shop\n")?;
    git(&main_path, &["add", "README.md"])?;
    git(&main_path, &["commit", "-q", "-m", "Initial commit"])?;

    let worktree_path = temp.path().join("shop-feature");
    let worktree_arg = worktree_path.to_string_lossy().into_owned();
    git(
        &main_path,
        &["worktree", "add", "-q", &worktree_arg, "-b", "feature-branch"],
    )?;

    Ok((temp, main_path.canonicalize()?, worktree_path.canonicalize()?))
}

macro_rules! fixture_or_skip {
    () => {{
        if !is_git_available() {
            eprintln!("Skipping test: git is not available");
            return;
        }
        match setup_git_worktree_fixture() {
            Ok(fixture) => fixture,
            Err(e) => {
                eprintln!("Skipping test: could not set up git worktree: {}", e);
                return;
            }
        }
    }};
}

#[test]
fn test_linked_worktree_root_from_subdirectory() {
    let (_temp, _main_path, worktree_path) = fixture_or_skip!();

    assert_eq!(resolve_worktree_root(&worktree_path).unwrap(), worktree_path);

    let subdir = worktree_path.join("src/deep");
    fs::create_dir_all(&subdir).unwrap();
    assert_eq!(resolve_worktree_root(&subdir).unwrap(), worktree_path);
}

#[test]
fn test_linked_worktree_reports_main_repository() {
    let (_temp, main_path, worktree_path) = fixture_or_skip!();

    let worktree = find_worktree(&worktree_path).unwrap().unwrap();
    assert_eq!(
        worktree.kind,
        WorktreeKind::Linked {
            main_repository: main_path.clone()
        }
    );
    assert_eq!(repository_name(&worktree_path).unwrap(), "shop");
    assert_eq!(repository_name(&main_path).unwrap(), "shop");
}

#[test]
fn test_worktrees_of_one_repository_get_distinct_names() {
    let (_temp, main_path, worktree_path) = fixture_or_skip!();

    let main_name = identity::resolve("dev", "shop", &main_path).unwrap();
    let worktree_name = identity::resolve("dev", "shop", &worktree_path).unwrap();

    assert!(main_name.starts_with("dev-shop-"));
    assert!(worktree_name.starts_with("dev-shop-"));
    assert_ne!(main_name, worktree_name);
}
