use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// A test utility that creates and manages a temporary git repository for testing.
///
/// Cleans up on drop, so every test gets an isolated repository.
pub struct TestGitRepository {
    #[allow(dead_code)] // keeps the TempDir alive for the lifetime of the repository
    temp_dir: TempDir,
    repo_path: PathBuf,
}

impl TestGitRepository {
    /// Creates a new temporary directory for testing.
    /// Does not initialize git repository - call `init()` or `init_with_commit()` for that.
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new().context("Failed to create temp dir")?;
        let repo_path = temp_dir.path().join("repo");
        fs::create_dir_all(&repo_path).context("Failed to create repo dir")?;

        Ok(Self {
            temp_dir,
            repo_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.repo_path
    }

    /// Initializes a new git repository without any commits.
    pub fn init(&self) -> Result<()> {
        self.run_git_command(&["init"])
            .context("Failed to initialize git repository")?;

        // Set local git config to avoid using global config
        self.run_git_command(&["config", "user.email", "test@example.com"])?;
        self.run_git_command(&["config", "user.name", "Test User"])?;

        Ok(())
    }

    /// Initializes a new git repository with an initial commit.
    /// Returns the commit SHA of the initial commit.
    pub fn init_with_commit(&self) -> Result<String> {
        self.init()?;

        self.create_file("README.md", "# Test Repository\n")?;
        self.stage_all()?;
        self.commit("Initial commit")
    }

    /// Creates a bare repository next to the working repository, registers it
    /// as `origin` and pushes the current branch to it. Returns its path.
    pub fn with_bare_origin(&self) -> Result<PathBuf> {
        let origin = self.temp_dir.path().join("origin.git");
        let output = Command::new("git")
            .args(["init", "--bare"])
            .arg(&origin)
            .output()
            .context("Failed to create bare repository")?;
        if !output.status.success() {
            anyhow::bail!(
                "git init --bare failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let origin_str = origin.to_string_lossy().to_string();
        self.run_git_command(&["remote", "add", "origin", &origin_str])?;
        let branch = self.current_branch()?;
        self.run_git_command(&["push", "-u", "origin", &branch])?;
        Ok(origin)
    }

    pub fn create_file(&self, path: &str, content: &str) -> Result<()> {
        let file_path = self.repo_path.join(path);

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create parent directories for {path}"))?;
        }

        fs::write(&file_path, content).with_context(|| format!("Failed to write file {path}"))?;

        Ok(())
    }

    pub fn stage_all(&self) -> Result<()> {
        self.run_git_command(&["add", "-A"])
            .context("Failed to stage files")?;
        Ok(())
    }

    /// Creates a commit with the given message and returns its SHA.
    pub fn commit(&self, message: &str) -> Result<String> {
        self.run_git_command(&["commit", "-m", message])
            .context("Failed to create commit")?;

        self.get_current_commit()
    }

    pub fn get_current_commit(&self) -> Result<String> {
        let output = self
            .run_git_command(&["rev-parse", "HEAD"])
            .context("Failed to get current commit")?;

        Ok(output.trim().to_string())
    }

    pub fn current_branch(&self) -> Result<String> {
        let output = self
            .run_git_command(&["branch", "--show-current"])
            .context("Failed to get current branch")?;

        Ok(output.trim().to_string())
    }

    pub fn status(&self) -> Result<String> {
        self.run_git_command(&["status", "--porcelain"])
            .context("Failed to get git status")
    }

    /// Runs a git command in the repository directory.
    pub fn run_git_command(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .output()
            .context("Failed to execute git command")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Git command failed: {}", stderr);
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_with_commit() -> Result<()> {
        let repo = TestGitRepository::new()?;
        let commit_sha = repo.init_with_commit()?;

        assert_eq!(commit_sha.len(), 40);
        assert!(repo.status()?.is_empty());

        Ok(())
    }

    #[test]
    fn test_bare_origin_receives_push() -> Result<()> {
        let repo = TestGitRepository::new()?;
        let commit_sha = repo.init_with_commit()?;
        let origin = repo.with_bare_origin()?;

        let branch = repo.current_branch()?;
        let output = Command::new("git")
            .arg("--git-dir")
            .arg(&origin)
            .args(["rev-parse", &branch])
            .output()?;
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), commit_sha);

        Ok(())
    }
}
