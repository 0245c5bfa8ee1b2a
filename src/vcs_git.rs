//! Git working tree sink.
//!
//! Drives the `git` CLI as a subprocess. The tree mirrors the export
//! layout (`<schema>/<KIND>/<name>.sql`) and holds each object's clean
//! source verbatim. A `README.md` with a "Last updated" stamp is kept at
//! the root and refreshed on every commit.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use sourcewatch_core::models::ObjectId;

use crate::config::GitConfig;
use crate::traits::VersionControl;

/// Maximum number of paths passed to a single `git add`.
const ADD_BATCH: usize = 50;

const README: &str = "README.md";
const STAMP_PREFIX: &str = "Last updated:";

pub struct GitRepo {
    root: PathBuf,
    config: GitConfig,
    project: String,
}

impl GitRepo {
    pub fn new(config: &GitConfig, project: &str) -> Self {
        Self {
            root: config.repo_path.clone(),
            config: config.clone(),
            project: project.to_string(),
        }
    }

    /// Make the working tree ready: pull an existing clone, clone the
    /// remote, or initialise a fresh repository with a README.
    pub fn prepare(&self) -> Result<()> {
        if self.root.join(".git").exists() {
            if self.config.has_remote() {
                if let Err(e) = self.pull() {
                    tracing::warn!("git pull failed, continuing with local tree: {:#}", e);
                }
            }
            return Ok(());
        }

        if self.config.has_remote() && is_empty_dir(&self.root)? {
            self.clone_remote()?;
            if !self.root.join(README).exists() {
                self.write_readme()?;
            }
            return Ok(());
        }

        self.init()
    }

    fn clone_remote(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create repository directory: {}", self.root.display()))?;

        let root = self.root.to_string_lossy().to_string();
        let output = Command::new("git")
            .args(["clone", "--branch", &self.config.branch, &self.config.remote_url, &root])
            .output()
            .with_context(|| "Failed to execute 'git clone'. Is git installed?")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git clone failed: {}", stderr.trim());
        }
        tracing::info!("Cloned {} into {}", self.config.remote_url, self.root.display());
        Ok(())
    }

    fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create repository directory: {}", self.root.display()))?;

        self.run(&["init"])?;
        let head = format!("refs/heads/{}", self.config.branch);
        self.run(&["symbolic-ref", "HEAD", &head])?;
        if self.config.has_remote() {
            self.run(&["remote", "add", "origin", &self.config.remote_url])?;
        }

        self.write_readme()?;
        self.run(&["add", "--", README])?;
        self.run(&["commit", "-m", "Initial commit"])?;
        tracing::info!("Initialised repository at {}", self.root.display());
        Ok(())
    }

    fn pull(&self) -> Result<()> {
        self.run(&["pull", "--rebase", "origin", &self.config.branch])?;
        Ok(())
    }

    fn push(&self) -> Result<()> {
        if self.run(&["push", "origin", &self.config.branch]).is_ok() {
            return Ok(());
        }
        tracing::warn!("git push rejected, rebasing onto origin/{}", self.config.branch);
        self.pull()?;
        self.run(&["push", "origin", &self.config.branch])?;
        Ok(())
    }

    fn write_readme(&self) -> Result<()> {
        let text = format!(
            "# {} database objects\n\n\
             Source snapshots of tracked procedural objects, one file per object\n\
             under `<schema>/<KIND>/<name>.sql`.\n\n\
             {} {}\n",
            self.project,
            STAMP_PREFIX,
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        std::fs::write(self.root.join(README), text).with_context(|| "Failed to write README.md")
    }

    /// Replace the "Last updated" line of the README, creating it if absent.
    fn refresh_readme(&self) -> Result<()> {
        let path = self.root.join(README);
        let Ok(existing) = std::fs::read_to_string(&path) else {
            return self.write_readme();
        };

        let stamp = format!("{} {}", STAMP_PREFIX, Local::now().format("%Y-%m-%d %H:%M:%S"));
        let mut found = false;
        let mut lines: Vec<String> = existing
            .lines()
            .map(|line| {
                if line.starts_with(STAMP_PREFIX) {
                    found = true;
                    stamp.clone()
                } else {
                    line.to_string()
                }
            })
            .collect();
        if !found {
            lines.push(String::new());
            lines.push(stamp);
        }
        std::fs::write(&path, lines.join("\n") + "\n").with_context(|| "Failed to update README.md")
    }

    fn has_staged_changes(&self) -> Result<bool> {
        let output = self.git(&["diff", "--cached", "--quiet"])?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                bail!("git diff --cached failed: {}", stderr.trim());
            }
        }
    }

    fn head_sha(&self) -> Result<String> {
        let output = self.run(&["rev-parse", "HEAD"])?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn git(&self, args: &[&str]) -> Result<Output> {
        let name = format!("user.name={}", self.config.author_name);
        let email = format!("user.email={}", self.config.author_email);
        Command::new("git")
            .args(["-c", &name, "-c", &email])
            .args(args)
            .current_dir(&self.root)
            .output()
            .with_context(|| format!("Failed to execute 'git {}'", args.first().unwrap_or(&"")))
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        let output = self.git(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            );
        }
        Ok(output)
    }
}

#[async_trait]
impl VersionControl for GitRepo {
    async fn save(&self, id: &ObjectId, clean: &str) -> Result<String> {
        let relative = id.relative_path();
        let path = self.root.join(&relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(&path, clean)
            .with_context(|| format!("Failed to write snapshot: {}", path.display()))?;
        Ok(relative)
    }

    async fn commit(&self, paths: &[String], message: &str) -> Result<Option<String>> {
        if paths.is_empty() {
            return Ok(None);
        }

        self.refresh_readme()?;

        let mut staged: Vec<&str> = vec![README];
        staged.extend(paths.iter().map(String::as_str));
        for batch in staged.chunks(ADD_BATCH) {
            let mut args = vec!["add", "--"];
            args.extend_from_slice(batch);
            self.run(&args)?;
        }

        if !self.has_staged_changes()? {
            let sha = self.head_sha()?;
            tracing::info!("Tree already matches {}, nothing to commit", sha);
            return Ok(Some(sha));
        }

        self.run(&["commit", "-m", message])?;
        let sha = self.head_sha()?;
        tracing::info!("Committed {} files as {}", paths.len(), sha);

        if self.config.push && self.config.has_remote() {
            match self.push() {
                Ok(()) => tracing::info!("Pushed {} to origin/{}", sha, self.config.branch),
                Err(e) => tracing::error!("Failed to push commit {}: {:#}", sha, e),
            }
        }

        Ok(Some(sha))
    }

    fn root(&self) -> PathBuf {
        self.root.clone()
    }
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(true);
    }
    let mut entries = std::fs::read_dir(path)
        .with_context(|| format!("Failed to read directory: {}", path.display()))?;
    Ok(entries.next().is_none())
}
