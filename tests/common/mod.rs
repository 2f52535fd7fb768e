//! Test harness for gitmirror integration tests.
//!
//! `MirrorFixture` builds an isolated world in a temporary directory: a
//! source repository with real history, a bare destination repository, and a
//! workspace. Tests mutate the source with plain git commands, run the
//! orchestrator through the library API, then assert on the destination's
//! refs and the persisted `sync_state` journal.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use gitmirror::config::Config;
use gitmirror::git::GitDriver;
use gitmirror::report::RunReport;
use gitmirror::sync::Orchestrator;
use tempfile::TempDir;

/// Run git in a test-owned repository, panicking on failure.
///
/// Author/committer identity is pinned so test commits are deterministic
/// regardless of the host's git configuration.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Test Author")
        .env("GIT_AUTHOR_EMAIL", "author@example.com")
        .env("GIT_COMMITTER_NAME", "Test Author")
        .env("GIT_COMMITTER_EMAIL", "author@example.com")
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .output()
        .expect("failed to spawn git");
    assert!(
        output.status.success(),
        "git {args:?} failed in {}:\n{}{}",
        dir.display(),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr),
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub struct MirrorFixture {
    root: TempDir,
    pub source: PathBuf,
    pub dest: PathBuf,
    pub workspace: PathBuf,
}

impl MirrorFixture {
    /// A source repository with one commit on `main`, an empty bare
    /// destination, and an empty workspace.
    pub fn new() -> Self {
        let root = TempDir::new().expect("failed to create temp dir");
        let source = root.path().join("source");
        let dest = root.path().join("dest.git");
        let workspace = root.path().join("workspace");

        fs::create_dir_all(&source).unwrap();
        git(&source, &["init"]);
        git(&source, &["checkout", "-b", "main"]);
        fs::write(source.join("README.md"), "# widget\n").unwrap();
        git(&source, &["add", "."]);
        git(&source, &["commit", "-m", "Initial commit"]);

        git(root.path(), &["init", "--bare", "--initial-branch=main", "dest.git"]);

        Self {
            root,
            source,
            dest,
            workspace,
        }
    }

    /// Commit a file on a source branch, returning the new commit hash.
    pub fn commit_on(&self, branch: &str, file: &str, content: &str, message: &str) -> String {
        git(&self.source, &["checkout", branch]);
        let path = self.source.join(file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
        git(&self.source, &["add", "."]);
        git(&self.source, &["commit", "-m", message]);
        git(&self.source, &["rev-parse", "HEAD"])
    }

    /// Create a source branch off an existing one.
    pub fn branch_from(&self, name: &str, from: &str) {
        git(&self.source, &["branch", name, from]);
    }

    pub fn source_sha(&self, branch: &str) -> String {
        git(&self.source, &["rev-parse", &format!("refs/heads/{branch}")])
    }

    pub fn dest_sha(&self, branch: &str) -> String {
        git(&self.dest, &["rev-parse", &format!("refs/heads/{branch}")])
    }

    pub fn dest_tree(&self, branch: &str) -> String {
        git(
            &self.dest,
            &["rev-parse", &format!("refs/heads/{branch}^{{tree}}")],
        )
    }

    pub fn source_tree(&self, branch: &str) -> String {
        git(
            &self.source,
            &["rev-parse", &format!("refs/heads/{branch}^{{tree}}")],
        )
    }

    pub fn dest_has_branch(&self, branch: &str) -> bool {
        Command::new("git")
            .args(["rev-parse", "--verify", &format!("refs/heads/{branch}")])
            .current_dir(&self.dest)
            .output()
            .expect("failed to spawn git")
            .status
            .success()
    }

    pub fn dest_commit_count(&self, branch: &str) -> usize {
        git(
            &self.dest,
            &["rev-list", "--count", &format!("refs/heads/{branch}")],
        )
        .parse()
        .unwrap()
    }

    pub fn dest_log_subject(&self, branch: &str) -> String {
        git(
            &self.dest,
            &["log", "-1", "--format=%B", &format!("refs/heads/{branch}")],
        )
    }

    /// The persisted journal from the destination's `sync_state` branch.
    pub fn sync_state_json(&self) -> serde_json::Value {
        let text = git(
            &self.dest,
            &["show", "refs/heads/sync_state:sync_state.json"],
        );
        serde_json::from_str(&text).expect("sync_state.json is not valid JSON")
    }

    pub fn sync_state_commit_count(&self) -> usize {
        git(&self.dest, &["rev-list", "--count", "refs/heads/sync_state"])
            .parse()
            .unwrap()
    }

    /// Write a config file mirroring `source` to `dest` and return its path.
    ///
    /// `repo_extra` is indented YAML appended to the repository entry
    /// (branch_map, ignore_branches, clean_history, ...).
    pub fn write_config(&self, repo_extra: &str) -> PathBuf {
        let yaml = format!(
            "global:\n\
             \x20 commit_user_name: Mirror Bot\n\
             \x20 commit_user_email: bot@example.com\n\
             \x20 workspace: {workspace}\n\
             repositories:\n\
             \x20 - name: widget\n\
             \x20   source_repo: {source}\n\
             \x20   dest_repo: {dest}\n\
             {repo_extra}",
            workspace = self.workspace.display(),
            source = self.source.display(),
            dest = self.dest.display(),
        );
        let path = self.root.path().join("config.yaml");
        fs::write(&path, yaml).unwrap();
        path
    }

    /// Load the config and run the orchestrator over it.
    pub fn run_sync(&self, config_path: &Path, force_full: bool) -> RunReport {
        let config = Config::load(config_path).expect("config should load");
        Orchestrator::new(&config, GitDriver::new(false), force_full).run()
    }
}

impl Default for MirrorFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Rstest fixture: a fresh mirror world per test.
#[rstest::fixture]
pub fn fixture() -> MirrorFixture {
    MirrorFixture::new()
}
