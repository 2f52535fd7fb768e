//! Configuration loading and resolution.
//!
//! The YAML document has two layers: a `global` section with defaults shared
//! by every repository, and a `repositories` list with per-repository
//! overrides. The inheritance rule is "per-repo value wins if truthy, else
//! global" — an empty string or missing key falls back, `false` does not
//! override a global `true` because booleans default to `false` and are only
//! meaningful per repository.
//!
//! Loading produces fully-resolved [`RepositoryConfig`] values: URLs joined
//! against their base, workspaces made absolute and created, thresholds
//! defaulted, ignore globs compiled.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;

use crate::git::url;

pub const DEFAULT_LFS_FILE_THRESHOLD_MB: u64 = 100;
pub const DEFAULT_LFS_TOTAL_THRESHOLD_MB: u64 = 500;

/// The branch name reserved for the sync journal; never replicated.
pub const SYNC_STATE_BRANCH: &str = "sync_state";

// ---------------------------------------------------------------------------
// Raw document shape (what serde_yaml sees)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    global: GlobalSection,
    #[serde(default)]
    repositories: Vec<RepoSection>,
}

#[derive(Debug, Default, Deserialize)]
struct GlobalSection {
    #[serde(default)]
    source_base_url: String,
    #[serde(default)]
    dest_base_url: String,
    #[serde(default)]
    commit_user_name: String,
    #[serde(default)]
    commit_user_email: String,
    #[serde(default)]
    lfs_file_threshold_mb: Option<u64>,
    #[serde(default)]
    lfs_total_threshold_mb: Option<u64>,
    #[serde(default)]
    workspace: String,
    #[serde(default)]
    auth: AuthSection,
}

#[derive(Debug, Default, Clone, Deserialize)]
struct AuthSection {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    ssh_private_key: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
struct RepoSection {
    name: String,
    #[serde(default)]
    source_repo: String,
    #[serde(default)]
    dest_repo: String,
    #[serde(default)]
    clean_history: bool,
    #[serde(default)]
    workspace: String,
    #[serde(default)]
    enable_lfs: bool,
    #[serde(default)]
    lfs_file_threshold_mb: Option<u64>,
    #[serde(default)]
    lfs_total_threshold_mb: Option<u64>,
    #[serde(default)]
    auth: Option<AuthSection>,
    #[serde(default)]
    branch_map: IndexMap<String, String>,
    #[serde(default)]
    ignore_branches: Vec<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    Ssh,
    Http,
    None,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub kind: AuthKind,
    pub ssh_private_key: Option<PathBuf>,
    pub username: String,
    pub password: String,
}

/// Identity applied to every commit this tool authors in a workspace.
#[derive(Debug, Clone)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    pub name: String,
    pub source_url: String,
    pub dest_url: String,
    pub workspace_path: PathBuf,
    pub clean_history: bool,
    pub enable_lfs: bool,
    pub lfs_file_threshold_mb: u64,
    pub lfs_total_threshold_mb: u64,
    pub auth: AuthConfig,
    pub branch_map: IndexMap<String, String>,
    pub ignore_branches: Vec<String>,
    ignore_patterns: Vec<Regex>,
}

impl RepositoryConfig {
    /// The unified work directory for this repository.
    pub fn work_dir(&self) -> PathBuf {
        self.workspace_path.join(&self.name).join("sync_work")
    }

    /// Destination branch for a source branch, honoring `branch_map`.
    pub fn map_branch<'a>(&'a self, branch: &'a str) -> &'a str {
        self.branch_map
            .get(branch)
            .map(String::as_str)
            .unwrap_or(branch)
    }

    /// Whether a source branch is excluded from replication.
    ///
    /// The journal branch is always excluded, ahead of any configured globs.
    pub fn is_ignored(&self, branch: &str) -> bool {
        if branch == SYNC_STATE_BRANCH {
            return true;
        }
        self.ignore_patterns.iter().any(|re| re.is_match(branch))
    }

    /// Destination URL with HTTP credentials injected, for clone/set-url.
    pub fn dest_url_with_auth(&self) -> String {
        url::with_credentials(&self.dest_url, &self.auth.username, &self.auth.password)
    }
}

#[cfg(test)]
impl RepositoryConfig {
    /// Minimal resolved config for unit tests that never touch a workspace.
    pub(crate) fn test_stub(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source_url: "https://example.com/source.git".to_string(),
            dest_url: "https://example.com/dest.git".to_string(),
            workspace_path: PathBuf::from("/scripted"),
            clean_history: false,
            enable_lfs: false,
            lfs_file_threshold_mb: DEFAULT_LFS_FILE_THRESHOLD_MB,
            lfs_total_threshold_mb: DEFAULT_LFS_TOTAL_THRESHOLD_MB,
            auth: AuthConfig {
                kind: AuthKind::None,
                ssh_private_key: None,
                username: String::new(),
                password: String::new(),
            },
            branch_map: IndexMap::new(),
            ignore_branches: Vec::new(),
            ignore_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub identity: CommitIdentity,
    pub repositories: Vec<RepositoryConfig>,
}

impl Config {
    /// Load and resolve a configuration file.
    ///
    /// Fatal on structural problems: unreadable file, unresolvable URL,
    /// missing workspace, zero thresholds, unknown auth type, malformed
    /// branch mapping. Workspace directories are created here so later git
    /// work never has to.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Configuration file '{}' not found", path.display()))?;
        let doc: ConfigDocument = serde_yaml::from_str(&text)
            .with_context(|| format!("Failed to parse '{}'", path.display()))?;
        Self::resolve(doc)
    }

    fn resolve(doc: ConfigDocument) -> anyhow::Result<Self> {
        let global = doc.global;
        let mut repositories = Vec::with_capacity(doc.repositories.len());

        for repo in doc.repositories {
            repositories.push(resolve_repository(repo, &global)?);
        }

        Ok(Self {
            identity: CommitIdentity {
                name: global.commit_user_name,
                email: global.commit_user_email,
            },
            repositories,
        })
    }
}

fn resolve_repository(
    repo: RepoSection,
    global: &GlobalSection,
) -> anyhow::Result<RepositoryConfig> {
    let name = repo.name;
    if name.is_empty() {
        bail!("Repository entry is missing a name");
    }

    let source_url = url::resolve(&repo.source_repo, &global.source_base_url)
        .with_context(|| format!("Repository '{name}': bad source_repo"))?;
    let dest_url = url::resolve(&repo.dest_repo, &global.dest_base_url)
        .with_context(|| format!("Repository '{name}': bad dest_repo"))?;

    let workspace = or_inherit(&repo.workspace, &global.workspace);
    if workspace.is_empty() {
        bail!("Repository '{name}' has no workspace defined (check global workspace setting)");
    }
    let workspace_path = std::path::absolute(workspace)
        .with_context(|| format!("Repository '{name}': bad workspace path"))?;
    fs::create_dir_all(&workspace_path).with_context(|| {
        format!(
            "Repository '{name}': cannot create workspace '{}'",
            workspace_path.display()
        )
    })?;

    let lfs_file_threshold_mb = repo
        .lfs_file_threshold_mb
        .filter(|&v| v > 0)
        .or(global.lfs_file_threshold_mb.filter(|&v| v > 0))
        .unwrap_or(DEFAULT_LFS_FILE_THRESHOLD_MB);
    let lfs_total_threshold_mb = repo
        .lfs_total_threshold_mb
        .filter(|&v| v > 0)
        .or(global.lfs_total_threshold_mb.filter(|&v| v > 0))
        .unwrap_or(DEFAULT_LFS_TOTAL_THRESHOLD_MB);

    let auth = resolve_auth(repo.auth.as_ref(), &global.auth)
        .with_context(|| format!("Repository '{name}': bad auth section"))?;

    for (src, dst) in &repo.branch_map {
        if !is_valid_branch_name(dst) {
            bail!("Repository '{name}': branch_map maps '{src}' to invalid branch name '{dst}'");
        }
    }

    let mut ignore_patterns = Vec::with_capacity(repo.ignore_branches.len());
    for pattern in &repo.ignore_branches {
        ignore_patterns.push(
            glob_to_regex(pattern)
                .with_context(|| format!("Repository '{name}': bad ignore pattern '{pattern}'"))?,
        );
    }

    Ok(RepositoryConfig {
        name,
        source_url,
        dest_url,
        workspace_path,
        clean_history: repo.clean_history,
        enable_lfs: repo.enable_lfs,
        lfs_file_threshold_mb,
        lfs_total_threshold_mb,
        auth,
        branch_map: repo.branch_map,
        ignore_branches: repo.ignore_branches,
        ignore_patterns,
    })
}

fn resolve_auth(repo: Option<&AuthSection>, global: &AuthSection) -> anyhow::Result<AuthConfig> {
    let empty = AuthSection::default();
    let repo = repo.unwrap_or(&empty);

    let kind_str = or_inherit(&repo.kind, &global.kind);
    let kind = match kind_str.as_str() {
        "ssh" => AuthKind::Ssh,
        "http" => AuthKind::Http,
        "" => AuthKind::None,
        other => bail!("Unknown auth type '{other}' (expected 'ssh' or 'http')"),
    };

    let ssh_private_key = or_inherit(&repo.ssh_private_key, &global.ssh_private_key);
    Ok(AuthConfig {
        kind,
        ssh_private_key: (!ssh_private_key.is_empty()).then(|| PathBuf::from(ssh_private_key)),
        username: or_inherit(&repo.username, &global.username),
        password: or_inherit(&repo.password, &global.password),
    })
}

/// Per-repo string wins if non-empty, else the global value.
fn or_inherit(repo: &str, global: &str) -> String {
    if repo.is_empty() { global } else { repo }.to_string()
}

/// A branch name git would accept as a ref component.
///
/// Not a full reimplementation of `check-ref-format`; rejects the shapes
/// that would make the replicator build broken refspecs.
fn is_valid_branch_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && !name.starts_with('/')
        && !name.ends_with('/')
        && !name.ends_with(".lock")
        && !name.contains("..")
        && !name.chars().any(|c| c.is_whitespace() || "~^:?*[\\".contains(c))
}

/// Convert a shell-style glob to an anchored regex.
///
/// All regex metacharacters are escaped and the pattern is anchored at both
/// ends, so `tmp/*` matches `tmp/hotfix` but `feat` does not match
/// `feature/x`.
pub fn glob_to_regex(pattern: &str) -> anyhow::Result<Regex> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&format!("^{escaped}$"))
        .with_context(|| format!("Invalid ignore pattern: {pattern}"))
}
