//! Git operations: subprocess driver, URL handling, and output parsing.

mod driver;
mod error;
pub mod url;

pub use driver::{GitDriver, GitRunner};
pub use error::GitError;

/// The `|`-delimited format shared by `git log -1` and `git show -s`.
pub const COMMIT_FORMAT: &str = "%H|%an|%ae|%ad|%s";

/// Metadata for a single commit, parsed from [`COMMIT_FORMAT`] output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub hash: String,
    pub author: String,
    pub email: String,
    pub date: String,
    pub subject: String,
}

impl CommitInfo {
    /// Parse one formatted line. Splits into at most five fields so a `|`
    /// inside the subject survives.
    pub fn parse(line: &str) -> Result<Self, GitError> {
        let line = line.trim();
        let parts: Vec<&str> = line.splitn(5, '|').collect();
        if parts.len() < 5 {
            return Err(GitError::ParseError(format!(
                "Invalid commit info format: {line}"
            )));
        }
        Ok(Self {
            hash: parts[0].to_string(),
            author: parts[1].to_string(),
            email: parts[2].to_string(),
            date: parts[3].to_string(),
            subject: parts[4].to_string(),
        })
    }
}

/// Parse `git branch -r` output into branch names under `remote_prefix`
/// (e.g. `"source/"`), in git's order but with `master` (else `main`)
/// promoted to the front.
///
/// Symbolic entries (`origin/HEAD -> origin/main`), the current-branch
/// marker, the remote `HEAD` ref, and duplicates are dropped.
pub fn parse_remote_branches(output: &str, remote_prefix: &str) -> Vec<String> {
    let mut branches: Vec<String> = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.contains("->") || line.starts_with('*') {
            continue;
        }
        let Some(branch) = line.strip_prefix(remote_prefix) else {
            continue;
        };
        if branch == "HEAD" || branch.is_empty() {
            continue;
        }
        if !branches.iter().any(|b| b == branch) {
            branches.push(branch.to_string());
        }
    }

    // The default branch syncs first so the destination's HEAD target exists
    // before topic branches arrive.
    for preferred in ["master", "main"] {
        if let Some(pos) = branches.iter().position(|b| b == preferred) {
            let branch = branches.remove(pos);
            branches.insert(0, branch);
            break;
        }
    }

    branches
}
