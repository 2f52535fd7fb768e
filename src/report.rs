//! Per-repository report entries and the end-of-run summary table.
//!
//! Reporting consumes what the orchestrator records; nothing here feeds back
//! into sync behavior.

use std::fmt;

/// Aggregated status of one repository's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoStatus {
    /// No branch failed
    Success,
    /// Some branches synced, some failed
    PartialSuccess,
    /// Nothing synced and at least one failure, or a repository-level error
    Failed,
}

impl fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RepoStatus::Success => "success",
            RepoStatus::PartialSuccess => "partial_success",
            RepoStatus::Failed => "failed",
        };
        write!(f, "{text}")
    }
}

/// Report entry for a single repository.
#[derive(Debug, Clone)]
pub struct RepoReport {
    pub name: String,
    pub mode: String,
    pub status: RepoStatus,
    pub synced: usize,
    pub skipped: usize,
    pub new_branches: usize,
    pub failed: usize,
    pub ignored: Vec<String>,
    pub lfs_triggered: bool,
    pub error: Option<String>,
    pub start_time: String,
    pub end_time: Option<String>,
}

impl RepoReport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            mode: "unknown".to_string(),
            status: RepoStatus::Failed,
            synced: 0,
            skipped: 0,
            new_branches: 0,
            failed: 0,
            ignored: Vec::new(),
            lfs_triggered: false,
            error: None,
            start_time: now_iso(),
            end_time: None,
        }
    }
}

/// The whole run: one entry per configured repository.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub repositories: Vec<RepoReport>,
    pub start_time: String,
    pub end_time: Option<String>,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            repositories: Vec::new(),
            start_time: now_iso(),
            end_time: None,
        }
    }

    pub fn successful(&self) -> usize {
        self.repositories
            .iter()
            .filter(|r| r.status == RepoStatus::Success)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.repositories.len() - self.successful()
    }

    /// Process exit is 0 only when this holds.
    pub fn all_success(&self) -> bool {
        self.failed() == 0
    }

    /// Fixed-width summary table, one row per repository.
    pub fn print_summary(&self) {
        log::info!("");
        log::info!("-------------------- Synchronization Report --------------------");

        let header = format!(
            "{:<20} | {:<11} | {:<8} | {:<8} | {:<8} | {:<6} | {:<7} | {:<5} | Status",
            "Repository", "Mode", "Synced", "Skipped", "New", "Failed", "Ignored", "LFS"
        );
        log::info!("{header}");
        log::info!("{}", "-".repeat(header.len()));

        for repo in &self.repositories {
            let name: String = repo.name.chars().take(20).collect();
            log::info!(
                "{:<20} | {:<11} | {:<8} | {:<8} | {:<8} | {:<6} | {:<7} | {:<5} | {}",
                name,
                repo.mode,
                repo.synced,
                repo.skipped,
                repo.new_branches,
                repo.failed,
                repo.ignored.len(),
                repo.lfs_triggered,
                repo.status
            );
        }

        log::info!("{}", "-".repeat(header.len()));
        log::info!(
            "Total: {} repositories, Successful: {}, Failed: {}",
            self.repositories.len(),
            self.successful(),
            self.failed()
        );
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Local time in ISO-8601 without offset, matching the journal format.
pub fn now_iso() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}
