//! Large-file detection and automatic LFS enablement.
//!
//! The detector exists to catch accidentally-committed large binaries, not
//! to LFS-ify source code: only a fixed set of binary extensions is ever
//! considered for tracking. Sizes are MiB (1 048 576 bytes) throughout, for
//! both on-disk files and blob lookups.

use std::fs;
use std::path::Path;

use super::workspace::Workspace;

pub const MIB: f64 = 1_048_576.0;

/// Extensions eligible for LFS tracking.
const BINARY_EXTENSIONS: [&str; 8] = ["tar", "gz", "zip", "jar", "dll", "so", "lib", "exe"];

/// Whether a path's extension marks it as a large-binary candidate.
pub fn is_binary_candidate(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_lowercase();
            BINARY_EXTENSIONS.iter().any(|b| *b == ext)
        })
}

/// What the detector should look at.
#[derive(Debug, Clone, Copy)]
pub enum ScanSet<'a> {
    /// Every candidate file in the working tree, sized on disk.
    FullTree,
    /// Files changed between two refs, sized as blobs at `to` without
    /// touching the working tree.
    Changes { from: &'a str, to: &'a str },
}

/// Inspects candidates against the per-file threshold and configures LFS.
pub struct LfsDetector<'a> {
    workspace: &'a Workspace<'a>,
    file_threshold_mb: u64,
}

impl<'a> LfsDetector<'a> {
    pub fn new(workspace: &'a Workspace<'a>, file_threshold_mb: u64) -> Self {
        Self {
            workspace,
            file_threshold_mb,
        }
    }

    /// Scan the given set, enabling LFS and adding tracking rules as needed.
    ///
    /// Returns `true` iff LFS was initialized or new rules were added. When
    /// `git lfs` itself is unavailable the scan reports `false` and large
    /// files flow through git normally.
    pub fn scan(&self, set: ScanSet) -> anyhow::Result<bool> {
        let candidates = match set {
            ScanSet::FullTree => self.tree_candidates(),
            ScanSet::Changes { from, to } => self.changed_candidates(from, to)?,
        };

        match set {
            ScanSet::FullTree => {
                log::info!("LFS check [full-scan], {} candidate files", candidates.len());
            }
            ScanSet::Changes { from, to } => {
                log::info!(
                    "LFS check [{from} -> {to}], {} candidate files",
                    candidates.len()
                );
            }
        }

        let mut enabled = false;
        for rel in &candidates {
            let size_mb = match set {
                ScanSet::FullTree => file_size_mb(&self.workspace.dir().join(rel)),
                ScanSet::Changes { to, .. } => {
                    if !self.exists_at(to, rel) {
                        log::debug!("Skipping removed: {rel}");
                        continue;
                    }
                    self.blob_size_mb(to, rel)
                }
            };

            if size_mb < self.file_threshold_mb as f64 {
                continue;
            }

            let tracked = self.is_tracked(rel);
            log::info!(
                "Large file: {rel} ({size_mb:.2} MB) - {}",
                if tracked { "already LFS" } else { "will track" }
            );

            if !enabled {
                if !self.initialize() {
                    log::error!("LFS init failed, large files will be committed normally");
                    return Ok(false);
                }
                enabled = true;
            }

            if !tracked
                && let Err(e) = self.workspace.run(&["lfs", "track", rel])
            {
                log::warn!("LFS track failed for {rel}: {e:#}");
            }
        }

        if enabled
            && let Err(e) = self.workspace.run(&["add", ".gitattributes"])
        {
            log::warn!("Failed to stage .gitattributes: {e:#}");
        }

        Ok(enabled)
    }

    /// Candidate files across the working tree, relative paths.
    fn tree_candidates(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_candidates(self.workspace.dir(), self.workspace.dir(), &mut out);
        out
    }

    /// Candidate files added/copied/modified/renamed between two refs.
    fn changed_candidates(&self, from: &str, to: &str) -> anyhow::Result<Vec<String>> {
        let output = self
            .workspace
            .capture(&["diff", "--diff-filter=ACMR", "--name-only", from, to])?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && is_binary_candidate(l))
            .map(String::from)
            .collect())
    }

    fn exists_at(&self, ref_name: &str, rel: &str) -> bool {
        self.workspace
            .capture(&["ls-tree", "--name-only", ref_name, "--", rel])
            .map(|out| !out.is_empty())
            .unwrap_or(false)
    }

    /// Blob size at `ref:path` in MiB, without checking anything out.
    fn blob_size_mb(&self, ref_name: &str, rel: &str) -> f64 {
        let spec = format!("{ref_name}:{rel}");
        let blob = match self.workspace.rev_parse(&spec) {
            Ok(blob) => blob,
            Err(e) => {
                log::warn!("Could not resolve blob for {spec}: {e:#}");
                return 0.0;
            }
        };
        match self
            .workspace
            .capture(&["cat-file", "-s", &blob])
            .map(|s| s.parse::<u64>())
        {
            Ok(Ok(bytes)) => bytes as f64 / MIB,
            _ => {
                log::warn!("Could not get blob size for {blob}");
                0.0
            }
        }
    }

    fn is_tracked(&self, rel: &str) -> bool {
        self.workspace
            .capture(&["check-attr", "filter", "--", rel])
            .map(|out| out.contains("filter: lfs"))
            .unwrap_or(false)
    }

    /// Probe for `git lfs` and install it into the workspace.
    fn initialize(&self) -> bool {
        if self.workspace.check(&["lfs", "version"]).unwrap_or(false) {
            match self.workspace.run(&["lfs", "install"]) {
                Ok(()) => {
                    log::info!("Git LFS initialized for repository");
                    true
                }
                Err(e) => {
                    log::error!("Failed to set up LFS: {e:#}");
                    false
                }
            }
        } else {
            log::error!("Git LFS is required but not available");
            false
        }
    }
}

/// Cumulative size (MiB) of the change set that decides bulk vs.
/// commit-by-commit replay.
///
/// Counts every changed file, not only binary candidates — a large source
/// drop forces commit-by-commit pushes even though nothing gets tracked.
/// `None` means "the whole tree" (full replay).
pub fn cumulative_change_mb(workspace: &Workspace, range: Option<(&str, &str)>) -> f64 {
    let total = match range {
        Some((from, to)) => changed_blobs_mb(workspace, from, to),
        None => tracked_files_mb(workspace),
    };
    log::info!("Calculated changes size: {total:.2} MB");
    total
}

fn changed_blobs_mb(workspace: &Workspace, from: &str, to: &str) -> f64 {
    let output = match workspace.capture(&["diff", "--diff-filter=ACMR", "--name-only", from, to]) {
        Ok(out) => out,
        Err(e) => {
            log::debug!("Failed to calculate changes size: {e:#}");
            return 0.0;
        }
    };

    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|rel| {
            let spec = format!("{to}:{rel}");
            workspace
                .rev_parse(&spec)
                .and_then(|blob| workspace.capture(&["cat-file", "-s", &blob]))
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(|bytes| bytes as f64 / MIB)
                .unwrap_or(0.0)
        })
        .sum()
}

fn tracked_files_mb(workspace: &Workspace) -> f64 {
    let output = match workspace.capture(&["ls-files"]) {
        Ok(out) => out,
        Err(e) => {
            log::debug!("Failed to list files: {e:#}");
            return 0.0;
        }
    };

    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|rel| file_size_mb(&workspace.dir().join(rel)))
        .sum()
}

fn file_size_mb(path: &Path) -> f64 {
    fs::metadata(path).map(|m| m.len() as f64 / MIB).unwrap_or(0.0)
}

/// Walk the working tree collecting binary candidates, skipping `.git`.
fn collect_candidates(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if path.file_name().is_some_and(|n| n == ".git") {
                continue;
            }
            collect_candidates(root, &path, out);
        } else if let Ok(rel) = path.strip_prefix(root) {
            let rel = rel.to_string_lossy().replace('\\', "/");
            if is_binary_candidate(&rel) {
                out.push(rel);
            }
        }
    }
}
