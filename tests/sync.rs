//! End-to-end replication scenarios against real git repositories.
//!
//! Each test builds an isolated source/destination pair, runs the
//! orchestrator through the library API, and asserts on the destination's
//! refs and the persisted journal.

mod common;

use common::{MirrorFixture, fixture, git};
use gitmirror::report::RepoStatus;
use rstest::rstest;

#[rstest]
fn first_time_sync_small_repo(fixture: MirrorFixture) {
    fixture.branch_from("dev", "main");
    fixture.commit_on("dev", "feature.txt", "wip\n", "Start feature");

    let config = fixture.write_config("");
    let report = fixture.run_sync(&config, false);

    assert_eq!(report.repositories.len(), 1);
    let entry = &report.repositories[0];
    assert_eq!(entry.status, RepoStatus::Success);
    assert_eq!(entry.mode, "full");
    assert_eq!(entry.synced, 2);
    assert_eq!(entry.new_branches, 2);
    assert_eq!(entry.failed, 0);

    // Full replay pushes the source commits verbatim
    assert_eq!(fixture.dest_sha("main"), fixture.source_sha("main"));
    assert_eq!(fixture.dest_sha("dev"), fixture.source_sha("dev"));

    let state = fixture.sync_state_json();
    assert!(state["last_sync"].is_string());
    assert_eq!(
        state["last_commits"]["main"].as_str().unwrap(),
        fixture.source_sha("main")
    );
    assert_eq!(
        state["last_commits"]["dev"].as_str().unwrap(),
        fixture.source_sha("dev")
    );
}

#[rstest]
fn rerun_without_changes_is_a_noop(fixture: MirrorFixture) {
    fixture.branch_from("dev", "main");

    let config = fixture.write_config("");
    fixture.run_sync(&config, false);
    let state_commits_before = fixture.sync_state_commit_count();

    let report = fixture.run_sync(&config, false);
    let entry = &report.repositories[0];
    assert_eq!(entry.status, RepoStatus::Success);
    assert_eq!(entry.mode, "incremental");
    assert_eq!(entry.synced, 0);
    assert_eq!(entry.skipped, 2);

    // No push happened, so the journal gained no commit
    assert_eq!(fixture.sync_state_commit_count(), state_commits_before);
}

#[rstest]
fn incremental_sync_pushes_one_new_commit(fixture: MirrorFixture) {
    fixture.branch_from("dev", "main");
    let config = fixture.write_config("");
    fixture.run_sync(&config, false);

    let new_sha = fixture.commit_on("main", "src/lib.txt", "v2\n", "Second commit");

    let report = fixture.run_sync(&config, false);
    let entry = &report.repositories[0];
    assert_eq!(entry.status, RepoStatus::Success);
    assert_eq!(entry.synced, 1);
    assert_eq!(entry.skipped, 1);
    assert_eq!(entry.new_branches, 0);

    // The replayed commit may be rewritten by cherry-pick, but the tree and
    // the recorded source commit must match exactly
    assert_eq!(fixture.dest_tree("main"), fixture.source_tree("main"));
    assert_eq!(fixture.dest_commit_count("main"), 2);
    let state = fixture.sync_state_json();
    assert_eq!(state["last_commits"]["main"].as_str().unwrap(), new_sha);
    // The untouched branch keeps its entry
    assert_eq!(
        state["last_commits"]["dev"].as_str().unwrap(),
        fixture.source_sha("dev")
    );
}

#[rstest]
fn mapping_change_recreates_renamed_branch(fixture: MirrorFixture) {
    fixture.branch_from("dev", "main");
    fixture.commit_on("dev", "feature.txt", "wip\n", "Start feature");

    let config = fixture.write_config("");
    fixture.run_sync(&config, false);
    assert!(fixture.dest_has_branch("dev"));

    // Same repository, but dev now maps to develop
    let config = fixture.write_config("\x20   branch_map:\n\x20     dev: develop\n");
    let report = fixture.run_sync(&config, false);

    let entry = &report.repositories[0];
    assert_eq!(entry.status, RepoStatus::Success);
    assert_eq!(entry.new_branches, 1);

    assert_eq!(fixture.dest_sha("develop"), fixture.source_sha("dev"));
    // The old destination branch is left untouched
    assert!(fixture.dest_has_branch("dev"));

    let state = fixture.sync_state_json();
    assert_eq!(state["synced_branches"]["dev"].as_str().unwrap(), "develop");
    assert_eq!(
        state["last_commits"]["dev->develop"].as_str().unwrap(),
        fixture.source_sha("dev")
    );
}

#[rstest]
fn ignored_branches_never_reach_the_destination(fixture: MirrorFixture) {
    fixture.branch_from("tmp/hotfix", "main");
    fixture.commit_on("tmp/hotfix", "hack.txt", "hack\n", "Temporary hack");

    let config = fixture.write_config("\x20   ignore_branches:\n\x20     - \"tmp/*\"\n");
    let report = fixture.run_sync(&config, false);

    let entry = &report.repositories[0];
    assert_eq!(entry.status, RepoStatus::Success);
    assert_eq!(entry.synced, 1);
    assert_eq!(entry.ignored, vec!["tmp/hotfix".to_string()]);

    assert!(fixture.dest_has_branch("main"));
    assert!(!fixture.dest_has_branch("tmp/hotfix"));

    let state = fixture.sync_state_json();
    assert!(state["synced_branches"].get("tmp/hotfix").is_none());
}

#[rstest]
fn clean_history_publishes_a_single_orphan_commit(fixture: MirrorFixture) {
    fixture.commit_on("main", "second.txt", "2\n", "Second commit");
    fixture.commit_on("main", "third.txt", "3\n", "Third commit");
    let tip = fixture.source_sha("main");

    let config = fixture.write_config("\x20   clean_history: true\n");
    let report = fixture.run_sync(&config, false);

    assert_eq!(report.repositories[0].status, RepoStatus::Success);
    // History collapsed to one commit, tree preserved
    assert_eq!(fixture.dest_commit_count("main"), 1);
    assert_eq!(fixture.dest_tree("main"), fixture.source_tree("main"));

    let message = fixture.dest_log_subject("main");
    assert!(message.starts_with("[SYNC] Third commit"));
    assert!(message.contains(&format!("Original SHA: {tip}")));
}

#[rstest]
fn divergent_destination_flips_original_hash_annotations(fixture: MirrorFixture) {
    let config = fixture.write_config("");
    fixture.run_sync(&config, false);

    // An operator pushes directly to the mirror behind our back
    let operator_clone = fixture.dest.parent().unwrap().join("operator");
    git(
        fixture.dest.parent().unwrap(),
        &[
            "clone",
            fixture.dest.to_str().unwrap(),
            operator_clone.to_str().unwrap(),
        ],
    );
    std::fs::write(operator_clone.join("hotpatch.txt"), "patched\n").unwrap();
    git(&operator_clone, &["add", "."]);
    git(&operator_clone, &["commit", "-m", "Operator hotpatch"]);
    git(&operator_clone, &["push", "origin", "main"]);

    let new_sha = fixture.commit_on("main", "more.txt", "more\n", "Upstream change");
    let report = fixture.run_sync(&config, false);

    let entry = &report.repositories[0];
    assert_eq!(entry.status, RepoStatus::Success);
    assert_eq!(entry.synced, 1);

    // The replayed commit carries its original SHA and lands on top of the
    // operator's commit
    let message = fixture.dest_log_subject("main");
    assert!(message.starts_with("[SYNC] Upstream change"));
    assert!(message.contains(&format!("Original SHA: {new_sha}")));
    let log = git(&fixture.dest, &["log", "--format=%s", "refs/heads/main"]);
    assert!(log.contains("Operator hotpatch"));
}

#[rstest]
fn force_full_rebuilds_identical_trees(fixture: MirrorFixture) {
    fixture.commit_on("main", "a.txt", "a\n", "Add a");
    let config = fixture.write_config("");
    fixture.run_sync(&config, false);

    let report = fixture.run_sync(&config, true);
    let entry = &report.repositories[0];
    assert_eq!(entry.status, RepoStatus::Success);
    assert_eq!(entry.mode, "full");
    assert_eq!(entry.synced, 1);

    // Full replay restores the exact source commits
    assert_eq!(fixture.dest_sha("main"), fixture.source_sha("main"));
}

#[rstest]
fn tags_travel_with_the_branches(fixture: MirrorFixture) {
    git(&fixture.source, &["tag", "v1.0.0"]);

    let config = fixture.write_config("");
    fixture.run_sync(&config, false);

    let tags = git(&fixture.dest, &["tag", "--list"]);
    assert!(tags.lines().any(|t| t == "v1.0.0"));
}

#[rstest]
fn workspace_drift_recovers_by_recloning(fixture: MirrorFixture) {
    let config = fixture.write_config("");
    fixture.run_sync(&config, false);

    // Repoint the workspace's origin at a bogus destination; the next run
    // must notice the mismatch and recreate the clone
    let work_dir = fixture.workspace.join("widget/sync_work");
    git(
        &work_dir,
        &["remote", "set-url", "origin", "https://example.invalid/other.git"],
    );

    fixture.commit_on("main", "b.txt", "b\n", "Add b");
    let report = fixture.run_sync(&config, false);
    assert_eq!(report.repositories[0].status, RepoStatus::Success);
    assert_eq!(fixture.dest_tree("main"), fixture.source_tree("main"));
}

#[rstest]
fn sync_state_branch_is_never_replicated(fixture: MirrorFixture) {
    // A hostile source carrying its own sync_state branch must not clobber
    // the journal
    fixture.branch_from("sync_state", "main");
    fixture.commit_on("sync_state", "fake.json", "{}\n", "Fake state");

    let config = fixture.write_config("");
    let report = fixture.run_sync(&config, false);

    let entry = &report.repositories[0];
    assert_eq!(entry.synced, 1);
    assert_eq!(entry.ignored, vec!["sync_state".to_string()]);

    let state = fixture.sync_state_json();
    assert!(state["synced_branches"].get("sync_state").is_none());
}
