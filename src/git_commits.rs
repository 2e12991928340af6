//! Commit graph sync from local git clones.
//!
//! When a query names a commit the store has never seen, the resolver asks
//! the commit updater to refresh that repository's graph. This updater reads
//! `git log --format="%H %P"` from a configured clone and records each
//! commit with its parents.

use crate::context::QueryContext;
use crate::db::SqliteStore;
use crate::store::CommitUpdater;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// A commit with its parent hashes, as read from `git log`.
pub type CommitEdges = (String, Vec<String>);

pub struct GitCommitUpdater {
    store: Arc<SqliteStore>,
    repositories: HashMap<i64, PathBuf>,
    max_commits: usize,
    /// Serializes updates so concurrent misses on one repository run git once.
    update_lock: Mutex<()>,
}

impl GitCommitUpdater {
    pub fn new(store: Arc<SqliteStore>, repositories: HashMap<i64, PathBuf>, max_commits: usize) -> Self {
        Self {
            store,
            repositories,
            max_commits: max_commits.max(1),
            update_lock: Mutex::new(()),
        }
    }

    pub fn repository_path(&self, repository_id: i64) -> Option<&Path> {
        self.repositories.get(&repository_id).map(PathBuf::as_path)
    }
}

impl CommitUpdater for GitCommitUpdater {
    fn update(
        &self,
        ctx: &QueryContext,
        repository_id: i64,
        is_commit_known: &dyn Fn() -> Result<bool>,
    ) -> Result<()> {
        let Some(repo_root) = self.repository_path(repository_id) else {
            warn!(repository_id, "no clone configured, cannot update commit graph");
            return Ok(());
        };

        let _guard = match self.update_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Another request may have synced while we waited.
        if is_commit_known()? {
            return Ok(());
        }

        ctx.check()?;
        let commits = read_commit_graph(repo_root, self.max_commits)?;
        let inserted = self.store.insert_commits(repository_id, &commits)?;
        info!(
            repository_id,
            commits = commits.len(),
            inserted,
            "updated commit graph"
        );
        if !is_commit_known()? {
            debug!(repository_id, "commit still unknown after update");
        }
        Ok(())
    }
}

/// Runs `git log` in `repo_root` and parses the commit graph.
pub fn read_commit_graph(repo_root: &Path, max_commits: usize) -> Result<Vec<CommitEdges>> {
    let output = Command::new("git")
        .arg("log")
        .arg("--all")
        .arg("--format=%H %P")
        .arg(format!("-n{}", max_commits))
        .current_dir(repo_root)
        .output()
        .context("Failed to run git log")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("git log failed: {}", stderr);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_commit_graph(&stdout)
}

/// Parses `%H %P` lines: a commit hash followed by zero or more parents.
pub fn parse_commit_graph(output: &str) -> Result<Vec<CommitEdges>> {
    let mut commits = Vec::new();
    for (lineno, line) in output.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let Some(commit) = parts.next() else {
            continue;
        };
        let parents: Vec<String> = parts.map(str::to_string).collect();
        for hash in std::iter::once(commit).chain(parents.iter().map(String::as_str)) {
            if !is_commit_hash(hash) {
                anyhow::bail!("line {}: invalid commit hash {:?}", lineno + 1, hash);
            }
        }
        commits.push((commit.to_string(), parents));
    }
    Ok(commits)
}

fn is_commit_hash(value: &str) -> bool {
    matches!(value.len(), 40 | 64) && value.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "abc1234567890123456789012345678901234567";
    const B: &str = "def4567890123456789012345678901234567890";
    const C: &str = "0123456789012345678901234567890123456789";

    #[test]
    fn parses_commits_with_parents() {
        let output = format!("{A} {B} {C}\n{B} {C}\n\n{C}\n");
        let commits = parse_commit_graph(&output).unwrap();
        assert_eq!(commits.len(), 3);
        assert_eq!(commits[0].0, A);
        assert_eq!(commits[0].1, vec![B.to_string(), C.to_string()]);
        assert!(commits[2].1.is_empty());
    }

    #[test]
    fn rejects_garbage_lines() {
        let err = parse_commit_graph("warning: something odd\n").unwrap_err();
        assert!(err.to_string().contains("invalid commit hash"));
    }
}
