// Copyright (C) 2026 Challforge contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciliation of on-disk challenge definitions with persisted state.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::manager::Manager;
use crate::types::{ChallengeMetadata, ChallengeUpdates};

impl Manager {
    /// Compare definitions under `dir` (or the whole challenge root) against
    /// persisted state without applying anything.
    ///
    /// Classification per persisted challenge:
    /// - source checksum changed: updated
    /// - metadata checksum or solve-script flag changed, rebuild-safe: refreshed
    /// - metadata checksum or solve-script flag changed otherwise: updated
    /// - missing from the scan, inside the scanned directory or rooted
    ///   outside the challenge root entirely: removed
    /// - missing from the scan, inside the root but outside this scan: out
    ///   of scope, reported under nothing
    pub async fn detect_changes(&self, dir: Option<&Path>) -> ChallengeUpdates {
        let scan_root = self.scan_root(dir);
        let mut updates = ChallengeUpdates::default();

        let mut report = match self.loader().scan(&scan_root).await {
            Ok(report) => report,
            Err(err) => {
                updates.errors.push(err);
                return updates;
            }
        };
        updates.errors.append(&mut report.errors);

        let persisted = match self.db().list_challenges().await {
            Ok(list) => list,
            Err(err) => {
                updates.errors.push(err);
                return updates;
            }
        };

        for summary in persisted {
            let Some(meta) = report.challenges.remove(&summary.id) else {
                let path = Path::new(&summary.path);
                if path_in_directory(path, &scan_root)
                    || !path_in_directory(path, &self.config().challenge_dir)
                {
                    updates.removed.push(summary);
                }
                continue;
            };

            if i64::from(meta.source_checksum) != summary.source_checksum {
                updates.updated.push(meta);
            } else if i64::from(meta.metadata_checksum) != summary.metadata_checksum
                || meta.solve_script != summary.solve_script
                || meta.path.to_string_lossy() != summary.path
            {
                match self.db().safe_to_refresh(&meta).await {
                    Ok(true) => updates.refreshed.push(meta),
                    Ok(false) => updates.updated.push(meta),
                    Err(err) => updates.errors.push(err),
                }
            } else {
                updates.unmodified.push(summary);
            }
        }

        // Whatever the scan found that persistence did not know about is new.
        let mut added: Vec<_> = report.challenges.into_values().collect();
        added.sort_by(|a, b| a.id.cmp(&b.id));
        updates.added = added;

        updates
    }

    /// Detect changes under `dir` and apply them to persisted state.
    ///
    /// Additions, refreshes, and updates are applied independently; a failure
    /// on one challenge is recorded and the rest proceed. Removals are only
    /// applied when no error occurred anywhere, so a scan hiccup cannot
    /// cascade into deleting state.
    pub async fn update(&self, dir: Option<&Path>) -> ChallengeUpdates {
        let mut updates = self.detect_changes(dir).await;

        let mut applied_added = Vec::with_capacity(updates.added.len());
        for meta in std::mem::take(&mut updates.added) {
            info!(challenge = %meta.id, "adding challenge");
            match self.db().insert_challenge(&meta).await {
                Ok(()) => applied_added.push(meta),
                Err(err) => updates.errors.push(err),
            }
        }
        updates.added = applied_added;

        let mut applied_refreshed = Vec::with_capacity(updates.refreshed.len());
        for meta in std::mem::take(&mut updates.refreshed) {
            info!(challenge = %meta.id, "refreshing challenge metadata");
            match self.db().update_challenge(&meta).await {
                Ok(()) => applied_refreshed.push(meta),
                Err(err) => updates.errors.push(err),
            }
        }
        updates.refreshed = applied_refreshed;

        let mut applied_updated = Vec::with_capacity(updates.updated.len());
        for meta in std::mem::take(&mut updates.updated) {
            let result = self.apply_source_update(&meta).await;
            match result {
                Ok(()) => applied_updated.push(meta),
                Err(err) => {
                    warn!(challenge = %meta.id, %err, "source update rejected");
                    updates.errors.push(err);
                }
            }
        }
        updates.updated = applied_updated;

        if updates.errors.is_empty() {
            let mut applied_removed = Vec::with_capacity(updates.removed.len());
            for summary in std::mem::take(&mut updates.removed) {
                info!(challenge = %summary.id, "removing challenge");
                match self.db().remove_challenge(&summary.id).await {
                    Ok(()) => applied_removed.push(summary),
                    Err(err) => updates.errors.push(err),
                }
            }
            updates.removed = applied_removed;
        } else {
            // Leave removals listed but unapplied.
            warn!(
                pending_removals = updates.removed.len(),
                errors = updates.errors.len(),
                "skipping removals because earlier steps failed"
            );
        }

        updates
    }

    /// Apply a source-affecting update. Rejected while builds of the
    /// challenge exist: their images were produced from the old source and
    /// would silently diverge from the new definition, so the caller must
    /// destroy them first.
    async fn apply_source_update(&self, meta: &ChallengeMetadata) -> Result<()> {
        let build_count = self.db().challenge_build_count(&meta.id).await?;
        if build_count > 0 {
            return Err(CoreError::RebuildRequired {
                challenge_id: meta.id.clone(),
                build_count,
            });
        }
        self.db().update_challenge(meta).await
    }

    fn scan_root(&self, dir: Option<&Path>) -> PathBuf {
        let root = dir.unwrap_or_else(|| self.config().challenge_dir.as_path());
        normalize_dir_path(root)
    }
}

/// Resolve a directory to an absolute, component-normalized path without
/// touching symlinks.
pub(crate) fn normalize_dir_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Whether `path` sits inside `dir` (inclusive of `dir` itself).
pub(crate) fn path_in_directory(path: &Path, dir: &Path) -> bool {
    normalize_dir_path(path).starts_with(normalize_dir_path(dir))
}
