// Copyright (C) 2026 Challforge contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Challenge discovery seam.
//!
//! The engine does not parse challenge definition files itself; a [`Loader`]
//! implementation walks the challenge directory and produces metadata. This
//! keeps format concerns (YAML front matter, Markdown, checksumming) out of
//! the lifecycle engine.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use crate::error::{CoreError, Result};
use crate::types::{ChallengeId, ChallengeMetadata};

/// Result of scanning a directory tree for challenge definitions.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Well-formed challenges keyed by derived id.
    pub challenges: HashMap<ChallengeId, ChallengeMetadata>,
    /// Per-definition errors that did not abort the scan.
    pub errors: Vec<CoreError>,
}

/// Discovers challenge definitions under a directory tree.
///
/// A scan is best-effort: malformed definitions are reported in
/// [`ScanReport::errors`] and the rest of the tree is still scanned. The one
/// fatal condition is two definitions resolving to the same [`ChallengeId`],
/// which must fail the whole scan with [`CoreError::DuplicateChallenge`]
/// since neither definition can be trusted.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Scan `root` recursively for challenge definitions.
    async fn scan(&self, root: &Path) -> Result<ScanReport>;
}
