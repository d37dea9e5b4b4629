// Copyright (C) 2026 Challforge contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Image builds.
//!
//! A build materializes one challenge for a `(schema, format, challenge,
//! seed)` key: per-host images with the flag and seed baked in as build
//! arguments, generated lookup data, and an optional artifacts archive
//! copied out of the image. Opening and finalizing the database row are
//! separate steps so a crashed image build leaves only an empty placeholder
//! behind, which the next attempt reuses.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::context;
use crate::error::{CoreError, Result};
use crate::manager::Manager;
use crate::runtime::ContainerSpec;
use crate::types::{
    BuildId, BuildMetadata, ChallengeId, ChallengeMetadata, DYNAMIC_INSTANCES, HostInfo, Image,
    ImageId,
};

/// Schema shared by every API-created build. A single well-known name makes
/// `build` idempotent: repeating a request re-opens the same `(schema,
/// format, challenge, seed)` rows instead of minting new ones.
const MANUAL_SCHEMA: &str = "manual-api";

impl Manager {
    /// Build a challenge for each seed under the manual schema.
    ///
    /// The flag format must contain a `%s` placeholder, and the on-disk
    /// definition must be in sync with persisted state. Returns the build
    /// ids in seed order. Builds are idempotent per key: repeating a seed
    /// that already finalized returns the existing build untouched.
    pub async fn build(
        &self,
        challenge: &ChallengeId,
        seeds: &[i32],
        flag_format: &str,
    ) -> Result<Vec<BuildId>> {
        if !flag_format.contains("%s") {
            return Err(CoreError::ValidationError {
                field: "flag_format".to_string(),
                message: "must contain a '%s' placeholder".to_string(),
            });
        }
        if seeds.is_empty() {
            return Err(CoreError::ValidationError {
                field: "seeds".to_string(),
                message: "at least one seed is required".to_string(),
            });
        }

        self.require_in_sync(challenge).await?;

        let mut ids = Vec::with_capacity(seeds.len());
        for &seed in seeds {
            let build = self
                .run_build(challenge, MANUAL_SCHEMA, flag_format, seed, DYNAMIC_INSTANCES)
                .await?;
            ids.push(build.id);
        }
        Ok(ids)
    }

    /// Destroy a manual build: its instances must be gone, then its images
    /// and cached artifacts are removed, then the row is deleted.
    pub async fn destroy_build(&self, id: BuildId) -> Result<()> {
        let build = self.db().get_build(id).await?;
        if !build.is_manual() {
            return Err(CoreError::ValidationError {
                field: "build".to_string(),
                message: format!("build '{}' belongs to schema '{}', not a manual schema", id, build.schema),
            });
        }

        let instance_count = self.db().build_instance_count(id).await?;
        if instance_count > 0 {
            return Err(CoreError::BuildInUse {
                build_id: id,
                instance_count,
            });
        }

        for image in &build.images {
            self.runtime().remove_image(&image.docker_id).await?;
        }

        if build.has_artifacts {
            let path = self.config().artifact_dir.join(build.artifacts_file_name());
            if let Err(error) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), %error, "failed to remove artifacts archive");
            }
        }

        self.db().remove_build(id).await?;
        info!(build = %id, "destroyed build");
        Ok(())
    }

    /// Images are built from the challenge directory as it sits on disk, so
    /// the persisted definition must match it. Anything pending (an edit, a
    /// removal, a scan error) means the images would not correspond to what
    /// the database describes.
    async fn require_in_sync(&self, challenge: &ChallengeId) -> Result<()> {
        let meta = self.db().get_challenge(challenge).await?;
        let dir = meta
            .path
            .parent()
            .ok_or_else(|| CoreError::ValidationError {
                field: "path".to_string(),
                message: format!("challenge path '{}' has no parent", meta.path.display()),
            })?;

        let updates = self.detect_changes(Some(dir)).await;
        let in_sync = updates.errors.is_empty()
            && updates
                .unmodified
                .iter()
                .any(|summary| summary.id == *challenge);
        if !in_sync {
            return Err(CoreError::ValidationError {
                field: "challenge".to_string(),
                message: format!(
                    "definition of '{challenge}' on disk does not match persisted state; run update first"
                ),
            });
        }
        Ok(())
    }

    /// Open (or reuse) the build row for a key and materialize it if it has
    /// not been finalized yet.
    pub(crate) async fn run_build(
        &self,
        challenge: &ChallengeId,
        schema: &str,
        format: &str,
        seed: i32,
        instance_count: i64,
    ) -> Result<BuildMetadata> {
        let meta = self.db().get_challenge(challenge).await?;
        let mut build = self
            .db()
            .open_build(challenge, schema, format, seed, instance_count)
            .await?;

        if !build.flag.is_empty() {
            debug!(build = %build.id, "build already finalized, reusing");
            return Ok(build);
        }

        match self.materialize(&meta, &mut build).await {
            Ok(()) => {
                build.images = self.db().finalize_build(&build).await?;
                info!(build = %build.id, challenge = %challenge, seed, "finalized build");
                Ok(build)
            }
            Err(err) => {
                // Leave nothing half-built: drop any images that were
                // produced, then the placeholder row.
                for image in &build.images {
                    if let Err(cleanup) = self.runtime().remove_image(&image.docker_id).await {
                        warn!(image = %image.docker_id, %cleanup, "image cleanup failed");
                    }
                }
                if let Err(cleanup) = self.db().remove_build(build.id).await {
                    warn!(build = %build.id, %cleanup, "placeholder cleanup failed");
                }
                Err(err)
            }
        }
    }

    async fn materialize(&self, meta: &ChallengeMetadata, build: &mut BuildMetadata) -> Result<()> {
        let template = self.dockerfile_for(&meta.challenge_type)?.map(<[u8]>::to_vec);
        build.flag = build.make_flag();

        let buildargs = HashMap::from([
            ("FLAG_FORMAT".to_string(), build.format.clone()),
            ("SEED".to_string(), build.seed.to_string()),
            ("FLAG".to_string(), build.flag.clone()),
        ]);

        let challenge_dir = meta
            .path
            .parent()
            .ok_or_else(|| CoreError::ValidationError {
                field: "path".to_string(),
                message: format!("challenge path '{}' has no parent", meta.path.display()),
            })?
            .to_path_buf();

        // Challenges without an explicit host list build a single image.
        let default_hosts = [HostInfo {
            name: "challenge".to_string(),
            target: String::new(),
        }];
        let hosts: &[HostInfo] = if meta.hosts.is_empty() {
            &default_hosts
        } else {
            &meta.hosts
        };

        // Record each image on the build as soon as it exists so the error
        // path can clean up a partial set.
        build.images = Vec::with_capacity(hosts.len());
        for host in hosts {
            let tag = build.image_tag(&host.name);
            let target = (!host.target.is_empty()).then_some(host.target.as_str());
            let ctx = context::challenge_context(challenge_dir.clone(), template.clone());

            self.runtime()
                .build_image(&tag, target, &buildargs, ctx)
                .await
                .map_err(|e| CoreError::ImageBuildFailed {
                    build_id: build.id,
                    host: host.name.clone(),
                    message: e.to_string(),
                })?;

            let ports = self.runtime().image_exposed_ports(&tag).await?;
            build.images.push(Image {
                id: ImageId(0),
                host: host.name.clone(),
                docker_id: tag,
                ports,
                build: build.id,
            });
        }

        self.harvest_build_output(build).await?;
        Ok(())
    }

    /// Copy `/challenge` out of the build's harvest image: `metadata.json`
    /// supplies lookup data (and may override the flag), `artifacts.tar.gz`
    /// is cached for handouts and solver runs.
    async fn harvest_build_output(&self, build: &mut BuildMetadata) -> Result<()> {
        let Some(docker_id) = build.harvest_image().map(|i| i.docker_id.clone()) else {
            return Ok(());
        };
        let container = self
            .runtime()
            .create_container(&ContainerSpec {
                image: docker_id,
                ..Default::default()
            })
            .await?;

        let result = self.copy_challenge_dir(build, &container).await;
        if let Err(cleanup) = self.runtime().remove_container(&container).await {
            warn!(%container, %cleanup, "copy-out container cleanup failed");
        }
        result
    }

    async fn copy_challenge_dir(&self, build: &mut BuildMetadata, container: &str) -> Result<()> {
        let Some(tar_bytes) = self.runtime().download_path(container, "/challenge").await? else {
            // No /challenge directory: nothing generated at build time.
            return Ok(());
        };

        if let Some(raw) = context::extract_entry(&tar_bytes, "metadata.json")? {
            let mut data: HashMap<String, String> = serde_json::from_slice(&raw)?;
            if let Some(flag) = data.remove("flag") {
                build.flag = flag;
            }
            build.lookup_data = data;
        }

        if let Some(artifacts) = context::extract_entry(&tar_bytes, "artifacts.tar.gz")? {
            let path = self.config().artifact_dir.join(build.artifacts_file_name());
            tokio::fs::write(&path, &artifacts)
                .await
                .map_err(|e| CoreError::IoError {
                    path: path.display().to_string(),
                    details: e.to_string(),
                })?;
            build.has_artifacts = true;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MANUAL_SCHEMA;
    use crate::types::MANUAL_SCHEMA_PREFIX;

    #[test]
    fn test_manual_schema_carries_prefix() {
        assert!(MANUAL_SCHEMA.starts_with(MANUAL_SCHEMA_PREFIX));
    }
}
