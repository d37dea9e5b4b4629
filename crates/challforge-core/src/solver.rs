// Copyright (C) 2026 Challforge contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Automated solve checks.
//!
//! A check builds an ephemeral solver image from the challenge's `solver/`
//! directory, runs it attached to the instance's private network, and
//! compares the flag it writes to `/solve/flag` against the build's flag.
//! The solver container and image are removed whatever the outcome.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::context;
use crate::error::{CoreError, Result};
use crate::manager::Manager;
use crate::runtime::{ContainerSpec, NetworkAttachment};
use crate::types::{InstanceId, InstanceMetadata};

impl Manager {
    /// Run the challenge's solve script against one instance.
    ///
    /// On success the instance's `last_solved` timestamp is updated and
    /// returned. A wrong flag, a missing flag file, or a solver that fails
    /// to run all surface as typed errors.
    pub async fn check_instance(&self, id: InstanceId) -> Result<DateTime<Utc>> {
        let instance = self.db().get_instance(id).await?;
        let build = self.db().get_build(instance.build).await?;
        let meta = self.db().get_challenge(&build.challenge).await?;

        if !meta.solve_script {
            return Err(CoreError::NoSolveScript {
                challenge_id: meta.id.clone(),
            });
        }

        let solver_dir = meta
            .path
            .parent()
            .map(|p| p.join("solver"))
            .ok_or_else(|| CoreError::ValidationError {
                field: "path".to_string(),
                message: format!("challenge path '{}' has no parent", meta.path.display()),
            })?;

        // Everything the solve script may need, minus the flag itself.
        let info = serde_json::json!({
            "challenge": meta.id,
            "instance": id,
            "flag_format": build.format,
            "seed": build.seed,
            "ports": meta.port_map,
            "lookup_data": build.lookup_data,
        });
        let metadata = serde_json::to_vec(&info)?;

        let artifacts = build
            .has_artifacts
            .then(|| self.config().artifact_dir.join(build.artifacts_file_name()));

        let image = build.solver_image_tag();
        let ctx = context::solver_context(solver_dir, artifacts, metadata);
        self.runtime()
            .build_image(&image, None, &Default::default(), ctx)
            .await?;

        let result = self.run_solver(&instance, &build.flag, &image).await;

        if let Err(cleanup) = self.runtime().remove_image(&image).await {
            debug!(%image, %cleanup, "solver image cleanup failed");
        }

        let solved_at = result?;
        self.db().set_last_solved(id, solved_at).await?;
        info!(instance = %id, "solve check passed");
        Ok(solved_at)
    }

    async fn run_solver(
        &self,
        instance: &InstanceMetadata,
        expected_flag: &str,
        image: &str,
    ) -> Result<DateTime<Utc>> {
        let container = self
            .runtime()
            .create_container(&ContainerSpec {
                image: image.to_string(),
                network: Some(NetworkAttachment {
                    network: instance.network_name(),
                    alias: "solver".to_string(),
                }),
                hostname: Some("solve".to_string()),
                ..Default::default()
            })
            .await?;

        let outcome = self.drive_solver(instance, expected_flag, &container).await;

        if let Err(cleanup) = self.runtime().remove_container(&container).await {
            debug!(%container, %cleanup, "solver container cleanup failed");
        }

        outcome
    }

    async fn drive_solver(
        &self,
        instance: &InstanceMetadata,
        expected_flag: &str,
        container: &str,
    ) -> Result<DateTime<Utc>> {
        self.runtime().start_container(container).await?;
        let exit_code = self.runtime().wait_container(container).await?;

        let flag = match self.runtime().download_path(container, "/solve/flag").await? {
            Some(tar_bytes) => context::extract_entry(&tar_bytes, "flag")?,
            None => None,
        };

        let Some(flag) = flag else {
            let logs = self.runtime().container_logs(container).await.unwrap_or_default();
            return Err(CoreError::FlagFileMissing {
                instance_id: instance.id,
                exit_code: Some(exit_code),
                logs,
            });
        };

        let actual = String::from_utf8_lossy(&flag).trim().to_string();
        if actual != expected_flag {
            return Err(CoreError::SolveFlagMismatch {
                instance_id: instance.id,
                expected: expected_flag.to_string(),
                actual,
            });
        }

        Ok(Utc::now())
    }
}
