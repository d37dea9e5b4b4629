// Copyright (C) 2026 Challforge contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The engine facade tying persistence, the container runtime, and the
//! loader together.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::loader::Loader;
use crate::persistence::SqlitePersistence;
use crate::runtime::ContainerRuntime;
use crate::types::{
    BuildId, BuildMetadata, ChallengeId, ChallengeMetadata, ChallengeSummary, InstanceId,
    InstanceMetadata,
};

/// Challenge lifecycle engine.
///
/// One `Manager` owns the SQLite state, a Docker client, and a [`Loader`]
/// for discovering definitions. Frontends (CLI, HTTP API) hold a single
/// instance and call its operations; all methods take `&self` and are safe
/// to share behind an `Arc`.
pub struct Manager {
    config: Config,
    db: SqlitePersistence,
    runtime: ContainerRuntime,
    loader: Arc<dyn Loader>,
    dockerfiles: HashMap<String, Vec<u8>>,
}

impl Manager {
    /// Open the database, connect to the container runtime, and assemble an
    /// engine. The daemon is pinged once so a misconfigured socket fails
    /// here rather than on the first build.
    ///
    /// `dockerfiles` maps challenge types to the Dockerfile template used to
    /// build challenges of that type. Challenges with an empty type ship
    /// their own Dockerfile and need no entry here.
    pub async fn new(
        config: Config,
        loader: Arc<dyn Loader>,
        dockerfiles: HashMap<String, Vec<u8>>,
    ) -> Result<Self> {
        let db = SqlitePersistence::from_path(&config.database_path).await?;
        let runtime = ContainerRuntime::connect()?;
        let version = runtime.server_version().await?;
        tracing::info!(docker = %version, "connected to container runtime");
        Ok(Self {
            config,
            db,
            runtime,
            loader,
            dockerfiles,
        })
    }

    /// Assemble an engine from already-constructed parts.
    pub fn with_parts(
        config: Config,
        db: SqlitePersistence,
        runtime: ContainerRuntime,
        loader: Arc<dyn Loader>,
        dockerfiles: HashMap<String, Vec<u8>>,
    ) -> Self {
        Self {
            config,
            db,
            runtime,
            loader,
            dockerfiles,
        }
    }

    /// Close the engine's database pool.
    pub async fn close(&self) {
        self.db.close().await;
    }

    /// Summaries of every persisted challenge.
    pub async fn list_challenges(&self) -> Result<Vec<ChallengeSummary>> {
        self.db.list_challenges().await
    }

    /// Summaries of persisted challenges carrying every one of `tags`.
    pub async fn search_challenges(&self, tags: &[String]) -> Result<Vec<ChallengeSummary>> {
        self.db.search_challenges(tags).await
    }

    /// Full metadata of one challenge.
    pub async fn get_challenge(&self, id: &ChallengeId) -> Result<ChallengeMetadata> {
        self.db.get_challenge(id).await
    }

    /// One build with its images and lookup data.
    pub async fn get_build(&self, id: BuildId) -> Result<BuildMetadata> {
        self.db.get_build(id).await
    }

    /// One instance with its ports and containers.
    pub async fn get_instance(&self, id: InstanceId) -> Result<InstanceMetadata> {
        self.db.get_instance(id).await
    }

    /// Full nested state of the named challenges, or of every challenge when
    /// `ids` is empty.
    ///
    /// Each requested id must exist; asking for an unknown challenge is an
    /// error rather than a silent omission.
    pub async fn dump_state(&self, ids: &[ChallengeId]) -> Result<Vec<ChallengeMetadata>> {
        let ids: Vec<ChallengeId> = if ids.is_empty() {
            self.db
                .list_challenges()
                .await?
                .into_iter()
                .map(|s| s.id)
                .collect()
        } else {
            ids.to_vec()
        };

        let mut state = Vec::with_capacity(ids.len());
        for id in &ids {
            let mut meta = self.db.get_challenge(id).await?;
            let mut builds = self.db.builds_for_challenge(id).await?;
            for build in &mut builds {
                build.instances = self.db.instances_for_build(build.id).await?;
            }
            meta.builds = builds;
            state.push(meta);
        }
        Ok(state)
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn db(&self) -> &SqlitePersistence {
        &self.db
    }

    pub(crate) fn runtime(&self) -> &ContainerRuntime {
        &self.runtime
    }

    pub(crate) fn loader(&self) -> &dyn Loader {
        self.loader.as_ref()
    }

    /// Dockerfile template for a challenge type. Challenges with an empty
    /// type bring their own Dockerfile.
    pub(crate) fn dockerfile_for(&self, challenge_type: &str) -> Result<Option<&[u8]>> {
        if challenge_type.is_empty() {
            return Ok(None);
        }
        self.dockerfiles
            .get(challenge_type)
            .map(|d| Some(d.as_slice()))
            .ok_or_else(|| CoreError::MissingBuilderImage {
                challenge_type: challenge_type.to_string(),
            })
    }
}
