// Copyright (C) 2026 Challforge contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Core identifier and metadata types shared across the engine.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Marker value for `instance_count`: instances may be started and stopped
/// freely through the API.
pub const DYNAMIC_INSTANCES: i64 = -1;

/// Marker value for `instance_count`: the build is locked and its instances
/// cannot be managed through the API.
pub const LOCKED: i64 = -2;

/// Schema-name prefix for builds created directly through [`build`]
/// rather than a named deployment schema.
///
/// [`build`]: crate::manager::Manager::build
pub const MANUAL_SCHEMA_PREFIX: &str = "manual-";

/// Host name reserved for build-time-only images. The build output is
/// harvested from this host when it exists, and it never runs as part of
/// an instance.
pub const BUILDER_HOST: &str = "builder";

static NAME_SANITIZER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("static regex"));

/// Identifier of a challenge, derived from its namespace and sanitized name.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct ChallengeId(String);

impl ChallengeId {
    /// Derive a challenge id from a namespace and a human-readable name.
    ///
    /// The name is lowercased and collapsed to alphanumerics-and-dashes so the
    /// id is usable as a container image name component.
    pub fn derive(namespace: &str, name: &str) -> Self {
        let clean = NAME_SANITIZER
            .replace_all(&name.to_lowercase(), "-")
            .trim_matches('-')
            .to_string();
        if namespace.is_empty() {
            Self(clean)
        } else {
            Self(format!("{namespace}/{clean}"))
        }
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChallengeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChallengeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChallengeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a build row.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    sqlx::Type,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct BuildId(pub i64);

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of an instance row.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    sqlx::Type,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct InstanceId(pub i64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of an image row.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    sqlx::Type,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct ImageId(pub i64);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A named port exposed by a challenge, bound to one of its hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Host (container) within the challenge that serves the port.
    pub host: String,
    /// Container-side port number.
    pub port: u16,
}

/// One container of a multi-container challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    /// Host name; doubles as network alias and (optional) build target.
    pub name: String,
    /// Dockerfile build stage to target; empty means the final stage.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
}

/// Network settings applied to every instance of a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkOptions {
    /// Restrict the instance network from external access.
    #[serde(default)]
    pub internal: bool,
}

/// Full description of a challenge as discovered by the loader and persisted
/// by the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChallengeMetadata {
    /// Derived identifier (`namespace/sanitized-name`).
    pub id: ChallengeId,
    /// Human-readable name.
    pub name: String,
    /// Namespace component of the id.
    pub namespace: String,
    /// Challenge type, selecting the externally supplied Dockerfile template.
    /// Empty for challenges that ship their own Dockerfile.
    pub challenge_type: String,
    /// Short description shown in listings.
    #[serde(default)]
    pub description: String,
    /// Long-form, possibly templated details text.
    #[serde(default)]
    pub details: String,
    /// Ordered hint texts.
    #[serde(default)]
    pub hints: Vec<String>,
    /// Checksum over content that affects the built image.
    pub source_checksum: u32,
    /// Checksum over descriptive text only.
    pub metadata_checksum: u32,
    /// Absolute path of the definition file on disk.
    pub path: PathBuf,
    /// Whether the details/hints contain per-build template expressions.
    #[serde(default)]
    pub templatable: bool,
    /// Named ports, keyed by port name.
    #[serde(default)]
    pub port_map: HashMap<String, PortInfo>,
    /// Containers making up the challenge, in definition order.
    #[serde(default)]
    pub hosts: Vec<HostInfo>,
    /// Advisory per-instance user capacity (0 = unlimited).
    #[serde(default)]
    pub max_users: i64,
    /// Scoring category.
    #[serde(default)]
    pub category: String,
    /// Point value.
    #[serde(default)]
    pub points: i64,
    /// Free-form tag set.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-form attribute map.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Network settings for instances of this challenge.
    #[serde(default)]
    pub network_options: NetworkOptions,
    /// Whether a `solver/` directory with a solve script is present.
    #[serde(default)]
    pub solve_script: bool,
    /// Builds of this challenge; populated by [`dump_state`] only.
    ///
    /// [`dump_state`]: crate::manager::Manager::dump_state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub builds: Vec<BuildMetadata>,
}

/// Minimal persisted view of a challenge used for change detection.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChallengeSummary {
    /// Challenge id.
    pub id: ChallengeId,
    /// Human-readable name.
    pub name: String,
    /// Definition file path recorded at the last update.
    pub path: String,
    /// Persisted source checksum.
    pub source_checksum: i64,
    /// Persisted metadata checksum.
    pub metadata_checksum: i64,
    /// Persisted solve-script flag.
    pub solve_script: bool,
}

/// One materialization of a challenge for a seed/format/schema triple.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildMetadata {
    /// Row id, assigned when the build is opened.
    pub id: BuildId,
    /// The concrete flag; empty until the build is finalized.
    pub flag: String,
    /// Key/value data generated at build time for instances and solvers.
    #[serde(default)]
    pub lookup_data: HashMap<String, String>,
    /// Seed driving per-build randomization.
    pub seed: i32,
    /// Flag format template (`flag{%s}` style).
    pub format: String,
    /// Images produced for this build, in host order.
    #[serde(default)]
    pub images: Vec<Image>,
    /// Whether a cached artifacts archive exists for this build.
    pub has_artifacts: bool,
    /// Owning challenge.
    pub challenge: ChallengeId,
    /// Schema name component of the natural key.
    pub schema: String,
    /// Capacity/lock state; see [`DYNAMIC_INSTANCES`] and [`LOCKED`].
    pub instance_count: i64,
    /// Instances of this build; populated by `dump_state` only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<InstanceMetadata>,
}

impl BuildMetadata {
    /// Deterministic flag for this build: the format template applied to the
    /// first eight hex characters of sha256(`challenge:format:seed`).
    pub fn make_flag(&self) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(format!("{}:{}:{}", self.challenge, self.format, self.seed));
        let sum = hex::encode(digest);
        self.format.replace("%s", &sum[..8])
    }

    /// Image tag assigned to one of this build's hosts.
    pub fn image_tag(&self, host: &str) -> String {
        format!("{}:{}-{}", self.challenge, self.id, host)
    }

    /// Tag of the ephemeral solver image, namespaced apart from host image
    /// tags so a host literally named `solver` cannot collide with it.
    pub fn solver_image_tag(&self) -> String {
        format!("{}/solver:{}", self.challenge, self.id)
    }

    /// Image the build output is copied from: the `builder` host when the
    /// challenge defines one, otherwise the main challenge image.
    pub fn harvest_image(&self) -> Option<&Image> {
        self.images
            .iter()
            .find(|i| i.host == BUILDER_HOST)
            .or_else(|| self.images.iter().find(|i| i.host == "challenge"))
            .or_else(|| self.images.first())
    }

    /// Images that run as instance containers. The `builder` host image
    /// exists only to be harvested at build time.
    pub fn runtime_images(&self) -> impl Iterator<Item = &Image> {
        self.images.iter().filter(|i| i.host != BUILDER_HOST)
    }

    /// File name of the cached artifacts archive.
    pub fn artifacts_file_name(&self) -> String {
        format!("{}.tar.gz", self.id)
    }

    /// True when the build belongs to a manual (API-created) schema.
    pub fn is_manual(&self) -> bool {
        self.schema.starts_with(MANUAL_SCHEMA_PREFIX)
    }
}

/// A runtime image backing one host of a build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Image {
    /// Row id, assigned on finalize.
    pub id: ImageId,
    /// Host this image backs.
    pub host: String,
    /// Runtime image identifier (the tag handed to the container runtime).
    pub docker_id: String,
    /// Container ports exposed by the image (`"80/tcp"` style).
    #[serde(default)]
    pub ports: Vec<String>,
    /// Owning build.
    pub build: BuildId,
}

/// A running deployment of a build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceMetadata {
    /// Row id.
    pub id: InstanceId,
    /// Port-name to host-port assignments.
    #[serde(default)]
    pub ports: HashMap<String, u16>,
    /// Runtime container identifiers backing this instance.
    #[serde(default)]
    pub containers: Vec<String>,
    /// When a solver last verified this instance, if ever.
    pub last_solved: Option<DateTime<Utc>>,
    /// Owning build.
    pub build: BuildId,
}

impl InstanceMetadata {
    /// Name of the private network backing this instance.
    pub fn network_name(&self) -> String {
        format!("challforge-{}", self.id)
    }
}

/// Change-set produced by [`detect_changes`] and applied by [`update`].
///
/// [`detect_changes`]: crate::manager::Manager::detect_changes
/// [`update`]: crate::manager::Manager::update
#[derive(Debug, Default, Serialize)]
pub struct ChallengeUpdates {
    /// Challenges discovered on disk but not yet persisted.
    pub added: Vec<ChallengeMetadata>,
    /// Metadata-only edits that do not require a rebuild.
    pub refreshed: Vec<ChallengeMetadata>,
    /// Edits that affect built content or unsafe metadata.
    pub updated: Vec<ChallengeMetadata>,
    /// Persisted challenges no longer reachable by any scan.
    pub removed: Vec<ChallengeSummary>,
    /// Challenges with no detected change.
    pub unmodified: Vec<ChallengeSummary>,
    /// Errors accumulated while scanning and applying.
    #[serde(serialize_with = "serialize_errors")]
    pub errors: Vec<CoreError>,
}

fn serialize_errors<S>(errors: &[CoreError], ser: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    ser.collect_seq(errors.iter().map(|e| e.to_string()))
}
