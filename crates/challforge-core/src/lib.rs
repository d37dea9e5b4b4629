// Copyright (C) 2026 Challforge contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Challforge Core - Challenge Deployment Engine
//!
//! This crate is the backend engine for deploying CTF challenges as
//! containers. It reconciles challenge definitions on disk with a SQLite
//! database, builds per-seed challenge images through the Docker Engine API,
//! runs instances on private networks, and verifies them with automated
//! solve checks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Frontends (CLI, HTTP API)            │
//! └──────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Manager                           │
//! │   reconciler │ builder │ instances │ solver checks       │
//! └──────────────────────────────────────────────────────────┘
//!        │                  │                    │
//!        ▼                  ▼                    ▼
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │   Loader    │   │    SQLite    │   │  Docker Engine   │
//! │ (definition │   │ (challenges, │   │ (images, nets,   │
//! │  discovery) │   │  builds,     │   │  containers)     │
//! │             │   │  instances)  │   │                  │
//! └─────────────┘   └──────────────┘   └──────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! A challenge moves through three persisted levels, each referencing its
//! parent:
//!
//! | Level | Created by | Keyed by |
//! |-------|-----------|----------|
//! | Challenge | [`Manager::update`] | derived id (`namespace/name`) |
//! | Build | [`Manager::build`] | `(schema, format, challenge, seed)` |
//! | Instance | [`Manager::start_instance`] | row id |
//!
//! Foreign keys are RESTRICT downward: a challenge cannot be removed while
//! builds of it exist, nor a build while instances of it run. Operations
//! against missing ids surface typed not-found errors.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `CHALLFORGE_DB` | No | `challforge.db` | SQLite database path |
//! | `CHALLFORGE_DIR` | No | `.` | Challenge root directory |
//! | `CHALLFORGE_ARTIFACT_DIR` | No | `.` | Artifact archive cache |
//! | `CHALLFORGE_INTERFACE` | No | `0.0.0.0` | Bind interface for ports |
//!
//! # Modules
//!
//! - [`config`]: Engine configuration from environment variables
//! - [`error`]: Unified error type with error code mapping
//! - [`loader`]: Challenge definition discovery seam
//! - [`manager`]: The engine facade and its operations
//! - [`persistence`]: SQLite persistence layer
//! - [`runtime`]: Docker Engine API wrapper
//! - [`types`]: Identifier and metadata types

#![deny(missing_docs)]

/// Engine configuration loaded from environment variables.
pub mod config;

/// Unified error type for engine operations.
pub mod error;

/// Challenge definition discovery seam.
pub mod loader;

/// The engine facade: reconciliation, builds, instances, solve checks.
pub mod manager;

/// Embedded database migrations.
pub mod migrations;

/// SQLite persistence for challenges, builds, and instances.
pub mod persistence;

/// Docker Engine API wrapper.
pub mod runtime;

/// Identifier and metadata types.
pub mod types;

mod builder;
mod context;
mod instance;
mod reconciler;
mod solver;

pub use config::Config;
pub use error::{CoreError, Result};
pub use loader::{Loader, ScanReport};
pub use manager::Manager;
pub use types::{
    BUILDER_HOST, BuildId, BuildMetadata, ChallengeId, ChallengeMetadata, ChallengeSummary,
    ChallengeUpdates, DYNAMIC_INSTANCES, HostInfo, Image, ImageId, InstanceId, InstanceMetadata,
    LOCKED, NetworkOptions, PortInfo,
};
