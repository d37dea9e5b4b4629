// Copyright (C) 2026 Challforge contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for engine integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use challforge_core::persistence::SqlitePersistence;
use challforge_core::runtime::ContainerRuntime;
use challforge_core::{
    ChallengeId, ChallengeMetadata, Config, CoreError, Loader, Manager, Result, ScanReport,
};

/// Scriptable loader: tests decide what each scan reports.
#[derive(Default)]
pub struct FakeLoader {
    state: Mutex<LoaderState>,
}

#[derive(Default)]
struct LoaderState {
    challenges: HashMap<ChallengeId, ChallengeMetadata>,
    errors: Vec<CoreError>,
    fatal: Option<CoreError>,
}

impl FakeLoader {
    pub fn set_challenges(&self, challenges: Vec<ChallengeMetadata>) {
        let mut state = self.state.lock().unwrap();
        state.challenges = challenges.into_iter().map(|c| (c.id.clone(), c)).collect();
    }

    pub fn upsert(&self, challenge: ChallengeMetadata) {
        self.state
            .lock()
            .unwrap()
            .challenges
            .insert(challenge.id.clone(), challenge);
    }

    pub fn remove(&self, id: &ChallengeId) {
        self.state.lock().unwrap().challenges.remove(id);
    }

    pub fn push_error(&self, error: CoreError) {
        self.state.lock().unwrap().errors.push(error);
    }

    pub fn clear_errors(&self) {
        self.state.lock().unwrap().errors.clear();
    }

    pub fn set_fatal(&self, error: Option<CoreError>) {
        self.state.lock().unwrap().fatal = error;
    }
}

#[async_trait]
impl Loader for FakeLoader {
    async fn scan(&self, _root: &Path) -> Result<ScanReport> {
        let state = self.state.lock().unwrap();
        if let Some(fatal) = &state.fatal {
            return Err(fatal.clone());
        }
        Ok(ScanReport {
            challenges: state.challenges.clone(),
            errors: state.errors.clone(),
        })
    }
}

/// Temp database, scriptable loader, and a manager wired to both.
pub struct TestContext {
    pub manager: Manager,
    pub db: SqlitePersistence,
    pub loader: Arc<FakeLoader>,
    pub root: PathBuf,
    _tmp: TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("challenges");
        std::fs::create_dir_all(&root).expect("challenge root");

        let db = SqlitePersistence::from_path(tmp.path().join("state.db"))
            .await
            .expect("open database");

        // The client only dials on first use, so tests that never reach the
        // daemon can run against a socket path that no daemon serves.
        let socket = tmp.path().join("docker.sock");
        std::fs::write(&socket, b"").expect("scratch socket");
        let docker = bollard::Docker::connect_with_unix(
            socket.to_str().expect("socket path"),
            4,
            bollard::API_DEFAULT_VERSION,
        )
        .expect("construct docker client");
        let runtime = ContainerRuntime::new(docker);
        let loader = Arc::new(FakeLoader::default());

        let config = Config {
            database_path: tmp.path().join("state.db"),
            challenge_dir: root.clone(),
            artifact_dir: tmp.path().to_path_buf(),
            interface: "127.0.0.1".parse().unwrap(),
        };

        let dockerfiles = HashMap::from([(
            "static".to_string(),
            b"FROM alpine\nCOPY . /challenge\n".to_vec(),
        )]);

        let manager = Manager::with_parts(
            config,
            db.clone(),
            runtime,
            loader.clone(),
            dockerfiles,
        );

        Self {
            manager,
            db,
            loader,
            root,
            _tmp: tmp,
        }
    }

    /// A minimal well-formed challenge rooted inside the scanned directory.
    pub fn make_challenge(&self, namespace: &str, name: &str) -> ChallengeMetadata {
        let id = ChallengeId::derive(namespace, name);
        let dir = self.root.join(namespace).join(name);
        ChallengeMetadata {
            id,
            name: name.to_string(),
            namespace: namespace.to_string(),
            challenge_type: "static".to_string(),
            description: format!("{name} description"),
            details: "Connect with netcat".to_string(),
            source_checksum: 1000,
            metadata_checksum: 2000,
            path: dir.join("challenge.md"),
            solve_script: false,
            ..Default::default()
        }
    }
}
