// Copyright (C) 2026 Challforge contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance lifecycle: private network, one container per host, published
//! port discovery.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::manager::Manager;
use crate::runtime::{ContainerSpec, NetworkAttachment};
use crate::types::{BuildId, BuildMetadata, ChallengeMetadata, DYNAMIC_INSTANCES, InstanceId, InstanceMetadata};

impl Manager {
    /// Start a new instance of a dynamic build.
    ///
    /// Creates the instance's private network, starts one container per
    /// runtime image with the host name as its network alias and container
    /// hostname, reads back the
    /// daemon-assigned host ports, and persists the result. A failure
    /// partway through tears down whatever was created and removes the
    /// reserved row.
    pub async fn start_instance(&self, build_id: BuildId) -> Result<InstanceId> {
        let build = self.db().get_build(build_id).await?;
        if build.instance_count != DYNAMIC_INSTANCES {
            return Err(CoreError::LockedBuild { build_id });
        }
        let meta = self.db().get_challenge(&build.challenge).await?;

        let id = self.db().open_instance(build_id).await?;
        let mut instance = InstanceMetadata {
            id,
            build: build_id,
            ..Default::default()
        };

        let network = instance.network_name();
        let started = self.bring_up(&build, &meta, &network, &mut instance).await;

        match started {
            Ok(()) => {
                self.db().finalize_instance(&instance).await?;
                info!(instance = %id, build = %build_id, "started instance");
                Ok(id)
            }
            Err(err) => {
                if let Err(cleanup) = self.tear_down(&instance).await {
                    warn!(instance = %id, %cleanup, "instance cleanup failed after start error");
                }
                if let Err(cleanup) = self.db().remove_instance(id).await {
                    warn!(instance = %id, %cleanup, "row cleanup failed after start error");
                }
                Err(err)
            }
        }
    }

    /// Stop an instance of a dynamic build and delete its record.
    ///
    /// The record is only deleted once every container and the network are
    /// actually gone, so a runtime failure leaves the instance visible for a
    /// retry instead of leaking containers.
    pub async fn stop_instance(&self, id: InstanceId) -> Result<()> {
        let instance = self.db().get_instance(id).await?;
        let build = self.db().get_build(instance.build).await?;
        if build.instance_count != DYNAMIC_INSTANCES {
            return Err(CoreError::LockedBuild {
                build_id: build.id,
            });
        }

        self.tear_down(&instance).await?;
        self.db().remove_instance(id).await?;
        info!(instance = %id, "stopped instance");
        Ok(())
    }

    async fn bring_up(
        &self,
        build: &BuildMetadata,
        meta: &ChallengeMetadata,
        network: &str,
        instance: &mut InstanceMetadata,
    ) -> Result<()> {
        self.runtime()
            .create_network(network, meta.network_options.internal)
            .await?;

        let mut assigned: HashMap<String, HashMap<String, u16>> = HashMap::new();
        for image in build.runtime_images() {
            let spec = ContainerSpec {
                image: image.docker_id.clone(),
                env: Vec::new(),
                network: Some(NetworkAttachment {
                    network: network.to_string(),
                    alias: image.host.clone(),
                }),
                published_ports: image.ports.clone(),
                interface: Some(self.config().interface),
                restart_always: true,
                hostname: Some(image.host.clone()),
            };

            let container = self.runtime().create_container(&spec).await?;
            instance.containers.push(container.clone());
            self.runtime().start_container(&container).await?;

            assigned.insert(
                image.host.clone(),
                self.runtime().published_ports(&container).await?,
            );
        }

        // Resolve named ports to the host ports the daemon picked.
        for (name, port_info) in &meta.port_map {
            let key = format!("{}/tcp", port_info.port);
            let host_port = assigned
                .get(&port_info.host)
                .and_then(|ports| ports.get(&key))
                .copied()
                .ok_or_else(|| CoreError::RuntimeError {
                    operation: "start_instance".to_string(),
                    details: format!(
                        "no host port assigned for '{}' ({} on host '{}')",
                        name, key, port_info.host
                    ),
                })?;
            instance.ports.insert(name.clone(), host_port);
        }

        Ok(())
    }

    /// Remove an instance's containers then its network. Containers first:
    /// the network cannot be deleted while anything is attached.
    pub(crate) async fn tear_down(&self, instance: &InstanceMetadata) -> Result<()> {
        for container in &instance.containers {
            self.runtime().stop_container(container).await?;
            self.runtime().remove_container(container).await?;
        }
        self.runtime()
            .remove_network(&instance.network_name())
            .await?;
        Ok(())
    }
}
