// Copyright (C) 2026 Challforge contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Thin wrapper over the Docker Engine API.
//!
//! Everything the engine needs from the container runtime goes through
//! [`ContainerRuntime`] so the builder, instance manager, and solver never
//! touch bollard types directly.

use std::collections::HashMap;
use std::net::IpAddr;

use bollard::Docker;
use bollard::errors::Error as DockerError;
use bollard::models::{
    ContainerCreateBody, EndpointSettings, HostConfig, NetworkCreateRequest, NetworkingConfig,
    PortBinding, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    BuildImageOptionsBuilder, CreateContainerOptions, DownloadFromContainerOptionsBuilder,
    InspectContainerOptions, LogsOptionsBuilder, RemoveContainerOptionsBuilder,
    RemoveImageOptionsBuilder, StartContainerOptions, StopContainerOptions,
    WaitContainerOptionsBuilder,
};
use futures::StreamExt;
use tokio::io::DuplexStream;
use tokio_util::io::ReaderStream;

use crate::error::{CoreError, Result};

/// Streamed tar archive fed to an image build.
pub type BuildContext = ReaderStream<DuplexStream>;

/// Network attachment for a new container.
#[derive(Debug, Clone)]
pub struct NetworkAttachment {
    /// Name of the network to join.
    pub network: String,
    /// Alias other containers on the network resolve this one by.
    pub alias: String,
}

/// Everything needed to create one container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Image tag to run.
    pub image: String,
    /// Environment in `KEY=value` form.
    pub env: Vec<String>,
    /// Network to join, if any.
    pub network: Option<NetworkAttachment>,
    /// Container ports (`"80/tcp"` style) to publish on a host-assigned port.
    pub published_ports: Vec<String>,
    /// Host interface published ports bind to.
    pub interface: Option<IpAddr>,
    /// Restart the container whenever it exits.
    pub restart_always: bool,
    /// Hostname set inside the container.
    pub hostname: Option<String>,
}

/// Handle to the Docker daemon.
#[derive(Clone)]
pub struct ContainerRuntime {
    docker: Docker,
}

impl ContainerRuntime {
    /// Connect to the local Docker daemon over its unix socket.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_unix_defaults()?;
        Ok(Self { docker })
    }

    /// Wrap an existing client.
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Ping the daemon and return the version it reports.
    pub async fn server_version(&self) -> Result<String> {
        let version = self.docker.version().await?;
        Ok(version.version.unwrap_or_default())
    }

    /// Build an image from a streamed tar context.
    ///
    /// The daemon reports build failures in-band as error frames, so the
    /// response stream is drained and the first error frame is surfaced.
    pub async fn build_image(
        &self,
        tag: &str,
        target: Option<&str>,
        buildargs: &HashMap<String, String>,
        context: BuildContext,
    ) -> Result<()> {
        let mut options = BuildImageOptionsBuilder::default()
            .t(tag)
            .buildargs(buildargs)
            .rm(true)
            .forcerm(true);
        if let Some(target) = target {
            options = options.target(target);
        }

        let body = bollard::body_try_stream(context);
        let mut stream = self.docker.build_image(options.build(), None, Some(body));

        while let Some(frame) = stream.next().await {
            let info = frame?;
            if let Some(message) = info
                .error_detail
                .and_then(|d| d.message)
                .or(info.error)
            {
                return Err(CoreError::RuntimeError {
                    operation: "build_image".to_string(),
                    details: message,
                });
            }
        }

        Ok(())
    }

    /// Ports exposed by an image, in `"80/tcp"` form.
    pub async fn image_exposed_ports(&self, tag: &str) -> Result<Vec<String>> {
        let inspect = self.docker.inspect_image(tag).await?;
        let mut ports: Vec<String> = inspect
            .config
            .and_then(|c| c.exposed_ports)
            .map(|m| m.into_keys().collect())
            .unwrap_or_default();
        ports.sort();
        Ok(ports)
    }

    /// Remove an image by tag, tolerating one that is already gone.
    pub async fn remove_image(&self, tag: &str) -> Result<()> {
        let options = RemoveImageOptionsBuilder::default().force(true).build();
        match self.docker.remove_image(tag, Some(options), None).await {
            Ok(_) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Create a bridge network.
    pub async fn create_network(&self, name: &str, internal: bool) -> Result<()> {
        self.docker
            .create_network(NetworkCreateRequest {
                name: name.to_string(),
                driver: Some("bridge".to_string()),
                internal: Some(internal),
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    /// Remove a network by name, tolerating one that is already gone.
    pub async fn remove_network(&self, name: &str) -> Result<()> {
        match self.docker.remove_network(name).await {
            Ok(()) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Create a container without starting it. Returns the container id.
    pub async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let response = self
            .docker
            .create_container(None::<CreateContainerOptions>, Self::container_body(spec))
            .await?;

        Ok(response.id)
    }

    fn container_body(spec: &ContainerSpec) -> ContainerCreateBody {
        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
            .published_ports
            .iter()
            .map(|port| {
                (
                    port.clone(),
                    Some(vec![PortBinding {
                        host_ip: spec.interface.map(|ip| ip.to_string()),
                        // Leave the host port to the daemon; the assignment
                        // is read back after start.
                        host_port: None,
                    }]),
                )
            })
            .collect();

        let restart_policy = spec.restart_always.then(|| RestartPolicy {
            name: Some(RestartPolicyNameEnum::ALWAYS),
            ..Default::default()
        });

        let networking_config = spec.network.as_ref().map(|attachment| NetworkingConfig {
            endpoints_config: Some(HashMap::from([(
                attachment.network.clone(),
                EndpointSettings {
                    aliases: Some(vec![attachment.alias.clone()]),
                    ..Default::default()
                },
            )])),
        });

        ContainerCreateBody {
            image: Some(spec.image.clone()),
            hostname: spec.hostname.clone(),
            env: (!spec.env.is_empty()).then(|| spec.env.clone()),
            host_config: Some(HostConfig {
                port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
                restart_policy,
                ..Default::default()
            }),
            networking_config,
            ..Default::default()
        }
    }

    /// Start a created container.
    pub async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await?;
        Ok(())
    }

    /// Stop a container, tolerating one that is already gone.
    pub async fn stop_container(&self, id: &str) -> Result<()> {
        match self
            .docker
            .stop_container(id, None::<StopContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                tracing::warn!(container = id, "container already gone during stop");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Force-remove a container and its anonymous volumes, tolerating one
    /// that is already gone.
    pub async fn remove_container(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptionsBuilder::default()
            .force(true)
            .v(true)
            .build();
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Wait for a container to exit and return its exit code.
    pub async fn wait_container(&self, id: &str) -> Result<i64> {
        let options = WaitContainerOptionsBuilder::default()
            .condition("not-running")
            .build();
        let mut stream = self.docker.wait_container(id, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // A non-zero exit is reported as an error frame carrying the code.
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Err(CoreError::RuntimeError {
                operation: "wait_container".to_string(),
                details: format!("wait stream for '{id}' ended without a status"),
            }),
        }
    }

    /// Collected stdout and stderr of a container.
    pub async fn container_logs(&self, id: &str) -> Result<String> {
        let options = LogsOptionsBuilder::default()
            .stdout(true)
            .stderr(true)
            .build();
        let mut stream = self.docker.logs(id, Some(options));

        let mut output = Vec::new();
        while let Some(frame) = stream.next().await {
            output.extend_from_slice(&frame?.into_bytes());
        }
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Read the host ports assigned to a running container's published ports.
    pub async fn published_ports(&self, id: &str) -> Result<HashMap<String, u16>> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;

        let mut assigned = HashMap::new();
        let bindings = inspect
            .network_settings
            .and_then(|s| s.ports)
            .unwrap_or_default();

        for (port, binding) in bindings {
            let Some(host_port) = binding
                .and_then(|b| b.into_iter().next())
                .and_then(|b| b.host_port)
            else {
                continue;
            };
            let parsed = host_port.parse::<u16>().map_err(|_| CoreError::RuntimeError {
                operation: "published_ports".to_string(),
                details: format!("unparseable host port '{host_port}' for '{port}'"),
            })?;
            assigned.insert(port, parsed);
        }

        Ok(assigned)
    }

    /// Download a path from a container as raw tar bytes.
    ///
    /// Returns `None` when the path does not exist in the container.
    pub async fn download_path(&self, id: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let options = DownloadFromContainerOptionsBuilder::default()
            .path(path)
            .build();
        let mut stream = self.docker.download_from_container(id, Some(options));

        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => bytes.extend_from_slice(&chunk),
                Err(DockerError::DockerResponseServerError {
                    status_code: 404, ..
                }) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Some(bytes))
    }
}
