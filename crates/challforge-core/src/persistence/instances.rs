//! Instance queries.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::error::{CoreError, Result};
use crate::types::{BuildId, InstanceId, InstanceMetadata};

use super::SqlitePersistence;

impl SqlitePersistence {
    /// Reserve an instance row for a build and return its id.
    ///
    /// The row carries no ports or containers until
    /// [`finalize_instance`](Self::finalize_instance) records them.
    pub async fn open_instance(&self, build: BuildId) -> Result<InstanceId> {
        let id: i64 = sqlx::query_scalar("INSERT INTO instances (build) VALUES (?) RETURNING id")
            .bind(build)
            .fetch_one(&self.pool)
            .await?;

        Ok(InstanceId(id))
    }

    /// Record the containers and port assignments of a started instance.
    pub async fn finalize_instance(&self, instance: &InstanceMetadata) -> Result<()> {
        let instance = instance.clone();
        self.with_tx("finalize_instance", move |tx| {
            Box::pin(async move {
                for (name, port) in &instance.ports {
                    sqlx::query(
                        "INSERT INTO port_assignments (instance, name, port) VALUES (?, ?, ?)",
                    )
                    .bind(instance.id)
                    .bind(name)
                    .bind(*port as i64)
                    .execute(&mut **tx)
                    .await?;
                }

                for (idx, container) in instance.containers.iter().enumerate() {
                    sqlx::query(
                        "INSERT INTO containers (instance, idx, docker_id) VALUES (?, ?, ?)",
                    )
                    .bind(instance.id)
                    .bind(idx as i64)
                    .bind(container)
                    .execute(&mut **tx)
                    .await?;
                }

                Ok(())
            })
        })
        .await
    }

    /// Fetch one instance with its ports and containers.
    pub async fn get_instance(&self, id: InstanceId) -> Result<InstanceMetadata> {
        let row = sqlx::query("SELECT id, last_solved, build FROM instances WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CoreError::InstanceNotFound { instance_id: id })?;

        self.assemble_instance(
            InstanceId(row.get("id")),
            row.get("last_solved"),
            BuildId(row.get("build")),
        )
        .await
    }

    /// Fetch all instances of a build.
    pub async fn instances_for_build(&self, build: BuildId) -> Result<Vec<InstanceMetadata>> {
        let rows = sqlx::query(
            "SELECT id, last_solved, build FROM instances WHERE build = ? ORDER BY id",
        )
        .bind(build)
        .fetch_all(&self.pool)
        .await?;

        let mut instances = Vec::with_capacity(rows.len());
        for row in rows {
            instances.push(
                self.assemble_instance(
                    InstanceId(row.get("id")),
                    row.get("last_solved"),
                    BuildId(row.get("build")),
                )
                .await?,
            );
        }
        Ok(instances)
    }

    /// Delete an instance row and its cascaded children.
    pub async fn remove_instance(&self, id: InstanceId) -> Result<()> {
        let result = sqlx::query("DELETE FROM instances WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::InstanceNotFound { instance_id: id });
        }

        Ok(())
    }

    /// Record the time a solver last verified an instance.
    pub async fn set_last_solved(&self, id: InstanceId, when: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE instances SET last_solved = ? WHERE id = ?")
            .bind(when)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::InstanceNotFound { instance_id: id });
        }

        Ok(())
    }

    async fn assemble_instance(
        &self,
        id: InstanceId,
        last_solved: Option<DateTime<Utc>>,
        build: BuildId,
    ) -> Result<InstanceMetadata> {
        let ports: HashMap<String, u16> =
            sqlx::query("SELECT name, port FROM port_assignments WHERE instance = ?")
                .bind(id)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(|r| (r.get("name"), r.get::<i64, _>("port") as u16))
                .collect();

        let containers: Vec<String> = sqlx::query_scalar(
            "SELECT docker_id FROM containers WHERE instance = ? ORDER BY idx",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(InstanceMetadata {
            id,
            ports,
            containers,
            last_solved,
            build,
        })
    }
}
