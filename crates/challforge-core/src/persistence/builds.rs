//! Build queries.

use std::collections::HashMap;

use sqlx::Row;

use crate::error::{CoreError, Result};
use crate::types::{BuildId, BuildMetadata, ChallengeId, Image, ImageId};

use super::SqlitePersistence;

#[derive(sqlx::FromRow)]
struct BuildRow {
    id: BuildId,
    flag: String,
    seed: i32,
    format: String,
    has_artifacts: bool,
    instance_count: i64,
    schema: String,
    challenge: ChallengeId,
}

impl SqlitePersistence {
    /// Open a build slot for `(schema, format, challenge, seed)`.
    ///
    /// Inserts a placeholder row if none exists, otherwise returns the
    /// existing row untouched. A returned build with a non-empty flag has
    /// already been finalized and needs no rebuild.
    pub async fn open_build(
        &self,
        challenge: &ChallengeId,
        schema: &str,
        format: &str,
        seed: i32,
        instance_count: i64,
    ) -> Result<BuildMetadata> {
        // The no-op conflict update keeps the statement a single round trip
        // while leaving finalized rows intact.
        sqlx::query(
            r#"
            INSERT INTO builds (flag, seed, format, has_artifacts, instance_count, schema, challenge)
            VALUES ('', ?, ?, 0, ?, ?, ?)
            ON CONFLICT (schema, format, challenge, seed) DO UPDATE SET flag = flag
            "#,
        )
        .bind(seed)
        .bind(format)
        .bind(instance_count)
        .bind(schema)
        .bind(challenge)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            SELECT id, flag, seed, format, has_artifacts, instance_count, schema, challenge
            FROM builds
            WHERE schema = ? AND format = ? AND challenge = ? AND seed = ?
            "#,
        )
        .bind(schema)
        .bind(format)
        .bind(challenge)
        .bind(seed)
        .fetch_one(&self.pool)
        .await?;

        self.assemble_build(row).await
    }

    /// Record the results of a completed image build.
    ///
    /// Writes the flag, artifact marker, lookup data, and image rows in one
    /// transaction. Until this commits the build row is an unfinalized
    /// placeholder and `get_build` callers see an empty flag.
    pub async fn finalize_build(&self, build: &BuildMetadata) -> Result<Vec<Image>> {
        // Owned copy; the transaction closure must not borrow from the caller.
        let build = build.clone();
        self.with_tx("finalize_build", move |tx| {
            Box::pin(async move {
                let result = sqlx::query(
                    r#"
                    UPDATE builds
                    SET flag = ?, has_artifacts = ?, instance_count = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&build.flag)
                .bind(build.has_artifacts)
                .bind(build.instance_count)
                .bind(build.id)
                .execute(&mut **tx)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(CoreError::BuildNotFound { build_id: build.id });
                }

                sqlx::query("DELETE FROM lookup_data WHERE build = ?")
                    .bind(build.id)
                    .execute(&mut **tx)
                    .await?;

                for (key, value) in &build.lookup_data {
                    sqlx::query("INSERT INTO lookup_data (build, key, value) VALUES (?, ?, ?)")
                        .bind(build.id)
                        .bind(key)
                        .bind(value)
                        .execute(&mut **tx)
                        .await?;
                }

                sqlx::query("DELETE FROM images WHERE build = ?")
                    .bind(build.id)
                    .execute(&mut **tx)
                    .await?;

                let mut images = Vec::with_capacity(build.images.len());
                for image in &build.images {
                    let id: i64 = sqlx::query_scalar(
                        "INSERT INTO images (host, docker_id, build) VALUES (?, ?, ?) RETURNING id",
                    )
                    .bind(&image.host)
                    .bind(&image.docker_id)
                    .bind(build.id)
                    .fetch_one(&mut **tx)
                    .await?;

                    for port in &image.ports {
                        sqlx::query("INSERT INTO image_ports (image, port) VALUES (?, ?)")
                            .bind(id)
                            .bind(port)
                            .execute(&mut **tx)
                            .await?;
                    }

                    images.push(Image {
                        id: ImageId(id),
                        ..image.clone()
                    });
                }

                Ok(images)
            })
        })
        .await
    }

    /// Fetch one build with its images and lookup data.
    pub async fn get_build(&self, id: BuildId) -> Result<BuildMetadata> {
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            SELECT id, flag, seed, format, has_artifacts, instance_count, schema, challenge
            FROM builds
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CoreError::BuildNotFound { build_id: id })?;

        self.assemble_build(row).await
    }

    /// Fetch all builds of a challenge, images and lookup data included.
    pub async fn builds_for_challenge(&self, id: &ChallengeId) -> Result<Vec<BuildMetadata>> {
        let rows = sqlx::query_as::<_, BuildRow>(
            r#"
            SELECT id, flag, seed, format, has_artifacts, instance_count, schema, challenge
            FROM builds
            WHERE challenge = ?
            ORDER BY id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut builds = Vec::with_capacity(rows.len());
        for row in rows {
            builds.push(self.assemble_build(row).await?);
        }
        Ok(builds)
    }

    /// Number of instances that reference a build.
    pub async fn build_instance_count(&self, id: BuildId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM instances WHERE build = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Delete a build row and its cascaded children.
    ///
    /// Fails with [`CoreError::BuildInUse`] while instances of the build
    /// exist.
    pub async fn remove_build(&self, id: BuildId) -> Result<()> {
        let instance_count = self.build_instance_count(id).await?;
        if instance_count > 0 {
            return Err(CoreError::BuildInUse {
                build_id: id,
                instance_count,
            });
        }

        let result = sqlx::query("DELETE FROM builds WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::BuildNotFound { build_id: id });
        }

        Ok(())
    }

    async fn assemble_build(&self, row: BuildRow) -> Result<BuildMetadata> {
        let lookup_data: HashMap<String, String> =
            sqlx::query("SELECT key, value FROM lookup_data WHERE build = ?")
                .bind(row.id)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(|r| (r.get("key"), r.get("value")))
                .collect();

        let image_rows = sqlx::query("SELECT id, host, docker_id FROM images WHERE build = ? ORDER BY id")
            .bind(row.id)
            .fetch_all(&self.pool)
            .await?;

        let mut images = Vec::with_capacity(image_rows.len());
        for r in image_rows {
            let image_id: i64 = r.get("id");
            let ports: Vec<String> =
                sqlx::query_scalar("SELECT port FROM image_ports WHERE image = ? ORDER BY port")
                    .bind(image_id)
                    .fetch_all(&self.pool)
                    .await?;

            images.push(Image {
                id: ImageId(image_id),
                host: r.get("host"),
                docker_id: r.get("docker_id"),
                ports,
                build: row.id,
            });
        }

        Ok(BuildMetadata {
            id: row.id,
            flag: row.flag,
            lookup_data,
            seed: row.seed,
            format: row.format,
            images,
            has_artifacts: row.has_artifacts,
            challenge: row.challenge,
            schema: row.schema,
            instance_count: row.instance_count,
            instances: Vec::new(),
        })
    }
}
