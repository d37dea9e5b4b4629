//! Challenge queries.

use std::collections::HashMap;

use sqlx::Row;

use crate::error::{CoreError, Result};
use crate::types::{
    ChallengeId, ChallengeMetadata, ChallengeSummary, HostInfo, NetworkOptions, PortInfo,
};

use super::SqlitePersistence;

#[derive(sqlx::FromRow)]
struct ChallengeRow {
    id: ChallengeId,
    name: String,
    namespace: String,
    challenge_type: String,
    description: String,
    details: String,
    source_checksum: i64,
    metadata_checksum: i64,
    path: String,
    templatable: bool,
    max_users: i64,
    category: String,
    points: i64,
    solve_script: bool,
}

impl SqlitePersistence {
    /// List summaries of all persisted challenges.
    pub async fn list_challenges(&self) -> Result<Vec<ChallengeSummary>> {
        let rows = sqlx::query_as::<_, ChallengeSummary>(
            r#"
            SELECT id, name, path, source_checksum, metadata_checksum, solve_script
            FROM challenges
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// List summaries of challenges carrying every one of `tags`
    /// (case-insensitive, `*` matching any run of characters). An empty tag
    /// list matches everything.
    pub async fn search_challenges(&self, tags: &[String]) -> Result<Vec<ChallengeSummary>> {
        if tags.is_empty() {
            return self.list_challenges().await;
        }

        let mut sql = String::from(
            "SELECT id, name, path, source_checksum, metadata_checksum, solve_script \
             FROM challenges c WHERE 1 = 1",
        );
        for _ in tags {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM tags t WHERE t.challenge = c.id AND lower(t.tag) LIKE ?)",
            );
        }
        sql.push_str(" ORDER BY id");

        let mut query = sqlx::query_as::<_, ChallengeSummary>(&sql);
        for tag in tags {
            query = query.bind(tag.to_lowercase().replace('*', "%"));
        }

        Ok(query.fetch_all(&self.pool).await?)
    }

    /// Fetch the full metadata of one challenge.
    pub async fn get_challenge(&self, id: &ChallengeId) -> Result<ChallengeMetadata> {
        let row = sqlx::query_as::<_, ChallengeRow>(
            r#"
            SELECT id, name, namespace, challenge_type, description, details,
                   source_checksum, metadata_checksum, path, templatable,
                   max_users, category, points, solve_script
            FROM challenges
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::ChallengeNotFound {
            challenge_id: id.clone(),
        })?;

        let hints: Vec<String> =
            sqlx::query_scalar("SELECT hint FROM hints WHERE challenge = ? ORDER BY idx")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;

        let tags: Vec<String> =
            sqlx::query_scalar("SELECT tag FROM tags WHERE challenge = ? ORDER BY tag")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;

        let attributes: HashMap<String, String> =
            sqlx::query("SELECT key, value FROM attributes WHERE challenge = ?")
                .bind(id)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(|r| (r.get("key"), r.get("value")))
                .collect();

        let hosts: Vec<HostInfo> =
            sqlx::query("SELECT name, target FROM hosts WHERE challenge = ? ORDER BY idx")
                .bind(id)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(|r| HostInfo {
                    name: r.get("name"),
                    target: r.get("target"),
                })
                .collect();

        let port_map: HashMap<String, PortInfo> =
            sqlx::query("SELECT name, host, port FROM port_names WHERE challenge = ?")
                .bind(id)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(|r| {
                    (
                        r.get("name"),
                        PortInfo {
                            host: r.get("host"),
                            port: r.get::<i64, _>("port") as u16,
                        },
                    )
                })
                .collect();

        let internal: Option<bool> =
            sqlx::query_scalar("SELECT internal FROM network_options WHERE challenge = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(ChallengeMetadata {
            id: row.id,
            name: row.name,
            namespace: row.namespace,
            challenge_type: row.challenge_type,
            description: row.description,
            details: row.details,
            hints,
            source_checksum: row.source_checksum as u32,
            metadata_checksum: row.metadata_checksum as u32,
            path: row.path.into(),
            templatable: row.templatable,
            port_map,
            hosts,
            max_users: row.max_users,
            category: row.category,
            points: row.points,
            tags,
            attributes,
            network_options: NetworkOptions {
                internal: internal.unwrap_or(false),
            },
            solve_script: row.solve_script,
            builds: Vec::new(),
        })
    }

    /// Insert a newly discovered challenge and all of its child rows.
    pub async fn insert_challenge(&self, meta: &ChallengeMetadata) -> Result<()> {
        // Owned copy; the transaction closure must not borrow from the caller.
        let meta = meta.clone();
        self.with_tx("insert_challenge", move |tx| {
            Box::pin(async move {
                sqlx::query(
                    r#"
                    INSERT INTO challenges
                        (id, name, namespace, challenge_type, description, details,
                         source_checksum, metadata_checksum, path, templatable,
                         max_users, category, points, solve_script)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&meta.id)
                .bind(&meta.name)
                .bind(&meta.namespace)
                .bind(&meta.challenge_type)
                .bind(&meta.description)
                .bind(&meta.details)
                .bind(meta.source_checksum as i64)
                .bind(meta.metadata_checksum as i64)
                .bind(meta.path.to_string_lossy().into_owned())
                .bind(meta.templatable)
                .bind(meta.max_users)
                .bind(&meta.category)
                .bind(meta.points)
                .bind(meta.solve_script)
                .execute(&mut **tx)
                .await?;

                write_children(tx, &meta).await
            })
        })
        .await
    }

    /// Rewrite a persisted challenge and all of its child rows.
    ///
    /// Callers are responsible for checking whether the change is safe to
    /// apply; this rewrites unconditionally.
    pub async fn update_challenge(&self, meta: &ChallengeMetadata) -> Result<()> {
        let meta = meta.clone();
        self.with_tx("update_challenge", move |tx| {
            Box::pin(async move {
                let result = sqlx::query(
                    r#"
                    UPDATE challenges
                    SET name = ?, namespace = ?, challenge_type = ?, description = ?,
                        details = ?, source_checksum = ?, metadata_checksum = ?,
                        path = ?, templatable = ?, max_users = ?, category = ?,
                        points = ?, solve_script = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&meta.name)
                .bind(&meta.namespace)
                .bind(&meta.challenge_type)
                .bind(&meta.description)
                .bind(&meta.details)
                .bind(meta.source_checksum as i64)
                .bind(meta.metadata_checksum as i64)
                .bind(meta.path.to_string_lossy().into_owned())
                .bind(meta.templatable)
                .bind(meta.max_users)
                .bind(&meta.category)
                .bind(meta.points)
                .bind(meta.solve_script)
                .bind(&meta.id)
                .execute(&mut **tx)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(CoreError::ChallengeNotFound {
                        challenge_id: meta.id.clone(),
                    });
                }

                clear_children(tx, &meta.id).await?;
                write_children(tx, &meta).await
            })
        })
        .await
    }

    /// Remove a challenge. Fails if any builds of it still exist.
    pub async fn remove_challenge(&self, id: &ChallengeId) -> Result<()> {
        let build_count = self.challenge_build_count(id).await?;
        if build_count > 0 {
            return Err(CoreError::RebuildRequired {
                challenge_id: id.clone(),
                build_count,
            });
        }

        let result = sqlx::query("DELETE FROM challenges WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::ChallengeNotFound {
                challenge_id: id.clone(),
            });
        }

        Ok(())
    }

    /// Number of builds that reference a challenge.
    pub async fn challenge_build_count(&self, id: &ChallengeId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM builds WHERE challenge = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Whether new metadata can replace the persisted version without
    /// invalidating existing builds.
    ///
    /// A refresh is safe when the fields that feed image builds and instance
    /// wiring are unchanged: challenge type, host list, port map, and network
    /// options. Descriptive text, hints, tags, and point values may change
    /// freely.
    pub async fn safe_to_refresh(&self, new: &ChallengeMetadata) -> Result<bool> {
        let old = self.get_challenge(&new.id).await?;

        Ok(old.challenge_type == new.challenge_type
            && old.hosts == new.hosts
            && old.port_map == new.port_map
            && old.network_options == new.network_options
            && old.templatable == new.templatable
            && old.max_users == new.max_users)
    }
}

async fn write_children(
    tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
    meta: &ChallengeMetadata,
) -> Result<()> {
    for (idx, hint) in meta.hints.iter().enumerate() {
        sqlx::query("INSERT INTO hints (challenge, idx, hint) VALUES (?, ?, ?)")
            .bind(&meta.id)
            .bind(idx as i64)
            .bind(hint)
            .execute(&mut **tx)
            .await?;
    }

    for tag in &meta.tags {
        sqlx::query("INSERT INTO tags (challenge, tag) VALUES (?, ?)")
            .bind(&meta.id)
            .bind(tag)
            .execute(&mut **tx)
            .await?;
    }

    for (key, value) in &meta.attributes {
        sqlx::query("INSERT INTO attributes (challenge, key, value) VALUES (?, ?, ?)")
            .bind(&meta.id)
            .bind(key)
            .bind(value)
            .execute(&mut **tx)
            .await?;
    }

    for (idx, host) in meta.hosts.iter().enumerate() {
        sqlx::query("INSERT INTO hosts (challenge, name, idx, target) VALUES (?, ?, ?, ?)")
            .bind(&meta.id)
            .bind(&host.name)
            .bind(idx as i64)
            .bind(&host.target)
            .execute(&mut **tx)
            .await?;
    }

    for (name, port) in &meta.port_map {
        sqlx::query("INSERT INTO port_names (challenge, name, host, port) VALUES (?, ?, ?, ?)")
            .bind(&meta.id)
            .bind(name)
            .bind(&port.host)
            .bind(port.port as i64)
            .execute(&mut **tx)
            .await?;
    }

    sqlx::query("INSERT INTO network_options (challenge, internal) VALUES (?, ?)")
        .bind(&meta.id)
        .bind(meta.network_options.internal)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

async fn clear_children(
    tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
    id: &ChallengeId,
) -> Result<()> {
    for table in [
        "hints",
        "tags",
        "attributes",
        "hosts",
        "port_names",
        "network_options",
    ] {
        sqlx::query(&format!("DELETE FROM {table} WHERE challenge = ?"))
            .bind(id)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}
