// Copyright (C) 2026 Challforge contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the SQLite persistence layer.

mod common;

use common::*;

use std::collections::HashMap;

use chrono::{TimeZone, Utc};

use challforge_core::{
    BuildId, CoreError, DYNAMIC_INSTANCES, HostInfo, Image, ImageId, InstanceMetadata, PortInfo,
};

#[tokio::test]
async fn test_challenge_round_trip() {
    let ctx = TestContext::new().await;
    let mut challenge = ctx.make_challenge("crypto", "rsa-mania");
    challenge.hints = vec!["Look at e".to_string(), "Factor n".to_string()];
    challenge.tags = vec!["rsa".to_string(), "math".to_string()];
    challenge
        .attributes
        .insert("author".to_string(), "dev".to_string());
    challenge.hosts = vec![HostInfo {
        name: "challenge".to_string(),
        target: "run".to_string(),
    }];
    challenge.port_map.insert(
        "main".to_string(),
        PortInfo {
            host: "challenge".to_string(),
            port: 5000,
        },
    );
    challenge.network_options.internal = true;

    ctx.db.insert_challenge(&challenge).await.unwrap();
    let stored = ctx.db.get_challenge(&challenge.id).await.unwrap();

    assert_eq!(stored.name, challenge.name);
    assert_eq!(stored.hints, challenge.hints);
    // Tags come back sorted; only the set is significant.
    let mut expected_tags = challenge.tags.clone();
    expected_tags.sort();
    assert_eq!(stored.tags, expected_tags);
    assert_eq!(stored.attributes, challenge.attributes);
    assert_eq!(stored.hosts, challenge.hosts);
    assert_eq!(stored.port_map, challenge.port_map);
    assert_eq!(stored.network_options, challenge.network_options);
    assert_eq!(stored.source_checksum, challenge.source_checksum);
}

#[tokio::test]
async fn test_get_missing_challenge_is_typed() {
    let ctx = TestContext::new().await;
    let err = ctx
        .db
        .get_challenge(&"web/ghost".into())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ChallengeNotFound { .. }));
}

#[tokio::test]
async fn test_open_build_is_idempotent_per_key() {
    let ctx = TestContext::new().await;
    let challenge = ctx.make_challenge("web", "sqli-basics");
    ctx.db.insert_challenge(&challenge).await.unwrap();

    let first = ctx
        .db
        .open_build(&challenge.id, "manual-aa", "flag{%s}", 7, DYNAMIC_INSTANCES)
        .await
        .unwrap();
    let second = ctx
        .db
        .open_build(&challenge.id, "manual-aa", "flag{%s}", 7, DYNAMIC_INSTANCES)
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert!(second.flag.is_empty());

    // A different seed opens a distinct row.
    let other = ctx
        .db
        .open_build(&challenge.id, "manual-aa", "flag{%s}", 8, DYNAMIC_INSTANCES)
        .await
        .unwrap();
    assert_ne!(first.id, other.id);
}

#[tokio::test]
async fn test_finalize_build_survives_reopen() {
    let ctx = TestContext::new().await;
    let challenge = ctx.make_challenge("web", "sqli-basics");
    ctx.db.insert_challenge(&challenge).await.unwrap();

    let mut build = ctx
        .db
        .open_build(&challenge.id, "manual-aa", "flag{%s}", 7, DYNAMIC_INSTANCES)
        .await
        .unwrap();
    build.flag = build.make_flag();
    build.has_artifacts = true;
    build.lookup_data =
        HashMap::from([("admin_password".to_string(), "hunter2".to_string())]);
    build.images = vec![Image {
        id: ImageId(0),
        host: "challenge".to_string(),
        docker_id: build.image_tag("challenge"),
        ports: vec!["5000/tcp".to_string()],
        build: build.id,
    }];

    let images = ctx.db.finalize_build(&build).await.unwrap();
    assert_ne!(images[0].id, ImageId(0));

    // Re-opening the same key returns the finalized row untouched.
    let reopened = ctx
        .db
        .open_build(&challenge.id, "manual-aa", "flag{%s}", 7, DYNAMIC_INSTANCES)
        .await
        .unwrap();
    assert_eq!(reopened.id, build.id);
    assert_eq!(reopened.flag, build.flag);
    assert!(reopened.has_artifacts);
    assert_eq!(reopened.lookup_data, build.lookup_data);
    assert_eq!(reopened.images.len(), 1);
    assert_eq!(reopened.images[0].ports, vec!["5000/tcp".to_string()]);
}

#[tokio::test]
async fn test_challenge_removal_blocked_by_builds() {
    let ctx = TestContext::new().await;
    let challenge = ctx.make_challenge("web", "sqli-basics");
    ctx.db.insert_challenge(&challenge).await.unwrap();
    let build = ctx
        .db
        .open_build(&challenge.id, "manual-aa", "flag{%s}", 1, DYNAMIC_INSTANCES)
        .await
        .unwrap();

    let err = ctx.db.remove_challenge(&challenge.id).await.unwrap_err();
    assert!(matches!(err, CoreError::RebuildRequired { build_count: 1, .. }));

    ctx.db.remove_build(build.id).await.unwrap();
    ctx.db.remove_challenge(&challenge.id).await.unwrap();
}

#[tokio::test]
async fn test_build_removal_blocked_by_instances() {
    let ctx = TestContext::new().await;
    let challenge = ctx.make_challenge("web", "sqli-basics");
    ctx.db.insert_challenge(&challenge).await.unwrap();
    let build = ctx
        .db
        .open_build(&challenge.id, "manual-aa", "flag{%s}", 1, DYNAMIC_INSTANCES)
        .await
        .unwrap();
    let instance = ctx.db.open_instance(build.id).await.unwrap();

    let err = ctx.db.remove_build(build.id).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::BuildInUse {
            instance_count: 1,
            ..
        }
    ));

    ctx.db.remove_instance(instance).await.unwrap();
    ctx.db.remove_build(build.id).await.unwrap();
}

#[tokio::test]
async fn test_instance_round_trip_and_last_solved() {
    let ctx = TestContext::new().await;
    let challenge = ctx.make_challenge("web", "sqli-basics");
    ctx.db.insert_challenge(&challenge).await.unwrap();
    let build = ctx
        .db
        .open_build(&challenge.id, "manual-aa", "flag{%s}", 1, DYNAMIC_INSTANCES)
        .await
        .unwrap();

    let id = ctx.db.open_instance(build.id).await.unwrap();
    let instance = InstanceMetadata {
        id,
        ports: HashMap::from([("main".to_string(), 32768_u16)]),
        containers: vec!["deadbeef".to_string()],
        last_solved: None,
        build: build.id,
    };
    ctx.db.finalize_instance(&instance).await.unwrap();

    let stored = ctx.db.get_instance(id).await.unwrap();
    assert_eq!(stored.ports, instance.ports);
    assert_eq!(stored.containers, instance.containers);
    assert!(stored.last_solved.is_none());

    let solved_at = Utc.with_ymd_and_hms(2026, 8, 29, 12, 0, 0).unwrap();
    ctx.db.set_last_solved(id, solved_at).await.unwrap();
    let stored = ctx.db.get_instance(id).await.unwrap();
    assert_eq!(stored.last_solved, Some(solved_at));
}

#[tokio::test]
async fn test_missing_build_and_instance_are_typed() {
    let ctx = TestContext::new().await;

    assert!(matches!(
        ctx.db.get_build(BuildId(999)).await.unwrap_err(),
        CoreError::BuildNotFound { .. }
    ));
    assert!(matches!(
        ctx.db.remove_build(BuildId(999)).await.unwrap_err(),
        CoreError::BuildNotFound { .. }
    ));
    assert!(matches!(
        ctx.db
            .get_instance(challforge_core::InstanceId(999))
            .await
            .unwrap_err(),
        CoreError::InstanceNotFound { .. }
    ));
}

#[tokio::test]
async fn test_orphan_build_rejected_by_foreign_keys() {
    let ctx = TestContext::new().await;

    let err = ctx
        .db
        .open_build(&"web/ghost".into(), "manual-aa", "flag{%s}", 1, DYNAMIC_INSTANCES)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::DatabaseError { .. }));
}

#[tokio::test]
async fn test_search_challenges_matches_all_tags() {
    let ctx = TestContext::new().await;

    let mut a = ctx.make_challenge("web", "sqli-basics");
    a.tags = vec!["web".to_string(), "sql".to_string()];
    let mut b = ctx.make_challenge("web", "xss-hunt");
    b.tags = vec!["web".to_string()];
    ctx.db.insert_challenge(&a).await.unwrap();
    ctx.db.insert_challenge(&b).await.unwrap();

    let both = ctx.db.search_challenges(&["web".to_string()]).await.unwrap();
    assert_eq!(both.len(), 2);

    let sql_only = ctx
        .db
        .search_challenges(&["WEB".to_string(), "sql".to_string()])
        .await
        .unwrap();
    assert_eq!(sql_only.len(), 1);
    assert_eq!(sql_only[0].id, a.id);

    let none = ctx
        .db
        .search_challenges(&["forensics".to_string()])
        .await
        .unwrap();
    assert!(none.is_empty());

    // `*` expands to any run of characters.
    let wildcard = ctx.db.search_challenges(&["s*l".to_string()]).await.unwrap();
    assert_eq!(wildcard.len(), 1);
    assert_eq!(wildcard[0].id, a.id);
}

#[tokio::test]
async fn test_update_challenge_rewrites_children() {
    let ctx = TestContext::new().await;
    let mut challenge = ctx.make_challenge("web", "sqli-basics");
    challenge.hints = vec!["old hint".to_string()];
    ctx.db.insert_challenge(&challenge).await.unwrap();

    challenge.hints = vec!["new hint".to_string(), "second".to_string()];
    challenge.tags = vec!["fresh".to_string()];
    ctx.db.update_challenge(&challenge).await.unwrap();

    let stored = ctx.db.get_challenge(&challenge.id).await.unwrap();
    assert_eq!(stored.hints, challenge.hints);
    assert_eq!(stored.tags, challenge.tags);
}
