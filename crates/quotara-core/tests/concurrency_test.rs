// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Concurrent mutation tests against a file-backed SQLite store.

mod common;

use std::sync::Arc;

use futures::future::join_all;

use common::*;
use quotara_core::persistence::SqlitePersistence;

async fn file_backed() -> (TestContext, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqlitePersistence::from_path(dir.path().join("quotas.db"))
        .await
        .unwrap();
    (
        TestContext::with_store(fixture_registry(), Arc::new(store)),
        dir,
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_add_usage_loses_no_update() {
    let (ctx, _dir) = file_backed().await;
    let grandparent = ctx.grandparent().await;
    let parent = ctx.parent(&grandparent).await;
    let child = ctx.child(&parent).await;

    let results = join_all((0..50).map(|_| {
        let engine = ctx.engine.clone();
        let scope = child.reference.clone();
        tokio::spawn(async move { engine.add_quota_usage(&scope, USAGE_AGGREGATOR, 2.0).await })
    }))
    .await;

    for result in results {
        result.unwrap().unwrap();
    }

    assert_eq!(ctx.usage(&child, USAGE_AGGREGATOR).await, 100.0);
    assert_eq!(ctx.usage(&parent, USAGE_AGGREGATOR).await, 100.0);
    assert_eq!(ctx.usage(&grandparent, USAGE_AGGREGATOR).await, 100.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_set_usage_keeps_aggregate_consistent() {
    let (ctx, _dir) = file_backed().await;
    let grandparent = ctx.grandparent().await;
    let parent = ctx.parent(&grandparent).await;
    let child = ctx.child(&parent).await;

    let results = join_all((1..=20).map(|n| {
        let engine = ctx.engine.clone();
        let scope = child.reference.clone();
        tokio::spawn(async move {
            engine
                .set_quota_usage(&scope, USAGE_AGGREGATOR, n as f64)
                .await
        })
    }))
    .await;

    for result in results {
        result.unwrap().unwrap();
    }

    // Whatever value won, each overwrite propagated exactly its own difference.
    let final_usage = ctx.usage(&child, USAGE_AGGREGATOR).await;
    assert_eq!(ctx.usage(&parent, USAGE_AGGREGATOR).await, final_usage);
    assert_eq!(ctx.usage(&grandparent, USAGE_AGGREGATOR).await, final_usage);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_target_creation() {
    let (ctx, _dir) = file_backed().await;
    let ctx = Arc::new(ctx);
    let grandparent = ctx.grandparent().await;
    let parent = ctx.parent(&grandparent).await;

    let handles = (0..25).map(|_| {
        let ctx = ctx.clone();
        let parent = parent.clone();
        tokio::spawn(async move { ctx.volume(&parent, 4.0).await })
    });
    for handle in join_all(handles).await {
        handle.unwrap();
    }

    assert_eq!(ctx.usage(&parent, TOTAL).await, 100.0);
}
