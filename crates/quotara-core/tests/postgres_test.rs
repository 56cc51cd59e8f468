// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine tests against PostgreSQL.
//!
//! Requires TEST_DATABASE_URL; skipped otherwise.

mod common;

use common::*;
use futures::future::join_all;
use quotara_core::RecalculateOptions;

#[tokio::test]
async fn test_postgres_lifecycle_and_aggregation() {
    skip_if_no_db!();

    let Some(ctx) = TestContext::postgres().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    let grandparent = ctx.grandparent().await;
    let parent = ctx.parent(&grandparent).await;
    let first = ctx.child(&parent).await;
    let second = ctx.child(&parent).await;
    let volume = ctx.volume(&parent, 100.0).await;

    for child in [&first, &second] {
        ctx.engine
            .set_quota_usage(&child.reference, USAGE_AGGREGATOR, 10.0)
            .await
            .unwrap();
    }

    assert_eq!(ctx.usage(&parent, COUNTER).await, 2.0);
    assert_eq!(ctx.usage(&parent, TOTAL).await, 100.0);
    assert_eq!(ctx.usage(&grandparent, USAGE_AGGREGATOR).await, 20.0);
    assert_eq!(
        ctx.usage(&parent, LIMIT_AGGREGATOR).await,
        2.0 * CHILD_REGULAR_LIMIT
    );

    ctx.delete(&first.reference).await;
    ctx.delete(&volume.reference).await;

    assert_eq!(ctx.usage(&parent, COUNTER).await, 1.0);
    assert_eq!(ctx.usage(&parent, TOTAL).await, 0.0);
    assert_eq!(ctx.usage(&grandparent, USAGE_AGGREGATOR).await, 10.0);
    assert!(ctx.engine.quotas(&first.reference).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_postgres_concurrent_add_usage() {
    skip_if_no_db!();

    let Some(ctx) = TestContext::postgres().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    let grandparent = ctx.grandparent().await;
    let parent = ctx.parent(&grandparent).await;
    let child = ctx.child(&parent).await;

    let results = join_all((0..40).map(|_| {
        let engine = ctx.engine.clone();
        let scope = child.reference.clone();
        tokio::spawn(async move { engine.add_quota_usage(&scope, USAGE_AGGREGATOR, 0.5).await })
    }))
    .await;
    for result in results {
        result.unwrap().unwrap();
    }

    assert_eq!(ctx.usage(&child, USAGE_AGGREGATOR).await, 20.0);
    assert_eq!(ctx.usage(&grandparent, USAGE_AGGREGATOR).await, 20.0);
}

#[tokio::test]
async fn test_postgres_recalculation_repairs_drift() {
    skip_if_no_db!();

    let Some(ctx) = TestContext::postgres().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    let grandparent = ctx.grandparent().await;
    let parent = ctx.parent(&grandparent).await;
    ctx.volume(&parent, 12.0).await;

    ctx.engine
        .store()
        .set_usage(&parent.reference, TOTAL, 0.0)
        .await
        .unwrap();

    // The shared database may hold scopes of earlier runs; only this tree matters.
    let report = ctx.engine.recalculate_all(RecalculateOptions::default()).await;
    assert!(report.is_clean(), "failures: {:?}", report.failures);
    assert_eq!(ctx.usage(&parent, TOTAL).await, 12.0);
}
