// Copyright 2025 Penne Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Tests for change stream legality checks.

use bson::Timestamp;
use penne_core::context::{ExecutionContext, FixedClock, ReplicationMode};
use penne_core::error::ErrorCode;
use penne_core::namespace::Namespace;
use penne_core::resume_token::ResumeToken;
use penne_core::spec::{ChangeStreamSpec, FullDocumentBeforeChangeMode};
use penne_core::validate::validate;
use proptest::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

fn ts(time: u32) -> Timestamp {
    Timestamp { time, increment: 0 }
}

fn data_node(namespace: Namespace) -> ExecutionContext {
    ExecutionContext::builder(namespace, Arc::new(FixedClock::new(ts(100)))).build()
}

fn router(namespace: Namespace) -> ExecutionContext {
    ExecutionContext::builder(namespace, Arc::new(FixedClock::new(ts(100))))
        .router()
        .build()
}

fn rejected_with(spec: &ChangeStreamSpec, ctx: &ExecutionContext) -> ErrorCode {
    validate(spec, ctx).unwrap_err().code
}

#[test]
fn test_plain_streams_are_legal() {
    let spec = ChangeStreamSpec::default();
    assert!(validate(&spec, &data_node(Namespace::new("shop", "orders"))).is_ok());
    assert!(validate(&spec, &data_node(Namespace::database("shop"))).is_ok());
    assert!(validate(&spec, &router(Namespace::new("shop", "orders"))).is_ok());
}

#[test]
fn test_standalone_is_rejected() {
    let ctx = ExecutionContext::builder(
        Namespace::new("shop", "orders"),
        Arc::new(FixedClock::new(ts(1))),
    )
    .replication_mode(ReplicationMode::None)
    .build();

    assert_eq!(
        rejected_with(&ChangeStreamSpec::default(), &ctx),
        ErrorCode::NotReplicaSet
    );
}

#[test]
fn test_whole_cluster_requires_collectionless_admin() {
    let spec = ChangeStreamSpec::builder()
        .all_changes_for_cluster()
        .build()
        .unwrap();

    assert!(validate(&spec, &data_node(Namespace::cluster())).is_ok());
    assert!(validate(&spec, &router(Namespace::cluster())).is_ok());

    let code = rejected_with(&spec, &data_node(Namespace::new("shop", "orders")));
    assert_eq!(code, ErrorCode::InvalidOptions);
    assert_eq!(code.as_i32(), 72);

    assert_eq!(
        rejected_with(&spec, &data_node(Namespace::new("admin", "users"))),
        ErrorCode::InvalidOptions
    );
}

#[test]
fn test_admin_requires_whole_cluster_flag() {
    let code = rejected_with(
        &ChangeStreamSpec::default(),
        &data_node(Namespace::cluster()),
    );
    assert_eq!(code, ErrorCode::InvalidNamespace);
    assert_eq!(code.as_i32(), 73);
}

#[test]
fn test_internal_databases() {
    let spec = ChangeStreamSpec::default();
    assert_eq!(
        rejected_with(&spec, &data_node(Namespace::database("local"))),
        ErrorCode::InvalidNamespace
    );
    assert_eq!(
        rejected_with(&spec, &data_node(Namespace::new("config", "chunks"))),
        ErrorCode::InvalidNamespace
    );

    let spec = ChangeStreamSpec::builder()
        .allow_to_run_on_config_db()
        .build()
        .unwrap();
    assert!(validate(&spec, &data_node(Namespace::new("config", "chunks"))).is_ok());
    assert_eq!(
        rejected_with(&spec, &data_node(Namespace::database("local"))),
        ErrorCode::InvalidNamespace
    );
}

#[test]
fn test_internal_collections() {
    let ns = Namespace::new("shop", "system.views");
    assert_eq!(
        rejected_with(&ChangeStreamSpec::default(), &data_node(ns.clone())),
        ErrorCode::InvalidNamespace
    );

    let spec = ChangeStreamSpec::builder()
        .allow_to_run_on_system_ns()
        .build()
        .unwrap();
    assert!(validate(&spec, &data_node(ns.clone())).is_ok());

    // The override never applies through the router
    assert_eq!(rejected_with(&spec, &router(ns)), ErrorCode::InvalidNamespace);
}

#[test]
fn test_pre_image_rejected_when_merging() {
    let spec = ChangeStreamSpec::builder()
        .full_document_before_change(FullDocumentBeforeChangeMode::WhenAvailable)
        .build()
        .unwrap();

    assert!(validate(&spec, &data_node(Namespace::new("shop", "orders"))).is_ok());

    let code = rejected_with(&spec, &router(Namespace::new("shop", "orders")));
    assert_eq!(code, ErrorCode::PreImageNotSupportedWhenMerging);
    assert_eq!(code.as_i32(), 51771);

    let merging_shard = ExecutionContext::builder(
        Namespace::new("shop", "orders"),
        Arc::new(FixedClock::new(ts(1))),
    )
    .needs_merge(true)
    .build();
    assert_eq!(
        rejected_with(&spec, &merging_shard),
        ErrorCode::PreImageNotSupportedWhenMerging
    );
}

#[test]
fn test_migration_events_only_on_data_nodes() {
    let spec = ChangeStreamSpec::builder()
        .show_migration_events()
        .build()
        .unwrap();

    assert!(validate(&spec, &data_node(Namespace::database("shop"))).is_ok());
    let code = rejected_with(&spec, &router(Namespace::database("shop")));
    assert_eq!(code, ErrorCode::MigrationEventsOnRouter);
    assert_eq!(code.as_i32(), 31123);
}

#[test]
fn test_resume_after_and_start_after_conflict() {
    let token = ResumeToken::event(ts(5)).collection_uuid(Uuid::new_v4()).build();
    let spec = ChangeStreamSpec {
        resume_after: Some(token.to_document()),
        start_after: Some(token.to_document()),
        ..Default::default()
    };

    let code = rejected_with(&spec, &data_node(Namespace::database("shop")));
    assert_eq!(code, ErrorCode::ResumeAfterAndStartAfter);
    assert_eq!(code.as_i32(), 50865);
}

#[test]
fn test_token_and_operation_time_conflict() {
    let token = ResumeToken::event(ts(5)).build();
    let spec = ChangeStreamSpec {
        resume_after: Some(token.to_document()),
        start_at_operation_time: Some(ts(5)),
        ..Default::default()
    };

    let code = rejected_with(&spec, &data_node(Namespace::database("shop")));
    assert_eq!(code, ErrorCode::MultipleResumeOptions);
    assert_eq!(code.as_i32(), 40674);
}

#[test]
fn test_invalidate_token_only_with_start_after() {
    let uuid = Uuid::new_v4();
    let token = ResumeToken::event(ts(5))
        .collection_uuid(uuid)
        .from_invalidate()
        .build();
    let ctx = data_node(Namespace::new("shop", "orders"));

    let resume = ChangeStreamSpec::builder().resume_after(&token).build().unwrap();
    let code = rejected_with(&resume, &ctx);
    assert_eq!(code, ErrorCode::InvalidResumeToken);
    assert_eq!(code.as_i32(), 260);

    let start = ChangeStreamSpec::builder().start_after(&token).build().unwrap();
    assert!(validate(&start, &ctx).is_ok());
}

#[test]
fn test_single_collection_token_must_name_collection() {
    let expected = Uuid::new_v4();
    let ctx = ExecutionContext::builder(
        Namespace::new("shop", "orders"),
        Arc::new(FixedClock::new(ts(1))),
    )
    .collection_uuid(expected)
    .build();

    let without_uuid = ResumeToken::event(ts(5)).build();
    let spec = ChangeStreamSpec::builder()
        .resume_after(&without_uuid)
        .build()
        .unwrap();
    assert_eq!(rejected_with(&spec, &ctx), ErrorCode::InvalidResumeToken);

    let other = ResumeToken::event(ts(5)).collection_uuid(Uuid::new_v4()).build();
    let spec = ChangeStreamSpec::builder().resume_after(&other).build().unwrap();
    assert_eq!(rejected_with(&spec, &ctx), ErrorCode::InvalidResumeToken);

    let matching = ResumeToken::event(ts(5)).collection_uuid(expected).build();
    let spec = ChangeStreamSpec::builder()
        .resume_after(&matching)
        .build()
        .unwrap();
    assert!(validate(&spec, &ctx).is_ok());

    // Database streams span many collections
    let spec = ChangeStreamSpec::builder()
        .resume_after(&without_uuid)
        .build()
        .unwrap();
    assert!(validate(&spec, &data_node(Namespace::database("shop"))).is_ok());
}

#[test]
fn test_malformed_token_is_rejected() {
    let spec = ChangeStreamSpec {
        resume_after: Some(bson::doc! { "_data": "not hex" }),
        ..Default::default()
    };
    assert_eq!(
        rejected_with(&spec, &data_node(Namespace::database("shop"))),
        ErrorCode::InvalidResumeToken
    );
}

fn with_both_tokens(spec: ChangeStreamSpec) -> ChangeStreamSpec {
    let token = ResumeToken::event(ts(5)).collection_uuid(Uuid::new_v4()).build();
    ChangeStreamSpec {
        resume_after: Some(token.to_document()),
        start_after: Some(token.to_document()),
        ..spec
    }
}

#[test]
fn test_two_tokens_reported_before_other_violations() {
    let standalone = ExecutionContext::builder(
        Namespace::new("shop", "orders"),
        Arc::new(FixedClock::new(ts(1))),
    )
    .replication_mode(ReplicationMode::None)
    .build();

    let cases = [
        (
            ChangeStreamSpec {
                full_document_before_change: FullDocumentBeforeChangeMode::WhenAvailable,
                ..Default::default()
            },
            router(Namespace::new("db", "coll")),
        ),
        (
            ChangeStreamSpec {
                all_changes_for_cluster: true,
                ..Default::default()
            },
            data_node(Namespace::new("db", "coll")),
        ),
        (ChangeStreamSpec::default(), standalone),
        (
            ChangeStreamSpec {
                show_migration_events: true,
                ..Default::default()
            },
            router(Namespace::database("shop")),
        ),
        (ChangeStreamSpec::default(), data_node(Namespace::database("local"))),
        (
            ChangeStreamSpec::default(),
            data_node(Namespace::new("shop", "system.views")),
        ),
        (
            ChangeStreamSpec {
                start_at_operation_time: Some(ts(3)),
                ..Default::default()
            },
            data_node(Namespace::database("shop")),
        ),
    ];

    for (spec, ctx) in cases {
        let code = rejected_with(&with_both_tokens(spec), &ctx);
        assert_eq!(code.as_i32(), 50865, "{ctx:?}");
    }
}

const NAMESPACES: &[(&str, Option<&str>)] = &[
    ("shop", Some("orders")),
    ("shop", None),
    ("admin", None),
    ("admin", Some("users")),
    ("config", Some("chunks")),
    ("local", None),
    ("shop", Some("system.views")),
    ("shop", Some("$cmd")),
];

fn arb_pre_image() -> impl Strategy<Value = FullDocumentBeforeChangeMode> {
    prop_oneof![
        Just(FullDocumentBeforeChangeMode::Off),
        Just(FullDocumentBeforeChangeMode::WhenAvailable),
        Just(FullDocumentBeforeChangeMode::Required),
    ]
}

proptest! {
    #[test]
    fn two_tokens_always_conflict(
        ns_index in 0..NAMESPACES.len(),
        on_router in any::<bool>(),
        needs_merge in any::<bool>(),
        standalone in any::<bool>(),
        pre_image in arb_pre_image(),
        flags in any::<[bool; 4]>(),
        op_time in proptest::option::of(any::<u32>()),
        from_invalidate in any::<bool>(),
    ) {
        let (database, collection) = NAMESPACES[ns_index];
        let namespace = match collection {
            Some(collection) => Namespace::new(database, collection),
            None => Namespace::database(database),
        };

        let mut builder = ExecutionContext::builder(namespace, Arc::new(FixedClock::new(ts(100))))
            .needs_merge(needs_merge);
        if on_router {
            builder = builder.router();
        }
        if standalone {
            builder = builder.replication_mode(ReplicationMode::None);
        }
        let ctx = builder.build();

        let mut token = ResumeToken::event(ts(5));
        if from_invalidate {
            token = token.from_invalidate();
        }
        let token = token.build();

        let spec = ChangeStreamSpec {
            resume_after: Some(token.to_document()),
            start_after: Some(token.to_document()),
            start_at_operation_time: op_time.map(ts),
            full_document_before_change: pre_image,
            all_changes_for_cluster: flags[0],
            allow_to_run_on_config_db: flags[1],
            allow_to_run_on_system_ns: flags[2],
            show_migration_events: flags[3],
            ..Default::default()
        };

        let err = validate(&spec, &ctx).unwrap_err();
        prop_assert_eq!(err.code, ErrorCode::ResumeAfterAndStartAfter);
    }
}
