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

//! Tests for `$changeStream` argument parsing and start position resolution.

use bson::{doc, Bson, Timestamp};
use penne_core::error::ErrorCode;
use penne_core::resume_token::ResumeToken;
use penne_core::spec::{ChangeStreamSpec, FullDocumentBeforeChangeMode, FullDocumentMode};

fn ts(time: u32, increment: u32) -> Timestamp {
    Timestamp { time, increment }
}

#[test]
fn test_parse_empty_argument() {
    let spec = ChangeStreamSpec::parse(&doc! {}).unwrap();
    assert_eq!(spec, ChangeStreamSpec::default());
    assert_eq!(spec.full_document, FullDocumentMode::Default);
    assert_eq!(
        spec.full_document_before_change,
        FullDocumentBeforeChangeMode::Off
    );
}

#[test]
fn test_parse_flags() {
    let spec = ChangeStreamSpec::parse(&doc! {
        "fullDocument": "updateLookup",
        "fullDocumentBeforeChange": "required",
        "allowToRunOnConfigDB": true,
        "allowToRunOnSystemNS": true,
        "showMigrationEvents": true,
    })
    .unwrap();

    assert!(spec.wants_post_image());
    assert!(spec.wants_pre_image());
    assert!(spec.allow_to_run_on_config_db);
    assert!(spec.allow_to_run_on_system_ns);
    assert!(spec.show_migration_events);
}

#[test]
fn test_parse_rejects_wrong_types() {
    let err = ChangeStreamSpec::parse(&doc! { "allChangesForCluster": "yes" }).unwrap_err();
    assert_eq!(err.code, ErrorCode::FailedToParse);
    assert_eq!(err.code.as_i32(), 9);
}

#[test]
fn test_start_after_wins_over_resume_after() {
    let older = ResumeToken::event(ts(1, 0)).build();
    let newer = ResumeToken::event(ts(2, 0)).build();
    let spec = ChangeStreamSpec {
        resume_after: Some(older.to_document()),
        start_after: Some(newer.to_document()),
        ..Default::default()
    };

    assert_eq!(spec.resolve_resume_token().unwrap(), newer);
}

#[test]
fn test_operation_time_resolves_to_high_water_mark() {
    let spec = ChangeStreamSpec::builder()
        .start_at_operation_time(ts(7, 7))
        .build()
        .unwrap();
    assert_eq!(
        spec.resolve_resume_token().unwrap(),
        ResumeToken::high_water_mark(ts(7, 7))
    );
}

#[test]
fn test_no_start_position_is_internal_error() {
    let err = ChangeStreamSpec::default()
        .resolve_resume_token()
        .unwrap_err();
    assert!(!err.is_config());
    assert_eq!(err.code(), ErrorCode::MissingStartPosition);
}

#[test]
fn test_stage_document() {
    let token = ResumeToken::event(ts(3, 1)).build();
    let spec = ChangeStreamSpec::builder().start_after(&token).build().unwrap();
    let stage = spec.to_stage_document();

    let body = stage.get_document("$changeStream").unwrap();
    assert_eq!(
        body.get("startAfter"),
        Some(&Bson::Document(token.to_document()))
    );
    assert_eq!(body.get_str("fullDocument").unwrap(), "default");
    assert_eq!(body.get_str("fullDocumentBeforeChange").unwrap(), "off");
}
