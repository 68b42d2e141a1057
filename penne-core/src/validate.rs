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

//! Legality checks for a change stream request.
//!
//! Every check is independent; all must pass. They run in the fixed order of
//! [`CHECKS`], so the same input always reports the same violation.
//!
//! | Check | Code |
//! |-------|------|
//! | one starting position | `ResumeAfterAndStartAfter` (50865), `MultipleResumeOptions` (40674) |
//! | replica set or router | `NotReplicaSet` (40573) |
//! | whole-cluster flag only on collectionless `admin` | `InvalidOptions` (72) |
//! | no internal database | `InvalidNamespace` (73) |
//! | no internal collection | `InvalidNamespace` (73) |
//! | no pre-images when merging | `PreImageNotSupportedWhenMerging` (51771) |
//! | no migration events on router | `MigrationEventsOnRouter` (31123) |
//! | `resumeAfter` not from an invalidate | `InvalidResumeToken` (260) |
//! | single-collection token names its collection | `InvalidResumeToken` (260) |

use crate::context::ExecutionContext;
use crate::error::{ConfigError, ErrorCode};
use crate::spec::ChangeStreamSpec;
use tracing::debug;

type Check = fn(&ChangeStreamSpec, &ExecutionContext) -> Result<(), ConfigError>;

/// All legality checks, in evaluation order.
pub const CHECKS: &[(&str, Check)] = &[
    ("start_options", check_start_options),
    ("replica_set", check_replica_set),
    ("whole_cluster", check_whole_cluster),
    ("internal_database", check_internal_database),
    ("internal_collection", check_internal_collection),
    ("pre_image", check_pre_image),
    ("migration_events", check_migration_events),
    ("resume_after_invalidate", check_resume_after_invalidate),
    ("collection_uuid", check_collection_uuid),
];

/// Validates `spec` against `ctx`.
///
/// # Errors
///
/// Returns the first violated check as a [`ConfigError`].
pub fn validate(spec: &ChangeStreamSpec, ctx: &ExecutionContext) -> Result<(), ConfigError> {
    for (name, check) in CHECKS {
        if let Err(e) = check(spec, ctx) {
            debug!(check = *name, code = %e.code, namespace = %ctx.namespace, "Change stream rejected");
            return Err(e);
        }
    }
    Ok(())
}

fn check_replica_set(_spec: &ChangeStreamSpec, ctx: &ExecutionContext) -> Result<(), ConfigError> {
    if ctx.is_router() || ctx.is_replica_set_member() {
        return Ok(());
    }
    Err(ConfigError::new(
        ErrorCode::NotReplicaSet,
        "The $changeStream stage is only supported on replica sets",
    ))
}

fn check_whole_cluster(spec: &ChangeStreamSpec, ctx: &ExecutionContext) -> Result<(), ConfigError> {
    let ns = &ctx.namespace;
    if !spec.all_changes_for_cluster || (ns.is_admin_db() && ns.is_collectionless()) {
        return Ok(());
    }
    Err(ConfigError::new(
        ErrorCode::InvalidOptions,
        format!(
            "A $changeStream with 'allChangesForCluster:true' may only be opened on the \
             'admin' database, and with no collection name; found {ns}"
        ),
    ))
}

// Also enforces the converse of the whole-cluster check: `admin` is only
// reachable with the flag set.
fn check_internal_database(
    spec: &ChangeStreamSpec,
    ctx: &ExecutionContext,
) -> Result<(), ConfigError> {
    let ns = &ctx.namespace;
    let allowed = if ns.is_admin_db() {
        spec.all_changes_for_cluster
    } else {
        !ns.is_local_db() && (!ns.is_config_db() || spec.allow_to_run_on_config_db)
    };

    if allowed {
        return Ok(());
    }
    Err(ConfigError::new(
        ErrorCode::InvalidNamespace,
        format!(
            "$changeStream may not be opened on the internal {} database",
            ns.database
        ),
    ))
}

fn check_internal_collection(
    spec: &ChangeStreamSpec,
    ctx: &ExecutionContext,
) -> Result<(), ConfigError> {
    let ns = &ctx.namespace;
    if !ns.is_internal_collection() || (spec.allow_to_run_on_system_ns && !ctx.is_router()) {
        return Ok(());
    }
    let suffix = if spec.allow_to_run_on_system_ns {
        " through the router"
    } else {
        ""
    };
    Err(ConfigError::new(
        ErrorCode::InvalidNamespace,
        format!("$changeStream may not be opened on the internal {ns} collection{suffix}"),
    ))
}

fn check_pre_image(spec: &ChangeStreamSpec, ctx: &ExecutionContext) -> Result<(), ConfigError> {
    if !(spec.wants_pre_image() && ctx.is_merging()) {
        return Ok(());
    }
    Err(ConfigError::new(
        ErrorCode::PreImageNotSupportedWhenMerging,
        "the 'fullDocumentBeforeChange' option is not supported when results are merged \
         across shards",
    ))
}

fn check_migration_events(
    spec: &ChangeStreamSpec,
    ctx: &ExecutionContext,
) -> Result<(), ConfigError> {
    if !(ctx.is_router() && spec.show_migration_events) {
        return Ok(());
    }
    Err(ConfigError::new(
        ErrorCode::MigrationEventsOnRouter,
        "Change streams opened through the router may not show migration events",
    ))
}

fn check_start_options(spec: &ChangeStreamSpec, _ctx: &ExecutionContext) -> Result<(), ConfigError> {
    spec.check_start_options()
}

fn check_resume_after_invalidate(
    spec: &ChangeStreamSpec,
    _ctx: &ExecutionContext,
) -> Result<(), ConfigError> {
    match spec.decoded_resume_after()? {
        Some(token) if token.is_from_invalidate() => Err(ConfigError::new(
            ErrorCode::InvalidResumeToken,
            "Attempting to resume a change stream using 'resumeAfter' is not allowed from an \
             invalidate notification",
        )),
        _ => Ok(()),
    }
}

fn check_collection_uuid(spec: &ChangeStreamSpec, ctx: &ExecutionContext) -> Result<(), ConfigError> {
    if !ctx.scope().is_single_collection() {
        return Ok(());
    }
    let Some(token) = spec.decoded_event_resume_token()? else {
        return Ok(());
    };
    if token.is_high_water_mark() {
        return Ok(());
    }

    match (token.collection_uuid(), ctx.collection_uuid) {
        (None, _) => Err(ConfigError::new(
            ErrorCode::InvalidResumeToken,
            "Attempted to resume a single-collection stream, but the resume token does not \
             include a UUID",
        )),
        (Some(found), Some(expected)) if found != expected => Err(ConfigError::new(
            ErrorCode::InvalidResumeToken,
            format!(
                "Attempted to resume a stream on {} with a resume token for collection {found}, \
                 expected {expected}",
                ctx.namespace
            ),
        )),
        _ => Ok(()),
    }
}
