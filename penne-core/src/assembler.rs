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

//! Change stream pipeline assembly.
//!
//! [`assemble`] turns a validated request into the ordered list of internal
//! stages:
//!
//! ```text
//! OplogMatch -> UnwindTransaction -> Transform -> CheckInvalidate
//!   -> [CheckResumability]        high-water-mark start, or router
//!   -> [CheckTopologyChange]      router
//!   -> [AddPostImage]             fullDocument: updateLookup
//!   -> [HandleTopologyChange]     router; shard/router split point
//!   -> [EnsureResumeTokenPresent] resuming from an event
//!   -> [AddPreImage]              fullDocumentBeforeChange != off
//! ```
//!
//! Assembly is all-or-nothing: either the full list is returned or an error.
//!
//! # Example
//!
//! ```rust
//! use bson::{doc, Bson, Timestamp};
//! use penne_core::assembler::open_change_stream;
//! use penne_core::context::{ExecutionContext, FixedClock};
//! use penne_core::namespace::Namespace;
//! use penne_core::stage::StageKind;
//! use std::sync::Arc;
//!
//! let clock = Arc::new(FixedClock::new(Timestamp { time: 100, increment: 0 }));
//! let ctx = ExecutionContext::builder(Namespace::new("shop", "orders"), clock).build();
//!
//! let pipeline = open_change_stream(&Bson::Document(doc! {}), &ctx).unwrap();
//! assert_eq!(pipeline.stage_kinds()[0], StageKind::OplogMatch);
//! ```

use crate::context::ExecutionContext;
use crate::error::{ChangeStreamError, ConfigError, ErrorCode, InternalInvariantError, Result};
use crate::metrics::{self, Timer};
use crate::resume_token::ResumeToken;
use crate::scope::namespace_match_pattern;
use crate::spec::ChangeStreamSpec;
use crate::stage::{StageDescriptor, StageKind};
use crate::start::{resolve_start, ResolvedStart};
use crate::validate::validate;
use bson::{Bson, Document};
use tracing::{debug, error, info, instrument};

/// Output of [`assemble`].
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPipeline {
    /// Stages in execution order
    pub stages: Vec<StageDescriptor>,

    /// Spec with its start position filled in
    pub spec: ChangeStreamSpec,

    /// Position the stream starts from
    pub start_token: ResumeToken,
}

impl AssembledPipeline {
    /// Stage kinds in order.
    #[must_use]
    pub fn stage_kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(StageDescriptor::kind).collect()
    }

    /// Returns `true` if a stage of `kind` is present.
    #[must_use]
    pub fn contains(&self, kind: StageKind) -> bool {
        self.stages.iter().any(|stage| stage.kind() == kind)
    }

    /// Splits into the part that runs on each shard and the part that runs
    /// on the router. The router part starts at `HandleTopologyChange`; if
    /// that stage is absent the whole pipeline runs on the shard.
    #[must_use]
    pub fn split_at_topology_boundary(&self) -> (&[StageDescriptor], &[StageDescriptor]) {
        let boundary = self
            .stages
            .iter()
            .position(|stage| stage.kind() == StageKind::HandleTopologyChange)
            .unwrap_or(self.stages.len());
        self.stages.split_at(boundary)
    }

    /// Explain form of every stage.
    #[must_use]
    pub fn to_documents(&self) -> Vec<Document> {
        self.stages.iter().map(StageDescriptor::to_document).collect()
    }
}

/// Parses the raw `$changeStream` argument and assembles its pipeline.
///
/// # Errors
///
/// - [`ErrorCode::StageArgumentNotDocument`] if `argument` is not a document
/// - any error from [`ChangeStreamSpec::parse`] or [`assemble`]
pub fn open_change_stream(argument: &Bson, ctx: &ExecutionContext) -> Result<AssembledPipeline> {
    let parsed = match argument {
        Bson::Document(document) => ChangeStreamSpec::parse(document),
        other => Err(ConfigError::new(
            ErrorCode::StageArgumentNotDocument,
            format!(
                "the $changeStream stage specification must be an object, got {:?}",
                other.element_type()
            ),
        )),
    };

    match parsed {
        Ok(spec) => assemble(&spec, ctx),
        Err(e) => {
            let e = ChangeStreamError::from(e);
            metrics::increment_errors(&e);
            debug!(error = %e, "Failed to parse $changeStream argument");
            Err(e)
        }
    }
}

/// Validates `spec`, resolves its start position and builds the stages.
///
/// # Errors
///
/// - a [`ConfigError`] if the request is illegal in `ctx`
/// - an [`InternalInvariantError`] if an assembly invariant is broken
#[instrument(skip(spec, ctx), fields(namespace = %ctx.namespace, role = %ctx.role))]
pub fn assemble(spec: &ChangeStreamSpec, ctx: &ExecutionContext) -> Result<AssembledPipeline> {
    let _timer = Timer::new(metrics::record_assembly_duration);

    let result = validate(spec, ctx)
        .map_err(ChangeStreamError::from)
        .and_then(|()| resolve_start(spec, ctx))
        .and_then(|resolved| {
            if resolved.synthesized {
                metrics::increment_synthesized_starts(ctx.role.as_str());
            }
            build_stages(resolved, ctx)
        });

    match &result {
        Ok(pipeline) => {
            let scope = ctx.scope();
            metrics::increment_pipelines_assembled(scope.as_str(), ctx.role.as_str());
            metrics::record_pipeline_stages(pipeline.stages.len());
            info!(
                scope = %scope,
                start = %pipeline.start_token,
                stages = pipeline.stages.len(),
                "Change stream pipeline assembled"
            );
        }
        Err(e) => {
            metrics::increment_errors(e);
            if e.is_config() {
                debug!(error = %e, "Change stream request rejected");
            } else {
                error!(error = %e, spec = ?spec, context = ?ctx, "Change stream assembly failed");
            }
        }
    }

    result
}

/// Builds the stage list for an already validated and resolved request.
pub(crate) fn build_stages(
    resolved: ResolvedStart,
    ctx: &ExecutionContext,
) -> Result<AssembledPipeline> {
    let ResolvedStart { spec, token, .. } = resolved;
    let scope = ctx.scope();
    let pattern = namespace_match_pattern(&ctx.namespace);
    let starts_at_high_water_mark = token.is_high_water_mark();

    let mut stages = Vec::with_capacity(10);

    stages.push(StageDescriptor::OplogMatch {
        pattern: pattern.clone(),
        scope,
        start: token.clone(),
        show_migration_events: spec.show_migration_events,
    });
    stages.push(StageDescriptor::UnwindTransaction { pattern });

    let transform = StageDescriptor::transform(&spec)?;
    if let StageDescriptor::Transform {
        initial_post_batch_resume_token: None,
        ..
    } = transform
    {
        return Err(InternalInvariantError::new(
            ErrorCode::MissingPostBatchResumeToken,
            "the transform stage did not produce an initial post-batch resume token",
        )
        .into());
    }
    stages.push(transform);

    let start_after_invalidate = spec
        .decoded_start_after()?
        .filter(ResumeToken::is_from_invalidate);
    stages.push(StageDescriptor::CheckInvalidate {
        start_after_invalidate,
    });

    if starts_at_high_water_mark || ctx.is_router() {
        stages.push(StageDescriptor::CheckResumability {
            resume_token: token.clone(),
        });
    }

    if ctx.is_router() {
        stages.push(StageDescriptor::CheckTopologyChange);
    }

    if spec.wants_post_image() {
        stages.push(StageDescriptor::AddPostImage {
            full_document: spec.full_document,
        });
    }

    if ctx.is_router() {
        stages.push(StageDescriptor::HandleTopologyChange);
    }

    if !starts_at_high_water_mark {
        stages.push(StageDescriptor::EnsureResumeTokenPresent {
            resume_token: token.clone(),
        });
    }

    if spec.wants_pre_image() {
        if ctx.is_merging() {
            return Err(InternalInvariantError::new(
                ErrorCode::PreImageInMergingContext,
                "pre-image lookup must run on a data node whose output is not merged",
            )
            .into());
        }
        stages.push(StageDescriptor::AddPreImage {
            mode: spec.full_document_before_change,
        });
    }

    Ok(AssembledPipeline {
        stages,
        spec,
        start_token: token,
    })
}
