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

//! Start-position resolution.
//!
//! A stream either resumes from a position the client supplied, or starts
//! one tick after the most recent committed operation. On a data node that
//! is the node's last applied optime; on the router it is the cluster time,
//! so every shard in the fan-out starts from the same instant.
//!
//! The synthesized time is written into a copy of the spec
//! (`startAtOperationTime`), so re-serializing that copy for the shards
//! preserves the exact start point chosen here.

use crate::context::ExecutionContext;
use crate::error::{ErrorCode, InternalInvariantError, Result};
use crate::resume_token::{add_ticks, ResumeToken};
use crate::spec::ChangeStreamSpec;
use bson::Timestamp;
use tracing::{debug, error};

/// Outcome of [`resolve_start`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStart {
    /// Spec with a start position guaranteed to be present
    pub spec: ChangeStreamSpec,

    /// Position the stream starts from
    pub token: ResumeToken,

    /// `true` if the position was synthesized from the clock
    pub synthesized: bool,
}

/// Returns the start time for a stream opened without a position: one tick
/// past the latest committed operation visible to this process.
///
/// # Errors
///
/// Returns [`ErrorCode::LogicalClockOverflow`] if the clock is exhausted.
pub fn start_time_for_new_stream(
    ctx: &ExecutionContext,
) -> std::result::Result<Timestamp, InternalInvariantError> {
    let current = if ctx.is_router() {
        ctx.clock.cluster_time()
    } else {
        ctx.clock.last_applied_op_time()
    };

    // Starting at `current` itself would deliver that operation again.
    add_ticks(current, 1)
}

/// Resolves the starting position of `spec`.
///
/// # Errors
///
/// - [`ErrorCode::InvalidResumeToken`] if a supplied token is malformed
/// - an [`InternalInvariantError`] if the clock is exhausted or the
///   synthesized token is not a plain high-water mark
pub fn resolve_start(spec: &ChangeStreamSpec, ctx: &ExecutionContext) -> Result<ResolvedStart> {
    if spec.has_start_position() {
        let token = spec.resolve_resume_token()?;
        debug!(%token, "Using client supplied start position");
        return Ok(ResolvedStart {
            spec: spec.clone(),
            token,
            synthesized: false,
        });
    }

    let start_time = start_time_for_new_stream(ctx)?;
    let spec = spec.with_start_at_operation_time(start_time);
    let token = spec.resolve_resume_token()?;

    // Synthesized tokens bypass the validator, so the properties it would
    // have enforced are checked here instead.
    if !token.is_high_water_mark() || token.is_from_invalidate() {
        error!(%token, role = %ctx.role, "Synthesized start token is not a high water mark");
        return Err(InternalInvariantError::new(
            ErrorCode::SynthesizedTokenNotHighWaterMark,
            format!("synthesized start token {token} must be a non-invalidating high water mark"),
        )
        .into());
    }

    debug!(
        time = start_time.time,
        increment = start_time.increment,
        role = %ctx.role,
        "Synthesized start position for new stream"
    );

    Ok(ResolvedStart {
        spec,
        token,
        synthesized: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FixedClock;
    use crate::namespace::Namespace;
    use bson::doc;
    use std::sync::Arc;

    fn ts(time: u32, increment: u32) -> Timestamp {
        Timestamp { time, increment }
    }

    fn ctx(router: bool) -> ExecutionContext {
        let clock = Arc::new(FixedClock::with_times(ts(100, 5), ts(200, 9)));
        let builder = ExecutionContext::builder(Namespace::new("db", "coll"), clock);
        if router {
            builder.router().build()
        } else {
            builder.build()
        }
    }

    #[test]
    fn test_data_node_uses_last_applied() {
        let resolved = resolve_start(&ChangeStreamSpec::default(), &ctx(false)).unwrap();
        assert!(resolved.synthesized);
        assert_eq!(resolved.token, ResumeToken::high_water_mark(ts(100, 6)));
        assert_eq!(resolved.spec.start_at_operation_time, Some(ts(100, 6)));
    }

    #[test]
    fn test_router_uses_cluster_time() {
        let resolved = resolve_start(&ChangeStreamSpec::default(), &ctx(true)).unwrap();
        assert_eq!(resolved.token, ResumeToken::high_water_mark(ts(200, 10)));
        assert_eq!(resolved.spec.start_at_operation_time, Some(ts(200, 10)));
    }

    #[test]
    fn test_supplied_position_is_kept() {
        let token = ResumeToken::event(ts(50, 1)).build();
        let spec = ChangeStreamSpec::builder()
            .start_after(&token)
            .build()
            .unwrap();

        let resolved = resolve_start(&spec, &ctx(false)).unwrap();
        assert!(!resolved.synthesized);
        assert_eq!(resolved.token, token);
        assert_eq!(resolved.spec, spec);
    }

    #[test]
    fn test_malformed_token_is_config_error() {
        let spec = ChangeStreamSpec {
            resume_after: Some(doc! { "_data": "01ff" }),
            ..Default::default()
        };
        let err = resolve_start(&spec, &ctx(false)).unwrap_err();
        assert!(err.is_config());
        assert_eq!(err.code(), ErrorCode::InvalidResumeToken);
    }

    #[test]
    fn test_exhausted_clock() {
        let clock = Arc::new(FixedClock::new(ts(u32::MAX, u32::MAX)));
        let ctx = ExecutionContext::builder(Namespace::database("db"), clock).build();
        let err = resolve_start(&ChangeStreamSpec::default(), &ctx).unwrap_err();
        assert_eq!(err.code(), ErrorCode::LogicalClockOverflow);
    }
}
