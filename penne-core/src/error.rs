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

//! Error types for change stream validation and assembly.
//!
//! Opening a change stream can fail in exactly two ways:
//!
//! - [`ConfigError`]: the request is not legal in the current context, or a
//!   supplied resume token is malformed. The caller must change the request.
//! - [`InternalInvariantError`]: an internal assumption was violated. This is
//!   a defect in a collaborator, never a user error.
//!
//! Both carry a stable [`ErrorCode`] that is surfaced verbatim to clients.
//! Neither kind is retryable.
//!
//! # Example
//!
//! ```rust
//! use penne_core::error::{ChangeStreamError, ConfigError, ErrorCode};
//!
//! let err: ChangeStreamError = ConfigError::new(
//!     ErrorCode::ResumeAfterAndStartAfter,
//!     "Do not specify both 'resumeAfter' and 'startAfter'",
//! )
//! .into();
//!
//! assert_eq!(err.code(), ErrorCode::ResumeAfterAndStartAfter);
//! assert_eq!(err.code().as_i32(), 50865);
//! assert!(!err.is_retryable());
//! ```

use std::fmt;
use thiserror::Error;

/// Stable diagnostic codes reported to clients.
///
/// The numeric values are part of the public contract and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    /// The request could not be parsed.
    FailedToParse,

    /// An option was used where it is not allowed.
    InvalidOptions,

    /// The stream targets a namespace it may not be opened on.
    InvalidNamespace,

    /// A resume token is malformed or cannot be used for this stream.
    InvalidResumeToken,

    /// The spec contains a field this version does not understand.
    UnknownField,

    /// Execution is neither on the router nor on a replica set member.
    NotReplicaSet,

    /// The `$changeStream` argument was not a document.
    StageArgumentNotDocument,

    /// Pre-image lookup requested where results are merged across shards.
    PreImageNotSupportedWhenMerging,

    /// Migration events requested through the router.
    MigrationEventsOnRouter,

    /// Both `resumeAfter` and `startAfter` were supplied.
    ResumeAfterAndStartAfter,

    /// A resume token and `startAtOperationTime` were both supplied.
    MultipleResumeOptions,

    /// The transform stage did not produce an initial post-batch resume token.
    MissingPostBatchResumeToken,

    /// A start position was required but none was present in the spec.
    MissingStartPosition,

    /// A pre-image stage was requested for a merging context.
    PreImageInMergingContext,

    /// A synthesized start token was not a plain high-water mark.
    SynthesizedTokenNotHighWaterMark,

    /// Advancing the logical clock overflowed.
    LogicalClockOverflow,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        match self {
            Self::FailedToParse => 9,
            Self::InvalidOptions => 72,
            Self::InvalidNamespace => 73,
            Self::InvalidResumeToken => 260,
            Self::UnknownField => 40415,
            Self::NotReplicaSet => 40573,
            Self::StageArgumentNotDocument => 50808,
            Self::PreImageNotSupportedWhenMerging => 51771,
            Self::MigrationEventsOnRouter => 31123,
            Self::ResumeAfterAndStartAfter => 50865,
            Self::MultipleResumeOptions => 40674,
            Self::MissingPostBatchResumeToken => 5_666_900,
            Self::MissingStartPosition => 5_666_901,
            Self::PreImageInMergingContext => 5_666_902,
            Self::SynthesizedTokenNotHighWaterMark => 5_666_903,
            Self::LogicalClockOverflow => 5_666_904,
        }
    }

    /// Returns the symbolic name, suitable for metric labels.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::FailedToParse => "FailedToParse",
            Self::InvalidOptions => "InvalidOptions",
            Self::InvalidNamespace => "InvalidNamespace",
            Self::InvalidResumeToken => "InvalidResumeToken",
            Self::UnknownField => "UnknownField",
            Self::NotReplicaSet => "NotReplicaSet",
            Self::StageArgumentNotDocument => "StageArgumentNotDocument",
            Self::PreImageNotSupportedWhenMerging => "PreImageNotSupportedWhenMerging",
            Self::MigrationEventsOnRouter => "MigrationEventsOnRouter",
            Self::ResumeAfterAndStartAfter => "ResumeAfterAndStartAfter",
            Self::MultipleResumeOptions => "MultipleResumeOptions",
            Self::MissingPostBatchResumeToken => "MissingPostBatchResumeToken",
            Self::MissingStartPosition => "MissingStartPosition",
            Self::PreImageInMergingContext => "PreImageInMergingContext",
            Self::SynthesizedTokenNotHighWaterMark => "SynthesizedTokenNotHighWaterMark",
            Self::LogicalClockOverflow => "LogicalClockOverflow",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_i32())
    }
}

/// The requested change stream is not legal in the given context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} [{code}]")]
pub struct ConfigError {
    /// Stable diagnostic code
    pub code: ErrorCode,

    /// Human-readable explanation
    pub message: String,
}

impl ConfigError {
    /// Creates a configuration error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// An internal consistency assumption was violated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("internal invariant violated: {message} [{code}]")]
pub struct InternalInvariantError {
    /// Stable diagnostic code
    pub code: ErrorCode,

    /// Diagnostic context
    pub message: String,
}

impl InternalInvariantError {
    /// Creates an internal invariant error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Any failure produced while opening a change stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChangeStreamError {
    /// The request must be corrected by the caller
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A collaborator broke its contract
    #[error(transparent)]
    Internal(#[from] InternalInvariantError),
}

impl ChangeStreamError {
    /// Returns the stable diagnostic code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Config(e) => e.code,
            Self::Internal(e) => e.code,
        }
    }

    /// Returns the human-readable message without the code suffix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Config(e) => &e.message,
            Self::Internal(e) => &e.message,
        }
    }

    /// Always `false`: the core never retries, the caller decides.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Returns `true` if the caller must change its request.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns the error category for metrics/logging.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "configuration",
            Self::Internal(_) => "internal_invariant",
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = ChangeStreamError> = std::result::Result<T, E>;
