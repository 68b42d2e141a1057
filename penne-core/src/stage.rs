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

//! Logical stages of an assembled change stream pipeline.
//!
//! A `$changeStream` request expands into a fixed sequence of internal
//! stages. This module only describes them: each [`StageDescriptor`] names a
//! stage kind and the parameters it was built with. Execution belongs to the
//! engine that consumes the list.

use crate::error::Result;
use crate::resume_token::ResumeToken;
use crate::scope::{ChangeStreamScope, NamespacePattern};
use crate::spec::{ChangeStreamSpec, FullDocumentBeforeChangeMode, FullDocumentMode};
use bson::{doc, Document};
use std::fmt;

/// Identity of a stage, independent of its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Filters raw log entries by namespace and start position
    OplogMatch,
    /// Expands transactions into one entry per operation
    UnwindTransaction,
    /// Converts log entries into change events; produces resume tokens
    Transform,
    /// Emits invalidate events
    CheckInvalidate,
    /// Verifies the log still reaches back to the start position
    CheckResumability,
    /// Diverts topology change events to the router
    CheckTopologyChange,
    /// Looks up the post-image for updates
    AddPostImage,
    /// Router-side split point; reacts to new shards
    HandleTopologyChange,
    /// Verifies the resumed event is still in the stream
    EnsureResumeTokenPresent,
    /// Looks up the pre-image
    AddPreImage,
}

impl StageKind {
    /// Internal stage name, as shown in explain output.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::OplogMatch => "$_internalChangeStreamOplogMatch",
            Self::UnwindTransaction => "$_internalChangeStreamUnwindTransaction",
            Self::Transform => "$_internalChangeStreamTransform",
            Self::CheckInvalidate => "$_internalChangeStreamCheckInvalidate",
            Self::CheckResumability => "$_internalChangeStreamCheckResumability",
            Self::CheckTopologyChange => "$_internalChangeStreamCheckTopologyChange",
            Self::AddPostImage => "$_internalChangeStreamAddPostImage",
            Self::HandleTopologyChange => "$_internalChangeStreamHandleTopologyChange",
            Self::EnsureResumeTokenPresent => "$_internalChangeStreamEnsureResumeTokenPresent",
            Self::AddPreImage => "$_internalChangeStreamAddPreImage",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One logical processing step and its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum StageDescriptor {
    /// Filters raw log entries.
    OplogMatch {
        /// Namespaces whose entries pass
        pattern: NamespacePattern,
        /// Scope the pattern was derived for
        scope: ChangeStreamScope,
        /// Entries before this position are skipped
        start: ResumeToken,
        /// Keep chunk migration entries
        show_migration_events: bool,
    },

    /// Expands multi-operation transactions in their original order.
    UnwindTransaction {
        /// Operations inside a transaction are filtered by the same pattern
        pattern: NamespacePattern,
    },

    /// Shapes change events and produces their resume tokens.
    Transform {
        /// The resolved spec, serialized for re-parsing on shards
        spec: ChangeStreamSpec,
        /// Token reported before the first event is produced
        initial_post_batch_resume_token: Option<ResumeToken>,
    },

    /// Emits invalidate events.
    CheckInvalidate {
        /// Invalidate the stream was started after, which must not be re-emitted
        start_after_invalidate: Option<ResumeToken>,
    },

    /// Fails the stream if history before `resume_token` was truncated.
    CheckResumability {
        /// Position being resumed from
        resume_token: ResumeToken,
    },

    /// Diverts topology change events to the router.
    CheckTopologyChange,

    /// Looks up post-images.
    AddPostImage {
        /// Configured post-image mode
        full_document: FullDocumentMode,
    },

    /// Router-side split point.
    HandleTopologyChange,

    /// Swallows events up to and including the resumed one.
    EnsureResumeTokenPresent {
        /// Event that must be observed
        resume_token: ResumeToken,
    },

    /// Looks up pre-images.
    AddPreImage {
        /// Configured pre-image mode; never `Off`
        mode: FullDocumentBeforeChangeMode,
    },
}

impl StageDescriptor {
    /// Builds the transform stage. The initial post-batch resume token is the
    /// spec's starting position, if it has one.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::InvalidResumeToken`](crate::error::ErrorCode) if
    /// the starting token cannot be decoded.
    pub fn transform(spec: &ChangeStreamSpec) -> Result<Self> {
        let initial_post_batch_resume_token = if spec.has_start_position() {
            Some(spec.resolve_resume_token()?)
        } else {
            None
        };

        Ok(Self::Transform {
            spec: spec.clone(),
            initial_post_batch_resume_token,
        })
    }

    /// Stage identity.
    #[must_use]
    pub fn kind(&self) -> StageKind {
        match self {
            Self::OplogMatch { .. } => StageKind::OplogMatch,
            Self::UnwindTransaction { .. } => StageKind::UnwindTransaction,
            Self::Transform { .. } => StageKind::Transform,
            Self::CheckInvalidate { .. } => StageKind::CheckInvalidate,
            Self::CheckResumability { .. } => StageKind::CheckResumability,
            Self::CheckTopologyChange => StageKind::CheckTopologyChange,
            Self::AddPostImage { .. } => StageKind::AddPostImage,
            Self::HandleTopologyChange => StageKind::HandleTopologyChange,
            Self::EnsureResumeTokenPresent { .. } => StageKind::EnsureResumeTokenPresent,
            Self::AddPreImage { .. } => StageKind::AddPreImage,
        }
    }

    /// Internal stage name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Renders the stage for explain output.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let body = match self {
            Self::OplogMatch {
                pattern,
                scope,
                start,
                show_migration_events,
            } => doc! {
                "nsRegex": pattern.to_regex(),
                "scope": scope.as_str(),
                "startAt": start.to_document(),
                "showMigrationEvents": *show_migration_events,
            },
            Self::UnwindTransaction { pattern } => doc! { "nsRegex": pattern.to_regex() },
            Self::Transform { spec, .. } => spec.to_document(),
            Self::CheckInvalidate {
                start_after_invalidate,
            } => match start_after_invalidate {
                Some(token) => doc! { "startAfterInvalidate": token.to_document() },
                None => Document::new(),
            },
            Self::CheckResumability { resume_token }
            | Self::EnsureResumeTokenPresent { resume_token } => {
                doc! { "resumeToken": resume_token.to_document() }
            }
            Self::CheckTopologyChange | Self::HandleTopologyChange => Document::new(),
            Self::AddPostImage { full_document } => doc! { "fullDocument": full_document.as_str() },
            Self::AddPreImage { mode } => doc! { "fullDocumentBeforeChange": mode.as_str() },
        };

        let mut document = Document::new();
        document.insert(self.name(), body);
        document
    }
}

impl fmt::Display for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
