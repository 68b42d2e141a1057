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

//! User-facing change stream configuration.
//!
//! [`ChangeStreamSpec`] is the decoded argument of a `$changeStream` stage.
//! It can be parsed from the request document or built programmatically:
//!
//! ```rust
//! use bson::{doc, Timestamp};
//! use penne_core::spec::{ChangeStreamSpec, FullDocumentMode};
//!
//! let parsed = ChangeStreamSpec::parse(&doc! {
//!     "fullDocument": "updateLookup",
//!     "startAtOperationTime": Timestamp { time: 100, increment: 1 },
//! })
//! .unwrap();
//!
//! let built = ChangeStreamSpec::builder()
//!     .full_document_update_lookup()
//!     .start_at_operation_time(Timestamp { time: 100, increment: 1 })
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(parsed, built);
//! assert_eq!(built.full_document, FullDocumentMode::UpdateLookup);
//! ```
//!
//! # Starting Position
//!
//! At most one of `resumeAfter`, `startAfter` and `startAtOperationTime` may
//! be set. When none is set, the start-position resolver fills in
//! `startAtOperationTime` on a copy of the spec, so that the copy sent to every
//! shard names the same instant.

use crate::error::{ConfigError, ErrorCode, InternalInvariantError};
use crate::resume_token::ResumeToken;
use bson::{doc, Bson, Document, Timestamp};
use serde::{Deserialize, Serialize};

/// Field names accepted in a `$changeStream` argument.
const KNOWN_FIELDS: &[&str] = &[
    "resumeAfter",
    "startAfter",
    "startAtOperationTime",
    "fullDocument",
    "fullDocumentBeforeChange",
    "allChangesForCluster",
    "allowToRunOnConfigDB",
    "allowToRunOnSystemNS",
    "showMigrationEvents",
];

/// Post-image behavior for update events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FullDocumentMode {
    /// Only inserts and replaces carry the full document
    #[default]
    Default,

    /// Updates look up the current version of the document
    UpdateLookup,
}

impl FullDocumentMode {
    /// Wire name of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::UpdateLookup => "updateLookup",
        }
    }
}

/// Pre-image behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FullDocumentBeforeChangeMode {
    /// No pre-image lookup
    #[default]
    Off,

    /// Attach the pre-image if one was recorded
    WhenAvailable,

    /// Fail the stream if a pre-image is missing
    Required,
}

impl FullDocumentBeforeChangeMode {
    /// Wire name of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::WhenAvailable => "whenAvailable",
            Self::Required => "required",
        }
    }
}

/// Decoded `$changeStream` argument.
///
/// Resume tokens are kept in their client document form (`{ "_data": ... }`)
/// and decoded on demand, so a malformed token surfaces as a
/// [`ConfigError`] during validation rather than during parsing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStreamSpec {
    /// Resume after this event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_after: Option<Document>,

    /// Start after this event, which may be an invalidate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_after: Option<Document>,

    /// Start at this cluster time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at_operation_time: Option<Timestamp>,

    /// Post-image mode
    #[serde(default)]
    pub full_document: FullDocumentMode,

    /// Pre-image mode
    #[serde(default)]
    pub full_document_before_change: FullDocumentBeforeChangeMode,

    /// Stream every database; only legal on collectionless `admin`
    #[serde(default)]
    pub all_changes_for_cluster: bool,

    /// Permit streams on the `config` database
    #[serde(default, rename = "allowToRunOnConfigDB")]
    pub allow_to_run_on_config_db: bool,

    /// Permit streams on internal collections (not through the router)
    #[serde(default, rename = "allowToRunOnSystemNS")]
    pub allow_to_run_on_system_ns: bool,

    /// Surface chunk migration events (not through the router)
    #[serde(default)]
    pub show_migration_events: bool,
}

impl ChangeStreamSpec {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> ChangeStreamSpecBuilder {
        ChangeStreamSpecBuilder::default()
    }

    /// Parses a `$changeStream` argument document.
    ///
    /// # Errors
    ///
    /// - [`ErrorCode::UnknownField`] for fields this version does not know
    /// - [`ErrorCode::FailedToParse`] for fields of the wrong type or value
    pub fn parse(document: &Document) -> Result<Self, ConfigError> {
        if let Some(unknown) = document
            .keys()
            .find(|key| !KNOWN_FIELDS.contains(&key.as_str()))
        {
            return Err(ConfigError::new(
                ErrorCode::UnknownField,
                format!("$changeStream: unrecognized field '{unknown}'"),
            ));
        }

        bson::from_document(document.clone()).map_err(|e| {
            ConfigError::new(
                ErrorCode::FailedToParse,
                format!("$changeStream: failed to parse specification: {e}"),
            )
        })
    }

    /// Serializes the spec back into a `$changeStream` argument document.
    ///
    /// Defaults are written explicitly for the two modes so the shard side
    /// never has to guess them.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut document = Document::new();
        if let Some(token) = &self.resume_after {
            document.insert("resumeAfter", token.clone());
        }
        if let Some(token) = &self.start_after {
            document.insert("startAfter", token.clone());
        }
        if let Some(ts) = self.start_at_operation_time {
            document.insert("startAtOperationTime", Bson::Timestamp(ts));
        }
        document.insert("fullDocument", self.full_document.as_str());
        document.insert(
            "fullDocumentBeforeChange",
            self.full_document_before_change.as_str(),
        );
        if self.all_changes_for_cluster {
            document.insert("allChangesForCluster", true);
        }
        if self.allow_to_run_on_config_db {
            document.insert("allowToRunOnConfigDB", true);
        }
        if self.allow_to_run_on_system_ns {
            document.insert("allowToRunOnSystemNS", true);
        }
        if self.show_migration_events {
            document.insert("showMigrationEvents", true);
        }
        document
    }

    /// Wraps [`ChangeStreamSpec::to_document`] as a `$changeStream` stage.
    #[must_use]
    pub fn to_stage_document(&self) -> Document {
        doc! { "$changeStream": self.to_document() }
    }

    /// Returns `true` if any starting position was supplied.
    #[must_use]
    pub fn has_start_position(&self) -> bool {
        self.resume_after.is_some()
            || self.start_after.is_some()
            || self.start_at_operation_time.is_some()
    }

    /// Returns `true` if updates should look up the post-image.
    #[must_use]
    pub fn wants_post_image(&self) -> bool {
        self.full_document == FullDocumentMode::UpdateLookup
    }

    /// Returns `true` if a pre-image lookup is requested.
    #[must_use]
    pub fn wants_pre_image(&self) -> bool {
        self.full_document_before_change != FullDocumentBeforeChangeMode::Off
    }

    /// Decodes `resumeAfter`, if present.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::InvalidResumeToken`] if the token is malformed.
    pub fn decoded_resume_after(&self) -> Result<Option<ResumeToken>, ConfigError> {
        self.resume_after
            .as_ref()
            .map(ResumeToken::from_document)
            .transpose()
    }

    /// Decodes `startAfter`, if present.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::InvalidResumeToken`] if the token is malformed.
    pub fn decoded_start_after(&self) -> Result<Option<ResumeToken>, ConfigError> {
        self.start_after
            .as_ref()
            .map(ResumeToken::from_document)
            .transpose()
    }

    /// Decodes whichever of `startAfter` or `resumeAfter` is set, preferring `startAfter`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::InvalidResumeToken`] if the token is malformed.
    pub fn decoded_event_resume_token(&self) -> Result<Option<ResumeToken>, ConfigError> {
        match self.decoded_start_after()? {
            Some(token) => Ok(Some(token)),
            None => self.decoded_resume_after(),
        }
    }

    /// Resolves the starting position named by this spec.
    ///
    /// `startAfter` wins over `resumeAfter`, which wins over
    /// `startAtOperationTime` (returned as a high-water mark).
    ///
    /// # Errors
    ///
    /// - [`ErrorCode::InvalidResumeToken`] if a token is malformed
    /// - [`ErrorCode::MissingStartPosition`] if no position is set at all
    pub fn resolve_resume_token(&self) -> crate::error::Result<ResumeToken> {
        if let Some(token) = self.decoded_event_resume_token()? {
            return Ok(token);
        }
        if let Some(ts) = self.start_at_operation_time {
            return Ok(ResumeToken::high_water_mark(ts));
        }
        Err(InternalInvariantError::new(
            ErrorCode::MissingStartPosition,
            "expected one of 'startAfter', 'resumeAfter' or 'startAtOperationTime' to be \
             populated in $changeStream spec",
        )
        .into())
    }

    /// Returns a copy with `startAtOperationTime` set.
    #[must_use]
    pub fn with_start_at_operation_time(&self, ts: Timestamp) -> Self {
        Self {
            start_at_operation_time: Some(ts),
            ..self.clone()
        }
    }

    /// Checks that at most one starting-position mechanism is used.
    ///
    /// # Errors
    ///
    /// - [`ErrorCode::ResumeAfterAndStartAfter`] if both tokens are set
    /// - [`ErrorCode::MultipleResumeOptions`] if a token and a start time are set
    pub fn check_start_options(&self) -> Result<(), ConfigError> {
        if self.resume_after.is_some() && self.start_after.is_some() {
            return Err(ConfigError::new(
                ErrorCode::ResumeAfterAndStartAfter,
                "Do not specify both 'resumeAfter' and 'startAfter' in a $changeStream stage",
            ));
        }

        let has_token = self.resume_after.is_some() || self.start_after.is_some();
        if has_token && self.start_at_operation_time.is_some() {
            return Err(ConfigError::new(
                ErrorCode::MultipleResumeOptions,
                "Only one type of resume option is allowed, but multiple were found",
            ));
        }

        Ok(())
    }
}

/// Builder for [`ChangeStreamSpec`].
#[derive(Debug, Default)]
pub struct ChangeStreamSpecBuilder {
    spec: ChangeStreamSpec,
}

impl ChangeStreamSpecBuilder {
    /// Resumes after the given event token.
    #[must_use]
    pub fn resume_after(mut self, token: &ResumeToken) -> Self {
        self.spec.resume_after = Some(token.to_document());
        self
    }

    /// Resumes after a token in raw document form.
    #[must_use]
    pub fn resume_after_document(mut self, token: Document) -> Self {
        self.spec.resume_after = Some(token);
        self
    }

    /// Starts after the given token, which may come from an invalidate.
    #[must_use]
    pub fn start_after(mut self, token: &ResumeToken) -> Self {
        self.spec.start_after = Some(token.to_document());
        self
    }

    /// Starts after a token in raw document form.
    #[must_use]
    pub fn start_after_document(mut self, token: Document) -> Self {
        self.spec.start_after = Some(token);
        self
    }

    /// Starts at the given cluster time.
    #[must_use]
    pub fn start_at_operation_time(mut self, ts: Timestamp) -> Self {
        self.spec.start_at_operation_time = Some(ts);
        self
    }

    /// Sets the post-image mode.
    #[must_use]
    pub fn full_document(mut self, mode: FullDocumentMode) -> Self {
        self.spec.full_document = mode;
        self
    }

    /// Shorthand for `full_document(FullDocumentMode::UpdateLookup)`.
    #[must_use]
    pub fn full_document_update_lookup(self) -> Self {
        self.full_document(FullDocumentMode::UpdateLookup)
    }

    /// Sets the pre-image mode.
    #[must_use]
    pub fn full_document_before_change(mut self, mode: FullDocumentBeforeChangeMode) -> Self {
        self.spec.full_document_before_change = mode;
        self
    }

    /// Streams every database (open on collectionless `admin`).
    #[must_use]
    pub fn all_changes_for_cluster(mut self) -> Self {
        self.spec.all_changes_for_cluster = true;
        self
    }

    /// Permits the `config` database.
    #[must_use]
    pub fn allow_to_run_on_config_db(mut self) -> Self {
        self.spec.allow_to_run_on_config_db = true;
        self
    }

    /// Permits internal collections.
    #[must_use]
    pub fn allow_to_run_on_system_ns(mut self) -> Self {
        self.spec.allow_to_run_on_system_ns = true;
        self
    }

    /// Surfaces migration events.
    #[must_use]
    pub fn show_migration_events(mut self) -> Self {
        self.spec.show_migration_events = true;
        self
    }

    /// Builds the spec.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if more than one starting position is set.
    pub fn build(self) -> Result<ChangeStreamSpec, ConfigError> {
        self.spec.check_start_options()?;
        Ok(self.spec)
    }
}
