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

//! Penne Core - Change Stream Pipeline Assembly
//!
//! This crate turns a `$changeStream` request into the ordered list of
//! internal stages that implement it, and defines the resume token protocol
//! used to restart a stream exactly where it left off.
//!
//! # Key Components
//!
//! - **Resume tokens**: [`resume_token`] encodes stream positions into
//!   byte strings whose order matches the order of the positions
//! - **Scope**: [`scope`] classifies the target namespace and builds the
//!   namespace filter
//! - **Validation**: [`validate`] rejects illegal requests with stable codes
//! - **Start position**: [`start`] picks where a new stream begins
//! - **Assembly**: [`assembler`] builds the stage list
//!
//! # Example
//!
//! ```rust
//! use bson::Timestamp;
//! use penne_core::assembler::assemble;
//! use penne_core::context::{ExecutionContext, FixedClock};
//! use penne_core::namespace::Namespace;
//! use penne_core::spec::{ChangeStreamSpec, FullDocumentMode};
//! use std::sync::Arc;
//!
//! let clock = Arc::new(FixedClock::new(Timestamp { time: 1_700_000_000, increment: 4 }));
//! let ctx = ExecutionContext::builder(Namespace::new("shop", "orders"), clock)
//!     .router()
//!     .build();
//!
//! let spec = ChangeStreamSpec::builder()
//!     .full_document(FullDocumentMode::UpdateLookup)
//!     .build()
//!     .unwrap();
//!
//! let pipeline = assemble(&spec, &ctx).unwrap();
//! for stage in &pipeline.stages {
//!     println!("{stage}");
//! }
//! ```

pub mod assembler;
pub mod context;
pub mod error;
pub mod metrics;
pub mod namespace;
pub mod resume_token;
pub mod scope;
pub mod spec;
pub mod stage;
pub mod start;
pub mod validate;

pub use assembler::{assemble, open_change_stream, AssembledPipeline};
pub use error::{ChangeStreamError, ConfigError, ErrorCode, InternalInvariantError, Result};
pub use resume_token::ResumeToken;
