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

//! Shared fixtures for the Penne benchmarks.

use bson::Timestamp;
use penne_core::context::{ExecutionContext, FixedClock};
use penne_core::namespace::Namespace;
use penne_core::resume_token::ResumeToken;
use std::sync::Arc;

/// Base time used by every fixture.
pub const BENCH_TIME: Timestamp = Timestamp {
    time: 1_700_000_000,
    increment: 1,
};

/// Data node context for `namespace`.
#[must_use]
pub fn data_node(namespace: Namespace) -> ExecutionContext {
    ExecutionContext::builder(namespace, Arc::new(FixedClock::new(BENCH_TIME))).build()
}

/// Router context for `namespace`.
#[must_use]
pub fn router(namespace: Namespace) -> ExecutionContext {
    ExecutionContext::builder(namespace, Arc::new(FixedClock::new(BENCH_TIME)))
        .router()
        .build()
}

/// `count` event tokens with increasing positions and a mix of optional fields.
#[must_use]
pub fn sample_tokens(count: usize) -> Vec<ResumeToken> {
    (0..count)
        .map(|i| {
            #[allow(clippy::cast_possible_truncation)]
            let ts = Timestamp {
                time: BENCH_TIME.time + (i / 16) as u32,
                increment: (i % 16) as u32,
            };
            let builder = ResumeToken::event(ts).txn_op_index((i % 4) as u64);
            if i % 3 == 0 {
                builder
                    .collection_uuid(uuid_for(i))
                    .event_identifier(format!("doc-{i}").into_bytes())
                    .build()
            } else {
                builder.build()
            }
        })
        .collect()
}

fn uuid_for(i: usize) -> uuid::Uuid {
    uuid::Uuid::from_u128(i as u128)
}
