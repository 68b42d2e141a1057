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

//! Metrics instrumentation for change stream assembly.
//!
//! Uses the `metrics` facade; install any exporter (Prometheus, StatsD, ...)
//! in the host process to collect them. Without a recorder every call is a
//! no-op.
//!
//! # Naming Conventions
//!
//! - Prefixed with `penne_`
//! - Counters end with `_total`
//! - Unit suffix where one applies (`_seconds`)
//!
//! # Labels
//!
//! - **scope**: `collection`, `database` or `cluster`
//! - **role**: `router` or `data_node`
//! - **code**: symbolic error code name (bounded set)
//!
//! # Example
//!
//! ```rust
//! use penne_core::metrics;
//!
//! metrics::init_metrics();
//! metrics::increment_pipelines_assembled("collection", "data_node");
//! metrics::record_pipeline_stages(5);
//! ```

use crate::error::ChangeStreamError;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

/// Metric name prefix for all Penne metrics.
#[doc(hidden)]
pub const METRIC_PREFIX: &str = "penne";

/// Pipelines assembled successfully.
///
/// Type: Counter
/// Labels: scope, role
#[doc(hidden)]
pub const PIPELINES_ASSEMBLED_TOTAL: &str = "penne_pipelines_assembled_total";

/// Requests rejected with a configuration error.
///
/// Type: Counter
/// Labels: code
#[doc(hidden)]
pub const CONFIG_ERRORS_TOTAL: &str = "penne_config_errors_total";

/// Assemblies aborted by an internal invariant violation.
///
/// Type: Counter
/// Labels: code
const INTERNAL_INVARIANT_ERRORS_TOTAL: &str = "penne_internal_invariant_errors_total";

/// Streams whose start position was synthesized from the clock.
///
/// Type: Counter
/// Labels: role
const SYNTHESIZED_STARTS_TOTAL: &str = "penne_synthesized_starts_total";

/// Number of stages in assembled pipelines.
///
/// Type: Histogram
/// Unit: count
const PIPELINE_STAGES: &str = "penne_pipeline_stages";

/// Time spent validating and assembling.
///
/// Type: Histogram
/// Unit: seconds
#[doc(hidden)]
pub const ASSEMBLY_DURATION_SECONDS: &str = "penne_assembly_duration_seconds";

/// Describes all metrics for exporters. Call once at startup.
pub fn init_metrics() {
    describe_counter!(
        PIPELINES_ASSEMBLED_TOTAL,
        "Total number of change stream pipelines assembled"
    );

    describe_counter!(
        CONFIG_ERRORS_TOTAL,
        "Total number of change stream requests rejected as illegal"
    );

    describe_counter!(
        INTERNAL_INVARIANT_ERRORS_TOTAL,
        "Total number of assemblies aborted by an internal invariant violation"
    );

    describe_counter!(
        SYNTHESIZED_STARTS_TOTAL,
        "Total number of streams started from a synthesized high water mark"
    );

    describe_histogram!(
        PIPELINE_STAGES,
        metrics::Unit::Count,
        "Number of internal stages per assembled change stream pipeline"
    );

    describe_histogram!(
        ASSEMBLY_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time taken to validate a change stream request and assemble its stages"
    );
}

/// Counts a successful assembly.
pub fn increment_pipelines_assembled(scope: &'static str, role: &'static str) {
    counter!(PIPELINES_ASSEMBLED_TOTAL, "scope" => scope, "role" => role).increment(1);
}

/// Counts a failed request, split by error kind.
pub fn increment_errors(error: &ChangeStreamError) {
    let code = error.code().name();
    if error.is_config() {
        counter!(CONFIG_ERRORS_TOTAL, "code" => code).increment(1);
    } else {
        counter!(INTERNAL_INVARIANT_ERRORS_TOTAL, "code" => code).increment(1);
    }
}

/// Counts a synthesized start position.
pub fn increment_synthesized_starts(role: &'static str) {
    counter!(SYNTHESIZED_STARTS_TOTAL, "role" => role).increment(1);
}

/// Records the number of stages in a pipeline.
#[allow(clippy::cast_precision_loss)]
pub fn record_pipeline_stages(count: usize) {
    histogram!(PIPELINE_STAGES).record(count as f64);
}

/// Records how long an assembly took.
pub fn record_assembly_duration(duration: Duration) {
    histogram!(ASSEMBLY_DURATION_SECONDS).record(duration.as_secs_f64());
}

/// Calls `record_fn` with the elapsed time when dropped.
///
/// ```rust
/// use penne_core::metrics::{self, Timer};
///
/// {
///     let _timer = Timer::new(metrics::record_assembly_duration);
///     // ... assemble ...
/// }
/// ```
pub struct Timer<F>
where
    F: FnOnce(Duration),
{
    start: std::time::Instant,
    record_fn: Option<F>,
}

impl<F> Timer<F>
where
    F: FnOnce(Duration),
{
    /// Starts timing.
    pub fn new(record_fn: F) -> Self {
        Self {
            start: std::time::Instant::now(),
            record_fn: Some(record_fn),
        }
    }
}

impl<F> Drop for Timer<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        if let Some(record_fn) = self.record_fn.take() {
            record_fn(duration);
        }
    }
}
