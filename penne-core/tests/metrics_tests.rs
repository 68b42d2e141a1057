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

//! Tests for metrics instrumentation module.

use penne_core::error::{ChangeStreamError, ConfigError, ErrorCode, InternalInvariantError};
use penne_core::metrics::{
    self, Timer, ASSEMBLY_DURATION_SECONDS, CONFIG_ERRORS_TOTAL, METRIC_PREFIX,
    PIPELINES_ASSEMBLED_TOTAL,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_metric_names() {
    // Ensure all metric names follow conventions
    assert!(PIPELINES_ASSEMBLED_TOTAL.starts_with(METRIC_PREFIX));
    assert!(PIPELINES_ASSEMBLED_TOTAL.ends_with("_total"));
    assert!(CONFIG_ERRORS_TOTAL.ends_with("_total"));
    assert!(ASSEMBLY_DURATION_SECONDS.ends_with("_seconds"));
}

#[test]
fn test_timer_records_on_drop() {
    let recorded = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&recorded);

    {
        let _timer = Timer::new(move |duration: Duration| {
            assert!(duration >= Duration::ZERO);
            flag.store(true, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(1));
    }

    assert!(recorded.load(Ordering::SeqCst));
}

#[test]
fn test_helpers_without_recorder() {
    // With no recorder installed these are no-ops and must not panic
    metrics::init_metrics();
    metrics::increment_pipelines_assembled("cluster", "router");
    metrics::increment_synthesized_starts("router");
    metrics::record_pipeline_stages(9);
    metrics::record_assembly_duration(Duration::from_millis(2));

    let config: ChangeStreamError =
        ConfigError::new(ErrorCode::InvalidNamespace, "internal database").into();
    let internal: ChangeStreamError =
        InternalInvariantError::new(ErrorCode::LogicalClockOverflow, "clock exhausted").into();
    metrics::increment_errors(&config);
    metrics::increment_errors(&internal);
}
