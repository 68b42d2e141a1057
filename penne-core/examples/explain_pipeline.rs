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

//! Explain a Change Stream Pipeline
//!
//! Assembles a few `$changeStream` requests in different contexts and prints
//! the explain output of each resulting pipeline as JSON.
//!
//! # Running the Example
//!
//! ```bash
//! cargo run --example explain_pipeline
//! RUST_LOG=penne_core=debug cargo run --example explain_pipeline
//! ```

use bson::{doc, Bson, Timestamp};
use penne_core::assembler::{open_change_stream, AssembledPipeline};
use penne_core::context::{ExecutionContext, FixedClock};
use penne_core::namespace::Namespace;
use penne_core::resume_token::ResumeToken;
use std::error::Error;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> Result<(), Box<dyn Error>> {
    init_logging();

    info!("🚀 Penne change stream explain");
    info!("");

    let clock = Arc::new(FixedClock::with_times(
        Timestamp {
            time: 1_700_000_000,
            increment: 12,
        },
        Timestamp {
            time: 1_700_000_003,
            increment: 1,
        },
    ));

    // New collection stream on a data node
    let shard = ExecutionContext::builder(Namespace::new("shop", "orders"), clock.clone()).build();
    let pipeline = open_change_stream(&Bson::Document(doc! {}), &shard)?;
    explain("shop.orders on a data node", &pipeline)?;

    // Whole-cluster stream through the router with post-images
    let router = ExecutionContext::builder(Namespace::cluster(), clock.clone())
        .router()
        .build();
    let pipeline = open_change_stream(
        &Bson::Document(doc! {
            "allChangesForCluster": true,
            "fullDocument": "updateLookup",
        }),
        &router,
    )?;
    explain("whole cluster through the router", &pipeline)?;

    let (on_shards, on_router) = pipeline.split_at_topology_boundary();
    info!(
        shard_stages = on_shards.len(),
        router_stages = on_router.len(),
        "✂️  Split at topology boundary"
    );
    info!("");

    // Resume a database stream from a saved token
    let saved = ResumeToken::event(Timestamp {
        time: 1_699_999_990,
        increment: 4,
    })
    .build();
    info!(token = %saved, data = %saved.to_hex(), "💾 Resuming from saved token");
    let db = ExecutionContext::builder(Namespace::database("shop"), clock).build();
    let pipeline = open_change_stream(
        &Bson::Document(doc! { "resumeAfter": saved.to_document() }),
        &db,
    )?;
    explain("shop resumed after an event", &pipeline)?;

    // An illegal request
    match open_change_stream(
        &Bson::Document(doc! { "fullDocumentBeforeChange": "required" }),
        &router,
    ) {
        Ok(_) => warn!("⚠️  Expected the request to be rejected"),
        Err(e) => info!(code = e.code().as_i32(), error = %e, "🚫 Rejected"),
    }

    info!("👋 Example completed!");
    Ok(())
}

fn explain(title: &str, pipeline: &AssembledPipeline) -> Result<(), Box<dyn Error>> {
    info!("📋 {title}");
    info!(start = %pipeline.start_token, stages = pipeline.stages.len(), "   Assembled");

    let stages: Vec<_> = pipeline
        .to_documents()
        .into_iter()
        .map(|stage| Bson::Document(stage).into_relaxed_extjson())
        .collect();
    println!("{}", serde_json::to_string_pretty(&stages)?);
    info!("");
    Ok(())
}

/// Initialize structured logging
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,penne_core=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();
}
