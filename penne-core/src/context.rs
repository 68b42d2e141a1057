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

//! Execution context for one change stream assembly.
//!
//! The context describes where the assembly runs (router or data node),
//! whether its results are merged with other shards, what namespace is
//! targeted, and how to read the clock. It is owned by the caller and only
//! read during assembly.
//!
//! ```rust
//! use bson::Timestamp;
//! use penne_core::context::{ExecutionContext, FixedClock, ProcessRole};
//! use penne_core::namespace::Namespace;
//! use std::sync::Arc;
//!
//! let clock = Arc::new(FixedClock::new(Timestamp { time: 100, increment: 0 }));
//! let ctx = ExecutionContext::builder(Namespace::new("shop", "orders"), clock)
//!     .role(ProcessRole::Router)
//!     .build();
//!
//! assert!(ctx.is_router());
//! assert!(ctx.is_merging());
//! ```

use crate::namespace::Namespace;
use crate::scope::{classify, ChangeStreamScope};
use bson::Timestamp;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Read access to the clocks used to pick a start time.
///
/// Implementations must be safe to call concurrently; each call is treated
/// as an atomic snapshot.
pub trait ClusterClock: Send + Sync {
    /// Timestamp of the last operation applied by this node.
    fn last_applied_op_time(&self) -> Timestamp;

    /// Current cluster-wide logical time, as known by the router.
    fn cluster_time(&self) -> Timestamp;
}

/// A clock that always reports the same times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock {
    last_applied: Timestamp,
    cluster_time: Timestamp,
}

impl FixedClock {
    /// Reports `ts` for both clocks.
    #[must_use]
    pub fn new(ts: Timestamp) -> Self {
        Self {
            last_applied: ts,
            cluster_time: ts,
        }
    }

    /// Reports different node and cluster times.
    #[must_use]
    pub fn with_times(last_applied: Timestamp, cluster_time: Timestamp) -> Self {
        Self {
            last_applied,
            cluster_time,
        }
    }
}

impl ClusterClock for FixedClock {
    fn last_applied_op_time(&self) -> Timestamp {
        self.last_applied
    }

    fn cluster_time(&self) -> Timestamp {
        self.cluster_time
    }
}

/// Which tier the assembly runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProcessRole {
    /// Stateless router fanning out to shards
    Router,

    /// Data-bearing node
    #[default]
    DataNode,
}

impl ProcessRole {
    /// Label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::DataNode => "data_node",
        }
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replication mode of a data node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReplicationMode {
    /// Member of a replica set
    #[default]
    ReplicaSet,

    /// Standalone node without a replicated log
    None,
}

/// Per-stream environment.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Router or data node
    pub role: ProcessRole,

    /// Whether this node's output is merged with other shards' output
    pub needs_merge: bool,

    /// Replication mode; only meaningful on data nodes
    pub replication_mode: ReplicationMode,

    /// Namespace the stream was opened on
    pub namespace: Namespace,

    /// UUID of the target collection, when known
    pub collection_uuid: Option<Uuid>,

    /// Clock accessor used to synthesize start times
    pub clock: Arc<dyn ClusterClock>,
}

impl ExecutionContext {
    /// Creates a builder; defaults to a non-merging replica-set data node.
    pub fn builder(namespace: Namespace, clock: Arc<dyn ClusterClock>) -> ExecutionContextBuilder {
        ExecutionContextBuilder {
            role: ProcessRole::DataNode,
            needs_merge: false,
            replication_mode: ReplicationMode::ReplicaSet,
            namespace,
            collection_uuid: None,
            clock,
        }
    }

    /// Returns `true` on the router.
    #[must_use]
    pub fn is_router(&self) -> bool {
        self.role == ProcessRole::Router
    }

    /// Returns `true` if results are merged across shards: always on the
    /// router, and on data nodes whose output is merged.
    #[must_use]
    pub fn is_merging(&self) -> bool {
        self.is_router() || self.needs_merge
    }

    /// Returns `true` on a replica-set data node.
    #[must_use]
    pub fn is_replica_set_member(&self) -> bool {
        self.role == ProcessRole::DataNode && self.replication_mode == ReplicationMode::ReplicaSet
    }

    /// Scope derived from the target namespace.
    #[must_use]
    pub fn scope(&self) -> ChangeStreamScope {
        classify(&self.namespace)
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("role", &self.role)
            .field("needs_merge", &self.needs_merge)
            .field("replication_mode", &self.replication_mode)
            .field("namespace", &self.namespace)
            .field("collection_uuid", &self.collection_uuid)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ExecutionContext`].
pub struct ExecutionContextBuilder {
    role: ProcessRole,
    needs_merge: bool,
    replication_mode: ReplicationMode,
    namespace: Namespace,
    collection_uuid: Option<Uuid>,
    clock: Arc<dyn ClusterClock>,
}

impl ExecutionContextBuilder {
    /// Sets the process role.
    #[must_use]
    pub fn role(mut self, role: ProcessRole) -> Self {
        self.role = role;
        self
    }

    /// Shorthand for `role(ProcessRole::Router)`.
    #[must_use]
    pub fn router(self) -> Self {
        self.role(ProcessRole::Router)
    }

    /// Marks this data node's output as merged with other shards.
    #[must_use]
    pub fn needs_merge(mut self, needs_merge: bool) -> Self {
        self.needs_merge = needs_merge;
        self
    }

    /// Sets the replication mode.
    #[must_use]
    pub fn replication_mode(mut self, mode: ReplicationMode) -> Self {
        self.replication_mode = mode;
        self
    }

    /// Sets the UUID of the target collection.
    #[must_use]
    pub fn collection_uuid(mut self, uuid: Uuid) -> Self {
        self.collection_uuid = Some(uuid);
        self
    }

    /// Builds the context.
    #[must_use]
    pub fn build(self) -> ExecutionContext {
        ExecutionContext {
            role: self.role,
            needs_merge: self.needs_merge,
            replication_mode: self.replication_mode,
            namespace: self.namespace,
            collection_uuid: self.collection_uuid,
            clock: self.clock,
        }
    }
}
