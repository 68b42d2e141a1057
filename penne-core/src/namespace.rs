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

//! Target namespaces for change streams.
//!
//! A change stream is opened against a database, optionally narrowed to a
//! single collection. Opening without a collection (`{aggregate: 1}`) yields a
//! database-wide stream, or a cluster-wide one on the `admin` database.
//!
//! # Examples
//!
//! ```rust
//! use penne_core::namespace::Namespace;
//!
//! let ns = Namespace::parse("shop.orders");
//! assert_eq!(ns.database, "shop");
//! assert_eq!(ns.collection.as_deref(), Some("orders"));
//! assert_eq!(ns.full_name(), "shop.orders");
//!
//! let db = Namespace::parse("shop");
//! assert!(db.is_collectionless());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// The administrative database; cluster-wide streams are opened here.
pub const ADMIN_DB: &str = "admin";

/// The internal cluster configuration database.
pub const CONFIG_DB: &str = "config";

/// The node-local database holding the replicated log itself.
pub const LOCAL_DB: &str = "local";

/// Prefix reserved for internal collections.
pub const SYSTEM_COLLECTION_PREFIX: &str = "system.";

/// Suffix reserved for command-result bookkeeping collections.
pub const COMMAND_COLLECTION_SUFFIX: &str = "$cmd";

/// A database name with an optional collection component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    /// Database name
    #[serde(rename = "db")]
    pub database: String,

    /// Collection name, absent for database- and cluster-wide streams
    #[serde(rename = "coll", skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

impl Namespace {
    /// Creates a namespace for a single collection.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: Some(collection.into()),
        }
    }

    /// Creates a collectionless namespace for a whole database.
    pub fn database(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: None,
        }
    }

    /// Creates the collectionless `admin` namespace used by cluster-wide streams.
    #[must_use]
    pub fn cluster() -> Self {
        Self::database(ADMIN_DB)
    }

    /// Parses `"db"` or `"db.collection"`. The collection may itself contain dots.
    #[must_use]
    pub fn parse(full_name: &str) -> Self {
        match full_name.split_once('.') {
            Some((db, coll)) if !coll.is_empty() => Self::new(db, coll),
            Some((db, _)) => Self::database(db),
            None => Self::database(full_name),
        }
    }

    /// Returns `"database.collection"`, or just the database name.
    #[must_use]
    pub fn full_name(&self) -> String {
        match &self.collection {
            Some(coll) => format!("{}.{}", self.database, coll),
            None => self.database.clone(),
        }
    }

    /// Returns `true` if no collection was named.
    #[inline]
    #[must_use]
    pub fn is_collectionless(&self) -> bool {
        self.collection.is_none()
    }

    /// Returns `true` for the `admin` database.
    #[inline]
    #[must_use]
    pub fn is_admin_db(&self) -> bool {
        self.database == ADMIN_DB
    }

    /// Returns `true` for the `config` database.
    #[inline]
    #[must_use]
    pub fn is_config_db(&self) -> bool {
        self.database == CONFIG_DB
    }

    /// Returns `true` for the `local` database.
    #[inline]
    #[must_use]
    pub fn is_local_db(&self) -> bool {
        self.database == LOCAL_DB
    }

    /// Returns `true` for any of `admin`, `config` or `local`.
    #[must_use]
    pub fn is_internal_db(&self) -> bool {
        is_internal_database_name(&self.database)
    }

    /// Returns `true` if the collection is reserved for internal use.
    #[must_use]
    pub fn is_internal_collection(&self) -> bool {
        self.collection
            .as_deref()
            .is_some_and(is_internal_collection_name)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// Returns `true` if `name` is one of the internal databases.
#[must_use]
pub fn is_internal_database_name(name: &str) -> bool {
    matches!(name, ADMIN_DB | CONFIG_DB | LOCAL_DB)
}

/// Returns `true` if `name` starts with `system.` or ends with `$cmd`.
#[must_use]
pub fn is_internal_collection_name(name: &str) -> bool {
    name.starts_with(SYSTEM_COLLECTION_PREFIX) || name.ends_with(COMMAND_COLLECTION_SUFFIX)
}
