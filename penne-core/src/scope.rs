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

//! Change stream scope resolution.
//!
//! The scope of a change stream is never configured directly: it is derived
//! from the namespace the stream is opened on.
//!
//! | Target namespace | Scope | Log entries matched |
//! |------------------|-------|---------------------|
//! | `db.coll` | [`ChangeStreamScope::SingleCollection`] | exactly `db.coll` |
//! | `db` | [`ChangeStreamScope::SingleDatabase`] | non-internal collections of `db` |
//! | `admin` | [`ChangeStreamScope::WholeCluster`] | non-internal collections of non-internal databases |
//!
//! # Examples
//!
//! ```rust
//! use penne_core::namespace::Namespace;
//! use penne_core::scope::{classify, namespace_match_pattern, ChangeStreamScope};
//!
//! let ns = Namespace::database("shop");
//! assert_eq!(classify(&ns), ChangeStreamScope::SingleDatabase);
//!
//! let pattern = namespace_match_pattern(&ns);
//! assert!(pattern.matches(&Namespace::new("shop", "orders")));
//! assert!(!pattern.matches(&Namespace::new("shop", "system.views")));
//! assert!(!pattern.matches(&Namespace::new("billing", "orders")));
//! ```

use crate::namespace::{is_internal_collection_name, is_internal_database_name, Namespace};
use std::fmt;

/// Regex fragment rejecting internal collection names.
const REGEX_ALL_COLLECTIONS: &str = r"(?!(system\.|.*\$cmd$))";

/// Regex fragment matching any database other than the internal ones.
const REGEX_ALL_DBS: &str = r"^(?!(admin|config|local)\.)[^.]+";

/// Characters escaped when embedding a literal name in a regex.
const REGEX_ESCAPES: &str = "*+|()^?[]./\\$";

/// The breadth of a change stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeStreamScope {
    /// One collection, opened as `db.coll`
    SingleCollection,

    /// Every non-internal collection of one database
    SingleDatabase,

    /// Every non-internal collection of every non-internal database
    WholeCluster,
}

impl ChangeStreamScope {
    /// Returns `true` for single-collection streams.
    #[must_use]
    pub fn is_single_collection(self) -> bool {
        matches!(self, Self::SingleCollection)
    }

    /// Returns `true` for whole-cluster streams.
    #[must_use]
    pub fn is_whole_cluster(self) -> bool {
        matches!(self, Self::WholeCluster)
    }

    /// Returns a short label suitable for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleCollection => "collection",
            Self::SingleDatabase => "database",
            Self::WholeCluster => "cluster",
        }
    }
}

impl fmt::Display for ChangeStreamScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies the namespace a stream is opened on.
///
/// `WholeCluster` iff the namespace is `admin` with no collection,
/// `SingleDatabase` iff no collection is named, `SingleCollection` otherwise.
#[must_use]
pub fn classify(namespace: &Namespace) -> ChangeStreamScope {
    match &namespace.collection {
        None if namespace.is_admin_db() => ChangeStreamScope::WholeCluster,
        None => ChangeStreamScope::SingleDatabase,
        Some(_) => ChangeStreamScope::SingleCollection,
    }
}

/// Namespace filter applied by the log-match stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NamespacePattern {
    /// Exactly one `db.coll`, internal or not
    Exact {
        /// Target database
        database: String,
        /// Target collection
        collection: String,
    },

    /// Non-internal collections of one database
    Database {
        /// Target database
        database: String,
    },

    /// Non-internal collections of every non-internal database
    AllDatabases,
}

impl NamespacePattern {
    /// Returns `true` if a log entry on `namespace` passes this filter.
    ///
    /// Log entries always name a collection; collectionless namespaces never match.
    #[must_use]
    pub fn matches(&self, namespace: &Namespace) -> bool {
        let Some(collection) = namespace.collection.as_deref() else {
            return false;
        };

        match self {
            Self::Exact {
                database,
                collection: target,
            } => namespace.database == *database && collection == target,
            Self::Database { database } => {
                namespace.database == *database && !is_internal_collection_name(collection)
            }
            Self::AllDatabases => {
                !namespace.database.is_empty()
                    && !namespace.database.contains('.')
                    && !is_internal_database_name(&namespace.database)
                    && !is_internal_collection_name(collection)
            }
        }
    }

    /// Renders the pattern as the regex the log-match stage applies to `ns`.
    #[must_use]
    pub fn to_regex(&self) -> String {
        match self {
            Self::Exact {
                database,
                collection,
            } => format!(
                "^{}\\.{}$",
                regex_escape(database),
                regex_escape(collection)
            ),
            Self::Database { database } => {
                format!("^{}\\.{}", regex_escape(database), REGEX_ALL_COLLECTIONS)
            }
            Self::AllDatabases => format!("{REGEX_ALL_DBS}\\.{REGEX_ALL_COLLECTIONS}"),
        }
    }
}

impl fmt::Display for NamespacePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_regex())
    }
}

/// Derives the log-match namespace filter for a stream opened on `namespace`.
#[must_use]
pub fn namespace_match_pattern(namespace: &Namespace) -> NamespacePattern {
    match (classify(namespace), &namespace.collection) {
        (ChangeStreamScope::SingleCollection, Some(collection)) => NamespacePattern::Exact {
            database: namespace.database.clone(),
            collection: collection.clone(),
        },
        (ChangeStreamScope::WholeCluster, _) => NamespacePattern::AllDatabases,
        _ => NamespacePattern::Database {
            database: namespace.database.clone(),
        },
    }
}

fn regex_escape(source: &str) -> String {
    let mut escaped = String::with_capacity(source.len());
    for c in source.chars() {
        if REGEX_ESCAPES.contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
