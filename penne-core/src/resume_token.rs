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

//! Resume tokens: ordered, serializable positions in a change stream.
//!
//! A resume token is either an **event token**, identifying one emitted change
//! event, or a **high-water-mark token**, meaning "just after this point in
//! time" without naming any event.
//!
//! # Ordering
//!
//! Tokens are totally ordered by:
//!
//! 1. cluster time
//! 2. kind (a high-water mark sorts before every event at the same time)
//! 3. version
//! 4. transaction operation index
//! 5. from-invalidate flag
//! 6. collection UUID
//! 7. event identifier
//!
//! A high-water mark is therefore never equal to an event token.
//!
//! # Wire Format
//!
//! [`ResumeToken::encode`] produces a single byte string whose lexicographic
//! order matches the token order above, so stores can sort tokens without
//! decoding them:
//!
//! ```text
//! ┌────────┬──────────┬──────────┬──────┬─────────┬──────────────┬─────────┬──────────────┬──────────────┐
//! │ format │ time     │ incr     │ kind │ version │ txn op index │ invalid │ uuid?        │ event id?    │
//! │ u8     │ u32 BE   │ u32 BE   │ u8   │ u32 BE  │ u64 BE       │ u8      │ tag + 16     │ tag + rest   │
//! └────────┴──────────┴──────────┴──────┴─────────┴──────────────┴─────────┴──────────────┴──────────────┘
//! ```
//!
//! Clients see the token as `{ "_data": "<lowercase hex>" }`.
//!
//! # Example
//!
//! ```rust
//! use bson::Timestamp;
//! use penne_core::resume_token::ResumeToken;
//!
//! let ts = Timestamp { time: 1_700_000_000, increment: 4 };
//! let hwm = ResumeToken::high_water_mark(ts);
//! let event = ResumeToken::event(ts).txn_op_index(0).build();
//!
//! assert!(hwm < event);
//!
//! let doc = event.to_document();
//! assert_eq!(ResumeToken::from_document(&doc).unwrap(), event);
//! ```

use crate::error::{ConfigError, ErrorCode, InternalInvariantError};
use bson::{doc, Document, Timestamp};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Leading byte of every encoded token in the current format.
pub const FORMAT_VERSION: u8 = 1;

/// Token version assigned when none is specified.
pub const DEFAULT_TOKEN_VERSION: u32 = 2;

/// Field holding the hex-encoded token in its document form.
pub const DATA_FIELD: &str = "_data";

const FIXED_LEN: usize = 1 + 4 + 4 + 1 + 4 + 8 + 1;

/// Distinguishes high-water marks from event tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TokenKind {
    /// "Just after this cluster time"
    HighWaterMark = 0,

    /// A specific emitted event
    Event = 128,
}

impl TokenKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::HighWaterMark),
            128 => Some(Self::Event),
            _ => None,
        }
    }
}

/// A position in a change stream.
///
/// Construct with [`ResumeToken::high_water_mark`] or [`ResumeToken::event`].
/// High-water marks never carry a collection, an event identifier, a
/// transaction index or the from-invalidate flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeToken {
    cluster_time: Timestamp,
    kind: TokenKind,
    version: u32,
    txn_op_index: u64,
    from_invalidate: bool,
    collection_uuid: Option<Uuid>,
    event_identifier: Option<Vec<u8>>,
}

impl ResumeToken {
    /// Creates a high-water-mark token at `cluster_time`.
    #[must_use]
    pub fn high_water_mark(cluster_time: Timestamp) -> Self {
        Self::high_water_mark_with_version(cluster_time, DEFAULT_TOKEN_VERSION)
    }

    /// Creates a high-water-mark token with an explicit version.
    #[must_use]
    pub fn high_water_mark_with_version(cluster_time: Timestamp, version: u32) -> Self {
        Self {
            cluster_time,
            kind: TokenKind::HighWaterMark,
            version,
            txn_op_index: 0,
            from_invalidate: false,
            collection_uuid: None,
            event_identifier: None,
        }
    }

    /// Starts building an event token at `cluster_time`.
    #[must_use]
    pub fn event(cluster_time: Timestamp) -> EventTokenBuilder {
        EventTokenBuilder::new(cluster_time)
    }

    /// Cluster time of the position.
    #[must_use]
    pub fn cluster_time(&self) -> Timestamp {
        self.cluster_time
    }

    /// High-water mark or event.
    #[must_use]
    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Returns `true` for high-water-mark tokens.
    #[must_use]
    pub fn is_high_water_mark(&self) -> bool {
        self.kind == TokenKind::HighWaterMark
    }

    /// Tie-breaking token version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Position within the transaction that produced the event.
    #[must_use]
    pub fn txn_op_index(&self) -> u64 {
        self.txn_op_index
    }

    /// Returns `true` if the token was produced by an invalidate event.
    #[must_use]
    pub fn is_from_invalidate(&self) -> bool {
        self.from_invalidate
    }

    /// Identifier of the collection the event belongs to.
    #[must_use]
    pub fn collection_uuid(&self) -> Option<Uuid> {
        self.collection_uuid
    }

    /// Opaque, order-comparable event key (typically an encoded document key).
    #[must_use]
    pub fn event_identifier(&self) -> Option<&[u8]> {
        self.event_identifier.as_deref()
    }

    /// Cluster time as wall-clock time, for logs.
    #[must_use]
    pub fn cluster_time_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.cluster_time.time), 0)
    }

    /// Encodes the token as an order-preserving byte string.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            FIXED_LEN + 17 + 1 + self.event_identifier.as_ref().map_or(0, Vec::len),
        );
        buf.push(FORMAT_VERSION);
        buf.extend_from_slice(&self.cluster_time.time.to_be_bytes());
        buf.extend_from_slice(&self.cluster_time.increment.to_be_bytes());
        buf.push(self.kind as u8);
        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.extend_from_slice(&self.txn_op_index.to_be_bytes());
        buf.push(u8::from(self.from_invalidate));

        match &self.collection_uuid {
            Some(uuid) => {
                buf.push(1);
                buf.extend_from_slice(uuid.as_bytes());
            }
            None => buf.push(0),
        }

        // The event identifier runs to the end of the buffer, so it must stay last.
        match &self.event_identifier {
            Some(id) => {
                buf.push(1);
                buf.extend_from_slice(id);
            }
            None => buf.push(0),
        }

        buf
    }

    /// Decodes a token produced by [`ResumeToken::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::InvalidResumeToken`] if the bytes are truncated,
    /// use an unknown format version, or describe an impossible token.
    pub fn decode(bytes: &[u8]) -> Result<Self, ConfigError> {
        let mut reader = Reader::new(bytes);

        let format = reader.u8()?;
        if format != FORMAT_VERSION {
            return Err(malformed(format!(
                "unsupported resume token format version {format}"
            )));
        }

        let time = reader.u32()?;
        let increment = reader.u32()?;
        let kind_byte = reader.u8()?;
        let kind = TokenKind::from_byte(kind_byte)
            .ok_or_else(|| malformed(format!("unknown token kind {kind_byte}")))?;
        let version = reader.u32()?;
        let txn_op_index = reader.u64()?;
        let from_invalidate = reader.flag("fromInvalidate")?;

        let collection_uuid = if reader.flag("uuid tag")? {
            Some(Uuid::from_bytes(reader.array::<16>()?))
        } else {
            None
        };

        let event_identifier = if reader.flag("event identifier tag")? {
            Some(reader.rest().to_vec())
        } else {
            if !reader.rest().is_empty() {
                return Err(malformed("trailing bytes after resume token"));
            }
            None
        };

        let token = Self {
            cluster_time: Timestamp { time, increment },
            kind,
            version,
            txn_op_index,
            from_invalidate,
            collection_uuid,
            event_identifier,
        };

        if token.is_high_water_mark()
            && (token.from_invalidate
                || token.txn_op_index != 0
                || token.collection_uuid.is_some()
                || token.event_identifier.is_some())
        {
            return Err(malformed(
                "high water mark token may only carry a cluster time and version",
            ));
        }

        Ok(token)
    }

    /// Lowercase hex of [`ResumeToken::encode`]; preserves byte order.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.encode())
    }

    /// Parses the output of [`ResumeToken::to_hex`].
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::InvalidResumeToken`] for invalid hex or token bytes.
    pub fn from_hex(data: &str) -> Result<Self, ConfigError> {
        let bytes = hex::decode(data)
            .map_err(|e| malformed(format!("resume token is not valid hex: {e}")))?;
        Self::decode(&bytes)
    }

    /// Client-facing document form: `{ "_data": "<hex>" }`.
    #[must_use]
    pub fn to_document(&self) -> Document {
        doc! { DATA_FIELD: self.to_hex() }
    }

    /// Parses the client-facing document form.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::InvalidResumeToken`] if `_data` is missing, not a
    /// string, or not a valid token.
    pub fn from_document(document: &Document) -> Result<Self, ConfigError> {
        let data = document.get_str(DATA_FIELD).map_err(|e| {
            malformed(format!("resume token must contain a string '{DATA_FIELD}' field: {e}"))
        })?;
        Self::from_hex(data)
    }
}

impl Ord for ResumeToken {
    fn cmp(&self, other: &Self) -> Ordering {
        timestamp_key(self.cluster_time)
            .cmp(&timestamp_key(other.cluster_time))
            .then(self.kind.cmp(&other.kind))
            .then(self.version.cmp(&other.version))
            .then(self.txn_op_index.cmp(&other.txn_op_index))
            .then(self.from_invalidate.cmp(&other.from_invalidate))
            .then(self.collection_uuid.cmp(&other.collection_uuid))
            .then_with(|| self.event_identifier.cmp(&other.event_identifier))
    }
}

impl PartialOrd for ResumeToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for ResumeToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        timestamp_key(self.cluster_time).hash(state);
        self.kind.hash(state);
        self.version.hash(state);
        self.txn_op_index.hash(state);
        self.from_invalidate.hash(state);
        self.collection_uuid.hash(state);
        self.event_identifier.hash(state);
    }
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            TokenKind::HighWaterMark => "hwm",
            TokenKind::Event => "event",
        };
        write!(
            f,
            "{kind}@Timestamp({}, {})",
            self.cluster_time.time, self.cluster_time.increment
        )?;
        if self.kind == TokenKind::Event {
            write!(f, "#{}", self.txn_op_index)?;
        }
        if self.from_invalidate {
            f.write_str(" (invalidate)")?;
        }
        Ok(())
    }
}

/// Builder for event tokens.
#[derive(Debug, Clone)]
pub struct EventTokenBuilder {
    token: ResumeToken,
}

impl EventTokenBuilder {
    fn new(cluster_time: Timestamp) -> Self {
        Self {
            token: ResumeToken {
                cluster_time,
                kind: TokenKind::Event,
                version: DEFAULT_TOKEN_VERSION,
                txn_op_index: 0,
                from_invalidate: false,
                collection_uuid: None,
                event_identifier: None,
            },
        }
    }

    /// Sets the token version.
    #[must_use]
    pub fn version(mut self, version: u32) -> Self {
        self.token.version = version;
        self
    }

    /// Sets the position within the originating transaction.
    #[must_use]
    pub fn txn_op_index(mut self, index: u64) -> Self {
        self.token.txn_op_index = index;
        self
    }

    /// Sets the collection the event belongs to.
    #[must_use]
    pub fn collection_uuid(mut self, uuid: Uuid) -> Self {
        self.token.collection_uuid = Some(uuid);
        self
    }

    /// Sets the opaque event identifier.
    #[must_use]
    pub fn event_identifier(mut self, identifier: impl Into<Vec<u8>>) -> Self {
        self.token.event_identifier = Some(identifier.into());
        self
    }

    /// Marks the token as produced by an invalidate event.
    #[must_use]
    pub fn from_invalidate(mut self) -> Self {
        self.token.from_invalidate = true;
        self
    }

    /// Finishes the token.
    #[must_use]
    pub fn build(self) -> ResumeToken {
        self.token
    }
}

/// Packs a timestamp into its 64-bit logical clock value.
#[must_use]
pub fn timestamp_key(ts: Timestamp) -> u64 {
    (u64::from(ts.time) << 32) | u64::from(ts.increment)
}

/// Advances a timestamp by `ticks` on the 64-bit logical clock.
///
/// The increment carries into the seconds field on overflow.
///
/// # Errors
///
/// Returns [`ErrorCode::LogicalClockOverflow`] if the clock would wrap.
pub fn add_ticks(ts: Timestamp, ticks: u64) -> Result<Timestamp, InternalInvariantError> {
    let advanced = timestamp_key(ts).checked_add(ticks).ok_or_else(|| {
        InternalInvariantError::new(
            ErrorCode::LogicalClockOverflow,
            format!(
                "cannot advance Timestamp({}, {}) by {ticks} ticks",
                ts.time, ts.increment
            ),
        )
    })?;

    #[allow(clippy::cast_possible_truncation)]
    let advanced = Timestamp {
        time: (advanced >> 32) as u32,
        increment: advanced as u32,
    };
    Ok(advanced)
}

fn malformed(message: impl Into<String>) -> ConfigError {
    ConfigError::new(ErrorCode::InvalidResumeToken, message)
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ConfigError> {
        if self.bytes.len() < N {
            return Err(malformed("resume token is truncated"));
        }
        let (head, tail) = self.bytes.split_at(N);
        self.bytes = tail;
        let mut out = [0_u8; N];
        out.copy_from_slice(head);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ConfigError> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32, ConfigError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, ConfigError> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    fn flag(&mut self, field: &str) -> Result<bool, ConfigError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(malformed(format!("invalid {field} byte {other}"))),
        }
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ts(time: u32, increment: u32) -> Timestamp {
        Timestamp { time, increment }
    }

    fn arb_token() -> impl Strategy<Value = ResumeToken> {
        let hwm = (any::<u32>(), any::<u32>(), 0_u32..4)
            .prop_map(|(t, i, v)| ResumeToken::high_water_mark_with_version(ts(t, i), v));

        let event = (
            any::<u32>(),
            any::<u32>(),
            0_u32..4,
            any::<u64>(),
            any::<bool>(),
            proptest::option::of(any::<[u8; 16]>()),
            proptest::option::of(prop::collection::vec(any::<u8>(), 0..24)),
        )
            .prop_map(|(t, i, v, idx, inval, uuid, id)| {
                let mut builder = ResumeToken::event(ts(t, i)).version(v).txn_op_index(idx);
                if inval {
                    builder = builder.from_invalidate();
                }
                if let Some(bytes) = uuid {
                    builder = builder.collection_uuid(Uuid::from_bytes(bytes));
                }
                if let Some(id) = id {
                    builder = builder.event_identifier(id);
                }
                builder.build()
            });

        prop_oneof![hwm, event]
    }

    proptest! {
        #[test]
        fn roundtrip_bytes(token in arb_token()) {
            let decoded = ResumeToken::decode(&token.encode()).unwrap();
            prop_assert_eq!(decoded, token);
        }

        #[test]
        fn byte_order_matches_token_order(a in arb_token(), b in arb_token()) {
            prop_assert_eq!(a.encode().cmp(&b.encode()), a.cmp(&b));
            prop_assert_eq!(a.to_hex().cmp(&b.to_hex()), a.cmp(&b));
        }

        #[test]
        fn high_water_mark_precedes_events_at_same_time(
            t in any::<u32>(),
            i in any::<u32>(),
            v in 0_u32..4,
            idx in any::<u64>(),
        ) {
            let hwm = ResumeToken::high_water_mark_with_version(ts(t, i), v);
            let event = ResumeToken::event(ts(t, i)).version(0).txn_op_index(idx).build();
            prop_assert!(hwm < event);
            prop_assert_ne!(hwm, event);
        }
    }

    #[test]
    fn test_cluster_time_dominates() {
        let later_hwm = ResumeToken::high_water_mark(ts(11, 0));
        let earlier_event = ResumeToken::event(ts(10, 5)).txn_op_index(99).build();
        assert!(earlier_event < later_hwm);
    }

    #[test]
    fn test_txn_index_breaks_ties() {
        let first = ResumeToken::event(ts(10, 1)).txn_op_index(0).build();
        let second = ResumeToken::event(ts(10, 1)).txn_op_index(1).build();
        assert!(first < second);
    }

    #[test]
    fn test_decode_rejects_unknown_format() {
        let mut bytes = ResumeToken::high_water_mark(ts(1, 1)).encode();
        bytes[0] = 9;
        let err = ResumeToken::decode(&bytes).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidResumeToken);
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let bytes = ResumeToken::event(ts(1, 1)).build().encode();
        assert!(ResumeToken::decode(&bytes[..bytes.len() - 2]).is_err());
        assert!(ResumeToken::decode(&[]).is_err());
    }

    #[test]
    fn test_decode_rejects_invalidating_high_water_mark() {
        let mut bytes = ResumeToken::high_water_mark(ts(1, 1)).encode();
        // from_invalidate byte
        bytes[FIXED_LEN - 1] = 1;
        let err = ResumeToken::decode(&bytes).unwrap_err();
        assert!(err.message.contains("high water mark"));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = ResumeToken::high_water_mark(ts(1, 1)).encode();
        bytes.push(7);
        assert!(ResumeToken::decode(&bytes).is_err());
    }

    #[test]
    fn test_document_form() {
        let token = ResumeToken::event(ts(1_700_000_000, 3))
            .collection_uuid(Uuid::from_u128(42))
            .build();
        let doc = token.to_document();
        assert!(doc.get_str(DATA_FIELD).unwrap().starts_with("01"));
        assert_eq!(ResumeToken::from_document(&doc).unwrap(), token);

        assert!(ResumeToken::from_document(&doc! { "_data": 5 }).is_err());
        assert!(ResumeToken::from_document(&doc! { "_data": "zz" }).is_err());
        assert!(ResumeToken::from_document(&doc! {}).is_err());
    }

    #[test]
    fn test_add_ticks_carries_into_seconds() {
        assert_eq!(add_ticks(ts(5, 7), 1).unwrap(), ts(5, 8));
        assert_eq!(add_ticks(ts(5, u32::MAX), 1).unwrap(), ts(6, 0));
        assert!(add_ticks(ts(u32::MAX, u32::MAX), 1).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ResumeToken::high_water_mark(ts(10, 2)).to_string(),
            "hwm@Timestamp(10, 2)"
        );
        assert_eq!(
            ResumeToken::event(ts(10, 2)).txn_op_index(3).from_invalidate().build().to_string(),
            "event@Timestamp(10, 2)#3 (invalidate)"
        );
    }

    #[test]
    fn test_cluster_time_utc() {
        let token = ResumeToken::high_water_mark(ts(1_700_000_000, 1));
        assert_eq!(token.cluster_time_utc().unwrap().timestamp(), 1_700_000_000);
    }
}
