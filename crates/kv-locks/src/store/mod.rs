// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of PlexSpaces.
//
// PlexSpaces is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// PlexSpaces is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with PlexSpaces. If not, see <https://www.gnu.org/licenses/>.

//! Key-value store capability set consumed by the lock manager.
//!
//! ## Purpose
//! The lock protocol only needs a handful of store primitives: an atomic
//! set-if-absent with expiry, a remaining-TTL query, a plain read, and an
//! optimistic WATCH / MULTI / EXEC transaction. This module names exactly
//! those, so the manager can be driven by Redis in production and by an
//! in-process store in tests.
//!
//! ## Sessions
//! WATCH state belongs to a connection, not to a client. Everything that
//! participates in an optimistic transaction therefore goes through a
//! [`StoreSession`], which implementations back with one dedicated
//! connection. The stateless commands live directly on [`LockStore`].

use crate::LockResult;
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "memory-backend")]
pub mod memory;

#[cfg(feature = "redis-backend")]
pub mod redis;

/// Remaining lifetime of a key as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist (Redis `-2`)
    Missing,
    /// Key exists without an expiry attached (Redis `-1`)
    Persistent,
    /// Key expires after the given duration
    Expires(Duration),
}

impl KeyTtl {
    /// Map a Redis `PTTL` reply (milliseconds or sentinel) to a `KeyTtl`.
    pub fn from_pttl(millis: i64) -> Self {
        match millis {
            -1 => KeyTtl::Persistent,
            ms if ms >= 0 => KeyTtl::Expires(Duration::from_millis(ms as u64)),
            _ => KeyTtl::Missing,
        }
    }

    /// True only when the key carries an expiry with time left on it.
    ///
    /// `Missing`, `Persistent` and a zero remainder are all "non-positive":
    /// the acquire path treats them as a holder that never attached its
    /// expiry.
    pub fn is_positive(&self) -> bool {
        matches!(self, KeyTtl::Expires(d) if !d.is_zero())
    }

    /// Remaining lifetime, if the key has a positive one.
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            KeyTtl::Expires(d) if !d.is_zero() => Some(*d),
            _ => None,
        }
    }
}

/// Operation queued inside a [`Transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuedOp {
    /// `DEL key`
    Delete(String),
}

/// Operations queued between MULTI and EXEC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    ops: Vec<QueuedOp>,
}

impl Transaction {
    /// Open an empty transaction (MULTI).
    pub fn begin() -> Self {
        Self::default()
    }

    /// Queue a delete of `key`.
    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.push(QueuedOp::Delete(key.into()));
        self
    }

    pub fn ops(&self) -> &[QueuedOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Result of committing a [`Transaction`] (EXEC).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Queued operations ran; one integer reply per operation.
    Committed(Vec<i64>),
    /// A watched key changed since WATCH; nothing ran.
    Aborted,
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed(_))
    }
}

/// Stateless store commands used by the lock protocol.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Session type carrying WATCH state.
    type Session: StoreSession;

    /// Set `key = value` with `ttl` only if `key` is absent.
    ///
    /// ## Returns
    /// - `Ok(true)`: the key was written
    /// - `Ok(false)`: the key already existed, nothing changed
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LockResult<bool>;

    /// Remaining lifetime of `key`.
    async fn remaining_ttl(&self, key: &str) -> LockResult<KeyTtl>;

    /// Current value of `key`, `None` when absent.
    async fn get(&self, key: &str) -> LockResult<Option<String>>;

    /// Open a session for an optimistic transaction.
    async fn session(&self) -> LockResult<Self::Session>;
}

/// One connection's view of the store, carrying WATCH registrations.
#[async_trait]
pub trait StoreSession: Send {
    /// Register `key` for conflict detection until the next commit or unwatch.
    async fn watch(&mut self, key: &str) -> LockResult<()>;

    /// Read `key` on this session.
    async fn get(&mut self, key: &str) -> LockResult<Option<String>>;

    /// Drop every WATCH registration without committing.
    async fn unwatch(&mut self) -> LockResult<()>;

    /// Run `tx` atomically unless a watched key changed. Clears WATCH state
    /// either way.
    async fn commit(&mut self, tx: Transaction) -> LockResult<CommitOutcome>;
}
