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

//! In-memory lock store (for testing and single-process use).
//!
//! ## Purpose
//! Implements the [`LockStore`] contract with the same observable semantics
//! as Redis: set-if-absent with expiry, TTL sentinels, and WATCH conflict
//! detection that aborts a commit when a watched key was written, deleted,
//! recreated or expired after it was watched.
//!
//! ## Bookkeeping
//! Each entry carries the revision of its last write. A deleted or expired
//! key leaves a tombstone revision only while some session watches it, and
//! the tombstone goes away with the last watcher. Expired entries are
//! dropped when touched and by a sweep every [`SWEEP_INTERVAL`] writes, so
//! memory tracks the live key set.
//!
//! ## Limitations
//! - Not persistent (data lost on restart)
//! - Not distributed (single process only)
//!
//! Time comes from `tokio::time::Instant`, so tests can pause and advance
//! the clock instead of sleeping.

use crate::store::{CommitOutcome, KeyTtl, LockStore, QueuedOp, StoreSession, Transaction};
use crate::LockResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Number of writes between full sweeps of expired entries.
pub const SWEEP_INTERVAL: u64 = 64;

/// Entry in the in-memory store with optional TTL.
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
    revision: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    /// Revision at which a watched key disappeared.
    tombstones: HashMap<String, u64>,
    /// Number of sessions watching each key.
    watchers: HashMap<String, usize>,
    next_revision: u64,
    writes_since_sweep: u64,
}

impl State {
    fn bump(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }

    fn revision(&self, key: &str) -> u64 {
        self.entries
            .get(key)
            .map(|e| e.revision)
            .or_else(|| self.tombstones.get(key).copied())
            .unwrap_or(0)
    }

    /// Record that `key` just disappeared, if anyone is watching it.
    fn forget(&mut self, key: &str) {
        if self.watchers.contains_key(key) {
            let revision = self.bump();
            self.tombstones.insert(key.to_string(), revision);
        }
    }

    /// Drop `key` if its expiry has passed; expiry counts as a mutation.
    fn purge_expired(&mut self, key: &str) {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
            self.forget(key);
        }
    }

    fn live(&mut self, key: &str) -> Option<&Entry> {
        self.purge_expired(key);
        self.entries.get(key)
    }

    fn insert(&mut self, key: &str, value: &str, ttl: Option<Duration>) {
        let entry = Entry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
            revision: self.bump(),
        };
        self.entries.insert(key.to_string(), entry);
        self.tombstones.remove(key);
        self.after_write();
    }

    fn delete(&mut self, key: &str) -> bool {
        self.purge_expired(key);
        let existed = self.entries.remove(key).is_some();
        if existed {
            self.forget(key);
            self.after_write();
        }
        existed
    }

    fn after_write(&mut self) {
        self.writes_since_sweep += 1;
        if self.writes_since_sweep >= SWEEP_INTERVAL {
            self.sweep_expired();
        }
    }

    fn sweep_expired(&mut self) {
        self.writes_since_sweep = 0;
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.entries.remove(&key);
            self.forget(&key);
        }
    }

    /// Register a watcher on `key` and return the revision it observed.
    fn watch(&mut self, key: &str) -> u64 {
        self.purge_expired(key);
        *self.watchers.entry(key.to_string()).or_insert(0) += 1;
        self.revision(key)
    }

    fn unwatch(&mut self, key: &str) {
        if let Some(count) = self.watchers.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.watchers.remove(key);
                self.tombstones.remove(key);
            }
        }
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    // State is only mutated through complete operations, so a poisoned
    // guard still holds a consistent map.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory lock store.
///
/// ## Example
/// ```rust
/// use plexspaces_kv_locks::{LockManager, store::memory::MemoryLockStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = LockManager::new(MemoryLockStore::new());
/// assert!(manager.acquire("orders:42", "node-1").await?);
/// assert!(manager.release("orders:42", "node-1").await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MemoryLockStore {
    state: Arc<Mutex<State>>,
}

impl MemoryLockStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditionally set `key = value` with no expiry.
    ///
    /// This is the state a holder leaves behind when it dies between writing
    /// the value and attaching the expiry, and is also how a foreign writer
    /// looks to a watching session.
    pub async fn put(&self, key: &str, value: &str) {
        lock(&self.state).insert(key, value, None);
    }

    /// Unconditionally set `key = value` expiring after `ttl`.
    pub async fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) {
        lock(&self.state).insert(key, value, Some(ttl));
    }

    /// Unconditionally delete `key`. Returns whether it existed.
    pub async fn remove(&self, key: &str) -> bool {
        lock(&self.state).delete(key)
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        lock(&self.state)
            .entries
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    type Session = MemorySession;

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LockResult<bool> {
        let mut state = lock(&self.state);
        if state.live(key).is_some() {
            return Ok(false);
        }
        state.insert(key, value, Some(ttl));
        Ok(true)
    }

    async fn remaining_ttl(&self, key: &str) -> LockResult<KeyTtl> {
        let mut state = lock(&self.state);
        let now = Instant::now();
        Ok(match state.live(key) {
            None => KeyTtl::Missing,
            Some(Entry { expires_at: None, .. }) => KeyTtl::Persistent,
            Some(Entry { expires_at: Some(exp), .. }) => KeyTtl::Expires(exp.saturating_duration_since(now)),
        })
    }

    async fn get(&self, key: &str) -> LockResult<Option<String>> {
        let mut state = lock(&self.state);
        Ok(state.live(key).map(|e| e.value.clone()))
    }

    async fn session(&self) -> LockResult<MemorySession> {
        Ok(MemorySession {
            state: self.state.clone(),
            watched: HashMap::new(),
        })
    }
}

/// Session over a [`MemoryLockStore`]; remembers the revision of each
/// watched key. Dropping the session releases its watches.
pub struct MemorySession {
    state: Arc<Mutex<State>>,
    watched: HashMap<String, u64>,
}

impl MemorySession {
    fn release_watches(&mut self, state: &mut State) {
        for key in self.watched.keys() {
            state.unwatch(key);
        }
        self.watched.clear();
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn watch(&mut self, key: &str) -> LockResult<()> {
        // A repeated WATCH keeps the first observation, as Redis does
        if !self.watched.contains_key(key) {
            let revision = lock(&self.state).watch(key);
            self.watched.insert(key.to_string(), revision);
        }
        Ok(())
    }

    async fn get(&mut self, key: &str) -> LockResult<Option<String>> {
        let mut state = lock(&self.state);
        Ok(state.live(key).map(|e| e.value.clone()))
    }

    async fn unwatch(&mut self) -> LockResult<()> {
        let state = self.state.clone();
        self.release_watches(&mut lock(&state));
        Ok(())
    }

    async fn commit(&mut self, tx: Transaction) -> LockResult<CommitOutcome> {
        let shared = self.state.clone();
        let mut state = lock(&shared);

        let mut conflicted = false;
        for (key, revision) in &self.watched {
            state.purge_expired(key);
            if state.revision(key) != *revision {
                conflicted = true;
                break;
            }
        }
        self.release_watches(&mut state);

        if conflicted {
            return Ok(CommitOutcome::Aborted);
        }

        let replies = tx
            .ops()
            .iter()
            .map(|op| match op {
                QueuedOp::Delete(key) => i64::from(state.delete(key)),
            })
            .collect();
        Ok(CommitOutcome::Committed(replies))
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if !self.watched.is_empty() {
            let state = self.state.clone();
            self.release_watches(&mut lock(&state));
        }
    }
}
