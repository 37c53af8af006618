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

//! Lock manager: acquire and release over an injected [`LockStore`].
//!
//! ## Protocol
//! - **Acquire**: `SET key token NX` with the lease expiry. If the key
//!   already exists and reports no positive expiry, a previous holder died
//!   between writing the value and attaching the expiry; the manager makes a
//!   best-effort second set-if-absent so a *later* caller can get in. That
//!   call still reports "not acquired".
//! - **Release**: WATCH the key, compare its value with the caller's token,
//!   then `MULTI; DEL; EXEC`. An aborted EXEC means someone wrote the key in
//!   between, so the whole check runs again.
//!
//! The manager keeps no local lock state. Every decision is made by an
//! atomic or WATCH-isolated store command.

use crate::config::LockConfig;
use crate::store::{CommitOutcome, LockStore, StoreSession, Transaction};
use crate::{LockError, LockResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Detailed result of an acquire attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The key was claimed for the caller.
    Acquired,
    /// Someone else holds the key; it expires after `remaining`.
    Held { remaining: Duration },
    /// The key had no positive expiry and a recovery set-if-absent ran.
    /// `reset` reports whether that write landed. Never counts as acquired.
    Recovered { reset: bool },
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired)
    }
}

/// Detailed result of a release attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The key was deleted; `attempts` counts compare-and-delete rounds.
    Released { attempts: u32 },
    /// The stored value was absent or did not match the caller's token.
    NotHeld,
}

impl ReleaseOutcome {
    pub fn is_released(&self) -> bool {
        matches!(self, ReleaseOutcome::Released { .. })
    }
}

/// Distributed mutual-exclusion lock over a shared key-value store.
///
/// ## Example
/// ```rust,no_run
/// use plexspaces_kv_locks::{generate_token, LockManager};
/// use plexspaces_kv_locks::store::redis::RedisLockStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = RedisLockStore::new("redis://127.0.0.1/").await?;
/// let manager = LockManager::new(store);
///
/// let token = generate_token();
/// if manager.acquire("scheduler:background:lease", &token).await? {
///     // ... exclusive work ...
///     manager.release("scheduler:background:lease", &token).await?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct LockManager<S> {
    store: Arc<S>,
    config: LockConfig,
}

impl<S> Clone for LockManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: LockStore> LockManager<S> {
    /// Create a manager with the default configuration (180 second leases,
    /// no namespace, unbounded release retries).
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
            config: LockConfig::default(),
        }
    }

    /// Create a manager with an explicit configuration.
    ///
    /// ## Errors
    /// - [`LockError::Config`]: the configuration fails [`LockConfig::validate`]
    pub fn with_config(store: S, config: LockConfig) -> LockResult<Self> {
        Self::from_shared(Arc::new(store), config)
    }

    /// Create a manager over a store shared with other components.
    pub fn from_shared(store: Arc<S>, config: LockConfig) -> LockResult<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Try to take the lock on `key` for the holder identified by `value`.
    ///
    /// ## Returns
    /// - `Ok(true)`: the caller now holds the lock until release or expiry
    /// - `Ok(false)`: someone else holds it, or the crash-window recovery
    ///   path ran (see [`AcquireOutcome::Recovered`])
    /// - `Err(_)`: invalid input or a store failure
    pub async fn acquire(&self, key: &str, value: &str) -> LockResult<bool> {
        Ok(self.try_acquire(key, value).await?.is_acquired())
    }

    /// Same algorithm as [`acquire`](Self::acquire), reporting which path ran.
    #[instrument(skip(self, value), fields(lock_key = %key))]
    pub async fn try_acquire(&self, key: &str, value: &str) -> LockResult<AcquireOutcome> {
        validate(key, value)?;
        let start_time = Instant::now();
        let store_key = self.config.store_key(key);
        let ttl = self.config.lease_ttl;

        if self.store.set_if_absent(&store_key, value, ttl).await? {
            debug!(ttl_secs = ttl.as_secs(), "Lock acquired");
            record_acquire("acquired", start_time);
            return Ok(AcquireOutcome::Acquired);
        }

        let key_ttl = self.store.remaining_ttl(&store_key).await?;
        if let Some(remaining) = key_ttl.remaining() {
            debug!(remaining_ms = remaining.as_millis() as u64, "Lock held by another holder");
            record_acquire("held", start_time);
            return Ok(AcquireOutcome::Held { remaining });
        }

        // Holder wrote the value but never attached an expiry, or the key
        // vanished between the two calls. The recovery write is best effort.
        let reset = match self.store.set_if_absent(&store_key, value, ttl).await {
            Ok(reset) => reset,
            Err(e) => {
                warn!(error = %e, "Recovery set-if-absent failed");
                false
            }
        };
        warn!(ttl = ?key_ttl, reset, "Lock key had no positive expiry, ran recovery");
        record_acquire("recovered", start_time);
        Ok(AcquireOutcome::Recovered { reset })
    }

    /// Release `key` if it is still held with token `value`.
    ///
    /// ## Returns
    /// - `Ok(true)`: the key was deleted
    /// - `Ok(false)`: the key is absent or holds another token; nothing changed
    /// - `Err(LockError::ReleaseContended)`: a retry bound is configured and
    ///   every attempt was aborted by concurrent writes
    /// - `Err(_)`: invalid input or a store failure
    pub async fn release(&self, key: &str, value: &str) -> LockResult<bool> {
        Ok(self.try_release(key, value).await?.is_released())
    }

    /// Same algorithm as [`release`](Self::release), reporting attempt count.
    #[instrument(skip(self, value), fields(lock_key = %key))]
    pub async fn try_release(&self, key: &str, value: &str) -> LockResult<ReleaseOutcome> {
        validate(key, value)?;
        let start_time = Instant::now();
        let store_key = self.config.store_key(key);
        let policy = self.config.release_retry;

        let mut session = self.store.session().await?;
        let mut attempts: u32 = 0;

        loop {
            attempts = attempts.saturating_add(1);

            session.watch(&store_key).await?;
            let current = session.get(&store_key).await?;
            if current.as_deref() != Some(value) {
                session.unwatch().await?;
                debug!(attempts, "Release skipped, token does not match");
                record_release("not_held", start_time);
                return Ok(ReleaseOutcome::NotHeld);
            }

            let tx = Transaction::begin().delete(store_key.as_str());
            match session.commit(tx).await? {
                CommitOutcome::Committed(_) => {
                    debug!(attempts, "Lock released");
                    record_release("released", start_time);
                    return Ok(ReleaseOutcome::Released { attempts });
                }
                CommitOutcome::Aborted => {
                    metrics::counter!("plexspaces_kv_locks_release_conflicts_total").increment(1);
                    if !policy.allows(attempts) {
                        warn!(attempts, "Release gave up after repeated commit conflicts");
                        record_release("contended", start_time);
                        return Err(LockError::ReleaseContended {
                            key: key.to_string(),
                            attempts,
                        });
                    }
                    debug!(attempts, "Release commit aborted by concurrent write, retrying");
                    if !policy.backoff.is_zero() {
                        tokio::time::sleep(policy.backoff).await;
                    }
                }
            }
        }
    }

    /// Token currently stored for `key`, `None` when unlocked.
    pub async fn holder(&self, key: &str) -> LockResult<Option<String>> {
        validate_key(key)?;
        self.store.get(&self.config.store_key(key)).await
    }
}

fn validate_key(key: &str) -> LockResult<()> {
    if key.is_empty() {
        return Err(LockError::InvalidKey("lock key must not be empty".to_string()));
    }
    Ok(())
}

fn validate(key: &str, value: &str) -> LockResult<()> {
    validate_key(key)?;
    if value.is_empty() {
        return Err(LockError::InvalidToken(format!("empty token for lock {}", key)));
    }
    Ok(())
}

fn record_acquire(result: &'static str, start_time: Instant) {
    metrics::histogram!("plexspaces_kv_locks_acquire_duration_seconds")
        .record(start_time.elapsed().as_secs_f64());
    metrics::counter!("plexspaces_kv_locks_acquire_total", "result" => result).increment(1);
}

fn record_release(result: &'static str, start_time: Instant) {
    metrics::histogram!("plexspaces_kv_locks_release_duration_seconds")
        .record(start_time.elapsed().as_secs_f64());
    metrics::counter!("plexspaces_kv_locks_release_total", "result" => result).increment(1);
}

#[cfg(all(test, feature = "memory-backend"))]
mod tests {
    use super::*;
    use crate::store::memory::MemoryLockStore;

    fn manager() -> LockManager<MemoryLockStore> {
        LockManager::new(MemoryLockStore::new())
    }

    #[tokio::test]
    async fn test_acquire_lock() {
        let manager = manager();

        assert!(manager.acquire("res-A", "tok-1").await.unwrap());
        assert_eq!(manager.holder("res-A").await.unwrap(), Some("tok-1".to_string()));

        let ttl = manager.store().remaining_ttl("res-A").await.unwrap();
        let remaining = ttl.remaining().unwrap();
        assert!(remaining <= Duration::from_secs(180));
        assert!(remaining > Duration::from_secs(170));
    }

    #[tokio::test]
    async fn test_acquire_lock_already_held() {
        let manager = manager();
        manager.acquire("res-A", "tok-1").await.unwrap();

        let outcome = manager.try_acquire("res-A", "tok-2").await.unwrap();

        assert!(matches!(outcome, AcquireOutcome::Held { .. }));
        assert_eq!(manager.holder("res-A").await.unwrap(), Some("tok-1".to_string()));
    }

    #[tokio::test]
    async fn test_acquire_same_token_is_not_reentrant() {
        let manager = manager();
        assert!(manager.acquire("res-A", "tok-1").await.unwrap());
        assert!(!manager.acquire("res-A", "tok-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_lock() {
        let manager = manager();
        manager.acquire("res-A", "tok-1").await.unwrap();

        let outcome = manager.try_release("res-A", "tok-1").await.unwrap();

        assert_eq!(outcome, ReleaseOutcome::Released { attempts: 1 });
        assert_eq!(manager.holder("res-A").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_release_wrong_token() {
        let manager = manager();
        manager.acquire("res-A", "tok-1").await.unwrap();

        assert!(!manager.release("res-A", "tok-2").await.unwrap());
        assert_eq!(manager.holder("res-A").await.unwrap(), Some("tok-1".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_input_rejected() {
        let manager = manager();

        assert!(matches!(manager.acquire("", "tok").await, Err(LockError::InvalidKey(_))));
        assert!(matches!(manager.acquire("k", "").await, Err(LockError::InvalidToken(_))));
        assert!(matches!(manager.release("", "tok").await, Err(LockError::InvalidKey(_))));
        assert!(matches!(manager.holder("").await, Err(LockError::InvalidKey(_))));
        assert!(manager.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_namespace_prefixes_store_key() {
        let store = Arc::new(MemoryLockStore::new());
        let manager = LockManager::from_shared(
            store.clone(),
            LockConfig::default().with_namespace("scheduler"),
        )
        .unwrap();

        manager.acquire("lease", "node-1").await.unwrap();

        assert_eq!(store.get("scheduler:lease").await.unwrap(), Some("node-1".to_string()));
        assert_eq!(store.get("lease").await.unwrap(), None);
        assert_eq!(manager.holder("lease").await.unwrap(), Some("node-1".to_string()));
    }

    #[tokio::test]
    async fn test_configured_lease_ttl_applied() {
        let manager = LockManager::with_config(
            MemoryLockStore::new(),
            LockConfig::default().with_lease_ttl(Duration::from_secs(5)),
        )
        .unwrap();

        manager.acquire("res-A", "tok-1").await.unwrap();

        let remaining = manager.store().remaining_ttl("res-A").await.unwrap().remaining().unwrap();
        assert!(remaining <= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_zero_lease_rejected_before_any_claim() {
        let store = Arc::new(MemoryLockStore::new());

        let result = LockManager::from_shared(
            store.clone(),
            LockConfig::default().with_lease_ttl(Duration::ZERO),
        );
        assert!(matches!(result, Err(LockError::Config(_))));

        let result = LockManager::with_config(
            MemoryLockStore::new(),
            LockConfig::default().with_lease_ttl(Duration::from_micros(999)),
        );
        assert!(matches!(result, Err(LockError::Config(_))));

        // A valid lease still excludes a second holder while live
        let manager = LockManager::from_shared(
            store.clone(),
            LockConfig::default().with_lease_ttl(Duration::from_secs(1)),
        )
        .unwrap();
        assert!(manager.acquire("k", "t1").await.unwrap());
        assert!(!manager.acquire("k", "t2").await.unwrap());
        assert_eq!(manager.holder("k").await.unwrap(), Some("t1".to_string()));
    }
}
