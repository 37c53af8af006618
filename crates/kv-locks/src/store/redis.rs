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

//! Redis-backed lock store.
//!
//! ## Commands
//! - `SET key value PX <ms> NX` for the atomic claim
//! - `PTTL key` for the crash-window check (`-2` missing, `-1` no expiry)
//! - `GET key`
//! - `WATCH` / `UNWATCH` / `MULTI` + `DEL` + `EXEC` for release
//!
//! ## Connections
//! Stateless commands share one [`ConnectionManager`] (pooled, reconnecting).
//! WATCH is connection state, so each [`RedisSession`] opens its own
//! multiplexed connection and drops it when the session ends. Sharing the
//! manager's connection would let one caller's WATCH leak into another's
//! EXEC.

use crate::store::{CommitOutcome, KeyTtl, LockStore, QueuedOp, StoreSession, Transaction};
use crate::{LockError, LockResult};
use ::redis::aio::{ConnectionManager, MultiplexedConnection};
use ::redis::{AsyncCommands, Client};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

/// Default Redis URL when none is configured.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Redis connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisStoreConfig {
    /// Redis server URL, e.g. `redis://127.0.0.1/` or `rediss://host:6379/`
    pub url: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
        }
    }
}

impl RedisStoreConfig {
    /// Read `PLEXSPACES_LOCKS_REDIS_URL`, falling back to the default URL.
    pub fn from_env() -> Self {
        let url = std::env::var("PLEXSPACES_LOCKS_REDIS_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());
        Self { url }
    }
}

/// Lock store over a Redis server.
#[derive(Clone)]
pub struct RedisLockStore {
    client: Client,
    manager: ConnectionManager,
}

impl RedisLockStore {
    /// Connect to Redis at `url`.
    ///
    /// ## Errors
    /// - [`LockError::Backend`]: invalid URL or the server is unreachable
    #[instrument(skip(url))]
    pub async fn new(url: &str) -> LockResult<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;

        debug!("Redis lock store connected");
        Ok(Self { client, manager })
    }

    /// Connect using a [`RedisStoreConfig`].
    pub async fn from_config(config: &RedisStoreConfig) -> LockResult<Self> {
        Self::new(&config.url).await
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    type Session = RedisSession;

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LockResult<bool> {
        let mut conn = self.manager.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if ttl_ms == 0 {
            return Err(LockError::Config(format!(
                "lease TTL {:?} is below Redis PX granularity",
                ttl
            )));
        }

        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(format!("Redis SET NX failed: {}", e)))?;

        Ok(reply.is_some())
    }

    async fn remaining_ttl(&self, key: &str) -> LockResult<KeyTtl> {
        let mut conn = self.manager.clone();

        let millis: i64 = conn
            .pttl(key)
            .await
            .map_err(|e| LockError::Backend(format!("Redis PTTL failed: {}", e)))?;

        Ok(KeyTtl::from_pttl(millis))
    }

    async fn get(&self, key: &str) -> LockResult<Option<String>> {
        let mut conn = self.manager.clone();

        conn.get(key)
            .await
            .map_err(|e| LockError::Backend(format!("Redis GET failed: {}", e)))
    }

    async fn session(&self) -> LockResult<RedisSession> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| LockError::Backend(format!("failed to open redis session: {e}")))?;
        Ok(RedisSession { conn })
    }
}

/// Dedicated connection carrying WATCH state for one release.
pub struct RedisSession {
    conn: MultiplexedConnection,
}

#[async_trait]
impl StoreSession for RedisSession {
    async fn watch(&mut self, key: &str) -> LockResult<()> {
        ::redis::cmd("WATCH")
            .arg(key)
            .query_async::<()>(&mut self.conn)
            .await
            .map_err(|e| LockError::Backend(format!("Redis WATCH failed: {}", e)))
    }

    async fn get(&mut self, key: &str) -> LockResult<Option<String>> {
        self.conn
            .get(key)
            .await
            .map_err(|e| LockError::Backend(format!("Redis GET failed: {}", e)))
    }

    async fn unwatch(&mut self) -> LockResult<()> {
        ::redis::cmd("UNWATCH")
            .query_async::<()>(&mut self.conn)
            .await
            .map_err(|e| LockError::Backend(format!("Redis UNWATCH failed: {}", e)))
    }

    async fn commit(&mut self, tx: Transaction) -> LockResult<CommitOutcome> {
        let mut pipe = ::redis::pipe();
        pipe.atomic();
        for op in tx.ops() {
            match op {
                QueuedOp::Delete(key) => {
                    pipe.del(key);
                }
            }
        }

        // EXEC replies nil when a watched key changed
        let replies: Option<Vec<i64>> = pipe
            .query_async(&mut self.conn)
            .await
            .map_err(|e| LockError::Backend(format!("Redis EXEC failed: {}", e)))?;

        Ok(match replies {
            Some(replies) => CommitOutcome::Committed(replies),
            None => CommitOutcome::Aborted,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
