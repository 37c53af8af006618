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

//! Configuration for the lock manager.
//!
//! ## Environment Variables
//! - `PLEXSPACES_LOCKS_TTL_SECS`: Lease expiry in seconds (default: 180)
//! - `PLEXSPACES_LOCKS_NAMESPACE`: Key prefix, joined with `:` (default: none)
//! - `PLEXSPACES_LOCKS_RELEASE_MAX_ATTEMPTS`: Upper bound on release
//!   compare-and-delete attempts (default: unbounded)
//! - `PLEXSPACES_LOCKS_RELEASE_BACKOFF_MS`: Pause between aborted release
//!   attempts (default: 0)
//!
//! The Redis URL is read separately by
//! `store::redis::RedisStoreConfig::from_env` (`PLEXSPACES_LOCKS_REDIS_URL`).
//!
//! ## Example
//! ```bash
//! export PLEXSPACES_LOCKS_NAMESPACE=scheduler
//! export PLEXSPACES_LOCKS_RELEASE_MAX_ATTEMPTS=16
//! export PLEXSPACES_LOCKS_RELEASE_BACKOFF_MS=5
//! cargo run
//! ```

use crate::{LockError, LockResult};
use std::time::Duration;

/// Lease expiry applied to every acquired key unless configured otherwise.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(180);

/// Shortest lease the stores can represent (Redis `PX` granularity).
pub const MIN_LEASE_TTL: Duration = Duration::from_millis(1);

/// How `release` retries when its commit is aborted by a concurrent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReleaseRetryPolicy {
    /// Maximum number of compare-and-delete attempts; `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Sleep between an aborted attempt and the next one.
    pub backoff: Duration,
}

impl ReleaseRetryPolicy {
    /// Retry until the token check fails or the delete commits.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Give up after `max_attempts` aborted commits.
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff: Duration::ZERO,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether another attempt is allowed after `attempts` have run.
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }
}

/// Lock manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    /// Expiry attached to each acquired key
    pub lease_ttl: Duration,
    /// Optional key prefix for isolating applications on a shared store
    pub namespace: Option<String>,
    /// Release retry behavior
    pub release_retry: ReleaseRetryPolicy,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_ttl: DEFAULT_LEASE_TTL,
            namespace: None,
            release_retry: ReleaseRetryPolicy::unbounded(),
        }
    }
}

impl LockConfig {
    /// Create configuration from environment variables.
    ///
    /// Unset variables keep their defaults; set but malformed ones fail with
    /// [`LockError::Config`].
    pub fn from_env() -> LockResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> LockResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64>(&lookup, "PLEXSPACES_LOCKS_TTL_SECS")? {
            if secs == 0 {
                return Err(LockError::Config(
                    "PLEXSPACES_LOCKS_TTL_SECS must be greater than zero".to_string(),
                ));
            }
            config.lease_ttl = Duration::from_secs(secs);
        }

        config.namespace = lookup("PLEXSPACES_LOCKS_NAMESPACE").filter(|s| !s.is_empty());

        if let Some(max) = parse_var::<u32>(&lookup, "PLEXSPACES_LOCKS_RELEASE_MAX_ATTEMPTS")? {
            if max == 0 {
                return Err(LockError::Config(
                    "PLEXSPACES_LOCKS_RELEASE_MAX_ATTEMPTS must be at least 1".to_string(),
                ));
            }
            config.release_retry.max_attempts = Some(max);
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "PLEXSPACES_LOCKS_RELEASE_BACKOFF_MS")? {
            config.release_retry.backoff = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break the lock protocol.
    ///
    /// A lease shorter than one millisecond is written already expired, so
    /// two holders could both see a successful claim. A retry bound of zero
    /// would give up before the first compare-and-delete.
    pub fn validate(&self) -> LockResult<()> {
        if self.lease_ttl < MIN_LEASE_TTL {
            return Err(LockError::Config(format!(
                "lease TTL must be at least {:?}, got {:?}",
                MIN_LEASE_TTL, self.lease_ttl
            )));
        }
        if self.release_retry.max_attempts == Some(0) {
            return Err(LockError::Config(
                "release retry bound must be at least 1 attempt".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.namespace = (!namespace.is_empty()).then_some(namespace);
        self
    }

    pub fn with_release_retry(mut self, policy: ReleaseRetryPolicy) -> Self {
        self.release_retry = policy;
        self
    }

    /// Key as stored, with the namespace prefix applied.
    pub fn store_key(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}:{}", ns, key),
            None => key.to_string(),
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> LockResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| LockError::Config(format!("{name}={raw:?}: {e}"))),
    }
}
