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

//! # PlexSpaces Key-Value Locks
//!
//! ## Purpose
//! Distributed mutual exclusion for processes that share nothing but a
//! key-value store. A lock is a key; its value is the holder's token; its
//! expiry bounds how long a crashed holder can block everyone else.
//!
//! ## Design Decisions
//! - **Atomic claim**: set-if-absent with expiry, one store round trip
//! - **Token-gated release**: WATCH / compare / MULTI-DEL-EXEC, retried when
//!   a concurrent write aborts the commit
//! - **Crash-window recovery**: a key found without an expiry triggers a
//!   best-effort re-claim, but the caller is still told "not acquired"
//! - **Injected store**: the manager is generic over [`LockStore`], never a
//!   global client
//! - **Logical vs infrastructure failures**: contention and token mismatch
//!   are `Ok(false)`; store faults are `Err(LockError::Backend)`
//!
//! This is best-effort mutual exclusion bounded by the lease expiry. There
//! are no fencing tokens and no consensus.
//!
//! ## Backend Support
//! - **Memory**: in-process, for tests (feature: `memory-backend`)
//! - **Redis**: production (feature: `redis-backend`)
//!
//! ## Examples
//!
//! ### Basic Usage
//! ```rust
//! use plexspaces_kv_locks::{LockManager, store::memory::MemoryLockStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = LockManager::new(MemoryLockStore::new());
//!
//! assert!(manager.acquire("res-A", "tok-1").await?);
//! assert!(!manager.acquire("res-A", "tok-2").await?);
//!
//! assert!(!manager.release("res-A", "tok-2").await?);
//! assert!(manager.release("res-A", "tok-1").await?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod store;
pub mod token;

pub use config::{LockConfig, ReleaseRetryPolicy, DEFAULT_LEASE_TTL, MIN_LEASE_TTL};
pub use error::{LockError, LockResult};
pub use manager::{AcquireOutcome, LockManager, ReleaseOutcome};
pub use store::{CommitOutcome, KeyTtl, LockStore, StoreSession, Transaction};
pub use token::generate_token;
