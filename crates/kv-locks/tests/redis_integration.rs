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

//! Redis lock integration tests.
//!
//! Require a running Redis (`PLEXSPACES_LOCKS_REDIS_URL`, default
//! `redis://localhost:6379`); run with `cargo test -- --ignored`.

#[cfg(feature = "redis-backend")]
mod tests {
    use plexspaces_kv_locks::store::redis::{RedisLockStore, RedisStoreConfig};
    use plexspaces_kv_locks::{
        generate_token, AcquireOutcome, KeyTtl, LockConfig, LockManager, LockStore, ReleaseOutcome,
    };
    use std::time::Duration;
    use ulid::Ulid;

    /// Unique namespace per test so runs never collide
    async fn create_manager() -> LockManager<RedisLockStore> {
        let store = RedisLockStore::from_config(&RedisStoreConfig::from_env())
            .await
            .expect("Failed to connect to Redis (ensure Redis is running)");
        let namespace = format!("plexspaces-locks-test:{}", Ulid::new());
        LockManager::with_config(store, LockConfig::default().with_namespace(namespace)).unwrap()
    }

    #[tokio::test]
    #[ignore] // Requires running Redis instance
    async fn test_redis_acquire_release() {
        let manager = create_manager().await;

        assert!(manager.acquire("res-A", "tok-1").await.unwrap());
        assert!(!manager.acquire("res-A", "tok-2").await.unwrap());
        assert!(!manager.release("res-A", "tok-2").await.unwrap());
        assert!(manager.release("res-A", "tok-1").await.unwrap());
        assert_eq!(manager.holder("res-A").await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_lease_ttl_attached() {
        let manager = create_manager().await;
        manager.acquire("res-A", "tok-1").await.unwrap();

        let key = manager.config().store_key("res-A");
        let remaining = manager.store().remaining_ttl(&key).await.unwrap().remaining().unwrap();
        assert!(remaining <= Duration::from_secs(180));
        assert!(remaining > Duration::from_secs(170));

        assert!(manager.release("res-A", "tok-1").await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_held_outcome() {
        let manager = create_manager().await;
        manager.acquire("res-A", "tok-1").await.unwrap();

        let outcome = manager.try_acquire("res-A", "tok-2").await.unwrap();
        assert!(matches!(outcome, AcquireOutcome::Held { .. }));

        manager.release("res-A", "tok-1").await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_key_without_expiry_runs_recovery() {
        let manager = create_manager().await;
        let key = manager.config().store_key("res-B");

        // Holder wrote the value and died before attaching the expiry
        let client = redis::Client::open(RedisStoreConfig::from_env().url).unwrap();
        let mut conn = client.get_multiplexed_async_connection().await.unwrap();
        redis::cmd("SET")
            .arg(&key)
            .arg("tok-3")
            .query_async::<()>(&mut conn)
            .await
            .unwrap();
        assert_eq!(manager.store().remaining_ttl(&key).await.unwrap(), KeyTtl::Persistent);

        let outcome = manager.try_acquire("res-B", "tok-4").await.unwrap();
        assert_eq!(outcome, AcquireOutcome::Recovered { reset: false });
        assert_eq!(manager.holder("res-B").await.unwrap(), Some("tok-3".to_string()));
        assert_eq!(manager.store().remaining_ttl(&key).await.unwrap(), KeyTtl::Persistent);

        // Cleanup
        assert!(manager.release("res-B", "tok-3").await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_short_lease_expires() {
        let manager = create_manager().await;
        let manager = LockManager::with_config(
            manager.store().clone(),
            manager.config().clone().with_lease_ttl(Duration::from_millis(300)),
        )
        .unwrap();

        assert!(manager.acquire("job", "node-1").await.unwrap());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(manager.acquire("job", "node-2").await.unwrap());

        manager.release("job", "node-2").await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore]
    async fn test_redis_concurrent_acquire_single_winner() {
        let manager = create_manager().await;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                let token = generate_token();
                let acquired = manager.acquire("contended", &token).await.unwrap();
                (token, acquired)
            }));
        }

        let mut winner = None;
        let mut wins = 0;
        for handle in handles {
            let (token, acquired) = handle.await.unwrap();
            if acquired {
                wins += 1;
                winner = Some(token);
            }
        }
        assert_eq!(wins, 1);

        let winner = winner.unwrap();
        assert_eq!(
            manager.try_release("contended", &winner).await.unwrap(),
            ReleaseOutcome::Released { attempts: 1 }
        );
    }
}
