//! Time-to-live cache for values refreshed from the network.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;

use crate::errors::Result;

/// Holds one value with a refresh lifecycle. Reads within the TTL serve the
/// held value; an expired read runs the supplied refresh and replaces the
/// value in a single assignment. A failed refresh keeps serving the stale
/// value, so callers never observe an error caused by a background refresh.
pub struct TtlCache<T> {
    slot: RwLock<Option<(T, Instant)>>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slot: RwLock::new(None),
            ttl,
        }
    }

    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some((value, fetched_at)) = self.slot.read().await.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(value.clone());
            }
        }

        match refresh().await {
            Ok(fresh) => {
                *self.slot.write().await = Some((fresh.clone(), Instant::now()));
                Ok(fresh)
            }
            Err(err) => {
                if let Some((stale, _)) = self.slot.read().await.as_ref() {
                    warn!("cache refresh failed, serving stale value: {err}");
                    return Ok(stale.clone());
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StakeError;

    #[tokio::test]
    async fn test_fresh_value_is_reused() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let first = cache.get_or_refresh(|| async { Ok(1u32) }).await.unwrap();
        // The second closure must not run while the value is fresh.
        let second = cache
            .get_or_refresh(|| async { panic!("refresh ran while fresh") })
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_stale_value_survives_failed_refresh() {
        let cache = TtlCache::new(Duration::from_secs(0));
        cache.get_or_refresh(|| async { Ok(7u32) }).await.unwrap();
        let value = cache
            .get_or_refresh(|| async { Err(StakeError::Config("down".into())) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_initial_failure_propagates() {
        tokio_test::block_on(async {
            let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
            let result = cache
                .get_or_refresh(|| async { Err(StakeError::Config("down".into())) })
                .await;
            assert!(result.is_err());
        });
    }
}
