// =============================================================================
// FLASH SALE CACHE
// =============================================================================
// Optional Redis cache for the raw flash sale listing.
//
// Only stored records are cached, never the derived status: "active" depends
// on the clock at read time, so it is recomputed on every request.
//
// Redis is best effort. Any failure is logged and treated as a miss; the
// store stays the source of truth.
// =============================================================================

use std::time::Instant;

use redis::aio::ConnectionManager;

use crate::metrics;
use crate::models::FlashSale;

const LISTING_KEY: &str = "flash_sales:all";

#[derive(Clone)]
pub struct FlashSaleCache {
    conn: Option<ConnectionManager>,
    ttl_secs: u64,
}

impl FlashSaleCache {
    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self {
            conn: None,
            ttl_secs: 0,
        }
    }

    pub async fn connect(redis_url: &str, ttl_secs: u64) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn: Some(conn),
            ttl_secs,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    pub async fn get_listing(&self) -> Option<Vec<FlashSale>> {
        let mut conn = self.conn.clone()?;
        let start = Instant::now();

        let cached: Option<String> = match redis::cmd("GET")
            .arg(LISTING_KEY)
            .query_async(&mut conn)
            .await
        {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "Flash sale cache read failed");
                return None;
            }
        };
        metrics::record_redis_operation("get", start.elapsed().as_secs_f64());

        let sales = serde_json::from_str(&cached?)
            .map_err(|err| tracing::warn!(error = %err, "Discarding unreadable cache entry"))
            .ok()?;
        tracing::debug!("Flash sale listing served from cache");
        Some(sales)
    }

    pub async fn put_listing(&self, sales: &[FlashSale]) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        let payload = match serde_json::to_string(sales) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "Cannot serialize flash sale listing");
                return;
            }
        };

        let start = Instant::now();
        let result: Result<(), _> = redis::cmd("SETEX")
            .arg(LISTING_KEY)
            .arg(self.ttl_secs)
            .arg(payload)
            .query_async(&mut conn)
            .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, "Flash sale cache write failed");
        }
        metrics::record_redis_operation("setex", start.elapsed().as_secs_f64());
    }

    /// Drop the cached listing after an admin write.
    pub async fn invalidate(&self) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        let result: Result<(), _> = redis::cmd("DEL")
            .arg(LISTING_KEY)
            .query_async(&mut conn)
            .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, "Flash sale cache invalidation failed");
        }
    }

    /// `None` when no cache is configured.
    pub async fn ping(&self) -> Option<bool> {
        let mut conn = self.conn.clone()?;
        Some(
            redis::cmd("PING")
                .query_async::<_, String>(&mut conn)
                .await
                .is_ok(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_cache_is_always_a_miss() {
        let cache = FlashSaleCache::disabled();

        cache.put_listing(&[]).await;
        cache.invalidate().await;

        assert!(!cache.is_enabled());
        assert!(cache.get_listing().await.is_none());
        assert_eq!(cache.ping().await, None);
    }
}
