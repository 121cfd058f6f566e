use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, Client};
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cli::config::DedupSettings;
use crate::storage::dedup::DedupStore;

/// Bloom filter over a Redis bitmap.
///
/// The filter persists across process restarts, which is what makes
/// the at-least-once crawl contract hold after a crash: a token marked
/// seen stays seen. Sizing is configuration-driven; the memory cost on
/// the Redis side is `bloom_bits / 8` bytes regardless of how many
/// tokens are marked.
pub struct RedisBloomFilter {
    /// Number of bits in the bitmap
    bits: u64,

    /// Number of hash functions per token
    hashes: u32,

    /// Redis key holding the bitmap
    key: String,

    /// Connection pool
    conn: Arc<Mutex<MultiplexedConnection>>,
}

/// Bit offsets for a token, one per salted hash function.
fn bit_positions(token: &str, hashes: u32, bits: u64) -> Vec<u64> {
    (0..u64::from(hashes))
        .map(|seed| {
            let mut hasher = DefaultHasher::new();
            hasher.write_u64(seed);
            hasher.write(token.as_bytes());
            hasher.finish() % bits
        })
        .collect()
}

impl RedisBloomFilter {
    /// Connect to Redis and wrap the configured bitmap key.
    pub async fn new(settings: &DedupSettings) -> Result<Self> {
        let client = Client::open(settings.redis_url.clone())
            .context(format!("Failed to connect to Redis at {}", settings.redis_url))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to get Redis connection")?;

        debug!(
            bits = settings.bloom_bits,
            hashes = settings.bloom_hashes,
            "Connected bloom filter to Redis"
        );

        Ok(Self {
            bits: settings.bloom_bits.max(1),
            hashes: settings.bloom_hashes.max(1),
            key: "spider:dedup:bloom".to_string(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl DedupStore for RedisBloomFilter {
    async fn exists(&self, token: &str) -> Result<bool> {
        let mut conn = self.conn.lock().await;

        for pos in bit_positions(token, self.hashes, self.bits) {
            let bit: u8 = redis::cmd("GETBIT")
                .arg(&self.key)
                .arg(pos)
                .query_async(&mut *conn)
                .await
                .context("Failed to read dedup bit from Redis")?;

            if bit == 0 {
                return Ok(false);
            }
        }

        Ok(true)
    }

    async fn mark(&self, token: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;

        for pos in bit_positions(token, self.hashes, self.bits) {
            let _: u8 = redis::cmd("SETBIT")
                .arg(&self.key)
                .arg(pos)
                .arg(1)
                .query_async(&mut *conn)
                .await
                .context("Failed to set dedup bit in Redis")?;
        }

        debug!(token, "Marked token as seen");

        Ok(())
    }
}
