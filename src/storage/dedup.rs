use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::cli::config::DedupSettings;
use crate::storage::redis_bloom::RedisBloomFilter;

/// Membership test over the set of already-crawled tokens.
///
/// Implementations may report false positives (a never-crawled token
/// claimed seen) but must never report false negatives: once `mark`
/// returns, every later `exists` for that token answers true.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Query whether a token has been crawled.
    async fn exists(&self, token: &str) -> Result<bool>;

    /// Record a token as crawled.
    async fn mark(&self, token: &str) -> Result<()>;
}

/// Factory for creating a DedupStore implementation
pub struct Dedup;

impl Dedup {
    /// Create a new DedupStore instance based on the settings
    pub async fn create(settings: &DedupSettings) -> Result<Arc<dyn DedupStore>> {
        match settings.storage_type.as_str() {
            "redis" => {
                let store = RedisBloomFilter::new(settings).await?;
                Ok(Arc::new(store))
            }
            "memory" => Ok(Arc::new(MemoryDedup::new())),
            _ => {
                anyhow::bail!("Unsupported dedup storage type: {}", settings.storage_type);
            }
        }
    }
}

/// Exact in-memory set, for the memory storage type and for tests.
pub struct MemoryDedup {
    seen: RwLock<HashSet<String>>,
}

impl MemoryDedup {
    pub fn new() -> Self {
        Self {
            seen: RwLock::new(HashSet::new()),
        }
    }
}

impl Default for MemoryDedup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DedupStore for MemoryDedup {
    async fn exists(&self, token: &str) -> Result<bool> {
        Ok(self.seen.read().await.contains(token))
    }

    async fn mark(&self, token: &str) -> Result<()> {
        self.seen.write().await.insert(token.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_marked_token_is_always_seen() {
        let store = MemoryDedup::new();

        assert!(!store.exists("alice").await.unwrap());
        store.mark("alice").await.unwrap();

        for _ in 0..10 {
            assert!(store.exists("alice").await.unwrap());
        }
        assert!(!store.exists("bob").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_markers_never_lose_a_token() {
        let store = Arc::new(MemoryDedup::new());

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.mark(&format!("user-{}", i)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for i in 0..8 {
            assert!(store.exists(&format!("user-{}", i)).await.unwrap());
        }
    }
}
