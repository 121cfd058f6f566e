use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cli::config::UserStorageSettings;

/// One crawled profile as persisted by the parse stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub url_token: String,
    pub following_count: Option<u64>,
    pub follower_count: Option<u64>,
    pub crawled_at: DateTime<Utc>,
}

/// Trait for persisting discovered profiles
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert or refresh one profile row
    async fn save_profile(&self, profile: &UserProfile) -> Result<()>;
}

/// Factory for creating a UserStore implementation
pub struct UserStorage;

impl UserStorage {
    /// Create a new UserStore instance based on the settings
    pub async fn create(settings: &UserStorageSettings) -> Result<Arc<dyn UserStore>> {
        match settings.storage_type.as_str() {
            "postgresql" => {
                let store = PgUserStore::new(settings).await?;
                Ok(Arc::new(store))
            }
            "memory" => Ok(Arc::new(MemoryUserStore::new())),
            _ => {
                anyhow::bail!(
                    "Unsupported user storage type: {}",
                    settings.storage_type
                );
            }
        }
    }
}

/// PostgreSQL implementation of UserStore
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    /// Connect to PostgreSQL and make sure the profile table exists.
    pub async fn new(settings: &UserStorageSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&settings.connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_profiles (
                url_token TEXT PRIMARY KEY,
                following_count BIGINT,
                follower_count BIGINT,
                crawled_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .context("Failed to create user_profiles table")?;

        debug!("Connected user storage to PostgreSQL");

        Ok(Self { pool })
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn save_profile(&self, profile: &UserProfile) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_profiles (url_token, following_count, follower_count, crawled_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (url_token) DO UPDATE SET
                 following_count = EXCLUDED.following_count,
                 follower_count = EXCLUDED.follower_count,
                 crawled_at = EXCLUDED.crawled_at",
        )
        .bind(&profile.url_token)
        .bind(profile.following_count.map(|count| count as i64))
        .bind(profile.follower_count.map(|count| count as i64))
        .bind(profile.crawled_at)
        .execute(&self.pool)
        .await
        .context("Failed to store user profile")?;

        debug!(token = %profile.url_token, "Stored user profile");

        Ok(())
    }
}

/// In-memory implementation, for the memory storage type and for tests.
pub struct MemoryUserStore {
    rows: Mutex<Vec<UserProfile>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
        }
    }

    pub async fn profiles(&self) -> Vec<UserProfile> {
        self.rows.lock().await.clone()
    }
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn save_profile(&self, profile: &UserProfile) -> Result<()> {
        let mut rows = self.rows.lock().await;
        if let Some(existing) = rows
            .iter_mut()
            .find(|row| row.url_token == profile.url_token)
        {
            *existing = profile.clone();
        } else {
            rows.push(profile.clone());
        }
        Ok(())
    }
}
