use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::pipeline::{Cache, CacheError};

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

/// In-process hash cache with per-field expiry
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, HashMap<String, Entry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live value of one field
    pub async fn get(&self, key: &str, field: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?.get(field)?;
        if entry.expires_at > Instant::now() {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Drop expired fields and empty keys
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        for fields in entries.values_mut() {
            fields.retain(|_, e| e.expires_at > now);
        }
        entries.retain(|_, fields| !fields.is_empty());
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set(&self, key: &str, field: &str, value: &Value, ttl: Duration) -> Result<(), CacheError> {
        let entry = Entry {
            value: value.clone(),
            expires_at: Instant::now() + ttl,
        };
        let mut entries = self.entries.write().await;
        entries
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str, fields: &[&str]) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get_mut(key) {
            for field in fields {
                existing.remove(*field);
            }
            if existing.is_empty() {
                entries.remove(key);
            }
        }
        Ok(())
    }
}
