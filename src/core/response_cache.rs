// src/core/response_cache.rs - TTL cache of validated task outputs

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::types::{Envelope, ExecutionContext, TaskInputs};
use crate::infra::errors::TollgateError;
use crate::library::{CachePolicy, TaskDefinition};

struct CacheEntry {
    envelope: Envelope,
    stored_at: Instant,
    expires_at: Instant,
}

/// Shared across runs. Only outputs that passed validation are stored.
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    max_entries: usize,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(512)
    }
}

impl ResponseCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Render the policy's key template and hash it with SHA-256.
    pub fn cache_key(
        policy: &CachePolicy,
        task: &TaskDefinition,
        context: &ExecutionContext,
        inputs: &TaskInputs,
    ) -> Result<String, TollgateError> {
        let env = minijinja::Environment::new();
        let rendered = env
            .template_from_str(&policy.key_template)
            .and_then(|t| {
                t.render(minijinja::context! {
                    task_id => &task.id,
                    version => task.version,
                    lane => &task.lane,
                    stage => context.stage(),
                    entity_id => context.entity_id().unwrap_or(""),
                    date => context.date(),
                    pipeline_id => context.pipeline_id(),
                    metadata => context.metadata(),
                    inputs => inputs,
                })
            })
            .map_err(|e| anyhow::anyhow!("cache key template for '{}' failed: {e}", task.id))?;
        Ok(hex::encode(Sha256::digest(rendered.as_bytes())))
    }

    /// A live entry, if any. Expired entries are dropped on access.
    pub fn get(&self, key: &str) -> Option<Envelope> {
        let mut entries = self.entries();
        match entries.get(key) {
            Some(e) if e.expires_at > Instant::now() => Some(e.envelope.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, envelope: Envelope, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries();
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            entries.retain(|_, e| e.expires_at > now);
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.stored_at)
                    .map(|(k, _)| k.clone());
                if let Some(k) = oldest {
                    entries.remove(&k);
                }
            }
        }
        entries.insert(
            key,
            CacheEntry {
                envelope,
                stored_at: now,
                expires_at: now + ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }
}
