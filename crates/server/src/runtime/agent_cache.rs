//! Per-thread provider cache with idle reclamation.
//!
//! Providers are built lazily by the configured factory on first use and
//! reused across a thread's turns. A janitor reclaims entries that have
//! sat unused past the idle TTL — unless their thread currently holds a
//! turn slot. Teardown always runs outside the lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use hub_providers::{AgentStreamer, ProviderError};
use hub_storage::ThreadRecord;

use crate::runtime::controller::TurnController;

/// Builds a provider instance for one thread.
pub type AgentFactory =
    Arc<dyn Fn(&ThreadRecord) -> Result<Arc<dyn AgentStreamer>, ProviderError> + Send + Sync>;

struct CachedAgent {
    provider: Arc<dyn AgentStreamer>,
    last_used: Instant,
}

pub struct ThreadAgentCache {
    entries: Mutex<HashMap<String, CachedAgent>>,
    factory: AgentFactory,
    idle_ttl: Duration,
}

impl ThreadAgentCache {
    pub fn new(factory: AgentFactory, idle_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            factory,
            idle_ttl,
        }
    }

    /// Return the thread's provider, building it on first use.
    ///
    /// The factory runs without the lock held; if a concurrent caller
    /// installed an entry in the meantime, the freshly built instance is
    /// torn down and the winner reused.
    pub fn resolve(&self, thread: &ThreadRecord) -> Result<Arc<dyn AgentStreamer>, ProviderError> {
        {
            let mut entries = self.entries.lock();
            if let Some(cached) = entries.get_mut(&thread.thread_id) {
                cached.last_used = Instant::now();
                return Ok(cached.provider.clone());
            }
        }

        let created = (self.factory)(thread)?;

        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get_mut(&thread.thread_id) {
            existing.last_used = Instant::now();
            let winner = existing.provider.clone();
            drop(entries);
            tokio::spawn(async move { created.close().await });
            return Ok(winner);
        }
        entries.insert(
            thread.thread_id.clone(),
            CachedAgent {
                provider: created.clone(),
                last_used: Instant::now(),
            },
        );
        tracing::debug!(
            thread_id = %thread.thread_id,
            agent = created.name(),
            "thread agent created"
        );
        Ok(created)
    }

    /// Spawn the background janitor. Ticks at `max(500ms, idle_ttl / 2)`.
    pub fn spawn_janitor(
        self: &Arc<Self>,
        controller: Arc<TurnController>,
    ) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        let period = std::cmp::max(Duration::from_millis(500), cache.idle_ttl / 2);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.reap_idle(&controller).await;
            }
        })
    }

    async fn reap_idle(&self, controller: &TurnController) {
        let now = Instant::now();
        let reaped: Vec<(String, Arc<dyn AgentStreamer>)> = {
            let mut entries = self.entries.lock();
            let expired: Vec<String> = entries
                .iter()
                .filter(|(thread_id, cached)| {
                    cached.last_used + self.idle_ttl < now
                        && !controller.is_thread_active(thread_id)
                })
                .map(|(thread_id, _)| thread_id.clone())
                .collect();
            expired
                .into_iter()
                .filter_map(|thread_id| {
                    entries
                        .remove(&thread_id)
                        .map(|cached| (thread_id, cached.provider))
                })
                .collect()
        };

        for (thread_id, provider) in reaped {
            provider.close().await;
            tracing::info!(thread_id = %thread_id, "reclaimed idle thread agent");
        }
    }

    /// Teardown every cached provider (shutdown path).
    pub async fn close_all(&self) {
        let drained: Vec<Arc<dyn AgentStreamer>> = {
            let mut entries = self.entries.lock();
            entries.drain().map(|(_, cached)| cached.provider).collect()
        };
        for provider in drained {
            provider.close().await;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
