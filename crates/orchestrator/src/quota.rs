//! Per-owner quota enforcement for bot creation.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use botforge_core::OwnerId;
use botforge_db::registry::BotRegistry;

use crate::errors::OrchestratorError;

/// Serializes quota-check-plus-create per owner, so two creates racing for
/// the last free slot cannot both pass the count. Distinct owners never wait
/// on each other. The count itself is always recomputed from the registry;
/// nothing here caches it.
pub struct QuotaGuard {
    limit: u32,
    owners: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Held for the duration of one quota-checked create. Dropping it releases
/// the owner's slot lock.
#[derive(Debug)]
pub struct SlotReservation {
    _lock: OwnedMutexGuard<()>,
}

impl QuotaGuard {
    pub fn new(limit: u32) -> Self {
        Self { limit, owners: Mutex::new(HashMap::new()) }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub async fn reserve(
        &self,
        registry: &dyn BotRegistry,
        owner: &OwnerId,
    ) -> Result<SlotReservation, OrchestratorError> {
        let lock = {
            let mut owners = self.owners.lock().await;
            // Entries nobody holds or waits on can go; a held guard keeps
            // its Arc alive, so strong_count == 1 means the lock is idle.
            owners.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(owners.entry(owner.as_str().to_owned()).or_default())
        };
        let held = lock.lock_owned().await;

        let count = registry.count_active(owner).await.map_err(|error| {
            OrchestratorError::Internal {
                owner: owner.clone(),
                operation: "count active bots",
                message: error.to_string(),
            }
        })?;
        if count >= self.limit {
            debug!(event_name = "quota.exhausted", owner = %owner, count, limit = self.limit);
            return Err(OrchestratorError::QuotaExceeded {
                owner: owner.clone(),
                limit: self.limit,
                count,
            });
        }

        Ok(SlotReservation { _lock: held })
    }
}
