use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::collab::MerchantHandle;
use crate::model::OwnerId;
use crate::observability::MERCHANTS_ACTIVE;

pub type SharedMerchant = Arc<dyn MerchantHandle>;

/// Owner id → open merchant. Many readers, one writer.
#[derive(Default)]
pub struct MerchantRegistry {
    merchants: RwLock<HashMap<OwnerId, SharedMerchant>>,
}

impl MerchantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, owner: OwnerId, merchant: SharedMerchant) {
        let previous = self.merchants.write().await.insert(owner, merchant);
        if previous.is_none() {
            metrics::gauge!(MERCHANTS_ACTIVE).increment(1.0);
        }
    }

    pub async fn remove(&self, owner: OwnerId) -> Option<SharedMerchant> {
        let removed = self.merchants.write().await.remove(&owner);
        if removed.is_some() {
            metrics::gauge!(MERCHANTS_ACTIVE).decrement(1.0);
        }
        removed
    }

    pub async fn get(&self, owner: OwnerId) -> Option<SharedMerchant> {
        self.merchants.read().await.get(&owner).cloned()
    }

    /// Point-in-time copy; later writes do not show through.
    pub async fn snapshot(&self) -> HashMap<OwnerId, SharedMerchant> {
        self.merchants.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.merchants.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.merchants.read().await.is_empty()
    }

    /// Empty the registry, then force every captured merchant closed.
    ///
    /// The write lock is released before any `force_close` runs: a merchant
    /// may remove itself from the registry while closing.
    pub async fn drain_and_close_all(&self) -> usize {
        let drained: Vec<SharedMerchant> = {
            let mut guard = self.merchants.write().await;
            guard.drain().map(|(_, m)| m).collect()
        };
        metrics::gauge!(MERCHANTS_ACTIVE).decrement(drained.len() as f64);

        for merchant in &drained {
            merchant.force_close().await;
        }
        if !drained.is_empty() {
            info!("closed {} merchants", drained.len());
        }
        drained.len()
    }
}
