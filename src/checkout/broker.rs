use std::sync::Arc;

use crate::storage::{BrokerRow, SourceStore, StorageError};

/// Upper bound on ids per mark-processed or delete statement.
pub const FINALIZE_BATCH_SIZE: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Claims broker rows for one worker identity and finalizes them afterwards.
#[derive(Clone)]
pub struct BrokerCheckout {
    store: Arc<dyn SourceStore>,
    owner_id: String,
}

impl BrokerCheckout {
    pub fn new(store: Arc<dyn SourceStore>, owner_id: impl Into<String>) -> Self {
        Self {
            store,
            owner_id: owner_id.into(),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Claim up to `max_count` available rows. No available rows yields an empty list.
    pub async fn claim(&self, max_count: usize) -> Result<Vec<BrokerRow>, CheckoutError> {
        let rows = self.store.claim_broker_rows(max_count, &self.owner_id).await?;
        if !rows.is_empty() {
            tracing::debug!(owner = %self.owner_id, count = rows.len(), "Claimed broker rows");
        }
        Ok(rows)
    }

    /// Return every row this owner still holds to the pool. Run once at startup.
    pub async fn reset_stuck(&self) -> Result<usize, CheckoutError> {
        let reset = self.store.reset_broker_rows(&self.owner_id).await?;
        if reset > 0 {
            tracing::info!(owner = %self.owner_id, count = reset, "Reset stuck broker rows");
        }
        Ok(reset)
    }

    pub async fn mark_processed(&self, ids: &[i64]) -> Result<usize, CheckoutError> {
        let mut total = 0;
        for chunk in ids.chunks(FINALIZE_BATCH_SIZE) {
            total += self
                .store
                .mark_broker_rows_processed(chunk, &self.owner_id)
                .await?;
        }
        Ok(total)
    }

    pub async fn delete(&self, ids: &[i64]) -> Result<usize, CheckoutError> {
        let mut total = 0;
        for chunk in ids.chunks(FINALIZE_BATCH_SIZE) {
            total += self
                .store
                .delete_owned_broker_rows(chunk, &self.owner_id)
                .await?;
        }
        Ok(total)
    }
}
