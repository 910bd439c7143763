use std::sync::Arc;

use crate::storage::{CursorStatus, RangeClaim, RangeStore, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum RangeError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Range cursor for owner '{owner}' has unknown status code {code}")]
    CorruptCursor { owner: String, code: i64 },
}

/// Drives one owner's range cursor through
/// `Processed -> UnderProcess -> InWriterQueue -> Processed`.
#[derive(Clone)]
pub struct RangeCheckout {
    store: Arc<dyn RangeStore>,
    owner_id: String,
}

impl RangeCheckout {
    pub fn new(store: Arc<dyn RangeStore>, owner_id: impl Into<String>) -> Self {
        Self {
            store,
            owner_id: owner_id.into(),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Claim the owner's next range.
    ///
    /// While the cursor is `UnderProcess` the same range is returned again. A
    /// cursor waiting on the writer yields `None`, as does an exhausted table.
    pub async fn claim(&self, max_count: usize) -> Result<Option<RangeClaim>, RangeError> {
        let cursor = match self.store.load_cursor(&self.owner_id).await? {
            None => return Ok(self.store.claim_next_range(&self.owner_id, max_count).await?),
            Some(cursor) => cursor,
        };

        match cursor.status() {
            Some(CursorStatus::Processed) => {
                Ok(self.store.claim_next_range(&self.owner_id, max_count).await?)
            }
            Some(CursorStatus::InWriterQueue) => Ok(None),
            Some(CursorStatus::UnderProcess) => {
                let ids = self
                    .store
                    .ids_in_range(cursor.range_from, cursor.range_to)
                    .await?;

                if ids.is_empty() {
                    tracing::warn!(
                        owner = %self.owner_id,
                        from = cursor.range_from,
                        to = cursor.range_to,
                        "Claimed range no longer has rows, releasing cursor"
                    );
                    self.store
                        .transition_cursor(
                            &self.owner_id,
                            CursorStatus::UnderProcess,
                            CursorStatus::Processed,
                        )
                        .await?;
                    return Ok(None);
                }

                // The high-water row is gone; completion must key on the last surviving id.
                let mut range_to = cursor.range_to;
                if let Some(&last) = ids.last() {
                    if last < range_to {
                        if !self.store.shrink_range(&self.owner_id, last).await? {
                            tracing::warn!(
                                owner = %self.owner_id,
                                to = cursor.range_to,
                                "Range cursor moved while shrinking, skipping claim"
                            );
                            return Ok(None);
                        }
                        tracing::info!(
                            owner = %self.owner_id,
                            from = range_to,
                            to = last,
                            "Lowered range high-water mark to the last remaining row"
                        );
                        range_to = last;
                    }
                }

                Ok(Some(RangeClaim {
                    range_from: cursor.range_from,
                    range_to,
                    ids,
                }))
            }
            None => Err(RangeError::CorruptCursor {
                owner: self.owner_id.clone(),
                code: cursor.status_code,
            }),
        }
    }

    /// Records of the claimed range were handed to the writer queue.
    pub async fn mark_in_writer_queue(&self) -> Result<bool, RangeError> {
        Ok(self
            .store
            .transition_cursor(
                &self.owner_id,
                CursorStatus::UnderProcess,
                CursorStatus::InWriterQueue,
            )
            .await?)
    }

    /// The record at `position` was persisted; completes the range if it is the high-water mark.
    pub async fn confirm_written(&self, position: i64) -> Result<bool, RangeError> {
        let completed = self.store.complete_range(&self.owner_id, position).await?;
        if completed {
            tracing::debug!(owner = %self.owner_id, range_to = position, "Range written");
        }
        Ok(completed)
    }

    /// Send a cursor stuck waiting on the writer back to `UnderProcess`. Run once at startup.
    pub async fn reset_stuck(&self) -> Result<bool, RangeError> {
        let reset = self
            .store
            .transition_cursor(
                &self.owner_id,
                CursorStatus::InWriterQueue,
                CursorStatus::UnderProcess,
            )
            .await?;
        if reset {
            tracing::info!(owner = %self.owner_id, "Reset range cursor stuck in writer queue");
        }
        Ok(reset)
    }
}
