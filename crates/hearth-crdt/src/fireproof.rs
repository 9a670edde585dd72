use async_trait::async_trait;
use hearth_loader::{CompactStrategy, Loader, LoaderError, LoaderResult};
use hearth_store::CarTransaction;
use hearth_types::ClockHead;
use tracing::debug;

use crate::history::replay;

/// Keeps only what the head can reach: every clock event and every
/// document body those events reference. Blocks orphaned by earlier
/// writes are left behind.
#[derive(Clone, Copy, Debug, Default)]
pub struct FireproofCompaction;

#[async_trait]
impl CompactStrategy for FireproofCompaction {
    async fn compact(
        &self,
        loader: &Loader,
        head: &ClockHead,
    ) -> LoaderResult<Option<CarTransaction>> {
        if head.is_empty() {
            return Ok(None);
        }
        let events = replay(loader, head, &ClockHead::new()).await?;
        let txn = CarTransaction::new();
        for (cid, event) in &events {
            let block = loader.get_block(cid).await?.ok_or_else(|| {
                LoaderError::InvariantViolation(format!("clock event {cid} is not in any car"))
            })?;
            txn.put(block)?;
            for update in &event.data.updates {
                let Some(value) = update.value else { continue };
                let block = loader.get_block(&value).await?.ok_or_else(|| {
                    LoaderError::InvariantViolation(format!(
                        "document {} body {value} is not in any car",
                        update.id
                    ))
                })?;
                txn.put(block)?;
            }
        }
        debug!(events = events.len(), blocks = txn.len(), "collected reachable blocks");
        Ok(Some(txn))
    }
}
