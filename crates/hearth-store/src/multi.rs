use std::sync::Arc;

use async_trait::async_trait;
use hearth_types::{Block, Cid};
use tracing::debug;

use crate::error::StoreResult;
use crate::traits::BlockFetcher;

/// Chain of fetchers consulted in order.
///
/// The first fetcher that returns a block wins. A fetcher that fails is
/// skipped; its error is only reported if no later fetcher has the block.
#[derive(Clone, Default)]
pub struct MultiFetcher {
    fetchers: Vec<Arc<dyn BlockFetcher>>,
}

impl MultiFetcher {
    pub fn new(fetchers: Vec<Arc<dyn BlockFetcher>>) -> Self {
        Self { fetchers }
    }

    pub fn push(&mut self, fetcher: Arc<dyn BlockFetcher>) {
        self.fetchers.push(fetcher);
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }
}

#[async_trait]
impl BlockFetcher for MultiFetcher {
    async fn fetch(&self, cid: &Cid) -> StoreResult<Option<Block>> {
        let mut first_error = None;
        for (i, fetcher) in self.fetchers.iter().enumerate() {
            match fetcher.fetch(cid).await {
                Ok(Some(block)) => return Ok(Some(block)),
                Ok(None) => {}
                Err(e) => {
                    debug!(cid = %cid.short_hex(), fetcher = i, error = %e, "fetcher failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for MultiFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiFetcher")
            .field("fetchers", &self.fetchers.len())
            .finish()
    }
}
