//! Contract event indexer.
//!
//! Polls `eth_getLogs` for the marketplace contract in bounded block ranges,
//! decodes each log into a [`MarketplaceEvent`](property_sale::MarketplaceEvent)
//! and projects the batch into Postgres together with the checkpoint, so a
//! restart resumes from the last committed block.
//!
//! Blocks within `confirmations` of the head are left for a later pass.
//! Deeper reorgs are not rolled back.

pub mod projection;

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::Address;
use alloy::providers::Provider;
use alloy::rpc::types::Filter;
use async_trait::async_trait;
use diesel::Connection;
use log::{debug, error, info, warn};
use property_sale::IndexedEvent;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::db::DbPool;
use crate::store::{run_blocking, ReadModelStore, StoreError};

const TIMESTAMP_CACHE_LIMIT: usize = 1024;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(#[from] alloy::transports::TransportError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("block {0} not found")]
    MissingBlock(u64),
}

#[derive(Debug, Clone)]
pub struct IndexerOptions {
    pub contract: Address,
    pub start_block: u64,
    pub batch_size: u64,
    /// Blocks to stay behind the head.
    pub confirmations: u64,
    pub poll_interval: Duration,
}

/// Where indexed batches land.
#[async_trait]
pub trait IndexerStore: Send + Sync {
    /// Last block fully projected, if any.
    async fn checkpoint(&self) -> Result<Option<u64>, StoreError>;

    /// Projects `events` and records `through_block` as the checkpoint in a
    /// single transaction. Returns the number of events projected.
    async fn commit(
        &self,
        events: Vec<IndexedEvent>,
        through_block: u64,
    ) -> Result<usize, StoreError>;
}

#[async_trait]
impl IndexerStore for DbPool {
    async fn checkpoint(&self) -> Result<Option<u64>, StoreError> {
        run_blocking(self.clone(), |conn| conn.checkpoint()).await
    }

    async fn commit(
        &self,
        events: Vec<IndexedEvent>,
        through_block: u64,
    ) -> Result<usize, StoreError> {
        run_blocking(self.clone(), move |conn| {
            conn.transaction(|conn| projection::apply_batch(conn, &events, through_block))
        })
        .await
    }
}

pub struct EventIndexer<P, S = DbPool> {
    provider: P,
    store: S,
    options: IndexerOptions,
    timestamps: HashMap<u64, u64>,
}

impl<P, S> EventIndexer<P, S>
where
    P: Provider + Send + Sync + 'static,
    S: IndexerStore + 'static,
{
    pub fn new(provider: P, store: S, options: IndexerOptions) -> Self {
        Self {
            provider,
            store,
            options,
            timestamps: HashMap::new(),
        }
    }

    /// Start the indexer in a background task. Returns immediately.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_forever().await;
        })
    }

    async fn run_forever(mut self) {
        info!(
            "indexing PropertySale at {} from block {} ({} confirmations)",
            self.options.contract, self.options.start_block, self.options.confirmations
        );
        loop {
            match self.sync_once().await {
                Ok(0) => {}
                Ok(count) => info!("indexed {} marketplace events", count),
                Err(e) => error!("indexer pass failed, retrying next poll: {}", e),
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    /// Catches the read model up to `head - confirmations`. Returns the number
    /// of events projected.
    pub async fn sync_once(&mut self) -> Result<usize, IndexerError> {
        let head = self.provider.get_block_number().await?;
        let Some(safe_head) = head.checked_sub(self.options.confirmations) else {
            return Ok(0);
        };
        let checkpoint = self.store.checkpoint().await?;
        let mut from = checkpoint.map_or(self.options.start_block, |block| block + 1);
        let batch_size = self.options.batch_size.max(1);
        let mut total = 0;

        while from <= safe_head {
            let to = from.saturating_add(batch_size - 1).min(safe_head);
            let filter = Filter::new()
                .address(self.options.contract)
                .from_block(from)
                .to_block(to);
            let logs = self.provider.get_logs(&filter).await?;

            let mut events = Vec::with_capacity(logs.len());
            for log in &logs {
                if log.removed {
                    debug!("skipping removed log {:?}", log.transaction_hash);
                    continue;
                }
                match IndexedEvent::from_log(log) {
                    Ok(Some(mut event)) => {
                        if event.meta.block_timestamp.is_none() {
                            event.meta.block_timestamp =
                                Some(self.block_timestamp(event.meta.block_number).await?);
                        }
                        events.push(event);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(
                        "skipping log {:?} in block {:?}: {}",
                        log.log_index, log.block_number, e
                    ),
                }
            }

            let count = self.store.commit(events, to).await?;
            if count > 0 {
                info!("blocks {}..={}: projected {} events", from, to, count);
            }
            total += count;
            from = to + 1;
        }

        Ok(total)
    }

    async fn block_timestamp(&mut self, number: u64) -> Result<u64, IndexerError> {
        if let Some(timestamp) = self.timestamps.get(&number) {
            return Ok(*timestamp);
        }
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await?
            .ok_or(IndexerError::MissingBlock(number))?;
        let timestamp = block.header.timestamp;
        if self.timestamps.len() >= TIMESTAMP_CACHE_LIMIT {
            self.timestamps.clear();
        }
        self.timestamps.insert(number, timestamp);
        Ok(timestamp)
    }
}
