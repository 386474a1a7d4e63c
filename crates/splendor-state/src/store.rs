//! In-memory chain store: blocks, headers, and receipts.
//!
//! The persistent chain database is an external collaborator; this store
//! keeps what the node itself needs to answer receipt and header queries.

use dashmap::DashMap;
use parking_lot::RwLock;
use splendor_types::{Header, Receipt, Transaction, H256};
use tracing::debug;

/// A block as stored: its header plus transaction list.
#[derive(Debug, Clone)]
pub struct StoredBlock {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

/// Chain block and receipt index.
#[derive(Default)]
pub struct BlockStore {
    blocks: RwLock<Vec<StoredBlock>>,
    by_hash: DashMap<H256, u64>,
    receipts: DashMap<H256, Receipt>,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block and its receipts. Blocks must arrive in order.
    pub fn append(&self, block: StoredBlock, receipts: Vec<Receipt>) {
        let number = block.header.number;
        self.by_hash.insert(block.header.hash(), number);
        for receipt in receipts {
            self.receipts.insert(receipt.tx_hash, receipt);
        }
        self.blocks.write().push(block);
        debug!(number, "Block stored");
    }

    /// Height of the best stored block, or `None` before genesis.
    pub fn best_number(&self) -> Option<u64> {
        let blocks = self.blocks.read();
        blocks.last().map(|b| b.header.number)
    }

    pub fn block_by_number(&self, number: u64) -> Option<StoredBlock> {
        let blocks = self.blocks.read();
        blocks.iter().find(|b| b.header.number == number).cloned()
    }

    pub fn block_by_hash(&self, hash: &H256) -> Option<StoredBlock> {
        let number = *self.by_hash.get(hash)?;
        self.block_by_number(number)
    }

    pub fn header_by_number(&self, number: u64) -> Option<Header> {
        self.block_by_number(number).map(|b| b.header)
    }

    pub fn best_header(&self) -> Option<Header> {
        let blocks = self.blocks.read();
        blocks.last().map(|b| b.header.clone())
    }

    pub fn receipt(&self, tx_hash: &H256) -> Option<Receipt> {
        self.receipts.get(tx_hash).map(|r| r.clone())
    }

    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }
}
