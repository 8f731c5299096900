// Tracks which datanodes hold each block, from allocation through commit.
use std::collections::HashMap;

use crate::block::BlockId;
use crate::error::{DfsError, Result};

pub struct BlockMetadata {
    // datanode node ids in write order; candidates until committed
    replicas: Vec<String>,
    committed: bool,
}

#[derive(Default)]
pub struct BlockRecords {
    block_mappings: HashMap<BlockId, BlockMetadata>,
}

impl BlockRecords {
    pub fn new() -> Self {
        Self {
            block_mappings: HashMap::new(),
        }
    }

    /// Registers a freshly allocated block with its candidate replicas.
    pub fn add_block(&mut self, block_id: BlockId, candidates: Vec<String>) -> Result<()> {
        if self.block_mappings.contains_key(&block_id) {
            return Err(DfsError::AlreadyExists(format!("block {block_id}")));
        }
        self.block_mappings.insert(
            block_id,
            BlockMetadata {
                replicas: candidates,
                committed: false,
            },
        );
        Ok(())
    }

    /// Narrows the candidate set to the replicas that actually acknowledged
    /// the write. At least one ack is required once a block is committed.
    pub fn commit(&mut self, block_id: BlockId, acked: &[String]) -> Result<()> {
        let metadata = self
            .block_mappings
            .get_mut(&block_id)
            .ok_or(DfsError::BlockNotFound(block_id))?;
        if acked.is_empty() {
            return Err(DfsError::InsufficientReplicas { wanted: 1, live: 0 });
        }
        metadata.replicas.retain(|node| acked.contains(node));
        if metadata.replicas.is_empty() {
            metadata.replicas = acked.to_vec();
        }
        metadata.committed = true;
        Ok(())
    }

    /// Replica node ids for a block, in write order.
    pub fn replicas(&self, block_id: BlockId) -> Result<Vec<String>> {
        self.block_mappings
            .get(&block_id)
            .map(|metadata| metadata.replicas.clone())
            .ok_or(DfsError::BlockNotFound(block_id))
    }

    /// Drops a block and returns the nodes that were holding it.
    pub fn remove(&mut self, block_id: BlockId) -> Vec<String> {
        self.block_mappings
            .remove(&block_id)
            .map(|metadata| metadata.replicas)
            .unwrap_or_default()
    }

    /// Strips a node from every replica list; used when a dead node is
    /// purged. Returns how many blocks lost a replica.
    pub fn strip_node(&mut self, node_id: &str) -> usize {
        let mut stripped = 0;
        for metadata in self.block_mappings.values_mut() {
            let before = metadata.replicas.len();
            metadata.replicas.retain(|node| node != node_id);
            if metadata.replicas.len() < before {
                stripped += 1;
            }
        }
        stripped
    }

    pub fn is_committed(&self, block_id: BlockId) -> bool {
        self.block_mappings
            .get(&block_id)
            .map(|metadata| metadata.committed)
            .unwrap_or(false)
    }
}
