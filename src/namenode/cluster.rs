use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use tracing::info;

use crate::block::BlockId;
use crate::error::{DfsError, Result};
use crate::namenode::block_records::BlockRecords;

/// Liveness and capacity view of one datanode. Created on first heartbeat,
/// mutated only by the heartbeat receiver, removed by an explicit purge.
#[derive(Clone, Debug)]
pub struct NodeInfo {
    pub node_id: String,
    pub addr: String,
    pub free_bytes: u64,
    pub last_heartbeat: SystemTime,
}

impl NodeInfo {
    fn is_live(&self, timeout: Duration) -> bool {
        self.last_heartbeat
            .elapsed()
            .map(|silence| silence <= timeout)
            .unwrap_or(true)
    }
}

/// Replica placement coordinator: tracks node liveness from heartbeats and
/// decides which nodes host each block. A node that falls silent is excluded
/// from new allocations, but its existing replica records survive until
/// `purge_stale` runs, so a transient partition does not read as data loss.
pub struct Cluster {
    heartbeat_timeout: Duration,
    nodes: Mutex<HashMap<String, NodeInfo>>,
    blocks: Mutex<BlockRecords>,
    block_id_counter: AtomicU64,
}

impl Cluster {
    pub fn new(heartbeat_timeout: Duration) -> Self {
        Self {
            heartbeat_timeout,
            nodes: Mutex::new(HashMap::new()),
            blocks: Mutex::new(BlockRecords::new()),
            block_id_counter: AtomicU64::new(1),
        }
    }

    pub fn record_heartbeat(&self, node_id: &str, addr: &str, free_bytes: u64) {
        let mut nodes = self.nodes.lock().unwrap();
        if !nodes.contains_key(node_id) {
            info!(node_id, addr, "new datanode joined");
        }
        nodes.insert(
            node_id.to_string(),
            NodeInfo {
                node_id: node_id.to_string(),
                addr: addr.to_string(),
                free_bytes,
                last_heartbeat: SystemTime::now(),
            },
        );
    }

    /// Nodes heard from within the heartbeat timeout, ordered by node id.
    pub fn live_nodes(&self) -> Vec<NodeInfo> {
        let nodes = self.nodes.lock().unwrap();
        let mut live: Vec<NodeInfo> = nodes
            .values()
            .filter(|node| node.is_live(self.heartbeat_timeout))
            .cloned()
            .collect();
        live.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        live
    }

    /// Every known node with its current liveness, for status reporting.
    pub fn all_nodes(&self) -> Vec<(NodeInfo, bool)> {
        let nodes = self.nodes.lock().unwrap();
        let mut all: Vec<(NodeInfo, bool)> = nodes
            .values()
            .map(|node| (node.clone(), node.is_live(self.heartbeat_timeout)))
            .collect();
        all.sort_by(|a, b| a.0.node_id.cmp(&b.0.node_id));
        all
    }

    /// Picks `count` live nodes for a new block, preferring the most free
    /// capacity and breaking ties by node id so placement is deterministic.
    /// Registers the block with its candidates and returns the new block id.
    pub fn allocate_replicas(&self, count: u32) -> Result<(BlockId, Vec<NodeInfo>)> {
        let mut candidates = self.live_nodes();
        if (candidates.len() as u32) < count {
            return Err(DfsError::InsufficientReplicas {
                wanted: count,
                live: candidates.len() as u32,
            });
        }
        candidates.sort_by(|a, b| {
            b.free_bytes
                .cmp(&a.free_bytes)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        candidates.truncate(count as usize);

        let block_id = self.block_id_counter.fetch_add(1, Ordering::SeqCst);
        let node_ids = candidates.iter().map(|n| n.node_id.clone()).collect();
        self.blocks.lock().unwrap().add_block(block_id, node_ids)?;
        Ok((block_id, candidates))
    }

    pub fn commit_replicas(&self, block_id: BlockId, acked: &[String]) -> Result<()> {
        self.blocks.lock().unwrap().commit(block_id, acked)
    }

    /// Datanode addresses holding a block, live replicas first so readers
    /// try healthy nodes before stale ones.
    pub fn replicas_of(&self, block_id: BlockId) -> Result<Vec<String>> {
        let replicas = self.blocks.lock().unwrap().replicas(block_id)?;
        let nodes = self.nodes.lock().unwrap();
        let (live, stale): (Vec<String>, Vec<String>) =
            replicas.into_iter().partition(|node_id| {
                nodes
                    .get(node_id)
                    .map(|node| node.is_live(self.heartbeat_timeout))
                    .unwrap_or(false)
            });
        let addr_of = |node_id: &String| {
            nodes
                .get(node_id)
                .map(|node| node.addr.clone())
                .unwrap_or_else(|| node_id.clone())
        };
        let mut ordered: Vec<String> = live.iter().map(addr_of).collect();
        ordered.extend(stale.iter().map(addr_of));
        Ok(ordered)
    }

    /// Forgets a block and reports which datanode addresses held it.
    pub fn remove_block(&self, block_id: BlockId) -> Vec<String> {
        let node_ids = self.blocks.lock().unwrap().remove(block_id);
        let nodes = self.nodes.lock().unwrap();
        node_ids
            .into_iter()
            .map(|node_id| {
                nodes
                    .get(&node_id)
                    .map(|node| node.addr.clone())
                    .unwrap_or(node_id)
            })
            .collect()
    }

    /// Explicit reconciliation: drops nodes that outlived the heartbeat
    /// timeout and strips them from every replica record. Deliberately not
    /// called from the heartbeat path.
    pub fn purge_stale(&self) -> Vec<String> {
        let mut nodes = self.nodes.lock().unwrap();
        let stale: Vec<String> = nodes
            .values()
            .filter(|node| !node.is_live(self.heartbeat_timeout))
            .map(|node| node.node_id.clone())
            .collect();
        let mut blocks = self.blocks.lock().unwrap();
        for node_id in &stale {
            nodes.remove(node_id);
            let stripped = blocks.strip_node(node_id);
            info!(node_id, stripped, "purged dead datanode");
        }
        let mut purged = stale;
        purged.sort();
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG: Duration = Duration::from_secs(30);
    const SHORT: Duration = Duration::from_millis(40);

    #[test]
    fn heartbeat_registers_and_refreshes_nodes() {
        let cluster = Cluster::new(LONG);
        cluster.record_heartbeat("127.0.0.1:5000", "127.0.0.1:5000", 100);
        cluster.record_heartbeat("127.0.0.1:5001", "127.0.0.1:5001", 200);
        cluster.record_heartbeat("127.0.0.1:5000", "127.0.0.1:5000", 90);

        let live = cluster.live_nodes();
        assert_eq!(live.len(), 2);
        assert_eq!(live[0].node_id, "127.0.0.1:5000");
        assert_eq!(live[0].free_bytes, 90);
    }

    #[test]
    fn placement_prefers_free_capacity_then_node_id() {
        let cluster = Cluster::new(LONG);
        cluster.record_heartbeat("n1", "n1", 100);
        cluster.record_heartbeat("n2", "n2", 500);
        cluster.record_heartbeat("n3", "n3", 300);

        let (block_id, replicas) = cluster.allocate_replicas(2).unwrap();
        let picked: Vec<&str> = replicas.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(picked, ["n2", "n3"]);
        assert_eq!(cluster.replicas_of(block_id).unwrap(), vec!["n2", "n3"]);

        // equal capacity falls back to node id order
        let tied = Cluster::new(LONG);
        tied.record_heartbeat("b", "b", 100);
        tied.record_heartbeat("a", "a", 100);
        tied.record_heartbeat("c", "c", 100);
        let (_, replicas) = tied.allocate_replicas(3).unwrap();
        let picked: Vec<&str> = replicas.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(picked, ["a", "b", "c"]);
    }

    #[test]
    fn too_few_live_nodes_fails_allocation() {
        let cluster = Cluster::new(LONG);
        cluster.record_heartbeat("n1", "n1", 100);
        match cluster.allocate_replicas(2) {
            Err(DfsError::InsufficientReplicas { wanted, live }) => {
                assert_eq!((wanted, live), (2, 1));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn silent_nodes_are_excluded_but_not_forgotten() {
        let cluster = Cluster::new(SHORT);
        cluster.record_heartbeat("n1", "n1", 100);
        cluster.record_heartbeat("n2", "n2", 100);
        let (block_id, _) = cluster.allocate_replicas(2).unwrap();
        cluster.commit_replicas(block_id, &["n1".into(), "n2".into()]).unwrap();

        std::thread::sleep(SHORT * 2);
        cluster.record_heartbeat("n2", "n2", 100);

        // n1 is out of the running for new blocks
        assert!(matches!(
            cluster.allocate_replicas(2),
            Err(DfsError::InsufficientReplicas { .. })
        ));
        // but its committed replica record survives, listed after live nodes
        assert_eq!(cluster.replicas_of(block_id).unwrap(), vec!["n2", "n1"]);
    }

    #[test]
    fn purge_drops_stale_nodes_and_their_replicas() {
        let cluster = Cluster::new(SHORT);
        cluster.record_heartbeat("n1", "n1", 100);
        cluster.record_heartbeat("n2", "n2", 100);
        let (block_id, _) = cluster.allocate_replicas(2).unwrap();
        cluster.commit_replicas(block_id, &["n1".into(), "n2".into()]).unwrap();

        std::thread::sleep(SHORT * 2);
        cluster.record_heartbeat("n2", "n2", 100);

        assert_eq!(cluster.purge_stale(), vec!["n1".to_string()]);
        assert_eq!(cluster.replicas_of(block_id).unwrap(), vec!["n2"]);
        assert_eq!(cluster.live_nodes().len(), 1);
        // purge is idempotent
        assert!(cluster.purge_stale().is_empty());
    }

    #[test]
    fn block_ids_are_unique_and_monotonic() {
        let cluster = Cluster::new(LONG);
        cluster.record_heartbeat("n1", "n1", 100);
        let (first, _) = cluster.allocate_replicas(1).unwrap();
        let (second, _) = cluster.allocate_replicas(1).unwrap();
        assert!(second > first);
    }
}
