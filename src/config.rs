use std::time::Duration;

use crate::client::RetryPolicy;

pub const DEFAULT_NAMENODE_ADDR: &str = "127.0.0.1:10000";
pub const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024 * 1024;
pub const DEFAULT_REPLICATION: u32 = 2;
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Configuration assembled once at startup and handed to each component
/// constructor. Layering is `Default::default()` for library defaults, then
/// `with_*` calls for user overrides; there is no hidden global state.
#[derive(Clone, Debug)]
pub struct DfsConfig {
    /// Endpoint of the namenode (namespace + placement services).
    pub namenode_addr: String,
    /// Replicas written per block.
    pub replication_factor: u32,
    /// Maximum bytes per block.
    pub block_size: u64,
    /// A node silent for longer than this is excluded from new allocations.
    pub heartbeat_timeout: Duration,
    /// How often a datanode reports in.
    pub heartbeat_interval: Duration,
    /// Per-call deadline on every RPC, connects included.
    pub rpc_timeout: Duration,
    /// Caller identity recorded as the owner of created entries.
    pub identity: String,
    /// Entries requested per listing page.
    pub page_size: u32,
    /// Retry budget for transient failures.
    pub retry: RetryPolicy,
}

impl Default for DfsConfig {
    fn default() -> Self {
        Self {
            namenode_addr: DEFAULT_NAMENODE_ADDR.to_string(),
            replication_factor: DEFAULT_REPLICATION,
            block_size: DEFAULT_BLOCK_SIZE,
            heartbeat_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(3),
            rpc_timeout: Duration::from_secs(10),
            identity: std::env::var("USER").unwrap_or_else(|_| "anonymous".to_string()),
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl DfsConfig {
    pub fn with_namenode_addr(mut self, addr: impl Into<String>) -> Self {
        self.namenode_addr = addr.into();
        self
    }

    pub fn with_replication_factor(mut self, factor: u32) -> Self {
        self.replication_factor = factor;
        self
    }

    pub fn with_block_size(mut self, bytes: u64) -> Self {
        self.block_size = bytes.max(1);
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_page_size(mut self, entries: u32) -> Self {
        self.page_size = entries.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
