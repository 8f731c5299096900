pub mod block_records;
pub mod cluster;
pub mod namespace;
pub mod server;

pub use block_records::BlockRecords;
pub use cluster::{Cluster, NodeInfo};
pub use namespace::Namespace;
pub use server::NameNodeServer;
