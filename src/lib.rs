pub mod block;
pub mod client;
pub mod config;
pub mod datanode;
pub mod error;
pub mod namenode;
pub mod path;

pub mod proto {
    tonic::include_proto!("dfs_comms");
}

pub use client::DfsSession;
pub use config::DfsConfig;
pub use error::{DfsError, Result};
