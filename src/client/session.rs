use tonic::transport::{Channel, Endpoint};
use tonic::Request;
use tracing::{info, warn};

use crate::client::listing::{DirectoryEntries, FileLister};
use crate::client::retry::with_retry;
use crate::config::DfsConfig;
use crate::error::{DfsError, Result};
use crate::path::DfsPath;
use crate::proto::client_protocols_client::ClientProtocolsClient;
use crate::proto::data_node_protocols_client::DataNodeProtocolsClient;
use crate::proto::{
    AllocateBlockRequest, AllocateBlockResponse, BlockLocation, BlockLocationsResponse,
    ClientInfo, CommitBlockRequest, CreateFileRequest, DeleteBlockRequest, DeleteRequest,
    FileStatus, FinalizeBlockRequest, ListChildrenRequest, MkdirRequest, PathRequest,
    ReadBlockRequest, RenameRequest, SystemInfoRequest, SystemInfoResponse, WriteBlockRequest,
};

/// The single entry point an application uses: namespace operations, block
/// streaming, and cluster status against one namenode endpoint. A session
/// holds no persistent state of its own; clones share one multiplexed
/// channel, and the underlying connections close when the last clone drops,
/// on every exit path.
#[derive(Clone)]
pub struct DfsSession {
    config: DfsConfig,
    channel: Channel,
}

impl DfsSession {
    pub async fn connect(config: DfsConfig) -> Result<Self> {
        let endpoint = endpoint_for(&config.namenode_addr, &config)?;
        let channel = with_retry(&config.retry, "connect", || {
            let endpoint = endpoint.clone();
            async move { endpoint.connect().await.map_err(DfsError::from) }
        })
        .await?;
        Ok(Self { config, channel })
    }

    pub fn config(&self) -> &DfsConfig {
        &self.config
    }

    fn namenode(&self) -> ClientProtocolsClient<Channel> {
        ClientProtocolsClient::new(self.channel.clone())
    }

    fn client_info(&self) -> Option<ClientInfo> {
        Some(ClientInfo {
            identity: self.config.identity.clone(),
        })
    }

    async fn datanode(&self, addr: &str) -> Result<DataNodeProtocolsClient<Channel>> {
        let endpoint = endpoint_for(addr, &self.config)?;
        let channel = endpoint.connect().await?;
        Ok(DataNodeProtocolsClient::new(channel))
    }

    pub async fn mkdir(&self, path: &str) -> Result<()> {
        let request = MkdirRequest {
            client: self.client_info(),
            path: path.to_string(),
            permissions: 0,
        };
        with_retry(&self.config.retry, "mkdir", || {
            let mut client = self.namenode();
            let request = request.clone();
            async move {
                client
                    .mkdir(Request::new(request))
                    .await
                    .map_err(DfsError::from_status)?;
                Ok(())
            }
        })
        .await
    }

    /// Creates every missing directory along `path`, like the usual
    /// mkdir-with-parents convenience. Existing directories are fine.
    pub async fn mkdir_all(&self, path: &str) -> Result<()> {
        let full = DfsPath::parse(path)?;
        let mut current = DfsPath::root();
        for segment in full.segments() {
            current = current.join(segment);
            match self.mkdir(&current.to_string()).await {
                Ok(()) | Err(DfsError::AlreadyExists(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Returns how many blocks the delete released for reclamation.
    pub async fn delete(&self, path: &str, recursive: bool) -> Result<u64> {
        let request = DeleteRequest {
            client: self.client_info(),
            path: path.to_string(),
            recursive,
        };
        with_retry(&self.config.retry, "delete", || {
            let mut client = self.namenode();
            let request = request.clone();
            async move {
                let response = client
                    .delete(Request::new(request))
                    .await
                    .map_err(DfsError::from_status)?;
                Ok(response.into_inner().blocks_reclaimed)
            }
        })
        .await
    }

    pub async fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let request = RenameRequest {
            client: self.client_info(),
            src: src.to_string(),
            dst: dst.to_string(),
        };
        with_retry(&self.config.retry, "rename", || {
            let mut client = self.namenode();
            let request = request.clone();
            async move {
                client
                    .rename(Request::new(request))
                    .await
                    .map_err(DfsError::from_status)?;
                Ok(())
            }
        })
        .await
    }

    pub async fn stat(&self, path: &str) -> Result<FileStatus> {
        let request = PathRequest {
            client: self.client_info(),
            path: path.to_string(),
        };
        with_retry(&self.config.retry, "stat", || {
            let mut client = self.namenode();
            let request = request.clone();
            async move {
                let response = client
                    .get_file_info(Request::new(request))
                    .await
                    .map_err(DfsError::from_status)?;
                response
                    .into_inner()
                    .status
                    .ok_or_else(|| DfsError::Transport("file info missing from response".into()))
            }
        })
        .await
    }

    /// Immediate children of a directory, fully drained. For large
    /// directories prefer [`DfsSession::list_children`], which pages lazily.
    pub async fn list_status(&self, path: &str) -> Result<Vec<FileStatus>> {
        let mut entries = self.list_children(path);
        let mut statuses = Vec::new();
        while let Some(status) = entries.next().await? {
            statuses.push(status);
        }
        Ok(statuses)
    }

    /// Lazy page-at-a-time iteration over a directory's children.
    pub fn list_children(&self, path: &str) -> DirectoryEntries {
        DirectoryEntries::new(self.clone(), path)
    }

    /// Lazy walk yielding files with block and replica detail. With
    /// `recursive` the whole subtree is visited, one listing page at a time;
    /// the full result set is never held in memory.
    pub fn list_files(&self, path: &str, recursive: bool) -> FileLister {
        FileLister::new(self.clone(), path, recursive)
    }

    pub async fn system_status(&self) -> Result<SystemInfoResponse> {
        let request = SystemInfoRequest {
            client: self.client_info(),
        };
        with_retry(&self.config.retry, "system_status", || {
            let mut client = self.namenode();
            let request = request.clone();
            async move {
                let response = client
                    .get_system_status(Request::new(request))
                    .await
                    .map_err(DfsError::from_status)?;
                Ok(response.into_inner())
            }
        })
        .await
    }

    /// Splits `data` into block-size chunks, writes every chunk to all of
    /// its allocated replicas, and registers each block only after every
    /// replica acknowledged. On failure the half-written file is removed
    /// before the error surfaces.
    pub async fn upload(&self, data: &[u8], dest: &str) -> Result<FileStatus> {
        let block_size = self.config.block_size.max(1) as usize;
        self.register_file(dest).await?;
        info!(dest, bytes = data.len(), "upload started");

        for chunk in data.chunks(block_size) {
            if let Err(err) = self.upload_block(dest, chunk).await {
                if let Err(cleanup) = self.delete(dest, false).await {
                    warn!(dest, %cleanup, "cleanup after failed upload also failed");
                }
                return Err(err);
            }
        }
        self.stat(dest).await
    }

    /// Resolves a file to its blocks and reads each one from the first
    /// replica that produces intact bytes, falling back replica by replica.
    pub async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let located = self.block_locations(path).await?;
        let expected = located
            .status
            .as_ref()
            .map(|status| status.length)
            .unwrap_or(0);
        let mut contents = Vec::with_capacity(expected as usize);
        for block in &located.blocks {
            contents.extend(self.fetch_block(block).await?);
        }
        Ok(contents)
    }

    pub(crate) async fn list_children_page(
        &self,
        path: &str,
        page_token: Option<String>,
    ) -> Result<(Vec<FileStatus>, Option<String>)> {
        let request = ListChildrenRequest {
            client: self.client_info(),
            path: path.to_string(),
            page_token: page_token.unwrap_or_default(),
            page_size: self.config.page_size,
        };
        with_retry(&self.config.retry, "list_children", || {
            let mut client = self.namenode();
            let request = request.clone();
            async move {
                let response = client
                    .list_children(Request::new(request))
                    .await
                    .map_err(DfsError::from_status)?
                    .into_inner();
                let next_token = if response.next_token.is_empty() {
                    None
                } else {
                    Some(response.next_token)
                };
                Ok((response.entries, next_token))
            }
        })
        .await
    }

    pub(crate) async fn block_locations(&self, path: &str) -> Result<BlockLocationsResponse> {
        let request = PathRequest {
            client: self.client_info(),
            path: path.to_string(),
        };
        with_retry(&self.config.retry, "block_locations", || {
            let mut client = self.namenode();
            let request = request.clone();
            async move {
                let response = client
                    .get_block_locations(Request::new(request))
                    .await
                    .map_err(DfsError::from_status)?;
                Ok(response.into_inner())
            }
        })
        .await
    }

    async fn register_file(&self, path: &str) -> Result<()> {
        let request = CreateFileRequest {
            client: self.client_info(),
            path: path.to_string(),
            block_size: self.config.block_size,
            permissions: 0,
        };
        with_retry(&self.config.retry, "create_file", || {
            let mut client = self.namenode();
            let request = request.clone();
            async move {
                client
                    .create_file(Request::new(request))
                    .await
                    .map_err(DfsError::from_status)?;
                Ok(())
            }
        })
        .await
    }

    async fn upload_block(&self, dest: &str, chunk: &[u8]) -> Result<()> {
        let allocation = self.allocate_block(dest).await?;
        let mut acked = Vec::with_capacity(allocation.replicas.len());
        for node in &allocation.replicas {
            self.write_replica(&node.address, allocation.block_id, chunk)
                .await
                .map_err(|err| {
                    warn!(
                        block_id = allocation.block_id,
                        node = %node.address,
                        %err,
                        "replica write failed"
                    );
                    DfsError::ReplicationFailed {
                        block_id: allocation.block_id,
                        node: node.address.clone(),
                    }
                })?;
            acked.push(node.node_id.clone());
        }
        self.commit_block(dest, allocation.block_id, chunk.len() as u64, acked)
            .await
    }

    async fn allocate_block(&self, path: &str) -> Result<AllocateBlockResponse> {
        let request = AllocateBlockRequest {
            client: self.client_info(),
            path: path.to_string(),
        };
        with_retry(&self.config.retry, "allocate_block", || {
            let mut client = self.namenode();
            let request = request.clone();
            async move {
                let response = client
                    .allocate_block(Request::new(request))
                    .await
                    .map_err(DfsError::from_status)?;
                Ok(response.into_inner())
            }
        })
        .await
    }

    async fn commit_block(
        &self,
        path: &str,
        block_id: u64,
        length: u64,
        nodes: Vec<String>,
    ) -> Result<()> {
        let request = CommitBlockRequest {
            client: self.client_info(),
            path: path.to_string(),
            block_id,
            length,
            nodes,
        };
        let committed = with_retry(&self.config.retry, "commit_block", || {
            let mut client = self.namenode();
            let request = request.clone();
            async move {
                client
                    .commit_block(Request::new(request))
                    .await
                    .map_err(DfsError::from_status)?;
                Ok(())
            }
        })
        .await;
        match committed {
            // a lost ack followed by a retry reports the block as already
            // registered; the first commit landed
            Err(DfsError::AlreadyExists(_)) => Ok(()),
            other => other,
        }
    }

    /// One replica write: any partial bytes from an earlier attempt are
    /// dropped, then the chunk is appended and the block sealed. Transient
    /// failures burn through the retry budget before giving up.
    async fn write_replica(&self, addr: &str, block_id: u64, data: &[u8]) -> Result<()> {
        with_retry(&self.config.retry, "write_block", || {
            let data = data.to_vec();
            async move {
                let mut client = self.datanode(addr).await?;
                match client
                    .delete_block(Request::new(DeleteBlockRequest { block_id }))
                    .await
                {
                    Ok(_) => {}
                    Err(status) => match DfsError::from_status(status) {
                        DfsError::BlockNotFound(_) => {}
                        err => return Err(err),
                    },
                }
                client
                    .write_block(Request::new(WriteBlockRequest { block_id, data }))
                    .await
                    .map_err(DfsError::from_status)?;
                client
                    .finalize_block(Request::new(FinalizeBlockRequest { block_id }))
                    .await
                    .map_err(DfsError::from_status)?;
                Ok(())
            }
        })
        .await
    }

    async fn fetch_block(&self, block: &BlockLocation) -> Result<Vec<u8>> {
        for addr in &block.nodes {
            match self.read_replica(addr, block.block_id).await {
                Ok(data) if data.len() as u64 == block.length => return Ok(data),
                Ok(data) => warn!(
                    block_id = block.block_id,
                    %addr,
                    got = data.len(),
                    want = block.length,
                    "short replica read"
                ),
                Err(err) => warn!(
                    block_id = block.block_id,
                    %addr,
                    %err,
                    "replica read failed, trying next"
                ),
            }
        }
        Err(DfsError::AllReplicasUnreachable(block.block_id))
    }

    async fn read_replica(&self, addr: &str, block_id: u64) -> Result<Vec<u8>> {
        with_retry(&self.config.retry, "read_block", || async move {
            let mut client = self.datanode(addr).await?;
            let response = client
                .read_block(Request::new(ReadBlockRequest {
                    block_id,
                    offset: 0,
                    length: 0,
                }))
                .await
                .map_err(DfsError::from_status)?;
            Ok(response.into_inner().data)
        })
        .await
    }
}

fn endpoint_for(addr: &str, config: &DfsConfig) -> Result<Endpoint> {
    Ok(Channel::from_shared(format!("http://{addr}"))
        .map_err(|err| DfsError::Transport(err.to_string()))?
        .connect_timeout(config.rpc_timeout)
        .timeout(config.rpc_timeout))
}
