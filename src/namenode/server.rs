use std::net::SocketAddr;
use std::sync::Arc;

use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use crate::block::BlockId;
use crate::config::DfsConfig;
use crate::namenode::cluster::Cluster;
use crate::namenode::namespace::{
    EntryInfo, Namespace, DEFAULT_DIR_PERMISSIONS, DEFAULT_FILE_PERMISSIONS,
};
use crate::path::DfsPath;
use crate::proto::client_protocols_server::{ClientProtocols, ClientProtocolsServer};
use crate::proto::data_node_protocols_client::DataNodeProtocolsClient;
use crate::proto::heartbeat_protocol_server::{HeartbeatProtocol, HeartbeatProtocolServer};
use crate::proto::{
    AllocateBlockRequest, AllocateBlockResponse, BlockLocation, BlockLocationsResponse,
    ClientInfo, CommitBlockRequest, CreateFileRequest, DeleteBlockRequest, DeleteRequest,
    DeleteResponse, FileInfoResponse, FileStatus, GenericReply, Heartbeat, ListChildrenRequest,
    ListChildrenResponse, MkdirRequest, NodeStatus, PathRequest, RenameRequest,
    SystemInfoRequest, SystemInfoResponse,
};

/// Server that runs the namenode: the namespace tree and the replica
/// placement coordinator behind one listening address.
pub struct NameNodeServer {
    address: SocketAddr,
    namespace: Arc<Namespace>,
    cluster: Arc<Cluster>,
    config: DfsConfig,
}

impl NameNodeServer {
    pub fn new(address: SocketAddr, config: DfsConfig) -> Self {
        Self {
            address,
            namespace: Arc::new(Namespace::new(config.page_size as usize)),
            cluster: Arc::new(Cluster::new(config.heartbeat_timeout)),
            config,
        }
    }

    pub async fn run(&self) -> crate::error::Result<()> {
        let client_service = NameNodeService {
            address: self.address.to_string(),
            namespace: Arc::clone(&self.namespace),
            cluster: Arc::clone(&self.cluster),
            config: self.config.clone(),
        };
        let heartbeat_service = HeartbeatRecordService {
            cluster: Arc::clone(&self.cluster),
        };
        info!(addr = %self.address, "namenode listening");

        Server::builder()
            .add_service(ClientProtocolsServer::new(client_service))
            .add_service(HeartbeatProtocolServer::new(heartbeat_service))
            .serve(self.address)
            .await?;
        Ok(())
    }
}

struct NameNodeService {
    address: String,
    namespace: Arc<Namespace>,
    cluster: Arc<Cluster>,
    config: DfsConfig,
}

impl NameNodeService {
    fn page_size(&self, requested: u32) -> usize {
        if requested == 0 {
            self.config.page_size as usize
        } else {
            requested as usize
        }
    }
}

fn identity_of(client: Option<ClientInfo>) -> String {
    client.map(|c| c.identity).unwrap_or_default()
}

fn parse_path(raw: &str) -> std::result::Result<DfsPath, Status> {
    DfsPath::parse(raw).map_err(Status::from)
}

fn file_status(info: EntryInfo) -> FileStatus {
    FileStatus {
        path: info.path,
        name: info.name,
        is_dir: info.is_dir,
        length: info.length,
        permissions: info.permissions,
        owner: info.owner,
        modified_ms: info.modified_ms,
        block_size: info.block_size,
    }
}

fn ack(message: String) -> GenericReply {
    GenericReply {
        is_success: true,
        message,
    }
}

/// Best-effort reclamation of a deleted file's blocks. Failures are logged
/// and left for a later reconciliation pass; the replica records are gone
/// either way.
fn spawn_block_reclaim(block_id: BlockId, addrs: Vec<String>) {
    for addr in addrs {
        tokio::spawn(async move {
            let outcome = async {
                let mut client =
                    DataNodeProtocolsClient::connect(format!("http://{addr}")).await?;
                client
                    .delete_block(Request::new(DeleteBlockRequest { block_id }))
                    .await?;
                Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
            }
            .await;
            if let Err(err) = outcome {
                warn!(block_id, %addr, %err, "block reclaim failed");
            }
        });
    }
}

#[tonic::async_trait]
impl ClientProtocols for NameNodeService {
    async fn get_system_status(
        &self,
        request: Request<SystemInfoRequest>,
    ) -> std::result::Result<Response<SystemInfoResponse>, Status> {
        let who = identity_of(request.into_inner().client);
        info!(%who, "system status requested");

        let namenode_status = NodeStatus {
            node_id: self.address.clone(),
            address: self.address.clone(),
            is_online: true,
            free_bytes: 0,
        };
        let nodes: Vec<NodeStatus> = self
            .cluster
            .all_nodes()
            .into_iter()
            .map(|(node, live)| NodeStatus {
                node_id: node.node_id,
                address: node.addr,
                is_online: live,
                free_bytes: node.free_bytes,
            })
            .collect();

        let num_datanodes = nodes.len() as i64;
        Ok(Response::new(SystemInfoResponse {
            namenode: Some(namenode_status),
            nodes,
            num_datanodes,
        }))
    }

    async fn mkdir(
        &self,
        request: Request<MkdirRequest>,
    ) -> std::result::Result<Response<GenericReply>, Status> {
        let request = request.into_inner();
        let who = identity_of(request.client);
        let path = parse_path(&request.path)?;
        info!(%who, %path, "mkdir");

        let permissions = if request.permissions == 0 {
            DEFAULT_DIR_PERMISSIONS
        } else {
            request.permissions
        };
        self.namespace
            .create_dir(&path, &who, permissions)
            .map_err(Status::from)?;
        Ok(Response::new(ack(format!("created directory {path}"))))
    }

    async fn delete(
        &self,
        request: Request<DeleteRequest>,
    ) -> std::result::Result<Response<DeleteResponse>, Status> {
        let request = request.into_inner();
        let who = identity_of(request.client);
        let path = parse_path(&request.path)?;
        info!(%who, %path, recursive = request.recursive, "delete");

        let reclaimed = self
            .namespace
            .delete(&path, request.recursive)
            .map_err(Status::from)?;
        let blocks_reclaimed = reclaimed.len() as u64;
        for block_id in reclaimed {
            let addrs = self.cluster.remove_block(block_id);
            spawn_block_reclaim(block_id, addrs);
        }
        Ok(Response::new(DeleteResponse {
            response: Some(ack(format!("deleted {path}"))),
            blocks_reclaimed,
        }))
    }

    async fn rename(
        &self,
        request: Request<RenameRequest>,
    ) -> std::result::Result<Response<GenericReply>, Status> {
        let request = request.into_inner();
        let who = identity_of(request.client);
        let src = parse_path(&request.src)?;
        let dst = parse_path(&request.dst)?;
        info!(%who, %src, %dst, "rename");

        self.namespace.rename(&src, &dst).map_err(Status::from)?;
        Ok(Response::new(ack(format!("renamed {src} to {dst}"))))
    }

    async fn get_file_info(
        &self,
        request: Request<PathRequest>,
    ) -> std::result::Result<Response<FileInfoResponse>, Status> {
        let request = request.into_inner();
        let path = parse_path(&request.path)?;
        let info = self.namespace.resolve(&path).map_err(Status::from)?;
        Ok(Response::new(FileInfoResponse {
            status: Some(file_status(info)),
        }))
    }

    async fn list_children(
        &self,
        request: Request<ListChildrenRequest>,
    ) -> std::result::Result<Response<ListChildrenResponse>, Status> {
        let request = request.into_inner();
        let path = parse_path(&request.path)?;
        let token = if request.page_token.is_empty() {
            None
        } else {
            Some(request.page_token.as_str())
        };
        let (entries, next_token) = self
            .namespace
            .list_children(&path, token, self.page_size(request.page_size))
            .map_err(Status::from)?;
        Ok(Response::new(ListChildrenResponse {
            entries: entries.into_iter().map(file_status).collect(),
            next_token: next_token.unwrap_or_default(),
        }))
    }

    async fn create_file(
        &self,
        request: Request<CreateFileRequest>,
    ) -> std::result::Result<Response<GenericReply>, Status> {
        let request = request.into_inner();
        let who = identity_of(request.client);
        let path = parse_path(&request.path)?;
        info!(%who, %path, "create file");

        let block_size = if request.block_size == 0 {
            self.config.block_size
        } else {
            request.block_size
        };
        let permissions = if request.permissions == 0 {
            DEFAULT_FILE_PERMISSIONS
        } else {
            request.permissions
        };
        self.namespace
            .create_file(&path, block_size, &who, permissions)
            .map_err(Status::from)?;
        Ok(Response::new(ack(format!("created file {path}"))))
    }

    async fn allocate_block(
        &self,
        request: Request<AllocateBlockRequest>,
    ) -> std::result::Result<Response<AllocateBlockResponse>, Status> {
        let request = request.into_inner();
        let path = parse_path(&request.path)?;
        // the file must exist before blocks are handed out for it
        self.namespace.file_blocks(&path).map_err(Status::from)?;

        let (block_id, replicas) = self
            .cluster
            .allocate_replicas(self.config.replication_factor)
            .map_err(Status::from)?;
        info!(%path, block_id, replicas = replicas.len(), "allocated block");

        Ok(Response::new(AllocateBlockResponse {
            block_id,
            replicas: replicas
                .into_iter()
                .map(|node| NodeStatus {
                    node_id: node.node_id,
                    address: node.addr,
                    is_online: true,
                    free_bytes: node.free_bytes,
                })
                .collect(),
        }))
    }

    async fn commit_block(
        &self,
        request: Request<CommitBlockRequest>,
    ) -> std::result::Result<Response<GenericReply>, Status> {
        let request = request.into_inner();
        let path = parse_path(&request.path)?;

        self.cluster
            .commit_replicas(request.block_id, &request.nodes)
            .map_err(Status::from)?;
        match self
            .namespace
            .append_block(&path, request.block_id, request.length)
        {
            Ok(block) => {
                info!(%path, block_id = block.id, offset = block.offset, "committed block");
                Ok(Response::new(ack(format!(
                    "committed block {} of {path}",
                    block.id
                ))))
            }
            Err(err) => {
                // the file vanished mid-upload; drop the orphaned replicas
                let addrs = self.cluster.remove_block(request.block_id);
                spawn_block_reclaim(request.block_id, addrs);
                Err(Status::from(err))
            }
        }
    }

    async fn get_block_locations(
        &self,
        request: Request<PathRequest>,
    ) -> std::result::Result<Response<BlockLocationsResponse>, Status> {
        let request = request.into_inner();
        let path = parse_path(&request.path)?;
        let (info, blocks) = self.namespace.file_blocks(&path).map_err(Status::from)?;

        let mut locations = Vec::with_capacity(blocks.len());
        for block in blocks {
            let nodes = match self.cluster.replicas_of(block.id) {
                Ok(nodes) => nodes,
                Err(err) => {
                    warn!(block_id = block.id, %err, "no replica record for block");
                    Vec::new()
                }
            };
            locations.push(BlockLocation {
                block_id: block.id,
                offset: block.offset,
                length: block.length,
                nodes,
            });
        }
        Ok(Response::new(BlockLocationsResponse {
            status: Some(file_status(info)),
            blocks: locations,
        }))
    }
}

struct HeartbeatRecordService {
    cluster: Arc<Cluster>,
}

#[tonic::async_trait]
impl HeartbeatProtocol for HeartbeatRecordService {
    async fn send_heartbeat(
        &self,
        request: Request<Heartbeat>,
    ) -> std::result::Result<Response<GenericReply>, Status> {
        let Heartbeat {
            node_id,
            address,
            free_bytes,
        } = request.into_inner();

        self.cluster
            .record_heartbeat(&node_id, &address, free_bytes);
        Ok(Response::new(ack("heartbeat recorded".to_string())))
    }
}
