use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::interval;
use tonic::transport::{Channel, Server};
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use crate::datanode::storage::Storage;
use crate::error::Result;
use crate::proto::data_node_protocols_server::{DataNodeProtocols, DataNodeProtocolsServer};
use crate::proto::heartbeat_protocol_client::HeartbeatProtocolClient;
use crate::proto::{
    DeleteBlockRequest, FinalizeBlockRequest, GenericReply, Heartbeat, ReadBlockRequest,
    ReadBlockResponse, WriteBlockRequest,
};

/// Server that runs a datanode: serves block I/O and reports liveness and
/// free capacity to the namenode on a fixed interval.
pub struct DataNodeServer {
    /// TCP address of the datanode's block service
    datanode_addr: SocketAddr,

    /// Endpoint of the namenode's heartbeat service
    namenode_addr: String,

    /// Block storage of the datanode
    storage: Arc<RwLock<Storage>>,

    heartbeat_interval: Duration,
}

impl DataNodeServer {
    pub async fn open(
        datanode_addr: SocketAddr,
        namenode_addr: impl Into<String>,
        data_dir: impl AsRef<Path>,
        capacity: u64,
        heartbeat_interval: Duration,
    ) -> Result<Self> {
        let storage = Storage::open(data_dir, capacity).await?;
        Ok(DataNodeServer {
            datanode_addr,
            namenode_addr: namenode_addr.into(),
            storage: Arc::new(RwLock::new(storage)),
            heartbeat_interval,
        })
    }

    pub async fn run(&self) -> Result<()> {
        info!(addr = %self.datanode_addr, "datanode listening");
        tokio::select! {
            result = self.heartbeat_loop() => result,
            result = self.serve() => result,
        }
    }

    async fn serve(&self) -> Result<()> {
        let service = DataNodeService {
            storage: Arc::clone(&self.storage),
        };
        Server::builder()
            .add_service(DataNodeProtocolsServer::new(service))
            .serve(self.datanode_addr)
            .await?;
        Ok(())
    }

    async fn heartbeat_loop(&self) -> Result<()> {
        let mut interval = interval(self.heartbeat_interval);
        let endpoint = Channel::from_shared(format!("http://{}", self.namenode_addr))
            .map_err(|err| crate::error::DfsError::Transport(err.to_string()))?;
        let mut client: Option<HeartbeatProtocolClient<Channel>> = None;

        loop {
            interval.tick().await;
            if client.is_none() {
                match endpoint.connect().await {
                    Ok(channel) => client = Some(HeartbeatProtocolClient::new(channel)),
                    Err(err) => {
                        warn!(namenode = %self.namenode_addr, %err, "namenode unreachable");
                        continue;
                    }
                }
            }
            let free_bytes = self.storage.read().await.available();
            let request = Request::new(Heartbeat {
                node_id: self.datanode_addr.to_string(),
                address: self.datanode_addr.to_string(),
                free_bytes,
            });
            if let Some(active) = client.as_mut() {
                if let Err(err) = active.send_heartbeat(request).await {
                    warn!(namenode = %self.namenode_addr, %err, "heartbeat failed");
                    client = None;
                }
            }
        }
    }
}

struct DataNodeService {
    storage: Arc<RwLock<Storage>>,
}

#[tonic::async_trait]
impl DataNodeProtocols for DataNodeService {
    async fn write_block(
        &self,
        request: Request<WriteBlockRequest>,
    ) -> std::result::Result<Response<GenericReply>, Status> {
        let request = request.into_inner();
        debug!(block_id = request.block_id, bytes = request.data.len(), "write block");

        let mut storage = self.storage.write().await;
        storage
            .append(request.block_id, &request.data)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(GenericReply {
            is_success: true,
            message: format!("appended to block {}", request.block_id),
        }))
    }

    async fn finalize_block(
        &self,
        request: Request<FinalizeBlockRequest>,
    ) -> std::result::Result<Response<GenericReply>, Status> {
        let request = request.into_inner();
        debug!(block_id = request.block_id, "finalize block");

        let mut storage = self.storage.write().await;
        storage
            .finalize(request.block_id)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(GenericReply {
            is_success: true,
            message: format!("finalized block {}", request.block_id),
        }))
    }

    async fn read_block(
        &self,
        request: Request<ReadBlockRequest>,
    ) -> std::result::Result<Response<ReadBlockResponse>, Status> {
        let request = request.into_inner();
        debug!(
            block_id = request.block_id,
            offset = request.offset,
            length = request.length,
            "read block"
        );

        let storage = self.storage.read().await;
        let bytes_total = storage.block_length(request.block_id).map_err(Status::from)?;
        let data = storage
            .read(request.block_id, request.offset, request.length)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(ReadBlockResponse { data, bytes_total }))
    }

    async fn delete_block(
        &self,
        request: Request<DeleteBlockRequest>,
    ) -> std::result::Result<Response<GenericReply>, Status> {
        let request = request.into_inner();
        debug!(block_id = request.block_id, "delete block");

        let mut storage = self.storage.write().await;
        storage
            .delete(request.block_id)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(GenericReply {
            is_success: true,
            message: format!("deleted block {}", request.block_id),
        }))
    }
}
