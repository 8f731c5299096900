use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use minidfs::config::DEFAULT_NAMENODE_ADDR;
use minidfs::datanode::DataNodeServer;
use minidfs::namenode::NameNodeServer;
use minidfs::{DfsConfig, DfsSession};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Namenode endpoint, used by client commands and datanodes
    #[arg(long, default_value = DEFAULT_NAMENODE_ADDR)]
    namenode: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the namenode (namespace + replica placement)
    Namenode {
        #[arg(long, default_value_t = 10000)]
        port: u16,
        #[arg(long, default_value_t = 2)]
        replication: u32,
        #[arg(long, default_value_t = 30)]
        heartbeat_timeout_secs: u64,
    },
    /// Run a datanode (block storage)
    Datanode {
        #[arg(long)]
        port: u16,
        #[arg(long)]
        data_dir: PathBuf,
        #[arg(long, default_value_t = 8 * 1024 * 1024 * 1024)]
        capacity: u64,
        #[arg(long, default_value_t = 3)]
        heartbeat_interval_secs: u64,
    },
    /// Create a directory
    Mkdir {
        path: String,
        /// Create missing parent directories as needed
        #[arg(long)]
        parents: bool,
    },
    /// Upload a local file
    Put {
        local: PathBuf,
        dest: String,
        #[arg(long)]
        block_size: Option<u64>,
    },
    /// Download a file to a local path
    Get { path: String, local: PathBuf },
    /// List a directory; recursive mode includes block locations
    Ls {
        path: String,
        #[arg(long)]
        recursive: bool,
    },
    /// Remove a file or directory
    Rm {
        path: String,
        #[arg(long)]
        recursive: bool,
    },
    /// Rename a file or directory
    Mv { src: String, dst: String },
    /// Show namenode and datanode liveness
    Status {},
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let Args { namenode, command } = Args::parse();

    match command {
        Command::Namenode {
            port,
            replication,
            heartbeat_timeout_secs,
        } => {
            let config = DfsConfig::default()
                .with_replication_factor(replication)
                .with_heartbeat_timeout(Duration::from_secs(heartbeat_timeout_secs));
            let addr = SocketAddr::from(([127, 0, 0, 1], port));
            NameNodeServer::new(addr, config).run().await?;
        }
        Command::Datanode {
            port,
            data_dir,
            capacity,
            heartbeat_interval_secs,
        } => {
            let addr = SocketAddr::from(([127, 0, 0, 1], port));
            let server = DataNodeServer::open(
                addr,
                namenode,
                data_dir,
                capacity,
                Duration::from_secs(heartbeat_interval_secs),
            )
            .await?;
            server.run().await?;
        }
        Command::Mkdir { path, parents } => {
            let session = connect(&namenode, None).await?;
            if parents {
                session.mkdir_all(&path).await?;
            } else {
                session.mkdir(&path).await?;
            }
        }
        Command::Put {
            local,
            dest,
            block_size,
        } => {
            let session = connect(&namenode, block_size).await?;
            let data = tokio::fs::read(&local).await?;
            let status = session.upload(&data, &dest).await?;
            println!("{} ({} bytes)", status.path, status.length);
        }
        Command::Get { path, local } => {
            let session = connect(&namenode, None).await?;
            let data = session.download(&path).await?;
            tokio::fs::write(&local, &data).await?;
            println!("{} ({} bytes)", local.display(), data.len());
        }
        Command::Ls { path, recursive } => {
            let session = connect(&namenode, None).await?;
            if recursive {
                let mut files = session.list_files(&path, true);
                while let Some(file) = files.next().await? {
                    println!(
                        "{} {:o} {} bytes",
                        file.status.path, file.status.permissions, file.status.length
                    );
                    for block in &file.blocks {
                        println!(
                            "  block {} [{}, {}) on {}",
                            block.block_id,
                            block.offset,
                            block.offset + block.length,
                            block.nodes.join(", ")
                        );
                    }
                }
            } else {
                for status in session.list_status(&path).await? {
                    let kind = if status.is_dir { "d" } else { "-" };
                    println!("{kind} {:o} {:>12} {}", status.permissions, status.length, status.path);
                }
            }
        }
        Command::Rm { path, recursive } => {
            let session = connect(&namenode, None).await?;
            let reclaimed = session.delete(&path, recursive).await?;
            println!("deleted {path} ({reclaimed} blocks reclaimed)");
        }
        Command::Mv { src, dst } => {
            let session = connect(&namenode, None).await?;
            session.rename(&src, &dst).await?;
        }
        Command::Status {} => {
            let session = connect(&namenode, None).await?;
            let status = session.system_status().await?;
            if let Some(namenode) = status.namenode {
                println!("namenode {} online", namenode.address);
            }
            for node in status.nodes {
                let state = if node.is_online { "online" } else { "stale" };
                println!(
                    "datanode {} {} ({} bytes free)",
                    node.address, state, node.free_bytes
                );
            }
        }
    }

    Ok(())
}

async fn connect(namenode: &str, block_size: Option<u64>) -> Result<DfsSession, minidfs::DfsError> {
    let mut config = DfsConfig::default().with_namenode_addr(namenode);
    if let Some(block_size) = block_size {
        config = config.with_block_size(block_size);
    }
    DfsSession::connect(config).await
}
