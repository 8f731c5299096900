use thiserror::Error;
use tonic::{Code, Status};

pub type Result<T> = std::result::Result<T, DfsError>;

/// Crate-wide error type. The text up to the first `:` in each display
/// message doubles as the error kind on the wire, so a client can rebuild
/// the exact variant from a `tonic::Status` message.
#[derive(Debug, Error)]
pub enum DfsError {
    #[error("NotFound: {0}")]
    NotFound(String),

    #[error("AlreadyExists: {0}")]
    AlreadyExists(String),

    #[error("DirectoryNotEmpty: {0}")]
    DirectoryNotEmpty(String),

    #[error("TargetExists: {0}")]
    TargetExists(String),

    #[error("ParentNotFound: {0}")]
    ParentNotFound(String),

    #[error("InsufficientReplicas: wanted {wanted}, live {live}")]
    InsufficientReplicas { wanted: u32, live: u32 },

    #[error("ReplicationFailed: block {block_id} on {node}")]
    ReplicationFailed { block_id: u64, node: String },

    #[error("AllReplicasUnreachable: block {0}")]
    AllReplicasUnreachable(u64),

    #[error("BlockNotFound: block {0}")]
    BlockNotFound(u64),

    #[error("BlockFinalized: block {0}")]
    BlockFinalized(u64),

    #[error("ChecksumMismatch: block {0}")]
    ChecksumMismatch(u64),

    #[error("InsufficientSpace: need {needed}, free {free}")]
    InsufficientSpace { needed: u64, free: u64 },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Transport: {0}")]
    Transport(String),

    #[error("Io: {0}")]
    Io(String),

    #[error("InvalidPath: {0}")]
    InvalidPath(String),

    #[error("InvalidPageToken: {0}")]
    InvalidPageToken(String),
}

impl DfsError {
    /// Transient failures are the only ones worth retrying; everything else
    /// reflects namespace or block state and surfaces immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, DfsError::Timeout(_) | DfsError::Transport(_))
    }

    /// Rebuilds the error kind a remote peer encoded into a status message.
    pub fn from_status(status: Status) -> Self {
        let message = status.message().to_string();
        let (kind, detail) = match message.split_once(": ") {
            Some((kind, detail)) => (kind.to_string(), detail.to_string()),
            None => (String::new(), message.clone()),
        };
        match kind.as_str() {
            "NotFound" => DfsError::NotFound(detail),
            "AlreadyExists" => DfsError::AlreadyExists(detail),
            "DirectoryNotEmpty" => DfsError::DirectoryNotEmpty(detail),
            "TargetExists" => DfsError::TargetExists(detail),
            "ParentNotFound" => DfsError::ParentNotFound(detail),
            "InsufficientReplicas" => {
                let nums = extract_nums(&detail);
                DfsError::InsufficientReplicas {
                    wanted: nums.first().copied().unwrap_or(0) as u32,
                    live: nums.get(1).copied().unwrap_or(0) as u32,
                }
            }
            "ReplicationFailed" => {
                let block_id = extract_nums(&detail).first().copied().unwrap_or(0);
                let node = detail
                    .split_once(" on ")
                    .map(|(_, node)| node.to_string())
                    .unwrap_or_default();
                DfsError::ReplicationFailed { block_id, node }
            }
            "AllReplicasUnreachable" => {
                DfsError::AllReplicasUnreachable(extract_nums(&detail).first().copied().unwrap_or(0))
            }
            "BlockNotFound" => {
                DfsError::BlockNotFound(extract_nums(&detail).first().copied().unwrap_or(0))
            }
            "BlockFinalized" => {
                DfsError::BlockFinalized(extract_nums(&detail).first().copied().unwrap_or(0))
            }
            "ChecksumMismatch" => {
                DfsError::ChecksumMismatch(extract_nums(&detail).first().copied().unwrap_or(0))
            }
            "InsufficientSpace" => {
                let nums = extract_nums(&detail);
                DfsError::InsufficientSpace {
                    needed: nums.first().copied().unwrap_or(0),
                    free: nums.get(1).copied().unwrap_or(0),
                }
            }
            "Timeout" => DfsError::Timeout(detail),
            "Transport" => DfsError::Transport(detail),
            "Io" => DfsError::Io(detail),
            "InvalidPath" => DfsError::InvalidPath(detail),
            "InvalidPageToken" => DfsError::InvalidPageToken(detail),
            // No kind prefix: classify by gRPC code so connection-level
            // failures still count as transient.
            _ => match status.code() {
                Code::DeadlineExceeded | Code::Cancelled => DfsError::Timeout(message),
                Code::NotFound => DfsError::NotFound(message),
                _ => DfsError::Transport(message),
            },
        }
    }
}

impl From<DfsError> for Status {
    fn from(err: DfsError) -> Self {
        let code = match &err {
            DfsError::NotFound(_) | DfsError::BlockNotFound(_) => Code::NotFound,
            DfsError::AlreadyExists(_) | DfsError::TargetExists(_) => Code::AlreadyExists,
            DfsError::DirectoryNotEmpty(_)
            | DfsError::ParentNotFound(_)
            | DfsError::BlockFinalized(_)
            | DfsError::ReplicationFailed { .. } => Code::FailedPrecondition,
            DfsError::InsufficientReplicas { .. } | DfsError::InsufficientSpace { .. } => {
                Code::ResourceExhausted
            }
            DfsError::ChecksumMismatch(_) => Code::DataLoss,
            DfsError::Io(_) => Code::Internal,
            DfsError::Timeout(_) => Code::DeadlineExceeded,
            DfsError::Transport(_) | DfsError::AllReplicasUnreachable(_) => Code::Unavailable,
            DfsError::InvalidPath(_) | DfsError::InvalidPageToken(_) => Code::InvalidArgument,
        };
        Status::new(code, err.to_string())
    }
}

impl From<tonic::transport::Error> for DfsError {
    fn from(err: tonic::transport::Error) -> Self {
        DfsError::Transport(err.to_string())
    }
}

impl From<std::io::Error> for DfsError {
    fn from(err: std::io::Error) -> Self {
        DfsError::Io(err.to_string())
    }
}

fn extract_nums(text: &str) -> Vec<u64> {
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse().ok())
        .collect()
}
