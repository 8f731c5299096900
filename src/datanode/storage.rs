use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::block::{block_file_name, checksum_file_name, parse_block_file_name, BlockId};
use crate::error::{DfsError, Result};

struct BlockMeta {
    length: u64,
    finalized: bool,
    // running digest of everything appended so far
    hasher: Sha256,
    // fixed once the block is finalized
    digest_hex: Option<String>,
}

/// Block storage for a datanode: append-only files under one directory,
/// write-once after finalize, a SHA-256 per block to catch silent
/// corruption, and capacity accounting against a configured budget.
pub struct Storage {
    root: PathBuf,
    capacity: u64,
    used: u64,
    blocks: HashMap<BlockId, BlockMeta>,
}

impl Storage {
    /// Opens (or creates) a storage directory, rescanning any blocks left
    /// behind by a previous run. Blocks with a checksum sidecar come back
    /// finalized; the rest resume as open blocks.
    pub async fn open(root: impl AsRef<Path>, capacity: u64) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        let mut blocks = HashMap::new();
        let mut used = 0;
        let mut entries = fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(block_id) = parse_block_file_name(name) else {
                continue;
            };
            let data = fs::read(entry.path()).await?;
            let mut hasher = Sha256::new();
            hasher.update(&data);
            let digest_hex = match fs::read_to_string(root.join(checksum_file_name(block_id))).await
            {
                Ok(digest) => Some(digest.trim().to_string()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
                Err(err) => return Err(err.into()),
            };
            used += data.len() as u64;
            blocks.insert(
                block_id,
                BlockMeta {
                    length: data.len() as u64,
                    finalized: digest_hex.is_some(),
                    hasher,
                    digest_hex,
                },
            );
        }
        Ok(Self {
            root,
            capacity,
            used,
            blocks,
        })
    }

    /// Appends bytes to a block, creating it on first write. Rejected once
    /// the block is finalized or the capacity budget would be exceeded.
    pub async fn append(&mut self, block_id: BlockId, data: &[u8]) -> Result<()> {
        if let Some(meta) = self.blocks.get(&block_id) {
            if meta.finalized {
                return Err(DfsError::BlockFinalized(block_id));
            }
        }
        let needed = data.len() as u64;
        let free = self.capacity.saturating_sub(self.used);
        if needed > free {
            return Err(DfsError::InsufficientSpace { needed, free });
        }

        let path = self.root.join(block_file_name(block_id));
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(data).await?;
        file.flush().await?;

        let meta = self.blocks.entry(block_id).or_insert_with(|| BlockMeta {
            length: 0,
            finalized: false,
            hasher: Sha256::new(),
            digest_hex: None,
        });
        meta.hasher.update(data);
        meta.length += needed;
        self.used += needed;
        Ok(())
    }

    /// Seals a block: its digest is fixed and persisted beside the data,
    /// and further appends are refused. Idempotent.
    pub async fn finalize(&mut self, block_id: BlockId) -> Result<()> {
        let meta = self
            .blocks
            .get_mut(&block_id)
            .ok_or(DfsError::BlockNotFound(block_id))?;
        if meta.finalized {
            return Ok(());
        }
        let digest = hex::encode(meta.hasher.clone().finalize());
        fs::write(self.root.join(checksum_file_name(block_id)), &digest).await?;
        meta.digest_hex = Some(digest);
        meta.finalized = true;
        Ok(())
    }

    /// Reads `[offset, offset + length)` of a block, the tail when `length`
    /// is zero. The whole block is re-digested on every read and compared
    /// against the stored checksum before any bytes are returned.
    pub async fn read(&self, block_id: BlockId, offset: u64, length: u64) -> Result<Vec<u8>> {
        let meta = self
            .blocks
            .get(&block_id)
            .ok_or(DfsError::BlockNotFound(block_id))?;
        let data = fs::read(self.root.join(block_file_name(block_id))).await?;

        let expected = match &meta.digest_hex {
            Some(digest) => digest.clone(),
            None => hex::encode(meta.hasher.clone().finalize()),
        };
        let actual = hex::encode(Sha256::digest(&data));
        if actual != expected {
            return Err(DfsError::ChecksumMismatch(block_id));
        }

        let start = (offset as usize).min(data.len());
        let end = if length == 0 {
            data.len()
        } else {
            (start + length as usize).min(data.len())
        };
        Ok(data[start..end].to_vec())
    }

    pub async fn delete(&mut self, block_id: BlockId) -> Result<()> {
        let meta = self
            .blocks
            .remove(&block_id)
            .ok_or(DfsError::BlockNotFound(block_id))?;
        self.used = self.used.saturating_sub(meta.length);
        fs::remove_file(self.root.join(block_file_name(block_id))).await?;
        match fs::remove_file(self.root.join(checksum_file_name(block_id))).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    pub fn contains(&self, block_id: BlockId) -> bool {
        self.blocks.contains_key(&block_id)
    }

    pub fn block_length(&self, block_id: BlockId) -> Result<u64> {
        self.blocks
            .get(&block_id)
            .map(|meta| meta.length)
            .ok_or(DfsError::BlockNotFound(block_id))
    }

    pub fn available(&self) -> u64 {
        self.capacity.saturating_sub(self.used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn storage(capacity: u64) -> (TempDir, Storage) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path(), capacity).await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn append_then_read_round_trips() {
        let (_dir, mut storage) = storage(1024).await;
        storage.append(1, b"hello ").await.unwrap();
        storage.append(1, b"world").await.unwrap();
        storage.finalize(1).await.unwrap();

        assert_eq!(storage.read(1, 0, 0).await.unwrap(), b"hello world");
        assert_eq!(storage.read(1, 6, 5).await.unwrap(), b"world");
        assert_eq!(storage.read(1, 6, 0).await.unwrap(), b"world");
        assert_eq!(storage.block_length(1).unwrap(), 11);
    }

    #[tokio::test]
    async fn open_blocks_are_readable_before_finalize() {
        let (_dir, mut storage) = storage(1024).await;
        storage.append(1, b"partial").await.unwrap();
        assert_eq!(storage.read(1, 0, 0).await.unwrap(), b"partial");
    }

    #[tokio::test]
    async fn finalize_seals_the_block() {
        let (_dir, mut storage) = storage(1024).await;
        storage.append(1, b"data").await.unwrap();
        storage.finalize(1).await.unwrap();
        // idempotent
        storage.finalize(1).await.unwrap();
        assert!(matches!(
            storage.append(1, b"more").await,
            Err(DfsError::BlockFinalized(1))
        ));
        assert!(matches!(
            storage.finalize(2).await,
            Err(DfsError::BlockNotFound(2))
        ));
    }

    #[tokio::test]
    async fn unknown_blocks_are_reported() {
        let (_dir, storage) = storage(1024).await;
        assert!(matches!(
            storage.read(9, 0, 0).await,
            Err(DfsError::BlockNotFound(9))
        ));
    }

    #[tokio::test]
    async fn capacity_is_enforced_and_reclaimed() {
        let (_dir, mut storage) = storage(10).await;
        storage.append(1, b"12345678").await.unwrap();
        match storage.append(2, b"abc").await {
            Err(DfsError::InsufficientSpace { needed, free }) => {
                assert_eq!((needed, free), (3, 2));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        storage.delete(1).await.unwrap();
        assert_eq!(storage.available(), 10);
        storage.append(2, b"abc").await.unwrap();
        assert!(!storage.contains(1));
    }

    #[tokio::test]
    async fn tampered_bytes_fail_the_checksum() {
        let (dir, mut storage) = storage(1024).await;
        storage.append(1, b"important bytes").await.unwrap();
        storage.finalize(1).await.unwrap();

        std::fs::write(dir.path().join(block_file_name(1)), b"imposter bytes!").unwrap();
        assert!(matches!(
            storage.read(1, 0, 0).await,
            Err(DfsError::ChecksumMismatch(1))
        ));
    }

    #[tokio::test]
    async fn rescan_recovers_blocks_across_restarts() {
        let dir = TempDir::new().unwrap();
        {
            let mut storage = Storage::open(dir.path(), 1024).await.unwrap();
            storage.append(1, b"sealed").await.unwrap();
            storage.finalize(1).await.unwrap();
            storage.append(2, b"still ").await.unwrap();
        }

        let mut storage = Storage::open(dir.path(), 1024).await.unwrap();
        assert_eq!(storage.read(1, 0, 0).await.unwrap(), b"sealed");
        assert!(matches!(
            storage.append(1, b"x").await,
            Err(DfsError::BlockFinalized(1))
        ));
        // the open block picks up where it left off, checksum intact
        storage.append(2, b"open").await.unwrap();
        assert_eq!(storage.read(2, 0, 0).await.unwrap(), b"still open");
        assert_eq!(storage.available(), 1024 - 6 - 10);
    }
}
