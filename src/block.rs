pub type BlockId = u64;

/// One block of a file as recorded in the namespace: where it sits in the
/// byte range and how long it is. Replica locations are tracked separately
/// by the placement coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockRef {
    pub id: BlockId,
    pub offset: u64,
    pub length: u64,
}

/// On-disk name of a block's data file.
pub fn block_file_name(id: BlockId) -> String {
    format!("{id}.blk")
}

/// On-disk name of the checksum sidecar written when a block is finalized.
pub fn checksum_file_name(id: BlockId) -> String {
    format!("{id}.sum")
}

/// Parses a block id back out of a data file name, for rescanning a storage
/// directory on startup.
pub fn parse_block_file_name(name: &str) -> Option<BlockId> {
    name.strip_suffix(".blk")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_file_names_round_trip() {
        assert_eq!(block_file_name(17), "17.blk");
        assert_eq!(parse_block_file_name("17.blk"), Some(17));
        assert_eq!(parse_block_file_name("17.sum"), None);
        assert_eq!(parse_block_file_name("x.blk"), None);
    }
}
