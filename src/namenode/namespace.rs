use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::block::{BlockId, BlockRef};
use crate::error::{DfsError, Result};
use crate::path::DfsPath;

pub const DEFAULT_DIR_PERMISSIONS: u32 = 0o755;
pub const DEFAULT_FILE_PERMISSIONS: u32 = 0o644;

const ROOT_ID: u64 = 0;

/// Snapshot of one namespace entry handed across the metadata boundary.
#[derive(Clone, Debug)]
pub struct EntryInfo {
    pub path: String,
    pub name: String,
    pub is_dir: bool,
    pub length: u64,
    pub permissions: u32,
    pub owner: String,
    pub modified_ms: u64,
    pub block_size: u64,
}

struct INode {
    name: String,
    parent: Option<u64>,
    permissions: u32,
    owner: String,
    modified_ms: u64,
    kind: INodeKind,
}

enum INodeKind {
    Directory { children: BTreeMap<String, u64> },
    File { block_size: u64, length: u64, blocks: Vec<BlockRef> },
}

struct Tree {
    nodes: HashMap<u64, INode>,
    next_id: u64,
}

/// Hierarchical namespace mapping paths to inode records. All structural
/// mutations take the write lock, so a rename is atomic with respect to
/// concurrent resolves and readers never observe a torn tree.
pub struct Namespace {
    max_page: usize,
    inner: RwLock<Tree>,
}

impl Namespace {
    pub fn new(max_page: usize) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_ID,
            INode {
                name: String::new(),
                parent: None,
                permissions: DEFAULT_DIR_PERMISSIONS,
                owner: String::new(),
                modified_ms: now_ms(),
                kind: INodeKind::Directory {
                    children: BTreeMap::new(),
                },
            },
        );
        Self {
            max_page: max_page.max(1),
            inner: RwLock::new(Tree { nodes, next_id: 1 }),
        }
    }

    pub fn resolve(&self, path: &DfsPath) -> Result<EntryInfo> {
        let tree = self.inner.read().unwrap();
        let id = tree.lookup(path)?;
        Ok(tree.entry_info(id, &path.to_string()))
    }

    pub fn create_dir(&self, path: &DfsPath, owner: &str, permissions: u32) -> Result<EntryInfo> {
        self.create(
            path,
            owner,
            permissions,
            INodeKind::Directory {
                children: BTreeMap::new(),
            },
        )
    }

    pub fn create_file(
        &self,
        path: &DfsPath,
        block_size: u64,
        owner: &str,
        permissions: u32,
    ) -> Result<EntryInfo> {
        self.create(
            path,
            owner,
            permissions,
            INodeKind::File {
                block_size: block_size.max(1),
                length: 0,
                blocks: Vec::new(),
            },
        )
    }

    fn create(
        &self,
        path: &DfsPath,
        owner: &str,
        permissions: u32,
        kind: INodeKind,
    ) -> Result<EntryInfo> {
        let name = path
            .name()
            .ok_or_else(|| DfsError::AlreadyExists("/".to_string()))?
            .to_string();
        let parent_path = path.parent().unwrap_or_else(DfsPath::root);

        let mut tree = self.inner.write().unwrap();
        let parent_id = tree
            .lookup(&parent_path)
            .map_err(|_| DfsError::ParentNotFound(parent_path.to_string()))?;
        let parent = tree.nodes.get_mut(&parent_id).unwrap();
        let children = match &mut parent.kind {
            INodeKind::Directory { children } => children,
            INodeKind::File { .. } => {
                return Err(DfsError::ParentNotFound(parent_path.to_string()))
            }
        };
        if children.contains_key(&name) {
            return Err(DfsError::AlreadyExists(path.to_string()));
        }

        let id = tree.next_id;
        let stamp = now_ms();
        let children = match &mut tree.nodes.get_mut(&parent_id).unwrap().kind {
            INodeKind::Directory { children } => children,
            INodeKind::File { .. } => unreachable!(),
        };
        children.insert(name.clone(), id);
        tree.nodes.get_mut(&parent_id).unwrap().modified_ms = stamp;
        tree.nodes.insert(
            id,
            INode {
                name,
                parent: Some(parent_id),
                permissions,
                owner: owner.to_string(),
                modified_ms: stamp,
                kind,
            },
        );
        tree.next_id += 1;
        Ok(tree.entry_info(id, &path.to_string()))
    }

    /// Removes an entry and returns the block ids of every file that went
    /// with it, so the caller can reclaim the bytes on the datanodes.
    pub fn delete(&self, path: &DfsPath, recursive: bool) -> Result<Vec<BlockId>> {
        if path.is_root() {
            return Err(DfsError::InvalidPath("cannot delete /".to_string()));
        }
        let mut tree = self.inner.write().unwrap();
        let id = tree.lookup(path)?;
        if let INodeKind::Directory { children } = &tree.nodes[&id].kind {
            if !children.is_empty() && !recursive {
                return Err(DfsError::DirectoryNotEmpty(path.to_string()));
            }
        }

        // detach from parent first so readers never see a half-removed subtree
        let parent_id = tree.nodes[&id].parent.unwrap();
        let name = tree.nodes[&id].name.clone();
        match &mut tree.nodes.get_mut(&parent_id).unwrap().kind {
            INodeKind::Directory { children } => {
                children.remove(&name);
            }
            INodeKind::File { .. } => unreachable!(),
        }
        tree.nodes.get_mut(&parent_id).unwrap().modified_ms = now_ms();

        let mut reclaimed = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = tree.nodes.remove(&current).unwrap();
            match node.kind {
                INodeKind::Directory { children } => stack.extend(children.into_values()),
                INodeKind::File { blocks, .. } => {
                    reclaimed.extend(blocks.into_iter().map(|b| b.id))
                }
            }
        }
        Ok(reclaimed)
    }

    /// Atomic with respect to concurrent resolves: both paths flip in one
    /// critical section. Never overwrites an existing destination.
    pub fn rename(&self, src: &DfsPath, dst: &DfsPath) -> Result<()> {
        if src.is_root() {
            return Err(DfsError::InvalidPath("cannot rename /".to_string()));
        }
        if dst.starts_with(src) && dst != src {
            return Err(DfsError::InvalidPath(format!(
                "{dst} is inside {src}"
            )));
        }
        let dst_name = dst
            .name()
            .ok_or_else(|| DfsError::TargetExists("/".to_string()))?
            .to_string();
        let dst_parent_path = dst.parent().unwrap_or_else(DfsPath::root);

        let mut tree = self.inner.write().unwrap();
        let id = tree.lookup(src)?;
        if tree.lookup(dst).is_ok() {
            return Err(DfsError::TargetExists(dst.to_string()));
        }
        let dst_parent_id = tree
            .lookup(&dst_parent_path)
            .map_err(|_| DfsError::ParentNotFound(dst_parent_path.to_string()))?;
        if !matches!(tree.nodes[&dst_parent_id].kind, INodeKind::Directory { .. }) {
            return Err(DfsError::ParentNotFound(dst_parent_path.to_string()));
        }

        let stamp = now_ms();
        let src_parent_id = tree.nodes[&id].parent.unwrap();
        let src_name = tree.nodes[&id].name.clone();
        match &mut tree.nodes.get_mut(&src_parent_id).unwrap().kind {
            INodeKind::Directory { children } => {
                children.remove(&src_name);
            }
            INodeKind::File { .. } => unreachable!(),
        }
        tree.nodes.get_mut(&src_parent_id).unwrap().modified_ms = stamp;
        match &mut tree.nodes.get_mut(&dst_parent_id).unwrap().kind {
            INodeKind::Directory { children } => {
                children.insert(dst_name.clone(), id);
            }
            INodeKind::File { .. } => unreachable!(),
        }
        tree.nodes.get_mut(&dst_parent_id).unwrap().modified_ms = stamp;
        let node = tree.nodes.get_mut(&id).unwrap();
        node.name = dst_name;
        node.parent = Some(dst_parent_id);
        node.modified_ms = stamp;
        Ok(())
    }

    /// Bounded page of a directory's children in name order. The token is an
    /// opaque start-after cursor: entries created behind the cursor during a
    /// traversal never reappear, entries created ahead of it may or may not
    /// be seen. Listing a file yields the file itself as a single page.
    pub fn list_children(
        &self,
        path: &DfsPath,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<(Vec<EntryInfo>, Option<String>)> {
        let tree = self.inner.read().unwrap();
        let id = tree.lookup(path)?;
        let children = match &tree.nodes[&id].kind {
            INodeKind::Directory { children } => children,
            INodeKind::File { .. } => {
                return Ok((vec![tree.entry_info(id, &path.to_string())], None));
            }
        };

        let start = match page_token {
            None => Bound::Unbounded,
            Some(token) => Bound::Excluded(decode_token(token)?),
        };
        let limit = page_size.clamp(1, self.max_page);
        let mut entries = Vec::with_capacity(limit);
        let mut more = false;
        for (name, child_id) in children.range::<String, _>((start, Bound::Unbounded)) {
            if entries.len() == limit {
                more = true;
                break;
            }
            entries.push(tree.entry_info(*child_id, &path.join(name).to_string()));
        }
        let next_token = if more {
            entries.last().map(|entry| encode_token(&entry.name))
        } else {
            None
        };
        Ok((entries, next_token))
    }

    /// Appends a committed block to a file. Blocks tile `[0, length)` in
    /// order, so the new ref starts exactly at the current length.
    pub fn append_block(&self, path: &DfsPath, id: BlockId, length: u64) -> Result<BlockRef> {
        let mut tree = self.inner.write().unwrap();
        let inode_id = tree.lookup(path)?;
        let node = tree.nodes.get_mut(&inode_id).unwrap();
        match &mut node.kind {
            INodeKind::File {
                length: file_length,
                blocks,
                ..
            } => {
                // a retried commit must not register the same block twice
                if blocks.iter().any(|existing| existing.id == id) {
                    return Err(DfsError::AlreadyExists(format!("block {id} in {path}")));
                }
                let block = BlockRef {
                    id,
                    offset: *file_length,
                    length,
                };
                blocks.push(block.clone());
                *file_length += length;
                node.modified_ms = now_ms();
                Ok(block)
            }
            INodeKind::Directory { .. } => {
                Err(DfsError::InvalidPath(format!("{path} is a directory")))
            }
        }
    }

    pub fn file_blocks(&self, path: &DfsPath) -> Result<(EntryInfo, Vec<BlockRef>)> {
        let tree = self.inner.read().unwrap();
        let id = tree.lookup(path)?;
        match &tree.nodes[&id].kind {
            INodeKind::File { blocks, .. } => {
                Ok((tree.entry_info(id, &path.to_string()), blocks.clone()))
            }
            INodeKind::Directory { .. } => {
                Err(DfsError::InvalidPath(format!("{path} is a directory")))
            }
        }
    }
}

impl Tree {
    fn lookup(&self, path: &DfsPath) -> Result<u64> {
        let mut id = ROOT_ID;
        for segment in path.segments() {
            let children = match &self.nodes[&id].kind {
                INodeKind::Directory { children } => children,
                INodeKind::File { .. } => return Err(DfsError::NotFound(path.to_string())),
            };
            id = *children
                .get(segment)
                .ok_or_else(|| DfsError::NotFound(path.to_string()))?;
        }
        Ok(id)
    }

    fn entry_info(&self, id: u64, path: &str) -> EntryInfo {
        let node = &self.nodes[&id];
        let (is_dir, length, block_size) = match &node.kind {
            INodeKind::Directory { .. } => (true, 0, 0),
            INodeKind::File {
                block_size, length, ..
            } => (false, *length, *block_size),
        };
        EntryInfo {
            path: path.to_string(),
            name: node.name.clone(),
            is_dir,
            length,
            permissions: node.permissions,
            owner: node.owner.clone(),
            modified_ms: node.modified_ms,
            block_size,
        }
    }
}

fn encode_token(name: &str) -> String {
    hex::encode(name.as_bytes())
}

fn decode_token(token: &str) -> Result<String> {
    let bytes =
        hex::decode(token).map_err(|_| DfsError::InvalidPageToken(token.to_string()))?;
    String::from_utf8(bytes).map_err(|_| DfsError::InvalidPageToken(token.to_string()))
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> DfsPath {
        DfsPath::parse(raw).unwrap()
    }

    fn namespace() -> Namespace {
        Namespace::new(1000)
    }

    #[test]
    fn create_then_resolve_returns_requested_kind() {
        let ns = namespace();
        ns.create_dir(&path("/data"), "alice", DEFAULT_DIR_PERMISSIONS)
            .unwrap();
        ns.create_file(&path("/data/log"), 4096, "alice", DEFAULT_FILE_PERMISSIONS)
            .unwrap();

        let dir = ns.resolve(&path("/data")).unwrap();
        assert!(dir.is_dir);
        assert_eq!(dir.owner, "alice");

        let file = ns.resolve(&path("/data/log")).unwrap();
        assert!(!file.is_dir);
        assert_eq!(file.length, 0);
        assert_eq!(file.block_size, 4096);
        assert_eq!(file.path, "/data/log");
    }

    #[test]
    fn create_requires_existing_directory_parent() {
        let ns = namespace();
        assert!(matches!(
            ns.create_dir(&path("/a/b"), "u", DEFAULT_DIR_PERMISSIONS),
            Err(DfsError::ParentNotFound(_))
        ));

        ns.create_file(&path("/f"), 1, "u", DEFAULT_FILE_PERMISSIONS)
            .unwrap();
        assert!(matches!(
            ns.create_dir(&path("/f/b"), "u", DEFAULT_DIR_PERMISSIONS),
            Err(DfsError::ParentNotFound(_))
        ));
    }

    #[test]
    fn create_rejects_duplicates() {
        let ns = namespace();
        ns.create_dir(&path("/a"), "u", DEFAULT_DIR_PERMISSIONS)
            .unwrap();
        assert!(matches!(
            ns.create_file(&path("/a"), 1, "u", DEFAULT_FILE_PERMISSIONS),
            Err(DfsError::AlreadyExists(_))
        ));
        assert!(matches!(
            ns.create_dir(&path("/"), "u", DEFAULT_DIR_PERMISSIONS),
            Err(DfsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn delete_guards_non_empty_directories() {
        let ns = namespace();
        ns.create_dir(&path("/a"), "u", DEFAULT_DIR_PERMISSIONS)
            .unwrap();
        ns.create_dir(&path("/a/b"), "u", DEFAULT_DIR_PERMISSIONS)
            .unwrap();
        ns.create_file(&path("/a/b/f"), 64, "u", DEFAULT_FILE_PERMISSIONS)
            .unwrap();
        ns.append_block(&path("/a/b/f"), 7, 10).unwrap();

        assert!(matches!(
            ns.delete(&path("/a"), false),
            Err(DfsError::DirectoryNotEmpty(_))
        ));

        let reclaimed = ns.delete(&path("/a"), true).unwrap();
        assert_eq!(reclaimed, vec![7]);
        assert!(matches!(
            ns.resolve(&path("/a/b/f")),
            Err(DfsError::NotFound(_))
        ));
        assert!(matches!(ns.resolve(&path("/a")), Err(DfsError::NotFound(_))));
    }

    #[test]
    fn delete_root_is_rejected() {
        let ns = namespace();
        assert!(matches!(
            ns.delete(&path("/"), true),
            Err(DfsError::InvalidPath(_))
        ));
    }

    #[test]
    fn rename_moves_subtrees_and_guards_targets() {
        let ns = namespace();
        ns.create_dir(&path("/a"), "u", DEFAULT_DIR_PERMISSIONS)
            .unwrap();
        ns.create_dir(&path("/a/b"), "u", DEFAULT_DIR_PERMISSIONS)
            .unwrap();
        ns.create_file(&path("/a/b/f"), 64, "u", DEFAULT_FILE_PERMISSIONS)
            .unwrap();
        ns.create_dir(&path("/other"), "u", DEFAULT_DIR_PERMISSIONS)
            .unwrap();

        ns.rename(&path("/a"), &path("/renamed")).unwrap();
        assert!(matches!(ns.resolve(&path("/a")), Err(DfsError::NotFound(_))));
        assert!(ns.resolve(&path("/renamed/b/f")).is_ok());

        assert!(matches!(
            ns.rename(&path("/renamed"), &path("/other")),
            Err(DfsError::TargetExists(_))
        ));
        assert!(matches!(
            ns.rename(&path("/renamed"), &path("/renamed/b/inner")),
            Err(DfsError::InvalidPath(_))
        ));
        assert!(matches!(
            ns.rename(&path("/"), &path("/x")),
            Err(DfsError::InvalidPath(_))
        ));
        assert!(matches!(
            ns.rename(&path("/renamed"), &path("/missing/x")),
            Err(DfsError::ParentNotFound(_))
        ));
    }

    #[test]
    fn pagination_concatenates_to_the_full_listing() {
        let ns = namespace();
        ns.create_dir(&path("/dir"), "u", DEFAULT_DIR_PERMISSIONS)
            .unwrap();
        let mut expected = Vec::new();
        for i in 0..25 {
            let name = format!("f{i:02}");
            ns.create_file(
                &path(&format!("/dir/{name}")),
                1,
                "u",
                DEFAULT_FILE_PERMISSIONS,
            )
            .unwrap();
            expected.push(name);
        }

        let mut collected = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0;
        loop {
            let (entries, next) = ns
                .list_children(&path("/dir"), token.as_deref(), 10)
                .unwrap();
            assert!(entries.len() <= 10);
            collected.extend(entries.into_iter().map(|e| e.name));
            pages += 1;
            match next {
                Some(next) => {
                    // the cursor is opaque, not a raw name
                    assert!(!expected.contains(&next));
                    token = Some(next);
                }
                None => break,
            }
        }
        assert_eq!(pages, 3);
        assert_eq!(collected, expected);

        let (unpaged, none) = ns.list_children(&path("/dir"), None, 1000).unwrap();
        assert!(none.is_none());
        assert_eq!(
            unpaged.into_iter().map(|e| e.name).collect::<Vec<_>>(),
            expected
        );
    }

    #[test]
    fn listing_a_file_yields_itself() {
        let ns = namespace();
        ns.create_file(&path("/f"), 1, "u", DEFAULT_FILE_PERMISSIONS)
            .unwrap();
        let (entries, next) = ns.list_children(&path("/f"), None, 10).unwrap();
        assert!(next.is_none());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "/f");
    }

    #[test]
    fn garbled_page_token_is_rejected() {
        let ns = namespace();
        ns.create_dir(&path("/dir"), "u", DEFAULT_DIR_PERMISSIONS)
            .unwrap();
        assert!(matches!(
            ns.list_children(&path("/dir"), Some("not-hex!"), 10),
            Err(DfsError::InvalidPageToken(_))
        ));
    }

    #[test]
    fn blocks_tile_the_file_without_gaps() {
        let ns = namespace();
        ns.create_file(&path("/big"), 64, "u", DEFAULT_FILE_PERMISSIONS)
            .unwrap();
        for (i, len) in [64u64, 64, 64, 8].into_iter().enumerate() {
            let block = ns.append_block(&path("/big"), i as u64 + 1, len).unwrap();
            assert_eq!(block.offset, 64 * i as u64);
            assert_eq!(block.length, len);
        }

        let (info, blocks) = ns.file_blocks(&path("/big")).unwrap();
        assert_eq!(info.length, 200);
        assert_eq!(blocks.len(), 4);
        let covered: u64 = blocks.iter().map(|b| b.length).sum();
        assert_eq!(covered, info.length);

        assert!(matches!(
            ns.append_block(&path("/missing"), 9, 1),
            Err(DfsError::NotFound(_))
        ));
    }
}
