use std::collections::VecDeque;

use crate::client::session::DfsSession;
use crate::error::Result;
use crate::proto::{BlockLocation, FileStatus};

/// Lazy iteration over one directory's children. At most a single listing
/// page is buffered; the next page is fetched, by continuation token, only
/// when the buffer runs dry. Directory results may be huge, so callers get
/// an iterator instead of a materialized list.
pub struct DirectoryEntries {
    session: DfsSession,
    path: String,
    buffer: VecDeque<FileStatus>,
    next_token: Option<String>,
    started: bool,
}

impl DirectoryEntries {
    pub(crate) fn new(session: DfsSession, path: impl Into<String>) -> Self {
        Self {
            session,
            path: path.into(),
            buffer: VecDeque::new(),
            next_token: None,
            started: false,
        }
    }

    pub async fn next(&mut self) -> Result<Option<FileStatus>> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return Ok(Some(entry));
            }
            if self.started && self.next_token.is_none() {
                return Ok(None);
            }
            let (entries, next_token) = self
                .session
                .list_children_page(&self.path, self.next_token.take())
                .await?;
            self.started = true;
            self.next_token = next_token;
            if entries.is_empty() && self.next_token.is_none() {
                return Ok(None);
            }
            self.buffer.extend(entries);
        }
    }
}

/// A file plus the location of every one of its blocks.
pub struct FileDetail {
    pub status: FileStatus,
    pub blocks: Vec<BlockLocation>,
}

/// Lazy walk yielding files with block/replica detail. Subdirectories are
/// queued by path and expanded one listing page at a time, so memory stays
/// bounded by the page size plus the directory queue regardless of how big
/// the subtree is.
pub struct FileLister {
    session: DfsSession,
    recursive: bool,
    pending: VecDeque<String>,
    current: Option<DirectoryEntries>,
}

impl FileLister {
    pub(crate) fn new(session: DfsSession, path: impl Into<String>, recursive: bool) -> Self {
        let mut pending = VecDeque::new();
        pending.push_back(path.into());
        Self {
            session,
            recursive,
            pending,
            current: None,
        }
    }

    pub async fn next(&mut self) -> Result<Option<FileDetail>> {
        loop {
            if let Some(entries) = self.current.as_mut() {
                match entries.next().await? {
                    Some(entry) if entry.is_dir => {
                        if self.recursive {
                            self.pending.push_back(entry.path);
                        }
                    }
                    Some(entry) => {
                        let located = self.session.block_locations(&entry.path).await?;
                        return Ok(Some(FileDetail {
                            status: entry,
                            blocks: located.blocks,
                        }));
                    }
                    None => self.current = None,
                }
            } else if let Some(dir) = self.pending.pop_front() {
                self.current = Some(DirectoryEntries::new(self.session.clone(), dir));
            } else {
                return Ok(None);
            }
        }
    }
}
