//! Ordered-commit buffer
//!
//! Staging area for fetched-but-unsequenced pages. Pages arrive in any order;
//! they leave strictly in page order, and nothing past the first terminal page
//! ever leaves.

use std::collections::BTreeMap;

use tracing::warn;

use crate::model::{CachedItem, ItemId, RemoteItem};

#[derive(Debug)]
pub struct OrderedCommitBuffer {
    next_page: u64,
    pending: BTreeMap<u64, Vec<RemoteItem>>,
    terminal_page: Option<u64>,
}

impl Default for OrderedCommitBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderedCommitBuffer {
    pub fn new() -> Self {
        Self {
            next_page: 1,
            pending: BTreeMap::new(),
            terminal_page: None,
        }
    }

    /// Next page the commit step is waiting for.
    pub fn next_page(&self) -> u64 {
        self.next_page
    }

    pub fn terminal_page(&self) -> Option<u64> {
        self.terminal_page
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Record `page` as end-of-data. The lowest terminal page wins and anything
    /// buffered past it is dropped.
    pub fn mark_terminal(&mut self, page: u64) {
        let terminal = self.terminal_page.map_or(page, |t| t.min(page));
        self.terminal_page = Some(terminal);
        self.pending.retain(|p, _| *p <= terminal);
    }

    /// Stage a fetched page. Returns false when it is discarded (already
    /// committed, or past the terminal page).
    pub fn insert(&mut self, page: u64, items: Vec<RemoteItem>) -> bool {
        if page < self.next_page || self.terminal_page.is_some_and(|t| page > t) {
            return false;
        }
        self.pending.insert(page, items);
        true
    }

    /// Pop the next page in order, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<(u64, Vec<RemoteItem>)> {
        let items = self.pending.remove(&self.next_page)?;
        let page = self.next_page;
        self.next_page += 1;
        Some((page, items))
    }

    /// Every page up to and including the terminal one has been popped.
    pub fn is_complete(&self) -> bool {
        self.terminal_page.is_some_and(|t| self.next_page > t)
    }
}

/// Commit cursor of one pass: last committed id and sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCursor {
    pub last_id: ItemId,
    pub last_sequence: u64,
}

/// Result of sequencing one page.
#[derive(Debug)]
pub struct SequencedPage {
    pub rows: Vec<CachedItem>,
    pub skipped: usize,
    /// Cursor after the page, to adopt once the rows are written
    pub cursor: SequenceCursor,
}

impl SequenceCursor {
    /// Order a page by id and number it from the cursor on. Ids at or below
    /// the last committed id are skipped. The cursor itself is untouched.
    pub fn sequence(&self, owner: &str, mut items: Vec<RemoteItem>, synced_at: i64) -> SequencedPage {
        items.sort_by_key(|item| item.id);
        let mut cursor = *self;
        let mut skipped = 0;
        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            if item.id <= cursor.last_id {
                warn!(owner = %owner, id = item.id, last_id = cursor.last_id, "skipping already committed item");
                skipped += 1;
                continue;
            }
            cursor.last_id = item.id;
            cursor.last_sequence += 1;
            rows.push(CachedItem::from_remote(item, cursor.last_sequence, synced_at));
        }
        SequencedPage {
            rows,
            skipped,
            cursor,
        }
    }
}
