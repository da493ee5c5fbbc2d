//! Live change tracking for the writable tree.
//!
//! Changes accumulate in an arena of list nodes (stable indices, no raw
//! pointers) threaded as a doubly-linked list for chronological order, with
//! a `(op, path)` index for O(1) collapse lookups. The collapsing rules keep
//! the tracked sequence equivalent to what a snapshot diff would produce;
//! they are the only rewrites that stay sound under any further operation.

use std::collections::HashMap;

use kodama_types::{Change, ChangeOp, Entry};

struct Node {
    change: Change,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Default)]
pub(crate) struct ChangeTracker {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    index: HashMap<(ChangeOp, String), usize>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.index.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Record one operation, applying the collapse table:
    ///
    /// | prior   | new    | tracked instead        |
    /// |---------|--------|------------------------|
    /// | unlink  | create | change                 |
    /// | change  | change | change                 |
    /// | create  | change | create (new entry)     |
    /// | rmdir   | mkdir  | nothing                |
    /// | mkdir   | rmdir  | nothing                |
    /// | change  | unlink | unlink                 |
    /// | create  | unlink | nothing                |
    pub fn track(&mut self, op: ChangeOp, entry: Entry) {
        let path = entry.relative_path.clone();
        match op {
            ChangeOp::Create => {
                if self.drop(ChangeOp::Unlink, &path) {
                    self.push(ChangeOp::Update, entry);
                } else {
                    self.push(ChangeOp::Create, entry);
                }
            }
            ChangeOp::Update => {
                if self.drop(ChangeOp::Create, &path) {
                    self.push(ChangeOp::Create, entry);
                } else {
                    self.drop(ChangeOp::Update, &path);
                    self.push(ChangeOp::Update, entry);
                }
            }
            ChangeOp::Mkdir => {
                if !self.drop(ChangeOp::Rmdir, &path) {
                    self.push(ChangeOp::Mkdir, entry);
                }
            }
            ChangeOp::Rmdir => {
                if !self.drop(ChangeOp::Mkdir, &path) {
                    self.push(ChangeOp::Rmdir, entry);
                }
            }
            ChangeOp::Unlink => {
                if self.drop(ChangeOp::Create, &path) {
                    return;
                }
                self.drop(ChangeOp::Update, &path);
                self.push(ChangeOp::Unlink, entry);
            }
        }
    }

    /// Tracked changes in canonical patch order: removes lexicographically
    /// descending, then additions and updates ascending.
    pub fn changes(&self) -> Vec<Change> {
        let mut removals: Vec<Change> = Vec::new();
        let mut additions: Vec<Change> = Vec::new();
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let node = self.nodes[idx].as_ref().expect("linked node is live");
            if node.change.op.is_removal() {
                removals.push(node.change.clone());
            } else {
                additions.push(node.change.clone());
            }
            cursor = node.next;
        }
        removals.sort_by(|a, b| b.path.cmp(&a.path));
        additions.sort_by(|a, b| a.path.cmp(&b.path));
        removals.extend(additions);
        removals
    }

    fn push(&mut self, op: ChangeOp, entry: Entry) {
        let path = entry.relative_path.clone();
        let node = Node {
            change: Change::new(op, entry),
            prev: self.tail,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        if let Some(tail) = self.tail {
            self.nodes[tail].as_mut().expect("tail is live").next = Some(idx);
        } else {
            self.head = Some(idx);
        }
        self.tail = Some(idx);
        self.index.insert((op, path), idx);
    }

    /// Unlink and discard the tracked `(op, path)` node, if any.
    fn drop(&mut self, op: ChangeOp, path: &str) -> bool {
        let idx = match self.index.remove(&(op, path.to_string())) {
            Some(idx) => idx,
            None => return false,
        };
        let node = self.nodes[idx].take().expect("indexed node is live");
        match node.prev {
            Some(prev) => self.nodes[prev].as_mut().expect("prev is live").next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.nodes[next].as_mut().expect("next is live").prev = node.prev,
            None => self.tail = node.prev,
        }
        self.free.push(idx);
        true
    }
}
