//! Arena-backed intrusive LRU list.
//!
//! Entries are threaded through a slot vector by `u32` handles instead of
//! owning pointers, so the list and the key map share one allocation owner.
//! Freed slots are recycled through a freelist.

use std::sync::Arc;

use crate::runtime::cache::entry::CacheEntry;
use crate::runtime::lineage::LineageKey;

pub(crate) const NIL: u32 = u32::MAX;

#[derive(Debug)]
struct Node {
    entry: Option<Arc<CacheEntry>>,
    prev: u32,
    next: u32,
}

#[derive(Debug)]
pub(crate) struct LruList {
    nodes: Vec<Node>,
    head: u32,
    tail: u32,
    free: Vec<u32>,
    len: usize,
}

impl LruList {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            head: NIL,
            tail: NIL,
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn tail(&self) -> u32 {
        self.tail
    }

    pub fn prev(&self, idx: u32) -> u32 {
        self.nodes[idx as usize].prev
    }

    pub fn entry(&self, idx: u32) -> &Arc<CacheEntry> {
        self.nodes[idx as usize]
            .entry
            .as_ref()
            .expect("LRU handle points at a freed slot")
    }

    /// Insert at the most-recently-used end.
    pub fn push_head(&mut self, entry: Arc<CacheEntry>) -> u32 {
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx as usize].entry = Some(entry);
                idx
            }
            None => {
                self.nodes.push(Node {
                    entry: Some(entry),
                    prev: NIL,
                    next: NIL,
                });
                (self.nodes.len() - 1) as u32
            }
        };
        self.attach_head(idx);
        self.len += 1;
        idx
    }

    /// Remove the node and recycle its slot.
    pub fn unlink(&mut self, idx: u32) -> Arc<CacheEntry> {
        self.detach(idx);
        let entry = self.nodes[idx as usize]
            .entry
            .take()
            .expect("unlinking a freed LRU slot");
        self.free.push(idx);
        self.len -= 1;
        entry
    }

    /// Move the node to the most-recently-used end.
    pub fn touch(&mut self, idx: u32) {
        if self.head == idx {
            return;
        }
        self.detach(idx);
        self.attach_head(idx);
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
        self.len = 0;
    }

    /// Keys in recency order, most recent first.
    pub fn keys_head_to_tail(&self) -> Vec<LineageKey> {
        let mut keys = Vec::with_capacity(self.len);
        let mut cur = self.head;
        while cur != NIL {
            let node = &self.nodes[cur as usize];
            if let Some(entry) = &node.entry {
                keys.push(entry.key().clone());
            }
            cur = node.next;
        }
        keys
    }

    fn attach_head(&mut self, idx: u32) {
        let old_head = self.head;
        {
            let node = &mut self.nodes[idx as usize];
            node.prev = NIL;
            node.next = old_head;
        }
        if old_head != NIL {
            self.nodes[old_head as usize].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn detach(&mut self, idx: u32) {
        let (prev, next) = {
            let node = &self.nodes[idx as usize];
            (node.prev, node.next)
        };
        if prev != NIL {
            self.nodes[prev as usize].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next as usize].prev = prev;
        } else {
            self.tail = prev;
        }
        let node = &mut self.nodes[idx as usize];
        node.prev = NIL;
        node.next = NIL;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ValueKind;
    use crate::runtime::lineage::LineageItem;

    fn entry(name: &str) -> Arc<CacheEntry> {
        CacheEntry::placeholder(LineageItem::leaf(name), ValueKind::Matrix)
    }

    #[test]
    fn push_and_touch_keep_recency_order() {
        let mut list = LruList::new();
        let a = list.push_head(entry("a"));
        let _b = list.push_head(entry("b"));
        let _c = list.push_head(entry("c"));
        let key_a = list.entry(a).key().clone();

        // a is the cold end until it is touched
        assert_eq!(list.tail(), a);
        list.touch(a);
        assert_ne!(list.tail(), a);
        assert_eq!(list.keys_head_to_tail()[0].as_ref(), key_a.as_ref());
    }

    #[test]
    fn unlink_recycles_slots() {
        let mut list = LruList::new();
        let a = list.push_head(entry("a"));
        let b = list.push_head(entry("b"));

        list.unlink(a);
        assert_eq!(list.keys_head_to_tail().len(), 1);
        assert_eq!(list.tail(), b);

        // slot reuse
        let c = list.push_head(entry("c"));
        assert_eq!(c, a);
        assert_eq!(list.keys_head_to_tail().len(), 2);
    }

    #[test]
    fn walk_from_tail_visits_every_entry_once() {
        let mut list = LruList::new();
        for name in ["a", "b", "c", "d"] {
            list.push_head(entry(name));
        }
        let mut visited = 0;
        let mut cur = list.tail();
        while cur != NIL {
            visited += 1;
            cur = list.prev(cur);
        }
        assert_eq!(visited, 4);
        assert_eq!(list.keys_head_to_tail().len(), 4);
    }
}
