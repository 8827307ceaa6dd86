use std::cmp::Ordering;

use common::{Rid, NO_PAGE};
use storage::PageGuard;
use types::{compare_keys, ColType};

/// Fixed node header: parent, key count, leaf flag, prev/next leaf.
pub(crate) const NODE_HDR_LEN: usize = 17;
pub(crate) const RID_LEN: usize = 8;

const PARENT_OFF: usize = 0;
const NUM_KEYS_OFF: usize = 4;
const IS_LEAF_OFF: usize = 8;
const PREV_LEAF_OFF: usize = 9;
const NEXT_LEAF_OFF: usize = 13;

/// Key layout shared by every node of one index.
#[derive(Clone, Debug)]
pub(crate) struct KeySchema {
    pub col_types: Vec<ColType>,
    pub col_lens: Vec<usize>,
    pub key_len: usize,
    /// Maximum keys per node; arrays are sized `order + 1` to leave one
    /// slot of slack for insert-then-split.
    pub order: usize,
}

impl KeySchema {
    fn key_off(&self, i: usize) -> usize {
        NODE_HDR_LEN + i * self.key_len
    }

    fn rid_off(&self, i: usize) -> usize {
        NODE_HDR_LEN + (self.order + 1) * self.key_len + i * RID_LEN
    }
}

pub(crate) fn write_node_header(
    page: &mut [u8],
    parent: u32,
    num_keys: u32,
    is_leaf: bool,
    prev_leaf: u32,
    next_leaf: u32,
) {
    page[PARENT_OFF..PARENT_OFF + 4].copy_from_slice(&parent.to_le_bytes());
    page[NUM_KEYS_OFF..NUM_KEYS_OFF + 4].copy_from_slice(&num_keys.to_le_bytes());
    page[IS_LEAF_OFF] = is_leaf as u8;
    page[PREV_LEAF_OFF..PREV_LEAF_OFF + 4].copy_from_slice(&prev_leaf.to_le_bytes());
    page[NEXT_LEAF_OFF..NEXT_LEAF_OFF + 4].copy_from_slice(&next_leaf.to_le_bytes());
}

fn read_u32(page: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(page[off..off + 4].try_into().unwrap())
}

fn write_u32(page: &mut [u8], off: usize, value: u32) {
    page[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

fn encode_rid(rid: Rid) -> [u8; RID_LEN] {
    let mut buf = [0u8; RID_LEN];
    buf[..4].copy_from_slice(&rid.page_no.to_le_bytes());
    buf[4..].copy_from_slice(&rid.slot_no.to_le_bytes());
    buf
}

fn decode_rid(bytes: &[u8]) -> Rid {
    Rid::new(
        u32::from_le_bytes(bytes[..4].try_into().unwrap()),
        u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
    )
}

/// A pinned B+ tree node. Mutating methods run under the tree's root
/// latch; each call locks the frame payload only for its own duration.
pub(crate) struct Node<'a> {
    pub guard: PageGuard,
    pub schema: &'a KeySchema,
}

impl<'a> Node<'a> {
    pub fn page_no(&self) -> u32 {
        self.guard.page_no()
    }

    pub fn parent(&self) -> u32 {
        read_u32(&self.guard.read(), PARENT_OFF)
    }

    pub fn set_parent(&self, page_no: u32) {
        write_u32(&mut self.guard.write(), PARENT_OFF, page_no);
    }

    pub fn is_root(&self) -> bool {
        self.parent() == NO_PAGE
    }

    pub fn num_keys(&self) -> usize {
        read_u32(&self.guard.read(), NUM_KEYS_OFF) as usize
    }

    pub fn is_leaf(&self) -> bool {
        self.guard.read()[IS_LEAF_OFF] != 0
    }

    pub fn prev_leaf(&self) -> u32 {
        read_u32(&self.guard.read(), PREV_LEAF_OFF)
    }

    pub fn next_leaf(&self) -> u32 {
        read_u32(&self.guard.read(), NEXT_LEAF_OFF)
    }

    pub fn set_prev_leaf(&self, page_no: u32) {
        write_u32(&mut self.guard.write(), PREV_LEAF_OFF, page_no);
    }

    pub fn set_next_leaf(&self, page_no: u32) {
        write_u32(&mut self.guard.write(), NEXT_LEAF_OFF, page_no);
    }

    pub fn key_at(&self, i: usize) -> Vec<u8> {
        let off = self.schema.key_off(i);
        self.guard.read()[off..off + self.schema.key_len].to_vec()
    }

    pub fn set_key_at(&self, i: usize, key: &[u8]) {
        let off = self.schema.key_off(i);
        self.guard.write()[off..off + self.schema.key_len].copy_from_slice(key);
    }

    pub fn rid_at(&self, i: usize) -> Rid {
        let off = self.schema.rid_off(i);
        decode_rid(&self.guard.read()[off..off + RID_LEN])
    }

    /// Child page number stored in value slot `i` of an internal node.
    pub fn child_at(&self, i: usize) -> u32 {
        self.rid_at(i).page_no
    }

    fn compare_at(&self, page: &[u8], i: usize, key: &[u8]) -> Ordering {
        let off = self.schema.key_off(i);
        compare_keys(
            key,
            &page[off..off + self.schema.key_len],
            &self.schema.col_types,
            &self.schema.col_lens,
        )
    }

    /// First slot in `[from, num_keys)` whose key is >= `key`.
    pub fn lower_bound_from(&self, key: &[u8], from: usize) -> usize {
        let page = self.guard.read();
        let n = read_u32(&page, NUM_KEYS_OFF) as usize;
        let (mut lo, mut hi) = (from, n);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.compare_at(&page, mid, key) != Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }

    /// First slot in `[from, num_keys)` whose key is > `key`.
    pub fn upper_bound_from(&self, key: &[u8], from: usize) -> usize {
        let page = self.guard.read();
        let n = read_u32(&page, NUM_KEYS_OFF) as usize;
        let (mut lo, mut hi) = (from, n);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.compare_at(&page, mid, key) == Ordering::Less {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }

    pub fn lower_bound(&self, key: &[u8]) -> usize {
        self.lower_bound_from(key, 0)
    }

    pub fn upper_bound(&self, key: &[u8]) -> usize {
        self.upper_bound_from(key, 0)
    }

    /// Child to descend into for `key`. Slot 0 holds the low fence, so
    /// the search starts at slot 1.
    pub fn child_index_for(&self, key: &[u8]) -> usize {
        self.upper_bound_from(key, 1) - 1
    }

    pub fn internal_lookup(&self, key: &[u8]) -> u32 {
        self.child_at(self.child_index_for(key))
    }

    /// Rid for `key` in this leaf, if present.
    pub fn leaf_lookup(&self, key: &[u8]) -> Option<Rid> {
        let pos = self.lower_bound(key);
        if pos == self.num_keys() {
            return None;
        }
        let page = self.guard.read();
        if self.compare_at(&page, pos, key) != Ordering::Equal {
            return None;
        }
        drop(page);
        Some(self.rid_at(pos))
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        let pos = self.lower_bound(key);
        if pos == self.num_keys() {
            return false;
        }
        let page = self.guard.read();
        self.compare_at(&page, pos, key) == Ordering::Equal
    }

    /// Shift-insert `n` consecutive (key, rid) pairs at `pos`.
    pub fn insert_pairs(&self, pos: usize, keys: &[u8], rids: &[Rid]) {
        let n = rids.len();
        debug_assert_eq!(keys.len(), n * self.schema.key_len);
        let mut page = self.guard.write();
        let count = read_u32(&page, NUM_KEYS_OFF) as usize;
        debug_assert!(pos <= count);

        let key_len = self.schema.key_len;
        let key_start = self.schema.key_off(pos);
        page.copy_within(
            key_start..self.schema.key_off(count),
            key_start + n * key_len,
        );
        page[key_start..key_start + n * key_len].copy_from_slice(keys);

        let rid_start = self.schema.rid_off(pos);
        page.copy_within(
            rid_start..self.schema.rid_off(count),
            rid_start + n * RID_LEN,
        );
        for (i, rid) in rids.iter().enumerate() {
            let off = rid_start + i * RID_LEN;
            page[off..off + RID_LEN].copy_from_slice(&encode_rid(*rid));
        }

        write_u32(&mut page, NUM_KEYS_OFF, (count + n) as u32);
    }

    pub fn insert_pair(&self, pos: usize, key: &[u8], rid: Rid) {
        self.insert_pairs(pos, key, &[rid]);
    }

    /// Insert in sorted position; duplicate keys are left untouched.
    /// Returns the resulting key count.
    pub fn insert(&self, key: &[u8], rid: Rid) -> usize {
        let pos = self.lower_bound(key);
        let count = self.num_keys();
        if pos < count {
            let page = self.guard.read();
            let duplicate = self.compare_at(&page, pos, key) == Ordering::Equal;
            drop(page);
            if duplicate {
                return count;
            }
        }
        self.insert_pair(pos, key, rid);
        self.num_keys()
    }

    pub fn erase_pair(&self, pos: usize) {
        let mut page = self.guard.write();
        let count = read_u32(&page, NUM_KEYS_OFF) as usize;
        debug_assert!(pos < count);

        let key_start = self.schema.key_off(pos);
        page.copy_within(
            self.schema.key_off(pos + 1)..self.schema.key_off(count),
            key_start,
        );
        let rid_start = self.schema.rid_off(pos);
        page.copy_within(
            self.schema.rid_off(pos + 1)..self.schema.rid_off(count),
            rid_start,
        );
        write_u32(&mut page, NUM_KEYS_OFF, (count - 1) as u32);
    }

    /// Remove `key` if present; returns the resulting key count.
    pub fn remove(&self, key: &[u8]) -> usize {
        let pos = self.lower_bound(key);
        if pos < self.num_keys() {
            let page = self.guard.read();
            let hit = self.compare_at(&page, pos, key) == Ordering::Equal;
            drop(page);
            if hit {
                self.erase_pair(pos);
            }
        }
        self.num_keys()
    }

    /// Copy out the pairs in `[from, num_keys)`, e.g. for a split.
    pub fn pairs_from(&self, from: usize) -> (Vec<u8>, Vec<Rid>) {
        let page = self.guard.read();
        let count = read_u32(&page, NUM_KEYS_OFF) as usize;
        let keys = page[self.schema.key_off(from)..self.schema.key_off(count)].to_vec();
        let rids = (from..count)
            .map(|i| {
                let off = self.schema.rid_off(i);
                decode_rid(&page[off..off + RID_LEN])
            })
            .collect();
        (keys, rids)
    }

    pub fn truncate(&self, new_len: usize) {
        write_u32(&mut self.guard.write(), NUM_KEYS_OFF, new_len as u32);
    }

    /// Value-slot position of `child_page` in this internal node.
    pub fn find_child(&self, child_page: u32) -> Option<usize> {
        (0..self.num_keys()).find(|&i| self.child_at(i) == child_page)
    }
}
