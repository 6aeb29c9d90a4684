//! Arena-backed B-tree mapping keys to lists of row ids.
//!
//! Nodes live in a flat vector and refer to children by index, so the
//! tree has no ownership cycles and serializes by plain recursion. A
//! tree of degree `t` holds at most `2t - 1` keys per node; every
//! non-root node holds at least `t - 1`.

use crate::key::IndexKey;
use liminaldb_lib::buffer::{BufReader, BufWriter, DecodeError};
use std::cmp::Ordering;

pub const DEFAULT_DEGREE: usize = 4;

#[derive(Clone, Debug)]
struct Node {
    leaf: bool,
    keys: Vec<IndexKey>,
    /// Row-id lists, parallel to `keys`. A unique index holds exactly one
    /// row id per key; uniqueness is enforced by the caller before insert.
    values: Vec<Vec<i64>>,
    children: Vec<usize>,
}

impl Node {
    fn empty_leaf() -> Self {
        Node {
            leaf: true,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BTree {
    degree: usize,
    nodes: Vec<Node>,
    root: usize,
}

impl Default for BTree {
    fn default() -> Self {
        BTree::new(DEFAULT_DEGREE)
    }
}

impl BTree {
    pub fn new(degree: usize) -> Self {
        assert!(degree >= 2, "B-tree degree must be at least 2");
        BTree {
            degree,
            nodes: vec![Node::empty_leaf()],
            root: 0,
        }
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Number of distinct keys in the tree.
    pub fn key_count(&self) -> usize {
        self.count_keys(self.root)
    }

    fn count_keys(&self, node: usize) -> usize {
        let n = &self.nodes[node];
        n.keys.len() + n.children.iter().map(|&c| self.count_keys(c)).sum::<usize>()
    }

    fn alloc(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn locate(&self, key: &IndexKey) -> Option<(usize, usize)> {
        let mut node = self.root;
        loop {
            let n = &self.nodes[node];
            let idx = n.keys.partition_point(|k| k < key);
            if idx < n.keys.len() && &n.keys[idx] == key {
                return Some((node, idx));
            }
            if n.leaf {
                return None;
            }
            node = n.children[idx];
        }
    }

    /// Returns the (possibly empty) list of row ids bound to `key`.
    pub fn search(&self, key: &IndexKey) -> &[i64] {
        match self.locate(key) {
            Some((node, idx)) => &self.nodes[node].values[idx],
            None => &[],
        }
    }

    pub fn contains(&self, key: &IndexKey) -> bool {
        self.locate(key).is_some()
    }

    /// Binds `row_id` to `key`, appending to the value list if the key is
    /// already present.
    pub fn insert(&mut self, key: IndexKey, row_id: i64) {
        if let Some((node, idx)) = self.locate(&key) {
            self.nodes[node].values[idx].push(row_id);
            return;
        }
        let max_keys = 2 * self.degree - 1;
        if self.nodes[self.root].keys.len() == max_keys {
            let old_root = self.root;
            self.root = self.alloc(Node {
                leaf: false,
                keys: Vec::new(),
                values: Vec::new(),
                children: vec![old_root],
            });
            self.split_child(self.root, 0);
        }
        self.insert_non_full(self.root, key, row_id);
    }

    fn insert_non_full(&mut self, node: usize, key: IndexKey, row_id: i64) {
        let mut node = node;
        loop {
            let idx = self.nodes[node].keys.partition_point(|k| k < &key);
            if self.nodes[node].leaf {
                self.nodes[node].keys.insert(idx, key);
                self.nodes[node].values.insert(idx, vec![row_id]);
                return;
            }
            let mut child = self.nodes[node].children[idx];
            if self.nodes[child].keys.len() == 2 * self.degree - 1 {
                self.split_child(node, idx);
                match key.cmp(&self.nodes[node].keys[idx]) {
                    Ordering::Greater => child = self.nodes[node].children[idx + 1],
                    Ordering::Equal => {
                        self.nodes[node].values[idx].push(row_id);
                        return;
                    }
                    Ordering::Less => child = self.nodes[node].children[idx],
                }
            }
            node = child;
        }
    }

    /// Splits the full child at `child_idx` of `parent`, moving its median
    /// key up into the parent.
    fn split_child(&mut self, parent: usize, child_idx: usize) {
        let t = self.degree;
        let child = self.nodes[parent].children[child_idx];

        let right_keys = self.nodes[child].keys.split_off(t);
        let right_values = self.nodes[child].values.split_off(t);
        let median_key = self.nodes[child].keys.pop().expect("full node has a median");
        let median_values = self.nodes[child].values.pop().expect("full node has a median");
        let leaf = self.nodes[child].leaf;
        let right_children = if leaf {
            Vec::new()
        } else {
            self.nodes[child].children.split_off(t)
        };

        let right = self.alloc(Node {
            leaf,
            keys: right_keys,
            values: right_values,
            children: right_children,
        });
        self.nodes[parent].keys.insert(child_idx, median_key);
        self.nodes[parent].values.insert(child_idx, median_values);
        self.nodes[parent].children.insert(child_idx + 1, right);
    }

    /// Unbinds `row_id` from `key`; the key itself is removed once its
    /// value list is empty. Returns whether anything changed.
    pub fn delete(&mut self, key: &IndexKey, row_id: i64) -> bool {
        let Some((node, idx)) = self.locate(key) else {
            return false;
        };
        let values = &mut self.nodes[node].values[idx];
        match values.iter().position(|&v| v == row_id) {
            Some(pos) => {
                values.remove(pos);
            }
            None => return false,
        }
        if !self.nodes[node].values[idx].is_empty() {
            return true;
        }
        self.remove_key(self.root, key);
        if self.nodes[self.root].keys.is_empty() && !self.nodes[self.root].leaf {
            self.root = self.nodes[self.root].children[0];
        }
        true
    }

    fn remove_key(&mut self, node: usize, key: &IndexKey) {
        let idx = self.nodes[node].keys.partition_point(|k| k < key);
        if idx < self.nodes[node].keys.len() && &self.nodes[node].keys[idx] == key {
            if self.nodes[node].leaf {
                self.nodes[node].keys.remove(idx);
                self.nodes[node].values.remove(idx);
            } else {
                self.remove_internal(node, idx);
            }
            return;
        }
        if self.nodes[node].leaf {
            return;
        }
        let child = self.nodes[node].children[idx];
        if self.nodes[child].keys.len() < self.degree {
            self.fill(node, idx);
            // The merge/borrow may have moved the key's subtree; re-descend.
            self.remove_key(node, key);
        } else {
            self.remove_key(child, key);
        }
    }

    /// Removes `keys[idx]` of internal `node` by replacing it with its
    /// predecessor (or successor) entry, or by merging the two adjacent
    /// children when both sit at minimum fill.
    fn remove_internal(&mut self, node: usize, idx: usize) {
        let t = self.degree;
        let key = self.nodes[node].keys[idx].clone();
        let left = self.nodes[node].children[idx];
        let right = self.nodes[node].children[idx + 1];
        if self.nodes[left].keys.len() >= t {
            let (pred_key, pred_values) = self.max_entry(left);
            self.nodes[node].keys[idx] = pred_key.clone();
            self.nodes[node].values[idx] = pred_values;
            self.remove_key(left, &pred_key);
        } else if self.nodes[right].keys.len() >= t {
            let (succ_key, succ_values) = self.min_entry(right);
            self.nodes[node].keys[idx] = succ_key.clone();
            self.nodes[node].values[idx] = succ_values;
            self.remove_key(right, &succ_key);
        } else {
            self.merge(node, idx);
            self.remove_key(left, &key);
        }
    }

    fn max_entry(&self, node: usize) -> (IndexKey, Vec<i64>) {
        let mut node = node;
        while !self.nodes[node].leaf {
            node = *self.nodes[node].children.last().expect("internal node has children");
        }
        let n = &self.nodes[node];
        (
            n.keys.last().expect("leaf on max path is non-empty").clone(),
            n.values.last().expect("leaf on max path is non-empty").clone(),
        )
    }

    fn min_entry(&self, node: usize) -> (IndexKey, Vec<i64>) {
        let mut node = node;
        while !self.nodes[node].leaf {
            node = self.nodes[node].children[0];
        }
        let n = &self.nodes[node];
        (n.keys[0].clone(), n.values[0].clone())
    }

    /// Brings the child at `idx` up to at least `t` keys: borrow from the
    /// left sibling, else the right, else merge with a sibling.
    fn fill(&mut self, node: usize, idx: usize) {
        let t = self.degree;
        let child_count = self.nodes[node].children.len();
        if idx > 0 && self.nodes[self.nodes[node].children[idx - 1]].keys.len() >= t {
            self.borrow_from_prev(node, idx);
        } else if idx + 1 < child_count && self.nodes[self.nodes[node].children[idx + 1]].keys.len() >= t {
            self.borrow_from_next(node, idx);
        } else if idx + 1 < child_count {
            self.merge(node, idx);
        } else {
            self.merge(node, idx - 1);
        }
    }

    fn borrow_from_prev(&mut self, node: usize, idx: usize) {
        let child = self.nodes[node].children[idx];
        let left = self.nodes[node].children[idx - 1];

        let lent_key = self.nodes[left].keys.pop().expect("left sibling can lend");
        let lent_values = self.nodes[left].values.pop().expect("left sibling can lend");
        let sep_key = std::mem::replace(&mut self.nodes[node].keys[idx - 1], lent_key);
        let sep_values = std::mem::replace(&mut self.nodes[node].values[idx - 1], lent_values);
        self.nodes[child].keys.insert(0, sep_key);
        self.nodes[child].values.insert(0, sep_values);
        if !self.nodes[left].leaf {
            let moved = self.nodes[left].children.pop().expect("internal sibling has children");
            self.nodes[child].children.insert(0, moved);
        }
    }

    fn borrow_from_next(&mut self, node: usize, idx: usize) {
        let child = self.nodes[node].children[idx];
        let right = self.nodes[node].children[idx + 1];

        let lent_key = self.nodes[right].keys.remove(0);
        let lent_values = self.nodes[right].values.remove(0);
        let sep_key = std::mem::replace(&mut self.nodes[node].keys[idx], lent_key);
        let sep_values = std::mem::replace(&mut self.nodes[node].values[idx], lent_values);
        self.nodes[child].keys.push(sep_key);
        self.nodes[child].values.push(sep_values);
        if !self.nodes[right].leaf {
            let moved = self.nodes[right].children.remove(0);
            self.nodes[child].children.push(moved);
        }
    }

    /// Merges `children[idx]`, the separator `keys[idx]`, and
    /// `children[idx + 1]` into `children[idx]`. The right node becomes an
    /// arena orphan; serialization only walks from the root.
    fn merge(&mut self, node: usize, idx: usize) {
        let child = self.nodes[node].children[idx];
        let right = self.nodes[node].children.remove(idx + 1);
        let sep_key = self.nodes[node].keys.remove(idx);
        let sep_values = self.nodes[node].values.remove(idx);

        let right_node = std::mem::replace(&mut self.nodes[right], Node::empty_leaf());
        let child_node = &mut self.nodes[child];
        child_node.keys.push(sep_key);
        child_node.values.push(sep_values);
        child_node.keys.extend(right_node.keys);
        child_node.values.extend(right_node.values);
        child_node.children.extend(right_node.children);
    }

    /// In-order traversal of `(key, row ids)` entries.
    pub fn entries(&self) -> Vec<(IndexKey, Vec<i64>)> {
        let mut out = Vec::new();
        self.collect_entries(self.root, &mut out);
        out
    }

    fn collect_entries(&self, node: usize, out: &mut Vec<(IndexKey, Vec<i64>)>) {
        let n = &self.nodes[node];
        if n.leaf {
            for (key, values) in n.keys.iter().zip(&n.values) {
                out.push((key.clone(), values.clone()));
            }
            return;
        }
        for i in 0..n.keys.len() {
            self.collect_entries(n.children[i], out);
            out.push((n.keys[i].clone(), n.values[i].clone()));
        }
        self.collect_entries(*n.children.last().expect("internal node has children"), out);
    }

    /// Serializes the tree as `i32 degree`, then the root node with a
    /// `u32` size prefix; every node is `u8 is_leaf`, `u16 key_count`,
    /// tagged keys with their row-id lists, `u16 child_count`, and
    /// size-prefixed children.
    pub fn encode(&self, writer: &mut impl BufWriter) {
        writer.put_i32(self.degree as i32);
        let root = self.encode_node(self.root);
        writer.put_u32(root.len() as u32);
        writer.put_slice(&root);
    }

    fn encode_node(&self, node: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        let n = &self.nodes[node];
        buf.put_u8(n.leaf as u8);
        buf.put_u16(n.keys.len() as u16);
        for (key, values) in n.keys.iter().zip(&n.values) {
            key.encode(&mut buf);
            buf.put_u16(values.len() as u16);
            for &row_id in values {
                buf.put_i64(row_id);
            }
        }
        buf.put_u16(n.children.len() as u16);
        for &child in &n.children {
            let bytes = self.encode_node(child);
            buf.put_u32(bytes.len() as u32);
            buf.put_slice(&bytes);
        }
        buf
    }

    pub fn decode<'de>(reader: &mut impl BufReader<'de>) -> Result<Self, DecodeError> {
        let degree = reader.get_i32()?;
        if degree < 2 {
            return Err(DecodeError::InvalidCount {
                field: "tree degree",
                given: degree as i64,
            });
        }
        let root_size = reader.get_u32()? as usize;
        let mut root_bytes = reader.get_slice(root_size)?;
        let mut tree = BTree {
            degree: degree as usize,
            nodes: Vec::new(),
            root: 0,
        };
        tree.root = tree.decode_node(&mut root_bytes)?;
        Ok(tree)
    }

    fn decode_node<'de>(&mut self, reader: &mut impl BufReader<'de>) -> Result<usize, DecodeError> {
        let leaf = reader.get_u8()? != 0;
        let key_count = reader.get_u16()? as usize;
        let mut keys = Vec::with_capacity(key_count);
        let mut values = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            keys.push(IndexKey::decode(reader)?);
            let value_count = reader.get_u16()? as usize;
            let mut row_ids = Vec::with_capacity(value_count);
            for _ in 0..value_count {
                row_ids.push(reader.get_i64()?);
            }
            values.push(row_ids);
        }
        let child_count = reader.get_u16()? as usize;
        if leaf && child_count != 0 || !leaf && child_count != key_count + 1 {
            return Err(DecodeError::InvalidCount {
                field: "node children",
                given: child_count as i64,
            });
        }
        let mut children = Vec::with_capacity(child_count);
        for _ in 0..child_count {
            let size = reader.get_u32()? as usize;
            let mut bytes = reader.get_slice(size)?;
            children.push(self.decode_node(&mut bytes)?);
        }
        let node = Node {
            leaf,
            keys,
            values,
            children,
        };
        Ok(self.alloc(node))
    }
}
