//! Merkle search tree over minute buckets.
//!
//! A timestamp's `millis` is reduced to a minute number and written as
//! [`DEPTH`] base-[`RADIX`] digits, most significant first. Each digit selects
//! a child one level down, so every minute maps to exactly one leaf. Leaves
//! keep an XOR digest of the timestamps in their bucket; every node's hash is
//! derived from its bucket digest and its present children's `(digit, hash)`
//! pairs in digit order. The resulting hashes depend only on the set of
//! inserted timestamps, never on insertion order.
//!
//! Nodes live in an arena and refer to children by index, which keeps the
//! structure acyclic and trivially serializable.

use crate::hash::{Hash, Hasher};
use rowsync_core::{Timestamp, BUCKET_MILLIS};
use serde::{Deserialize, Serialize};

/// Branching factor of every node.
pub const RADIX: usize = 16;

/// Number of digit levels below the root.
pub const DEPTH: usize = 8;

const ROOT: u32 = 0;

/// Largest minute number addressable by [`DEPTH`] digits.
const MAX_KEY: u64 = (1u64 << (4 * DEPTH)) - 1;

/// A single arena slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    hash: Hash,
    /// XOR of the digests of every timestamp in this node's bucket.
    bucket: Hash,
    /// Number of timestamps at or below this node.
    len: u64,
    children: [Option<u32>; RADIX],
}

impl TreeNode {
    fn empty() -> Self {
        TreeNode {
            hash: Hash::zero(),
            bucket: Hash::zero(),
            len: 0,
            children: [None; RADIX],
        }
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Deserialize)]
struct RawTree {
    nodes: Vec<TreeNode>,
}

/// Authenticated index of every timestamp inserted into the local log.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "RawTree")]
pub struct MerkleTree {
    nodes: Vec<TreeNode>,
}

impl TryFrom<RawTree> for MerkleTree {
    type Error = String;

    fn try_from(raw: RawTree) -> Result<Self, Self::Error> {
        if raw.nodes.is_empty() {
            return Err("merkle tree has no root".to_string());
        }
        let len = raw.nodes.len();
        for (index, node) in raw.nodes.iter().enumerate() {
            for child in node.children.iter().flatten() {
                let child = *child as usize;
                // Children are always allocated after their parent.
                if child <= index || child >= len {
                    return Err(format!("invalid child index {} at node {}", child, index));
                }
            }
        }
        Ok(MerkleTree { nodes: raw.nodes })
    }
}

impl Default for MerkleTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MerkleTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        MerkleTree {
            nodes: vec![TreeNode::empty()],
        }
    }

    /// Build a tree from a set of timestamps.
    pub fn from_timestamps<'a>(timestamps: impl IntoIterator<Item = &'a Timestamp>) -> Self {
        let mut tree = Self::new();
        for timestamp in timestamps {
            tree.insert(timestamp);
        }
        tree
    }

    pub fn root_hash(&self) -> Hash {
        self.nodes[ROOT as usize].hash
    }

    /// Number of timestamps in the tree.
    pub fn len(&self) -> u64 {
        self.nodes[ROOT as usize].len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Fold a timestamp into the tree.
    ///
    /// Each distinct timestamp must be inserted at most once; the message log
    /// decides which timestamps are new.
    pub fn insert(&mut self, timestamp: &Timestamp) {
        let mut path = [ROOT; DEPTH + 1];
        let mut current = ROOT;
        for (level, digit) in key_digits(timestamp.millis).into_iter().enumerate() {
            current = self.child_or_create(current, digit);
            path[level + 1] = current;
        }

        self.nodes[current as usize].bucket ^= Hasher::timestamp(timestamp);
        for &index in path.iter().rev() {
            self.nodes[index as usize].len += 1;
            self.rehash(index);
        }
    }

    /// Find the earliest point where two trees diverge.
    ///
    /// Returns `None` when the root hashes match. Otherwise returns a
    /// millisecond value that is less than or equal to every timestamp present
    /// in exactly one of the two trees.
    pub fn diff(&self, other: &MerkleTree) -> Option<u64> {
        if self.root_hash() == other.root_hash() {
            return None;
        }

        let (mut a, mut b) = (ROOT, ROOT);
        let mut prefix = 0u64;
        for depth in 0..DEPTH {
            let digit = (0..RADIX).find(|&d| self.child_hash(a, d) != other.child_hash(b, d));
            let Some(digit) = digit else {
                return Some(prefix_millis(prefix, depth));
            };
            prefix = prefix * RADIX as u64 + digit as u64;

            match (self.child(a, digit), other.child(b, digit)) {
                (Some(ca), Some(cb)) => {
                    a = ca;
                    b = cb;
                }
                (Some(ca), None) => return Some(self.min_millis(ca, prefix, depth + 1)),
                (None, Some(cb)) => return Some(other.min_millis(cb, prefix, depth + 1)),
                (None, None) => return Some(prefix_millis(prefix, depth + 1)),
            }
        }
        Some(prefix_millis(prefix, DEPTH))
    }

    fn child(&self, index: u32, digit: usize) -> Option<u32> {
        self.nodes[index as usize].children[digit]
    }

    fn child_hash(&self, index: u32, digit: usize) -> Hash {
        self.child(index, digit)
            .map(|c| self.nodes[c as usize].hash)
            .unwrap_or_default()
    }

    fn child_or_create(&mut self, parent: u32, digit: u8) -> u32 {
        if let Some(child) = self.nodes[parent as usize].children[digit as usize] {
            return child;
        }
        let index = self.nodes.len() as u32;
        self.nodes.push(TreeNode::empty());
        self.nodes[parent as usize].children[digit as usize] = Some(index);
        index
    }

    fn rehash(&mut self, index: u32) {
        let node = &self.nodes[index as usize];
        let hash = if node.len == 0 {
            Hash::zero()
        } else {
            let mut hasher = Hasher::new();
            hasher.update(node.bucket.as_bytes());
            for (digit, child) in node.children.iter().enumerate() {
                if let Some(child) = child {
                    hasher.update(&[digit as u8]);
                    hasher.update(self.nodes[*child as usize].hash.as_bytes());
                }
            }
            hasher.finalize()
        };
        self.nodes[index as usize].hash = hash;
    }

    /// Smallest bucket start reachable below `index`.
    fn min_millis(&self, mut index: u32, mut prefix: u64, mut depth: usize) -> u64 {
        while depth < DEPTH {
            let first = self.nodes[index as usize]
                .children
                .iter()
                .enumerate()
                .find_map(|(digit, child)| child.map(|c| (digit, c)));
            let Some((digit, child)) = first else {
                break;
            };
            prefix = prefix * RADIX as u64 + digit as u64;
            index = child;
            depth += 1;
        }
        prefix_millis(prefix, depth)
    }

    fn subtree_eq(&self, other: &MerkleTree, a: u32, b: u32) -> bool {
        let (na, nb) = (&self.nodes[a as usize], &other.nodes[b as usize]);
        na.hash == nb.hash
            && na.bucket == nb.bucket
            && na.len == nb.len
            && na
                .children
                .iter()
                .zip(nb.children.iter())
                .all(|pair| match pair {
                    (None, None) => true,
                    (Some(ca), Some(cb)) => self.subtree_eq(other, *ca, *cb),
                    _ => false,
                })
    }
}

/// Trees are equal when they have the same shape and the same hashes at every
/// node, regardless of arena layout.
impl PartialEq for MerkleTree {
    fn eq(&self, other: &Self) -> bool {
        self.subtree_eq(other, ROOT, ROOT)
    }
}

impl Eq for MerkleTree {}

/// Digits of the minute bucket containing `millis`, most significant first.
fn key_digits(millis: u64) -> [u8; DEPTH] {
    let mut key = (millis / BUCKET_MILLIS).min(MAX_KEY);
    let mut digits = [0u8; DEPTH];
    for slot in digits.iter_mut().rev() {
        *slot = (key % RADIX as u64) as u8;
        key /= RADIX as u64;
    }
    digits
}

/// First millisecond of the range addressed by a `depth`-digit prefix.
fn prefix_millis(prefix: u64, depth: usize) -> u64 {
    (prefix << (4 * (DEPTH - depth))) * BUCKET_MILLIS
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_core::NodeId;

    fn ts(millis: u64, counter: u16) -> Timestamp {
        Timestamp::new(millis, counter, NodeId::from_bytes([3; 16]))
    }

    #[test]
    fn test_empty_tree() {
        let tree = MerkleTree::new();
        assert!(tree.is_empty());
        assert!(tree.root_hash().is_zero());
        assert_eq!(tree.diff(&MerkleTree::new()), None);
    }

    #[test]
    fn test_insert_changes_root_and_counts() {
        let mut tree = MerkleTree::new();
        tree.insert(&ts(1_700_000_000_000, 0));
        let first = tree.root_hash();
        assert!(!first.is_zero());
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.node_count(), DEPTH + 1);

        // Same minute shares the whole path.
        tree.insert(&ts(1_700_000_000_001, 0));
        assert_ne!(tree.root_hash(), first);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.node_count(), DEPTH + 1);
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let stamps = [ts(60_000, 0), ts(5 * 60_000, 1), ts(5 * 60_000, 2), ts(99_999_999, 0)];
        let forward = MerkleTree::from_timestamps(stamps.iter());
        let backward = MerkleTree::from_timestamps(stamps.iter().rev());
        assert_eq!(forward.root_hash(), backward.root_hash());
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_diff_finds_bucket_of_single_difference() {
        let shared = [ts(60_000, 0), ts(10 * 60_000, 0)];
        let a = MerkleTree::from_timestamps(shared.iter());
        let mut b = a.clone();
        b.insert(&ts(7 * 60_000 + 1_234, 0));

        assert_eq!(a.diff(&b), Some(7 * 60_000));
        assert_eq!(b.diff(&a), Some(7 * 60_000));
    }

    #[test]
    fn test_diff_same_bucket_different_contents() {
        let a = MerkleTree::from_timestamps([ts(120_500, 0)].iter());
        let b = MerkleTree::from_timestamps([ts(120_500, 1)].iter());
        assert_eq!(a.diff(&b), Some(120_000));
    }

    #[test]
    fn test_diff_against_empty_tree_returns_earliest_bucket() {
        let stamps = [ts(50 * 60_000, 0), ts(3 * 60_000 + 59_999, 0), ts(1_000 * 60_000, 0)];
        let tree = MerkleTree::from_timestamps(stamps.iter());
        assert_eq!(tree.diff(&MerkleTree::new()), Some(3 * 60_000));
        assert_eq!(MerkleTree::new().diff(&tree), Some(3 * 60_000));
    }

    #[test]
    fn test_serde_roundtrip_preserves_structure() {
        let tree = MerkleTree::from_timestamps([ts(60_000, 0), ts(1_700_000_000_000, 5)].iter());
        let json = serde_json::to_string(&tree).unwrap();
        let back: MerkleTree = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tree);
        assert_eq!(back.diff(&tree), None);
    }

    #[test]
    fn test_deserialize_rejects_bad_child_index() {
        let mut node = serde_json::to_value(TreeNode::empty()).unwrap();
        node["children"][0] = serde_json::json!(0);
        let json = serde_json::json!({ "nodes": [node] });
        assert!(serde_json::from_value::<MerkleTree>(json).is_err());

        let json = serde_json::json!({ "nodes": [] });
        assert!(serde_json::from_value::<MerkleTree>(json).is_err());
    }

    #[test]
    fn test_key_digits() {
        assert_eq!(key_digits(0), [0; DEPTH]);
        assert_eq!(key_digits(17 * 60_000), [0, 0, 0, 0, 0, 0, 1, 1]);
        assert_eq!(key_digits(u64::MAX), [15; DEPTH]);
        assert_eq!(prefix_millis(0x11, DEPTH), 17 * 60_000);
        assert_eq!(prefix_millis(1, 1), (1u64 << 28) * 60_000);
    }
}
