//! # rowsync-merkle
//!
//! Merkle search tree used by rowsync replicas to find where their message
//! logs diverge.
//!
//! This crate provides:
//! - SHA-256 digests with order-independent XOR combination
//! - An arena-backed trie over HLC minute buckets
//! - A recursive diff returning the earliest divergent millisecond
//!
//! ## Example
//!
//! ```rust
//! use rowsync_core::{NodeId, Timestamp};
//! use rowsync_merkle::MerkleTree;
//!
//! let node = NodeId::random();
//! let mut local = MerkleTree::new();
//! let mut remote = MerkleTree::new();
//!
//! let shared = Timestamp::new(60_000, 0, node);
//! local.insert(&shared);
//! remote.insert(&shared);
//! assert_eq!(local.diff(&remote), None);
//!
//! remote.insert(&Timestamp::new(5 * 60_000 + 42, 0, node));
//! assert_eq!(local.diff(&remote), Some(5 * 60_000));
//! ```

mod hash;
mod tree;

pub use hash::{Hash, Hasher};
pub use tree::{MerkleTree, TreeNode, DEPTH, RADIX};
