//! Storage backends used by fast sync.
//!
//! [`KeyValueStore`] is the durable store sync bookkeeping lives in; every
//! write goes through an atomic [`WriteBatch`]. [`TrieStorage`] is the node
//! store the downloaded tries end up in.

pub mod error;
pub mod kv;
pub mod trie_store;

pub use error::StorageError;
pub use kv::{KeyValueStore, MemoryKvStore, WriteBatch, WriteOp};
pub use trie_store::{MemoryTrieStorage, TrieStorage};
