//! Read-only access to a git repository's object database.
//!
//! The store resolves a 20-byte content id against pack files (with delta
//! reconstruction) and loose object storage, returning streaming object
//! handles. Parsers for commits, trees, and the staging index sit on top,
//! and a small ref layer turns names into ids. Nothing here ever writes.

pub mod commit;
pub mod error;
pub mod id;
pub mod index;
pub mod mmap;
pub mod object;
pub mod pool;
pub mod refs;
pub mod store;
pub mod tree;

// Flat re-exports for the common types.
pub use commit::{Commit, Person};
pub use error::{Error, Result};
pub use id::ObjectId;
pub use index::{Index, IndexEntry};
pub use object::{Object, ObjectKind};
pub use refs::Branch;
pub use store::ObjectStore;
pub use tree::TreeEntry;
