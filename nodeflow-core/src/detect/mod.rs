//! Change Detection
//!
//! A second update engine, independent of the mirror. It keeps no copy of
//! the tree topology. Each update re-reads the live tree and compares
//! socket links and property values with what it saw last time.
//!
//! Use it for hosts that can't report edit events, or for frame changes
//! where only animation nodes and their downstream need recomputing.

mod cache;
mod detector;
mod live;
mod memory;

pub use cache::{CacheKey, ChangeCache, SocketSide};
pub use detector::{ChangeDetector, UpdateMode, UpdateTarget};
pub use live::{LiveForest, LiveNode, LiveTree, Processable, PropValue, SocketRef, SocketView};
pub use memory::{Journal, MemoryForest, MemoryNode, MemoryTree};
