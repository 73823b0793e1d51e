//! Packed filesystem snapshots.
//!
//! ```text
//! host trees ──(builder)──▶ index + blob ──(loader)──▶ VirtualFs template
//! ```

mod builder;
mod format;
mod loader;

pub use builder::{Mount, SnapshotBuilder, build_snapshot};
pub use format::{IndexEntry, Snapshot, SnapshotIndex, SnapshotStats};
pub use loader::load_snapshot;
