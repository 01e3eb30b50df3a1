//! On-disk snapshots of registry and container state.
//!
//! Snapshots are whole-state files rather than logs: the registry and the
//! container index are captured as serde values, framed with a CRC32
//! checksum and written atomically.

mod codec;
mod snapshot;

pub use codec::{decode, encode, read_header, write_header, CODEC_VERSION, MAGIC, MAX_ENTRY_SIZE};
pub use snapshot::{read_snapshot, write_snapshot, IndexSnapshot, SnapshotHeader};
