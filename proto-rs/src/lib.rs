pub mod message;
pub mod reader;
pub mod snapshot;
pub mod writer;

pub use message::*;
pub use reader::{SnapshotReader, decode_snapshot};
pub use snapshot::*;
pub use writer::{SnapshotHeader, SnapshotWriter, encode_snapshot};
