//! Trajectory archives
//!
//! A trajectory is a set of named records laid out as paths in a container
//! (a tar, zip or SQLite file, or a plain directory). [`GTAR`] opens one,
//! indexes the record types it holds and the frames stored for each, and
//! reads and writes raw bytes or little-endian numeric arrays.
pub mod bulk;
pub mod config;
pub mod gtar;
pub mod index;

pub use crate::bulk::BulkWriter;
pub use crate::config::{Config, ConfigError};
pub use crate::gtar::{ArchivePath, GTAR};
pub use crate::index::RecordIndex;

pub use gcore::buf::SharedBuffer;
pub use gcore::endian::{CodecError, Element};
pub use gcore::mode::{CompressMode, OpenMode};
pub use gcore::record::{Behavior, Format, Record, Resolution};
pub use gstore::{Archive, ArchiveError, BackendKind, ChunkSizes};
