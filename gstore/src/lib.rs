//! Byte-addressed archive storage
//!
//! An [`Archive`] owns one open container and exposes write, read and a
//! stable enumeration of the paths it holds. Four backends implement it:
//!
//! - [`tar::TarBackend`]: a plain ustar file
//! - [`sql::SqlArchive`]: an SQLite file of LZ4 compressed chunks (feature `sql`)
//! - [`zip::ZipBackend`]: a zip64 file (feature `zip`)
//! - [`dir::DirectoryBackend`]: a directory tree
//!
//! Only the SQLite backend is transactional. A failed write into a tar file
//! or a directory can leave a partial entry behind.
pub mod dir;
pub mod tar;

#[cfg(feature = "sql")]
pub mod sql;

#[cfg(feature = "zip")]
pub mod zip;

use std::path::Path;

use log::info;
use serde::Deserialize;
use thiserror::Error;

use garc::tar::TarError;
use gcore::buf::SharedBuffer;
use gcore::endian::CodecError;
use gcore::mode::{CompressMode, OpenMode};

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("invalid mode: {0}")]
    InvalidMode(String),
    #[error("archive is closed")]
    Closed,
    #[error("corrupt container: {0}")]
    Corrupt(String),
    #[error("I/O error: {0}")]
    IO(#[from] std::io::Error),
    #[cfg(feature = "sql")]
    #[error("sqlite error: {0}")]
    Sql(rusqlite::Error),
    #[cfg(feature = "zip")]
    #[error("zip error: {0}")]
    Zip(::zip::result::ZipError),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("item {index} out of range for archive of {size} items")]
    OutOfRange { index: usize, size: usize },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<TarError> for ArchiveError {
    fn from(e: TarError) -> Self {
        match e {
            TarError::IO(e) => ArchiveError::IO(e),
            TarError::NameTooLong(_) | TarError::SizeOverflow(_) => ArchiveError::InvalidPath(e.to_string()),
            TarError::Magic(_) | TarError::Checksum { .. } | TarError::BadOctal(_) => {
                ArchiveError::Corrupt(e.to_string())
            }
        }
    }
}

#[cfg(feature = "sql")]
impl From<rusqlite::Error> for ArchiveError {
    fn from(e: rusqlite::Error) -> Self {
        ArchiveError::Sql(e)
    }
}

#[cfg(feature = "zip")]
impl From<::zip::result::ZipError> for ArchiveError {
    fn from(e: ::zip::result::ZipError) -> Self {
        ArchiveError::Zip(e)
    }
}

/// Capability every storage backend provides
pub trait Archive {
    fn mode(&self) -> OpenMode;

    /// Store `contents` under `path`, replacing any previous entry in the
    /// enumeration. With `immediate` unset the write may stay buffered until
    /// [`Archive::end_bulk_writes`].
    fn write(&mut self, path: &str, contents: &[u8], compress: CompressMode, immediate: bool) -> Result<(), ArchiveError>;

    /// Contents stored under `path`, or an empty buffer if there is none
    fn read(&mut self, path: &str) -> Result<SharedBuffer, ArchiveError>;

    fn size(&self) -> Result<usize, ArchiveError>;

    /// Path at position `index` of the enumeration, in write/storage order
    fn item_name(&self, index: usize) -> Result<&str, ArchiveError>;

    fn begin_bulk_writes(&mut self) -> Result<(), ArchiveError>;

    fn end_bulk_writes(&mut self) -> Result<(), ArchiveError>;

    /// Flush and finalize the container. Calling it again is a no-op, every
    /// other operation fails with [`ArchiveError::Closed`] afterwards.
    fn close(&mut self) -> Result<(), ArchiveError>;

    fn item_names(&self) -> Result<Vec<String>, ArchiveError> {
        (0..self.size()?).map(|i| self.item_name(i).map(str::to_string)).collect()
    }
}

// Shared enumeration lookup
pub(crate) fn nth_name(names: &[String], index: usize) -> Result<&str, ArchiveError> {
    names.get(index).map(String::as_str).ok_or(ArchiveError::OutOfRange {
        index,
        size: names.len(),
    })
}

pub(crate) fn refuse_write(mode: OpenMode) -> Result<(), ArchiveError> {
    match mode {
        OpenMode::Read => Err(ArchiveError::InvalidMode(
            "can't write to an archive opened for reading".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Chunk thresholds of the SQLite backend. Payloads are split into pieces of
/// at most this many bytes before (optional) compression.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkSizes {
    pub raw_chunk_size: usize,
    pub compressed_chunk_size: usize,
}

impl Default for ChunkSizes {
    fn default() -> Self {
        ChunkSizes {
            raw_chunk_size: 256 * 1024 * 1024,
            compressed_chunk_size: 4 * 1024 * 1024,
        }
    }
}

impl ChunkSizes {
    pub fn for_mode(&self, compress: CompressMode) -> usize {
        let size = if compress.is_compressed() {
            self.compressed_chunk_size
        } else {
            self.raw_chunk_size
        };
        size.max(1)
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Tar,
    Sqlite,
    Zip,
    Dir,
    Hdf5,
}

impl BackendKind {
    /// Pick a backend from the file name
    pub fn detect(path: &Path) -> BackendKind {
        let text = path.to_string_lossy();
        if text.ends_with('/') || text.ends_with(std::path::MAIN_SEPARATOR) {
            return BackendKind::Dir;
        }

        match path.extension().and_then(|e| e.to_str()) {
            Some("tar") => BackendKind::Tar,
            Some("sqlite") => BackendKind::Sqlite,
            Some("h5") | Some("hdf5") => BackendKind::Hdf5,
            _ => BackendKind::Zip,
        }
    }
}

/// Open a container with the given backend
#[cfg_attr(not(feature = "sql"), allow(unused_variables))]
pub fn open_archive(
    kind: BackendKind,
    path: &Path,
    mode: OpenMode,
    chunks: &ChunkSizes,
) -> Result<Box<dyn Archive>, ArchiveError> {
    info!("opening {} as {:?} for {}", path.display(), kind, mode);

    match kind {
        BackendKind::Tar => Ok(Box::new(tar::TarBackend::open(path, mode)?)),
        BackendKind::Dir => Ok(Box::new(dir::DirectoryBackend::open(path, mode)?)),

        #[cfg(feature = "sql")]
        BackendKind::Sqlite => Ok(Box::new(sql::SqlArchive::open(path, mode, *chunks)?)),

        #[cfg(feature = "zip")]
        BackendKind::Zip => Ok(Box::new(zip::ZipBackend::open(path, mode)?)),

        #[allow(unreachable_patterns)]
        _ => Err(ArchiveError::Unsupported(format!("{:?} backend is not available", kind))),
    }
}


#[cfg(test)]
mod test_backend_kind {
    use super::*;

    #[test]
    fn detect_by_name() {
        assert_eq!(BackendKind::detect(Path::new("out/")), BackendKind::Dir);
        assert_eq!(BackendKind::detect(Path::new("traj.tar")), BackendKind::Tar);
        assert_eq!(BackendKind::detect(Path::new("traj.sqlite")), BackendKind::Sqlite);
        assert_eq!(BackendKind::detect(Path::new("traj.h5")), BackendKind::Hdf5);
        assert_eq!(BackendKind::detect(Path::new("traj.hdf5")), BackendKind::Hdf5);
        assert_eq!(BackendKind::detect(Path::new("traj.zip")), BackendKind::Zip);
        assert_eq!(BackendKind::detect(Path::new("traj")), BackendKind::Zip);
    }

    #[test]
    fn hdf5_unsupported() {
        let result = open_archive(
            BackendKind::Hdf5,
            Path::new("traj.h5"),
            OpenMode::Read,
            &ChunkSizes::default(),
        );

        assert!(matches!(result, Err(ArchiveError::Unsupported(_))));
    }

    #[test]
    fn chunk_size_per_mode() {
        let chunks = ChunkSizes {
            raw_chunk_size: 10,
            compressed_chunk_size: 0,
        };

        assert_eq!(chunks.for_mode(CompressMode::NoCompress), 10);
        assert_eq!(chunks.for_mode(CompressMode::SlowCompress), 1);
    }

    #[test]
    fn tar_errors_map() {
        assert!(matches!(ArchiveError::from(TarError::Magic(0)), ArchiveError::Corrupt(_)));
        assert!(matches!(ArchiveError::from(TarError::NameTooLong(300)), ArchiveError::InvalidPath(_)));
    }
}
