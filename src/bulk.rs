use log::{debug, error};

use gcore::buf::SharedBuffer;
use gcore::endian::{self, Element};
use gcore::mode::CompressMode;
use gcore::record::Record;
use gstore::ArchiveError;

use crate::gtar::{ArchivePath, GTAR};

/// Scoped batch of writes.
///
/// While it lives the backend may hold writes back (the SQLite backend keeps
/// them in one transaction). The batch ends with [`BulkWriter::finish`], or
/// when the writer is dropped.
pub struct BulkWriter<'a> {
    gtar: &'a mut GTAR,
    done: bool,
}

impl<'a> BulkWriter<'a> {
    pub(crate) fn new(gtar: &'a mut GTAR) -> Result<Self, ArchiveError> {
        gtar.begin_bulk_writes()?;
        debug!("bulk writes started on {}", gtar.path().display());

        Ok(BulkWriter { gtar, done: false })
    }

    pub fn write<P: ArchivePath + ?Sized>(
        &mut self,
        path: &P,
        contents: &[u8],
        compress: CompressMode,
    ) -> Result<(), ArchiveError> {
        self.gtar.write_entry(&path.archive_path(), contents, compress, false)
    }

    pub fn write_string<P: ArchivePath + ?Sized>(&mut self, path: &P, contents: &str) -> Result<(), ArchiveError> {
        let compress = self.gtar.default_compress();
        self.write(path, contents.as_bytes(), compress)
    }

    pub fn write_bytes<P: ArchivePath + ?Sized>(&mut self, path: &P, contents: &[u8]) -> Result<(), ArchiveError> {
        let compress = self.gtar.default_compress();
        self.write(path, contents, compress)
    }

    pub fn write_individual<P: ArchivePath + ?Sized, T: Element>(
        &mut self,
        path: &P,
        values: &[T],
    ) -> Result<(), ArchiveError> {
        let compress = self.gtar.default_compress();
        self.write(path, &endian::encode(values), compress)
    }

    pub fn write_uniform<P: ArchivePath + ?Sized, T: Element>(&mut self, path: &P, value: T) -> Result<(), ArchiveError> {
        let compress = self.gtar.default_compress();
        self.write(path, &endian::encode_uniform(value), compress)
    }

    pub fn write_record(&mut self, record: &Record, contents: &[u8], compress: CompressMode) -> Result<(), ArchiveError> {
        self.write(record, contents, compress)
    }

    pub fn read<P: ArchivePath + ?Sized>(&mut self, path: &P) -> Result<SharedBuffer, ArchiveError> {
        self.gtar.read(path)
    }

    /// End the batch, surfacing any error of the final flush
    pub fn finish(mut self) -> Result<(), ArchiveError> {
        self.done = true;
        self.gtar.end_bulk_writes()
    }
}

impl Drop for BulkWriter<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Err(e) = self.gtar.end_bulk_writes() {
            error!("ending bulk writes on {}: {}", self.gtar.path().display(), e);
        }
    }
}
