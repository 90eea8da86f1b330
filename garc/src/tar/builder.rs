use std::io::Write;

use log::debug;
use time::OffsetDateTime;

use crate::tar::header;
use crate::tar::{padding, TarError, BLOCK_SIZE, END_SIZE};

const ZEROS: [u8; BLOCK_SIZE] = [0; BLOCK_SIZE];

pub struct TarBuilder<W: Write> {
    inner: W,
}

// Appends entries at whatever position the writer is at
impl<W: Write> TarBuilder<W> {
    pub fn new(writer: W) -> Self {
        TarBuilder { inner: writer }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Write one entry, returning the number of bytes it took on disk
    pub fn append(&mut self, path: &str, data: &[u8]) -> Result<u64, TarError> {
        let mtime = OffsetDateTime::now_utc().unix_timestamp().max(0) as u64;
        let block = header::encode(path, data.len() as u64, mtime)?;
        let pad = padding(data.len() as u64) as usize;

        self.inner.write_all(&block)?;
        self.inner.write_all(data)?;
        self.inner.write_all(&ZEROS[..pad])?;

        debug!("tar entry {} ({} bytes)", path, data.len());
        Ok((BLOCK_SIZE + data.len() + pad) as u64)
    }

    /// Write the two zero blocks terminating an archive
    pub fn finish(&mut self) -> Result<u64, TarError> {
        self.inner.write_all(&ZEROS)?;
        self.inner.write_all(&ZEROS)?;
        self.inner.flush()?;
        Ok(END_SIZE as u64)
    }
}
