use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, info};
use rusqlite as rs;
use rusqlite::{Connection, OpenFlags, OptionalExtension};

use gcore::buf::SharedBuffer;
use gcore::mode::{CompressMode, OpenMode};

use crate::{nth_name, refuse_write, Archive, ArchiveError, ChunkSizes};

// Values of file_list.compress_level
const LEVEL_RAW: i64 = 0;
const LEVEL_LZ4: i64 = 1;

const HIGH_COMPRESSION: lz4::block::CompressionMode = lz4::block::CompressionMode::HIGHCOMPRESSION(9);

/// Archive stored as an SQLite database of (optionally) LZ4 compressed chunks
pub struct SqlArchive {
    path: PathBuf,
    mode: OpenMode,
    conn: Option<Connection>,
    chunks: ChunkSizes,
    names: Vec<String>,
    known: HashSet<String>,
    in_bulk: bool,
}

impl SqlArchive {
    pub fn open(path: &Path, mode: OpenMode, chunks: ChunkSizes) -> Result<Self, ArchiveError> {
        let conn = match mode {
            OpenMode::Read => Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?,
            OpenMode::Write => {
                match std::fs::remove_file(path) {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                    _ => (),
                }
                Connection::open(path)?
            }
            OpenMode::Append => Connection::open(path)?,
        };

        if mode.is_writable() {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS file_list (
                    path TEXT PRIMARY KEY ON CONFLICT REPLACE NOT NULL,
                    uncompressed_size INTEGER NOT NULL,
                    compressed_size INTEGER NOT NULL,
                    compress_level INTEGER NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS file_contents (
                    path TEXT REFERENCES file_list (path) ON DELETE CASCADE ON UPDATE CASCADE,
                    contents BLOB,
                    chunk_idx INTEGER NOT NULL
                 );",
            )?;
        }

        // The enumeration is queried once and cached
        let names: Vec<String> = {
            let mut stmt = conn.prepare_cached("SELECT path FROM file_list ORDER BY rowid")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<String>, _>>()?
        };
        info!("{}: {} sqlite entries", path.display(), names.len());

        Ok(SqlArchive {
            path: path.to_path_buf(),
            mode,
            conn: Some(conn),
            chunks,
            known: names.iter().cloned().collect(),
            names,
            in_bulk: false,
        })
    }

    fn conn(&mut self) -> Result<&mut Connection, ArchiveError> {
        self.conn.as_mut().ok_or(ArchiveError::Closed)
    }
}

// Split and compress, returning the stored chunks, their total size and the
// compress_level. SlowCompress uses the LZ4 HC compressor; its blocks decode
// with the same decompressor as the fast ones.
fn encode_chunks(
    contents: &[u8],
    compress: CompressMode,
    chunk_size: usize,
) -> Result<(Vec<Vec<u8>>, usize, i64), ArchiveError> {
    let chunks: Vec<Vec<u8>> = match compress {
        CompressMode::NoCompress => {
            let chunks = contents.chunks(chunk_size).map(<[u8]>::to_vec).collect();
            return Ok((chunks, contents.len(), LEVEL_RAW));
        }
        CompressMode::FastCompress | CompressMode::MediumCompress => contents
            .chunks(chunk_size)
            .map(lz4_flex::block::compress)
            .collect(),
        CompressMode::SlowCompress => contents
            .chunks(chunk_size)
            .map(|chunk| lz4::block::compress(chunk, Some(HIGH_COMPRESSION), false))
            .collect::<Result<_, _>>()?,
    };

    let total = chunks.iter().map(Vec::len).sum();
    Ok((chunks, total, LEVEL_LZ4))
}

fn decode_chunks(path: &str, chunks: Vec<Vec<u8>>, size: usize, level: i64) -> Result<Vec<u8>, ArchiveError> {
    let mut out = vec![0u8; size];
    let mut filled = 0;

    for chunk in chunks.iter() {
        let written = match level {
            LEVEL_RAW => {
                let end = filled + chunk.len();
                if end > size {
                    return Err(ArchiveError::Corrupt(format!("{}: chunk overruns stored size", path)));
                }
                out[filled..end].copy_from_slice(chunk);
                chunk.len()
            }
            LEVEL_LZ4 => lz4_flex::block::decompress_into(chunk, &mut out[filled..])
                .map_err(|e| ArchiveError::Corrupt(format!("{}: {}", path, e)))?,
            _ => {
                return Err(ArchiveError::Corrupt(format!(
                    "{}: unknown compression level {}",
                    path, level
                )))
            }
        };
        filled += written;
    }

    if filled != size {
        return Err(ArchiveError::Corrupt(format!(
            "{}: expected {} bytes, found {}",
            path, size, filled
        )));
    }
    Ok(out)
}

impl Archive for SqlArchive {
    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn write(&mut self, path: &str, contents: &[u8], compress: CompressMode, _immediate: bool) -> Result<(), ArchiveError> {
        self.conn()?;
        refuse_write(self.mode)?;

        let chunk_size = self.chunks.for_mode(compress);
        let (chunks, compressed_size, level) = encode_chunks(contents, compress, chunk_size)?;

        // Inside a bulk scope this nests in the open transaction, outside of
        // one it is a transaction of its own
        let conn = self.conn()?;
        let tx = conn.savepoint()?;
        tx.prepare_cached("DELETE FROM file_contents WHERE path = ?")?
            .execute(rs::params![path])?;
        tx.prepare_cached("INSERT INTO file_list VALUES (?, ?, ?, ?)")?
            .execute(rs::params![path, contents.len() as i64, compressed_size as i64, level])?;
        {
            let mut stmt = tx.prepare_cached("INSERT INTO file_contents VALUES (?, ?, ?)")?;
            for (chunk_idx, chunk) in chunks.iter().enumerate() {
                stmt.execute(rs::params![path, chunk, chunk_idx as i64])?;
            }
        }
        tx.commit()?;

        debug!(
            "{}: {} bytes in {} chunks ({} stored)",
            path,
            contents.len(),
            chunks.len(),
            compressed_size
        );

        if self.known.insert(path.to_string()) {
            self.names.push(path.to_string());
        }
        Ok(())
    }

    fn read(&mut self, path: &str) -> Result<SharedBuffer, ArchiveError> {
        let conn = self.conn()?;

        let meta: Option<(i64, i64)> = conn
            .prepare_cached("SELECT uncompressed_size, compress_level FROM file_list WHERE path = ?")?
            .query_row(rs::params![path], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;

        let (size, level) = match meta {
            Some(meta) => meta,
            None => return Ok(SharedBuffer::empty()),
        };

        let chunks: Vec<Vec<u8>> = {
            let mut stmt = conn.prepare_cached(
                "SELECT contents
                 FROM file_contents
                 WHERE path = ?
                 ORDER BY chunk_idx ASC",
            )?;
            let rows = stmt.query_map(rs::params![path], |row| row.get::<_, Vec<u8>>(0))?;
            rows.collect::<Result<Vec<Vec<u8>>, _>>()?
        };

        let size = usize::try_from(size)
            .map_err(|_| ArchiveError::Corrupt(format!("{}: negative size {}", path, size)))?;
        Ok(SharedBuffer::new(decode_chunks(path, chunks, size, level)?))
    }

    fn size(&self) -> Result<usize, ArchiveError> {
        self.conn.as_ref().ok_or(ArchiveError::Closed)?;
        Ok(self.names.len())
    }

    fn item_name(&self, index: usize) -> Result<&str, ArchiveError> {
        self.conn.as_ref().ok_or(ArchiveError::Closed)?;
        nth_name(&self.names, index)
    }

    fn begin_bulk_writes(&mut self) -> Result<(), ArchiveError> {
        let writable = self.mode.is_writable();
        let in_bulk = self.in_bulk;
        let conn = self.conn()?;

        if writable && !in_bulk {
            conn.execute_batch("BEGIN TRANSACTION;")?;
            self.in_bulk = true;
        }
        Ok(())
    }

    fn end_bulk_writes(&mut self) -> Result<(), ArchiveError> {
        let in_bulk = self.in_bulk;
        let conn = self.conn()?;

        if in_bulk {
            conn.execute_batch("COMMIT;")?;
            self.in_bulk = false;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), ArchiveError> {
        if self.in_bulk {
            self.end_bulk_writes()?;
        }

        match self.conn.take() {
            None => Ok(()),
            Some(conn) => {
                debug!("closing {}", self.path.display());
                conn.close().map_err(|(_, e)| e.into())
            }
        }
    }
}

impl Drop for SqlArchive {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("closing {}: {}", self.path.display(), e);
        }
    }
}
