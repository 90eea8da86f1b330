use std::io::{Read, Seek, SeekFrom};

use log::{debug, warn};

use gcore::buf::fill_buf;

use crate::tar::header::{self, Block};
use crate::tar::{entry_size, TarError, BLOCK_SIZE};

/// Location of one entry's payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarEntry {
    pub path: String,
    pub offset: u64,
    pub size: u64,
}

/// Header-by-header scanner over an existing archive
pub struct TarReader<R: Read + Seek> {
    inner: R,
    offset: u64,
    done: bool,
}

impl<R: Read + Seek> TarReader<R> {
    pub fn new(reader: R) -> Self {
        TarReader {
            inner: reader,
            offset: 0,
            done: false,
        }
    }

    /// End of the last entry scanned so far, where new entries get appended
    pub fn end(&self) -> u64 {
        self.offset
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn read_entry(&mut self) -> Result<Option<TarEntry>, TarError> {
        self.inner.seek(SeekFrom::Start(self.offset))?;

        let mut block: Block = [0; BLOCK_SIZE];
        match fill_buf(&mut self.inner, &mut block)? {
            (true, 0) => return Ok(None),
            (true, len) => {
                warn!("truncated tar header at offset {} ({} bytes)", self.offset, len);
                return Ok(None);
            }
            (false, _) => (),
        }

        let header = match header::decode(&block, self.offset) {
            Ok(Some(header)) => header,
            Ok(None) => return Ok(None),
            // Trailing garbage after real entries is tolerated
            Err(TarError::Magic(offset)) if offset != 0 => {
                warn!("tar magic mismatch at offset {}, ignoring the rest", offset);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let entry = TarEntry {
            path: header.path,
            offset: self.offset + BLOCK_SIZE as u64,
            size: header.size,
        };
        debug!("scanned {} at {} ({} bytes)", entry.path, entry.offset, entry.size);

        self.offset += entry_size(header.size);
        Ok(Some(entry))
    }
}

impl<R: Read + Seek> Iterator for TarReader<R> {
    type Item = Result<TarEntry, TarError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Read the payload of an entry found by a [`TarReader`]
pub fn read_payload<R: Read + Seek>(reader: &mut R, entry: &TarEntry) -> Result<Vec<u8>, TarError> {
    let mut data = vec![0; entry.size as usize];

    reader.seek(SeekFrom::Start(entry.offset))?;
    reader.read_exact(&mut data)?;
    Ok(data)
}

#[cfg(test)]
mod test_tar_reader {
    use super::*;
    use crate::tar::builder::TarBuilder;
    use std::io::Cursor;

    fn build(entries: &[(&str, &[u8])]) -> Cursor<Vec<u8>> {
        let mut builder = TarBuilder::new(Cursor::new(Vec::new()));
        for (path, data) in entries {
            builder.append(path, data).unwrap();
        }
        builder.finish().unwrap();
        builder.into_inner()
    }

    #[test]
    fn empty_archive() {
        let mut reader = TarReader::new(build(&[]));

        assert!(reader.next().is_none());
        assert_eq!(reader.end(), 0);
    }

    #[test]
    fn entries_in_order() {
        let data = build(&[("a", b"hello"), ("frames/1/b.txt", &[7u8; 512]), ("c", b"")]);
        let mut reader = TarReader::new(data);
        let entries: Vec<TarEntry> = reader.by_ref().map(|e| e.unwrap()).collect();

        assert_eq!(
            entries,
            vec![
                TarEntry { path: "a".into(), offset: 512, size: 5 },
                TarEntry { path: "frames/1/b.txt".into(), offset: 1536, size: 512 },
                TarEntry { path: "c".into(), offset: 2560, size: 0 },
            ]
        );
        // Terminator is not part of the entries
        assert_eq!(reader.end(), 2560);

        let mut data = reader.into_inner();
        assert_eq!(data.get_ref().len(), 2560 + 1024);
        assert_eq!(read_payload(&mut data, &entries[0]).unwrap(), b"hello");
        assert_eq!(read_payload(&mut data, &entries[1]).unwrap(), vec![7u8; 512]);
    }

    #[test]
    fn not_a_tar() {
        let mut reader = TarReader::new(Cursor::new(vec![b'x'; 2048]));

        assert!(matches!(reader.next(), Some(Err(TarError::Magic(0)))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn trailing_garbage() {
        let mut data = build(&[("a", b"1")]).into_inner();
        data.truncate(1024);
        data.extend_from_slice(&[b'x'; 512]);

        let entries: Vec<_> = TarReader::new(Cursor::new(data)).collect();

        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_ok());
    }

    #[test]
    fn missing_terminator() {
        let mut data = build(&[("a", b"1"), ("b", b"2")]).into_inner();
        data.truncate(2048 + 100);

        let entries: Vec<_> = TarReader::new(Cursor::new(data)).map(|e| e.unwrap().path).collect();

        assert_eq!(entries, vec!["a", "b"]);
    }

    #[test]
    fn corrupt_header() {
        let mut data = build(&[("a", b"1"), ("b", b"2")]).into_inner();
        data[1024] = b'z';

        let mut reader = TarReader::new(Cursor::new(data));

        assert!(reader.next().unwrap().is_ok());
        assert!(matches!(reader.next(), Some(Err(TarError::Checksum { offset: 1024, .. }))));
        assert!(reader.next().is_none());
    }
}
