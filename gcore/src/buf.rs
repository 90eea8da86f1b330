use std::fmt;
use std::io::Read;
use std::ops::Deref;

use bytes::Bytes;

/// Immutable, cheaply clonable byte buffer returned by every archive read.
///
/// Clones share the same allocation. A caller that needs exclusive ownership of
/// the bytes calls [`SharedBuffer::into_vec`], which only copies when the
/// allocation is still shared.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct SharedBuffer(Bytes);

impl SharedBuffer {
    pub fn new(data: Vec<u8>) -> Self {
        SharedBuffer(Bytes::from(data))
    }

    pub fn empty() -> Self {
        SharedBuffer(Bytes::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0[..]
    }

    pub fn into_vec(self) -> Vec<u8> {
        Vec::from(self.0)
    }
}

impl Deref for SharedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for SharedBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl From<Vec<u8>> for SharedBuffer {
    fn from(data: Vec<u8>) -> Self {
        SharedBuffer::new(data)
    }
}

impl From<&[u8]> for SharedBuffer {
    fn from(data: &[u8]) -> Self {
        SharedBuffer(Bytes::copy_from_slice(data))
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("len", &self.len())
            .finish()
    }
}

/// Read until `buf` is full or the reader is exhausted.
///
/// Returns `(eof, bytes_read)`; `eof` is only set when the reader ran dry
/// before `buf` was filled.
pub fn fill_buf<R: Read>(data: &mut R, buf: &mut [u8]) -> std::io::Result<(bool, usize)> {
    let mut buf_read = 0;

    while buf_read < buf.len() {
        match data.read(&mut buf[buf_read..]) {
            Ok(0) => return Ok((true, buf_read)),
            Ok(x) => buf_read += x,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
    }
    Ok((false, buf_read))
}


#[cfg(test)]
mod test_fill_buf {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn big_buf_small_vec() {
        let mut in_buf: Cursor<Vec<u8>> = Cursor::new(vec![1, 2]);
        let mut buf: [u8; 4] = [0; 4];

        assert_eq!(fill_buf(&mut in_buf, &mut buf).unwrap(), (true, 2));
        assert_eq!(&buf, &[1, 2, 0, 0]);
    }

    #[test]
    fn small_buf_big_vec() {
        let mut in_buf: Cursor<Vec<u8>> = Cursor::new(vec![1, 2, 3, 4]);
        let mut buf: [u8; 2] = [0; 2];

        assert_eq!(fill_buf(&mut in_buf, &mut buf).unwrap(), (false, 2));
        assert_eq!(&buf, &[1, 2]);
    }

    #[test]
    fn same_buf_same_vec() {
        let mut in_buf: Cursor<Vec<u8>> = Cursor::new(vec![1, 2, 3, 4]);
        let mut buf: [u8; 4] = [0; 4];

        assert_eq!(fill_buf(&mut in_buf, &mut buf).unwrap(), (false, 4));
        assert_eq!(&buf, &[1, 2, 3, 4]);
    }

    #[test]
    fn empty_reader() {
        let mut in_buf: Cursor<Vec<u8>> = Cursor::new(vec![]);
        let mut buf: [u8; 4] = [0; 4];

        assert_eq!(fill_buf(&mut in_buf, &mut buf).unwrap(), (true, 0));
    }
}
