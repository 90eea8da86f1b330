//! Minimal ustar container
//!
//! Only regular files are ever written or understood. Every entry is a
//! 512 byte header followed by the payload, NUL padded up to the next 512
//! byte boundary. A finished archive ends with two all-zero blocks.
//!
//! # Header
//!
//! All numeric fields are zero padded octal text terminated by a NUL.
//!
//! | Offset | Length | Field    | Content |
//! | -----: | -----: | -------- | ------- |
//! | 0      | 100    | name     | Path, or its last 100 bytes when longer than 99 |
//! | 100    | 8      | mode     | `0000644` |
//! | 108    | 8      | uid      | `0000000` |
//! | 116    | 8      | gid      | `0000000` |
//! | 124    | 12     | size     | Payload length, 11 octal digits |
//! | 136    | 12     | mtime    | Seconds since the epoch, 11 octal digits |
//! | 148    | 8      | chksum   | 6 octal digits, NUL, space |
//! | 156    | 1      | typeflag | `0` |
//! | 257    | 6      | magic    | `ustar\0` |
//! | 263    | 2      | version  | `00` |
//! | 345    | 155    | prefix   | Leading part of a long path, at most 154 bytes |
//!
//! The checksum is the sum of all 512 header bytes, computed while the
//! checksum field holds eight spaces.
//!
//! Long paths are split so that the name field holds the final 100 bytes and
//! the prefix the rest. The two are concatenated as-is when reading, without
//! the `/` that POSIX readers insert, so paths longer than 254 bytes cannot
//! be stored.
//!
//! # Scanning
//!
//! A reader walks headers from offset 0. An all-zero block ends the archive.
//! A header without the `ustar` magic is an error at offset 0 and anywhere
//! else is treated as trailing garbage that ends the scan.
pub mod builder;
pub mod header;
pub mod reader;

use thiserror::Error;

pub const BLOCK_SIZE: usize = 512;

/// Length of the terminator written by [`builder::TarBuilder::finish`]
pub const END_SIZE: usize = 2 * BLOCK_SIZE;

#[derive(Error, Debug)]
pub enum TarError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("can't store path of length {0}")]
    NameTooLong(usize),
    #[error("payload of {0} bytes does not fit the size field")]
    SizeOverflow(u64),
    #[error("magic mismatch at offset {0} (is this actually a tar file?)")]
    Magic(u64),
    #[error("header checksum mismatch at offset {offset}: stored {stored:o}, computed {computed:o}")]
    Checksum { offset: u64, stored: u32, computed: u32 },
    #[error("malformed octal field in header at offset {0}")]
    BadOctal(u64),
}

/// Bytes of NUL padding following a payload of `len` bytes
pub fn padding(len: u64) -> u64 {
    let rem = len % BLOCK_SIZE as u64;
    if rem == 0 {
        0
    } else {
        BLOCK_SIZE as u64 - rem
    }
}

/// Bytes taken by a header and a padded payload of `len` bytes
pub fn entry_size(len: u64) -> u64 {
    BLOCK_SIZE as u64 + len + padding(len)
}
