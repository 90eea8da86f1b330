use std::ops::Range;

use crate::tar::{TarError, BLOCK_SIZE};

const NAME: Range<usize> = 0..100;
const MODE: Range<usize> = 100..108;
const UID: Range<usize> = 108..116;
const GID: Range<usize> = 116..124;
const SIZE: Range<usize> = 124..136;
const MTIME: Range<usize> = 136..148;
const CHKSUM: Range<usize> = 148..156;
const TYPEFLAG: usize = 156;
const MAGIC: Range<usize> = 257..263;
const VERSION: Range<usize> = 263..265;
const PREFIX: Range<usize> = 345..500;

const NAME_MAX: usize = 100;
const PREFIX_MAX: usize = 154;

pub type Block = [u8; BLOCK_SIZE];

/// The parts of a header the archive cares about
#[derive(Debug, PartialEq, Eq)]
pub struct Header {
    pub path: String,
    pub size: u64,
}

/// Build the header block for a regular file entry
pub fn encode(path: &str, size: u64, mtime: u64) -> Result<Block, TarError> {
    let bytes = path.as_bytes();
    let (prefix, name) = if bytes.len() < NAME_MAX {
        (&bytes[..0], bytes)
    } else {
        bytes.split_at(bytes.len() - NAME_MAX)
    };

    if prefix.len() > PREFIX_MAX {
        return Err(TarError::NameTooLong(bytes.len()));
    }

    let mut block = [0u8; BLOCK_SIZE];

    block[NAME][..name.len()].copy_from_slice(name);
    block[PREFIX][..prefix.len()].copy_from_slice(prefix);

    block[MODE].copy_from_slice(b"0000644\0");
    block[UID].copy_from_slice(b"0000000\0");
    block[GID].copy_from_slice(b"0000000\0");
    put_octal(&mut block[SIZE], size).ok_or(TarError::SizeOverflow(size))?;
    // An mtime past 2242 just saturates
    if put_octal(&mut block[MTIME], mtime).is_none() {
        block[MTIME].copy_from_slice(b"77777777777\0");
    }

    block[TYPEFLAG] = b'0';
    block[MAGIC].copy_from_slice(b"ustar\0");
    block[VERSION].copy_from_slice(b"00");

    let sum = checksum(&block);
    let encoded = format!("{:06o}", sum);
    block[CHKSUM][..6].copy_from_slice(&encoded.as_bytes()[encoded.len() - 6..]);
    block[CHKSUM][6] = 0;
    block[CHKSUM][7] = b' ';

    Ok(block)
}

/// Sum of every header byte, counting the checksum field as spaces
pub fn checksum(block: &Block) -> u32 {
    block
        .iter()
        .enumerate()
        .map(|(i, b)| if CHKSUM.contains(&i) { b' ' as u32 } else { *b as u32 })
        .sum()
}

// Some historic writers summed signed chars
fn signed_checksum(block: &Block) -> i64 {
    block
        .iter()
        .enumerate()
        .map(|(i, b)| if CHKSUM.contains(&i) { b' ' as i64 } else { *b as i8 as i64 })
        .sum()
}

/// Decode the header at `offset`. `Ok(None)` marks the end of the archive.
pub fn decode(block: &Block, offset: u64) -> Result<Option<Header>, TarError> {
    if block.iter().all(|b| *b == 0) {
        return Ok(None);
    }

    if &block[MAGIC][..5] != b"ustar" {
        return Err(TarError::Magic(offset));
    }

    let stored = parse_octal(&block[CHKSUM]).ok_or(TarError::BadOctal(offset))?;
    let computed = checksum(block);
    if stored != computed as u64 && stored as i64 != signed_checksum(block) {
        return Err(TarError::Checksum {
            offset,
            stored: stored as u32,
            computed,
        });
    }

    let size = parse_octal(&block[SIZE]).ok_or(TarError::BadOctal(offset))?;

    let mut path = String::from_utf8_lossy(until_nul(&block[PREFIX])).into_owned();
    path.push_str(&String::from_utf8_lossy(until_nul(&block[NAME])));

    Ok(Some(Header { path, size }))
}

fn until_nul(field: &[u8]) -> &[u8] {
    match field.iter().position(|b| *b == 0) {
        Some(end) => &field[..end],
        None => field,
    }
}

// Zero padded octal filling all but the last byte, which stays NUL
fn put_octal(field: &mut [u8], value: u64) -> Option<()> {
    let digits = field.len() - 1;
    let text = format!("{:0width$o}", value, width = digits);

    if text.len() > digits {
        return None;
    }
    field[..digits].copy_from_slice(text.as_bytes());
    field[digits] = 0;
    Some(())
}

fn parse_octal(field: &[u8]) -> Option<u64> {
    let digits: Vec<u8> = field
        .iter()
        .copied()
        .skip_while(|b| *b == b' ')
        .take_while(|b| *b != 0 && *b != b' ')
        .collect();

    if digits.is_empty() {
        return None;
    }

    digits.iter().try_fold(0u64, |acc, b| match b {
        b'0'..=b'7' => acc.checked_mul(8)?.checked_add((b - b'0') as u64),
        _ => None,
    })
}
