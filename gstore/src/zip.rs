use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use gcore::buf::SharedBuffer;
use gcore::mode::{CompressMode, OpenMode};

use crate::{nth_name, refuse_write, Archive, ArchiveError};

const EOCD_SIG: u32 = 0x0605_4b50;
const EOCD_LEN: usize = 22;
const ZIP64_LOCATOR_SIG: u32 = 0x0706_4b50;
const ZIP64_LOCATOR_LEN: usize = 20;
const CENTRAL_SIG: u32 = 0x0201_4b50;
const CENTRAL_LEN: usize = 46;
const ZIP64_EXTRA_ID: u16 = 0x0001;
const MAX_COMMENT: usize = 0xffff;

/// Archive stored as a zip file. Every entry is written with zip64 headers
/// so a later session can append to it.
pub struct ZipBackend {
    path: PathBuf,
    mode: OpenMode,
    reader: Option<ZipArchive<File>>,
    writer: Option<ZipWriter<File>>,
    names: Vec<String>,
    known: HashSet<String>,
    closed: bool,
}

impl ZipBackend {
    pub fn open(path: &Path, mode: OpenMode) -> Result<Self, ArchiveError> {
        let mode = match mode {
            OpenMode::Append if !path.exists() => OpenMode::Write,
            m => m,
        };

        let mut backend = ZipBackend {
            path: path.to_path_buf(),
            mode,
            reader: None,
            writer: None,
            names: Vec::new(),
            known: HashSet::new(),
            closed: false,
        };

        match mode {
            OpenMode::Write => backend.writer = Some(ZipWriter::new(File::create(path)?)),
            OpenMode::Read => backend.load(File::open(path)?)?,
            OpenMode::Append => {
                if !is_zip64(path)? {
                    return Err(ArchiveError::InvalidMode(format!(
                        "{} is not a zip64 archive, only zip64 archives can be appended to; \
                         copy it into a new archive first",
                        path.display()
                    )));
                }
                backend.load(File::open(path)?)?;
                let file = OpenOptions::new().read(true).write(true).open(path)?;
                backend.writer = Some(ZipWriter::new_append(file)?);
            }
        }

        info!("{}: {} zip entries", path.display(), backend.names.len());
        Ok(backend)
    }

    fn load(&mut self, file: File) -> Result<(), ArchiveError> {
        let mut reader = ZipArchive::new(file)?;

        for i in 0..reader.len() {
            let name = reader.by_index_raw(i)?.name().to_string();
            if self.known.insert(name.clone()) {
                self.names.push(name);
            }
        }
        self.reader = Some(reader);
        Ok(())
    }

    fn check_open(&self) -> Result<(), ArchiveError> {
        if self.closed {
            Err(ArchiveError::Closed)
        } else {
            Ok(())
        }
    }
}

fn options(compress: CompressMode) -> SimpleFileOptions {
    let options = SimpleFileOptions::default().large_file(true);

    match compress {
        CompressMode::NoCompress => options.compression_method(CompressionMethod::Stored),
        CompressMode::FastCompress => options
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(1)),
        CompressMode::MediumCompress => options
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(6)),
        CompressMode::SlowCompress => options
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(9)),
    }
}

impl Archive for ZipBackend {
    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn write(&mut self, path: &str, contents: &[u8], compress: CompressMode, immediate: bool) -> Result<(), ArchiveError> {
        self.check_open()?;
        refuse_write(self.mode)?;

        let writer = match self.writer.as_mut() {
            Some(writer) => writer,
            None => return Err(ArchiveError::Closed),
        };
        writer.start_file(path, options(compress))?;
        writer.write_all(contents)?;
        if immediate {
            writer.flush()?;
        }

        if self.known.insert(path.to_string()) {
            self.names.push(path.to_string());
        }
        Ok(())
    }

    fn read(&mut self, path: &str) -> Result<SharedBuffer, ArchiveError> {
        self.check_open()?;

        if self.mode == OpenMode::Write {
            return Err(ArchiveError::InvalidMode(
                "can't read from a zip archive opened for writing".to_string(),
            ));
        }
        // The reader only knows the entries that existed at open, anything
        // appended since reads as missing until the archive is reopened
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Ok(SharedBuffer::empty()),
        };

        let mut entry = match reader.by_name(path) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(SharedBuffer::empty()),
            Err(e) => return Err(e.into()),
        };

        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        Ok(SharedBuffer::new(data))
    }

    fn size(&self) -> Result<usize, ArchiveError> {
        self.check_open()?;
        Ok(self.names.len())
    }

    fn item_name(&self, index: usize) -> Result<&str, ArchiveError> {
        self.check_open()?;
        nth_name(&self.names, index)
    }

    fn begin_bulk_writes(&mut self) -> Result<(), ArchiveError> {
        self.check_open()
    }

    fn end_bulk_writes(&mut self) -> Result<(), ArchiveError> {
        self.check_open()?;
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), ArchiveError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.reader = None;

        if let Some(writer) = self.writer.take() {
            writer.finish()?;
            debug!("finished {}", self.path.display());
        }
        Ok(())
    }
}

impl Drop for ZipBackend {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("closing {}: {}", self.path.display(), e);
        }
    }
}

fn u16_at(buf: &[u8], pos: usize) -> Option<u16> {
    buf.get(pos..pos + 2).map(LittleEndian::read_u16)
}

fn u32_at(buf: &[u8], pos: usize) -> Option<u32> {
    buf.get(pos..pos + 4).map(LittleEndian::read_u32)
}

fn corrupt(path: &Path, what: &str) -> ArchiveError {
    ArchiveError::Corrupt(format!("{}: {}", path.display(), what))
}

/// Whether the zip file at `path` uses 64 bit offsets: it has a zip64 end of
/// central directory locator, or its central directory entries carry zip64
/// extra fields. An archive without entries counts as zip64.
pub fn is_zip64(path: &Path) -> Result<bool, ArchiveError> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len() as usize;

    let tail_len = len.min(EOCD_LEN + MAX_COMMENT + ZIP64_LOCATOR_LEN);
    let tail_start = len - tail_len;
    let mut tail = vec![0u8; tail_len];
    file.seek(SeekFrom::Start(tail_start as u64))?;
    file.read_exact(&mut tail)?;

    let eocd = (0..tail_len.saturating_sub(EOCD_LEN - 1))
        .rev()
        .find(|&pos| u32_at(&tail, pos) == Some(EOCD_SIG))
        .ok_or_else(|| corrupt(path, "no end of central directory record"))?;

    if eocd >= ZIP64_LOCATOR_LEN && u32_at(&tail, eocd - ZIP64_LOCATOR_LEN) == Some(ZIP64_LOCATOR_SIG) {
        return Ok(true);
    }

    let entries = u16_at(&tail, eocd + 10).ok_or_else(|| corrupt(path, "short end record"))?;
    let cd_size = u32_at(&tail, eocd + 12).ok_or_else(|| corrupt(path, "short end record"))?;
    let cd_offset = u32_at(&tail, eocd + 16).ok_or_else(|| corrupt(path, "short end record"))?;

    if entries == 0xffff || cd_size == 0xffff_ffff || cd_offset == 0xffff_ffff {
        return Ok(true);
    }
    if entries == 0 {
        return Ok(true);
    }

    if cd_offset as usize + cd_size as usize > len {
        return Err(corrupt(path, "central directory out of bounds"));
    }
    let mut central = vec![0u8; cd_size as usize];
    file.seek(SeekFrom::Start(cd_offset as u64))?;
    file.read_exact(&mut central)?;

    let mut pos = 0;
    while u32_at(&central, pos) == Some(CENTRAL_SIG) {
        let short = || corrupt(path, "short central directory entry");
        let name_len = u16_at(&central, pos + 28).ok_or_else(short)? as usize;
        let extra_len = u16_at(&central, pos + 30).ok_or_else(short)? as usize;
        let comment_len = u16_at(&central, pos + 32).ok_or_else(short)? as usize;

        let extra_start = pos + CENTRAL_LEN + name_len;
        let extra = central
            .get(extra_start..extra_start + extra_len)
            .ok_or_else(short)?;

        let mut field = 0;
        while let (Some(id), Some(size)) = (u16_at(extra, field), u16_at(extra, field + 2)) {
            if id == ZIP64_EXTRA_ID {
                return Ok(true);
            }
            field += 4 + size as usize;
        }

        pos = extra_start + extra_len + comment_len;
    }

    Ok(false)
}
