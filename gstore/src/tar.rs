use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use garc::tar::builder::TarBuilder;
use garc::tar::reader::{read_payload, TarEntry, TarReader};
use garc::tar::END_SIZE;
use gcore::buf::SharedBuffer;
use gcore::mode::{CompressMode, OpenMode};

use crate::{nth_name, refuse_write, Archive, ArchiveError};

enum Handle {
    Reader(File),
    Writer(TarBuilder<BufWriter<File>>),
}

/// Archive stored as an uncompressed ustar file
pub struct TarBackend {
    path: PathBuf,
    mode: OpenMode,
    handle: Option<Handle>,
    names: Vec<String>,
    entries: HashMap<String, TarEntry>,
    // End of the last real entry, new entries go here
    end: u64,
    at_end: bool,
}

impl TarBackend {
    pub fn open(path: &Path, mode: OpenMode) -> Result<Self, ArchiveError> {
        let mode = match mode {
            OpenMode::Append if !path.exists() => OpenMode::Write,
            m => m,
        };

        let mut backend = TarBackend {
            path: path.to_path_buf(),
            mode,
            handle: None,
            names: Vec::new(),
            entries: HashMap::new(),
            end: 0,
            at_end: true,
        };

        let handle = match mode {
            OpenMode::Write => Handle::Writer(TarBuilder::new(BufWriter::new(File::create(path)?))),
            OpenMode::Read => {
                let mut file = File::open(path)?;
                backend.scan(&mut file)?;
                Handle::Reader(file)
            }
            OpenMode::Append => {
                let mut file = OpenOptions::new().read(true).write(true).open(path)?;
                backend.scan(&mut file)?;
                file.seek(SeekFrom::Start(backend.end))?;
                Handle::Writer(TarBuilder::new(BufWriter::new(file)))
            }
        };

        backend.handle = Some(handle);
        Ok(backend)
    }

    // Build the offset index once
    fn scan(&mut self, file: &mut File) -> Result<(), ArchiveError> {
        let mut reader = TarReader::new(file);

        for entry in reader.by_ref() {
            self.insert(entry?);
        }
        self.end = reader.end();

        info!("{}: {} tar entries", self.path.display(), self.names.len());
        Ok(())
    }

    fn insert(&mut self, entry: TarEntry) {
        if !self.entries.contains_key(&entry.path) {
            self.names.push(entry.path.clone());
        }
        self.entries.insert(entry.path.clone(), entry);
    }

    fn append_entry(&mut self, path: &str, contents: &[u8], immediate: bool) -> Result<(), ArchiveError> {
        let end = self.end;
        let at_end = self.at_end;
        let builder = match self.handle()? {
            Handle::Writer(builder) => builder,
            Handle::Reader(_) => return refuse_write(OpenMode::Read),
        };

        if !at_end {
            builder.get_mut().seek(SeekFrom::Start(end))?;
        }
        let written = builder.append(path, contents)?;
        if immediate {
            builder.get_mut().flush()?;
        }

        self.at_end = true;
        self.insert(TarEntry {
            path: path.to_string(),
            offset: end + garc::tar::BLOCK_SIZE as u64,
            size: contents.len() as u64,
        });
        self.end += written;
        Ok(())
    }

    fn handle(&mut self) -> Result<&mut Handle, ArchiveError> {
        self.handle.as_mut().ok_or(ArchiveError::Closed)
    }
}

impl Archive for TarBackend {
    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn write(&mut self, path: &str, contents: &[u8], _compress: CompressMode, immediate: bool) -> Result<(), ArchiveError> {
        let result = self.append_entry(path, contents, immediate);
        if result.is_err() {
            // Part of the entry may be out already, the next write starts over at `end`
            self.at_end = false;
        }
        result
    }

    fn read(&mut self, path: &str) -> Result<SharedBuffer, ArchiveError> {
        let mode = self.mode;
        let entry = self.entries.get(path).cloned();
        let file = match self.handle()? {
            Handle::Reader(file) => file,
            Handle::Writer(_) if mode == OpenMode::Write => {
                return Err(ArchiveError::InvalidMode(
                    "can't read from a tar archive opened for writing".to_string(),
                ))
            }
            Handle::Writer(builder) => {
                builder.get_mut().flush()?;
                builder.get_mut().get_mut()
            }
        };

        let entry = match entry {
            Some(entry) => entry,
            None => return Ok(SharedBuffer::empty()),
        };

        let data = read_payload(file, &entry)?;
        self.at_end = false;
        Ok(SharedBuffer::new(data))
    }

    fn size(&self) -> Result<usize, ArchiveError> {
        self.handle.as_ref().ok_or(ArchiveError::Closed)?;
        Ok(self.names.len())
    }

    fn item_name(&self, index: usize) -> Result<&str, ArchiveError> {
        self.handle.as_ref().ok_or(ArchiveError::Closed)?;
        nth_name(&self.names, index)
    }

    fn begin_bulk_writes(&mut self) -> Result<(), ArchiveError> {
        self.handle()?;
        Ok(())
    }

    fn end_bulk_writes(&mut self) -> Result<(), ArchiveError> {
        if let Handle::Writer(builder) = self.handle()? {
            builder.get_mut().flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), ArchiveError> {
        let mut builder = match self.handle.take() {
            None | Some(Handle::Reader(_)) => return Ok(()),
            Some(Handle::Writer(builder)) => builder,
        };

        builder.get_mut().seek(SeekFrom::Start(self.end))?;
        builder.finish()?;

        // Drop anything an appended-to file had past its terminator
        let file = builder.into_inner().into_inner().map_err(|e| e.into_error())?;
        file.set_len(self.end + END_SIZE as u64)?;

        debug!("closed {} at {} bytes", self.path.display(), self.end);
        Ok(())
    }
}

impl Drop for TarBackend {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("closing {}: {}", self.path.display(), e);
        }
    }
}
