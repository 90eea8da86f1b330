use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use ignore::WalkBuilder;
use log::{debug, info, warn};

use gcore::buf::SharedBuffer;
use gcore::mode::{CompressMode, OpenMode};

use crate::{nth_name, refuse_write, Archive, ArchiveError};

/// Archive stored as plain files under a directory
pub struct DirectoryBackend {
    root: PathBuf,
    mode: OpenMode,
    names: Vec<String>,
    known: HashSet<String>,
    closed: bool,
}

impl DirectoryBackend {
    pub fn open(root: &Path, mode: OpenMode) -> Result<Self, ArchiveError> {
        if root.exists() && !root.is_dir() {
            return Err(ArchiveError::InvalidPath(format!("{} is not a directory", root.display())));
        }

        let mut backend = DirectoryBackend {
            root: root.to_path_buf(),
            mode,
            names: Vec::new(),
            known: HashSet::new(),
            closed: false,
        };

        match mode {
            OpenMode::Read => backend.scan()?,
            OpenMode::Append if root.exists() => backend.scan()?,
            // Existing files are left alone, they just aren't enumerated
            _ => fs::create_dir_all(root)?,
        }

        info!("{}: {} files", root.display(), backend.names.len());
        Ok(backend)
    }

    fn scan(&mut self) -> Result<(), ArchiveError> {
        if !self.root.is_dir() {
            return Err(ArchiveError::InvalidPath(format!("{} is not a directory", self.root.display())));
        }

        let walker = WalkBuilder::new(&self.root)
            .standard_filters(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        for entry in walker {
            match entry {
                Ok(e) => {
                    if !e.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                        continue;
                    }

                    let rel = match e.path().strip_prefix(&self.root) {
                        Ok(rel) => rel,
                        Err(_) => continue,
                    };
                    let name = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");

                    debug!("found {}", name);
                    if self.known.insert(name.clone()) {
                        self.names.push(name);
                    }
                }
                Err(e) => warn!("skipping: {}", e),
            }
        }
        Ok(())
    }

    // Map an archive path onto the filesystem, refusing anything that would
    // land outside of the root
    fn target(&self, path: &str) -> Result<PathBuf, ArchiveError> {
        let rel = Path::new(path.trim_start_matches('/'));

        if rel.as_os_str().is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(ArchiveError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(rel))
    }

    fn check_open(&self) -> Result<(), ArchiveError> {
        if self.closed {
            Err(ArchiveError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Archive for DirectoryBackend {
    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn write(&mut self, path: &str, contents: &[u8], _compress: CompressMode, _immediate: bool) -> Result<(), ArchiveError> {
        self.check_open()?;
        refuse_write(self.mode)?;

        let target = self.target(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, contents)?;

        let name = path.trim_start_matches('/').to_string();
        if self.known.insert(name.clone()) {
            self.names.push(name);
        }
        Ok(())
    }

    fn read(&mut self, path: &str) -> Result<SharedBuffer, ArchiveError> {
        self.check_open()?;

        let target = match self.target(path) {
            Ok(target) => target,
            Err(_) => return Ok(SharedBuffer::empty()),
        };

        match fs::read(&target) {
            Ok(data) => Ok(SharedBuffer::new(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SharedBuffer::empty()),
            Err(e) => Err(e.into()),
        }
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
        self.check_open()
    }

    fn close(&mut self) -> Result<(), ArchiveError> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod test_directory_backend {
    use super::*;
    use crate::testing;

    fn opener(dir: &tempfile::TempDir) -> impl Fn(OpenMode) -> Box<dyn Archive> {
        let path = dir.path().join("archive");
        move |mode| Box::new(DirectoryBackend::open(&path, mode).unwrap())
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        testing::write_then_read(opener(&dir), 4096, true);
    }

    #[test]
    fn missing_key() {
        let dir = tempfile::tempdir().unwrap();
        testing::missing_key(opener(&dir));
    }

    #[test]
    fn append() {
        let dir = tempfile::tempdir().unwrap();
        testing::append(opener(&dir));
    }

    #[test]
    fn bulk() {
        let dir = tempfile::tempdir().unwrap();
        testing::bulk(opener(&dir));
    }

    #[test]
    fn closed() {
        let dir = tempfile::tempdir().unwrap();
        testing::closed(opener(&dir));
    }

    #[test]
    fn enumeration() {
        let dir = tempfile::tempdir().unwrap();
        testing::enumeration(opener(&dir));
    }

    #[test]
    fn nested_layout() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested");

        let mut archive = DirectoryBackend::open(&root, OpenMode::Write).unwrap();
        archive.write("/rigid_body/frames/0/com.f32.ind", b"abcd", CompressMode::NoCompress, true).unwrap();
        archive.write("top.txt", b"t", CompressMode::NoCompress, true).unwrap();
        archive.close().unwrap();

        assert_eq!(std::fs::read(root.join("rigid_body/frames/0/com.f32.ind")).unwrap(), b"abcd");

        let mut archive = DirectoryBackend::open(&root, OpenMode::Read).unwrap();
        assert_eq!(
            archive.item_names().unwrap(),
            vec!["rigid_body/frames/0/com.f32.ind", "top.txt"]
        );
        assert_eq!(archive.read("rigid_body/frames/0/com.f32.ind").unwrap().as_slice(), b"abcd");
    }

    #[test]
    fn escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = DirectoryBackend::open(&dir.path().join("esc"), OpenMode::Write).unwrap();

        for path in ["../outside", "a/../../b", ""] {
            assert!(matches!(
                archive.write(path, b"x", CompressMode::NoCompress, true),
                Err(ArchiveError::InvalidPath(_))
            ));
        }
        assert!(archive.read("../outside").unwrap().is_empty());
        assert!(!dir.path().join("outside").exists());
    }

    #[test]
    fn file_is_not_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"x").unwrap();

        assert!(matches!(
            DirectoryBackend::open(&path, OpenMode::Write),
            Err(ArchiveError::InvalidPath(_))
        ));
    }
}
