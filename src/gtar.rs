use std::borrow::Cow;
use std::path::{Path, PathBuf};

use log::{debug, error, info};

use gcore::buf::SharedBuffer;
use gcore::endian::{self, Element};
use gcore::mode::{CompressMode, OpenMode};
use gcore::record::Record;
use gstore::{open_archive, Archive, ArchiveError, BackendKind};

use crate::bulk::BulkWriter;
use crate::config::Config;
use crate::index::RecordIndex;

/// Anything that names an entry: a path string or a [`Record`]
pub trait ArchivePath {
    fn archive_path(&self) -> Cow<'_, str>;
}

impl ArchivePath for str {
    fn archive_path(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

impl ArchivePath for String {
    fn archive_path(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.as_str())
    }
}

impl ArchivePath for Record {
    fn archive_path(&self) -> Cow<'_, str> {
        Cow::Owned(self.path())
    }
}

/// Accessor for a trajectory archive.
///
/// Picks the storage backend from the file name (or the configuration),
/// keeps an index of every record type and its frames, and offers typed
/// reads and writes on top of the raw byte interface.
///
/// ```no_run
/// use getar::{GTAR, OpenMode, Record};
///
/// let mut traj = GTAR::open("traj.zip", OpenMode::Write)?;
/// traj.write_individual("frames/0/position.f32.ind", &[0.0f32, 1.0, 2.0])?;
/// traj.close()?;
///
/// let mut traj = GTAR::open("traj.zip", OpenMode::Read)?;
/// for record in traj.record_types()? {
///     for frame in traj.query_frames(&record)? {
///         let data = traj.get_record(&record, &frame)?;
///         println!("{} {} bytes", record.at_index(&frame), data.len());
///     }
/// }
/// # Ok::<(), getar::ArchiveError>(())
/// ```
pub struct GTAR {
    path: PathBuf,
    mode: OpenMode,
    archive: Option<Box<dyn Archive>>,
    index: RecordIndex,
    compress: CompressMode,
}

impl GTAR {
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self, ArchiveError> {
        GTAR::open_with(path, mode, &Config::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, mode: OpenMode, config: &Config) -> Result<Self, ArchiveError> {
        let path = path.as_ref();
        let kind = config.backend.unwrap_or_else(|| BackendKind::detect(path));

        let mode = match mode {
            OpenMode::Append if !path.exists() => {
                info!("{} does not exist, opening for write instead of append", path.display());
                OpenMode::Write
            }
            m => m,
        };

        let archive = open_archive(kind, path, mode, &config.chunking)?;

        // Replay whatever is already stored, whatever the mode
        let mut index = RecordIndex::new();
        for name in archive.item_names()? {
            index.insert_path(&name);
        }
        debug!("{}: {} record types", path.display(), index.len());

        Ok(GTAR {
            path: path.to_path_buf(),
            mode,
            archive: Some(archive),
            index,
            compress: config.compress,
        })
    }

    fn archive(&mut self) -> Result<&mut dyn Archive, ArchiveError> {
        match self.archive.as_mut() {
            Some(archive) => Ok(archive.as_mut()),
            None => Err(ArchiveError::Closed),
        }
    }

    fn check_open(&self) -> Result<(), ArchiveError> {
        match self.archive {
            Some(_) => Ok(()),
            None => Err(ArchiveError::Closed),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mode the backend was opened in, after any Append to Write fallback
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Close the backend. Safe to call more than once.
    pub fn close(&mut self) -> Result<(), ArchiveError> {
        match self.archive.take() {
            None => Ok(()),
            Some(mut archive) => {
                info!("closing {}", self.path.display());
                archive.close()
            }
        }
    }

    // The index only learns about a path once the backend accepted it
    pub(crate) fn write_entry(
        &mut self,
        path: &str,
        contents: &[u8],
        compress: CompressMode,
        immediate: bool,
    ) -> Result<(), ArchiveError> {
        self.archive()?.write(path, contents, compress, immediate)?;
        self.index.insert_path(path);
        Ok(())
    }

    pub(crate) fn begin_bulk_writes(&mut self) -> Result<(), ArchiveError> {
        self.archive()?.begin_bulk_writes()
    }

    pub(crate) fn end_bulk_writes(&mut self) -> Result<(), ArchiveError> {
        self.archive()?.end_bulk_writes()
    }

    pub(crate) fn default_compress(&self) -> CompressMode {
        self.compress
    }

    pub fn write<P: ArchivePath + ?Sized>(
        &mut self,
        path: &P,
        contents: &[u8],
        compress: CompressMode,
    ) -> Result<(), ArchiveError> {
        self.write_entry(&path.archive_path(), contents, compress, true)
    }

    pub fn write_string<P: ArchivePath + ?Sized>(&mut self, path: &P, contents: &str) -> Result<(), ArchiveError> {
        self.write(path, contents.as_bytes(), self.compress)
    }

    pub fn write_bytes<P: ArchivePath + ?Sized>(&mut self, path: &P, contents: &[u8]) -> Result<(), ArchiveError> {
        self.write(path, contents, self.compress)
    }

    /// Write `values` little-endian as an individual property
    pub fn write_individual<P: ArchivePath + ?Sized, T: Element>(
        &mut self,
        path: &P,
        values: &[T],
    ) -> Result<(), ArchiveError> {
        self.write(path, &endian::encode(values), self.compress)
    }

    /// Write `value` little-endian as a uniform property
    pub fn write_uniform<P: ArchivePath + ?Sized, T: Element>(&mut self, path: &P, value: T) -> Result<(), ArchiveError> {
        self.write(path, &endian::encode_uniform(value), self.compress)
    }

    /// Write at the location `record` describes, index included
    pub fn write_record(&mut self, record: &Record, contents: &[u8], compress: CompressMode) -> Result<(), ArchiveError> {
        self.write(record, contents, compress)
    }

    /// Stored bytes, empty when nothing is stored at `path`
    pub fn read<P: ArchivePath + ?Sized>(&mut self, path: &P) -> Result<SharedBuffer, ArchiveError> {
        let path = path.archive_path();
        self.archive()?.read(&path)
    }

    /// Stored bytes as an owned vector
    pub fn read_bytes<P: ArchivePath + ?Sized>(&mut self, path: &P) -> Result<Vec<u8>, ArchiveError> {
        Ok(self.read(path)?.into_vec())
    }

    /// Read the frame `index` of the type of `record`
    pub fn get_record(&mut self, record: &Record, index: &str) -> Result<SharedBuffer, ArchiveError> {
        self.read(&record.at_index(index))
    }

    pub fn read_individual<P: ArchivePath + ?Sized, T: Element>(&mut self, path: &P) -> Result<Vec<T>, ArchiveError> {
        Ok(endian::decode(&self.read(path)?)?)
    }

    /// `None` when nothing is stored at `path`
    pub fn read_uniform<P: ArchivePath + ?Sized, T: Element>(&mut self, path: &P) -> Result<Option<T>, ArchiveError> {
        Ok(endian::decode_uniform(&self.read(path)?)?)
    }

    /// Every record type in the archive, all with empty indices
    pub fn record_types(&self) -> Result<Vec<Record>, ArchiveError> {
        self.check_open()?;
        Ok(self.index.record_types())
    }

    /// Frames stored for the type of `record`, shortest index first
    pub fn query_frames(&self, record: &Record) -> Result<Vec<String>, ArchiveError> {
        self.check_open()?;
        Ok(self.index.query_frames(record))
    }

    /// Frames stored for the type of `record`, in the order they were written
    pub fn query_written_frames(&self, record: &Record) -> Result<Vec<String>, ArchiveError> {
        self.check_open()?;
        Ok(self.index.query_written_frames(record))
    }

    /// The `n`th frame written for the type of `record`
    pub fn nth_frame(&self, record: &Record, n: usize) -> Result<Option<String>, ArchiveError> {
        self.check_open()?;
        Ok(self.index.nth_frame(record, n).map(str::to_string))
    }

    pub fn size(&self) -> Result<usize, ArchiveError> {
        match self.archive.as_ref() {
            Some(archive) => archive.size(),
            None => Err(ArchiveError::Closed),
        }
    }

    pub fn item_names(&self) -> Result<Vec<String>, ArchiveError> {
        match self.archive.as_ref() {
            Some(archive) => archive.item_names(),
            None => Err(ArchiveError::Closed),
        }
    }

    /// Batch writes until the returned writer is finished or dropped
    pub fn bulk_writer(&mut self) -> Result<BulkWriter<'_>, ArchiveError> {
        BulkWriter::new(self)
    }

    /// Copy every frame of every record type into `dest`, returning the
    /// number of entries copied. Copying into a fresh zip archive is how a
    /// zip32 file becomes appendable.
    pub fn copy_into(&mut self, dest: &mut GTAR, compress: CompressMode) -> Result<usize, ArchiveError> {
        let mut copied = 0;
        let mut writer = dest.bulk_writer()?;

        for record in self.record_types()? {
            for frame in self.query_frames(&record)? {
                let data = self.get_record(&record, &frame)?;
                writer.write_record(&record.at_index(&frame), &data, compress)?;
                copied += 1;
            }
        }

        writer.finish()?;
        info!("copied {} entries from {}", copied, self.path.display());
        Ok(copied)
    }
}

impl Drop for GTAR {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("closing {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod test_gtar {
    use super::*;
    use gcore::record::{Behavior, Format, Resolution};

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn backends() -> Vec<&'static str> {
        let mut names = vec!["traj.tar", "traj_dir/"];
        if cfg!(feature = "sql") {
            names.push("traj.sqlite");
        }
        if cfg!(feature = "zip") {
            names.push("traj.zip");
        }
        names
    }

    fn fill(traj: &mut GTAR) {
        for frame in ["100", "2", "10"] {
            traj.write_individual(&format!("frames/{}/position.f32.ind", frame), &[1.0f32, 2.0, 3.0])
                .unwrap();
        }
        traj.write_uniform("box.f64.uni", 10.5f64).unwrap();
        traj.write_string("vars/stdout/0.txt", "hello").unwrap();
        traj.write_string("rigid_body/frames/0/angular_momentum.f64.ind", "").unwrap();
    }

    #[test]
    fn index_after_writes() {
        init();
        for name in backends() {
            let dir = tempfile::tempdir().unwrap();
            let mut traj = GTAR::open(dir.path().join(name), OpenMode::Write).unwrap();
            fill(&mut traj);

            let position = Record::parse("frames/0/position.f32.ind");
            assert_eq!(traj.query_frames(&position).unwrap(), vec!["2", "10", "100"], "{}", name);
            assert_eq!(traj.query_written_frames(&position).unwrap(), vec!["100", "2", "10"]);
            assert_eq!(traj.nth_frame(&position, 0).unwrap(), Some("100".to_string()));
            assert_eq!(traj.record_types().unwrap().len(), 4);
        }
    }

    #[test]
    fn reopen_is_idempotent() {
        init();
        for name in backends() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join(name);

            let mut traj = GTAR::open(&path, OpenMode::Write).unwrap();
            fill(&mut traj);
            traj.close().unwrap();

            let first = GTAR::open(&path, OpenMode::Read).unwrap();
            let second = GTAR::open(&path, OpenMode::Read).unwrap();

            let types = first.record_types().unwrap();
            assert_eq!(types, second.record_types().unwrap(), "{}", name);
            assert_eq!(types.len(), 4);
            for record in types.iter() {
                assert_eq!(first.query_frames(record).unwrap(), second.query_frames(record).unwrap());
            }
        }
    }

    #[test]
    fn typed_round_trip() {
        init();
        for name in backends() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join(name);

            let mut traj = GTAR::open(&path, OpenMode::Write).unwrap();
            fill(&mut traj);
            traj.close().unwrap();

            let mut traj = GTAR::open(&path, OpenMode::Read).unwrap();
            assert_eq!(
                traj.read_individual::<_, f32>("frames/10/position.f32.ind").unwrap(),
                vec![1.0, 2.0, 3.0],
                "{}",
                name
            );
            assert_eq!(traj.read_uniform::<_, f64>("box.f64.uni").unwrap(), Some(10.5));
            assert_eq!(traj.read_uniform::<_, f64>("nothing.f64.uni").unwrap(), None);
            assert_eq!(traj.read_bytes("vars/stdout/0.txt").unwrap(), b"hello");
            assert!(traj.read("rigid_body/frames/0/angular_momentum.f64.ind").unwrap().is_empty());
            assert!(traj.read("nonexistent").unwrap().is_empty());
            assert!(matches!(
                traj.read_individual::<_, u64>("vars/stdout/0.txt"),
                Err(ArchiveError::Codec(_))
            ));
        }
    }

    #[test]
    fn record_addressing() {
        init();
        let dir = tempfile::tempdir().unwrap();
        let mut traj = GTAR::open(dir.path().join("rec.tar"), OpenMode::Write).unwrap();

        let record = Record::new("", "velocity", "5", Behavior::Discrete, Format::Int32, Resolution::Individual);
        traj.write_record(&record, &endian::encode(&[1i32, -1]), CompressMode::NoCompress)
            .unwrap();
        traj.close().unwrap();

        let mut traj = GTAR::open(dir.path().join("rec.tar"), OpenMode::Read).unwrap();
        assert_eq!(traj.item_names().unwrap(), vec!["frames/5/velocity.i32.ind"]);

        let found = traj.record_types().unwrap();
        assert_eq!(found, vec![record.with_nullified_index()]);
        assert_eq!(traj.read_individual::<_, i32>(&record).unwrap(), vec![1, -1]);
        assert_eq!(traj.get_record(&found[0], "5").unwrap().len(), 8);
    }

    #[test]
    fn append_sessions() {
        init();
        for name in backends() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join(name);

            // Append on a missing archive writes a new one
            let mut traj = GTAR::open(&path, OpenMode::Append).unwrap();
            assert_eq!(traj.mode(), OpenMode::Write);
            for i in 0..4 {
                traj.write_uniform(&format!("frames/{}/N.u32.uni", i), i as u32).unwrap();
            }
            traj.close().unwrap();

            let mut traj = GTAR::open(&path, OpenMode::Append).unwrap();
            assert_eq!(traj.mode(), OpenMode::Append);
            let n = Record::parse("frames/0/N.u32.uni");
            assert_eq!(traj.query_frames(&n).unwrap().len(), 4, "{}", name);
            for i in 4..7 {
                traj.write_uniform(&format!("frames/{}/N.u32.uni", i), i as u32).unwrap();
            }
            assert_eq!(traj.query_frames(&n).unwrap().len(), 7);
            traj.close().unwrap();

            let mut traj = GTAR::open(&path, OpenMode::Read).unwrap();
            assert_eq!(traj.size().unwrap(), 7);
            for i in 0..7u32 {
                assert_eq!(traj.read_uniform::<_, u32>(&format!("frames/{}/N.u32.uni", i)).unwrap(), Some(i));
            }
        }
    }

    #[test]
    fn failed_write_leaves_index_alone() {
        init();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ro.tar");

        let mut traj = GTAR::open(&path, OpenMode::Write).unwrap();
        traj.write_string("a.txt", "a").unwrap();
        let long = format!("frames/1/{}.txt", "x".repeat(300));
        assert!(matches!(traj.write_string(&long, "b"), Err(ArchiveError::InvalidPath(_))));
        assert_eq!(traj.record_types().unwrap().len(), 1);
        traj.close().unwrap();

        let mut traj = GTAR::open(&path, OpenMode::Read).unwrap();
        assert!(matches!(traj.write_string("b.txt", "b"), Err(ArchiveError::InvalidMode(_))));
        assert_eq!(traj.record_types().unwrap().len(), 1);
    }

    #[test]
    fn closed_accessor() {
        init();
        let dir = tempfile::tempdir().unwrap();
        let mut traj = GTAR::open(dir.path().join("closed.tar"), OpenMode::Write).unwrap();
        traj.write_string("a.txt", "a").unwrap();
        traj.close().unwrap();
        traj.close().unwrap();

        assert!(matches!(traj.write_string("b.txt", "b"), Err(ArchiveError::Closed)));
        assert!(matches!(traj.read("a.txt"), Err(ArchiveError::Closed)));
        assert!(matches!(traj.record_types(), Err(ArchiveError::Closed)));
        assert!(matches!(traj.query_frames(&Record::parse("a.txt")), Err(ArchiveError::Closed)));
        assert!(matches!(traj.size(), Err(ArchiveError::Closed)));
        assert!(traj.bulk_writer().is_err());
    }

    #[test]
    fn accessors_are_isolated() {
        init();
        let dir = tempfile::tempdir().unwrap();
        let mut a = GTAR::open(dir.path().join("a.tar"), OpenMode::Write).unwrap();
        let mut b = GTAR::open(dir.path().join("b.tar"), OpenMode::Write).unwrap();

        a.write_string("frames/1/x.txt", "x").unwrap();
        a.write_string("frames/2/x.txt", "x").unwrap();

        assert_eq!(a.record_types().unwrap().len(), 1);
        assert!(b.record_types().unwrap().is_empty());

        b.write_string("y.txt", "y").unwrap();
        assert_eq!(a.record_types().unwrap(), vec![Record::parse("frames/0/x.txt").with_nullified_index()]);
        assert_eq!(b.record_types().unwrap(), vec![Record::parse("y.txt")]);
    }

    #[test]
    fn backend_override() {
        init();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traj.dat");
        let config = Config::from_toml_str("backend = \"tar\"").unwrap();

        let mut traj = GTAR::open_with(&path, OpenMode::Write, &config).unwrap();
        traj.write_string("a.txt", "a").unwrap();
        traj.close().unwrap();

        assert_eq!(&std::fs::read(&path).unwrap()[257..262], b"ustar");
    }

    #[test]
    fn hdf5_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            GTAR::open(dir.path().join("traj.h5"), OpenMode::Write),
            Err(ArchiveError::Unsupported(_))
        ));
    }

    #[test]
    fn copy_between_backends() {
        init();
        let dir = tempfile::tempdir().unwrap();
        let names = backends();

        let mut source = GTAR::open(dir.path().join("source.tar"), OpenMode::Write).unwrap();
        fill(&mut source);
        source.close().unwrap();

        for name in names {
            let mut source = GTAR::open(dir.path().join("source.tar"), OpenMode::Read).unwrap();
            let path = dir.path().join(format!("copy_{}", name));
            let mut dest = GTAR::open(&path, OpenMode::Write).unwrap();

            assert_eq!(source.copy_into(&mut dest, CompressMode::SlowCompress).unwrap(), 6);
            dest.close().unwrap();

            let mut dest = GTAR::open(&path, OpenMode::Read).unwrap();
            assert_eq!(dest.record_types().unwrap(), source.record_types().unwrap(), "{}", name);
            assert_eq!(dest.read_bytes("vars/stdout/0.txt").unwrap(), b"hello");
        }
    }
}
