use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use gcore::record::{index_cmp, Record};

/// Index string ordered shortest first, so `"2" < "10" < "100"`
#[derive(Debug, Clone, PartialEq, Eq)]
struct FrameIndex(String);

impl Ord for FrameIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        index_cmp(&self.0, &other.0)
    }
}

impl PartialOrd for FrameIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Record types seen in an archive and the frames recorded for each.
///
/// Built from the backend enumeration when an archive is opened and extended
/// after every successful write. Nothing is ever removed.
#[derive(Debug, Default)]
pub struct RecordIndex {
    frames: BTreeMap<Record, BTreeSet<FrameIndex>>,
    // Same frames in first-seen order
    written: BTreeMap<Record, Vec<String>>,
}

impl RecordIndex {
    pub fn new() -> Self {
        RecordIndex::default()
    }

    pub fn insert_path(&mut self, path: &str) {
        self.insert(Record::parse(path));
    }

    pub fn insert(&mut self, mut record: Record) {
        let index = record.nullify_index();

        let is_new = self
            .frames
            .entry(record.clone())
            .or_default()
            .insert(FrameIndex(index.clone()));
        if is_new {
            self.written.entry(record).or_default().push(index);
        }
    }

    /// Every record type, with empty indices, in record order
    pub fn record_types(&self) -> Vec<Record> {
        self.frames.keys().cloned().collect()
    }

    /// Frames of the type of `record` in index order. The index of `record`
    /// itself is ignored.
    pub fn query_frames(&self, record: &Record) -> Vec<String> {
        match self.frames.get(&record.with_nullified_index()) {
            Some(set) => set.iter().map(|f| f.0.clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Frames of the type of `record` in the order they were first seen
    pub fn query_written_frames(&self, record: &Record) -> Vec<String> {
        self.written
            .get(&record.with_nullified_index())
            .cloned()
            .unwrap_or_default()
    }

    pub fn nth_frame(&self, record: &Record, n: usize) -> Option<&str> {
        self.written
            .get(&record.with_nullified_index())
            .and_then(|frames| frames.get(n))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
