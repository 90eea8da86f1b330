//! Record <-> path codec
//!
//! Every entry in an archive is addressed by a slash delimited path. A
//! [`Record`] is the structured form of that path and the two convert into
//! each other without loss.
//!
//! | Behavior   | Path layout                                      |
//! | ---------- | ------------------------------------------------ |
//! | Constant   | `[group/]name[.fmt.res]`                         |
//! | Discrete   | `[group/]frames/<index>/name[.fmt.res]`          |
//! | Continuous | `[group/]vars/name[.fmt.res]/<index>[suffix]`    |
//!
//! The format tag is one of `f32 f64 i32 i64 u8 u32 u64` and the resolution
//! tag one of `uni ind`. The two tags only count as tags when they appear
//! together as the last two dot separated pieces, and only when at least one
//! piece precedes them. Anything else stays in the name and the record
//! resolution is `Text`. A lone `.ind` is therefore part of the name, not a
//! tag.
//!
//! Leading slashes are ignored when parsing and never produced when
//! serializing.
//!
//! The index segment of a continuous record is split at its first dot: the
//! text before it is the index, the rest is the suffix, kept verbatim.
use std::cmp::Ordering;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

const FRAMES: &str = "frames";
const VARS: &str = "vars";

/// Time behavior of a property
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Behavior {
    #[default]
    Constant,
    Discrete,
    Continuous,
}

/// Binary element type of a property
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Format {
    Float32,
    Float64,
    Int32,
    Int64,
    #[default]
    UInt8,
    UInt32,
    UInt64,
}

impl Format {
    pub fn tag(self) -> &'static str {
        match self {
            Format::Float32 => "f32",
            Format::Float64 => "f64",
            Format::Int32 => "i32",
            Format::Int64 => "i64",
            Format::UInt8 => "u8",
            Format::UInt32 => "u32",
            Format::UInt64 => "u64",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Format> {
        match tag {
            "f32" => Some(Format::Float32),
            "f64" => Some(Format::Float64),
            "i32" => Some(Format::Int32),
            "i64" => Some(Format::Int64),
            "u8" => Some(Format::UInt8),
            "u32" => Some(Format::UInt32),
            "u64" => Some(Format::UInt64),
            _ => None,
        }
    }

    /// Size in bytes of one element
    pub fn width(self) -> usize {
        match self {
            Format::UInt8 => 1,
            Format::Float32 | Format::Int32 | Format::UInt32 => 4,
            Format::Float64 | Format::Int64 | Format::UInt64 => 8,
        }
    }
}

/// Level of detail of a property
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Resolution {
    #[default]
    Text,
    Uniform,
    Individual,
}

impl Resolution {
    pub fn tag(self) -> Option<&'static str> {
        match self {
            Resolution::Text => None,
            Resolution::Uniform => Some("uni"),
            Resolution::Individual => Some("ind"),
        }
    }

    pub fn from_tag(tag: &str) -> Option<Resolution> {
        match tag {
            "uni" => Some(Resolution::Uniform),
            "ind" => Some(Resolution::Individual),
            _ => None,
        }
    }
}

/// A single stored property, the structured form of an archive path.
///
/// Field order matters: the derived ordering compares group, name, suffix,
/// behavior, format, resolution and finally index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Record {
    group: String,
    name: String,
    suffix: String,
    behavior: Behavior,
    format: Format,
    resolution: Resolution,
    index: String,
}

impl Record {
    pub fn new(
        group: &str,
        name: &str,
        index: &str,
        behavior: Behavior,
        format: Format,
        resolution: Resolution,
    ) -> Self {
        Record::with_suffix(group, name, index, "", behavior, format, resolution)
    }

    /// Build a record from every field.
    ///
    /// Two normalizations keep `parse(path()) == self`: a `Text` record
    /// always has the `UInt8` format (text paths carry no format tag), and
    /// only continuous records keep a suffix.
    pub fn with_suffix(
        group: &str,
        name: &str,
        index: &str,
        suffix: &str,
        behavior: Behavior,
        format: Format,
        resolution: Resolution,
    ) -> Self {
        Record {
            group: group.trim_start_matches('/').to_string(),
            name: name.to_string(),
            suffix: match behavior {
                Behavior::Continuous => suffix.to_string(),
                _ => String::new(),
            },
            behavior,
            format: match resolution {
                Resolution::Text => Format::UInt8,
                _ => format,
            },
            resolution,
            index: index.to_string(),
        }
    }

    /// Parse a path inside an archive. Never fails: anything that is not
    /// recognized ends up verbatim in the group, name or suffix.
    pub fn parse(path: &str) -> Self {
        let mut rec = Record::default();
        let dirs: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        let n = dirs.len();

        if n > 2 {
            let marker = dirs[n - 3];

            if marker == FRAMES || marker == VARS {
                rec.group = dirs[..n - 3].join("/");

                if marker == FRAMES {
                    rec.behavior = Behavior::Discrete;
                    rec.index = dirs[n - 2].to_string();
                    rec.process_name(dirs[n - 1]);
                } else {
                    rec.behavior = Behavior::Continuous;
                    rec.process_name(dirs[n - 2]);
                    rec.process_var_index(dirs[n - 1]);
                }
                return rec;
            }
        }

        // No frames/ or vars/ marker, everything but the last segment is group
        rec.group = dirs[..n - 1].join("/");
        rec.process_name(dirs[n - 1]);
        rec
    }

    fn process_name(&mut self, name: &str) {
        let pieces: Vec<&str> = name.split('.').collect();

        match trailing_tags(&pieces) {
            Some((format, resolution)) => {
                self.name = pieces[..pieces.len() - 2].join(".");
                self.format = format;
                self.resolution = resolution;
            }
            None => self.name = name.to_string(),
        }
    }

    fn process_var_index(&mut self, segment: &str) {
        match segment.find('.') {
            Some(dot) => {
                self.index = segment[..dot].to_string();
                self.suffix = segment[dot..].to_string();
            }
            None => self.index = segment.to_string(),
        }
    }

    /// Serialize back into the canonical archive path
    pub fn path(&self) -> String {
        let mut tagged = self.name.clone();
        let tags = match self.resolution.tag() {
            Some(res) => format!(".{}.{}", self.format.tag(), res),
            None => String::new(),
        };

        let mut result = String::new();
        if !self.group.is_empty() {
            result.push_str(&self.group);
            result.push('/');
        }

        match self.behavior {
            Behavior::Continuous => {
                tagged.push_str(&tags);
                result.push_str(VARS);
                result.push('/');
                result.push_str(&tagged);
                result.push('/');
                result.push_str(&self.index);
                result.push_str(&self.suffix);
            }
            Behavior::Discrete => {
                tagged.push_str(&tags);
                result.push_str(FRAMES);
                result.push('/');
                result.push_str(&self.index);
                result.push('/');
                result.push_str(&tagged);
            }
            Behavior::Constant => {
                tagged.push_str(&tags);
                result.push_str(&tagged);
            }
        }

        result
    }

    /// Set the index to the empty string, returning the previous one
    pub fn nullify_index(&mut self) -> String {
        std::mem::take(&mut self.index)
    }

    /// Copy of this record with an empty index, identifying its record type
    pub fn with_nullified_index(&self) -> Record {
        let mut rec = self.clone();
        rec.nullify_index();
        rec
    }

    /// Copy of this record pointing at another index
    pub fn at_index(&self, index: &str) -> Record {
        let mut rec = self.clone();
        rec.index = index.to_string();
        rec
    }

    pub fn set_index(&mut self, index: &str) {
        self.index = index.to_string();
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn behavior(&self) -> Behavior {
        self.behavior
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }
}

// Both tags have to be present, with at least one piece in front of them
fn trailing_tags(pieces: &[&str]) -> Option<(Format, Resolution)> {
    let n = pieces.len();
    if n <= 2 {
        return None;
    }

    match (Format::from_tag(pieces[n - 2]), Resolution::from_tag(pieces[n - 1])) {
        (Some(format), Some(resolution)) => Some((format, resolution)),
        _ => None,
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

impl FromStr for Record {
    type Err = Infallible;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        Ok(Record::parse(path))
    }
}

impl From<&str> for Record {
    fn from(path: &str) -> Self {
        Record::parse(path)
    }
}

/// Ordering used for index strings: shorter strings first, then
/// lexicographic. Keeps `"2" < "10" < "100"` without parsing numbers.
pub fn index_cmp(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
