// audiofeed-core - Audiobook chapter rendering for podcast feeds
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Audio metadata and chapter model
//!
//! # Types
//! - `FormatInfo` - container-level information (duration, size, tags)
//! - `ChapterInfo` - one chapter interval with optional title and tags
//! - `FileInfo` - format info plus the embedded chapters, if any
//!
//! # Serialized Forms
//! - ffprobe-shaped JSON (`format` + `chapters`), used for both probe output
//!   and the `.file_metadata` sidecar
//! - FFMETADATA1 text, piped to ffmpeg to inject tags and chapter markers
//! - JSON Chapters (`{"version": "1.2.0", "chapters": [...]}`) for players
//!
//! # Chapter Times
//! Chapter times are seconds. Whether they are relative to one physical file
//! or to a merged timeline is tracked by the caller.

use crate::audio::markers::{parse_markers, OverdriveMediaMarker, OVERDRIVE_MARKERS_TAG};
use crate::error::{RenderError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::warn;

/// Tag map, kept in a stable order so serialized documents are deterministic
pub type Tags = BTreeMap<String, String>;

/// Header line of an FFMETADATA1 document
pub const METADATA_HEADER: &str = ";FFMETADATA1";

lazy_static! {
    static ref METADATA_SPECIALS: Regex = Regex::new(r"([\\#;=\n])").unwrap();
}

/// Container-level information for one audio file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatInfo {
    pub filename: Option<String>,
    pub format_name: Option<String>,
    pub format_long_name: Option<String>,
    /// Start time in seconds
    pub start_time: Option<f64>,
    /// Duration in seconds
    pub duration: Option<f64>,
    /// Size in bytes
    pub size: Option<u64>,
    /// Bitrate in bits per second
    pub bit_rate: Option<u64>,
    #[serde(default)]
    pub tags: Tags,
}

/// Chapter marker structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterInfo {
    pub num: i64,
    /// Start time in seconds
    pub start_time: f64,
    /// End time in seconds
    pub end_time: f64,
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Tags,
}

impl ChapterInfo {
    pub fn new(num: i64, start_time: f64, end_time: f64, title: Option<String>) -> Self {
        Self {
            num,
            start_time,
            end_time,
            title,
            tags: Tags::new(),
        }
    }

    /// Get chapter duration in seconds
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Chapters are ordered by (start_time, end_time)
    pub fn cmp_times(&self, other: &Self) -> Ordering {
        self.start_time
            .total_cmp(&other.start_time)
            .then(self.end_time.total_cmp(&other.end_time))
    }

    /// Copy of this chapter moved to a new interval
    pub fn with_times(&self, start_time: f64, end_time: f64) -> Self {
        Self {
            start_time,
            end_time,
            ..self.clone()
        }
    }

    pub(crate) fn is_degenerate(&self) -> bool {
        self.end_time <= self.start_time
    }
}

/// Format information plus embedded chapters
///
/// `chapters == None` means the file carries no chapter metadata. It is not
/// the same as one implicit chapter spanning the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileInfo {
    pub format_info: FormatInfo,
    pub chapters: Option<Vec<ChapterInfo>>,
}

impl FileInfo {
    pub fn new(format_info: FormatInfo, chapters: Option<Vec<ChapterInfo>>) -> Self {
        Self {
            format_info,
            chapters,
        }
    }

    /// Duration in seconds, if known
    pub fn duration(&self) -> Option<f64> {
        self.format_info.duration
    }

    pub fn has_chapters(&self) -> bool {
        self.chapters.as_ref().map_or(false, |c| !c.is_empty())
    }

    /// Copy with a different chapter list
    pub fn with_chapters(&self, chapters: Vec<ChapterInfo>) -> Self {
        Self {
            format_info: self.format_info.clone(),
            chapters: Some(chapters),
        }
    }

    /// Information for a file holding exactly `chapter`, rebased to start at 0
    pub fn trimmed_to_chapter(&self, chapter: &ChapterInfo) -> Self {
        let duration = chapter.duration();
        Self {
            format_info: FormatInfo {
                duration: Some(duration),
                size: None,
                ..self.format_info.clone()
            },
            chapters: Some(vec![chapter.with_times(0.0, duration)]),
        }
    }

    /// Concatenate two files' information
    ///
    /// Durations add; `other`'s chapters are shifted by this file's duration
    /// and numbered on from this file's last chapter.
    /// If `other`'s first chapter does not start at zero, the gap is folded
    /// into this file's last chapter. Tags from `self` win on conflict.
    pub fn merge(&self, other: &FileInfo) -> Result<FileInfo> {
        let left = &self.format_info;
        let right = &other.format_info;
        let (left_duration, right_duration) = match (left.duration, right.duration) {
            (Some(l), Some(r)) => (l, r),
            _ => {
                return Err(RenderError::invalid_input(
                    "Cannot merge file info without file durations",
                ))
            }
        };

        let mut tags = right.tags.clone();
        tags.extend(left.tags.iter().map(|(k, v)| (k.clone(), v.clone())));

        let format_info = FormatInfo {
            filename: None,
            format_name: left.format_name.clone(),
            format_long_name: left.format_long_name.clone(),
            start_time: left.start_time,
            duration: Some(left_duration + right_duration),
            size: None,
            bit_rate: if left.bit_rate == right.bit_rate {
                left.bit_rate
            } else {
                None
            },
            tags,
        };

        let mut chapters: Vec<ChapterInfo> = self.chapters.clone().unwrap_or_default();
        if let Some(right_chapters) = other.chapters.as_ref().filter(|c| !c.is_empty()) {
            let gap = right_chapters[0].start_time;
            if gap > 0.0 {
                if let Some(last) = chapters.last_mut() {
                    last.end_time += gap;
                }
            }

            let first_num = chapters.last().map(|c| c.num + 1);
            chapters.extend(right_chapters.iter().enumerate().map(|(i, c)| {
                let mut shifted =
                    c.with_times(c.start_time + left_duration, c.end_time + left_duration);
                if let Some(first_num) = first_num {
                    shifted.num = first_num + i as i64;
                }
                shifted
            }));
        }

        let chapters = if chapters.is_empty() && self.chapters.is_none() && other.chapters.is_none() {
            None
        } else {
            Some(chapters)
        };

        Ok(FileInfo {
            format_info,
            chapters,
        })
    }

    /// Parse ffprobe JSON output (`-show_format -show_chapters`)
    ///
    /// When no embedded chapters exist, an `OverDrive MediaMarkers` tag is
    /// used as the chapter source. Malformed markers leave the file
    /// chapterless so the resolver can fall back to durations.
    pub fn from_probe_json(json: &str) -> Result<FileInfo> {
        let probe: ProbeJson = serde_json::from_str(json)?;
        Self::from_probe(probe)
    }

    fn from_probe(probe: ProbeJson) -> Result<FileInfo> {
        let format_info = probe.format.into_format_info()?;

        let mut chapters: Vec<ChapterInfo> = Vec::new();
        for (index, raw) in probe.chapters.unwrap_or_default().into_iter().enumerate() {
            chapters.push(raw.into_chapter_info(index)?);
        }

        if chapters.is_empty() {
            if let Some(xml) = format_info.tags.get(OVERDRIVE_MARKERS_TAG) {
                match parse_markers(xml) {
                    Ok(markers) => chapters = chapters_from_markers(markers, format_info.duration),
                    Err(e) if e.is_fallback() => {
                        warn!(
                            "Ignoring OverDrive markers in {}: {}",
                            format_info.filename.as_deref().unwrap_or("<unknown>"),
                            e
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let chapters = drop_degenerate(chapters);
        Ok(FileInfo {
            format_info,
            chapters: if chapters.is_empty() {
                None
            } else {
                Some(chapters)
            },
        })
    }

    /// Serialize to ffprobe-shaped JSON
    pub fn to_json_value(&self) -> serde_json::Value {
        let probe = ProbeJson {
            format: ProbeFormat::from_format_info(&self.format_info),
            chapters: self
                .chapters
                .as_ref()
                .map(|chapters| chapters.iter().map(ProbeChapter::from_chapter_info).collect()),
        };
        // ProbeJson only holds strings and maps, serialization cannot fail
        serde_json::to_value(probe).unwrap_or(serde_json::Value::Null)
    }

    /// Parse the JSON produced by `to_json_value`
    pub fn from_json_value(value: serde_json::Value) -> Result<FileInfo> {
        let probe: ProbeJson = serde_json::from_value(value)?;
        Self::from_probe(probe)
    }

    /// Generate FFMETADATA1 content
    ///
    /// OverDrive marker tags are left out when chapters are present, the
    /// chapters already carry them. Chapter times are written with `TIMEBASE=1/1000`, i.e. integer milliseconds.
    pub fn to_metadata_document(&self) -> String {
        let mut content = String::from(METADATA_HEADER);
        content.push('\n');

        for (tag, value) in &self.format_info.tags {
            if tag == OVERDRIVE_MARKERS_TAG && self.has_chapters() {
                continue;
            }
            content.push_str(&format!("{}={}\n", escape_value(tag), escape_value(value)));
        }

        for chapter in self.chapters.iter().flatten() {
            content.push_str("[CHAPTER]\n");
            content.push_str("TIMEBASE=1/1000\n");
            content.push_str(&format!("START={}\n", seconds_to_millis(chapter.start_time)));
            content.push_str(&format!("END={}\n", seconds_to_millis(chapter.end_time)));
            if let Some(title) = &chapter.title {
                content.push_str(&format!("TITLE={}\n", escape_value(title)));
            }
            for (tag, value) in &chapter.tags {
                if tag != "title" {
                    content.push_str(&format!("{}={}\n", escape_value(tag), escape_value(value)));
                }
            }
        }

        content
    }

    /// Parse FFMETADATA1 content back into file information
    ///
    /// Only tags and chapters are recovered; chapters are numbered from 1.
    pub fn parse_metadata_document(document: &str) -> Result<FileInfo> {
        if !document.starts_with(";FFMETADATA") {
            return Err(RenderError::InvalidMetadataDocument(
                "missing ;FFMETADATA header".to_string(),
            ));
        }

        enum Section {
            Global,
            Chapter,
            Other,
        }

        let mut section = Section::Global;
        let mut tags = Tags::new();
        let mut chapters: Vec<ChapterBuilder> = Vec::new();

        for line in logical_lines(document) {
            if line.is_comment() || (line.key.is_empty() && line.value.is_none()) {
                continue;
            }

            if line.value.is_none() && line.key.starts_with('[') {
                section = if line.key == "[CHAPTER]" {
                    chapters.push(ChapterBuilder::default());
                    Section::Chapter
                } else {
                    Section::Other
                };
                continue;
            }

            let value = line.value.unwrap_or_default();
            match section {
                Section::Global => {
                    tags.insert(line.key, value);
                }
                Section::Chapter => {
                    if let Some(builder) = chapters.last_mut() {
                        builder.set(&line.key, value)?;
                    }
                }
                Section::Other => {}
            }
        }

        let chapters = chapters
            .into_iter()
            .enumerate()
            .map(|(i, b)| b.build(i as i64 + 1))
            .collect::<Result<Vec<_>>>()?;

        Ok(FileInfo {
            format_info: FormatInfo {
                tags,
                ..FormatInfo::default()
            },
            chapters: if chapters.is_empty() {
                None
            } else {
                Some(chapters)
            },
        })
    }

    /// Generate a JSON Chapters document for players
    ///
    /// Chapter times are expected to be relative to the rendered file.
    pub fn chapter_document(&self) -> String {
        let document = ChapterDocument {
            version: "1.2.0",
            chapters: self
                .chapters
                .iter()
                .flatten()
                .map(|c| ChapterMarker {
                    start_time: c.start_time,
                    end_time: c.end_time,
                    title: c.title.clone(),
                })
                .collect(),
        };
        serde_json::to_string(&document).unwrap_or_default()
    }

    /// Per-chapter descriptions from `description` or `comment` chapter tags
    pub fn chapter_description(&self) -> Option<String> {
        let descriptions: Vec<String> = self
            .chapters
            .iter()
            .flatten()
            .filter_map(|c| {
                c.tags
                    .get("description")
                    .or_else(|| c.tags.get("comment"))
                    .map(|desc| format!("Chapter {}\n{}", c.num, desc))
            })
            .collect();

        if descriptions.is_empty() {
            None
        } else {
            Some(descriptions.join("\n"))
        }
    }
}

/// One entry of a JSON Chapters document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterMarker {
    pub start_time: f64,
    pub end_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChapterDocument {
    version: &'static str,
    chapters: Vec<ChapterMarker>,
}

fn chapters_from_markers(
    mut markers: Vec<OverdriveMediaMarker>,
    duration: Option<f64>,
) -> Vec<ChapterInfo> {
    markers.sort_by(|a, b| a.time.total_cmp(&b.time));

    let ends: Vec<f64> = markers
        .iter()
        .skip(1)
        .map(|m| m.time)
        .chain(std::iter::once(duration.unwrap_or(f64::NAN)))
        .collect();

    markers
        .into_iter()
        .zip(ends)
        .enumerate()
        .map(|(i, (marker, end))| {
            let end = if end.is_nan() { marker.time } else { end };
            ChapterInfo::new(i as i64 + 1, marker.time, end, marker.name)
        })
        .collect()
}

fn drop_degenerate(chapters: Vec<ChapterInfo>) -> Vec<ChapterInfo> {
    chapters
        .into_iter()
        .filter(|c| {
            if c.is_degenerate() {
                let err = RenderError::DegenerateChapter {
                    num: c.num,
                    start_time: c.start_time,
                    end_time: c.end_time,
                };
                warn!("Dropping chapter: {}", err);
                false
            } else {
                true
            }
        })
        .collect()
}

fn seconds_to_millis(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}

/// Backslash-escape FFMETADATA special characters
pub fn escape_value(value: &str) -> String {
    METADATA_SPECIALS.replace_all(value, r"\$1").into_owned()
}

/// One `key=value` line of an FFMETADATA document, with escapes resolved
struct LogicalLine {
    key: String,
    value: Option<String>,
    /// First character of the line, if it was not escaped
    lead: Option<char>,
}

impl LogicalLine {
    fn is_comment(&self) -> bool {
        matches!(self.lead, Some(';') | Some('#'))
    }
}

/// Split a document into lines, honouring backslash escapes
fn logical_lines(document: &str) -> Vec<LogicalLine> {
    let mut lines = Vec::new();
    let mut key = String::new();
    let mut value: Option<String> = None;
    let mut lead: Option<char> = None;
    let mut at_start = true;
    let mut escaped = false;

    for c in document.chars() {
        if escaped {
            escaped = false;
            at_start = false;
            match value.as_mut() {
                Some(v) => v.push(c),
                None => key.push(c),
            }
            continue;
        }

        match c {
            '\\' => {
                escaped = true;
            }
            '\n' => {
                lines.push(LogicalLine {
                    key: std::mem::take(&mut key),
                    value: value.take(),
                    lead: lead.take(),
                });
                at_start = true;
                continue;
            }
            '\r' => {}
            '=' if value.is_none() => value = Some(String::new()),
            c => {
                if at_start {
                    lead = Some(c);
                }
                match value.as_mut() {
                    Some(v) => v.push(c),
                    None => key.push(c),
                }
            }
        }
        at_start = false;
    }

    if !key.is_empty() || value.is_some() {
        lines.push(LogicalLine { key, value, lead });
    }

    lines
}

#[derive(Default)]
struct ChapterBuilder {
    timebase: (i64, i64),
    start: Option<i64>,
    end: Option<i64>,
    title: Option<String>,
    tags: Tags,
}

impl ChapterBuilder {
    fn set(&mut self, key: &str, value: String) -> Result<()> {
        match key {
            "TIMEBASE" => {
                let (num, den) = value.split_once('/').ok_or_else(|| {
                    RenderError::InvalidMetadataDocument(format!("bad TIMEBASE: {}", value))
                })?;
                self.timebase = (num.trim().parse()?, den.trim().parse()?);
            }
            "START" => self.start = Some(value.trim().parse()?),
            "END" => self.end = Some(value.trim().parse()?),
            k if k.eq_ignore_ascii_case("title") => self.title = Some(value),
            _ => {
                self.tags.insert(key.to_string(), value);
            }
        }
        Ok(())
    }

    fn build(self, num: i64) -> Result<ChapterInfo> {
        let (tb_num, tb_den) = if self.timebase == (0, 0) {
            (1, 1000)
        } else {
            self.timebase
        };
        if tb_den == 0 {
            return Err(RenderError::InvalidMetadataDocument(
                "TIMEBASE denominator is zero".to_string(),
            ));
        }

        let to_seconds = |ticks: i64| ticks as f64 * tb_num as f64 / tb_den as f64;
        let (start, end) = match (self.start, self.end) {
            (Some(s), Some(e)) => (to_seconds(s), to_seconds(e)),
            _ => {
                return Err(RenderError::InvalidMetadataDocument(format!(
                    "chapter {} is missing START or END",
                    num
                )))
            }
        };

        Ok(ChapterInfo {
            num,
            start_time: start,
            end_time: end,
            title: self.title,
            tags: self.tags,
        })
    }
}

// ========================================================================
// ffprobe JSON structures
// ========================================================================

/// Accepts both `"12.5"` (ffprobe) and `12.5`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    String(String),
}

impl NumberOrString {
    fn as_f64(&self) -> Result<f64> {
        match self {
            NumberOrString::Number(n) => Ok(*n),
            NumberOrString::String(s) => Ok(s.trim().parse::<f64>()?),
        }
    }

    fn as_u64(&self) -> Result<u64> {
        match self {
            NumberOrString::Number(n)
                if n.is_finite() && *n >= 0.0 && n.fract() == 0.0 && *n < u64::MAX as f64 =>
            {
                Ok(*n as u64)
            }
            NumberOrString::Number(n) => Err(RenderError::invalid_input(format!(
                "Expected a non-negative integer, got {}",
                n
            ))),
            NumberOrString::String(s) => Ok(s.trim().parse::<u64>()?),
        }
    }
}

fn text<T: ToString>(value: T) -> NumberOrString {
    NumberOrString::String(value.to_string())
}

#[derive(Debug, Serialize, Deserialize)]
struct ProbeJson {
    format: ProbeFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chapters: Option<Vec<ProbeChapter>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProbeFormat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    format_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    format_long_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_time: Option<NumberOrString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration: Option<NumberOrString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<NumberOrString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bit_rate: Option<NumberOrString>,
    #[serde(default)]
    tags: Tags,
}

impl ProbeFormat {
    fn into_format_info(self) -> Result<FormatInfo> {
        Ok(FormatInfo {
            filename: self.filename,
            format_name: self.format_name,
            format_long_name: self.format_long_name,
            start_time: self.start_time.map(|v| v.as_f64()).transpose()?,
            duration: self.duration.map(|v| v.as_f64()).transpose()?,
            size: self.size.map(|v| v.as_u64()).transpose()?,
            bit_rate: self.bit_rate.map(|v| v.as_u64()).transpose()?,
            tags: self.tags,
        })
    }

    fn from_format_info(info: &FormatInfo) -> Self {
        Self {
            filename: info.filename.clone(),
            format_name: info.format_name.clone(),
            format_long_name: info.format_long_name.clone(),
            start_time: info.start_time.map(text),
            duration: info.duration.map(text),
            size: info.size.map(text),
            bit_rate: info.bit_rate.map(text),
            tags: info.tags.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ProbeChapter {
    #[serde(default)]
    id: Option<serde_json::Value>,
    start_time: Option<NumberOrString>,
    end_time: Option<NumberOrString>,
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    tags: Tags,
}

impl ProbeChapter {
    fn into_chapter_info(self, index: usize) -> Result<ChapterInfo> {
        let num = self
            .id
            .as_ref()
            .and_then(|id| id.as_i64())
            .unwrap_or(index as i64);

        let start_time = self
            .start_time
            .ok_or_else(|| RenderError::invalid_input(format!("chapter {} has no start_time", num)))?
            .as_f64()?;
        let end_time = self
            .end_time
            .ok_or_else(|| RenderError::invalid_input(format!("chapter {} has no end_time", num)))?
            .as_f64()?;

        let mut tags = self.tags;
        let title = tags.remove("title");

        Ok(ChapterInfo {
            num,
            start_time,
            end_time,
            title,
            tags,
        })
    }

    fn from_chapter_info(chapter: &ChapterInfo) -> Self {
        let mut tags = chapter.tags.clone();
        if let Some(title) = &chapter.title {
            tags.insert("title".to_string(), title.clone());
        }

        Self {
            id: Some(serde_json::Value::from(chapter.num)),
            start_time: Some(text(format!("{:.4}", chapter.start_time))),
            end_time: Some(text(format!("{:.4}", chapter.end_time))),
            tags,
        }
    }
}
