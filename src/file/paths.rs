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


//! Output file naming
//!
//! Book titles end up in chapter file names (`<title>-<nn>.mp3`), so they
//! are made safe for every filesystem the cache may live on.

use std::path::{Path, PathBuf};

/// Longest title prefix kept in a chapter file name, in bytes
pub const MAX_TITLE_BYTES: usize = 200;

/// Output directory for one entry and render mode
pub fn output_dir(cache_root: &Path, entry_id: &str, mode_dir: &str) -> PathBuf {
    cache_root.join(sanitize_filename(entry_id)).join(mode_dir)
}

/// File name prefix for per-chapter outputs of a titled book
///
/// `None` when there is no usable title, in which case the planner falls back
/// to its generic base name.
pub fn chapter_base_name(title: Option<&str>) -> Option<String> {
    let title = title?.trim();
    if title.is_empty() {
        return None;
    }
    let safe = truncate_component(&sanitize_filename(title), MAX_TITLE_BYTES);
    Some(format!("{}-", safe))
}

/// Sanitize filename (removes/replaces invalid characters for filenames)
pub fn sanitize_filename(name: &str) -> String {
    let mut result: String = name.chars().map(replace_char).collect();

    // Trim leading/trailing whitespace and dots
    result = result.trim().trim_end_matches('.').to_string();

    if cfg!(target_os = "windows") {
        result = handle_windows_reserved_names(&result);
    }

    if result.is_empty() {
        result = "file".to_string();
    }

    result
}

fn replace_char(c: char) -> char {
    match c {
        '<' => '＜', // U+FF1C fullwidth less-than sign
        '>' => '＞', // U+FF1E fullwidth greater-than sign
        '"' => '＂', // U+FF02 fullwidth quotation mark
        ':' => '_',
        '|' => '⏐', // U+23D0 vertical line extension
        '?' => '？', // U+FF1F fullwidth question mark
        '*' => '✱', // U+2731 heavy asterisk
        '/' => '∕', // U+2215 division slash
        '\\' => '_',
        c if c.is_control() => '_',
        c => c,
    }
}

fn handle_windows_reserved_names(name: &str) -> String {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];

    let upper = name.to_uppercase();
    let stem = upper.split('.').next().unwrap_or("");
    if RESERVED.contains(&stem) {
        format!("_{}", name)
    } else {
        name.to_string()
    }
}

/// Truncate to at most `max_bytes` on a UTF-8 boundary
pub fn truncate_component(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let mut index = max_bytes;
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    text[..index].trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("AC/DC: Live?"), "AC∕DC_ Live？");
        assert_eq!(sanitize_filename("Normal Title"), "Normal Title");
        assert_eq!(sanitize_filename("tab\there"), "tab_here");
    }

    #[test]
    fn test_trim_whitespace_and_dots() {
        assert_eq!(sanitize_filename("  The End...  "), "The End");
        assert_eq!(sanitize_filename("..."), "file");
    }

    #[test]
    fn test_chapter_base_name() {
        assert_eq!(
            chapter_base_name(Some("Moby Dick")).as_deref(),
            Some("Moby Dick-")
        );
        assert_eq!(
            chapter_base_name(Some("Either/Or")).as_deref(),
            Some("Either∕Or-")
        );
        assert_eq!(chapter_base_name(Some("   ")), None);
        assert_eq!(chapter_base_name(None), None);
    }

    #[test]
    fn test_truncate_component() {
        assert_eq!(truncate_component("short", 10), "short");
        assert_eq!(truncate_component("ééé", 3), "é");
        assert_eq!(truncate_component("word word", 5), "word");
    }

    #[test]
    fn test_output_dir() {
        let dir = output_dir(Path::new("/cache"), "book:1", "chapters");
        assert_eq!(dir, PathBuf::from("/cache/book_1/chapters"));
    }
}
