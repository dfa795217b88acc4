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


//! Chapter resolution across the files of one audiobook
//!
//! Produces a single monotonic chapter sequence for an ordered file list.
//! Chapter times stay relative to the file each chapter came from.

use crate::audio::metadata::{ChapterInfo, FileInfo};
use crate::audio::probe::{probe_all, FileProber};
use crate::error::{RenderError, Result};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Slack allowed when deciding whether a chapter runs to the end of its file
pub const DURATION_TOLERANCE: f64 = 0.25;

/// Resolve chapters for an ordered list of probed files
///
/// A file's embedded chapters are used unless one of them ends after the
/// file does, which indicates stale metadata. Files without usable chapters
/// get one chapter spanning the whole file when `fall_back_to_durations` is
/// set, and contribute nothing otherwise. Zero-length files never get a
/// fallback chapter.
///
/// Numbering starts at the first emitted chapter's own number and increases
/// by one per chapter.
pub fn resolve(
    files: &[(PathBuf, FileInfo)],
    fall_back_to_durations: bool,
) -> Result<Vec<(PathBuf, ChapterInfo)>> {
    let mut out = Vec::new();
    let mut chapter_num: Option<i64> = None;

    for (path, file_info) in files {
        match usable_chapters(path, file_info) {
            Some(chapters) => {
                for chapter in chapters {
                    let mut chapter = chapter.clone();
                    chapter.num = next_num(&mut chapter_num, chapter.num);
                    out.push((path.clone(), chapter));
                }
            }
            None if fall_back_to_durations => {
                let duration = file_info.duration().ok_or_else(|| {
                    RenderError::invalid_input(format!(
                        "No duration information found for {}",
                        path.display()
                    ))
                })?;

                let mut chapter =
                    ChapterInfo::new(0, 0.0, duration, Some(fallback_title(path, file_info)));
                if chapter.is_degenerate() {
                    let err = RenderError::DegenerateChapter {
                        num: chapter_num.map_or(1, |n| n + 1),
                        start_time: chapter.start_time,
                        end_time: chapter.end_time,
                    };
                    warn!("Skipping {}: {}", path.display(), err);
                    continue;
                }
                chapter.num = next_num(&mut chapter_num, 1);
                chapter.tags = file_info.format_info.tags.clone();
                out.push((path.clone(), chapter));
            }
            None => {}
        }
    }

    Ok(out)
}

/// Probe `paths` and resolve their chapters
pub async fn resolve_paths<P: FileProber>(
    prober: &P,
    paths: &[PathBuf],
    fall_back_to_durations: bool,
) -> Result<Vec<(PathBuf, ChapterInfo)>> {
    let files = probe_all(prober, paths).await?;
    resolve(&files, fall_back_to_durations)
}

/// Fallback chapters for one file: its embedded chapters if present, else one
/// chapter spanning the file
pub fn fallback_chapters(path: &Path, file_info: &FileInfo) -> Result<Vec<ChapterInfo>> {
    let files = [(path.to_path_buf(), file_info.clone())];
    Ok(resolve(&files, true)?.into_iter().map(|(_, c)| c).collect())
}

fn next_num(current: &mut Option<i64>, default: i64) -> i64 {
    let num = current.map_or(default, |n| n + 1);
    *current = Some(num);
    num
}

fn usable_chapters<'a>(path: &Path, file_info: &'a FileInfo) -> Option<&'a [ChapterInfo]> {
    let chapters = file_info.chapters.as_deref().filter(|c| !c.is_empty())?;

    if let Some(duration) = file_info.duration() {
        if let Some(bad) = chapters.iter().find(|c| c.end_time > duration) {
            warn!(
                "Chapter {} of {} ends at {:.3}s, past the file end at {:.3}s; ignoring embedded chapters",
                bad.num,
                path.display(),
                bad.end_time,
                duration
            );
            return None;
        }
    }

    Some(chapters)
}

fn fallback_title(path: &Path, file_info: &FileInfo) -> String {
    let tags = &file_info.format_info.tags;
    if let Some(title) = tags.get("title").filter(|t| !t.is_empty()) {
        return title.clone();
    }

    let mut title = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let ends_in_digit = title.chars().last().map_or(false, |c| c.is_ascii_digit());
    if !ends_in_digit {
        if let Some(track) = tags.get("track") {
            title.push(' ');
            title.push_str(track);
        }
    }

    title
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::metadata::FormatInfo;

    fn chapterless(duration: f64) -> FileInfo {
        FileInfo::new(
            FormatInfo {
                duration: Some(duration),
                ..FormatInfo::default()
            },
            None,
        )
    }

    fn chaptered(duration: f64, chapters: Vec<(i64, f64, f64)>) -> FileInfo {
        let chapters = chapters
            .into_iter()
            .map(|(num, s, e)| ChapterInfo::new(num, s, e, Some(format!("Chapter {}", num))))
            .collect();
        FileInfo::new(
            FormatInfo {
                duration: Some(duration),
                ..FormatInfo::default()
            },
            Some(chapters),
        )
    }

    #[test]
    fn test_fallback_to_durations() {
        let files = vec![
            (PathBuf::from("01.mp3"), chapterless(120.0)),
            (PathBuf::from("02.mp3"), chapterless(95.5)),
        ];

        let resolved = resolve(&files, true).unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].1.num, 1);
        assert_eq!((resolved[0].1.start_time, resolved[0].1.end_time), (0.0, 120.0));
        assert_eq!(resolved[1].1.num, 2);
        assert_eq!((resolved[1].1.start_time, resolved[1].1.end_time), (0.0, 95.5));
        assert_eq!(resolved[1].0, PathBuf::from("02.mp3"));
    }

    #[test]
    fn test_no_fallback_skips_chapterless_files() {
        let files = vec![
            (PathBuf::from("01.mp3"), chapterless(120.0)),
            (PathBuf::from("02.m4b"), chaptered(60.0, vec![(0, 0.0, 30.0), (1, 30.0, 60.0)])),
        ];

        let resolved = resolve(&files, false).unwrap();
        assert_eq!(resolved.len(), 2);
        assert!(resolved.iter().all(|(p, _)| p == Path::new("02.m4b")));
        assert_eq!(resolved[0].1.num, 0);
        assert_eq!(resolved[1].1.num, 1);
    }

    #[test]
    fn test_renumbers_across_files() {
        let files = vec![
            (PathBuf::from("a.m4b"), chaptered(60.0, vec![(1, 0.0, 30.0), (2, 30.0, 60.0)])),
            (PathBuf::from("b.m4b"), chaptered(40.0, vec![(1, 0.0, 40.0)])),
            (PathBuf::from("c.mp3"), chapterless(10.0)),
        ];

        let nums: Vec<i64> = resolve(&files, true)
            .unwrap()
            .iter()
            .map(|(_, c)| c.num)
            .collect();
        assert_eq!(nums, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_chapters_past_end_are_ignored() {
        let files = vec![(
            PathBuf::from("stale.m4b"),
            chaptered(60.0, vec![(1, 0.0, 30.0), (2, 30.0, 900.0)]),
        )];

        assert!(resolve(&files, false).unwrap().is_empty());

        let resolved = resolve(&files, true).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].1.end_time, 60.0);
    }

    #[test]
    fn test_chapter_slightly_past_end_is_rejected() {
        let files = vec![(
            PathBuf::from("a.m4b"),
            chaptered(60.0, vec![(1, 0.0, 30.0), (2, 30.0, 60.2)]),
        )];
        assert!(resolve(&files, false).unwrap().is_empty());
    }

    #[test]
    fn test_chapter_ending_at_file_end_is_kept() {
        let files = vec![(PathBuf::from("a.m4b"), chaptered(60.0, vec![(1, 0.0, 60.0)]))];
        assert_eq!(resolve(&files, false).unwrap().len(), 1);
    }

    #[test]
    fn test_fallback_titles() {
        let mut titled = chapterless(1.0);
        titled.format_info.tags.insert("title".into(), "Prologue".into());
        titled.format_info.tags.insert("track".into(), "1".into());

        let mut tracked = chapterless(1.0);
        tracked.format_info.tags.insert("track".into(), "7".into());

        let mut numbered = chapterless(1.0);
        numbered.format_info.tags.insert("track".into(), "9".into());

        let mut mp3 = chapterless(1.0);
        mp3.format_info.tags.insert("track".into(), "3".into());

        let files = vec![
            (PathBuf::from("/book/intro.mp3"), titled),
            (PathBuf::from("/book/part.ogg"), tracked),
            (PathBuf::from("/book/part2"), numbered),
            (PathBuf::from("/book/part.mp3"), mp3),
        ];

        let titles: Vec<String> = resolve(&files, true)
            .unwrap()
            .into_iter()
            .map(|(_, c)| c.title.unwrap())
            .collect();
        assert_eq!(titles, vec!["Prologue", "part.ogg 7", "part2", "part.mp3"]);
    }

    #[test]
    fn test_fallback_chapter_carries_format_tags() {
        let mut info = chapterless(5.0);
        info.format_info.tags.insert("artist".into(), "Someone".into());
        let chapters = fallback_chapters(Path::new("a.mp3"), &info).unwrap();
        assert_eq!(chapters[0].tags["artist"], "Someone");
    }

    #[test]
    fn test_fallback_requires_duration() {
        let files = vec![(PathBuf::from("a.mp3"), FileInfo::default())];
        assert!(resolve(&files, true).is_err());
        assert!(resolve(&files, false).unwrap().is_empty());
    }

    #[test]
    fn test_fallback_skips_zero_length_files() {
        let files = vec![
            (PathBuf::from("a.mp3"), chapterless(0.0)),
            (PathBuf::from("b.mp3"), chapterless(10.0)),
        ];

        let resolved = resolve(&files, true).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].0, PathBuf::from("b.mp3"));
        assert_eq!(resolved[0].1.num, 1);
        assert_eq!(resolved[0].1.end_time, 10.0);
    }
}
