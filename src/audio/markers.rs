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


//! OverDrive MediaMarkers
//!
//! Older OverDrive MP3 audiobooks carry their chapter list as an XML blob in
//! the `OverDrive MediaMarkers` format tag:
//!
//! ```xml
//! <Markers>
//!   <Marker><Name>Chapter 1</Name><Time>00:00.00</Time></Marker>
//!   <Marker><Name>Chapter 2</Name><Time>12:31.50</Time></Marker>
//! </Markers>
//! ```
//!
//! Only start times are stored; each marker ends where the next begins.

use crate::error::{RenderError, Result};
use serde::{Deserialize, Serialize};

/// Format tag holding the marker XML
pub const OVERDRIVE_MARKERS_TAG: &str = "OverDrive MediaMarkers";

/// One chapter start marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverdriveMediaMarker {
    /// Start time in seconds
    pub time: f64,
    pub name: Option<String>,
}

/// Parse the marker XML
///
/// The root element must be `<Markers>`. Every child marker needs a `<Time>`;
/// `<Name>` is optional. Any structural problem is reported as
/// `MalformedChapterMarkers` so callers can fall back to durations.
pub fn parse_markers(xml: &str) -> Result<Vec<OverdriveMediaMarker>> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| RenderError::MalformedChapterMarkers(format!("invalid XML: {}", e)))?;

    let root = doc.root_element();
    if root.tag_name().name() != "Markers" {
        return Err(RenderError::MalformedChapterMarkers(format!(
            "unknown media marker tag: {}, should be 'Markers'",
            root.tag_name().name()
        )));
    }

    let mut markers = Vec::new();
    for marker in root.children().filter(|n| n.is_element()) {
        let child_text = |tag: &str| {
            marker
                .children()
                .find(|n| n.is_element() && n.tag_name().name() == tag)
                .map(|n| n.text().unwrap_or_default().to_string())
        };

        let time = child_text("Time").ok_or_else(|| {
            RenderError::MalformedChapterMarkers("marker without a <Time> element".to_string())
        })?;

        markers.push(OverdriveMediaMarker {
            time: parse_marker_time(&time)?,
            name: child_text("Name"),
        });
    }

    Ok(markers)
}

/// Parse `[[hh:]mm:]ss[.frac]` into seconds
pub fn parse_marker_time(s: &str) -> Result<f64> {
    let components: Vec<&str> = s.trim().split(':').collect();
    if components.len() > 3 {
        return Err(RenderError::MalformedChapterMarkers(format!(
            "unknown time format: {}",
            s
        )));
    }

    let mut seconds = 0.0;
    for (component, scale) in components.iter().rev().zip([1.0, 60.0, 3600.0]) {
        let value: f64 = component.parse().map_err(|_| {
            RenderError::MalformedChapterMarkers(format!("unknown time format: {}", s))
        })?;
        seconds += value * scale;
    }

    Ok(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_marker_time() {
        assert_eq!(parse_marker_time("00:00.00").unwrap(), 0.0);
        assert_eq!(parse_marker_time("01:15.00").unwrap(), 75.0);
        assert!((parse_marker_time("02:15.96").unwrap() - 135.96).abs() < 1e-9);
        assert_eq!(parse_marker_time("1:00:00").unwrap(), 3600.0);
        assert_eq!(parse_marker_time("42").unwrap(), 42.0);
    }

    #[test]
    fn test_parse_markers() {
        let xml = "<Markers>\
                   <Marker><Name>Libraries and you</Name><Time>00:00.00</Time></Marker>\
                   <Marker><Name>Another Chapter</Name><Time>01:15.00</Time></Marker>\
                   <Marker><Time>02:00.00</Time></Marker>\
                   </Markers>";

        let markers = parse_markers(xml).unwrap();
        assert_eq!(markers.len(), 3);
        assert_eq!(markers[0].name.as_deref(), Some("Libraries and you"));
        assert_eq!(markers[1].time, 75.0);
        assert!(markers[2].name.is_none());
    }

    #[test]
    fn test_missing_root_element() {
        let xml = "<Marker><Name>No root element</Name><Time>00:00.00</Time></Marker>";
        let err = parse_markers(xml).unwrap_err();
        assert!(err.is_fallback());
    }

    #[test]
    fn test_too_many_time_components() {
        let xml = "<Markers><Marker><Name>Bad time</Name>\
                   <Time>00:00:00:00.000</Time></Marker></Markers>";
        let err = parse_markers(xml).unwrap_err();
        assert!(err.is_fallback());
    }

    #[test]
    fn test_unparseable_xml() {
        assert!(parse_markers("<Markers><Marker>").unwrap_err().is_fallback());
    }

    #[test]
    fn test_marker_without_time() {
        let xml = "<Markers><Marker><Name>Nameless</Name></Marker></Markers>";
        assert!(parse_markers(xml).unwrap_err().is_fallback());
    }
}
