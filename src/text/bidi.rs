//! UAX#9 bidirectional analysis.
//!
//! Before shaping, each text fragment is split into directional runs so
//! RTL segments (Arabic, Hebrew) shape with the right direction and land
//! in visual order. Paragraph direction is detected from the first strong
//! character; WordprocessingML's `w:bidi` could force it, but detection
//! covers the documents we see.

use unicode_bidi::{BidiInfo, Level};

/// A contiguous run of characters with one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirRun {
    /// Char range into the analyzed text.
    pub start: usize,
    pub end: usize,
    pub rtl: bool,
}

/// Split `text` into directional runs. Pure-LTR text yields one run.
pub fn directional_runs(text: &str) -> Vec<DirRun> {
    if text.is_empty() {
        return Vec::new();
    }
    let info = BidiInfo::new(text, None);
    let Some(paragraph) = info.paragraphs.first() else {
        return vec![DirRun { start: 0, end: text.chars().count(), rtl: false }];
    };

    // Levels are per byte; project onto chars.
    let mut char_levels: Vec<Level> = Vec::new();
    for (byte_idx, _) in text.char_indices() {
        if byte_idx >= paragraph.range.start && byte_idx < paragraph.range.end {
            char_levels.push(info.levels[byte_idx]);
        } else {
            char_levels.push(Level::ltr());
        }
    }

    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..char_levels.len() {
        if char_levels[i].is_rtl() != char_levels[start].is_rtl() {
            runs.push(DirRun { start, end: i, rtl: char_levels[start].is_rtl() });
            start = i;
        }
    }
    runs.push(DirRun { start, end: char_levels.len(), rtl: char_levels[start].is_rtl() });
    runs
}

/// Does the text contain any character needing RTL handling?
pub fn has_rtl(text: &str) -> bool {
    directional_runs(text).iter().any(|r| r.rtl)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pure_ltr_single_run() {
        let runs = directional_runs("Hello world");
        assert_eq!(runs.len(), 1);
        assert!(!runs[0].rtl);
        assert_eq!(runs[0].end, 11);
    }

    #[test]
    fn test_empty() {
        assert!(directional_runs("").is_empty());
    }

    #[test]
    fn test_mixed_directions() {
        // "abc " + Hebrew alef-bet + " d"
        let text = "abc \u{05D0}\u{05D1} d";
        let runs = directional_runs(text);
        assert!(runs.len() >= 2, "expected LTR and RTL runs, got {runs:?}");
        assert!(runs.iter().any(|r| r.rtl));
        assert!(has_rtl(text));
    }

    #[test]
    fn test_no_rtl_in_latin() {
        assert!(!has_rtl("Za\u{017C}\u{00F3}\u{0142}\u{0107}"));
    }
}
