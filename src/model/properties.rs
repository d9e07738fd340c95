//! Sparse paragraph and run properties.
//!
//! WordprocessingML properties are optional at every level of the cascade
//! (doc defaults, style chain, direct formatting). They are modeled as
//! structs of `Option` fields rather than maps: resolution walks the
//! cascade field by field, and a missing leaf falls back to the parent.

use serde::{Deserialize, Serialize};

/// An opaque RGB color parsed from a `RRGGBB` hex value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f64, // 0.0 - 1.0
    pub g: f64,
    pub b: f64,
}

impl Color {
    pub const BLACK: Color = Color { r: 0.0, g: 0.0, b: 0.0 };
    pub const WHITE: Color = Color { r: 1.0, g: 1.0, b: 1.0 };

    pub fn rgb(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    /// Parse a `RRGGBB` hex string. Word writes `auto` for "pick for me";
    /// callers map that to `None` before reaching here.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim_start_matches('#');
        if hex.len() != 6 {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        Some(Self {
            r: r as f64 / 255.0,
            g: g as f64 / 255.0,
            b: b as f64 / 255.0,
        })
    }

    /// Word highlight color names (`w:highlight w:val="yellow"`).
    pub fn from_highlight_name(name: &str) -> Option<Self> {
        let hex = match name {
            "yellow" => "FFFF00",
            "green" => "00FF00",
            "cyan" => "00FFFF",
            "magenta" => "FF00FF",
            "blue" => "0000FF",
            "red" => "FF0000",
            "darkBlue" => "00008B",
            "darkCyan" => "008B8B",
            "darkGreen" => "006400",
            "darkMagenta" => "800080",
            "darkRed" => "8B0000",
            "darkYellow" => "808000",
            "darkGray" => "A9A9A9",
            "lightGray" => "D3D3D3",
            "black" => "000000",
            "white" => "FFFFFF",
            _ => return None,
        };
        Color::from_hex(hex)
    }
}

/// Paragraph alignment (`w:jc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
    /// Full justification (`both`).
    Justify,
}

impl Alignment {
    pub fn parse(val: &str) -> Option<Self> {
        match val {
            "left" | "start" => Some(Alignment::Left),
            "center" => Some(Alignment::Center),
            "right" | "end" => Some(Alignment::Right),
            "both" | "distribute" => Some(Alignment::Justify),
            _ => None,
        }
    }
}

/// Line spacing rule (`w:spacing w:line`/`w:lineRule`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LineSpacing {
    /// Multiple of the single-line height (`auto`; value is 240ths).
    Multiple(f64),
    /// At least the given height in points.
    AtLeast(f64),
    /// Exactly the given height in points.
    Exact(f64),
}

/// Subscript/superscript (`w:vertAlign`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VertAlign {
    Baseline,
    Superscript,
    Subscript,
}

/// One border edge (`w:top`, `w:left`, ... inside border containers).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BorderEdge {
    /// Line width in points.
    pub width: f64,
    pub color: Color,
}

/// Per-edge borders for paragraphs and table cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Borders {
    pub top: Option<BorderEdge>,
    pub right: Option<BorderEdge>,
    pub bottom: Option<BorderEdge>,
    pub left: Option<BorderEdge>,
}

impl Borders {
    pub fn any(&self) -> bool {
        self.top.is_some() || self.right.is_some() || self.bottom.is_some() || self.left.is_some()
    }
}

/// A tab stop (`w:tab` inside `w:tabs`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TabStop {
    /// Position from the paragraph text origin, in points.
    pub position: f64,
    pub kind: TabKind,
    pub leader: TabLeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TabKind {
    #[default]
    Left,
    Center,
    Right,
    /// Cleared stop; skipped during resolution.
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TabLeader {
    #[default]
    None,
    Dot,
}

/// Sparse paragraph-level properties (`w:pPr`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParagraphProperties {
    /// Referenced paragraph style id (`w:pStyle`).
    pub style_id: Option<String>,
    pub alignment: Option<Alignment>,
    /// Left indent in points.
    pub indent_left: Option<f64>,
    pub indent_right: Option<f64>,
    /// First-line indent (positive) in points.
    pub indent_first_line: Option<f64>,
    /// Hanging indent (positive) in points; mutually exclusive with first-line.
    pub indent_hanging: Option<f64>,
    /// Space before/after the paragraph in points.
    pub spacing_before: Option<f64>,
    pub spacing_after: Option<f64>,
    pub line_spacing: Option<LineSpacing>,
    /// `(numId, ilvl)` from `w:numPr`.
    pub numbering: Option<(i64, usize)>,
    pub keep_next: Option<bool>,
    pub keep_lines: Option<bool>,
    pub page_break_before: Option<bool>,
    pub widow_control: Option<bool>,
    pub borders: Option<Borders>,
    /// Paragraph shading fill (`w:shd w:fill`).
    pub shading: Option<Color>,
    pub tabs: Option<Vec<TabStop>>,
}

/// Sparse run-level properties (`w:rPr`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunProperties {
    /// Font family (`w:rFonts w:ascii`).
    pub font_family: Option<String>,
    /// Font size in points (parsed from half-points).
    pub size: Option<f64>,
    pub bold: Option<bool>,
    pub italic: Option<bool>,
    pub underline: Option<bool>,
    pub strike: Option<bool>,
    pub color: Option<Color>,
    pub highlight: Option<Color>,
    pub vert_align: Option<VertAlign>,
    /// BCP 47 language tag (`w:lang w:val`).
    pub lang: Option<String>,
}

impl ParagraphProperties {
    /// Overlay `self` on top of `base`: present fields win, absent fields
    /// fall back. `base` is the less specific layer of the cascade.
    pub fn cascade_over(&self, base: &ParagraphProperties) -> ParagraphProperties {
        ParagraphProperties {
            style_id: self.style_id.clone().or_else(|| base.style_id.clone()),
            alignment: self.alignment.or(base.alignment),
            indent_left: self.indent_left.or(base.indent_left),
            indent_right: self.indent_right.or(base.indent_right),
            indent_first_line: self.indent_first_line.or(base.indent_first_line),
            indent_hanging: self.indent_hanging.or(base.indent_hanging),
            spacing_before: self.spacing_before.or(base.spacing_before),
            spacing_after: self.spacing_after.or(base.spacing_after),
            line_spacing: self.line_spacing.or(base.line_spacing),
            numbering: self.numbering.or(base.numbering),
            keep_next: self.keep_next.or(base.keep_next),
            keep_lines: self.keep_lines.or(base.keep_lines),
            page_break_before: self.page_break_before.or(base.page_break_before),
            widow_control: self.widow_control.or(base.widow_control),
            borders: self.borders.or(base.borders),
            shading: self.shading.or(base.shading),
            tabs: self.tabs.clone().or_else(|| base.tabs.clone()),
        }
    }
}

impl RunProperties {
    pub fn cascade_over(&self, base: &RunProperties) -> RunProperties {
        RunProperties {
            font_family: self.font_family.clone().or_else(|| base.font_family.clone()),
            size: self.size.or(base.size),
            bold: self.bold.or(base.bold),
            italic: self.italic.or(base.italic),
            underline: self.underline.or(base.underline),
            strike: self.strike.or(base.strike),
            color: self.color.or(base.color),
            highlight: self.highlight.or(base.highlight),
            vert_align: self.vert_align.or(base.vert_align),
            lang: self.lang.clone().or_else(|| base.lang.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_from_hex() {
        let c = Color::from_hex("FF0000").unwrap();
        assert!((c.r - 1.0).abs() < 1e-9);
        assert!((c.g).abs() < 1e-9);
        assert!(Color::from_hex("auto").is_none());
        assert!(Color::from_hex("12345").is_none());
    }

    #[test]
    fn test_alignment_parse() {
        assert_eq!(Alignment::parse("both"), Some(Alignment::Justify));
        assert_eq!(Alignment::parse("center"), Some(Alignment::Center));
        assert_eq!(Alignment::parse("bogus"), None);
    }

    #[test]
    fn test_run_cascade_prefers_leaf() {
        let base = RunProperties {
            font_family: Some("Calibri".to_string()),
            size: Some(11.0),
            bold: Some(false),
            ..Default::default()
        };
        let leaf = RunProperties {
            bold: Some(true),
            ..Default::default()
        };
        let merged = leaf.cascade_over(&base);
        assert_eq!(merged.bold, Some(true));
        assert_eq!(merged.size, Some(11.0));
        assert_eq!(merged.font_family.as_deref(), Some("Calibri"));
    }

    #[test]
    fn test_paragraph_cascade_keeps_numbering() {
        let base = ParagraphProperties {
            numbering: Some((1, 0)),
            spacing_after: Some(8.0),
            ..Default::default()
        };
        let leaf = ParagraphProperties {
            alignment: Some(Alignment::Center),
            ..Default::default()
        };
        let merged = leaf.cascade_over(&base);
        assert_eq!(merged.numbering, Some((1, 0)));
        assert_eq!(merged.alignment, Some(Alignment::Center));
        assert_eq!(merged.spacing_after, Some(8.0));
    }

    #[test]
    fn test_cascade_idempotent() {
        let props = ParagraphProperties {
            alignment: Some(Alignment::Justify),
            indent_left: Some(36.0),
            ..Default::default()
        };
        let once = props.cascade_over(&ParagraphProperties::default());
        let twice = once.cascade_over(&ParagraphProperties::default());
        assert_eq!(once, twice);
    }
}
