//! # Document Model
//!
//! The typed tree produced by the parser and consumed by the layout
//! pipeline. A document is a body of block-level elements (paragraphs and
//! tables) plus the section geometry, style/numbering tables, header,
//! footer and note parts, and the media table.
//!
//! The model is immutable after parsing: the pipeline only reads it, and
//! re-running the pipeline on the same model is deterministic. Nodes own
//! their children; cross-references (styles, numbering, media) go through
//! ids and flat tables rather than pointers.

pub mod numbering;
pub mod properties;
pub mod styles;

use crate::model::numbering::NumberingTable;
use crate::model::properties::{Borders, Color, ParagraphProperties, RunProperties};
use crate::model::styles::StyleTable;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unit conversions. WordprocessingML measures most lengths in twentieths
/// of a point, drawings in EMU, and font sizes in half-points; everything
/// is converted to points at parse time.
pub mod units {
    /// 1 twip = 1/20 pt.
    pub fn twips_to_points(twips: f64) -> f64 {
        twips / 20.0
    }

    /// 1 EMU = 1/914400 inch = 1/12700 pt.
    pub fn emu_to_points(emu: f64) -> f64 {
        emu / 12700.0
    }

    /// Font sizes (`w:sz`) are half-points.
    pub fn half_points_to_points(half: f64) -> f64 {
        half / 2.0
    }

    /// Border widths (`w:sz` on border edges) are eighths of a point.
    pub fn eighth_points_to_points(eighths: f64) -> f64 {
        eighths / 8.0
    }
}

/// Edge values (top, right, bottom, left) used for margins and paddings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Edges {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Edges {
    pub fn uniform(v: f64) -> Self {
        Self { top: v, right: v, bottom: v, left: v }
    }

    pub fn horizontal(&self) -> f64 {
        self.left + self.right
    }

    pub fn vertical(&self) -> f64 {
        self.top + self.bottom
    }
}

/// A block-level element: the children of the body, of table cells, and of
/// header/footer/note parts.
#[derive(Debug, Clone)]
pub enum Block {
    Paragraph(Paragraph),
    Table(Table),
}

impl Block {
    pub fn uid(&self) -> &str {
        match self {
            Block::Paragraph(p) => &p.uid,
            Block::Table(t) => &t.uid,
        }
    }
}

/// One paragraph: ordered inline content plus paragraph properties.
#[derive(Debug, Clone, Default)]
pub struct Paragraph {
    /// Stable source element id ("p12"), used in diagnostics and JSON.
    pub uid: String,
    pub props: ParagraphProperties,
    pub inlines: Vec<Inline>,
}

impl Paragraph {
    /// Concatenated text of all runs (fields and images excluded).
    pub fn text(&self) -> String {
        fn collect(inlines: &[Inline], out: &mut String) {
            for inline in inlines {
                match inline {
                    Inline::Run(r) => out.push_str(&r.text),
                    Inline::Hyperlink { children, .. } => collect(children, out),
                    _ => {}
                }
            }
        }
        let mut out = String::new();
        collect(&self.inlines, &mut out);
        out
    }
}

/// Inline-level content inside a paragraph.
#[derive(Debug, Clone)]
pub enum Inline {
    Run(Run),
    /// Explicit break (`w:br`).
    Break(BreakKind),
    /// Tab character; resolved against the paragraph's tab stops at layout.
    Tab,
    /// A field code (simple or collapsed complex field).
    Field(Field),
    /// An inline or anchored drawing.
    Drawing(Drawing),
    FootnoteRef { id: String, props: RunProperties },
    EndnoteRef { id: String, props: RunProperties },
    /// Run grouping with a resolved hyperlink target.
    Hyperlink { target: Option<String>, children: Vec<Inline> },
}

/// Maximal contiguous text with uniform character properties.
#[derive(Debug, Clone, Default)]
pub struct Run {
    pub props: RunProperties,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakKind {
    Line,
    Page,
    Column,
}

/// Recognized field instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Page,
    NumPages,
    Date,
    Time,
    Ref,
    Toc,
    Other,
}

impl FieldKind {
    pub fn from_instruction(instr: &str) -> Self {
        let keyword = instr.trim().split_whitespace().next().unwrap_or("");
        match keyword.to_ascii_uppercase().as_str() {
            "PAGE" => FieldKind::Page,
            "NUMPAGES" => FieldKind::NumPages,
            "DATE" => FieldKind::Date,
            "TIME" => FieldKind::Time,
            "REF" => FieldKind::Ref,
            "TOC" => FieldKind::Toc,
            _ => FieldKind::Other,
        }
    }
}

/// A field code. Complex fields (`w:fldChar begin/separate/end`) are
/// collapsed to this form at parse time.
#[derive(Debug, Clone)]
pub struct Field {
    pub instruction: String,
    pub kind: FieldKind,
    /// Cached result text from the source document, if present.
    pub cached: Option<String>,
    pub props: RunProperties,
}

/// Anchor mode for a drawing.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawingAnchor {
    /// Participates in line layout like a glyph.
    Inline,
    /// Positioned relative to page/margin; overlays body text.
    Anchored {
        offset_x: f64,
        offset_y: f64,
        relative_to_page: bool,
        behind_text: bool,
    },
}

#[derive(Debug, Clone)]
pub enum DrawingContent {
    /// Raster image; bytes live in the media table under `rel_id`.
    Image,
    /// A text box with its own block content.
    TextBox(Vec<Block>),
}

/// An inline or anchored drawing (`wp:inline` / `wp:anchor`).
#[derive(Debug, Clone)]
pub struct Drawing {
    pub rel_id: Option<String>,
    /// Display extent in points (converted from EMU).
    pub width: f64,
    pub height: f64,
    pub anchor: DrawingAnchor,
    pub content: DrawingContent,
}

/// Declared width of a table or column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TableWidth {
    Auto,
    /// Fixed width in points (`dxa`).
    Fixed(f64),
    /// Percentage of the available width, 0.0–100.0 (`pct`).
    Pct(f64),
}

#[derive(Debug, Clone, Default)]
pub struct TableProperties {
    pub width: Option<TableWidth>,
    pub borders: Option<Borders>,
    /// Default cell margins (`w:tblCellMar`).
    pub cell_margins: Option<Edges>,
}

/// A table: declared grid columns and ordered rows.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub uid: String,
    pub props: TableProperties,
    /// Declared column widths from `w:tblGrid`.
    pub grid: Vec<TableWidth>,
    pub rows: Vec<Row>,
}

impl Table {
    /// Number of grid columns, falling back to the widest row.
    pub fn column_count(&self) -> usize {
        if !self.grid.is_empty() {
            return self.grid.len();
        }
        self.rows
            .iter()
            .map(|r| r.cells.iter().map(|c| c.props.grid_span.max(1)).sum())
            .max()
            .unwrap_or(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeightRule {
    #[default]
    Auto,
    AtLeast,
    Exact,
}

#[derive(Debug, Clone, Default)]
pub struct RowProperties {
    pub height: Option<f64>,
    pub height_rule: HeightRule,
    /// `w:cantSplit`: the row never spans pages.
    pub cant_split: bool,
    /// `w:tblHeader`: repeats at the top of each page the table continues on.
    pub is_header: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Row {
    pub props: RowProperties,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerticalMerge {
    #[default]
    None,
    Restart,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellVAlign {
    #[default]
    Top,
    Center,
    Bottom,
}

#[derive(Debug, Clone, Default)]
pub struct CellProperties {
    /// Horizontal span in grid columns (`w:gridSpan`), minimum 1.
    pub grid_span: usize,
    pub vertical_merge: VerticalMerge,
    pub borders: Option<Borders>,
    pub shading: Option<Color>,
    pub valign: CellVAlign,
    pub width: Option<TableWidth>,
}

/// Body of one table cell.
#[derive(Debug, Clone, Default)]
pub struct Cell {
    pub props: CellProperties,
    pub blocks: Vec<Block>,
}

/// Which header/footer a section reference selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HdrFtrKind {
    Default,
    First,
    Even,
}

impl HdrFtrKind {
    pub fn parse(val: &str) -> Self {
        match val {
            "first" => HdrFtrKind::First,
            "even" => HdrFtrKind::Even,
            _ => HdrFtrKind::Default,
        }
    }
}

/// Section geometry (`w:sectPr`). Sizes in points.
#[derive(Debug, Clone)]
pub struct Section {
    /// Index of the first body block NOT covered by this section
    /// (`usize::MAX` for the final section).
    pub end_block: usize,
    pub page_width: f64,
    pub page_height: f64,
    pub margin: Edges,
    /// Distance from the page top to the header text origin.
    pub header_distance: f64,
    pub footer_distance: f64,
    pub columns: usize,
    /// Relationship ids of referenced header/footer parts, by kind.
    pub header_refs: HashMap<HdrFtrKind, String>,
    pub footer_refs: HashMap<HdrFtrKind, String>,
}

impl Default for Section {
    fn default() -> Self {
        // A4 with 1" margins, Word's default header/footer distances.
        Self {
            end_block: usize::MAX,
            page_width: 595.3,
            page_height: 841.9,
            margin: Edges::uniform(72.0),
            header_distance: 36.0,
            footer_distance: 36.0,
            columns: 1,
            header_refs: HashMap::new(),
            footer_refs: HashMap::new(),
        }
    }
}

/// One media part (image bytes) referenced from the document.
#[derive(Debug, Clone)]
pub struct MediaEntry {
    pub rel_id: String,
    pub path: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Core document properties (`docProps/core.xml`).
#[derive(Debug, Clone, Default)]
pub struct CoreProperties {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
}

/// The parsed document: everything downstream stages need, with no
/// remaining references into the source package.
#[derive(Debug, Clone, Default)]
pub struct DocumentModel {
    pub body: Vec<Block>,
    /// Sections in document order; the last one governs trailing content.
    pub sections: Vec<Section>,
    /// Header/footer part content keyed by relationship id.
    pub headers: HashMap<String, Vec<Block>>,
    pub footers: HashMap<String, Vec<Block>>,
    pub footnotes: HashMap<String, Vec<Block>>,
    pub endnotes: HashMap<String, Vec<Block>>,
    pub styles: StyleTable,
    pub numbering: NumberingTable,
    pub media: Vec<MediaEntry>,
    pub core: CoreProperties,
    /// `w:autoHyphenation` from settings.xml.
    pub auto_hyphenation: bool,
    /// `w:defaultTabStop` in points.
    pub default_tab_width: f64,
}

impl DocumentModel {
    /// The section governing the given body block. A section covers the
    /// blocks before its `end_block`; the final section covers the rest.
    pub fn section_at(&self, block_index: usize) -> &Section {
        static DEFAULT: std::sync::OnceLock<Section> = std::sync::OnceLock::new();
        self.sections
            .iter()
            .find(|s| block_index < s.end_block)
            .or_else(|| self.sections.last())
            .unwrap_or_else(|| DEFAULT.get_or_init(Section::default))
    }

    pub fn media_by_rel(&self, rel_id: &str) -> Option<&MediaEntry> {
        self.media.iter().find(|m| m.rel_id == rel_id)
    }

    pub fn media_index(&self, rel_id: &str) -> Option<usize> {
        self.media.iter().position(|m| m.rel_id == rel_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_conversions() {
        assert!((units::twips_to_points(240.0) - 12.0).abs() < 1e-9);
        assert!((units::emu_to_points(914400.0) - 72.0).abs() < 1e-9);
        assert!((units::half_points_to_points(24.0) - 12.0).abs() < 1e-9);
        assert!((units::eighth_points_to_points(8.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_paragraph_text_roundtrip() {
        let para = Paragraph {
            uid: "p1".to_string(),
            props: ParagraphProperties::default(),
            inlines: vec![
                Inline::Run(Run { props: RunProperties::default(), text: "Hello, ".to_string() }),
                Inline::Hyperlink {
                    target: Some("https://example.com".to_string()),
                    children: vec![Inline::Run(Run {
                        props: RunProperties::default(),
                        text: "world".to_string(),
                    })],
                },
                Inline::Run(Run { props: RunProperties::default(), text: ".".to_string() }),
            ],
        };
        assert_eq!(para.text(), "Hello, world.");
    }

    #[test]
    fn test_table_column_count_from_spans() {
        let table = Table {
            uid: "t1".to_string(),
            rows: vec![Row {
                cells: vec![
                    Cell {
                        props: CellProperties { grid_span: 2, ..Default::default() },
                        blocks: vec![],
                    },
                    Cell::default(),
                ],
                ..Default::default()
            }],
            ..Default::default()
        };
        // grid_span of 0 counts as 1
        assert_eq!(table.column_count(), 3);
    }

    #[test]
    fn test_section_fallback() {
        let model = DocumentModel::default();
        let section = model.section_at(5);
        assert!((section.page_width - 595.3).abs() < 0.1);
    }

    #[test]
    fn test_field_kind_parse() {
        assert_eq!(FieldKind::from_instruction(" PAGE \\* MERGEFORMAT "), FieldKind::Page);
        assert_eq!(FieldKind::from_instruction("NUMPAGES"), FieldKind::NumPages);
        assert_eq!(FieldKind::from_instruction("MACROBUTTON x"), FieldKind::Other);
    }
}
