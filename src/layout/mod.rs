//! # Layout Pipeline
//!
//! Transforms the document tree into a `UnifiedLayout`: a flat list of
//! pages, each holding absolutely positioned blocks. The page is the unit
//! of layout: every decision (line placement, table row placement,
//! paragraph splitting) is made against the page's content region, with
//! header, footer, and footnote space already subtracted.
//!
//! The pipeline runs in two phases per block: measure (shape text into
//! lines, lay out table cells, all at the section's content width), then
//! place (flow the measured pieces onto pages, splitting at line and row
//! boundaries under widow/orphan and keep constraints). Given the same
//! model and options the output is byte-identical: nothing here reads
//! clocks, map iteration order, or addresses.

pub mod numbering;
pub mod table;

use crate::error::{DocError, Diagnostics, Stage};
use crate::font::FontContext;
use crate::model::properties::*;
use crate::model::*;
use crate::text::{self, BreakOptions, InlineBox, InlineItem, RunStyle};
use self::numbering::CounterTable;
use std::collections::HashMap;

/// Absolute rectangle in points, top-left origin.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }
}

/// Discriminant for [`LayoutBlock::content`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Paragraph,
    Table,
    Image,
    TextBox,
    Header,
    Footer,
    Footnotes,
    Endnotes,
    Watermark,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Paragraph => "paragraph",
            BlockKind::Table => "table",
            BlockKind::Image => "image",
            BlockKind::TextBox => "textbox",
            BlockKind::Header => "header",
            BlockKind::Footer => "footer",
            BlockKind::Footnotes => "footnotes",
            BlockKind::Endnotes => "endnotes",
            BlockKind::Watermark => "watermark",
        }
    }
}

/// One positioned block on a page.
#[derive(Debug, Clone)]
pub struct LayoutBlock {
    pub frame: Rect,
    pub kind: BlockKind,
    pub content: BlockContent,
    /// Named style id, when the source element referenced one.
    pub style_ref: Option<String>,
    /// Source element id.
    pub uid: String,
    /// Document order.
    pub seq: usize,
}

/// Type-specific payload, discriminated by [`BlockKind`].
#[derive(Debug, Clone)]
pub enum BlockContent {
    Paragraph(ParagraphLayout),
    Table(TableLayout),
    Image(ImageRef),
    /// Nested blocks with absolute frames.
    TextBox(Vec<LayoutBlock>),
}

/// Reference into the model's media table.
#[derive(Debug, Clone)]
pub struct ImageRef {
    pub media_rel: Option<String>,
}

/// A paragraph's content, pre-positioned relative to its block frame.
#[derive(Debug, Clone)]
pub struct ParagraphLayout {
    pub lines: Vec<PositionedLine>,
    pub marker: Option<MarkerBox>,
    /// Inline objects referenced by `InlineBoxKind::Object` indices.
    pub objects: Vec<LayoutObject>,
    pub shading: Option<Color>,
    pub borders: Option<Borders>,
}

impl ParagraphLayout {
    /// Concatenated text across all lines.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            for b in &line.boxes {
                if let Some(t) = b.text() {
                    out.push_str(t);
                }
            }
        }
        out
    }
}

/// One line, positioned relative to the paragraph block's top-left.
#[derive(Debug, Clone)]
pub struct PositionedLine {
    pub baseline_y: f64,
    pub height: f64,
    pub offset_x: f64,
    pub available_width: f64,
    pub boxes: Vec<InlineBox>,
}

/// A list marker, drawn in the hanging-indent area of the first line.
#[derive(Debug, Clone)]
pub struct MarkerBox {
    pub text: String,
    pub style: RunStyle,
    /// X relative to the block frame.
    pub x: f64,
    pub width: f64,
}

/// Payload behind an inline object box.
#[derive(Debug, Clone)]
pub enum LayoutObject {
    Image(ImageRef),
    TextBox { blocks: Vec<LayoutBlock>, width: f64, height: f64 },
}

/// A laid-out table fragment (the rows on one page).
#[derive(Debug, Clone)]
pub struct TableLayout {
    pub column_widths: Vec<f64>,
    pub cells: Vec<CellLayout>,
}

/// One cell, frame relative to the table block frame.
#[derive(Debug, Clone)]
pub struct CellLayout {
    pub frame: Rect,
    pub borders: Option<Borders>,
    pub shading: Option<Color>,
    /// Cell content, frames relative to the table block frame.
    pub blocks: Vec<LayoutBlock>,
}

/// A finished page.
#[derive(Debug, Clone)]
pub struct LayoutPage {
    /// 1-based page number.
    pub number: usize,
    pub width: f64,
    pub height: f64,
    pub margins: Edges,
    /// Z-ordered: watermarks, then body/header/footer/footnotes in
    /// pipeline order, then anchored overlays.
    pub blocks: Vec<LayoutBlock>,
    /// Indices into `blocks` that belong to the header.
    pub header_blocks: Vec<usize>,
    pub footer_blocks: Vec<usize>,
}

/// The pipeline result: ordered, absolutely positioned pages.
#[derive(Debug, Clone)]
pub struct UnifiedLayout {
    pub pages: Vec<LayoutPage>,
    /// Source description carried into export metadata.
    pub source: String,
}

impl UnifiedLayout {
    pub fn total_pages(&self) -> usize {
        self.pages.len()
    }
}

/// What the layout is being produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderTarget {
    #[default]
    Pdf,
    Json,
}

/// Caller-facing pipeline options (§6.4). `None` fields defer to the
/// document's own section geometry.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub page_size: Option<(f64, f64)>,
    pub margins: Option<Edges>,
    pub apply_headers_footers: bool,
    pub target: RenderTarget,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self { page_size: None, margins: None, apply_headers_footers: true, target: RenderTarget::Pdf }
    }
}

impl PipelineOptions {
    /// Stable hash for layout memoization.
    pub fn cache_key(&self) -> u64 {
        let mut h = 0xcbf2_9ce4_8422_2325u64;
        let mut mix = |v: u64| {
            h ^= v;
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
        };
        match self.page_size {
            Some((w, hh)) => {
                mix(1);
                mix(w.to_bits());
                mix(hh.to_bits());
            }
            None => mix(2),
        }
        match self.margins {
            Some(m) => {
                mix(3);
                for v in [m.top, m.right, m.bottom, m.left] {
                    mix(v.to_bits());
                }
            }
            None => mix(4),
        }
        mix(self.apply_headers_footers as u64);
        mix(match self.target {
            RenderTarget::Pdf => 11,
            RenderTarget::Json => 12,
        });
        h
    }
}

// ─── Measured (pre-pagination) forms ────────────────────────────

#[derive(Debug, Clone)]
pub(crate) struct MeasuredLine {
    pub boxes: Vec<InlineBox>,
    pub natural_width: f64,
    pub ascent: f64,
    pub descent: f64,
    pub height: f64,
    pub offset_x: f64,
    pub available_width: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct MeasuredParagraph {
    pub uid: String,
    pub style_ref: Option<String>,
    pub lines: Vec<MeasuredLine>,
    pub marker: Option<MarkerBox>,
    pub objects: Vec<LayoutObject>,
    pub anchored: Vec<AnchoredObject>,
    pub footnotes: Vec<String>,
    pub spacing_before: f64,
    pub spacing_after: f64,
    pub keep_next: bool,
    pub keep_lines: bool,
    pub force_page_break: bool,
    pub widow_control: bool,
    pub shading: Option<Color>,
    pub borders: Option<Borders>,
}

impl MeasuredParagraph {
    fn lines_height(&self, range: std::ops::Range<usize>) -> f64 {
        self.lines[range].iter().map(|l| l.height).sum()
    }

    fn content_height(&self) -> f64 {
        self.lines_height(0..self.lines.len())
    }
}

/// An anchored drawing pulled out of a paragraph's flow.
#[derive(Debug, Clone)]
pub(crate) struct AnchoredObject {
    pub block: LayoutBlock,
    pub relative_to_page: bool,
    pub behind_text: bool,
}

/// Shift a block (and everything inside it) by (dx, dy).
pub(crate) fn offset_block(block: &mut LayoutBlock, dx: f64, dy: f64) {
    block.frame.x += dx;
    block.frame.y += dy;
    match &mut block.content {
        BlockContent::TextBox(children) => {
            for child in children {
                offset_block(child, dx, dy);
            }
        }
        // Paragraph lines and table cells are relative to the block frame.
        BlockContent::Paragraph(_) | BlockContent::Table(_) | BlockContent::Image(_) => {}
    }
}

// ─── Page assembly ──────────────────────────────────────────────

struct PageBuilder {
    number: usize,
    width: f64,
    height: f64,
    margins: Edges,
    content_left: f64,
    content_width: f64,
    content_top: f64,
    /// Bottom of the content region before footnote reservation.
    content_bottom: f64,
    cursor_y: f64,
    blocks: Vec<LayoutBlock>,
    watermarks: Vec<LayoutBlock>,
    overlays: Vec<LayoutBlock>,
    header: Vec<LayoutBlock>,
    footer: Vec<LayoutBlock>,
    footnote_ids: Vec<String>,
    footnote_height: f64,
    /// Set when the last emitted body block carried keepWithNext.
    keep_next_stash: Option<KeepNextStash>,
}

struct KeepNextStash {
    first_block_index: usize,
    cursor_before: f64,
}

impl PageBuilder {
    fn remaining(&self) -> f64 {
        (self.content_bottom - self.footnote_height - self.cursor_y).max(0.0)
    }

    fn has_content(&self) -> bool {
        !self.blocks.is_empty()
    }
}

// ─── The pipeline ───────────────────────────────────────────────

pub struct LayoutPipeline<'a> {
    model: &'a DocumentModel,
    fonts: &'a FontContext,
    diags: &'a mut Diagnostics,
    counters: CounterTable,
    footnote_numbers: HashMap<String, usize>,
    endnote_numbers: HashMap<String, usize>,
    endnote_order: Vec<String>,
    seq: usize,
}

impl<'a> LayoutPipeline<'a> {
    pub fn new(model: &'a DocumentModel, fonts: &'a FontContext, diags: &'a mut Diagnostics) -> Self {
        Self {
            model,
            fonts,
            diags,
            counters: CounterTable::new(),
            footnote_numbers: HashMap::new(),
            endnote_numbers: HashMap::new(),
            endnote_order: Vec::new(),
            seq: 0,
        }
    }

    /// Run the full pipeline.
    pub fn run(&mut self, options: &PipelineOptions) -> Result<UnifiedLayout, DocError> {
        let mut pages: Vec<LayoutPage> = Vec::new();
        let mut section_idx = self.section_index(0);
        let mut page = self.open_page(section_idx, 1, true, options);

        let model = self.model;
        for (block_idx, block) in model.body.iter().enumerate() {
            let this_section = self.section_index(block_idx);
            if this_section != section_idx {
                // A section break always opens a fresh page here.
                section_idx = this_section;
                let number = page.number + 1;
                self.close_page(page, &mut pages);
                page = self.open_page(section_idx, number, true, options);
            }

            match block {
                Block::Paragraph(p) => {
                    let measured = self.measure_paragraph(p, page.content_width);
                    for mp in measured {
                        self.place_paragraph(mp, &mut page, &mut pages, section_idx, options, true);
                    }
                }
                Block::Table(t) => {
                    let measured = self.measure_table(t, page.content_width);
                    self.place_table(measured, &mut page, &mut pages, section_idx, options);
                }
            }
        }

        self.emit_endnotes(&mut page, &mut pages, section_idx, options);
        self.close_page(page, &mut pages);

        self.check_invariants(&pages)?;

        Ok(UnifiedLayout { pages, source: String::new() })
    }

    fn section_index(&self, block_idx: usize) -> usize {
        self.model
            .sections
            .iter()
            .position(|s| block_idx < s.end_block)
            .unwrap_or(self.model.sections.len().saturating_sub(1))
    }

    fn section(&self, idx: usize) -> Section {
        self.model.sections.get(idx).cloned().unwrap_or_default()
    }

    fn next_seq(&mut self) -> usize {
        self.seq += 1;
        self.seq
    }

    // ── Pages ───────────────────────────────────────────────────

    fn open_page(
        &mut self,
        section_idx: usize,
        number: usize,
        first_of_section: bool,
        options: &PipelineOptions,
    ) -> PageBuilder {
        let section = self.section(section_idx);
        let (width, height) = options.page_size.unwrap_or((section.page_width, section.page_height));
        let margins = options.margins.unwrap_or(section.margin);

        let content_left = margins.left;
        let content_width = (width - margins.horizontal()).max(1.0);

        let mut header = Vec::new();
        let mut footer = Vec::new();
        let mut content_top = margins.top;
        let mut content_bottom = height - margins.bottom;

        if options.apply_headers_footers {
            if let Some(rel_id) = pick_hdr_ftr(&section.header_refs, number, first_of_section) {
                let content = self.model.headers.get(&rel_id).cloned().unwrap_or_default();
                let (blocks, h) = self.layout_isolated_blocks(&content, content_width, BlockKind::Header);
                header = blocks;
                for b in &mut header {
                    offset_block(b, content_left, section.header_distance);
                }
                content_top = content_top.max(section.header_distance + h);
            }
            if let Some(rel_id) = pick_hdr_ftr(&section.footer_refs, number, first_of_section) {
                let content = self.model.footers.get(&rel_id).cloned().unwrap_or_default();
                let (blocks, h) = self.layout_isolated_blocks(&content, content_width, BlockKind::Footer);
                footer = blocks;
                let footer_top = height - section.footer_distance - h;
                for b in &mut footer {
                    offset_block(b, content_left, footer_top);
                }
                content_bottom = content_bottom.min(footer_top);
            }
        }

        PageBuilder {
            number,
            width,
            height,
            margins,
            content_left,
            content_width,
            content_top,
            content_bottom,
            cursor_y: content_top,
            blocks: Vec::new(),
            watermarks: Vec::new(),
            overlays: Vec::new(),
            header,
            footer,
            footnote_ids: Vec::new(),
            footnote_height: 0.0,
            keep_next_stash: None,
        }
    }

    /// Finalize a page: attach footnotes, merge z-ordered block lists.
    fn close_page(&mut self, page: PageBuilder, pages: &mut Vec<LayoutPage>) {
        let mut blocks: Vec<LayoutBlock> = Vec::new();
        blocks.extend(page.watermarks);
        blocks.extend(page.blocks);

        let header_range_start = blocks.len();
        blocks.extend(page.header);
        let header_blocks: Vec<usize> = (header_range_start..blocks.len()).collect();

        let footer_range_start = blocks.len();
        blocks.extend(page.footer);
        let footer_blocks: Vec<usize> = (footer_range_start..blocks.len()).collect();

        // Footnotes stack upward from the bottom of the content region.
        if !page.footnote_ids.is_empty() {
            let mut y = page.content_bottom - page.footnote_height;
            for id in &page.footnote_ids {
                let content = self.model.footnotes.get(id).cloned().unwrap_or_default();
                let number = self.footnote_numbers.get(id).copied().unwrap_or(0);
                let (mut note_blocks, h) =
                    self.layout_footnote(&content, page.content_width, number);
                for b in &mut note_blocks {
                    offset_block(b, page.content_left, y);
                }
                blocks.extend(note_blocks);
                y += h;
            }
        }

        blocks.extend(page.overlays);

        pages.push(LayoutPage {
            number: page.number,
            width: page.width,
            height: page.height,
            margins: page.margins,
            blocks,
            header_blocks,
            footer_blocks,
        });
    }

    // ── Paragraph measurement ───────────────────────────────────

    /// Measure one paragraph at the given width. Explicit page breaks
    /// split the result; parts after the first force a new page.
    pub(crate) fn measure_paragraph(&mut self, p: &Paragraph, width: f64) -> Vec<MeasuredParagraph> {
        let style_ppr = self.model.styles.effective_paragraph(p.props.style_id.as_deref());
        let props = p.props.cascade_over(&style_ppr);
        let base_run = self.model.styles.effective_run(p.props.style_id.as_deref());

        // List marker and level-supplied indents.
        let mut marker: Option<MarkerBox> = None;
        let mut level_indent_left = None;
        let mut level_hanging = None;
        if let Some((num_id, ilvl)) = props.numbering {
            match self.counters.advance(&self.model.numbering, num_id, ilvl) {
                Some(m) => {
                    level_indent_left = m.indent_left;
                    level_hanging = m.indent_hanging;
                    let marker_style = self.marker_style(num_id, ilvl, &base_run);
                    let width = self.fonts.measure_text(&m.text, &marker_style.font, marker_style.size);
                    marker = Some(MarkerBox { text: m.text, style: marker_style, x: 0.0, width });
                }
                None => {
                    self.diags.warn(
                        Stage::Layout,
                        Some(&p.uid),
                        format!("paragraph references unknown numbering {num_id}/{ilvl}"),
                    );
                }
            }
        }

        let indent_left = props.indent_left.or(level_indent_left).unwrap_or(0.0);
        let indent_right = props.indent_right.unwrap_or(0.0);
        let hanging = props.indent_hanging.or(level_hanging).unwrap_or(0.0);
        let first_line = props.indent_first_line.unwrap_or(0.0);
        let first_offset = (indent_left - hanging + first_line).max(0.0);
        let rest_offset = indent_left.max(0.0);
        if let Some(m) = marker.as_mut() {
            m.x = first_offset;
        }
        // Marker occupies the hanging area; text of the first line starts
        // at the left indent.
        let marker_push = marker.as_ref().map(|m| m.width.min(hanging.max(0.0))).unwrap_or(0.0);
        let first_text_offset = if marker.is_some() { rest_offset.max(first_offset + marker_push) } else { first_offset };

        let justify = props.alignment == Some(Alignment::Justify);
        let first_width = (width - indent_right - first_text_offset).max(1.0);
        let rest_width = (width - indent_right - rest_offset).max(1.0);

        // Inline content, split into segments at explicit page breaks.
        let mut collector = ItemCollector {
            segments: vec![Vec::new()],
            objects: Vec::new(),
            anchored: Vec::new(),
            footnotes: Vec::new(),
        };
        self.collect_items(&p.inlines, &base_run, None, width, &mut collector, &p.uid);

        let min_style = self.run_style(&RunProperties::default(), &base_run, None, "");
        let opts = BreakOptions {
            first_width,
            rest_width,
            justify,
            tab_stops: props.tabs.clone().unwrap_or_default(),
            default_tab: self.model.default_tab_width,
            hyphenate: self.model.auto_hyphenation,
            min_style,
        };

        let spacing_factor = props.line_spacing.unwrap_or(LineSpacing::Multiple(1.0));
        let segment_count = collector.segments.len();
        let mut out = Vec::new();
        for (i, items) in collector.segments.into_iter().enumerate() {
            let lines = text::break_lines(self.fonts, &items, &opts);
            let measured_lines: Vec<MeasuredLine> = lines
                .into_iter()
                .enumerate()
                .map(|(line_idx, line)| {
                    let natural = line.ascent + line.descent + line.leading;
                    let height = match spacing_factor {
                        LineSpacing::Multiple(m) => natural * m,
                        LineSpacing::AtLeast(v) => natural.max(v),
                        LineSpacing::Exact(v) => v,
                    };
                    let (avail, base_offset) = if line_idx == 0 && i == 0 {
                        (first_width, first_text_offset)
                    } else {
                        (rest_width, rest_offset)
                    };
                    let offset_x = match props.alignment.unwrap_or_default() {
                        Alignment::Left | Alignment::Justify => base_offset,
                        Alignment::Center => base_offset + (avail - line.width).max(0.0) / 2.0,
                        Alignment::Right => base_offset + (avail - line.width).max(0.0),
                    };
                    MeasuredLine {
                        boxes: line.boxes,
                        natural_width: line.width,
                        ascent: line.ascent,
                        descent: line.descent,
                        height,
                        offset_x,
                        available_width: avail,
                    }
                })
                .collect();

            out.push(MeasuredParagraph {
                uid: p.uid.clone(),
                style_ref: p.props.style_id.clone(),
                lines: measured_lines,
                marker: if i == 0 { marker.take() } else { None },
                objects: if i == 0 { std::mem::take(&mut collector.objects) } else { Vec::new() },
                anchored: if i == 0 { std::mem::take(&mut collector.anchored) } else { Vec::new() },
                footnotes: if i == 0 { std::mem::take(&mut collector.footnotes) } else { Vec::new() },
                spacing_before: if i == 0 { props.spacing_before.unwrap_or(0.0) } else { 0.0 },
                spacing_after: if i + 1 == segment_count {
                    props.spacing_after.unwrap_or(0.0)
                } else {
                    0.0
                },
                keep_next: props.keep_next.unwrap_or(false),
                keep_lines: props.keep_lines.unwrap_or(false),
                force_page_break: if i == 0 {
                    props.page_break_before.unwrap_or(false)
                } else {
                    true
                },
                widow_control: props.widow_control.unwrap_or(true),
                shading: props.shading,
                borders: props.borders,
            });
        }
        out
    }

    fn marker_style(&self, num_id: i64, ilvl: usize, base_run: &RunProperties) -> RunStyle {
        let marker_props = self
            .model
            .numbering
            .resolve(num_id, ilvl)
            .map(|r| r.level.marker_props.clone())
            .unwrap_or_default();
        let effective = marker_props.cascade_over(base_run);
        self.run_style(&RunProperties::default(), &effective, None, "")
    }

    /// Resolve run properties (direct over base) into a concrete style.
    fn run_style(
        &self,
        direct: &RunProperties,
        base: &RunProperties,
        link: Option<String>,
        text_for_coverage: &str,
    ) -> RunStyle {
        let props = direct.cascade_over(base);
        let family = props
            .font_family
            .clone()
            .or_else(|| self.model.styles.default_run.font_family.clone())
            .unwrap_or_else(|| "Helvetica".to_string());
        let size = props.size.or(self.model.styles.default_run.size).unwrap_or(12.0);
        let weight = if props.bold.unwrap_or(false) { 700 } else { 400 };
        let italic = props.italic.unwrap_or(false);
        let (font, _complete) = self.fonts.resolve_for_text(&family, weight, italic, text_for_coverage);

        let mut style = RunStyle {
            font,
            size,
            color: props.color.unwrap_or(Color::BLACK),
            underline: props.underline.unwrap_or(false),
            strike: props.strike.unwrap_or(false),
            highlight: props.highlight,
            baseline_shift: 0.0,
            lang: props.lang.clone(),
            link,
        };
        if let Some(va) = props.vert_align {
            style = style.with_vert_align(va);
        }
        style
    }

    #[allow(clippy::too_many_arguments)]
    fn collect_items(
        &mut self,
        inlines: &[Inline],
        base_run: &RunProperties,
        link: Option<&str>,
        width: f64,
        collector: &mut ItemCollector,
        uid: &str,
    ) {
        for inline in inlines {
            match inline {
                Inline::Run(r) => {
                    let style = self.run_style(&r.props, base_run, link.map(str::to_string), &r.text);
                    let (_, complete) = self.fonts.resolve_for_text(
                        &style.font.family,
                        style.font.weight,
                        style.font.italic,
                        &r.text,
                    );
                    if !complete {
                        self.diags.warn(
                            Stage::Layout,
                            Some(uid),
                            "no font in the chain covers every character; .notdef glyphs may render",
                        );
                    }
                    collector.push_text(r.text.clone(), style);
                }
                Inline::Break(BreakKind::Line) => collector.current().push(InlineItem::Break),
                Inline::Break(BreakKind::Page) => collector.segments.push(Vec::new()),
                Inline::Break(BreakKind::Column) => {
                    // Single-column layout treats a column break as a page break.
                    collector.segments.push(Vec::new());
                }
                Inline::Tab => collector.current().push(InlineItem::Tab),
                Inline::Field(f) => {
                    let style = self.run_style(&f.props, base_run, link.map(str::to_string), "");
                    let (display, measure) = self.field_text(f, uid);
                    collector.current().push(InlineItem::Field {
                        display,
                        measure,
                        instruction: f.instruction.trim().to_string(),
                        style,
                    });
                }
                Inline::FootnoteRef { id, props } => {
                    let number = self.note_number(id, true);
                    let style = self
                        .run_style(props, base_run, None, "")
                        .with_vert_align(VertAlign::Superscript);
                    collector.push_text(number.to_string(), style);
                    collector.footnotes.push(id.clone());
                }
                Inline::EndnoteRef { id, props } => {
                    let number = self.note_number(id, false);
                    let style = self
                        .run_style(props, base_run, None, "")
                        .with_vert_align(VertAlign::Superscript);
                    collector.push_text(to_lower_roman(number), style);
                }
                Inline::Hyperlink { target, children } => {
                    self.collect_items(children, base_run, target.as_deref(), width, collector, uid);
                }
                Inline::Drawing(d) => self.collect_drawing(d, width, collector, uid),
            }
        }
    }

    fn collect_drawing(&mut self, d: &Drawing, width: f64, collector: &mut ItemCollector, uid: &str) {
        match &d.anchor {
            DrawingAnchor::Inline => {
                let object = match &d.content {
                    DrawingContent::Image => LayoutObject::Image(ImageRef { media_rel: d.rel_id.clone() }),
                    DrawingContent::TextBox(blocks) => {
                        let box_width = if d.width > 0.0 { d.width } else { width };
                        let (inner, h) = self.layout_isolated_blocks(blocks, box_width, BlockKind::Paragraph);
                        LayoutObject::TextBox {
                            blocks: inner,
                            width: box_width,
                            height: if d.height > 0.0 { d.height } else { h },
                        }
                    }
                };
                let (w, h) = match &object {
                    LayoutObject::Image(_) => (d.width.max(1.0), d.height.max(1.0)),
                    LayoutObject::TextBox { width, height, .. } => (*width, *height),
                };
                let index = collector.objects.len();
                collector.objects.push(object);
                collector.current().push(InlineItem::Object { index, width: w, height: h });
            }
            DrawingAnchor::Anchored { offset_x, offset_y, relative_to_page, behind_text } => {
                let (content, kind) = match &d.content {
                    DrawingContent::Image => (
                        BlockContent::Image(ImageRef { media_rel: d.rel_id.clone() }),
                        if *behind_text { BlockKind::Watermark } else { BlockKind::Image },
                    ),
                    DrawingContent::TextBox(blocks) => {
                        let (mut inner, _h) =
                            self.layout_isolated_blocks(blocks, d.width.max(1.0), BlockKind::Paragraph);
                        // Children share the anchored block's coordinate space.
                        for b in &mut inner {
                            offset_block(b, *offset_x, *offset_y);
                        }
                        (
                            BlockContent::TextBox(inner),
                            if *behind_text { BlockKind::Watermark } else { BlockKind::TextBox },
                        )
                    }
                };
                let block = LayoutBlock {
                    frame: Rect::new(*offset_x, *offset_y, d.width, d.height),
                    kind,
                    content,
                    style_ref: None,
                    uid: format!("{uid}.anchor"),
                    seq: self.next_seq(),
                };
                collector.anchored.push(AnchoredObject {
                    block,
                    relative_to_page: *relative_to_page,
                    behind_text: *behind_text,
                });
            }
        }
    }

    /// Display and measurement text for a field (§4.6 field codes).
    fn field_text(&mut self, f: &Field, uid: &str) -> (String, String) {
        match f.kind {
            FieldKind::Page => ("{{PAGE}}".to_string(), "888".to_string()),
            FieldKind::NumPages => ("{{NUMPAGES}}".to_string(), "888".to_string()),
            FieldKind::Date | FieldKind::Time => match &f.cached {
                Some(cached) => (cached.clone(), cached.clone()),
                None => {
                    // Resolving to the wall clock would break determinism;
                    // an uncached date renders empty.
                    self.diags.warn(
                        Stage::Layout,
                        Some(uid),
                        "date/time field has no cached result; rendering empty",
                    );
                    (String::new(), String::new())
                }
            },
            FieldKind::Ref | FieldKind::Toc | FieldKind::Other => {
                let cached = f.cached.clone().unwrap_or_default();
                (cached.clone(), cached)
            }
        }
    }

    fn note_number(&mut self, id: &str, footnote: bool) -> usize {
        let (map, order_len) = if footnote {
            (&mut self.footnote_numbers, None)
        } else {
            (&mut self.endnote_numbers, Some(&mut self.endnote_order))
        };
        if let Some(&n) = map.get(id) {
            return n;
        }
        let n = map.len() + 1;
        map.insert(id.to_string(), n);
        if let Some(order) = order_len {
            order.push(id.to_string());
        }
        n
    }

    // ── Non-paginated block stacking (headers, cells, notes) ────

    /// [`Self::layout_part_blocks`] with numbering counters snapshotted,
    /// so header/footer/note content laid out repeatedly (or measured then
    /// emitted) cannot advance the body's list state.
    fn layout_isolated_blocks(
        &mut self,
        blocks: &[Block],
        width: f64,
        kind: BlockKind,
    ) -> (Vec<LayoutBlock>, f64) {
        let saved = self.counters.clone();
        let result = self.layout_part_blocks(blocks, width, kind);
        self.counters = saved;
        result
    }

    /// Lay out blocks into a vertical stack at the given width. Frames are
    /// relative to the stack origin. Used everywhere pagination does not
    /// apply: headers, footers, footnotes, text boxes, table cells.
    pub(crate) fn layout_part_blocks(
        &mut self,
        blocks: &[Block],
        width: f64,
        kind: BlockKind,
    ) -> (Vec<LayoutBlock>, f64) {
        let mut out = Vec::new();
        let mut y = 0.0f64;
        for block in blocks {
            match block {
                Block::Paragraph(p) => {
                    for mp in self.measure_paragraph(p, width) {
                        y += mp.spacing_before;
                        let height = mp.content_height();
                        let lb = self.emit_paragraph_fragment(&mp, 0.., Rect::new(0.0, y, width, height), kind);
                        out.push(lb);
                        y += height + mp.spacing_after;
                    }
                }
                Block::Table(t) => {
                    let mt = self.measure_table(t, width);
                    let rows: Vec<usize> = (0..mt.rows.len()).collect();
                    let (lb, h) = self.emit_table_fragment(&mt, &rows, Rect::new(0.0, y, mt.total_width, 0.0), kind);
                    out.push(lb);
                    y += h;
                }
            }
        }
        (out, y)
    }

    fn layout_footnote(
        &mut self,
        content: &[Block],
        width: f64,
        number: usize,
    ) -> (Vec<LayoutBlock>, f64) {
        let (mut blocks, h) = self.layout_isolated_blocks(content, width, BlockKind::Footnotes);
        // Prefix the note number as a marker on the first paragraph.
        if let Some(first) = blocks.first_mut() {
            if let BlockContent::Paragraph(pl) = &mut first.content {
                if pl.marker.is_none() {
                    let style = self.run_style(
                        &RunProperties { size: Some(9.0), ..Default::default() },
                        &self.model.styles.default_run.clone(),
                        None,
                        "",
                    );
                    let text = format!("{number} ");
                    let width = self.fonts.measure_text(&text, &style.font, style.size);
                    pl.marker = Some(MarkerBox { text, style, x: 0.0, width });
                }
            }
        }
        (blocks, h)
    }

    /// Reserve height for a set of footnotes at the page width.
    fn footnote_reserve(&mut self, ids: &[String], page: &PageBuilder) -> f64 {
        let mut total = 0.0;
        for id in ids {
            if page.footnote_ids.contains(id) {
                continue;
            }
            let content = self.model.footnotes.get(id).cloned();
            match content {
                Some(content) => {
                    let number = self.footnote_numbers.get(id).copied().unwrap_or(0);
                    let (_, h) = self.layout_footnote(&content, page.content_width, number);
                    total += h;
                }
                None => {
                    self.diags.warn(
                        Stage::Layout,
                        Some(id),
                        "footnote reference has no definition; dropping the note",
                    );
                }
            }
        }
        total
    }

    // ── Paragraph placement ─────────────────────────────────────

    fn place_paragraph(
        &mut self,
        mp: MeasuredParagraph,
        page: &mut PageBuilder,
        pages: &mut Vec<LayoutPage>,
        section_idx: usize,
        options: &PipelineOptions,
        allow_keep_next_pull: bool,
    ) {
        if mp.force_page_break && page.has_content() {
            self.start_new_page(page, pages, section_idx, options);
        }

        let footnote_extra = self.footnote_reserve(&mp.footnotes, page);
        let full_height = mp.spacing_before + mp.content_height() + mp.spacing_after;

        if full_height + footnote_extra <= page.remaining() || (!page.has_content() && mp.lines.len() <= 1)
        {
            self.emit_paragraph(&mp, 0..mp.lines.len(), page, footnote_extra, true);
            return;
        }

        // Whole-block move for keep-together paragraphs.
        if mp.keep_lines && page.has_content() {
            self.move_to_new_page(page, pages, section_idx, options, allow_keep_next_pull);
            self.place_paragraph(mp, page, pages, section_idx, options, false);
            return;
        }

        // Line split under widow/orphan control.
        let avail = page.remaining() - mp.spacing_before - footnote_extra;
        let mut fit = 0usize;
        let mut used = 0.0f64;
        for line in &mp.lines {
            if used + line.height > avail {
                break;
            }
            used += line.height;
            fit += 1;
        }

        let n = mp.lines.len();
        let (orphans, widows) = if mp.widow_control { (2usize, 2usize) } else { (1, 0) };

        if fit < n && n - fit < widows {
            fit = n.saturating_sub(widows);
        }
        if fit < orphans.min(n) {
            fit = 0;
        }

        if fit == 0 {
            if page.has_content() {
                self.move_to_new_page(page, pages, section_idx, options, allow_keep_next_pull);
                self.place_paragraph(mp, page, pages, section_idx, options, false);
            } else {
                // Nothing fits even on an empty page: overflow rather than loop.
                self.emit_paragraph(&mp, 0..n, page, footnote_extra, true);
            }
            return;
        }
        if fit >= n {
            self.emit_paragraph(&mp, 0..n, page, footnote_extra, true);
            return;
        }

        // First fragment here, remainder on the next page.
        self.emit_paragraph(&mp, 0..fit, page, footnote_extra, false);
        self.start_new_page(page, pages, section_idx, options);

        let mut rest = mp.clone();
        rest.lines = mp.lines[fit..].to_vec();
        rest.marker = None;
        rest.anchored = Vec::new();
        rest.objects = mp.objects.clone();
        rest.footnotes = Vec::new();
        rest.spacing_before = 0.0;
        rest.force_page_break = false;
        self.place_paragraph(rest, page, pages, section_idx, options, false);
    }

    /// Emit lines `range` of a measured paragraph onto the page.
    fn emit_paragraph(
        &mut self,
        mp: &MeasuredParagraph,
        range: std::ops::Range<usize>,
        page: &mut PageBuilder,
        footnote_extra: f64,
        includes_tail: bool,
    ) {
        let cursor_before = page.cursor_y;
        page.cursor_y += mp.spacing_before;

        let height = mp.lines_height(range.clone());
        let frame = Rect::new(page.content_left, page.cursor_y, page.content_width, height);
        let block = self.emit_paragraph_fragment(mp, range, frame, BlockKind::Paragraph);

        // Anchored drawings attach to the page of the first fragment.
        for anchored in &mp.anchored {
            let mut b = anchored.block.clone();
            if !anchored.relative_to_page {
                offset_block(&mut b, page.content_left, cursor_before);
            }
            if anchored.behind_text {
                page.watermarks.push(b);
            } else {
                page.overlays.push(b);
            }
        }

        if mp.keep_next {
            page.keep_next_stash = Some(KeepNextStash {
                first_block_index: page.blocks.len(),
                cursor_before,
            });
        } else {
            page.keep_next_stash = None;
        }

        page.blocks.push(block);
        page.cursor_y += height;
        if includes_tail {
            page.cursor_y += mp.spacing_after;
        }

        for id in &mp.footnotes {
            if self.model.footnotes.contains_key(id) && !page.footnote_ids.contains(id) {
                page.footnote_ids.push(id.clone());
            }
        }
        page.footnote_height += footnote_extra;
    }

    /// Build the LayoutBlock for a range of measured lines.
    pub(crate) fn emit_paragraph_fragment(
        &mut self,
        mp: &MeasuredParagraph,
        range: impl std::ops::RangeBounds<usize>,
        frame: Rect,
        kind: BlockKind,
    ) -> LayoutBlock {
        let start = match range.start_bound() {
            std::ops::Bound::Included(&s) => s,
            std::ops::Bound::Excluded(&s) => s + 1,
            std::ops::Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            std::ops::Bound::Included(&e) => e + 1,
            std::ops::Bound::Excluded(&e) => e,
            std::ops::Bound::Unbounded => mp.lines.len(),
        };

        let mut lines = Vec::with_capacity(end - start);
        let mut y = 0.0f64;
        for line in &mp.lines[start..end] {
            // Half-leading: extra line height splits evenly above and below
            // the natural extent.
            let natural = line.ascent + line.descent;
            let half_leading = ((line.height - natural) / 2.0).max(0.0);
            lines.push(PositionedLine {
                baseline_y: y + half_leading + line.ascent,
                height: line.height,
                offset_x: line.offset_x,
                available_width: line.available_width,
                boxes: line.boxes.clone(),
            });
            y += line.height;
        }

        LayoutBlock {
            frame,
            kind,
            content: BlockContent::Paragraph(ParagraphLayout {
                lines,
                marker: if start == 0 { mp.marker.clone() } else { None },
                objects: mp.objects.clone(),
                shading: mp.shading,
                borders: mp.borders,
            }),
            style_ref: mp.style_ref.clone(),
            uid: mp.uid.clone(),
            seq: self.next_seq(),
        }
    }

    // ── Page transitions ────────────────────────────────────────

    fn start_new_page(
        &mut self,
        page: &mut PageBuilder,
        pages: &mut Vec<LayoutPage>,
        section_idx: usize,
        options: &PipelineOptions,
    ) {
        let number = page.number + 1;
        let old = std::mem::replace(page, self.open_page(section_idx, number, false, options));
        self.close_page(old, pages);
    }

    /// Open a new page, pulling a trailing keepWithNext block along once.
    fn move_to_new_page(
        &mut self,
        page: &mut PageBuilder,
        pages: &mut Vec<LayoutPage>,
        section_idx: usize,
        options: &PipelineOptions,
        allow_keep_next_pull: bool,
    ) {
        let mut carried: Vec<LayoutBlock> = Vec::new();
        if allow_keep_next_pull {
            if let Some(stash) = page.keep_next_stash.take() {
                if stash.first_block_index > 0 {
                    carried = page.blocks.split_off(stash.first_block_index);
                    page.cursor_y = stash.cursor_before;
                }
            }
        }

        self.start_new_page(page, pages, section_idx, options);

        if !carried.is_empty() {
            let old_top = carried.iter().map(|b| b.frame.y).fold(f64::INFINITY, f64::min);
            let dy = page.cursor_y - old_top;
            let mut max_bottom = page.cursor_y;
            for mut b in carried {
                offset_block(&mut b, 0.0, dy);
                max_bottom = max_bottom.max(b.frame.y + b.frame.height);
                page.blocks.push(b);
            }
            page.cursor_y = max_bottom;
        }
    }

    // ── Endnotes ────────────────────────────────────────────────

    fn emit_endnotes(
        &mut self,
        page: &mut PageBuilder,
        pages: &mut Vec<LayoutPage>,
        section_idx: usize,
        options: &PipelineOptions,
    ) {
        let order = self.endnote_order.clone();
        for id in order {
            let Some(content) = self.model.endnotes.get(&id).cloned() else { continue };
            let (blocks, h) = self.layout_part_blocks(&content, page.content_width, BlockKind::Endnotes);
            if h > page.remaining() && page.has_content() {
                self.start_new_page(page, pages, section_idx, options);
            }
            for mut b in blocks {
                offset_block(&mut b, page.content_left, page.cursor_y);
                page.blocks.push(b);
            }
            page.cursor_y += h;
        }
    }

    // ── Invariants ──────────────────────────────────────────────

    /// Programmer-error checks before the layout leaves the pipeline.
    fn check_invariants(&self, pages: &[LayoutPage]) -> Result<(), DocError> {
        for (i, page) in pages.iter().enumerate() {
            if page.number != i + 1 {
                return Err(DocError::Invariant {
                    element: format!("page {}", page.number),
                    message: "page numbers must be contiguous from 1".to_string(),
                });
            }
            for block in &page.blocks {
                if block.frame.width < 0.0 || block.frame.height < 0.0 {
                    return Err(DocError::Invariant {
                        element: block.uid.clone(),
                        message: "block frame has negative dimensions".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Select the header/footer reference for a page (first/even/default).
fn pick_hdr_ftr(
    refs: &HashMap<HdrFtrKind, String>,
    page_number: usize,
    first_of_section: bool,
) -> Option<String> {
    if first_of_section {
        if let Some(id) = refs.get(&HdrFtrKind::First) {
            return Some(id.clone());
        }
    }
    if page_number % 2 == 0 {
        if let Some(id) = refs.get(&HdrFtrKind::Even) {
            return Some(id.clone());
        }
    }
    refs.get(&HdrFtrKind::Default).cloned()
}

/// Endnote references display as lowercase roman numerals.
fn to_lower_roman(n: usize) -> String {
    numbering::format_number(n as i64, crate::model::numbering::NumFmt::LowerRoman)
}

/// Gathers a paragraph's inline items plus side artifacts.
struct ItemCollector {
    segments: Vec<Vec<InlineItem>>,
    objects: Vec<LayoutObject>,
    anchored: Vec<AnchoredObject>,
    footnotes: Vec<String>,
}

impl ItemCollector {
    fn current(&mut self) -> &mut Vec<InlineItem> {
        self.segments.last_mut().expect("collector always has a segment")
    }

    fn push_text(&mut self, text: String, style: RunStyle) {
        self.current().push(InlineItem::Text { text, style });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_model(paragraph_texts: &[&str]) -> DocumentModel {
        let mut model = DocumentModel { default_tab_width: 36.0, ..Default::default() };
        model.sections.push(Section::default());
        for (i, text) in paragraph_texts.iter().enumerate() {
            model.body.push(Block::Paragraph(Paragraph {
                uid: format!("p{}", i + 1),
                props: ParagraphProperties::default(),
                inlines: vec![Inline::Run(Run {
                    props: RunProperties::default(),
                    text: text.to_string(),
                })],
            }));
        }
        model
    }

    fn run_pipeline(model: &DocumentModel) -> UnifiedLayout {
        let fonts = FontContext::new();
        let mut diags = Diagnostics::new();
        let mut pipeline = LayoutPipeline::new(model, &fonts, &mut diags);
        pipeline.run(&PipelineOptions::default()).unwrap()
    }

    #[test]
    fn test_minimal_document_single_block() {
        // The §8.2 scenario A shape.
        let model = simple_model(&["Hello, world."]);
        let layout = run_pipeline(&model);

        assert_eq!(layout.total_pages(), 1);
        let page = &layout.pages[0];
        assert!((page.width - 595.3).abs() < 0.5);
        assert!((page.height - 841.9).abs() < 0.5);
        assert_eq!(page.blocks.len(), 1);

        let block = &page.blocks[0];
        assert_eq!(block.kind, BlockKind::Paragraph);
        assert!((block.frame.x - 72.0).abs() < 0.01);
        assert!((block.frame.y - 72.0).abs() < 0.01);
        assert!((block.frame.width - 451.3).abs() < 0.5);
        assert!((block.frame.height - 14.0).abs() < 1.5);

        let BlockContent::Paragraph(pl) = &block.content else { panic!() };
        assert_eq!(pl.text(), "Hello, world.");
    }

    #[test]
    fn test_round_trip_text_through_layout() {
        let model = simple_model(&["alpha beta gamma", "second paragraph here"]);
        let layout = run_pipeline(&model);
        let texts: Vec<String> = layout.pages[0]
            .blocks
            .iter()
            .filter_map(|b| match &b.content {
                BlockContent::Paragraph(pl) => Some(pl.text()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["alpha beta gamma", "second paragraph here"]);
    }

    #[test]
    fn test_many_paragraphs_paginate() {
        let texts: Vec<String> = (0..120)
            .map(|i| format!("Paragraph number {i} with a little bit of content to occupy the line."))
            .collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let model = simple_model(&refs);
        let layout = run_pipeline(&model);

        assert!(layout.total_pages() >= 2, "120 paragraphs must span pages");
        // Page numbers contiguous from 1.
        for (i, page) in layout.pages.iter().enumerate() {
            assert_eq!(page.number, i + 1);
        }
        // Blocks stay inside the content region.
        for page in &layout.pages {
            for block in &page.blocks {
                assert!(block.frame.y >= page.margins.top - 0.01);
                assert!(
                    block.frame.y + block.frame.height <= page.height - page.margins.bottom + 0.01,
                    "block {} bottom {} exceeds content bottom",
                    block.uid,
                    block.frame.y + block.frame.height
                );
            }
        }
    }

    #[test]
    fn test_page_break_before() {
        let mut model = simple_model(&["first", "second"]);
        if let Block::Paragraph(p) = &mut model.body[1] {
            p.props.page_break_before = Some(true);
        }
        let layout = run_pipeline(&model);
        assert_eq!(layout.total_pages(), 2);
        assert_eq!(layout.pages[0].blocks.len(), 1);
        assert_eq!(layout.pages[1].blocks.len(), 1);
    }

    #[test]
    fn test_explicit_page_break_inside_paragraph() {
        let mut model = simple_model(&[]);
        model.body.push(Block::Paragraph(Paragraph {
            uid: "p1".to_string(),
            props: ParagraphProperties::default(),
            inlines: vec![
                Inline::Run(Run { props: RunProperties::default(), text: "before".to_string() }),
                Inline::Break(BreakKind::Page),
                Inline::Run(Run { props: RunProperties::default(), text: "after".to_string() }),
            ],
        }));
        let layout = run_pipeline(&model);
        assert_eq!(layout.total_pages(), 2);
    }

    #[test]
    fn test_determinism() {
        let texts: Vec<String> = (0..40).map(|i| format!("Deterministic content {i}")).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let model = simple_model(&refs);
        let a = run_pipeline(&model);
        let b = run_pipeline(&model);
        assert_eq!(a.total_pages(), b.total_pages());
        for (pa, pb) in a.pages.iter().zip(&b.pages) {
            assert_eq!(pa.blocks.len(), pb.blocks.len());
            for (ba, bb) in pa.blocks.iter().zip(&pb.blocks) {
                assert_eq!(ba.frame, bb.frame);
                assert_eq!(ba.seq, bb.seq);
            }
        }
    }

    #[test]
    fn test_options_cache_key_distinguishes() {
        let a = PipelineOptions::default();
        let mut b = PipelineOptions::default();
        b.apply_headers_footers = false;
        assert_ne!(a.cache_key(), b.cache_key());
        let mut c = PipelineOptions::default();
        c.page_size = Some((612.0, 792.0));
        assert_ne!(a.cache_key(), c.cache_key());
        assert_eq!(a.cache_key(), PipelineOptions::default().cache_key());
    }

    #[test]
    fn test_header_reserves_space() {
        let mut model = simple_model(&["body text"]);
        model.headers.insert(
            "rId10".to_string(),
            vec![Block::Paragraph(Paragraph {
                uid: "h1".to_string(),
                props: ParagraphProperties::default(),
                inlines: vec![Inline::Run(Run {
                    props: RunProperties::default(),
                    text: "My Header".to_string(),
                })],
            })],
        );
        model.sections[0]
            .header_refs
            .insert(HdrFtrKind::Default, "rId10".to_string());

        let layout = run_pipeline(&model);
        let page = &layout.pages[0];
        assert_eq!(page.header_blocks.len(), 1);
        let header = &page.blocks[page.header_blocks[0]];
        assert_eq!(header.kind, BlockKind::Header);
        assert!((header.frame.y - 36.0).abs() < 0.01, "header sits at header distance");

        // Body starts below margin (header is small enough to fit inside it).
        let body = page.blocks.iter().find(|b| b.kind == BlockKind::Paragraph).unwrap();
        assert!(body.frame.y >= 72.0 - 0.01);
    }

    #[test]
    fn test_footnote_reserved_on_page() {
        let mut model = simple_model(&[]);
        model.footnotes.insert(
            "2".to_string(),
            vec![Block::Paragraph(Paragraph {
                uid: "fn1".to_string(),
                props: ParagraphProperties::default(),
                inlines: vec![Inline::Run(Run {
                    props: RunProperties::default(),
                    text: "the note text".to_string(),
                })],
            })],
        );
        model.body.push(Block::Paragraph(Paragraph {
            uid: "p1".to_string(),
            props: ParagraphProperties::default(),
            inlines: vec![
                Inline::Run(Run { props: RunProperties::default(), text: "body".to_string() }),
                Inline::FootnoteRef { id: "2".to_string(), props: RunProperties::default() },
            ],
        }));

        let layout = run_pipeline(&model);
        let page = &layout.pages[0];
        let note = page.blocks.iter().find(|b| b.kind == BlockKind::Footnotes).unwrap();
        let BlockContent::Paragraph(pl) = &note.content else { panic!() };
        assert_eq!(pl.text(), "the note text");
        assert_eq!(pl.marker.as_ref().unwrap().text, "1 ");
        // Note sits at the bottom of the content region.
        assert!(note.frame.y + note.frame.height <= page.height - page.margins.bottom + 0.5);
        let body = page.blocks.iter().find(|b| b.kind == BlockKind::Paragraph).unwrap();
        assert!(note.frame.y > body.frame.y);
    }

    #[test]
    fn test_keep_with_next_moves_heading() {
        // A heading with keepNext near the page bottom travels with the
        // paragraph that follows it.
        let filler = "Filler paragraph with enough words to take exactly one line of space.";
        let mut texts: Vec<String> = (0..54).map(|_| filler.to_string()).collect();
        texts.push("Heading".to_string());
        texts.push("Body after heading with several words in it".to_string());
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let mut model = simple_model(&refs);
        let n = model.body.len();
        if let Block::Paragraph(p) = &mut model.body[n - 2] {
            p.props.keep_next = Some(true);
            p.props.keep_lines = Some(true);
        }
        if let Block::Paragraph(p) = &mut model.body[n - 1] {
            p.props.keep_lines = Some(true);
        }

        let layout = run_pipeline(&model);
        // Wherever the heading ended up, the following body starts on the
        // same page.
        let mut heading_page = None;
        let mut body_page = None;
        for page in &layout.pages {
            for block in &page.blocks {
                if let BlockContent::Paragraph(pl) = &block.content {
                    let text = pl.text();
                    if text == "Heading" {
                        heading_page = Some(page.number);
                    }
                    if text.starts_with("Body after heading") && body_page.is_none() {
                        body_page = Some(page.number);
                    }
                }
            }
        }
        assert_eq!(heading_page.unwrap(), body_page.unwrap());
    }

    #[test]
    fn test_list_markers_in_layout() {
        use crate::model::numbering::*;
        let mut model = simple_model(&[]);
        model.numbering.abstracts.insert(
            0,
            AbstractNumbering {
                id: 0,
                levels: vec![NumberingLevel {
                    ilvl: 0,
                    format: NumFmt::Decimal,
                    text: "%1.".to_string(),
                    indent_left: Some(36.0),
                    indent_hanging: Some(18.0),
                    ..Default::default()
                }],
            },
        );
        model.numbering.instances.insert(
            1,
            NumberingInstance { num_id: 1, abstract_id: 0, overrides: Default::default() },
        );
        for i in 0..3 {
            model.body.push(Block::Paragraph(Paragraph {
                uid: format!("p{i}"),
                props: ParagraphProperties {
                    numbering: Some((1, 0)),
                    ..Default::default()
                },
                inlines: vec![Inline::Run(Run {
                    props: RunProperties::default(),
                    text: format!("item {i}"),
                })],
            }));
        }

        let layout = run_pipeline(&model);
        let markers: Vec<String> = layout.pages[0]
            .blocks
            .iter()
            .filter_map(|b| match &b.content {
                BlockContent::Paragraph(pl) => pl.marker.as_ref().map(|m| m.text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(markers, vec!["1.", "2.", "3."]);

        // List text is indented past the marker.
        let BlockContent::Paragraph(pl) = &layout.pages[0].blocks[0].content else { panic!() };
        assert!((pl.lines[0].offset_x - 36.0).abs() < 0.01);
        assert!((pl.marker.as_ref().unwrap().x - 18.0).abs() < 0.01);
    }

    #[test]
    fn test_justified_lines_fill_width() {
        let long = "lorem ipsum dolor sit amet consectetur adipiscing elit sed do eiusmod \
                    tempor incididunt ut labore et dolore magna aliqua ut enim ad minim veniam";
        let mut model = simple_model(&[long]);
        if let Block::Paragraph(p) = &mut model.body[0] {
            p.props.alignment = Some(Alignment::Justify);
        }
        let layout = run_pipeline(&model);
        let BlockContent::Paragraph(pl) = &layout.pages[0].blocks[0].content else { panic!() };
        assert!(pl.lines.len() >= 2);
        for line in &pl.lines[..pl.lines.len() - 1] {
            let last = line.boxes.last().unwrap();
            assert!(
                (last.x + last.width - line.available_width).abs() < 0.5,
                "justified line ends at {}, want {}",
                last.x + last.width,
                line.available_width
            );
        }
    }

    #[test]
    fn test_anchored_image_becomes_overlay() {
        let mut model = simple_model(&[]);
        model.body.push(Block::Paragraph(Paragraph {
            uid: "p1".to_string(),
            props: ParagraphProperties::default(),
            inlines: vec![
                Inline::Run(Run { props: RunProperties::default(), text: "text".to_string() }),
                Inline::Drawing(Drawing {
                    rel_id: None,
                    width: 100.0,
                    height: 50.0,
                    anchor: DrawingAnchor::Anchored {
                        offset_x: 400.0,
                        offset_y: 300.0,
                        relative_to_page: true,
                        behind_text: true,
                    },
                    content: DrawingContent::Image,
                }),
            ],
        }));
        let layout = run_pipeline(&model);
        let page = &layout.pages[0];
        // Watermark blocks come first in z-order.
        assert_eq!(page.blocks[0].kind, BlockKind::Watermark);
        assert!((page.blocks[0].frame.x - 400.0).abs() < 0.01);
        assert!((page.blocks[0].frame.y - 300.0).abs() < 0.01);
    }

    #[test]
    fn test_invariant_rejects_bad_page_numbers() {
        let model = simple_model(&["x"]);
        let fonts = FontContext::new();
        let mut diags = Diagnostics::new();
        let pipeline = LayoutPipeline::new(&model, &fonts, &mut diags);
        let pages = vec![LayoutPage {
            number: 2,
            width: 595.0,
            height: 842.0,
            margins: Edges::uniform(72.0),
            blocks: vec![],
            header_blocks: vec![],
            footer_blocks: vec![],
        }];
        assert!(pipeline.check_invariants(&pages).is_err());
    }
}
