//! # WordprocessingML Parser
//!
//! SAX-oriented parsing of the package's XML parts into the typed model.
//! A dispatch on qualified element names routes the streaming events to
//! handler functions; handlers buffer their children into owned vectors,
//! so memory stays bounded by the produced tree, not the XML text.
//!
//! Failure policy: a malformed `word/document.xml` is fatal; malformed
//! styles, numbering, header, footer, and note parts degrade to their
//! empty equivalents with a diagnostic, and unknown elements are skipped
//! with a debug log.

pub mod numbering;
pub mod styles;

use crate::error::{DocError, Diagnostics, Stage};
use crate::model::properties::*;
use crate::model::*;
use crate::package::{attr, rel_type_is, Package, TargetMode};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;

/// Parse an opened package into a [`DocumentModel`].
pub fn parse_document(package: &Package, diags: &mut Diagnostics) -> Result<DocumentModel, DocError> {
    let mut model = DocumentModel {
        default_tab_width: 36.0,
        ..Default::default()
    };

    // Styles and numbering degrade to empty tables on failure.
    if let Ok(bytes) = package.read_part("word/styles.xml") {
        model.styles = styles::parse_styles(bytes, diags);
    }
    if let Ok(bytes) = package.read_part("word/numbering.xml") {
        model.numbering = numbering::parse_numbering(bytes, diags);
    }
    if let Ok(bytes) = package.read_part("word/settings.xml") {
        parse_settings(bytes, &mut model);
    }
    if let Ok(bytes) = package.read_part("docProps/core.xml") {
        model.core = parse_core_properties(bytes);
    }

    let mut ctx = BodyCtx {
        package,
        source_part: "word/document.xml".to_string(),
        diags,
        uid_counter: 0,
        media: Vec::new(),
    };

    // The main document part. Well-formedness errors here are fatal.
    let doc_bytes = package.read_part("word/document.xml")?;
    let text = String::from_utf8_lossy(doc_bytes).into_owned();
    let mut reader = Reader::from_str(&text);
    let mut in_body = false;
    loop {
        match reader.read_event().map_err(|e| DocError::MalformedXml {
            part: "word/document.xml".to_string(),
            source: e,
        })? {
            Event::Start(e) if e.name().as_ref() == b"w:body" => {
                in_body = true;
                let (blocks, sections) =
                    ctx.parse_blocks(&mut reader, b"w:body").map_err(|e| DocError::MalformedXml {
                        part: "word/document.xml".to_string(),
                        source: e,
                    })?;
                model.body = blocks;
                model.sections = sections;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if !in_body {
        return Err(DocError::InvalidPackage(
            "word/document.xml has no w:body element".to_string(),
        ));
    }
    if model.sections.is_empty() {
        model.sections.push(Section::default());
    }

    // Header and footer parts, keyed by the relationship id the sections
    // reference them through. Broken parts degrade to empty content.
    // Sorted by id so element uids come out identical run to run.
    let mut header_rels: Vec<(String, String, bool)> = package
        .rels_from("word/document.xml")
        .filter(|r| r.mode == TargetMode::Internal)
        .filter_map(|r| {
            if rel_type_is(&r.rel_type, "header") {
                Some((r.id.clone(), r.target.clone(), true))
            } else if rel_type_is(&r.rel_type, "footer") {
                Some((r.id.clone(), r.target.clone(), false))
            } else {
                None
            }
        })
        .collect();
    header_rels.sort();
    for (rel_id, target, is_header) in header_rels {
        let blocks = ctx.parse_part_blocks(&target, if is_header { b"w:hdr" } else { b"w:ftr" });
        if is_header {
            model.headers.insert(rel_id, blocks);
        } else {
            model.footers.insert(rel_id, blocks);
        }
    }

    if package.has_part("word/footnotes.xml") {
        model.footnotes = ctx.parse_notes_part("word/footnotes.xml", b"w:footnote");
    }
    if package.has_part("word/endnotes.xml") {
        model.endnotes = ctx.parse_notes_part("word/endnotes.xml", b"w:endnote");
    }

    model.media = ctx.media;
    Ok(model)
}

/// Shared state for block-level parsing of one part.
struct BodyCtx<'a> {
    package: &'a Package,
    /// Part whose relationships resolve drawing/hyperlink ids.
    source_part: String,
    diags: &'a mut Diagnostics,
    uid_counter: usize,
    media: Vec<MediaEntry>,
}

type XmlResult<T> = Result<T, quick_xml::Error>;

impl<'a> BodyCtx<'a> {
    fn next_uid(&mut self, prefix: &str) -> String {
        self.uid_counter += 1;
        format!("{prefix}{}", self.uid_counter)
    }

    /// Parse a non-main part (header/footer) whose failures degrade.
    fn parse_part_blocks(&mut self, part: &str, root: &[u8]) -> Vec<Block> {
        let saved_source = std::mem::replace(&mut self.source_part, part.to_string());
        let result = (|| -> Result<Vec<Block>, String> {
            let bytes = self.package.read_part(part).map_err(|e| e.to_string())?;
            let text = String::from_utf8_lossy(bytes).into_owned();
            let mut reader = Reader::from_str(&text);
            loop {
                match reader.read_event().map_err(|e| e.to_string())? {
                    Event::Start(e) if e.name().as_ref() == root => {
                        let (blocks, _) =
                            self.parse_blocks(&mut reader, root).map_err(|e| e.to_string())?;
                        return Ok(blocks);
                    }
                    Event::Eof => return Ok(Vec::new()),
                    _ => {}
                }
            }
        })();
        self.source_part = saved_source;
        match result {
            Ok(blocks) => blocks,
            Err(e) => {
                self.diags.warn(
                    Stage::Parse,
                    Some(part),
                    format!("malformed part, treating as empty: {e}"),
                );
                Vec::new()
            }
        }
    }

    /// Parse footnotes.xml / endnotes.xml into id → block content.
    fn parse_notes_part(&mut self, part: &str, note_tag: &[u8]) -> HashMap<String, Vec<Block>> {
        let saved_source = std::mem::replace(&mut self.source_part, part.to_string());
        let mut notes = HashMap::new();
        let result = (|| -> Result<(), String> {
            let bytes = self.package.read_part(part).map_err(|e| e.to_string())?;
            let text = String::from_utf8_lossy(bytes).into_owned();
            let mut reader = Reader::from_str(&text);
            loop {
                match reader.read_event().map_err(|e| e.to_string())? {
                    Event::Start(e) if e.name().as_ref() == note_tag => {
                        let id = attr(&e, b"w:id").unwrap_or_default();
                        // Separator/continuation pseudo-notes carry a w:type.
                        let is_content = attr(&e, b"w:type").is_none();
                        let (blocks, _) =
                            self.parse_blocks(&mut reader, note_tag).map_err(|e| e.to_string())?;
                        if is_content {
                            notes.insert(id, blocks);
                        }
                    }
                    Event::Eof => return Ok(()),
                    _ => {}
                }
            }
        })();
        self.source_part = saved_source;
        if let Err(e) = result {
            self.diags.warn(
                Stage::Parse,
                Some(part),
                format!("malformed notes part, notes dropped: {e}"),
            );
            return HashMap::new();
        }
        notes
    }

    /// Parse block-level children until the closing tag of `end_tag`.
    /// Returns the blocks plus any sections closed within them.
    fn parse_blocks(
        &mut self,
        reader: &mut Reader<&[u8]>,
        end_tag: &[u8],
    ) -> XmlResult<(Vec<Block>, Vec<Section>)> {
        let mut blocks = Vec::new();
        let mut sections = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(e) => match e.name().as_ref() {
                    b"w:p" => {
                        let (paragraph, section) = self.parse_paragraph(reader)?;
                        blocks.push(Block::Paragraph(paragraph));
                        if let Some(mut s) = section {
                            s.end_block = blocks.len();
                            sections.push(s);
                        }
                    }
                    b"w:tbl" => {
                        let table = self.parse_table(reader)?;
                        blocks.push(Block::Table(table));
                    }
                    b"w:sectPr" => {
                        let mut section = parse_sectpr(reader)?;
                        section.end_block = usize::MAX;
                        sections.push(section);
                    }
                    other => {
                        log::debug!("skipping unknown block element {}", String::from_utf8_lossy(other));
                        let name = other.to_vec();
                        skip_subtree(reader, &name);
                    }
                },
                // Self-closing empty paragraph.
                Event::Empty(e) if e.name().as_ref() == b"w:p" => {
                    blocks.push(Block::Paragraph(Paragraph {
                        uid: self.next_uid("p"),
                        ..Default::default()
                    }));
                }
                Event::End(e) if e.name().as_ref() == end_tag => break,
                Event::Eof => break,
                _ => {}
            }
        }

        Ok((blocks, sections))
    }

    /// Parse one `w:p`. Returns the paragraph and, when its `w:pPr` carried
    /// a `w:sectPr`, the section it closes.
    fn parse_paragraph(&mut self, reader: &mut Reader<&[u8]>) -> XmlResult<(Paragraph, Option<Section>)> {
        let mut paragraph = Paragraph {
            uid: self.next_uid("p"),
            ..Default::default()
        };
        let mut section = None;
        let mut field: FieldAssembly = FieldAssembly::Idle;

        loop {
            match reader.read_event()? {
                Event::Start(e) => match e.name().as_ref() {
                    b"w:pPr" => {
                        section = parse_ppr_into(reader, &mut paragraph.props);
                    }
                    b"w:r" => {
                        let items = self.parse_run(reader)?;
                        self.assemble_run_items(items, &mut paragraph.inlines, &mut field);
                    }
                    b"w:hyperlink" => {
                        let target = attr(&e, b"r:id").and_then(|id| {
                            self.package
                                .resolve_rel(&self.source_part, &id)
                                .map(|r| r.target.clone())
                        });
                        let children = self.parse_hyperlink_children(reader)?;
                        paragraph.inlines.push(Inline::Hyperlink { target, children });
                    }
                    b"w:fldSimple" => {
                        let instruction = attr(&e, b"w:instr").unwrap_or_default();
                        let (cached, props) = self.parse_fld_simple(reader)?;
                        paragraph.inlines.push(Inline::Field(Field {
                            kind: FieldKind::from_instruction(&instruction),
                            instruction,
                            cached,
                            props,
                        }));
                    }
                    // Transparent markup-compatibility containers: take the
                    // Choice branch, drop the Fallback.
                    b"mc:AlternateContent" | b"mc:Choice" => {}
                    b"mc:Fallback" => skip_subtree(reader, b"mc:Fallback"),
                    other => {
                        let name = other.to_vec();
                        skip_subtree(reader, &name);
                    }
                },
                Event::Empty(e) if e.name().as_ref() == b"w:fldSimple" => {
                    let instruction = attr(&e, b"w:instr").unwrap_or_default();
                    paragraph.inlines.push(Inline::Field(Field {
                        kind: FieldKind::from_instruction(&instruction),
                        instruction,
                        cached: None,
                        props: RunProperties::default(),
                    }));
                }
                Event::End(e) if e.name().as_ref() == b"w:p" => break,
                Event::Eof => break,
                _ => {}
            }
        }

        // An unterminated complex field keeps whatever was collected.
        if let FieldAssembly::Result { instruction, cached, props }
        | FieldAssembly::Instruction { instruction, cached, props } = field
        {
            paragraph.inlines.push(Inline::Field(Field {
                kind: FieldKind::from_instruction(&instruction),
                instruction,
                cached: if cached.is_empty() { None } else { Some(cached) },
                props,
            }));
        }

        Ok((paragraph, section))
    }

    fn parse_hyperlink_children(&mut self, reader: &mut Reader<&[u8]>) -> XmlResult<Vec<Inline>> {
        let mut inlines = Vec::new();
        let mut field = FieldAssembly::Idle;
        loop {
            match reader.read_event()? {
                Event::Start(e) => match e.name().as_ref() {
                    b"w:r" => {
                        let items = self.parse_run(reader)?;
                        self.assemble_run_items(items, &mut inlines, &mut field);
                    }
                    other => {
                        let name = other.to_vec();
                        skip_subtree(reader, &name);
                    }
                },
                Event::End(e) if e.name().as_ref() == b"w:hyperlink" => break,
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(inlines)
    }

    fn parse_fld_simple(
        &mut self,
        reader: &mut Reader<&[u8]>,
    ) -> XmlResult<(Option<String>, RunProperties)> {
        let mut cached = String::new();
        let mut props = RunProperties::default();
        let mut got_props = false;
        loop {
            match reader.read_event()? {
                Event::Start(e) if e.name().as_ref() == b"w:r" => {
                    for item in self.parse_run(reader)? {
                        if let RunItem::Text(text, run_props) = item {
                            cached.push_str(&text);
                            if !got_props {
                                props = run_props;
                                got_props = true;
                            }
                        }
                    }
                }
                Event::End(e) if e.name().as_ref() == b"w:fldSimple" => break,
                Event::Eof => break,
                _ => {}
            }
        }
        let cached = if cached.is_empty() { None } else { Some(cached) };
        Ok((cached, props))
    }

    /// Parse the contents of one `w:r` into raw items; the paragraph-level
    /// assembler merges text and drives the complex-field state machine.
    fn parse_run(&mut self, reader: &mut Reader<&[u8]>) -> XmlResult<Vec<RunItem>> {
        let mut props = RunProperties::default();
        let mut items = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(e) => match e.name().as_ref() {
                    b"w:rPr" => parse_rpr_into(reader, &mut props),
                    b"w:t" | b"w:delText" => {
                        let text = read_text(reader, e.name().as_ref())?;
                        items.push(RunItem::Text(text, props.clone()));
                    }
                    b"w:instrText" => {
                        let text = read_text(reader, b"w:instrText")?;
                        items.push(RunItem::InstrText(text));
                    }
                    b"w:drawing" => {
                        if let Some(drawing) = self.parse_drawing(reader)? {
                            items.push(RunItem::Drawing(drawing));
                        }
                    }
                    b"w:pict" => {
                        if let Some(drawing) = self.parse_vml_pict(reader)? {
                            items.push(RunItem::Drawing(drawing));
                        }
                    }
                    b"mc:AlternateContent" | b"mc:Choice" => {}
                    b"mc:Fallback" => skip_subtree(reader, b"mc:Fallback"),
                    other => {
                        let name = other.to_vec();
                        skip_subtree(reader, &name);
                    }
                },
                Event::Empty(e) => match e.name().as_ref() {
                    b"w:tab" => items.push(RunItem::Tab),
                    b"w:br" => {
                        let kind = match attr(&e, b"w:type").as_deref() {
                            Some("page") => BreakKind::Page,
                            Some("column") => BreakKind::Column,
                            _ => BreakKind::Line,
                        };
                        items.push(RunItem::Break(kind));
                    }
                    b"w:cr" => items.push(RunItem::Break(BreakKind::Line)),
                    b"w:noBreakHyphen" => items.push(RunItem::Text("\u{2011}".to_string(), props.clone())),
                    b"w:softHyphen" => items.push(RunItem::Text("\u{00AD}".to_string(), props.clone())),
                    b"w:fldChar" => {
                        let kind = match attr(&e, b"w:fldCharType").as_deref() {
                            Some("begin") => FldCharKind::Begin,
                            Some("separate") => FldCharKind::Separate,
                            _ => FldCharKind::End,
                        };
                        items.push(RunItem::FldChar(kind, props.clone()));
                    }
                    b"w:footnoteReference" => {
                        if let Some(id) = attr(&e, b"w:id") {
                            items.push(RunItem::FootnoteRef(id, props.clone()));
                        }
                    }
                    b"w:endnoteReference" => {
                        if let Some(id) = attr(&e, b"w:id") {
                            items.push(RunItem::EndnoteRef(id, props.clone()));
                        }
                    }
                    _ => {}
                },
                Event::End(e) if e.name().as_ref() == b"w:r" => break,
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(items)
    }

    /// Fold raw run items into paragraph inlines, merging contiguous
    /// same-property text and collapsing complex fields. While a complex
    /// field is open, text routes into it instead of the paragraph.
    fn assemble_run_items(
        &mut self,
        items: Vec<RunItem>,
        inlines: &mut Vec<Inline>,
        field: &mut FieldAssembly,
    ) {
        for item in items {
            match item {
                RunItem::FldChar(FldCharKind::Begin, props) => {
                    // A begin inside an open field restarts collection.
                    *field = FieldAssembly::Instruction {
                        instruction: String::new(),
                        cached: String::new(),
                        props,
                    };
                }
                RunItem::FldChar(FldCharKind::Separate, _) => field.to_result(),
                RunItem::FldChar(FldCharKind::End, _) => {
                    if let Some(f) = field.finish() {
                        inlines.push(Inline::Field(f));
                    }
                }
                RunItem::InstrText(text) => field.push_instruction(&text),
                RunItem::Text(text, props) => {
                    if !field.absorb_text(&text) {
                        push_text(inlines, text, props);
                    }
                }
                RunItem::Tab if field.is_idle() => inlines.push(Inline::Tab),
                RunItem::Break(kind) if field.is_idle() => inlines.push(Inline::Break(kind)),
                RunItem::Drawing(d) if field.is_idle() => inlines.push(Inline::Drawing(d)),
                RunItem::FootnoteRef(id, props) if field.is_idle() => {
                    inlines.push(Inline::FootnoteRef { id, props });
                }
                RunItem::EndnoteRef(id, props) if field.is_idle() => {
                    inlines.push(Inline::EndnoteRef { id, props });
                }
                // Non-text content inside an open field is dropped.
                _ => {}
            }
        }
    }

    /// `w:drawing`: inline or anchored image / DrawingML text box.
    fn parse_drawing(&mut self, reader: &mut Reader<&[u8]>) -> XmlResult<Option<Drawing>> {
        let mut anchor = DrawingAnchor::Inline;
        let mut width = 0.0f64;
        let mut height = 0.0f64;
        let mut rel_id: Option<String> = None;
        let mut textbox: Option<Vec<Block>> = None;

        // Anchored position accumulators.
        let mut offset_x = 0.0f64;
        let mut offset_y = 0.0f64;
        let mut relative_to_page = false;
        let mut behind_text = false;
        let mut is_anchored = false;
        let mut pos_axis: Option<bool> = None; // Some(true) = horizontal

        loop {
            match reader.read_event()? {
                Event::Start(e) => match e.name().as_ref() {
                    b"wp:anchor" => {
                        is_anchored = true;
                        behind_text =
                            matches!(attr(&e, b"behindDoc").as_deref(), Some("1") | Some("true"));
                    }
                    b"wp:inline" => is_anchored = false,
                    b"wp:positionH" => {
                        pos_axis = Some(true);
                        if attr(&e, b"relativeFrom").as_deref() == Some("page") {
                            relative_to_page = true;
                        }
                    }
                    b"wp:positionV" => pos_axis = Some(false),
                    b"wp:posOffset" => {
                        let text = read_text(reader, b"wp:posOffset")?;
                        let emu: f64 = text.trim().parse().unwrap_or(0.0);
                        match pos_axis {
                            Some(true) => offset_x = units::emu_to_points(emu),
                            Some(false) => offset_y = units::emu_to_points(emu),
                            None => {}
                        }
                    }
                    b"w:txbxContent" => {
                        let (blocks, _) = self.parse_blocks(reader, b"w:txbxContent")?;
                        textbox = Some(blocks);
                    }
                    _ => {}
                },
                Event::Empty(e) => match e.name().as_ref() {
                    b"wp:extent" => {
                        width = attr(&e, b"cx")
                            .and_then(|v| v.parse::<f64>().ok())
                            .map(units::emu_to_points)
                            .unwrap_or(0.0);
                        height = attr(&e, b"cy")
                            .and_then(|v| v.parse::<f64>().ok())
                            .map(units::emu_to_points)
                            .unwrap_or(0.0);
                    }
                    b"a:blip" => {
                        rel_id = attr(&e, b"r:embed").or_else(|| attr(&e, b"r:link"));
                    }
                    _ => {}
                },
                Event::End(e) => match e.name().as_ref() {
                    b"w:drawing" => break,
                    b"wp:positionH" | b"wp:positionV" => pos_axis = None,
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }

        if is_anchored {
            anchor = DrawingAnchor::Anchored { offset_x, offset_y, relative_to_page, behind_text };
        }

        let content = match textbox {
            Some(blocks) => DrawingContent::TextBox(blocks),
            None => DrawingContent::Image,
        };

        if matches!(content, DrawingContent::Image) {
            match rel_id.take() {
                Some(id) => match self.register_media(&id) {
                    Some(canonical) => rel_id = Some(canonical),
                    None => {
                        self.diags.warn(
                            Stage::Parse,
                            Some(&id),
                            "drawing references a missing image part; placeholder will render",
                        );
                    }
                },
                None => {
                    // A drawing with neither image nor text content.
                    if width <= 0.0 || height <= 0.0 {
                        return Ok(None);
                    }
                }
            }
        }

        Ok(Some(Drawing { rel_id, width, height, anchor, content }))
    }

    /// Legacy VML fallback (`w:pict`): only text boxes are recovered.
    fn parse_vml_pict(&mut self, reader: &mut Reader<&[u8]>) -> XmlResult<Option<Drawing>> {
        let mut textbox: Option<Vec<Block>> = None;
        loop {
            match reader.read_event()? {
                Event::Start(e) if e.name().as_ref() == b"w:txbxContent" => {
                    let (blocks, _) = self.parse_blocks(reader, b"w:txbxContent")?;
                    textbox = Some(blocks);
                }
                Event::End(e) if e.name().as_ref() == b"w:pict" => break,
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(textbox.map(|blocks| Drawing {
            rel_id: None,
            width: 0.0,
            height: 0.0,
            anchor: DrawingAnchor::Inline,
            content: DrawingContent::TextBox(blocks),
        }))
    }

    /// Resolve an image relationship, copy its bytes into the media table,
    /// and return the canonical media key (deduplicated by part path).
    fn register_media(&mut self, rel_id: &str) -> Option<String> {
        let rel = self.package.resolve_rel(&self.source_part, rel_id)?;
        if rel.mode == TargetMode::External {
            return None;
        }
        let path = rel.target.clone();
        if let Some(existing) = self.media.iter().find(|m| m.path == path) {
            return Some(existing.rel_id.clone());
        }
        let bytes = self.package.read_part(&path).ok()?.to_vec();
        let content_type = self
            .package
            .content_type(&path)
            .unwrap_or("application/octet-stream")
            .to_string();
        // Relationship ids can repeat across parts; disambiguate on clash.
        let key = if self.media.iter().any(|m| m.rel_id == rel_id) {
            format!("{rel_id}.{}", self.media.len())
        } else {
            rel_id.to_string()
        };
        self.media.push(MediaEntry { rel_id: key.clone(), path, content_type, bytes });
        Some(key)
    }

    // ── Tables ──────────────────────────────────────────────────

    fn parse_table(&mut self, reader: &mut Reader<&[u8]>) -> XmlResult<Table> {
        let mut table = Table {
            uid: self.next_uid("t"),
            ..Default::default()
        };

        loop {
            match reader.read_event()? {
                Event::Start(e) => match e.name().as_ref() {
                    b"w:tblPr" => table.props = parse_table_props(reader)?,
                    b"w:tblGrid" => table.grid = parse_table_grid(reader)?,
                    b"w:tr" => table.rows.push(self.parse_row(reader)?),
                    other => {
                        let name = other.to_vec();
                        skip_subtree(reader, &name);
                    }
                },
                Event::End(e) if e.name().as_ref() == b"w:tbl" => break,
                Event::Eof => break,
                _ => {}
            }
        }

        self.repair_vertical_merges(&mut table);
        Ok(table)
    }

    fn parse_row(&mut self, reader: &mut Reader<&[u8]>) -> XmlResult<Row> {
        let mut row = Row::default();
        loop {
            match reader.read_event()? {
                Event::Start(e) => match e.name().as_ref() {
                    b"w:trPr" => row.props = parse_row_props(reader)?,
                    b"w:tc" => row.cells.push(self.parse_cell(reader)?),
                    other => {
                        let name = other.to_vec();
                        skip_subtree(reader, &name);
                    }
                },
                Event::End(e) if e.name().as_ref() == b"w:tr" => break,
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(row)
    }

    fn parse_cell(&mut self, reader: &mut Reader<&[u8]>) -> XmlResult<Cell> {
        let mut cell = Cell {
            props: CellProperties { grid_span: 1, ..Default::default() },
            blocks: Vec::new(),
        };
        loop {
            match reader.read_event()? {
                Event::Start(e) => match e.name().as_ref() {
                    b"w:tcPr" => cell.props = parse_cell_props(reader)?,
                    b"w:p" => {
                        let (paragraph, _) = self.parse_paragraph(reader)?;
                        cell.blocks.push(Block::Paragraph(paragraph));
                    }
                    b"w:tbl" => {
                        let nested = self.parse_table(reader)?;
                        cell.blocks.push(Block::Table(nested));
                    }
                    other => {
                        let name = other.to_vec();
                        skip_subtree(reader, &name);
                    }
                },
                Event::Empty(e) if e.name().as_ref() == b"w:p" => {
                    cell.blocks.push(Block::Paragraph(Paragraph {
                        uid: self.next_uid("p"),
                        ..Default::default()
                    }));
                }
                Event::End(e) if e.name().as_ref() == b"w:tc" => break,
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(cell)
    }

    /// Enforce the merge invariant: every `continue` cell needs a `restart`
    /// above it in the same grid column. Orphans downgrade to plain cells.
    fn repair_vertical_merges(&mut self, table: &mut Table) {
        let cols = table.column_count();
        let mut open = vec![false; cols];
        let uid = table.uid.clone();

        for row in &mut table.rows {
            let mut col = 0usize;
            for cell in &mut row.cells {
                let span = cell.props.grid_span.max(1);
                if col >= cols {
                    break;
                }
                match cell.props.vertical_merge {
                    VerticalMerge::Restart => {
                        for c in col..(col + span).min(cols) {
                            open[c] = true;
                        }
                    }
                    VerticalMerge::Continue => {
                        if !open[col] {
                            self.diags.warn(
                                Stage::Parse,
                                Some(&uid),
                                "vMerge continue without a restart above; treating as a normal cell",
                            );
                            cell.props.vertical_merge = VerticalMerge::None;
                        }
                    }
                    VerticalMerge::None => {
                        for c in col..(col + span).min(cols) {
                            open[c] = false;
                        }
                    }
                }
                col += span;
            }
        }
    }

}

/// Parse `w:sectPr` into section geometry and header/footer references.
fn parse_sectpr(reader: &mut Reader<&[u8]>) -> XmlResult<Section> {
    let mut section = Section::default();
    loop {
        match reader.read_event()? {
            Event::Empty(e) => match e.name().as_ref() {
                b"w:pgSz" => {
                    if let Some(w) = attr(&e, b"w:w").and_then(|v| v.parse::<f64>().ok()) {
                        section.page_width = units::twips_to_points(w);
                    }
                    if let Some(h) = attr(&e, b"w:h").and_then(|v| v.parse::<f64>().ok()) {
                        section.page_height = units::twips_to_points(h);
                    }
                }
                b"w:pgMar" => {
                    let get = |key: &[u8]| {
                        attr(&e, key).and_then(|v| v.parse::<f64>().ok()).map(units::twips_to_points)
                    };
                    if let Some(v) = get(b"w:top") {
                        section.margin.top = v;
                    }
                    if let Some(v) = get(b"w:right") {
                        section.margin.right = v;
                    }
                    if let Some(v) = get(b"w:bottom") {
                        section.margin.bottom = v;
                    }
                    if let Some(v) = get(b"w:left") {
                        section.margin.left = v;
                    }
                    if let Some(v) = get(b"w:header") {
                        section.header_distance = v;
                    }
                    if let Some(v) = get(b"w:footer") {
                        section.footer_distance = v;
                    }
                }
                b"w:cols" => {
                    if let Some(n) = attr(&e, b"w:num").and_then(|v| v.parse().ok()) {
                        section.columns = n;
                    }
                }
                b"w:headerReference" => {
                    let kind = HdrFtrKind::parse(&attr(&e, b"w:type").unwrap_or_default());
                    if let Some(id) = attr(&e, b"r:id") {
                        section.header_refs.insert(kind, id);
                    }
                }
                b"w:footerReference" => {
                    let kind = HdrFtrKind::parse(&attr(&e, b"w:type").unwrap_or_default());
                    if let Some(id) = attr(&e, b"r:id") {
                        section.footer_refs.insert(kind, id);
                    }
                }
                _ => {}
            },
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                skip_subtree(reader, &name);
            }
            Event::End(e) if e.name().as_ref() == b"w:sectPr" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(section)
}

/// Raw content of one `w:r` before paragraph-level assembly.
enum RunItem {
    Text(String, RunProperties),
    Tab,
    Break(BreakKind),
    Drawing(Drawing),
    FootnoteRef(String, RunProperties),
    EndnoteRef(String, RunProperties),
    FldChar(FldCharKind, RunProperties),
    InstrText(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FldCharKind {
    Begin,
    Separate,
    End,
}

/// Complex-field state machine across the runs of a paragraph.
enum FieldAssembly {
    Idle,
    Instruction { instruction: String, cached: String, props: RunProperties },
    Result { instruction: String, cached: String, props: RunProperties },
}

impl FieldAssembly {
    fn is_idle(&self) -> bool {
        matches!(self, FieldAssembly::Idle)
    }

    /// Collect instruction text; a no-op outside the instruction phase.
    fn push_instruction(&mut self, text: &str) {
        if let FieldAssembly::Instruction { instruction, .. } = self {
            instruction.push_str(text);
        }
    }

    /// Route text into the open field's cached result. Returns false when
    /// no field is open and the text belongs to the paragraph.
    fn absorb_text(&mut self, text: &str) -> bool {
        match self {
            FieldAssembly::Idle => false,
            FieldAssembly::Instruction { .. } => true, // stray text, dropped
            FieldAssembly::Result { cached, .. } => {
                cached.push_str(text);
                true
            }
        }
    }

    fn to_result(&mut self) {
        if let FieldAssembly::Instruction { instruction, cached, props } =
            std::mem::replace(self, FieldAssembly::Idle)
        {
            *self = FieldAssembly::Result { instruction, cached, props };
        }
    }

    fn finish(&mut self) -> Option<Field> {
        match std::mem::replace(self, FieldAssembly::Idle) {
            FieldAssembly::Idle => None,
            FieldAssembly::Instruction { instruction, cached, props }
            | FieldAssembly::Result { instruction, cached, props } => Some(Field {
                kind: FieldKind::from_instruction(&instruction),
                instruction,
                cached: if cached.is_empty() { None } else { Some(cached) },
                props,
            }),
        }
    }
}

/// Append text to the inline list, merging into the previous run when the
/// properties match (keeps runs maximal).
fn push_text(inlines: &mut Vec<Inline>, text: String, props: RunProperties) {
    if let Some(Inline::Run(last)) = inlines.last_mut() {
        if last.props == props {
            last.text.push_str(&text);
            return;
        }
    }
    inlines.push(Inline::Run(Run { props, text }));
}

/// Read character data until the closing tag of `end_tag`, unescaping
/// entities. `xml:space="preserve"` needs no special casing because text
/// is never trimmed.
fn read_text(reader: &mut Reader<&[u8]>, end_tag: &[u8]) -> XmlResult<String> {
    let mut out = String::new();
    loop {
        match reader.read_event()? {
            Event::Text(t) => out.push_str(&t.unescape()?),
            Event::End(e) if e.name().as_ref() == end_tag => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

/// Skip everything up to the matching close of `name`, tracking nesting.
pub(crate) fn skip_subtree(reader: &mut Reader<&[u8]>, name: &[u8]) {
    let mut depth = 1usize;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == name => depth += 1,
            Ok(Event::End(e)) if e.name().as_ref() == name => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }
}

/// `w:val` explicitly set to "0"/"false"/"none" turns the toggle off.
fn val_is_off(e: &BytesStart) -> bool {
    matches!(attr(e, b"w:val").as_deref(), Some("0") | Some("false") | Some("none"))
}

/// Parse `w:pPr` contents into `props`; returns a section when the
/// properties carry a `w:sectPr` (a section break on this paragraph).
pub(crate) fn parse_ppr_into(
    reader: &mut Reader<&[u8]>,
    props: &mut ParagraphProperties,
) -> Option<Section> {
    let mut section = None;
    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:pStyle" => props.style_id = attr(&e, b"w:val"),
                b"w:jc" => props.alignment = attr(&e, b"w:val").and_then(|v| Alignment::parse(&v)),
                b"w:ind" => {
                    let get = |a: &[u8], b: &[u8]| {
                        attr(&e, a)
                            .or_else(|| attr(&e, b))
                            .and_then(|v| v.parse::<f64>().ok())
                            .map(units::twips_to_points)
                    };
                    if let Some(v) = get(b"w:left", b"w:start") {
                        props.indent_left = Some(v);
                    }
                    if let Some(v) = get(b"w:right", b"w:end") {
                        props.indent_right = Some(v);
                    }
                    if let Some(v) = get(b"w:firstLine", b"w:firstLine") {
                        props.indent_first_line = Some(v);
                    }
                    if let Some(v) = get(b"w:hanging", b"w:hanging") {
                        props.indent_hanging = Some(v);
                    }
                }
                b"w:spacing" => {
                    if let Some(v) = attr(&e, b"w:before").and_then(|v| v.parse::<f64>().ok()) {
                        props.spacing_before = Some(units::twips_to_points(v));
                    }
                    if let Some(v) = attr(&e, b"w:after").and_then(|v| v.parse::<f64>().ok()) {
                        props.spacing_after = Some(units::twips_to_points(v));
                    }
                    if let Some(line) = attr(&e, b"w:line").and_then(|v| v.parse::<f64>().ok()) {
                        props.line_spacing = Some(match attr(&e, b"w:lineRule").as_deref() {
                            Some("exact") => LineSpacing::Exact(units::twips_to_points(line)),
                            Some("atLeast") => LineSpacing::AtLeast(units::twips_to_points(line)),
                            // `auto`: the value counts 240ths of a line.
                            _ => LineSpacing::Multiple(line / 240.0),
                        });
                    }
                }
                b"w:keepNext" => props.keep_next = Some(!val_is_off(&e)),
                b"w:keepLines" => props.keep_lines = Some(!val_is_off(&e)),
                b"w:pageBreakBefore" => props.page_break_before = Some(!val_is_off(&e)),
                b"w:widowControl" => props.widow_control = Some(!val_is_off(&e)),
                b"w:shd" => {
                    props.shading = attr(&e, b"w:fill")
                        .filter(|v| v != "auto")
                        .and_then(|v| Color::from_hex(&v));
                }
                _ => {}
            },
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:numPr" => props.numbering = parse_numpr(reader),
                b"w:pBdr" => props.borders = Some(parse_borders(reader, b"w:pBdr")),
                b"w:tabs" => props.tabs = Some(parse_tabs(reader)),
                b"w:sectPr" => section = parse_sectpr(reader).ok(),
                b"w:rPr" => skip_subtree(reader, b"w:rPr"),
                other => {
                    let name = other.to_vec();
                    skip_subtree(reader, &name);
                }
            },
            Ok(Event::End(e)) if e.name().as_ref() == b"w:pPr" => break,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }
    section
}

fn parse_numpr(reader: &mut Reader<&[u8]>) -> Option<(i64, usize)> {
    let mut num_id = None;
    let mut ilvl = 0usize;
    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:numId" => num_id = attr(&e, b"w:val").and_then(|v| v.parse().ok()),
                b"w:ilvl" => ilvl = attr(&e, b"w:val").and_then(|v| v.parse().ok()).unwrap_or(0),
                _ => {}
            },
            Ok(Event::End(e)) if e.name().as_ref() == b"w:numPr" => break,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }
    // numId 0 means "no list".
    num_id.filter(|&id| id != 0).map(|id| (id, ilvl))
}

fn parse_border_edge(e: &BytesStart) -> Option<BorderEdge> {
    if matches!(attr(e, b"w:val").as_deref(), Some("none") | Some("nil")) {
        return None;
    }
    let width = attr(e, b"w:sz")
        .and_then(|v| v.parse::<f64>().ok())
        .map(units::eighth_points_to_points)
        .unwrap_or(0.5);
    let color = attr(e, b"w:color")
        .filter(|v| v != "auto")
        .and_then(|v| Color::from_hex(&v))
        .unwrap_or(Color::BLACK);
    Some(BorderEdge { width, color })
}

pub(crate) fn parse_borders(reader: &mut Reader<&[u8]>, end_tag: &[u8]) -> Borders {
    let mut borders = Borders::default();
    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:top" => borders.top = parse_border_edge(&e),
                b"w:bottom" => borders.bottom = parse_border_edge(&e),
                b"w:left" | b"w:start" => borders.left = parse_border_edge(&e),
                b"w:right" | b"w:end" => borders.right = parse_border_edge(&e),
                _ => {}
            },
            Ok(Event::End(e)) if e.name().as_ref() == end_tag => break,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }
    borders
}

fn parse_tabs(reader: &mut Reader<&[u8]>) -> Vec<TabStop> {
    let mut tabs = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) if e.name().as_ref() == b"w:tab" => {
                let kind = match attr(&e, b"w:val").as_deref() {
                    Some("center") => TabKind::Center,
                    Some("right") | Some("end") => TabKind::Right,
                    Some("clear") => TabKind::Clear,
                    _ => TabKind::Left,
                };
                let position = attr(&e, b"w:pos")
                    .and_then(|v| v.parse::<f64>().ok())
                    .map(units::twips_to_points)
                    .unwrap_or(0.0);
                let leader = match attr(&e, b"w:leader").as_deref() {
                    Some("dot") => TabLeader::Dot,
                    _ => TabLeader::None,
                };
                tabs.push(TabStop { position, kind, leader });
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"w:tabs" => break,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }
    tabs.sort_by(|a, b| a.position.partial_cmp(&b.position).unwrap_or(std::cmp::Ordering::Equal));
    tabs
}

/// Parse `w:rPr` contents into `props`.
pub(crate) fn parse_rpr_into(reader: &mut Reader<&[u8]>, props: &mut RunProperties) {
    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:rFonts" => {
                    props.font_family = attr(&e, b"w:ascii").or_else(|| attr(&e, b"w:hAnsi"));
                }
                b"w:sz" => {
                    props.size = attr(&e, b"w:val")
                        .and_then(|v| v.parse::<f64>().ok())
                        .map(units::half_points_to_points);
                }
                b"w:b" => props.bold = Some(!val_is_off(&e)),
                b"w:i" => props.italic = Some(!val_is_off(&e)),
                b"w:u" => props.underline = Some(!val_is_off(&e)),
                b"w:strike" => props.strike = Some(!val_is_off(&e)),
                b"w:color" => {
                    props.color = attr(&e, b"w:val")
                        .filter(|v| v != "auto")
                        .and_then(|v| Color::from_hex(&v));
                }
                b"w:highlight" => {
                    props.highlight = attr(&e, b"w:val")
                        .filter(|v| v != "none")
                        .and_then(|v| Color::from_highlight_name(&v));
                }
                b"w:vertAlign" => {
                    props.vert_align = match attr(&e, b"w:val").as_deref() {
                        Some("superscript") => Some(VertAlign::Superscript),
                        Some("subscript") => Some(VertAlign::Subscript),
                        Some("baseline") => Some(VertAlign::Baseline),
                        _ => None,
                    };
                }
                b"w:lang" => props.lang = attr(&e, b"w:val"),
                _ => {}
            },
            Ok(Event::Start(e)) => {
                let name = e.name().as_ref().to_vec();
                skip_subtree(reader, &name);
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"w:rPr" => break,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }
}

fn parse_table_props(reader: &mut Reader<&[u8]>) -> XmlResult<TableProperties> {
    let mut props = TableProperties::default();
    loop {
        match reader.read_event()? {
            Event::Empty(e) if e.name().as_ref() == b"w:tblW" => {
                props.width = parse_measure(&e);
            }
            Event::Start(e) => match e.name().as_ref() {
                b"w:tblBorders" => props.borders = Some(parse_borders(reader, b"w:tblBorders")),
                b"w:tblCellMar" => props.cell_margins = Some(parse_cell_margins(reader)?),
                other => {
                    let name = other.to_vec();
                    skip_subtree(reader, &name);
                }
            },
            Event::End(e) if e.name().as_ref() == b"w:tblPr" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(props)
}

fn parse_cell_margins(reader: &mut Reader<&[u8]>) -> XmlResult<Edges> {
    // Word's default cell margins: 108 twips left/right.
    let mut margins = Edges { top: 0.0, right: 5.4, bottom: 0.0, left: 5.4 };
    loop {
        match reader.read_event()? {
            Event::Empty(e) => {
                let value = attr(&e, b"w:w")
                    .and_then(|v| v.parse::<f64>().ok())
                    .map(units::twips_to_points);
                if let Some(v) = value {
                    match e.name().as_ref() {
                        b"w:top" => margins.top = v,
                        b"w:bottom" => margins.bottom = v,
                        b"w:left" | b"w:start" => margins.left = v,
                        b"w:right" | b"w:end" => margins.right = v,
                        _ => {}
                    }
                }
            }
            Event::End(e) if e.name().as_ref() == b"w:tblCellMar" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(margins)
}

/// `w:tblW`/`w:tcW`-style measures: `w:w` + `w:type` (dxa | pct | auto).
fn parse_measure(e: &BytesStart) -> Option<TableWidth> {
    let value: f64 = attr(e, b"w:w").and_then(|v| v.parse().ok()).unwrap_or(0.0);
    match attr(e, b"w:type").as_deref() {
        Some("pct") => Some(TableWidth::Pct(value / 50.0)), // fiftieths of a percent
        Some("auto") | None => Some(TableWidth::Auto),
        Some("dxa") => Some(TableWidth::Fixed(units::twips_to_points(value))),
        _ => Some(TableWidth::Auto),
    }
}

fn parse_table_grid(reader: &mut Reader<&[u8]>) -> XmlResult<Vec<TableWidth>> {
    let mut grid = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Empty(e) if e.name().as_ref() == b"w:gridCol" => {
                let width = attr(&e, b"w:w")
                    .and_then(|v| v.parse::<f64>().ok())
                    .map(|w| TableWidth::Fixed(units::twips_to_points(w)))
                    .unwrap_or(TableWidth::Auto);
                grid.push(width);
            }
            Event::End(e) if e.name().as_ref() == b"w:tblGrid" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(grid)
}

fn parse_row_props(reader: &mut Reader<&[u8]>) -> XmlResult<RowProperties> {
    let mut props = RowProperties::default();
    loop {
        match reader.read_event()? {
            Event::Empty(e) => match e.name().as_ref() {
                b"w:trHeight" => {
                    props.height = attr(&e, b"w:val")
                        .and_then(|v| v.parse::<f64>().ok())
                        .map(units::twips_to_points);
                    props.height_rule = match attr(&e, b"w:hRule").as_deref() {
                        Some("exact") => HeightRule::Exact,
                        Some("atLeast") => HeightRule::AtLeast,
                        _ => HeightRule::AtLeast, // Word treats a bare value as a floor
                    };
                    if attr(&e, b"w:hRule").as_deref() == Some("auto") {
                        props.height_rule = HeightRule::Auto;
                    }
                }
                b"w:cantSplit" => props.cant_split = !val_is_off(&e),
                b"w:tblHeader" => props.is_header = !val_is_off(&e),
                _ => {}
            },
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                skip_subtree(reader, &name);
            }
            Event::End(e) if e.name().as_ref() == b"w:trPr" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(props)
}

fn parse_cell_props(reader: &mut Reader<&[u8]>) -> XmlResult<CellProperties> {
    let mut props = CellProperties { grid_span: 1, ..Default::default() };
    loop {
        match reader.read_event()? {
            Event::Empty(e) => match e.name().as_ref() {
                b"w:gridSpan" => {
                    props.grid_span = attr(&e, b"w:val")
                        .and_then(|v| v.parse().ok())
                        .filter(|&v: &usize| v >= 1)
                        .unwrap_or(1);
                }
                b"w:vMerge" => {
                    props.vertical_merge = match attr(&e, b"w:val").as_deref() {
                        Some("restart") => VerticalMerge::Restart,
                        // A bare <w:vMerge/> means continue.
                        None | Some("continue") => VerticalMerge::Continue,
                        _ => VerticalMerge::None,
                    };
                }
                b"w:tcW" => props.width = parse_measure(&e),
                b"w:shd" => {
                    props.shading = attr(&e, b"w:fill")
                        .filter(|v| v != "auto")
                        .and_then(|v| Color::from_hex(&v));
                }
                b"w:vAlign" => {
                    props.valign = match attr(&e, b"w:val").as_deref() {
                        Some("center") => CellVAlign::Center,
                        Some("bottom") => CellVAlign::Bottom,
                        _ => CellVAlign::Top,
                    };
                }
                _ => {}
            },
            Event::Start(e) => match e.name().as_ref() {
                b"w:tcBorders" => props.borders = Some(parse_borders(reader, b"w:tcBorders")),
                other => {
                    let name = other.to_vec();
                    skip_subtree(reader, &name);
                }
            },
            Event::End(e) if e.name().as_ref() == b"w:tcPr" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(props)
}

fn parse_settings(bytes: &[u8], model: &mut DocumentModel) {
    let text = String::from_utf8_lossy(bytes);
    let mut reader = Reader::from_str(&text);
    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:autoHyphenation" => model.auto_hyphenation = !val_is_off(&e),
                b"w:defaultTabStop" => {
                    if let Some(v) = attr(&e, b"w:val").and_then(|v| v.parse::<f64>().ok()) {
                        model.default_tab_width = units::twips_to_points(v);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }
}

fn parse_core_properties(bytes: &[u8]) -> CoreProperties {
    let text = String::from_utf8_lossy(bytes);
    let mut reader = Reader::from_str(&text);
    let mut core = CoreProperties::default();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name().as_ref().to_vec();
                let slot = match name.as_slice() {
                    b"dc:title" => Some(0),
                    b"dc:creator" => Some(1),
                    b"dc:subject" => Some(2),
                    b"cp:keywords" => Some(3),
                    _ => None,
                };
                if let Some(slot) = slot {
                    if let Ok(value) = read_text(&mut reader, &name) {
                        let value = Some(value).filter(|v| !v.is_empty());
                        match slot {
                            0 => core.title = value,
                            1 => core.author = value,
                            2 => core.subject = value,
                            _ => core.keywords = value,
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }
    core
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_body_fragment(body_xml: &str) -> (Vec<Block>, Vec<Section>, Diagnostics) {
        let mut diags = Diagnostics::new();
        let pkg = Package::empty();
        let mut ctx = BodyCtx {
            package: &pkg,
            source_part: "word/document.xml".to_string(),
            diags: &mut diags,
            uid_counter: 0,
            media: Vec::new(),
        };
        let xml = format!("<w:body>{body_xml}</w:body>");
        let mut reader = Reader::from_str(&xml);
        // Consume the opening w:body event.
        loop {
            match reader.read_event().unwrap() {
                Event::Start(e) if e.name().as_ref() == b"w:body" => break,
                Event::Eof => panic!("no body"),
                _ => {}
            }
        }
        let (blocks, sections) = ctx.parse_blocks(&mut reader, b"w:body").unwrap();
        (blocks, sections, diags)
    }

    #[test]
    fn test_paragraph_with_runs_merges_uniform_text() {
        let (blocks, _, _) = parse_body_fragment(
            r#"<w:p><w:r><w:t>Hello, </w:t></w:r><w:r><w:t>world.</w:t></w:r></w:p>"#,
        );
        let Block::Paragraph(p) = &blocks[0] else { panic!("expected paragraph") };
        // Identical (empty) properties merge into one maximal run.
        assert_eq!(p.inlines.len(), 1);
        assert_eq!(p.text(), "Hello, world.");
    }

    #[test]
    fn test_runs_with_distinct_props_stay_separate() {
        let (blocks, _, _) = parse_body_fragment(
            r#"<w:p><w:r><w:t>plain </w:t></w:r><w:r><w:rPr><w:b/></w:rPr><w:t>bold</w:t></w:r></w:p>"#,
        );
        let Block::Paragraph(p) = &blocks[0] else { panic!() };
        assert_eq!(p.inlines.len(), 2);
        let Inline::Run(bold) = &p.inlines[1] else { panic!() };
        assert_eq!(bold.props.bold, Some(true));
    }

    #[test]
    fn test_preserved_whitespace() {
        let (blocks, _, _) = parse_body_fragment(
            r#"<w:p><w:r><w:t xml:space="preserve">  spaced  </w:t></w:r></w:p>"#,
        );
        let Block::Paragraph(p) = &blocks[0] else { panic!() };
        assert_eq!(p.text(), "  spaced  ");
    }

    #[test]
    fn test_breaks_and_tabs() {
        let (blocks, _, _) = parse_body_fragment(
            r#"<w:p><w:r><w:t>a</w:t><w:tab/><w:br/><w:br w:type="page"/><w:t>b</w:t></w:r></w:p>"#,
        );
        let Block::Paragraph(p) = &blocks[0] else { panic!() };
        assert!(matches!(p.inlines[1], Inline::Tab));
        assert!(matches!(p.inlines[2], Inline::Break(BreakKind::Line)));
        assert!(matches!(p.inlines[3], Inline::Break(BreakKind::Page)));
    }

    #[test]
    fn test_complex_field_collapses() {
        let (blocks, _, _) = parse_body_fragment(concat!(
            r#"<w:p>"#,
            r#"<w:r><w:fldChar w:fldCharType="begin"/></w:r>"#,
            r#"<w:r><w:instrText xml:space="preserve"> PAGE </w:instrText></w:r>"#,
            r#"<w:r><w:fldChar w:fldCharType="separate"/></w:r>"#,
            r#"<w:r><w:t>7</w:t></w:r>"#,
            r#"<w:r><w:fldChar w:fldCharType="end"/></w:r>"#,
            r#"</w:p>"#,
        ));
        let Block::Paragraph(p) = &blocks[0] else { panic!() };
        assert_eq!(p.inlines.len(), 1);
        let Inline::Field(f) = &p.inlines[0] else { panic!("expected field") };
        assert_eq!(f.kind, FieldKind::Page);
        assert_eq!(f.cached.as_deref(), Some("7"));
    }

    #[test]
    fn test_fld_simple() {
        let (blocks, _, _) = parse_body_fragment(
            r#"<w:p><w:fldSimple w:instr=" NUMPAGES "><w:r><w:t>9</w:t></w:r></w:fldSimple></w:p>"#,
        );
        let Block::Paragraph(p) = &blocks[0] else { panic!() };
        let Inline::Field(f) = &p.inlines[0] else { panic!() };
        assert_eq!(f.kind, FieldKind::NumPages);
        assert_eq!(f.cached.as_deref(), Some("9"));
    }

    #[test]
    fn test_table_with_spans_and_merges() {
        let (blocks, _, diags) = parse_body_fragment(concat!(
            r#"<w:tbl>"#,
            r#"<w:tblGrid><w:gridCol w:w="2000"/><w:gridCol w:w="2000"/><w:gridCol w:w="2000"/></w:tblGrid>"#,
            r#"<w:tr><w:tc><w:tcPr><w:gridSpan w:val="2"/></w:tcPr><w:p/></w:tc><w:tc><w:p/></w:tc></w:tr>"#,
            r#"<w:tr><w:tc><w:tcPr><w:vMerge w:val="restart"/></w:tcPr><w:p/></w:tc><w:tc><w:p/></w:tc><w:tc><w:p/></w:tc></w:tr>"#,
            r#"<w:tr><w:tc><w:tcPr><w:vMerge/></w:tcPr><w:p/></w:tc><w:tc><w:p/></w:tc><w:tc><w:p/></w:tc></w:tr>"#,
            r#"</w:tbl>"#,
        ));
        assert!(diags.is_empty());
        let Block::Table(t) = &blocks[0] else { panic!("expected table") };
        assert_eq!(t.column_count(), 3);
        assert_eq!(t.rows.len(), 3);
        assert_eq!(t.rows[0].cells[0].props.grid_span, 2);
        assert_eq!(t.rows[1].cells[0].props.vertical_merge, VerticalMerge::Restart);
        assert_eq!(t.rows[2].cells[0].props.vertical_merge, VerticalMerge::Continue);
        assert!((t.grid[0] == TableWidth::Fixed(100.0)));
    }

    #[test]
    fn test_orphan_vmerge_repaired() {
        let (blocks, _, diags) = parse_body_fragment(concat!(
            r#"<w:tbl>"#,
            r#"<w:tr><w:tc><w:tcPr><w:vMerge/></w:tcPr><w:p/></w:tc></w:tr>"#,
            r#"</w:tbl>"#,
        ));
        assert_eq!(diags.len(), 1);
        let Block::Table(t) = &blocks[0] else { panic!() };
        assert_eq!(t.rows[0].cells[0].props.vertical_merge, VerticalMerge::None);
    }

    #[test]
    fn test_section_break_records_end_block() {
        let (blocks, sections, _) = parse_body_fragment(concat!(
            r#"<w:p><w:pPr><w:sectPr><w:pgSz w:w="12240" w:h="15840"/></w:sectPr></w:pPr><w:r><w:t>one</w:t></w:r></w:p>"#,
            r#"<w:p><w:r><w:t>two</w:t></w:r></w:p>"#,
            r#"<w:sectPr><w:pgSz w:w="11906" w:h="16838"/><w:pgMar w:top="1440" w:right="1440" w:bottom="1440" w:left="1440" w:header="720" w:footer="720"/></w:sectPr>"#,
        ));
        assert_eq!(blocks.len(), 2);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].end_block, 1);
        assert!((sections[0].page_width - 612.0).abs() < 0.01); // Letter
        assert_eq!(sections[1].end_block, usize::MAX);
        assert!((sections[1].page_width - 595.3).abs() < 0.01); // A4
        assert!((sections[1].margin.top - 72.0).abs() < 0.01);
    }

    #[test]
    fn test_inline_drawing_extent() {
        let (blocks, _, _) = parse_body_fragment(concat!(
            r#"<w:p><w:r><w:drawing><wp:inline>"#,
            r#"<wp:extent cx="914400" cy="457200"/>"#,
            r#"</wp:inline></w:drawing></w:r></w:p>"#,
        ));
        let Block::Paragraph(p) = &blocks[0] else { panic!() };
        let Inline::Drawing(d) = &p.inlines[0] else { panic!("expected drawing") };
        assert!((d.width - 72.0).abs() < 0.01);
        assert!((d.height - 36.0).abs() < 0.01);
        assert_eq!(d.anchor, DrawingAnchor::Inline);
    }

    #[test]
    fn test_anchored_drawing_position() {
        let (blocks, _, _) = parse_body_fragment(concat!(
            r#"<w:p><w:r><w:drawing><wp:anchor behindDoc="1">"#,
            r#"<wp:positionH relativeFrom="page"><wp:posOffset>127000</wp:posOffset></wp:positionH>"#,
            r#"<wp:positionV relativeFrom="page"><wp:posOffset>254000</wp:posOffset></wp:positionV>"#,
            r#"<wp:extent cx="914400" cy="914400"/>"#,
            r#"</wp:anchor></w:drawing></w:r></w:p>"#,
        ));
        let Block::Paragraph(p) = &blocks[0] else { panic!() };
        let Inline::Drawing(d) = &p.inlines[0] else { panic!() };
        match &d.anchor {
            DrawingAnchor::Anchored { offset_x, offset_y, relative_to_page, behind_text } => {
                assert!((offset_x - 10.0).abs() < 0.01);
                assert!((offset_y - 20.0).abs() < 0.01);
                assert!(relative_to_page);
                assert!(behind_text);
            }
            other => panic!("expected anchored, got {other:?}"),
        }
    }

    #[test]
    fn test_textbox_content_via_alternate_content() {
        let (blocks, _, _) = parse_body_fragment(concat!(
            r#"<w:p><w:r><mc:AlternateContent><mc:Choice Requires="wps">"#,
            r#"<w:drawing><wp:inline><wp:extent cx="1270000" cy="635000"/>"#,
            r#"<wps:txbx><w:txbxContent><w:p><w:r><w:t>boxed</w:t></w:r></w:p></w:txbxContent></wps:txbx>"#,
            r#"</wp:inline></w:drawing>"#,
            r#"</mc:Choice><mc:Fallback><w:pict/></mc:Fallback></mc:AlternateContent></w:r></w:p>"#,
        ));
        let Block::Paragraph(p) = &blocks[0] else { panic!() };
        let Inline::Drawing(d) = &p.inlines[0] else { panic!("expected drawing") };
        let DrawingContent::TextBox(inner) = &d.content else { panic!("expected textbox") };
        let Block::Paragraph(inner_p) = &inner[0] else { panic!() };
        assert_eq!(inner_p.text(), "boxed");
    }

    #[test]
    fn test_footnote_reference() {
        let (blocks, _, _) = parse_body_fragment(
            r#"<w:p><w:r><w:t>body</w:t><w:footnoteReference w:id="2"/></w:r></w:p>"#,
        );
        let Block::Paragraph(p) = &blocks[0] else { panic!() };
        assert!(matches!(&p.inlines[1], Inline::FootnoteRef { id, .. } if id == "2"));
    }

    #[test]
    fn test_unknown_elements_skipped() {
        let (blocks, _, _) = parse_body_fragment(
            r#"<w:customBlock><w:deep><w:deeper/></w:deep></w:customBlock><w:p><w:r><w:t>kept</w:t></w:r></w:p>"#,
        );
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn test_core_properties() {
        let core = parse_core_properties(
            br#"<cp:coreProperties xmlns:cp="c" xmlns:dc="d">
                <dc:title>My Title</dc:title><dc:creator>An Author</dc:creator>
                <cp:keywords>a, b</cp:keywords></cp:coreProperties>"#,
        );
        assert_eq!(core.title.as_deref(), Some("My Title"));
        assert_eq!(core.author.as_deref(), Some("An Author"));
        assert_eq!(core.keywords.as_deref(), Some("a, b"));
        assert!(core.subject.is_none());
    }

    #[test]
    fn test_settings() {
        let mut model = DocumentModel::default();
        parse_settings(
            br#"<w:settings><w:autoHyphenation/><w:defaultTabStop w:val="360"/></w:settings>"#,
            &mut model,
        );
        assert!(model.auto_hyphenation);
        assert!((model.default_tab_width - 18.0).abs() < 1e-9);
    }
}
