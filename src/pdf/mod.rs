//! # PDF Compiler
//!
//! Serializes a `UnifiedLayout` into a PDF 1.7 byte stream, written by
//! hand: objects, content streams, xref table, trailer. Owning the bytes
//! keeps the engine self-contained and the output deterministic.
//!
//! ## Structure
//!
//! ```text
//! %PDF-1.7
//! 1 0 obj ... endobj    Catalog
//! 2 0 obj ... endobj    Pages tree
//! 3 0 obj ... endobj    Shared Resources (fonts, images, graphics states)
//! ...                   font chains, image XObjects, page + content pairs
//! xref / trailer / %%EOF
//! ```
//!
//! Base fonts (Helvetica, Times, Courier) are referenced as Type1 with
//! WinAnsi encoding. Every other face embeds as a CIDFontType2 subset with
//! Identity-H encoding and a ToUnicode CMap, five objects per font, so
//! extraction tools recover the original Unicode text.
//!
//! Page-number fields travel through layout as `{{PAGE}}`/`{{NUMPAGES}}`
//! placeholders; this writer substitutes the final values because only it
//! knows the page count.

pub mod image;

use crate::error::{DocError, Diagnostics, Stage};
use crate::font::{subset, FontContext, FontDataRef, FontKey};
use crate::layout::{
    BlockContent, BlockKind, LayoutBlock, LayoutObject, LayoutPage, ParagraphLayout, Rect,
    UnifiedLayout,
};
use crate::model::properties::{Color, TabLeader};
use crate::model::DocumentModel;
use crate::text::{InlineBoxKind, RunStyle};
use miniz_oxide::deflate::compress_to_vec_zlib;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as FmtWrite;
use std::io::Write as IoWrite;

pub struct PdfWriter;

impl Default for PdfWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Embedding state for one custom font.
struct EmbeddedFont {
    /// Character → glyph id in the embedded (subset) font file.
    char_to_gid: HashMap<char, u16>,
}

/// Object table under construction. Index = object id; slot 0 unused.
struct PdfBuilder {
    objects: Vec<Vec<u8>>,
    /// (key, object id, is_custom), resource name is /F{index}.
    font_objects: Vec<(FontKey, usize, bool)>,
    custom_fonts: HashMap<FontKey, EmbeddedFont>,
    /// media rel id → /Im{index}; the object id lives in `image_ids`.
    image_names: HashMap<String, usize>,
    image_ids: Vec<usize>,
    /// Set when any watermark block needs the translucency state /GS0.
    needs_watermark_gs: bool,
}

impl PdfBuilder {
    fn push(&mut self, data: Vec<u8>) -> usize {
        self.objects.push(data);
        self.objects.len() - 1
    }

    fn push_stream(&mut self, dict_extra: &str, content: &[u8]) -> usize {
        let compressed = compress_to_vec_zlib(content, 6);
        let mut data = Vec::new();
        let _ = write!(
            data,
            "<< /Length {} /Filter /FlateDecode{} >>\nstream\n",
            compressed.len(),
            dict_extra
        );
        data.extend_from_slice(&compressed);
        data.extend_from_slice(b"\nendstream");
        self.push(data)
    }

    fn font_index(&self, key: &FontKey) -> usize {
        self.font_objects
            .iter()
            .position(|(k, _, _)| k == key)
            .unwrap_or(0)
    }
}

impl PdfWriter {
    pub fn new() -> Self {
        Self
    }

    /// Compile the layout into PDF bytes.
    pub fn write(
        &self,
        layout: &UnifiedLayout,
        model: &DocumentModel,
        fonts: &FontContext,
        diags: &mut Diagnostics,
    ) -> Result<Vec<u8>, DocError> {
        let mut builder = PdfBuilder {
            objects: vec![Vec::new(), Vec::new(), Vec::new(), Vec::new()],
            font_objects: Vec::new(),
            custom_fonts: HashMap::new(),
            image_names: HashMap::new(),
            image_ids: Vec::new(),
            needs_watermark_gs: false,
        };
        // 0: unused, 1: Catalog, 2: Pages, 3: Resources.

        self.register_fonts(&mut builder, layout, fonts, diags);
        self.register_images(&mut builder, layout, model, diags);
        builder.needs_watermark_gs = layout
            .pages
            .iter()
            .flat_map(|p| &p.blocks)
            .any(|b| b.kind == BlockKind::Watermark);

        let gs_id = if builder.needs_watermark_gs {
            Some(builder.push(b"<< /Type /ExtGState /CA 0.5 /ca 0.5 >>".to_vec()))
        } else {
            None
        };

        // Page objects.
        let total = layout.total_pages();
        let mut page_ids = Vec::with_capacity(total);
        for page in &layout.pages {
            let content = self.page_stream(page, &builder, page.number, total, diags);
            let content_id = builder.push_stream("", content.as_bytes());
            let dict = format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {:.2} {:.2}] \
                 /CropBox [0 0 {:.2} {:.2}] /Contents {} 0 R /Resources 3 0 R >>",
                page.width, page.height, page.width, page.height, content_id
            );
            page_ids.push(builder.push(dict.into_bytes()));
        }

        builder.objects[1] = b"<< /Type /Catalog /Pages 2 0 R >>".to_vec();
        let kids: Vec<String> = page_ids.iter().map(|id| format!("{id} 0 R")).collect();
        builder.objects[2] = format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            page_ids.len()
        )
        .into_bytes();
        builder.objects[3] = self.resources_dict(&builder, gs_id).into_bytes();

        // Info dictionary from the document's core properties.
        let info_id = self.write_info(&mut builder, model);

        Ok(self.serialize(&builder, info_id))
    }

    fn resources_dict(&self, builder: &PdfBuilder, gs_id: Option<usize>) -> String {
        let fonts: Vec<String> = builder
            .font_objects
            .iter()
            .enumerate()
            .map(|(i, (_, id, _))| format!("/F{i} {id} 0 R"))
            .collect();
        let mut dict = format!("<< /Font << {} >>", fonts.join(" "));
        if !builder.image_ids.is_empty() {
            let images: Vec<String> = builder
                .image_ids
                .iter()
                .enumerate()
                .map(|(i, id)| format!("/Im{i} {id} 0 R"))
                .collect();
            let _ = write!(dict, " /XObject << {} >>", images.join(" "));
        }
        if let Some(id) = gs_id {
            let _ = write!(dict, " /ExtGState << /GS0 {id} 0 R >>");
        }
        dict.push_str(" >>");
        dict
    }

    fn write_info(&self, builder: &mut PdfBuilder, model: &DocumentModel) -> Option<usize> {
        let core = &model.core;
        if core.title.is_none() && core.author.is_none() && core.subject.is_none()
            && core.keywords.is_none()
        {
            return None;
        }
        let mut info = String::from("<< ");
        if let Some(t) = &core.title {
            let _ = write!(info, "/Title ({}) ", escape_pdf_string(t));
        }
        if let Some(a) = &core.author {
            let _ = write!(info, "/Author ({}) ", escape_pdf_string(a));
        }
        if let Some(s) = &core.subject {
            let _ = write!(info, "/Subject ({}) ", escape_pdf_string(s));
        }
        if let Some(k) = &core.keywords {
            let _ = write!(info, "/Keywords ({}) ", escape_pdf_string(k));
        }
        info.push_str("/Producer (docpress) >>");
        Some(builder.push(info.into_bytes()))
    }

    // ── Font registration ───────────────────────────────────────

    /// Collect every `(font, char)` the layout shows and build the font
    /// objects. Sorted for deterministic object numbering.
    fn register_fonts(
        &self,
        builder: &mut PdfBuilder,
        layout: &UnifiedLayout,
        fonts: &FontContext,
        diags: &mut Diagnostics,
    ) {
        let mut usage: HashMap<FontKey, BTreeSet<char>> = HashMap::new();
        for page in &layout.pages {
            collect_font_usage(&page.blocks, &mut usage);
        }

        let mut keys: Vec<FontKey> = usage.keys().cloned().collect();
        keys.sort_by(|a, b| {
            a.family
                .cmp(&b.family)
                .then(a.weight.cmp(&b.weight))
                .then(a.italic.cmp(&b.italic))
        });
        if keys.is_empty() {
            keys.push(FontKey { family: "Helvetica".to_string(), weight: 400, italic: false });
            usage.insert(keys[0].clone(), BTreeSet::new());
        }

        for key in keys {
            match fonts.registry().data(&key) {
                FontDataRef::Standard(std_font) => {
                    let dict = format!(
                        "<< /Type /Font /Subtype /Type1 /BaseFont /{} \
                         /Encoding /WinAnsiEncoding >>",
                        std_font.pdf_name()
                    );
                    let id = builder.push(dict.into_bytes());
                    builder.font_objects.push((key, id, false));
                }
                FontDataRef::Custom { data, metrics } => {
                    let used = usage.get(&key).cloned().unwrap_or_default();
                    match self.embed_custom_font(builder, &key, data, metrics, &used) {
                        Ok(id) => builder.font_objects.push((key, id, true)),
                        Err(msg) => {
                            // Fall back to the bundled base font.
                            diags.warn(
                                Stage::Render,
                                Some(&key.family),
                                format!("font embedding failed, substituting Helvetica: {msg}"),
                            );
                            let dict = "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica \
                                        /Encoding /WinAnsiEncoding >>";
                            let id = builder.push(dict.as_bytes().to_vec());
                            builder.font_objects.push((key, id, false));
                        }
                    }
                }
            }
        }
    }

    /// Emit the five-object CIDFontType2 chain for one embedded face.
    fn embed_custom_font(
        &self,
        builder: &mut PdfBuilder,
        key: &FontKey,
        data: &[u8],
        metrics: Option<&crate::font::CustomFontMetrics>,
        used_chars: &BTreeSet<char>,
    ) -> Result<usize, String> {
        let metrics = metrics.ok_or("face has no parsed metrics")?;
        let face = ttf_parser::Face::parse(data, 0).map_err(|e| format!("{e:?}"))?;
        let units_per_em = face.units_per_em();
        let scale = 1000.0 / units_per_em as f64;

        // Original glyph ids for the used characters.
        let mut char_to_orig: HashMap<char, u16> = HashMap::new();
        for &ch in used_chars {
            if let Some(gid) = metrics.glyph_id(ch) {
                char_to_orig.insert(ch, gid);
            }
        }

        // Subset; a failed subset degrades to embedding the whole file.
        let orig_gids: std::collections::HashSet<u16> = char_to_orig.values().copied().collect();
        let (file_bytes, char_to_gid) = match subset::subset(data, &orig_gids) {
            Ok(s) => {
                let remapped: HashMap<char, u16> = char_to_orig
                    .iter()
                    .filter_map(|(&ch, orig)| s.gid_map.get(orig).map(|&new| (ch, new)))
                    .collect();
                (s.data, remapped)
            }
            Err(_) => (data.to_vec(), char_to_orig.clone()),
        };

        let font_name = sanitize_font_name(&key.family, key.weight, key.italic);

        // 1. FontFile2
        let file_id = {
            let extra = format!(" /Length1 {}", file_bytes.len());
            builder.push_stream(&extra, &file_bytes)
        };

        // 2. FontDescriptor
        let bbox = face.global_bounding_box();
        let descriptor = format!(
            "<< /Type /FontDescriptor /FontName /{} /Flags 4 \
             /FontBBox [{} {} {} {}] /ItalicAngle {} \
             /Ascent {} /Descent {} /CapHeight {} /StemV {} \
             /FontFile2 {} 0 R >>",
            font_name,
            (bbox.x_min as f64 * scale) as i32,
            (bbox.y_min as f64 * scale) as i32,
            (bbox.x_max as f64 * scale) as i32,
            (bbox.y_max as f64 * scale) as i32,
            if key.italic { -12 } else { 0 },
            (face.ascender() as f64 * scale) as i32,
            (face.descender() as f64 * scale) as i32,
            (face.capital_height().unwrap_or(face.ascender()) as f64 * scale) as i32,
            if key.weight >= 700 { 120 } else { 80 },
            file_id,
        );
        let descriptor_id = builder.push(descriptor.into_bytes());

        // 3. CIDFont with per-glyph widths (subset glyph ids).
        let mut width_entries: Vec<(u16, u32)> = char_to_gid
            .iter()
            .map(|(&ch, &gid)| (gid, (metrics.advance_units(ch) as f64 * scale) as u32))
            .collect();
        width_entries.sort_by_key(|&(gid, _)| gid);
        width_entries.dedup_by_key(|e| e.0);
        let mut w_array = String::from("[");
        for (gid, w) in &width_entries {
            let _ = write!(w_array, " {gid} [{w}]");
        }
        w_array.push_str(" ]");

        let cid_dict = format!(
            "<< /Type /Font /Subtype /CIDFontType2 /BaseFont /{} \
             /CIDSystemInfo << /Registry (Adobe) /Ordering (Identity) /Supplement 0 >> \
             /FontDescriptor {} 0 R /DW 1000 /W {} /CIDToGIDMap /Identity >>",
            font_name, descriptor_id, w_array,
        );
        let cid_id = builder.push(cid_dict.into_bytes());

        // 4. ToUnicode CMap, so extraction recovers real text.
        let cmap = build_tounicode_cmap(&char_to_gid, &font_name);
        let cmap_id = builder.push_stream("", cmap.as_bytes());

        // 5. Root Type0 dictionary.
        let type0 = format!(
            "<< /Type /Font /Subtype /Type0 /BaseFont /{} /Encoding /Identity-H \
             /DescendantFonts [{} 0 R] /ToUnicode {} 0 R >>",
            font_name, cid_id, cmap_id,
        );
        let type0_id = builder.push(type0.into_bytes());

        builder.custom_fonts.insert(key.clone(), EmbeddedFont { char_to_gid });
        Ok(type0_id)
    }

    // ── Images ──────────────────────────────────────────────────

    /// Decode and embed each referenced media part exactly once.
    fn register_images(
        &self,
        builder: &mut PdfBuilder,
        layout: &UnifiedLayout,
        model: &DocumentModel,
        diags: &mut Diagnostics,
    ) {
        let mut rels: Vec<String> = Vec::new();
        for page in &layout.pages {
            collect_image_rels(&page.blocks, &mut rels);
        }

        for rel in rels {
            if builder.image_names.contains_key(&rel) {
                continue;
            }
            let Some(entry) = model.media_by_rel(&rel) else {
                diags.warn(Stage::Render, Some(&rel), "image relationship has no media bytes");
                continue;
            };
            let decoded = match image::decode(&entry.bytes) {
                Ok(d) => d,
                Err(e) => {
                    diags.warn(
                        Stage::Render,
                        Some(&rel),
                        format!("image decode failed, placeholder will render: {e}"),
                    );
                    continue;
                }
            };
            let obj_id = self.write_image_xobject(builder, &decoded);
            let index = builder.image_ids.len();
            builder.image_ids.push(obj_id);
            builder.image_names.insert(rel, index);
        }
    }

    fn write_image_xobject(&self, builder: &mut PdfBuilder, img: &image::DecodedImage) -> usize {
        match &img.pixel_data {
            image::PixelData::Jpeg { data, gray } => {
                let cs = if *gray { "/DeviceGray" } else { "/DeviceRGB" };
                let mut obj = Vec::new();
                let _ = write!(
                    obj,
                    "<< /Type /XObject /Subtype /Image /Width {} /Height {} \
                     /ColorSpace {} /BitsPerComponent 8 /Filter /DCTDecode /Length {} >>\nstream\n",
                    img.width_px,
                    img.height_px,
                    cs,
                    data.len()
                );
                obj.extend_from_slice(data);
                obj.extend_from_slice(b"\nendstream");
                builder.push(obj)
            }
            image::PixelData::Raw { rgb, alpha } => {
                let smask = alpha.as_ref().map(|a| {
                    let extra = format!(
                        " /Type /XObject /Subtype /Image /Width {} /Height {} \
                         /ColorSpace /DeviceGray /BitsPerComponent 8",
                        img.width_px, img.height_px
                    );
                    builder.push_stream(&extra, a)
                });
                let smask_ref = smask.map(|id| format!(" /SMask {id} 0 R")).unwrap_or_default();
                let extra = format!(
                    " /Type /XObject /Subtype /Image /Width {} /Height {} \
                     /ColorSpace /DeviceRGB /BitsPerComponent 8{}",
                    img.width_px, img.height_px, smask_ref
                );
                builder.push_stream(&extra, rgb)
            }
        }
    }

    // ── Content streams ─────────────────────────────────────────

    fn page_stream(
        &self,
        page: &LayoutPage,
        builder: &PdfBuilder,
        page_number: usize,
        total_pages: usize,
        diags: &mut Diagnostics,
    ) -> String {
        let mut stream = String::new();
        for block in &page.blocks {
            self.write_block(
                &mut stream,
                block,
                (0.0, 0.0),
                page.height,
                builder,
                page_number,
                total_pages,
                diags,
            );
        }
        stream
    }

    #[allow(clippy::too_many_arguments)]
    fn write_block(
        &self,
        stream: &mut String,
        block: &LayoutBlock,
        origin: (f64, f64),
        page_height: f64,
        builder: &PdfBuilder,
        page_number: usize,
        total_pages: usize,
        diags: &mut Diagnostics,
    ) {
        let frame = Rect::new(
            block.frame.x + origin.0,
            block.frame.y + origin.1,
            block.frame.width,
            block.frame.height,
        );
        if frame.width < 0.0 || frame.height < 0.0 {
            diags.warn(
                Stage::Render,
                Some(&block.uid),
                "skipping block with negative dimensions",
            );
            return;
        }

        let watermark = block.kind == BlockKind::Watermark;
        if watermark {
            let _ = write!(stream, "q\n/GS0 gs\n");
        }

        match &block.content {
            BlockContent::Paragraph(pl) => self.write_paragraph(
                stream, pl, frame, page_height, builder, page_number, total_pages, diags,
            ),
            BlockContent::Table(tl) => {
                for cell in &tl.cells {
                    let abs = Rect::new(
                        frame.x + cell.frame.x,
                        frame.y + cell.frame.y,
                        cell.frame.width,
                        cell.frame.height,
                    );
                    if let Some(fill) = cell.shading {
                        self.fill_rect(stream, abs, page_height, fill);
                    }
                    if let Some(borders) = &cell.borders {
                        self.stroke_borders(stream, abs, page_height, borders);
                    }
                    for child in &cell.blocks {
                        self.write_block(
                            stream,
                            child,
                            (frame.x, frame.y),
                            page_height,
                            builder,
                            page_number,
                            total_pages,
                            diags,
                        );
                    }
                }
            }
            BlockContent::Image(img) => {
                self.draw_image(stream, img.media_rel.as_deref(), frame, page_height, builder);
            }
            BlockContent::TextBox(children) => {
                for child in children {
                    self.write_block(
                        stream,
                        child,
                        origin,
                        page_height,
                        builder,
                        page_number,
                        total_pages,
                        diags,
                    );
                }
            }
        }

        if watermark {
            let _ = write!(stream, "Q\n");
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write_paragraph(
        &self,
        stream: &mut String,
        pl: &ParagraphLayout,
        frame: Rect,
        page_height: f64,
        builder: &PdfBuilder,
        page_number: usize,
        total_pages: usize,
        diags: &mut Diagnostics,
    ) {
        if let Some(fill) = pl.shading {
            self.fill_rect(stream, frame, page_height, fill);
        }
        if let Some(borders) = &pl.borders {
            self.stroke_borders(stream, frame, page_height, borders);
        }

        if let (Some(marker), Some(first)) = (&pl.marker, pl.lines.first()) {
            let baseline = page_height - (frame.y + first.baseline_y);
            self.show_text(stream, &marker.text, &marker.style, frame.x + marker.x, baseline, builder);
        }

        for line in &pl.lines {
            let baseline_layout = frame.y + line.baseline_y;
            let baseline = page_height - baseline_layout;
            for b in &line.boxes {
                let x = frame.x + line.offset_x + b.x;
                match &b.kind {
                    InlineBoxKind::Text { text, style } | InlineBoxKind::Field { text, style, .. } => {
                        let resolved = resolve_fields(text, page_number, total_pages);
                        if resolved.is_empty() {
                            continue;
                        }
                        if let Some(hl) = style.highlight {
                            let rect = Rect::new(
                                x,
                                baseline_layout - b.ascent,
                                b.width,
                                b.ascent + b.descent,
                            );
                            self.fill_rect(stream, rect, page_height, hl);
                        }
                        let y = baseline + style.baseline_shift;
                        self.show_text(stream, &resolved, style, x, y, builder);
                        if style.underline {
                            self.rule(stream, x, b.width, y - 0.1 * style.size, style.size / 15.0, style.color);
                        }
                        if style.strike {
                            self.rule(stream, x, b.width, y + 0.3 * style.size, style.size / 15.0, style.color);
                        }
                    }
                    InlineBoxKind::Tab { leader: TabLeader::Dot } => {
                        let _ = write!(
                            stream,
                            "q\n0 0 0 RG\n0.5 w\n[1 2] 0 d\n{:.2} {:.2} m\n{:.2} {:.2} l\nS\nQ\n",
                            x,
                            baseline + 1.0,
                            x + b.width,
                            baseline + 1.0,
                        );
                    }
                    InlineBoxKind::Tab { leader: TabLeader::None } => {}
                    InlineBoxKind::Object { index, height } => {
                        let top = baseline_layout - b.ascent;
                        let rect = Rect::new(x, top, b.width, *height);
                        match pl.objects.get(*index) {
                            Some(LayoutObject::Image(img)) => {
                                self.draw_image(stream, img.media_rel.as_deref(), rect, page_height, builder);
                            }
                            Some(LayoutObject::TextBox { blocks, .. }) => {
                                for child in blocks {
                                    self.write_block(
                                        stream,
                                        child,
                                        (x, top),
                                        page_height,
                                        builder,
                                        page_number,
                                        total_pages,
                                        diags,
                                    );
                                }
                            }
                            None => {
                                diags.warn(
                                    Stage::Render,
                                    None,
                                    "inline object index out of range; drawing placeholder",
                                );
                                self.placeholder(stream, rect, page_height);
                            }
                        }
                    }
                }
            }
        }
    }

    /// One `BT..ET` per box keeps the justified gaps exactly where the
    /// shaper put them.
    fn show_text(
        &self,
        stream: &mut String,
        text: &str,
        style: &RunStyle,
        x: f64,
        y: f64,
        builder: &PdfBuilder,
    ) {
        let idx = builder.font_index(&style.font);
        let is_custom = builder
            .font_objects
            .get(idx)
            .map(|(_, _, custom)| *custom)
            .unwrap_or(false);

        let _ = write!(
            stream,
            "BT\n{:.3} {:.3} {:.3} rg\n/F{} {:.2} Tf\n{:.2} {:.2} Td\n",
            style.color.r, style.color.g, style.color.b, idx, style.size, x, y
        );

        if is_custom {
            let embedded = builder
                .font_objects
                .get(idx)
                .and_then(|(key, _, _)| builder.custom_fonts.get(key));
            let mut hex = String::new();
            for ch in text.chars() {
                if crate::font::is_zero_width(ch) {
                    continue;
                }
                let gid = embedded
                    .and_then(|e| e.char_to_gid.get(&ch).copied())
                    .unwrap_or(0);
                let _ = write!(hex, "{gid:04X}");
            }
            let _ = write!(stream, "<{hex}> Tj\nET\n");
        } else {
            let mut encoded = String::new();
            for ch in text.chars() {
                if crate::font::is_zero_width(ch) {
                    continue;
                }
                let byte = unicode_to_winansi(ch).unwrap_or(b'?');
                match byte {
                    b'\\' => encoded.push_str("\\\\"),
                    b'(' => encoded.push_str("\\("),
                    b')' => encoded.push_str("\\)"),
                    0x20..=0x7E => encoded.push(byte as char),
                    _ => {
                        let _ = write!(encoded, "\\{byte:03o}");
                    }
                }
            }
            let _ = write!(stream, "({encoded}) Tj\nET\n");
        }
    }

    fn fill_rect(&self, stream: &mut String, rect: Rect, page_height: f64, color: Color) {
        let y = page_height - rect.y - rect.height;
        let _ = write!(
            stream,
            "q\n{:.3} {:.3} {:.3} rg\n{:.2} {:.2} {:.2} {:.2} re\nf\nQ\n",
            color.r, color.g, color.b, rect.x, y, rect.width, rect.height
        );
    }

    fn placeholder(&self, stream: &mut String, rect: Rect, page_height: f64) {
        let y = page_height - rect.y - rect.height;
        let _ = write!(
            stream,
            "q\n0.9 0.9 0.9 rg\n{:.2} {:.2} {:.2} {:.2} re\nf\nQ\n",
            rect.x, y, rect.width, rect.height
        );
    }

    fn rule(&self, stream: &mut String, x: f64, width: f64, y: f64, thickness: f64, color: Color) {
        let _ = write!(
            stream,
            "q\n{:.3} {:.3} {:.3} RG\n{:.2} w\n{:.2} {:.2} m\n{:.2} {:.2} l\nS\nQ\n",
            color.r, color.g, color.b, thickness, x, y, x + width, y
        );
    }

    fn stroke_borders(
        &self,
        stream: &mut String,
        rect: Rect,
        page_height: f64,
        borders: &crate::model::properties::Borders,
    ) {
        let top_y = page_height - rect.y;
        let bottom_y = page_height - rect.y - rect.height;
        let mut edge = |e: &crate::model::properties::BorderEdge, x1: f64, y1: f64, x2: f64, y2: f64| {
            let _ = write!(
                stream,
                "q\n{:.3} {:.3} {:.3} RG\n{:.2} w\n{:.2} {:.2} m\n{:.2} {:.2} l\nS\nQ\n",
                e.color.r, e.color.g, e.color.b, e.width, x1, y1, x2, y2
            );
        };
        if let Some(e) = &borders.top {
            edge(e, rect.x, top_y, rect.x + rect.width, top_y);
        }
        if let Some(e) = &borders.bottom {
            edge(e, rect.x, bottom_y, rect.x + rect.width, bottom_y);
        }
        if let Some(e) = &borders.left {
            edge(e, rect.x, bottom_y, rect.x, top_y);
        }
        if let Some(e) = &borders.right {
            edge(e, rect.x + rect.width, bottom_y, rect.x + rect.width, top_y);
        }
    }

    fn draw_image(
        &self,
        stream: &mut String,
        media_rel: Option<&str>,
        rect: Rect,
        page_height: f64,
        builder: &PdfBuilder,
    ) {
        let y = page_height - rect.y - rect.height;
        match media_rel.and_then(|rel| builder.image_names.get(rel)) {
            Some(index) => {
                let _ = write!(
                    stream,
                    "q\n{:.4} 0 0 {:.4} {:.2} {:.2} cm\n/Im{} Do\nQ\n",
                    rect.width, rect.height, rect.x, y, index
                );
            }
            None => self.placeholder(stream, rect, page_height),
        }
    }

    // ── Serialization ───────────────────────────────────────────

    fn serialize(&self, builder: &PdfBuilder, info_id: Option<usize>) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::new();
        out.extend_from_slice(b"%PDF-1.7\n");
        out.extend_from_slice(b"%\xe2\xe3\xcf\xd3\n");

        let mut offsets = vec![0usize; builder.objects.len()];
        for (i, obj) in builder.objects.iter().enumerate().skip(1) {
            offsets[i] = out.len();
            let _ = write!(out, "{i} 0 obj\n");
            out.extend_from_slice(obj);
            out.extend_from_slice(b"\nendobj\n\n");
        }

        let xref_offset = out.len();
        let _ = write!(out, "xref\n0 {}\n", builder.objects.len());
        let _ = write!(out, "0000000000 65535 f \n");
        for offset in offsets.iter().skip(1) {
            let _ = write!(out, "{offset:010} 00000 n \n");
        }

        // A content-derived ID keeps identical inputs byte-identical.
        let id = fnv1a64(&out);
        let _ = write!(out, "trailer\n<< /Size {} /Root 1 0 R", builder.objects.len());
        if let Some(info) = info_id {
            let _ = write!(out, " /Info {info} 0 R");
        }
        let _ = write!(out, " /ID [<{id:016X}> <{id:016X}>] >>\nstartxref\n{xref_offset}\n%%EOF\n");

        out
    }
}

/// Substitute the page-number placeholders the pipeline emitted.
fn resolve_fields(text: &str, page_number: usize, total_pages: usize) -> String {
    if !text.contains("{{") {
        return text.to_string();
    }
    text.replace("{{PAGE}}", &page_number.to_string())
        .replace("{{NUMPAGES}}", &total_pages.to_string())
}

fn record_font_usage(usage: &mut HashMap<FontKey, BTreeSet<char>>, style: &RunStyle, text: &str) {
    let entry = usage.entry(style.font.clone()).or_default();
    for ch in text.chars() {
        entry.insert(ch);
    }
}

fn collect_font_usage(blocks: &[LayoutBlock], usage: &mut HashMap<FontKey, BTreeSet<char>>) {
    for block in blocks {
        match &block.content {
            BlockContent::Paragraph(pl) => {
                if let Some(m) = &pl.marker {
                    record_font_usage(usage, &m.style, &m.text);
                }
                for line in &pl.lines {
                    for b in &line.boxes {
                        match &b.kind {
                            InlineBoxKind::Text { text, style } => {
                                record_font_usage(usage, style, text)
                            }
                            InlineBoxKind::Field { text, style, .. } => {
                                record_font_usage(usage, style, text);
                                // Placeholders resolve to digits later.
                                if text.contains("{{") {
                                    record_font_usage(usage, style, "0123456789");
                                }
                            }
                            InlineBoxKind::Object { index, .. } => {
                                if let Some(LayoutObject::TextBox { blocks, .. }) =
                                    pl.objects.get(*index)
                                {
                                    collect_font_usage(blocks, usage);
                                }
                            }
                            InlineBoxKind::Tab { .. } => {}
                        }
                    }
                }
            }
            BlockContent::Table(tl) => {
                for cell in &tl.cells {
                    collect_font_usage(&cell.blocks, usage);
                }
            }
            BlockContent::TextBox(children) => collect_font_usage(children, usage),
            BlockContent::Image(_) => {}
        }
    }
}

fn collect_image_rels(blocks: &[LayoutBlock], rels: &mut Vec<String>) {
    for block in blocks {
        match &block.content {
            BlockContent::Image(img) => {
                if let Some(rel) = &img.media_rel {
                    if !rels.contains(rel) {
                        rels.push(rel.clone());
                    }
                }
            }
            BlockContent::Paragraph(pl) => {
                for obj in &pl.objects {
                    match obj {
                        LayoutObject::Image(img) => {
                            if let Some(rel) = &img.media_rel {
                                if !rels.contains(rel) {
                                    rels.push(rel.clone());
                                }
                            }
                        }
                        LayoutObject::TextBox { blocks, .. } => collect_image_rels(blocks, rels),
                    }
                }
            }
            BlockContent::Table(tl) => {
                for cell in &tl.cells {
                    collect_image_rels(&cell.blocks, rels);
                }
            }
            BlockContent::TextBox(children) => collect_image_rels(children, rels),
        }
    }
}

/// ToUnicode CMap mapping subset glyph ids back to Unicode.
fn build_tounicode_cmap(char_to_gid: &HashMap<char, u16>, font_name: &str) -> String {
    let mut pairs: Vec<(u16, u32)> = char_to_gid.iter().map(|(&ch, &gid)| (gid, ch as u32)).collect();
    pairs.sort_by_key(|&(gid, _)| gid);

    let mut cmap = String::new();
    cmap.push_str("/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n");
    cmap.push_str("/CIDSystemInfo\n<< /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n");
    let _ = write!(cmap, "/CMapName /{font_name}-UTF16 def\n");
    cmap.push_str("/CMapType 2 def\n1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n");

    // The spec caps bfchar blocks at 100 entries.
    for chunk in pairs.chunks(100) {
        let _ = write!(cmap, "{} beginbfchar\n", chunk.len());
        for &(gid, unicode) in chunk {
            let _ = write!(cmap, "<{gid:04X}> <{unicode:04X}>\n");
        }
        cmap.push_str("endbfchar\n");
    }

    cmap.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    cmap
}

/// Strip a family name down to a valid PDF name with weight/style suffixes.
fn sanitize_font_name(family: &str, weight: u32, italic: bool) -> String {
    let mut name: String = family
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if weight >= 700 {
        name.push_str("-Bold");
    }
    if italic {
        name.push_str("-Italic");
    }
    if name.is_empty() {
        name = "EmbeddedFont".to_string();
    }
    name
}

fn escape_pdf_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('(', "\\(").replace(')', "\\)")
}

fn fnv1a64(data: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Map a Unicode codepoint to WinAnsiEncoding (Windows-1252).
///
/// ASCII and Latin-1 map directly; 0x80–0x9F carries the usual smart
/// quotes, dashes, and bullets.
fn unicode_to_winansi(ch: char) -> Option<u8> {
    let cp = ch as u32;
    if (0x20..=0x7E).contains(&cp) || (0xA0..=0xFF).contains(&cp) {
        return Some(cp as u8);
    }
    match cp {
        0x20AC => Some(0x80), // Euro sign
        0x201A => Some(0x82), // single low-9 quote
        0x0192 => Some(0x83), // f with hook
        0x201E => Some(0x84), // double low-9 quote
        0x2026 => Some(0x85), // ellipsis
        0x2020 => Some(0x86), // dagger
        0x2021 => Some(0x87), // double dagger
        0x02C6 => Some(0x88), // circumflex
        0x2030 => Some(0x89), // per mille
        0x0160 => Some(0x8A), // S caron
        0x2039 => Some(0x8B), // single left angle quote
        0x0152 => Some(0x8C), // OE ligature
        0x017D => Some(0x8E), // Z caron
        0x2018 => Some(0x91), // left single quote
        0x2019 => Some(0x92), // right single quote
        0x201C => Some(0x93), // left double quote
        0x201D => Some(0x94), // right double quote
        0x2022 => Some(0x95), // bullet
        0x2013 => Some(0x96), // en dash
        0x2014 => Some(0x97), // em dash
        0x02DC => Some(0x98), // small tilde
        0x2122 => Some(0x99), // trademark
        0x0161 => Some(0x9A), // s caron
        0x203A => Some(0x9B), // single right angle quote
        0x0153 => Some(0x9C), // oe ligature
        0x017E => Some(0x9E), // z caron
        0x0178 => Some(0x9F), // Y diaeresis
        0x2011 => Some(0x2D), // no-break hyphen renders as a hyphen
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostics;
    use crate::layout::{LayoutPipeline, PipelineOptions};
    use crate::model::properties::{ParagraphProperties, RunProperties};
    use crate::model::{Block, DocumentModel, Inline, Paragraph, Run, Section};
    use miniz_oxide::inflate::decompress_to_vec_zlib;

    fn layout_for(texts: &[&str]) -> (UnifiedLayout, DocumentModel, FontContext) {
        let mut model = DocumentModel { default_tab_width: 36.0, ..Default::default() };
        model.sections.push(Section::default());
        for (i, t) in texts.iter().enumerate() {
            model.body.push(Block::Paragraph(Paragraph {
                uid: format!("p{i}"),
                props: ParagraphProperties::default(),
                inlines: vec![Inline::Run(Run {
                    props: RunProperties::default(),
                    text: t.to_string(),
                })],
            }));
        }
        let fonts = FontContext::new();
        let mut diags = Diagnostics::new();
        let layout = LayoutPipeline::new(&model, &fonts, &mut diags)
            .run(&PipelineOptions::default())
            .unwrap();
        (layout, model, fonts)
    }

    fn write_pdf(layout: &UnifiedLayout, model: &DocumentModel, fonts: &FontContext) -> Vec<u8> {
        let mut diags = Diagnostics::new();
        PdfWriter::new().write(layout, model, fonts, &mut diags).unwrap()
    }

    /// Decompress every content stream in the PDF and concatenate.
    fn all_content_streams(pdf: &[u8]) -> String {
        let mut out = String::new();
        let mut pos = 0;
        while let Some(start) = find(pdf, b"stream\n", pos) {
            let data_start = start + 7;
            let Some(end) = find(pdf, b"\nendstream", data_start) else { break };
            if let Ok(raw) = decompress_to_vec_zlib(&pdf[data_start..end]) {
                out.push_str(&String::from_utf8_lossy(&raw));
            }
            pos = end + 1;
        }
        out
    }

    fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
        haystack[from..]
            .windows(needle.len())
            .position(|w| w == needle)
            .map(|p| p + from)
    }

    #[test]
    fn test_structurally_valid_pdf() {
        let (layout, model, fonts) = layout_for(&["Hello, world."]);
        let pdf = write_pdf(&layout, &model, &fonts);
        assert!(pdf.starts_with(b"%PDF-1.7"));
        assert!(find(&pdf, b"xref", 0).is_some());
        assert!(find(&pdf, b"trailer", 0).is_some());
        assert!(find(&pdf, b"%%EOF", 0).is_some());
        assert!(find(&pdf, b"/MediaBox [0 0 595.30 841.90]", 0).is_some());
        assert!(find(&pdf, b"/ID [<", 0).is_some());
    }

    #[test]
    fn test_text_extractable_from_stream() {
        let (layout, model, fonts) = layout_for(&["Hello, world."]);
        let pdf = write_pdf(&layout, &model, &fonts);
        let content = all_content_streams(&pdf);
        assert!(
            content.contains("(Hello,) Tj") || content.contains("Hello,"),
            "content stream should carry the text: {content}"
        );
    }

    #[test]
    fn test_deterministic_output() {
        let (layout, model, fonts) = layout_for(&["alpha", "beta", "gamma"]);
        let a = write_pdf(&layout, &model, &fonts);
        let b = write_pdf(&layout, &model, &fonts);
        assert_eq!(a, b, "same layout must produce byte-identical PDFs");
    }

    #[test]
    fn test_standard_font_registered_with_winansi() {
        let (layout, model, fonts) = layout_for(&["plain text"]);
        let pdf = write_pdf(&layout, &model, &fonts);
        assert!(find(&pdf, b"/BaseFont /Helvetica", 0).is_some());
        assert!(find(&pdf, b"/WinAnsiEncoding", 0).is_some());
        assert!(find(&pdf, b"CIDFontType2", 0).is_none());
    }

    #[test]
    fn test_info_dictionary() {
        let (layout, mut model, fonts) = layout_for(&["x"]);
        model.core.title = Some("A (Test) Title".to_string());
        model.core.author = Some("Someone".to_string());
        let pdf = write_pdf(&layout, &model, &fonts);
        assert!(find(&pdf, b"/Title (A \\(Test\\) Title)", 0).is_some());
        assert!(find(&pdf, b"/Author (Someone)", 0).is_some());
    }

    #[test]
    fn test_page_number_substitution() {
        assert_eq!(resolve_fields("Page {{PAGE}} of {{NUMPAGES}}", 3, 9), "Page 3 of 9");
        assert_eq!(resolve_fields("no fields", 1, 1), "no fields");
    }

    #[test]
    fn test_winansi_specials() {
        assert_eq!(unicode_to_winansi('\u{2013}'), Some(0x96));
        assert_eq!(unicode_to_winansi('\u{2022}'), Some(0x95));
        assert_eq!(unicode_to_winansi('\u{00E9}'), Some(0xE9));
        assert_eq!(unicode_to_winansi('A'), Some(b'A'));
        assert_eq!(unicode_to_winansi('\u{017C}'), None); // ż needs embedding
    }

    #[test]
    fn test_sanitize_font_name() {
        assert_eq!(sanitize_font_name("Open Sans", 400, false), "OpenSans");
        assert_eq!(sanitize_font_name("Inter", 700, true), "Inter-Bold-Italic");
        assert_eq!(sanitize_font_name("###", 400, false), "EmbeddedFont");
    }

    #[test]
    fn test_tounicode_cmap_blocks() {
        let mut map = HashMap::new();
        map.insert('A', 5u16);
        map.insert('B', 6u16);
        let cmap = build_tounicode_cmap(&map, "Test");
        assert!(cmap.contains("begincmap"));
        assert!(cmap.contains("<0005> <0041>"));
        assert!(cmap.contains("<0006> <0042>"));
        assert!(cmap.contains("begincodespacerange"));
    }

    #[test]
    fn test_fnv_stable() {
        assert_eq!(fnv1a64(b"abc"), fnv1a64(b"abc"));
        assert_ne!(fnv1a64(b"abc"), fnv1a64(b"abd"));
    }

    #[test]
    fn test_multi_page_numbers_in_footer() {
        // Footer with PAGE/NUMPAGES placeholders over several pages.
        let mut model = DocumentModel { default_tab_width: 36.0, ..Default::default() };
        model.sections.push(Section::default());
        for i in 0..120 {
            model.body.push(Block::Paragraph(Paragraph {
                uid: format!("p{i}"),
                props: ParagraphProperties::default(),
                inlines: vec![Inline::Run(Run {
                    props: RunProperties::default(),
                    text: format!("Body paragraph {i} with some filler words for the line."),
                })],
            }));
        }
        model.footers.insert(
            "rIdF".to_string(),
            vec![Block::Paragraph(Paragraph {
                uid: "f1".to_string(),
                props: ParagraphProperties::default(),
                inlines: vec![
                    Inline::Run(Run {
                        props: RunProperties::default(),
                        text: "Page ".to_string(),
                    }),
                    Inline::Field(crate::model::Field {
                        instruction: "PAGE".to_string(),
                        kind: crate::model::FieldKind::Page,
                        cached: None,
                        props: RunProperties::default(),
                    }),
                    Inline::Run(Run {
                        props: RunProperties::default(),
                        text: " of ".to_string(),
                    }),
                    Inline::Field(crate::model::Field {
                        instruction: "NUMPAGES".to_string(),
                        kind: crate::model::FieldKind::NumPages,
                        cached: None,
                        props: RunProperties::default(),
                    }),
                ],
            })],
        );
        model.sections[0]
            .footer_refs
            .insert(crate::model::HdrFtrKind::Default, "rIdF".to_string());

        let fonts = FontContext::new();
        let mut diags = Diagnostics::new();
        let layout = LayoutPipeline::new(&model, &fonts, &mut diags)
            .run(&PipelineOptions::default())
            .unwrap();
        assert!(layout.total_pages() >= 2);

        let pdf = write_pdf(&layout, &model, &fonts);
        let content = all_content_streams(&pdf);
        let total = layout.total_pages();
        assert!(content.contains("(1) Tj"), "page 1 number must be substituted");
        assert!(
            content.contains(&format!("({total}) Tj")),
            "total page count must be substituted"
        );
        assert!(!content.contains("{{PAGE}}"), "placeholders must not survive");
    }
}
