//! # Font Management
//!
//! Maps `(family, weight, italic)` descriptors to concrete font data and
//! answers the measurement questions layout asks: per-character advances,
//! ascent/descent, glyph coverage.
//!
//! Three tiers back a descriptor:
//! 1. a font registered from bytes (tests, callers embedding their own),
//! 2. a system TrueType face discovered through `fontdb`, loaded up front
//!    for every family the document names plus the fallback chain,
//! 3. the built-in base-font metrics (Helvetica/Times/Courier), which are
//!    always present and keep layout deterministic when no file exists.
//!
//! The registry is filled before layout starts and read-only afterwards,
//! so the pipeline can share it freely.

pub mod metrics;
pub mod subset;

pub use metrics::StandardFontMetrics;

use crate::model::{Block, DocumentModel, Inline};
use std::collections::HashMap;

/// Canonical font lookup key. Weight is snapped to 400/700.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct FontKey {
    pub family: String,
    pub weight: u32,
    pub italic: bool,
}

impl FontKey {
    pub fn new(family: &str, bold: bool, italic: bool) -> Self {
        Self {
            family: family.to_string(),
            weight: if bold { 700 } else { 400 },
            italic,
        }
    }
}

/// Resolved font data behind a key.
pub enum FontData {
    /// One of the base PDF fonts; never embedded.
    Standard(StandardFont),
    /// A TrueType/OpenType face that will be subset and embedded.
    Custom {
        data: Vec<u8>,
        metrics: Option<CustomFontMetrics>,
    },
}

/// Metrics parsed out of a TrueType face.
pub struct CustomFontMetrics {
    pub units_per_em: u16,
    pub ascender: i16,
    pub descender: i16,
    pub line_gap: i16,
    advance_widths: HashMap<char, u16>,
    default_advance: u16,
    glyph_ids: HashMap<char, u16>,
}

impl CustomFontMetrics {
    pub fn from_font_data(data: &[u8]) -> Option<Self> {
        let face = ttf_parser::Face::parse(data, 0).ok()?;
        let units_per_em = face.units_per_em();

        let mut advance_widths = HashMap::new();
        let mut glyph_ids = HashMap::new();
        let mut default_advance = 0u16;

        // Sample the BMP to build width and glyph id maps.
        for code in 32u32..=0xFFFF {
            if let Some(ch) = char::from_u32(code) {
                if let Some(glyph_id) = face.glyph_index(ch) {
                    let advance = face.glyph_hor_advance(glyph_id).unwrap_or(0);
                    advance_widths.insert(ch, advance);
                    glyph_ids.insert(ch, glyph_id.0);
                    if ch == ' ' {
                        default_advance = advance;
                    }
                }
            }
        }
        if default_advance == 0 {
            default_advance = units_per_em / 2;
        }

        Some(Self {
            units_per_em,
            ascender: face.ascender(),
            descender: face.descender(),
            line_gap: face.line_gap(),
            advance_widths,
            default_advance,
            glyph_ids,
        })
    }

    pub fn char_width(&self, ch: char, font_size: f64) -> f64 {
        let w = self.advance_widths.get(&ch).copied().unwrap_or(self.default_advance);
        w as f64 / self.units_per_em as f64 * font_size
    }

    pub fn glyph_id(&self, ch: char) -> Option<u16> {
        self.glyph_ids.get(&ch).copied()
    }

    /// Advance in raw font units, for CID width arrays.
    pub fn advance_units(&self, ch: char) -> u16 {
        self.advance_widths.get(&ch).copied().unwrap_or(self.default_advance)
    }

    pub fn has_glyph(&self, ch: char) -> bool {
        self.glyph_ids.contains_key(&ch)
    }
}

/// The base PDF fonts the compiler can reference without embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardFont {
    Helvetica,
    HelveticaBold,
    HelveticaOblique,
    HelveticaBoldOblique,
    TimesRoman,
    TimesBold,
    TimesItalic,
    TimesBoldItalic,
    Courier,
    CourierBold,
    CourierOblique,
    CourierBoldOblique,
}

impl StandardFont {
    pub fn pdf_name(&self) -> &'static str {
        match self {
            Self::Helvetica => "Helvetica",
            Self::HelveticaBold => "Helvetica-Bold",
            Self::HelveticaOblique => "Helvetica-Oblique",
            Self::HelveticaBoldOblique => "Helvetica-BoldOblique",
            Self::TimesRoman => "Times-Roman",
            Self::TimesBold => "Times-Bold",
            Self::TimesItalic => "Times-Italic",
            Self::TimesBoldItalic => "Times-BoldItalic",
            Self::Courier => "Courier",
            Self::CourierBold => "Courier-Bold",
            Self::CourierOblique => "Courier-Oblique",
            Self::CourierBoldOblique => "Courier-BoldOblique",
        }
    }

    pub fn metrics(&self) -> &'static StandardFontMetrics {
        match self {
            Self::Helvetica | Self::HelveticaOblique => &metrics::HELVETICA,
            Self::HelveticaBold | Self::HelveticaBoldOblique => &metrics::HELVETICA_BOLD,
            Self::TimesRoman | Self::TimesItalic => &metrics::TIMES,
            Self::TimesBold | Self::TimesBoldItalic => &metrics::TIMES_BOLD,
            Self::Courier
            | Self::CourierBold
            | Self::CourierOblique
            | Self::CourierBoldOblique => &metrics::COURIER,
        }
    }

    fn select(family_class: &str, weight: u32, italic: bool) -> StandardFont {
        let bold = weight >= 600;
        match family_class {
            "Times" => match (bold, italic) {
                (false, false) => Self::TimesRoman,
                (true, false) => Self::TimesBold,
                (false, true) => Self::TimesItalic,
                (true, true) => Self::TimesBoldItalic,
            },
            "Courier" => match (bold, italic) {
                (false, false) => Self::Courier,
                (true, false) => Self::CourierBold,
                (false, true) => Self::CourierOblique,
                (true, true) => Self::CourierBoldOblique,
            },
            _ => match (bold, italic) {
                (false, false) => Self::Helvetica,
                (true, false) => Self::HelveticaBold,
                (false, true) => Self::HelveticaOblique,
                (true, true) => Self::HelveticaBoldOblique,
            },
        }
    }
}

/// Bucket an arbitrary family name into one of the base-font classes.
fn classify_family(family: &str) -> &'static str {
    let lower = family.to_ascii_lowercase();
    if lower.contains("courier") || lower.contains("mono") || lower.contains("consol") {
        "Courier"
    } else if lower.contains("times")
        || lower.contains("georgia")
        || lower.contains("cambria")
        || lower.contains("garamond")
        || lower.contains("book")
        || lower.contains("serif") && !lower.contains("sans")
    {
        "Times"
    } else {
        "Helvetica"
    }
}

/// Vertical metrics for one resolved font at a given size, in points.
#[derive(Debug, Clone, Copy)]
pub struct LineMetrics {
    pub ascent: f64,
    /// Negative, below the baseline.
    pub descent: f64,
    pub line_gap: f64,
}

impl LineMetrics {
    pub fn height(&self) -> f64 {
        self.ascent - self.descent + self.line_gap
    }
}

/// Font registry: loaded faces keyed by `FontKey`, plus the fallback chain.
pub struct FontRegistry {
    fonts: HashMap<FontKey, FontData>,
    fallback_chain: Vec<String>,
    system_db: Option<fontdb::Database>,
}

impl Default for FontRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FontRegistry {
    pub fn new() -> Self {
        Self {
            fonts: HashMap::new(),
            fallback_chain: vec![
                "DejaVu Sans".to_string(),
                "Liberation Sans".to_string(),
                "Noto Sans".to_string(),
                "Arial".to_string(),
            ],
            system_db: None,
        }
    }

    /// Scan installed fonts so document families can resolve to real faces.
    pub fn with_system_fonts() -> Self {
        let mut registry = Self::new();
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        registry.system_db = Some(db);
        registry
    }

    pub fn set_fallback_chain(&mut self, chain: Vec<String>) {
        self.fallback_chain = chain;
    }

    pub fn fallback_chain(&self) -> &[String] {
        &self.fallback_chain
    }

    /// Register a font from raw TrueType/OpenType bytes.
    pub fn register(&mut self, family: &str, weight: u32, italic: bool, data: Vec<u8>) {
        let metrics = CustomFontMetrics::from_font_data(&data);
        self.fonts.insert(
            FontKey { family: family.to_string(), weight: snap_weight(weight), italic },
            FontData::Custom { data, metrics },
        );
    }

    /// Try to load one face from the system database.
    fn load_system_face(&mut self, family: &str, weight: u32, italic: bool) -> bool {
        let Some(db) = &self.system_db else { return false };
        let query = fontdb::Query {
            families: &[fontdb::Family::Name(family)],
            weight: fontdb::Weight(weight as u16),
            stretch: fontdb::Stretch::Normal,
            style: if italic { fontdb::Style::Italic } else { fontdb::Style::Normal },
        };
        let Some(id) = db.query(&query) else { return false };
        let Some(data) = db.with_face_data(id, |data, _index| data.to_vec()) else {
            return false;
        };
        self.register(family, weight, italic, data);
        true
    }

    /// Load every `(family, weight, italic)` combination the document can
    /// reference, so later lookups are read-only.
    pub fn preload(&mut self, specs: impl IntoIterator<Item = FontKey>) {
        let mut wanted: Vec<FontKey> = specs.into_iter().collect();
        for family in self.fallback_chain.clone() {
            for &(weight, italic) in &[(400, false), (700, false), (400, true), (700, true)] {
                wanted.push(FontKey { family: family.clone(), weight, italic });
            }
        }
        for key in wanted {
            let key = FontKey { weight: snap_weight(key.weight), ..key };
            if self.fonts.contains_key(&key) {
                continue;
            }
            self.load_system_face(&key.family, key.weight, key.italic);
        }
    }

    /// Resolve a descriptor to the key of the font that will actually
    /// render it. Order: exact face, non-italic variant of the family,
    /// fallback chain, then a base font by family class.
    pub fn resolve_key(&self, family: &str, weight: u32, italic: bool) -> FontKey {
        let weight = snap_weight(weight);
        let candidates = [
            FontKey { family: family.to_string(), weight, italic },
            FontKey { family: family.to_string(), weight: 400, italic },
            FontKey { family: family.to_string(), weight, italic: false },
        ];
        for key in &candidates {
            if self.fonts.contains_key(key) {
                return key.clone();
            }
        }
        for fallback in &self.fallback_chain {
            let key = FontKey { family: fallback.clone(), weight, italic };
            if self.fonts.contains_key(&key) {
                return key.clone();
            }
            let key = FontKey { family: fallback.clone(), weight: 400, italic: false };
            if self.fonts.contains_key(&key) {
                return key.clone();
            }
        }
        // Base font; not present in the map, resolved structurally.
        FontKey { family: classify_family(family).to_string(), weight, italic }
    }

    /// Font data for a key returned by [`Self::resolve_key`].
    pub fn data(&self, key: &FontKey) -> FontDataRef<'_> {
        match self.fonts.get(key) {
            Some(FontData::Custom { data, metrics }) => FontDataRef::Custom {
                data,
                metrics: metrics.as_ref(),
            },
            Some(FontData::Standard(f)) => FontDataRef::Standard(*f),
            None => FontDataRef::Standard(StandardFont::select(&key.family, key.weight, key.italic)),
        }
    }
}

/// Zero-width joiners, marks, and directional controls.
pub fn is_zero_width(ch: char) -> bool {
    matches!(ch, '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2060}' | '\u{FEFF}')
}

fn snap_weight(weight: u32) -> u32 {
    if weight >= 600 {
        700
    } else {
        400
    }
}

/// Borrowed view of resolved font data.
pub enum FontDataRef<'a> {
    Standard(StandardFont),
    Custom {
        data: &'a [u8],
        metrics: Option<&'a CustomFontMetrics>,
    },
}

/// Shared measurement context used by layout and the PDF compiler.
pub struct FontContext {
    registry: FontRegistry,
}

impl Default for FontContext {
    fn default() -> Self {
        Self::new()
    }
}

impl FontContext {
    /// Built-in metrics only; fully deterministic.
    pub fn new() -> Self {
        Self { registry: FontRegistry::new() }
    }

    /// With system font discovery enabled.
    pub fn with_system_fonts() -> Self {
        Self { registry: FontRegistry::with_system_fonts() }
    }

    pub fn registry(&self) -> &FontRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut FontRegistry {
        &mut self.registry
    }

    /// Walk the model and preload every font it can reference.
    pub fn prepare_for(&mut self, model: &DocumentModel) {
        let mut specs: Vec<FontKey> = Vec::new();
        let mut add = |family: &Option<String>, bold: Option<bool>, italic: Option<bool>| {
            if let Some(f) = family {
                specs.push(FontKey::new(f, bold.unwrap_or(false), italic.unwrap_or(false)));
                // Bold/italic variants often appear only via direct toggles.
                specs.push(FontKey::new(f, true, false));
                specs.push(FontKey::new(f, false, true));
            }
        };

        add(&model.styles.default_run.font_family, None, None);
        for idx in 0..model.styles.len() {
            if let Some(style) = model.styles.by_index(idx) {
                add(&style.resolved_run.font_family, style.resolved_run.bold, style.resolved_run.italic);
            }
        }
        fn walk_blocks(blocks: &[Block], specs: &mut Vec<FontKey>) {
            fn walk_inlines(inlines: &[Inline], specs: &mut Vec<FontKey>) {
                for inline in inlines {
                    match inline {
                        Inline::Run(r) => {
                            if let Some(f) = &r.props.font_family {
                                specs.push(FontKey::new(
                                    f,
                                    r.props.bold.unwrap_or(false),
                                    r.props.italic.unwrap_or(false),
                                ));
                            }
                        }
                        Inline::Hyperlink { children, .. } => walk_inlines(children, specs),
                        Inline::Drawing(d) => {
                            if let crate::model::DrawingContent::TextBox(blocks) = &d.content {
                                walk_blocks(blocks, specs);
                            }
                        }
                        _ => {}
                    }
                }
            }
            for block in blocks {
                match block {
                    Block::Paragraph(p) => walk_inlines(&p.inlines, specs),
                    Block::Table(t) => {
                        for row in &t.rows {
                            for cell in &row.cells {
                                walk_blocks(&cell.blocks, specs);
                            }
                        }
                    }
                }
            }
        }
        walk_blocks(&model.body, &mut specs);
        for blocks in model.headers.values().chain(model.footers.values()) {
            walk_blocks(blocks, &mut specs);
        }
        for blocks in model.footnotes.values().chain(model.endnotes.values()) {
            walk_blocks(blocks, &mut specs);
        }

        self.registry.preload(specs);
    }

    pub fn resolve_key(&self, family: &str, weight: u32, italic: bool) -> FontKey {
        self.registry.resolve_key(family, weight, italic)
    }

    /// Resolve a descriptor for a specific piece of text: prefer the
    /// nominal font, but walk the fallback chain when it lacks glyphs the
    /// text needs. Returns the chosen key and whether coverage is complete.
    pub fn resolve_for_text(
        &self,
        family: &str,
        weight: u32,
        italic: bool,
        text: &str,
    ) -> (FontKey, bool) {
        let primary = self.resolve_key(family, weight, italic);
        if self.covers(&primary, text) {
            return (primary, true);
        }
        for fallback in self.registry.fallback_chain() {
            let key = self.resolve_key(fallback, weight, italic);
            if matches!(self.registry.data(&key), FontDataRef::Custom { .. })
                && self.covers(&key, text)
            {
                return (key, true);
            }
        }
        (primary, false)
    }

    fn covers(&self, key: &FontKey, text: &str) -> bool {
        match self.registry.data(key) {
            FontDataRef::Custom { metrics: Some(m), .. } => {
                text.chars().all(|c| c.is_whitespace() || c == '\u{00AD}' || m.has_glyph(c))
            }
            FontDataRef::Custom { metrics: None, .. } => false,
            // Base fonts cover WinAnsi: Latin-1 plus the 0x80-0x9F specials.
            FontDataRef::Standard(_) => text.chars().all(|c| {
                (c as u32) < 0x100
                    || matches!(
                        c,
                        '\u{2011}' | '\u{20AC}' | '\u{201A}' | '\u{0192}' | '\u{201E}'
                            | '\u{2026}' | '\u{2020}' | '\u{2021}' | '\u{02C6}' | '\u{2030}'
                            | '\u{0160}' | '\u{2039}' | '\u{0152}' | '\u{017D}' | '\u{2018}'
                            | '\u{2019}' | '\u{201C}' | '\u{201D}' | '\u{2022}' | '\u{2013}'
                            | '\u{2014}' | '\u{02DC}' | '\u{2122}' | '\u{0161}' | '\u{203A}'
                            | '\u{0153}' | '\u{017E}' | '\u{0178}'
                    )
                    || is_zero_width(c)
            }),
        }
    }

    /// Advance width of one character, in points. Zero-width joiners and
    /// bidi controls are preserved in text but measure zero.
    pub fn char_width(&self, ch: char, key: &FontKey, font_size: f64) -> f64 {
        if is_zero_width(ch) {
            return 0.0;
        }
        match self.registry.data(key) {
            FontDataRef::Standard(f) => f.metrics().char_width(ch, font_size),
            FontDataRef::Custom { metrics: Some(m), .. } => m.char_width(ch, font_size),
            FontDataRef::Custom { metrics: None, .. } => {
                metrics::HELVETICA.char_width(ch, font_size)
            }
        }
    }

    pub fn measure_text(&self, text: &str, key: &FontKey, font_size: f64) -> f64 {
        text.chars().map(|c| self.char_width(c, key, font_size)).sum()
    }

    /// Ascent/descent/line-gap for a font at a size, in points.
    pub fn line_metrics(&self, key: &FontKey, font_size: f64) -> LineMetrics {
        match self.registry.data(key) {
            FontDataRef::Standard(f) => {
                let v = f.metrics().vertical();
                LineMetrics {
                    ascent: v.ascent / 1000.0 * font_size,
                    descent: v.descent / 1000.0 * font_size,
                    line_gap: v.line_gap / 1000.0 * font_size,
                }
            }
            FontDataRef::Custom { metrics: Some(m), .. } => {
                let upem = m.units_per_em as f64;
                LineMetrics {
                    ascent: m.ascender as f64 / upem * font_size,
                    descent: m.descender as f64 / upem * font_size,
                    line_gap: m.line_gap as f64 / upem * font_size,
                }
            }
            FontDataRef::Custom { metrics: None, .. } => {
                let v = metrics::HELVETICA.vertical();
                LineMetrics {
                    ascent: v.ascent / 1000.0 * font_size,
                    descent: v.descent / 1000.0 * font_size,
                    line_gap: 0.0,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_font_resolution() {
        let ctx = FontContext::new();
        let key = ctx.resolve_key("Arial", 400, false);
        assert_eq!(key.family, "Helvetica");
        let key = ctx.resolve_key("Times New Roman", 700, false);
        assert_eq!(key.family, "Times");
        let key = ctx.resolve_key("Courier New", 400, true);
        assert_eq!(key.family, "Courier");
    }

    #[test]
    fn test_char_width_helvetica() {
        let ctx = FontContext::new();
        let key = ctx.resolve_key("Helvetica", 400, false);
        assert!((ctx.char_width(' ', &key, 12.0) - 3.336).abs() < 0.001);
    }

    #[test]
    fn test_bold_resolves_bold_metrics() {
        let ctx = FontContext::new();
        let regular = ctx.resolve_key("Helvetica", 400, false);
        let bold = ctx.resolve_key("Helvetica", 700, false);
        assert!(ctx.char_width('A', &bold, 12.0) > ctx.char_width('A', &regular, 12.0));
    }

    #[test]
    fn test_weight_snapping() {
        let ctx = FontContext::new();
        let w700 = ctx.resolve_key("Helvetica", 700, false);
        let w800 = ctx.resolve_key("Helvetica", 800, false);
        assert_eq!(w700, w800);
    }

    #[test]
    fn test_line_metrics_positive_ascent() {
        let ctx = FontContext::new();
        let key = ctx.resolve_key("Calibri", 400, false);
        let lm = ctx.line_metrics(&key, 12.0);
        assert!(lm.ascent > 0.0);
        assert!(lm.descent < 0.0);
        assert!(lm.height() > 10.0);
    }

    #[test]
    fn test_standard_coverage_latin1_only() {
        let ctx = FontContext::new();
        let (key, complete) = ctx.resolve_for_text("Arial", 400, false, "caf\u{00E9}");
        assert_eq!(key.family, "Helvetica");
        assert!(complete);
        let (_, complete) = ctx.resolve_for_text("Arial", 400, false, "za\u{017C}\u{00F3}\u{0142}\u{0107}");
        assert!(!complete, "Polish needs a real Unicode face");
    }

    #[test]
    fn test_registered_font_preferred() {
        // A registry with raw (unparsable) bytes still resolves to the
        // custom entry; metrics fall back to Helvetica widths.
        let mut ctx = FontContext::new();
        ctx.registry_mut().register("MyFont", 400, false, vec![0, 1, 2, 3]);
        let key = ctx.resolve_key("MyFont", 400, false);
        assert_eq!(key.family, "MyFont");
        assert!(matches!(
            ctx.registry().data(&key),
            FontDataRef::Custom { metrics: None, .. }
        ));
    }
}
