//! # docpress
//!
//! A DOCX-to-PDF engine: open a WordprocessingML package, build a typed
//! document model, flow it through a page-aware layout pipeline, and emit
//! paginated PDF or JSON.
//!
//! ## Architecture
//!
//! ```text
//! DOCX bytes
//!     ↓
//!  [package]  — OPC container: parts, content types, relationships
//!     ↓
//!  [parse]    — WordprocessingML → DocumentModel (styles, numbering,
//!  [model]      sections, notes, media — resolved and immutable)
//!     ↓
//!  [layout]   — shaping, line breaking, tables, pagination
//!  [text]       → UnifiedLayout (pages × absolutely positioned blocks)
//!  [font]
//!     ↓
//!  [pdf]      — PDF 1.7 byte stream (embedded subset fonts, images)
//!  [json]     — optimized layout JSON
//! ```
//!
//! Every stage owns its output and never mutates its input; re-running the
//! pipeline on the same model with the same options is deterministic.
//! Degradations (broken parts, missing fonts, corrupt images) collect as
//! diagnostics on the [`Document`] handle instead of aborting.

pub mod error;
pub mod font;
pub mod json;
pub mod layout;
pub mod model;
pub mod package;
pub mod parse;
pub mod pdf;
pub mod text;

pub use error::{DocError, Diagnostic, Diagnostics, Severity, Stage};
pub use layout::{PipelineOptions, RenderTarget, UnifiedLayout};
pub use model::DocumentModel;

use font::FontContext;
use layout::LayoutPipeline;
use package::Package;
use pdf::PdfWriter;
use std::collections::HashMap;
use std::path::Path;

/// The document handle: parsed model plus font context, with the layout
/// memoized per option set.
pub struct Document {
    model: DocumentModel,
    fonts: FontContext,
    diagnostics: Diagnostics,
    source: String,
    layout_cache: HashMap<u64, UnifiedLayout>,
}

impl Document {
    /// Open a DOCX file from disk. System fonts are discovered so document
    /// families resolve to real faces.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DocError> {
        let source = path.as_ref().display().to_string();
        let bytes = std::fs::read(path)?;
        let mut doc = Self::from_bytes_with_fonts(&bytes, FontContext::with_system_fonts())?;
        doc.source = source;
        Ok(doc)
    }

    /// Open a DOCX package from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocError> {
        Self::from_bytes_with_fonts(bytes, FontContext::with_system_fonts())
    }

    /// Open with a caller-supplied font context. Useful for embedding
    /// custom fonts up front or for fully deterministic environments.
    pub fn from_bytes_with_fonts(bytes: &[u8], mut fonts: FontContext) -> Result<Self, DocError> {
        let mut diagnostics = Diagnostics::new();
        let package = Package::from_bytes(bytes, &mut diagnostics)?;
        let model = parse::parse_document(&package, &mut diagnostics)?;
        fonts.prepare_for(&model);
        Ok(Self {
            model,
            fonts,
            diagnostics,
            source: "memory".to_string(),
            layout_cache: HashMap::new(),
        })
    }

    pub fn model(&self) -> &DocumentModel {
        &self.model
    }

    pub fn fonts(&self) -> &FontContext {
        &self.fonts
    }

    /// Every degradation recorded so far, in occurrence order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.diagnostics.entries()
    }

    /// Run (or fetch the memoized) layout for the given options.
    pub fn pipeline(&mut self, options: &PipelineOptions) -> Result<&UnifiedLayout, DocError> {
        let key = options.cache_key();
        if !self.layout_cache.contains_key(&key) {
            let mut runner = LayoutPipeline::new(&self.model, &self.fonts, &mut self.diagnostics);
            let mut layout = runner.run(options)?;
            layout.source = self.source.clone();
            self.layout_cache.insert(key, layout);
        }
        Ok(&self.layout_cache[&key])
    }

    /// Compile to PDF bytes.
    pub fn to_pdf(&mut self, options: &PipelineOptions) -> Result<Vec<u8>, DocError> {
        let key = options.cache_key();
        self.pipeline(options)?;
        let layout = &self.layout_cache[&key];
        let mut render_diags = Diagnostics::new();
        let bytes = PdfWriter::new().write(layout, &self.model, &self.fonts, &mut render_diags)?;
        self.diagnostics.extend(render_diags);
        Ok(bytes)
    }

    /// Emit the optimized UnifiedLayout JSON.
    pub fn to_json(&mut self, options: &PipelineOptions) -> Result<String, DocError> {
        let key = options.cache_key();
        self.pipeline(options)?;
        let layout = &self.layout_cache[&key];
        Ok(json::export_layout_string(layout, &self.model))
    }
}

/// One-shot DOCX → PDF conversion.
pub fn convert_to_pdf(docx: &[u8]) -> Result<Vec<u8>, DocError> {
    let mut doc = Document::from_bytes(docx)?;
    doc.to_pdf(&PipelineOptions::default())
}

/// One-shot DOCX → layout JSON conversion.
pub fn convert_to_json(docx: &[u8]) -> Result<String, DocError> {
    let mut doc = Document::from_bytes(docx)?;
    doc.to_json(&PipelineOptions::default())
}
