//! Structured error types for the engine.
//!
//! Two tiers: `DocError` for failures that abort the current operation
//! (unopenable package, malformed main document, invariant violations), and
//! `Diagnostic` entries for everything the pipeline degrades around
//! (broken header part, unknown style, missing glyph). Degradations never
//! abort; they collect on the document handle alongside a `log::warn!`.

use std::fmt;
use thiserror::Error;

/// The unified fatal error type returned by public API functions.
#[derive(Debug, Error)]
pub enum DocError {
    /// The input is not a readable ZIP/OPC package.
    #[error("invalid package: {0}")]
    InvalidPackage(String),

    /// A required part is absent from the package.
    #[error("missing part: {0}")]
    MissingPart(String),

    /// A required part exists but its XML is not well-formed.
    #[error("malformed XML in {part}: {source}")]
    MalformedXml {
        part: String,
        #[source]
        source: quick_xml::Error,
    },

    /// A font could not be loaded, parsed, or embedded.
    #[error("font error: {0}")]
    Font(String),

    /// PDF generation failed.
    #[error("render error: {0}")]
    Render(String),

    /// An internal invariant was violated; this indicates a bug.
    #[error("invariant violation at {element}: {message}")]
    Invariant { element: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Severity of a collected diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// Which pipeline stage produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Package,
    Parse,
    Layout,
    Render,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Package => write!(f, "package"),
            Stage::Parse => write!(f, "parse"),
            Stage::Layout => write!(f, "layout"),
            Stage::Render => write!(f, "render"),
        }
    }
}

/// One recorded degradation. The core never silently drops content: every
/// substitution or skip produces exactly one of these.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub stage: Stage,
    /// Source element id (paragraph uid, relationship id, style id) when known.
    pub source_id: Option<String>,
    pub message: String,
}

/// Ordered collection of diagnostics carried alongside pipeline output.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, stage: Stage, source_id: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        log::warn!("[{stage}] {message}");
        self.entries.push(Diagnostic {
            severity: Severity::Warning,
            stage,
            source_id: source_id.map(str::to_string),
            message,
        });
    }

    pub fn error(&mut self, stage: Stage, source_id: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        log::warn!("[{stage}] error: {message}");
        self.entries.push(Diagnostic {
            severity: Severity::Error,
            stage,
            source_id: source_id.map(str::to_string),
            message,
        });
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_collect_in_order() {
        let mut diags = Diagnostics::new();
        diags.warn(Stage::Parse, Some("s12"), "unknown style referenced");
        diags.error(Stage::Render, None, "font embedding failed");
        assert_eq!(diags.len(), 2);
        assert_eq!(diags.entries()[0].severity, Severity::Warning);
        assert_eq!(diags.entries()[0].source_id.as_deref(), Some("s12"));
        assert_eq!(diags.entries()[1].stage, Stage::Render);
    }

    #[test]
    fn test_error_display() {
        let err = DocError::MissingPart("word/document.xml".to_string());
        assert_eq!(err.to_string(), "missing part: word/document.xml");

        let err = DocError::Invariant {
            element: "p42".to_string(),
            message: "negative block width".to_string(),
        };
        assert!(err.to_string().contains("p42"));
    }
}
