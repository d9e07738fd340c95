//! # OPC Package Reader
//!
//! A DOCX file is a ZIP archive (an OPC package): parts keyed by path,
//! content types declared in `[Content_Types].xml`, and typed relationships
//! between parts serialized in sibling `_rels/*.rels` files.
//!
//! The reader loads every part into owned byte buffers in one pass and
//! answers two questions for the parser: "give me part X" and "given part X
//! and relationship id Y, which part is the target?". Part bytes are never
//! modified after open.

use crate::error::{DocError, Diagnostics, Stage};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use zip::ZipArchive;

/// Whether a relationship target lives inside the package or outside
/// (hyperlinks, linked images).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    Internal,
    External,
}

/// One relationship edge from a source part.
#[derive(Debug, Clone)]
pub struct Relationship {
    pub id: String,
    /// Full relationship type URI; compare with [`rel_type_is`].
    pub rel_type: String,
    /// Normalized target. For `Internal` this is a package part path.
    pub target: String,
    pub mode: TargetMode,
}

/// Does a relationship type URI name the given short type ("image",
/// "header", "officeDocument", ...)? OPC types end in `/<short-name>`.
pub fn rel_type_is(rel_type: &str, short: &str) -> bool {
    rel_type.rsplit('/').next() == Some(short)
}

/// The opened package: parts, content types, and the relationship graph.
#[derive(Debug)]
pub struct Package {
    parts: HashMap<String, Vec<u8>>,
    /// Extension defaults from `[Content_Types].xml` (lowercased ext → type).
    default_types: HashMap<String, String>,
    /// Per-part overrides (normalized part path → type).
    override_types: HashMap<String, String>,
    /// source part path ("" for package root) → its relationships by id.
    relationships: HashMap<String, HashMap<String, Relationship>>,
}

impl Package {
    /// An empty package, for parsing contexts with no relationships.
    pub(crate) fn empty() -> Self {
        Self {
            parts: HashMap::new(),
            default_types: HashMap::new(),
            override_types: HashMap::new(),
            relationships: HashMap::new(),
        }
    }

    /// Open a package from a file path.
    pub fn open(path: impl AsRef<Path>, diags: &mut Diagnostics) -> Result<Self, DocError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes, diags)
    }

    /// Open a package from raw bytes. Fails if the bytes are not a ZIP or
    /// the required parts are absent.
    pub fn from_bytes(bytes: &[u8], diags: &mut Diagnostics) -> Result<Self, DocError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| DocError::InvalidPackage(format!("not a ZIP archive: {e}")))?;

        let mut parts: HashMap<String, Vec<u8>> = HashMap::new();
        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .map_err(|e| DocError::InvalidPackage(format!("corrupt ZIP entry: {e}")))?;
            if file.is_dir() {
                continue;
            }
            let name = normalize_path(file.name());
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .map_err(|e| DocError::InvalidPackage(format!("failed to read {name}: {e}")))?;
            parts.insert(name, data);
        }

        if !parts.contains_key("[Content_Types].xml") {
            return Err(DocError::MissingPart("[Content_Types].xml".to_string()));
        }
        if !parts.contains_key("word/document.xml") {
            return Err(DocError::MissingPart("word/document.xml".to_string()));
        }

        let (default_types, override_types) =
            parse_content_types(&parts["[Content_Types].xml"])?;

        let mut relationships = HashMap::new();
        let rels_parts: Vec<String> = parts
            .keys()
            .filter(|p| p.ends_with(".rels"))
            .cloned()
            .collect();
        for rels_path in rels_parts {
            let source = rels_source_part(&rels_path);
            match parse_relationships(&parts[&rels_path], &source) {
                Ok(rels) => {
                    relationships.insert(source, rels);
                }
                Err(e) => {
                    // A malformed .rels degrades to "no relationships from
                    // this source"; the open itself continues.
                    diags.warn(
                        Stage::Package,
                        Some(&rels_path),
                        format!("malformed relationships part, ignoring: {e}"),
                    );
                    relationships.insert(source, HashMap::new());
                }
            }
        }

        Ok(Self { parts, default_types, override_types, relationships })
    }

    /// Owned bytes of a part.
    pub fn read_part(&self, path: &str) -> Result<&[u8], DocError> {
        let normalized = normalize_path(path);
        self.parts
            .get(&normalized)
            .map(Vec::as_slice)
            .ok_or(DocError::MissingPart(normalized))
    }

    pub fn has_part(&self, path: &str) -> bool {
        self.parts.contains_key(&normalize_path(path))
    }

    /// Declared content type of a part: override first, then extension default.
    pub fn content_type(&self, path: &str) -> Option<&str> {
        let normalized = normalize_path(path);
        if let Some(t) = self.override_types.get(&normalized) {
            return Some(t);
        }
        let ext = normalized.rsplit('.').next()?.to_ascii_lowercase();
        self.default_types.get(&ext).map(String::as_str)
    }

    /// Resolve `(source part, rel id)` to `(target path, rel type, mode)`.
    /// Relative targets are resolved against the source part's directory.
    pub fn resolve_rel(&self, source_part: &str, rel_id: &str) -> Option<&Relationship> {
        self.relationships
            .get(&normalize_path(source_part))?
            .get(rel_id)
    }

    /// All relationships originating from a part (package root is `""`).
    pub fn rels_from(&self, source_part: &str) -> impl Iterator<Item = &Relationship> {
        self.relationships
            .get(&normalize_path(source_part))
            .into_iter()
            .flat_map(|m| m.values())
    }

    /// Iterate parts, optionally filtered by a content-type substring.
    pub fn iter_parts(
        &self,
        content_type_filter: Option<&str>,
    ) -> impl Iterator<Item = (&str, &[u8])> {
        let filter = content_type_filter.map(str::to_string);
        self.parts.iter().filter_map(move |(path, bytes)| {
            if let Some(ref needle) = filter {
                let ct = self.content_type(path)?;
                if !ct.contains(needle.as_str()) {
                    return None;
                }
            }
            Some((path.as_str(), bytes.as_slice()))
        })
    }
}

/// Canonical part path: forward slashes, no leading slash.
fn normalize_path(path: &str) -> String {
    let p = path.replace('\\', "/");
    p.trim_start_matches('/').to_string()
}

/// For `word/_rels/document.xml.rels` the source part is
/// `word/document.xml`; for the root `_rels/.rels` it is `""`.
fn rels_source_part(rels_path: &str) -> String {
    let path = normalize_path(rels_path);
    let (dir, file) = match path.rfind('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path.as_str()),
    };
    let source_file = file.trim_end_matches(".rels");
    let parent = dir.trim_end_matches("_rels").trim_end_matches('/');
    if source_file.is_empty() {
        return String::new();
    }
    if parent.is_empty() {
        source_file.to_string()
    } else {
        format!("{parent}/{source_file}")
    }
}

/// Resolve a relationship target against the source part's directory,
/// collapsing `.` and `..` segments.
fn resolve_target(source_part: &str, target: &str) -> String {
    let target = normalize_path(target);
    let base_dir = match source_part.rfind('/') {
        Some(i) => &source_part[..i],
        None => "",
    };
    let mut segments: Vec<&str> = if target.starts_with('/') || base_dir.is_empty() {
        Vec::new()
    } else {
        base_dir.split('/').collect()
    };
    for seg in target.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

fn parse_content_types(
    bytes: &[u8],
) -> Result<(HashMap<String, String>, HashMap<String, String>), DocError> {
    let text = String::from_utf8_lossy(bytes);
    let mut reader = Reader::from_str(&text);
    let mut defaults = HashMap::new();
    let mut overrides = HashMap::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"Default" => {
                    let ext = attr(&e, b"Extension");
                    let ct = attr(&e, b"ContentType");
                    if let (Some(ext), Some(ct)) = (ext, ct) {
                        defaults.insert(ext.to_ascii_lowercase(), ct);
                    }
                }
                b"Override" => {
                    let part = attr(&e, b"PartName");
                    let ct = attr(&e, b"ContentType");
                    if let (Some(part), Some(ct)) = (part, ct) {
                        overrides.insert(normalize_path(&part), ct);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(DocError::MalformedXml {
                    part: "[Content_Types].xml".to_string(),
                    source: e,
                })
            }
        }
    }

    Ok((defaults, overrides))
}

fn parse_relationships(
    bytes: &[u8],
    source_part: &str,
) -> Result<HashMap<String, Relationship>, quick_xml::Error> {
    let text = String::from_utf8_lossy(bytes);
    let mut reader = Reader::from_str(&text);
    let mut rels = HashMap::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"Relationship" => {
                let id = attr(&e, b"Id");
                let rel_type = attr(&e, b"Type");
                let target = attr(&e, b"Target");
                let mode = match attr(&e, b"TargetMode").as_deref() {
                    Some("External") => TargetMode::External,
                    _ => TargetMode::Internal,
                };
                if let (Some(id), Some(rel_type), Some(raw_target)) = (id, rel_type, target) {
                    let target = match mode {
                        TargetMode::Internal => resolve_target(source_part, &raw_target),
                        TargetMode::External => raw_target,
                    };
                    rels.insert(id.clone(), Relationship { id, rel_type, target, mode });
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(rels)
}

/// Extract an attribute value by qualified name.
pub(crate) fn attr(e: &quick_xml::events::BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(Result::ok)
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}
