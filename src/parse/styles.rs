//! `word/styles.xml` parsing.
//!
//! Loads `w:docDefaults` plus every `w:style`, then folds each style's
//! `basedOn` chain over the defaults (see [`StyleTable::resolve_all`]).
//! Cycles are cut with a diagnostic; the cut style keeps its own direct
//! properties and loses its inheritance.

use crate::error::{Diagnostics, Stage};
use crate::model::styles::{Style, StyleKind, StyleTable};
use crate::package::attr;
use crate::parse::{parse_ppr_into, parse_rpr_into, skip_subtree};
use quick_xml::events::Event;
use quick_xml::Reader;

pub fn parse_styles(bytes: &[u8], diags: &mut Diagnostics) -> StyleTable {
    let text = String::from_utf8_lossy(bytes);
    let mut reader = Reader::from_str(&text);
    let mut table = StyleTable::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:docDefaults" => parse_doc_defaults(&mut reader, &mut table),
                b"w:style" => {
                    let style = parse_style(&mut reader, &e);
                    table.push(style);
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                diags.warn(
                    Stage::Parse,
                    Some("word/styles.xml"),
                    format!("malformed styles part, using defaults: {e}"),
                );
                return StyleTable::default();
            }
        }
    }

    for broken in table.resolve_all() {
        diags.warn(
            Stage::Parse,
            Some(&broken),
            "style basedOn chain is cyclic; inheritance dropped for this style",
        );
    }

    table
}

fn parse_doc_defaults(reader: &mut Reader<&[u8]>, table: &mut StyleTable) {
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:rPr" => parse_rpr_into(reader, &mut table.default_run),
                b"w:pPr" => {
                    parse_ppr_into(reader, &mut table.default_paragraph);
                }
                _ => {}
            },
            Ok(Event::End(e)) if e.name().as_ref() == b"w:docDefaults" => break,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }
}

fn parse_style(reader: &mut Reader<&[u8]>, start: &quick_xml::events::BytesStart) -> Style {
    let mut style = Style {
        id: attr(start, b"w:styleId").unwrap_or_default(),
        kind: StyleKind::parse(&attr(start, b"w:type").unwrap_or_default()),
        is_default: matches!(attr(start, b"w:default").as_deref(), Some("1") | Some("true")),
        ..Default::default()
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:pPr" => {
                    parse_ppr_into(reader, &mut style.paragraph);
                }
                b"w:rPr" => parse_rpr_into(reader, &mut style.run),
                other => {
                    let name = other.to_vec();
                    skip_subtree(reader, &name);
                }
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:name" => {
                    if let Some(v) = attr(&e, b"w:val") {
                        style.name = v;
                    }
                }
                b"w:basedOn" => style.based_on = attr(&e, b"w:val"),
                _ => {}
            },
            Ok(Event::End(e)) if e.name().as_ref() == b"w:style" => break,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    if style.name.is_empty() {
        style.name = style.id.clone();
    }
    style
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::properties::Alignment;

    const STYLES_XML: &str = r#"<?xml version="1.0"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:docDefaults>
    <w:rPrDefault>
      <w:rPr>
        <w:rFonts w:ascii="Calibri"/>
        <w:sz w:val="22"/>
      </w:rPr>
    </w:rPrDefault>
  </w:docDefaults>
  <w:style w:type="paragraph" w:default="1" w:styleId="Normal">
    <w:name w:val="Normal"/>
  </w:style>
  <w:style w:type="paragraph" w:styleId="Heading1">
    <w:name w:val="heading 1"/>
    <w:basedOn w:val="Normal"/>
    <w:pPr>
      <w:spacing w:before="240" w:after="60"/>
      <w:jc w:val="both"/>
    </w:pPr>
    <w:rPr>
      <w:b/>
      <w:sz w:val="32"/>
    </w:rPr>
  </w:style>
</w:styles>"#;

    #[test]
    fn test_doc_defaults_become_base_layer() {
        let mut diags = Diagnostics::new();
        let table = parse_styles(STYLES_XML.as_bytes(), &mut diags);
        assert!(diags.is_empty());
        assert_eq!(table.default_run.size, Some(11.0)); // 22 half-points
        assert_eq!(table.default_run.font_family.as_deref(), Some("Calibri"));
    }

    #[test]
    fn test_heading_inherits_and_overrides() {
        let mut diags = Diagnostics::new();
        let table = parse_styles(STYLES_XML.as_bytes(), &mut diags);
        let h1 = table.get("Heading1").unwrap();
        assert_eq!(h1.name, "heading 1");
        assert_eq!(h1.resolved_run.size, Some(16.0));
        assert_eq!(h1.resolved_run.bold, Some(true));
        assert_eq!(h1.resolved_run.font_family.as_deref(), Some("Calibri"));
        assert_eq!(h1.resolved_paragraph.alignment, Some(Alignment::Justify));
        assert_eq!(h1.resolved_paragraph.spacing_before, Some(12.0));
    }

    #[test]
    fn test_normal_is_default() {
        let mut diags = Diagnostics::new();
        let table = parse_styles(STYLES_XML.as_bytes(), &mut diags);
        assert_eq!(table.normal().unwrap().id, "Normal");
    }

    #[test]
    fn test_malformed_styles_degrade() {
        let mut diags = Diagnostics::new();
        let table = parse_styles(b"<w:styles><w:oops></w:mismatch></w:styles>", &mut diags);
        assert_eq!(diags.len(), 1);
        assert!(table.is_empty());
    }
}
