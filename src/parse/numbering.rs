//! `word/numbering.xml` parsing.
//!
//! Abstract definitions (`w:abstractNum`) carry the level table; concrete
//! instances (`w:num`) point at an abstract id and may override individual
//! levels (`w:lvlOverride`).

use crate::error::{Diagnostics, Stage};
use crate::model::numbering::{
    AbstractNumbering, NumFmt, NumberingInstance, NumberingLevel, NumberingTable,
};
use crate::model::units;
use crate::package::attr;
use crate::parse::parse_rpr_into;
use quick_xml::events::Event;
use quick_xml::Reader;

pub fn parse_numbering(bytes: &[u8], diags: &mut Diagnostics) -> NumberingTable {
    let text = String::from_utf8_lossy(bytes);
    let mut reader = Reader::from_str(&text);
    let mut table = NumberingTable::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:abstractNum" => {
                    let id: i64 = attr(&e, b"w:abstractNumId")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(-1);
                    let levels = parse_levels(&mut reader, b"w:abstractNum");
                    table.abstracts.insert(id, AbstractNumbering { id, levels });
                }
                b"w:num" => {
                    let num_id: i64 = attr(&e, b"w:numId")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(-1);
                    let instance = parse_num_instance(&mut reader, num_id);
                    table.instances.insert(num_id, instance);
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                diags.warn(
                    Stage::Parse,
                    Some("word/numbering.xml"),
                    format!("malformed numbering part, lists will be unnumbered: {e}"),
                );
                return NumberingTable::default();
            }
        }
    }

    table
}

/// Parse `w:lvl` children up to the closing tag of `parent`.
fn parse_levels(reader: &mut Reader<&[u8]>, parent: &[u8]) -> Vec<NumberingLevel> {
    let mut levels = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"w:lvl" => {
                let ilvl = attr(&e, b"w:ilvl").and_then(|v| v.parse().ok()).unwrap_or(0);
                levels.push(parse_level(reader, ilvl));
            }
            Ok(Event::End(e)) if e.name().as_ref() == parent => break,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }
    levels
}

fn parse_level(reader: &mut Reader<&[u8]>, ilvl: usize) -> NumberingLevel {
    let mut level = NumberingLevel { ilvl, ..Default::default() };

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:start" => {
                    if let Some(v) = attr(&e, b"w:val").and_then(|v| v.parse().ok()) {
                        level.start = v;
                    }
                }
                b"w:numFmt" => {
                    if let Some(v) = attr(&e, b"w:val") {
                        level.format = NumFmt::parse(&v);
                    }
                }
                b"w:lvlText" => {
                    if let Some(v) = attr(&e, b"w:val") {
                        level.text = v;
                    }
                }
                b"w:ind" => {
                    level.indent_left = attr(&e, b"w:left")
                        .or_else(|| attr(&e, b"w:start"))
                        .and_then(|v| v.parse::<f64>().ok())
                        .map(units::twips_to_points);
                    level.indent_hanging = attr(&e, b"w:hanging")
                        .and_then(|v| v.parse::<f64>().ok())
                        .map(units::twips_to_points);
                }
                _ => {}
            },
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:rPr" => parse_rpr_into(reader, &mut level.marker_props),
                // w:pPr may wrap w:ind
                b"w:pPr" => {}
                _ => {}
            },
            Ok(Event::End(e)) if e.name().as_ref() == b"w:lvl" => break,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    level
}

fn parse_num_instance(reader: &mut Reader<&[u8]>, num_id: i64) -> NumberingInstance {
    let mut instance = NumberingInstance { num_id, ..Default::default() };
    let mut override_ilvl: Option<usize> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) if e.name().as_ref() == b"w:abstractNumId" => {
                if let Some(v) = attr(&e, b"w:val").and_then(|v| v.parse().ok()) {
                    instance.abstract_id = v;
                }
            }
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:lvlOverride" => {
                    override_ilvl = attr(&e, b"w:ilvl").and_then(|v| v.parse().ok());
                }
                b"w:lvl" => {
                    let ilvl = attr(&e, b"w:ilvl")
                        .and_then(|v| v.parse().ok())
                        .or(override_ilvl)
                        .unwrap_or(0);
                    instance.overrides.insert(ilvl, parse_level(reader, ilvl));
                }
                _ => {}
            },
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:num" => break,
                b"w:lvlOverride" => override_ilvl = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    instance
}

#[cfg(test)]
mod tests {
    use super::*;

    const NUMBERING_XML: &str = r#"<?xml version="1.0"?>
<w:numbering xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:abstractNum w:abstractNumId="0">
    <w:lvl w:ilvl="0">
      <w:start w:val="1"/>
      <w:numFmt w:val="decimal"/>
      <w:lvlText w:val="%1."/>
      <w:pPr>
        <w:ind w:left="720" w:hanging="360"/>
      </w:pPr>
    </w:lvl>
    <w:lvl w:ilvl="1">
      <w:start w:val="1"/>
      <w:numFmt w:val="decimal"/>
      <w:lvlText w:val="%1.%2."/>
    </w:lvl>
  </w:abstractNum>
  <w:num w:numId="1">
    <w:abstractNumId w:val="0"/>
  </w:num>
  <w:num w:numId="2">
    <w:abstractNumId w:val="0"/>
    <w:lvlOverride w:ilvl="0">
      <w:lvl w:ilvl="0">
        <w:start w:val="5"/>
        <w:numFmt w:val="upperRoman"/>
        <w:lvlText w:val="%1)"/>
      </w:lvl>
    </w:lvlOverride>
  </w:num>
</w:numbering>"#;

    #[test]
    fn test_abstract_levels_parsed() {
        let mut diags = Diagnostics::new();
        let table = parse_numbering(NUMBERING_XML.as_bytes(), &mut diags);
        assert!(diags.is_empty());

        let resolved = table.resolve(1, 0).unwrap();
        assert_eq!(resolved.level.format, NumFmt::Decimal);
        assert_eq!(resolved.level.text, "%1.");
        assert_eq!(resolved.level.indent_left, Some(36.0));
        assert_eq!(resolved.level.indent_hanging, Some(18.0));

        let nested = table.resolve(1, 1).unwrap();
        assert_eq!(nested.level.text, "%1.%2.");
    }

    #[test]
    fn test_level_override_wins() {
        let mut diags = Diagnostics::new();
        let table = parse_numbering(NUMBERING_XML.as_bytes(), &mut diags);

        let overridden = table.resolve(2, 0).unwrap();
        assert_eq!(overridden.level.format, NumFmt::UpperRoman);
        assert_eq!(overridden.level.start, 5);
        // Level 1 still comes from the abstract definition.
        let inherited = table.resolve(2, 1).unwrap();
        assert_eq!(inherited.level.text, "%1.%2.");
    }

    #[test]
    fn test_malformed_numbering_degrades() {
        let mut diags = Diagnostics::new();
        let table = parse_numbering(b"<w:numbering><w:x></w:y></w:numbering>", &mut diags);
        assert_eq!(diags.len(), 1);
        assert!(table.abstracts.is_empty());
    }
}
