//! # UnifiedLayout JSON Export
//!
//! Emits the optimized-pipeline JSON form: a compact, page-indexed view of
//! the layout with a deduplicated style table and a media index. Typical
//! output is a few percent of the PDF size, which is what makes it usable
//! as a round-trip interchange format.

use crate::layout::{BlockContent, LayoutBlock, LayoutObject, UnifiedLayout};
use crate::model::properties::{Alignment, Color};
use crate::model::DocumentModel;
use crate::pdf::image;
use crate::text::InlineBoxKind;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Render the layout as the optimized JSON document (§6.3 schema).
pub fn export_layout(layout: &UnifiedLayout, model: &DocumentModel) -> Value {
    let total = layout.total_pages();

    // Styles: collect referenced ids, dedup identical resolved property
    // sets so the array stays small.
    let mut style_entries: Vec<Value> = Vec::new();
    let mut entry_index: HashMap<String, usize> = HashMap::new();
    let mut id_to_index: HashMap<String, usize> = HashMap::new();
    for page in &layout.pages {
        collect_style_ids(&page.blocks, model, &mut style_entries, &mut entry_index, &mut id_to_index);
    }

    let media: Vec<Value> = model
        .media
        .iter()
        .map(|m| {
            let (w, h) = image::decode(&m.bytes)
                .map(|d| (d.width_px, d.height_px))
                .unwrap_or((0, 0));
            json!({
                "path": m.path,
                "rel_id": m.rel_id,
                "width": w,
                "height": h,
            })
        })
        .collect();

    let pages: Vec<Value> = layout
        .pages
        .iter()
        .map(|page| {
            let blocks: Vec<Value> = page
                .blocks
                .iter()
                .map(|b| block_value(b, model, &id_to_index, page.number, total))
                .collect();
            json!({
                "n": page.number,
                "size": [round2(page.width), round2(page.height)],
                "margins": [
                    round2(page.margins.top),
                    round2(page.margins.bottom),
                    round2(page.margins.left),
                    round2(page.margins.right)
                ],
                "blocks": blocks,
                "h": page.header_blocks,
                "f": page.footer_blocks,
            })
        })
        .collect();

    json!({
        "version": "2.0",
        "format": "optimized_pipeline",
        "metadata": {
            "total_pages": total,
            "source": layout.source,
        },
        "styles": style_entries,
        "media": media,
        "pages": pages,
    })
}

/// Serialize to a UTF-8 JSON string.
pub fn export_layout_string(layout: &UnifiedLayout, model: &DocumentModel) -> String {
    export_layout(layout, model).to_string()
}

fn collect_style_ids(
    blocks: &[LayoutBlock],
    model: &DocumentModel,
    entries: &mut Vec<Value>,
    entry_index: &mut HashMap<String, usize>,
    id_to_index: &mut HashMap<String, usize>,
) {
    for block in blocks {
        if let Some(id) = &block.style_ref {
            if !id_to_index.contains_key(id) {
                if let Some(style) = model.styles.get(id) {
                    let value = style_value(style);
                    let key = value.to_string();
                    let index = match entry_index.get(&key) {
                        Some(&i) => i,
                        None => {
                            entries.push(value);
                            entry_index.insert(key, entries.len() - 1);
                            entries.len() - 1
                        }
                    };
                    id_to_index.insert(id.clone(), index);
                }
            }
        }
        match &block.content {
            BlockContent::Table(tl) => {
                for cell in &tl.cells {
                    collect_style_ids(&cell.blocks, model, entries, entry_index, id_to_index);
                }
            }
            BlockContent::TextBox(children) => {
                collect_style_ids(children, model, entries, entry_index, id_to_index);
            }
            _ => {}
        }
    }
}

fn style_value(style: &crate::model::styles::Style) -> Value {
    let run = &style.resolved_run;
    let par = &style.resolved_paragraph;
    json!({
        "style_name": style.name,
        "font": run.font_family.clone().unwrap_or_default(),
        "size": run.size.unwrap_or(0.0),
        "bold": run.bold.unwrap_or(false),
        "italic": run.italic.unwrap_or(false),
        "alignment": alignment_str(par.alignment),
        "spacing": {
            "before": par.spacing_before.unwrap_or(0.0),
            "after": par.spacing_after.unwrap_or(0.0),
        },
        "borders": par.borders.map(|b| b.any()).unwrap_or(false),
        "shading": par.shading.map(color_hex),
    })
}

fn alignment_str(a: Option<Alignment>) -> &'static str {
    match a.unwrap_or_default() {
        Alignment::Left => "left",
        Alignment::Center => "center",
        Alignment::Right => "right",
        Alignment::Justify => "both",
    }
}

fn color_hex(c: Color) -> String {
    format!(
        "{:02X}{:02X}{:02X}",
        (c.r * 255.0).round() as u8,
        (c.g * 255.0).round() as u8,
        (c.b * 255.0).round() as u8
    )
}

fn block_value(
    block: &LayoutBlock,
    model: &DocumentModel,
    id_to_index: &HashMap<String, usize>,
    page_number: usize,
    total_pages: usize,
) -> Value {
    let mut obj = Map::new();
    obj.insert(
        "f".to_string(),
        json!([
            round2(block.frame.x),
            round2(block.frame.y),
            round2(block.frame.width),
            round2(block.frame.height)
        ]),
    );
    obj.insert("t".to_string(), json!(block.kind.as_str()));
    obj.insert(
        "s".to_string(),
        block
            .style_ref
            .as_ref()
            .and_then(|id| id_to_index.get(id))
            .map(|&i| json!(i))
            .unwrap_or(Value::Null),
    );
    obj.insert(
        "c".to_string(),
        content_value(&block.content, model, id_to_index, page_number, total_pages),
    );
    obj.insert("uid".to_string(), json!(block.uid));
    obj.insert("seq".to_string(), json!(block.seq));
    Value::Object(obj)
}

fn content_value(
    content: &BlockContent,
    model: &DocumentModel,
    id_to_index: &HashMap<String, usize>,
    page_number: usize,
    total_pages: usize,
) -> Value {
    match content {
        BlockContent::Paragraph(pl) => {
            let lines: Vec<Value> = pl
                .lines
                .iter()
                .map(|line| {
                    let items: Vec<Value> = line
                        .boxes
                        .iter()
                        .filter_map(|b| match &b.kind {
                            InlineBoxKind::Text { text, style }
                            | InlineBoxKind::Field { text, style, .. } => {
                                let mut item = Map::new();
                                item.insert(
                                    "t".to_string(),
                                    json!(resolve_fields(text, page_number, total_pages)),
                                );
                                item.insert("x".to_string(), json!(round2(b.x)));
                                item.insert("w".to_string(), json!(round2(b.width)));
                                item.insert("font".to_string(), json!(style.font.family));
                                item.insert("size".to_string(), json!(style.size));
                                if let Some(link) = &style.link {
                                    item.insert("link".to_string(), json!(link));
                                }
                                Some(Value::Object(item))
                            }
                            InlineBoxKind::Object { index, .. } => Some(json!({
                                "obj": index,
                                "x": round2(b.x),
                                "w": round2(b.width),
                            })),
                            InlineBoxKind::Tab { .. } => None,
                        })
                        .collect();
                    json!({
                        "y": round2(line.baseline_y),
                        "x": round2(line.offset_x),
                        "w": round2(line.available_width),
                        "items": items,
                    })
                })
                .collect();

            let mut value = Map::new();
            value.insert("lines".to_string(), json!(lines));
            if let Some(m) = &pl.marker {
                value.insert("marker".to_string(), json!(m.text));
            }
            let objects: Vec<Value> = pl
                .objects
                .iter()
                .map(|o| match o {
                    LayoutObject::Image(img) => {
                        json!({ "m": img.media_rel.as_deref().and_then(|r| model.media_index(r)) })
                    }
                    LayoutObject::TextBox { blocks, width, height } => json!({
                        "textbox": blocks
                            .iter()
                            .map(|b| block_value(b, model, id_to_index, page_number, total_pages))
                            .collect::<Vec<_>>(),
                        "w": round2(*width),
                        "h": round2(*height),
                    }),
                })
                .collect();
            if !objects.is_empty() {
                value.insert("objects".to_string(), json!(objects));
            }
            Value::Object(value)
        }
        BlockContent::Table(tl) => json!({
            "cols": tl.column_widths.iter().map(|w| round2(*w)).collect::<Vec<_>>(),
            "cells": tl.cells.iter().map(|cell| json!({
                "f": [
                    round2(cell.frame.x),
                    round2(cell.frame.y),
                    round2(cell.frame.width),
                    round2(cell.frame.height)
                ],
                "shading": cell.shading.map(color_hex),
                "blocks": cell.blocks
                    .iter()
                    .map(|b| block_value(b, model, id_to_index, page_number, total_pages))
                    .collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
        }),
        BlockContent::Image(img) => {
            json!({ "m": img.media_rel.as_deref().and_then(|r| model.media_index(r)) })
        }
        BlockContent::TextBox(children) => json!({
            "blocks": children
                .iter()
                .map(|b| block_value(b, model, id_to_index, page_number, total_pages))
                .collect::<Vec<_>>(),
        }),
    }
}

fn resolve_fields(text: &str, page_number: usize, total_pages: usize) -> String {
    if !text.contains("{{") {
        return text.to_string();
    }
    text.replace("{{PAGE}}", &page_number.to_string())
        .replace("{{NUMPAGES}}", &total_pages.to_string())
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostics;
    use crate::font::FontContext;
    use crate::layout::{LayoutPipeline, PipelineOptions};
    use crate::model::properties::{ParagraphProperties, RunProperties};
    use crate::model::{Block, Inline, Paragraph, Run, Section};

    fn layout_and_model(texts: &[&str]) -> (UnifiedLayout, DocumentModel) {
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
        (layout, model)
    }

    #[test]
    fn test_schema_envelope() {
        let (layout, model) = layout_and_model(&["Hello"]);
        let v = export_layout(&layout, &model);
        assert_eq!(v["version"], "2.0");
        assert_eq!(v["format"], "optimized_pipeline");
        assert_eq!(v["metadata"]["total_pages"], 1);
        assert!(v["pages"].is_array());
        assert!(v["styles"].is_array());
        assert!(v["media"].is_array());
    }

    #[test]
    fn test_block_record_shape() {
        let (layout, model) = layout_and_model(&["Hello"]);
        let v = export_layout(&layout, &model);
        let block = &v["pages"][0]["blocks"][0];
        assert_eq!(block["t"], "paragraph");
        assert_eq!(block["f"].as_array().unwrap().len(), 4);
        assert!((block["f"][0].as_f64().unwrap() - 72.0).abs() < 0.01);
        assert!(block["uid"].as_str().unwrap().starts_with('p'));
        assert!(block["seq"].as_u64().is_some());
        let items = block["c"]["lines"][0]["items"].as_array().unwrap();
        let joined: String = items.iter().map(|i| i["t"].as_str().unwrap_or("")).collect();
        assert_eq!(joined, "Hello");
    }

    #[test]
    fn test_valid_utf8_string_output() {
        let (layout, model) = layout_and_model(&["Za\u{017C}\u{00F3}\u{0142}\u{0107}"]);
        let s = export_layout_string(&layout, &model);
        let reparsed: Value = serde_json::from_str(&s).unwrap();
        let items = reparsed["pages"][0]["blocks"][0]["c"]["lines"][0]["items"]
            .as_array()
            .unwrap();
        let joined: String = items.iter().map(|i| i["t"].as_str().unwrap_or("")).collect();
        assert_eq!(joined, "Za\u{017C}\u{00F3}\u{0142}\u{0107}");
    }

    #[test]
    fn test_styles_deduplicated() {
        use crate::model::styles::Style;
        let (mut layout, mut model) = layout_and_model(&["a", "b"]);
        // Two identical named styles referenced by two blocks collapse to
        // one styles[] entry.
        for id in ["S1", "S2"] {
            let mut style = Style { id: id.to_string(), name: "Same".to_string(), ..Default::default() };
            style.run.size = Some(11.0);
            style.resolved_run.size = Some(11.0);
            model.styles.push(style);
        }
        for (i, page) in layout.pages.iter_mut().enumerate() {
            let _ = i;
            page.blocks[0].style_ref = Some("S1".to_string());
            if page.blocks.len() > 1 {
                page.blocks[1].style_ref = Some("S2".to_string());
            }
        }
        let v = export_layout(&layout, &model);
        assert_eq!(v["styles"].as_array().unwrap().len(), 1, "identical styles must collapse");
        assert_eq!(v["pages"][0]["blocks"][0]["s"], 0);
        assert_eq!(v["pages"][0]["blocks"][1]["s"], 0);
    }

    #[test]
    fn test_color_hex() {
        assert_eq!(color_hex(Color::rgb(1.0, 0.0, 0.0)), "FF0000");
        assert_eq!(color_hex(Color::rgb(0.0, 0.0, 0.0)), "000000");
    }

    #[test]
    fn test_hyperlink_target_exported() {
        let mut model = DocumentModel { default_tab_width: 36.0, ..Default::default() };
        model.sections.push(Section::default());
        model.body.push(Block::Paragraph(Paragraph {
            uid: "p1".to_string(),
            props: ParagraphProperties::default(),
            inlines: vec![Inline::Hyperlink {
                target: Some("https://example.com".to_string()),
                children: vec![Inline::Run(Run {
                    props: RunProperties::default(),
                    text: "click".to_string(),
                })],
            }],
        }));
        let fonts = FontContext::new();
        let mut diags = Diagnostics::new();
        let layout = LayoutPipeline::new(&model, &fonts, &mut diags)
            .run(&PipelineOptions::default())
            .unwrap();
        let v = export_layout(&layout, &model);
        let item = &v["pages"][0]["blocks"][0]["c"]["lines"][0]["items"][0];
        assert_eq!(item["t"], "click");
        assert_eq!(item["link"], "https://example.com");
    }
}
