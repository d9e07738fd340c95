//! Style table and inheritance resolution.
//!
//! Styles are stored in a flat vector indexed by position; a side map takes
//! style ids to indices, which keeps the tree free of owning pointers.
//! Resolution folds each style's `basedOn` chain over the document defaults
//! once, at load time; paragraphs later overlay their direct formatting on
//! the cached result.

use crate::model::properties::{ParagraphProperties, RunProperties};
use std::collections::HashMap;

/// Style kind (`w:style w:type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StyleKind {
    #[default]
    Paragraph,
    Character,
    Table,
    Numbering,
}

impl StyleKind {
    pub fn parse(val: &str) -> Self {
        match val {
            "character" => StyleKind::Character,
            "table" => StyleKind::Table,
            "numbering" => StyleKind::Numbering,
            _ => StyleKind::Paragraph,
        }
    }
}

/// One style definition. `resolved_*` are filled by [`StyleTable::resolve_all`].
#[derive(Debug, Clone, Default)]
pub struct Style {
    pub id: String,
    pub name: String,
    pub kind: StyleKind,
    pub based_on: Option<String>,
    pub is_default: bool,
    /// Direct properties declared on this style.
    pub paragraph: ParagraphProperties,
    pub run: RunProperties,
    /// Fully folded properties: doc defaults ← ancestors ← this style.
    pub resolved_paragraph: ParagraphProperties,
    pub resolved_run: RunProperties,
}

/// The document's style table plus the `w:docDefaults` layer.
#[derive(Debug, Clone, Default)]
pub struct StyleTable {
    styles: Vec<Style>,
    by_id: HashMap<String, usize>,
    pub default_paragraph: ParagraphProperties,
    pub default_run: RunProperties,
    /// Index of the default paragraph style ("Normal"), if declared.
    normal_idx: Option<usize>,
}

impl StyleTable {
    pub fn push(&mut self, style: Style) {
        let idx = self.styles.len();
        if style.is_default && style.kind == StyleKind::Paragraph {
            self.normal_idx = Some(idx);
        }
        self.by_id.insert(style.id.clone(), idx);
        self.styles.push(style);
    }

    pub fn get(&self, id: &str) -> Option<&Style> {
        self.by_id.get(id).map(|&i| &self.styles[i])
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn by_index(&self, idx: usize) -> Option<&Style> {
        self.styles.get(idx)
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }

    /// The document's "Normal" style; absent style references fall back here.
    pub fn normal(&self) -> Option<&Style> {
        self.normal_idx
            .map(|i| &self.styles[i])
            .or_else(|| self.get("Normal"))
    }

    /// Effective paragraph properties for a paragraph-style reference:
    /// the resolved style of `style_id`, or Normal, or bare defaults.
    pub fn effective_paragraph(&self, style_id: Option<&str>) -> ParagraphProperties {
        let style = style_id.and_then(|id| self.get(id)).or_else(|| self.normal());
        match style {
            Some(s) => s.resolved_paragraph.clone(),
            None => self.default_paragraph.clone(),
        }
    }

    pub fn effective_run(&self, style_id: Option<&str>) -> RunProperties {
        let style = style_id.and_then(|id| self.get(id)).or_else(|| self.normal());
        match style {
            Some(s) => s.resolved_run.clone(),
            None => self.default_run.clone(),
        }
    }

    /// Fold every style's `basedOn` chain over the document defaults.
    ///
    /// Chains are walked root-to-leaf so later (more specific) properties
    /// override earlier ones. A cycle is cut at the style that closes it:
    /// that style loses its inheritance and the broken id is reported.
    pub fn resolve_all(&mut self) -> Vec<String> {
        let mut broken = Vec::new();

        for idx in 0..self.styles.len() {
            // Collect the chain leaf-to-root by id.
            let mut chain: Vec<usize> = vec![idx];
            let mut seen: Vec<usize> = vec![idx];
            let mut current = idx;
            loop {
                let parent = match &self.styles[current].based_on {
                    Some(parent_id) => self.by_id.get(parent_id).copied(),
                    None => None,
                };
                match parent {
                    Some(p) if seen.contains(&p) => {
                        broken.push(self.styles[idx].id.clone());
                        chain.truncate(1); // cut: keep only the style itself
                        break;
                    }
                    Some(p) => {
                        chain.push(p);
                        seen.push(p);
                        current = p;
                    }
                    None => break,
                }
            }

            // Fold root-to-leaf over doc defaults.
            let mut ppr = self.default_paragraph.clone();
            let mut rpr = self.default_run.clone();
            for &ancestor in chain.iter().rev() {
                ppr = self.styles[ancestor].paragraph.cascade_over(&ppr);
                rpr = self.styles[ancestor].run.cascade_over(&rpr);
            }
            self.styles[idx].resolved_paragraph = ppr;
            self.styles[idx].resolved_run = rpr;
        }

        broken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::properties::Alignment;

    fn style(id: &str, based_on: Option<&str>) -> Style {
        Style {
            id: id.to_string(),
            name: id.to_string(),
            based_on: based_on.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_chain_folds_root_to_leaf() {
        let mut table = StyleTable::default();
        table.default_run.size = Some(11.0);

        let mut base = style("Base", None);
        base.run.bold = Some(true);
        base.run.size = Some(12.0);
        table.push(base);

        let mut heading = style("Heading", Some("Base"));
        heading.run.size = Some(16.0);
        table.push(heading);

        let broken = table.resolve_all();
        assert!(broken.is_empty());

        let h = table.get("Heading").unwrap();
        assert_eq!(h.resolved_run.size, Some(16.0)); // leaf wins
        assert_eq!(h.resolved_run.bold, Some(true)); // inherited
    }

    #[test]
    fn test_cycle_is_cut_with_report() {
        let mut table = StyleTable::default();
        table.push(style("A", Some("B")));
        table.push(style("B", Some("A")));

        let broken = table.resolve_all();
        assert_eq!(broken.len(), 2);
        // Both styles still resolved (without inheritance).
        assert!(table.get("A").is_some());
    }

    #[test]
    fn test_resolution_idempotent() {
        let mut table = StyleTable::default();
        let mut s = style("Body", None);
        s.paragraph.alignment = Some(Alignment::Justify);
        table.push(s);

        table.resolve_all();
        let first = table.get("Body").unwrap().resolved_paragraph.clone();
        table.resolve_all();
        let second = table.get("Body").unwrap().resolved_paragraph.clone();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_style_falls_back_to_normal() {
        let mut table = StyleTable::default();
        let mut normal = style("Normal", None);
        normal.is_default = true;
        normal.run.size = Some(11.0);
        table.push(normal);
        table.resolve_all();

        let props = table.effective_run(Some("DoesNotExist"));
        assert_eq!(props.size, Some(11.0));
    }
}
