//! Numbering (list) definitions.
//!
//! WordprocessingML splits list definitions in two: abstract definitions
//! (`w:abstractNum`, the reusable level table) and concrete instances
//! (`w:num`, referenced by paragraphs via `numId`, optionally overriding
//! individual levels). Both tables are flat vectors indexed by id.

use crate::model::properties::RunProperties;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Number format for one list level (`w:numFmt`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NumFmt {
    /// 1, 2, 3
    Decimal,
    /// 01, 02, 03
    DecimalZero,
    /// i, ii, iii
    LowerRoman,
    /// I, II, III
    UpperRoman,
    /// a, b, c
    LowerLetter,
    /// A, B, C
    UpperLetter,
    /// Non-numbered marker (the `lvlText` is literal).
    #[default]
    Bullet,
    /// `none`: suppressed marker.
    None,
}

impl NumFmt {
    pub fn parse(val: &str) -> Self {
        match val {
            "decimal" => NumFmt::Decimal,
            "decimalZero" => NumFmt::DecimalZero,
            "lowerRoman" => NumFmt::LowerRoman,
            "upperRoman" => NumFmt::UpperRoman,
            "lowerLetter" => NumFmt::LowerLetter,
            "upperLetter" => NumFmt::UpperLetter,
            "none" => NumFmt::None,
            _ => NumFmt::Bullet,
        }
    }
}

/// One level of an abstract numbering definition (`w:lvl`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberingLevel {
    /// Indentation level, 0-based.
    pub ilvl: usize,
    pub format: NumFmt,
    /// Counter start value (`w:start`), default 1.
    pub start: i64,
    /// Marker template: `%1` is the level-0 counter, `%2` level 1, ...
    /// For bullets this is the literal marker text.
    pub text: String,
    /// Left indent of the paragraph text, in points.
    pub indent_left: Option<f64>,
    /// Hanging indent carving out room for the marker, in points.
    pub indent_hanging: Option<f64>,
    /// Run formatting applied to the marker itself.
    pub marker_props: RunProperties,
}

impl Default for NumberingLevel {
    fn default() -> Self {
        Self {
            ilvl: 0,
            format: NumFmt::default(),
            start: 1,
            text: String::new(),
            indent_left: None,
            indent_hanging: None,
            marker_props: RunProperties::default(),
        }
    }
}

/// A reusable abstract list definition (`w:abstractNum`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbstractNumbering {
    pub id: i64,
    pub levels: Vec<NumberingLevel>,
}

impl AbstractNumbering {
    pub fn level(&self, ilvl: usize) -> Option<&NumberingLevel> {
        self.levels.iter().find(|l| l.ilvl == ilvl)
    }
}

/// A concrete instance (`w:num`) pointing at an abstract definition,
/// with optional per-level overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumberingInstance {
    pub num_id: i64,
    pub abstract_id: i64,
    pub overrides: HashMap<usize, NumberingLevel>,
}

/// The document's numbering tables.
#[derive(Debug, Clone, Default)]
pub struct NumberingTable {
    pub abstracts: HashMap<i64, AbstractNumbering>,
    pub instances: HashMap<i64, NumberingInstance>,
}

impl NumberingTable {
    /// Resolve `(numId, ilvl)` to the effective level definition, applying
    /// instance-level overrides over the abstract definition.
    pub fn resolve(&self, num_id: i64, ilvl: usize) -> Option<ResolvedLevel<'_>> {
        let instance = self.instances.get(&num_id)?;
        if let Some(over) = instance.overrides.get(&ilvl) {
            return Some(ResolvedLevel {
                abstract_id: instance.abstract_id,
                level: over,
            });
        }
        let abs = self.abstracts.get(&instance.abstract_id)?;
        Some(ResolvedLevel {
            abstract_id: instance.abstract_id,
            level: abs.level(ilvl)?,
        })
    }
}

/// A resolved level plus the abstract id that keys its counter row.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedLevel<'a> {
    pub abstract_id: i64,
    pub level: &'a NumberingLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_level(fmt: NumFmt, text: &str) -> NumberingTable {
        let mut table = NumberingTable::default();
        table.abstracts.insert(
            0,
            AbstractNumbering {
                id: 0,
                levels: vec![NumberingLevel {
                    ilvl: 0,
                    format: fmt,
                    text: text.to_string(),
                    ..Default::default()
                }],
            },
        );
        table.instances.insert(
            1,
            NumberingInstance {
                num_id: 1,
                abstract_id: 0,
                overrides: HashMap::new(),
            },
        );
        table
    }

    #[test]
    fn test_numfmt_parse() {
        assert_eq!(NumFmt::parse("decimal"), NumFmt::Decimal);
        assert_eq!(NumFmt::parse("lowerRoman"), NumFmt::LowerRoman);
        assert_eq!(NumFmt::parse("weird"), NumFmt::Bullet);
    }

    #[test]
    fn test_resolve_through_instance() {
        let table = table_with_level(NumFmt::Decimal, "%1.");
        let resolved = table.resolve(1, 0).unwrap();
        assert_eq!(resolved.abstract_id, 0);
        assert_eq!(resolved.level.text, "%1.");
        assert!(table.resolve(1, 3).is_none());
        assert!(table.resolve(9, 0).is_none());
    }

    #[test]
    fn test_resolve_prefers_override() {
        let mut table = table_with_level(NumFmt::Decimal, "%1.");
        table.instances.get_mut(&1).unwrap().overrides.insert(
            0,
            NumberingLevel {
                ilvl: 0,
                format: NumFmt::UpperRoman,
                text: "%1)".to_string(),
                ..Default::default()
            },
        );
        let resolved = table.resolve(1, 0).unwrap();
        assert_eq!(resolved.level.format, NumFmt::UpperRoman);
        assert_eq!(resolved.level.text, "%1)");
    }
}
