//! List numbering during layout.
//!
//! The counter table is a finite state machine: paragraphs at
//! `(numId, ilvl)` are events, and the transition is "increment level L,
//! reset every level deeper than L to its start value". Counters are keyed
//! by abstract definition so every concrete instance of the same abstract
//! list shares one sequence, matching Word. State lives inside the
//! pipeline and never leaks across documents.

use crate::model::numbering::{NumFmt, NumberingTable};
use std::collections::HashMap;

/// Per-document counter state.
#[derive(Debug, Clone, Default)]
pub struct CounterTable {
    /// (abstract id, level) → current value (valid after first advance).
    counters: HashMap<(i64, usize), i64>,
}

/// A resolved marker for one paragraph.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub text: String,
    /// Paragraph text indent taken from the level, in points.
    pub indent_left: Option<f64>,
    pub indent_hanging: Option<f64>,
}

impl CounterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the counter machine for a paragraph at `(num_id, ilvl)` and
    /// produce its marker. Returns `None` when the reference resolves to
    /// nothing (missing instance or level).
    pub fn advance(
        &mut self,
        numbering: &NumberingTable,
        num_id: i64,
        ilvl: usize,
    ) -> Option<Marker> {
        let resolved = numbering.resolve(num_id, ilvl)?;
        let abstract_id = resolved.abstract_id;

        let start = resolved.level.start;
        let value = self
            .counters
            .entry((abstract_id, ilvl))
            .and_modify(|v| *v += 1)
            .or_insert(start);
        let _ = value;

        // Deeper levels restart their sequence.
        self.counters.retain(|&(aid, lvl), _| aid != abstract_id || lvl <= ilvl);

        let text = match resolved.level.format {
            NumFmt::Bullet => resolved.level.text.clone(),
            NumFmt::None => String::new(),
            _ => {
                // Substitute %1..%9 with the current counters of the
                // shallower levels and this one.
                let mut out = String::new();
                let mut chars = resolved.level.text.chars().peekable();
                while let Some(ch) = chars.next() {
                    if ch == '%' {
                        if let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                            chars.next();
                            let level = (d as usize).saturating_sub(1);
                            let value = self.current_or_start(numbering, num_id, level);
                            let fmt = numbering
                                .resolve(num_id, level)
                                .map(|r| r.level.format)
                                .unwrap_or(NumFmt::Decimal);
                            out.push_str(&format_number(value, fmt));
                            continue;
                        }
                        out.push('%');
                    } else {
                        out.push(ch);
                    }
                }
                out
            }
        };

        Some(Marker {
            text,
            indent_left: resolved.level.indent_left,
            indent_hanging: resolved.level.indent_hanging,
        })
    }

    /// Counter value for a template placeholder. A level that has not
    /// advanced yet reads as its start value.
    fn current_or_start(&self, numbering: &NumberingTable, num_id: i64, level: usize) -> i64 {
        let Some(resolved) = numbering.resolve(num_id, level) else { return 1 };
        self.counters
            .get(&(resolved.abstract_id, level))
            .copied()
            .unwrap_or(resolved.level.start)
    }
}

/// Render a counter value in a numbering format.
pub fn format_number(value: i64, format: NumFmt) -> String {
    match format {
        NumFmt::Decimal => value.to_string(),
        NumFmt::DecimalZero => format!("{value:02}"),
        NumFmt::LowerRoman => to_roman(value).to_lowercase(),
        NumFmt::UpperRoman => to_roman(value),
        NumFmt::LowerLetter => to_letters(value).to_lowercase(),
        NumFmt::UpperLetter => to_letters(value),
        NumFmt::Bullet | NumFmt::None => String::new(),
    }
}

fn to_roman(mut value: i64) -> String {
    if value <= 0 {
        return value.to_string();
    }
    const TABLE: [(i64, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut out = String::new();
    for (n, s) in TABLE {
        while value >= n {
            out.push_str(s);
            value -= n;
        }
    }
    out
}

/// 1 → A, 26 → Z, 27 → AA (Word wraps by repetition: 27 is "AA").
fn to_letters(value: i64) -> String {
    if value <= 0 {
        return value.to_string();
    }
    let idx = ((value - 1) % 26) as u8;
    let repeats = ((value - 1) / 26 + 1) as usize;
    let letter = (b'A' + idx) as char;
    std::iter::repeat(letter).take(repeats).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::numbering::{AbstractNumbering, NumberingInstance, NumberingLevel};

    fn two_level_table() -> NumberingTable {
        let mut table = NumberingTable::default();
        table.abstracts.insert(
            0,
            AbstractNumbering {
                id: 0,
                levels: vec![
                    NumberingLevel {
                        ilvl: 0,
                        format: NumFmt::Decimal,
                        text: "%1.".to_string(),
                        ..Default::default()
                    },
                    NumberingLevel {
                        ilvl: 1,
                        format: NumFmt::Decimal,
                        text: "%1.%2.".to_string(),
                        ..Default::default()
                    },
                ],
            },
        );
        table.instances.insert(
            1,
            NumberingInstance { num_id: 1, abstract_id: 0, overrides: HashMap::new() },
        );
        table
    }

    #[test]
    fn test_multilevel_sequence() {
        // The §8.2 scenario D shape: levels [0, 1, 1, 0, 1].
        let table = two_level_table();
        let mut counters = CounterTable::new();
        let markers: Vec<String> = [0usize, 1, 1, 0, 1]
            .iter()
            .map(|&lvl| counters.advance(&table, 1, lvl).unwrap().text)
            .collect();
        assert_eq!(markers, vec!["1.", "1.1.", "1.2.", "2.", "2.1."]);
    }

    #[test]
    fn test_monotonic_at_same_level() {
        let table = two_level_table();
        let mut counters = CounterTable::new();
        let a = counters.advance(&table, 1, 0).unwrap().text;
        let b = counters.advance(&table, 1, 0).unwrap().text;
        let c = counters.advance(&table, 1, 0).unwrap().text;
        assert_eq!((a, b, c), ("1.".into(), "2.".into(), "3.".into()));
    }

    #[test]
    fn test_missing_instance_yields_none() {
        let table = two_level_table();
        let mut counters = CounterTable::new();
        assert!(counters.advance(&table, 42, 0).is_none());
    }

    #[test]
    fn test_roman() {
        assert_eq!(format_number(4, NumFmt::UpperRoman), "IV");
        assert_eq!(format_number(1994, NumFmt::UpperRoman), "MCMXCIV");
        assert_eq!(format_number(3, NumFmt::LowerRoman), "iii");
    }

    #[test]
    fn test_letters() {
        assert_eq!(format_number(1, NumFmt::UpperLetter), "A");
        assert_eq!(format_number(26, NumFmt::LowerLetter), "z");
        assert_eq!(format_number(27, NumFmt::UpperLetter), "AA");
    }

    #[test]
    fn test_decimal_zero() {
        assert_eq!(format_number(7, NumFmt::DecimalZero), "07");
        assert_eq!(format_number(12, NumFmt::DecimalZero), "12");
    }

    #[test]
    fn test_bullet_uses_literal_text() {
        let mut table = two_level_table();
        table.abstracts.get_mut(&0).unwrap().levels[0] = NumberingLevel {
            ilvl: 0,
            format: NumFmt::Bullet,
            text: "\u{2022}".to_string(),
            ..Default::default()
        };
        let mut counters = CounterTable::new();
        assert_eq!(counters.advance(&table, 1, 0).unwrap().text, "\u{2022}");
    }
}
