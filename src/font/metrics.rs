//! Built-in metrics for the standard PDF base fonts.
//!
//! These serve two roles: accurate measurement for documents that map onto
//! the base-14 families (Arial/Helvetica, Times New Roman, Courier New),
//! and the metric floor when no system font file can be found. Widths are
//! the Adobe AFM advance widths in 1/1000 em for the ASCII range; other
//! codepoints use the font's default advance.
//!
//! The oblique Helvetica metrics are identical to the upright ones, and
//! the Times italics are close enough for fallback measurement, so italic
//! faces reuse the upright width tables.

/// Vertical metrics in 1/1000 em.
#[derive(Debug, Clone, Copy)]
pub struct VerticalMetrics {
    pub ascent: f64,
    pub descent: f64,
    pub line_gap: f64,
}

/// Width table for one base font: ASCII 0x20..=0x7E plus a default.
pub struct StandardFontMetrics {
    widths: &'static [u16; 95],
    default_width: u16,
    vertical: VerticalMetrics,
}

impl StandardFontMetrics {
    /// Advance width of `ch` at `font_size`, in points.
    pub fn char_width(&self, ch: char, font_size: f64) -> f64 {
        let units = self.char_units(ch);
        units as f64 / 1000.0 * font_size
    }

    fn char_units(&self, ch: char) -> u16 {
        let cp = ch as u32;
        if (0x20..=0x7E).contains(&cp) {
            self.widths[(cp - 0x20) as usize]
        } else if cp == 0xA0 {
            self.widths[0] // no-break space measures like a space
        } else {
            self.default_width
        }
    }

    pub fn measure_string(&self, text: &str, font_size: f64) -> f64 {
        text.chars().map(|c| self.char_width(c, font_size)).sum()
    }

    pub fn vertical(&self) -> VerticalMetrics {
        self.vertical
    }
}

const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, //  !"#$%&'()*+,-./
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 0-9:;<=>?
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // @A-O
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // P-Z[\]^_
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // `a-o
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // p-z{|}~
];

const HELVETICA_BOLD_WIDTHS: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611,
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556,
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611,
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
];

const TIMES_WIDTHS: [u16; 95] = [
    250, 333, 408, 500, 500, 833, 778, 180, 333, 333, 500, 564, 250, 333, 250, 278,
    500, 500, 500, 500, 500, 500, 500, 500, 500, 500, 278, 278, 564, 564, 564, 444,
    921, 722, 667, 667, 722, 611, 556, 722, 722, 333, 389, 722, 611, 889, 722, 722,
    556, 722, 667, 556, 611, 722, 722, 944, 722, 722, 611, 333, 278, 333, 469, 500,
    333, 444, 500, 444, 500, 444, 333, 500, 500, 278, 278, 500, 278, 778, 500, 500,
    500, 500, 333, 389, 278, 500, 500, 722, 500, 500, 444, 480, 200, 480, 541,
];

const TIMES_BOLD_WIDTHS: [u16; 95] = [
    250, 333, 555, 500, 500, 1000, 833, 278, 333, 333, 500, 570, 250, 333, 250, 278,
    500, 500, 500, 500, 500, 500, 500, 500, 500, 500, 333, 333, 570, 570, 570, 500,
    930, 722, 667, 722, 722, 667, 611, 778, 778, 389, 500, 778, 667, 944, 722, 778,
    611, 778, 722, 556, 667, 722, 722, 1000, 722, 722, 667, 333, 278, 333, 581, 500,
    333, 500, 556, 444, 556, 444, 333, 500, 556, 278, 333, 556, 278, 833, 556, 500,
    556, 556, 444, 389, 333, 556, 500, 722, 500, 500, 444, 394, 220, 394, 520,
];

const COURIER_WIDTHS: [u16; 95] = [600; 95];

// Line gaps chosen so a single-spaced line comes out near 1.155 em,
// matching what Word produces for the default faces these stand in for.
const HELVETICA_VERTICAL: VerticalMetrics =
    VerticalMetrics { ascent: 718.0, descent: -207.0, line_gap: 230.0 };
const TIMES_VERTICAL: VerticalMetrics =
    VerticalMetrics { ascent: 683.0, descent: -217.0, line_gap: 255.0 };
const COURIER_VERTICAL: VerticalMetrics =
    VerticalMetrics { ascent: 629.0, descent: -157.0, line_gap: 300.0 };

pub static HELVETICA: StandardFontMetrics = StandardFontMetrics {
    widths: &HELVETICA_WIDTHS,
    default_width: 556,
    vertical: HELVETICA_VERTICAL,
};

pub static HELVETICA_BOLD: StandardFontMetrics = StandardFontMetrics {
    widths: &HELVETICA_BOLD_WIDTHS,
    default_width: 611,
    vertical: HELVETICA_VERTICAL,
};

pub static TIMES: StandardFontMetrics = StandardFontMetrics {
    widths: &TIMES_WIDTHS,
    default_width: 500,
    vertical: TIMES_VERTICAL,
};

pub static TIMES_BOLD: StandardFontMetrics = StandardFontMetrics {
    widths: &TIMES_BOLD_WIDTHS,
    default_width: 556,
    vertical: TIMES_VERTICAL,
};

pub static COURIER: StandardFontMetrics = StandardFontMetrics {
    widths: &COURIER_WIDTHS,
    default_width: 600,
    vertical: COURIER_VERTICAL,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helvetica_space() {
        // 278/1000 * 12 = 3.336
        assert!((HELVETICA.char_width(' ', 12.0) - 3.336).abs() < 0.001);
    }

    #[test]
    fn test_bold_wider() {
        assert!(HELVETICA_BOLD.char_width('A', 12.0) > HELVETICA.char_width('A', 12.0));
    }

    #[test]
    fn test_courier_monospace() {
        assert_eq!(COURIER.char_width('i', 10.0), COURIER.char_width('W', 10.0));
    }

    #[test]
    fn test_non_ascii_uses_default() {
        assert!((HELVETICA.char_width('\u{017C}', 10.0) - 5.56).abs() < 0.001); // ż
    }

    #[test]
    fn test_measure_string() {
        let w = TIMES.measure_string("ab", 10.0);
        assert!((w - (4.44 + 5.0)).abs() < 0.001);
    }
}
