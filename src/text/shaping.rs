//! OpenType shaping via rustybuzz.
//!
//! Embedded faces are shaped so ligatures, kerning, and script-specific
//! forms produce correct advances and real glyph ids. Base fonts (no file
//! to shape against) skip this path and use the AFM advances.

/// One glyph out of the shaper.
#[derive(Debug, Clone)]
pub struct ShapedGlyph {
    /// Glyph id after GSUB; not a Unicode codepoint.
    pub glyph_id: u16,
    /// Index of the first input character this glyph covers.
    pub cluster: u32,
    /// Advance in font units.
    pub x_advance: i32,
    /// Kerning/mark offset from GPOS, font units.
    pub x_offset: i32,
}

/// Shape `text` with the given face bytes. `None` when the face is
/// unparsable; callers fall back to per-character metrics.
pub fn shape_text(text: &str, font_data: &[u8], rtl: bool) -> Option<Vec<ShapedGlyph>> {
    let face = rustybuzz::Face::from_slice(font_data, 0)?;
    let mut buffer = rustybuzz::UnicodeBuffer::new();
    buffer.push_str(text);
    if rtl {
        buffer.set_direction(rustybuzz::Direction::RightToLeft);
    }

    let output = rustybuzz::shape(&face, &[], buffer);
    let glyphs = output
        .glyph_infos()
        .iter()
        .zip(output.glyph_positions())
        .map(|(info, pos)| ShapedGlyph {
            glyph_id: info.glyph_id as u16,
            cluster: info.cluster,
            x_advance: pos.x_advance,
            x_offset: pos.x_offset,
        })
        .collect();
    Some(glyphs)
}

/// Distribute shaped advances back onto characters.
///
/// Index `i` of the result is the width contributed by the glyph(s) whose
/// cluster starts at character `i`. Ligatures put their full width on the
/// first character of the cluster; the swallowed characters get zero.
pub fn cluster_widths(
    glyphs: &[ShapedGlyph],
    num_chars: usize,
    units_per_em: u16,
    font_size: f64,
) -> Vec<f64> {
    let scale = font_size / units_per_em as f64;
    let mut widths = vec![0.0_f64; num_chars];
    let mut starts = vec![false; num_chars];

    for glyph in glyphs {
        let cluster = glyph.cluster as usize;
        if cluster < num_chars {
            widths[cluster] += glyph.x_advance as f64 * scale;
            starts[cluster] = true;
        }
    }

    // Characters that never start a cluster were merged into the previous
    // one; their width is already counted there.
    for i in 1..num_chars {
        if !starts[i] {
            widths[i] = 0.0;
        }
    }

    widths
}

/// Total shaped advance in points.
pub fn shaped_width(glyphs: &[ShapedGlyph], units_per_em: u16, font_size: f64) -> f64 {
    let scale = font_size / units_per_em as f64;
    glyphs.iter().map(|g| g.x_advance as f64 * scale).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_face_returns_none() {
        assert!(shape_text("Hello", &[0, 1, 2, 3], false).is_none());
    }

    fn glyph(cluster: u32, advance: i32) -> ShapedGlyph {
        ShapedGlyph { glyph_id: 1, cluster, x_advance: advance, x_offset: 0 }
    }

    #[test]
    fn test_cluster_widths_one_to_one() {
        let widths = cluster_widths(&[glyph(0, 500), glyph(1, 600)], 2, 1000, 10.0);
        assert!((widths[0] - 5.0).abs() < 1e-9);
        assert!((widths[1] - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_cluster_widths_ligature() {
        // One glyph covering chars 0..2, then char 2 on its own.
        let widths = cluster_widths(&[glyph(0, 800), glyph(2, 500)], 3, 1000, 10.0);
        assert!((widths[0] - 8.0).abs() < 1e-9);
        assert_eq!(widths[1], 0.0);
        assert!((widths[2] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_shaped_width_sums() {
        let w = shaped_width(&[glyph(0, 500), glyph(1, 250)], 1000, 12.0);
        assert!((w - 9.0).abs() < 1e-9);
    }
}
