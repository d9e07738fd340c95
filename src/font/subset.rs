//! # TrueType Subsetter
//!
//! Embedding a whole font bloats the PDF; a document usually touches a few
//! dozen glyphs out of thousands. The subsetter rebuilds a valid TrueType
//! file containing only the used glyphs (plus `.notdef` and composite
//! components), with glyph ids remapped to a contiguous range starting at
//! zero. The CIDFont width array and the content-stream glyph references
//! must use the remapped ids, so the mapping is part of the result.
//!
//! Rebuilt tables: `glyf`, `loca`, `hmtx`, `cmap` (format 4), `head`,
//! `hhea`, `maxp`, `post`. `name`, `OS/2`, and the hinting tables are
//! copied through when present.

use std::collections::{BTreeSet, HashMap, HashSet};

/// A subset font plus the old-gid → new-gid mapping.
pub struct FontSubset {
    pub data: Vec<u8>,
    pub gid_map: HashMap<u16, u16>,
}

/// Borrowed view of the tables the subsetter reads from the source font.
struct SourceFont<'a> {
    data: &'a [u8],
    glyf: &'a [u8],
    loca: Vec<u32>,
    hmtx: &'a [u8],
    num_h_metrics: usize,
}

impl<'a> SourceFont<'a> {
    fn open(data: &'a [u8]) -> Result<Self, String> {
        let face = ttf_parser::Face::parse(data, 0)
            .map_err(|e| format!("unparsable font: {e:?}"))?;
        let glyf = table(data, b"glyf").ok_or("missing glyf table")?;
        let raw_loca = table(data, b"loca").ok_or("missing loca table")?;
        let head = table(data, b"head").ok_or("missing head table")?;
        let hmtx = table(data, b"hmtx").ok_or("missing hmtx table")?;
        let hhea = table(data, b"hhea").ok_or("missing hhea table")?;

        let loca_format = be_i16(head, 50); // indexToLocFormat
        let loca = parse_loca(raw_loca, loca_format, face.number_of_glyphs());
        let num_h_metrics = be_u16(hhea, 34) as usize;

        Ok(Self { data, glyf, loca, hmtx, num_h_metrics })
    }

    fn glyph_data(&self, gid: u16) -> Option<&'a [u8]> {
        let idx = gid as usize;
        if idx + 1 >= self.loca.len() {
            return None;
        }
        let start = self.loca[idx] as usize;
        let end = (self.loca[idx + 1] as usize).min(self.glyf.len());
        if start >= end {
            return None; // empty glyph (e.g. space)
        }
        self.glyf.get(start..end)
    }

    /// Advance width + left side bearing for one glyph.
    fn metrics_for(&self, gid: u16) -> [u8; 4] {
        let idx = gid as usize;
        let mut out = [0u8; 4];
        if idx < self.num_h_metrics {
            let offset = idx * 4;
            if offset + 4 <= self.hmtx.len() {
                out.copy_from_slice(&self.hmtx[offset..offset + 4]);
            }
        } else if self.num_h_metrics > 0 {
            // Monospaced tail: the last declared advance applies.
            let aw_offset = (self.num_h_metrics - 1) * 4;
            let lsb_offset = self.num_h_metrics * 4 + (idx - self.num_h_metrics) * 2;
            if aw_offset + 2 <= self.hmtx.len() {
                out[0..2].copy_from_slice(&self.hmtx[aw_offset..aw_offset + 2]);
            }
            if lsb_offset + 2 <= self.hmtx.len() {
                out[2..4].copy_from_slice(&self.hmtx[lsb_offset..lsb_offset + 2]);
            }
        }
        out
    }
}

/// Subset `data` down to `used_gids` (plus dependencies).
pub fn subset(data: &[u8], used_gids: &HashSet<u16>) -> Result<FontSubset, String> {
    let source = SourceFont::open(data)?;

    // .notdef always ships; composite glyphs pull in their components.
    let mut keep: BTreeSet<u16> = BTreeSet::new();
    keep.insert(0);
    keep.extend(used_gids.iter().copied());
    for gid in keep.clone() {
        collect_components(&source, gid, &mut keep);
    }

    let mut gid_map: HashMap<u16, u16> = HashMap::new();
    for (new_gid, &old_gid) in keep.iter().enumerate() {
        gid_map.insert(old_gid, new_gid as u16);
    }
    let glyph_count = keep.len() as u16;

    // glyf + loca
    let mut glyf_out: Vec<u8> = Vec::new();
    let mut loca_out: Vec<u32> = Vec::new();
    for &old_gid in &keep {
        loca_out.push(glyf_out.len() as u32);
        if let Some(glyph) = source.glyph_data(old_gid) {
            let mut rebuilt = glyph.to_vec();
            if be_i16(&rebuilt, 0) < 0 {
                remap_component_gids(&mut rebuilt, &gid_map);
            }
            glyf_out.extend_from_slice(&rebuilt);
            while glyf_out.len() % 4 != 0 {
                glyf_out.push(0);
            }
        }
    }
    loca_out.push(glyf_out.len() as u32);

    let loca_format: i16 = if glyf_out.len() > 0x1FFFE { 1 } else { 0 };

    // hmtx: every kept glyph gets a full (advance, lsb) pair.
    let mut hmtx_out = Vec::with_capacity(keep.len() * 4);
    for &old_gid in &keep {
        hmtx_out.extend_from_slice(&source.metrics_for(old_gid));
    }

    // cmap: recover char → new gid through the source face's cmap.
    let face = ttf_parser::Face::parse(data, 0).map_err(|e| format!("{e:?}"))?;
    let mut char_map: Vec<(u16, u16)> = Vec::new();
    for code in 32u32..=0xFFFF {
        let Some(ch) = char::from_u32(code) else { continue };
        let Some(gid) = face.glyph_index(ch) else { continue };
        if let Some(&new_gid) = gid_map.get(&gid.0) {
            if new_gid != 0 {
                char_map.push((code as u16, new_gid));
            }
        }
    }

    let head = table(data, b"head").ok_or("missing head table")?;
    let hhea = table(data, b"hhea").ok_or("missing hhea table")?;

    let mut tables: Vec<([u8; 4], Vec<u8>)> = vec![
        (*b"cmap", build_cmap(&char_map)),
        (*b"glyf", glyf_out),
        (*b"head", build_head(head, loca_format)),
        (*b"hhea", build_hhea(hhea, glyph_count)),
        (*b"hmtx", hmtx_out),
        (*b"loca", build_loca(&loca_out, loca_format)),
        (*b"maxp", build_maxp(glyph_count)),
        (*b"post", build_post()),
    ];
    for tag in [b"name", b"OS/2", b"cvt ", b"fpgm", b"prep"] {
        if let Some(t) = table(data, tag) {
            tables.push((*tag, t.to_vec()));
        }
    }
    tables.sort_by_key(|(tag, _)| *tag);

    Ok(FontSubset { data: assemble(tables), gid_map })
}

fn table<'a>(data: &'a [u8], tag: &[u8; 4]) -> Option<&'a [u8]> {
    if data.len() < 12 {
        return None;
    }
    let count = be_u16(data, 4) as usize;
    for i in 0..count {
        let entry = 12 + i * 16;
        if entry + 16 > data.len() {
            break;
        }
        if &data[entry..entry + 4] == tag {
            let offset = be_u32(data, entry + 8) as usize;
            let length = be_u32(data, entry + 12) as usize;
            return data.get(offset..offset + length);
        }
    }
    None
}

fn parse_loca(data: &[u8], format: i16, num_glyphs: u16) -> Vec<u32> {
    let count = num_glyphs as usize + 1;
    let mut offsets = Vec::with_capacity(count);
    for i in 0..count {
        let value = if format == 0 {
            let pos = i * 2;
            if pos + 2 > data.len() {
                offsets.last().copied().unwrap_or(0)
            } else {
                be_u16(data, pos) as u32 * 2
            }
        } else {
            let pos = i * 4;
            if pos + 4 > data.len() {
                offsets.last().copied().unwrap_or(0)
            } else {
                be_u32(data, pos)
            }
        };
        offsets.push(value);
    }
    offsets
}

/// Walk a composite glyph's component records, recursing into components.
fn collect_components(source: &SourceFont, gid: u16, keep: &mut BTreeSet<u16>) {
    let Some(glyph) = source.glyph_data(gid) else { return };
    if glyph.len() < 10 || be_i16(glyph, 0) >= 0 {
        return; // simple glyph
    }
    let mut pos = 10;
    loop {
        if pos + 4 > glyph.len() {
            break;
        }
        let flags = be_u16(glyph, pos);
        let component = be_u16(glyph, pos + 2);
        pos += 4;
        if keep.insert(component) {
            collect_components(source, component, keep);
        }
        pos += component_args_len(flags);
        if flags & 0x0020 == 0 {
            break; // MORE_COMPONENTS unset
        }
    }
}

fn component_args_len(flags: u16) -> usize {
    let args = if flags & 0x0001 != 0 { 4 } else { 2 }; // ARG_1_AND_2_ARE_WORDS
    let transform = if flags & 0x0008 != 0 {
        2 // WE_HAVE_A_SCALE
    } else if flags & 0x0040 != 0 {
        4 // X_AND_Y_SCALE
    } else if flags & 0x0080 != 0 {
        8 // TWO_BY_TWO
    } else {
        0
    };
    args + transform
}

fn remap_component_gids(glyph: &mut [u8], gid_map: &HashMap<u16, u16>) {
    let mut pos = 10;
    loop {
        if pos + 4 > glyph.len() {
            break;
        }
        let flags = be_u16(glyph, pos);
        let old = be_u16(glyph, pos + 2);
        if let Some(&new) = gid_map.get(&old) {
            glyph[pos + 2..pos + 4].copy_from_slice(&new.to_be_bytes());
        }
        pos += 4 + component_args_len(flags);
        if flags & 0x0020 == 0 {
            break;
        }
    }
}

fn build_loca(offsets: &[u32], format: i16) -> Vec<u8> {
    let mut out = Vec::new();
    for &offset in offsets {
        if format == 0 {
            out.extend_from_slice(&((offset / 2) as u16).to_be_bytes());
        } else {
            out.extend_from_slice(&offset.to_be_bytes());
        }
    }
    out
}

/// cmap with a single format-4 subtable (Windows, Unicode BMP).
fn build_cmap(char_map: &[(u16, u16)]) -> Vec<u8> {
    let mut sorted = char_map.to_vec();
    sorted.sort_by_key(|&(ch, _)| ch);

    // Contiguous codepoint ranges become segments.
    let mut segments: Vec<(u16, u16, Vec<u16>)> = Vec::new();
    for &(ch, gid) in &sorted {
        if let Some(last) = segments.last_mut() {
            if ch == last.1 + 1 {
                last.1 = ch;
                last.2.push(gid);
                continue;
            }
        }
        segments.push((ch, ch, vec![gid]));
    }
    segments.push((0xFFFF, 0xFFFF, vec![0])); // required sentinel

    let seg_count = segments.len() as u16;
    let seg_count_x2 = seg_count * 2;
    let entry_selector = (seg_count as f64).log2().floor() as u16;
    let search_range = (1u16 << entry_selector) * 2;
    let range_shift = seg_count_x2.saturating_sub(search_range);

    let mut end_codes = Vec::new();
    let mut start_codes = Vec::new();
    let mut id_deltas: Vec<i16> = Vec::new();
    let mut id_range_offsets: Vec<u16> = Vec::new();
    let mut glyph_ids: Vec<u16> = Vec::new();

    for (i, (start, end, gids)) in segments.iter().enumerate() {
        start_codes.push(*start);
        end_codes.push(*end);
        if *start == 0xFFFF {
            id_deltas.push(1);
            id_range_offsets.push(0);
        } else if gids.len() == 1 {
            id_deltas.push((gids[0] as i32 - *start as i32) as i16);
            id_range_offsets.push(0);
        } else {
            id_deltas.push(0);
            let remaining = (segments.len() - i) as u16;
            id_range_offsets.push((remaining + glyph_ids.len() as u16) * 2);
            glyph_ids.extend_from_slice(gids);
        }
    }

    let subtable_len = 14 + seg_count as usize * 8 + glyph_ids.len() * 2;
    let mut sub = Vec::with_capacity(subtable_len);
    sub.extend_from_slice(&4u16.to_be_bytes());
    sub.extend_from_slice(&(subtable_len as u16).to_be_bytes());
    sub.extend_from_slice(&0u16.to_be_bytes()); // language
    sub.extend_from_slice(&seg_count_x2.to_be_bytes());
    sub.extend_from_slice(&search_range.to_be_bytes());
    sub.extend_from_slice(&entry_selector.to_be_bytes());
    sub.extend_from_slice(&range_shift.to_be_bytes());
    for &v in &end_codes {
        sub.extend_from_slice(&v.to_be_bytes());
    }
    sub.extend_from_slice(&0u16.to_be_bytes()); // reservedPad
    for &v in &start_codes {
        sub.extend_from_slice(&v.to_be_bytes());
    }
    for &v in &id_deltas {
        sub.extend_from_slice(&v.to_be_bytes());
    }
    for &v in &id_range_offsets {
        sub.extend_from_slice(&v.to_be_bytes());
    }
    for &v in &glyph_ids {
        sub.extend_from_slice(&v.to_be_bytes());
    }

    let mut cmap = Vec::new();
    cmap.extend_from_slice(&0u16.to_be_bytes()); // version
    cmap.extend_from_slice(&1u16.to_be_bytes()); // one encoding record
    cmap.extend_from_slice(&3u16.to_be_bytes()); // platform: Windows
    cmap.extend_from_slice(&1u16.to_be_bytes()); // encoding: Unicode BMP
    cmap.extend_from_slice(&12u32.to_be_bytes()); // subtable offset
    cmap.extend_from_slice(&sub);
    cmap
}

fn build_head(head: &[u8], loca_format: i16) -> Vec<u8> {
    let mut out = head.to_vec();
    if out.len() >= 54 {
        out[8..12].fill(0); // checkSumAdjustment, fixed after assembly
        out[50..52].copy_from_slice(&loca_format.to_be_bytes());
    }
    out
}

fn build_hhea(hhea: &[u8], glyph_count: u16) -> Vec<u8> {
    let mut out = hhea.to_vec();
    while out.len() < 36 {
        out.push(0);
    }
    // All subset glyphs carry full metrics.
    out[34..36].copy_from_slice(&glyph_count.to_be_bytes());
    out
}

fn build_maxp(glyph_count: u16) -> Vec<u8> {
    let mut out = vec![0u8; 32];
    out[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes()); // version 1.0
    out[4..6].copy_from_slice(&glyph_count.to_be_bytes());
    // Conservative capacity fields.
    for (offset, value) in [
        (6u16, 256u16), // maxPoints
        (8, 64),        // maxContours
        (10, 256),      // maxCompositePoints
        (12, 64),       // maxCompositeContours
        (14, 2),        // maxZones
        (16, 0),
        (18, 64),
        (20, 64),
        (22, 64),
        (24, 64),
        (26, 0),
        (28, 64),
        (30, 2),
    ] {
        out[offset as usize..offset as usize + 2].copy_from_slice(&value.to_be_bytes());
    }
    out
}

fn build_post() -> Vec<u8> {
    // Format 3.0: no glyph names.
    let mut out = vec![0u8; 32];
    out[0..4].copy_from_slice(&0x0003_0000u32.to_be_bytes());
    out
}

fn assemble(mut tables: Vec<([u8; 4], Vec<u8>)>) -> Vec<u8> {
    let count = tables.len() as u16;
    let entry_selector = (count as f64).log2().floor() as u16;
    let search_range = (1u16 << entry_selector) * 16;
    let range_shift = (count * 16).saturating_sub(search_range);

    for (_, data) in tables.iter_mut() {
        while data.len() % 4 != 0 {
            data.push(0);
        }
    }

    let mut out = Vec::new();
    out.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // sfnt version
    out.extend_from_slice(&count.to_be_bytes());
    out.extend_from_slice(&search_range.to_be_bytes());
    out.extend_from_slice(&entry_selector.to_be_bytes());
    out.extend_from_slice(&range_shift.to_be_bytes());

    let mut offset = 12 + tables.len() * 16;
    for (tag, data) in &tables {
        out.extend_from_slice(tag);
        out.extend_from_slice(&checksum(data).to_be_bytes());
        out.extend_from_slice(&(offset as u32).to_be_bytes());
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        offset += data.len();
    }
    for (_, data) in &tables {
        out.extend_from_slice(data);
    }

    fix_head_checksum(&mut out);
    out
}

fn checksum(data: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    let mut i = 0;
    while i + 4 <= data.len() {
        sum = sum.wrapping_add(be_u32(data, i));
        i += 4;
    }
    if i < data.len() {
        let mut last = [0u8; 4];
        last[..data.len() - i].copy_from_slice(&data[i..]);
        sum = sum.wrapping_add(u32::from_be_bytes(last));
    }
    sum
}

/// The whole-file checksum must satisfy 0xB1B0AFBA via head's adjustment.
fn fix_head_checksum(file: &mut [u8]) {
    let count = be_u16(file, 4) as usize;
    for i in 0..count {
        let entry = 12 + i * 16;
        if &file[entry..entry + 4] == b"head" {
            let offset = be_u32(file, entry + 8) as usize;
            let length = be_u32(file, entry + 12) as usize;
            let adjustment = 0xB1B0_AFBAu32.wrapping_sub(checksum(file));
            if offset + 12 <= file.len() {
                file[offset + 8..offset + 12].copy_from_slice(&adjustment.to_be_bytes());
            }
            if offset + length <= file.len() {
                let fresh = checksum(&file[offset..offset + length]);
                file[entry + 4..entry + 8].copy_from_slice(&fresh.to_be_bytes());
            }
            break;
        }
    }
}

fn be_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn be_i16(data: &[u8], offset: usize) -> i16 {
    i16::from_be_bytes([data[offset], data[offset + 1]])
}

fn be_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_aligned() {
        assert_eq!(checksum(b"ABCD"), 0x4142_4344);
    }

    #[test]
    fn test_checksum_padded_tail() {
        // "AB" pads to "AB\0\0"
        assert_eq!(checksum(b"AB"), 0x4142_0000);
    }

    #[test]
    fn test_build_loca_short_halves_offsets() {
        let out = build_loca(&[0, 100, 200], 0);
        assert_eq!(out.len(), 6);
        assert_eq!(be_u16(&out, 2), 50);
        assert_eq!(be_u16(&out, 4), 100);
    }

    #[test]
    fn test_build_loca_long() {
        let out = build_loca(&[0, 100, 200], 1);
        assert_eq!(out.len(), 12);
        assert_eq!(be_u32(&out, 4), 100);
    }

    #[test]
    fn test_build_maxp() {
        let out = build_maxp(17);
        assert_eq!(be_u32(&out, 0), 0x0001_0000);
        assert_eq!(be_u16(&out, 4), 17);
    }

    #[test]
    fn test_build_post_format3() {
        let out = build_post();
        assert_eq!(out.len(), 32);
        assert_eq!(be_u32(&out, 0), 0x0003_0000);
    }

    #[test]
    fn test_cmap_format4_shape() {
        let cmap = build_cmap(&[(65, 1), (66, 2)]);
        assert_eq!(be_u16(&cmap, 0), 0); // version
        assert_eq!(be_u16(&cmap, 2), 1); // one record
        assert_eq!(be_u16(&cmap, 4), 3); // Windows
        assert_eq!(be_u16(&cmap, 6), 1); // Unicode BMP
        let sub = be_u32(&cmap, 8) as usize;
        assert_eq!(be_u16(&cmap, sub), 4); // format 4
    }

    #[test]
    fn test_component_args_len() {
        assert_eq!(component_args_len(0x0000), 2);
        assert_eq!(component_args_len(0x0001), 4);
        assert_eq!(component_args_len(0x0009), 6); // words + scale
        assert_eq!(component_args_len(0x0081), 12); // words + 2x2
    }

    #[test]
    fn test_subset_rejects_garbage() {
        let used: HashSet<u16> = [1u16].into_iter().collect();
        assert!(subset(&[0u8; 16], &used).is_err());
    }
}
