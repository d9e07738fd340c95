//! # Text Shaping and Line Breaking
//!
//! Converts a paragraph's inline content plus an available width into
//! lines of positioned boxes. Inputs arrive as [`InlineItem`]s with fully
//! resolved formatting; output lines carry absolute x positions, widths,
//! and ascent/descent so the paginator only stacks them vertically.
//!
//! The breaker is a greedy first-fit over atoms (words, spaces, tabs,
//! objects, fields). Break points are spaces, soft hyphens, and UAX#14
//! opportunities (CJK boundaries, after hyphens); a word wider than the
//! line gets hyphenated when enabled, else placed on its own overflowing
//! line. Full justification widens inter-word gaps of every non-terminal
//! line.

pub mod bidi;
pub mod shaping;

use crate::font::{FontContext, FontDataRef, FontKey};
use crate::model::properties::{Color, TabKind, TabLeader, TabStop, VertAlign};
use unicode_linebreak::{linebreaks, BreakOpportunity};

/// Resolved character formatting for a styled fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStyle {
    pub font: FontKey,
    pub size: f64,
    pub color: Color,
    pub underline: bool,
    pub strike: bool,
    pub highlight: Option<Color>,
    /// Baseline shift in points; positive raises (superscript).
    pub baseline_shift: f64,
    pub lang: Option<String>,
    /// Hyperlink target carried through for export.
    pub link: Option<String>,
}

impl RunStyle {
    pub fn plain(font: FontKey, size: f64) -> Self {
        Self {
            font,
            size,
            color: Color::BLACK,
            underline: false,
            strike: false,
            highlight: None,
            baseline_shift: 0.0,
            lang: None,
            link: None,
        }
    }

    /// Apply sub/superscript sizing and baseline shift.
    pub fn with_vert_align(mut self, va: VertAlign) -> Self {
        match va {
            VertAlign::Baseline => {}
            VertAlign::Superscript => {
                self.baseline_shift = self.size * 0.33;
                self.size *= 0.65;
            }
            VertAlign::Subscript => {
                self.baseline_shift = -self.size * 0.14;
                self.size *= 0.65;
            }
        }
        self
    }
}

/// Inline content fed to the breaker, in paragraph order.
#[derive(Debug, Clone)]
pub enum InlineItem {
    Text { text: String, style: RunStyle },
    Tab,
    /// Explicit line break (`w:br`).
    Break,
    /// An inline object (image or text box) participating like a glyph.
    Object { index: usize, width: f64, height: f64 },
    /// Field placeholder: `display` travels to output, `measure` is the
    /// widest likely resolved value and controls the box width.
    Field { display: String, measure: String, instruction: String, style: RunStyle },
}

/// A positioned box on one line. `x` is relative to the line origin.
#[derive(Debug, Clone)]
pub struct InlineBox {
    pub x: f64,
    pub width: f64,
    pub ascent: f64,
    /// Positive distance below the baseline.
    pub descent: f64,
    pub kind: InlineBoxKind,
}

#[derive(Debug, Clone)]
pub enum InlineBoxKind {
    Text { text: String, style: RunStyle },
    Field { text: String, instruction: String, style: RunStyle },
    Object { index: usize, height: f64 },
    Tab { leader: TabLeader },
}

impl InlineBox {
    /// Text content for extraction-oriented consumers.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            InlineBoxKind::Text { text, .. } => Some(text),
            InlineBoxKind::Field { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// One broken line: boxes positioned from x=0, plus vertical metrics.
#[derive(Debug, Clone)]
pub struct Line {
    pub boxes: Vec<InlineBox>,
    /// Natural content width (trailing spaces excluded).
    pub width: f64,
    pub ascent: f64,
    pub descent: f64,
    /// Largest line gap among the fonts on the line; part of the
    /// single-spaced line height.
    pub leading: f64,
}

/// Widths and switches for one paragraph's breaking pass.
#[derive(Debug, Clone)]
pub struct BreakOptions {
    pub first_width: f64,
    pub rest_width: f64,
    pub justify: bool,
    pub tab_stops: Vec<TabStop>,
    pub default_tab: f64,
    /// Algorithmic hyphenation (`w:autoHyphenation`).
    pub hyphenate: bool,
    /// Floor for line ascent when a line has no text (empty paragraphs).
    pub min_style: RunStyle,
}

// ─── Atoms ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Fragment {
    text: String,
    style: RunStyle,
    width: f64,
    char_widths: Vec<f64>,
    rtl: bool,
}

#[derive(Debug, Clone)]
enum Atom {
    /// Unbreakable word; fragments preserve per-run formatting.
    Word(Vec<Fragment>),
    Space(Fragment),
    /// Conditional break point; renders a hyphen only when broken at.
    SoftHyphen { style: RunStyle, hyphen_width: f64 },
    /// Zero-width UAX#14 break opportunity (CJK boundaries, after
    /// hyphens). Breaking here adds nothing visible.
    BreakOpportunity,
    Tab,
    Break,
    Object { index: usize, width: f64, height: f64 },
    Field { display: String, instruction: String, style: RunStyle, width: f64 },
}

impl Atom {
    fn width(&self) -> f64 {
        match self {
            Atom::Word(frags) => frags.iter().map(|f| f.width).sum(),
            Atom::Space(f) => f.width,
            Atom::SoftHyphen { .. } | Atom::BreakOpportunity => 0.0,
            Atom::Tab => 0.0, // resolved during placement
            Atom::Break => 0.0,
            Atom::Object { width, .. } => *width,
            Atom::Field { width, .. } => *width,
        }
    }
}

/// UAX#14 allowed-break flags: `true` at index `i` means a line may break
/// before character `i`.
fn break_opportunities(text: &str) -> Vec<bool> {
    let char_count = text.chars().count();
    let mut flags = vec![false; char_count];

    let mut byte_to_char = vec![0usize; text.len() + 1];
    for (char_idx, (byte_idx, _)) in text.char_indices().enumerate() {
        byte_to_char[byte_idx] = char_idx;
    }
    byte_to_char[text.len()] = char_count;

    for (byte_offset, opportunity) in linebreaks(text) {
        if opportunity == BreakOpportunity::Allowed || opportunity == BreakOpportunity::Mandatory {
            let char_idx = byte_to_char[byte_offset];
            if char_idx > 0 && char_idx < char_count {
                flags[char_idx] = true;
            }
        }
    }
    flags
}

/// Measure one styled fragment, shaping when the resolved font has a
/// face to shape against.
fn measure_fragment(ctx: &FontContext, text: &str, style: &RunStyle, rtl: bool) -> Fragment {
    let char_count = text.chars().count();
    let char_widths: Vec<f64> = match ctx.registry().data(&style.font) {
        FontDataRef::Custom { data, metrics: Some(m) } => {
            match shaping::shape_text(text, data, rtl) {
                Some(glyphs) => shaping::cluster_widths(&glyphs, char_count, m.units_per_em, style.size),
                None => text.chars().map(|c| ctx.char_width(c, &style.font, style.size)).collect(),
            }
        }
        _ => text.chars().map(|c| ctx.char_width(c, &style.font, style.size)).collect(),
    };
    Fragment {
        text: text.to_string(),
        style: style.clone(),
        width: char_widths.iter().sum(),
        char_widths,
        rtl,
    }
}

/// Tokenize inline items into atoms. Words merge across item boundaries;
/// text is first split into directional runs so RTL segments shape and
/// reorder correctly.
fn tokenize(ctx: &FontContext, items: &[InlineItem]) -> Vec<Atom> {
    let mut atoms = Vec::new();
    let mut word: Vec<Fragment> = Vec::new();

    fn flush_word(atoms: &mut Vec<Atom>, word: &mut Vec<Fragment>) {
        if !word.is_empty() {
            atoms.push(Atom::Word(std::mem::take(word)));
        }
    }

    for item in items {
        match item {
            InlineItem::Text { text, style } => {
                for run in bidi::directional_runs(text) {
                    let chars: Vec<char> = text.chars().collect();
                    let segment: String = chars[run.start..run.end].iter().collect();
                    tokenize_segment(ctx, &segment, style, run.rtl, &mut atoms, &mut word);
                }
            }
            InlineItem::Tab => {
                flush_word(&mut atoms, &mut word);
                atoms.push(Atom::Tab);
            }
            InlineItem::Break => {
                flush_word(&mut atoms, &mut word);
                atoms.push(Atom::Break);
            }
            InlineItem::Object { index, width, height } => {
                flush_word(&mut atoms, &mut word);
                atoms.push(Atom::Object { index: *index, width: *width, height: *height });
            }
            InlineItem::Field { display, measure, instruction, style } => {
                flush_word(&mut atoms, &mut word);
                let width = ctx.measure_text(measure, &style.font, style.size);
                atoms.push(Atom::Field {
                    display: display.clone(),
                    instruction: instruction.clone(),
                    style: style.clone(),
                    width,
                });
            }
        }
    }
    flush_word(&mut atoms, &mut word);
    atoms
}

fn tokenize_segment(
    ctx: &FontContext,
    segment: &str,
    style: &RunStyle,
    rtl: bool,
    atoms: &mut Vec<Atom>,
    word: &mut Vec<Fragment>,
) {
    let mut pending = String::new();
    let break_before = break_opportunities(segment);

    let mut flush_pending = |pending: &mut String, word: &mut Vec<Fragment>| {
        if !pending.is_empty() {
            word.push(measure_fragment(ctx, pending, style, rtl));
            pending.clear();
        }
    };

    for (i, ch) in segment.chars().enumerate() {
        // Non-space break opportunities (between CJK ideographs, after a
        // hyphen-minus) become zero-width breakable atoms.
        if i > 0 && ch != ' ' && break_before.get(i) == Some(&true) {
            flush_pending(&mut pending, word);
            if !word.is_empty() {
                atoms.push(Atom::Word(std::mem::take(word)));
            }
            if !matches!(atoms.last(), Some(Atom::Space(_)) | Some(Atom::SoftHyphen { .. })) {
                atoms.push(Atom::BreakOpportunity);
            }
        }
        match ch {
            ' ' => {
                flush_pending(&mut pending, word);
                if !word.is_empty() {
                    atoms.push(Atom::Word(std::mem::take(word)));
                }
                atoms.push(Atom::Space(measure_fragment(ctx, " ", style, rtl)));
            }
            '\u{00AD}' => {
                flush_pending(&mut pending, word);
                let hyphen_width = ctx.char_width('-', &style.font, style.size);
                atoms.push_soft_hyphen(word, style, hyphen_width);
            }
            // Zero-width and bidi controls are preserved with zero width.
            '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{200E}' | '\u{200F}'
            | '\u{202A}'..='\u{202E}' => {
                pending.push(ch);
            }
            // NBSP never breaks; it stays inside the word.
            _ => pending.push(ch),
        }
    }
    flush_pending(&mut pending, word);
}

/// Small extension so a soft hyphen can sit between word halves while the
/// halves stay mergeable.
trait SoftHyphenPush {
    fn push_soft_hyphen(&mut self, word: &mut Vec<Fragment>, style: &RunStyle, hyphen_width: f64);
}

impl SoftHyphenPush for Vec<Atom> {
    fn push_soft_hyphen(&mut self, word: &mut Vec<Fragment>, style: &RunStyle, hyphen_width: f64) {
        if !word.is_empty() {
            self.push(Atom::Word(std::mem::take(word)));
        }
        self.push(Atom::SoftHyphen { style: style.clone(), hyphen_width });
    }
}

// ─── Breaking ───────────────────────────────────────────────────

/// Break items into positioned lines.
pub fn break_lines(ctx: &FontContext, items: &[InlineItem], opts: &BreakOptions) -> Vec<Line> {
    let atoms = tokenize(ctx, items);
    let mut lines: Vec<Line> = Vec::new();

    // Indices into `atoms` for the current line.
    let mut line_atoms: Vec<Atom> = Vec::new();
    let mut x = 0.0f64;
    /// Last breakable position: index into `line_atoms` after which the
    /// line may end, plus the x at that point.
    struct BreakPoint {
        atom_index: usize,
        is_soft_hyphen: bool,
    }
    let mut last_break: Option<BreakPoint> = None;

    let width_for = |line_index: usize| -> f64 {
        if line_index == 0 {
            opts.first_width
        } else {
            opts.rest_width
        }
    };

    let mut atom_iter = atoms.into_iter().peekable();
    while let Some(atom) = atom_iter.next() {
        let available = width_for(lines.len());
        match atom {
            Atom::Break => {
                lines.push(finish_line(ctx, std::mem::take(&mut line_atoms), opts, false, available));
                x = 0.0;
                last_break = None;
            }
            Atom::Tab => {
                let next_stop = resolve_tab(x, &opts.tab_stops, opts.default_tab, available);
                line_atoms.push(Atom::Tab);
                // The emitted box width is resolved again in finish_line;
                // track the cursor here for subsequent fitting decisions.
                x = next_stop;
                last_break = Some(BreakPoint { atom_index: line_atoms.len() - 1, is_soft_hyphen: false });
            }
            Atom::Space(f) => {
                let w = f.width;
                line_atoms.push(Atom::Space(f));
                x += w;
                last_break = Some(BreakPoint { atom_index: line_atoms.len() - 1, is_soft_hyphen: false });
            }
            Atom::SoftHyphen { style, hyphen_width } => {
                line_atoms.push(Atom::SoftHyphen { style, hyphen_width });
                last_break = Some(BreakPoint { atom_index: line_atoms.len() - 1, is_soft_hyphen: true });
            }
            Atom::BreakOpportunity => {
                line_atoms.push(Atom::BreakOpportunity);
                last_break = Some(BreakPoint { atom_index: line_atoms.len() - 1, is_soft_hyphen: false });
            }
            atom @ (Atom::Word(_) | Atom::Object { .. } | Atom::Field { .. }) => {
                let w = atom.width();
                if x + w > available && !line_atoms.is_empty() {
                    if let Some(bp) = last_break.take() {
                        // Split at the recorded break point.
                        let mut rest: Vec<Atom> = line_atoms.split_off(bp.atom_index + 1);
                        if bp.is_soft_hyphen {
                            // The soft hyphen renders as a visible dash.
                            if let Some(Atom::SoftHyphen { style, hyphen_width }) = line_atoms.last().cloned() {
                                line_atoms.pop();
                                line_atoms.push(Atom::Word(vec![Fragment {
                                    text: "-".to_string(),
                                    width: hyphen_width,
                                    char_widths: vec![hyphen_width],
                                    style,
                                    rtl: false,
                                }]));
                            }
                        }
                        lines.push(finish_line(
                            ctx,
                            std::mem::take(&mut line_atoms),
                            opts,
                            opts.justify,
                            available,
                        ));
                        // Drop leading spaces of the carried-over content.
                        while matches!(rest.first(), Some(Atom::Space(_))) {
                            rest.remove(0);
                        }
                        x = 0.0;
                        let next_available = width_for(lines.len());
                        for carried in rest {
                            x += carried_width(&carried, x, opts, next_available);
                            let breakable = matches!(
                                carried,
                                Atom::Space(_)
                                    | Atom::SoftHyphen { .. }
                                    | Atom::BreakOpportunity
                                    | Atom::Tab
                            );
                            let is_sh = matches!(carried, Atom::SoftHyphen { .. });
                            line_atoms.push(carried);
                            if breakable {
                                last_break = Some(BreakPoint {
                                    atom_index: line_atoms.len() - 1,
                                    is_soft_hyphen: is_sh,
                                });
                            }
                        }
                    } else {
                        // No break point: the line so far is one unbreakable
                        // chunk. Emit it and start fresh.
                        lines.push(finish_line(
                            ctx,
                            std::mem::take(&mut line_atoms),
                            opts,
                            opts.justify,
                            available,
                        ));
                        x = 0.0;
                    }
                }

                // Hyphenate an oversized word on an otherwise empty line.
                let available = width_for(lines.len());
                if let Atom::Word(frags) = &atom {
                    if opts.hyphenate && line_atoms.is_empty() && atom.width() > available {
                        if let Some((head, tail)) = hyphenate_word(ctx, frags, available) {
                            lines.push(finish_line(ctx, vec![Atom::Word(head)], opts, false, available));
                            x = 0.0;
                            let tail_atom = Atom::Word(tail);
                            x += tail_atom.width();
                            line_atoms.push(tail_atom);
                            last_break = None;
                            continue;
                        }
                    }
                }

                x += atom.width();
                line_atoms.push(atom);
            }
        }
    }

    if !line_atoms.is_empty() || lines.is_empty() {
        let available = width_for(lines.len());
        lines.push(finish_line(ctx, line_atoms, opts, false, available));
    }

    lines
}

/// Width an atom contributes when re-placed at `x` on a fresh line.
fn carried_width(atom: &Atom, x: f64, opts: &BreakOptions, available: f64) -> f64 {
    match atom {
        Atom::Tab => resolve_tab(x, &opts.tab_stops, opts.default_tab, available) - x,
        other => other.width(),
    }
}

/// Find the next tab stop strictly beyond `x`.
fn resolve_tab(x: f64, stops: &[TabStop], default_tab: f64, available: f64) -> f64 {
    const EPS: f64 = 0.01;
    for stop in stops {
        if stop.kind == TabKind::Clear {
            continue;
        }
        if stop.position > x + EPS {
            return stop.position.min(available);
        }
    }
    if default_tab <= 0.0 {
        return (x + 36.0).min(available);
    }
    let next = (x / default_tab).floor() * default_tab + default_tab;
    next.min(available)
}

/// Turn the accumulated atoms into a positioned line.
fn finish_line(
    ctx: &FontContext,
    mut atoms: Vec<Atom>,
    opts: &BreakOptions,
    justify: bool,
    available: f64,
) -> Line {
    // Trailing spaces and dangling break points do not count.
    while matches!(
        atoms.last(),
        Some(Atom::Space(_)) | Some(Atom::SoftHyphen { .. }) | Some(Atom::BreakOpportunity)
    ) {
        atoms.pop();
    }
    while matches!(atoms.first(), Some(Atom::Space(_)) | Some(Atom::BreakOpportunity)) {
        atoms.remove(0);
    }

    let mut boxes: Vec<InlineBox> = Vec::new();
    let mut x = 0.0f64;

    for atom in &atoms {
        match atom {
            Atom::Word(frags) => {
                for f in frags {
                    let lm = ctx.line_metrics(&f.style.font, f.style.size);
                    boxes.push(InlineBox {
                        x,
                        width: f.width,
                        ascent: lm.ascent + f.style.baseline_shift.max(0.0),
                        descent: -lm.descent + (-f.style.baseline_shift).max(0.0),
                        kind: InlineBoxKind::Text { text: f.text.clone(), style: f.style.clone() },
                    });
                    x += f.width;
                }
            }
            Atom::Space(f) => {
                let lm = ctx.line_metrics(&f.style.font, f.style.size);
                boxes.push(InlineBox {
                    x,
                    width: f.width,
                    ascent: lm.ascent,
                    descent: -lm.descent,
                    kind: InlineBoxKind::Text { text: f.text.clone(), style: f.style.clone() },
                });
                x += f.width;
            }
            Atom::SoftHyphen { .. } | Atom::BreakOpportunity => {}
            Atom::Tab => {
                let target = resolve_tab(x, &opts.tab_stops, opts.default_tab, available);
                let leader = opts
                    .tab_stops
                    .iter()
                    .find(|s| s.kind != TabKind::Clear && s.position > x + 0.01)
                    .map(|s| s.leader)
                    .unwrap_or(TabLeader::None);
                boxes.push(InlineBox {
                    x,
                    width: (target - x).max(0.0),
                    ascent: 0.0,
                    descent: 0.0,
                    kind: InlineBoxKind::Tab { leader },
                });
                x = target;
            }
            Atom::Object { index, width, height } => {
                boxes.push(InlineBox {
                    x,
                    width: *width,
                    ascent: *height,
                    descent: 0.0,
                    kind: InlineBoxKind::Object { index: *index, height: *height },
                });
                x += width;
            }
            Atom::Field { display, instruction, style, width } => {
                let lm = ctx.line_metrics(&style.font, style.size);
                boxes.push(InlineBox {
                    x,
                    width: *width,
                    ascent: lm.ascent,
                    descent: -lm.descent,
                    kind: InlineBoxKind::Field {
                        text: display.clone(),
                        instruction: instruction.clone(),
                        style: style.clone(),
                    },
                });
                x += width;
            }
            Atom::Break => {}
        }
    }

    reorder_rtl_spans(&mut boxes, &atoms);

    let natural_width = x;
    if justify && boxes.len() > 1 && natural_width < available {
        justify_line(&mut boxes, available - natural_width);
    }

    let min_lm = ctx.line_metrics(&opts.min_style.font, opts.min_style.size);
    let ascent = boxes.iter().map(|b| b.ascent).fold(min_lm.ascent, f64::max);
    let descent = boxes.iter().map(|b| b.descent).fold(-min_lm.descent, f64::max);
    let mut leading = min_lm.line_gap;
    for b in &boxes {
        let style = match &b.kind {
            InlineBoxKind::Text { style, .. } | InlineBoxKind::Field { style, .. } => style,
            _ => continue,
        };
        leading = leading.max(ctx.line_metrics(&style.font, style.size).line_gap);
    }
    let width = boxes.last().map(|b| b.x + b.width).unwrap_or(0.0);

    Line { boxes, width, ascent, descent, leading }
}

/// Widen inter-word gaps by `extra`, weighted 1.0 per gap. Leading and
/// trailing spaces were already trimmed, so every space box is a gap.
fn justify_line(boxes: &mut [InlineBox], extra: f64) {
    let gap_indices: Vec<usize> = boxes
        .iter()
        .enumerate()
        .filter(|(_, b)| matches!(&b.kind, InlineBoxKind::Text { text, .. } if text == " "))
        .map(|(i, _)| i)
        .collect();
    if gap_indices.is_empty() {
        return;
    }
    let per_gap = extra / gap_indices.len() as f64;
    let mut shift = 0.0;
    let mut gap_cursor = 0;
    for (i, b) in boxes.iter_mut().enumerate() {
        b.x += shift;
        if gap_cursor < gap_indices.len() && gap_indices[gap_cursor] == i {
            b.width += per_gap;
            shift += per_gap;
            gap_cursor += 1;
        }
    }
}

/// Reverse the visual order of consecutive RTL text boxes.
fn reorder_rtl_spans(boxes: &mut [InlineBox], atoms: &[Atom]) {
    // Map box index → rtl flag by walking atoms the same way finish_line did.
    let mut rtl_flags: Vec<bool> = Vec::with_capacity(boxes.len());
    for atom in atoms {
        match atom {
            Atom::Word(frags) => rtl_flags.extend(frags.iter().map(|f| f.rtl)),
            Atom::Space(f) => rtl_flags.push(f.rtl),
            Atom::Tab | Atom::Object { .. } | Atom::Field { .. } => rtl_flags.push(false),
            Atom::SoftHyphen { .. } | Atom::BreakOpportunity | Atom::Break => {}
        }
    }
    // Leading/trailing trimming in finish_line can desynchronize the map;
    // fall back to no reordering rather than guess.
    if rtl_flags.len() != boxes.len() || !rtl_flags.iter().any(|&r| r) {
        return;
    }

    let mut i = 0;
    while i < boxes.len() {
        if !rtl_flags[i] {
            i += 1;
            continue;
        }
        let mut j = i;
        while j < boxes.len() && rtl_flags[j] {
            j += 1;
        }
        // Reverse box order within [i, j), keeping the span's x extent.
        let span_start = boxes[i].x;
        let mut x = span_start;
        let mut reversed: Vec<InlineBox> = boxes[i..j].iter().rev().cloned().collect();
        for b in &mut reversed {
            b.x = x;
            x += b.width;
        }
        boxes[i..j].clone_from_slice(&reversed);
        i = j;
    }
}

/// Split an oversized word at the rightmost syllable boundary that fits,
/// appending a visible hyphen. Only single-fragment words hyphenate.
fn hyphenate_word(
    ctx: &FontContext,
    frags: &[Fragment],
    available: f64,
) -> Option<(Vec<Fragment>, Vec<Fragment>)> {
    let [frag] = frags else { return None };
    let lang = hypher_lang(frag.style.lang.as_deref())?;
    let syllables: Vec<&str> = hypher::hyphenate(&frag.text, lang).collect();
    if syllables.len() < 2 {
        return None;
    }

    let hyphen_width = ctx.char_width('-', &frag.style.font, frag.style.size);
    let mut best_chars = 0usize;
    let mut consumed = 0usize;
    let mut width_so_far = 0.0f64;
    for syllable in &syllables[..syllables.len() - 1] {
        let count = syllable.chars().count();
        let w: f64 = frag.char_widths[consumed..consumed + count].iter().sum();
        if width_so_far + w + hyphen_width <= available {
            width_so_far += w;
            consumed += count;
            best_chars = consumed;
        } else {
            break;
        }
    }
    if best_chars == 0 {
        return None;
    }

    let chars: Vec<char> = frag.text.chars().collect();
    let head_text: String = chars[..best_chars].iter().collect::<String>() + "-";
    let tail_text: String = chars[best_chars..].iter().collect();
    let head = measure_fragment(ctx, &head_text, &frag.style, frag.rtl);
    let tail = measure_fragment(ctx, &tail_text, &frag.style, frag.rtl);
    Some((vec![head], vec![tail]))
}

/// Map a BCP 47 tag to a hyphenation language. Unknown tags disable
/// algorithmic hyphenation; no tag defaults to English.
fn hypher_lang(tag: Option<&str>) -> Option<hypher::Lang> {
    let tag = match tag {
        Some(t) => t,
        None => return Some(hypher::Lang::English),
    };
    let primary = tag.split('-').next().unwrap_or(tag).to_lowercase();
    match primary.as_str() {
        "cs" => Some(hypher::Lang::Czech),
        "da" => Some(hypher::Lang::Danish),
        "nl" => Some(hypher::Lang::Dutch),
        "en" => Some(hypher::Lang::English),
        "fi" => Some(hypher::Lang::Finnish),
        "fr" => Some(hypher::Lang::French),
        "de" => Some(hypher::Lang::German),
        "el" => Some(hypher::Lang::Greek),
        "hu" => Some(hypher::Lang::Hungarian),
        "it" => Some(hypher::Lang::Italian),
        "nb" | "nn" | "no" => Some(hypher::Lang::Norwegian),
        "pl" => Some(hypher::Lang::Polish),
        "pt" => Some(hypher::Lang::Portuguese),
        "ru" => Some(hypher::Lang::Russian),
        "es" => Some(hypher::Lang::Spanish),
        "sv" => Some(hypher::Lang::Swedish),
        "tr" => Some(hypher::Lang::Turkish),
        "uk" => Some(hypher::Lang::Ukrainian),
        _ => None,
    }
}

/// Widest unbreakable atom: the min-content width used by table layout.
pub fn min_content_width(ctx: &FontContext, items: &[InlineItem]) -> f64 {
    tokenize(ctx, items)
        .iter()
        .map(Atom::width)
        .fold(0.0f64, f64::max)
}

/// Natural single-line width: the max-content width.
pub fn max_content_width(ctx: &FontContext, items: &[InlineItem]) -> f64 {
    tokenize(ctx, items).iter().map(Atom::width).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn style(ctx: &FontContext) -> RunStyle {
        RunStyle::plain(ctx.resolve_key("Helvetica", 400, false), 12.0)
    }

    fn text_item(ctx: &FontContext, s: &str) -> InlineItem {
        InlineItem::Text { text: s.to_string(), style: style(ctx) }
    }

    fn opts(ctx: &FontContext, width: f64) -> BreakOptions {
        BreakOptions {
            first_width: width,
            rest_width: width,
            justify: false,
            tab_stops: vec![],
            default_tab: 36.0,
            hyphenate: false,
            min_style: style(ctx),
        }
    }

    fn line_text(line: &Line) -> String {
        line.boxes.iter().filter_map(|b| b.text()).collect()
    }

    #[test]
    fn test_single_line() {
        let ctx = FontContext::new();
        let lines = break_lines(&ctx, &[text_item(&ctx, "Hello")], &opts(&ctx, 200.0));
        assert_eq!(lines.len(), 1);
        assert_eq!(line_text(&lines[0]), "Hello");
        assert!(lines[0].ascent > 0.0 && lines[0].descent > 0.0);
    }

    #[test]
    fn test_break_at_space() {
        let ctx = FontContext::new();
        let lines = break_lines(&ctx, &[text_item(&ctx, "Hello World")], &opts(&ctx, 40.0));
        assert_eq!(lines.len(), 2);
        assert_eq!(line_text(&lines[0]), "Hello");
        assert_eq!(line_text(&lines[1]), "World");
    }

    #[test]
    fn test_explicit_break() {
        let ctx = FontContext::new();
        let items = vec![text_item(&ctx, "one"), InlineItem::Break, text_item(&ctx, "two")];
        let lines = break_lines(&ctx, &items, &opts(&ctx, 500.0));
        assert_eq!(lines.len(), 2);
        assert_eq!(line_text(&lines[0]), "one");
        assert_eq!(line_text(&lines[1]), "two");
    }

    #[test]
    fn test_empty_paragraph_one_line() {
        let ctx = FontContext::new();
        let lines = break_lines(&ctx, &[], &opts(&ctx, 100.0));
        assert_eq!(lines.len(), 1);
        assert!(lines[0].boxes.is_empty());
        assert!(lines[0].ascent > 0.0, "empty line keeps the paragraph font height");
    }

    #[test]
    fn test_oversized_word_overflows_without_loop() {
        let ctx = FontContext::new();
        let lines = break_lines(&ctx, &[text_item(&ctx, "abc defghijklmnop")], &opts(&ctx, 30.0));
        // "abc" fits; the long word gets its own overflowing line.
        assert_eq!(lines.len(), 2);
        assert!(lines[1].width > 30.0);
    }

    #[test]
    fn test_word_split_across_runs_does_not_break() {
        let ctx = FontContext::new();
        let mut bold = style(&ctx);
        bold.font = ctx.resolve_key("Helvetica", 700, false);
        let items = vec![
            text_item(&ctx, "aa Hel"),
            InlineItem::Text { text: "lo".to_string(), style: bold },
        ];
        // Width fits "aa" but not "aa Hello": the joined word moves intact.
        let w_aa_hel = ctx.measure_text("aa Hel", &style(&ctx).font, 12.0);
        let lines = break_lines(&ctx, &items, &opts(&ctx, w_aa_hel + 1.0));
        assert_eq!(lines.len(), 2);
        assert_eq!(line_text(&lines[0]), "aa");
        assert_eq!(line_text(&lines[1]), "Hello");
        // The second line keeps two boxes with their own styles.
        assert_eq!(lines[1].boxes.len(), 2);
    }

    #[test]
    fn test_nbsp_never_breaks() {
        let ctx = FontContext::new();
        let lines = break_lines(&ctx, &[text_item(&ctx, "a\u{00A0}b c")], &opts(&ctx, 25.0));
        // "a\u{A0}b" is one unbreakable unit.
        assert_eq!(line_text(&lines[0]), "a\u{00A0}b");
    }

    #[test]
    fn test_soft_hyphen_breaks_with_dash() {
        let ctx = FontContext::new();
        let lines = break_lines(&ctx, &[text_item(&ctx, "extra\u{00AD}ordinary")], &opts(&ctx, 40.0));
        assert!(lines.len() >= 2);
        assert_eq!(line_text(&lines[0]), "extra-");
        assert!(line_text(&lines[1]).starts_with("ordinary"));
    }

    #[test]
    fn test_soft_hyphen_invisible_when_not_broken() {
        let ctx = FontContext::new();
        let lines = break_lines(&ctx, &[text_item(&ctx, "extra\u{00AD}ordinary")], &opts(&ctx, 300.0));
        assert_eq!(lines.len(), 1);
        assert_eq!(line_text(&lines[0]), "extraordinary");
    }

    #[test]
    fn test_auto_hyphenation() {
        let ctx = FontContext::new();
        let mut o = opts(&ctx, 50.0);
        o.hyphenate = true;
        let lines = break_lines(&ctx, &[text_item(&ctx, "extraordinary")], &o);
        assert!(lines.len() >= 2, "expected hyphenated break, got {}", lines.len());
        assert!(line_text(&lines[0]).ends_with('-'));
    }

    #[test]
    fn test_justification_fills_line() {
        let ctx = FontContext::new();
        let mut o = opts(&ctx, 200.0);
        o.justify = true;
        let lines = break_lines(
            &ctx,
            &[text_item(&ctx, "alpha beta gamma delta epsilon zeta eta theta")],
            &o,
        );
        assert!(lines.len() >= 2);
        for line in &lines[..lines.len() - 1] {
            let last = line.boxes.last().unwrap();
            assert!(
                (last.x + last.width - 200.0).abs() < 0.5,
                "justified line should end at the margin, got {}",
                last.x + last.width
            );
        }
        // The final line is not justified.
        let last_line = lines.last().unwrap();
        assert!(last_line.width < 199.0);
    }

    #[test]
    fn test_single_line_not_justified() {
        let ctx = FontContext::new();
        let mut o = opts(&ctx, 400.0);
        o.justify = true;
        let lines = break_lines(&ctx, &[text_item(&ctx, "short line")], &o);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].width < 399.0);
    }

    #[test]
    fn test_line_width_bound() {
        let ctx = FontContext::new();
        let lines = break_lines(
            &ctx,
            &[text_item(&ctx, "the quick brown fox jumps over the lazy dog again and again")],
            &opts(&ctx, 120.0),
        );
        for line in &lines {
            for b in &line.boxes {
                assert!(b.x + b.width <= 120.0 + 0.5, "box exceeds line: {}", b.x + b.width);
            }
        }
    }

    #[test]
    fn test_tab_default_stops() {
        let ctx = FontContext::new();
        let items = vec![text_item(&ctx, "a"), InlineItem::Tab, text_item(&ctx, "b")];
        let lines = break_lines(&ctx, &items, &opts(&ctx, 200.0));
        assert_eq!(lines.len(), 1);
        // The box after the tab starts at the first default stop (36pt).
        let b_box = lines[0].boxes.iter().find(|b| b.text() == Some("b")).unwrap();
        assert!((b_box.x - 36.0).abs() < 0.01, "got {}", b_box.x);
    }

    #[test]
    fn test_tab_explicit_stop() {
        let ctx = FontContext::new();
        let mut o = opts(&ctx, 300.0);
        o.tab_stops = vec![TabStop { position: 100.0, kind: TabKind::Left, leader: TabLeader::Dot }];
        let items = vec![text_item(&ctx, "a"), InlineItem::Tab, text_item(&ctx, "b")];
        let lines = break_lines(&ctx, &items, &o);
        let tab_box = lines[0]
            .boxes
            .iter()
            .find(|b| matches!(b.kind, InlineBoxKind::Tab { .. }))
            .unwrap();
        assert!(matches!(tab_box.kind, InlineBoxKind::Tab { leader: TabLeader::Dot }));
        let b_box = lines[0].boxes.iter().find(|b| b.text() == Some("b")).unwrap();
        assert!((b_box.x - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_field_measured_by_widest_value() {
        let ctx = FontContext::new();
        let items = vec![InlineItem::Field {
            display: "{{PAGE}}".to_string(),
            measure: "888".to_string(),
            instruction: "PAGE".to_string(),
            style: style(&ctx),
        }];
        let lines = break_lines(&ctx, &items, &opts(&ctx, 200.0));
        let f = &lines[0].boxes[0];
        let expected = ctx.measure_text("888", &style(&ctx).font, 12.0);
        assert!((f.width - expected).abs() < 0.001);
    }

    #[test]
    fn test_inline_object_box() {
        let ctx = FontContext::new();
        let items = vec![
            text_item(&ctx, "img:"),
            InlineItem::Object { index: 0, width: 50.0, height: 40.0 },
        ];
        let lines = break_lines(&ctx, &items, &opts(&ctx, 200.0));
        let obj = lines[0]
            .boxes
            .iter()
            .find(|b| matches!(b.kind, InlineBoxKind::Object { .. }))
            .unwrap();
        assert_eq!(obj.width, 50.0);
        assert!((lines[0].ascent - 40.0).abs() < 0.001, "object height raises the line");
    }

    #[test]
    fn test_round_trip_text() {
        let ctx = FontContext::new();
        let source = "The quick brown fox jumps over the lazy dog";
        let lines = break_lines(&ctx, &[text_item(&ctx, source)], &opts(&ctx, 90.0));
        let mut collected = String::new();
        for (i, line) in lines.iter().enumerate() {
            if i > 0 {
                collected.push(' ');
            }
            collected.push_str(line_text(line).trim_end());
        }
        assert_eq!(collected, source);
    }

    #[test]
    fn test_min_max_content_width() {
        let ctx = FontContext::new();
        let items = vec![text_item(&ctx, "aa bbbb c")];
        let min = min_content_width(&ctx, &items);
        let max = max_content_width(&ctx, &items);
        let bbbb = ctx.measure_text("bbbb", &style(&ctx).font, 12.0);
        assert!((min - bbbb).abs() < 0.001);
        assert!(max > min);
    }

    #[test]
    fn test_superscript_style() {
        let ctx = FontContext::new();
        let sup = style(&ctx).with_vert_align(VertAlign::Superscript);
        assert!(sup.size < 12.0);
        assert!(sup.baseline_shift > 0.0);
    }

    #[test]
    fn test_zero_width_controls_have_no_width() {
        let ctx = FontContext::new();
        let plain = max_content_width(&ctx, &[text_item(&ctx, "ab")]);
        let with_zwj = max_content_width(&ctx, &[text_item(&ctx, "a\u{200D}b")]);
        assert!((plain - with_zwj).abs() < 0.001);
    }
}
