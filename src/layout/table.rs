//! # Table Layout
//!
//! Column resolution, cell layout, row heights, merges, and row-level
//! pagination. Rows never split internally; the paginator moves whole
//! rows between pages and repeats marked header rows at the top of every
//! continuation fragment. Vertical merges constrain where the table may
//! break: a page break never lands inside a merge span unless nothing
//! else fits.

use super::*;
use crate::model::{Cell, CellVAlign, HeightRule, Row, Table, TableWidth, VerticalMerge};

#[derive(Debug, Clone)]
pub(crate) struct MeasuredTable {
    pub uid: String,
    pub total_width: f64,
    pub column_widths: Vec<f64>,
    pub rows: Vec<MeasuredRow>,
    /// Leading rows flagged `w:tblHeader`, repeated on each new page.
    pub header_rows: Vec<usize>,
}

#[derive(Debug, Clone)]
pub(crate) struct MeasuredRow {
    pub height: f64,
    pub cells: Vec<MeasuredCell>,
    /// A page break may follow this row (no merge span crosses it).
    pub break_after_allowed: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct MeasuredCell {
    /// X of the cell's left edge relative to the table.
    pub x: f64,
    pub width: f64,
    /// Rows this cell spans: 1 normal, >1 merge owner, 0 merge continuation
    /// (emits nothing).
    pub row_span: usize,
    pub borders: Option<Borders>,
    pub shading: Option<Color>,
    pub valign: CellVAlign,
    pub margins: Edges,
    /// Content height including cell margins.
    pub content_height: f64,
    /// Content blocks, frames relative to the cell's padding origin.
    pub blocks: Vec<LayoutBlock>,
}

impl MeasuredTable {
    pub fn height_of(&self, rows: &[usize]) -> f64 {
        rows.iter().map(|&r| self.rows[r].height).sum()
    }
}

impl<'a> LayoutPipeline<'a> {
    /// Measure a table at the available width: resolve columns, lay out
    /// every cell, compute row heights and merge spans.
    pub(crate) fn measure_table(&mut self, t: &Table, avail: f64) -> MeasuredTable {
        let cols = t.column_count().max(1);
        let total_width = match t.props.width {
            Some(TableWidth::Fixed(w)) => w.min(avail),
            Some(TableWidth::Pct(p)) => avail * p / 100.0,
            _ => avail,
        };

        let column_widths = self.resolve_columns(t, cols, total_width);
        let col_x: Vec<f64> = column_widths
            .iter()
            .scan(0.0, |x, w| {
                let here = *x;
                *x += w;
                Some(here)
            })
            .collect();

        let default_margins = t
            .props
            .cell_margins
            .unwrap_or(Edges { top: 0.0, right: 5.4, bottom: 0.0, left: 5.4 });

        // Grid occupancy: column index of each cell per row.
        let mut rows: Vec<MeasuredRow> = Vec::with_capacity(t.rows.len());
        let mut cell_cols: Vec<Vec<(usize, usize)>> = Vec::new(); // (col, span) per cell
        for row in &t.rows {
            let mut placements = Vec::with_capacity(row.cells.len());
            let mut col = 0usize;
            for cell in &row.cells {
                let span = cell.props.grid_span.max(1).min(cols.saturating_sub(col).max(1));
                placements.push((col, span));
                col += span;
            }
            cell_cols.push(placements);
        }

        // Lay out cells and compute single-row heights.
        for (ri, row) in t.rows.iter().enumerate() {
            let mut cells = Vec::with_capacity(row.cells.len());
            for (ci, cell) in row.cells.iter().enumerate() {
                let (col, span) = cell_cols[ri][ci];
                let x = col_x.get(col).copied().unwrap_or(0.0);
                let width: f64 = column_widths[col..(col + span).min(cols)].iter().sum();
                let measured = self.measure_cell(cell, width, default_margins, &t.rows, &cell_cols, ri, col);
                cells.push(MeasuredCell { x, width, ..measured });
            }
            rows.push(MeasuredRow { height: 0.0, cells, break_after_allowed: true });
        }

        // Row heights from non-merged cells, clamped by trHeight.
        for (ri, row) in t.rows.iter().enumerate() {
            let mut h = rows[ri]
                .cells
                .iter()
                .filter(|c| c.row_span == 1)
                .map(|c| c.content_height)
                .fold(0.0f64, f64::max);
            match (row.props.height, row.props.height_rule) {
                (Some(min), HeightRule::AtLeast) => h = h.max(min),
                (Some(exact), HeightRule::Exact) => h = exact,
                _ => {}
            }
            rows[ri].height = h;
        }

        // Merge owners may need more room than their spanned rows provide;
        // the deficit goes to the last spanned row. Breaks inside a span
        // are forbidden.
        for ri in 0..rows.len() {
            for ci in 0..rows[ri].cells.len() {
                let span = rows[ri].cells[ci].row_span;
                if span > 1 {
                    let end = (ri + span).min(rows.len());
                    let available: f64 = (ri..end).map(|r| rows[r].height).sum();
                    let need = rows[ri].cells[ci].content_height;
                    if need > available {
                        rows[end - 1].height += need - available;
                    }
                    for r in ri..end - 1 {
                        rows[r].break_after_allowed = false;
                    }
                }
            }
        }

        let header_rows: Vec<usize> = t
            .rows
            .iter()
            .take_while(|r| r.props.is_header)
            .enumerate()
            .map(|(i, _)| i)
            .collect();

        MeasuredTable {
            uid: t.uid.clone(),
            total_width: column_widths.iter().sum(),
            column_widths,
            rows,
            header_rows,
        }
    }

    /// Resolve final column widths (§4.4 column-width algorithm).
    fn resolve_columns(&mut self, t: &Table, cols: usize, table_width: f64) -> Vec<f64> {
        let declared: Vec<Option<f64>> = (0..cols)
            .map(|i| match t.grid.get(i) {
                Some(TableWidth::Fixed(w)) => Some(*w),
                Some(TableWidth::Pct(p)) => Some(table_width * p / 100.0),
                _ => None,
            })
            .collect();

        let declared_sum: f64 = declared.iter().flatten().sum();
        let all_declared = declared.iter().all(Option::is_some);

        if all_declared {
            if declared_sum <= table_width + 0.5 {
                return declared.into_iter().map(Option::unwrap).collect();
            }
            // Declared widths overflow: scale down proportionally.
            let scale = table_width / declared_sum;
            return declared.into_iter().map(|w| w.unwrap() * scale).collect();
        }

        // Content-driven fit for the auto columns: measure natural min and
        // max widths and distribute what the fixed columns leave over,
        // proportional to max-content, clamped below by min-content.
        let (min_w, max_w) = self.column_content_bounds(t, cols);
        let remaining = (table_width - declared_sum).max(0.0);
        let auto_indices: Vec<usize> = (0..cols).filter(|&i| declared[i].is_none()).collect();
        let max_sum: f64 = auto_indices.iter().map(|&i| max_w[i]).sum();

        let mut widths: Vec<f64> = declared
            .iter()
            .map(|d| d.unwrap_or(0.0))
            .collect();
        if max_sum <= f64::EPSILON {
            let share = remaining / auto_indices.len().max(1) as f64;
            for &i in &auto_indices {
                widths[i] = share;
            }
            return widths;
        }

        let mut deficit = 0.0f64;
        let mut flexible: Vec<usize> = Vec::new();
        for &i in &auto_indices {
            let proportional = remaining * max_w[i] / max_sum;
            if proportional < min_w[i] {
                widths[i] = min_w[i];
                deficit += min_w[i] - proportional;
            } else {
                widths[i] = proportional;
                flexible.push(i);
            }
        }
        // Take the clamping deficit back out of the still-flexible columns.
        if deficit > 0.0 && !flexible.is_empty() {
            let flexible_sum: f64 = flexible.iter().map(|&i| widths[i]).sum();
            if flexible_sum > deficit {
                for &i in &flexible {
                    widths[i] -= deficit * widths[i] / flexible_sum;
                }
            }
        }
        widths
    }

    /// Min/max content width per column. Spanning cells spread their
    /// demand evenly over the spanned columns.
    fn column_content_bounds(&mut self, t: &Table, cols: usize) -> (Vec<f64>, Vec<f64>) {
        let mut min_w = vec![0.0f64; cols];
        let mut max_w = vec![0.0f64; cols];
        for row in &t.rows {
            let mut col = 0usize;
            for cell in &row.cells {
                let span = cell.props.grid_span.max(1);
                let (cmin, cmax) = self.cell_content_bounds(cell);
                for c in col..(col + span).min(cols) {
                    min_w[c] = min_w[c].max(cmin / span as f64);
                    max_w[c] = max_w[c].max(cmax / span as f64);
                }
                col += span;
            }
        }
        (min_w, max_w)
    }

    fn cell_content_bounds(&mut self, cell: &Cell) -> (f64, f64) {
        let mut min_w = 0.0f64;
        let mut max_w = 0.0f64;
        for block in &cell.blocks {
            if let crate::model::Block::Paragraph(p) = block {
                let saved = self.counters.clone();
                let base_run = self.model.styles.effective_run(p.props.style_id.as_deref());
                let mut collector = ItemCollector {
                    segments: vec![Vec::new()],
                    objects: Vec::new(),
                    anchored: Vec::new(),
                    footnotes: Vec::new(),
                };
                self.collect_items(&p.inlines, &base_run, None, 10_000.0, &mut collector, &p.uid);
                for items in &collector.segments {
                    min_w = min_w.max(text::min_content_width(self.fonts, items));
                    max_w = max_w.max(text::max_content_width(self.fonts, items));
                }
                self.counters = saved;
            }
        }
        // Margins ride on top of content.
        (min_w + 10.8, max_w + 10.8)
    }

    fn measure_cell(
        &mut self,
        cell: &Cell,
        width: f64,
        default_margins: Edges,
        rows: &[Row],
        cell_cols: &[Vec<(usize, usize)>],
        row_index: usize,
        col: usize,
    ) -> MeasuredCell {
        let row_span = match cell.props.vertical_merge {
            VerticalMerge::Continue => 0,
            VerticalMerge::Restart => {
                let mut span = 1usize;
                for (ri, row) in rows.iter().enumerate().skip(row_index + 1) {
                    let continues = row.cells.iter().enumerate().any(|(ci, c)| {
                        cell_cols[ri][ci].0 == col
                            && c.props.vertical_merge == VerticalMerge::Continue
                    });
                    if continues {
                        span += 1;
                    } else {
                        break;
                    }
                }
                span
            }
            VerticalMerge::None => 1,
        };

        let margins = default_margins;
        let inner_width = (width - margins.horizontal()).max(1.0);
        let (blocks, content_h) = if row_span == 0 {
            (Vec::new(), 0.0)
        } else {
            self.layout_part_blocks(&cell.blocks, inner_width, BlockKind::Paragraph)
        };

        MeasuredCell {
            x: 0.0,
            width,
            row_span,
            borders: cell.props.borders,
            shading: cell.props.shading,
            valign: cell.props.valign,
            margins,
            content_height: if row_span == 0 { 0.0 } else { content_h + margins.vertical() },
            blocks,
        }
    }

    /// Emit one table fragment covering `row_indices` (header repeats
    /// included by the caller). Returns the block and its height.
    pub(crate) fn emit_table_fragment(
        &mut self,
        mt: &MeasuredTable,
        row_indices: &[usize],
        origin: Rect,
        kind: BlockKind,
    ) -> (LayoutBlock, f64) {
        let mut cells = Vec::new();
        let mut y = 0.0f64;

        for (pos, &ri) in row_indices.iter().enumerate() {
            let row = &mt.rows[ri];
            for cell in &row.cells {
                if cell.row_span == 0 {
                    continue;
                }
                // Height spans this row plus any merged continuation rows
                // present in this fragment.
                let mut height = row.height;
                for extra in 1..cell.row_span {
                    if let Some(&next) = row_indices.get(pos + extra) {
                        if next == ri + extra {
                            height += mt.rows[next].height;
                        }
                    }
                }

                let inner_height = (height - cell.margins.vertical()).max(0.0);
                let content_h = (cell.content_height - cell.margins.vertical()).max(0.0);
                let valign_shift = match cell.valign {
                    CellVAlign::Top => 0.0,
                    CellVAlign::Center => ((inner_height - content_h) / 2.0).max(0.0),
                    CellVAlign::Bottom => (inner_height - content_h).max(0.0),
                };

                let mut blocks = cell.blocks.clone();
                for b in &mut blocks {
                    offset_block(
                        b,
                        cell.x + cell.margins.left,
                        y + cell.margins.top + valign_shift,
                    );
                }

                cells.push(CellLayout {
                    frame: Rect::new(cell.x, y, cell.width, height),
                    borders: cell.borders,
                    shading: cell.shading,
                    blocks,
                });
            }
            y += row.height;
        }

        let block = LayoutBlock {
            frame: Rect::new(origin.x, origin.y, mt.total_width, y),
            kind,
            content: BlockContent::Table(TableLayout {
                column_widths: mt.column_widths.clone(),
                cells,
            }),
            style_ref: None,
            uid: mt.uid.clone(),
            seq: self.next_seq(),
        };
        (block, y)
    }

    /// Flow a measured table onto pages, splitting between rows.
    pub(crate) fn place_table(
        &mut self,
        mt: MeasuredTable,
        page: &mut PageBuilder,
        pages: &mut Vec<LayoutPage>,
        section_idx: usize,
        options: &PipelineOptions,
    ) {
        let n = mt.rows.len();
        if n == 0 {
            return;
        }
        let mut idx = 0usize;
        let mut first_fragment = true;

        while idx < n {
            // Header rows repeat on continuation fragments.
            let prefix: Vec<usize> = if first_fragment {
                Vec::new()
            } else {
                mt.header_rows.iter().copied().filter(|&h| h < idx).collect()
            };
            let prefix_height = mt.height_of(&prefix);

            let remaining = page.remaining() - prefix_height;
            let mut take = 0usize;
            let mut used = 0.0f64;
            while idx + take < n {
                let h = mt.rows[idx + take].height;
                if used + h > remaining && take > 0 {
                    break;
                }
                if used + h > remaining && take == 0 {
                    break;
                }
                used += h;
                take += 1;
            }

            // Only break where no vertical merge crosses.
            while take > 0 && idx + take < n && !mt.rows[idx + take - 1].break_after_allowed {
                take -= 1;
            }

            if take == 0 {
                if page.has_content() {
                    self.move_to_new_page(page, pages, section_idx, options, first_fragment);
                    continue;
                }
                // Nothing fits on an empty page: force the smallest
                // breakable group and let it overflow.
                take = 1;
                while idx + take < n && !mt.rows[idx + take - 1].break_after_allowed {
                    take += 1;
                }
            }

            let rows: Vec<usize> = prefix
                .iter()
                .copied()
                .chain(idx..idx + take)
                .collect();
            let origin = Rect::new(page.content_left, page.cursor_y, mt.total_width, 0.0);
            let (block, height) = self.emit_table_fragment(&mt, &rows, origin, BlockKind::Table);
            page.keep_next_stash = None;
            page.blocks.push(block);
            page.cursor_y += height;

            idx += take;
            first_fragment = false;
            if idx < n {
                self.start_new_page(page, pages, section_idx, options);
            }
        }
    }
}
