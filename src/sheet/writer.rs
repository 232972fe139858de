use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use super::header::{merged_labels, rank_slots, resolve_header, Field, HeaderMap};
use super::workbook::{self, TEMPLATE_SHEET};
use super::{Grid, GridMut};
use crate::models::{ProductRecord, MAX_MEDIA};

pub const DEFAULT_WARRANTY: &str = "Tidak Ada Garansi";

const REQUIRED: [Field; 3] = [Field::Category, Field::ProductName, Field::Description];
const OPTIONAL: [Field; 9] = [
    Field::Price,
    Field::Stock,
    Field::Sku,
    Field::Weight,
    Field::Length,
    Field::Width,
    Field::Height,
    Field::Photo,
    Field::Warranty,
];

#[derive(Debug, Clone, Serialize)]
pub struct WriteReport {
    pub sheet: String,
    pub synthesized: bool,
    pub header_row: u32,
    pub first_row: u32,
    pub rows_written: usize,
    pub created_columns: Vec<Field>,
    pub image_slots: usize,
}

/// Columns the writer fills, after missing ones have been added.
#[derive(Debug, Clone)]
pub struct ColumnPlan {
    pub fields: BTreeMap<Field, u32>,
    pub image_slots: Vec<u32>,
    pub created: Vec<Field>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppendOutcome {
    pub first_row: u32,
    pub rows_written: usize,
}

// ── Workbook level ──

/// Load `source` (or a synthesized template), append `records` to the chosen
/// sheet and save the result to `output`.
pub fn write_listings(
    source: &Path,
    output: &Path,
    records: &[ProductRecord],
    sheet_name: Option<&str>,
    warranty_default: &str,
) -> Result<WriteReport> {
    let loaded = workbook::load_or_synthesize(source)?;
    let mut book = loaded.book;

    let mut sheet = match workbook::select_sheet(&book, sheet_name) {
        Some(name) => name,
        None => {
            workbook::add_canonical_sheet(&mut book)?;
            TEMPLATE_SHEET.to_string()
        }
    };

    let resolved = book.get_sheet_by_name(&sheet).and_then(|ws| resolve_header(ws));
    let map = match resolved {
        Some(map) => map,
        None => {
            info!("No recognizable header in sheet '{}', writing a fresh Template sheet", sheet);
            let _ = book.remove_sheet_by_name(TEMPLATE_SHEET);
            sheet = TEMPLATE_SHEET.to_string();
            workbook::add_canonical_sheet(&mut book)?
        }
    };
    debug!("Header map for '{}': {:?}", sheet, map);

    let ws = book
        .get_sheet_by_name_mut(&sheet)
        .with_context(|| format!("sheet '{}' disappeared", sheet))?;
    let plan = plan_columns(ws, &map);
    let outcome = append_records(ws, &map, &plan, records, warranty_default);

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory {}", parent.display()))?;
    }
    umya_spreadsheet::writer::xlsx::write(&book, output)
        .map_err(|e| anyhow::anyhow!("{}", e))
        .with_context(|| format!("saving workbook to {}", output.display()))?;

    info!(
        "Wrote {} rows to sheet '{}' starting at row {}",
        outcome.rows_written, sheet, outcome.first_row
    );

    Ok(WriteReport {
        sheet,
        synthesized: loaded.synthesized,
        header_row: map.header_row,
        first_row: outcome.first_row,
        rows_written: outcome.rows_written,
        created_columns: plan.created,
        image_slots: plan.image_slots.len(),
    })
}

// ── Sheet level ──

/// Add any missing required/optional columns after the last used column and
/// re-derive the image slots from the header text as it now stands.
pub fn plan_columns<G: GridMut + ?Sized>(grid: &mut G, map: &HeaderMap) -> ColumnPlan {
    let mut fields = map.fields.clone();
    let mut created = Vec::new();

    for field in REQUIRED.iter().chain(OPTIONAL.iter()) {
        if map.column(*field).is_some() {
            continue;
        }
        let col = grid.highest_column() + 1;
        grid.set_text(col, map.header_row, field.label());
        fields.insert(*field, col);
        created.push(*field);
    }

    let start = map.header_row + 1 - map.height;
    let labels = merged_labels(grid, start, map.height, grid.highest_column());
    let image_slots = rank_slots(
        labels
            .iter()
            .enumerate()
            .map(|(i, label)| (i as u32 + 1, label.as_str())),
    );

    ColumnPlan {
        fields,
        image_slots,
        created,
    }
}

/// First row below the header with nothing in any used column.
pub fn next_blank_row<G: Grid + ?Sized>(grid: &G, header_row: u32) -> u32 {
    let cols = grid.highest_column();
    let mut row = header_row + 1;
    while (1..=cols).any(|c| !grid.text(c, row).trim().is_empty()) {
        row += 1;
    }
    row
}

pub fn append_records<G: GridMut + ?Sized>(
    grid: &mut G,
    map: &HeaderMap,
    plan: &ColumnPlan,
    records: &[ProductRecord],
    warranty_default: &str,
) -> AppendOutcome {
    let first_row = next_blank_row(grid, map.header_row);
    let mut row = first_row;

    for record in records {
        write_record(grid, plan, row, record, warranty_default);
        row += 1;
    }

    AppendOutcome {
        first_row,
        rows_written: records.len(),
    }
}

fn write_record<G: GridMut + ?Sized>(
    grid: &mut G,
    plan: &ColumnPlan,
    row: u32,
    record: &ProductRecord,
    warranty_default: &str,
) {
    let col = |f: Field| plan.fields.get(&f).copied();

    if let Some(c) = col(Field::Category) {
        grid.set_text(c, row, &record.category_id);
    }
    if let Some(c) = col(Field::ProductName) {
        grid.set_text(c, row, &record.name);
    }
    if let Some(c) = col(Field::Description) {
        grid.set_text(c, row, &record.description);
    }
    if let Some(c) = col(Field::Price) {
        grid.set_number(c, row, record.price.trunc());
    }
    if let Some(c) = col(Field::Stock) {
        grid.set_number(c, row, record.stock as f64);
    }
    if let Some(c) = col(Field::Sku) {
        grid.set_text(c, row, &record.sku);
    }
    if let Some(c) = col(Field::Weight) {
        grid.set_number(c, row, (record.weight_kg * 1000.0).round());
    }

    let (l, w, h) = record.dims_cm;
    for (field, value) in [(Field::Length, l), (Field::Width, w), (Field::Height, h)] {
        if let Some(c) = col(field) {
            grid.set_number(c, row, value as f64);
        }
    }

    let images = &record.images[..record.images.len().min(MAX_MEDIA)];
    if !plan.image_slots.is_empty() {
        for (c, image) in plan.image_slots.iter().zip(images) {
            grid.set_text(*c, row, image);
        }
    } else if let Some(c) = col(Field::Photo) {
        grid.set_text(c, row, &images.join(","));
    }

    if let Some(c) = col(Field::Warranty) {
        let text = record
            .warranty
            .as_deref()
            .filter(|w| !w.trim().is_empty())
            .unwrap_or(warranty_default);
        grid.set_text(c, row, text);
    }
}
