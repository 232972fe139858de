use std::io::{Cursor, Read, Write};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::{Reader, Writer};
use tracing::{debug, warn};
use umya_spreadsheet::Spreadsheet;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::header::{HeaderMap, CANONICAL_HEADER};
use super::GridMut;
use crate::error::WorkbookError;

pub const TEMPLATE_SHEET: &str = "Template";

/// A loaded workbook and whether it had to be built from scratch.
pub struct LoadedBook {
    pub book: Spreadsheet,
    pub synthesized: bool,
}

// ── Package sanitation ──

fn is_worksheet_part(name: &str) -> bool {
    name.starts_with("xl/worksheets/") && name.ends_with(".xml")
}

/// Rewrite an xlsx package with every `<sheetViews>` element removed from the
/// worksheet parts. Frozen panes and selections in vendor templates trip up
/// the spreadsheet reader.
pub fn sanitize_package(bytes: &[u8]) -> Result<Vec<u8>, WorkbookError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut out = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        if entry.is_dir() {
            out.add_directory(name, options)?;
            continue;
        }

        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        if is_worksheet_part(&name) {
            data = strip_sheet_views(&data).map_err(|reason| WorkbookError::Xml {
                part: name.clone(),
                reason,
            })?;
            debug!("Stripped sheet views from {}", name);
        }

        out.start_file(name, options)?;
        out.write_all(&data)?;
    }

    Ok(out.finish()?.into_inner())
}

pub fn strip_sheet_views(xml: &[u8]) -> Result<Vec<u8>, String> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::new());
    let mut buf = Vec::new();
    let mut depth = 0usize;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| e.to_string())?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) if depth > 0 || e.local_name().as_ref() == b"sheetViews" => depth += 1,
            Event::End(_) if depth > 0 => depth -= 1,
            Event::Empty(ref e) if e.local_name().as_ref() == b"sheetViews" => {}
            _ if depth > 0 => {}
            other => writer.write_event(other).map_err(|e| e.to_string())?,
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}

// ── Loading ──

pub fn open_template(path: &Path) -> Result<Spreadsheet, WorkbookError> {
    if !path.is_file() {
        return Err(WorkbookError::Missing(path.display().to_string()));
    }
    let raw = std::fs::read(path)?;
    let clean = sanitize_package(&raw)?;
    umya_spreadsheet::reader::xlsx::read_reader(Cursor::new(clean), true)
        .map_err(|e| WorkbookError::Load(e.to_string()))
}

/// Open the template, or fall back to an in-memory canonical one.
pub fn load_or_synthesize(path: &Path) -> Result<LoadedBook, WorkbookError> {
    match open_template(path) {
        Ok(book) => Ok(LoadedBook {
            book,
            synthesized: false,
        }),
        Err(e) => {
            warn!("Template {} unusable ({}), using a blank canonical sheet", path.display(), e);
            Ok(LoadedBook {
                book: minimal_template()?,
                synthesized: true,
            })
        }
    }
}

pub fn minimal_template() -> Result<Spreadsheet, WorkbookError> {
    let mut book = umya_spreadsheet::new_file_empty_worksheet();
    add_canonical_sheet(&mut book)?;
    Ok(book)
}

/// Append a `Template` sheet with the canonical header in row 1.
pub fn add_canonical_sheet(book: &mut Spreadsheet) -> Result<HeaderMap, WorkbookError> {
    let ws = book
        .new_sheet(TEMPLATE_SHEET)
        .map_err(|e| WorkbookError::Load(e.to_string()))?;
    for (i, field) in CANONICAL_HEADER.iter().enumerate() {
        ws.set_text(i as u32 + 1, 1, field.label());
    }
    Ok(HeaderMap::canonical())
}

/// Explicit name if present, else `Template`, else the first sheet.
pub fn select_sheet(book: &Spreadsheet, wanted: Option<&str>) -> Option<String> {
    let names: Vec<&str> = book.get_sheet_collection().iter().map(|ws| ws.get_name()).collect();
    wanted
        .and_then(|w| names.iter().find(|n| **n == w))
        .or_else(|| names.iter().find(|n| **n == TEMPLATE_SHEET))
        .or_else(|| names.first())
        .map(|n| n.to_string())
}
