use std::path::Path;

use anyhow::{Context, Result};

use crate::models::MetadataRow;

/// Write one CSV row per emitted product, header included.
pub fn write_metadata(path: &Path, rows: &[MetadataRow]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("creating metadata file {}", path.display()))?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}
