pub mod header;
pub mod workbook;
pub mod writer;

use std::sync::LazyLock;

use regex::Regex;
use umya_spreadsheet::Worksheet;
use unicode_normalization::UnicodeNormalization;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static PUNCT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]").unwrap());

/// Read access to a worksheet, 1-based `(col, row)` like the xlsx model.
pub trait Grid {
    fn text(&self, col: u32, row: u32) -> String;
    fn highest_column(&self) -> u32;
    fn highest_row(&self) -> u32;
}

pub trait GridMut: Grid {
    fn set_text(&mut self, col: u32, row: u32, value: &str);
    fn set_number(&mut self, col: u32, row: u32, value: f64);
}

impl Grid for Worksheet {
    fn text(&self, col: u32, row: u32) -> String {
        self.get_value((col, row))
    }

    fn highest_column(&self) -> u32 {
        self.get_highest_column()
    }

    fn highest_row(&self) -> u32 {
        self.get_highest_row()
    }
}

impl GridMut for Worksheet {
    fn set_text(&mut self, col: u32, row: u32, value: &str) {
        self.get_cell_mut((col, row)).set_value_string(value);
    }

    fn set_number(&mut self, col: u32, row: u32, value: f64) {
        self.get_cell_mut((col, row)).set_value_number(value);
    }
}

/// Fold a header label for alias matching: NFKC, single-spaced, lowercase,
/// punctuation removed. `"Berat (gram)"` → `"berat gram"`.
pub fn normalize_label(raw: &str) -> String {
    let folded: String = raw.nfkc().collect();
    let spaced = WS_RE.replace_all(&folded, " ");
    let lower = spaced.trim().to_lowercase();
    let stripped = PUNCT_RE.replace_all(&lower, "");
    WS_RE.replace_all(stripped.trim(), " ").into_owned()
}
