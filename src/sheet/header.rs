//! Header discovery for human-authored upload templates.
//!
//! Templates differ in column order, language and header height, so the
//! header is located by scanning for a row span whose labels match known
//! synonyms rather than by position.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::{normalize_label, Grid};

pub const SEARCH_ROWS: u32 = 50;
pub const SEARCH_COLS: u32 = 160;
const HEADER_HEIGHTS: [u32; 3] = [1, 2, 3];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Category,
    ProductName,
    Description,
    Photo,
    Price,
    Stock,
    Sku,
    Weight,
    Length,
    Width,
    Height,
    Warranty,
}

impl Field {
    pub const ALL: [Field; 12] = [
        Field::Category,
        Field::ProductName,
        Field::Description,
        Field::Photo,
        Field::Price,
        Field::Stock,
        Field::Sku,
        Field::Weight,
        Field::Length,
        Field::Width,
        Field::Height,
        Field::Warranty,
    ];

    /// Label written when the column has to be created.
    pub fn label(self) -> &'static str {
        match self {
            Field::Category => "Kategori",
            Field::ProductName => "Nama Produk",
            Field::Description => "Deskripsi Produk",
            Field::Photo => "Foto Produk",
            Field::Price => "Harga",
            Field::Stock => "Stok",
            Field::Sku => "SKU Induk",
            Field::Weight => "Berat (gram)",
            Field::Length => "Panjang Paket (cm)",
            Field::Width => "Lebar Paket (cm)",
            Field::Height => "Tinggi Paket (cm)",
            Field::Warranty => "Garansi",
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            Field::Category => &["kategori", "category", "product category", "category id"],
            Field::ProductName => &["nama produk", "product name", "name", "nama"],
            Field::Description => &["deskripsi produk", "product description", "description"],
            Field::Photo => &[
                "foto produk",
                "images",
                "image urls",
                "product images",
                "photo",
                "photos",
                "gambar",
                "url gambar",
            ],
            Field::Price => &["harga", "price"],
            Field::Stock => &["stok", "stock", "quantity"],
            Field::Sku => &["sku induk", "sku", "parent sku", "model sku"],
            Field::Weight => &[
                "berat gram",
                "berat",
                "berat produk",
                "weight",
                "weight g",
                "weight gram",
            ],
            Field::Length => &["panjang paket cm", "panjang cm", "panjang", "length", "length cm"],
            Field::Width => &["lebar paket cm", "lebar cm", "lebar", "width", "width cm"],
            Field::Height => &["tinggi paket cm", "tinggi cm", "tinggi", "height", "height cm"],
            Field::Warranty => &["garansi", "warranty", "masa garansi", "warranty period"],
        }
    }
}

/// Canonical header written into a synthesized template, in column order.
pub const CANONICAL_HEADER: [Field; 12] = [
    Field::Category,
    Field::ProductName,
    Field::Description,
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

static ALIASES: LazyLock<Vec<(Field, HashSet<String>)>> = LazyLock::new(|| {
    Field::ALL
        .iter()
        .map(|&f| (f, f.aliases().iter().map(|a| normalize_label(a)).collect()))
        .collect()
});

static COVER_SLOT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:foto|gambar|image|photo)\s+(?:sampul|utama|cover|main)|(?:cover|main)\s+(?:image|photo))$")
        .unwrap()
});
static NUMBERED_SLOT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:foto|gambar|image|photo)\s+(?:(?:produk|product|item)\s+)?(\d+)|(?:item|product)\s+(?:image|photo)\s+(\d+))$")
        .unwrap()
});
static OTHER_SLOT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:foto|gambar)\s+produk\s+\w+|(?:item|product)\s+(?:image|photo)\s+\w+)$").unwrap()
});

/// Placement order of image-slot columns: cover, then numbered, then the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SlotRank {
    Cover,
    Numbered(u32),
    Unranked,
}

/// Classify a normalized label as an image slot.
pub fn slot_rank(label: &str) -> Option<SlotRank> {
    if COVER_SLOT_RE.is_match(label) {
        return Some(SlotRank::Cover);
    }
    if let Some(caps) = NUMBERED_SLOT_RE.captures(label) {
        let n = caps
            .get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(u32::MAX);
        return Some(SlotRank::Numbered(n));
    }
    OTHER_SLOT_RE.is_match(label).then_some(SlotRank::Unranked)
}

/// Rank-sort `(column, normalized label)` pairs that are image slots.
pub fn rank_slots<'a>(labels: impl IntoIterator<Item = (u32, &'a str)>) -> Vec<u32> {
    let mut slots: Vec<(SlotRank, u32)> = labels
        .into_iter()
        .filter_map(|(col, label)| slot_rank(label).map(|r| (r, col)))
        .collect();
    slots.sort();
    slots.into_iter().map(|(_, col)| col).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderMap {
    /// Last physical row of the header; data starts below it.
    pub header_row: u32,
    /// Number of physical rows the header spans (1..=3).
    pub height: u32,
    pub fields: BTreeMap<Field, u32>,
    pub image_columns: Vec<u32>,
}

impl HeaderMap {
    pub fn column(&self, field: Field) -> Option<u32> {
        self.fields.get(&field).copied()
    }

    /// Mapping of a template written with [`CANONICAL_HEADER`] in row 1.
    pub fn canonical() -> Self {
        HeaderMap {
            header_row: 1,
            height: 1,
            fields: CANONICAL_HEADER
                .iter()
                .enumerate()
                .map(|(i, &f)| (f, i as u32 + 1))
                .collect(),
            image_columns: Vec::new(),
        }
    }
}

/// Concatenate cell text of `height` rows starting at `start`, per column,
/// then normalize. Rows past the search window are not read.
pub fn merged_labels<G: Grid + ?Sized>(grid: &G, start: u32, height: u32, cols: u32) -> Vec<String> {
    let last = (start + height - 1).min(SEARCH_ROWS).max(start);
    (1..=cols)
        .map(|col| {
            let parts: Vec<String> = (start..=last)
                .map(|row| grid.text(col, row))
                .filter(|v| !v.trim().is_empty())
                .collect();
            normalize_label(&parts.join(" "))
        })
        .collect()
}

/// Locate the header: rows ascending, then heights 1, 2, 3. The first span
/// with category, product name and one of description/image slot/photo wins.
pub fn resolve_header<G: Grid + ?Sized>(grid: &G) -> Option<HeaderMap> {
    let cols = grid.highest_column().min(SEARCH_COLS);
    let rows = grid.highest_row().min(SEARCH_ROWS);
    if cols == 0 {
        return None;
    }

    for start in 1..=rows {
        for height in HEADER_HEIGHTS {
            let labels = merged_labels(grid, start, height, cols);
            if let Some(map) = match_labels(&labels, start + height - 1, height) {
                return Some(map);
            }
        }
    }
    None
}

fn match_labels(labels: &[String], header_row: u32, height: u32) -> Option<HeaderMap> {
    let mut fields = BTreeMap::new();
    for (field, aliases) in ALIASES.iter() {
        let hit = labels
            .iter()
            .position(|label| !label.is_empty() && aliases.contains(label));
        if let Some(idx) = hit {
            fields.insert(*field, idx as u32 + 1);
        }
    }

    let image_columns = rank_slots(
        labels
            .iter()
            .enumerate()
            .map(|(i, label)| (i as u32 + 1, label.as_str())),
    );

    let has_required = fields.contains_key(&Field::Category) && fields.contains_key(&Field::ProductName);
    let has_content = fields.contains_key(&Field::Description)
        || !image_columns.is_empty()
        || fields.contains_key(&Field::Photo);
    if !(has_required && has_content) {
        return None;
    }

    Some(HeaderMap {
        header_row,
        height,
        fields,
        image_columns,
    })
}
