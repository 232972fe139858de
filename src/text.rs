use std::sync::LazyLock;

use regex::Regex;

pub const TITLE_MAX_CHARS: usize = 255;
pub const DESCRIPTION_MAX_CHARS: usize = 3000;
pub const DESCRIPTION_PLACEHOLDER: &str = "{{DESCRIPTION}}";

const TITLE_SUFFIX: &str = " – Cable Winder Organizer, Portable, 3D Print";
const INFO_LINES: &[&str] = &[
    "Kegunaan: penggulung kabel USB/Type-C/Lightning.",
    "Material: PLA/ABS (sesuai profil cetak).",
];

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)\S*").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static BLANK_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n[ \t]*(?:\n[ \t]*)+").unwrap());

/// Lines carrying print-profile/design-source attribution or a dangling FAQ marker.
static BOILERPLATE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^\s*print\s*profile\s*:.*$",
        r"(?i)^\s*sumber\s*desain\s*:.*$",
        r"(?i)^\s*design\s*source\s*:.*$",
        r"(?i)^\s*source\s*:.*$",
        r"(?i)\bFAQ\b\s*$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

pub fn is_boilerplate(line: &str) -> bool {
    BOILERPLATE_RES.iter().any(|re| re.is_match(line))
}

pub fn strip_urls(text: &str) -> String {
    URL_RE.replace_all(text, "").into_owned()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Decode entities, drop URLs, blank lines and attribution boilerplate.
pub fn clean_description(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }
    let decoded = html_escape::decode_html_entities(raw);
    let unified = decoded.replace("\r\n", "\n").replace('\r', "\n");

    unified
        .split('\n')
        .map(|line| strip_urls(line).trim().to_string())
        .filter(|line| !line.is_empty())
        .filter(|line| !is_boilerplate(line))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Whitespace-collapsed title with the promo suffix, hard-capped at 255 chars.
pub fn seo_title(title: &str) -> String {
    let collapsed = WS_RE.replace_all(title.trim(), " ");
    truncate_chars(&format!("{}{}", collapsed, TITLE_SUFFIX), TITLE_MAX_CHARS)
}

/// Cleaned description followed by the fixed info lines, blank-line separated.
pub fn seo_description(raw: &str) -> String {
    let base = clean_description(raw);
    let parts: Vec<&str> = std::iter::once(base.as_str())
        .chain(INFO_LINES.iter().copied())
        .filter(|p| !p.is_empty())
        .collect();
    truncate_chars(parts.join("\n\n").trim(), DESCRIPTION_MAX_CHARS)
}

/// Render the description through an operator template when one is given.
///
/// The template's `{{DESCRIPTION}}` token receives the cleaned text (`-` when
/// nothing is left), then URLs are stripped from the whole result, template
/// text included. A template without the token is used verbatim.
pub fn apply_description_template(raw: &str, template: Option<&str>) -> String {
    let Some(template) = template else {
        return seo_description(raw);
    };

    let cleaned = clean_description(raw);
    let body = if cleaned.is_empty() { "-" } else { cleaned.as_str() };
    let rendered = template.replacen(DESCRIPTION_PLACEHOLDER, body, 1);
    let stripped = strip_urls(&rendered);
    let collapsed = BLANK_RUN_RE.replace_all(stripped.trim(), "\n\n");
    truncate_chars(&collapsed, DESCRIPTION_MAX_CHARS)
}
