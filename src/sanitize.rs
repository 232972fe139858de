//! Media URL cleanup: removes the CDN "serve as webp" directive that the
//! marketplace uploader rejects.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

const OSS_PROCESS_KEY: &str = "x-oss-process";
const FORMAT_KEYS: &[&str] = &["format", "fm"];
const WEBP_STEP: &str = "format,webp";
const PNG_STEP: &str = "format,png";

/// Escapes only what would change how a query pair parses. `/` and `,` stay
/// literal so processing pipelines read the same as the CDN writes them.
const QUERY_PART: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'&')
    .add(b'=')
    .add(b'+')
    .add(b'%');

/// Strip the webp-forcing directive from a media URL's query.
///
/// `x-oss-process=image/resize,w_400/format,webp` keeps its other steps and
/// asks for png instead; a pipeline holding only `format,webp` is dropped.
/// A standalone `format=webp` becomes `format=png` when other parameters
/// remain, otherwise it is dropped. An emptied query is removed entirely.
/// URLs without a webp directive come back unchanged.
pub fn sanitize(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
    if !pairs.iter().any(|(k, v)| is_webp_pair(k, v)) {
        return url.to_string();
    }

    // Pairs that survive regardless of the standalone format parameter.
    let mut kept: Vec<(usize, String)> = Vec::new();
    let mut format_slots: Vec<(usize, &str)> = Vec::new();
    for (i, (key, value)) in pairs.iter().enumerate() {
        if key.eq_ignore_ascii_case(OSS_PROCESS_KEY) {
            if let Some(v) = rewrite_oss_process(value) {
                kept.push((i, join_pair(key, &v)));
            }
        } else if is_format_key(key) && value.eq_ignore_ascii_case("webp") {
            format_slots.push((i, key));
        } else {
            kept.push((i, join_pair(key, value)));
        }
    }

    if !kept.is_empty() {
        for (i, key) in format_slots {
            kept.push((i, join_pair(key, "png")));
        }
        kept.sort_by_key(|(i, _)| *i);
    }

    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let query = kept.into_iter().map(|(_, p)| p).collect::<Vec<_>>().join("&");
        parsed.set_query(Some(&query));
    }
    parsed.to_string()
}

fn join_pair(key: &str, value: &str) -> String {
    let key = utf8_percent_encode(key, QUERY_PART);
    if value.is_empty() {
        key.to_string()
    } else {
        format!("{}={}", key, utf8_percent_encode(value, QUERY_PART))
    }
}

fn is_format_key(key: &str) -> bool {
    FORMAT_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

fn is_webp_pair(key: &str, value: &str) -> bool {
    if key.eq_ignore_ascii_case(OSS_PROCESS_KEY) {
        return value.split('/').any(|s| s.eq_ignore_ascii_case(WEBP_STEP));
    }
    is_format_key(key) && value.eq_ignore_ascii_case("webp")
}

/// Returns the rewritten pipeline, or `None` when nothing but the webp step
/// was in it. `value` is already percent-decoded.
fn rewrite_oss_process(value: &str) -> Option<String> {
    let steps: Vec<&str> = value.split('/').collect();
    if !steps.iter().any(|s| s.eq_ignore_ascii_case(WEBP_STEP)) {
        return Some(value.to_string());
    }

    let others = steps
        .iter()
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("image"))
        .filter(|s| !s.eq_ignore_ascii_case(WEBP_STEP))
        .count();
    if others == 0 {
        return None;
    }

    Some(
        steps
            .iter()
            .map(|s| if s.eq_ignore_ascii_case(WEBP_STEP) { PNG_STEP } else { s })
            .collect::<Vec<_>>()
            .join("/"),
    )
}
