//! Helpers that pick things out of extractor metadata.

use serde_json::Value;

/// Url of the largest thumbnail by pixel area.
///
/// Falls back to the top-level `thumbnail` field when the list is missing
/// or has no usable entry. Ties keep the first candidate.
pub fn best_thumbnail(info: &Value) -> Option<String> {
    let mut best: Option<(i64, &str)> = None;

    for thumb in info
        .get("thumbnails")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let Some(url) = thumb.get("url").and_then(Value::as_str) else {
            continue;
        };
        let area = dimension(thumb, "width") * dimension(thumb, "height");
        if best.is_none_or(|(best_area, _)| area > best_area) {
            best = Some((area, url));
        }
    }

    best.map(|(_, url)| url.to_string()).or_else(|| {
        info.get("thumbnail")
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}

/// Direct media url suitable for in-browser preview.
///
/// For playlists the first entry is used; an empty playlist falls back to
/// its own metadata. Preference order: the first requested format, the
/// top-level `url`, then the best entry of `formats` ranked by
/// (height, audio bitrate).
pub fn stream_url(info: &Value) -> Option<String> {
    let info = playlist_entry(info).unwrap_or(info);

    if let Some(url) = info
        .get("requested_formats")
        .and_then(Value::as_array)
        .and_then(|formats| formats.first())
        .and_then(|format| format.get("url"))
        .and_then(Value::as_str)
    {
        return Some(url.to_string());
    }

    if let Some(url) = info.get("url").and_then(Value::as_str) {
        return Some(url.to_string());
    }

    let mut best: Option<(&Value, (i64, f64))> = None;
    for format in info
        .get("formats")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let rank = (
            dimension(format, "height"),
            format.get("abr").and_then(Value::as_f64).unwrap_or(0.0),
        );
        let better = match &best {
            None => true,
            Some((_, best_rank)) => {
                rank.0 > best_rank.0 || (rank.0 == best_rank.0 && rank.1 > best_rank.1)
            }
        };
        if better {
            best = Some((format, rank));
        }
    }

    best.and_then(|(format, _)| format.get("url").and_then(Value::as_str))
        .map(str::to_string)
}

fn playlist_entry(info: &Value) -> Option<&Value> {
    if info.get("_type").and_then(Value::as_str) != Some("playlist") {
        return None;
    }
    info.get("entries").and_then(Value::as_array)?.first()
}

/// Non-negative integer field, treating null/missing/garbage as 0
fn dimension(value: &Value, key: &str) -> i64 {
    value
        .get(key)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .unwrap_or(0)
        .max(0)
}
