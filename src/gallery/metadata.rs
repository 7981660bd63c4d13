use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Namespace used for API tags that carry no explicit namespace.
const DEFAULT_TAG_NAMESPACE: &str = "misc";

/// Marker tag in the `language` namespace that names no language itself.
const TRANSLATED_MARKER: &str = "translated";

/// Structured gallery metadata as returned by one `gdata` response entry.
///
/// Field order here is the field order of the written metadata record.
#[derive(Debug, Clone, Serialize)]
pub struct GalleryMetadata {
    pub gallery_id: u64,
    pub gallery_token: String,
    pub url: String,
    pub title: Option<String>,
    pub title_original: Option<String>,
    pub category: Option<String>,
    pub uploader: Option<String>,
    /// Upload time, seconds since the epoch.
    pub posted: Option<i64>,
    pub file_count: u64,
    pub file_size: Option<u64>,
    pub rating: Option<f64>,
    /// Language derived from the `language` tag namespace.
    pub language: Option<String>,
    /// Tag values grouped by namespace.
    pub tags: BTreeMap<String, Vec<String>>,
}

impl GalleryMetadata {
    /// Builds metadata from one `gmetadata` entry; `Err` carries a
    /// description of what made the entry unusable.
    pub fn from_api_entry(entry: &Value, site: &str) -> Result<Self, String> {
        let gallery_id = entry
            .get("gid")
            .and_then(as_u64_lenient)
            .ok_or_else(|| "entry is missing a gallery id".to_string())?;
        let gallery_token = entry
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("entry {gallery_id} is missing its token"))?
            .to_string();

        let tags = parse_tags(entry.get("tags"));
        let language = derive_language(&tags);

        Ok(Self {
            url: format!("{site}/g/{gallery_id}/{gallery_token}/"),
            gallery_id,
            gallery_token,
            title: non_empty_string(entry.get("title")),
            title_original: non_empty_string(entry.get("title_jpn")),
            category: non_empty_string(entry.get("category")),
            uploader: non_empty_string(entry.get("uploader")),
            posted: entry.get("posted").and_then(as_i64_lenient),
            file_count: entry.get("filecount").and_then(as_u64_lenient).unwrap_or(0),
            file_size: entry.get("filesize").and_then(as_u64_lenient),
            rating: entry.get("rating").and_then(as_f64_lenient),
            language,
            tags,
        })
    }

    /// Tag values in one namespace; empty when the namespace is absent.
    pub fn tags_in(&self, namespace: &str) -> &[String] {
        self.tags.get(namespace).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The canonical metadata record written back to a target.
    pub fn to_record_json(&self) -> String {
        // Serialization of this shape cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Splits flat API tags (`namespace:value`, unqualified values implied
/// `misc`) into a namespace map, preserving per-namespace order.
fn parse_tags(tags: Option<&Value>) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let Some(tags) = tags.and_then(Value::as_array) else {
        return map;
    };
    for tag in tags.iter().filter_map(Value::as_str) {
        let (namespace, value) = match tag.split_once(':') {
            Some((ns, value)) if !ns.is_empty() => (ns, value),
            _ => (DEFAULT_TAG_NAMESPACE, tag),
        };
        map.entry(namespace.to_string())
            .or_default()
            .push(value.to_string());
    }
    map
}

/// The gallery's language: the first `language:` tag that is not the
/// `translated` marker.
fn derive_language(tags: &BTreeMap<String, Vec<String>>) -> Option<String> {
    tags.get("language")?
        .iter()
        .find(|value| !value.eq_ignore_ascii_case(TRANSLATED_MARKER))
        .cloned()
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    match value.and_then(Value::as_str) {
        Some("") | None => None,
        Some(s) => Some(s.to_string()),
    }
}

// The API reports numeric fields inconsistently as numbers or strings.
fn as_u64_lenient(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| value.as_str()?.parse().ok())
}

fn as_i64_lenient(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_str()?.parse().ok())
}

fn as_f64_lenient(value: &Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_str()?.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_entry() -> Value {
        json!({
            "gid": 123456,
            "token": "abcdef0123",
            "title": "[Artist] Some Gallery (English)",
            "title_jpn": "何かのギャラリー",
            "category": "Manga",
            "uploader": "someone",
            "posted": "1500000000",
            "filecount": "24",
            "filesize": 34567890,
            "rating": "4.53",
            "tags": [
                "language:translated",
                "language:english",
                "artist:someone",
                "full color",
            ],
        })
    }

    #[test]
    fn parses_a_complete_entry() {
        let meta =
            GalleryMetadata::from_api_entry(&sample_entry(), "https://e-hentai.org").unwrap();
        assert_eq!(meta.gallery_id, 123456);
        assert_eq!(meta.gallery_token, "abcdef0123");
        assert_eq!(meta.url, "https://e-hentai.org/g/123456/abcdef0123/");
        assert_eq!(meta.title.as_deref(), Some("[Artist] Some Gallery (English)"));
        assert_eq!(meta.title_original.as_deref(), Some("何かのギャラリー"));
        assert_eq!(meta.posted, Some(1_500_000_000));
        assert_eq!(meta.file_count, 24);
        assert_eq!(meta.file_size, Some(34_567_890));
        assert_eq!(meta.rating, Some(4.53));
    }

    #[test]
    fn tags_are_grouped_by_namespace_with_misc_fallback() {
        let meta =
            GalleryMetadata::from_api_entry(&sample_entry(), "https://e-hentai.org").unwrap();
        assert_eq!(meta.tags_in("language"), ["translated", "english"]);
        assert_eq!(meta.tags_in("artist"), ["someone"]);
        assert_eq!(meta.tags_in("misc"), ["full color"]);
        assert!(meta.tags_in("parody").is_empty());
    }

    #[test]
    fn language_skips_the_translated_marker() {
        let meta =
            GalleryMetadata::from_api_entry(&sample_entry(), "https://e-hentai.org").unwrap();
        assert_eq!(meta.language.as_deref(), Some("english"));

        let untranslated = json!({
            "gid": 1, "token": "t", "filecount": 1,
            "tags": ["language:translated"],
        });
        let meta = GalleryMetadata::from_api_entry(&untranslated, "x").unwrap();
        assert_eq!(meta.language, None);
    }

    #[test]
    fn missing_identity_fields_are_errors() {
        assert!(GalleryMetadata::from_api_entry(&json!({"token": "t"}), "x").is_err());
        assert!(GalleryMetadata::from_api_entry(&json!({"gid": 5}), "x").is_err());
    }

    #[test]
    fn empty_optional_fields_become_none() {
        let entry = json!({ "gid": 1, "token": "t", "title_jpn": "", "filecount": 3 });
        let meta = GalleryMetadata::from_api_entry(&entry, "x").unwrap();
        assert_eq!(meta.title_original, None);
        assert_eq!(meta.file_count, 3);
    }

    #[test]
    fn record_json_round_trips_through_serde() {
        let meta =
            GalleryMetadata::from_api_entry(&sample_entry(), "https://e-hentai.org").unwrap();
        let record = meta.to_record_json();
        let value: Value = serde_json::from_str(&record).unwrap();
        assert_eq!(value["gallery_id"], 123456);
        assert_eq!(value["tags"]["language"][1], "english");
    }
}
