use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_DISPOSITION, COOKIE};
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::gallery::metadata::GalleryMetadata;

/// Protocol maximum for one `gdata` metadata request.
pub const MAX_API_RESULTS: usize = 25;

/// Cookies forwarded from the exhentai cookie string.
const REQUIRED_COOKIE_NAMES: [&str; 3] = ["ipb_member_id", "ipb_pass_hash", "igneous"];

/// Layout cookie forcing the minimal gallery list style the result parser
/// expects.
const LAYOUT_COOKIE: &str = "sl=dm_3";

pub const PUBLIC_SITE: &str = "https://e-hentai.org";
pub const MEMBER_SITE: &str = "https://exhentai.org";

static RESULT_ANCHOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<a\s+href="([^"]*)">\s*<div\s+class="glink">"#).unwrap());
static GALLERY_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"/g/(\d+)/(\w+)/?").unwrap());
static COOKIE_PAIR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*([^=;]*)=([^;]*)(?:;|$)").unwrap());

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("site responded with a blocked-access placeholder")]
    SiteBlocked,

    #[error("unexpected api response: {0}")]
    BadResponse(String),
}

/// Identifies one remote gallery: numeric id plus its access token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GalleryIdentifier {
    pub id: u64,
    pub token: String,
}

impl GalleryIdentifier {
    pub fn new(id: u64, token: impl Into<String>) -> Self {
        Self { id, token: token.into() }
    }

    pub fn url(&self, site: &str) -> String {
        format!("{site}/g/{}/{}/", self.id, self.token)
    }
}

/// Parses a gallery identifier out of a gallery page URL.
pub fn identifier_from_url(url: &str) -> Option<GalleryIdentifier> {
    let caps = GALLERY_PATH.captures(url)?;
    let id = caps[1].parse().ok()?;
    Some(GalleryIdentifier::new(id, &caps[2]))
}

/// SHA-1 digest of the image content, as required by the hash search.
pub fn image_hash(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

pub fn hash_search_url(site: &str, hash: &str, covers_only: bool, expunged: bool) -> String {
    format!(
        "{site}/?f_shash={hash}&fs_similar=0&fs_exp={}&fs_covers={}&f_cats=0",
        expunged as u8, covers_only as u8
    )
}

/// Extracts gallery identifiers from a search results page.
pub fn parse_search_results(html: &str) -> Vec<GalleryIdentifier> {
    RESULT_ANCHOR
        .captures_iter(html)
        .filter_map(|caps| identifier_from_url(caps.get(1).map_or("", |m| m.as_str())))
        .collect()
}

/// Assembles the request cookie header: authentication cookies picked out of
/// the exhentai cookie string (when present) plus the layout cookie.
pub fn build_cookie_header(ex_cookie_string: Option<&str>) -> String {
    let mut parts = Vec::new();
    if let Some(cookie_string) = ex_cookie_string {
        for caps in COOKIE_PAIR.captures_iter(cookie_string) {
            let name = caps[1].trim();
            if REQUIRED_COOKIE_NAMES.contains(&name) {
                parts.push(format!("{name}={}", &caps[2]));
            }
        }
    }
    parts.push(LAYOUT_COOKIE.to_string());
    parts.join("; ")
}

fn is_blocked(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.contains("filename=\"sadpanda.jpg\""))
        .unwrap_or(false)
}

/// Shared HTTP client carrying the per-run cookie header.
#[derive(Debug, Clone)]
pub struct RequestSender {
    client: reqwest::Client,
}

impl RequestSender {
    pub fn new(cookie_header: &str) -> Result<Self, LookupError> {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(cookie_header) {
            headers.insert(COOKIE, value);
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Runs one hash search and extracts the matching gallery identifiers.
    pub async fn search(&self, url: &str) -> Result<Vec<GalleryIdentifier>, LookupError> {
        let response = self.client.get(url).send().await?;
        if is_blocked(response.headers()) {
            return Err(LookupError::SiteBlocked);
        }
        let body = response.text().await?;
        Ok(parse_search_results(&body))
    }

    /// Fetches metadata for up to [`MAX_API_RESULTS`] galleries in one API
    /// call. The returned vector is parallel to `identifiers`; per-entry
    /// failures are reported in place without failing the batch.
    pub async fn fetch_metadata(
        &self,
        site: &str,
        identifiers: &[GalleryIdentifier],
    ) -> Result<Vec<Result<GalleryMetadata, String>>, LookupError> {
        let gidlist: Vec<Value> = identifiers
            .iter()
            .map(|id| json!([id.id, id.token]))
            .collect();
        let request = json!({
            "method": "gdata",
            "gidlist": gidlist,
            "namespace": 1,
        });

        let response = self
            .client
            .post(format!("{site}/api.php"))
            .json(&request)
            .send()
            .await?;
        if is_blocked(response.headers()) {
            return Err(LookupError::SiteBlocked);
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| LookupError::BadResponse(format!("invalid response JSON: {e}")))?;

        split_metadata_response(&body, identifiers.len(), site)
    }
}

/// Splits a `gdata` response body into per-gallery results, ordered like the
/// request.
pub fn split_metadata_response(
    body: &Value,
    expected: usize,
    site: &str,
) -> Result<Vec<Result<GalleryMetadata, String>>, LookupError> {
    let entries = body
        .get("gmetadata")
        .and_then(Value::as_array)
        .ok_or_else(|| LookupError::BadResponse("missing gmetadata array".to_string()))?;

    let mut results = Vec::with_capacity(expected);
    for index in 0..expected {
        let result = match entries.get(index) {
            None => Err(format!("response[{index}] out of bounds")),
            Some(entry) if !entry.is_object() => Err(format!("response[{index}] is not an object")),
            Some(entry) => match entry.get("error").and_then(Value::as_str) {
                Some(error) => Err(error.to_string()),
                None => GalleryMetadata::from_api_entry(entry, site),
            },
        };
        results.push(result);
    }
    Ok(results)
}
