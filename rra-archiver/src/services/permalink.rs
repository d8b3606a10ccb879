//! Permalink normalization, item ids, and view variants

use rra_common::db::Variant;
use url::Url;

const DEFAULT_HOST: &str = "www.reddit.com";
const PRIMARY_HOST: &str = "www.reddit.com";
const ALTERNATE_HOST: &str = "old.reddit.com";

/// Canonical form of a post permalink
///
/// `https` scheme, host kept, trailing slash removed, query and fragment
/// dropped. Returns `None` for input that is not an absolute URL.
pub fn canonicalize(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    let host = parsed.host_str().unwrap_or(DEFAULT_HOST);
    let path = parsed.path().trim_end_matches('/');
    Some(format!("https://{}{}", host, path))
}

/// Stable item id: the path segment after `/comments/`
pub fn extract_item_id(permalink: &str) -> Option<String> {
    let parsed = Url::parse(permalink).ok()?;
    let mut segments = parsed.path_segments()?;
    segments.find(|s| s.eq_ignore_ascii_case("comments"))?;
    segments
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// URL of `permalink` under the given view variant
pub fn variant_url(permalink: &str, variant: Variant) -> Result<String, url::ParseError> {
    let parsed = Url::parse(permalink)?;
    let host = match variant {
        Variant::Primary => PRIMARY_HOST,
        Variant::Alternate => ALTERNATE_HOST,
    };
    Ok(format!("https://{}{}", host, parsed.path()))
}
