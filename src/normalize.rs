/// Turns a raw, possibly protocol-relative URL into a fetchable absolute one.
pub fn normalize_url(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }
    let url = match trimmed.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => trimmed.to_string(),
    };
    if url.starts_with("http://") || url.starts_with("https://") {
        Some(url)
    } else {
        None
    }
}

/// Picks the URL to fetch. The preferred field wins when it normalizes,
/// otherwise the other one is tried.
pub fn select_download_url(
    primary: Option<&str>,
    fallback: Option<&str>,
    prefer_origin: bool,
) -> Option<String> {
    let (first, second) = if prefer_origin {
        (fallback, primary)
    } else {
        (primary, fallback)
    };
    normalize_url(first).or_else(|| normalize_url(second))
}
