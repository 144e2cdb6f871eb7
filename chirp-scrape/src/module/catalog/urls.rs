/// Amateur radio listing of a county or city page.
pub fn ctid_url(base_url: &str, ctid: u32) -> String {
    format!("{}/db/browse/ctid/{}/ham", base_url.trim_end_matches('/'), ctid)
}

/// ZIP-level listing, used when a ZIP code could not be tied to a CTID.
pub fn zip_url(base_url: &str, zip: &str) -> String {
    format!(
        "{}/db/browse/zip/{}/ham",
        base_url.trim_end_matches('/'),
        urlencoding::encode(zip.trim())
    )
}

/// Site search, used to find the page of a geocoded county the index lacks.
pub fn search_url(base_url: &str, query: &str) -> String {
    format!(
        "{}/search/?q={}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(query.trim())
    )
}

/// Turns a link found on a catalog page into an absolute URL.
pub fn absolutize(base_url: &str, href: &str) -> String {
    let href = href.trim();
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if let Some(rest) = href.strip_prefix("//") {
        format!("https://{}", rest)
    } else if href.starts_with('/') {
        format!("{}{}", base_url.trim_end_matches('/'), href)
    } else {
        format!("{}/{}", base_url.trim_end_matches('/'), href)
    }
}
