use serde::Serialize;
use url::Url;

/// One fetched unit of content. Immutable after construction; created by
/// the fetcher, read by converters and the manifest.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub id: String,
    pub title: String,
    pub space_key: Option<String>,
    #[serde(skip)]
    pub body_storage: String,
    /// Ancestor titles, root first. Empty for top-level pages.
    pub hierarchy_path: Vec<String>,
    pub hierarchy_depth: usize,
    pub parent_id: Option<String>,
}

impl Page {
    /// `hierarchy_depth` is always derived from the path so the
    /// depth == path-length invariant holds by construction.
    pub fn new(
        id: String,
        title: String,
        space_key: Option<String>,
        body_storage: String,
        hierarchy_path: Vec<String>,
        parent_id: Option<String>,
    ) -> Self {
        let hierarchy_depth = hierarchy_path.len();
        Self {
            id,
            title,
            space_key,
            body_storage,
            hierarchy_path,
            hierarchy_depth,
            parent_id,
        }
    }
}

/// Child-listing element: enough to schedule a body fetch later.
#[derive(Debug, Clone)]
pub struct PageSummary {
    pub id: String,
    pub title: String,
    pub parent_id: Option<String>,
    /// Ancestor titles below the traversal root, root's children at depth 1.
    pub hierarchy_path: Vec<String>,
}

/// Extract a page id from user input: a bare numeric id passes through,
/// and the two known URL shapes are recognized:
///
/// - `https://site/wiki/spaces/DOCS/pages/123456/Page+Title`
/// - `https://site/wiki/pages/viewpage.action?pageId=123456`
pub fn extract_page_id(input: &str) -> anyhow::Result<String> {
    let input = input.trim();
    if !input.is_empty() && input.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(input.to_owned());
    }

    let url = Url::parse(input)
        .map_err(|_| anyhow::anyhow!("not a page id or Confluence URL: {input}"))?;

    for (key, value) in url.query_pairs() {
        if key == "pageId" && !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(value.into_owned());
        }
    }

    let mut segments = url.path_segments().into_iter().flatten();
    while let Some(segment) = segments.next() {
        if segment == "pages" {
            if let Some(id) = segments.next() {
                if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
                    return Ok(id.to_owned());
                }
            }
        }
    }

    anyhow::bail!("no page id found in URL: {input}")
}
