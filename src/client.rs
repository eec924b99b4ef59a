use std::collections::HashSet;
use std::time::Duration;

use base64::Engine as _;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use serde::Deserialize;
use url::Url;

use crate::page::PageSummary;

const API_V2_PATH: &str = "/wiki/api/v2";
const API_V1_PATH: &str = "/wiki/rest/api";
const PAGE_LIMIT: u32 = 250;

/// Errors surfaced by the Confluence REST client. Transient conditions are
/// retried internally; these are the terminal outcomes callers branch on.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("credentials rejected (status {status})")]
    Unauthorized { status: u16 },

    #[error("not found: {url}")]
    NotFound { url: String },

    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("request failed after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("PDF export is not available for page {page_id}; this may require additional permissions or Confluence add-ons")]
    ExportUnavailable { page_id: String },

    #[error("malformed response from {url}: {message}")]
    Decode { url: String, message: String },
}

/// Wire shape of a v2 page. Only the fields this tool consumes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPage {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub space_id: Option<String>,
    pub parent_id: Option<String>,
    pub body: Option<ApiPageBody>,
}

impl ApiPage {
    pub fn title_or_untitled(&self) -> String {
        match self.title.as_deref() {
            Some(t) if !t.is_empty() => t.to_owned(),
            _ => "Untitled".to_owned(),
        }
    }

    pub fn storage_body(&self) -> String {
        self.body
            .as_ref()
            .and_then(|b| b.storage.as_ref())
            .and_then(|s| s.value.clone())
            .unwrap_or_default()
    }
}

/// Wire shape of a v1 content record. Folders only exist in the v1 API,
/// so this is how a root id is recognized as one.
#[derive(Debug, Deserialize)]
pub struct ContentInfo {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type", default)]
    pub content_type: Option<String>,
}

impl ContentInfo {
    pub fn is_folder(&self) -> bool {
        self.content_type.as_deref() == Some("folder")
    }

    pub fn title_or_untitled(&self) -> String {
        match self.title.as_deref() {
            Some(t) if !t.is_empty() => t.to_owned(),
            _ => "Untitled".to_owned(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchList {
    #[serde(default)]
    results: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "type", default)]
    content_type: Option<String>,
    #[serde(default)]
    ancestors: Vec<AncestorRef>,
}

#[derive(Debug, Deserialize)]
struct AncestorRef {
    id: String,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiPageBody {
    pub storage: Option<ApiBodyValue>,
}

#[derive(Debug, Deserialize)]
pub struct ApiBodyValue {
    pub value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageList {
    #[serde(default)]
    results: Vec<ApiPage>,
    #[serde(rename = "_links", default)]
    links: Option<PaginationLinks>,
}

#[derive(Debug, Deserialize)]
struct PaginationLinks {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Authenticated Confluence Cloud REST client with retry-with-backoff.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    max_retries: u32,
    initial_backoff: Duration,
}

impl Client {
    pub fn new(
        base_url: &str,
        email: &str,
        api_token: &str,
        max_retries: u32,
        initial_backoff: Duration,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let credentials =
            base64::engine::general_purpose::STANDARD.encode(format!("{email}:{api_token}"));

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Basic {credentials}"))
            .map_err(|_| anyhow::anyhow!("credentials contain invalid header characters"))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .map_err(|err| anyhow::anyhow!("build http client: {err}"))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            max_retries: max_retries.max(1),
            initial_backoff,
        })
    }

    fn api_url(&self, v1: bool, endpoint: &str) -> String {
        let api_path = if v1 { API_V1_PATH } else { API_V2_PATH };
        format!("{}{api_path}{endpoint}", self.base_url)
    }

    /// GET with the shared retry policy: 429 and 5xx (and connection-level
    /// failures, including timeouts) retry with exponential backoff,
    /// honoring a numeric `Retry-After` hint; other 4xx fail immediately.
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response, ApiError> {
        self.request(url, query, None).await
    }

    async fn request(
        &self,
        url: &str,
        query: &[(&str, String)],
        accept: Option<&'static str>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut last_message = String::new();

        for attempt in 0..self.max_retries {
            let backoff = backoff_delay(self.initial_backoff, attempt);

            let mut builder = self.http.get(url).query(query);
            if let Some(accept) = accept {
                builder = builder.header(ACCEPT, accept);
            }
            let response = match builder.send().await {
                Ok(response) => response,
                Err(err) => {
                    last_message = err.to_string();
                    tracing::debug!(url, attempt, error = %err, "request failed");
                    if attempt + 1 < self.max_retries {
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                let delay = retry_after(response.headers()).unwrap_or(backoff);
                last_message = format!("status {status}");
                tracing::debug!(url, attempt, %status, delay_ms = delay.as_millis() as u64, "transient failure, backing off");
                if attempt + 1 < self.max_retries {
                    tokio::time::sleep(delay).await;
                    continue;
                }
                break;
            }

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(ApiError::Unauthorized {
                    status: status.as_u16(),
                });
            }
            if status == StatusCode::NOT_FOUND {
                return Err(ApiError::NotFound {
                    url: url.to_owned(),
                });
            }
            if status.is_client_error() {
                let message = error_message(response).await;
                return Err(ApiError::Status {
                    status: status.as_u16(),
                    message,
                });
            }

            return Ok(response);
        }

        Err(ApiError::RetriesExhausted {
            attempts: self.max_retries,
            message: last_message,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let response = self.get(url, query).await?;
        response.json().await.map_err(|err| ApiError::Decode {
            url: url.to_owned(),
            message: err.to_string(),
        })
    }

    /// Fetch one page by id. With `include_body` the storage-format body is
    /// included in the response.
    pub async fn get_page(&self, page_id: &str, include_body: bool) -> Result<ApiPage, ApiError> {
        let url = self.api_url(false, &format!("/pages/{page_id}"));
        let mut query = Vec::new();
        if include_body {
            query.push(("body-format", "storage".to_owned()));
        }
        self.get_json(&url, &query).await
    }

    /// List the direct children of a page, following cursor pagination until
    /// exhausted. A childless page yields an empty list, not an error.
    pub async fn get_page_children(&self, page_id: &str) -> Result<Vec<ApiPage>, ApiError> {
        let url = self.api_url(false, &format!("/pages/{page_id}/children"));
        self.paginate(&url, &[]).await
    }

    /// Resolve a content id (page or folder) to its v1 record, mainly to
    /// learn its type and title.
    pub async fn get_content_info(&self, content_id: &str) -> Result<ContentInfo, ApiError> {
        let url = self.api_url(true, &format!("/content/{content_id}"));
        self.get_json(&url, &[("expand", "space".to_owned())]).await
    }

    /// List every page under a folder through a CQL ancestor search, since
    /// folders are invisible to the v2 children endpoint. Folder results are
    /// skipped (they carry no body); each page's hierarchy path is rebuilt
    /// from its ancestors, without the root folder itself.
    pub async fn get_folder_descendants(
        &self,
        folder_id: &str,
    ) -> Result<Vec<PageSummary>, ApiError> {
        let url = self.api_url(true, "/content/search");
        let mut descendants = Vec::new();
        let mut start = 0usize;

        loop {
            let query = [
                ("cql", format!("ancestor = {folder_id}")),
                ("limit", PAGE_LIMIT.to_string()),
                ("start", start.to_string()),
                ("expand", "ancestors".to_owned()),
            ];
            let list: SearchList = self.get_json(&url, &query).await?;
            let count = list.results.len();

            for item in list.results {
                if item.content_type.as_deref() == Some("folder") {
                    continue;
                }
                let hierarchy_path: Vec<String> = item
                    .ancestors
                    .iter()
                    .filter(|a| a.id != folder_id)
                    .map(|a| match a.title.as_deref() {
                        Some(t) if !t.is_empty() => t.to_owned(),
                        _ => "Untitled".to_owned(),
                    })
                    .collect();
                let parent_id = item
                    .ancestors
                    .last()
                    .map(|a| a.id.clone())
                    .or_else(|| Some(folder_id.to_owned()));
                let title = match item.title.as_deref() {
                    Some(t) if !t.is_empty() => t.to_owned(),
                    _ => "Untitled".to_owned(),
                };
                descendants.push(PageSummary {
                    id: item.id,
                    title,
                    parent_id,
                    hierarchy_path,
                });
            }

            if count < PAGE_LIMIT as usize {
                break;
            }
            start += count;
        }

        Ok(reorder_preorder(descendants))
    }

    /// List every page in a space.
    pub async fn get_space_pages(&self, space_key: &str) -> Result<Vec<ApiPage>, ApiError> {
        let url = self.api_url(false, "/pages");
        self.paginate(&url, &[("space-key", space_key.to_owned())])
            .await
    }

    async fn paginate(
        &self,
        url: &str,
        extra_query: &[(&str, String)],
    ) -> Result<Vec<ApiPage>, ApiError> {
        let mut results = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query: Vec<(&str, String)> = extra_query.to_vec();
            query.push(("limit", PAGE_LIMIT.to_string()));
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }

            let list: PageList = self.get_json(url, &query).await?;
            results.extend(list.results);

            cursor = list
                .links
                .and_then(|links| links.next)
                .and_then(|next| cursor_from_next_link(&next));
            if cursor.is_none() {
                break;
            }
        }

        Ok(results)
    }

    /// Walk the child tree under `root_id` breadth-agnostic (pre-order), and
    /// return the descendants in discovery order. The source models a tree,
    /// but the data is external, so a visited set bounds the traversal
    /// against accidental cycles.
    pub async fn get_all_descendants(&self, root_id: &str) -> Result<Vec<PageSummary>, ApiError> {
        let mut descendants = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(root_id.to_owned());

        // Stack of (page id, ancestor titles below the root). Children are
        // pushed in reverse so siblings come out in API order.
        let mut stack: Vec<(String, Vec<String>)> = vec![(root_id.to_owned(), Vec::new())];

        while let Some((page_id, path)) = stack.pop() {
            let children = self.get_page_children(&page_id).await?;

            let mut frames = Vec::new();
            for child in &children {
                if !visited.insert(child.id.clone()) {
                    tracing::warn!(page_id = %child.id, "page reachable twice in child tree, skipping repeat");
                    continue;
                }
                let title = child.title_or_untitled();
                descendants.push(PageSummary {
                    id: child.id.clone(),
                    title: title.clone(),
                    parent_id: Some(page_id.clone()),
                    hierarchy_path: path.clone(),
                });

                let mut child_path = path.clone();
                child_path.push(title);
                frames.push((child.id.clone(), child_path));
            }
            for frame in frames.into_iter().rev() {
                stack.push(frame);
            }
        }

        // Pre-order pushes parents before children but the stack interleaves
        // subtrees; restore discovery order by stable depth-then-insertion.
        Ok(reorder_preorder(descendants))
    }

    /// Export a page through Confluence's own PDF renderer. Tries the known
    /// export endpoints in order; if all are rejected the export is reported
    /// as unavailable rather than as a hard request failure.
    pub async fn export_pdf(&self, page_id: &str) -> Result<Vec<u8>, ApiError> {
        let flyingpdf = format!(
            "{}/wiki/spaces/flyingpdf/pdfpageexport.action?pageId={page_id}",
            self.base_url
        );
        if let Ok(response) = self.http.get(&flyingpdf).send().await {
            let is_pdf = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| ct.to_ascii_lowercase().contains("pdf"));
            if response.status() == StatusCode::OK && is_pdf {
                if let Ok(bytes) = response.bytes().await {
                    return Ok(bytes.to_vec());
                }
            }
        }

        // The v1 endpoint goes through the shared retry path, so transient
        // failures are retried rather than reported as unavailable.
        let v1_export = self.api_url(true, &format!("/content/{page_id}/export/pdf"));
        if let Ok(response) = self.request(&v1_export, &[], Some("application/pdf")).await {
            if let Ok(bytes) = response.bytes().await {
                return Ok(bytes.to_vec());
            }
        }

        let exportword = format!(
            "{}/wiki/exportword?pageId={page_id}&export=pdf",
            self.base_url
        );
        if let Ok(response) = self.http.get(&exportword).send().await {
            if response.status() == StatusCode::OK {
                if let Ok(bytes) = response.bytes().await {
                    return Ok(bytes.to_vec());
                }
            }
        }

        Err(ApiError::ExportUnavailable {
            page_id: page_id.to_owned(),
        })
    }

    /// Lightweight auth probe. An expected auth rejection is `false`, not an
    /// error; anything else (network down, server error) still fails.
    pub async fn test_connection(&self) -> Result<bool, ApiError> {
        let url = self.api_url(true, "/users/current");
        match self.get(&url, &[]).await {
            Ok(_) => Ok(true),
            Err(ApiError::Unauthorized { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Exponential backoff with a clamped exponent, so a huge configured retry
/// budget cannot overflow the shift or the duration multiply.
fn backoff_delay(initial: Duration, attempt: u32) -> Duration {
    initial.saturating_mul(1u32 << attempt.min(16))
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn cursor_from_next_link(next: &str) -> Option<String> {
    // The `next` link is site-relative; parse it against a dummy base just
    // to read the cursor query parameter.
    let parsed = Url::parse(next)
        .or_else(|_| Url::parse(&format!("https://x.invalid{next}")))
        .ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == "cursor")
        .map(|(_, value)| value.into_owned())
}

async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(ErrorBody {
            message: Some(message),
        }) => message,
        _ => format!("status {status}"),
    }
}

fn reorder_preorder(descendants: Vec<PageSummary>) -> Vec<PageSummary> {
    let mut indexed: Vec<(usize, PageSummary)> = descendants.into_iter().enumerate().collect();
    indexed.sort_by(|(ia, a), (ib, b)| {
        a.hierarchy_path
            .len()
            .cmp(&b.hierarchy_path.len())
            .then(ia.cmp(ib))
    });
    indexed.into_iter().map(|(_, summary)| summary).collect()
}
