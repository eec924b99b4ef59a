use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::client::{ApiError, Client};
use crate::page::{Page, PageSummary};

pub const DEFAULT_WORKERS: usize = 4;

/// One page fetch that failed but was skipped under skip-errors semantics.
#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub page_id: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Discovery order: requested roots in caller order, each root before
    /// its descendants, siblings in API order. Stable across runs.
    pub pages: Vec<Page>,
    pub failures: Vec<FetchFailure>,
}

/// A body fetch scheduled during hierarchy discovery.
#[derive(Debug, Clone)]
struct PlannedFetch {
    id: String,
    hierarchy_path: Vec<String>,
    parent_id: Option<String>,
}

/// Fetches a requested page set, optionally expanded to full descendant
/// subtrees, across a bounded worker pool.
pub struct Fetcher {
    client: Arc<Client>,
    workers: usize,
}

impl Fetcher {
    pub fn new(client: Arc<Client>, workers: usize) -> Self {
        Self {
            client,
            workers: workers.max(1),
        }
    }

    /// Main entry point. Discovery runs first (metadata only), then every
    /// page body is fetched concurrently under `workers` permits. Each id is
    /// fetched at most once per run, even when reachable from several
    /// requested roots.
    pub async fn fetch_pages(
        &self,
        page_ids: &[String],
        include_children: bool,
        include_body: bool,
        skip_errors: bool,
    ) -> anyhow::Result<FetchOutcome> {
        let mut failures = Vec::new();
        let mut plan: Vec<PlannedFetch> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for page_id in page_ids {
            if !seen.insert(page_id.clone()) {
                continue;
            }

            if include_children {
                // Folders only exist in the v1 API; if the probe fails the
                // root is treated as a plain page.
                let folder = self
                    .client
                    .get_content_info(page_id)
                    .await
                    .ok()
                    .filter(|info| info.is_folder());
                if let Some(info) = folder {
                    let root_title = info.title_or_untitled();
                    tracing::debug!(folder_id = %page_id, title = %root_title, "root is a folder, discovering contents");
                    let descendants = match self.client.get_folder_descendants(page_id).await {
                        Ok(descendants) => descendants,
                        Err(err) if skip_errors => {
                            tracing::warn!(folder_id = %page_id, error = %err, "failed to list folder contents");
                            failures.push(FetchFailure {
                                page_id: page_id.clone(),
                                error: err.to_string(),
                            });
                            continue;
                        }
                        Err(err) => return Err(err.into()),
                    };
                    tracing::debug!(folder_id = %page_id, count = descendants.len(), "found pages under folder");
                    // The folder itself has no body to export; only its
                    // pages are planned, nested under the folder's title.
                    plan_descendants(&mut plan, &mut seen, &root_title, descendants);
                    continue;
                }
            }

            plan.push(PlannedFetch {
                id: page_id.clone(),
                hierarchy_path: Vec::new(),
                parent_id: None,
            });

            if !include_children {
                continue;
            }

            let root_title = match self.client.get_page(page_id, false).await {
                Ok(page) => page.title_or_untitled(),
                Err(err) => {
                    // The root body fetch will report the failure (or abort)
                    // with the same error; descendants are unreachable.
                    tracing::warn!(page_id = %page_id, error = %err, "failed to resolve root page, skipping its subtree");
                    continue;
                }
            };

            tracing::debug!(page_id = %page_id, "discovering child pages");
            let descendants = match self.client.get_all_descendants(page_id).await {
                Ok(descendants) => descendants,
                Err(err) if skip_errors => {
                    tracing::warn!(page_id = %page_id, error = %err, "failed to list descendants");
                    failures.push(FetchFailure {
                        page_id: page_id.clone(),
                        error: err.to_string(),
                    });
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            tracing::debug!(page_id = %page_id, count = descendants.len(), "found child pages");

            plan_descendants(&mut plan, &mut seen, &root_title, descendants);
        }

        let (pages, mut body_failures) =
            self.fetch_planned(plan, include_body, skip_errors).await?;
        failures.append(&mut body_failures);

        Ok(FetchOutcome { pages, failures })
    }

    /// Fetch the planned pages' bodies across the worker pool and restore
    /// discovery order afterwards, so the result (and everything derived
    /// from it) does not depend on completion order.
    async fn fetch_planned(
        &self,
        plan: Vec<PlannedFetch>,
        include_body: bool,
        skip_errors: bool,
    ) -> anyhow::Result<(Vec<Page>, Vec<FetchFailure>)> {
        if plan.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        // Single page: no pool ceremony.
        if let [planned] = &plan[..] {
            return match fetch_one(&self.client, planned, include_body).await {
                Ok(page) => Ok((vec![page], Vec::new())),
                Err(err) if skip_errors => {
                    tracing::warn!(page_id = %planned.id, error = %err, "skipped page");
                    Ok((
                        Vec::new(),
                        vec![FetchFailure {
                            page_id: planned.id.clone(),
                            error: err.to_string(),
                        }],
                    ))
                }
                Err(err) => Err(err.into()),
            };
        }

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let cancelled = Arc::new(AtomicBool::new(false));
        // Ids currently fetched or done; guards against double fetches if a
        // plan ever carries a repeat.
        let in_flight: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

        let mut tasks: JoinSet<(usize, PlannedFetch, Option<Result<Page, ApiError>>)> =
            JoinSet::new();

        for (index, planned) in plan.into_iter().enumerate() {
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&semaphore);
            let cancelled = Arc::clone(&cancelled);
            let in_flight = Arc::clone(&in_flight);

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return (index, planned, None);
                };
                if cancelled.load(Ordering::SeqCst) {
                    return (index, planned, None);
                }
                {
                    let mut guard = in_flight.lock().unwrap_or_else(|e| e.into_inner());
                    if !guard.insert(planned.id.clone()) {
                        return (index, planned, None);
                    }
                }
                let result = fetch_one(&client, &planned, include_body).await;
                (index, planned, Some(result))
            });
        }

        let mut fetched: Vec<(usize, Page)> = Vec::new();
        let mut failures = Vec::new();
        let mut first_error: Option<ApiError> = None;

        while let Some(joined) = tasks.join_next().await {
            let (index, planned, result) = match joined {
                Ok(item) => item,
                Err(err) => {
                    anyhow::bail!("fetch worker panicked: {err}");
                }
            };
            let Some(result) = result else {
                continue;
            };

            match result {
                Ok(page) => {
                    tracing::debug!(page_id = %page.id, title = %page.title, "fetched page");
                    fetched.push((index, page));
                }
                Err(err) if skip_errors => {
                    tracing::warn!(page_id = %planned.id, error = %err, "skipped page");
                    failures.push(FetchFailure {
                        page_id: planned.id,
                        error: err.to_string(),
                    });
                }
                Err(err) => {
                    // Stop issuing new work but let in-flight fetches drain;
                    // their results are discarded.
                    cancelled.store(true, Ordering::SeqCst);
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err.into());
        }

        fetched.sort_by_key(|(index, _)| *index);
        Ok((
            fetched.into_iter().map(|(_, page)| page).collect(),
            failures,
        ))
    }
}

/// Queue discovered descendants, nesting their paths under the root's
/// title. Ids already planned for another root are left where they are.
fn plan_descendants(
    plan: &mut Vec<PlannedFetch>,
    seen: &mut HashSet<String>,
    root_title: &str,
    descendants: Vec<PageSummary>,
) {
    for summary in descendants {
        if !seen.insert(summary.id.clone()) {
            continue;
        }
        let mut hierarchy_path = Vec::with_capacity(summary.hierarchy_path.len() + 1);
        hierarchy_path.push(root_title.to_owned());
        hierarchy_path.extend(summary.hierarchy_path);
        plan.push(PlannedFetch {
            id: summary.id,
            hierarchy_path,
            parent_id: summary.parent_id,
        });
    }
}

async fn fetch_one(
    client: &Client,
    planned: &PlannedFetch,
    include_body: bool,
) -> Result<Page, ApiError> {
    let api_page = client.get_page(&planned.id, include_body).await?;
    let body = if include_body {
        api_page.storage_body()
    } else {
        String::new()
    };

    Ok(Page::new(
        api_page.id.clone(),
        api_page.title_or_untitled(),
        api_page.space_id.clone(),
        body,
        planned.hierarchy_path.clone(),
        planned.parent_id.clone().or(api_page.parent_id),
    ))
}
