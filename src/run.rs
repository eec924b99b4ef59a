use std::collections::HashSet;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;

use crate::client::Client;
use crate::config::Settings;
use crate::export::{ExportFailure, ExportResult, Exporter, Format};
use crate::fetch::Fetcher;
use crate::manifest::ManifestBuilder;
use crate::page;

/// Final tally of a run. Skipped pages are warnings and do not fail the
/// process, unless every page failed and nothing was written at all.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub exported: usize,
    pub failed: usize,
}

impl RunOutcome {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn exit_code(&self) -> ExitCode {
        if self.failed > 0 && self.exported == 0 {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        }
    }
}

pub async fn run(settings: &Settings) -> anyhow::Result<RunOutcome> {
    if settings.pages.is_empty() && settings.pages_file.is_none() && settings.space.is_none() {
        anyhow::bail!("nothing to export: use --pages, --pages-file, or --space");
    }
    let (base_url, email, token) = settings.auth()?;

    // Every selected input resolves to an id before any network call, so a
    // malformed URL fails the whole run up front.
    let mut page_ids: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for input in selected_inputs(settings)? {
        let id = page::extract_page_id(&input)
            .with_context(|| format!("invalid page reference: {input}"))?;
        if seen.insert(id.clone()) {
            page_ids.push(id);
        }
    }

    let client = Arc::new(Client::new(
        base_url,
        email,
        token,
        settings.max_retries,
        settings.retry_delay,
        settings.request_timeout,
    )?);

    if !client.test_connection().await.context("verify connection")? {
        anyhow::bail!("authentication failed: check the email and API token for {base_url}");
    }

    if let Some(space_key) = settings.space.as_deref() {
        tracing::info!(space = space_key, "listing pages in space");
        let space_pages = client
            .get_space_pages(space_key)
            .await
            .with_context(|| format!("list pages in space {space_key}"))?;
        tracing::info!(space = space_key, count = space_pages.len(), "space pages found");
        for api_page in space_pages {
            if seen.insert(api_page.id.clone()) {
                page_ids.push(api_page.id);
            }
        }
    }

    if page_ids.is_empty() {
        tracing::warn!("no pages matched the selection");
    }

    // Bodies are only needed for local conversion; PDF rendering happens
    // remotely.
    let include_body = settings.formats.iter().any(|f| *f != Format::Pdf);

    let fetcher = Fetcher::new(Arc::clone(&client), settings.workers);
    let outcome = fetcher
        .fetch_pages(
            &page_ids,
            settings.include_children,
            include_body,
            settings.skip_errors,
        )
        .await
        .context("fetch pages")?;

    tracing::info!(
        pages = outcome.pages.len(),
        fetch_failures = outcome.failures.len(),
        "fetch complete"
    );

    std::fs::create_dir_all(&settings.output)
        .with_context(|| format!("create output dir: {}", settings.output.display()))?;

    let manifest_builder = ManifestBuilder::new(
        base_url,
        &settings.output,
        &settings
            .formats
            .iter()
            .map(|f| f.name().to_owned())
            .collect::<Vec<_>>(),
        settings.include_children,
        settings.flat,
    );

    let mut results: Vec<ExportResult> = Vec::new();
    let mut export_failures: Vec<ExportFailure> = Vec::new();
    for format in &settings.formats {
        let client = (*format == Format::Pdf).then(|| Arc::clone(&client));
        let exporter = Exporter::new(*format, &settings.output, settings.flat, client)?;

        let (mut format_results, mut format_failures) = if settings.skip_errors {
            exporter.export_all(&outcome.pages).await
        } else {
            // Strict mode stops at the first failed page, so nothing past
            // it was written.
            (exporter.export_all_strict(&outcome.pages).await?, Vec::new())
        };
        tracing::info!(
            format = %format,
            exported = format_results.len(),
            failed = format_failures.len(),
            "format complete"
        );
        results.append(&mut format_results);
        export_failures.append(&mut format_failures);
    }

    if settings.manifest {
        let (index_path, json_path) =
            manifest_builder.write(&outcome.pages, &results, &export_failures, &outcome.failures)?;
        tracing::info!(
            index = %index_path.display(),
            manifest = %json_path.display(),
            "manifest written"
        );
    }

    let failed = outcome.failures.len() + export_failures.len();
    tracing::info!(
        exported = results.len(),
        failed,
        output = %settings.output.display(),
        "export finished"
    );

    Ok(RunOutcome {
        exported: results.len(),
        failed,
    })
}

/// The requested page references: `--pages` values plus the pages file.
fn selected_inputs(settings: &Settings) -> anyhow::Result<Vec<String>> {
    let mut inputs = settings.pages.clone();
    if let Some(path) = settings.pages_file.as_deref() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read pages file: {path}"))?;
        inputs.extend(parse_page_lines(&contents));
    }
    Ok(inputs)
}

/// One reference per line; blank lines and `#` comments are ignored, and a
/// line may carry several comma-separated references.
fn parse_page_lines(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .flat_map(|line| line.split(','))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_lines_skip_comments_and_blanks() {
        let contents = "# my pages\n123\n\n  456 , 789\n#999\n";
        assert_eq!(parse_page_lines(contents), vec!["123", "456", "789"]);
    }

    #[test]
    fn page_lines_handle_trailing_commas() {
        assert_eq!(parse_page_lines("123,\n,456"), vec!["123", "456"]);
    }

    #[test]
    fn outcome_exit_codes() {
        // ExitCode has no PartialEq, compare the debug form.
        let code = |outcome: RunOutcome| format!("{:?}", outcome.exit_code());
        let success = format!("{:?}", ExitCode::SUCCESS);
        let failure = format!("{:?}", ExitCode::FAILURE);

        assert_eq!(code(RunOutcome::success()), success);
        // Skipped pages alongside successes stay a success.
        assert_eq!(
            code(RunOutcome {
                exported: 2,
                failed: 1,
            }),
            success
        );
        // A run where nothing at all was exported is a failure.
        assert_eq!(
            code(RunOutcome {
                exported: 0,
                failed: 2,
            }),
            failure
        );
    }
}
