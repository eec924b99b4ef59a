use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context as _;

use crate::client::Client;
use crate::convert;
use crate::page::Page;
use crate::sanitize;

/// The closed set of output formats. Adding a format means adding a variant
/// here plus its conversion arm, not a new exporter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Markdown,
    Html,
    Text,
    Pdf,
}

impl Format {
    pub fn extension(self) -> &'static str {
        match self {
            Format::Markdown => "md",
            Format::Html => "html",
            Format::Text => "txt",
            Format::Pdf => "pdf",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Format::Markdown => "markdown",
            Format::Html => "html",
            Format::Text => "txt",
            Format::Pdf => "pdf",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(Format::Markdown),
            "html" => Ok(Format::Html),
            "txt" | "text" => Ok(Format::Text),
            "pdf" => Ok(Format::Pdf),
            other => anyhow::bail!(
                "unknown export format: {other} (expected markdown, html, txt, or pdf)"
            ),
        }
    }
}

/// One successfully written (page, format) pair.
#[derive(Debug, Clone)]
pub struct ExportResult {
    pub page_id: String,
    pub title: String,
    pub format: Format,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ExportFailure {
    pub page_id: String,
    pub title: String,
    pub format: Format,
    pub error: String,
}

/// Writes pages in one format under the output directory. Conversion is a
/// pure function of the page except for PDF, which delegates to the remote
/// renderer through the API client.
pub struct Exporter {
    format: Format,
    out_dir: PathBuf,
    flat: bool,
    client: Option<Arc<Client>>,
}

impl Exporter {
    pub fn new(
        format: Format,
        out_dir: &Path,
        flat: bool,
        client: Option<Arc<Client>>,
    ) -> anyhow::Result<Self> {
        if format == Format::Pdf && client.is_none() {
            anyhow::bail!("PDF export requires an API client");
        }
        Ok(Self {
            format,
            out_dir: out_dir.to_path_buf(),
            flat,
            client,
        })
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Deterministic destination for a page in this format.
    pub fn output_path(&self, page: &Page) -> PathBuf {
        sanitize::output_path(
            &self.out_dir,
            &page.title,
            &page.id,
            self.format.extension(),
            &page.hierarchy_path,
            self.flat,
        )
    }

    pub async fn convert(&self, page: &Page) -> anyhow::Result<Vec<u8>> {
        match self.format {
            Format::Markdown => {
                let body = convert::storage_to_markdown(&page.body_storage);
                Ok(format!("# {}\n\n{body}", page.title).into_bytes())
            }
            Format::Html => {
                Ok(convert::storage_to_html_document(&page.body_storage, &page.title).into_bytes())
            }
            Format::Text => {
                let body = convert::storage_to_text(&page.body_storage);
                let underline = "=".repeat(page.title.chars().count());
                Ok(format!("{}\n{underline}\n\n{body}", page.title).into_bytes())
            }
            Format::Pdf => {
                let client = self
                    .client
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("PDF export requires an API client"))?;
                let bytes = client
                    .export_pdf(&page.id)
                    .await
                    .with_context(|| format!("export page {} as PDF", page.id))?;
                Ok(bytes)
            }
        }
    }

    /// Convert and write one page. The write goes through a temp file in the
    /// destination directory and an atomic rename, so a failure never leaves
    /// a partial file behind.
    pub async fn export(&self, page: &Page) -> anyhow::Result<PathBuf> {
        let output_path = self.output_path(page);
        let content = self.convert(page).await?;

        let parent = output_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("output path has no parent: {}", output_path.display()))?;
        // create_dir_all is idempotent, so racing exporters are fine.
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir: {}", parent.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("create temp file in: {}", parent.display()))?;
        tmp.write_all(&content)
            .with_context(|| format!("write export content for page {}", page.id))?;
        tmp.persist(&output_path)
            .with_context(|| format!("persist export: {}", output_path.display()))?;

        Ok(output_path)
    }

    /// Export every page, continuing past per-page failures. Whether a
    /// failure aborts the run is the caller's policy, not this one's.
    pub async fn export_all(&self, pages: &[Page]) -> (Vec<ExportResult>, Vec<ExportFailure>) {
        let mut results = Vec::new();
        let mut failures = Vec::new();

        for page in pages {
            match self.export(page).await {
                Ok(path) => {
                    tracing::debug!(page_id = %page.id, format = %self.format, path = %path.display(), "exported page");
                    results.push(ExportResult {
                        page_id: page.id.clone(),
                        title: page.title.clone(),
                        format: self.format,
                        path,
                    });
                }
                Err(err) => {
                    tracing::warn!(page_id = %page.id, format = %self.format, error = format!("{err:#}"), "export failed");
                    failures.push(ExportFailure {
                        page_id: page.id.clone(),
                        title: page.title.clone(),
                        format: self.format,
                        error: format!("{err:#}"),
                    });
                }
            }
        }

        (results, failures)
    }

    /// Export pages one at a time, stopping at the first failure. Pages
    /// after the failing one are never attempted.
    pub async fn export_all_strict(&self, pages: &[Page]) -> anyhow::Result<Vec<ExportResult>> {
        let mut results = Vec::new();

        for page in pages {
            let path = self.export(page).await.with_context(|| {
                format!(
                    "export page {} ({}) as {}",
                    page.id, page.title, self.format
                )
            })?;
            tracing::debug!(page_id = %page.id, format = %self.format, path = %path.display(), "exported page");
            results.push(ExportResult {
                page_id: page.id.clone(),
                title: page.title.clone(),
                format: self.format,
                path,
            });
        }

        Ok(results)
    }
}
