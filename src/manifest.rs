use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::export::{ExportFailure, ExportResult};
use crate::fetch::FetchFailure;
use crate::page::Page;

pub const JSON_FILENAME: &str = "manifest.json";
pub const INDEX_FILENAME: &str = "INDEX.md";

/// Builds the human-readable `INDEX.md` and machine-readable
/// `manifest.json` for one export run. Pure over its inputs; an empty
/// export still produces a valid, empty-bodied manifest.
pub struct ManifestBuilder {
    base_url: String,
    output_dir: PathBuf,
    formats: Vec<String>,
    include_children: bool,
    flat: bool,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct Manifest {
    pub manifest_version: String,
    pub generated_at: String,
    pub export_info: ExportInfo,
    pub statistics: Statistics,
    pub pages: Vec<ManifestPage>,
    pub hierarchy: Vec<HierarchyNode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ManifestError>,
}

#[derive(Debug, Serialize)]
pub struct ExportInfo {
    pub base_url: String,
    pub output_directory: String,
    pub formats: Vec<String>,
    pub include_children: bool,
    pub flat_structure: bool,
    pub duration_seconds: f64,
}

#[derive(Debug, Serialize)]
pub struct Statistics {
    pub total_pages: usize,
    pub total_files: usize,
    pub failed_exports: usize,
    pub formats_used: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ManifestPage {
    pub id: String,
    pub title: String,
    pub space_key: Option<String>,
    pub hierarchy_path: Vec<String>,
    pub hierarchy_depth: usize,
    pub parent_id: Option<String>,
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Serialize)]
pub struct ManifestFile {
    pub format: String,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct HierarchyNode {
    pub id: String,
    pub title: String,
    pub depth: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<HierarchyNode>,
}

/// One failed page. Export failures carry the title and format; fetch
/// failures happen before either is known.
#[derive(Debug, Serialize)]
pub struct ManifestError {
    pub page_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub error: String,
}

impl ManifestBuilder {
    pub fn new(
        base_url: &str,
        output_dir: &Path,
        formats: &[String],
        include_children: bool,
        flat: bool,
    ) -> Self {
        Self {
            base_url: base_url.to_owned(),
            output_dir: output_dir.to_path_buf(),
            formats: formats.to_vec(),
            include_children,
            flat,
            started_at: Utc::now(),
        }
    }

    pub fn build(
        &self,
        pages: &[Page],
        results: &[ExportResult],
        failures: &[ExportFailure],
        fetch_failures: &[FetchFailure],
    ) -> Manifest {
        let generated_at = Utc::now();
        let duration = (generated_at - self.started_at).num_milliseconds() as f64 / 1000.0;

        let mut files_by_page: BTreeMap<&str, Vec<ManifestFile>> = BTreeMap::new();
        for result in results {
            files_by_page
                .entry(result.page_id.as_str())
                .or_default()
                .push(ManifestFile {
                    format: result.format.name().to_owned(),
                    path: self.display_path(&result.path),
                });
        }

        let manifest_pages = pages
            .iter()
            .map(|page| ManifestPage {
                id: page.id.clone(),
                title: page.title.clone(),
                space_key: page.space_key.clone(),
                hierarchy_path: page.hierarchy_path.clone(),
                hierarchy_depth: page.hierarchy_depth,
                parent_id: page.parent_id.clone(),
                files: files_by_page.remove(page.id.as_str()).unwrap_or_default(),
            })
            .collect();

        let mut formats_used: Vec<String> = results
            .iter()
            .map(|r| r.format.name().to_owned())
            .collect();
        formats_used.sort();
        formats_used.dedup();

        Manifest {
            manifest_version: "1.0".to_owned(),
            generated_at: generated_at.to_rfc3339(),
            export_info: ExportInfo {
                base_url: self.base_url.clone(),
                output_directory: self.output_dir.display().to_string(),
                formats: self.formats.clone(),
                include_children: self.include_children,
                flat_structure: self.flat,
                duration_seconds: (duration * 100.0).round() / 100.0,
            },
            statistics: Statistics {
                total_pages: pages.len(),
                total_files: results.len(),
                failed_exports: failures.len() + fetch_failures.len(),
                formats_used,
            },
            pages: manifest_pages,
            hierarchy: build_hierarchy(pages),
            errors: fetch_failures
                .iter()
                .map(|f| ManifestError {
                    page_id: f.page_id.clone(),
                    title: None,
                    format: None,
                    error: f.error.clone(),
                })
                .chain(failures.iter().map(|f| ManifestError {
                    page_id: f.page_id.clone(),
                    title: Some(f.title.clone()),
                    format: Some(f.format.name().to_owned()),
                    error: f.error.clone(),
                }))
                .collect(),
        }
    }

    /// Write both manifest files into the output directory root.
    pub fn write(
        &self,
        pages: &[Page],
        results: &[ExportResult],
        failures: &[ExportFailure],
        fetch_failures: &[FetchFailure],
    ) -> anyhow::Result<(PathBuf, PathBuf)> {
        let manifest = self.build(pages, results, failures, fetch_failures);

        let json_path = self.output_dir.join(JSON_FILENAME);
        let json = serde_json::to_string_pretty(&manifest).context("serialize manifest")?;
        std::fs::write(&json_path, json)
            .with_context(|| format!("write manifest: {}", json_path.display()))?;

        let index_path = self.output_dir.join(INDEX_FILENAME);
        std::fs::write(&index_path, render_index(&manifest))
            .with_context(|| format!("write index: {}", index_path.display()))?;

        Ok((index_path, json_path))
    }

    fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.output_dir)
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

/// Reconstruct the exported page tree. A page whose parent is not part of
/// the export counts as a root. Children are ordered by title so the tree
/// is stable regardless of fetch interleaving.
fn build_hierarchy(pages: &[Page]) -> Vec<HierarchyNode> {
    let exported_ids: std::collections::HashSet<&str> =
        pages.iter().map(|p| p.id.as_str()).collect();

    let mut children_of: BTreeMap<&str, Vec<&Page>> = BTreeMap::new();
    let mut roots: Vec<&Page> = Vec::new();
    for page in pages {
        match page.parent_id.as_deref() {
            Some(parent) if exported_ids.contains(parent) => {
                children_of.entry(parent).or_default().push(page);
            }
            _ => roots.push(page),
        }
    }

    fn build_node(page: &Page, children_of: &BTreeMap<&str, Vec<&Page>>) -> HierarchyNode {
        let mut children: Vec<&Page> = children_of
            .get(page.id.as_str())
            .map(|v| v.clone())
            .unwrap_or_default();
        children.sort_by(|a, b| a.title.cmp(&b.title));
        HierarchyNode {
            id: page.id.clone(),
            title: page.title.clone(),
            depth: page.hierarchy_depth,
            children: children
                .into_iter()
                .map(|child| build_node(child, children_of))
                .collect(),
        }
    }

    roots.sort_by(|a, b| a.title.cmp(&b.title));
    roots
        .into_iter()
        .map(|root| build_node(root, &children_of))
        .collect()
}

fn render_index(manifest: &Manifest) -> String {
    let mut lines: Vec<String> = vec![
        "# Export Index".to_owned(),
        String::new(),
        format!("Generated: {}", manifest.generated_at),
        String::new(),
        "## Export Information".to_owned(),
        String::new(),
        format!("- **Source**: {}", manifest.export_info.base_url),
        format!("- **Formats**: {}", manifest.export_info.formats.join(", ")),
        format!(
            "- **Include Children**: {}",
            yes_no(manifest.export_info.include_children)
        ),
        format!(
            "- **Structure**: {}",
            if manifest.export_info.flat_structure {
                "Flat"
            } else {
                "Hierarchical"
            }
        ),
        format!(
            "- **Duration**: {}s",
            manifest.export_info.duration_seconds
        ),
        String::new(),
        "## Statistics".to_owned(),
        String::new(),
        format!("- **Total Pages**: {}", manifest.statistics.total_pages),
        format!("- **Total Files**: {}", manifest.statistics.total_files),
        format!("- **Failed**: {}", manifest.statistics.failed_exports),
        String::new(),
        "## Page Hierarchy".to_owned(),
        String::new(),
    ];

    render_hierarchy(&manifest.hierarchy, 0, &mut lines);
    lines.push(String::new());
    lines.push("## Exported Files".to_owned());
    lines.push(String::new());

    for page in &manifest.pages {
        if page.files.is_empty() {
            continue;
        }
        lines.push(format!("### {}", page.title));
        lines.push(String::new());
        for file in &page.files {
            lines.push(format!("- [{}]({})", file.format, file.path));
        }
        lines.push(String::new());
    }

    if !manifest.errors.is_empty() {
        lines.push("## Errors".to_owned());
        lines.push(String::new());
        for error in &manifest.errors {
            let name = error.title.as_deref().unwrap_or(error.page_id.as_str());
            match error.format.as_deref() {
                Some(format) => {
                    lines.push(format!("- **{name}** ({format}): {}", error.error));
                }
                None => lines.push(format!("- **{name}**: {}", error.error)),
            }
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

fn render_hierarchy(nodes: &[HierarchyNode], indent: usize, lines: &mut Vec<String>) {
    for node in nodes {
        lines.push(format!(
            "{}- **{}** (ID: {})",
            "  ".repeat(indent),
            node.title,
            node.id
        ));
        render_hierarchy(&node.children, indent + 1, lines);
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "Yes" } else { "No" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::Format;

    fn page(id: &str, title: &str, parent: Option<&str>, path: &[&str]) -> Page {
        Page::new(
            id.to_owned(),
            title.to_owned(),
            Some("DOC".to_owned()),
            String::new(),
            path.iter().map(|s| (*s).to_owned()).collect(),
            parent.map(str::to_owned),
        )
    }

    fn builder() -> ManifestBuilder {
        ManifestBuilder::new(
            "https://site.example",
            Path::new("out"),
            &["markdown".to_owned()],
            true,
            false,
        )
    }

    #[test]
    fn empty_export_yields_valid_manifest() {
        let manifest = builder().build(&[], &[], &[], &[]);
        assert_eq!(manifest.statistics.total_pages, 0);
        assert_eq!(manifest.statistics.total_files, 0);
        assert!(manifest.pages.is_empty());
        assert!(manifest.hierarchy.is_empty());

        let index = render_index(&manifest);
        assert!(index.starts_with("# Export Index"));
        assert!(serde_json::to_string(&manifest).is_ok());
    }

    #[test]
    fn round_trips_id_title_and_format() {
        let pages = vec![page("100", "Intro", None, &[])];
        let results = vec![ExportResult {
            page_id: "100".to_owned(),
            title: "Intro".to_owned(),
            format: Format::Markdown,
            path: PathBuf::from("out/Intro-100.md"),
        }];
        let manifest = builder().build(&pages, &results, &[], &[]);

        let entry = &manifest.pages[0];
        assert_eq!(entry.id, "100");
        assert_eq!(entry.title, "Intro");
        assert_eq!(entry.files.len(), 1);
        assert_eq!(entry.files[0].format, "markdown");
        assert_eq!(entry.files[0].path, "Intro-100.md");
    }

    #[test]
    fn hierarchy_nests_children_under_exported_parents() {
        let pages = vec![
            page("1", "Root", None, &[]),
            page("2", "Beta", Some("1"), &["Root"]),
            page("3", "Alpha", Some("1"), &["Root"]),
            page("4", "Orphan", Some("99"), &[]),
        ];
        let manifest = builder().build(&pages, &[], &[], &[]);

        let titles: Vec<&str> = manifest.hierarchy.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["Orphan", "Root"]);

        let root = manifest
            .hierarchy
            .iter()
            .find(|n| n.title == "Root")
            .unwrap();
        let child_titles: Vec<&str> = root.children.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(child_titles, vec!["Alpha", "Beta"]);
    }

    #[test]
    fn failures_appear_in_errors_section() {
        let failures = vec![ExportFailure {
            page_id: "5".to_owned(),
            title: "Broken".to_owned(),
            format: Format::Pdf,
            error: "export unavailable".to_owned(),
        }];
        let fetch_failures = vec![FetchFailure {
            page_id: "6".to_owned(),
            error: "not found".to_owned(),
        }];
        let manifest = builder().build(&[], &[], &failures, &fetch_failures);
        assert_eq!(manifest.statistics.failed_exports, 2);

        let index = render_index(&manifest);
        assert!(index.contains("## Errors"));
        assert!(index.contains("**Broken** (pdf): export unavailable"));
        assert!(index.contains("**6**: not found"));
    }
}
