use clap::Parser;

/// Export Confluence pages to Markdown, HTML, plain text, or PDF.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Confluence site URL (e.g. https://yoursite.atlassian.net).
    /// Falls back to CONFLUENCE_BASE_URL.
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Atlassian account email. Falls back to CONFLUENCE_EMAIL.
    #[arg(long, value_name = "EMAIL")]
    pub email: Option<String>,

    /// Atlassian API token. Falls back to CONFLUENCE_API_TOKEN.
    #[arg(long, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Page IDs or full Confluence URLs to export.
    #[arg(long, num_args = 1.., value_name = "PAGE")]
    pub pages: Vec<String>,

    /// File containing page IDs or URLs, one per line (# for comments).
    #[arg(long, value_name = "FILE")]
    pub pages_file: Option<String>,

    /// Export every page in a space (e.g. DOCS).
    #[arg(long, value_name = "SPACE_KEY")]
    pub space: Option<String>,

    /// Recursively export all child pages of the selected pages.
    #[arg(long)]
    pub include_children: bool,

    /// Export format(s): markdown/md, html, txt/text, pdf (default: markdown).
    #[arg(long, num_args = 1.., value_name = "FORMAT")]
    pub format: Vec<String>,

    /// Output directory (default: ./confluence-exports).
    #[arg(long, short = 'o', value_name = "DIR")]
    pub output: Option<String>,

    /// Put every file directly under the output directory instead of
    /// mirroring the page hierarchy.
    #[arg(long)]
    pub flat: bool,

    /// Write INDEX.md and manifest.json alongside the exported files.
    #[arg(long)]
    pub manifest: bool,

    /// Parallel fetch workers (default: 4).
    #[arg(long, short = 'w', value_name = "N")]
    pub workers: Option<usize>,

    /// Stop on the first failed page instead of skipping it.
    #[arg(long)]
    pub no_skip_errors: bool,

    /// Enable verbose output.
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Suppress all output except errors.
    #[arg(long, short = 'q')]
    pub quiet: bool,

    /// Path to a configuration file (auto-detected if omitted).
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<String>,

    /// Save the resolved settings to a config file and exit.
    #[arg(
        long,
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = ".confluence-export.toml"
    )]
    pub save_config: Option<String>,

    /// Ignore configuration files.
    #[arg(long)]
    pub no_config: bool,
}
