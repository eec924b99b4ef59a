use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::cli::Cli;
use crate::export::Format;
use crate::fetch::DEFAULT_WORKERS;

/// Config file names searched in cwd, then the home directory.
const CONFIG_FILE_NAMES: &[&str] = &[
    ".confluence-export.toml",
    "confluence-export.toml",
    ".confluence-exportrc",
];

pub const DEFAULT_OUTPUT_DIR: &str = "./confluence-exports";
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// The immutable resolved configuration for one run, assembled once from
/// defaults < config file < environment < CLI flags (highest wins per key).
#[derive(Debug, Clone)]
pub struct Settings {
    pub base_url: Option<String>,
    pub email: Option<String>,
    pub token: Option<String>,

    pub pages: Vec<String>,
    pub pages_file: Option<String>,
    pub space: Option<String>,
    pub include_children: bool,

    pub formats: Vec<Format>,
    pub output: PathBuf,
    pub flat: bool,
    pub manifest: bool,

    pub workers: usize,
    pub skip_errors: bool,

    pub max_retries: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,

    save_config: Option<String>,
}

/// On-disk TOML shape, mirroring the sections written by `--save-config`.
#[derive(Debug, Default, Deserialize, Serialize)]
struct FileConfig {
    #[serde(default, skip_serializing_if = "AuthSection::is_empty")]
    auth: AuthSection,
    #[serde(default, skip_serializing_if = "PagesSection::is_empty")]
    pages: PagesSection,
    #[serde(default)]
    export: ExportSection,
    #[serde(default)]
    advanced: AdvancedSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct AuthSection {
    base_url: Option<String>,
    email: Option<String>,
    // The API token is deliberately absent: it is never written to disk
    // and only read from the environment or the CLI.
}

impl AuthSection {
    fn is_empty(&self) -> bool {
        self.base_url.is_none() && self.email.is_none()
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct PagesSection {
    ids: Option<Vec<String>>,
    file: Option<String>,
    space: Option<String>,
}

impl PagesSection {
    fn is_empty(&self) -> bool {
        self.ids.is_none() && self.file.is_none() && self.space.is_none()
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct ExportSection {
    output: Option<String>,
    formats: Option<Vec<String>>,
    flat: Option<bool>,
    include_children: Option<bool>,
    manifest: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct AdvancedSection {
    workers: Option<usize>,
    skip_errors: Option<bool>,
    max_retries: Option<u32>,
    retry_delay_ms: Option<u64>,
    timeout_secs: Option<u64>,
}

impl Settings {
    pub fn resolve(cli: Cli) -> anyhow::Result<Self> {
        let file = if cli.no_config {
            FileConfig::default()
        } else {
            load_file_config(cli.config.as_deref())?
        };

        let base_url = cli
            .base_url
            .or_else(|| env_var("CONFLUENCE_BASE_URL"))
            .or(file.auth.base_url);
        let email = cli
            .email
            .or_else(|| env_var("CONFLUENCE_EMAIL"))
            .or(file.auth.email);
        let token = cli.token.or_else(|| env_var("CONFLUENCE_API_TOKEN"));

        let pages = if cli.pages.is_empty() {
            file.pages.ids.unwrap_or_default()
        } else {
            cli.pages
        };
        let pages_file = cli.pages_file.or(file.pages.file);
        let space = cli.space.or(file.pages.space);

        let output = cli
            .output
            .or_else(|| env_var("CONFLUENCE_OUTPUT_DIR"))
            .or(file.export.output)
            .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_owned());

        let format_names = if cli.format.is_empty() {
            file.export
                .formats
                .unwrap_or_else(|| vec!["markdown".to_owned()])
        } else {
            cli.format
        };
        let mut formats = Vec::new();
        for name in &format_names {
            let format: Format = name.parse().context("parse --format")?;
            if !formats.contains(&format) {
                formats.push(format);
            }
        }

        let workers = cli
            .workers
            .or(file.advanced.workers)
            .unwrap_or(DEFAULT_WORKERS);
        if workers == 0 {
            anyhow::bail!("--workers must be at least 1");
        }

        let skip_errors = if cli.no_skip_errors {
            false
        } else {
            file.advanced.skip_errors.unwrap_or(true)
        };

        Ok(Self {
            base_url,
            email,
            token,
            pages,
            pages_file,
            space,
            include_children: cli.include_children
                || file.export.include_children.unwrap_or(false),
            formats,
            output: PathBuf::from(output),
            flat: cli.flat || file.export.flat.unwrap_or(false),
            manifest: cli.manifest || file.export.manifest.unwrap_or(false),
            workers,
            skip_errors,
            max_retries: file.advanced.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            retry_delay: Duration::from_millis(
                file.advanced.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS),
            ),
            request_timeout: Duration::from_secs(
                file.advanced.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            save_config: cli.save_config,
        })
    }

    pub fn save_config_path(&self) -> Option<&str> {
        self.save_config.as_deref()
    }

    /// The auth triple, or a configuration error naming every missing key.
    /// Checked before any network activity.
    pub fn auth(&self) -> anyhow::Result<(&str, &str, &str)> {
        let mut missing = Vec::new();
        if self.base_url.is_none() {
            missing.push("--base-url or CONFLUENCE_BASE_URL");
        }
        if self.email.is_none() {
            missing.push("--email or CONFLUENCE_EMAIL");
        }
        if self.token.is_none() {
            missing.push("--token or CONFLUENCE_API_TOKEN");
        }
        if !missing.is_empty() {
            anyhow::bail!(
                "missing required authentication parameters: {}",
                missing.join(", ")
            );
        }
        Ok((
            self.base_url.as_deref().unwrap_or_default(),
            self.email.as_deref().unwrap_or_default(),
            self.token.as_deref().unwrap_or_default(),
        ))
    }
}

fn env_var(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_owned()),
        _ => None,
    }
}

fn load_file_config(explicit: Option<&str>) -> anyhow::Result<FileConfig> {
    let path = match explicit {
        Some(path) => {
            let path = PathBuf::from(path);
            if !path.exists() {
                anyhow::bail!("config file not found: {}", path.display());
            }
            Some(path)
        }
        None => find_config_file(),
    };

    match path {
        Some(path) => {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("read config file: {}", path.display()))?;
            let config: FileConfig = toml::from_str(&contents)
                .with_context(|| format!("parse config file: {}", path.display()))?;
            tracing::debug!(path = %path.display(), "loaded config file");
            Ok(config)
        }
        None => Ok(FileConfig::default()),
    }
}

fn find_config_file() -> Option<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Some(home) = std::env::var_os("HOME") {
        dirs.push(PathBuf::from(home));
    }

    for dir in dirs {
        for name in CONFIG_FILE_NAMES {
            let candidate = dir.join(name);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Write the resolved non-secret settings as a TOML config file.
pub fn save_config(settings: &Settings, path: &str) -> anyhow::Result<()> {
    let file = FileConfig {
        auth: AuthSection {
            base_url: settings.base_url.clone(),
            email: settings.email.clone(),
        },
        pages: PagesSection {
            ids: if settings.pages.is_empty() {
                None
            } else {
                Some(settings.pages.clone())
            },
            file: settings.pages_file.clone(),
            space: settings.space.clone(),
        },
        export: ExportSection {
            output: Some(settings.output.display().to_string()),
            formats: Some(settings.formats.iter().map(|f| f.name().to_owned()).collect()),
            flat: settings.flat.then_some(true),
            include_children: settings.include_children.then_some(true),
            manifest: settings.manifest.then_some(true),
        },
        advanced: AdvancedSection {
            workers: (settings.workers != DEFAULT_WORKERS).then_some(settings.workers),
            skip_errors: (!settings.skip_errors).then_some(false),
            max_retries: (settings.max_retries != DEFAULT_MAX_RETRIES)
                .then_some(settings.max_retries),
            retry_delay_ms: (settings.retry_delay
                != Duration::from_millis(DEFAULT_RETRY_DELAY_MS))
            .then_some(settings.retry_delay.as_millis() as u64),
            timeout_secs: (settings.request_timeout
                != Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .then_some(settings.request_timeout.as_secs()),
        },
    };

    let body = toml::to_string_pretty(&file).context("serialize config")?;
    let contents = format!(
        "# Confluence Export configuration\n# The API token is never stored here; set CONFLUENCE_API_TOKEN instead.\n\n{body}"
    );
    std::fs::write(Path::new(path), contents)
        .with_context(|| format!("write config file: {path}"))?;

    tracing::info!(path, "configuration saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["confluence-export"];
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    #[test]
    fn defaults_apply_without_flags() {
        let settings = Settings::resolve(cli(&["--no-config"])).unwrap();
        assert_eq!(settings.formats, vec![Format::Markdown]);
        assert_eq!(settings.output, PathBuf::from(DEFAULT_OUTPUT_DIR));
        assert_eq!(settings.workers, DEFAULT_WORKERS);
        assert!(settings.skip_errors);
        assert!(!settings.flat);
    }

    #[test]
    fn cli_formats_are_parsed_and_deduplicated() {
        let settings = Settings::resolve(cli(&[
            "--no-config",
            "--format",
            "md",
            "markdown",
            "html",
        ]))
        .unwrap();
        assert_eq!(settings.formats, vec![Format::Markdown, Format::Html]);
    }

    #[test]
    fn unknown_format_is_a_configuration_error() {
        assert!(Settings::resolve(cli(&["--no-config", "--format", "docx"])).is_err());
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert!(Settings::resolve(cli(&["--no-config", "--workers", "0"])).is_err());
    }

    #[test]
    fn no_skip_errors_flag_disables_skipping() {
        let settings = Settings::resolve(cli(&["--no-config", "--no-skip-errors"])).unwrap();
        assert!(!settings.skip_errors);
    }

    #[test]
    fn missing_auth_lists_every_key() {
        let mut settings = Settings::resolve(cli(&["--no-config"])).unwrap();
        settings.base_url = None;
        settings.email = None;
        settings.token = None;
        let err = settings.auth().unwrap_err().to_string();
        assert!(err.contains("CONFLUENCE_BASE_URL"));
        assert!(err.contains("CONFLUENCE_EMAIL"));
        assert!(err.contains("CONFLUENCE_API_TOKEN"));
    }

    #[test]
    fn file_config_round_trips_through_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut settings = Settings::resolve(cli(&[
            "--no-config",
            "--base-url",
            "https://site.example",
            "--pages",
            "123",
            "--flat",
        ]))
        .unwrap();
        settings.email = Some("user@example.com".to_owned());
        save_config(&settings, path.to_str().unwrap()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("base_url = \"https://site.example\""));
        assert!(contents.contains("flat = true"));
        assert!(!contents.to_lowercase().contains("token ="));

        let parsed: FileConfig = toml::from_str(&contents).unwrap();
        assert_eq!(parsed.auth.base_url.as_deref(), Some("https://site.example"));
        assert_eq!(parsed.pages.ids.as_deref(), Some(&["123".to_owned()][..]));
    }
}
