use std::path::{Path, PathBuf};

const MAX_FILENAME_CHARS: usize = 200;

/// Turn an arbitrary page title into a filesystem-safe name. Total and
/// idempotent: every input, including the empty string, yields a non-empty
/// valid name, and re-sanitizing is a no-op.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;
    for c in name.chars() {
        let mapped = if is_forbidden(c) || c.is_whitespace() {
            '_'
        } else {
            c
        };
        if mapped == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(mapped);
            prev_underscore = false;
        }
    }

    let mut out = trim_edges(&out);
    if out.chars().count() > MAX_FILENAME_CHARS {
        out = out.chars().take(MAX_FILENAME_CHARS).collect();
        // Truncation may expose a trailing separator again.
        out = trim_edges(&out);
    }

    if out.is_empty() {
        out = "untitled".to_owned();
    }
    out
}

fn trim_edges(name: &str) -> String {
    name.trim_matches(&['_', ' ', '.'][..]).to_owned()
}

fn is_forbidden(c: char) -> bool {
    matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | '\0'..='\u{1F}')
}

/// Build the relative output path for one exported page. The `-{id}` suffix
/// keeps sibling pages with identical sanitized titles from colliding.
/// Nested mode mirrors the hierarchy with sanitized ancestor directories,
/// root first; flat mode drops the hierarchy entirely.
pub fn output_path(
    out_dir: &Path,
    title: &str,
    id: &str,
    extension: &str,
    hierarchy_path: &[String],
    flat: bool,
) -> PathBuf {
    let filename = format!("{}-{id}.{extension}", sanitize_filename(title));

    let mut path = out_dir.to_path_buf();
    if !flat {
        for ancestor in hierarchy_path {
            path = path.join(sanitize_filename(ancestor));
        }
    }
    path.join(filename)
}
