//! Storage-format body conversion. Confluence pages arrive as XHTML with
//! `ac:`/`ri:` namespaced macro elements; the markdown and text targets
//! rewrite the known macros first and strip whatever namespaced markup is
//! left, so downstream converters only ever see plain HTML.

use std::sync::LazyLock;

use ego_tree::NodeRef;
use regex::{Captures, Regex};
use scraper::node::Node;
use scraper::{ElementRef, Html};

macro_rules! macro_regex {
    ($name:ident, $pattern:literal) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new($pattern).unwrap_or_else(|err| panic!("invalid pattern: {err}"))
        });
    };
}

macro_regex!(
    CODE_MACRO,
    r#"(?s)<ac:structured-macro[^>]*ac:name="code"[^>]*>.*?</ac:structured-macro>"#
);
macro_regex!(CODE_LANGUAGE, r#"ac:name="language"[^>]*>([^<]+)<"#);
macro_regex!(
    CODE_BODY_CDATA,
    r"(?s)<ac:plain-text-body[^>]*><!\[CDATA\[(.*?)\]\]></ac:plain-text-body>"
);
macro_regex!(
    CODE_BODY_PLAIN,
    r"(?s)<ac:plain-text-body[^>]*>(.*?)</ac:plain-text-body>"
);
macro_regex!(
    PANEL_MACRO,
    r#"(?s)<ac:structured-macro[^>]*ac:name="(info|note|warning|tip)"[^>]*>.*?</ac:structured-macro>"#
);
macro_regex!(
    RICH_TEXT_BODY,
    r"(?s)<ac:rich-text-body[^>]*>(.*?)</ac:rich-text-body>"
);
macro_regex!(
    TOC_MACRO,
    r#"(?s)<ac:structured-macro[^>]*ac:name="toc"[^>]*>.*?</ac:structured-macro>"#
);
macro_regex!(
    EXPAND_MACRO,
    r#"(?s)<ac:structured-macro[^>]*ac:name="expand"[^>]*>.*?</ac:structured-macro>"#
);
macro_regex!(EXPAND_TITLE, r#"ac:name="title"[^>]*>([^<]+)<"#);
macro_regex!(
    ANY_MACRO,
    r"(?s)<ac:structured-macro[^>]*>.*?</ac:structured-macro>"
);
macro_regex!(IMAGE, r"(?s)<ac:image[^>]*>.*?</ac:image>");
macro_regex!(ATTACHMENT_FILENAME, r#"ri:filename="([^"]+)""#);
macro_regex!(URL_VALUE, r#"ri:value="([^"]+)""#);
macro_regex!(LINK, r"(?s)<ac:link[^>]*>.*?</ac:link>");
macro_regex!(LINK_PAGE_TITLE, r#"ri:content-title="([^"]+)""#);
macro_regex!(
    LINK_BODY,
    r"<ac:(?:plain-text-)?link-body[^>]*>([^<]+)</ac:"
);
macro_regex!(USER_MENTION, r#"<ri:user[^>]*ri:account-id="([^"]+)"[^>]*/?>"#);
macro_regex!(TASK, r"(?s)<ac:task>.*?</ac:task>");
macro_regex!(
    TASK_STATUS,
    r"<ac:task-status[^>]*>([^<]*)</ac:task-status>"
);
macro_regex!(TASK_BODY, r"(?s)<ac:task-body[^>]*>(.*?)</ac:task-body>");
macro_regex!(TASK_LIST_TAG, r"</?ac:task-list[^>]*>");
macro_regex!(ANY_NAMESPACED_TAG, r"</?(?:ac|ri):[^>]+>");
macro_regex!(ANY_TAG, r"(?s)<[^>]+>");
macro_regex!(EXCESS_BLANK_LINES, r"\n{3,}");

/// Convert a storage-format body to Markdown.
pub fn storage_to_markdown(body_storage: &str) -> String {
    if body_storage.is_empty() {
        return String::new();
    }

    let html = rewrite_macros(body_storage);
    let markdown = html2md::parse_html(&html);
    EXCESS_BLANK_LINES
        .replace_all(&markdown, "\n\n")
        .trim()
        .to_owned()
}

/// Rewrite the Confluence-specific elements into HTML or literal Markdown
/// before the generic HTML-to-Markdown pass. Unknown macros are reduced to
/// their text content rather than dropped.
fn rewrite_macros(storage: &str) -> String {
    let html = CODE_MACRO.replace_all(storage, |caps: &Captures<'_>| {
        let whole = &caps[0];
        let language = CODE_LANGUAGE
            .captures(whole)
            .map(|c| c[1].to_owned())
            .unwrap_or_default();
        let code = CODE_BODY_CDATA
            .captures(whole)
            .or_else(|| CODE_BODY_PLAIN.captures(whole))
            .map(|c| c[1].to_owned())
            .unwrap_or_default();
        format!("\n```{language}\n{code}\n```\n")
    });

    let html = PANEL_MACRO.replace_all(&html, |caps: &Captures<'_>| {
        let kind = caps[1].to_uppercase();
        let body = RICH_TEXT_BODY
            .captures(&caps[0])
            .map(|c| strip_tags(&c[1]))
            .unwrap_or_default();
        format!("\n> **{kind}:** {}\n\n", body.trim())
    });

    let html = TOC_MACRO.replace_all(&html, "\n[TOC]\n\n");

    let html = EXPAND_MACRO.replace_all(&html, |caps: &Captures<'_>| {
        let title = EXPAND_TITLE
            .captures(&caps[0])
            .map(|c| c[1].to_owned())
            .unwrap_or_else(|| "Details".to_owned());
        let body = RICH_TEXT_BODY
            .captures(&caps[0])
            .map(|c| strip_tags(&c[1]))
            .unwrap_or_default();
        format!(
            "\n<details>\n<summary>{title}</summary>\n\n{}\n\n</details>\n\n",
            body.trim()
        )
    });

    let html = ANY_MACRO.replace_all(&html, |caps: &Captures<'_>| strip_tags(&caps[0]));

    let html = IMAGE.replace_all(&html, |caps: &Captures<'_>| {
        if let Some(c) = ATTACHMENT_FILENAME.captures(&caps[0]) {
            let filename = &c[1];
            format!("![{filename}]({filename})")
        } else if let Some(c) = URL_VALUE.captures(&caps[0]) {
            format!("![]({})", &c[1])
        } else {
            String::new()
        }
    });

    let html = LINK.replace_all(&html, |caps: &Captures<'_>| {
        let body_text = LINK_BODY.captures(&caps[0]).map(|c| c[1].to_owned());
        if let Some(c) = LINK_PAGE_TITLE.captures(&caps[0]) {
            let title = &c[1];
            let display = body_text.unwrap_or_else(|| title.to_owned());
            format!("[{display}]({})", title.replace(' ', "-"))
        } else if let Some(c) = ATTACHMENT_FILENAME.captures(&caps[0]) {
            let filename = c[1].to_owned();
            let display = body_text.unwrap_or_else(|| filename.clone());
            format!("[{display}]({filename})")
        } else {
            String::new()
        }
    });

    let html = USER_MENTION.replace_all(&html, "@$1");

    let html = TASK.replace_all(&html, |caps: &Captures<'_>| {
        let done = TASK_STATUS
            .captures(&caps[0])
            .is_some_and(|c| c[1].trim().eq_ignore_ascii_case("complete"));
        let checkbox = if done { "[x]" } else { "[ ]" };
        let body = TASK_BODY
            .captures(&caps[0])
            .map(|c| strip_tags(&c[1]))
            .unwrap_or_default();
        format!("- {checkbox} {}\n", body.trim())
    });

    let html = TASK_LIST_TAG.replace_all(&html, "");
    ANY_NAMESPACED_TAG.replace_all(&html, "").into_owned()
}

fn strip_tags(html: &str) -> String {
    ANY_TAG.replace_all(html, "").into_owned()
}

/// Wrap a storage-format body in a standalone HTML document.
pub fn storage_to_html_document(body_storage: &str, title: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    {STYLES}
</head>
<body>
    <article>
        <h1>{title}</h1>
        {body_storage}
    </article>
</body>
</html>
"#
    )
}

const STYLES: &str = r#"<style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Oxygen, Ubuntu, sans-serif;
            line-height: 1.6;
            max-width: 900px;
            margin: 0 auto;
            padding: 2rem;
            color: #333;
        }
        h1, h2, h3, h4, h5, h6 {
            margin-top: 1.5em;
            margin-bottom: 0.5em;
            color: #1a1a1a;
        }
        h1 { font-size: 2em; border-bottom: 2px solid #eee; padding-bottom: 0.3em; }
        h2 { font-size: 1.5em; border-bottom: 1px solid #eee; padding-bottom: 0.3em; }
        code {
            background-color: #f4f4f4;
            padding: 0.2em 0.4em;
            border-radius: 3px;
            font-family: 'SF Mono', Monaco, 'Courier New', monospace;
            font-size: 0.9em;
        }
        pre {
            background-color: #f4f4f4;
            padding: 1em;
            border-radius: 5px;
            overflow-x: auto;
        }
        pre code { padding: 0; background: none; }
        table { border-collapse: collapse; width: 100%; margin: 1em 0; }
        th, td { border: 1px solid #ddd; padding: 0.75em; text-align: left; }
        th { background-color: #f4f4f4; }
        tr:nth-child(even) { background-color: #fafafa; }
        blockquote {
            border-left: 4px solid #ddd;
            margin: 1em 0;
            padding: 0.5em 1em;
            color: #666;
            background-color: #f9f9f9;
        }
        img { max-width: 100%; height: auto; }
        a { color: #0066cc; text-decoration: none; }
        a:hover { text-decoration: underline; }
    </style>"#;

/// Convert a storage-format body to structured plain text: block elements
/// get line breaks, list items get bullets, table cells get tab separators.
pub fn storage_to_text(body_storage: &str) -> String {
    if body_storage.is_empty() {
        return String::new();
    }

    let html = rewrite_macros(body_storage);
    let fragment = Html::parse_fragment(&html);

    let mut out = String::new();
    for child in fragment.root_element().children() {
        visit_text_node(child, &mut out);
    }

    normalize_text(&out)
}

fn visit_text_node(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Text(text) => out.push_str(text),
        Node::Element(_) => {
            let Some(element) = ElementRef::wrap(node) else {
                return;
            };
            let name = element.value().name();
            match name {
                "script" | "style" => {}
                "br" => out.push('\n'),
                "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                    out.push_str("\n\n");
                    visit_children(node, out);
                    out.push('\n');
                }
                "li" => {
                    out.push_str("\n\u{2022} ");
                    visit_children(node, out);
                }
                "td" | "th" => {
                    visit_children(node, out);
                    out.push('\t');
                }
                "p" | "div" | "tr" | "ul" | "ol" | "table" | "blockquote" | "pre" => {
                    visit_children(node, out);
                    out.push('\n');
                }
                _ => visit_children(node, out),
            }
        }
        _ => {}
    }
}

fn visit_children(node: NodeRef<'_, Node>, out: &mut String) {
    for child in node.children() {
        visit_text_node(child, out);
    }
}

fn normalize_text(text: &str) -> String {
    static SPACES: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[ \t]+").unwrap_or_else(|err| panic!("invalid pattern: {err}")));
    static BLANKS: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n\s*\n").unwrap_or_else(|err| panic!("invalid pattern: {err}")));

    let collapsed = SPACES.replace_all(text, " ");
    let collapsed = BLANKS.replace_all(&collapsed, "\n\n");
    let lines: Vec<&str> = collapsed.lines().map(str::trim).collect();
    lines.join("\n").trim().to_owned()
}
