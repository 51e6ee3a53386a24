//! Markdown to HTML conversion and page assembly.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use htmlescape::encode_minimal;
use once_cell::sync::Lazy;
use pulldown_cmark::{html, Options, Parser};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::{Config, MarkdownFlags};
use crate::error::MirrorError;
use crate::paths::{self, INDEX, MANAGED_EXTENSION, README};

/// Location of the bundled stylesheet, relative to the output root.
pub const STYLESHEET_LOCATION: &str = ".docs/default.css";

const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<!-- title -->
<!-- favicon -->
<!-- defaultstylesheet -->
<!-- stylesheet -->
</head>
<body>
<!-- sidebar -->
<main>
<!-- name -->
<!-- content -->
</main>
</body>
</html>
"#;

const DEFAULT_STYLESHEET: &str = r#"body {
  margin: 0;
  display: flex;
  font-family: system-ui, sans-serif;
  line-height: 1.5;
}
main {
  flex: 1;
  padding: 2rem 3rem;
  max-width: 60rem;
}
#docs-sidebar {
  min-width: 14rem;
  padding: 1rem;
  border-right: 1px solid #ddd;
}
#docs-sidebar ul {
  list-style: none;
  padding-left: 0.75rem;
}
#docs-sidebar a {
  color: inherit;
  text-decoration: none;
}
#docs-sidebar .active li {
  font-weight: bold;
}
.docs-code {
  margin: 1rem 0;
  border: 1px solid #ddd;
  border-radius: 4px;
}
.docs-code > span {
  display: block;
  padding: 0.25rem 0.75rem;
  border-bottom: 1px solid #ddd;
  font-size: 0.85rem;
}
.docs-code pre {
  margin: 0;
  padding: 0.75rem;
  overflow-x: auto;
}
"#;

/// Fenced code block with a language tag, optionally preceded by a heading that names it.
static CODE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(?:^#+[ \t]+(\S+)[ \t]*\n)?^```([A-Za-z0-9_+\-]+)[ \t]*\n([\s\S]*?\n)?```")
        .expect("code block regex")
});

static MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<!--\s(\S.*?)\s-->").expect("template marker regex"));

const PLACEHOLDER: &str = "DOCMIRRORCODEPANEL";

/// Turns markdown into an HTML fragment.
pub trait Converter: Send + Sync {
    fn to_html(&self, markdown: &str) -> String;
}

pub struct MarkdownConverter {
    options: Options,
}

impl MarkdownConverter {
    pub fn new(flags: MarkdownFlags) -> Self {
        let mut options = Options::empty();
        if flags.tables {
            options.insert(Options::ENABLE_TABLES);
        }
        if flags.tasklists {
            options.insert(Options::ENABLE_TASKLISTS);
        }
        if flags.strikethrough {
            options.insert(Options::ENABLE_STRIKETHROUGH);
        }
        if flags.footnotes {
            options.insert(Options::ENABLE_FOOTNOTES);
        }
        Self { options }
    }
}

impl Converter for MarkdownConverter {
    fn to_html(&self, markdown: &str) -> String {
        let (prepared, panels) = extract_code_panels(markdown);
        let parser = Parser::new_ext(&prepared, self.options);
        let mut out = String::with_capacity(prepared.len() * 3 / 2);
        html::push_html(&mut out, parser);

        for (idx, panel) in panels.iter().enumerate() {
            let token = format!("{PLACEHOLDER}{idx}");
            let wrapped = format!("<p>{token}</p>");
            if out.contains(&wrapped) {
                out = out.replace(&wrapped, panel);
            } else {
                out = out.replace(&token, panel);
            }
        }
        out
    }
}

/// Swaps labelled fenced code blocks for placeholders and returns the panel HTML
/// that replaces each placeholder after conversion.
pub fn extract_code_panels(markdown: &str) -> (String, Vec<String>) {
    let mut panels = Vec::new();
    let prepared = CODE_BLOCK.replace_all(markdown, |caps: &regex::Captures<'_>| {
        let label = caps.get(1).map_or("Code", |m| m.as_str());
        let language = caps.get(2).map_or("", |m| m.as_str());
        let body = caps.get(3).map_or("", |m| m.as_str());
        let idx = panels.len();
        panels.push(format!(
            "<div class=\"docs-code\"><span>{}</span>\n<pre><code class=\"language-{}\">{}</code></pre></div>\n",
            encode_minimal(label),
            language,
            encode_minimal(body)
        ));
        format!("\n\n{PLACEHOLDER}{idx}\n\n")
    });
    (prepared.into_owned(), panels)
}

/// A page shell with `<!-- key -->` markers.
#[derive(Debug, Clone)]
pub struct Template {
    text: String,
}

impl Template {
    pub fn parse(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        MARKER
            .captures_iter(&self.text)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }

    /// Substitutes every marker with a value. Markers without one are left in place.
    pub fn fill(&self, values: &BTreeMap<&str, String>) -> String {
        MARKER
            .replace_all(&self.text, |caps: &regex::Captures<'_>| {
                let key = caps.get(1).map_or("", |m| m.as_str());
                match values.get(key) {
                    Some(value) => value.clone(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

/// Human label for a file stem: camel-case humps and hyphens become spaces and
/// each word is capitalised.
pub fn label(stem: &str) -> String {
    let chars: Vec<char> = stem.chars().collect();
    let mut spaced = String::with_capacity(stem.len() + 4);
    for (i, c) in chars.iter().enumerate() {
        let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
        if i > 0 && c.is_uppercase() && next_lower && !spaced.ends_with([' ', '-']) {
            spaced.push(' ');
        }
        spaced.push(*c);
    }
    spaced
        .split(['-', ' ', '_'])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn is_index(rel: &str) -> bool {
    matches!(paths::file_name(rel), INDEX | README)
}

fn page_label(rel: &str) -> String {
    let name = paths::file_name(rel);
    if is_index(rel) {
        if paths::parent(rel).is_empty() {
            "Home".to_string()
        } else {
            "Main Page".to_string()
        }
    } else {
        label(name.trim_end_matches(MANAGED_EXTENSION))
    }
}

#[derive(Default)]
struct SidebarNode {
    pages: Vec<String>,
    children: BTreeMap<String, SidebarNode>,
}

impl SidebarNode {
    fn insert(&mut self, dirs: &[&str], rel: &str) {
        match dirs.split_first() {
            None => self.pages.push(rel.to_string()),
            Some((dir, rest)) => self
                .children
                .entry(dir.to_string())
                .or_default()
                .insert(rest, rel),
        }
    }

    fn write(&self, depth: usize, current: &str, out: &mut String) {
        out.push_str(&format!("<ul data-sidebar-depth=\"{depth}\">"));
        let mut pages: Vec<&String> = self.pages.iter().collect();
        // Index pages lead their directory.
        pages.sort_by(|a, b| (!is_index(a), a.as_str()).cmp(&(!is_index(b), b.as_str())));
        for rel in pages {
            let href = paths::rendered_form(&paths::path_to(rel, current));
            let class = if rel.as_str() == current { " class=\"active\"" } else { "" };
            out.push_str(&format!(
                "<a href=\"{}\"{}><li>{}</li></a>",
                encode_minimal(&href),
                class,
                encode_minimal(&page_label(rel))
            ));
        }
        for (dir, child) in &self.children {
            out.push_str(&format!("<li>{}</li>", encode_minimal(&label(dir))));
            child.write(depth + 1, current, out);
        }
        out.push_str("</ul>");
    }
}

/// Navigation list of every rendered page. Anything under a `drafts` directory is left out.
pub fn sidebar(documents: &[String], current: &str) -> String {
    let mut root = SidebarNode::default();
    for rel in documents {
        let dirs = paths::segments(paths::parent(rel));
        if dirs.iter().any(|d| *d == "drafts") {
            continue;
        }
        root.insert(&dirs, rel);
    }
    let mut out = String::from("<nav id=\"docs-sidebar\">");
    root.write(0, current, &mut out);
    out.push_str("</nav>");
    out
}

/// Writes rendered pages and copied assets below the output root.
pub struct SiteRenderer<'a> {
    config: &'a Config,
    converter: Box<dyn Converter>,
    template: Template,
    documents: Vec<String>,
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), MirrorError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| MirrorError::io(parent, e))?;
    }
    fs::write(path, contents).map_err(|e| MirrorError::io(path, e))
}

impl<'a> SiteRenderer<'a> {
    /// `documents` lists every managed document (relative to the mirror root) for the sidebar.
    pub fn new(config: &'a Config, documents: Vec<String>) -> Result<Self, MirrorError> {
        let template = match config.templates.get("html") {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|source| MirrorError::Template {
                    path: path.clone(),
                    source,
                })?;
                info!(template = %path.display(), "Using custom page template");
                let template = Template::parse(&text);
                if !template.keys().iter().any(|key| key == "content") {
                    warn!(template = %path.display(), "Template has no content marker");
                }
                template
            }
            None => Template::parse(DEFAULT_TEMPLATE),
        };
        Ok(Self {
            config,
            converter: Box::new(MarkdownConverter::new(config.markdown)),
            template,
            documents,
        })
    }

    pub fn with_converter(mut self, converter: Box<dyn Converter>) -> Self {
        self.converter = converter;
        self
    }

    /// Output location of the page rendered from `rel`.
    pub fn output_path(&self, rel: &str) -> PathBuf {
        self.config.output_dir.join(paths::rendered_form(rel))
    }

    pub fn install_stylesheet(&self) -> Result<PathBuf, MirrorError> {
        let path = self.config.output_dir.join(STYLESHEET_LOCATION);
        write_file(&path, DEFAULT_STYLESHEET.as_bytes())?;
        Ok(path)
    }

    /// Fills the template for the document at `rel`.
    pub fn page_html(&self, rel: &str, markdown: &str) -> String {
        let site = &self.config.site;
        let mut values: BTreeMap<&str, String> = BTreeMap::new();
        values.insert("content", self.converter.to_html(markdown));
        values.insert(
            "defaultstylesheet",
            format!(
                "<link rel=\"stylesheet\" href=\"{}\">",
                paths::path_to(STYLESHEET_LOCATION, rel)
            ),
        );
        values.insert(
            "sidebar",
            if site.sidebar {
                sidebar(&self.documents, rel)
            } else {
                String::new()
            },
        );
        values.insert(
            "name",
            site.name
                .as_deref()
                .map(|name| format!("<header>{}</header>", encode_minimal(name)))
                .unwrap_or_default(),
        );
        values.insert(
            "title",
            site.title
                .as_deref()
                .map(|title| format!("<title>{}</title>", encode_minimal(title)))
                .unwrap_or_default(),
        );
        values.insert(
            "stylesheet",
            site.stylesheet
                .as_deref()
                .map(|css| {
                    let target = paths::normalize(css);
                    format!(
                        "<link rel=\"stylesheet\" href=\"{}\">",
                        paths::path_to(&target, rel)
                    )
                })
                .unwrap_or_default(),
        );
        values.insert(
            "favicon",
            site.favicon
                .as_deref()
                .map(|icon| {
                    let target = paths::normalize(icon);
                    format!("<link rel=\"icon\" href=\"{}\">", paths::path_to(&target, rel))
                })
                .unwrap_or_default(),
        );
        self.template.fill(&values)
    }

    pub fn page(&self, rel: &str, markdown: &str) -> Result<PathBuf, MirrorError> {
        let path = self.output_path(rel);
        write_file(&path, self.page_html(rel, markdown).as_bytes())?;
        debug!(document = %rel, output = %path.display(), "Rendered page");
        Ok(path)
    }

    pub fn copy(&self, rel: &str, bytes: &[u8]) -> Result<PathBuf, MirrorError> {
        let path = self.config.output_dir.join(rel);
        write_file(&path, bytes)?;
        debug!(file = %rel, output = %path.display(), "Copied asset");
        Ok(path)
    }
}
