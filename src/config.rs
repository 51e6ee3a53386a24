// docmirror/src/config.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::paths::{self, MANAGED_EXTENSION};

pub const DEFAULT_RAW_HOST: &str = "https://raw.githubusercontent.com";

/// Fully normalised run configuration. Built by [`crate::load_config::load_config`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Hand-authored document tree. Never written to.
    pub source_dir: PathBuf,
    /// Working markdown mirror: a copy of the source tree plus every fetched document.
    pub mirror_dir: PathBuf,
    /// Rendered site.
    pub output_dir: PathBuf,
    /// Locator of this project's own repository (e.g. `github.com/org/docs`).
    pub repository: Option<String>,
    /// Base of raw-content URLs for the hosted repository resolver.
    pub raw_host: String,
    pub site: SiteConfig,
    pub markdown: MarkdownFlags,
    /// Template shell per output kind (`html` for rendered documents).
    pub templates: BTreeMap<String, PathBuf>,
    pub publications: Vec<Publication>,
}

impl Config {
    pub fn new(source_dir: PathBuf, mirror_dir: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            source_dir,
            mirror_dir,
            output_dir,
            repository: None,
            raw_host: DEFAULT_RAW_HOST.to_string(),
            site: SiteConfig::default(),
            markdown: MarkdownFlags::default(),
            templates: BTreeMap::new(),
            publications: vec![Publication::plain()],
        }
    }

    /// Name of the source directory, as it appears inside the project's own repository.
    pub fn source_name(&self) -> String {
        self.source_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn trace_loaded(&self) {
        info!(
            source_dir = %self.source_dir.display(),
            mirror_dir = %self.mirror_dir.display(),
            output_dir = %self.output_dir.display(),
            publications = self.publications.len(),
            "Loaded Config"
        );
        for publication in &self.publications {
            publication.trace_loaded();
        }
        debug!(?self, "Config loaded (full debug)");
    }
}

/// Cosmetic values substituted into the page template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteConfig {
    pub title: Option<String>,
    pub name: Option<String>,
    /// Stylesheet path relative to the source tree.
    pub stylesheet: Option<String>,
    /// Favicon path relative to the source tree.
    pub favicon: Option<String>,
    #[serde(default)]
    pub sidebar: bool,
}

/// Markdown extensions handed to the converter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkdownFlags {
    pub tables: bool,
    pub tasklists: bool,
    pub strikethrough: bool,
    pub footnotes: bool,
}

impl Default for MarkdownFlags {
    fn default() -> Self {
        Self {
            tables: true,
            tasklists: true,
            strikethrough: true,
            footnotes: false,
        }
    }
}

/// Where links matched by a publication rule are mirrored to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublicationMap {
    /// Every matched link lands under one destination.
    Single(String),
    /// Destination chosen by the first path segment after the pattern.
    Segments(BTreeMap<String, String>),
}

impl PublicationMap {
    pub fn destination(&self, segment: &str) -> Option<&str> {
        match self {
            PublicationMap::Single(dest) => Some(dest.as_str()),
            PublicationMap::Segments(map) => map.get(segment).map(String::as_str),
        }
    }
}

/// One normalised publication rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    /// Literal text a link must contain; `None` handles plain relative links.
    pub pattern: Option<String>,
    /// File suffix eligible for transfer.
    pub extension: String,
    pub map: Option<PublicationMap>,
    /// Re-fetch even when a local copy already exists.
    pub update: bool,
}

impl Publication {
    /// The pattern-less rule for plain in-tree navigation.
    pub fn plain() -> Self {
        Self {
            pattern: None,
            extension: MANAGED_EXTENSION.to_string(),
            map: None,
            update: false,
        }
    }

    pub fn matches(&self, link: &str) -> bool {
        match &self.pattern {
            Some(pattern) => !pattern.is_empty() && link.contains(pattern.as_str()),
            None => false,
        }
    }

    /// Part of `link` after the last occurrence of the pattern, without a leading separator.
    pub fn remainder<'a>(&self, link: &'a str) -> &'a str {
        let after = match &self.pattern {
            Some(pattern) if !pattern.is_empty() => link
                .rfind(pattern.as_str())
                .map(|idx| &link[idx + pattern.len()..])
                .unwrap_or(link),
            _ => link,
        };
        after.trim_start_matches(paths::PATH_SEP)
    }

    pub fn trace_loaded(&self) {
        info!(
            pattern = self.pattern.as_deref().unwrap_or("<none>"),
            extension = %self.extension,
            update = self.update,
            mapped = self.map.is_some(),
            "Loaded publication rule"
        );
    }
}
