use crate::config::{
    Config, MarkdownFlags, Publication, PublicationMap, SiteConfig, DEFAULT_RAW_HOST,
};
use crate::paths::MANAGED_EXTENSION;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Deserialize)]
struct StaticConfig {
    #[serde(default = "default_source")]
    source: PathBuf,
    #[serde(default = "default_mirror")]
    mirror: PathBuf,
    #[serde(default = "default_output")]
    output: PathBuf,
    #[serde(default)]
    repository: Option<String>,
    #[serde(default)]
    raw_host: Option<String>,
    #[serde(default)]
    site: SiteConfig,
    #[serde(default)]
    markdown: MarkdownFlags,
    #[serde(default)]
    templates: BTreeMap<String, PathBuf>,
    #[serde(default)]
    publications: Option<PublicationsYaml>,
}

fn default_source() -> PathBuf {
    PathBuf::from("source")
}

fn default_mirror() -> PathBuf {
    PathBuf::from("compiled")
}

fn default_output() -> PathBuf {
    PathBuf::from("docs")
}

fn default_extension() -> String {
    MANAGED_EXTENSION.to_string()
}

/// Every shape `publications` has been written in.
#[derive(Deserialize)]
#[serde(untagged)]
enum PublicationsYaml {
    List(Vec<PublicationYaml>),
    /// `pattern: destination` pairs.
    Patterns(BTreeMap<String, String>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PublicationYaml {
    Rule {
        #[serde(default)]
        pattern: Option<String>,
        #[serde(default = "default_extension")]
        extension: String,
        #[serde(default)]
        map: Option<MapYaml>,
        #[serde(default)]
        update: bool,
    },
    /// A bare destination for plain relative links.
    Destination(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MapYaml {
    Single(String),
    Segments(BTreeMap<String, String>),
}

impl From<MapYaml> for PublicationMap {
    fn from(map: MapYaml) -> Self {
        match map {
            MapYaml::Single(dest) => PublicationMap::Single(dest),
            MapYaml::Segments(map) => PublicationMap::Segments(map),
        }
    }
}

/// Flattens the accepted `publications` shapes into one rule list.
///
/// A pattern-less rule is appended when none was configured so plain relative
/// links are always handled.
fn normalize_publications(raw: Option<PublicationsYaml>) -> Vec<Publication> {
    let mut publications: Vec<Publication> = match raw {
        None => Vec::new(),
        Some(PublicationsYaml::Patterns(map)) => map
            .into_iter()
            .map(|(pattern, dest)| Publication {
                pattern: Some(pattern),
                extension: default_extension(),
                map: Some(PublicationMap::Single(dest)),
                update: false,
            })
            .collect(),
        Some(PublicationsYaml::List(list)) => list
            .into_iter()
            .map(|entry| match entry {
                PublicationYaml::Rule {
                    pattern,
                    extension,
                    map,
                    update,
                } => Publication {
                    pattern: pattern.filter(|p| !p.is_empty()),
                    extension,
                    map: map.map(PublicationMap::from),
                    update,
                },
                PublicationYaml::Destination(dest) => Publication {
                    map: Some(PublicationMap::Single(dest)),
                    ..Publication::plain()
                },
            })
            .collect(),
    };

    if !publications.iter().any(|p| p.pattern.is_none()) {
        publications.push(Publication::plain());
    }
    publications
}

/// Loads the YAML config file and applies environment overrides
/// (`DOCMIRROR_RAW_HOST`, `DOCMIRROR_OUTPUT_DIR`).
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    let static_conf: StaticConfig = serde_yaml::from_str(&config_content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow::anyhow!("Failed to parse config YAML: {e}")
    })?;

    let raw_host = match std::env::var("DOCMIRROR_RAW_HOST") {
        Ok(host) if !host.is_empty() => {
            info!(raw_host = %host, "DOCMIRROR_RAW_HOST found in env");
            host
        }
        _ => static_conf
            .raw_host
            .unwrap_or_else(|| DEFAULT_RAW_HOST.to_string()),
    };

    let output_dir = match std::env::var("DOCMIRROR_OUTPUT_DIR") {
        Ok(dir) if !dir.is_empty() => {
            info!(output_dir = %dir, "DOCMIRROR_OUTPUT_DIR found in env");
            PathBuf::from(dir)
        }
        _ => static_conf.output,
    };

    let mut templates = BTreeMap::new();
    for (kind, template) in static_conf.templates {
        let kind = kind.trim_start_matches('.').to_string();
        templates.insert(kind, template);
    }

    let config = Config {
        source_dir: static_conf.source,
        mirror_dir: static_conf.mirror,
        output_dir,
        repository: static_conf
            .repository
            .map(|r| r.trim_end_matches('/').to_string())
            .filter(|r| !r.is_empty()),
        raw_host: raw_host.trim_end_matches('/').to_string(),
        site: static_conf.site,
        markdown: static_conf.markdown,
        templates,
        publications: normalize_publications(static_conf.publications),
    };

    if config.source_dir == config.mirror_dir {
        error!(dir = %config.source_dir.display(), "Source and mirror directories must differ");
        anyhow::bail!(
            "source and mirror directories must differ: {}",
            config.source_dir.display()
        );
    }

    config.trace_loaded();
    Ok(config)
}

/// Same as [`load_config`] but names the file in the error chain.
pub fn load_config_with_context<P: AsRef<Path>>(path: P) -> Result<Config> {
    let display = path.as_ref().display().to_string();
    load_config(path).with_context(|| format!("while loading {display}"))
}
