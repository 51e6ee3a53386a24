//! Coordinating module for the mirror-relink-render pipeline.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::changelog::ChangeLog;
use crate::config::Config;
use crate::contract::Fetcher;
use crate::diagnostics::Diagnostics;
use crate::error::MirrorError;
use crate::manifest::MANIFEST_DIR;
use crate::registry::DocumentRegistry;

/// Everything a generation run did, and everything it could not do.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateReport {
    /// Files in the mirror after relinking.
    pub documents: usize,
    /// Relinking rounds until the fixed point.
    pub rounds: usize,
    /// Remote documents fetched.
    pub fetches: usize,
    pub rendered: Vec<PathBuf>,
    pub copied: Vec<PathBuf>,
    /// Mirror sources rewritten with resolved links.
    pub written: Vec<PathBuf>,
    pub diagnostics: Diagnostics,
    pub changes: ChangeLog,
}

/// Copies the hand-authored source tree into the mirror.
///
/// Returns the copied locations relative to the mirror root: these are the
/// originals that remote content may never overwrite.
pub fn mirror_tree(source: &Path, mirror: &Path) -> Result<BTreeSet<String>, MirrorError> {
    fn visit_dir(
        dir: &Path,
        source: &Path,
        mirror: &Path,
        copied: &mut BTreeSet<String>,
    ) -> Result<(), MirrorError> {
        for entry_res in fs::read_dir(dir).map_err(|e| MirrorError::io(dir, e))? {
            let entry = entry_res.map_err(|e| MirrorError::io(dir, e))?;
            let path = entry.path();
            if path.is_dir() {
                let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                if file_name == ".git" || file_name == MANIFEST_DIR {
                    debug!(path = %path.display(), "Skipping directory");
                    continue;
                }
                visit_dir(&path, source, mirror, copied)?;
            } else if path.is_file() {
                let Ok(rel_path) = path.strip_prefix(source) else {
                    continue;
                };
                let segments: Vec<String> = rel_path
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                let target = mirror.join(rel_path);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| MirrorError::io(parent, e))?;
                }
                fs::copy(&path, &target).map_err(|e| MirrorError::io(&target, e))?;
                copied.insert(segments.join("/"));
            }
        }
        Ok(())
    }

    let mut copied = BTreeSet::new();
    fs::create_dir_all(mirror).map_err(|e| MirrorError::io(mirror, e))?;
    visit_dir(source, source, mirror, &mut copied)?;
    info!(files = copied.len(), mirror = %mirror.display(), "[GENERATE] Mirrored source tree");
    Ok(copied)
}

/// Entrypoint: mirror the source tree, resolve every link until nothing new is
/// fetched, then render the site.
pub async fn generate(config: &Config, fetcher: Arc<dyn Fetcher>) -> Result<GenerateReport, MirrorError> {
    info!(
        source = %config.source_dir.display(),
        mirror = %config.mirror_dir.display(),
        output = %config.output_dir.display(),
        "[GENERATE] Starting generation"
    );

    if !config.source_dir.is_dir() {
        error!(source = %config.source_dir.display(), "[GENERATE][ERROR] Source tree missing");
        return Err(MirrorError::MissingSource(config.source_dir.clone()));
    }

    let originals = mirror_tree(&config.source_dir, &config.mirror_dir)?;
    let mut registry = DocumentRegistry::new(Arc::new(config.clone()), fetcher, originals);
    let loaded = registry.load_tree()?;
    info!(documents = loaded.len(), "[GENERATE] Loaded mirror");

    let rounds = registry.relink().await?;
    let fetches = registry.context().fetches();
    let documents = registry.documents().count();

    let summary = registry.render().map_err(|e| {
        error!(error = %e, "[GENERATE][ERROR] Rendering failed");
        e
    })?;

    let (changes, diagnostics) = registry.finish();
    if !diagnostics.is_clean() {
        info!(
            broken = diagnostics.broken.len(),
            invalid = diagnostics.invalid.len(),
            unmatched = diagnostics.unmatched.len(),
            unsupported = diagnostics.unsupported.len(),
            ignored = diagnostics.ignored.len(),
            aborted = diagnostics.aborted.len(),
            failed = diagnostics.failed.len(),
            "[GENERATE] Unresolved links collected"
        );
    }
    info!(rounds, fetches, documents, "[GENERATE] Generation complete");

    Ok(GenerateReport {
        documents,
        rounds,
        fetches,
        rendered: summary.rendered,
        copied: summary.copied,
        written: summary.written,
        diagnostics,
        changes,
    })
}
