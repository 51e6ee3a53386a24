//! Run-scoped state: the document registry and the context links resolve against.
//!
//! A run executes on a single task. Links of one document are resolved
//! concurrently by interleaving futures, and all of them share one [`RunContext`].
//! State lives behind `RefCell`s that are only ever borrowed between awaits.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info};

use crate::changelog::ChangeLog;
use crate::config::Config;
use crate::contract::{FetchError, Fetcher};
use crate::diagnostics::{Category, Diagnostics, Note};
use crate::document::{Document, RenderOutcome};
use crate::error::MirrorError;
use crate::github::RemoteResolver;
use crate::link::Rewrite;
use crate::manifest::{Manifest, MANIFEST_DIR};
use crate::render::SiteRenderer;

/// A download that completed and was written to the mirror.
#[derive(Debug, Clone)]
struct Materialized {
    rel: String,
    bytes: Arc<Vec<u8>>,
}

type PendingDownload = Shared<BoxFuture<'static, Result<Materialized, FetchError>>>;

pub struct RunContext {
    config: Arc<Config>,
    fetcher: Arc<dyn Fetcher>,
    resolver: RemoteResolver,
    /// Files copied from the hand-authored source tree.
    originals: BTreeSet<String>,
    /// Every file currently known in the mirror.
    known: RefCell<BTreeSet<String>>,
    /// Downloads by raw URL; one entry per URL for the whole run.
    downloads: RefCell<HashMap<String, PendingDownload>>,
    /// Mirror location → raw URL of the download that owns it.
    claims: RefCell<HashMap<String, String>>,
    /// Raw URL → mirror location, for completed downloads.
    completed: RefCell<HashMap<String, String>>,
    /// Mirror locations written during this run.
    materialized: RefCell<BTreeSet<String>>,
    /// Documents materialized since the last round.
    fresh: RefCell<Vec<Document>>,
    broken: RefCell<BTreeSet<String>>,
    fetches: Cell<usize>,
    changes: RefCell<ChangeLog>,
    diagnostics: RefCell<Diagnostics>,
    manifest: RefCell<Manifest>,
}

impl RunContext {
    pub fn new(config: Arc<Config>, fetcher: Arc<dyn Fetcher>, originals: BTreeSet<String>) -> Self {
        let resolver = RemoteResolver::new(Arc::clone(&fetcher), config.raw_host.clone());
        let manifest = Manifest::load(&config.mirror_dir);
        Self {
            config,
            fetcher,
            resolver,
            originals,
            known: RefCell::new(BTreeSet::new()),
            downloads: RefCell::new(HashMap::new()),
            claims: RefCell::new(HashMap::new()),
            completed: RefCell::new(HashMap::new()),
            materialized: RefCell::new(BTreeSet::new()),
            fresh: RefCell::new(Vec::new()),
            broken: RefCell::new(BTreeSet::new()),
            fetches: Cell::new(0),
            changes: RefCell::new(ChangeLog::default()),
            diagnostics: RefCell::new(Diagnostics::default()),
            manifest: RefCell::new(manifest),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resolver(&self) -> &RemoteResolver {
        &self.resolver
    }

    pub fn mirror_path(&self, rel: &str) -> PathBuf {
        self.config.mirror_dir.join(rel)
    }

    pub fn has_document(&self, rel: &str) -> bool {
        self.known.borrow().contains(rel)
    }

    pub fn is_original(&self, rel: &str) -> bool {
        self.originals.contains(rel)
    }

    pub fn is_materialized(&self, rel: &str) -> bool {
        self.materialized.borrow().contains(rel)
    }

    pub fn is_broken(&self, raw: &str) -> bool {
        self.broken.borrow().contains(raw)
    }

    /// Mirror location of a completed download of `raw`.
    pub fn downloaded(&self, raw: &str) -> Option<String> {
        self.completed.borrow().get(raw).cloned()
    }

    /// URL of another download that already owns the mirror location `save`.
    pub fn claimed_by_other(&self, save: &str, raw: &str) -> Option<String> {
        self.claims
            .borrow()
            .get(save)
            .filter(|holder| holder.as_str() != raw)
            .cloned()
    }

    pub fn mark_broken(&self, raw: &str, value: &str) {
        info!(url = %raw, link = %value, "Remote reference is broken");
        self.broken.borrow_mut().insert(raw.to_string());
        self.diagnostics
            .borrow_mut()
            .record(Note::new(Category::Broken, raw, value));
    }

    /// Records that links to `url` are redirected to the remote instead of mirrored.
    pub fn note_redirect(&self, url: &str) {
        self.manifest.borrow_mut().redirects.insert(url.to_string());
    }

    pub fn is_redirect(&self, url: &str) -> bool {
        self.manifest.borrow().redirects.contains(url)
    }

    /// Origin a previously downloaded document was fetched from. Originals have none.
    fn recorded_origin(&self, rel: &str) -> Option<String> {
        if self.is_original(rel) {
            return None;
        }
        self.manifest.borrow().origins.get(rel).cloned()
    }

    pub fn fetches(&self) -> usize {
        self.fetches.get()
    }

    pub fn register_change(&self, document: &Path, line: &str, offset: usize, value: &str, rewrite: &Rewrite) {
        self.changes
            .borrow_mut()
            .register(document, line, offset, value, rewrite);
    }

    pub fn record(&self, notes: impl IntoIterator<Item = Note>) {
        let mut diagnostics = self.diagnostics.borrow_mut();
        for note in notes {
            diagnostics.record(note);
        }
    }

    fn note_known(&self, rel: &str) -> bool {
        self.known.borrow_mut().insert(rel.to_string())
    }

    /// Fetches `raw` into the mirror at `save`, or joins the download already in
    /// flight for the same URL. Returns the mirror location of the result.
    /// The first URL to download into a location claims it for the run.
    ///
    /// `origin` is the browse URL recorded on the new document; `value` is the link
    /// text reported when the remote does not exist.
    pub async fn download(
        &self,
        raw: &str,
        save: &str,
        origin: &str,
        value: &str,
    ) -> Result<String, FetchError> {
        let pending = self
            .downloads
            .borrow_mut()
            .entry(raw.to_string())
            .or_insert_with(|| {
                self.claims
                    .borrow_mut()
                    .entry(save.to_string())
                    .or_insert_with(|| raw.to_string());
                self.fetches.set(self.fetches.get() + 1);
                self.start_download(raw, save)
            })
            .clone();

        match pending.await {
            Ok(done) => {
                self.adopt(raw, &done, origin);
                Ok(done.rel)
            }
            Err(e) => {
                if e.is_not_found() {
                    self.mark_broken(raw, value);
                }
                Err(e)
            }
        }
    }

    fn start_download(&self, raw: &str, save: &str) -> PendingDownload {
        let fetcher = Arc::clone(&self.fetcher);
        let raw = raw.to_string();
        let rel = save.to_string();
        let path = self.mirror_path(save);
        async move {
            let body = fetcher.fetch(&raw).await?;
            let write_error = |e: std::io::Error| FetchError::Write {
                path: path.clone(),
                message: e.to_string(),
            };
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
            }
            tokio::fs::write(&path, &body).await.map_err(write_error)?;
            info!(url = %raw, path = %path.display(), "Materialized remote document");
            Ok::<_, FetchError>(Materialized {
                rel,
                bytes: Arc::new(body),
            })
        }
        .boxed()
        .shared()
    }

    /// Registers a finished download once, queueing it for the next relink round.
    fn adopt(&self, raw: &str, done: &Materialized, origin: &str) {
        self.completed
            .borrow_mut()
            .insert(raw.to_string(), done.rel.clone());
        if !self.materialized.borrow_mut().insert(done.rel.clone()) {
            return;
        }
        self.note_known(&done.rel);
        self.manifest
            .borrow_mut()
            .origins
            .insert(done.rel.clone(), origin.to_string());
        let document = Document::new(
            self.mirror_path(&done.rel),
            done.rel.clone(),
            done.bytes.as_ref().clone(),
            Some(origin.to_string()),
        );
        self.fresh.borrow_mut().push(document);
    }

    fn take_fresh(&self) -> Vec<Document> {
        std::mem::take(&mut *self.fresh.borrow_mut())
    }
}

/// Counts of what rendering produced.
#[derive(Debug, Default, Clone)]
pub struct RenderSummary {
    pub rendered: Vec<PathBuf>,
    pub copied: Vec<PathBuf>,
    pub written: Vec<PathBuf>,
}

/// Every document of the mirror tree, keyed by location relative to the mirror root.
pub struct DocumentRegistry {
    context: RunContext,
    documents: BTreeMap<String, Document>,
    rounds: usize,
}

impl DocumentRegistry {
    pub fn new(config: Arc<Config>, fetcher: Arc<dyn Fetcher>, originals: BTreeSet<String>) -> Self {
        Self {
            context: RunContext::new(config, fetcher, originals),
            documents: BTreeMap::new(),
            rounds: 0,
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    pub fn document(&self, rel: &str) -> Option<&Document> {
        self.documents.get(rel)
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Loads every file of the mirror tree not loaded yet. Returns the new locations.
    pub fn load_tree(&mut self) -> Result<Vec<String>, MirrorError> {
        let root = self.context.config.mirror_dir.clone();
        let mut files = Vec::new();
        if root.is_dir() {
            list_files(&root, "", &mut files)?;
        }
        let mut added = Vec::new();
        for rel in files {
            if self.documents.contains_key(&rel) {
                continue;
            }
            let path = root.join(&rel);
            let bytes = fs::read(&path).map_err(|e| MirrorError::io(&path, e))?;
            self.context.note_known(&rel);
            let origin = self.context.recorded_origin(&rel);
            self.documents
                .insert(rel.clone(), Document::new(path, rel.clone(), bytes, origin));
            added.push(rel);
        }
        debug!(added = added.len(), total = self.documents.len(), "Loaded mirror tree");
        Ok(added)
    }

    /// Relinks documents in rounds until no round materializes anything new.
    pub async fn relink(&mut self) -> Result<usize, MirrorError> {
        let mut round: Vec<String> = self
            .documents
            .values()
            .filter(|d| d.is_managed())
            .map(|d| d.rel().to_string())
            .collect();

        while !round.is_empty() {
            self.rounds += 1;
            info!(round = self.rounds, documents = round.len(), "Relinking round");
            for rel in &round {
                if let Some(document) = self.documents.get_mut(rel) {
                    document.relink(&self.context).await;
                }
            }

            let mut next = Vec::new();
            for document in self.context.take_fresh() {
                let rel = document.rel().to_string();
                if document.is_managed() {
                    next.push(rel.clone());
                }
                self.documents.insert(rel, document);
            }
            for rel in self.load_tree()? {
                if self.documents.get(&rel).is_some_and(|d| d.is_managed()) {
                    next.push(rel);
                }
            }
            next.sort();
            next.dedup();
            round = next;
        }

        self.context
            .manifest
            .borrow()
            .save(&self.context.config.mirror_dir)?;
        info!(
            rounds = self.rounds,
            documents = self.documents.len(),
            fetches = self.context.fetches(),
            "Relinking complete"
        );
        Ok(self.rounds)
    }

    /// Writes every output: the bundled stylesheet, rewritten mirror sources,
    /// rendered pages and copied assets.
    pub fn render(&self) -> Result<RenderSummary, MirrorError> {
        let managed: Vec<String> = self
            .documents
            .values()
            .filter(|d| d.is_managed())
            .map(|d| d.rel().to_string())
            .collect();
        let site = SiteRenderer::new(&self.context.config, managed)?;
        site.install_stylesheet()?;

        let mut summary = RenderSummary::default();
        let changes = self.context.changes.borrow();
        for document in self.documents.values() {
            match document.render(changes.get(document.path()), &site)? {
                RenderOutcome::Rendered { output, written } => {
                    if written {
                        summary.written.push(document.path().to_path_buf());
                    }
                    summary.rendered.push(output);
                }
                RenderOutcome::Copied(output) => summary.copied.push(output),
                RenderOutcome::Skipped => {
                    self.context
                        .diagnostics
                        .borrow_mut()
                        .skipped
                        .insert(document.rel().to_string());
                }
            }
        }
        info!(
            rendered = summary.rendered.len(),
            copied = summary.copied.len(),
            written = summary.written.len(),
            "Rendering complete"
        );
        Ok(summary)
    }

    /// Consumes the registry, handing out the change log and diagnostics of the run.
    pub fn finish(self) -> (ChangeLog, Diagnostics) {
        (
            self.context.changes.into_inner(),
            self.context.diagnostics.into_inner(),
        )
    }
}

/// Collects files below `dir` as `/`-separated paths prefixed with `prefix`.
/// Version-control metadata and run bookkeeping are skipped.
fn list_files(dir: &Path, prefix: &str, files: &mut Vec<String>) -> Result<(), MirrorError> {
    let entries = fs::read_dir(dir).map_err(|e| MirrorError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| MirrorError::io(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let rel = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        let path = entry.path();
        if path.is_dir() {
            if name == ".git" || name == MANIFEST_DIR {
                continue;
            }
            list_files(&path, &rel, files)?;
        } else {
            files.push(rel);
        }
    }
    Ok(())
}
