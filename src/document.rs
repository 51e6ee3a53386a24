//! One file of the mirror tree.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use futures::future::join_all;
use tracing::{debug, info};

use crate::changelog::DocumentChanges;
use crate::error::MirrorError;
use crate::line::{has_links, Line};
use crate::link::LinkScope;
use crate::paths::{self, MANAGED_EXTENSION};
use crate::registry::RunContext;
use crate::render::SiteRenderer;

/// Machine-readable documents that share the tree but are never rendered.
pub const STRUCTURED_SUFFIX: &str = ".wasl.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Markdown: relinked and rendered.
    Managed,
    /// Structured data: passed over with a diagnostic.
    Structured,
    /// Anything else: copied verbatim.
    Asset,
}

impl DocumentKind {
    pub fn of(rel: &str) -> Self {
        if rel.ends_with(STRUCTURED_SUFFIX) {
            DocumentKind::Structured
        } else if paths::has_extension(rel, MANAGED_EXTENSION) {
            DocumentKind::Managed
        } else {
            DocumentKind::Asset
        }
    }
}

/// Which variant of each line to assemble.
#[derive(Debug, Clone, Copy)]
enum Variant {
    Source,
    Rendered,
}

/// What rendering did with a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered { output: PathBuf, written: bool },
    Copied(PathBuf),
    Skipped,
}

#[derive(Debug, Clone)]
pub struct Document {
    path: PathBuf,
    rel: String,
    bytes: Vec<u8>,
    text: Option<String>,
    origin: Option<String>,
    kind: DocumentKind,
    /// Decomposed lines, keyed by their exact text.
    lines: BTreeMap<String, Line>,
}

impl Document {
    /// `rel` is the location relative to the mirror root; `origin` is the browse URL
    /// the document was downloaded from, if any.
    pub fn new(path: PathBuf, rel: String, bytes: Vec<u8>, origin: Option<String>) -> Self {
        let kind = DocumentKind::of(&rel);
        let text = match kind {
            DocumentKind::Managed => Some(String::from_utf8_lossy(&bytes).into_owned()),
            _ => None,
        };
        let mut lines = BTreeMap::new();
        if let Some(text) = &text {
            for line in text.lines().filter(|l| has_links(l)) {
                lines
                    .entry(line.to_string())
                    .or_insert_with(|| Line::parse(line));
            }
        }
        Self {
            path,
            rel,
            bytes,
            text,
            origin,
            kind,
            lines,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rel(&self) -> &str {
        &self.rel
    }

    pub fn is_managed(&self) -> bool {
        self.kind == DocumentKind::Managed
    }

    pub fn lines(&self) -> impl Iterator<Item = &Line> {
        self.lines.values()
    }

    /// Resolves every link of the document.
    ///
    /// Each publication rule gets one transfer phase in which all links of the
    /// document are resolved concurrently. Rewrites are submitted only after every
    /// rule had its turn.
    pub async fn relink(&mut self, ctx: &RunContext) {
        if !self.is_managed() {
            return;
        }
        let Document {
            path,
            rel,
            origin,
            lines,
            ..
        } = self;
        let scope = LinkScope {
            path: path.as_path(),
            rel: rel.as_str(),
            origin: origin.as_deref(),
        };
        let scope = &scope;

        debug!(document = %scope.rel, lines = lines.len(), "Relinking document");
        for rule in &ctx.config().publications {
            let pending = lines
                .values_mut()
                .flat_map(|line| line.links_mut())
                .map(|link| link.transfer(rule, scope, ctx));
            join_all(pending).await;
        }

        for line in lines.values_mut() {
            line.settle(scope);
            line.submit(scope, ctx);
        }
    }

    fn assemble(&self, variant: Variant) -> String {
        let Some(text) = &self.text else {
            return String::new();
        };
        let mut out = String::with_capacity(text.len());
        for piece in text.split_inclusive('\n') {
            let (body, ending) = match piece.strip_suffix('\n') {
                Some(body) => match body.strip_suffix('\r') {
                    Some(body) => (body, "\r\n"),
                    None => (body, "\n"),
                },
                None => (piece, ""),
            };
            match self.lines.get(body) {
                Some(line) => out.push_str(match variant {
                    Variant::Source => line.source(),
                    Variant::Rendered => line.rendered(),
                }),
                None => out.push_str(body),
            }
            out.push_str(ending);
        }
        out
    }

    /// Markdown as it should be written back to the mirror.
    pub fn source_text(&self) -> String {
        self.assemble(Variant::Source)
    }

    /// Markdown as it should be rendered.
    pub fn rendered_text(&self) -> String {
        self.assemble(Variant::Rendered)
    }

    /// Writes the document's outputs: the rewritten mirror source when the change
    /// log asks for it, and the rendered page (or verbatim copy) under the output root.
    pub fn render(
        &self,
        changes: Option<&DocumentChanges>,
        site: &SiteRenderer<'_>,
    ) -> Result<RenderOutcome, MirrorError> {
        match self.kind {
            DocumentKind::Structured => {
                debug!(document = %self.rel, "Structured document skipped");
                Ok(RenderOutcome::Skipped)
            }
            DocumentKind::Asset => site
                .copy(&self.rel, &self.bytes)
                .map(RenderOutcome::Copied),
            DocumentKind::Managed => {
                let mut written = false;
                if changes.is_some_and(|c| c.write) {
                    let source = self.source_text();
                    if self.text.as_deref() != Some(source.as_str()) {
                        write_atomic(&self.path, source.as_bytes())?;
                        info!(document = %self.rel, "Rewrote mirrored source");
                        written = true;
                    }
                }
                let output = site.page(&self.rel, &self.rendered_text())?;
                Ok(RenderOutcome::Rendered { output, written })
            }
        }
    }
}

/// Replaces `path` with `contents` through a temporary sibling file.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), MirrorError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| MirrorError::io(dir, e))?;
    tmp.write_all(contents).map_err(|e| MirrorError::io(path, e))?;
    tmp.persist(path).map_err(|e| MirrorError::io(path, e.error))?;
    Ok(())
}
