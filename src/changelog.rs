use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::link::{LinkKind, Rewrite};

/// Every registered link rewrite of a run, per document, per link kind, per link value.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ChangeLog {
    pub documents: BTreeMap<PathBuf, DocumentChanges>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct DocumentChanges {
    /// Set when a change came from a document with a remote origin; only those
    /// documents get their rewritten source written back.
    pub write: bool,
    pub links: BTreeMap<LinkKind, BTreeMap<String, Change>>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Change {
    pub occurrences: usize,
    pub rendered: String,
    pub source: String,
    /// (line text, byte offset) pairs already counted.
    #[serde(skip)]
    sites: BTreeSet<(String, usize)>,
}

impl ChangeLog {
    /// Records a rewrite of `value` at `offset` in `line`. Registering the same
    /// site twice is a no-op.
    pub fn register(
        &mut self,
        document: &Path,
        line: &str,
        offset: usize,
        value: &str,
        rewrite: &Rewrite,
    ) {
        let changes = self.documents.entry(document.to_path_buf()).or_default();
        let change = changes
            .links
            .entry(rewrite.kind)
            .or_default()
            .entry(value.to_string())
            .or_default();
        change.rendered = rewrite.rendered.clone();
        change.source = rewrite.source.clone();
        if change.sites.insert((line.to_string(), offset)) {
            change.occurrences += 1;
        }
        if rewrite.update_original {
            changes.write = true;
        }
    }

    pub fn get(&self, document: &Path) -> Option<&DocumentChanges> {
        self.documents.get(document)
    }

    pub fn occurrences(&self, document: &Path, kind: LinkKind, value: &str) -> usize {
        self.documents
            .get(document)
            .and_then(|c| c.links.get(&kind))
            .and_then(|links| links.get(value))
            .map(|c| c.occurrences)
            .unwrap_or(0)
    }
}
