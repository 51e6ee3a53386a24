//! Run-scoped collection of everything that could not be resolved.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

/// Category a link-level problem is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Broken,
    Invalid,
    Unmatched,
    Unsupported,
    Ignored,
    Aborted,
    Failed,
}

/// One problem reported by a link, merged into [`Diagnostics`] at submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub category: Category,
    pub key: String,
    pub detail: String,
}

impl Note {
    pub fn new(category: Category, key: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            category,
            key: key.into(),
            detail: detail.into(),
        }
    }
}

/// Categorised diagnostics, each keyed by the offending value.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Diagnostics {
    /// Raw URL → link value. Remote target does not exist.
    pub broken: BTreeMap<String, String>,
    /// Link value → document. Local reference that cannot be redirected.
    pub invalid: BTreeMap<String, String>,
    /// Link value → document. Remote reference no rule can place.
    pub unmatched: BTreeMap<String, String>,
    /// Link value → document. Reference kind no rule recognises.
    pub unsupported: BTreeMap<String, String>,
    /// Target → link value. Not eligible for mirroring.
    pub ignored: BTreeMap<String, String>,
    /// Target → link value. Would have overwritten a hand-authored original.
    pub aborted: BTreeMap<String, String>,
    /// Raw URL → error. Transient fetch failures.
    pub failed: BTreeMap<String, String>,
    /// Files skipped during rendering.
    pub skipped: BTreeSet<String>,
}

impl Diagnostics {
    pub fn record(&mut self, note: Note) {
        let target = match note.category {
            Category::Broken => &mut self.broken,
            Category::Invalid => &mut self.invalid,
            Category::Unmatched => &mut self.unmatched,
            Category::Unsupported => &mut self.unsupported,
            Category::Ignored => &mut self.ignored,
            Category::Aborted => &mut self.aborted,
            Category::Failed => &mut self.failed,
        };
        target.entry(note.key).or_insert(note.detail);
    }

    pub fn is_clean(&self) -> bool {
        self.broken.is_empty()
            && self.invalid.is_empty()
            && self.unmatched.is_empty()
            && self.unsupported.is_empty()
            && self.ignored.is_empty()
            && self.aborted.is_empty()
            && self.failed.is_empty()
    }
}
