//! Classification and resolution of a single reference found in a line.
//!
//! A link starts `Unclassified`. The transfer phase ([`Link::transfer`]) decides
//! what it is, derives where its target lives in the mirror, fetches the target if
//! it is remote and missing, and finally prepares a [`Rewrite`]. Nothing becomes
//! visible until the owning line submits the rewrite to the change log.

use std::ops::Range;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Publication;
use crate::diagnostics::{Category, Note};
use crate::github::{self, Resolution, ResolveError};
use crate::paths::{self, MANAGED_EXTENSION, README};
use crate::registry::RunContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Unclassified,
    Valid,
    Invalid,
    Unsupported,
    Unmatched,
    Ignored,
    Aborted,
    Broken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Stays inside the tree; only the rendered form changes.
    Internal,
    /// Points at the fully-qualified remote source.
    External,
    /// Points at a mirrored copy of a remote document.
    Transferred,
}

/// Replacement text for a resolved link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub kind: LinkKind,
    /// Text written back to the markdown source.
    pub source: String,
    /// Text used for the rendered page.
    pub rendered: String,
    /// Whether the owning document's source should be rewritten on disk.
    pub update_original: bool,
}

/// Everything derived about a link while it is being resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkProperties {
    pub remote: bool,
    pub relative: bool,
    pub absolute: bool,
    /// File name the target is mirrored under.
    pub name: String,
    /// Mapped destination directory of the publication rule.
    pub mapping: Option<String>,
    /// Mirror location of the target before index renaming.
    pub link_path: Option<String>,
    /// Mirror location the target is saved at.
    pub save_path: Option<String>,
    pub raw: Option<String>,
    pub resolved: Option<String>,
    pub original: Option<String>,
    /// The target lives in this project's own repository.
    pub internal: bool,
}

/// Where the owning document sits, and what it was derived from.
#[derive(Debug, Clone, Copy)]
pub struct LinkScope<'a> {
    pub path: &'a Path,
    /// Document location relative to the mirror root.
    pub rel: &'a str,
    /// Browse URL (or path) the document was downloaded from.
    pub origin: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct Link {
    raw: String,
    value: String,
    span: Range<usize>,
    status: LinkStatus,
    properties: LinkProperties,
    rewrite: Option<Rewrite>,
    notes: Vec<Note>,
    attempted: bool,
    submitted: bool,
}

/// Captures of the link pattern that are not links at all.
fn is_artifact(value: &str) -> bool {
    value.starts_with(['"', '\'', '`']) || value.starts_with("//")
}

impl Link {
    /// `raw` is the captured reference, `offset` its byte position in the line.
    pub fn new(raw: &str, offset: usize) -> Self {
        let value = paths::strip_anchor(raw).to_string();
        let status = if value.is_empty() {
            LinkStatus::Invalid
        } else {
            LinkStatus::Unclassified
        };
        Self {
            raw: raw.to_string(),
            span: offset..offset + value.len(),
            value,
            status,
            properties: LinkProperties::default(),
            rewrite: None,
            notes: Vec::new(),
            attempted: false,
            submitted: false,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Byte range of [`Link::value`] inside the owning line.
    pub fn span(&self) -> Range<usize> {
        self.span.clone()
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn rewrite(&self) -> Option<&Rewrite> {
        self.rewrite.as_ref()
    }

    fn fail(&mut self, status: LinkStatus, category: Category, key: &str, detail: &str) {
        debug!(link = %self.value, status = ?status, "Link not resolved");
        self.status = status;
        self.notes.push(Note::new(category, key, detail));
    }

    fn resolve_as(&mut self, kind: LinkKind, source: String, rendered: String, update_original: bool) {
        self.status = LinkStatus::Valid;
        self.rewrite = Some(Rewrite {
            kind,
            source,
            rendered,
            update_original,
        });
    }

    fn external(&mut self, url: String, scope: &LinkScope<'_>) {
        self.resolve_as(LinkKind::External, url.clone(), url, scope.origin.is_some());
    }

    fn internal(&mut self, scope: &LinkScope<'_>) {
        let rendered = if self.properties.absolute {
            let target = paths::normalize(self.value.trim_start_matches(paths::PATH_SEP));
            paths::rendered_form(&paths::path_to(&target, scope.rel))
        } else {
            paths::rendered_form(&self.value)
        };
        self.resolve_as(
            LinkKind::Internal,
            self.value.clone(),
            rendered,
            scope.origin.is_some(),
        );
    }

    /// Relinks this link to the mirrored file at `at` (relative to the mirror root).
    /// Targets in this project's own repository stay internal.
    pub fn register(&mut self, at: &str, scope: &LinkScope<'_>) {
        let update = paths::path_to(at, scope.rel);
        let rendered = paths::rendered_form(&update);
        let kind = if self.properties.internal {
            LinkKind::Internal
        } else {
            LinkKind::Transferred
        };
        self.resolve_as(
            kind,
            update,
            rendered,
            scope.origin.is_some(),
        );
    }

    /// Classifies the link against one publication rule and resolves it when the
    /// rule applies. Links another rule should handle are left `Unclassified`.
    pub async fn transfer(&mut self, rule: &Publication, scope: &LinkScope<'_>, ctx: &RunContext) {
        if self.status != LinkStatus::Unclassified || self.attempted {
            return;
        }
        let value = self.value.clone();
        if is_artifact(&value) {
            return;
        }

        let remote = paths::is_remote(&value);
        let pattern_match = rule.matches(&value);
        let after = rule.remainder(&value).to_string();
        let after_ext = paths::extension(&after);
        let correct_ext = paths::has_extension(&after, &rule.extension);

        self.properties = LinkProperties {
            remote,
            relative: !remote,
            absolute: !remote && value.starts_with(paths::PATH_SEP),
            name: if after_ext.is_empty() {
                README.to_string()
            } else {
                paths::file_name(&after).to_string()
            },
            ..LinkProperties::default()
        };

        if pattern_match {
            if !correct_ext && !after_ext.is_empty() {
                return;
            }
            self.attempted = true;
            if remote && ctx.is_redirect(&value) {
                self.external(value, scope);
                return;
            }
            if self.derive(rule, scope, &after, ctx) && self.locate(rule, scope, ctx).await {
                self.get(rule, scope, ctx).await;
            }
            return;
        }

        // Remote links outside every pattern are settled once all rules had a look.
        if remote {
            return;
        }

        if paths::has_foreign_scheme(&value) {
            self.attempted = true;
            self.fail(LinkStatus::Unsupported, Category::Unsupported, &value, scope.rel);
            return;
        }

        if !paths::extension(&value).is_empty() && !correct_ext {
            return;
        }
        self.attempted = true;

        if correct_ext {
            if !self.properties.absolute && scope.origin.is_some() {
                if self.derive(rule, scope, &after, ctx) && self.locate(rule, scope, ctx).await {
                    self.get(rule, scope, ctx).await;
                }
            } else {
                self.internal(scope);
            }
            return;
        }

        // Extensionless local reference.
        match scope.origin {
            Some(origin) => self.external(paths::merge_safe(origin, &value), scope),
            None => self.fail(LinkStatus::Invalid, Category::Invalid, &value, scope.rel),
        }
    }

    /// Final classification of a link no rule picked up.
    pub fn settle(&mut self, scope: &LinkScope<'_>) {
        if self.status != LinkStatus::Unclassified || self.attempted {
            return;
        }
        if paths::is_remote(&self.value) && paths::has_extension(&self.value, MANAGED_EXTENSION) {
            let value = self.value.clone();
            self.fail(LinkStatus::Unmatched, Category::Unmatched, &value, scope.rel);
        }
    }

    /// Mapping lookup and the escape check. Returns false when the link has
    /// already been settled (redirected externally or invalid).
    fn derive(
        &mut self,
        rule: &Publication,
        scope: &LinkScope<'_>,
        after: &str,
        ctx: &RunContext,
    ) -> bool {
        let base = if self.properties.remote {
            paths::segments(after).first().copied().unwrap_or_default()
        } else {
            paths::segments(scope.rel).get(1).copied().unwrap_or_default()
        };
        let mapping = rule
            .map
            .as_ref()
            .and_then(|m| m.destination(base))
            .map(paths::normalize);

        if self.properties.relative && !self.properties.absolute {
            // Inclusive boundary: a link reaching exactly the tree root is redirected too.
            if paths::parent_hops(&self.value) >= paths::depth(scope.rel) {
                let value = self.value.clone();
                match scope.origin {
                    Some(origin) => {
                        let url = paths::merge_safe(origin, &value);
                        ctx.note_redirect(&url);
                        self.external(url, scope);
                    }
                    None => self.fail(LinkStatus::Invalid, Category::Invalid, &value, scope.rel),
                }
                return false;
            }
        }

        self.properties.mapping = mapping;
        true
    }

    /// Works out the fetchable source and the save location. Returns false when the
    /// link needs no fetch step, either because it was settled or because it already
    /// points at a known document.
    async fn locate(&mut self, rule: &Publication, scope: &LinkScope<'_>, ctx: &RunContext) -> bool {
        let value = self.value.clone();
        let mut raw_link = value.clone();
        let mut exact = None;
        let mut mirror_root = None;

        match (scope.origin, self.properties.remote) {
            (Some(origin), false) => {
                let local = paths::join(paths::parent(scope.rel), &value);
                raw_link = paths::merge_safe(origin, &value);
                self.properties.remote = paths::is_remote(&raw_link);

                // Already mirrored next to this document: no need to ask the remote.
                let save = paths::indexed(&local);
                if !rule.update && ctx.has_document(&save) {
                    self.properties.raw = Some(raw_link.clone());
                    self.properties.resolved = Some(raw_link.clone());
                    self.properties.original = Some(raw_link);
                    self.properties.link_path = Some(local);
                    self.register(&save, scope);
                    self.properties.save_path = Some(save);
                    return false;
                }
                exact = Some(local);
            }
            _ => match &self.properties.mapping {
                Some(mapping) => mirror_root = Some(mapping.clone()),
                None => {
                    self.fail(LinkStatus::Unmatched, Category::Unmatched, &value, scope.rel);
                    return false;
                }
            },
        }

        let resolution = if github::is_hosted(&raw_link) {
            match ctx.resolver().resolve(&raw_link, mirror_root.as_deref()).await {
                Ok(resolution) => resolution,
                Err(ResolveError::Unparseable(_)) => {
                    self.fail(LinkStatus::Unmatched, Category::Unmatched, &value, scope.rel);
                    return false;
                }
                Err(ResolveError::NoBranch(_)) => {
                    ctx.mark_broken(&raw_link, &value);
                    self.status = LinkStatus::Broken;
                    return false;
                }
            }
        } else {
            let link_path = mirror_root.map(|root| {
                if paths::extension(&root).is_empty() {
                    paths::join(&root, &self.properties.name)
                } else {
                    root
                }
            });
            Resolution::plain(&raw_link, link_path)
        };

        let Some(mut link_path) = exact.or_else(|| resolution.link_path.clone()) else {
            self.fail(LinkStatus::Unmatched, Category::Unmatched, &value, scope.rel);
            return false;
        };

        let config = ctx.config();
        let internal = config
            .repository
            .as_deref()
            .is_some_and(|repo| resolution.resolved.contains(repo));
        if internal {
            if let Some(mapping) = &self.properties.mapping {
                let prefix = format!("{}/{}/", mapping, config.source_name());
                if let Some(stripped) = link_path.strip_prefix(&prefix) {
                    link_path = stripped.to_string();
                }
            }
        }

        if paths::extension(&link_path).is_empty() {
            link_path = paths::join(&link_path, README);
        }

        self.properties.save_path = Some(paths::indexed(&link_path));
        self.properties.link_path = Some(link_path);
        self.properties.internal = internal;
        self.properties.raw = Some(resolution.raw);
        self.properties.resolved = Some(resolution.resolved);
        self.properties.original = Some(resolution.original);
        true
    }

    /// Relinks to an existing copy, or fetches the target and relinks to it.
    async fn get(&mut self, rule: &Publication, scope: &LinkScope<'_>, ctx: &RunContext) {
        let Some(save) = self.properties.save_path.clone() else {
            return;
        };
        let raw = self
            .properties
            .raw
            .clone()
            .unwrap_or_else(|| self.value.clone());
        let original = self.properties.original.clone().unwrap_or_else(|| raw.clone());

        if ctx.is_broken(&raw) {
            self.status = LinkStatus::Broken;
            return;
        }

        if let Some(at) = ctx.downloaded(&raw) {
            self.properties.save_path = Some(at.clone());
            self.register(&at, scope);
            return;
        }

        let remote = self.properties.remote;
        if remote && !self.properties.internal {
            if let Some(holder) = ctx.claimed_by_other(&save, &raw) {
                warn!(
                    path = %save,
                    url = %raw,
                    held_by = %holder,
                    "Mirror location already taken by another download"
                );
                let value = self.value.clone();
                self.fail(LinkStatus::Ignored, Category::Ignored, &original, &value);
                return;
            }
        }
        let refresh = remote && rule.update && !self.properties.internal && !ctx.is_materialized(&save);
        let present = ctx.has_document(&save) || ctx.mirror_path(&save).exists();

        if !refresh && (present || self.properties.internal) {
            self.register(&save, scope);
            return;
        }

        if !remote {
            let value = self.value.clone();
            self.fail(LinkStatus::Ignored, Category::Ignored, &original, &value);
            return;
        }

        if ctx.is_original(&save) {
            warn!(
                path = %save,
                url = %raw,
                "Cannot overwrite original file with remote contents"
            );
            let value = self.value.clone();
            self.fail(LinkStatus::Aborted, Category::Aborted, &original, &value);
            return;
        }

        let origin = self
            .properties
            .resolved
            .clone()
            .unwrap_or_else(|| raw.clone());
        match ctx.download(&raw, &save, &origin, &self.value).await {
            Ok(at) => {
                self.properties.save_path = Some(at.clone());
                self.register(&at, scope);
            }
            Err(e) if e.is_not_found() => {
                self.status = LinkStatus::Broken;
            }
            Err(e) => {
                warn!(error = %e, url = %raw, "Fetch failed, link left as is");
                self.notes.push(Note::new(Category::Failed, raw, e.to_string()));
            }
        }
    }

    /// Hands out the rewrite once, together with any pending diagnostics.
    pub(crate) fn take_submission(&mut self) -> (Option<Rewrite>, Vec<Note>) {
        let notes = std::mem::take(&mut self.notes);
        if self.submitted || self.status != LinkStatus::Valid {
            return (None, notes);
        }
        self.submitted = true;
        (self.rewrite.clone(), notes)
    }
}
