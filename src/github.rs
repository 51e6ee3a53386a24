//! Resolution of hosted-repository browse URLs into fetchable raw-content URLs.
//!
//! A browse URL looks like `https://github.com/<org>/<repo>/blob/<branch>/<path>`.
//! The branch may be missing, in which case conventional default branches are
//! probed in order until one answers.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::contract::Fetcher;
use crate::paths::{self, PATH_SEP, README};

pub const HOST: &str = "github.com";
pub const DEFAULT_BRANCHES: [&str; 2] = ["main", "master"];
const VIEW_MARKERS: [&str; 3] = ["blob", "tree", "raw"];

pub fn is_hosted(url: &str) -> bool {
    url.contains(HOST)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// The URL does not name at least an organisation and a repository.
    #[error("cannot parse hosted repository reference {0}")]
    Unparseable(String),
    /// No candidate branch answered the existence probe.
    #[error("no branch of {0} holds the referenced file")]
    NoBranch(String),
}

/// Outcome of resolving one browse URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Fetchable raw-content URL.
    pub raw: String,
    /// Browse URL with the confirmed branch substituted.
    pub resolved: String,
    /// The URL as it was handed in.
    pub original: String,
    /// Local mirror location, when a mirror root was supplied.
    pub link_path: Option<String>,
}

impl Resolution {
    /// Resolution of a remote that needs no translation.
    pub fn plain(url: &str, link_path: Option<String>) -> Self {
        Self {
            raw: url.to_string(),
            resolved: url.to_string(),
            original: url.to_string(),
            link_path,
        }
    }
}

struct BrowseUrl<'a> {
    prefix: &'a str,
    organization: &'a str,
    repository: &'a str,
    branch: Option<&'a str>,
    details: Vec<&'a str>,
}

fn parse(url: &str) -> Option<BrowseUrl<'_>> {
    let idx = url.find(HOST)?;
    let prefix = &url[..idx];
    let rest = url[idx + HOST.len()..].trim_start_matches(PATH_SEP);
    let rest = rest.split(['?', '#']).next().unwrap_or(rest);

    let mut parts = rest.split(PATH_SEP).filter(|s| !s.is_empty());
    let organization = parts.next()?;
    let repository = parts.next()?.trim_end_matches(".git");

    let (branch, details) = match parts.next() {
        None => (None, Vec::new()),
        Some(marker) if VIEW_MARKERS.contains(&marker) => (parts.next(), parts.collect()),
        Some(_) => return None,
    };

    Some(BrowseUrl {
        prefix,
        organization,
        repository,
        branch,
        details,
    })
}

/// Translates browse URLs, probing branches through the shared [`Fetcher`].
pub struct RemoteResolver {
    fetcher: Arc<dyn Fetcher>,
    raw_host: String,
    probes: RefCell<HashMap<String, bool>>,
}

impl RemoteResolver {
    pub fn new(fetcher: Arc<dyn Fetcher>, raw_host: impl Into<String>) -> Self {
        Self {
            fetcher,
            raw_host: raw_host.into(),
            probes: RefCell::new(HashMap::new()),
        }
    }

    async fn exists(&self, raw: &str) -> bool {
        if let Some(known) = self.probes.borrow().get(raw) {
            return *known;
        }
        let found = match self.fetcher.probe(raw).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, url = %raw, "Branch probe failed");
                false
            }
        };
        self.probes.borrow_mut().insert(raw.to_string(), found);
        found
    }

    /// Resolves `url` to a raw-content URL.
    ///
    /// `mirror_root` is the local directory the repository root is mirrored to; any
    /// file name on it is dropped before the repository path is appended.
    pub async fn resolve(
        &self,
        url: &str,
        mirror_root: Option<&str>,
    ) -> Result<Resolution, ResolveError> {
        let browse = parse(url).ok_or_else(|| ResolveError::Unparseable(url.to_string()))?;

        let mut details = browse.details.clone();
        let named = details
            .last()
            .map(|last| !paths::extension(last).is_empty())
            .unwrap_or(false);
        if !named {
            details.push(README);
        }

        let candidates: Vec<&str> = match browse.branch {
            Some(branch) => vec![branch],
            None => DEFAULT_BRANCHES.to_vec(),
        };

        let mut confirmed = None;
        for branch in candidates {
            let mut segments = vec![browse.organization, browse.repository, branch];
            segments.extend(details.iter().copied());
            let raw = format!("{}/{}", self.raw_host, segments.join("/"));
            debug!(url = %url, raw = %raw, "Probing candidate branch");
            if self.exists(&raw).await {
                confirmed = Some((branch, raw));
                break;
            }
        }

        let Some((branch, raw)) = confirmed else {
            info!(url = %url, "No branch resolved for hosted reference");
            return Err(ResolveError::NoBranch(url.to_string()));
        };

        let mut resolved = vec![browse.organization, browse.repository, "blob", branch];
        resolved.extend(details.iter().copied());
        let resolved = format!("{}{}/{}", browse.prefix, HOST, resolved.join("/"));

        let link_path = mirror_root.map(|root| {
            let dir = if paths::extension(root).is_empty() {
                root
            } else {
                paths::parent(root)
            };
            paths::join(dir, &details.join("/"))
        });

        Ok(Resolution {
            raw,
            resolved,
            original: url.to_string(),
            link_path,
        })
    }
}
