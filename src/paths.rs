//! Pure path and URL helpers shared by every stage of link resolution.
//!
//! In-tree locations are handled as `/`-separated strings relative to the mirror
//! root, never as OS paths, so the path calculus behaves identically on every
//! platform. Conversion to [`std::path::PathBuf`] only happens at I/O boundaries.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;

pub const PATH_SEP: char = '/';
/// Conventional per-directory index document in the source tree.
pub const README: &str = "README.md";
/// Name a mirrored index document is saved under.
pub const INDEX: &str = "index.md";
/// Extension of the documents this crate manages and renders.
pub const MANAGED_EXTENSION: &str = ".md";
pub const RENDERED_EXTENSION: &str = ".html";

static SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").expect("scheme regex"));

pub fn is_remote(link: &str) -> bool {
    link.starts_with("http://") || link.starts_with("https://")
}

pub fn is_relative(link: &str) -> bool {
    link.starts_with('.')
}

/// True for links carrying a scheme this crate cannot follow (`mailto:`, `ftp://`, ...).
pub fn has_foreign_scheme(link: &str) -> bool {
    !is_remote(link) && SCHEME.is_match(link)
}

/// Last path segment, ignoring a trailing separator.
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches(PATH_SEP);
    trimmed.rsplit(PATH_SEP).next().unwrap_or(trimmed)
}

/// Directory part of `path`; empty for root-level entries.
pub fn parent(path: &str) -> &str {
    let trimmed = path.trim_end_matches(PATH_SEP);
    match trimmed.rfind(PATH_SEP) {
        Some(idx) => &trimmed[..idx],
        None => "",
    }
}

/// Extension of the final segment without the dot. Hidden files have none.
pub fn extension(path: &str) -> &str {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => "",
        Some(idx) => &name[idx + 1..],
    }
}

/// Whether the final segment of `path` ends with `ext` (given with its dot).
pub fn has_extension(path: &str, ext: &str) -> bool {
    let name = file_name(path);
    !ext.is_empty() && name.len() > ext.len() && name.ends_with(ext)
}

/// Meaningful segments of a path: empty and `.` segments are dropped.
pub fn segments(path: &str) -> Vec<&str> {
    path.split(PATH_SEP)
        .filter(|s| !s.is_empty() && *s != ".")
        .collect()
}

/// Collapses `.` and `..` segments. Leading `..` that cannot be collapsed are kept.
pub fn normalize(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for seg in segments(path) {
        if seg == ".." {
            match out.last() {
                Some(last) if *last != ".." => {
                    out.pop();
                }
                _ => out.push(seg),
            }
        } else {
            out.push(seg);
        }
    }
    let joined = out.join("/");
    if path.starts_with(PATH_SEP) {
        format!("/{joined}")
    } else {
        joined
    }
}

pub fn join(base: &str, rest: &str) -> String {
    if base.is_empty() {
        return normalize(rest);
    }
    normalize(&format!("{base}/{rest}"))
}

/// Number of directory levels separating a document from the tree root.
///
/// Root-level documents count as one level: a single `../` already leaves the tree.
pub fn depth(rel: &str) -> usize {
    segments(parent(rel)).len().max(1)
}

/// How many `../` hops a link takes.
pub fn parent_hops(link: &str) -> usize {
    link.matches("../").count()
}

/// Drops the trailing `#anchor` of a link; everything before the last `#` is kept.
pub fn strip_anchor(link: &str) -> &str {
    match link.rfind('#') {
        Some(idx) => &link[..idx],
        None => link,
    }
}

/// Relative directory path leading from `from_dir` to `to_dir`.
///
/// Segments are compared from the root until they diverge; every remaining
/// segment of `from_dir` becomes one `..`, followed by the divergent remainder of
/// `to_dir`. Returns an empty string when both directories are the same.
pub fn bridge(from_dir: &str, to_dir: &str) -> String {
    let from = segments(from_dir);
    let to = segments(to_dir);
    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts: Vec<&str> = vec![".."; from.len() - common];
    parts.extend_from_slice(&to[common..]);
    parts.join("/")
}

/// Relative link from the document at `from` to the file at `to`, both relative to
/// the same root. The result always starts with `.` so renderers treat it as relative.
pub fn path_to(to: &str, from: &str) -> String {
    let dir = bridge(parent(from), parent(to));
    let name = file_name(to);
    let mapped = if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    };
    if mapped.starts_with('.') {
        mapped
    } else {
        format!("./{mapped}")
    }
}

/// Resolves `update` against the directory of `base`.
///
/// `base` may be a URL or a plain path: URL-relative resolution is attempted first
/// and path-join semantics are used when `base` does not parse as a URL.
pub fn merge_safe(base: &str, update: &str) -> String {
    let dir = match base.rfind(PATH_SEP) {
        Some(idx) => &base[..idx],
        None => "",
    };
    Url::parse(&format!("{dir}/"))
        .and_then(|url| url.join(update))
        .map(|url| url.to_string())
        .unwrap_or_else(|_| join(dir, update))
}

/// Maps a `README.md` file name onto the mirrored index name.
pub fn indexed(path: &str) -> String {
    if file_name(path) == README {
        let dir = parent(path);
        if dir.is_empty() {
            INDEX.to_string()
        } else {
            format!("{dir}/{INDEX}")
        }
    } else {
        path.to_string()
    }
}

/// Form a managed link takes in the rendered site: `README.md` becomes the
/// directory index and the managed extension becomes `.html`. Other links are
/// returned unchanged.
pub fn rendered_form(link: &str) -> String {
    if !has_extension(link, MANAGED_EXTENSION) {
        return link.to_string();
    }
    let indexed = if file_name(link) == README {
        let cut = link.len() - README.len();
        format!("{}{}", &link[..cut], INDEX)
    } else {
        link.to_string()
    };
    let stem = &indexed[..indexed.len() - MANAGED_EXTENSION.len()];
    format!("{stem}{RENDERED_EXTENSION}")
}
