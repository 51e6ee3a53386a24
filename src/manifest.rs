//! Bookkeeping persisted in the mirror between runs.
//!
//! Downloaded documents keep resolving their relative links against the URL they
//! came from, and links that were redirected to their remote source stay
//! redirected. Both facts only exist at download time, so they are stored here.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::MirrorError;

/// Directory inside the mirror root holding run bookkeeping. Never loaded as a document.
pub const MANIFEST_DIR: &str = ".docmirror";
const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Mirror location → browse URL the document was downloaded from.
    #[serde(default)]
    pub origins: BTreeMap<String, String>,
    /// Remote URLs links were redirected to instead of being mirrored.
    #[serde(default)]
    pub redirects: BTreeSet<String>,
}

impl Manifest {
    pub fn path(mirror_dir: &Path) -> PathBuf {
        mirror_dir.join(MANIFEST_DIR).join(MANIFEST_FILE)
    }

    /// Reads the manifest of `mirror_dir`. A missing or unreadable manifest is empty.
    pub fn load(mirror_dir: &Path) -> Self {
        let path = Self::path(mirror_dir);
        let Ok(bytes) = fs::read(&path) else {
            debug!(path = %path.display(), "No manifest in mirror");
            return Self::default();
        };
        match serde_json::from_slice(&bytes) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Ignoring unreadable manifest");
                Self::default()
            }
        }
    }

    pub fn save(&self, mirror_dir: &Path) -> Result<(), MirrorError> {
        let path = Self::path(mirror_dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| MirrorError::io(parent, e))?;
        }
        let bytes = serde_json::to_vec_pretty(self).map_err(|source| MirrorError::Manifest {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, bytes).map_err(|e| MirrorError::io(&path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn survives_a_save_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut manifest = Manifest::default();
        manifest.origins.insert(
            "libraries/x/index.md".into(),
            "https://github.com/org/x/blob/main/README.md".into(),
        );
        manifest
            .redirects
            .insert("https://github.com/org/x/blob/main/other.md".into());
        manifest.save(dir.path()).expect("save");

        assert_eq!(Manifest::load(dir.path()), manifest);
    }

    #[test]
    fn garbage_reads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join(MANIFEST_DIR)).expect("mkdir");
        fs::write(Manifest::path(dir.path()), b"{not json").expect("write");
        assert_eq!(Manifest::load(dir.path()), Manifest::default());
    }
}
