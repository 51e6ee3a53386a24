use std::path::PathBuf;

/// Fatal failures of a generation run. Link-level problems never end up here;
/// they are collected as [`crate::diagnostics::Diagnostics`].
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("source tree {0} does not exist")]
    MissingSource(PathBuf),
    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to load template {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MirrorError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MirrorError::Io {
            path: path.into(),
            source,
        }
    }
}
