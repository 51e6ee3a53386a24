//! # contract: seams between the mirroring engine and the network
//!
//! The engine never talks to `reqwest` directly. Everything that touches a remote
//! host goes through the [`Fetcher`] trait so that:
//! - the production client ([`crate::fetch::HttpFetcher`]) can be swapped for a
//!   `mockall` mock in tests,
//! - a single shared download outcome can be handed to every link waiting on it
//!   (hence the cloneable [`FetchError`]).
//!
//! ## Mocking & Testing
//! - The trait is annotated for `mockall`; `MockFetcher` is exported with the
//!   default `test-export-mocks` feature so integration tests can count fetches.

use std::path::PathBuf;

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

/// Why a remote fetch did not produce a document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The remote host answered with a not-found response.
    #[error("not found: {0}")]
    NotFound(String),
    /// Any other non-success status.
    #[error("unexpected status {status} for {url}")]
    Status { url: String, status: u16 },
    /// The request never produced a response.
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },
    /// The body arrived but could not be stored.
    #[error("failed to write {path}: {message}")]
    Write { path: PathBuf, message: String },
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound(_))
    }
}

/// Access to remote content. Implemented by the HTTP client and by mocks.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Lightweight existence check: true when the URL answers with a success code.
    /// The body is not downloaded.
    async fn probe(&self, url: &str) -> Result<bool, FetchError>;

    /// Download the full body of `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}
