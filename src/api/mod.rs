//! Request/response boundary for visual search
//!
//! [`VisualSearchService`] turns a [`SearchRequest`] into a
//! [`SearchResponse`]: it resolves remote video references to temporary
//! local files, runs the blocking search on a worker thread and enforces an
//! optional wall-clock deadline.

use crate::download::{is_remote_location, FetchedVideo, HttpVideoFetcher, RemoteFetcher};
use crate::error::{Result, SearchError};
use crate::orchestrator::SearchOrchestrator;
use crate::types::{SearchOutcome, SearchRequest, SearchResponse};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Async service owning one orchestrator
///
/// Requests are serialised through a mutex: the detector is used by one
/// worker at a time.
pub struct VisualSearchService {
    orchestrator: Arc<Mutex<SearchOrchestrator>>,
    fetcher: Arc<dyn RemoteFetcher>,
    deadline: Option<Duration>,
}

impl VisualSearchService {
    /// Create a service that fetches remote videos over HTTP(S)
    ///
    /// # Errors
    /// - Failed to create the HTTP client
    pub fn new(orchestrator: SearchOrchestrator) -> Result<Self> {
        Ok(Self::with_fetcher(orchestrator, Arc::new(HttpVideoFetcher::new()?)))
    }

    /// Create a service with a custom remote fetcher
    pub fn with_fetcher(orchestrator: SearchOrchestrator, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        Self {
            orchestrator: Arc::new(Mutex::new(orchestrator)),
            fetcher,
            deadline: None,
        }
    }

    /// Cancel searches that run longer than `deadline`
    ///
    /// Cancellation takes effect between frames; the partial outcome is
    /// returned with a `Cancelled` warning.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Handle one request
    ///
    /// # Errors
    /// - [`SearchError::InvalidConfig`] for an empty query
    /// - [`SearchError::Network`] when a remote video cannot be fetched
    /// - [`SearchError::VideoUnavailable`] when the video cannot be opened
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let outcome = self.search_outcome(&request).await?;
        Ok(outcome.into_response(request.video_location))
    }

    /// Handle one request, returning the full outcome
    ///
    /// # Errors
    /// See [`VisualSearchService::search`].
    pub async fn search_outcome(&self, request: &SearchRequest) -> Result<SearchOutcome> {
        let query = request.query_text.trim();
        if query.is_empty() {
            return Err(SearchError::invalid_config("query_text must not be empty"));
        }

        let fetched = self.resolve(&request.video_location).await?;
        let path = fetched
            .as_ref()
            .map_or_else(|| PathBuf::from(&request.video_location), |f| f.path().to_path_buf());

        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let orchestrator = Arc::clone(&self.orchestrator);
        let query = query.to_string();
        let mut task = tokio::task::spawn_blocking(move || {
            let mut orchestrator = orchestrator
                .lock()
                .map_err(|_| SearchError::internal("search worker poisoned by an earlier panic"))?;
            orchestrator.search_with_cancellation(&path, &query, &worker_cancel)
        });

        let joined = match self.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    log::warn!(
                        "Search of {} exceeded {:.1}s deadline, cancelling",
                        request.video_location,
                        deadline.as_secs_f64()
                    );
                    cancel.cancel();
                    task.await
                },
            },
            None => task.await,
        };

        // The temporary file must outlive the worker
        drop(fetched);
        joined.map_err(|e| SearchError::internal(format!("search worker failed: {e}")))?
    }

    async fn resolve(&self, location: &str) -> Result<Option<FetchedVideo>> {
        if !is_remote_location(location) {
            return Ok(None);
        }
        let fetched = self.fetcher.fetch(location).await?;
        log::debug!(
            "Resolved {} to {} ({} bytes)",
            location,
            fetched.path().display(),
            fetched.bytes
        );
        Ok(Some(fetched))
    }

    /// Release the detector once no request is in flight
    ///
    /// Returns `self` unchanged while another handle still shares the
    /// orchestrator.
    ///
    /// # Errors
    /// - The orchestrator is still shared
    pub fn shutdown(self) -> std::result::Result<(), Self> {
        match Arc::try_unwrap(self.orchestrator) {
            Ok(mutex) => {
                match mutex.into_inner() {
                    Ok(orchestrator) => orchestrator.shutdown(),
                    Err(poisoned) => poisoned.into_inner().shutdown(),
                }
                Ok(())
            },
            Err(orchestrator) => Err(Self {
                orchestrator,
                fetcher: self.fetcher,
                deadline: self.deadline,
            }),
        }
    }
}

impl std::fmt::Debug for VisualSearchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisualSearchService")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}
