//! Inspection media downloads
//!
//! Media URLs come from the `media_hypertext_reference` column of
//! inspection items, newline separated. Downloads run on a bounded pool and
//! never fail the feed: a missing photo is logged, not fatal.

use crate::error::{Error, Result};
use crate::feed::{FeedDescriptor, Row};
use crate::http::HttpClient;
use crate::sink::StorageSink;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn, Span};

const REFERENCE_COLUMN: &str = "media_hypertext_reference";
const AUDIT_COLUMN: &str = "audit_id";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// One attachment to download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub audit_id: String,
    pub media_id: String,
    pub url: String,
}

/// Media id of a URL: its last path segment, without a query string
pub fn media_id(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
}

/// Attachments referenced by a page of rows
pub fn media_refs(feed: &FeedDescriptor, rows: &[Row]) -> Vec<MediaRef> {
    let (Some(refs), Some(audit)) = (
        feed.column_index(REFERENCE_COLUMN),
        feed.column_index(AUDIT_COLUMN),
    ) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for row in rows {
        let (Some(urls), Some(audit_id)) = (row[refs].as_str(), row[audit].as_str()) else {
            continue;
        };
        for url in urls.split('\n').map(str::trim).filter(|u| !u.is_empty()) {
            if let Some(id) = media_id(url) {
                out.push(MediaRef {
                    audit_id: audit_id.to_string(),
                    media_id: id.to_string(),
                    url: url.to_string(),
                });
            }
        }
    }
    out
}

/// Downloads attachments into a sink with bounded concurrency
#[derive(Clone)]
pub struct MediaDownloader {
    client: HttpClient,
    sink: Arc<dyn StorageSink>,
    permits: Arc<Semaphore>,
    span: Span,
}

impl MediaDownloader {
    pub fn new(client: HttpClient, sink: Arc<dyn StorageSink>, concurrency: usize) -> Self {
        Self {
            client,
            sink,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            span: Span::none(),
        }
    }

    /// Parent log events on `span`
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Download every attachment, returning how many were stored
    pub async fn download_all(&self, refs: Vec<MediaRef>) -> usize {
        let mut tasks = JoinSet::new();
        for media in refs {
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };
            let this = self.clone();
            tasks.spawn(async move {
                let stored = this.download(&media).await;
                drop(permit);
                (media, stored)
            });
        }

        let mut stored = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(true))) => stored += 1,
                Ok((_, Ok(false))) => {}
                Ok((media, Err(e))) => {
                    warn!(parent: &self.span, audit_id = %media.audit_id, media_id = %media.media_id, error = %e, "media download failed");
                }
                Err(e) => warn!(parent: &self.span, error = %e, "media task panicked"),
            }
        }
        stored
    }

    /// Fetch and store one attachment; `false` when there was nothing to store
    async fn download(&self, media: &MediaRef) -> Result<bool> {
        let download = match self.client.get_bytes(&media.url).await {
            Ok(download) => download,
            Err(e) if e.is_forbidden() => {
                debug!(parent: &self.span, media_id = %media.media_id, "media access denied");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        if download.status == 204 || download.body.is_empty() {
            return Ok(false);
        }

        let content_type = download
            .content_type
            .as_deref()
            .unwrap_or(FALLBACK_CONTENT_TYPE);
        self.sink
            .write_media(&media.audit_id, &media.media_id, content_type, &download.body)
            .await
            .map_err(|e| Error::storage(format!("cannot store media {}: {e}", media.media_id)))?;
        Ok(true)
    }
}

impl std::fmt::Debug for MediaDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaDownloader")
            .field("sink", &self.sink.kind())
            .field("available", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}
