//! Page loop

use super::types::{FeedRequest, NextPage, Page, PaginationState, Paginator};
use crate::error::Result;
use crate::http::{HttpClient, RequestConfig};
use serde_json::Value;

/// Pull-style iterator over the pages of one feed
pub struct Pager<'a, P> {
    client: &'a HttpClient,
    paginator: P,
    next: Option<FeedRequest>,
    state: PaginationState,
}

impl<'a, P: Paginator> Pager<'a, P> {
    /// Start at `request`
    pub fn new(client: &'a HttpClient, request: FeedRequest, paginator: P) -> Self {
        Self {
            client,
            paginator,
            next: Some(request),
            state: PaginationState::default(),
        }
    }

    pub fn state(&self) -> &PaginationState {
        &self.state
    }

    /// Fetch the next page, `None` once the cursor is exhausted
    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        let Some(request) = self.next.take() else {
            return Ok(None);
        };

        let config = RequestConfig::new().query_pairs(request.params.iter().cloned());
        let body: Value = self.client.get_json(&request.url, config).await?;

        let records = self.paginator.records(&body)?;
        let remaining = self.paginator.remaining(&body);
        if let NextPage::Continue { request } =
            self.paginator
                .process_response(&body, &request, &records, &mut self.state)?
        {
            self.next = Some(request);
        }

        Ok(Some(Page {
            number: self.state.pages,
            records,
            remaining,
        }))
    }
}

/// Drain a feed, calling `on_page` once per page
///
/// Returns the number of pages seen. The first error, from the transport
/// or from `on_page`, stops the drain and is returned unchanged.
pub async fn drain<P, F>(
    client: &HttpClient,
    request: FeedRequest,
    paginator: P,
    mut on_page: F,
) -> Result<usize>
where
    P: Paginator,
    F: FnMut(Page) -> Result<()>,
{
    let mut pager = Pager::new(client, request, paginator);
    while let Some(page) = pager.next_page().await? {
        on_page(page)?;
    }
    Ok(pager.state().pages)
}
