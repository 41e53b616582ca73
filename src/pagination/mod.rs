//! Pagination driver
//!
//! Follows a remote feed's cursor until it is exhausted, handing each page
//! to the caller in the order the remote returned it.
//!
//! # Cursor styles
//!
//! - **Next page URL**: `{ metadata: { next_page }, data: [...] }`. The next
//!   request is exactly the returned URL, with no extra parameters.
//! - **Modified after**: `{ count, total, audits: [...] }`. The next request
//!   repeats the query with `modified_after` moved to the last record's
//!   `modified_at`, stopping once `total - count == 0`.
//!
//! Errors from the transport and from page callbacks are returned as they
//! are. Deciding whether a failure is fatal belongs to the caller.

mod driver;
mod strategies;
mod types;

pub use driver::{drain, Pager};
pub use strategies::{ModifiedAfterPaginator, NextPageUrlPaginator};
pub use types::{FeedRequest, NextPage, Page, PaginationState, Paginator};
