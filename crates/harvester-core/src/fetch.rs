//! Paginated listing: one rate-limited, retried request per page, plus the
//! halt rules that keep a misbehaving upstream from looping forever.

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::cursor::Cursor;
use crate::error::FetchError;
use crate::rate_limit::RateLimiter;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::shutdown::{StopReason, StopSignal};
use crate::source::{Combination, ItemKey, ListEndpoint, Page};

/// Visitor verdict after each page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageControl {
    Continue,
    Stop,
}

/// Why pagination of one partition ended
#[derive(Debug, Clone)]
pub enum PaginationEnd {
    /// Server reported no further pages
    Exhausted,
    /// Visitor asked to stop (e.g. capacity reached)
    Stopped,
    /// Continuation set but the page was empty
    EmptyPage,
    /// Continuation set but every item was already seen in this partition
    NoNewItems,
    /// Continuation set but the next cursor did not order after the current one
    NonAdvancingCursor { current: Cursor, next: Cursor },
    /// `max_pages` reached
    PageLimit,
    Interrupted(StopReason),
    /// A page failed permanently or ran out of retries
    Failed(FetchError),
}

impl PaginationEnd {
    /// Normal termination, i.e. not a halt rule, interruption or failure
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Exhausted | Self::Stopped)
    }
}

impl std::fmt::Display for PaginationEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted => f.write_str("exhausted"),
            Self::Stopped => f.write_str("stopped"),
            Self::EmptyPage => f.write_str("empty page with continuation"),
            Self::NoNewItems => f.write_str("page added no new items"),
            Self::NonAdvancingCursor { current, next } => {
                write!(f, "cursor did not advance ({current} -> {next})")
            }
            Self::PageLimit => f.write_str("page limit reached"),
            Self::Interrupted(reason) => write!(f, "{reason}"),
            Self::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// Result of paginating one partition
#[derive(Debug, Clone)]
pub struct PaginationOutcome {
    pub pages: usize,
    pub items_seen: usize,
    /// Items not previously seen in this partition
    pub new_items: usize,
    pub end: PaginationEnd,
}

/// Fetches pages of one list endpoint through its class rate limiter
pub struct PaginatedFetcher<'a> {
    endpoint: &'a dyn ListEndpoint,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    page_size: usize,
    max_pages: Option<usize>,
}

impl<'a> PaginatedFetcher<'a> {
    pub fn new(
        endpoint: &'a dyn ListEndpoint,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        page_size: usize,
    ) -> Self {
        Self {
            endpoint,
            limiter,
            retry,
            page_size,
            max_pages: None,
        }
    }

    /// Hard cap on pages per partition, on top of the halt rules
    pub fn with_max_pages(mut self, max_pages: Option<usize>) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// One request (retried on transient failure) for the page at `cursor`
    pub fn fetch_page(&self, combination: &Combination, cursor: &Cursor) -> Result<Page, FetchError> {
        let label = format!("{} {combination} @ {cursor}", self.endpoint.operation());
        retry_with_backoff(&label, &self.retry, &self.limiter, || {
            self.endpoint.fetch_page(combination, cursor, self.page_size)
        })
    }

    /// Walk every page of `combination` from the start, handing each page to `visit`.
    ///
    /// Halts the partition (never the run) on an empty page, a page adding no
    /// new items, or a cursor that fails to advance, even while the server
    /// still claims continuation.
    pub fn paginate(
        &self,
        combination: &Combination,
        stop: &StopSignal,
        mut visit: impl FnMut(&Page) -> PageControl,
    ) -> PaginationOutcome {
        let mut cursor = Cursor::start();
        let mut seen: FxHashSet<ItemKey> = FxHashSet::default();
        let mut outcome = PaginationOutcome {
            pages: 0,
            items_seen: 0,
            new_items: 0,
            end: PaginationEnd::Exhausted,
        };

        outcome.end = loop {
            if let Some(reason) = stop.check() {
                break PaginationEnd::Interrupted(reason);
            }
            if self.max_pages.is_some_and(|max| outcome.pages >= max) {
                break PaginationEnd::PageLimit;
            }

            let page = match self.fetch_page(combination, &cursor) {
                Ok(page) => page,
                Err(e) => break PaginationEnd::Failed(e),
            };
            outcome.pages += 1;
            outcome.items_seen += page.items.len();
            let fresh = page
                .items
                .iter()
                .filter(|item| seen.insert((*item).clone()))
                .count();
            outcome.new_items += fresh;

            let control = visit(&page);

            if !page.continuation {
                break PaginationEnd::Exhausted;
            }
            if control == PageControl::Stop {
                break PaginationEnd::Stopped;
            }
            if page.items.is_empty() {
                break PaginationEnd::EmptyPage;
            }
            if fresh == 0 {
                break PaginationEnd::NoNewItems;
            }
            if !page.next_cursor.advances_past(&cursor) {
                break PaginationEnd::NonAdvancingCursor {
                    current: cursor,
                    next: page.next_cursor,
                };
            }
            cursor = page.next_cursor;
        };

        match &outcome.end {
            PaginationEnd::Exhausted | PaginationEnd::Stopped => {}
            PaginationEnd::Failed(e) => {
                log::error!("{combination}: pagination failed after {} pages: {e}", outcome.pages)
            }
            other => log::warn!("{combination}: pagination halted after {} pages: {other}", outcome.pages),
        }
        outcome
    }
}
