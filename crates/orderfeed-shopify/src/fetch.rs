//! Incremental order fetch
//!
//! [`fetch_since`] walks the orders connection page by page (ascending ID)
//! and yields orders lazily. Each page request carries the previous page's
//! `endCursor`; the walk stops when `hasNextPage` is false or on the first
//! error. Truncated line item connections are completed per order.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use orderfeed_core::{HttpError, RetryPolicy, Retryable, retry_with_backoff, sleep_unless_shutdown};
use orderfeed_store::Cursor;

use crate::schema::{Connection, DiscountApplication, LineItem, PageInfo, RawOrder};

/// Which orders to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderFilter {
    /// Full history
    All,
    /// Orders with a numeric id strictly greater than the cursor
    After(Cursor),
    /// Orders created after the instant (first run with a lookback window)
    CreatedAfter(DateTime<Utc>),
}

impl OrderFilter {
    /// Shopify search syntax for the `query` argument
    pub fn search_query(&self) -> Option<String> {
        match self {
            Self::All => None,
            Self::After(cursor) => Some(format!("id:>{cursor}")),
            Self::CreatedAfter(ts) => Some(format!(
                "created_at:>'{}'",
                ts.to_rfc3339_opts(SecondsFormat::Secs, true)
            )),
        }
    }

    /// Whether an order with this cursor belongs to the filtered range
    pub fn admits(&self, cursor: Cursor) -> bool {
        match self {
            Self::After(after) => cursor > *after,
            Self::All | Self::CreatedAfter(_) => true,
        }
    }
}

impl fmt::Display for OrderFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.search_query() {
            Some(q) => f.write_str(&q),
            None => f.write_str("all orders"),
        }
    }
}

/// One page of the orders connection
#[derive(Debug, Clone, PartialEq)]
pub struct OrderPage {
    pub orders: Vec<RawOrder>,
    pub page_info: PageInfo,
}

/// One page of an order's line items
pub type LineItemPage = Connection<LineItem>;

/// One page of an order's discount applications
pub type DiscountPage = Connection<DiscountApplication>;

/// Order fetch failure.
#[derive(Debug)]
pub enum FetchError {
    /// Credentials rejected (HTTP 401/403 or `ACCESS_DENIED`)
    Auth(String),
    /// Transport failure or unexpected HTTP status
    Http(HttpError),
    /// Query cost exceeded the bucket; retried after backoff
    Throttled(String),
    /// GraphQL `errors` in the response
    GraphQl(String),
    /// Response does not have the expected shape
    Malformed(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth(msg) => write!(f, "authentication failed: {msg}"),
            Self::Http(e) => write!(f, "{e}"),
            Self::Throttled(msg) => write!(f, "throttled: {msg}"),
            Self::GraphQl(msg) => write!(f, "GraphQL error: {msg}"),
            Self::Malformed(msg) => write!(f, "malformed response: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<HttpError> for FetchError {
    fn from(e: HttpError) -> Self {
        if e.is_auth() {
            Self::Auth(e.to_string())
        } else {
            Self::Http(e)
        }
    }
}

impl FetchError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_retryable(),
            Self::Throttled(_) => true,
            Self::Auth(_) | Self::GraphQl(_) | Self::Malformed(_) => false,
        }
    }
}

/// Upstream order API.
///
/// Implemented by [`crate::ShopifyClient`]; tests provide synthetic sources.
pub trait OrderSource: Send + Sync {
    /// Fetch one page of orders matching `filter`, starting after `after`.
    fn fetch_orders(
        &self,
        filter: &OrderFilter,
        after: Option<&str>,
    ) -> Result<OrderPage, FetchError>;

    /// Fetch one page of line items of the order `order_id` (GID).
    fn fetch_line_items(
        &self,
        order_id: &str,
        after: Option<&str>,
    ) -> Result<LineItemPage, FetchError>;

    /// Fetch one page of discount applications of the order `order_id` (GID).
    fn fetch_discounts(
        &self,
        order_id: &str,
        after: Option<&str>,
    ) -> Result<DiscountPage, FetchError>;
}

/// Lazily fetch every order matching `filter`.
pub fn fetch_since<S: OrderSource + ?Sized>(
    source: &S,
    filter: OrderFilter,
    retry: RetryPolicy,
) -> OrderStream<'_, S> {
    OrderStream {
        source,
        filter,
        retry,
        page_delay: Duration::ZERO,
        buffer: VecDeque::new(),
        after: None,
        pages: 0,
        done: false,
    }
}

/// Iterator over fetched orders. Fused after the first error.
pub struct OrderStream<'a, S: ?Sized> {
    source: &'a S,
    filter: OrderFilter,
    retry: RetryPolicy,
    page_delay: Duration,
    buffer: VecDeque<RawOrder>,
    after: Option<String>,
    pages: usize,
    done: bool,
}

impl<S: OrderSource + ?Sized> OrderStream<'_, S> {
    /// Pause between consecutive page requests (API rate limit)
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    /// Pages fetched so far
    pub fn pages(&self) -> usize {
        self.pages
    }

    fn fetch_next_page(&mut self) -> Result<(), FetchError> {
        if self.pages > 0 && !self.page_delay.is_zero() && !sleep_unless_shutdown(self.page_delay) {
            log::debug!("Page delay cut short by shutdown request");
        }
        let label = format!("orders page {}", self.pages + 1);
        let page = retry_with_backoff(&label, &self.retry, || {
            self.source.fetch_orders(&self.filter, self.after.as_deref())
        })?;
        self.pages += 1;
        log::debug!(
            "page {}: {} orders (has_next_page={})",
            self.pages,
            page.orders.len(),
            page.page_info.has_next_page
        );

        if page.page_info.has_next_page {
            let Some(cursor) = page.page_info.end_cursor else {
                return Err(FetchError::Malformed(format!(
                    "page {} has hasNextPage without endCursor",
                    self.pages
                )));
            };
            self.after = Some(cursor);
        } else {
            self.done = true;
        }
        self.buffer.extend(page.orders);
        Ok(())
    }

    /// Page the remaining line items of an order with a truncated connection.
    fn complete_line_items(&self, order: &mut RawOrder) -> Result<(), FetchError> {
        let mut extra_pages = 0;
        while order.line_items.has_next_page() {
            let Some(after) = order.line_items.end_cursor().map(str::to_owned) else {
                return Err(FetchError::Malformed(format!(
                    "line items of {} have hasNextPage without endCursor",
                    order.name
                )));
            };
            let label = format!("line items of {}", order.name);
            let page = retry_with_backoff(&label, &self.retry, || {
                self.source.fetch_line_items(&order.id, Some(&after))
            })?;
            order.line_items.nodes.extend(page.nodes);
            order.line_items.page_info = page.page_info;
            extra_pages += 1;
        }
        if extra_pages > 0 {
            log::debug!(
                "{}: fetched {extra_pages} extra line item pages ({} items)",
                order.name,
                order.line_items.nodes.len()
            );
        }
        Ok(())
    }

    /// Page the remaining discount applications of an order.
    fn complete_discounts(&self, order: &mut RawOrder) -> Result<(), FetchError> {
        while order.discount_applications.has_next_page() {
            let Some(after) = order.discount_applications.end_cursor().map(str::to_owned) else {
                return Err(FetchError::Malformed(format!(
                    "discounts of {} have hasNextPage without endCursor",
                    order.name
                )));
            };
            let label = format!("discounts of {}", order.name);
            let page = retry_with_backoff(&label, &self.retry, || {
                self.source.fetch_discounts(&order.id, Some(&after))
            })?;
            order.discount_applications.nodes.extend(page.nodes);
            order.discount_applications.page_info = page.page_info;
        }
        Ok(())
    }
}

impl<S: OrderSource + ?Sized> Iterator for OrderStream<'_, S> {
    type Item = Result<RawOrder, FetchError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(mut order) = self.buffer.pop_front() {
                if let Some(cursor) = Cursor::from_gid(&order.id) {
                    if !self.filter.admits(cursor) {
                        log::warn!(
                            "Dropping order {} ({}): not after {}",
                            order.name,
                            order.id,
                            self.filter
                        );
                        continue;
                    }
                }
                let completed = self
                    .complete_line_items(&mut order)
                    .and_then(|()| self.complete_discounts(&mut order));
                if let Err(e) = completed {
                    self.fuse();
                    return Some(Err(e));
                }
                return Some(Ok(order));
            }
            if self.done {
                return None;
            }
            if let Err(e) = self.fetch_next_page() {
                self.fuse();
                return Some(Err(e));
            }
        }
    }
}

impl<S: ?Sized> OrderStream<'_, S> {
    fn fuse(&mut self) {
        self.done = true;
        self.buffer.clear();
    }
}
