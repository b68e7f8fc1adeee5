//! End-to-end runs against a synthetic shop and a local bucket

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use orderfeed_core::{ProgressContext, RetryPolicy};
use orderfeed_shopify::schema::{
    Connection, LineItem, Money, MoneyBag, PageInfo, Product, Variant,
};
use orderfeed_shopify::{
    DiscountPage, ErrorCategory, FetchError, Gender, LineItemPage, OrderFilter, OrderPage,
    OrderSource, OutputLayout, OutputWriter, Pipeline, Publisher, RawOrder, RunOptions, RunState, Transformer,
};
use orderfeed_store::{
    BlobError, BlobStore, Checkpoint, CheckpointStore, Cursor, LocalBlobStore,
};

// ---- synthetic shop ----

fn order(id: u64, tags: &[&str]) -> RawOrder {
    RawOrder {
        id: format!("gid://shopify/Order/{id}"),
        name: format!("#{id}"),
        created_at: Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap(),
        display_fulfillment_status: Some("UNFULFILLED".into()),
        shipping_address: None,
        discount_applications: Connection::default(),
        line_items: Connection {
            nodes: vec![LineItem {
                id: Some(format!("gid://shopify/LineItem/{id}")),
                quantity: 1,
                fulfillable_quantity: 1,
                original_unit_price_set: Some(MoneyBag {
                    shop_money: Some(Money {
                        amount: "50.00".into(),
                        currency_code: Some("SGD".into()),
                    }),
                    presentment_money: None,
                }),
                tax_lines: Vec::new(),
                variant: Some(Variant {
                    id: None,
                    sku: Some(format!("SKU-{id}")),
                    image: None,
                    product: Some(Product {
                        id: "gid://shopify/Product/77".into(),
                        vendor: Some("Acme".into()),
                        product_type: None,
                        tags: tags.iter().map(|t| t.to_string()).collect(),
                        featured_image: None,
                        metafield: None,
                    }),
                }),
            }],
            page_info: None,
        },
    }
}

fn orders(ids: std::ops::RangeInclusive<u64>) -> Vec<RawOrder> {
    ids.map(|id| order(id, &["Mens"])).collect()
}

/// Serves `orders` in pages; the page cursor is the offset into the filtered list.
struct FakeShop {
    orders: Mutex<Vec<RawOrder>>,
    page_size: usize,
    /// Return every order regardless of the filter
    ignore_filter: bool,
    fail_auth: bool,
    /// Requests for pages after the first answered with `Throttled`
    throttles: Mutex<u32>,
    filters: Mutex<Vec<OrderFilter>>,
}

impl FakeShop {
    fn new(orders: Vec<RawOrder>) -> Self {
        Self {
            orders: Mutex::new(orders),
            page_size: 50,
            ignore_filter: false,
            fail_auth: false,
            throttles: Mutex::new(0),
            filters: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, more: Vec<RawOrder>) {
        self.orders.lock().unwrap().extend(more);
    }

    fn requests(&self) -> usize {
        self.filters.lock().unwrap().len()
    }
}

impl OrderSource for FakeShop {
    fn fetch_orders(
        &self,
        filter: &OrderFilter,
        after: Option<&str>,
    ) -> Result<OrderPage, FetchError> {
        self.filters.lock().unwrap().push(*filter);
        if self.fail_auth {
            return Err(FetchError::Auth("HTTP 401: Invalid API key".into()));
        }
        if after.is_some() {
            let mut throttles = self.throttles.lock().unwrap();
            if *throttles > 0 {
                *throttles -= 1;
                return Err(FetchError::Throttled("cost 1000 exceeds bucket".into()));
            }
        }
        let matching: Vec<RawOrder> = self
            .orders
            .lock()
            .unwrap()
            .iter()
            .filter(|o| {
                self.ignore_filter
                    || Cursor::from_gid(&o.id).map_or(true, |c| filter.admits(c))
            })
            .cloned()
            .collect();
        let offset: usize = after.map_or(0, |a| a.parse().unwrap());
        let end = (offset + self.page_size).min(matching.len());
        let has_next_page = end < matching.len();
        Ok(OrderPage {
            orders: matching[offset..end].to_vec(),
            page_info: PageInfo {
                has_next_page,
                end_cursor: has_next_page.then(|| end.to_string()),
            },
        })
    }

    fn fetch_line_items(
        &self,
        _order_id: &str,
        _after: Option<&str>,
    ) -> Result<LineItemPage, FetchError> {
        Ok(Connection::default())
    }

    fn fetch_discounts(
        &self,
        _order_id: &str,
        _after: Option<&str>,
    ) -> Result<DiscountPage, FetchError> {
        Ok(Connection::default())
    }
}

// ---- bucket with injectable failures ----

struct FlakyStore {
    inner: LocalBlobStore,
    /// Puts to keys under this prefix fail
    fail_prefix: Mutex<Option<String>>,
}

impl FlakyStore {
    fn fail_puts_under(&self, prefix: Option<&str>) {
        *self.fail_prefix.lock().unwrap() = prefix.map(str::to_owned);
    }

    fn check(&self, key: &str) -> Result<(), BlobError> {
        match self.fail_prefix.lock().unwrap().as_deref() {
            Some(prefix) if key.starts_with(prefix) => Err(BlobError::Io(io::Error::other(
                "injected upload failure",
            ))),
            _ => Ok(()),
        }
    }
}

impl BlobStore for FlakyStore {
    fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<(), BlobError> {
        self.check(key)?;
        self.inner.put_file(key, path, content_type)
    }

    fn put_bytes(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), BlobError> {
        self.check(key)?;
        self.inner.put_bytes(key, data, content_type)
    }

    fn get_bytes(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        self.inner.get_bytes(key)
    }

    fn location(&self, key: &str) -> String {
        self.inner.location(key)
    }
}

struct Harness {
    dir: TempDir,
    store: Arc<FlakyStore>,
    cancel: Arc<AtomicBool>,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let inner = LocalBlobStore::new(dir.path().join("bucket")).unwrap();
        Self {
            dir,
            store: Arc::new(FlakyStore {
                inner,
                fail_prefix: Mutex::new(None),
            }),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    fn bucket(&self) -> PathBuf {
        self.dir.path().join("bucket")
    }

    fn checkpoints(&self) -> CheckpointStore {
        CheckpointStore::new(self.store.clone(), "LatestOrder", RetryPolicy::none())
    }

    fn options(&self) -> RunOptions {
        RunOptions {
            retry: RetryPolicy::none(),
            page_delay: Duration::ZERO,
            cancel: Some(self.cancel.clone()),
            ..RunOptions::default()
        }
    }

    fn pipeline(&self, shop: &Arc<FakeShop>, options: RunOptions) -> Pipeline {
        let blobs: Arc<dyn BlobStore> = self.store.clone();
        Pipeline::new(
            shop.clone(),
            self.checkpoints(),
            Transformer::default(),
            OutputWriter::new(self.dir.path().join("staging")).unwrap(),
            Publisher::new(blobs, OutputLayout::default(), RetryPolicy::none()),
            options,
        )
    }

    fn seed_checkpoint(&self, id: u64) {
        self.checkpoints()
            .save(&Checkpoint {
                id: format!("gid://shopify/Order/{id}"),
                name: Some(format!("#{id}")),
                created_at: None,
                committed_at: None,
                order_count: 0,
                output: None,
                content_hash: None,
            })
            .unwrap();
    }

    fn checkpoint_cursor(&self) -> Option<u64> {
        self.checkpoints()
            .load()
            .unwrap()
            .and_then(|c| c.cursor())
            .map(Cursor::value)
    }

    fn read_output(&self, name: &str) -> String {
        std::fs::read_to_string(self.bucket().join("OrderFeed").join(name)).unwrap()
    }

    fn published_files(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.bucket().join("OrderFeed")) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

fn run(pipeline: &Pipeline) -> Result<orderfeed_shopify::RunSummary, orderfeed_shopify::RunFailure> {
    pipeline.run(&ProgressContext::hidden())
}

// ---- tests ----

#[test]
fn first_run_publishes_and_advances_checkpoint() {
    let h = Harness::new();
    let shop = Arc::new(FakeShop::new(orders(1001..=1005)));

    let summary = run(&h.pipeline(&shop, h.options())).unwrap();

    assert_eq!(summary.orders_fetched, 5);
    assert_eq!(summary.rows, 5);
    assert_eq!(summary.previous_cursor, None);
    assert_eq!(summary.cursor, Some(1005));
    let receipt = summary.output.unwrap();
    assert_eq!(receipt.output_key, "OrderFeed/ORDERS_1001-1005.csv");
    assert_eq!(receipt.raw_key, None);

    let csv = h.read_output("ORDERS_1001-1005.csv");
    assert_eq!(csv.lines().count(), 6);
    assert!(csv.lines().nth(1).unwrap().starts_with("1001,#1001,"));

    let checkpoint = h.checkpoints().load().unwrap().unwrap();
    assert_eq!(checkpoint.cursor(), Some(Cursor::new(1005)));
    assert_eq!(checkpoint.order_count, 5);
    assert_eq!(checkpoint.output.as_deref(), Some("OrderFeed/ORDERS_1001-1005.csv"));
    assert_eq!(checkpoint.content_hash, Some(receipt.content_hash));

    // Staging is cleared after success
    let staged = std::fs::read_dir(h.dir.path().join("staging")).unwrap().count();
    assert_eq!(staged, 0);
}

#[test]
fn rerun_without_new_orders_changes_nothing() {
    let h = Harness::new();
    let shop = Arc::new(FakeShop::new(orders(1001..=1003)));
    let pipeline = h.pipeline(&shop, h.options());
    run(&pipeline).unwrap();
    let before = std::fs::read(h.bucket().join("LatestOrder/last_order.json")).unwrap();

    let summary = run(&pipeline).unwrap();

    assert_eq!(summary.orders_fetched, 0);
    assert!(summary.output.is_none());
    assert_eq!(summary.cursor, Some(1003));
    let after = std::fs::read(h.bucket().join("LatestOrder/last_order.json")).unwrap();
    assert_eq!(before, after);
    assert_eq!(h.published_files(), ["ORDERS_1001-1003.csv"]);
}

#[test]
fn empty_shop_is_success_without_output() {
    let h = Harness::new();
    let shop = Arc::new(FakeShop::new(Vec::new()));

    let summary = run(&h.pipeline(&shop, h.options())).unwrap();

    assert_eq!(summary.orders_fetched, 0);
    assert!(summary.output.is_none());
    assert_eq!(h.checkpoint_cursor(), None);
    assert!(h.published_files().is_empty());
}

#[test]
fn resumes_strictly_after_checkpoint() {
    let h = Harness::new();
    h.seed_checkpoint(1003);
    let shop = Arc::new(FakeShop::new(orders(1001..=1007)));

    let summary = run(&h.pipeline(&shop, h.options())).unwrap();

    assert_eq!(summary.orders_fetched, 4);
    assert_eq!(summary.previous_cursor, Some(1003));
    assert_eq!(
        shop.filters.lock().unwrap()[0],
        OrderFilter::After(Cursor::new(1003))
    );
    let csv = h.read_output("ORDERS_1004-1007.csv");
    let ids: Vec<&str> = csv
        .lines()
        .skip(1)
        .map(|l| l.split(',').next().unwrap())
        .collect();
    assert_eq!(ids, ["1004", "1005", "1006", "1007"]);
    assert_eq!(h.checkpoint_cursor(), Some(1007));
}

#[test]
fn orders_at_or_before_checkpoint_are_dropped_when_filter_is_ignored() {
    let h = Harness::new();
    h.seed_checkpoint(1003);
    let mut shop = FakeShop::new(orders(1001..=1005));
    shop.ignore_filter = true;
    let shop = Arc::new(shop);

    let summary = run(&h.pipeline(&shop, h.options())).unwrap();

    assert_eq!(summary.orders_fetched, 2);
    assert_eq!(h.published_files(), ["ORDERS_1004-1005.csv"]);
}

#[test]
fn new_orders_after_a_run_are_picked_up_next_time() {
    let h = Harness::new();
    let shop = Arc::new(FakeShop::new(orders(1001..=1002)));
    let pipeline = h.pipeline(&shop, h.options());
    run(&pipeline).unwrap();

    shop.push(orders(1003..=1004));
    let summary = run(&pipeline).unwrap();

    assert_eq!(summary.orders_fetched, 2);
    assert_eq!(
        h.published_files(),
        ["ORDERS_1001-1002.csv", "ORDERS_1003-1004.csv"]
    );
    assert_eq!(h.checkpoint_cursor(), Some(1004));
}

#[test]
fn paginates_until_last_page() {
    let h = Harness::new();
    let shop = Arc::new(FakeShop::new(orders(1..=117)));

    let summary = run(&h.pipeline(&shop, h.options())).unwrap();

    assert_eq!(shop.requests(), 3);
    assert_eq!(summary.orders_fetched, 117);
    let csv = h.read_output("ORDERS_1-117.csv");
    let ids: Vec<u64> = csv
        .lines()
        .skip(1)
        .map(|l| l.split(',').next().unwrap().parse().unwrap())
        .collect();
    assert_eq!(ids, (1..=117).collect::<Vec<_>>());
}

#[test]
fn publish_failure_keeps_checkpoint_and_retry_reuses_key() {
    let h = Harness::new();
    h.seed_checkpoint(1002);
    let shop = Arc::new(FakeShop::new(orders(1001..=1005)));
    let pipeline = h.pipeline(&shop, h.options());

    h.store.fail_puts_under(Some("OrderFeed/"));
    let failure = run(&pipeline).unwrap_err();
    assert_eq!(failure.category, ErrorCategory::PublishError);
    assert_eq!(failure.state, RunState::Publishing);
    assert_eq!(h.checkpoint_cursor(), Some(1002));
    assert!(h.published_files().is_empty());

    h.store.fail_puts_under(None);
    let summary = run(&pipeline).unwrap();
    assert_eq!(summary.orders_fetched, 3);
    assert_eq!(h.published_files(), ["ORDERS_1003-1005.csv"]);
    assert_eq!(h.checkpoint_cursor(), Some(1005));
}

#[test]
fn checkpoint_save_failure_leaves_output_to_be_overwritten() {
    let h = Harness::new();
    let shop = Arc::new(FakeShop::new(orders(1001..=1003)));
    let pipeline = h.pipeline(&shop, h.options());

    h.store.fail_puts_under(Some("LatestOrder/"));
    let failure = run(&pipeline).unwrap_err();
    assert_eq!(failure.category, ErrorCategory::CheckpointError);
    assert_eq!(failure.state, RunState::CommittingCheckpoint);
    assert_eq!(h.checkpoint_cursor(), None);
    assert_eq!(h.published_files(), ["ORDERS_1001-1003.csv"]);

    h.store.fail_puts_under(None);
    run(&pipeline).unwrap();
    // Same range, same key: no duplicate file
    assert_eq!(h.published_files(), ["ORDERS_1001-1003.csv"]);
    assert_eq!(h.checkpoint_cursor(), Some(1003));
}

#[test]
fn transform_failure_fails_whole_run() {
    let h = Harness::new();
    let mut batch = orders(1001..=1003);
    if let Some(product) = batch[1].line_items.nodes[0]
        .variant
        .as_mut()
        .and_then(|v| v.product.as_mut())
    {
        product.id = "gid://shopify/Product/not-a-number".into();
    }
    let shop = Arc::new(FakeShop::new(batch));

    let failure = run(&h.pipeline(&shop, h.options())).unwrap_err();

    assert_eq!(failure.category, ErrorCategory::TransformError);
    assert!(failure.message.contains("#1002"));
    assert_eq!(h.checkpoint_cursor(), None);
    assert!(h.published_files().is_empty());
}

#[test]
fn auth_failure_is_reported_as_auth() {
    let h = Harness::new();
    let mut shop = FakeShop::new(orders(1..=3));
    shop.fail_auth = true;
    let shop = Arc::new(shop);

    let failure = run(&h.pipeline(&shop, h.options())).unwrap_err();

    assert_eq!(failure.category, ErrorCategory::AuthError);
    assert_eq!(failure.state, RunState::Fetching);
}

#[test]
fn shutdown_stops_before_publish() {
    let h = Harness::new();
    let shop = Arc::new(FakeShop::new(orders(1..=3)));
    h.cancel.store(true, Ordering::Relaxed);

    let failure = run(&h.pipeline(&shop, h.options())).unwrap_err();

    assert_eq!(failure.category, ErrorCategory::Cancelled);
    assert_eq!(failure.state, RunState::Writing);
    assert!(h.published_files().is_empty());
    assert_eq!(h.checkpoint_cursor(), None);
}

#[test]
fn gender_rule_order_wins_end_to_end() {
    let h = Harness::new();
    let shop = Arc::new(FakeShop::new(vec![
        order(1, &["womens", "kids"]),
        order(2, &["Sale"]),
    ]));

    run(&h.pipeline(&shop, h.options())).unwrap();

    let csv = h.read_output("ORDERS_1-2.csv");
    let gender_col = orderfeed_shopify::TransformedRow::HEADER
        .iter()
        .position(|c| *c == "Gender")
        .unwrap();
    let genders: Vec<String> = csv
        .lines()
        .skip(1)
        .map(|l| l.split(',').nth(gender_col).unwrap().to_string())
        .collect();
    assert_eq!(
        genders,
        [Gender::Kids.to_string(), Gender::Unknown.to_string()]
    );
}

#[test]
fn raw_json_published_when_enabled() {
    let h = Harness::new();
    let shop = Arc::new(FakeShop::new(orders(7..=8)));
    let options = RunOptions {
        publish_raw: true,
        ..h.options()
    };

    let summary = run(&h.pipeline(&shop, options)).unwrap();

    assert_eq!(
        summary.output.unwrap().raw_key.as_deref(),
        Some("Raw/ORDERS_7-8.json")
    );
    let raw = std::fs::read_to_string(h.bucket().join("Raw/ORDERS_7-8.json")).unwrap();
    let parsed: Vec<RawOrder> = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed.len(), 2);
}

#[test]
fn lookback_window_applies_without_checkpoint() {
    let h = Harness::new();
    let shop = Arc::new(FakeShop::new(Vec::new()));
    let options = RunOptions {
        initial_lookback_days: Some(7),
        ..h.options()
    };

    run(&h.pipeline(&shop, options)).unwrap();

    let filter = shop.filters.lock().unwrap()[0];
    let OrderFilter::CreatedAfter(since) = filter else {
        panic!("expected a created_at filter, got {filter:?}");
    };
    let age = Utc::now() - since;
    assert!(age >= chrono::Duration::days(7));
    assert!(age < chrono::Duration::days(7) + chrono::Duration::minutes(5));
}

#[test]
fn throttled_page_is_retried_within_budget() {
    let h = Harness::new();
    let mut shop = FakeShop::new(orders(1..=4));
    shop.page_size = 2;
    *shop.throttles.lock().unwrap() = 2;
    let shop = Arc::new(shop);
    let options = RunOptions {
        retry: RetryPolicy::new(2, Duration::ZERO),
        ..h.options()
    };

    let summary = run(&h.pipeline(&shop, options)).unwrap();

    assert_eq!(summary.orders_fetched, 4);
    assert_eq!(shop.requests(), 4);
    assert_eq!(h.published_files(), ["ORDERS_1-4.csv"]);
    assert_eq!(h.checkpoint_cursor(), Some(4));
}

#[test]
fn throttling_beyond_budget_fails_without_advancing() {
    let h = Harness::new();
    h.seed_checkpoint(1000);
    let mut shop = FakeShop::new(orders(1001..=1004));
    shop.page_size = 2;
    *shop.throttles.lock().unwrap() = 5;
    let shop = Arc::new(shop);
    let options = RunOptions {
        retry: RetryPolicy::new(2, Duration::ZERO),
        ..h.options()
    };

    let failure = run(&h.pipeline(&shop, options)).unwrap_err();

    assert_eq!(failure.category, ErrorCategory::FetchError);
    assert_eq!(failure.state, RunState::Fetching);
    assert!(failure.message.contains("throttled"));
    // First page plus three attempts at the second
    assert_eq!(shop.requests(), 4);
    assert!(h.published_files().is_empty());
    assert_eq!(h.checkpoint_cursor(), Some(1000));
}

#[test]
fn unrelated_staging_files_survive_a_run() {
    let h = Harness::new();
    let staging = h.dir.path().join("staging");
    std::fs::create_dir_all(&staging).unwrap();
    std::fs::write(staging.join("package.json"), b"{}").unwrap();
    std::fs::write(staging.join("customers.csv"), b"id\n1\n").unwrap();
    let shop = Arc::new(FakeShop::new(orders(1..=2)));

    run(&h.pipeline(&shop, h.options())).unwrap();

    assert!(staging.join("package.json").exists());
    assert!(staging.join("customers.csv").exists());
    assert!(!staging.join("ORDERS_1-2.csv").exists());
    assert!(!staging.join("ORDERS_1-2.json").exists());
}
