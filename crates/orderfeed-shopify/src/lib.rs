//! orderfeed-shopify: incremental Shopify order extraction
//!
//! Fetches orders created since the last checkpoint from the Admin GraphQL
//! API, flattens them into one CSV row per line item, publishes the file to
//! a blob store and only then advances the checkpoint.
//!
//! # Example
//!
//! ```ignore
//! use orderfeed_core::ProgressContext;
//! use orderfeed_shopify::PipelineConfig;
//!
//! let config = PipelineConfig {
//!     store: "club21".into(),
//!     access_token: std::env::var("SHOPIFY_ACCESS_TOKEN")?,
//!     ..Default::default()
//! };
//! let summary = config.build()?.run(&ProgressContext::new())?;
//! println!("Published {} rows", summary.rows);
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod fetch;
pub mod gender;
pub mod publish;
pub mod runner;
pub mod schema;
pub mod transform;
pub mod writer;

// Re-exports
pub use api::ShopifyClient;
pub use config::{PipelineConfig, StorageTarget};
pub use error::{ErrorCategory, PipelineError};
pub use fetch::{
    DiscountPage, FetchError, LineItemPage, OrderFilter, OrderPage, OrderSource, fetch_since,
};
pub use gender::{Gender, GenderRule, GenderRules, MatchMode, default_rules};
pub use publish::{OutputLayout, PublishError, PublishReceipt, Publisher};
pub use runner::{Pipeline, RunFailure, RunOptions, RunState, RunSummary};
pub use schema::RawOrder;
pub use transform::{BatchOutput, TransformError, TransformedRow, Transformer};
pub use writer::{OutputWriter, WriteError};
