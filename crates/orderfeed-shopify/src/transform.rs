//! RawOrder → feed rows (one row per line item)

use std::fmt;

use rayon::prelude::*;
use serde::Serialize;

use orderfeed_store::Cursor;

use crate::gender::{Gender, GenderRules};
use crate::schema::{LineItem, MoneyBag, RawOrder};

/// Amount written when a price or tax set is absent
const ZERO_AMOUNT: &str = "0.00";

/// One feed row. Field order is column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformedRow {
    #[serde(rename = "OrderId")]
    pub order_id: u64,
    #[serde(rename = "OrderName")]
    pub order_name: String,
    /// RFC 3339, UTC
    #[serde(rename = "OrderDate")]
    pub order_date: String,
    #[serde(rename = "ProductId")]
    pub product_id: Option<u64>,
    #[serde(rename = "SKU")]
    pub sku: Option<String>,
    #[serde(rename = "CustomSKU")]
    pub custom_sku: Option<String>,
    #[serde(rename = "Quantity")]
    pub quantity: i64,
    #[serde(rename = "QuantityReady")]
    pub quantity_ready: i64,
    #[serde(rename = "Price")]
    pub price: String,
    #[serde(rename = "PresentmentPrice")]
    pub presentment_price: String,
    #[serde(rename = "ItemTax")]
    pub item_tax: String,
    #[serde(rename = "PresentmentItemTax")]
    pub presentment_item_tax: String,
    #[serde(rename = "Brand")]
    pub brand: Option<String>,
    #[serde(rename = "Category")]
    pub category: Option<String>,
    #[serde(rename = "DiscountCode")]
    pub discount_code: Option<String>,
    #[serde(rename = "ShippingCountry")]
    pub shipping_country: Option<String>,
    #[serde(rename = "Gender")]
    pub gender: Gender,
    #[serde(rename = "ImageURL")]
    pub image_url: Option<String>,
}

impl TransformedRow {
    pub const HEADER: [&'static str; 18] = [
        "OrderId",
        "OrderName",
        "OrderDate",
        "ProductId",
        "SKU",
        "CustomSKU",
        "Quantity",
        "QuantityReady",
        "Price",
        "PresentmentPrice",
        "ItemTax",
        "PresentmentItemTax",
        "Brand",
        "Category",
        "DiscountCode",
        "ShippingCountry",
        "Gender",
        "ImageURL",
    ];
}

/// An order that cannot be turned into rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformError {
    pub order: String,
    pub reason: String,
}

impl TransformError {
    fn new(order: &RawOrder, reason: impl Into<String>) -> Self {
        Self {
            order: order.name.clone(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "order {}: {}", self.order, self.reason)
    }
}

impl std::error::Error for TransformError {}

/// Rows for a whole batch
#[derive(Debug, Default)]
pub struct BatchOutput {
    pub rows: Vec<TransformedRow>,
    /// Orders that passed the fulfillment-status filter
    pub orders_transformed: usize,
    /// Orders excluded by the filter
    pub orders_excluded: usize,
}

/// Pure order → rows mapping.
#[derive(Debug, Clone, Default)]
pub struct Transformer {
    rules: GenderRules,
    /// Upper-case `displayFulfillmentStatus` values to keep; empty keeps all
    statuses: Vec<String>,
}

impl Transformer {
    pub fn new(rules: GenderRules) -> Self {
        Self {
            rules,
            statuses: Vec::new(),
        }
    }

    /// Only keep orders whose fulfillment status is in `statuses`
    pub fn with_fulfillment_statuses<S: AsRef<str>>(mut self, statuses: &[S]) -> Self {
        self.statuses = statuses
            .iter()
            .map(|s| s.as_ref().trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    pub fn rules(&self) -> &GenderRules {
        &self.rules
    }

    /// Whether the order passes the fulfillment-status filter
    pub fn admits(&self, order: &RawOrder) -> bool {
        if self.statuses.is_empty() {
            return true;
        }
        order
            .display_fulfillment_status
            .as_deref()
            .is_some_and(|s| self.statuses.iter().any(|want| want.eq_ignore_ascii_case(s)))
    }

    /// Transform one order. No line items (or filtered out) ⇒ no rows.
    pub fn transform(&self, order: &RawOrder) -> Result<Vec<TransformedRow>, TransformError> {
        let order_id = Cursor::from_gid(&order.id)
            .ok_or_else(|| TransformError::new(order, format!("invalid order id {:?}", order.id)))?
            .value();
        if !self.admits(order) {
            return Ok(Vec::new());
        }

        let order_date = order
            .created_at
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let discount_code = discount_codes(order);
        let shipping_country = order
            .shipping_address
            .as_ref()
            .and_then(|a| non_empty(a.country.as_deref()));

        let mut rows = Vec::with_capacity(order.line_items.nodes.len());
        for item in &order.line_items.nodes {
            let variant = item.variant.as_ref();
            let product = variant.and_then(|v| v.product.as_ref());
            let sku = variant.and_then(|v| non_empty(v.sku.as_deref()));
            let custom_sku = product
                .and_then(|p| p.metafield.as_ref())
                .and_then(|m| non_empty(m.value.as_deref()));

            if sku.is_none() && custom_sku.is_none() && item.quantity == 0 {
                log::debug!(
                    "{}: skipping line item {:?} (no SKU, zero quantity)",
                    order.name,
                    item.id
                );
                continue;
            }

            let product_id = match product {
                Some(p) => Some(
                    Cursor::from_gid(&p.id)
                        .ok_or_else(|| {
                            TransformError::new(order, format!("invalid product id {:?}", p.id))
                        })?
                        .value(),
                ),
                None => None,
            };
            let (price, presentment_price) = amounts(order, item.original_unit_price_set.as_ref())?;
            let (item_tax, presentment_item_tax) = amounts(
                order,
                item.tax_lines.first().and_then(|t| t.price_set.as_ref()),
            )?;
            let tags = product.map(|p| p.tags.as_slice()).unwrap_or_default();

            rows.push(TransformedRow {
                order_id,
                order_name: order.name.clone(),
                order_date: order_date.clone(),
                product_id,
                sku,
                custom_sku,
                quantity: item.quantity,
                quantity_ready: item.fulfillable_quantity,
                price,
                presentment_price,
                item_tax,
                presentment_item_tax,
                brand: product.and_then(|p| non_empty(p.vendor.as_deref())),
                category: product.and_then(|p| non_empty(p.product_type.as_deref())),
                discount_code: discount_code.clone(),
                shipping_country: shipping_country.clone(),
                gender: self.rules.classify(tags),
                image_url: image_url(item),
            });
        }
        Ok(rows)
    }

    /// Transform a batch in parallel, preserving order.
    ///
    /// Fails with the error of the earliest failing order.
    pub fn transform_batch(&self, orders: &[RawOrder]) -> Result<BatchOutput, TransformError> {
        let results: Vec<_> = orders
            .par_iter()
            .map(|order| (self.admits(order), self.transform(order)))
            .collect();

        let mut out = BatchOutput::default();
        for (admitted, rows) in results {
            let rows = rows?;
            if admitted {
                out.orders_transformed += 1;
            } else {
                out.orders_excluded += 1;
            }
            out.rows.extend(rows);
        }
        Ok(out)
    }
}

/// Comma-joined discount codes, `None` if the order used none
fn discount_codes(order: &RawOrder) -> Option<String> {
    let codes: Vec<String> = order
        .discount_applications
        .nodes
        .iter()
        .filter_map(|d| non_empty(d.code.as_deref()))
        .collect();
    if codes.is_empty() {
        None
    } else {
        Some(codes.join(","))
    }
}

/// Variant image, else the product's featured image
fn image_url(item: &LineItem) -> Option<String> {
    let variant = item.variant.as_ref()?;
    variant
        .image
        .as_ref()
        .and_then(|i| non_empty(i.url.as_deref()))
        .or_else(|| {
            variant
                .product
                .as_ref()
                .and_then(|p| p.featured_image.as_ref())
                .and_then(|i| non_empty(i.url.as_deref()))
        })
}

/// (shop, presentment) amounts of a money bag, validated as decimals
fn amounts(
    order: &RawOrder,
    bag: Option<&MoneyBag>,
) -> Result<(String, String), TransformError> {
    let shop = bag.and_then(|b| b.shop_money.as_ref()).map(|m| m.amount.as_str());
    let presentment = bag
        .and_then(|b| b.presentment_money.as_ref())
        .map(|m| m.amount.as_str());
    Ok((decimal(order, shop)?, decimal(order, presentment)?))
}

fn decimal(order: &RawOrder, amount: Option<&str>) -> Result<String, TransformError> {
    let Some(amount) = amount.map(str::trim) else {
        return Ok(ZERO_AMOUNT.to_string());
    };
    match amount.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(amount.to_string()),
        _ => Err(TransformError::new(
            order,
            format!("invalid money amount {amount:?}"),
        )),
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned)
}
