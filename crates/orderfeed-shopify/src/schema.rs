//! Shopify Admin GraphQL response types
//!
//! Only the fields the feed needs are modelled. Required fields (order id,
//! name, creation time, connection page info) fail deserialization when
//! missing; everything else defaults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Relay-style connection (`nodes` + `pageInfo`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    #[serde(default = "Vec::new")]
    pub nodes: Vec<T>,
    #[serde(default)]
    pub page_info: Option<PageInfo>,
}

impl<T> Default for Connection<T> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            page_info: None,
        }
    }
}

impl<T> Connection<T> {
    pub fn has_next_page(&self) -> bool {
        self.page_info.as_ref().is_some_and(|p| p.has_next_page)
    }

    pub fn end_cursor(&self) -> Option<&str> {
        self.page_info.as_ref().and_then(|p| p.end_cursor.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    #[serde(default)]
    pub end_cursor: Option<String>,
}

/// One order as returned by the `orders` query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrder {
    /// GID, e.g. `gid://shopify/Order/5734561234`
    pub id: String,
    /// Display name, e.g. `#1001`
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub display_fulfillment_status: Option<String>,
    #[serde(default)]
    pub shipping_address: Option<Address>,
    #[serde(default)]
    pub discount_applications: Connection<DiscountApplication>,
    #[serde(default)]
    pub line_items: Connection<LineItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default)]
    pub country: Option<String>,
}

/// Discount application; only code discounts carry `code`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountApplication {
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub fulfillable_quantity: i64,
    #[serde(default)]
    pub original_unit_price_set: Option<MoneyBag>,
    #[serde(default)]
    pub tax_lines: Vec<TaxLine>,
    #[serde(default)]
    pub variant: Option<Variant>,
}

/// Amount in shop currency and in the customer's presentment currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoneyBag {
    #[serde(default)]
    pub shop_money: Option<Money>,
    #[serde(default)]
    pub presentment_money: Option<Money>,
}

/// Decimal amount as sent by the API (string, e.g. `"129.00"`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Money {
    pub amount: String,
    #[serde(default)]
    pub currency_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxLine {
    #[serde(default)]
    pub price_set: Option<MoneyBag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub image: Option<Image>,
    #[serde(default)]
    pub product: Option<Product>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub featured_image: Option<Image>,
    /// Custom SKU metafield (`custom.my_sku`)
    #[serde(default)]
    pub metafield: Option<Metafield>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metafield {
    #[serde(default)]
    pub value: Option<String>,
}

/// GraphQL envelope
#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<T> {
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default)]
    pub extensions: Option<GraphQlErrorExtensions>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlErrorExtensions {
    #[serde(default)]
    pub code: Option<String>,
}

impl GraphQlError {
    pub fn code(&self) -> Option<&str> {
        self.extensions.as_ref().and_then(|e| e.code.as_deref())
    }
}

/// `data` of the `orders` query
#[derive(Debug, Deserialize)]
pub struct OrdersData {
    pub orders: OrdersConnection,
}

/// Top-level orders connection: `pageInfo` is required here
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdersConnection {
    pub nodes: Vec<RawOrder>,
    pub page_info: PageInfo,
}

/// `data` of the `order_line_items` query
#[derive(Debug, Deserialize)]
pub struct OrderLineItemsData {
    pub order: Option<OrderLineItems>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineItems {
    pub line_items: Connection<LineItem>,
}

/// `data` of the `order_discounts` query
#[derive(Debug, Deserialize)]
pub struct OrderDiscountsData {
    pub order: Option<OrderDiscounts>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDiscounts {
    pub discount_applications: Connection<DiscountApplication>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER_JSON: &str = r##"{
        "id": "gid://shopify/Order/1001",
        "name": "#1001",
        "createdAt": "2025-03-01T08:15:00Z",
        "displayFulfillmentStatus": "UNFULFILLED",
        "shippingAddress": {"country": "Singapore"},
        "discountApplications": {"nodes": [{"code": "WELCOME10"}, {}]},
        "lineItems": {
            "nodes": [{
                "id": "gid://shopify/LineItem/1",
                "quantity": 2,
                "fulfillableQuantity": 1,
                "originalUnitPriceSet": {
                    "shopMoney": {"amount": "129.00", "currencyCode": "SGD"},
                    "presentmentMoney": {"amount": "420.50", "currencyCode": "MYR"}
                },
                "taxLines": [],
                "variant": {
                    "sku": "SG-001",
                    "image": null,
                    "product": {
                        "id": "gid://shopify/Product/77",
                        "vendor": "Acme",
                        "productType": "Shirts",
                        "tags": ["Womens", "Sale"],
                        "metafield": {"value": "MY-001"}
                    }
                }
            }],
            "pageInfo": {"hasNextPage": false, "endCursor": null}
        }
    }"##;

    #[test]
    fn parse_full_order() {
        let order: RawOrder = serde_json::from_str(ORDER_JSON).unwrap();
        assert_eq!(order.name, "#1001");
        assert_eq!(order.line_items.nodes.len(), 1);
        assert!(!order.line_items.has_next_page());
        let product = order.line_items.nodes[0]
            .variant
            .as_ref()
            .and_then(|v| v.product.as_ref())
            .unwrap();
        assert_eq!(product.tags, vec!["Womens", "Sale"]);
        assert_eq!(order.discount_applications.nodes[1].code, None);
    }

    #[test]
    fn missing_line_items_defaults_to_empty() {
        let json = r##"{"id": "gid://shopify/Order/1", "name": "#1", "createdAt": "2025-03-01T00:00:00Z"}"##;
        let order: RawOrder = serde_json::from_str(json).unwrap();
        assert!(order.line_items.nodes.is_empty());
    }

    #[test]
    fn missing_created_at_is_rejected() {
        let json = r##"{"id": "gid://shopify/Order/1", "name": "#1"}"##;
        assert!(serde_json::from_str::<RawOrder>(json).is_err());
    }

    #[test]
    fn orders_page_requires_page_info() {
        let json = r#"{"orders": {"nodes": []}}"#;
        assert!(serde_json::from_str::<OrdersData>(json).is_err());
    }

    #[test]
    fn graphql_error_code() {
        let json = r#"{"data": null, "errors": [{"message": "Throttled", "extensions": {"code": "THROTTLED"}}]}"#;
        let resp: GraphQlResponse<OrdersData> = serde_json::from_str(json).unwrap();
        assert!(resp.data.is_none());
        assert_eq!(resp.errors[0].code(), Some("THROTTLED"));
    }
}
