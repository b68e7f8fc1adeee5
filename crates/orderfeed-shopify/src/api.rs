//! Shopify Admin GraphQL client

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use orderfeed_core::{HttpError, SHARED_RUNTIME, http_client};

use crate::fetch::{DiscountPage, FetchError, LineItemPage, OrderFilter, OrderPage, OrderSource};
use crate::schema::{GraphQlResponse, OrderDiscountsData, OrderLineItemsData, OrdersData};

const ORDERS_QUERY: &str = concat!(
    include_str!("../queries/orders.graphql"),
    include_str!("../queries/line_item_fields.graphql"),
);

const ORDER_LINE_ITEMS_QUERY: &str = concat!(
    include_str!("../queries/order_line_items.graphql"),
    include_str!("../queries/line_item_fields.graphql"),
);

const ORDER_DISCOUNTS_QUERY: &str = include_str!("../queries/order_discounts.graphql");

/// Line items requested inline with each order
pub const DEFAULT_INLINE_LINE_ITEMS: u32 = 10;
/// Page size when completing a truncated line item connection
const LINE_ITEM_PAGE_SIZE: u32 = 50;
/// Discount applications requested inline with each order
const INLINE_DISCOUNTS: u32 = 5;
/// Page size when completing a truncated discount connection
const DISCOUNT_PAGE_SIZE: u32 = 25;

const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

#[derive(Serialize)]
struct GraphQlRequest<'a, V> {
    query: &'a str,
    variables: V,
}

/// GraphQL client for one shop.
pub struct ShopifyClient {
    endpoint: String,
    access_token: String,
    page_size: u32,
    inline_line_items: u32,
}

impl std::fmt::Debug for ShopifyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopifyClient")
            .field("endpoint", &self.endpoint)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl ShopifyClient {
    /// Client for `https://{store}.myshopify.com/admin/api/{api_version}/graphql.json`.
    ///
    /// `store` may be the bare shop handle or a full `*.myshopify.com` domain.
    pub fn new(store: &str, api_version: &str, access_token: impl Into<String>) -> Self {
        Self::with_endpoint(endpoint_url(store, api_version), access_token)
    }

    pub fn with_endpoint(endpoint: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_token: access_token.into(),
            page_size: 25,
            inline_line_items: DEFAULT_INLINE_LINE_ITEMS,
        }
    }

    /// Orders per page (Shopify caps connections at 250)
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, 250);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, FetchError> {
        let request = GraphQlRequest { query, variables };
        let body = SHARED_RUNTIME.handle().block_on(async {
            let resp = http_client()
                .post(&self.endpoint)
                .header(ACCESS_TOKEN_HEADER, &self.access_token)
                .json(&request)
                .send()
                .await
                .map_err(|e| HttpError::from_reqwest(&e))?;
            let status = resp.status();
            let text = resp.text().await.map_err(|e| HttpError::from_reqwest(&e))?;
            if !status.is_success() {
                return Err(HttpError::status(status.as_u16(), truncate(&text, 512)));
            }
            Ok::<_, HttpError>(text)
        })?;
        parse_response(&body)
    }
}

impl OrderSource for ShopifyClient {
    fn fetch_orders(
        &self,
        filter: &OrderFilter,
        after: Option<&str>,
    ) -> Result<OrderPage, FetchError> {
        let variables = json!({
            "first": self.page_size,
            "after": after,
            "query": filter.search_query(),
            "lineItems": self.inline_line_items,
            "discounts": INLINE_DISCOUNTS,
        });
        let data: OrdersData = self.execute(ORDERS_QUERY, variables)?;
        Ok(OrderPage {
            orders: data.orders.nodes,
            page_info: data.orders.page_info,
        })
    }

    fn fetch_line_items(
        &self,
        order_id: &str,
        after: Option<&str>,
    ) -> Result<LineItemPage, FetchError> {
        let variables = json!({
            "id": order_id,
            "first": LINE_ITEM_PAGE_SIZE,
            "after": after,
        });
        let data: OrderLineItemsData = self.execute(ORDER_LINE_ITEMS_QUERY, variables)?;
        let order = data
            .order
            .ok_or_else(|| FetchError::Malformed(format!("order {order_id} not found")))?;
        Ok(order.line_items)
    }

    fn fetch_discounts(
        &self,
        order_id: &str,
        after: Option<&str>,
    ) -> Result<DiscountPage, FetchError> {
        let variables = json!({
            "id": order_id,
            "first": DISCOUNT_PAGE_SIZE,
            "after": after,
        });
        let data: OrderDiscountsData = self.execute(ORDER_DISCOUNTS_QUERY, variables)?;
        let order = data
            .order
            .ok_or_else(|| FetchError::Malformed(format!("order {order_id} not found")))?;
        Ok(order.discount_applications)
    }
}

fn endpoint_url(store: &str, api_version: &str) -> String {
    let store = store.trim().trim_end_matches('/');
    let host = if store.contains('.') {
        store.trim_start_matches("https://").to_string()
    } else {
        format!("{store}.myshopify.com")
    };
    format!("https://{host}/admin/api/{api_version}/graphql.json")
}

/// Decode a GraphQL envelope; `errors` take precedence over partial `data`.
fn parse_response<T: DeserializeOwned>(body: &str) -> Result<T, FetchError> {
    let resp: GraphQlResponse<T> = serde_json::from_str(body)
        .map_err(|e| FetchError::Malformed(format!("{e} in {}", truncate(body, 200))))?;

    if !resp.errors.is_empty() {
        let message = resp
            .errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        let code = |c: &str| resp.errors.iter().any(|e| e.code() == Some(c));
        return Err(if code("THROTTLED") {
            FetchError::Throttled(message)
        } else if code("ACCESS_DENIED") || code("UNAUTHORIZED") {
            FetchError::Auth(message)
        } else {
            FetchError::GraphQl(message)
        });
    }
    resp.data
        .ok_or_else(|| FetchError::Malformed("response has neither data nor errors".into()))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_from_shop_handle() {
        assert_eq!(
            endpoint_url("club21", "2025-04"),
            "https://club21.myshopify.com/admin/api/2025-04/graphql.json"
        );
        assert_eq!(
            endpoint_url("https://club21.myshopify.com/", "2025-04"),
            "https://club21.myshopify.com/admin/api/2025-04/graphql.json"
        );
    }

    #[test]
    fn queries_include_fragment() {
        assert!(ORDERS_QUERY.contains("sortKey: ID"));
        assert!(ORDERS_QUERY.contains("fragment LineItemFields on LineItem"));
        assert!(ORDER_LINE_ITEMS_QUERY.contains("fragment LineItemFields on LineItem"));
        assert!(ORDER_DISCOUNTS_QUERY.contains("discountApplications(first: $first, after: $after)"));
    }

    #[test]
    fn parse_orders_page() {
        let body = r##"{"data": {"orders": {
            "nodes": [{"id": "gid://shopify/Order/7", "name": "#7", "createdAt": "2025-03-01T00:00:00Z"}],
            "pageInfo": {"hasNextPage": true, "endCursor": "eyJsYXN0X2lkIjo3fQ"}
        }}}"##;
        let data: OrdersData = parse_response(body).unwrap();
        assert_eq!(data.orders.nodes.len(), 1);
        assert_eq!(
            data.orders.page_info.end_cursor.as_deref(),
            Some("eyJsYXN0X2lkIjo3fQ")
        );
    }

    #[test]
    fn throttled_error_is_retryable() {
        use orderfeed_core::Retryable;
        let body = r#"{"errors": [{"message": "Throttled", "extensions": {"code": "THROTTLED"}}]}"#;
        let err = parse_response::<OrdersData>(body).unwrap_err();
        assert!(matches!(err, FetchError::Throttled(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn access_denied_is_auth() {
        let body = r#"{"errors": [{"message": "Access denied for orders field.", "extensions": {"code": "ACCESS_DENIED"}}]}"#;
        assert!(parse_response::<OrdersData>(body).unwrap_err().is_auth());
    }

    #[test]
    fn other_graphql_errors_fail() {
        let body = r#"{"data": null, "errors": [{"message": "Field 'foo' doesn't exist"}]}"#;
        assert!(matches!(
            parse_response::<OrdersData>(body),
            Err(FetchError::GraphQl(_))
        ));
    }

    #[test]
    fn non_json_is_malformed() {
        assert!(matches!(
            parse_response::<OrdersData>("<html>502</html>"),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn page_size_is_clamped() {
        let client = ShopifyClient::new("club21", "2025-04", "shpat_x").page_size(1000);
        assert_eq!(client.page_size, 250);
    }
}
