use chrono::{TimeZone, Utc};
use orderfeed_shopify::schema::{
    Connection, Image, LineItem, Metafield, Money, MoneyBag, Product, Variant,
};
use orderfeed_shopify::{GenderRules, RawOrder, Transformer};

const TAG_SETS: [&[&str]; 4] = [
    &["Womens", "Dresses", "New Arrival"],
    &["Mens", "Outerwear"],
    &["Kids", "Girls", "Sale"],
    &["Accessories"],
];

fn money(amount: &str) -> MoneyBag {
    MoneyBag {
        shop_money: Some(Money {
            amount: amount.to_string(),
            currency_code: Some("SGD".into()),
        }),
        presentment_money: Some(Money {
            amount: amount.to_string(),
            currency_code: Some("SGD".into()),
        }),
    }
}

fn synthetic_orders(n: u64, items_per_order: usize) -> Vec<RawOrder> {
    (0..n)
        .map(|i| RawOrder {
            id: format!("gid://shopify/Order/{}", 5_000_000 + i),
            name: format!("#{}", 1000 + i),
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
            display_fulfillment_status: Some("UNFULFILLED".into()),
            shipping_address: None,
            discount_applications: Connection::default(),
            line_items: Connection {
                nodes: (0..items_per_order)
                    .map(|j| LineItem {
                        id: None,
                        quantity: 1,
                        fulfillable_quantity: 1,
                        original_unit_price_set: Some(money("129.00")),
                        tax_lines: Vec::new(),
                        variant: Some(Variant {
                            id: None,
                            sku: Some(format!("SKU-{i}-{j}")),
                            image: None,
                            product: Some(Product {
                                id: format!("gid://shopify/Product/{}", 700 + j),
                                vendor: Some("Acme".into()),
                                product_type: Some("Apparel".into()),
                                tags: TAG_SETS[j % TAG_SETS.len()]
                                    .iter()
                                    .map(|t| t.to_string())
                                    .collect(),
                                featured_image: Some(Image {
                                    url: Some("https://cdn.example/p.jpg".into()),
                                }),
                                metafield: Some(Metafield { value: None }),
                            }),
                        }),
                    })
                    .collect(),
                page_info: None,
            },
        })
        .collect()
}

#[divan::bench(args = [100, 1_000])]
fn transform_batch(bencher: divan::Bencher, n: u64) {
    let orders = synthetic_orders(n, 4);
    let transformer = Transformer::default();
    bencher.bench(|| transformer.transform_batch(&orders).unwrap());
}

#[divan::bench]
fn classify_gender(bencher: divan::Bencher) {
    let rules = GenderRules::default();
    bencher.bench(|| {
        TAG_SETS
            .iter()
            .map(|tags| rules.classify(tags))
            .collect::<Vec<_>>()
    });
}

fn main() {
    divan::main();
}
