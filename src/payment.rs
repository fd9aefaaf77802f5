//! Payment hand-off.
//!
//! Navigating to payment consumes the cart as an immutable [`OrderDraft`]
//! snapshot: line items, grand total, and a client request id the payment
//! surface can use for idempotent submission. The payment provider's QR
//! protocol itself is an external collaborator and not implemented here.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::cart::CartStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderLine {
    pub product_id: String,
    pub name: String,
    pub unit_price: f64,
    pub quantity: u32,
    pub line_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderDraft {
    pub client_request_id: String,
    pub warehouse_id: Option<String>,
    pub lines: Vec<OrderLine>,
    pub total: f64,
    pub created_at: DateTime<Utc>,
}

/// Snapshot the cart for the payment surface. An empty cart is rejected
/// before any hand-off happens.
pub fn begin_payment(cart: &CartStore, warehouse_id: Option<String>) -> Result<OrderDraft, String> {
    let snapshot = cart.snapshot();
    if snapshot.items.is_empty() {
        return Err("Cart is empty".to_string());
    }

    let lines: Vec<OrderLine> = snapshot
        .items
        .iter()
        .map(|item| OrderLine {
            product_id: item.product.id.clone(),
            name: item.product.name.clone(),
            unit_price: item.product.price,
            quantity: item.quantity,
            line_total: item.product.price * f64::from(item.quantity),
        })
        .collect();

    let draft = OrderDraft {
        client_request_id: Uuid::new_v4().to_string(),
        warehouse_id,
        lines,
        total: snapshot.total,
        created_at: Utc::now(),
    };
    info!(
        client_request_id = %draft.client_request_id,
        total = draft.total,
        lines = draft.lines.len(),
        "payment hand-off created"
    );
    Ok(draft)
}

/// "Cancel order" clears the cart outright.
pub fn cancel_order(cart: &CartStore) {
    cart.clear();
    info!("order cancelled, cart cleared");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Product;

    fn product(id: &str, price: f64) -> Product {
        Product {
            id: id.to_string(),
            name: format!("Product {id}"),
            price,
            stock: 10,
            category_id: "c1".into(),
            category_name: "Drinks".into(),
            category_sort: 1,
            product_sort: 1,
            image_url: None,
            is_sold_out: false,
            warehouse_id: None,
            warehouse_name: None,
            status: Some("normal".into()),
        }
    }

    #[test]
    fn empty_cart_is_rejected() {
        let cart = CartStore::new();
        let err = begin_payment(&cart, None).expect_err("empty cart");
        assert_eq!(err, "Cart is empty");
    }

    #[test]
    fn draft_mirrors_cart_lines_and_total() {
        let cart = CartStore::new();
        cart.add_to_cart(product("1", 3.5));
        cart.add_to_cart(product("1", 3.5));
        cart.add_to_cart(product("2", 2.0));

        let draft = begin_payment(&cart, Some("wh-1".into())).expect("draft");
        assert_eq!(draft.warehouse_id.as_deref(), Some("wh-1"));
        assert_eq!(draft.lines.len(), 2);
        assert_eq!(draft.total, 9.0);

        let first = &draft.lines[0];
        assert_eq!(first.quantity, 2);
        assert_eq!(first.line_total, 7.0);

        // Distinct drafts get distinct request ids.
        let again = begin_payment(&cart, None).expect("second draft");
        assert_ne!(draft.client_request_id, again.client_request_id);
    }

    #[test]
    fn cancel_order_clears_cart() {
        let cart = CartStore::new();
        cart.add_to_cart(product("1", 3.5));
        cancel_order(&cart);
        assert!(cart.is_empty());
        assert_eq!(cart.snapshot().total, 0.0);
    }
}
