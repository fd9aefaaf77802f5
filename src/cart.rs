//! In-memory shopping cart.
//!
//! Items are unique by product id; the running total is recomputed on every
//! mutating path so it can never drift from the item list. All operations are
//! synchronous and side-effect-free beyond the store's own state.

use std::sync::Mutex;

use serde::Serialize;

use crate::catalog::Product;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartItem {
    pub product: Product,
    pub quantity: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Cart {
    pub items: Vec<CartItem>,
    pub total: f64,
}

fn compute_total(items: &[CartItem]) -> f64 {
    items
        .iter()
        .map(|item| item.product.price * f64::from(item.quantity))
        .sum()
}

/// Reducer-style cart container. Mutated by UI actions, read by the payment
/// hand-off; independent of the polling loop.
#[derive(Default)]
pub struct CartStore {
    inner: Mutex<Cart>,
}

impl CartStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one unit of `product`: increments the quantity if the product is
    /// already present, otherwise appends a new line with quantity 1.
    pub fn add_to_cart(&self, product: Product) {
        let mut cart = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match cart.items.iter_mut().find(|i| i.product.id == product.id) {
            Some(item) => item.quantity += 1,
            None => cart.items.push(CartItem {
                product,
                quantity: 1,
            }),
        }
        cart.total = compute_total(&cart.items);
    }

    pub fn remove_from_cart(&self, product_id: &str) {
        let mut cart = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        cart.items.retain(|i| i.product.id != product_id);
        cart.total = compute_total(&cart.items);
    }

    /// Set the quantity for a product; a value of zero removes the line.
    pub fn update_quantity(&self, product_id: &str, quantity: u32) {
        let mut cart = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if quantity == 0 {
            cart.items.retain(|i| i.product.id != product_id);
        } else if let Some(item) = cart.items.iter_mut().find(|i| i.product.id == product_id) {
            item.quantity = quantity;
        }
        cart.total = compute_total(&cart.items);
    }

    pub fn clear(&self) {
        let mut cart = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *cart = Cart::default();
    }

    pub fn snapshot(&self) -> Cart {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .items
            .is_empty()
    }
}
