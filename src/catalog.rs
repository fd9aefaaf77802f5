//! Product catalog for the kiosk.
//!
//! Products arrive from the inventory endpoint as raw warehouse records and
//! are mapped 1:1 into [`Product`]s. Categories are not fetched on their own:
//! they are derived from the product set (one entry per distinct category id,
//! sorted by the category sort weight). [`ProductStore::replace`] swaps the
//! product list and the category list derived from the same snapshot in a
//! single mutation so readers never see lists from two different fetches.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Raw inventory record as returned by `GET /inventory`.
#[derive(Debug, Clone, Deserialize)]
pub struct InventoryRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub stock: i64,
    #[serde(default)]
    pub category_id: String,
    #[serde(default)]
    pub category_name: String,
    #[serde(default)]
    pub category_sort: i64,
    #[serde(default)]
    pub product_sort: i64,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub warehouse_id: Option<String>,
    #[serde(default)]
    pub warehouse_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub stock: i64,
    pub category_id: String,
    pub category_name: String,
    pub category_sort: i64,
    pub product_sort: i64,
    pub image_url: Option<String>,
    pub is_sold_out: bool,
    pub warehouse_id: Option<String>,
    pub warehouse_name: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub sort: i64,
}

impl From<InventoryRecord> for Product {
    fn from(rec: InventoryRecord) -> Self {
        // Sold out when stock is exhausted or the record carries an abnormal
        // status. A record without a status field counts as normal.
        let is_sold_out =
            rec.stock <= 0 || rec.status.as_deref().is_some_and(|s| s != "normal");
        Product {
            id: rec.id,
            name: rec.name,
            price: rec.price,
            stock: rec.stock,
            category_id: rec.category_id,
            category_name: rec.category_name,
            category_sort: rec.category_sort,
            product_sort: rec.product_sort,
            image_url: rec.image_url,
            is_sold_out,
            warehouse_id: rec.warehouse_id,
            warehouse_name: rec.warehouse_name,
            status: rec.status,
        }
    }
}

/// Derive the category list from a product snapshot: one entry per distinct
/// category id (first occurrence wins the name), sorted by sort weight.
pub fn derive_categories(products: &[Product]) -> Vec<Category> {
    let mut by_id: BTreeMap<&str, Category> = BTreeMap::new();
    for product in products {
        by_id.entry(&product.category_id).or_insert_with(|| Category {
            id: product.category_id.clone(),
            name: product.category_name.clone(),
            sort: product.category_sort,
        });
    }
    let mut categories: Vec<Category> = by_id.into_values().collect();
    categories.sort_by(|a, b| a.sort.cmp(&b.sort).then_with(|| a.id.cmp(&b.id)));
    categories
}

#[derive(Debug, Default)]
struct CatalogState {
    products: Vec<Product>,
    categories: Vec<Category>,
}

/// In-memory product/category store. Written only by the inventory task
/// handler, read by the browsing UI.
#[derive(Default)]
pub struct ProductStore {
    inner: Mutex<CatalogState>,
}

impl ProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace products and categories from one inventory snapshot. Products
    /// are ordered for display (category sort, then product sort); categories
    /// are derived from the same snapshot, never from a stale list.
    pub fn replace(&self, mut products: Vec<Product>) {
        products.sort_by(|a, b| {
            a.category_sort
                .cmp(&b.category_sort)
                .then_with(|| a.product_sort.cmp(&b.product_sort))
                .then_with(|| a.id.cmp(&b.id))
        });
        let categories = derive_categories(&products);

        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.products = products;
        state.categories = categories;
    }

    pub fn products(&self) -> Vec<Product> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .products
            .clone()
    }

    pub fn categories(&self) -> Vec<Category> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .categories
            .clone()
    }

    pub fn find(&self, product_id: &str) -> Option<Product> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .products
            .iter()
            .find(|p| p.id == product_id)
            .cloned()
    }
}
