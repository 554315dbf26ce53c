//! Demo storefront arithmetic.
//!
//! Totals are computed in binary floating point. That is the seeded defect
//! the AI-fix workflow is demonstrated against: 19.99 + 1.99 with a 10%
//! discount and 8.875% tax should be 21.53.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: i64,
    pub name: &'static str,
    pub price: f64,
    pub description: &'static str,
}

pub const PRODUCTS: [Product; 4] = [
    Product {
        id: 1,
        name: "Premium T-Shirt",
        price: 19.99,
        description: "100% cotton",
    },
    Product {
        id: 2,
        name: "Coffee Mug",
        price: 1.99,
        description: "Ceramic 12oz",
    },
    Product {
        id: 3,
        name: "Laptop Sticker",
        price: 0.99,
        description: "Waterproof vinyl",
    },
    Product {
        id: 4,
        name: "Tech Poster",
        price: 9.99,
        description: "24x36 inch",
    },
];

pub fn product_by_id(id: i64) -> Option<&'static Product> {
    PRODUCTS.iter().find(|p| p.id == id)
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CartItem {
    pub price: f64,
    #[serde(default = "default_qty")]
    pub qty: u32,
}

fn default_qty() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartTotals {
    pub subtotal: f64,
    pub discount_pct: f64,
    pub tax_pct: f64,
    pub total: f64,
    pub items_count: usize,
}

#[derive(Debug, Default)]
pub struct Cart {
    items: Vec<CartItem>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&mut self, price: f64, qty: u32) {
        self.items.push(CartItem { price, qty });
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Discount first, then tax. Rates are fractions (0.10 = 10%).
    pub fn calculate_total(&self, discount_pct: f64, tax_pct: f64) -> CartTotals {
        let subtotal: f64 = self
            .items
            .iter()
            .map(|item| item.price * item.qty as f64)
            .sum();

        let discounted = subtotal - subtotal * discount_pct;
        let total = discounted + discounted * tax_pct;

        CartTotals {
            subtotal: round2(subtotal),
            discount_pct,
            tax_pct,
            total: round2(total),
            items_count: self.items.len(),
        }
    }
}
