//! Demo storefront: a fixed product catalog and a cart calculator.

pub mod api;
pub mod cart;
