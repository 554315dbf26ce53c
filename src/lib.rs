pub mod config;
pub mod errors;
pub mod logging;
pub mod shop;
pub mod tools;
pub mod tracker;
