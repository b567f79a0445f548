pub mod config;
mod http;
pub mod models;
pub mod providers;
pub mod services;
pub mod store;
pub mod ui;
