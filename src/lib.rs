pub mod admin;
pub mod auth;
pub mod billing;
pub mod config;
pub mod error;
pub mod extractor;
pub mod images;
pub mod menu;
pub mod organizations;
pub mod routes;
pub mod storage;

pub use routes::api_routes;
