// OSF connection - authenticated HTTP client layer

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod manager;
pub mod notify;
pub mod reachability;
pub mod request;
pub mod transfer;

pub use error::{ConnectionError, Result};
pub use manager::ConnectionManager;
