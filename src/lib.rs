pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod keys;
pub mod middleware;
pub mod policy;
pub mod rate_limiter;
pub mod response;
pub mod server;
pub mod store;
pub mod upstream;

pub use config::Config;
pub use error::{GatewayError, Result};
pub use server::{create_app, Server};
