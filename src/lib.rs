pub mod client;
pub mod community;
pub mod config;
pub mod error;
pub mod models;
pub mod presence;
pub mod relay;
pub mod settings;
pub mod types;

pub use error::{GatewayError, GatewayResult};
