mod bridge;
mod error;
mod http;
mod service;
mod ws;

pub use bridge::BridgeService;
pub use error::IngressError;
pub use service::IngressService;
