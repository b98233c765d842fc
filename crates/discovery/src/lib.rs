mod dns;
mod error;
mod mdns;
mod probe;
mod service;

pub use error::DiscoveryError;
pub use mdns::DEFAULT_SERVICE_TYPE;
pub use service::DiscoveryService;
