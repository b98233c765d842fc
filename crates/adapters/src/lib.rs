mod error;
mod generic_ws;
mod registry;
mod traits;

pub use error::AdapterError;
pub use generic_ws::GenericWsAdapter;
pub use registry::AdapterRegistry;
pub use traits::DeviceAdapter;
