pub mod command;
pub mod devices;
pub mod system_service;

pub use command::*;
pub use devices::*;
pub use system_service::*;
