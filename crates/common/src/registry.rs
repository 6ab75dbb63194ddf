mod http_device_registry;

pub use http_device_registry::*;
