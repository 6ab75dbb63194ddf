mod device_registry;
mod measurement;
mod message;
mod pipeline_error;
mod result;
mod wire;

pub use device_registry::*;
pub use measurement::*;
pub use message::*;
pub use pipeline_error::*;
pub use result::*;
pub use wire::*;
