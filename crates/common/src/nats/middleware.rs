mod consumer_tracing;
mod consumer_types;
mod delivery_logging;
mod publish_tracing;
mod publish_types;
mod publisher;

pub use consumer_tracing::*;
pub use consumer_types::*;
pub use delivery_logging::*;
pub use publish_tracing::*;
pub use publish_types::*;
pub use publisher::*;
