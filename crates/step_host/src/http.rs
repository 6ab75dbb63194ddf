mod http_step_invoker;
mod step_endpoint;

pub use http_step_invoker::*;
pub use step_endpoint::*;
