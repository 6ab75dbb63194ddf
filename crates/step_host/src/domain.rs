mod command_step;
mod remote_step;
mod step;
mod step_host;
mod step_invoker;

pub use command_step::*;
pub use remote_step::*;
pub use step::*;
pub use step_host::*;
pub use step_invoker::*;
