mod step_delivery_service;

pub use step_delivery_service::*;
