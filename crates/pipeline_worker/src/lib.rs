pub mod config;
pub mod nats;
pub mod step_worker;
pub mod steps;
