pub mod configuration;
pub mod task;
