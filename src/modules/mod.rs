pub mod mqtt;
pub mod parser;
pub mod repository;
