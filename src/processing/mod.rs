pub mod backup;
pub mod executor;
pub mod init;
pub mod remove;
