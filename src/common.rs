pub mod collections;
pub mod config;
pub mod deferred;
pub mod log;
